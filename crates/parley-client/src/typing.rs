//! Typing-indicator debouncer.
//!
//! The first keystroke after an idle period sends typing-start. Typing-stop
//! follows once keystrokes pause for the idle timeout, or right away when
//! the message is sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use parley_shared::{ConversationId, UserId};

/// Where typing signals go, usually the push channel.
pub trait TypingSink: Send + Sync + 'static {
    fn send_typing(&self, conversation_id: ConversationId, recipient_id: UserId, is_typing: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    conversation_id: ConversationId,
    recipient_id: UserId,
}

#[derive(Debug)]
enum Signal {
    Keystroke(Target),
    Stop,
}

#[derive(Clone)]
pub struct TypingNotifier {
    tx: mpsc::UnboundedSender<Signal>,
}

impl TypingNotifier {
    /// Spawn the debounce task. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn TypingSink>, idle: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(sink, idle, rx));
        Self { tx }
    }

    pub fn keystroke(&self, conversation_id: ConversationId, recipient_id: UserId) {
        let _ = self.tx.send(Signal::Keystroke(Target {
            conversation_id,
            recipient_id,
        }));
    }

    /// Send typing-stop now if typing-start is outstanding.
    pub fn stop(&self) {
        let _ = self.tx.send(Signal::Stop);
    }
}

async fn run(sink: Arc<dyn TypingSink>, idle: Duration, mut rx: mpsc::UnboundedReceiver<Signal>) {
    let mut active: Option<Target> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Keystroke(target)) => {
                    if active != Some(target) {
                        if let Some(previous) = active {
                            sink.send_typing(previous.conversation_id, previous.recipient_id, false);
                        }
                        sink.send_typing(target.conversation_id, target.recipient_id, true);
                        trace!(conversation = %target.conversation_id, "Typing started");
                        active = Some(target);
                    }
                    deadline = Instant::now() + idle;
                }
                Some(Signal::Stop) => {
                    if let Some(previous) = active.take() {
                        sink.send_typing(previous.conversation_id, previous.recipient_id, false);
                    }
                }
                None => {
                    if let Some(previous) = active.take() {
                        sink.send_typing(previous.conversation_id, previous.recipient_id, false);
                    }
                    break;
                }
            },
            _ = sleep_until(deadline), if active.is_some() => {
                if let Some(previous) = active.take() {
                    trace!(conversation = %previous.conversation_id, "Typing idle");
                    sink.send_typing(previous.conversation_id, previous.recipient_id, false);
                }
            }
        }
    }
}
