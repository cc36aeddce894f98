//! Who is online and who is typing where, as seen from pushed events.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use parley_shared::protocol::{ConversationSummary, ServerEvent};
use parley_shared::{ConversationId, UserId};

#[derive(Debug, Clone, Default)]
pub struct PresenceView {
    online: HashSet<UserId>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
    typing: HashMap<ConversationId, HashSet<UserId>>,
}

impl PresenceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a freshly fetched conversation list.
    pub fn seed(&mut self, conversations: &[ConversationSummary]) {
        for summary in conversations {
            let peer = &summary.peer;
            if peer.is_online {
                self.online.insert(peer.id);
            } else {
                self.online.remove(&peer.id);
            }
            if let Some(seen) = peer.last_seen {
                self.last_seen.insert(peer.id, seen);
            }
        }
    }

    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::UserOnline(e) => {
                self.online.insert(e.user_id);
            }
            ServerEvent::UserOffline(e) => {
                self.online.remove(&e.user_id);
                self.last_seen.insert(e.user_id, e.last_seen);
                for users in self.typing.values_mut() {
                    users.remove(&e.user_id);
                }
            }
            ServerEvent::UserTyping(e) => {
                let users = self.typing.entry(e.conversation_id).or_default();
                if e.is_typing {
                    users.insert(e.user_id);
                } else {
                    users.remove(&e.user_id);
                }
            }
            // A delivered message ends that sender's typing burst.
            ServerEvent::NewMessage(e) => {
                if let Some(users) = self.typing.get_mut(&e.conversation_id) {
                    users.remove(&e.message.sender_id);
                }
            }
            ServerEvent::MessageSent(_) | ServerEvent::MessagesRead(_) => {}
        }
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    pub fn last_seen(&self, user: UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(&user).copied()
    }

    pub fn typing_in(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.typing
            .get(&conversation_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::protocol::{UserOffline, UserOnline, UserTyping};

    #[test]
    fn online_offline_and_typing() {
        let mut view = PresenceView::new();
        let bob = UserId::new();
        let conv = ConversationId::new();

        view.apply(&ServerEvent::UserOnline(UserOnline { user_id: bob }));
        assert!(view.is_online(bob));

        view.apply(&ServerEvent::UserTyping(UserTyping {
            user_id: bob,
            conversation_id: conv,
            is_typing: true,
        }));
        assert_eq!(view.typing_in(conv), vec![bob]);

        let at = Utc::now();
        view.apply(&ServerEvent::UserOffline(UserOffline {
            user_id: bob,
            last_seen: at,
        }));
        assert!(!view.is_online(bob));
        assert_eq!(view.last_seen(bob), Some(at));
        assert!(view.typing_in(conv).is_empty());
    }

    #[test]
    fn typing_stop_clears_user() {
        let mut view = PresenceView::new();
        let bob = UserId::new();
        let conv = ConversationId::new();

        for is_typing in [true, false] {
            view.apply(&ServerEvent::UserTyping(UserTyping {
                user_id: bob,
                conversation_id: conv,
                is_typing,
            }));
        }
        assert!(view.typing_in(conv).is_empty());
    }
}
