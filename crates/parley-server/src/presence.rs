//! Presence: registering push channels and broadcasting online/offline
//! transitions to every other connected session.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::protocol::{ServerEvent, UserOffline, UserOnline};
use parley_shared::UserId;

use crate::error::ServerError;
use crate::registry::ChannelHandle;
use crate::service::ChatService;

impl ChatService {
    /// Register a freshly authenticated channel for `user`.
    ///
    /// Replaces any previous channel, marks the user online, advances
    /// messages waiting for them to `delivered` and announces them.
    pub fn connect(&self, user: UserId, handle: ChannelHandle) -> Result<(), ServerError> {
        let conn_id = handle.conn_id();

        // The registry write and the presence columns change under the same
        // database lock so a racing teardown cannot leave them disagreeing.
        // Registration comes last: a failed write must leave no entry behind.
        let delivered = {
            let db = self.db()?;
            let delivered = db.transaction(|db| {
                db.set_user_online(user)?;
                db.mark_delivered_for_recipient(user)
            })?;

            if let Some(previous) = self.registry().register(user, handle) {
                info!(
                    user = %user,
                    old_conn = %previous.conn_id(),
                    new_conn = %conn_id,
                    "Replaced existing channel"
                );
            }
            delivered
        };

        info!(
            user = %user,
            conn = %conn_id,
            online = self.registry().online_count(),
            delivered,
            "User connected"
        );

        self.broadcast_except(user, ServerEvent::UserOnline(UserOnline { user_id: user }));
        Ok(())
    }

    /// Tear down `conn_id` for `user`.
    ///
    /// Returns `false` when the connection had already been replaced; in that
    /// case nothing changes and nothing is broadcast.
    pub fn disconnect(&self, user: UserId, conn_id: Uuid) -> Result<bool, ServerError> {
        let last_seen = Utc::now();
        {
            let db = self.db()?;
            if !self.registry().unregister(user, conn_id) {
                debug!(user = %user, conn = %conn_id, "Ignoring stale disconnect");
                return Ok(false);
            }
            db.set_user_offline(user, last_seen)?;
        }

        info!(user = %user, conn = %conn_id, "User disconnected");

        self.broadcast_except(
            user,
            ServerEvent::UserOffline(UserOffline {
                user_id: user,
                last_seen,
            }),
        );
        Ok(true)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.registry().lookup(user).is_some()
    }

    fn broadcast_except(&self, user: UserId, event: ServerEvent) {
        for (_, handle) in self.registry().others(user) {
            handle.push(event.clone());
        }
    }
}
