//! User directory: profile upserts from verified credentials and lookups.

use serde::Deserialize;
use tracing::debug;

use parley_shared::constants::DEFAULT_DIRECTORY_LIMIT;
use parley_shared::protocol::{DirectoryPage, PublicProfile};
use parley_shared::UserId;
use parley_store::User;

use crate::error::ServerError;
use crate::service::ChatService;

/// Largest directory page a caller may request.
const MAX_DIRECTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ChatService {
    /// Record the identity carried by a verified credential. Only the display
    /// name is refreshed; presence columns stay owned by the registry.
    pub fn ensure_user(&self, id: UserId, display_name: &str) -> Result<User, ServerError> {
        let db = self.db()?;
        Ok(db.upsert_user(id, display_name)?)
    }

    pub fn profile(&self, id: UserId) -> Result<PublicProfile, ServerError> {
        let db = self.db()?;
        match db.find_user(id)? {
            Some(user) => Ok(user.profile()),
            None => Err(ServerError::NotFound("User".into())),
        }
    }

    /// Everyone except `viewer`, online users first.
    pub fn search_users(
        &self,
        viewer: UserId,
        query: &DirectoryQuery,
    ) -> Result<DirectoryPage, ServerError> {
        let page = query.page.unwrap_or(1);
        if page == 0 {
            return Err(ServerError::BadRequest("page starts at 1".into()));
        }
        let limit = query
            .limit
            .unwrap_or(DEFAULT_DIRECTORY_LIMIT)
            .clamp(1, MAX_DIRECTORY_LIMIT);
        let search = query.search.as_deref().unwrap_or("");

        let (users, total) = {
            let db = self.db()?;
            db.search_users(viewer, search, limit, (page - 1).saturating_mul(limit))?
        };

        debug!(viewer = %viewer, search, total, "Directory search");

        Ok(DirectoryPage {
            users: users.iter().map(User::profile).collect(),
            total,
            page,
            pages: total.div_ceil(u64::from(limit)) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connect, service, user};

    #[test]
    fn ensure_user_keeps_presence() {
        let chat = service();
        let a = user(&chat, "Alice");
        let _rx = connect(&chat, a);

        let updated = chat.ensure_user(a, "Alice Liddell").unwrap();
        assert_eq!(updated.display_name, "Alice Liddell");
        assert!(updated.is_online);
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let chat = service();
        assert!(matches!(
            chat.profile(UserId::new()),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn search_excludes_viewer_and_lists_online_first() {
        let chat = service();
        let me = user(&chat, "Me");
        let _anna = user(&chat, "Anna");
        let zed = user(&chat, "Zed");
        let _rx = connect(&chat, zed);

        let page = chat.search_users(me, &DirectoryQuery::default()).unwrap();
        let names: Vec<_> = page.users.iter().map(|u| u.display_name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "Anna"]);
        assert_eq!(page.total, 2);
        assert_eq!(page.pages, 1);

        let filtered = chat
            .search_users(
                me,
                &DirectoryQuery {
                    search: Some("ann".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.users.len(), 1);
        assert_eq!(filtered.users[0].display_name, "Anna");
    }

    #[test]
    fn page_zero_is_rejected() {
        let chat = service();
        let me = user(&chat, "Me");
        let query = DirectoryQuery {
            page: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            chat.search_users(me, &query),
            Err(ServerError::BadRequest(_))
        ));
    }
}
