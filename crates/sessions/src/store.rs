//! Session storage with per-user locking.
//!
//! The outer map lock is held only long enough to clone out the per-session
//! `Arc`; mutations take the inner lock, so concurrent trades against
//! different users never serialize on each other.

use copybot_types::{Address, UserSession};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Address, Arc<RwLock<UserSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session for `user` unless one already exists. Returns false
    /// when the user already had one.
    pub async fn insert(&self, user: Address, session: UserSession) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&user) {
            return false;
        }
        sessions.insert(user, Arc::new(RwLock::new(session)));
        true
    }

    /// Handle for mutating one user's session under its own lock.
    pub async fn entry(&self, user: &Address) -> Option<Arc<RwLock<UserSession>>> {
        self.sessions.read().await.get(user).cloned()
    }

    /// Fetch `user`'s handle, inserting `session` under the same write-lock
    /// pass when absent. Returns the handle and whether this call created it,
    /// so two racing first deposits resolve to one insert and one credit.
    pub async fn entry_or_insert(
        &self,
        user: &Address,
        session: UserSession,
    ) -> (Arc<RwLock<UserSession>>, bool) {
        let mut sessions = self.sessions.write().await;
        match sessions.get(user) {
            Some(existing) => (existing.clone(), false),
            None => {
                let handle = Arc::new(RwLock::new(session));
                sessions.insert(user.clone(), handle.clone());
                (handle, true)
            }
        }
    }

    pub async fn contains(&self, user: &Address) -> bool {
        self.sessions.read().await.contains_key(user)
    }

    /// Point-in-time copy of one session.
    pub async fn snapshot(&self, user: &Address) -> Option<UserSession> {
        let entry = self.entry(user).await?;
        let session = entry.read().await;
        Some(session.clone())
    }

    pub async fn addresses(&self) -> Vec<Address> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copybot_types::{Amount, SessionStatus};

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_first_writer_wins() {
        let store = SessionStore::new();
        let s1 = UserSession::pending(Amount::new(100), vec![], 1);
        let s2 = UserSession::pending(Amount::new(999), vec![], 2);

        assert!(store.insert(addr(1), s1).await);
        assert!(!store.insert(addr(1), s2).await);

        let snap = store.snapshot(&addr(1)).await.unwrap();
        assert_eq!(snap.created_at, 1);
    }

    #[tokio::test]
    async fn test_entry_mutation_visible_in_snapshot() {
        let store = SessionStore::new();
        store
            .insert(addr(2), UserSession::pending(Amount::new(100), vec![], 0))
            .await;

        let entry = store.entry(&addr(2)).await.unwrap();
        entry.write().await.mark_active("sess-1".into(), 5);

        let snap = store.snapshot(&addr(2)).await.unwrap();
        assert_eq!(snap.status, SessionStatus::Active);
        assert_eq!(snap.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_entry_or_insert_returns_existing_handle() {
        let store = SessionStore::new();
        let (first, created) = store
            .entry_or_insert(&addr(4), UserSession::pending(Amount::new(100), vec![], 1))
            .await;
        assert!(created);
        first.write().await.mark_active("sess-4".into(), 2);

        let (second, created) = store
            .entry_or_insert(&addr(4), UserSession::pending(Amount::new(999), vec![], 3))
            .await;
        assert!(!created);
        assert_eq!(second.read().await.session_id.as_deref(), Some("sess-4"));
    }

    #[tokio::test]
    async fn test_missing_user() {
        let store = SessionStore::new();
        assert!(store.entry(&addr(3)).await.is_none());
        assert!(store.snapshot(&addr(3)).await.is_none());
        assert!(store.is_empty().await);
    }
}
