use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Session;
use crate::store::{Store, StoreResult};

/// Issues and checks opaque session tokens. Only the SHA-256 of a token is
/// ever written to the store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn create(&self, user_id: Uuid) -> StoreResult<(String, Session)> {
        let token = generate_token();
        let now = Utc::now();
        let session = Session {
            id: hash_token(&token),
            user_id,
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.store.insert_session(session.clone()).await?;
        Ok((token, session))
    }

    pub async fn validate(&self, token: &str) -> StoreResult<Option<Session>> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let session = self.store.find_session(&hash_token(token)).await?;
        Ok(session.filter(|session| session.is_valid_at(now)))
    }

    /// Removing an unknown or already removed token is not an error.
    pub async fn delete(&self, token: &str) -> StoreResult<()> {
        self.revoke(&hash_token(token)).await
    }

    /// Same as [`SessionManager::delete`], keyed by the stored session id.
    pub async fn revoke(&self, session_id: &str) -> StoreResult<()> {
        self.store.delete_session(session_id).await?;
        Ok(())
    }

    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        self.store.delete_expired_sessions(Utc::now()).await
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(ttl: Duration) -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionManager::new(store.clone(), ttl), store)
    }

    #[tokio::test]
    async fn stores_only_the_token_hash() {
        let (sessions, store) = manager(Duration::hours(1));
        let user_id = Uuid::new_v4();
        let (token, session) = sessions.create(user_id).await.unwrap();

        assert_eq!(token.len(), 64);
        assert_ne!(session.id, token);
        assert!(store.find_session(&token).await.unwrap().is_none());
        assert_eq!(
            store.find_session(&hash_token(&token)).await.unwrap(),
            Some(session)
        );
    }

    #[tokio::test]
    async fn validity_ends_exactly_at_expiry() {
        let (sessions, _) = manager(Duration::hours(2));
        let (token, session) = sessions.create(Uuid::new_v4()).await.unwrap();
        let expires_at = session.expires_at;

        let just_before = expires_at - Duration::milliseconds(1);
        assert!(sessions.validate_at(&token, just_before).await.unwrap().is_some());
        assert!(sessions.validate_at(&token, expires_at).await.unwrap().is_none());
        assert!(sessions
            .validate_at(&token, expires_at + Duration::days(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deleting_twice_is_a_no_op() {
        let (sessions, _) = manager(Duration::hours(1));
        let (token, _) = sessions.create(Uuid::new_v4()).await.unwrap();

        sessions.delete(&token).await.unwrap();
        assert!(sessions.validate(&token).await.unwrap().is_none());
        sessions.delete(&token).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_tokens_are_absent() {
        let (sessions, _) = manager(Duration::hours(1));
        assert!(sessions.validate("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweeper_removes_only_expired_rows() {
        let (sessions, store) = manager(Duration::hours(1));
        let (live, _) = sessions.create(Uuid::new_v4()).await.unwrap();
        let stale = Session {
            id: hash_token("stale"),
            user_id: Uuid::new_v4(),
            expires_at: Utc::now() - Duration::minutes(5),
            created_at: Utc::now() - Duration::hours(2),
        };
        store.insert_session(stale).await.unwrap();

        assert_eq!(sessions.sweep_expired().await.unwrap(), 1);
        assert!(sessions.validate(&live).await.unwrap().is_some());
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }
}
