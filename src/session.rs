use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::users::User;
use crate::types::{AccessToken, RefreshToken, TokenPair, UserId};

/// Current credentials and identity of the signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tokens: TokenPair,
    pub user: User,
}

impl Session {
    #[must_use]
    pub fn new(tokens: TokenPair, user: User) -> Self {
        Self { tokens, user }
    }

    #[must_use]
    pub fn access_token(&self) -> &AccessToken {
        &self.tokens.access
    }

    #[must_use]
    pub fn refresh_token(&self) -> &RefreshToken {
        &self.tokens.refresh
    }
}

/// Session lifecycle notifications broadcast by the client.
///
/// The client never navigates or renders anything itself. Subscribe via
/// [`ApiClient::subscribe`](crate::ApiClient::subscribe) and react to
/// `Expired` by sending the user back to a login view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    SignedIn { user_id: UserId },
    Renewed,
    /// The refresh token was rejected; local session state has been cleared.
    Expired,
    SignedOut,
}

/// Consumer-provided session persistence.
///
/// The store is the single source of truth for credentials. The client reads
/// it before every request and writes it only on login, refresh and logout.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStore for KeyringStore {
///     async fn load(&self) -> Option<Session> {
///         self.keyring.get("mes-session").await
///     }
///
///     async fn save(&self, session: Session) {
///         self.keyring.put("mes-session", session).await;
///     }
///
///     async fn replace_tokens(&self, expected: &RefreshToken, tokens: TokenPair) -> bool {
///         self.keyring
///             .update_if("mes-session", |s| s.refresh_token() == expected, |s| s.tokens = tokens)
///             .await
///     }
///
///     async fn clear(&self) {
///         self.keyring.delete("mes-session").await;
///     }
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Current session, if any.
    fn load(&self) -> impl Future<Output = Option<Session>> + Send;

    /// Store a new session, replacing any previous one.
    fn save(&self, session: Session) -> impl Future<Output = ()> + Send;

    /// Swap in renewed tokens, but only while the stored session still holds
    /// `expected` as its refresh token.
    ///
    /// Returns `false` (and stores nothing) when no session exists or it was
    /// replaced since the refresh started.
    fn replace_tokens(
        &self,
        expected: &RefreshToken,
        tokens: TokenPair,
    ) -> impl Future<Output = bool> + Send;

    /// Drop the session (logout).
    fn clear(&self) -> impl Future<Output = ()> + Send;
}

/// In-process session store.
///
/// Clones share the same underlying session, so the application can keep a
/// handle while the client owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<RwLock<Option<Session>>>,
    last_rotated: Arc<RwLock<Option<OffsetDateTime>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `session`, e.g. one restored from disk.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(session))),
            last_rotated: Arc::new(RwLock::new(Some(OffsetDateTime::now_utc()))),
        }
    }

    /// When tokens were last issued or rotated.
    pub async fn last_rotated(&self) -> Option<OffsetDateTime> {
        *self.last_rotated.read().await
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn save(&self, session: Session) {
        *self.session.write().await = Some(session);
        *self.last_rotated.write().await = Some(OffsetDateTime::now_utc());
    }

    async fn replace_tokens(&self, expected: &RefreshToken, tokens: TokenPair) -> bool {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut().filter(|s| s.refresh_token() == expected) else {
            return false;
        };
        session.tokens = tokens;
        drop(guard);

        let now = OffsetDateTime::now_utc();
        *self.last_rotated.write().await = Some(now);
        debug!(rotated_at = %now, "Session tokens rotated");
        true
    }

    async fn clear(&self) {
        *self.session.write().await = None;
        *self.last_rotated.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::users::test_user;

    fn tokens(access: &str, refresh: &str) -> TokenPair {
        TokenPair::new(AccessToken::new(access), RefreshToken::new(refresh))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemorySessionStore::new();
        assert!(store.load().await.is_none());
        assert!(store.last_rotated().await.is_none());

        store.save(Session::new(tokens("a1", "r1"), test_user())).await;

        let session = store.load().await.unwrap();
        assert_eq!(session.access_token().as_str(), "a1");
        assert_eq!(session.refresh_token().as_str(), "r1");
        assert!(store.last_rotated().await.is_some());
    }

    #[tokio::test]
    async fn test_replace_tokens_keeps_user() {
        let store = MemorySessionStore::with_session(Session::new(tokens("a1", "r1"), test_user()));

        assert!(store.replace_tokens(&RefreshToken::new("r1"), tokens("a2", "r2")).await);

        let session = store.load().await.unwrap();
        assert_eq!(session.access_token().as_str(), "a2");
        assert_eq!(session.refresh_token().as_str(), "r2");
        assert_eq!(session.user, test_user());
    }

    #[tokio::test]
    async fn test_replace_tokens_without_session_is_noop() {
        let store = MemorySessionStore::new();
        assert!(!store.replace_tokens(&RefreshToken::new("r1"), tokens("a2", "r2")).await);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_replace_tokens_rejects_other_session() {
        let store = MemorySessionStore::with_session(Session::new(tokens("b1", "rb"), test_user()));

        assert!(!store.replace_tokens(&RefreshToken::new("ra"), tokens("a2", "ra2")).await);

        let session = store.load().await.unwrap();
        assert_eq!(session.access_token().as_str(), "b1");
        assert_eq!(session.refresh_token().as_str(), "rb");
    }

    #[tokio::test]
    async fn test_clear_removes_both_tokens() {
        let store = MemorySessionStore::with_session(Session::new(tokens("a1", "r1"), test_user()));
        store.clear().await;
        assert!(store.load().await.is_none());
        assert!(store.last_rotated().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemorySessionStore::new();
        let handle = store.clone();
        handle.save(Session::new(tokens("a1", "r1"), test_user())).await;
        assert!(store.load().await.is_some());
    }
}
