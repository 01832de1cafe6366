use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::users::User;
use crate::api::{DASHBOARD, ISSUES, WORK_ORDERS};
use crate::client::{ApiClient, ApiRequest};
use crate::error::Error;
use crate::session::{Session, SessionEvent, SessionStore};
use crate::types::{AccessToken, RefreshToken, TokenPair};

pub(crate) const LOGIN_PATH: &str = "/auth/login";
pub(crate) const REFRESH_PATH: &str = "/auth/refresh";
pub(crate) const LOGOUT_PATH: &str = "/auth/logout";

/// Email/password pair for [`ApiClient::login`]. `Debug` hides the password.
#[derive(Clone, Serialize)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Response from the login endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LoginResponse {
    pub user: User,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
}

/// Token part of the refresh endpoint's response. The endpoint may echo the user too.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    access_token: AccessToken,
    refresh_token: RefreshToken,
}

impl TokenResponse {
    pub(crate) fn into_tokens(self) -> TokenPair {
        TokenPair::new(self.access_token, self.refresh_token)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub(crate) refresh_token: &'a RefreshToken,
}

#[derive(Serialize)]
struct LogoutRequest<'a> {
    email: &'a str,
}

impl<S: SessionStore> ApiClient<S> {
    /// Sign in and store the resulting session.
    ///
    /// Login never goes through the refresh flow: wrong credentials surface as
    /// an [`Error::Api`] with status `401` even if a stale session exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] on transport failure, [`Error::Api`] if the
    /// backend rejects the credentials, or [`Error::Decode`] on a malformed response.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, Error> {
        let request = ApiRequest::post(LOGIN_PATH).with_json(credentials)?;
        let response = self.send_unauthenticated(&request).await?;
        let bytes = response.bytes().await?;
        let login: LoginResponse = serde_json::from_slice(&bytes).map_err(Error::Decode)?;

        let session = Session::new(
            TokenPair::new(login.access_token, login.refresh_token),
            login.user,
        );
        {
            // A refresh still running for the previous session must finish first.
            let _gate = self.lock_refresh().await;
            self.store().save(session.clone()).await;
        }

        for resource in [DASHBOARD, WORK_ORDERS, ISSUES] {
            self.cache().invalidate(resource).await;
        }

        info!(user_id = %session.user.id, "Login successful");
        self.announce(SessionEvent::SignedIn {
            user_id: session.user.id,
        });
        Ok(session)
    }

    /// Renew the session's tokens now instead of waiting for a `401`.
    ///
    /// Shares the single-flight path used by the automatic refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if there is no session or the refresh
    /// token is rejected (in which case the session is cleared).
    pub async fn refresh(&self) -> Result<(), Error> {
        let _gate = self.lock_refresh().await;
        let Some(session) = self.store().load().await else {
            return Err(Error::SessionExpired);
        };
        self.refresh_locked(session.refresh_token()).await.map(drop)
    }

    /// Sign out on the backend and drop all local session state.
    ///
    /// Local state is cleared even when the backend call fails; that failure
    /// is still returned. Without a session this is a no-op. If the backend
    /// call ends the session through a rejected refresh, subscribers see only
    /// [`SessionEvent::Expired`].
    ///
    /// # Errors
    ///
    /// Returns the backend call's error, if any.
    pub async fn logout(&self) -> Result<(), Error> {
        let Some(session) = self.store().load().await else {
            debug!("Logout requested without a session");
            return Ok(());
        };

        let request = ApiRequest::post(LOGOUT_PATH).with_json(&LogoutRequest {
            email: &session.user.email,
        })?;
        let outcome = self.execute(&request).await;
        if matches!(outcome, Err(Error::SessionExpired)) && self.store().load().await.is_none() {
            // The failed refresh already cleared the session and announced `Expired`.
            info!(user_id = %session.user.id, "Logged out, session had already expired");
            return Ok(());
        }
        let result = match outcome {
            Err(Error::SessionExpired) => Ok(()),
            other => other,
        };
        if let Err(e) = &result {
            warn!(error = %e, "Backend logout failed, clearing local session anyway");
        }

        self.end_session(SessionEvent::SignedOut).await;
        info!(user_id = %session.user.id, "Logged out");
        result
    }

    /// Identity of the signed-in user, if any.
    pub async fn current_user(&self) -> Option<User> {
        self.store().load().await.map(|s| s.user)
    }
}
