use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::USERS;
use crate::cache::QueryKey;
use crate::client::ApiClient;
use crate::error::Error;
use crate::session::SessionStore;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Manager,
    Worker,
}

/// Backend user record, also the identity half of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// User directory, read-only.
pub struct Users<'a, S> {
    client: &'a ApiClient<S>,
}

impl<S: SessionStore> ApiClient<S> {
    #[must_use]
    pub fn users(&self) -> Users<'_, S> {
        Users { client: self }
    }
}

impl<S: SessionStore> Users<'_, S> {
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn list(&self) -> Result<Vec<User>, Error> {
        self.client
            .cache()
            .get_or_fetch(QueryKey::new(USERS), self.client.get_json("/users"))
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn get(&self, id: UserId) -> Result<User, Error> {
        let key = QueryKey::with_params(USERS, &id)?;
        let path = format!("/users/{id}");
        self.client
            .cache()
            .get_or_fetch(key, self.client.get_json(&path))
            .await
    }
}

#[cfg(test)]
pub(crate) fn test_user() -> User {
    use time::macros::datetime;

    User {
        id: UserId(1),
        email: "operator@plant.example".into(),
        name: "Line Operator".into(),
        role: UserRole::Worker,
        is_active: true,
        created_at: datetime!(2024-01-01 0:00 UTC),
        updated_at: datetime!(2024-01-01 0:00 UTC),
    }
}
