use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{DASHBOARD, ISSUES};
use crate::cache::QueryKey;
use crate::client::{ApiClient, ApiRequest};
use crate::error::Error;
use crate::session::SessionStore;
use crate::types::{IssueId, UserId, WorkOrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Quality,
    Equipment,
    Material,
    Process,
    Safety,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuePriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

/// Production issue reported against a work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub work_order_id: WorkOrderId,
    pub work_order_number: String,
    pub reported_by_id: UserId,
    pub reported_by_name: String,
    #[serde(default)]
    pub assigned_to_id: Option<UserId>,
    #[serde(default)]
    pub assigned_to_name: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub reported_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
}

impl Issue {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.status, IssueStatus::Open | IssueStatus::InProgress)
    }
}

/// Filters for [`Issues::list`]. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueQuery {
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    #[serde(rename = "type")]
    pub issue_type: Option<IssueType>,
    pub reported_by: Option<UserId>,
}

#[derive(Deserialize)]
struct IssueList {
    data: Vec<Issue>,
}

#[derive(Serialize)]
struct Resolution<'a> {
    resolution: &'a str,
}

pub struct Issues<'a, S> {
    client: &'a ApiClient<S>,
}

impl<S: SessionStore> ApiClient<S> {
    #[must_use]
    pub fn issues(&self) -> Issues<'_, S> {
        Issues { client: self }
    }
}

impl<S: SessionStore> Issues<'_, S> {
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn list(&self, query: &IssueQuery) -> Result<Vec<Issue>, Error> {
        let key = QueryKey::with_params(ISSUES, query)?;
        let request = ApiRequest::get("/issues").with_query(query)?;
        self.client
            .cache()
            .get_or_fetch(key, async {
                let list: IssueList = self.client.fetch(&request).await?;
                Ok::<_, Error>(list.data)
            })
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn get(&self, id: IssueId) -> Result<Issue, Error> {
        let path = format!("/issues/{id}");
        self.client
            .cache()
            .get_or_fetch(QueryKey::with_params(ISSUES, &id)?, self.client.get_json(&path))
            .await
    }

    /// Close out an issue with a resolution note.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn resolve(&self, id: IssueId, resolution: &str) -> Result<Issue, Error> {
        let path = format!("/issues/{id}/resolve");
        let resolved: Issue = self
            .client
            .put_json(&path, &Resolution { resolution })
            .await?;

        let cache = self.client.cache();
        cache.invalidate(ISSUES).await;
        cache.invalidate(DASHBOARD).await;
        cache
            .insert(QueryKey::with_params(ISSUES, &resolved.id)?, resolved.clone())
            .await;
        Ok(resolved)
    }
}
