use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use super::{DASHBOARD, iso_date};
use crate::cache::QueryKey;
use crate::client::{ApiClient, ApiRequest};
use crate::error::Error;
use crate::session::SessionStore;
use crate::types::UserId;

/// Plant-wide counters shown on the landing view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DashboardStats {
    pub total_work_orders: u64,
    pub pending_work_orders: u64,
    pub in_progress_work_orders: u64,
    pub completed_work_orders: u64,
    pub total_issues: u64,
    pub open_issues: u64,
    pub resolved_issues: u64,
    pub today_work_orders: u64,
    pub today_completed_orders: u64,
    pub average_completion_rate: f64,
    pub on_time_delivery_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    WorkOrder,
    Issue,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RecentActivity {
    pub id: i64,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub action: String,
    pub description: String,
    pub user_id: UserId,
    pub user_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ProductSummary {
    pub product_name: String,
    pub ordered: u64,
    pub produced: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DateSummary {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub ordered: u64,
    pub produced: u64,
}

/// Ordered versus produced quantities, overall and broken down by product and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ProductionSummary {
    pub total_quantity_ordered: u64,
    pub total_quantity_produced: u64,
    pub production_rate: f64,
    #[serde(default)]
    pub by_product: Vec<ProductSummary>,
    #[serde(default)]
    pub by_date: Vec<DateSummary>,
}

/// Window and size limits for the activity feed and production summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    pub limit: Option<u32>,
    #[serde(with = "iso_date::option")]
    pub start_date: Option<Date>,
    #[serde(with = "iso_date::option")]
    pub end_date: Option<Date>,
}

impl DashboardQuery {
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn between(mut self, start: Date, end: Date) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }
}

pub struct Dashboard<'a, S> {
    client: &'a ApiClient<S>,
}

impl<S: SessionStore> ApiClient<S> {
    #[must_use]
    pub fn dashboard(&self) -> Dashboard<'_, S> {
        Dashboard { client: self }
    }
}

impl<S: SessionStore> Dashboard<'_, S> {
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn stats(&self) -> Result<DashboardStats, Error> {
        self.cached("stats", &(), "/dashboard/stats").await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn recent_activities(
        &self,
        query: &DashboardQuery,
    ) -> Result<Vec<RecentActivity>, Error> {
        self.cached("recent-activities", query, "/dashboard/recent-activities")
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn production_summary(
        &self,
        query: &DashboardQuery,
    ) -> Result<ProductionSummary, Error> {
        self.cached("production-summary", query, "/dashboard/production-summary")
            .await
    }

    /// All dashboard reads share the `dashboard` resource so one invalidation drops them all.
    async fn cached<T, Q>(&self, view: &str, query: &Q, path: &str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
        Q: Serialize + ?Sized,
    {
        let key = QueryKey::with_params(DASHBOARD, &(view, query))?;
        let request = ApiRequest::get(path).with_query(query)?;
        self.client
            .cache()
            .get_or_fetch(key, self.client.fetch(&request))
            .await
    }
}
