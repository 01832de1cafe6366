use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::debug;

use super::{DASHBOARD, WORK_ORDERS, iso_date};
use crate::cache::QueryKey;
use crate::client::{ApiClient, ApiRequest};
use crate::error::Error;
use crate::session::SessionStore;
use crate::types::{UserId, WorkOrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderPriority {
    Low,
    Normal,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub order_number: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub product_name: String,
    pub product_code: String,
    pub quantity: u32,
    pub unit: String,
    pub status: WorkOrderStatus,
    pub priority: WorkOrderPriority,
    pub assigned_to: String,
    pub assigned_to_id: UserId,
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
    #[serde(default, with = "iso_date::option")]
    pub actual_start_date: Option<Date>,
    #[serde(default, with = "iso_date::option")]
    pub actual_end_date: Option<Date>,
    /// Percent complete, 0 to 100.
    pub completion_rate: f64,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Payload for creating a work order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkOrder {
    pub title: String,
    pub description: String,
    pub product_name: String,
    pub product_code: String,
    pub quantity: u32,
    pub unit: String,
    pub priority: WorkOrderPriority,
    pub assigned_to_id: UserId,
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Optional list filters, sent as flat query parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderFilters {
    pub status: Option<WorkOrderStatus>,
    pub priority: Option<WorkOrderPriority>,
    pub assigned_to_id: Option<UserId>,
    #[serde(with = "iso_date::option")]
    pub start_date: Option<Date>,
    #[serde(with = "iso_date::option")]
    pub end_date: Option<Date>,
    pub search: Option<String>,
}

/// Paging, sorting and filtering for [`WorkOrders::list`].
///
/// Defaults: page 1, 10 per page, newest `createdAt` first, no filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderPageParams {
    pub page: u32,
    pub limit: u32,
    pub sort: String,
    pub order: SortOrder,
    #[serde(flatten)]
    pub filters: WorkOrderFilters,
}

impl Default for WorkOrderPageParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            sort: "createdAt".into(),
            order: SortOrder::Desc,
            filters: WorkOrderFilters::default(),
        }
    }
}

impl WorkOrderPageParams {
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: WorkOrderFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WorkOrderPage {
    pub data: Vec<WorkOrder>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Serialize)]
struct StatusChange {
    status: WorkOrderStatus,
}

pub struct WorkOrders<'a, S> {
    client: &'a ApiClient<S>,
}

impl<S: SessionStore> ApiClient<S> {
    #[must_use]
    pub fn work_orders(&self) -> WorkOrders<'_, S> {
        WorkOrders { client: self }
    }
}

impl<S: SessionStore> WorkOrders<'_, S> {
    /// One page of work orders.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn list(&self, params: &WorkOrderPageParams) -> Result<WorkOrderPage, Error> {
        let key = QueryKey::with_params(WORK_ORDERS, params)?;
        let request = ApiRequest::get("/work-orders").with_query(params)?;
        self.client
            .cache()
            .get_or_fetch(key, self.client.fetch(&request))
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn get(&self, id: WorkOrderId) -> Result<WorkOrder, Error> {
        let path = format!("/work-orders/{id}");
        self.client
            .cache()
            .get_or_fetch(Self::entry_key(id)?, self.client.get_json(&path))
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn create(&self, order: &NewWorkOrder) -> Result<WorkOrder, Error> {
        let created: WorkOrder = self.client.post_json("/work-orders", order).await?;
        debug!(work_order_id = %created.id, "Work order created");
        self.settle(&created).await?;
        Ok(created)
    }

    /// Move a work order to `status`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn update_status(
        &self,
        id: WorkOrderId,
        status: WorkOrderStatus,
    ) -> Result<WorkOrder, Error> {
        let path = format!("/work-orders/{id}/status");
        let updated: WorkOrder = self
            .client
            .patch_json(&path, &StatusChange { status })
            .await?;
        self.settle(&updated).await?;
        Ok(updated)
    }

    fn entry_key(id: WorkOrderId) -> Result<QueryKey, Error> {
        QueryKey::with_params(WORK_ORDERS, &id)
    }

    async fn settle(&self, order: &WorkOrder) -> Result<(), Error> {
        let cache = self.client.cache();
        cache.invalidate(WORK_ORDERS).await;
        cache.invalidate(DASHBOARD).await;
        cache.insert(Self::entry_key(order.id)?, order.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn test_default_params_query() {
        let request = ApiRequest::get("/work-orders")
            .with_query(&WorkOrderPageParams::default())
            .unwrap();
        let mut pairs: Vec<(&str, &str)> = request
            .query()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![("limit", "10"), ("order", "desc"), ("page", "1"), ("sort", "createdAt")]
        );
    }

    #[test]
    fn test_filters_flatten_into_query() {
        let params = WorkOrderPageParams::default()
            .with_page(3)
            .with_filters(WorkOrderFilters {
                status: Some(WorkOrderStatus::InProgress),
                assigned_to_id: Some(UserId(7)),
                start_date: Some(date!(2024 - 05 - 01)),
                ..WorkOrderFilters::default()
            });
        let request = ApiRequest::get("/work-orders").with_query(&params).unwrap();
        let query = request.query();

        assert!(query.contains(&("page".into(), "3".into())));
        assert!(query.contains(&("status".into(), "IN_PROGRESS".into())));
        assert!(query.contains(&("assignedToId".into(), "7".into())));
        assert!(query.contains(&("startDate".into(), "2024-05-01".into())));
        assert!(!query.iter().any(|(k, _)| k == "search"));
    }

    #[test]
    fn test_work_order_parses() {
        let raw = serde_json::json!({
            "id": 12,
            "orderNumber": "WO-2024-0012",
            "title": "Bracket run",
            "description": "Steel brackets",
            "productName": "Bracket",
            "productCode": "BR-100",
            "quantity": 500,
            "unit": "EA",
            "status": "IN_PROGRESS",
            "priority": "HIGH",
            "assignedTo": "Kim",
            "assignedToId": 4,
            "startDate": "2024-05-01",
            "endDate": "2024-05-10",
            "actualStartDate": "2024-05-02",
            "completionRate": 42.5,
            "createdBy": "planner",
            "createdAt": "2024-04-30T09:00:00Z",
            "updatedAt": "2024-05-02T08:15:00Z"
        });
        let order: WorkOrder = serde_json::from_value(raw).unwrap();
        assert_eq!(order.id, WorkOrderId(12));
        assert_eq!(order.status, WorkOrderStatus::InProgress);
        assert_eq!(order.actual_start_date, Some(date!(2024 - 05 - 02)));
        assert_eq!(order.actual_end_date, None);
        assert_eq!(order.notes, None);
        assert_eq!(order.description.as_deref(), Some("Steel brackets"));
    }

    #[test]
    fn test_work_order_accepts_null_description() {
        let raw = serde_json::json!({
            "id": 13,
            "orderNumber": "WO-2024-0013",
            "title": "Hinge run",
            "description": null,
            "productName": "Hinge",
            "productCode": "HG-200",
            "quantity": 50,
            "unit": "EA",
            "status": "PENDING",
            "priority": "LOW",
            "assignedTo": "Park",
            "assignedToId": 5,
            "startDate": "2024-06-01",
            "endDate": "2024-06-03",
            "actualStartDate": null,
            "actualEndDate": null,
            "completionRate": 0,
            "notes": null,
            "createdBy": "planner",
            "createdAt": "2024-05-30T09:00:00Z",
            "updatedAt": "2024-05-30T09:00:00Z"
        });
        let order: WorkOrder = serde_json::from_value(raw).unwrap();
        assert_eq!(order.description, None);
        assert_eq!(order.actual_start_date, None);
    }

    #[test]
    fn test_new_work_order_omits_empty_notes() {
        let order = NewWorkOrder {
            title: "t".into(),
            description: "d".into(),
            product_name: "p".into(),
            product_code: "c".into(),
            quantity: 1,
            unit: "EA".into(),
            priority: WorkOrderPriority::Normal,
            assigned_to_id: UserId(1),
            start_date: date!(2024 - 01 - 01),
            end_date: date!(2024 - 01 - 02),
            notes: None,
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["priority"], "NORMAL");
        assert_eq!(json["startDate"], "2024-01-01");
        assert!(json.get("notes").is_none());
    }
}
