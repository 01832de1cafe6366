//! Typed access to the MES resources.
//!
//! Each accessor borrows the client, so credentials, refresh handling and
//! the query cache are shared:
//!
//! ```rust,ignore
//! let page = client.work_orders().list(&WorkOrderPageParams::default()).await?;
//! let issue = client.issues().resolve(IssueId(4), "replaced nozzle").await?;
//! ```
//!
//! Reads are cached per resource and parameters. Mutations invalidate the
//! resource they touch plus the dashboard aggregates, then prime the cache
//! with the entity the backend returned.

pub mod dashboard;
pub mod issues;
pub mod users;
pub mod work_orders;

pub use dashboard::{
    ActivityType, DashboardQuery, DashboardStats, DateSummary, ProductSummary, ProductionSummary,
    RecentActivity,
};
pub use issues::{Issue, IssuePriority, IssueQuery, IssueStatus, IssueType};
pub use users::{User, UserRole};
pub use work_orders::{
    NewWorkOrder, SortOrder, WorkOrder, WorkOrderFilters, WorkOrderPage, WorkOrderPageParams,
    WorkOrderPriority, WorkOrderStatus,
};

/// Cache resource names.
pub(crate) const WORK_ORDERS: &str = "work-orders";
pub(crate) const ISSUES: &str = "issues";
pub(crate) const USERS: &str = "users";
pub(crate) const DASHBOARD: &str = "dashboard";

/// `YYYY-MM-DD` serde format for calendar dates.
pub(crate) mod iso_date {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;
    use time::macros::format_description;

    pub(crate) fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = date
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        Date::parse(&text, format_description!("[year]-[month]-[day]")).map_err(D::Error::custom)
    }

    pub(crate) mod option {
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;
        use time::macros::format_description;

        pub(crate) fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => super::serialize(date, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| Date::parse(&text, format_description!("[year]-[month]-[day]")))
                .transpose()
                .map_err(D::Error::custom)
        }
    }

    #[cfg(test)]
    mod tests {
        use serde::{Deserialize, Serialize};
        use time::Date;
        use time::macros::date;

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Holder {
            #[serde(with = "super")]
            due: Date,
            #[serde(default, with = "super::option")]
            shipped: Option<Date>,
        }

        #[test]
        fn test_date_roundtrip() {
            let holder = Holder {
                due: date!(2024 - 03 - 09),
                shipped: None,
            };
            let json = serde_json::to_string(&holder).unwrap();
            assert_eq!(json, r#"{"due":"2024-03-09","shipped":null}"#);
            assert_eq!(serde_json::from_str::<Holder>(&json).unwrap(), holder);
        }

        #[test]
        fn test_missing_optional_date() {
            let holder: Holder = serde_json::from_str(r#"{"due":"2024-12-31"}"#).unwrap();
            assert_eq!(holder.shipped, None);
        }

        #[test]
        fn test_rejects_timestamps() {
            assert!(serde_json::from_str::<Holder>(r#"{"due":"2024-12-31T10:00:00Z"}"#).is_err());
        }
    }
}
