#![doc = include_str!("../README.md")]

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-exports for convenient access
pub use api::{
    ActivityType, DashboardQuery, DashboardStats, DateSummary, Issue, IssuePriority, IssueQuery,
    IssueStatus, IssueType, NewWorkOrder, ProductSummary, ProductionSummary, RecentActivity,
    SortOrder, User, UserRole, WorkOrder, WorkOrderFilters, WorkOrderPage, WorkOrderPageParams,
    WorkOrderPriority, WorkOrderStatus,
};
pub use auth::{Credentials, LoginResponse};
pub use cache::{QueryCache, QueryKey};
pub use client::{ApiClient, ApiRequest};
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use error::{Error, ErrorBody, ErrorKind};
pub use session::{MemorySessionStore, Session, SessionEvent, SessionStore};
pub use types::{AccessToken, IssueId, RefreshToken, TokenPair, UserId, WorkOrderId};
