// Core moderation module - reports, suppression, resolutions, bans and the audit trail.
// Storage is behind the ports in moderation_store; infra provides the implementations.

pub mod audit_snapshot;
pub mod ban_service;
pub mod moderation_error;
pub mod moderation_models;
pub mod moderation_store;
pub mod query_service;
pub mod report_service;
pub mod resolution_service;
pub mod retention;
pub mod suppression;

pub use audit_snapshot::*;
pub use ban_service::*;
pub use moderation_error::*;
pub use moderation_models::*;
pub use moderation_store::*;
pub use query_service::*;
pub use report_service::*;
pub use resolution_service::*;
pub use retention::*;
pub use suppression::*;

#[cfg(test)]
pub(crate) mod testkit;
