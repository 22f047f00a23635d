// Core notifications module - fan-out of persisted notifications and live pushes.

pub mod notification_models;
pub mod notification_service;

pub use notification_models::*;
pub use notification_service::*;
