// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "clock.rs"]
pub mod clock;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "notifications/mod.rs"]
pub mod notifications;
