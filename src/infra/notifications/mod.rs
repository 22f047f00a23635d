// Implementations of the notification ports.

pub mod broadcast_transport;
pub mod in_memory;
pub mod sqlite_notification_store;

pub use broadcast_transport::{BroadcastTransport, PushMessage};
pub use in_memory::InMemoryNotificationStore;
pub use sqlite_notification_store::SqliteNotificationStore;
