// Implementations of the moderation ports.

pub mod in_memory;
pub mod sliding_window;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryModerationStore;
pub use sliding_window::SlidingWindowLimiter;
pub use sqlite_store::SqliteModerationStore;

#[cfg(test)]
mod scenarios;
