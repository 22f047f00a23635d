// Trust & safety moderation engine.
//
// **Architecture Overview:**
// - `core/` = Business logic (storage-agnostic): reports, suppression, resolution, bans
// - `infra/` = Implementations of core traits (SQLite, in-memory, push transport)
//
// The binary in `main.rs` is the composition root that wires them together.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;
