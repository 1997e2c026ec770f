//! In-memory stores backed by a persistence gateway.
//!
//! # Responsibility
//! - `history`: bounded notification history with read state.
//! - `dedup`: task ids that already produced a notification.
//!
//! # Invariants
//! - Every mutation saves a consistent snapshot before returning.
//! - Save failures are logged and never undo the in-memory mutation.

pub mod dedup;
pub mod history;
