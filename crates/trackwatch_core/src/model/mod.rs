//! Domain model for tracker-originated notifications.
//!
//! # Responsibility
//! - Define the canonical notification record shared by store, persistence
//!   and presentation layers.
//!
//! # Invariants
//! - Every notification is identified by a process-unique `NotificationId`.
//! - Read state only moves from unread to read.

pub mod notification;
