//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate stores, listeners and presentation into use-case APIs.
//! - Keep producers and UI layers decoupled from storage details.

pub mod notification_service;
