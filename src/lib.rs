//! Real-time QR scan alerts for child safety
//!
//! A public scan report travels to the parent's session as a push alert,
//! lands in a single-slot store, and is rendered as a classified banner
//! that also triggers a refetch of the child's history.

pub mod api;
pub mod channel;
pub mod config;
pub mod errors;
pub mod history;
pub mod map;
pub mod models;
pub mod presentation;
pub mod session;
pub mod severity;
pub mod store;
pub mod submit;
