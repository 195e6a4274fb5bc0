//! Shared domain types for the todo-list service.
//!
//! These types are what the HTTP API serialises and what the notification
//! layer formats; they carry no database or transport concerns.

pub mod events;
pub mod models;

pub use events::{EventData, EventType};
pub use models::*;
