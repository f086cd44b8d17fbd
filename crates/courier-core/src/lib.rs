//! # courier-core
//!
//! Core types, traits, and abstractions for the courier messaging library.
//!
//! This crate provides the domain entities, the `MessageStore` repository
//! interface, and the pure message-lifecycle components (edit diffing,
//! notification fan-out) that the storage adapters and the engine build on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod fanout;
pub mod history;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};
pub use events::{DomainEvent, EventBus};
pub use fanout::fan_out;
pub use history::diff_edit;
pub use models::*;
pub use traits::{ApplyEditRequest, EditOutcome, MessageStore};
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
