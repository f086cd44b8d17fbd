//! # courier-engine
//!
//! Message lifecycle engine for courier.
//!
//! This crate provides:
//! - [`MessagingService`], the validate → persist → invalidate → emit
//!   orchestration over a [`courier_core::MessageStore`]
//! - [`ThreadBuilder`], bounded breadth-first thread reconstruction
//! - [`UnreadIndex`], the in-process cache for unread queries
pub mod service;
pub mod thread;
pub mod unread;

pub use service::{MessagingService, SendReceipt};
pub use thread::ThreadBuilder;
pub use unread::{CacheStats, UnreadIndex};
