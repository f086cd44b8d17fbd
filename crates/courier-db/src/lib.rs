//! # courier-db
//!
//! Storage layer for courier.
//!
//! This crate provides:
//! - Connection pool management for PostgreSQL
//! - [`PgStore`], the transactional PostgreSQL entity store
//! - [`MemStore`], an in-memory store for tests and embedding
//! - Always-compiled test fixtures shared by downstream suites
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_db::{create_pool, PgStore};
//! use courier_core::MessageStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool("postgres://localhost/courier").await?;
//!     let store = PgStore::new(pool);
//!     store.migrate().await?;
//!
//!     let user = store.fetch_user(user_id).await?;
//!     println!("{}", user.display_name);
//!     Ok(())
//! }
//! ```
pub mod mem;
pub mod pg;
pub mod pool;
pub mod test_fixtures;

pub use mem::MemStore;
pub use pg::PgStore;
pub use pool::{
    create_pool, create_pool_from_env, create_pool_with_config, database_url, log_pool_metrics,
    PoolConfig,
};
