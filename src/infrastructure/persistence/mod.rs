//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod call_session_repository;
#[cfg(feature = "postgres")]
pub mod database;

pub use memory::InMemoryCallSessionRepository;
#[cfg(feature = "postgres")]
pub use call_session_repository::PgCallSessionRepository;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations};
