//! SQLite ledger of indexed events.
//!
//! This module provides:
//! - Database initialization with pragmas and the embedded schema
//! - Repository for event rows, stream watermarks and holder queries

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
