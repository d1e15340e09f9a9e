//! `SQLite` persistence layer for the durable pid registry.

pub mod db;
pub mod process_repo;
pub mod schema;
