//! Domain models for supervised workers.

pub mod record;
pub mod worker;
