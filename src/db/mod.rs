//! Database module for ProbeWatch.
//!
//! Provides SQLite storage for probe records with embedded migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
