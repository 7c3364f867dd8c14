//! # triage-core
//!
//! Core types, traits, and abstractions for capture triage.
//!
//! This crate provides the data model, the capture lifecycle, the error
//! taxonomy and the collaborator traits that the other triage crates
//! depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
