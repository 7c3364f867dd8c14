//! # triage-memory
//!
//! What the system learns from its user.
//!
//! - [`keywords`]: keyword, person and project extraction
//! - [`preferences`]: [`PreferenceMemory`], which biases classifications
//!   from past corrections and tracks what the user talks about
//! - [`context`]: the context block sent to the classifier
//! - [`associations`]: related-capture scoring and linking

pub mod associations;
pub mod context;
pub mod keywords;
pub mod preferences;

pub use associations::{association_score, find_related, AssociationBuilder};
pub use context::assemble_context;
pub use keywords::{detect_people, detect_projects, extract_keywords};
pub use preferences::{Adjustment, PreferenceMemory};
