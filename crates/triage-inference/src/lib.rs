//! # triage-inference
//!
//! Classification of captures through a remote language model.
//!
//! - [`classification`]: system prompt construction, the single-call
//!   [`ClassificationEngine`], and strict parsing of the model's JSON answer.
//! - [`openai`]: a [`ClassifierClient`](triage_core::ClassifierClient) for
//!   OpenAI-compatible chat-completion endpoints.
//! - [`mock`]: a scripted client for tests.

pub mod classification;
pub mod mock;
pub mod openai;

pub use classification::{
    build_system_prompt, parse_classification, parse_extracted_time, ClassificationEngine,
};
pub use mock::{MockClassifier, MockFailure};
pub use openai::{OpenAIClassifier, OpenAIConfig};
