//! OpenAI-compatible classifier client.
//!
//! Works with any endpoint speaking the chat-completions protocol, such as
//! DashScope compatible mode (the default), OpenAI, or a local vLLM / Ollama
//! server.
//!
//! # Example
//!
//! ```rust,no_run
//! use triage_inference::openai::OpenAIClassifier;
//! use triage_core::ClassifierClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = OpenAIClassifier::from_env().unwrap();
//!     if client.is_configured() {
//!         let raw = client.classify("classify this", "明天下午3点开会").await.unwrap();
//!         println!("{}", raw);
//!     }
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIClassifier, OpenAIConfig};
pub use error::{to_triage_error, OpenAIErrorCode};
pub use types::*;
