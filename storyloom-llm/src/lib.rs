//! # storyloom-llm: the generative boundary
//!
//! Everything that talks to a language model lives here:
//!   - **Prompt building**: turn and repair prompts rendered from a
//!     [`ContextPack`](storyloom_core::retrieval::ContextPack), with
//!     versioned TOML template overrides.
//!   - **Backends**: Ollama and OpenAI-compatible HTTP clients with
//!     timeouts and transport retries.
//!   - **[`TextGenerator`]**: the seam the engine depends on, so tests and
//!     offline play can swap in a [`ScriptedGenerator`].
//!
//! Model output is untrusted. This crate only moves text; validation and
//! every decision about world state happen in `storyloom-core`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod boundary;
pub mod client;
pub mod error;
pub mod prompt;
pub mod scripted;
pub mod types;

pub use boundary::TextGenerator;
pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use prompt::{PromptEngine, PromptId};
pub use scripted::ScriptedGenerator;
pub use types::{LlmRequest, LlmResponse, TurnPrompt};
