//! # storyloom-engine: turn orchestration
//!
//! Wires the deterministic core to the generative boundary:
//!
//! ```text
//! ┌──────────────── TurnEngine ────────────────┐
//! │  ContextRetriever ─► PromptEngine          │
//! │         │                 │                │
//! │         │          TextGenerator (LLM)     │
//! │         ▼                 ▼                │
//! │  OutputValidator ─► resolve_turn (staged)  │
//! │                           │                │
//! │                    SessionStore commit     │
//! │                           │                │
//! │                 swap live WorldState       │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `orchestrator`: [`TurnEngine`]: sessions and the per-turn pipeline
//! - `sessions`: per-session live slots and cached reachability graphs
//! - `refusal`: templated in-world refusals for the consistency fallback
//! - `repl`: input parsing and rendering for the `storyloom` binary
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod orchestrator;
pub mod refusal;
pub mod repl;
pub mod sessions;
pub mod telemetry;

pub use orchestrator::{TurnEngine, TurnResult};
pub use sessions::{GraphCache, SessionRegistry};
