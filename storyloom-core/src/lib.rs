//! # Storyloom Core Library
//!
//! The deterministic half of a turn-based, LLM-narrated RPG. A generative
//! model proposes narration and world changes every turn; this crate decides
//! what is actually allowed to happen and records it durably.
//!
//! - **World model**: locations, NPC profiles with agency traits, the world
//!   bible and the live [`WorldState`] of a session.
//! - **Retrieval**: the mandatory + optional context pack for a turn.
//! - **Validation**: untrusted model text → strictly typed [`TurnOutput`].
//! - **Movement**: legality and reachability of proposed NPC moves.
//! - **Agency**: the deterministic accept/refuse gate over NPC traits.
//! - **Mutation**: all-or-nothing application of a turn's accepted changes.
//! - **Persistence**: overwrite-state / append-turn session stores.
//!
//! Nothing in this crate performs network I/O or draws random numbers; the
//! same inputs always produce the same decisions.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agency;
pub mod checksum;
pub mod config;
pub mod error;
pub mod movement;
pub mod mutation;
pub mod persistence;
pub mod retrieval;
pub mod safety;
pub mod turn;
pub mod types;
pub mod validation;
pub mod world;

pub use config::StoryConfig;
pub use error::{StoryError, TurnError};
pub use turn::{MoveProposal, TurnOutput, TurnRecord};
pub use types::{LocationId, NpcId, SessionId};
pub use world::{WorldSnapshot, WorldState};
