//! The world model: static world data plus the mutable per-session state.
//!
//! A [`WorldSnapshot`] is produced once by world generation and never
//! rewritten. [`WorldState`] is derived from it at session start and is the
//! only value a turn ever mutates.

pub mod bible;
pub mod graph;
pub mod location;
pub mod npc;
pub mod sample;
pub mod snapshot;
pub mod state;

pub use bible::{TravelAllowance, WorldBible};
pub use graph::ReachabilityGraph;
pub use location::{Location, LocationKind};
pub use npc::NpcProfile;
pub use snapshot::WorldSnapshot;
pub use state::{WorldMeta, WorldState};
