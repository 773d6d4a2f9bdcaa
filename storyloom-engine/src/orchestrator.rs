//! The turn pipeline.
//!
//! ```text
//! retrieve -> prompt -> generate (bounded re-prompts) -> validate
//!          -> resolve moves on a staged copy -> commit -> swap live state
//! ```
//!
//! The live [`WorldState`] of a session is replaced only after the turn has
//! been made durable. Every failure before the commit leaves it untouched;
//! a failed commit empties the session slot so the next turn reloads what
//! the store actually holds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use storyloom_core::agency::AgencyGate;
use storyloom_core::config::{ConsistencyFallback, StoryConfig};
use storyloom_core::error::{AttemptFailure, StoryError, TurnError};
use storyloom_core::mutation::{TurnMeta, resolve_turn};
use storyloom_core::persistence::SessionStore;
use storyloom_core::retrieval::document::{refusal_event_doc, static_docs};
use storyloom_core::retrieval::{ContextDocument, ContextIndex, ContextRetriever};
use storyloom_core::turn::{TurnOutcome, TurnOutput, TurnRecord};
use storyloom_core::types::{NpcId, SessionId};
use storyloom_core::validation::{OutputError, OutputValidator};
use storyloom_core::world::{WorldSnapshot, WorldState};
use storyloom_llm::{PromptEngine, TextGenerator, TurnPrompt};

use crate::refusal::templated_refusal;
use crate::sessions::{GraphCache, SessionRegistry, SessionSlot};

/// What a committed turn hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// The validated output that was committed.
    pub output: TurnOutput,
    /// The session's world after the turn.
    pub state: WorldState,
    /// The appended log entry.
    pub record: TurnRecord,
}

/// A validated output and how it was obtained.
struct Generated {
    output: TurnOutput,
    attempts: u32,
    outcome: TurnOutcome,
}

/// Runs turns for any number of sessions over one store and one index.
pub struct TurnEngine<G> {
    config: StoryConfig,
    generator: Arc<G>,
    store: Arc<dyn SessionStore>,
    index: Arc<dyn ContextIndex>,
    prompts: PromptEngine,
    retriever: ContextRetriever,
    gate: AgencyGate,
    sessions: SessionRegistry,
    graphs: GraphCache,
    permits: Semaphore,
}

impl<G: TextGenerator> TurnEngine<G> {
    /// Create an engine with the built-in prompt templates.
    #[must_use]
    pub fn new(
        config: StoryConfig,
        generator: Arc<G>,
        store: Arc<dyn SessionStore>,
        index: Arc<dyn ContextIndex>,
    ) -> Self {
        Self {
            retriever: ContextRetriever::new(config.retrieval.clone()),
            gate: AgencyGate::new(config.agency.clone()),
            graphs: GraphCache::new(config.engine.graph_cache_size),
            permits: Semaphore::new(config.engine.max_concurrent_generations.max(1)),
            prompts: PromptEngine::builtin(),
            sessions: SessionRegistry::new(),
            config,
            generator,
            store,
            index,
        }
    }

    /// Replace the prompt templates.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptEngine) -> Self {
        self.prompts = prompts;
        self
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    /// The backing session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Start a new session from a world snapshot.
    ///
    /// Writes the snapshot and the initial state, then seeds the context
    /// index with the world's static documents.
    ///
    /// # Errors
    ///
    /// [`StoryError::InvalidWorld`] for a snapshot that fails validation;
    /// storage and index errors otherwise.
    pub async fn create_session(&self, snapshot: WorldSnapshot) -> Result<SessionId, StoryError> {
        let now = Utc::now();
        let session_id = SessionId::generate(now);
        let state = WorldState::from_snapshot(&snapshot, session_id.clone(), now)?;

        let store = Arc::clone(&self.store);
        let initial = state.clone();
        blocking(move || {
            store.save_snapshot(&initial.session_id, &snapshot)?;
            store.save_state(&initial)
        })
        .await?;

        self.index.upsert(&static_docs(&state))?;
        info!(
            session = %session_id,
            world = %state.world.world_id,
            locations = state.locations.len(),
            npcs = state.npc_profiles.len(),
            "Session created"
        );
        self.sessions.insert(state);
        Ok(session_id)
    }

    /// The current world of a session, loading it from the store if needed.
    ///
    /// # Errors
    ///
    /// [`TurnError::SessionNotFound`] for an unknown session,
    /// [`TurnError::Persistence`] if the store cannot be read.
    pub async fn state(&self, session_id: &SessionId) -> Result<WorldState, TurnError> {
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        if live.is_none() {
            *live = Some(self.hydrate(session_id).await?);
        }
        live.as_ref()
            .cloned()
            .ok_or_else(|| TurnError::SessionNotFound(session_id.clone()))
    }

    /// The last `limit` committed turns of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the log cannot be read.
    pub async fn history(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<TurnRecord>, StoryError> {
        let store = Arc::clone(&self.store);
        let id = session_id.clone();
        blocking(move || store.read_turns(&id, limit)).await
    }

    /// Ask the store for a backup.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the backup fails.
    pub async fn backup(&self) -> Result<(), StoryError> {
        let store = Arc::clone(&self.store);
        blocking(move || store.create_backup()).await
    }

    /// Number of sessions with a registered slot.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// The session's slot, registering it only once its state has loaded.
    async fn live_slot(&self, session_id: &SessionId) -> Result<SessionSlot, TurnError> {
        if let Some(slot) = self.sessions.get(session_id) {
            return Ok(slot);
        }
        let state = self.hydrate(session_id).await?;
        Ok(self.sessions.get_or_insert(state))
    }

    /// Load a session's state from the store and make sure the index knows
    /// its documents.
    async fn hydrate(&self, session_id: &SessionId) -> Result<WorldState, TurnError> {
        let store = Arc::clone(&self.store);
        let id = session_id.clone();
        let state = blocking(move || store.load_state(&id))
            .await
            .map_err(TurnError::Persistence)?
            .ok_or_else(|| TurnError::SessionNotFound(session_id.clone()))?;
        if let Err(e) = state.validate() {
            error!(session = %session_id, error = %e, "Stored state failed validation");
            return Err(TurnError::Persistence(e));
        }

        if self.index.count(session_id) == 0 {
            let turns = self.history(session_id, None).await.map_err(TurnError::Persistence)?;
            let mut docs = static_docs(&state);
            docs.extend(state.turn_summaries.iter().cloned());
            // Records past the committed turn belong to no durable state.
            let committed = turns.iter().filter(|record| record.turn_id <= state.last_turn_id);
            docs.extend(committed.flat_map(|record| {
                record
                    .refusals
                    .iter()
                    .map(move |r| refusal_event_doc(session_id, record.timestamp, r))
            }));
            if let Err(e) = self.index.upsert(&docs) {
                warn!(session = %session_id, error = %e, "Context index reseed failed");
            } else {
                debug!(session = %session_id, docs = docs.len(), "Context index reseeded");
            }
        }
        debug!(session = %session_id, turn = state.last_turn_id, "Session state loaded");
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    /// Run one turn.
    ///
    /// Turns of the same session are serialised; turns of different
    /// sessions run concurrently.
    ///
    /// # Errors
    ///
    /// Any [`TurnError`]. Only [`TurnError::Persistence`] can follow a
    /// partial write; every other error leaves the session exactly as it was.
    pub async fn process_turn(
        &self,
        session_id: &SessionId,
        addressed_npc: Option<&NpcId>,
        player_text: &str,
    ) -> Result<TurnResult, TurnError> {
        let start = Instant::now();
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        if live.is_none() {
            *live = Some(self.hydrate(session_id).await?);
        }
        let state = live
            .as_ref()
            .ok_or_else(|| TurnError::SessionNotFound(session_id.clone()))?;

        let pack = self
            .retriever
            .retrieve(state, addressed_npc, player_text, self.index.as_ref())?;
        let prompt = self
            .prompts
            .build_turn_prompt(&pack, state.player_location.as_str(), addressed_npc, player_text)
            .map_err(|e| TurnError::GenerativeUnavailable {
                attempts: 0,
                last_failure: AttemptFailure::Generation(e.to_string()),
            })?;

        let validator = OutputValidator::new(&state.world_bible, &self.config.safety);
        let generated = self
            .generate_validated(state, &prompt, &validator, addressed_npc, player_text)
            .await?;

        let graph = self.graphs.get_or_build(state);
        let meta = TurnMeta {
            timestamp: Utc::now(),
            addressed_npc: addressed_npc.cloned(),
        };
        let resolved = resolve_turn(
            state,
            &generated.output,
            &graph,
            &self.gate,
            self.config.engine.move_policy,
            &meta,
        )?;

        let record = TurnRecord {
            session_id: session_id.clone(),
            turn_id: resolved.turn_id(),
            timestamp: meta.timestamp,
            player_text: player_text.to_string(),
            addressed_npc: meta.addressed_npc.clone(),
            location_id: state.player_location.clone(),
            model_used: self.generator.model_name().to_string(),
            attempts: generated.attempts,
            outcome: generated.outcome,
            output: generated.output.clone(),
            move_resolutions: resolved.resolutions.clone(),
            refusals: resolved.refusals.clone(),
        };

        let store = Arc::clone(&self.store);
        let durable = (record.clone(), resolved.state.clone());
        if let Err(e) = blocking(move || store.commit_turn(&durable.0, &durable.1)).await {
            error!(session = %session_id, turn = record.turn_id, error = %e, "Turn commit failed");
            *live = None;
            return Err(TurnError::Persistence(e));
        }
        *live = Some(resolved.state.clone());

        let mut docs: Vec<ContextDocument> = resolved.summary_doc.into_iter().collect();
        docs.extend(resolved.event_docs);
        if !docs.is_empty() {
            if let Err(e) = self.index.upsert(&docs) {
                warn!(session = %session_id, turn = record.turn_id, error = %e, "Context index update failed");
            }
        }

        info!(
            session = %session_id,
            turn = record.turn_id,
            attempts = record.attempts,
            outcome = ?record.outcome,
            moves = record.move_resolutions.len(),
            refusals = record.refusals.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Turn committed"
        );

        Ok(TurnResult {
            output: generated.output,
            state: resolved.state,
            record,
        })
    }

    /// The bounded generate-and-validate loop.
    ///
    /// Attempt `n + 1` after a validation failure sends a repair prompt
    /// quoting the rejected text; after a generation failure it resends the
    /// original prompt.
    async fn generate_validated(
        &self,
        state: &WorldState,
        prompt: &TurnPrompt,
        validator: &OutputValidator,
        addressed_npc: Option<&NpcId>,
        player_text: &str,
    ) -> Result<Generated, TurnError> {
        let max_attempts = self.config.engine.max_reprompts + 1;
        let mut next_prompt = prompt.clone();
        let mut last_failure = AttemptFailure::Generation("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let failure = match self.generate_once(&next_prompt).await {
                Ok(raw) => match validator.validate(&raw, player_text) {
                    Ok(output) => {
                        let outcome = if output.safety.refusal {
                            TurnOutcome::SafetyRefusal
                        } else {
                            TurnOutcome::Applied
                        };
                        debug!(session = %state.session_id, attempt, "Output validated");
                        return Ok(Generated {
                            output,
                            attempts: attempt,
                            outcome,
                        });
                    }
                    Err(err) => {
                        let failure = match err {
                            OutputError::Schema(v) => AttemptFailure::Schema(v),
                            OutputError::Consistency(v) => AttemptFailure::Consistency(v),
                        };
                        next_prompt = self
                            .prompts
                            .build_repair_prompt(prompt, &raw, &failure.to_string())
                            .unwrap_or_else(|_| prompt.clone());
                        failure
                    }
                },
                Err(failure) => {
                    next_prompt = prompt.clone();
                    failure
                }
            };
            warn!(
                session = %state.session_id,
                attempt,
                max = max_attempts,
                failure = %failure,
                "Generation attempt discarded"
            );
            last_failure = failure;
        }

        match last_failure {
            AttemptFailure::Consistency(violation) => match self.config.engine.consistency_fallback {
                ConsistencyFallback::TemplatedRefusal => {
                    info!(session = %state.session_id, terms = ?violation.terms, "Falling back to templated refusal");
                    Ok(Generated {
                        output: templated_refusal(state, addressed_npc),
                        attempts: max_attempts,
                        outcome: TurnOutcome::ConsistencyFallback,
                    })
                }
                ConsistencyFallback::Fail => Err(TurnError::ConsistencyViolation(violation)),
            },
            last_failure => Err(TurnError::GenerativeUnavailable {
                attempts: max_attempts,
                last_failure,
            }),
        }
    }

    /// One call across the generative boundary, under the global
    /// concurrency cap and the per-request deadline.
    async fn generate_once(&self, prompt: &TurnPrompt) -> Result<String, AttemptFailure> {
        let timeout_ms = self.config.llm.request_timeout_ms;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AttemptFailure::Generation(e.to_string()))?;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.generator.generate(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AttemptFailure::Generation(e.to_string())),
            Err(_) => Err(AttemptFailure::Timeout { after_ms: timeout_ms }),
        }
    }
}

/// Run blocking store work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, StoryError>
where
    F: FnOnce() -> Result<T, StoryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoryError::Io(std::io::Error::other(e)))?
}
