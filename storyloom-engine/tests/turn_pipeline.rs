//! End-to-end turns through `TurnEngine` with scripted model output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use storyloom_core::config::{ConsistencyFallback, PersistenceConfig, StoryConfig};
use storyloom_core::error::{AttemptFailure, Result as StoreResult, StoryError, TurnError};
use storyloom_core::movement::IllegalMove;
use storyloom_core::persistence::{JsonSessionStore, SessionStore, SqliteSessionStore};
use storyloom_core::retrieval::{ContextIndex, KeywordIndex};
use storyloom_core::turn::{MoveStatus, TurnOutcome, TurnRecord};
use storyloom_core::world::{WorldSnapshot, WorldState, sample};
use storyloom_core::{LocationId, NpcId, SessionId};
use storyloom_engine::TurnEngine;
use storyloom_llm::{LlmError, ScriptedGenerator};

const COURIER_SENT: &str = r#"{
  "narration": "Mara shoulders her satchel.",
  "npc_dialogue": [{"npc_id": "npc_001", "line": "To the road, then."}],
  "world_updates": {
    "player_location": null,
    "npc_moves": [{
      "npc_id": "npc_001", "from_location": "loc_001", "to_location": "loc_002",
      "trigger": "player_instruction", "reason": "carry a message down the valley road",
      "permanence": "temporary"
    }]
  },
  "memory_summary": "Mara set off down the road with a message.",
  "safety": {"refusal": false, "reason": null}
}"#;

const ARCHIVIST_ASKED: &str = r#"{
  "narration": "Edda peers at you over her spectacles.",
  "npc_dialogue": [{"npc_id": "npc_007", "line": "The yard? I have records to keep."}],
  "world_updates": {
    "player_location": null,
    "npc_moves": [{
      "npc_id": "npc_007", "from_location": "loc_001", "to_location": "loc_003",
      "trigger": "player_instruction", "reason": "asked by the player",
      "permanence": "temporary"
    }]
  },
  "memory_summary": "The player asked Edda to go to the miller's yard.",
  "safety": {"refusal": false, "reason": null}
}"#;

const QUIET: &str = r#"{
  "narration": "The bells are silent.",
  "npc_dialogue": [],
  "world_updates": {"player_location": null, "npc_moves": []},
  "memory_summary": "A quiet moment in the square.",
  "safety": {"refusal": false, "reason": null}
}"#;

const SMARTPHONE: &str = r#"{
  "narration": "Edda checks her smartphone.",
  "npc_dialogue": [],
  "world_updates": {"player_location": null, "npc_moves": []},
  "memory_summary": "Nothing.",
  "safety": {"refusal": false, "reason": null}
}"#;

struct Rig {
    engine: TurnEngine<ScriptedGenerator>,
    generator: Arc<ScriptedGenerator>,
    store: Arc<dyn SessionStore>,
}

fn sqlite() -> Arc<dyn SessionStore> {
    Arc::new(SqliteSessionStore::open_in_memory(&PersistenceConfig::default()).expect("open"))
}

fn rig_with(generator: ScriptedGenerator, config: StoryConfig, store: Arc<dyn SessionStore>) -> Rig {
    let generator = Arc::new(generator);
    let engine = TurnEngine::new(
        config,
        Arc::clone(&generator),
        Arc::clone(&store),
        Arc::new(KeywordIndex::new()),
    );
    Rig {
        engine,
        generator,
        store,
    }
}

fn rig(generator: ScriptedGenerator) -> Rig {
    rig_with(generator, StoryConfig::default(), sqlite())
}

async fn session(rig: &Rig) -> SessionId {
    rig.engine
        .create_session(sample::hollowmere())
        .await
        .expect("session created")
}

fn location_of(state: &WorldState, npc: &str) -> LocationId {
    state.npc_locations[&NpcId::new(npc)].clone()
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepted_move_commits_and_persists() {
    let rig = rig(ScriptedGenerator::new([COURIER_SENT]));
    let id = session(&rig).await;
    let courier = NpcId::new("npc_001");

    let result = rig
        .engine
        .process_turn(&id, Some(&courier), "Mara, take this letter to the road.")
        .await
        .expect("turn commits");

    assert_eq!(result.record.turn_id, 1);
    assert_eq!(result.record.outcome, TurnOutcome::Applied);
    assert_eq!(result.record.attempts, 1);
    assert_eq!(result.record.model_used, "scripted");
    assert_eq!(result.record.move_resolutions[0].status, MoveStatus::Applied);
    assert_eq!(location_of(&result.state, "npc_001"), LocationId::new("loc_002"));
    assert_eq!(result.state.turn_summaries.len(), 1);

    let stored = rig.store.load_state(&id).expect("load").expect("present");
    assert_eq!(stored, result.state);
    assert_eq!(rig.engine.state(&id).await.expect("live"), result.state);
    assert_eq!(rig.engine.history(&id, None).await.expect("log"), [result.record]);
}

#[tokio::test]
async fn refusal_is_recorded_and_retrieved_next_turn() {
    let rig = rig(ScriptedGenerator::new([ARCHIVIST_ASKED, QUIET]));
    let id = session(&rig).await;
    let edda = NpcId::new("npc_007");

    let first = rig
        .engine
        .process_turn(&id, Some(&edda), "Edda, please go to the miller's yard.")
        .await
        .expect("turn commits");
    assert_eq!(first.record.refusals.len(), 1);
    assert_eq!(first.record.refusals[0].code, "stubbornness_high_goal_misaligned");
    assert_eq!(location_of(&first.state, "npc_007"), LocationId::new("loc_001"));

    rig.engine
        .process_turn(&id, Some(&edda), "Why have you refused to go?")
        .await
        .expect("second turn commits");

    let prompts = rig.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].user.contains("[event npc=npc_007"));
    assert!(prompts[1].user.contains("stubbornness_high_goal_misaligned"));
    assert!(prompts[1].user.contains("The player asked Edda to go to the miller's yard."));
}

#[tokio::test]
async fn schema_failure_reprompts_with_repair_prompt() {
    let rig = rig(ScriptedGenerator::new(["I'd rather tell a story.", QUIET]));
    let id = session(&rig).await;

    let result = rig.engine.process_turn(&id, None, "Look around.").await.expect("commits");
    assert_eq!(result.record.attempts, 2);

    let prompts = rig.generator.prompts();
    assert!(prompts[1].user.contains("Your previous answer was rejected"));
    assert!(prompts[1].user.contains("I'd rather tell a story."));
    assert_eq!(prompts[1].system, prompts[0].system);
}

#[tokio::test]
async fn model_refusal_advances_turn_without_summary() {
    let refusal = QUIET.replace(r#""refusal": false"#, r#""refusal": true"#);
    let rig = rig(ScriptedGenerator::new([refusal]));
    let id = session(&rig).await;

    let result = rig.engine.process_turn(&id, None, "Tell me a secret.").await.expect("commits");
    assert_eq!(result.record.outcome, TurnOutcome::SafetyRefusal);
    assert_eq!(result.state.last_turn_id, 1);
    assert!(result.state.turn_summaries.is_empty());
}

// ---------------------------------------------------------------------------
// Failures leave state untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_generation_is_unavailable() {
    let rig = rig(ScriptedGenerator::from_results([
        Err(LlmError::Timeout(10)),
        Err(LlmError::Empty),
        Err(LlmError::Unavailable("down".into())),
    ]));
    let id = session(&rig).await;
    let before = rig.engine.state(&id).await.expect("state");

    let err = rig.engine.process_turn(&id, None, "Hello?").await.expect_err("fails");
    let TurnError::GenerativeUnavailable { attempts, last_failure } = err else {
        panic!("expected GenerativeUnavailable, got {err:?}");
    };
    assert_eq!(attempts, 3);
    assert!(matches!(last_failure, AttemptFailure::Generation(_)));
    assert_eq!(rig.generator.calls(), 3);

    assert_eq!(rig.engine.state(&id).await.expect("state"), before);
    assert!(rig.engine.history(&id, None).await.expect("log").is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_generation_times_out() {
    let mut config = StoryConfig::default();
    config.llm.request_timeout_ms = 1_000;
    config.engine.max_reprompts = 0;
    let generator = ScriptedGenerator::new([QUIET]).with_delay(Duration::from_secs(30));
    let rig = rig_with(generator, config, sqlite());
    let id = session(&rig).await;

    let err = rig.engine.process_turn(&id, None, "Hello?").await.expect_err("times out");
    assert!(matches!(
        err,
        TurnError::GenerativeUnavailable {
            attempts: 1,
            last_failure: AttemptFailure::Timeout { after_ms: 1_000 },
        }
    ));
    assert_eq!(rig.engine.state(&id).await.expect("state").last_turn_id, 0);
}

#[tokio::test]
async fn unreachable_move_aborts_turn() {
    let raw = ARCHIVIST_ASKED.replace("loc_003", "loc_004");
    let rig = rig(ScriptedGenerator::new([raw]));
    let id = session(&rig).await;
    let before = rig.engine.state(&id).await.expect("state");

    let err = rig.engine.process_turn(&id, None, "Go to the shrine.").await.expect_err("illegal");
    assert!(matches!(
        err,
        TurnError::MovementIllegal {
            reason: IllegalMove::Unreachable,
            ..
        }
    ));
    assert!(err.is_recoverable());
    assert_eq!(rig.engine.state(&id).await.expect("state"), before);
}

#[tokio::test]
async fn consistency_exhaustion_falls_back_to_templated_refusal() {
    let rig = rig(ScriptedGenerator::default().with_fallback(SMARTPHONE));
    let id = session(&rig).await;
    let edda = NpcId::new("npc_007");

    let result = rig
        .engine
        .process_turn(&id, Some(&edda), "What are you holding?")
        .await
        .expect("fallback commits");
    assert_eq!(result.record.outcome, TurnOutcome::ConsistencyFallback);
    assert_eq!(result.record.attempts, 3);
    assert!(result.output.safety.refusal);
    assert!(!result.output.narration.contains("smartphone"));
    assert_eq!(result.state.last_turn_id, 1);
    assert!(result.state.turn_summaries.is_empty());
}

#[tokio::test]
async fn consistency_fail_policy_surfaces_violation() {
    let mut config = StoryConfig::default();
    config.engine.consistency_fallback = ConsistencyFallback::Fail;
    let rig = rig_with(ScriptedGenerator::default().with_fallback(SMARTPHONE), config, sqlite());
    let id = session(&rig).await;

    let err = rig.engine.process_turn(&id, None, "Hello").await.expect_err("violation");
    let TurnError::ConsistencyViolation(violation) = err else {
        panic!("expected ConsistencyViolation, got {err:?}");
    };
    assert_eq!(violation.terms, ["smartphone"]);
}

#[tokio::test]
async fn player_first_mention_is_allowed() {
    let rig = rig(ScriptedGenerator::new([SMARTPHONE]));
    let id = session(&rig).await;
    let result = rig
        .engine
        .process_turn(&id, None, "Do you have a smartphone?")
        .await
        .expect("exempt");
    assert_eq!(result.record.outcome, TurnOutcome::Applied);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let rig = rig(ScriptedGenerator::new([QUIET]));
    let ghost = SessionId::parse("ghost").expect("valid");
    let err = rig.engine.process_turn(&ghost, None, "Hello").await.expect_err("missing");
    assert!(matches!(err, TurnError::SessionNotFound(_)));
    assert_eq!(rig.generator.calls(), 0);
    assert!(rig.engine.state(&ghost).await.is_err());
    assert_eq!(rig.engine.live_sessions(), 0, "unknown ids are not registered");
}

#[tokio::test]
async fn invalid_world_is_rejected() {
    let rig = rig(ScriptedGenerator::new([QUIET]));
    let mut world: WorldSnapshot = sample::hollowmere();
    world.starting_location = LocationId::new("loc_404");
    assert!(matches!(
        rig.engine.create_session(world).await,
        Err(StoryError::InvalidWorld(_))
    ));
}

// ---------------------------------------------------------------------------
// Durability handshake
// ---------------------------------------------------------------------------

/// Delegates to SQLite but can be told to fail commits.
struct FlakyStore {
    inner: SqliteSessionStore,
    fail_commits: AtomicBool,
}

impl SessionStore for FlakyStore {
    fn save_snapshot(&self, session_id: &SessionId, snapshot: &WorldSnapshot) -> StoreResult<()> {
        self.inner.save_snapshot(session_id, snapshot)
    }
    fn load_snapshot(&self, session_id: &SessionId) -> StoreResult<Option<WorldSnapshot>> {
        self.inner.load_snapshot(session_id)
    }
    fn save_state(&self, state: &WorldState) -> StoreResult<()> {
        self.inner.save_state(state)
    }
    fn load_state(&self, session_id: &SessionId) -> StoreResult<Option<WorldState>> {
        self.inner.load_state(session_id)
    }
    fn append_turn(&self, record: &TurnRecord) -> StoreResult<()> {
        self.inner.append_turn(record)
    }
    fn read_turns(&self, session_id: &SessionId, limit: Option<usize>) -> StoreResult<Vec<TurnRecord>> {
        self.inner.read_turns(session_id, limit)
    }
    fn commit_turn(&self, record: &TurnRecord, state: &WorldState) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoryError::Io(std::io::Error::other("disk full")));
        }
        self.inner.commit_turn(record, state)
    }
    fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        self.inner.list_sessions()
    }
}

#[tokio::test]
async fn failed_commit_drops_live_state() {
    let flaky = Arc::new(FlakyStore {
        inner: SqliteSessionStore::open_in_memory(&PersistenceConfig::default()).expect("open"),
        fail_commits: AtomicBool::new(true),
    });
    let store: Arc<dyn SessionStore> = flaky.clone();
    let rig = rig_with(
        ScriptedGenerator::new([COURIER_SENT, COURIER_SENT]),
        StoryConfig::default(),
        store,
    );
    let id = session(&rig).await;

    let err = rig.engine.process_turn(&id, None, "Go, Mara.").await.expect_err("commit fails");
    assert!(matches!(err, TurnError::Persistence(_)));
    assert!(!err.is_recoverable());

    let reloaded = rig.engine.state(&id).await.expect("reloads from store");
    assert_eq!(reloaded.last_turn_id, 0);
    assert_eq!(location_of(&reloaded, "npc_001"), LocationId::new("loc_001"));

    flaky.fail_commits.store(false, Ordering::SeqCst);
    let result = rig.engine.process_turn(&id, None, "Go, Mara.").await.expect("commits");
    assert_eq!(result.record.turn_id, 1);
}

#[tokio::test]
async fn failed_json_commit_leaves_no_log_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn SessionStore> = Arc::new(JsonSessionStore::open(dir.path()).expect("open"));
    let rig = rig_with(
        ScriptedGenerator::new([COURIER_SENT, COURIER_SENT]),
        StoryConfig::default(),
        store,
    );
    let id = session(&rig).await;

    let blocker = dir.path().join(id.as_str()).join("state.json.tmp");
    std::fs::create_dir_all(&blocker).expect("block state write");
    let err = rig.engine.process_turn(&id, None, "Go, Mara.").await.expect_err("commit fails");
    assert!(matches!(err, TurnError::Persistence(_)));
    assert!(rig.engine.history(&id, None).await.expect("log").is_empty());

    std::fs::remove_dir(&blocker).expect("unblock");
    let result = rig.engine.process_turn(&id, None, "Go, Mara.").await.expect("commits");
    assert_eq!(result.record.turn_id, 1);
    let log = rig.engine.history(&id, None).await.expect("log");
    assert_eq!(log.iter().map(|t| t.turn_id).collect::<Vec<_>>(), [1]);
}

#[tokio::test]
async fn tampered_state_is_refused_on_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn SessionStore> = Arc::new(JsonSessionStore::open(dir.path()).expect("open"));
    let first = rig_with(ScriptedGenerator::new([QUIET]), StoryConfig::default(), Arc::clone(&store));
    let id = session(&first).await;

    let path = dir.path().join(id.as_str()).join("state.json");
    let mut state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).expect("read state")).expect("json");
    state["npc_profiles"]["npc_007"]["stubbornness"] = serde_json::json!(7.5);
    std::fs::write(&path, serde_json::to_vec(&state).expect("encode")).expect("write state");

    let resumed = rig_with(ScriptedGenerator::new([QUIET]), StoryConfig::default(), store);
    let err = resumed.engine.state(&id).await.expect_err("rejected");
    assert!(matches!(err, TurnError::Persistence(StoryError::InvalidWorld(_))));
    assert!(resumed.engine.process_turn(&id, None, "Hello").await.is_err());
    assert_eq!(resumed.generator.calls(), 0);
    assert_eq!(resumed.engine.live_sessions(), 0);
}

#[tokio::test]
async fn resumed_session_reseeds_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn SessionStore> = Arc::new(JsonSessionStore::open(dir.path()).expect("open"));
    let edda = NpcId::new("npc_007");

    let first = rig_with(
        ScriptedGenerator::new([ARCHIVIST_ASKED]),
        StoryConfig::default(),
        Arc::clone(&store),
    );
    let id = session(&first).await;
    first
        .engine
        .process_turn(&id, Some(&edda), "Edda, please go to the miller's yard.")
        .await
        .expect("commits");

    let index = Arc::new(KeywordIndex::new());
    let generator = Arc::new(ScriptedGenerator::new([QUIET]));
    let resumed = TurnEngine::new(
        StoryConfig::default(),
        Arc::clone(&generator),
        Arc::clone(&store),
        Arc::clone(&index) as Arc<dyn ContextIndex>,
    );
    let state = resumed.state(&id).await.expect("resumes");
    assert_eq!(state.last_turn_id, 1);
    assert!(index.count(&id) > 0);

    let result = resumed
        .process_turn(&id, Some(&edda), "Why have you refused to go?")
        .await
        .expect("commits");
    assert_eq!(result.record.turn_id, 2);
    assert!(generator.prompts()[0].user.contains("stubbornness_high_goal_misaligned"));
}

#[tokio::test]
async fn sessions_are_independent() {
    let rig = rig(ScriptedGenerator::default().with_fallback(COURIER_SENT));
    let a = session(&rig).await;
    let b = session(&rig).await;
    assert_ne!(a, b);

    let (ra, rb) = tokio::join!(
        rig.engine.process_turn(&a, None, "Go, Mara."),
        rig.engine.process_turn(&b, None, "Go, Mara."),
    );
    assert_eq!(ra.expect("a").record.turn_id, 1);
    assert_eq!(rb.expect("b").record.turn_id, 1);

    let again = rig.engine.process_turn(&a, None, "Wait.").await;
    // npc_001 is already on the road, so the scripted move is stale.
    assert!(matches!(again, Err(TurnError::MovementIllegal { .. })));
    assert_eq!(rig.engine.state(&a).await.expect("a").last_turn_id, 1);
}
