//! Configuration for the Storyloom engine.
//!
//! Maps directly to `storyloom.toml`. Every section and field has a default,
//! so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryError};

/// Top-level Storyloom configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Context retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Generative backend settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Turn orchestration policy.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Agency gate coefficients.
    #[serde(default)]
    pub agency: AgencyConfig,
    /// Session store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// World-consistency checks.
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl StoryConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `StoryError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| StoryError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load layered configuration: defaults, then the optional file, then
    /// `STORYLOOM__<SECTION>__<KEY>` environment variables.
    ///
    /// The result is validated before it is returned.
    ///
    /// # Errors
    /// Returns `StoryError::Config` if a source fails to parse or a value is
    /// out of range.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("STORYLOOM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder
            .build()
            .and_then(|built| built.try_deserialize::<Self>())
            .map_err(|e| StoryError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `StoryError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let fail = |key: &str, why: &str| Err(StoryError::Config(format!("{key}: {why}")));

        if !(0.0..=1.0).contains(&self.agency.threshold) {
            return fail("agency.threshold", "must be within [0, 1]");
        }
        for (key, value) in self.agency.named_weights() {
            if !value.is_finite() || value < 0.0 {
                return fail(key, "must be a finite non-negative number");
            }
        }
        if self.engine.max_concurrent_generations == 0 {
            return fail("engine.max_concurrent_generations", "must be at least 1");
        }
        if self.engine.graph_cache_size == 0 {
            return fail("engine.graph_cache_size", "must be at least 1");
        }
        if self.llm.request_timeout_ms == 0 {
            return fail("llm.request_timeout_ms", "must be positive");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return fail("llm.temperature", "must be within [0, 2]");
        }
        if !(0.0..=1.0).contains(&self.llm.top_p) {
            return fail("llm.top_p", "must be within [0, 1]");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Context retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Whether optional similarity-ranked documents are added at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of optional documents per turn.
    #[serde(default = "default_5_usize")]
    pub top_k: usize,
    /// Number of most recent turn summaries that are always included.
    #[serde(default = "default_3_usize")]
    pub summary_window: usize,
    /// Most recent memories of the addressed NPC always recalled, capped by
    /// `summary_window`.
    #[serde(default = "default_3_usize")]
    pub npc_memory_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 5,
            summary_window: 3,
            npc_memory_window: 3,
        }
    }
}

/// Which generative backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local Ollama server.
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint.
    #[serde(rename = "openai")]
    OpenAi,
    /// No backend; every request fails as unavailable.
    None,
}

/// Generative backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend provider.
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Base URL of the backend.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key (OpenAI-compatible only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_30000")]
    pub request_timeout_ms: u64,
    /// Extra transport-level retries inside one generation attempt.
    #[serde(default)]
    pub transport_retries: u32,
    /// Max tokens the model may generate.
    #[serde(default = "default_1024")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_0_7")]
    pub temperature: f32,
    /// Nucleus sampling mass.
    #[serde(default = "default_0_95")]
    pub top_p: f32,
    /// Send the turn-output JSON schema as a structured-output format.
    #[serde(default = "default_true")]
    pub structured_output: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_ollama_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_ms: 30_000,
            transport_retries: 0,
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.95,
            structured_output: true,
        }
    }
}

/// What to do with an illegal proposed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePolicy {
    /// Abort the whole turn with `MovementIllegal`.
    Abort,
    /// Drop the move, record the rejection and continue the turn.
    Reject,
}

/// What to do when consistency violations exhaust the re-prompt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyFallback {
    /// Commit a templated in-world refusal narration.
    TemplatedRefusal,
    /// Fail the turn with `ConsistencyViolation`.
    Fail,
}

/// Turn orchestration policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Re-prompts allowed after the first generation attempt.
    #[serde(default = "default_2")]
    pub max_reprompts: u32,
    /// Illegal-move handling.
    #[serde(default = "default_move_policy")]
    pub move_policy: MovePolicy,
    /// Behaviour after repeated consistency violations.
    #[serde(default = "default_consistency_fallback")]
    pub consistency_fallback: ConsistencyFallback,
    /// Global cap on in-flight generative calls.
    #[serde(default = "default_2_usize")]
    pub max_concurrent_generations: usize,
    /// Number of per-session reachability graphs kept in memory.
    #[serde(default = "default_64_usize")]
    pub graph_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reprompts: 2,
            move_policy: MovePolicy::Abort,
            consistency_fallback: ConsistencyFallback::TemplatedRefusal,
            max_concurrent_generations: 2,
            graph_cache_size: 64,
        }
    }
}

/// Agency gate coefficients and vocabularies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyConfig {
    /// Minimum score for a move to be accepted.
    #[serde(default = "default_0_55")]
    pub threshold: f32,
    /// Score before any trait contributes.
    #[serde(default = "default_0_5")]
    pub base_score: f32,
    /// Weight of `obedience_level`.
    #[serde(default = "default_0_35")]
    pub obedience_weight: f32,
    /// Weight of `stubbornness` (subtracted).
    #[serde(default = "default_0_35")]
    pub stubbornness_weight: f32,
    /// Weight of `disposition_to_player / 5`.
    #[serde(default = "default_0_05")]
    pub disposition_weight: f32,
    /// Bonus for a destination with no danger markers.
    #[serde(default = "default_0_05")]
    pub safe_destination_bonus: f32,
    /// Flat penalty for a dangerous destination.
    #[serde(default = "default_0_25")]
    pub danger_penalty: f32,
    /// Weight of `risk_tolerance` when the destination is dangerous.
    #[serde(default = "default_0_3")]
    pub risk_tolerance_weight: f32,
    /// Bonus when the destination matches goals or profession.
    #[serde(default = "default_0_1")]
    pub aligned_bonus: f32,
    /// Penalty when the destination matches neither.
    #[serde(default = "default_0_1")]
    pub misaligned_penalty: f32,
    /// Penalty for a misaligned move away from an NPC's post.
    #[serde(default = "default_0_25")]
    pub anchored_penalty: f32,
    /// Stubbornness at or above which `stubbornness_high` is reported.
    #[serde(default = "default_0_7")]
    pub stubbornness_factor_at: f32,
    /// Risk tolerance below which a dangerous move reports `risk_averse`.
    #[serde(default = "default_0_5")]
    pub risk_averse_below: f32,
    /// Disposition at or below which `disposition_hostile` is reported.
    #[serde(default = "default_hostile_at")]
    pub hostile_disposition_at: i8,
    /// Words that mark a destination as dangerous.
    #[serde(default = "default_risky_terms")]
    pub risky_terms: Vec<String>,
    /// Professions that tie an NPC to its post.
    #[serde(default = "default_anchored_professions")]
    pub anchored_professions: Vec<String>,
    /// Goal phrases that tie an NPC to its post.
    #[serde(default = "default_anchoring_goal_terms")]
    pub anchoring_goal_terms: Vec<String>,
    /// Traits that tie an NPC to its post.
    #[serde(default = "default_cautious_traits")]
    pub cautious_traits: Vec<String>,
}

impl AgencyConfig {
    fn named_weights(&self) -> [(&'static str, f32); 10] {
        [
            ("agency.base_score", self.base_score),
            ("agency.obedience_weight", self.obedience_weight),
            ("agency.stubbornness_weight", self.stubbornness_weight),
            ("agency.disposition_weight", self.disposition_weight),
            ("agency.safe_destination_bonus", self.safe_destination_bonus),
            ("agency.danger_penalty", self.danger_penalty),
            ("agency.risk_tolerance_weight", self.risk_tolerance_weight),
            ("agency.aligned_bonus", self.aligned_bonus),
            ("agency.misaligned_penalty", self.misaligned_penalty),
            ("agency.anchored_penalty", self.anchored_penalty),
        ]
    }
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            base_score: 0.5,
            obedience_weight: 0.35,
            stubbornness_weight: 0.35,
            disposition_weight: 0.05,
            safe_destination_bonus: 0.05,
            danger_penalty: 0.25,
            risk_tolerance_weight: 0.3,
            aligned_bonus: 0.1,
            misaligned_penalty: 0.1,
            anchored_penalty: 0.25,
            stubbornness_factor_at: 0.7,
            risk_averse_below: 0.5,
            hostile_disposition_at: -2,
            risky_terms: default_risky_terms(),
            anchored_professions: default_anchored_professions(),
            anchoring_goal_terms: default_anchoring_goal_terms(),
            cautious_traits: default_cautious_traits(),
        }
    }
}

/// Which session store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// One SQLite database for all sessions.
    Sqlite,
    /// A directory per session with JSON files.
    Json,
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: sqlite or json.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Database file (sqlite) or sessions root directory (json).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Enable SQLite WAL journal mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Store and verify CRC-32 checksums of persisted rows.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Rotating backups kept next to the database file.
    #[serde(default = "default_3")]
    pub backup_count: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            wal_mode: true,
            checksum_enabled: true,
            backup_count: 3,
        }
    }
}

/// World-consistency checks on model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Run the guarded-term scan at all.
    #[serde(default = "default_true")]
    pub consistency_checks_enabled: bool,
    /// Terms the player mentioned first are not violations.
    #[serde(default = "default_true")]
    pub first_mention_exempt: bool,
    /// Fallback blocklist for medieval worlds whose bible lists nothing.
    #[serde(default = "default_anachronisms")]
    pub default_anachronisms: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            consistency_checks_enabled: true,
            first_mention_exempt: true,
            default_anachronisms: default_anachronisms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_provider() -> ProviderKind { ProviderKind::Ollama }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:7b-instruct".to_string() }
fn default_api_key_env() -> String { "STORYLOOM_API_KEY".to_string() }
fn default_move_policy() -> MovePolicy { MovePolicy::Abort }
fn default_consistency_fallback() -> ConsistencyFallback { ConsistencyFallback::TemplatedRefusal }
fn default_backend() -> StoreBackend { StoreBackend::Sqlite }
fn default_store_path() -> PathBuf { PathBuf::from("data/storyloom.db") }
fn default_0_05() -> f32 { 0.05 }
fn default_0_1() -> f32 { 0.1 }
fn default_0_25() -> f32 { 0.25 }
fn default_0_3() -> f32 { 0.3 }
fn default_0_35() -> f32 { 0.35 }
fn default_0_5() -> f32 { 0.5 }
fn default_0_55() -> f32 { 0.55 }
fn default_0_7() -> f32 { 0.7 }
fn default_0_95() -> f32 { 0.95 }
fn default_hostile_at() -> i8 { -2 }
fn default_2() -> u32 { 2 }
fn default_3() -> u32 { 3 }
fn default_1024() -> u32 { 1024 }
fn default_2_usize() -> usize { 2 }
fn default_3_usize() -> usize { 3 }
fn default_5_usize() -> usize { 5 }
fn default_64_usize() -> usize { 64 }
fn default_30000() -> u64 { 30_000 }

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

fn default_risky_terms() -> Vec<String> {
    strings(&["forest", "ruins", "bandit", "dark", "cave", "dungeon", "bridge", "swamp"])
}

fn default_anchored_professions() -> Vec<String> {
    strings(&["merchant", "shopkeeper", "innkeeper", "guard", "priest", "healer"])
}

fn default_anchoring_goal_terms() -> Vec<String> {
    strings(&["protect", "guard", "keep", "watch", "avoid trouble"])
}

fn default_cautious_traits() -> Vec<String> {
    strings(&["coward", "cautious"])
}

fn default_anachronisms() -> Vec<String> {
    strings(&[
        "smartphone", "phone", "internet", "wifi", "wi-fi", "email", "app",
        "credit card", "gun", "ak-47", "gps", "browser", "website", "electricity",
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
