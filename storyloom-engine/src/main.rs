//! `storyloom`: play a session from the terminal.
//!
//! ```text
//! storyloom --config storyloom.toml                 # new session, sample world
//! storyloom --world world.json                      # new session from a snapshot
//! storyloom --session 20261015_142233_9f2c41ab      # resume
//! storyloom --offline                               # no model; canned narration
//! ```
//!
//! At the prompt, `@npc_id text` addresses an NPC; `:look`, `:history`,
//! `:backup` and `quit` are commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use storyloom_core::StoryConfig;
use storyloom_core::persistence::{SessionStore, open_store};
use storyloom_core::retrieval::KeywordIndex;
use storyloom_core::types::SessionId;
use storyloom_core::world::{WorldSnapshot, sample};
use storyloom_engine::repl::{Command, describe, parse_line, render_turn};
use storyloom_engine::telemetry::init_tracing;
use storyloom_engine::TurnEngine;
use storyloom_llm::{LlmClient, LlmError, PromptEngine, ScriptedGenerator, TextGenerator, TurnPrompt};

/// Served for every turn in offline mode.
const OFFLINE_TURN: &str = r#"{
  "narration": "The valley is quiet. Only the wind answers you.",
  "npc_dialogue": [],
  "world_updates": {"player_location": null, "npc_moves": []},
  "memory_summary": "The player waited and nothing happened.",
  "safety": {"refusal": false, "reason": null}
}"#;

#[derive(Debug, Parser)]
#[command(name = "storyloom", version, about = "LLM-narrated RPG turn engine")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// World snapshot JSON for a new session; the sample world otherwise.
    #[arg(short, long, conflicts_with = "session")]
    world: Option<PathBuf>,

    /// Resume an existing session.
    #[arg(short, long)]
    session: Option<String>,

    /// Directory of TOML prompt templates.
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Run without a model backend.
    #[arg(long)]
    offline: bool,
}

/// The generator picked at startup.
enum Backend {
    Live(LlmClient),
    Offline(ScriptedGenerator),
}

impl TextGenerator for Backend {
    fn model_name(&self) -> &str {
        match self {
            Self::Live(client) => client.model(),
            Self::Offline(scripted) => scripted.model_name(),
        }
    }

    async fn generate(&self, prompt: &TurnPrompt) -> Result<String, LlmError> {
        match self {
            Self::Live(client) => TextGenerator::generate(client, prompt).await,
            Self::Offline(scripted) => scripted.generate(prompt).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = StoryConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.general).map_err(|e| anyhow::anyhow!(e))?;

    let backend = if cli.offline {
        Backend::Offline(ScriptedGenerator::default().with_fallback(OFFLINE_TURN))
    } else {
        Backend::Live(LlmClient::from_config(&config.llm).context("configuring model backend")?)
    };
    info!(model = backend.model_name(), store = ?config.persistence.backend, "storyloom starting");

    let store: Arc<dyn SessionStore> = Arc::from(open_store(&config.persistence).context("opening session store")?);
    let prompts = match &cli.prompts {
        Some(dir) => PromptEngine::from_directory(dir).context("loading prompt templates")?,
        None => PromptEngine::builtin(),
    };
    let engine = TurnEngine::new(config, Arc::new(backend), store, Arc::new(KeywordIndex::new()))
        .with_prompts(prompts);

    let session_id = match &cli.session {
        Some(raw) => {
            let id = SessionId::parse(raw)?;
            engine.state(&id).await.with_context(|| format!("resuming session {id}"))?;
            id
        }
        None => {
            let snapshot = match &cli.world {
                Some(path) => load_snapshot(path)?,
                None => sample::hollowmere(),
            };
            engine.create_session(snapshot).await.context("creating session")?
        }
    };

    run_loop(&engine, &session_id).await
}

fn load_snapshot(path: &Path) -> Result<WorldSnapshot> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot: WorldSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(snapshot)
}

async fn run_loop<G: TextGenerator>(engine: &TurnEngine<G>, session_id: &SessionId) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let state = engine.state(session_id).await?;
    let intro = format!(
        "Session {session_id}: {}\n{}\n{}\n",
        state.world.title,
        state.world.starting_hook,
        describe(&state)
    );
    stdout.write_all(intro.as_bytes()).await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Some(command) = parse_line(&line) else {
            continue;
        };

        let reply = match command {
            Command::Quit => break,
            Command::Backup => match engine.backup().await {
                Ok(()) => "Backup written.".to_string(),
                Err(e) => format!("Backup failed: {e}"),
            },
            Command::Look => describe(&engine.state(session_id).await?),
            Command::History => {
                let turns = engine.history(session_id, Some(5)).await?;
                if turns.is_empty() {
                    "No turns yet.".to_string()
                } else {
                    turns
                        .iter()
                        .map(|t| format!("#{} {} -> {}", t.turn_id, t.player_text, t.output.memory_summary))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Turn { npc, text } => match engine.process_turn(session_id, npc.as_ref(), &text).await {
                Ok(result) => render_turn(&result),
                Err(e) if e.is_recoverable() => format!("Nothing happens ({e}). Try again."),
                Err(e) => format!("The turn could not be saved ({e}). State was reloaded."),
            },
        };
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    info!(session = %session_id, "storyloom exiting");
    Ok(())
}
