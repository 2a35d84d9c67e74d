//! Command-line surface over the research-scout library.
//!
//! This binary is the demo/ops surface: enqueue a query, drain the queue
//! once, ask whether a session has a pending injection, or dry-run the
//! trigger detector on a piece of text. The hosting application normally
//! drives the same library API directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use research_scout::config::Config;
use research_scout::generator::ScriptedGenerator;
use research_scout::injection::InjectionManager;
use research_scout::models::{ResearchDepth, SourceKind, TaskOrigin};
use research_scout::queue::{QueueRunner, TaskQueue, TaskSpec};
use research_scout::research::Coordinator;
use research_scout::scoring::KnowledgeScorer;
use research_scout::specialist::{SpecialistRegistry, StaticSpecialist};
use research_scout::store::Database;
use research_scout::trigger::TriggerPipeline;
use research_scout::{logging, Error};

#[derive(Parser)]
#[command(name = "research-scout", about = "Passive background research control plane")]
struct Cli {
    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a research task
    Enqueue {
        /// The research query
        query: String,
        /// Research depth: quick, medium, or deep
        #[arg(long, default_value = "quick")]
        depth: String,
        /// Priority 1-10
        #[arg(long, default_value_t = 5)]
        priority: u8,
        /// Owning session id
        #[arg(long)]
        session: Option<String>,
    },
    /// Drain the queue once with the built-in offline specialists
    Run,
    /// Pull the pending injection for a session, if any
    Inject {
        /// Session id
        session: String,
        /// Current query/topic in the session
        query: String,
    },
    /// Run the trigger pipeline on a piece of text; with --session the
    /// result is gated and enqueued like live traffic
    Detect {
        text: String,
        /// Treat the text as output of this tool instead of a user message
        #[arg(long)]
        tool: Option<String>,
        /// Enqueue the gated trigger for this session instead of dry-running
        #[arg(long)]
        session: Option<String>,
    },
}

/// Wall-clock seed for the speculative trigger; tests pin their own seeds.
fn entropy_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    logging::init(&config.logging);

    let db_path = cli.db.unwrap_or_else(Config::database_path);
    let db = Database::new(db_path).context("opening database")?;

    match cli.command {
        Command::Enqueue {
            query,
            depth,
            priority,
            session,
        } => {
            let depth = ResearchDepth::parse(&depth)
                .ok_or_else(|| anyhow::anyhow!("unknown depth '{}'", depth))?;
            let queue = TaskQueue::new(db, config.queue.clone());
            let spec = TaskSpec {
                query,
                context: None,
                depth,
                origin: TaskOrigin::Manual,
                session_id: session,
                priority,
            };
            match queue.enqueue(spec) {
                Ok(id) => println!("queued {}", id),
                Err(Error::QueueFull(n)) => {
                    anyhow::bail!("queue is full ({} tasks); try again later", n)
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::Run => {
            // Offline wiring: canned specialists plus an empty scripted
            // generator, which exercises the coordinator's deterministic
            // fallback paths end to end.
            let mut registry = SpecialistRegistry::new();
            registry.register(Arc::new(StaticSpecialist::single(
                "web",
                "offline web placeholder",
                0.6,
            )));
            registry.register(Arc::new(StaticSpecialist::single(
                "docs",
                "offline docs placeholder",
                0.6,
            )));
            let coordinator = Arc::new(Coordinator::new(
                Arc::new(ScriptedGenerator::new()),
                registry,
                config.research.clone(),
            ));
            let queue = TaskQueue::new(db.clone(), config.queue.clone());
            let runner = QueueRunner::new(db, queue, coordinator, config.queue.clone());
            let processed = runner.run_until_idle().await?;
            println!("processed {} task(s)", processed);
        }

        Command::Inject { session, query } => {
            db.touch_session(&session, None)?;
            let scorer = KnowledgeScorer::new(config.scoring.clone())?;
            let manager = InjectionManager::new(db, scorer, config.injection.clone());
            match manager.get_injection(&session, &query, None).await? {
                Some(content) => println!("{}", content),
                None => println!("(nothing to inject)"),
            }
        }

        Command::Detect {
            text,
            tool,
            session,
        } => {
            let mut pipeline = TriggerPipeline::new(&config.trigger, entropy_seed());
            let source = match tool {
                Some(tool) => SourceKind::ToolOutput { tool },
                None => SourceKind::UserMessage,
            };
            let trigger = pipeline.assess(session.as_deref().unwrap_or("cli"), &text, &source);
            println!(
                "research: {}  confidence: {:.2}  depth: {}  reason: {}",
                trigger.should_research,
                trigger.confidence,
                trigger.depth.as_str(),
                trigger.reason
            );
            if let Some(query) = &trigger.query {
                println!("query: {}", query);
            }

            if let Some(session) = session {
                let origin = match source {
                    SourceKind::UserMessage => TaskOrigin::UserPrompt,
                    SourceKind::ToolOutput { .. } => TaskOrigin::ToolOutput,
                };
                db.touch_session(&session, None)?;
                let queue = TaskQueue::new(db, config.queue.clone());
                match queue.enqueue_trigger(&trigger, &config.trigger, origin, Some(&session))? {
                    Some(id) => println!("queued {}", id),
                    None => println!("(not enqueued)"),
                }
            }
        }
    }

    Ok(())
}
