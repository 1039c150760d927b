use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_core::commands::Commands;
use murmur_core::config::EngageCfg;
use murmur_core::io::input::{self, InputSender, Ingestion};
use murmur_core::io::output::OutputReceiver;
use murmur_core::persistence::{MemorySnapshotStore, PgSnapshotStore, SnapshotStore};
use murmur_core::prompt::BasicPrompts;
use murmur_core::runtime::Runtime;
use murmur_core::types::InboundMessage;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

const HELP: &str = "\
  <channel> <user>: <text>   send a chat message
  /poke <channel> <user>     send a poke event
  /status <channel> [user]   show conversation state
  /overload <channel>        show overload cooldown
  /reset <channel>           forget a conversation
  /quit                      exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr only when RUST_LOG is set so the prompt stays clean.
    if std::env::var("RUST_LOG").is_ok() {
        let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
        if std::env::var("MURMUR_LOG_JSON").is_ok_and(|v| v == "1") {
            registry
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        } else {
            registry.with(fmt::layer().with_writer(std::io::stderr)).init();
        }
    }

    // DATABASE_URL is optional; without it state lives in memory only.
    let mut startup_notice: Option<String> = None;
    let pool = if let Ok(url) = std::env::var("DATABASE_URL") {
        let mut fallback = |reason: String| {
            tracing::warn!(%reason, "falling back to ephemeral mode");
            startup_notice = Some(format!("note: {reason}, running in ephemeral mode. State will not be persisted."));
        };
        match tokio::time::timeout(
            Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
            sqlx::postgres::PgPoolOptions::new().max_connections(8).connect(&url),
        )
        .await
        {
            Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                Ok(()) => {
                    tracing::info!("database connected and migrations applied");
                    Some(pool)
                }
                Err(e) => {
                    fallback(format!("database migration failed ({e})"));
                    None
                }
            },
            Ok(Err(_)) => {
                fallback("could not connect to DATABASE_URL".into());
                None
            }
            Err(_) => {
                fallback(format!("database connect timed out ({DB_CONNECT_TIMEOUT_SECS}s)"));
                None
            }
        }
    } else {
        None
    };

    let cfg = match pool {
        Some(ref pool) => EngageCfg::load(pool).await?,
        None => EngageCfg::from_env(),
    };
    let cfg = Arc::new(cfg);

    let registry = murmur_llm::http::registry_from_env();
    if registry.is_empty() {
        let notice = "note: no LLM providers configured (MURMUR_PROVIDERS), the bot will stay silent.";
        startup_notice = Some(match startup_notice {
            Some(prev) => format!("{prev}\n{notice}"),
            None => notice.to_owned(),
        });
    }

    let mut prompts = BasicPrompts::new(cfg.judge_include_reasoning, cfg.reply_threshold);
    if let Ok(path) = std::env::var("MURMUR_PERSONA_FILE") {
        prompts = prompts.with_persona_file(path);
    }

    let snapshots: Arc<dyn SnapshotStore> = match pool {
        Some(pool) => Arc::new(PgSnapshotStore::new(pool)),
        None => Arc::new(MemorySnapshotStore::new()),
    };

    let token = CancellationToken::new();
    let (runtime, input_tx, output_rx) =
        Runtime::new(Arc::clone(&cfg), registry, Arc::new(prompts), snapshots, token.clone()).await?;
    let commands = runtime.commands();
    let ingestion = Ingestion::from_cfg(&cfg);

    let runtime_fut = runtime.run();
    let repl_fut = run_repl(input_tx, output_rx, commands, ingestion, token.clone(), startup_notice);
    tokio::pin!(runtime_fut);
    tokio::pin!(repl_fut);

    tokio::select! {
        _ = &mut runtime_fut => {
            token.cancel();
            (&mut repl_fut).await
        }
        result = &mut repl_fut => {
            token.cancel();
            (&mut runtime_fut).await;
            result
        }
    }
}

async fn run_repl(
    input_tx: InputSender,
    mut output_rx: OutputReceiver,
    commands: Arc<Commands>,
    ingestion: Ingestion,
    token: CancellationToken,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    println!("{HELP}");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match line {
                    InputEvent::Line(line) => {
                        match handle_line(line.trim(), &input_tx, &commands, &ingestion).await {
                            LineResult::Continue => request_next_prompt(&ready_tx),
                            LineResult::Quit => break,
                        }
                    }
                    InputEvent::Interrupted => {
                        token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
            msg = output_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                let tag = if msg.is_proactive() { " (unprompted)" } else { "" };
                println!("\r[{}] bot{tag}: {}", msg.conversation_id, msg.content);
            }
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

enum LineResult {
    Continue,
    Quit,
}

async fn handle_line(
    text: &str,
    input_tx: &InputSender,
    commands: &Commands,
    ingestion: &Ingestion,
) -> LineResult {
    if text.is_empty() {
        return LineResult::Continue;
    }
    let mut words = text.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("/q" | "/exit" | "/quit"), _, _) => return LineResult::Quit,
        (Some("/help"), _, _) => println!("{HELP}"),
        (Some("/status"), Some(channel), user) => match commands.status(channel, user, Utc::now()) {
            Some(report) => println!("{report}"),
            None => println!("no state for {channel}"),
        },
        (Some("/overload"), Some(channel), _) => {
            println!("{}", commands.overload_status(channel, Utc::now()));
        }
        (Some("/reset"), Some(channel), _) => match commands.reset_conversation(channel).await {
            Ok(true) => println!("{channel} reset"),
            Ok(false) => println!("no state for {channel}"),
            Err(e) => eprintln!("reset failed: {e}"),
        },
        (Some("/poke"), Some(channel), Some(user)) => {
            let poke = InboundMessage::new(channel, user, "(poke)").with_special_event();
            if input::submit(input_tx, poke).await.is_err() {
                return LineResult::Quit;
            }
        }
        (Some(cmd), _, _) if cmd.starts_with('/') => println!("unknown or incomplete command, try /help"),
        _ => match ingestion.parse_line(text) {
            Some(message) => {
                if input::submit(input_tx, message).await.is_err() {
                    return LineResult::Quit;
                }
            }
            None => println!("expected `<channel> <user>: <text>`"),
        },
    }
    LineResult::Continue
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>, ready_rx: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}
