//! confab - streaming chat client

mod config;
mod quota;
mod store;

use anyhow::{Context, bail};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use confab_session::{Session, SessionEvent};
use confab_stream::{AnthropicDecoder, FrameDecoder, OpenAiDecoder, SseClient};

use crate::config::Config;
use crate::quota::FileLedger;
use crate::store::FileStore;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// confab - streaming chat over a quota-limited session
#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the chat-completions endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Identity used as the quota and store partition key
    #[arg(short, long)]
    identity: Option<String>,

    /// Resume a saved conversation by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved conversations and exit
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let model = args
        .model
        .or(config.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let base_url = args
        .base_url
        .or(config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let identity = args
        .identity
        .or(config.identity.clone())
        .unwrap_or_else(|| "local".to_string());

    let data_dir = Config::data_dir();
    let store = Arc::new(
        FileStore::open(data_dir.join("conversations"), &model)
            .context("failed to open conversation store")?,
    );

    if args.list {
        use confab_session::ConversationStore;
        for conversation in store.list_conversations(&identity).await? {
            println!(
                "{}  {}",
                conversation.id,
                conversation.title.as_deref().unwrap_or("(untitled)")
            );
        }
        return Ok(());
    }

    let Some(api_key) = config.resolve_api_key() else {
        bail!("no API key configured; set CONFAB_API_KEY or api_key in config.toml");
    };

    let ledger = Arc::new(
        FileLedger::open(data_dir.join("quota.json")).context("failed to open quota ledger")?,
    );
    let generator = Arc::new(confab_session::SseGenerator::new(
        SseClient::new(&base_url, api_key)?,
        &model,
        decoder_for(&model),
    ));
    let session = Arc::new(Session::new(identity, store, ledger, generator));

    if let Some(id) = &args.resume {
        session.select_conversation(id).await?;
    }
    session.refresh_conversations().await?;
    let quota = session.refresh_quota().await?;
    eprintln!(
        "confab [{}] - {} of {} messages left today (/help for commands)",
        model, quota.remaining, quota.limit
    );

    spawn_printer(&session);
    run_repl(session).await
}

/// Pick the frame decoder for the model's provider, once, at session open
fn decoder_for(model: &str) -> Arc<dyn FrameDecoder> {
    if model.starts_with("claude") {
        Arc::new(AnthropicDecoder)
    } else {
        Arc::new(OpenAiDecoder)
    }
}

/// Print streamed deltas as they arrive
fn spawn_printer(session: &Arc<Session>) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::AssistantDelta { text }) => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                Ok(SessionEvent::TurnEnd) | Ok(SessionEvent::Error { .. }) => println!(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_repl(session: Arc<Session>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            prompt();
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(&session, command).await {
                break;
            }
        } else {
            send_with_cancel(&session, &line).await;
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    eprint!("> ");
    let _ = std::io::stderr().flush();
}

/// Drive one send; Ctrl-C while streaming cancels it instead of exiting
async fn send_with_cancel(session: &Session, text: &str) {
    let send = session.send(text);
    tokio::pin!(send);
    loop {
        tokio::select! {
            result = &mut send => {
                if let Err(e) = result {
                    eprintln!("error: {}", e);
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                if session.cancel() {
                    eprintln!("\n(cancelled)");
                }
            }
        }
    }
}

/// Handle a slash command; returns `false` to quit
async fn handle_command(session: &Arc<Session>, command: &str) -> bool {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    let result = match name {
        "help" => {
            eprintln!("/new /list /open <n> /delete <n> /quota /quit");
            Ok(())
        }
        "new" => session.create_conversation().await.map(|_| {
            eprintln!("started a new conversation");
        }),
        "list" => match session.refresh_conversations().await {
            Ok(()) => {
                for (index, conversation) in session.state().conversations.iter().enumerate() {
                    eprintln!(
                        "{:>3}  {}",
                        index + 1,
                        conversation.title.as_deref().unwrap_or("(untitled)")
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        "open" => match conversation_at(session, arg) {
            Some(id) => session.select_conversation(&id).await.map(|()| {
                for message in session.state().messages {
                    eprintln!("[{}] {}", message.role.as_str(), message.content);
                }
            }),
            None => {
                eprintln!("usage: /open <n> (see /list)");
                Ok(())
            }
        },
        "delete" => match conversation_at(session, arg) {
            Some(id) => session.delete_conversation(&id).await.map(|()| {
                eprintln!("deleted");
            }),
            None => {
                eprintln!("usage: /delete <n> (see /list)");
                Ok(())
            }
        },
        "quota" => session.refresh_quota().await.map(|quota| {
            eprintln!(
                "{} used, {} remaining, resets at {}",
                quota.used, quota.remaining, quota.reset_at
            );
        }),
        "quit" | "exit" => return false,
        _ => {
            eprintln!("unknown command: /{}", name);
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("error: {}", e);
    }
    true
}

/// Resolve a 1-based /list index to a conversation ID
fn conversation_at(session: &Session, arg: &str) -> Option<String> {
    let index: usize = arg.parse().ok()?;
    session
        .state()
        .conversations
        .get(index.checked_sub(1)?)
        .map(|c| c.id.clone())
}
