use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use ember_api::{Credentials, HttpChatApi};
use ember_db::Database;
use ember_sync::{Engine, MediaAccess, ReplyAuthor, Session, SyncConfig, SyncError, ThreadRoot, UnlockRegistry};
use ember_types::content::{ImagePayload, MessageContent};
use ember_types::events::{EngineEvent, ScrollCommand};
use ember_types::models::{Conversation, ConversationKind, Message, Viewer};

type App = Engine<HttpChatApi>;

/// Log filter when `RUST_LOG` is unset; one directive per crate target.
const DEFAULT_FILTER: &str = "ember=debug,ember_sync=debug,ember_api=debug,ember_db=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .init();

    // Config
    let api_url = std::env::var("EMBER_API_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let token = required("EMBER_TOKEN")?;
    let db_path = std::env::var("EMBER_DB_PATH").unwrap_or_else(|_| "ember.db".into());
    let viewer = Viewer {
        user_id: required("EMBER_USER_ID")?,
        handle: required("EMBER_HANDLE")?,
        email: std::env::var("EMBER_EMAIL").ok(),
    };
    let conversation = conversation_from_env()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Engine
    let api = HttpChatApi::new(api_url.clone(), Credentials::new(token, viewer.clone()))?;
    let rewards = Arc::new(UnlockRegistry::new(db, viewer.user_id.clone()));
    let engine: App = Engine::new(api, viewer, SyncConfig::from_env(), rewards);
    let mut events = engine.subscribe();

    info!("Connecting to {} as {}", api_url, engine.viewer().handle);
    let session = engine.open(conversation).await?;
    render(&engine, &session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut expiry = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::StoreChanged { .. }) => render(&engine, &session),
                Ok(EngineEvent::TurnGateChanged { can_send, reason, .. }) => {
                    if can_send {
                        println!("-- you can send again");
                    } else if let Some(reason) = reason {
                        println!("-- {}", reason);
                    }
                }
                Ok(EngineEvent::Scroll { command: ScrollCommand::ShowJumpToLatest { unseen }, .. }) => {
                    println!("-- {} new messages", unseen);
                }
                Ok(EngineEvent::ConversationExpired { .. }) => {
                    println!("-- this conversation has expired");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} engine events, redrawing", skipped);
                    render(&engine, &session);
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match run_command(&engine, &session, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("-- {}", e),
                }
            }
            _ = expiry.tick() => {
                engine.evict_expired(Utc::now()).await;
            }
        }
    }

    engine.close(session.id()).await;
    Ok(())
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{} must be set", name))
}

fn conversation_from_env() -> anyhow::Result<Conversation> {
    let id: Uuid = required("EMBER_CONVERSATION_ID")?
        .parse()
        .context("EMBER_CONVERSATION_ID must be a UUID")?;
    let kind: ConversationKind = std::env::var("EMBER_CONVERSATION_KIND")
        .unwrap_or_else(|_| "channel".into())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let created_at = match std::env::var("EMBER_CONVERSATION_CREATED_AT") {
        Ok(raw) => DateTime::parse_from_rfc3339(&raw)
            .context("EMBER_CONVERSATION_CREATED_AT must be RFC 3339")?
            .with_timezone(&Utc),
        Err(_) => Utc::now(),
    };
    let ttl_hours: i64 = std::env::var("EMBER_CONVERSATION_TTL_HOURS")
        .unwrap_or_else(|_| "24".into())
        .parse()?;

    Ok(Conversation {
        id,
        kind,
        owner_id: required("EMBER_OWNER_ID")?,
        owner_handle: required("EMBER_OWNER_HANDLE")?,
        created_at,
        ttl: chrono::Duration::hours(ttl_hours),
    })
}

/// Returns `false` when the user asked to quit.
async fn run_command(engine: &App, session: &Session<HttpChatApi>, line: &str) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" => return Ok(false),
        "/older" => {
            if !session.request_older().await? {
                println!("-- no older messages");
            }
        }
        "/refresh" => {
            session.refresh().await?;
        }
        "/hide" | "/show" => {
            let id = parse_id(rest)?;
            session.set_hidden(id, command == "/hide").await?;
        }
        "/reply" => {
            let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
            session.send(MessageContent::Text(text.to_string()), Some(parse_id(id)?)).await?;
        }
        "/image" => {
            let (url, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            let content = MessageContent::Image(ImagePayload {
                url: url.to_string(),
                caption: caption.to_string(),
            });
            session.send(content, None).await?;
        }
        "/unlock" => {
            let id = parse_id(rest)?;
            let message = find(session, id)?;
            match engine.media_access(session.conversation(), &message)? {
                MediaAccess::Locked(key) => {
                    engine.unlock_media(&key)?;
                    render(engine, session);
                }
                _ => println!("-- nothing to unlock"),
            }
        }
        "/whois" => {
            let profile = engine.mention_profile(rest).await?;
            println!("-- {}: {}", rest, profile.photo_uri.as_deref().unwrap_or("no photo"));
            for (network, link) in &profile.socials {
                println!("   {}: {}", network, link);
            }
        }
        "/replies" => {
            for thread in session.owner_replies() {
                println!("{} ({} replies)", describe_root(&thread.root), thread.replies.len());
            }
        }
        _ if command.starts_with('/') => println!("-- unknown command {}", command),
        _ => {
            session.send(MessageContent::Text(line.to_string()), None).await?;
        }
    }
    Ok(true)
}

fn parse_id(raw: &str) -> anyhow::Result<i64> {
    raw.trim()
        .parse()
        .with_context(|| format!("'{}' is not a message id", raw))
}

fn find(session: &Session<HttpChatApi>, id: i64) -> anyhow::Result<Message> {
    let message = session.messages().into_iter().find(|m| m.id == Some(id));
    Ok(message.ok_or(SyncError::UnknownMessage(id))?)
}

fn render(engine: &App, session: &Session<HttpChatApi>) {
    let by_id: HashMap<i64, Message> = session
        .messages()
        .into_iter()
        .filter_map(|m| m.id.map(|id| (id, m)))
        .collect();
    let owner_handle = &session.conversation().owner_handle;

    println!();
    for thread in session.threads() {
        match &thread.root {
            ThreadRoot::Loaded(message) => println!(
                "[{}] {}: {}",
                message.key(),
                message.display_handle,
                body(engine, session, message)
            ),
            root => println!("{}", describe_root(root)),
        }

        for reply in &thread.replies {
            let author = match reply.author {
                ReplyAuthor::Owner => owner_handle.as_str(),
                ReplyAuthor::Participant => reply.sender_id.as_str(),
            };
            let text = match reply.id.and_then(|id| by_id.get(&id)) {
                Some(message) if message.content.as_image().is_some() => body(engine, session, message),
                _ => reply.content.preview(),
            };
            let hidden = if reply.hidden { " (hidden)" } else { "" };
            println!("    > {}: {}{}", author, text, hidden);
        }
    }
}

fn body(engine: &App, session: &Session<HttpChatApi>, message: &Message) -> String {
    let text = match engine.media_access(session.conversation(), message) {
        Ok(MediaAccess::Locked(_)) => "[locked image, /unlock to view]".to_string(),
        Ok(_) => message.content.preview(),
        Err(e) => {
            warn!("Media check for {} failed: {}", message.key(), e);
            "[image]".to_string()
        }
    };
    if message.hidden {
        format!("{} (hidden)", text)
    } else {
        text
    }
}

fn describe_root(root: &ThreadRoot) -> String {
    match root {
        ThreadRoot::Loaded(message) => format!("[{}] {}", message.key(), message.content.preview()),
        ThreadRoot::Unloaded { id } => format!("[{}] (earlier message, not loaded)", id),
    }
}
