//! # Terminal Adapter
//!
//! Line-oriented front end: prints the conversation to stdout and reads
//! commands from stdin. This is the only module that touches the terminal.
//!
//! ```text
//! hello doctor        → send a text message
//! /image ./rash.png   → upload the file and send it
//! /peer d2            → switch conversation
//! /quit               → tear down and exit
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backend::api::{Attachment, ChatApi, IdentityProvider, StaticIdentity};
use crate::backend::rest::RestApi;
use crate::backend::socket::WebSocketTransport;
use crate::client::connection::{ConnectionManager, ConnectionStatus};
use crate::client::view::{ChatView, ViewEvent};
use crate::core::config::ResolvedConfig;
use crate::core::conversation::ParticipantId;
use crate::core::message::{Message, MessageId};

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Image { path: String, caption: Option<String> },
    SwitchPeer(ParticipantId),
    Quit,
    Help,
    Ignore,
}

pub fn parse_line(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Ignore;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    match name {
        "quit" | "q" => Command::Quit,
        "peer" if !args.is_empty() => Command::SwitchPeer(args.into()),
        "image" if !args.is_empty() => {
            let (path, caption) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
            let caption = caption.trim();
            Command::Image {
                path: path.to_string(),
                caption: (!caption.is_empty()).then(|| caption.to_string()),
            }
        }
        _ => Command::Help,
    }
}

/// MIME type from the file extension; uploads accept images only.
fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

async fn read_attachment(path: &str) -> Result<Attachment, String> {
    let path = Path::new(path);
    let mime = image_mime(path).ok_or_else(|| "Only png, jpeg, gif and webp images can be sent".to_string())?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Could not read {}: {e}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    Ok(Attachment {
        file_name,
        mime: mime.to_string(),
        bytes,
    })
}

fn format_message(message: &Message, local_id: &ParticipantId) -> String {
    let who = if &message.sender_id == local_id {
        "you".to_string()
    } else {
        message.sender_id.to_string()
    };
    let time = message.created_at.format("%H:%M");
    match (&message.text, &message.image_ref) {
        (Some(text), Some(image)) => format!("[{time}] {who}: {text} [image: {image}]"),
        (Some(text), None) => format!("[{time}] {who}: {text}"),
        (None, Some(image)) => format!("[{time}] {who}: [image: {image}]"),
        (None, None) => format!("[{time}] {who}:"),
    }
}

/// Prints messages not shown yet, plus typing and notice changes.
struct Printer {
    shown: HashSet<MessageId>,
    peer_typing: bool,
}

impl Printer {
    fn new() -> Self {
        Self {
            shown: HashSet::new(),
            peer_typing: false,
        }
    }

    fn reset(&mut self) {
        self.shown.clear();
        self.peer_typing = false;
    }

    fn render(&mut self, view: &ChatView, events: &[ViewEvent]) {
        let state = view.state();
        let mut out = std::io::stdout().lock();

        for message in state.stream.messages() {
            if self.shown.insert(message.id.clone()) {
                let _ = writeln!(out, "{}", format_message(message, &state.local_id));
            }
        }

        let peer_typing = state.typing.is_peer_typing();
        if peer_typing != self.peer_typing {
            self.peer_typing = peer_typing;
            if let Some(peer) = state.peer() {
                if peer_typing {
                    let _ = writeln!(out, "  {peer} is typing…");
                } else {
                    let _ = writeln!(out, "  {peer} stopped typing");
                }
            }
        }

        for event in events {
            if let ViewEvent::Notice(notice) = event {
                let _ = writeln!(out, "! {notice}");
            }
        }
        let _ = out.flush();
    }
}

fn build_api(config: &ResolvedConfig, identity: &dyn IdentityProvider) -> Arc<dyn ChatApi> {
    Arc::new(RestApi::new(config.api_url.clone(), identity.auth_token()))
}

pub async fn run(config: ResolvedConfig, peer: ParticipantId) -> std::io::Result<()> {
    let identity = StaticIdentity {
        user_id: config.user_id.clone().map(ParticipantId::from),
        token: config.token.clone(),
    };
    let Some(local_id) = identity.local_id() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "No user id: pass --user, set CONSULT_USER_ID, or set general.user_id in ~/.consult/config.toml",
        ));
    };

    let transport = Arc::new(WebSocketTransport::new(config.socket_url.clone()));
    let connection = ConnectionManager::spawn(transport, config.reconnect);
    let api = build_api(&config, &identity);

    let mut view = ChatView::new(local_id.clone(), config.chat, connection.clone(), api);
    let mut printer = Printer::new();
    let mut status = connection.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("{} opening conversation with {}", local_id, peer);
    println!("Chatting as {local_id} with {peer}. /quit to exit.");
    let events = view.open(peer);
    printer.render(&view, &events);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let events = match parse_line(&line) {
                    Command::Ignore => continue,
                    Command::Quit => break,
                    Command::Help => {
                        println!("Commands: /image <path> [caption], /peer <id>, /quit");
                        continue;
                    }
                    Command::Send(text) => view.send_text(&text),
                    Command::Image { path, caption } => match read_attachment(&path).await {
                        Ok(attachment) => view.attach(attachment, caption).await,
                        Err(reason) => {
                            warn!("{}", reason);
                            vec![ViewEvent::Notice(reason)]
                        }
                    },
                    Command::SwitchPeer(next) => {
                        printer.reset();
                        println!("--- {next} ---");
                        view.open(next)
                    }
                };
                printer.render(&view, &events);
            }
            events = view.next() => {
                printer.render(&view, &events);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().status;
                match current {
                    ConnectionStatus::Connected => println!("(connected)"),
                    ConnectionStatus::Connecting => println!("(reconnecting…)"),
                    ConnectionStatus::Disconnected => println!("(disconnected)"),
                }
            }
        }
    }

    view.close();
    connection.teardown();
    info!("Session closed");
    Ok(())
}
