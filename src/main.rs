use chatflow::calls::media::UnsupportedMediaProvider;
use chatflow::client::Client;
use chatflow::config::ClientConfig;
use chatflow::rest::RestClient;
use chatflow::transport::WebSocketTransportFactory;
use chatflow::types::events::Event;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

// Minimal line-based chat client against a running server.
//
// Usage:
//   chatflow --url wss://chat.example.com/ws --email me@example.com --password secret
//
// Commands once connected:
//   /open <conversation-id>    select a conversation and load its history
//   /older                     page older messages into the cache
//   /create <user-id>          start a conversation with a user
//   /decline                   decline a ringing call
//   anything else              send as a text message to the open conversation

#[derive(Parser)]
#[command(name = "chatflow", about = "Line-based ChatFlow client")]
struct Args {
    /// WebSocket URL of the chat server.
    #[arg(long)]
    url: String,

    /// Base URL of the companion REST API (defaults to the ws host).
    #[arg(long)]
    api_url: Option<String>,

    /// Account email for login.
    #[arg(long)]
    email: String,

    /// Account password.
    #[arg(long)]
    password: String,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async move {
        let api_url = args
            .api_url
            .clone()
            .unwrap_or_else(|| http_base_of(&args.url));

        let login = {
            let rest = RestClient::new(api_url);
            let (email, password) = (args.email.clone(), args.password.clone());
            match tokio::task::spawn_blocking(move || rest.login(&email, &password)).await {
                Ok(Ok(login)) => login,
                Ok(Err(e)) => {
                    error!("Login failed: {e}");
                    return;
                }
                Err(e) => {
                    error!("Login task failed: {e}");
                    return;
                }
            }
        };
        info!(
            "Logged in as {} ({})",
            login.user.username.as_deref().unwrap_or("?"),
            login.user.id
        );

        let config = ClientConfig::new(login.token.clone(), login.user.clone());
        let transport_factory = Arc::new(WebSocketTransportFactory::new(
            args.url.as_str(),
            Some(login.token),
        ));
        let client = Client::new(config, transport_factory, Arc::new(UnsupportedMediaProvider));

        install_event_printer(&client);

        let run_client = client.clone();
        let run_task = tokio::spawn(async move { run_client.run().await });

        input_loop(&client).await;

        client.disconnect().await;
        let _ = run_task.await;
    });
}

fn install_event_printer(client: &Arc<Client>) {
    let bus_client = client.clone();
    client.event_bus().add_fn(move |event| match event {
        Event::Connected(_) => {
            // The session does not refresh the list implicitly; that is on
            // us, on every connect.
            let client = bus_client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.conversations().refresh().await {
                    warn!("Failed to refresh conversations: {e}");
                }
            });
        }
        Event::Disconnected(_) => info!("[session] disconnected"),
        Event::ConversationsUpdated { conversations } => {
            for conversation in conversations {
                let name = bus_client.registry().display_name(conversation);
                let id = conversation.id.as_deref().unwrap_or("-");
                let preview = conversation.last_message.as_deref().unwrap_or("No messages");
                info!("[conv] {id}: {name} | {preview}");
            }
        }
        Event::MessageReceived(message) => {
            let sender = message.sender_name.as_deref().unwrap_or("Someone");
            info!(
                "[{}] {}: {}",
                message.conversation_id, sender, message.content
            );
        }
        Event::UnreadChanged {
            conversation_id,
            count,
        } => info!("[unread] {conversation_id}: {count}"),
        Event::RemoteTypingChanged {
            conversation_id,
            typist,
        } => match typist {
            Some(name) => info!("[{conversation_id}] {name} is typing..."),
            None => info!("[{conversation_id}] typing stopped"),
        },
        Event::IncomingCall {
            conversation_id,
            caller_name,
            ..
        } => info!(
            "[call] {} is calling in {}: /decline to reject (no media stack in this build)",
            caller_name.as_deref().unwrap_or("Someone"),
            conversation_id
        ),
        Event::CallPhaseChanged {
            conversation_id,
            phase,
        } => info!("[call] {conversation_id}: {phase:?}"),
        Event::CallEnded {
            conversation_id,
            reason,
        } => info!("[call] {conversation_id} ended: {reason:?}"),
    });
}

async fn input_loop(client: &Arc<Client>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open_conversation: Option<String> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(id) = line.strip_prefix("/open ") {
            let id = id.trim();
            client.conversations().select(id);
            match client.messages().open(id).await {
                Ok(count) => {
                    info!("Opened {id} with {count} message(s)");
                    open_conversation = Some(id.to_string());
                }
                Err(e) => warn!("Failed to open {id}: {e}"),
            }
        } else if line == "/older" {
            let Some(id) = open_conversation.as_deref() else {
                warn!("No conversation open");
                continue;
            };
            match client.messages().fetch_older(id).await {
                Ok(Some(outcome)) => info!(
                    "Loaded {} older message(s), more: {}",
                    outcome.prepended, outcome.has_older
                ),
                Ok(None) => info!("Nothing to load"),
                Err(e) => warn!("Backward fetch failed: {e}"),
            }
        } else if let Some(user_id) = line.strip_prefix("/create ") {
            match client.conversations().create(user_id.trim()).await {
                Ok(id) => info!("Conversation ready: {id}"),
                Err(e) => warn!("Failed to create conversation: {e}"),
            }
        } else if line == "/decline" {
            if let Err(e) = client.calls().decline().await {
                warn!("Decline failed: {e}");
            }
        } else {
            let Some(id) = open_conversation.as_deref() else {
                warn!("No conversation open; use /open <id> first");
                continue;
            };
            if let Err(e) = client.chatstate().notify_input(id).await {
                warn!("Typing notification failed: {e}");
            }
            if let Err(e) = client.messages().send_text(id, line).await {
                warn!("Send failed: {e}");
            }
        }
    }
}

/// Derive the REST base URL from the WebSocket URL when none is given.
fn http_base_of(ws_url: &str) -> String {
    let base = ws_url
        .replacen("wss://", "https://", 1)
        .replacen("ws://", "http://", 1);
    base.trim_end_matches("/ws").to_string()
}
