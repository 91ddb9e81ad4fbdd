//! Kinship interactive client.
//!
//! Runs a client and a scripted counterpart against an in-process loopback
//! server, so every client behavior (optimistic sends, receipts, typing,
//! presence, reconnects, history paging) can be exercised from a terminal.
//!
//! # Usage
//!
//! ```bash
//! kinship --user alice --counterpart bob --seed-history 45
//! RUST_LOG=kinship_core=debug kinship
//! ```

mod command;
mod render;

use std::{io::Write, time::Duration};

use clap::Parser;
use command::{Command, HELP};
use kinship_client::{Client, ClientConfig, ClientUpdate, SystemEnv};
use kinship_core::{BackoffPolicy, ConnectionState, Visibility};
use kinship_harness::{LoopbackServer, SimHistory, SimTransport};
use render::Renderer;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type LocalClient = Client<SimTransport, SimHistory, SystemEnv>;

/// Kinship interactive client
#[derive(Parser, Debug)]
#[command(name = "kinship")]
#[command(about = "Realtime conversation client against a loopback server")]
#[command(version)]
struct Args {
    /// Local user id
    #[arg(short, long, default_value = "alice")]
    user: String,

    /// Counterpart user id
    #[arg(long, default_value = "bob")]
    counterpart: String,

    /// Conversation id
    #[arg(short, long, default_value = "c1")]
    conversation: String,

    /// Messages from the counterpart stored before the session starts
    #[arg(long, default_value = "45")]
    seed_history: usize,

    /// History page size
    #[arg(long, default_value = "30")]
    page_size: usize,

    /// Ceiling of the first reconnect delay in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_base_ms: u64,

    /// Ceiling of every reconnect delay in milliseconds
    #[arg(long, default_value = "30000")]
    backoff_max_ms: u64,

    /// Simulated history fetch latency in milliseconds
    #[arg(long, default_value = "150")]
    history_latency_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn client_config(&self, user_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new(user_id);
        config.conversation.page_size = self.page_size;
        config.session.backoff = BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            ..BackoffPolicy::default()
        };
        config
    }
}

struct App {
    server: LoopbackServer,
    client: LocalClient,
    peer: LocalClient,
    user: String,
    counterpart: String,
    conversation: String,
    foreground: bool,
}

impl App {
    fn start(args: &Args) -> Self {
        let server = LoopbackServer::new();
        for i in 1..=args.seed_history {
            server.seed_message(&args.conversation, &args.counterpart, &format!("earlier message {i}"));
        }
        let history = server.history().with_latency(Duration::from_millis(args.history_latency_ms));

        let mut client = Client::new(
            server.transport(args.user.as_str()),
            history.clone(),
            SystemEnv,
            args.client_config(&args.user),
        );
        client.open_conversation(args.conversation.as_str(), args.counterpart.as_str());
        client.connect();

        let mut peer = Client::new(
            server.transport(args.counterpart.as_str()),
            history,
            SystemEnv,
            args.client_config(&args.counterpart),
        );
        peer.open_conversation(args.conversation.as_str(), args.user.as_str());
        peer.connect();

        Self {
            server,
            client,
            peer,
            user: args.user.clone(),
            counterpart: args.counterpart.clone(),
            conversation: args.conversation.clone(),
            foreground: true,
        }
    }

    fn execute(&mut self, command: Command, out: &mut impl Write) -> std::io::Result<()> {
        let visible = Visibility { focused: true, foregrounded: true };
        let result = match command {
            Command::Send(text) => self.client.send_message(&self.conversation, &text).map(drop),
            Command::More => self.client.load_more(&self.conversation),
            Command::Read => self.client.mark_as_read(&self.conversation, Visibility {
                focused: true,
                foregrounded: self.foreground,
            }),
            Command::Typing(active) => {
                self.client.send_typing_indicator(&self.conversation, active)
            },
            Command::Drop => {
                let dropped = self.server.drop_user(&self.user);
                writeln!(out, "-- server dropped {dropped} connection(s)")?;
                Ok(())
            },
            Command::Reconnect => {
                self.client.retry_now();
                Ok(())
            },
            Command::Foreground(active) => {
                self.foreground = active;
                self.client.set_foreground(active);
                Ok(())
            },
            Command::Retry(temp_id) => {
                self.client.retry_message(&self.conversation, &temp_id).map(drop)
            },
            Command::Say(text) => self.peer.send_message(&self.conversation, &text).map(drop),
            Command::PeerRead => self.peer.mark_as_read(&self.conversation, visible),
            Command::PeerTyping => self.peer.send_typing_indicator(&self.conversation, true),
            Command::Status => return self.status(out),
            Command::Help => return writeln!(out, "{HELP}"),
            Command::Quit => Ok(()),
        };

        if let Err(error) = result {
            writeln!(out, "error: {error}")?;
        }
        Ok(())
    }

    fn status(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "-- connection: {:?}", self.client.connection_state())?;
        writeln!(
            out,
            "-- {} online: {}, typing: {}",
            self.counterpart,
            self.client.is_other_user_online(&self.conversation),
            self.client.is_other_user_typing(&self.conversation),
        )?;
        if let Some(conversation) = self.client.conversation(&self.conversation) {
            writeln!(
                out,
                "-- {} loaded, {} unread, more history: {}",
                conversation.window().len(),
                conversation.unread_count(),
                conversation.has_more_messages(),
            )?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!(user = %args.user, conversation = %args.conversation, "kinship starting");

    let mut app = App::start(&args);
    let mut states = app.client.on_connection_state();
    let mut updates = app.client.updates();
    let mut renderer = Renderer::default();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut out = std::io::stdout();

    writeln!(out, "{HELP}")?;
    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => app.execute(command, &mut out)?,
                    Ok(None) => {},
                    Err(error) => writeln!(out, "{error}")?,
                }
            },
            () = app.client.pump() => {},
            () = app.peer.pump() => {},
        }

        for state in states.drain() {
            match state {
                ConnectionState::Failed => writeln!(out, "-- connection failed, /reconnect to retry")?,
                state => writeln!(out, "-- {state:?}")?,
            }
        }
        for update in updates.drain() {
            match update {
                ClientUpdate::TypingChanged { typing: true, .. } => {
                    writeln!(out, "-- {} is typing", app.counterpart)?;
                },
                ClientUpdate::TypingChanged { typing: false, .. } => {
                    writeln!(out, "-- {} stopped typing", app.counterpart)?;
                },
                ClientUpdate::Notification(payload) => writeln!(out, "-- notification: {payload:?}")?,
                ClientUpdate::WindowChanged(_) => {},
            }
        }
        if let Some(conversation) = app.client.conversation(&app.conversation) {
            for line in renderer.changes(&app.user, &app.counterpart, conversation.window()) {
                writeln!(out, "{line}")?;
            }
        }
    }

    app.client.disconnect();
    app.peer.disconnect();
    tracing::info!("kinship stopped");
    Ok(())
}
