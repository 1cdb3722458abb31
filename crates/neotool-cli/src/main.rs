//! Neotool session runner.
//!
//! Runs the connection manager and the event handler against an in-process
//! simulated backend and logs everything published on the bus until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Follow two livers anonymously
//! neotool --liver 1000 --liver 2000
//!
//! # Log in and forward a message to ourselves once connected
//! neotool --liver 1000 --account me --password secret --echo
//! ```

use std::time::Duration;

use clap::Parser;
use neotool_core::{
    UserId,
    types::{Comment, Danmaku, DanmakuUser, DanmuInfo, LoginData},
};
use neotool_event::{Bus, Event, EventHandler, EventKind, Request};
use neotool_harness::SimTransport;
use neotool_session::{
    ConnectionManager, DEFAULT_RETRY_INTERVAL, Envelope, SessionConfig, SystemEnv, TransportEvent,
};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How often the simulated audience comments on each attached stream.
const CHATTER_INTERVAL: Duration = Duration::from_secs(3);

/// How often the session flags are re-requested over the bus.
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(30);

const LOGGED_KINDS: [EventKind; 11] = [
    EventKind::Error,
    EventKind::ConnectBackend,
    EventKind::DisconnectBackend,
    EventKind::BackendState,
    EventKind::LiverUid,
    EventKind::UserInfo,
    EventKind::GetDanmaku,
    EventKind::StopDanmaku,
    EventKind::Danmaku,
    EventKind::Gift,
    EventKind::ReceiveMessage,
];

/// Neotool backend session runner
#[derive(Parser, Debug)]
#[command(name = "neotool")]
#[command(about = "Run a neotool backend session against a simulated backend")]
#[command(version)]
struct Args {
    /// Forwarding id registered with the backend
    #[arg(long, default_value = "neotool-cli")]
    client_id: String,

    /// Liver whose danmaku to follow (repeatable)
    #[arg(short, long = "liver")]
    livers: Vec<UserId>,

    /// Seconds between retries of failed backend requests
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_secs())]
    retry_interval_secs: u64,

    /// Account to log in with (anonymous when absent)
    #[arg(long)]
    account: Option<String>,

    /// Password for `--account`
    #[arg(long, requires = "account")]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Forward a message to our own client id once connected
    #[arg(long)]
    echo: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.client_id.clone())
            .with_retry_interval(Duration::from_secs(self.retry_interval_secs));
        if let Some(&liver) = self.livers.first() {
            config = config.with_liver_uid(liver);
        }
        if let Some(account) = &self.account {
            let password = self.password.clone().unwrap_or_default();
            config = config.with_login_data(LoginData::new(account.clone(), password));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(client_id = %args.client_id, livers = ?args.livers, "neotool starting");

    let sim = SimTransport::live_backend();
    let manager = ConnectionManager::new(sim.clone(), SystemEnv::new(), args.session_config());
    let bus = Bus::default();
    let handler = EventHandler::new(manager.clone(), bus.clone(), Vec::new(), Vec::new());
    handler.init();

    let loggers: Vec<_> =
        LOGGED_KINDS.into_iter().map(|kind| tokio::spawn(log_events(bus.clone(), kind))).collect();

    let session = manager.connect();

    for &liver in &args.livers {
        bus.request(Request::GetDanmaku(liver));
    }
    let state_poll = bus.request_repeatedly(Request::BackendState, STATE_POLL_INTERVAL);
    let chatter = tokio::spawn(chatter(sim, manager.clone(), args.livers.clone()));

    if args.echo {
        let message = Envelope::new("neotool-cli", "echo", json!({ "text": "hello from neotool" }));
        bus.request(Request::SendMessage { client_id: args.client_id.clone(), message });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    chatter.abort();
    state_poll.cancel();
    session.close();
    handler.cleanup();
    for logger in loggers {
        logger.abort();
    }

    Ok(())
}

/// Log every event of `kind` with its JSON payload.
async fn log_events(bus: Bus, kind: EventKind) {
    let mut listener = bus.listen(kind);
    while let Some(event) = listener.recv().await {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| e.to_string());
        match event {
            Event::Error(_) => tracing::warn!(event = %kind, %payload, "bus"),
            _ => tracing::info!(event = %kind, %payload, "bus"),
        }
    }
}

/// Push a comment to every attached stream now and then.
async fn chatter(
    sim: SimTransport,
    manager: ConnectionManager<SimTransport, SystemEnv>,
    livers: Vec<UserId>,
) {
    let mut ticker = tokio::time::interval(CHATTER_INTERVAL);
    let mut sequence = 0_u64;
    loop {
        ticker.tick().await;
        for &liver in &livers {
            if !manager.is_getting_danmaku(liver) {
                continue;
            }
            sequence += 1;
            sim.emit(TransportEvent::Comment(Danmaku {
                liver_uid: liver,
                data: Comment {
                    danmu_info: DanmuInfo {
                        send_time: 0,
                        user_info: DanmakuUser { user_id: 42, nickname: "viewer".to_string() },
                    },
                    content: format!("comment #{sequence} for liver {liver}"),
                },
            }));
        }
    }
}
