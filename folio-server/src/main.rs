//! Folio collaboration server binary.
//!
//! Usage:
//!   # In-memory history (ephemeral)
//!   cargo run -p folio-server
//!
//!   # Durable history in RocksDB
//!   cargo run -p folio-server -- --data-dir ./folio_data --bind 0.0.0.0:9090
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=folio_collab=debug`).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use folio_collab::presence::PresenceConfig;
use folio_collab::server::{CollabServer, ServerConfig};
use folio_collab::session::{ConflictResolution, SessionConfig, SessionSettings};

/// WebSocket server for collaborative report editing.
#[derive(Parser, Debug)]
#[command(name = "folio-server")]
#[command(about = "Collaborative editing and version history server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// RocksDB directory for version history; in-memory when omitted
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Quiet period before session edits are autosaved, in milliseconds
    #[arg(long, default_value_t = 2000)]
    autosave_ms: u64,

    /// Default participant limit for new sessions
    #[arg(long, default_value_t = 10)]
    max_participants: usize,

    /// Let users without an email join sessions by default
    #[arg(long)]
    allow_anonymous: bool,

    /// Reject edits made against a stale revision instead of transforming them
    #[arg(long)]
    manual_conflicts: bool,

    /// Seconds of inactivity before a user's presence is dropped
    #[arg(long, default_value_t = 300)]
    presence_ttl_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let conflict_resolution = if self.manual_conflicts {
            ConflictResolution::Manual
        } else {
            ConflictResolution::OperationalTransform
        };
        ServerConfig {
            bind_addr: self.bind,
            storage_path: self.data_dir,
            session: SessionConfig {
                autosave_debounce: Duration::from_millis(self.autosave_ms),
                default_settings: SessionSettings {
                    allow_anonymous: self.allow_anonymous,
                    max_participants: self.max_participants,
                    conflict_resolution,
                    ..SessionSettings::default()
                },
                ..SessionConfig::default()
            },
            presence: PresenceConfig {
                stale_after: Duration::from_secs(self.presence_ttl_secs),
                ..PresenceConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config();
    match &config.storage_path {
        Some(path) => log::info!("Version history in {}", path.display()),
        None => log::info!("Version history in memory"),
    }

    let server = CollabServer::new(config)?;

    let presence = std::sync::Arc::clone(server.manager().presence());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let purged = presence.purge_stale();
            if purged > 0 {
                log::debug!("Purged {purged} stale presence entries");
            }
        }
    });

    server.run().await
}
