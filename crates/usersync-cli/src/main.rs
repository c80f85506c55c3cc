//! usersync command-line tool.
//!
//! Inspects and edits the on-disk user cache, and runs a sync session
//! against an in-memory backend to watch the coordinator work.
//!
//! Usage:
//!   usersync show u1
//!   usersync set u1 displayName Amy
//!   usersync pending u1
//!   usersync simulate u1 --claim WELCOME
//!   usersync simulate u1 --unauthorized
//!   usersync reset u1

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use usersync_client::{
    ActionOutcome, ClientConfig, FileStore, MemoryRemote, RemoteError, RemoteOp, UserCache,
    UserSession, merge,
};
use usersync_types::{UserAction, UserField, UserId};

/// Points granted by a code registered with `simulate --claim`.
const SIMULATED_CODE_POINTS: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "usersync")]
#[command(about = "Inspect and exercise the usersync client cache")]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/usersync/client.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cached user snapshot
    Show { user: String },
    /// Print the pending mutation
    Pending { user: String },
    /// Queue a field change in the pending mutation
    Set {
        user: String,
        /// Field name, e.g. isPremium, displayName, locale
        field: String,
        /// New value; "null" or "" clears optional fields
        value: String,
    },
    /// Drop the cached user and pending mutation
    Reset { user: String },
    /// Run one sync session against an in-memory backend
    Simulate {
        user: String,
        /// Force a fetch even if the cache is warm
        #[arg(long)]
        force: bool,
        /// Reject the first remote call as unauthorized
        #[arg(long)]
        unauthorized: bool,
        /// Claim this code after syncing
        #[arg(long)]
        claim: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::load_default(),
    }
    .context("loading config")?;
    if let Some(dir) = args.cache_dir.clone() {
        config.cache_dir = Some(dir);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cache_dir = config.resolved_cache_dir();
    tracing::debug!(cache_dir = %cache_dir.display(), "Opening cache");
    let store = Arc::new(
        FileStore::open(&cache_dir)
            .with_context(|| format!("opening cache at {}", cache_dir.display()))?,
    );

    match args.command {
        Command::Show { user } => {
            let cache = UserCache::new(UserId::new(user), store);
            match cache.user() {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => println!("no cached user for {}", cache.id()),
            }
        }
        Command::Pending { user } => {
            let cache = UserCache::new(UserId::new(user), store);
            match cache.pending() {
                Some(patch) => println!("{}", serde_json::to_string_pretty(&patch)?),
                None => println!("nothing pending for {}", cache.id()),
            }
        }
        Command::Set { user, field, value } => {
            let field = UserField::parse(&field, &value)?;
            let id = UserId::new(user);
            let cache = UserCache::new(id.clone(), store);
            let patch = cache.update_pending(|existing| merge(existing, &id, field));
            println!("{}", serde_json::to_string_pretty(&patch)?);
        }
        Command::Reset { user } => {
            let cache = UserCache::new(UserId::new(user), store);
            cache.reset();
            println!("cleared {}", cache.id());
        }
        Command::Simulate {
            user,
            force,
            unauthorized,
            claim,
        } => {
            let id = UserId::new(user);
            let remote = Arc::new(MemoryRemote::new());
            // Start the backend from whatever this machine last saw.
            if let Some(cached) = UserCache::new(id.clone(), store.clone()).user() {
                remote.insert_user(cached);
            }
            if unauthorized {
                for op in [RemoteOp::Fetch, RemoteOp::Create, RemoteOp::Update] {
                    remote.fail_next(op, RemoteError::Unauthorized);
                }
            }
            if let Some(code) = &claim {
                remote.add_code(code.clone(), SIMULATED_CODE_POINTS);
            }
            simulate(&config, id, store, remote, force, claim).await?;
        }
    }

    Ok(())
}

async fn simulate(
    config: &ClientConfig,
    id: UserId,
    store: Arc<FileStore>,
    remote: Arc<MemoryRemote>,
    force: bool,
    claim: Option<String>,
) -> Result<()> {
    let session = UserSession::builder(id, store, remote.clone())
        .config(config)
        .spawn();
    let mut events = session.subscribe();

    tracing::info!(user = %session.id(), force, "Starting simulated sync");
    session.sync.refresh(force);
    session.sync.settled().await;

    if let Some(code) = claim {
        match session.actions.perform(UserAction::ClaimCode { code }).await {
            Ok(ActionOutcome::Completed(receipt)) => {
                println!("action: {}", receipt.message.as_deref().unwrap_or("done"));
            }
            Ok(ActionOutcome::Skipped { reason }) => println!("action skipped: {reason:?}"),
            Err(e) => println!("action failed: {e}"),
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => println!("event: {event:?}"),
            Err(TryRecvError::Lagged(n)) => println!("event: ({n} dropped)"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    for op in [RemoteOp::Fetch, RemoteOp::Create, RemoteOp::Update, RemoteOp::Action] {
        println!("calls: {op} = {}", remote.calls(op));
    }
    match session.sync.cached_user() {
        Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
        None if session.sync.is_locked_out() => println!("locked out; cache cleared"),
        None => println!("no cached user"),
    }
    Ok(())
}
