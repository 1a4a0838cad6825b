use anyhow::{bail, Context, Result};
use clap::Parser;
use leasekeeper_lock::{
    election::{release, try_acquire_or_renew, Attempt, Observation},
    DistributedLock, LeaseRecord, LockOptions, RedisStore, ResourceLock,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    let election = cli.election_config().context("invalid election timing")?;
    let redis = cli.redis_config();
    let identity = cli.id.clone().unwrap_or_else(hostname_or_random);

    let store = RedisStore::connect(&redis)
        .await
        .with_context(|| format!("connecting to redis at {}", redis.redacted_address()))?;
    store.ping(PING_TIMEOUT).await.context("redis ping")?;
    info!("connected to redis: {}", redis.redacted_address());

    let lock = DistributedLock::new(
        Arc::new(store),
        cli.lock_key.clone(),
        identity,
        LockOptions::default(),
    )?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Status => {
            let observation = Observation::from_get(lock.get(&cancel).await)?;
            print_status(&lock, &observation);
        }
        Commands::Acquire => match try_acquire_or_renew(&lock, &election, &cancel).await? {
            Attempt::Acquired(record) => {
                info!("{} started leading on {}", lock.identity(), lock.describe());
                print_record(&record);
            }
            Attempt::Renewed(record) => {
                info!("{} renewed its lease on {}", lock.identity(), lock.describe());
                print_record(&record);
            }
            Attempt::HeldBy(holder) => {
                warn!("{} is held by {holder:?}", lock.describe());
                bail!("lease {} is held by {holder:?}", lock.describe());
            }
        },
        Commands::Release => {
            if release(&lock, &cancel).await? {
                println!("released {}", lock.describe());
            } else {
                println!("{} does not hold {}", lock.identity(), lock.describe());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_status(lock: &DistributedLock, observation: &Observation) {
    match observation {
        Observation::Absent => println!("{}: absent", lock.describe()),
        Observation::Present(record) if record.is_vacant() => {
            println!("{}: vacant", lock.describe());
            print_record(record);
        }
        Observation::Present(record) => {
            println!("{}: held by {}", lock.describe(), record.holder_identity);
            print_record(record);
        }
    }
}

fn print_record(record: &LeaseRecord) {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    };
    println!("  holder:      {}", record.holder_identity);
    println!("  lease:       {}s", record.lease_duration_seconds);
    println!("  acquired:    {}", fmt_time(record.acquire_time));
    println!("  renewed:     {}", fmt_time(record.renew_time));
    println!("  expires:     {}", fmt_time(record.expires_at()));
    println!("  transitions: {}", record.leader_transitions);
}

fn hostname_or_random() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("inst-{}", uuid::Uuid::new_v4()))
}
