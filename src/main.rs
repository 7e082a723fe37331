use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use brook::config::Config;
use brook::feed::{RefreshSummary, Refresher};
use brook::sanitizer::{Sanitizer, SanitizerPolicy};
use brook::scheduler::{Scheduler, ThreadRandom};
use brook::script::LuaSandbox;
use brook::storage::{Database, DatabaseError, NewFeed};
use brook::util::validate_url;

#[derive(Parser, Debug)]
#[command(name = "brook", about = "Feed polling daemon with adaptive scheduling")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "brook.toml")]
    config: PathBuf,

    /// Database file (overrides config and DATABASE_URL)
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    /// Run a single refresh cycle and exit
    #[arg(long)]
    once: bool,

    /// Refresh every enabled feed of this user once and exit
    #[arg(long, value_name = "ID")]
    user: Option<i64>,

    /// Subscribe to a feed URL and exit
    #[arg(long, value_name = "URL")]
    subscribe: Option<String>,

    /// Owner of the feed added with --subscribe
    #[arg(long, value_name = "ID", default_value_t = 1, requires = "subscribe")]
    owner: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.apply_env_overrides()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate()?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    if let Some(url) = &args.subscribe {
        let url = validate_url(url).with_context(|| format!("Refusing to subscribe to {}", url))?;
        let feed_id = db
            .insert_feed(&NewFeed {
                user_id: args.owner,
                title: url.host_str().unwrap_or("feed").to_string(),
                feed_url: url.to_string(),
                ..Default::default()
            })
            .await?;
        tracing::info!(feed_id, owner = args.owner, url = %url, "Subscribed");
        println!("{}", feed_id);
        return Ok(());
    }

    let mut policy = SanitizerPolicy::new();
    if let Some(host) = &config.invidious_instance {
        policy = policy.with_alternate_frontend_host(host);
    }
    let refresher = Refresher::new(
        db.clone(),
        Sanitizer::new(policy),
        Arc::new(LuaSandbox::new(config.script.clone())),
        config.refresh_settings(),
    );
    let scheduler = Scheduler::new(db, config.probability.clone());

    if let Some(user_id) = args.user {
        let jobs = scheduler.select_user_batch(user_id, config.batch_size).await?;
        let results = refresher.refresh_batch(jobs, config.worker_pool_size).await;
        log_summary(&RefreshSummary::from_results(&results));
        return Ok(());
    }

    if args.once {
        run_cycle(&scheduler, &refresher, &config).await?;
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        scheduler = ?config.polling_scheduler,
        batch_size = config.batch_size,
        workers = config.worker_pool_size,
        "Polling started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A failed selection only skips this cycle.
                if let Err(e) = run_cycle(&scheduler, &refresher, &config).await {
                    tracing::error!(error = %e, "Refresh cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn run_cycle(scheduler: &Scheduler, refresher: &Refresher, config: &Config) -> Result<()> {
    let jobs = scheduler
        .select_batch(
            config.polling_scheduler,
            config.batch_size,
            config.polling_parsing_error_limit,
            &mut ThreadRandom,
        )
        .await?;
    if jobs.is_empty() {
        tracing::debug!("No feeds due");
        return Ok(());
    }

    let results = refresher.refresh_batch(jobs, config.worker_pool_size).await;
    log_summary(&RefreshSummary::from_results(&results));
    Ok(())
}

fn log_summary(summary: &RefreshSummary) {
    tracing::info!(
        refreshed = summary.refreshed,
        failed = summary.failed,
        new_entries = summary.new_entries,
        "Refresh cycle finished"
    );
}
