use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use channelpulse_common::Config;
use channelpulse_store::PgStore;
use channelpulse_sync::enrich::EnrichDispatcher;
use channelpulse_sync::jobs::{self, InlineQueue, Job, JobWorker};
use channelpulse_sync::{ItemMode, RefreshSpec, ReplyAnalyzer, ReplyMode, SyncEngine};
use feed_client::FeedClient;
use llm_client::LlmClient;

#[derive(Parser)]
#[command(name = "channelpulse", about = "Incremental channel sync and enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background worker: periodic refreshes plus analysis jobs.
    Worker,
    /// Run one refresh over all active sources, analyses included.
    Refresh {
        /// Backfill items from the last N days instead of a cursor walk.
        #[arg(long, conflicts_with_all = ["since", "stats_only"])]
        last_days: Option<u32>,
        /// Backfill items since this date (YYYY-MM-DD) instead of a cursor walk.
        #[arg(long, conflicts_with = "stats_only")]
        since: Option<String>,
        /// Refresh engagement counters on stored items only.
        #[arg(long)]
        stats_only: bool,
        /// Which items get their reply threads collected.
        #[arg(long, value_enum, default_value_t = ReplyArg::New)]
        replies: ReplyArg,
        /// Limit the refresh to these source ids (repeatable).
        #[arg(long = "source")]
        sources: Vec<i64>,
        /// In backfill modes, overwrite counters on items already stored.
        #[arg(long)]
        update_existing: bool,
        /// Skip the analysis fan-out after the sync commits.
        #[arg(long)]
        no_enrich: bool,
    },
    /// Analyze the backlog of unanalyzed replies, oldest first.
    Backlog {
        #[arg(long, default_value_t = 500)]
        limit: i64,
        /// Only replies ingested more than this many hours ago.
        #[arg(long)]
        older_than_hours: Option<i64>,
        /// Scope the scan to one source id.
        #[arg(long)]
        source: Option<i64>,
    },
    /// Resolve a channel identifier and register it as a source.
    AddSource { identifier: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReplyArg {
    /// Only items inserted by this run.
    New,
    /// Every stored item, new and old.
    All,
    /// No reply collection.
    Skip,
}

impl From<ReplyArg> for ReplyMode {
    fn from(arg: ReplyArg) -> Self {
        match arg {
            ReplyArg::New => ReplyMode::NewItemsOnly,
            ReplyArg::All => ReplyMode::AddNewToExisting,
            ReplyArg::Skip => ReplyMode::Skip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("channelpulse=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    let feed = Arc::new(FeedClient::new(
        config.feed_base_url.clone(),
        config.feed_api_token.clone(),
    ));
    let completer =
        Arc::new(LlmClient::new(&config.llm_api_key).with_base_url(&config.llm_api_url));
    let analyzer = Arc::new(ReplyAnalyzer::new(
        Arc::new(store.clone()),
        completer,
        config.llm_model.clone(),
        config.max_prompt_len,
    ));

    // Ctrl-C flips the cancellation flag; loops notice between units of work.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        let _ = cancel_tx.send(true);
    });

    match cli.command {
        Command::Worker => {
            let (handle, receiver) = jobs::queue();
            let dispatcher = Arc::new(
                EnrichDispatcher::new(Arc::new(store.clone()), Arc::new(handle.clone()))
                    .with_batch_size(config.analysis_batch_size as usize),
            );
            let engine = Arc::new(
                SyncEngine::new(feed, Arc::new(store), dispatcher.clone())
                    .with_initial_lookback(config.initial_lookback),
            );

            let interval = Duration::from_secs(config.refresh_interval_mins * 60);
            let spec = RefreshSpec {
                item_limit: config.item_fetch_limit,
                reply_limit: config.reply_fetch_limit,
                ..RefreshSpec::default()
            };
            let schedule_handle = handle.clone();
            let mut schedule_cancel = cancel_rx.clone();
            tokio::spawn(async move {
                use channelpulse_sync::traits::JobQueue;
                loop {
                    let _ = schedule_handle
                        .enqueue(Job::Refresh { spec: spec.clone() })
                        .await;
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = schedule_cancel.changed() => {
                            if *schedule_cancel.borrow() {
                                break;
                            }
                        }
                    }
                }
            });

            JobWorker::new(receiver, handle, engine, analyzer, dispatcher, cancel_rx)
                .run()
                .await;
        }
        Command::Refresh {
            last_days,
            since,
            stats_only,
            replies,
            sources,
            update_existing,
            no_enrich,
        } => {
            let item_mode = if stats_only {
                ItemMode::StatsOnly
            } else if let Some(days) = last_days {
                ItemMode::LastDays(days)
            } else if let Some(raw) = since {
                let date: NaiveDate = raw.parse()?;
                ItemMode::SinceDate(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
            } else {
                ItemMode::NewOnly
            };
            let mut spec = RefreshSpec::new(item_mode, replies.into());
            spec.sources = sources;
            spec.item_limit = config.item_fetch_limit;
            spec.reply_limit = config.reply_fetch_limit;
            spec.update_existing = update_existing;
            spec.dispatch_enrichment = !no_enrich;

            let queue = Arc::new(InlineQueue::new(analyzer));
            let dispatcher = Arc::new(
                EnrichDispatcher::new(Arc::new(store.clone()), queue)
                    .with_batch_size(config.analysis_batch_size as usize),
            );
            let engine = SyncEngine::new(feed, Arc::new(store), dispatcher)
                .with_initial_lookback(config.initial_lookback);
            let report = engine.run_refresh(&spec, &cancel_rx).await?;
            info!(%report, "Done");
        }
        Command::Backlog {
            limit,
            older_than_hours,
            source,
        } => {
            let older_than = older_than_hours.map(|h| Utc::now() - chrono::Duration::hours(h));
            let queue = Arc::new(InlineQueue::new(analyzer));
            let dispatcher = EnrichDispatcher::new(Arc::new(store), queue)
                .with_batch_size(config.analysis_batch_size as usize);
            let analyzed = dispatcher.dispatch_backlog(limit, older_than, source).await?;
            info!(analyzed, "Backlog pass complete");
        }
        Command::AddSource { identifier } => {
            let queue = Arc::new(InlineQueue::new(analyzer));
            let dispatcher = Arc::new(EnrichDispatcher::new(Arc::new(store.clone()), queue));
            let engine = SyncEngine::new(feed, Arc::new(store), dispatcher);
            let source = engine.register_source(&identifier).await?;
            info!(source_id = source.id, title = %source.title, "Source registered");
        }
    }

    Ok(())
}
