//! The ETL engine: scrapes GPU prices, collects community signals, normalizes
//! product names, computes price-change / sentiment / risk, and persists
//! everything idempotently. The binary fronting this library exposes one-shot
//! runs, a scheduling daemon, and ad-hoc triggers.

pub mod analyze;
pub mod arguments;
pub mod extract;
pub mod normalize;
pub mod persistence;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod shutdown;

use {
    crate::{
        analyze::{risk::RiskConfig, sentiment},
        arguments::{Arguments, Command, RunKind, SchedulerCommand, TriggerJob},
        extract::{danawa::DanawaClient, reddit::RedditClient},
        persistence::Persistence,
        pipeline::Pipeline,
        retry::Retryer,
        scheduler::{JobFn, JobId, JobSpec, Scheduler},
    },
    anyhow::Context,
    chrono::Utc,
    clap::Parser,
    futures::FutureExt,
    model::RunStats,
    std::{process::ExitCode, sync::Arc},
    tokio_util::sync::CancellationToken,
};

/// Exit code for runs that succeeded overall but skipped records on the way.
const EXIT_PARTIAL: u8 = 2;

pub async fn start(args: impl Iterator<Item = String>) -> ExitCode {
    let args = Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter);
    observe::panic_hook::install();
    observe::metrics::setup_registry(Some("gpu_market".to_string()), None);
    tracing::info!("running collector with {args:#?}");
    match run(args).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(?error, "fatal initialization error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Arguments) -> anyhow::Result<ExitCode> {
    let retryer = Retryer::new(args.max_retries, args.retry_backoff_seconds);
    let client = reqwest::Client::builder()
        .user_agent(extract::USER_AGENT)
        .timeout(args.http_timeout)
        .build()
        .context("failed to build http client")?;

    // Scheduler introspection does not need the store at all.
    if let Command::Scheduler {
        command: command @ (SchedulerCommand::Status | SchedulerCommand::Jobs),
    } = &args.command
    {
        introspect(&args, command);
        return Ok(ExitCode::SUCCESS);
    }

    let persistence = Persistence::connect(
        args.db.url()?.as_str(),
        args.db.db_pool_size,
        args.db.db_timeout,
        retryer.clone(),
    )
    .await
    .context("failed to connect to the store")?;

    let pipeline = Arc::new(Pipeline::new(
        DanawaClient::new(
            client.clone(),
            args.danawa_base.clone(),
            retryer.clone(),
            args.extract_fan_out,
            args.politeness_delay,
        ),
        RedditClient::new(
            client,
            args.reddit_base.clone(),
            args.subreddits.clone(),
            retryer,
            args.rate_limit_wait,
        ),
        persistence,
        RiskConfig {
            threshold: args.risk_threshold,
        },
        sentiment::Weights {
            new_release: args.new_release_weight,
            price_drop: args.price_drop_weight,
            default: args.default_weight,
        },
        args.sentiment_window_days,
    ));

    match &args.command {
        Command::Run { kind } => {
            let cancel = cancel_on_signal();
            let stats = match kind {
                RunKind::Full => pipeline.run_full(&cancel).await,
                RunKind::PriceCrawl => pipeline.run_price_only(&cancel).await,
                RunKind::RedditCollection => pipeline.run_signals_only(&cancel).await,
            };
            Ok(ExitCode::from(exit_code(&stats)))
        }
        Command::Trigger { job } => {
            // One process, one run: an ad-hoc trigger is an out-of-band run;
            // the pipeline's running-guard enforces the no-overlap rule.
            let cancel = cancel_on_signal();
            let stats = match job {
                TriggerJob::PriceCrawl => pipeline.run_price_only(&cancel).await,
                TriggerJob::RedditCollection => pipeline.run_signals_only(&cancel).await,
            };
            Ok(ExitCode::from(exit_code(&stats)))
        }
        Command::Scheduler { command } => match command {
            SchedulerCommand::Start => {
                let scheduler = build_scheduler(&args, pipeline);
                scheduler.start();
                shutdown::signal_handler().await;
                scheduler.stop(args.shutdown_grace).await;
                for result in scheduler.history() {
                    tracing::info!(
                        job = %result.job,
                        started = %result.started_at,
                        success = result.success,
                        error = result.error.as_deref().unwrap_or(""),
                        "job result"
                    );
                }
                Ok(ExitCode::SUCCESS)
            }
            SchedulerCommand::Status | SchedulerCommand::Jobs => {
                unreachable!("handled before store setup")
            }
        },
    }
}

fn build_scheduler(args: &Arguments, pipeline: Arc<Pipeline>) -> Scheduler {
    let price: JobFn = {
        let pipeline = pipeline.clone();
        Arc::new(move |cancel| {
            let pipeline = pipeline.clone();
            async move { job_outcome(pipeline.run_price_only(&cancel).await) }.boxed()
        })
    };
    let signals: JobFn = Arc::new(move |cancel| {
        let pipeline = pipeline.clone();
        async move { job_outcome(pipeline.run_signals_only(&cancel).await) }.boxed()
    });
    Scheduler::new(
        vec![
            JobSpec {
                id: JobId::PriceCrawl,
                hour: args.price_crawl_hour,
                minute: args.price_crawl_minute,
                run: price,
            },
            JobSpec {
                id: JobId::RedditCollection,
                hour: args.reddit_crawl_hour,
                minute: args.reddit_crawl_minute,
                run: signals,
            },
        ],
        args.job_history_limit,
    )
}

fn job_outcome(stats: RunStats) -> Result<(), String> {
    if stats.success {
        Ok(())
    } else {
        Err(stats.errors.join("; "))
    }
}

fn introspect(args: &Arguments, command: &SchedulerCommand) {
    let now = Utc::now();
    match command {
        SchedulerCommand::Jobs => {
            println!(
                "price-crawl       daily at {:02}:{:02} UTC, next {}",
                args.price_crawl_hour,
                args.price_crawl_minute,
                scheduler::next_occurrence(args.price_crawl_hour, args.price_crawl_minute, now),
            );
            println!(
                "reddit-collection daily at {:02}:{:02} UTC, next {}",
                args.reddit_crawl_hour,
                args.reddit_crawl_minute,
                scheduler::next_occurrence(args.reddit_crawl_hour, args.reddit_crawl_minute, now),
            );
        }
        SchedulerCommand::Status => {
            println!("jobs: 2 (price-crawl, reddit-collection)");
            println!("job history limit: {}", args.job_history_limit);
            println!("shutdown grace: {:?}", args.shutdown_grace);
            println!("risk threshold: {}", args.risk_threshold);
            println!("subreddits: {}", args.subreddits.join(", "));
        }
        SchedulerCommand::Start => unreachable!("start is not introspection"),
    }
}

/// A token that flips when the process receives a shutdown signal.
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown::signal_handler().await;
        trigger.cancel();
    });
    cancel
}

/// 0 on a clean run, 1 on a fatal failure, 2 on partial success with
/// record-level errors.
fn exit_code(stats: &RunStats) -> u8 {
    if !stats.success {
        1
    } else if !stats.errors.is_empty() || stats.records_skipped > 0 {
        EXIT_PARTIAL
    } else {
        0
    }
}
