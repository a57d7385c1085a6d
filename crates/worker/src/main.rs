use clap::{Parser, Subcommand};
use stockpick_core::config::{RecommendOptions, Settings};
use stockpick_core::schedule::{default_tasks, ScheduleOptions};
use stockpick_core::storage::PgStorage;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;
mod scheduler;
mod tasks;

#[derive(Debug, Parser)]
#[command(name = "stockpick_worker")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to the latest completed CN trading session.
    #[arg(long, global = true)]
    as_of_date: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull the stock list and daily bars from Tushare.
    Ingest,
    /// Score the universe and replace the stored batch for the as-of date.
    Recommend {
        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Ingest, then recommend, then stamp system health.
    Daily,
    /// Run one health check.
    Health,
    /// Run the recurring task schedule until Ctrl-C.
    Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let recommend_opts = RecommendOptions::from_env()?;

    let pool = tasks::connect(&settings).await?;
    let ctx = tasks::TaskContext {
        settings,
        storage: PgStorage::new(pool.clone()),
        recommend: recommend_opts,
    };

    if matches!(args.command, Command::Ingest | Command::Daily) {
        tasks::refresh_trade_calendar(&ctx).await;
    }
    let as_of_date = tasks::resolve_as_of_date(&ctx, args.as_of_date.as_deref()).await?;

    let res = match args.command {
        Command::Ingest => {
            tasks::recorded(&pool, "manual_ingest", "ingest", async {
                let summary = tasks::ingest(&ctx, as_of_date).await?;
                tracing::info!(
                    %as_of_date,
                    stocks = summary.stocks,
                    instruments = summary.instruments,
                    rows = summary.rows,
                    failures = summary.failures,
                    "ingest finished"
                );
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::Recommend { dry_run } => {
            tasks::recorded(&pool, "manual_recommend", "recommend", async {
                match tasks::recommend(&ctx, as_of_date, dry_run).await? {
                    Some(report) => tracing::info!(
                        %as_of_date,
                        dry_run,
                        considered = report.considered,
                        scored = report.scored,
                        skipped = report.skipped.len(),
                        recommended = report.recommended,
                        persisted = report.persisted,
                        "recommendation run finished"
                    ),
                    None => tracing::warn!(%as_of_date, "recommendation run skipped"),
                }
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::Daily => {
            tasks::recorded(&pool, "manual_daily_update", "daily_update", async {
                tasks::daily_update(&ctx, as_of_date).await
            })
            .await
        }
        Command::Health => {
            tasks::recorded(&pool, "manual_health_check", "health_check", async {
                tasks::health_check(&ctx).await.map(|_| ())
            })
            .await
        }
        Command::Schedule => {
            let definitions = default_tasks(&ScheduleOptions::from_env()?);
            scheduler::run(ctx.clone(), definitions).await
        }
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(%as_of_date, error = %err, "worker command failed");
    }
    res
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
