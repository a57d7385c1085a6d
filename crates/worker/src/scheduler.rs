use crate::tasks::{self, TaskContext};
use chrono_tz::Asia::Shanghai;
use std::time::Duration;
use stockpick_core::schedule::{TaskDefinition, TaskKind, Trigger};
use tokio_cron_scheduler::{Job, JobBuilder, JobScheduler};

/// Registers every task and runs until Ctrl-C.
pub async fn run(ctx: TaskContext, definitions: Vec<TaskDefinition>) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    for def in definitions {
        let job = build_job(ctx.clone(), &def)?;
        scheduler.add(job).await?;
        tracing::info!(task = def.name, description = def.description, trigger = ?def.trigger, "task scheduled");
    }

    scheduler.start().await?;
    tracing::info!("scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; stopping scheduler");
    scheduler.shutdown().await?;
    Ok(())
}

fn build_job(ctx: TaskContext, def: &TaskDefinition) -> anyhow::Result<Job> {
    let name = def.name;
    let kind = def.kind;

    let job = match &def.trigger {
        Trigger::Cron(expr) => JobBuilder::new()
            .with_timezone(Shanghai)
            .with_cron_job_type()
            .with_schedule(expr.as_str())?
            .with_run_async(Box::new(move |_uuid, _l| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    execute(&ctx, name, kind).await;
                })
            }))
            .build()?,
        Trigger::Interval { seconds } => {
            Job::new_repeated_async(Duration::from_secs(*seconds), move |_uuid, _l| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    execute(&ctx, name, kind).await;
                })
            })?
        }
    };
    Ok(job)
}

async fn execute(ctx: &TaskContext, name: &'static str, kind: TaskKind) {
    tracing::info!(task = name, "task started");

    let res = match kind {
        TaskKind::HealthCheck => {
            tasks::recorded(ctx.pool(), name, kind.as_str(), async {
                tasks::health_check(ctx).await.map(|_| ())
            })
            .await
        }
        TaskKind::DailyUpdate => {
            tasks::recorded(ctx.pool(), name, kind.as_str(), async {
                tasks::refresh_trade_calendar(ctx).await;
                let as_of_date = tasks::resolve_as_of_date(ctx, None).await?;
                tasks::daily_update(ctx, as_of_date).await
            })
            .await
        }
    };

    match res {
        Ok(()) => tracing::info!(task = name, "task finished"),
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(task = name, error = %err, "task failed");
        }
    }
}
