use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks serialize recommendation runs for the same as-of date. The session lock guards a
// whole run; the transaction lock guards the delete+insert of a batch.
const LOCK_NAMESPACE: i64 = 0x5354_4B50_4943; // "STKPIC"

pub(crate) fn lock_key_for_date(as_of_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ (as_of_date.num_days_from_ce() as i64)
}

/// Session advisory lock for one as-of date, pinned to the connection that took it.
///
/// Postgres only honours `pg_advisory_unlock` on the session holding the lock, so the guard keeps
/// that connection checked out until [`AsOfDateLock::release`]. A guard dropped without release
/// detaches and closes its connection, which ends the session and frees the lock.
#[derive(Debug)]
pub struct AsOfDateLock {
    conn: Option<PoolConnection<Postgres>>,
    as_of_date: NaiveDate,
}

impl AsOfDateLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = lock_key_for_date(self.as_of_date);
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let res: Result<(bool,), sqlx::Error> = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await;

        match res {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                drop(conn.detach());
                anyhow::bail!("advisory lock was not held by this session (key={key})")
            }
            Err(e) => {
                drop(conn.detach());
                Err(anyhow::Error::new(e)
                    .context(format!("failed to release advisory lock (key={key})")))
            }
        }
    }
}

impl Drop for AsOfDateLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(as_of_date = %self.as_of_date, "as_of_date lock dropped without release; closing its connection");
            drop(conn.detach());
        }
    }
}

/// `None` when another session holds the lock for `as_of_date`.
pub async fn try_acquire_as_of_date_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<Option<AsOfDateLock>> {
    let key = lock_key_for_date(as_of_date);
    let mut conn = pool
        .acquire()
        .await
        .context("failed to check out connection for advisory lock")?;

    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

    if !acquired.0 {
        return Ok(None);
    }
    Ok(Some(AsOfDateLock {
        conn: Some(conn),
        as_of_date,
    }))
}

pub(crate) async fn lock_as_of_date_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key_for_date(as_of_date);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .persistent(false)
        .bind(key)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to take transaction lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_differ_per_date() {
        let a = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert_ne!(lock_key_for_date(a), lock_key_for_date(b));
        assert_eq!(lock_key_for_date(a), lock_key_for_date(a));
    }

    async fn test_pool(max: u32) -> Option<sqlx::PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        Some(
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(max)
                .connect(&url)
                .await
                .unwrap(),
        )
    }

    // Needs TEST_DATABASE_URL; returns early without it.
    #[tokio::test]
    async fn release_frees_lock_even_when_pool_connections_rotate() {
        let Some(pool) = test_pool(3).await else {
            return;
        };
        let Some(other) = test_pool(1).await else {
            return;
        };
        let date = NaiveDate::from_ymd_opt(2099, 1, 4).unwrap();

        let guard = try_acquire_as_of_date_lock(&pool, date).await.unwrap().unwrap();

        // Concurrent requests cycling the remaining pooled connections.
        let c1 = pool.acquire().await.unwrap();
        let c2 = pool.acquire().await.unwrap();
        drop(c1);
        drop(c2);

        assert!(try_acquire_as_of_date_lock(&other, date).await.unwrap().is_none());

        guard.release().await.unwrap();

        let again = try_acquire_as_of_date_lock(&other, date)
            .await
            .unwrap()
            .expect("lock must be free after release");
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_guard_does_not_leak_lock() {
        let Some(pool) = test_pool(2).await else {
            return;
        };
        let Some(other) = test_pool(1).await else {
            return;
        };
        let date = NaiveDate::from_ymd_opt(2099, 1, 5).unwrap();

        let guard = try_acquire_as_of_date_lock(&pool, date).await.unwrap().unwrap();
        drop(guard);

        let mut freed = None;
        for _ in 0..50 {
            if let Some(g) = try_acquire_as_of_date_lock(&other, date).await.unwrap() {
                freed = Some(g);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        freed.expect("lock must be freed once the guard's session closes")
            .release()
            .await
            .unwrap();
    }
}
