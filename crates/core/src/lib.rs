pub mod analysis;
pub mod domain;
pub mod health;
pub mod ingest;
pub mod pipeline;
pub mod schedule;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    const DEFAULT_TUSHARE_BASE_URL: &str = "https://api.tushare.pro";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub tushare_token: Option<String>,
        pub tushare_base_url: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                tushare_token: std::env::var("TUSHARE_TOKEN")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                tushare_base_url: std::env::var("TUSHARE_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TUSHARE_BASE_URL.to_string()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_tushare_token(&self) -> anyhow::Result<&str> {
            self.tushare_token
                .as_deref()
                .context("TUSHARE_TOKEN is required")
        }
    }

    /// Knobs for a recommendation run.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecommendOptions {
        /// Inclusive lower bound of the price band.
        pub min_price: f64,
        /// Inclusive upper bound of the price band.
        pub max_price: f64,
        pub top_n: usize,
        /// Number of instruments considered per run.
        pub universe_limit: usize,
        /// Most recent points loaded per instrument.
        pub history_lookback: usize,
    }

    impl Default for RecommendOptions {
        fn default() -> Self {
            Self {
                min_price: 0.0,
                max_price: 15.0,
                top_n: 10,
                universe_limit: 100,
                history_lookback: 100,
            }
        }
    }

    impl RecommendOptions {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut out = Self::default();

            if let Some(v) = env_parse::<f64>("RECOMMEND_MIN_PRICE")? {
                out.min_price = v;
            }
            if let Some(v) = env_parse::<f64>("RECOMMEND_MAX_PRICE")? {
                out.max_price = v;
            }
            if let Some(v) = env_parse::<usize>("RECOMMEND_TOP_N")? {
                out.top_n = v;
            }
            if let Some(v) = env_parse::<usize>("RECOMMEND_UNIVERSE_LIMIT")? {
                out.universe_limit = v;
            }
            if let Some(v) = env_parse::<usize>("RECOMMEND_HISTORY_LOOKBACK")? {
                out.history_lookback = v;
            }

            out.validate()?;
            Ok(out)
        }

        pub fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(
                self.min_price.is_finite() && self.max_price.is_finite(),
                "price band must be finite"
            );
            anyhow::ensure!(
                self.min_price >= 0.0,
                "RECOMMEND_MIN_PRICE must be >= 0 (got {})",
                self.min_price
            );
            anyhow::ensure!(
                self.min_price <= self.max_price,
                "price band is empty: min {} > max {}",
                self.min_price,
                self.max_price
            );
            anyhow::ensure!(self.top_n >= 1, "RECOMMEND_TOP_N must be >= 1");
            anyhow::ensure!(
                self.universe_limit >= 1,
                "RECOMMEND_UNIVERSE_LIMIT must be >= 1"
            );
            anyhow::ensure!(
                self.history_lookback >= crate::analysis::features::MIN_HISTORY,
                "RECOMMEND_HISTORY_LOOKBACK must be >= {}",
                crate::analysis::features::MIN_HISTORY
            );
            Ok(())
        }
    }

    pub fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{key} is invalid ({s}): {e}")),
            _ => Ok(None),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_band_is_zero_to_fifteen() {
            let opts = RecommendOptions::default();
            assert_eq!(opts.min_price, 0.0);
            assert_eq!(opts.max_price, 15.0);
            assert_eq!(opts.top_n, 10);
            assert!(opts.validate().is_ok());
        }

        #[test]
        fn rejects_inverted_band_and_zero_top_n() {
            let inverted = RecommendOptions {
                min_price: 20.0,
                max_price: 10.0,
                ..Default::default()
            };
            assert!(inverted.validate().is_err());

            let empty = RecommendOptions {
                top_n: 0,
                ..Default::default()
            };
            assert!(empty.validate().is_err());
        }

        #[test]
        fn rejects_lookback_shorter_than_minimum_history() {
            let short = RecommendOptions {
                history_lookback: 5,
                ..Default::default()
            };
            assert!(short.validate().is_err());
        }
    }
}
