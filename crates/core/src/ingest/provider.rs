use crate::domain::price::{PricePoint, StockInfo};
use crate::time::cn_market::CalendarDay;
use anyhow::Result;
use chrono::NaiveDate;

/// Upstream source of listings and daily bars.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_stock_list(&self) -> Result<Vec<StockInfo>>;

    /// Daily bars for `ts_code` between `start` and `end` inclusive, in provider order.
    async fn fetch_daily(
        &self,
        ts_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>>;

    /// Exchange calendar entries between `start` and `end` inclusive.
    async fn fetch_trade_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>>;
}
