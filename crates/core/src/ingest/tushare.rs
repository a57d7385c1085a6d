use crate::config::Settings;
use crate::domain::price::{PricePoint, StockInfo};
use crate::ingest::provider::MarketDataProvider;
use crate::ingest::types::{TushareRequest, TushareResponse, TushareTable};
use crate::time::cn_market::CalendarDay;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

const STOCK_BASIC_FIELDS: &str = "ts_code,name,industry,market";
const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,vol,amount,pct_chg";
const TRADE_CAL_FIELDS: &str = "exchange,cal_date,is_open";
const TRADE_CAL_EXCHANGE: &str = "SSE";

#[derive(Debug, Clone)]
pub struct TushareClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retries: u32,
}

impl TushareClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let token = settings.require_tushare_token()?.to_string();

        let timeout_secs = crate::config::env_parse::<u64>("TUSHARE_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries =
            crate::config::env_parse::<u32>("TUSHARE_RETRIES")?.unwrap_or(DEFAULT_RETRIES);
        anyhow::ensure!(retries >= 1, "TUSHARE_RETRIES must be >= 1");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build tushare http client")?;

        Ok(Self {
            http,
            base_url: settings.tushare_base_url.clone(),
            token,
            retries,
        })
    }

    async fn query_once(&self, api_name: &str, params: &Value, fields: &str) -> Result<TushareTable> {
        let body = TushareRequest {
            api_name,
            token: &self.token,
            params: params.clone(),
            fields,
        };

        let res = self
            .http
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("tushare {api_name} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read tushare response")?;

        if !status.is_success() {
            anyhow::bail!("tushare {api_name} HTTP {status}: {text}");
        }

        parse_response(api_name, &text)
    }

    async fn query(&self, api_name: &str, params: Value, fields: &str) -> Result<TushareTable> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.query_once(api_name, &params, fields).await {
                Ok(table) => return Ok(table),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(api_name, attempt, ?backoff, error = %err, "tushare query failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for TushareClient {
    fn provider_name(&self) -> &'static str {
        "tushare"
    }

    async fn fetch_stock_list(&self) -> Result<Vec<StockInfo>> {
        let table = self
            .query(
                "stock_basic",
                json!({"exchange": "", "list_status": "L"}),
                STOCK_BASIC_FIELDS,
            )
            .await?;
        parse_stock_list(&table)
    }

    async fn fetch_daily(
        &self,
        ts_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let table = self
            .query(
                "daily",
                json!({
                    "ts_code": ts_code,
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                DAILY_FIELDS,
            )
            .await?;
        parse_daily(&table)
    }

    async fn fetch_trade_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>> {
        let table = self
            .query(
                "trade_cal",
                json!({
                    "exchange": TRADE_CAL_EXCHANGE,
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                TRADE_CAL_FIELDS,
            )
            .await?;
        parse_trade_calendar(&table)
    }
}

fn parse_response(api_name: &str, text: &str) -> Result<TushareTable> {
    let parsed: TushareResponse = serde_json::from_str(text)
        .with_context(|| format!("tushare {api_name} response is not valid JSON: {text}"))?;

    if parsed.code != 0 {
        anyhow::bail!(
            "tushare {api_name} error code {}: {}",
            parsed.code,
            parsed.msg.unwrap_or_default()
        );
    }

    let table = parsed
        .data
        .with_context(|| format!("tushare {api_name} response has no data"))?;

    if table.has_more {
        tracing::warn!(api_name, rows = table.items.len(), "tushare response truncated (has_more); narrow the request window");
    }
    Ok(table)
}

struct Columns<'a> {
    fields: &'a [String],
}

impl<'a> Columns<'a> {
    fn index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == name)
            .with_context(|| format!("tushare response is missing column {name}"))
    }
}

fn parse_stock_list(table: &TushareTable) -> Result<Vec<StockInfo>> {
    let cols = Columns {
        fields: &table.fields,
    };
    let ts_code_idx = cols.index("ts_code")?;
    let name_idx = cols.index("name")?;
    let industry_idx = cols.index("industry").ok();
    let market_idx = cols.index("market").ok();

    let mut out = Vec::with_capacity(table.items.len());
    for row in &table.items {
        let (Some(ts_code), Some(name)) = (cell_str(row, ts_code_idx), cell_str(row, name_idx)) else {
            continue;
        };
        out.push(StockInfo {
            ts_code,
            name,
            industry: industry_idx.and_then(|i| cell_str(row, i)),
            market: market_idx.and_then(|i| cell_str(row, i)),
        });
    }
    Ok(out)
}

fn parse_daily(table: &TushareTable) -> Result<Vec<PricePoint>> {
    let cols = Columns {
        fields: &table.fields,
    };
    let date_idx = cols.index("trade_date")?;
    let open_idx = cols.index("open")?;
    let high_idx = cols.index("high")?;
    let low_idx = cols.index("low")?;
    let close_idx = cols.index("close")?;
    let vol_idx = cols.index("vol")?;
    let amount_idx = cols.index("amount")?;
    let pct_idx = cols.index("pct_chg")?;

    let mut out = Vec::with_capacity(table.items.len());
    for row in &table.items {
        let Some(raw_date) = cell_str(row, date_idx) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d")
            .with_context(|| format!("invalid trade_date from tushare: {raw_date}"))?;

        // A bar without prices (suspension) carries no information for the indicators.
        let (Some(open), Some(high), Some(low), Some(close)) = (
            cell_f64(row, open_idx),
            cell_f64(row, high_idx),
            cell_f64(row, low_idx),
            cell_f64(row, close_idx),
        ) else {
            tracing::debug!(%date, "tushare bar without prices; skipping");
            continue;
        };

        out.push(PricePoint {
            date,
            open,
            high,
            low,
            close,
            volume: cell_f64(row, vol_idx).unwrap_or(0.0),
            amount: cell_f64(row, amount_idx).unwrap_or(0.0),
            percent_change: cell_f64(row, pct_idx).unwrap_or(0.0),
        });
    }
    Ok(out)
}

fn parse_trade_calendar(table: &TushareTable) -> Result<Vec<CalendarDay>> {
    let cols = Columns {
        fields: &table.fields,
    };
    let date_idx = cols.index("cal_date")?;
    let open_idx = cols.index("is_open")?;

    let mut out = Vec::with_capacity(table.items.len());
    for row in &table.items {
        let Some(raw_date) = cell_str(row, date_idx) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d")
            .with_context(|| format!("invalid cal_date from tushare: {raw_date}"))?;
        let is_open = cell_f64(row, open_idx)
            .with_context(|| format!("missing is_open for cal_date {raw_date}"))?;
        out.push(CalendarDay {
            date,
            is_open: is_open == 1.0,
        });
    }
    Ok(out)
}

fn cell_str(row: &[Value], idx: usize) -> Option<String> {
    row.get(idx)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn cell_f64(row: &[Value], idx: usize) -> Option<f64> {
    let v = match row.get(idx)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    v.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daily_body(items: Value) -> String {
        json!({
            "request_id": "abc",
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "trade_date", "open", "high", "low", "close", "pre_close", "change", "pct_chg", "vol", "amount"],
                "items": items,
                "has_more": false
            }
        })
        .to_string()
    }

    #[test]
    fn parses_daily_rows_by_column_name() {
        let body = daily_body(json!([
            ["600000.SH", "20260302", 10.0, 10.5, 9.9, 10.3, 10.0, 0.3, 3.0, 123456.0, 98765.4],
            ["600000.SH", "20260227", 9.8, 10.1, 9.7, 10.0, 9.8, 0.2, 2.04, 100000.0, 80000.0]
        ]));
        let table = parse_response("daily", &body).unwrap();
        let points = parse_daily(&table).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(points[0].close, 10.3);
        assert_eq!(points[0].percent_change, 3.0);
        assert_eq!(points[0].volume, 123456.0);
        assert_eq!(points[1].amount, 80000.0);
    }

    #[test]
    fn skips_bars_without_prices_and_defaults_missing_volume() {
        let body = daily_body(json!([
            ["600000.SH", "20260302", null, null, null, null, null, null, null, null, null],
            ["600000.SH", "20260303", 10.0, 10.5, 9.9, 10.3, 10.0, 0.3, null, null, null]
        ]));
        let table = parse_response("daily", &body).unwrap();
        let points = parse_daily(&table).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].volume, 0.0);
        assert_eq!(points[0].percent_change, 0.0);
    }

    #[test]
    fn non_zero_code_is_an_error() {
        let body = json!({"code": 40203, "msg": "抱歉，您每分钟最多访问该接口500次", "data": null}).to_string();
        let err = parse_response("daily", &body).unwrap_err();
        assert!(format!("{err}").contains("40203"));
    }

    #[test]
    fn missing_column_is_an_error() {
        let body = json!({
            "code": 0,
            "data": {"fields": ["ts_code", "trade_date"], "items": [["600000.SH", "20260302"]]}
        })
        .to_string();
        let table = parse_response("daily", &body).unwrap();
        assert!(parse_daily(&table).is_err());
    }

    #[test]
    fn parses_trade_calendar_with_numeric_and_string_flags() {
        let body = json!({
            "code": 0,
            "data": {
                "fields": ["exchange", "cal_date", "is_open", "pretrade_date"],
                "items": [
                    ["SSE", "20260217", 0, "20260213"],
                    ["SSE", "20260224", "1", "20260213"]
                ],
                "has_more": false
            }
        })
        .to_string();
        let table = parse_response("trade_cal", &body).unwrap();
        let days = parse_trade_calendar(&table).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 2, 17).unwrap());
        assert!(!days[0].is_open);
        assert!(days[1].is_open);
    }

    #[test]
    fn truncated_response_still_parses() {
        let body = json!({
            "code": 0,
            "data": {"fields": ["ts_code", "name"], "items": [["000001.SZ", "平安银行"]], "has_more": true}
        })
        .to_string();
        let table = parse_response("stock_basic", &body).unwrap();
        assert!(table.has_more);
        assert_eq!(parse_stock_list(&table).unwrap().len(), 1);
    }

    #[test]
    fn parses_stock_list_with_optional_columns() {
        let body = json!({
            "code": 0,
            "data": {
                "fields": ["ts_code", "name", "industry", "market"],
                "items": [
                    ["000001.SZ", "平安银行", "银行", "主板"],
                    ["688001.SH", "华兴源创", null, "科创板"],
                    [null, "broken", null, null]
                ]
            }
        })
        .to_string();
        let table = parse_response("stock_basic", &body).unwrap();
        let stocks = parse_stock_list(&table).unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].industry.as_deref(), Some("银行"));
        assert_eq!(stocks[1].industry, None);
        assert_eq!(stocks[1].market.as_deref(), Some("科创板"));
    }
}
