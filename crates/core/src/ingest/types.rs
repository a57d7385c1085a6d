use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope of the Tushare Pro HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct TushareRequest<'a> {
    pub api_name: &'a str,
    pub token: &'a str,
    pub params: Value,
    pub fields: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TushareResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<TushareTable>,
}

/// Column-oriented result: `items` rows line up with `fields`.
#[derive(Debug, Clone, Deserialize)]
pub struct TushareTable {
    pub fields: Vec<String>,
    pub items: Vec<Vec<Value>>,
    #[serde(default)]
    pub has_more: bool,
}
