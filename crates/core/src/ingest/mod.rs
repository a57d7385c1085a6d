pub mod provider;
pub mod tushare;
pub mod types;
