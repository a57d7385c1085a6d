//! Indicator math and the fixed-weight scoring rules. Pure functions, no I/O.

pub mod features;
pub mod indicators;
pub mod predictor;
pub mod ranking;
