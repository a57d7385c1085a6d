pub mod error;
pub mod prediction;
pub mod price;
pub mod recommendation;
