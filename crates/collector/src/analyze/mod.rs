//! Stateless analysis over loaded data: week-over-week price change,
//! keyword-weighted sentiment, and the composite inventory-risk index.

pub mod price;
pub mod risk;
pub mod sentiment;
