pub mod config;
pub mod export;
pub mod ingest;
pub mod parser;
pub mod scraper;
pub mod store;
pub mod transport;
pub mod types;
pub mod utils;
pub mod viewstate;

#[cfg(test)]
mod testing;

pub use crate::config::ScraperConfig;
pub use crate::scraper::{LegislatureIndex, ScraperError};
pub use crate::transport::Session;

pub(crate) const BASE_URL: &str = "https://www.parlamento.pt";
