pub mod api;
pub mod indexer;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;
