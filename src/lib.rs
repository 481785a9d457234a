pub mod analyzer;
pub mod api;
pub mod chunker;
pub mod config;
pub mod data_models;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod extract;
pub mod flat_index;
pub mod generator;
pub mod http;
pub mod indexer;
pub mod orchestrator;
pub mod query_engine;
pub mod rate_limiter;
pub mod retry;
pub mod scrapper;
pub mod search;
pub mod snapshot;
