pub mod config;
pub mod models;
pub mod services;

pub use config::Config;
pub use services::{
    ConfigurationError, FactorRegistry, InMemoryStore, RankingError, RankingPipeline,
    RankingRequest, RankingStore, VariantConfig,
};
