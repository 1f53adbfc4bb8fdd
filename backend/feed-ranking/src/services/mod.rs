pub mod factors;
pub mod pipeline;
pub mod plan;
pub mod storage;

pub use factors::{ConfigurationError, FactorRegistry, FactorSpec, VariantConfig};
pub use pipeline::{RankedFeed, RankingError, RankingPipeline, RankingRequest};
pub use plan::{PlanComposer, QueryPlan};
pub use storage::{InMemoryStore, RankingStore, ScoredRow, StorageError};
