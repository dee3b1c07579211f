pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod page_processor;
pub mod progress;
pub mod queue;
pub mod rate_limiter;
pub mod resources;
pub mod types;
pub mod url_normalize;
pub mod worker_pool;

pub use collaborators::{EmptyFrameworkRegistry, FrameworkRegistry, PlannedTopic, TopicPlanner};
pub use config::{CrawlerOptions, CrawlerOptionsBuilder};
pub use engine::{CrawlEngine, CrawlSummary};
pub use error::{CrawlError, CrawlResult, FailureKind};
pub use fetcher::{Fetcher, FetcherConfig, FetcherStatsSnapshot};
pub use progress::{ProgressBus, ProgressEvent, Stage};
pub use queue::{AddOutcome, QueueItem, WorkQueue};
pub use types::{
    hash8, route_key, DocKind, ItemMetadata, NavigationItem, Priority, ResourceKind, ResourceRef,
    RouteModel, ScrapedContent, TemplateSlot,
};
