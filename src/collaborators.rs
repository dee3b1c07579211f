//! Out-of-scope collaborator interfaces: specified here only as traits so
//! the engine can be dependency-injected and exercised standalone. No
//! planning or framework-lookup logic lives here — implementations are
//! external glue, injected via `CrawlEngine::with_collaborators`.
//!
//! Grounded on the dependency-injected handle pattern of
//! `CrawlConfig::with_event_bus`/`with_browser_pool`.

use std::future::Future;
use std::pin::Pin;

use crate::types::Priority;

/// One topic a `TopicPlanner` wants crawled.
#[derive(Debug, Clone)]
pub struct PlannedTopic {
    pub id: String,
    pub name: String,
    pub url: String,
    pub priority: Priority,
    pub subtopics: Vec<PlannedTopic>,
}

/// Given `(seed_url, framework_id)`, returns a topic tree describing what
/// to crawl. Implemented externally (AI-assisted topic discovery is out
/// of scope here); the engine treats this as an oracle.
pub trait TopicPlanner: Send + Sync {
    fn plan<'a>(
        &'a self,
        seed_url: &'a str,
        framework_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PlannedTopic>>> + Send + 'a>>;
}

/// Given a framework string, returns one canonical documentation URL, or
/// `None` if unknown.
pub trait FrameworkRegistry: Send + Sync {
    fn resolve(&self, framework_id: &str) -> Option<String>;
}

/// A `FrameworkRegistry` with no entries; useful when the seed URL is
/// supplied directly and no framework lookup is needed.
#[derive(Debug, Default)]
pub struct EmptyFrameworkRegistry;

impl FrameworkRegistry for EmptyFrameworkRegistry {
    fn resolve(&self, _framework_id: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = EmptyFrameworkRegistry;
        assert!(registry.resolve("spring-boot").is_none());
    }
}
