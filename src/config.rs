//! Crawl configuration: a single explicit-field record replacing
//! dynamically-typed config objects.

use std::path::PathBuf;

/// Environment knobs for a crawl. All fields have defaults; construct
/// via [`CrawlerOptions::builder`] or `..Default::default()`.
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    pub seed_url: String,
    /// Second seed crawled alongside `seed_url`, tagged `DocKind::Api`
    /// instead of `DocKind::Reference`. Unset crawls only the main seed.
    pub api_seed_url: Option<String>,
    pub framework_id: String,
    pub project: String,
    pub output_dir: PathBuf,
    pub clean: bool,

    pub max_connections: usize,
    pub max_per_host: usize,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub max_workers: usize,
    pub max_retries: u8,
    pub retry_delay_seconds: f64,
    pub queue_capacity: usize,
    pub checkpoint_enabled: bool,
    pub checkpoint_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            api_seed_url: None,
            framework_id: String::new(),
            project: String::new(),
            output_dir: PathBuf::from("./out"),
            clean: false,
            max_connections: 20,
            max_per_host: 10,
            rate_limit_rps: 10.0,
            rate_limit_burst: 10,
            max_workers: 10,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            queue_capacity: 50_000,
            checkpoint_enabled: true,
            checkpoint_interval_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl CrawlerOptions {
    #[must_use]
    pub fn builder() -> CrawlerOptionsBuilder {
        CrawlerOptionsBuilder::default()
    }

    /// Filesystem layout contract: `{out}/static/{css,js,img,fonts}`,
    /// `{out}/content`, `{out}/templates`.
    pub async fn ensure_directory_tree(&self) -> anyhow::Result<()> {
        for sub in [
            "static/css",
            "static/js",
            "static/img",
            "static/fonts",
            "content",
            "templates",
        ] {
            tokio::fs::create_dir_all(self.output_dir.join(sub)).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(".scraper_checkpoint.json")
    }

    #[must_use]
    pub fn queue_state_path(&self) -> PathBuf {
        self.output_dir.join(".queue_state.json")
    }
}

/// Type-state-free builder; every setter is infallible and returns `Self`
/// so calls chain. Favors simple builder ergonomics over compile-time
/// required-field tracking, since every field here already has a sane
/// default.
#[derive(Debug, Clone, Default)]
pub struct CrawlerOptionsBuilder {
    opts: CrawlerOptionsInner,
}

#[derive(Debug, Clone)]
struct CrawlerOptionsInner(CrawlerOptions);

impl Default for CrawlerOptionsInner {
    fn default() -> Self {
        Self(CrawlerOptions::default())
    }
}

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.opts.0.$name = value;
            self
        }
    };
}

impl CrawlerOptionsBuilder {
    setter!(seed_url, String);
    setter!(api_seed_url, Option<String>);
    setter!(framework_id, String);
    setter!(project, String);
    setter!(output_dir, PathBuf);
    setter!(clean, bool);
    setter!(max_connections, usize);
    setter!(max_per_host, usize);
    setter!(rate_limit_rps, f64);
    setter!(rate_limit_burst, u32);
    setter!(max_workers, usize);
    setter!(max_retries, u8);
    setter!(retry_delay_seconds, f64);
    setter!(queue_capacity, usize);
    setter!(checkpoint_enabled, bool);
    setter!(checkpoint_interval_secs, u64);
    setter!(request_timeout_secs, u64);

    #[must_use]
    pub fn build(self) -> CrawlerOptions {
        self.opts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_for_a_fresh_crawl() {
        let opts = CrawlerOptions::default();
        assert_eq!(opts.max_connections, 20);
        assert_eq!(opts.max_per_host, 10);
        assert!((opts.rate_limit_rps - 10.0).abs() < f64::EPSILON);
        assert_eq!(opts.max_workers, 10);
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.queue_capacity, 50_000);
        assert!(opts.checkpoint_enabled);
    }

    #[test]
    fn builder_overrides_defaults() {
        let opts = CrawlerOptions::builder()
            .seed_url("https://example.org/docs/".to_string())
            .max_workers(4)
            .clean(true)
            .build();
        assert_eq!(opts.seed_url, "https://example.org/docs/");
        assert_eq!(opts.max_workers, 4);
        assert!(opts.clean);
    }
}
