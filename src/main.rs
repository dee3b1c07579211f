use std::path::PathBuf;

use clap::Parser;
use docscrawl::{CrawlEngine, CrawlerOptions};

/// Crawl a documentation site into a static content/route bundle.
#[derive(Parser)]
#[command(name = "docscrawl", about = "Documentation site crawler")]
struct Cli {
    /// Seed URL to start crawling from
    seed_url: String,

    /// Optional second seed URL, crawled as API reference content
    /// (DocKind::Api) alongside the main seed
    #[arg(long)]
    api_seed_url: Option<String>,

    /// Framework or project identifier, used in route keys and filenames
    #[arg(short, long, default_value = "default")]
    project: String,

    /// Output directory for content, static assets and templates
    #[arg(short, long, default_value = "./out")]
    output_dir: PathBuf,

    /// Ignore any existing checkpoint and start a fresh crawl
    #[arg(long)]
    clean: bool,

    /// Number of concurrent page workers
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Sustained requests per second
    #[arg(long, default_value_t = 10.0)]
    rate_limit: f64,

    /// Maximum retry attempts per URL before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u8,

    /// Disable periodic checkpointing
    #[arg(long)]
    no_checkpoint: bool,

    /// Maximum number of URLs held in the work queue at once
    #[arg(long, default_value_t = 50_000)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let options = CrawlerOptions::builder()
        .seed_url(cli.seed_url)
        .api_seed_url(cli.api_seed_url)
        .project(cli.project)
        .output_dir(cli.output_dir)
        .clean(cli.clean)
        .max_workers(cli.workers)
        .rate_limit_rps(cli.rate_limit)
        .max_retries(cli.max_retries)
        .checkpoint_enabled(!cli.no_checkpoint)
        .queue_capacity(cli.queue_capacity)
        .build();

    let job_id = uuid::Uuid::new_v4().to_string();
    let engine = match CrawlEngine::new(options, job_id) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("failed to initialize crawl engine: {e}");
            std::process::exit(1);
        }
    };

    match engine.run().await {
        Ok(summary) => {
            log::info!(
                "crawl complete: {} routes, {} static resources, {} failed, {:.1}s",
                summary.total_routes,
                summary.total_static_resources,
                summary.total_failed,
                summary.duration_secs
            );
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("crawl did not complete: {e}");
            std::process::exit(1);
        }
    }
}
