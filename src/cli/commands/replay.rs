//! Replay command - drive a worker from recorded events
//!
//! Events are read one JSON object per line. Adjacent fetch events are
//! dispatched together, the way a page issues parallel requests; messages
//! and lifecycle events are dispatched one by one in file order.

use crate::cli::args::ReplayArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{PrefetchError, PrefetchResult};
use crate::host::{CacheStorage, DiskCacheStorage, LoggingClients, MemoryCacheStorage, UreqFetcher};
use crate::worker::{EventOutcome, Resolution, Worker, WorkerEvent, WorkerState};
use console::style;
use futures_util::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// Execute the replay command
pub async fn execute(args: ReplayArgs, config: &Config) -> PrefetchResult<()> {
    let events = read_events(&args.events).await?;
    debug!("Loaded {} event(s)", events.len());

    let mut worker_config = config.worker.clone();
    if let Some(origin) = args.origin {
        worker_config.origin = origin;
    }

    let storage: Arc<dyn CacheStorage> = if args.memory {
        Arc::new(MemoryCacheStorage::new())
    } else {
        Arc::new(DiskCacheStorage::new(ConfigManager::cache_dir(config)))
    };
    let fetcher = Arc::new(UreqFetcher::new(&config.network));
    let state = WorkerState::from_config(&worker_config, fetcher, storage)?;
    let worker = Worker::new(state, Arc::new(LoggingClients));
    let bases: Vec<String> = worker
        .state()
        .bundle_bases()
        .iter()
        .map(|base| base.to_string())
        .collect();
    info!(
        "Replaying against {} (bundle bases: {})",
        worker.state().origin(),
        bases.join(", ")
    );

    let summary = replay(&worker, events).await;

    worker.settled().await;
    let stats = worker.state().cache().stats();
    println!();
    println!(
        "{} {} fetch(es): {} hit, {} fetched, {} pass, {} error",
        style("Done:").bold(),
        summary.fetches(),
        summary.hits,
        summary.fetched,
        summary.passed,
        summary.errors
    );
    println!(
        "      {} message(s), cache opened {} time(s), released {} time(s)",
        summary.messages,
        stats.opens(),
        stats.releases()
    );

    Ok(())
}

/// Tally of dispatched events
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub hits: usize,
    pub fetched: usize,
    pub passed: usize,
    pub errors: usize,
    pub messages: usize,
}

impl ReplaySummary {
    /// Total fetch events dispatched
    pub fn fetches(&self) -> usize {
        self.hits + self.fetched + self.passed + self.errors
    }
}

/// Dispatch events in order, batching adjacent fetches
pub async fn replay(worker: &Worker, events: Vec<WorkerEvent>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut batch: Vec<WorkerEvent> = Vec::new();

    for event in events {
        if matches!(event, WorkerEvent::Fetch { .. }) {
            batch.push(event);
            continue;
        }
        flush_fetches(worker, &mut batch, &mut summary).await;
        dispatch_other(worker, event, &mut summary).await;
    }
    flush_fetches(worker, &mut batch, &mut summary).await;

    summary
}

async fn flush_fetches(worker: &Worker, batch: &mut Vec<WorkerEvent>, summary: &mut ReplaySummary) {
    if batch.is_empty() {
        return;
    }
    let events = std::mem::take(batch);
    let labels: Vec<String> = events.iter().map(describe).collect();
    let outcomes = join_all(events.into_iter().map(|event| worker.handle(event))).await;

    for (label, outcome) in labels.iter().zip(outcomes) {
        match outcome {
            Ok(EventOutcome::Respond(resolution)) => {
                let tag = match &resolution {
                    Resolution::Hit(_) => {
                        summary.hits += 1;
                        style("hit    ").green()
                    }
                    Resolution::Fetched(_) => {
                        summary.fetched += 1;
                        style("fetched").cyan()
                    }
                    Resolution::PassThrough => {
                        summary.passed += 1;
                        style("pass   ").dim()
                    }
                };
                match resolution.response() {
                    Some(response) => println!(
                        "{} {} {} ({} B)",
                        tag,
                        response.status,
                        label,
                        response.body.len()
                    ),
                    None => println!("{} --- {}", tag, label),
                }
            }
            Ok(_) => {}
            Err(e) => {
                summary.errors += 1;
                println!("{} --- {}: {}", style("error  ").red(), label, e);
            }
        }
    }
}

async fn dispatch_other(worker: &Worker, event: WorkerEvent, summary: &mut ReplaySummary) {
    let label = describe(&event);
    match worker.handle(event).await {
        Ok(EventOutcome::Queued) => {
            summary.messages += 1;
            debug!("Queued {}", label);
        }
        Ok(_) => println!("{} {}", style("ok     ").green(), label),
        Err(e) => {
            summary.errors += 1;
            println!("{} {}: {}", style("error  ").red(), label, e);
        }
    }
}

fn describe(event: &WorkerEvent) -> String {
    match event {
        WorkerEvent::Fetch { method, url } => format!("{} {}", method, url),
        WorkerEvent::Message { data } => format!("message {}", data),
        WorkerEvent::Install => "install".to_string(),
        WorkerEvent::Activate => "activate".to_string(),
    }
}

async fn read_events(path: &Path) -> PrefetchResult<Vec<WorkerEvent>> {
    if path == Path::new("-") {
        return parse_events(tokio::io::stdin()).await;
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PrefetchError::io(format!("opening events file {}", path.display()), e))?;
    parse_events(file).await
}

/// Parse JSON-lines events. Blank lines and `#` comments are skipped.
pub async fn parse_events<R: AsyncRead + Unpin>(reader: R) -> PrefetchResult<Vec<WorkerEvent>> {
    let mut lines = BufReader::new(reader).lines();
    let mut events = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| PrefetchError::io("reading events", e))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|e| {
            PrefetchError::User(format!("Invalid event on line {}: {}", line_no, e))
        })?;
        events.push(event);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::WorkerConfig;
    use crate::host::{Fetcher, Request, Response};
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticFetcher;

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: &Request) -> PrefetchResult<Response> {
            if request.url.path().ends_with("missing.js") {
                return Err(PrefetchError::network(request.url.as_str(), "refused"));
            }
            Ok(Response::new(request.url.as_str(), 200, "console.log(1)"))
        }
    }

    fn worker() -> Worker {
        let state = WorkerState::from_config(
            &WorkerConfig::default(),
            Arc::new(StaticFetcher),
            Arc::new(MemoryCacheStorage::new()),
        )
        .unwrap();
        Worker::new(state, Arc::new(LoggingClients))
    }

    #[tokio::test]
    async fn parse_skips_blank_and_comment_lines() {
        let input = b"# warmup\n{\"event\":\"install\"}\n\n{\"event\":\"fetch\",\"url\":\"/build/a.js\"}\n";
        let events = parse_events(&input[..]).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], WorkerEvent::Install);
    }

    #[tokio::test]
    async fn parse_reports_line_number() {
        let input = b"{\"event\":\"install\"}\n{\"event\":\"explode\"}\n";
        let err = parse_events(&input[..]).await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn replay_tallies_outcomes() {
        let worker = worker();
        let events = vec![
            WorkerEvent::Install,
            WorkerEvent::Activate,
            WorkerEvent::Message {
                data: json!({"urls": ["/build/a.js"]}),
            },
        ];
        let summary = replay(&worker, events).await;
        assert_eq!(summary.messages, 1);
        worker.settled().await;

        let fetch = |url: &str| WorkerEvent::Fetch {
            method: Default::default(),
            url: url.to_string(),
        };
        let summary = replay(
            &worker,
            vec![
                fetch("/build/a.js"),
                fetch("/build/b.js"),
                fetch("/index.html"),
                fetch("/build/missing.js"),
            ],
        )
        .await;

        assert_eq!(
            summary,
            ReplaySummary {
                hits: 1,
                fetched: 1,
                passed: 1,
                errors: 1,
                messages: 0,
            }
        );
        assert_eq!(summary.fetches(), 4);
    }
}
