use crate::engine::{Outcome, ReactionEngine};
use mintwatch_core::{CoreError, ErrorExt, ItemFeed};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_STREAM_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub stream_errors: u64,
}

/// Feeds one stream's items through the engine, strictly in arrival order.
pub struct StreamWorker<F> {
    feed: F,
    engine: Arc<ReactionEngine>,
    backoff: Duration,
    stats: WorkerStats,
}

impl<F: ItemFeed> StreamWorker<F> {
    pub fn new(feed: F, engine: Arc<ReactionEngine>, backoff: Duration) -> Self {
        Self {
            feed,
            engine,
            backoff,
            stats: WorkerStats::default(),
        }
    }

    /// Runs until the feed closes or the engine hits a fatal error.
    ///
    /// Stream errors never end the worker: it waits out the backoff and
    /// resubscribes, skipping whatever arrived in between.
    pub async fn run(mut self) -> Result<WorkerStats, CoreError> {
        info!("Streaming {} ({} mode)", self.feed.name(), self.engine.mode());

        loop {
            let items = match self.feed.next_items().await {
                Ok(Some(items)) => items,
                Ok(None) => {
                    info!("{} closed: {:?}", self.feed.name(), self.stats);
                    return Ok(self.stats);
                }
                Err(e) => {
                    self.stats.stream_errors += 1;
                    // Reddit may ask for a longer pause than the fixed backoff
                    let wait = self.backoff.max(e.retry_after().unwrap_or_default());
                    warn!(
                        "{} stream error: {}; retrying in {:?}",
                        self.feed.name(),
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    self.feed.resubscribe();
                    continue;
                }
            };

            for item in &items {
                match self.engine.react(item).await? {
                    Outcome::Succeeded => self.stats.succeeded += 1,
                    Outcome::Skipped(reason) => {
                        debug!("Skipped {} {}: {:?}", item.kind, item.id, reason);
                        self.stats.skipped += 1;
                    }
                    Outcome::Failed(_) => self.stats.failed += 1,
                }
            }
        }
    }
}

/// Runs the post and comment workers side by side over one shared engine.
pub struct EngageService {
    engine: Arc<ReactionEngine>,
    backoff: Duration,
}

impl EngageService {
    pub fn new(engine: Arc<ReactionEngine>) -> Self {
        Self {
            engine,
            backoff: DEFAULT_STREAM_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns when both feeds close, or as soon as either worker fails fatally.
    pub async fn run<P, C>(&self, posts: P, comments: C) -> Result<(), CoreError>
    where
        P: ItemFeed,
        C: ItemFeed,
    {
        let post_worker = StreamWorker::new(posts, Arc::clone(&self.engine), self.backoff);
        let comment_worker = StreamWorker::new(comments, Arc::clone(&self.engine), self.backoff);

        let (post_stats, comment_stats) = tokio::try_join!(post_worker.run(), comment_worker.run())?;
        info!(
            "Engagement finished: posts {:?}, comments {:?}",
            post_stats, comment_stats
        );
        Ok(())
    }
}
