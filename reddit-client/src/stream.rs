//! Polling streams over Reddit's `new` listings.
//!
//! Reddit has no push API for new content, so a stream re-reads the newest
//! page of a listing, remembers which ids it has already handed out, and
//! backs off while nothing new shows up.

use async_trait::async_trait;
use mintwatch_core::{CoreError, Item, ItemFeed, ItemKind};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Slightly more than three listing pages.
pub const SEEN_CAPACITY: usize = 301;
pub const MIN_IDLE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_IDLE_DELAY: Duration = Duration::from_secs(16);

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// The newest page of a listing, newest first.
    async fn fetch_newest(&self, kind: ItemKind, subreddits: &str) -> Result<Vec<Item>, CoreError>;
}

/// Insertion-ordered set that forgets its oldest ids past a fixed size.
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns true if the id was not already remembered.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct ListingStream<S> {
    source: Arc<S>,
    kind: ItemKind,
    subreddits: String,
    name: String,
    seen: SeenIds,
    primed: bool,
    idle_delay: Duration,
}

impl<S: ListingSource> ListingStream<S> {
    /// A stream that skips whatever already exists when it starts.
    pub fn new(source: Arc<S>, kind: ItemKind, subreddits: impl Into<String>) -> Self {
        let subreddits = subreddits.into();
        let name = format!("{}s in r/{}", kind, subreddits);
        Self {
            source,
            kind,
            subreddits,
            name,
            seen: SeenIds::new(SEEN_CAPACITY),
            primed: false,
            idle_delay: MIN_IDLE_DELAY,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    async fn idle(&mut self) {
        let delay = jittered(self.idle_delay);
        debug!("{}: nothing new, sleeping {:?}", self.name, delay);
        tokio::time::sleep(delay).await;
        self.idle_delay = (self.idle_delay * 2).min(MAX_IDLE_DELAY);
    }
}

/// Up to a sixteenth of the delay either way.
fn jittered(delay: Duration) -> Duration {
    let base = delay.as_secs_f64();
    let spread = base / 16.0;
    Duration::from_secs_f64(base + (fastrand::f64() * 2.0 - 1.0) * spread)
}

#[async_trait]
impl<S: ListingSource + 'static> ItemFeed for ListingStream<S> {
    async fn next_items(&mut self) -> Result<Option<Vec<Item>>, CoreError> {
        loop {
            let newest = self.source.fetch_newest(self.kind, &self.subreddits).await?;

            let mut fresh: Vec<Item> = newest
                .into_iter()
                .filter(|item| self.seen.insert(&item.id))
                .collect();

            if !self.primed {
                self.primed = true;
                info!(
                    "{}: skipping {} existing items, remembering {}",
                    self.name,
                    fresh.len(),
                    self.seen.len()
                );
                self.idle().await;
                continue;
            }

            if fresh.is_empty() {
                self.idle().await;
                continue;
            }

            self.idle_delay = MIN_IDLE_DELAY;
            fresh.reverse();
            debug!("{}: {} new items", self.name, fresh.len());
            return Ok(Some(fresh));
        }
    }

    fn resubscribe(&mut self) {
        info!("{}: resubscribing", self.name);
        self.seen.clear();
        self.primed = false;
        self.idle_delay = MIN_IDLE_DELAY;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mintwatch_core::RedditApiError;
    use std::sync::Mutex;

    /// Replays scripted listing pages, repeating the last one when exhausted.
    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<Vec<Item>, CoreError>>>,
        last: Mutex<Vec<Item>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<Vec<Item>, CoreError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                last: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        async fn fetch_newest(&self, _kind: ItemKind, _subreddits: &str) -> Result<Vec<Item>, CoreError> {
            *self.calls.lock().unwrap() += 1;
            match self.pages.lock().unwrap().pop_front() {
                Some(Ok(page)) => {
                    *self.last.lock().unwrap() = page.clone();
                    Ok(page)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn posts(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .map(|id| Item::post(*id, "NFT", "title", "body"))
            .collect()
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn test_seen_ids_forget_oldest() {
        let mut seen = SeenIds::new(3);
        for id in ["a", "b", "c", "d"] {
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 3);
        assert!(!seen.insert("d"));
        assert!(seen.insert("a"));
    }

    #[test]
    fn test_jitter_stays_close() {
        for _ in 0..100 {
            let delay = jittered(Duration::from_secs(16));
            assert!(delay >= Duration::from_secs(15));
            assert!(delay <= Duration::from_secs(17));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_existing_and_yields_oldest_first() {
        let source = ScriptedSource::new(vec![
            Ok(posts(&["p2", "p1"])),
            Ok(posts(&["p4", "p3", "p2", "p1"])),
        ]);
        let mut stream = ListingStream::new(source.clone(), ItemKind::Post, "NFT");

        let batch = stream.next_items().await.unwrap().unwrap();
        assert_eq!(ids(&batch), vec!["p3", "p4"]);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_backoff_grows_and_resets() {
        let source = ScriptedSource::new(vec![
            Ok(posts(&["p1"])),
            Ok(posts(&["p1"])),
            Ok(posts(&["p1"])),
            Ok(posts(&["p2", "p1"])),
        ]);
        let mut stream = ListingStream::new(source, ItemKind::Post, "NFT");

        stream.next_items().await.unwrap().unwrap();
        // primed, then two empty polls: 1s, 2s, 4s
        assert_eq!(stream.idle_delay, MIN_IDLE_DELAY);

        let started = tokio::time::Instant::now();
        let next = tokio::time::timeout(Duration::from_secs(60), stream.next_items()).await;
        assert!(next.is_err(), "no new items should arrive");
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(stream.idle_delay, MAX_IDLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_propagates() {
        let source = ScriptedSource::new(vec![
            Ok(posts(&["p1"])),
            Err(CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 })),
        ]);
        let mut stream = ListingStream::new(source, ItemKind::Post, "NFT");

        let result = stream.next_items().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_skips_items_that_exist_again() {
        let source = ScriptedSource::new(vec![
            Ok(posts(&["p1"])),
            Err(CoreError::RedditApi(RedditApiError::RequestTimeout)),
            Ok(posts(&["p3", "p2", "p1"])),
            Ok(posts(&["p4", "p3", "p2", "p1"])),
        ]);
        let mut stream = ListingStream::new(source, ItemKind::Post, "NFT");

        assert!(stream.next_items().await.is_err());
        stream.resubscribe();

        // p2 and p3 appeared while disconnected and are skipped
        let batch = stream.next_items().await.unwrap().unwrap();
        assert_eq!(ids(&batch), vec!["p4"]);
    }

    #[test]
    fn test_name_describes_listing() {
        let source = ScriptedSource::new(Vec::new());
        let stream = ListingStream::new(source, ItemKind::Comment, "NFT+CryptoArt");
        assert_eq!(stream.name(), "comments in r/NFT+CryptoArt");
        assert_eq!(stream.kind(), ItemKind::Comment);
    }
}
