//! Seams between the reaction engine and its external collaborators.

use crate::error::CoreError;
use crate::types::{Item, LeadRecord};
use async_trait::async_trait;

/// An unbounded source of new items.
#[async_trait]
pub trait ItemFeed: Send {
    /// Waits for the next batch of unseen items, oldest first.
    ///
    /// `Ok(None)` means the feed has closed and will never yield again.
    async fn next_items(&mut self) -> Result<Option<Vec<Item>>, CoreError>;

    /// Start over from the current point, dropping anything that already exists.
    fn resubscribe(&mut self);

    fn name(&self) -> &str;
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, item: &Item, text: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn append(&self, record: &LeadRecord) -> Result<(), CoreError>;
}
