//! Origin allow/deny policy and per-process dedup memory.

use crate::types::ItemKind;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    pub allow: HashSet<String>,
    pub deny: HashSet<String>,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginVerdict {
    Allowed,
    Denied,
    NotAllowListed,
}

impl PolicyConfig {
    pub fn new<A, D>(allow: A, deny: D, cooldown: Duration) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            allow: normalize(allow),
            deny: normalize(deny),
            cooldown,
        }
    }

    /// Build from comma separated origin lists as found in the config file.
    pub fn from_lists(allow: &str, deny: &str, cooldown: Duration) -> Self {
        Self::new(allow.split(','), deny.split(','), cooldown)
    }

    pub fn origin_verdict(&self, origin: &str) -> OriginVerdict {
        let origin = origin.to_lowercase();
        if self.deny.contains(&origin) {
            OriginVerdict::Denied
        } else if !self.allow.is_empty() && !self.allow.contains(&origin) {
            OriginVerdict::NotAllowListed
        } else {
            OriginVerdict::Allowed
        }
    }
}

fn normalize<I>(names: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Ids acted upon during this process, one set per item kind.
#[derive(Debug, Clone, Default)]
pub struct DedupMemory {
    posts: HashSet<String>,
    comments: HashSet<String>,
}

impl DedupMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: ItemKind, id: &str) -> bool {
        self.set(kind).contains(id)
    }

    /// Returns false if the id was already recorded.
    pub fn record(&mut self, kind: ItemKind, id: &str) -> bool {
        match kind {
            ItemKind::Post => self.posts.insert(id.to_string()),
            ItemKind::Comment => self.comments.insert(id.to_string()),
        }
    }

    pub fn len(&self, kind: ItemKind) -> usize {
        self.set(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.comments.is_empty()
    }

    fn set(&self, kind: ItemKind) -> &HashSet<String> {
        match kind {
            ItemKind::Post => &self.posts,
            ItemKind::Comment => &self.comments,
        }
    }
}

/// Deny list, then allow list, then dedup memory. Pure: nothing is recorded.
pub fn is_eligible(
    origin: &str,
    item_id: &str,
    kind: ItemKind,
    policy: &PolicyConfig,
    dedup: &DedupMemory,
) -> bool {
    policy.origin_verdict(origin) == OriginVerdict::Allowed && !dedup.contains(kind, item_id)
}
