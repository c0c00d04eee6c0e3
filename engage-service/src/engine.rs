use crate::reply::ReplyTemplates;
use chrono::Utc;
use mintwatch_core::{
    is_eligible, CoreError, DedupMemory, ErrorExt, Intent, IntentClassifier, Item, ItemKind,
    LeadRecord, LeadSink, PolicyConfig, ReplySink,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionMode {
    Log,
    Reply,
}

impl fmt::Display for ReactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactionMode::Log => f.write_str("log"),
            ReactionMode::Reply => f.write_str("reply"),
        }
    }
}

/// The action taken for a qualifying item.
#[derive(Clone)]
pub enum Reaction {
    Log(Arc<dyn LeadSink>),
    Reply {
        sink: Arc<dyn ReplySink>,
        templates: ReplyTemplates,
    },
}

impl Reaction {
    pub fn mode(&self) -> ReactionMode {
        match self {
            Reaction::Log(_) => ReactionMode::Log,
            Reaction::Reply { .. } => ReactionMode::Reply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ineligible,
    NoIntent,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Skipped(SkipReason),
    Failed(String),
}

/// Global reply cooldown shared by both streams.
///
/// A reply that is being sent holds the slot, so no other reply can start
/// until it either commits or releases.
#[derive(Debug, Default)]
pub struct CooldownState {
    last_reaction: Option<Instant>,
    in_flight: bool,
}

impl CooldownState {
    pub fn is_cooling(&self, now: Instant, cooldown: Duration) -> bool {
        self.in_flight
            || self
                .last_reaction
                .map_or(false, |last| now.saturating_duration_since(last) < cooldown)
    }

    pub fn try_reserve(&mut self, now: Instant, cooldown: Duration) -> bool {
        if self.is_cooling(now, cooldown) {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Never moves the last reaction time backwards.
    pub fn commit(&mut self, now: Instant) {
        self.in_flight = false;
        self.last_reaction = Some(self.last_reaction.map_or(now, |last| last.max(now)));
    }

    pub fn release(&mut self) {
        self.in_flight = false;
    }

    pub fn last_reaction(&self) -> Option<Instant> {
        self.last_reaction
    }
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub dedup: DedupMemory,
    pub cooldown: CooldownState,
}

pub struct ReactionEngine {
    classifier: IntentClassifier,
    policy: PolicyConfig,
    reaction: Reaction,
    state: Mutex<EngineState>,
}

impl ReactionEngine {
    pub fn new(policy: PolicyConfig, reaction: Reaction) -> Self {
        Self {
            classifier: IntentClassifier::default(),
            policy,
            reaction,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn mode(&self) -> ReactionMode {
        self.reaction.mode()
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub async fn has_reacted(&self, kind: ItemKind, id: &str) -> bool {
        self.state.lock().await.dedup.contains(kind, id)
    }

    pub async fn last_reaction(&self) -> Option<Instant> {
        self.state.lock().await.cooldown.last_reaction()
    }

    /// Decide on and carry out the reaction to one item.
    ///
    /// Only fatal sink errors are returned as `Err`; everything else is an
    /// [`Outcome`].
    pub async fn react(&self, item: &Item) -> Result<Outcome, CoreError> {
        let intent = self.classifier.classify(&item.text());

        {
            let mut state = self.state.lock().await;
            if !is_eligible(&item.origin, &item.id, item.kind, &self.policy, &state.dedup) {
                debug!(
                    "Skipping ineligible {} {} in r/{}: {:?}",
                    item.kind,
                    item.id,
                    item.origin,
                    self.policy.origin_verdict(&item.origin)
                );
                return Ok(Outcome::Skipped(SkipReason::Ineligible));
            }
            if !intent.is_actionable() {
                return Ok(Outcome::Skipped(SkipReason::NoIntent));
            }
            if self.mode() == ReactionMode::Reply
                && !state.cooldown.try_reserve(Instant::now(), self.policy.cooldown)
            {
                debug!("Cooling down, skipping {} {} [{}]", item.kind, item.id, intent);
                return Ok(Outcome::Skipped(SkipReason::Cooldown));
            }
        }

        let result = self.act(item, intent).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.dedup.record(item.kind, &item.id);
                match self.mode() {
                    ReactionMode::Reply => {
                        state.cooldown.commit(Instant::now());
                        info!("Replied to {} {} [{}] in r/{}", item.kind, item.id, intent, item.origin);
                    }
                    ReactionMode::Log => {
                        info!("Logged {} {} [{}] in r/{}", item.kind, item.id, intent, item.origin);
                    }
                }
                Ok(Outcome::Succeeded)
            }
            Err(e) => {
                state.cooldown.release();
                if e.is_fatal() {
                    error!(
                        "Fatal error reacting to {} {} in r/{}: {}",
                        item.kind, item.id, item.origin, e
                    );
                    return Err(e);
                }
                error!(
                    "Failed to {} {} {} in r/{}: {}",
                    self.mode(),
                    item.kind,
                    item.id,
                    item.origin,
                    e
                );
                Ok(Outcome::Failed(e.to_string()))
            }
        }
    }

    async fn act(&self, item: &Item, intent: Intent) -> Result<(), CoreError> {
        match &self.reaction {
            Reaction::Log(sink) => {
                let record = LeadRecord::from_item(item, intent, Utc::now());
                sink.append(&record).await
            }
            Reaction::Reply { sink, templates } => {
                let text = templates.render(intent);
                sink.reply(item, &text).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window() {
        let cooldown = Duration::from_secs(300);
        let mut state = CooldownState::default();
        let start = Instant::now();

        assert!(state.try_reserve(start, cooldown));
        // a reply in flight blocks others
        assert!(!state.try_reserve(start, cooldown));
        state.commit(start);

        assert!(!state.try_reserve(start + Duration::from_secs(10), cooldown));
        assert!(!state.try_reserve(start + Duration::from_secs(299), cooldown));
        assert!(state.try_reserve(start + Duration::from_secs(300), cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_previous_reaction() {
        let cooldown = Duration::from_secs(60);
        let mut state = CooldownState::default();
        let start = Instant::now();

        assert!(state.try_reserve(start, cooldown));
        state.release();
        assert_eq!(state.last_reaction(), None);
        assert!(state.try_reserve(start, cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_is_monotonic() {
        let mut state = CooldownState::default();
        let later = Instant::now() + Duration::from_secs(5);
        state.commit(later);
        state.commit(later - Duration::from_secs(3));
        assert_eq!(state.last_reaction(), Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cooldown_never_cools() {
        let mut state = CooldownState::default();
        let now = Instant::now();
        state.commit(now);
        assert!(!state.is_cooling(now, Duration::ZERO));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ReactionMode::Log.to_string(), "log");
        assert_eq!(ReactionMode::Reply.to_string(), "reply");
    }
}
