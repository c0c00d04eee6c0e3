//! Reacts to new Reddit items: filter, classify, then log a lead or reply.

pub mod engine;
pub mod reply;
pub mod worker;

pub use engine::{CooldownState, EngineState, Outcome, Reaction, ReactionEngine, ReactionMode, SkipReason};
pub use reply::{ReplyTemplates, DEFAULT_CREATION_TEMPLATE, DEFAULT_MINTING_TEMPLATE};
pub use worker::{EngageService, StreamWorker, WorkerStats, DEFAULT_STREAM_BACKOFF};
