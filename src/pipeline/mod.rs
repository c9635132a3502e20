//! Preview pipeline
//!
//! Messages flow through these stages:
//! 1. [`DelayScheduler`] holds a job per message for the grace period
//! 2. [`WorkerPool`] runs the job: rate limit, cache lookup, fetch
//! 3. Fetch completions come back to the pool for parsing, budget growth and
//!    posting
//!
//! [`Orchestrator`] wires the stages together.

mod orchestrator;
mod progressive;
mod scheduler;
mod worker_pool;

pub use orchestrator::Orchestrator;
pub use progressive::{attempt_sizes, first_attempt, next_attempt};
pub use scheduler::DelayScheduler;
pub use worker_pool::{Job, WorkerPool};

/// Identifier of a chat message
pub type MessageId = u64;

/// A chat message as seen by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub content: String,
    /// The platform already attached a preview of its own
    pub has_embeds: bool,
    pub from_bot: bool,
}

impl InboundMessage {
    /// A plain user message without embeds
    pub fn new(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            ..Self::default()
        }
    }
}
