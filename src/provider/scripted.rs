//! Scripted provider sink.
//!
//! Responses are keyed by the plan's command: the procedure name for opaque
//! plans, the generated text for text plans. Every plan the sink receives is
//! logged, so tests can assert on exactly what reached the provider.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::query::{
    errors::ProviderError,
    executor::{FetchFuture, ProviderSink},
    materialize::RawResult,
    plan::{Command, TranslatedPlan},
};

#[derive(Clone, Debug)]
enum Reply {
    Records(RawResult),
    Failure(ProviderError),
}

/// In-memory sink answering from canned replies.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSink {
    name: String,
    replies: Arc<Mutex<FxHashMap<String, Reply>>>,
    fallback: Arc<Mutex<Option<Reply>>>,
    log: Arc<Mutex<Vec<TranslatedPlan>>>,
}

impl ScriptedSink {
    /// Creates a sink with no replies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Answers `command` with `records`.
    pub fn respond(self, command: impl Into<String>, records: RawResult) -> Self {
        self.replies
            .lock()
            .insert(command.into(), Reply::Records(records));
        self
    }

    /// Answers `command` with a provider failure.
    pub fn fail(self, command: impl Into<String>, error: ProviderError) -> Self {
        self.replies.lock().insert(command.into(), Reply::Failure(error));
        self
    }

    /// Answers every unmatched command with `records`.
    pub fn respond_to_all(self, records: RawResult) -> Self {
        *self.fallback.lock() = Some(Reply::Records(records));
        self
    }

    /// Plans received so far, in order.
    pub fn invocations(&self) -> Vec<TranslatedPlan> {
        self.log.lock().clone()
    }

    fn reply(&self, plan: &TranslatedPlan) -> Result<RawResult, ProviderError> {
        self.log.lock().push(plan.clone());
        let key = match &plan.command {
            Command::Text { sql } => sql,
            Command::Opaque { command } => command,
        };
        let reply = self
            .replies
            .lock()
            .get(key)
            .cloned()
            .or_else(|| self.fallback.lock().clone());
        debug!(provider = %self.name, command = %key, scripted = reply.is_some(), "scripted round-trip");
        match reply {
            Some(Reply::Records(records)) => Ok(records),
            Some(Reply::Failure(error)) => Err(error),
            None => Err(ProviderError::Command {
                command: key.clone(),
                message: "no scripted reply".to_string(),
            }),
        }
    }
}

impl ProviderSink for ScriptedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, plan: &TranslatedPlan) -> Result<RawResult, ProviderError> {
        self.reply(plan)
    }

    fn fetch_async<'a>(&'a self, plan: &'a TranslatedPlan) -> FetchFuture<'a> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.reply(plan)
        })
    }
}
