//! Provider dispatch: validate, translate, round-trip, materialize.
//!
//! Both execution modes run the same async pipeline. The blocking entry point
//! polls it exactly once with [`RoundTrip::Blocking`], in which mode the sink
//! is called synchronously and the future never suspends.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use tracing::{debug, trace};

use crate::query::{
    ast::Query,
    capability::CapabilityProfile,
    errors::{ProviderError, QueryError},
    materialize::{Materializer, RawResult, ShapedResult},
    metadata::MetadataProvider,
    plan::TranslatedPlan,
    profile::{
        profile_timer as query_profile_timer, record_profile_timer as record_query_profile_timer,
        QueryProfileKind,
    },
    translate::{Translator, TranslatorOptions},
    validate::validate,
    Result,
};

/// Cooperative cancellation flag observed before the provider round-trip.
pub type CancelToken = Arc<AtomicBool>;

/// Future returned by [`ProviderSink::fetch_async`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<RawResult, ProviderError>> + Send + 'a>>;

/// How the provider round-trip is performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundTrip {
    /// The caller's thread blocks on the sink.
    Blocking,
    /// The round-trip may suspend.
    Suspending,
}

impl RoundTrip {
    fn name(self) -> &'static str {
        match self {
            RoundTrip::Blocking => "blocking",
            RoundTrip::Suspending => "suspending",
        }
    }
}

/// Store adapter that runs translated plans and returns raw records.
pub trait ProviderSink: Send + Sync {
    /// Provider name used in diagnostics.
    fn name(&self) -> &str;

    /// Runs `plan` on the calling thread.
    fn fetch(&self, plan: &TranslatedPlan) -> std::result::Result<RawResult, ProviderError>;

    /// Runs `plan` without blocking the caller.
    ///
    /// Defaults to the blocking call wrapped in a ready future.
    fn fetch_async<'a>(&'a self, plan: &'a TranslatedPlan) -> FetchFuture<'a> {
        Box::pin(std::future::ready(self.fetch(plan)))
    }
}

/// Executes queries against one provider.
#[derive(Clone)]
pub struct Dispatcher {
    profile: Arc<CapabilityProfile>,
    metadata: Arc<dyn MetadataProvider>,
    sink: Arc<dyn ProviderSink>,
    options: TranslatorOptions,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("profile", &self.profile.name())
            .field("sink", &self.sink.name())
            .field("options", &self.options)
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with default translator options.
    pub fn new(
        profile: CapabilityProfile,
        metadata: Arc<dyn MetadataProvider>,
        sink: Arc<dyn ProviderSink>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            metadata,
            sink,
            options: TranslatorOptions::default(),
        }
    }

    /// Replaces the translator options.
    pub fn with_options(mut self, options: TranslatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Capability profile of the provider.
    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    /// Validates and translates `query` without touching the provider.
    pub fn prepare(&self, query: &Query) -> Result<TranslatedPlan> {
        let start = query_profile_timer();
        let validated = validate(query, &self.profile);
        record_query_profile_timer(QueryProfileKind::Validate, start);
        validated?;

        let start = query_profile_timer();
        let plan = Translator::new(&self.profile, self.metadata.as_ref(), &self.options)
            .translate(query);
        record_query_profile_timer(QueryProfileKind::Translate, start);
        plan
    }

    /// Executes `query`, blocking the calling thread for the round-trip.
    pub fn execute(&self, query: &Query, cancel: Option<CancelToken>) -> Result<ShapedResult> {
        let mut future = std::pin::pin!(self.run(query, RoundTrip::Blocking, cancel));
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(QueryError::invalid(
                "blocking execution suspended on the provider round-trip",
            )),
        }
    }

    /// Executes `query`, suspending during the round-trip.
    pub async fn execute_async(
        &self,
        query: &Query,
        cancel: Option<CancelToken>,
    ) -> Result<ShapedResult> {
        self.run(query, RoundTrip::Suspending, cancel).await
    }

    async fn run(
        &self,
        query: &Query,
        mode: RoundTrip,
        cancel: Option<CancelToken>,
    ) -> Result<ShapedResult> {
        let plan = self.prepare(query)?;
        debug!(
            provider = self.sink.name(),
            mode = mode.name(),
            plan_hash = plan.plan_hash,
            bindings = plan.parameters.len(),
            "dispatching query"
        );
        if cancel.is_some_and(|token| token.load(Ordering::Acquire)) {
            debug!(plan_hash = plan.plan_hash, "query cancelled before round-trip");
            return Err(QueryError::Cancelled);
        }

        let start = query_profile_timer();
        let raw = match mode {
            RoundTrip::Blocking => self.sink.fetch(&plan),
            RoundTrip::Suspending => self.sink.fetch_async(&plan).await,
        };
        record_query_profile_timer(QueryProfileKind::RoundTrip, start);
        let raw = raw?;
        trace!(records = raw.len(), "provider returned records");

        let start = query_profile_timer();
        let shaped = Materializer::new(&self.profile).materialize(&plan.shape, raw);
        record_query_profile_timer(QueryProfileKind::Materialize, start);
        shaped
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}
