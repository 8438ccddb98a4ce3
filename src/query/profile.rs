use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query execution profiling metrics.
///
/// Profiling is enabled via the `REFRACT_PROFILE` environment variable and
/// tracks the time spent in each phase of a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent validating composability.
    pub validate_ns: u64,
    /// Number of validations.
    pub validate_count: u64,
    /// Total nanoseconds spent lowering IR into provider plans.
    pub translate_ns: u64,
    /// Number of translations.
    pub translate_count: u64,
    /// Total nanoseconds spent waiting on provider round-trips.
    pub round_trip_ns: u64,
    /// Number of provider round-trips.
    pub round_trip_count: u64,
    /// Total nanoseconds spent shaping raw records.
    pub materialize_ns: u64,
    /// Number of materializations.
    pub materialize_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    validate_ns: AtomicU64,
    validate_count: AtomicU64,
    translate_ns: AtomicU64,
    translate_count: AtomicU64,
    round_trip_ns: AtomicU64,
    round_trip_count: AtomicU64,
    materialize_ns: AtomicU64,
    materialize_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("REFRACT_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Composability validation.
    Validate,
    /// IR lowering.
    Translate,
    /// Provider round-trip.
    RoundTrip,
    /// Result shaping.
    Materialize,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Validate => (&counters.validate_ns, &counters.validate_count),
        QueryProfileKind::Translate => (&counters.translate_ns, &counters.translate_count),
        QueryProfileKind::RoundTrip => (&counters.round_trip_ns, &counters.round_trip_count),
        QueryProfileKind::Materialize => (&counters.materialize_ns, &counters.materialize_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// Returns `None` when `REFRACT_PROFILE` is unset. With `reset`, every
/// counter is zeroed after it is read.
///
/// ```no_run
/// use refract::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("round-trips: {}", snapshot.round_trip_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        validate_ns: load(&counters.validate_ns),
        validate_count: load(&counters.validate_count),
        translate_ns: load(&counters.translate_ns),
        translate_count: load(&counters.translate_count),
        round_trip_ns: load(&counters.round_trip_ns),
        round_trip_count: load(&counters.round_trip_count),
        materialize_ns: load(&counters.materialize_ns),
        materialize_count: load(&counters.materialize_count),
    })
}
