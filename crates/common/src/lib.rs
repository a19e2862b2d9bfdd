//! Ambient concerns shared by every crate in the ingestion pipeline: a
//! `tracing` subscriber initializer, the `AtomicU64` counters mentioned in
//! the error handling design as "User-visible behavior", and the
//! cancellation token type plumbed through every long-running loop.

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Installs a process-wide `tracing` subscriber with a sensible default
/// filter. Call once, near the top of whatever process embeds this crate.
///
/// Mirrors the teacher's `tracing` + `tracing-subscriber` (`fmt`,
/// `env-filter`, `time`, `json`) dependency set; unlike the teacher's
/// `Observability` type (which also wires telemetry upload and a log file),
/// this stays to the library-facing subscriber only.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// A cancellation signal shared by the fetcher, compactor, head tracker and
/// firehose server. All long-running operations accept one and return
/// promptly without further side effects once it fires (spec §5).
pub type CancellationToken = tokio_util::sync::CancellationToken;
