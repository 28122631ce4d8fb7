//! QUARRY Resolver - Batched Entity Resolution
//!
//! Resolves large, duplicate-laden sets of integer keys to records through a
//! chain of cache tiers and a rate-limited remote service:
//!
//! 1. Deduplicate and consult the [`TierChain`](quarry_storage::TierChain).
//! 2. Reject unaddressable keys with the validity filter.
//! 3. Split the rest into bounded batches.
//! 4. Dispatch bulk calls under a sliding concurrency window, escalating
//!    failed batches to single-key calls. Each fetched record is cached as
//!    soon as its call returns.
//! 5. Merge and fill gaps with placeholders.
//!
//! # Example
//!
//! ```ignore
//! use quarry_core::{DataClass, QuarryConfig};
//! use quarry_resolver::ResolverService;
//!
//! let config = QuarryConfig::from_path("quarry.toml".as_ref())?;
//! let service = ResolverService::from_config(&config)?;
//! let names = service.resolve(&[30000142, 34, 34], &DataClass::names()).await?;
//! ```

pub mod cancel;
pub mod escalator;
pub mod scheduler;
pub mod service;
pub mod telemetry;

pub use cancel::{CancelHandle, CancelToken};
pub use escalator::{escalate, EscalationOutcome};
pub use scheduler::{run_bounded, ScheduleOutput};
pub use service::{Resolution, ResolveReport, ResolverService};
pub use telemetry::{init_tracing, TelemetryConfig};
