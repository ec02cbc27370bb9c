//! ClaimLens: cost-variance resolution core
//!
//! Turns a list of billed procedure codes into a cost-variance report.
//!
//! ## Architecture
//!
//! - **Coalescing Cache**: time-bounded fingerprint cache that collapses
//!   concurrent identical lookups into one in-flight call
//! - **Retry Controller**: bounded retries with exponential backoff around
//!   the external rate lookup
//! - **Pipeline Orchestrator**: Parse → PerCodeResolve → SubAnalyses →
//!   Aggregate → Summarize, folding partial failures into one report
//! - **Sub-Analyses**: error scan, rate audit, and opaque external appeal
//!   drafting behind a closed registry
//!
//! The crate is a library-level orchestration layer: it owns no transport,
//! no persistence, and no lookup tables. The rate provider and any text
//! generator are injected behind traits.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod lookup;
pub mod pipeline;
pub mod retry;
pub mod types;

// Re-export run configuration
pub use config::RunOptions;

// Re-export commonly used types
pub use types::{
    AggregatedReport, AnalysisKind, AnalysisStatus, BillingItem, CodeInfo, ItemBreakdown,
    OverchargeBasis, PipelineStep, ResolvedCode, RiskLevel, RunStatus, StepStatus,
    SubAnalysisResult, ValidationError,
};

// Re-export the cache and retry layers
pub use cache::{CacheStats, CoalescingCache, SharedResult};
pub use retry::RetryPolicy;

// Re-export the lookup boundary
pub use lookup::{LookupError, LookupService, StaticRateTable};

// Re-export the pipeline
pub use pipeline::{PipelineOrchestrator, PipelineStats, TraceLog};

// Re-export the sub-analysis registry surface
pub use analysis::{
    default_analyses, AnalysisInput, AppealClient, AppealRequest, NoopAppealClient, SubAnalysis,
};
