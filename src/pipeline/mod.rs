//! Pipeline stage sequence for cost-variance analysis
//!
//! ```text
//! Parse            validate batch + options (fatal on failure)
//! PerCodeResolve   fan-out per code through cache/coalescer + retry
//! SubAnalyses      registered sub-analyses over the resolved batch
//! Aggregate        precedence rule folds everything into one outcome
//! Summarize        always runs, composes report summary + risk level
//! ```

pub mod aggregate;
mod orchestrator;
pub mod summarize;
mod trace;

pub use aggregate::AggregateOutcome;
pub use orchestrator::{PipelineOrchestrator, PipelineStats};
pub use trace::TraceLog;
