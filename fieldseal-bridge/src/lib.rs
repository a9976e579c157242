//! Boundary to the external analysis script.
//!
//! Each call starts the script as a child process with the method name as
//! its only argument. A zero exit status and one JSON document on stdout is
//! a success; anything else is reported as an [`AnalysisOutcome::Unavailable`]
//! with the method's empty document as fallback.

mod bridge;
mod error;
mod types;

pub use bridge::{AnalysisBridge, AnalysisOutcome};
pub use error::{BridgeError, BridgeResult};
pub use types::{
    AnalysisMethod, CategoryStat, HistoryAnalysis, Recommendation, UserInterests, VisitPatterns,
};
