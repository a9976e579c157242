//! Documents printed by the analysis script, one per method.
//!
//! Parsing is strict: a document with fields these types do not know is
//! rejected as malformed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The script's entry points, passed as its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisMethod {
    AnalyzeHistory,
    GenerateRecommendations,
    UserInterests,
    CategoryStats,
}

impl AnalysisMethod {
    pub const ALL: [AnalysisMethod; 4] = [
        AnalysisMethod::AnalyzeHistory,
        AnalysisMethod::GenerateRecommendations,
        AnalysisMethod::UserInterests,
        AnalysisMethod::CategoryStats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMethod::AnalyzeHistory => "analyze_history",
            AnalysisMethod::GenerateRecommendations => "generate_recommendations",
            AnalysisMethod::UserInterests => "get_user_interests",
            AnalysisMethod::CategoryStats => "get_category_stats",
        }
    }
}

impl std::fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visit counts keyed by category, hour of day and day of week.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitPatterns {
    pub distribution: BTreeMap<String, u64>,
    pub time_patterns: BTreeMap<String, u64>,
    pub weekly_patterns: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryAnalysis {
    pub categories: VisitPatterns,
    pub total_visits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recommendation {
    pub url: String,
    pub title: String,
    pub category: String,
    /// Percentage, 0 to 100.
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
}

/// Normalized interest score per category; scores sum to 1.
pub type UserInterests = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryStat {
    pub category: String,
    pub visit_count: u64,
    pub unique_domains: u64,
    pub last_visit: Option<String>,
}
