use crate::error::{BridgeError, BridgeResult};
use crate::types::{AnalysisMethod, CategoryStat, HistoryAnalysis, Recommendation, UserInterests};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of an analysis call as seen by callers that must keep going.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome<T> {
    Ready(T),
    /// The script could not produce a document; `fallback` is the empty
    /// document for the method.
    Unavailable { reason: String, fallback: T },
}

impl<T> AnalysisOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, AnalysisOutcome::Ready(_))
    }

    /// The document, or the fallback when unavailable.
    pub fn into_value(self) -> T {
        match self {
            AnalysisOutcome::Ready(value) => value,
            AnalysisOutcome::Unavailable { fallback, .. } => fallback,
        }
    }
}

/// Runs `<interpreter> <script> <method>` once per call and parses the
/// single JSON document it prints on stdout.
#[derive(Debug, Clone)]
pub struct AnalysisBridge {
    interpreter: PathBuf,
    script: PathBuf,
    working_dir: Option<PathBuf>,
}

impl AnalysisBridge {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            working_dir: None,
        }
    }

    /// Runs the script from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Calls `method` and deserializes its output strictly.
    pub async fn call<T: DeserializeOwned>(&self, method: &str) -> BridgeResult<T> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .arg(method)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(script = %self.script.display(), method, "Running analysis script");
        let output = cmd.output().await.map_err(|source| BridgeError::Spawn {
            program: self.interpreter.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(BridgeError::Exit {
                method: method.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| BridgeError::Malformed {
            method: method.to_string(),
            source,
        })
    }

    /// Like [`call`](Self::call), but any failure becomes
    /// [`AnalysisOutcome::Unavailable`] carrying `T::default()`.
    pub async fn run<T: DeserializeOwned + Default>(&self, method: &str) -> AnalysisOutcome<T> {
        match self.call(method).await {
            Ok(value) => AnalysisOutcome::Ready(value),
            Err(e) => {
                warn!(method, error = %e, "Analysis unavailable, using fallback");
                AnalysisOutcome::Unavailable {
                    reason: e.to_string(),
                    fallback: T::default(),
                }
            }
        }
    }

    pub async fn analyze_history(&self) -> AnalysisOutcome<HistoryAnalysis> {
        self.run(AnalysisMethod::AnalyzeHistory.as_str()).await
    }

    pub async fn generate_recommendations(&self) -> AnalysisOutcome<Vec<Recommendation>> {
        self.run(AnalysisMethod::GenerateRecommendations.as_str())
            .await
    }

    pub async fn user_interests(&self) -> AnalysisOutcome<UserInterests> {
        self.run(AnalysisMethod::UserInterests.as_str()).await
    }

    pub async fn category_stats(&self) -> AnalysisOutcome<Vec<CategoryStat>> {
        self.run(AnalysisMethod::CategoryStats.as_str()).await
    }
}
