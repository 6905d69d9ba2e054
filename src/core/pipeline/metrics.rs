//! Pipeline latency accounting
//!
//! Records per-stage durations for every utterance and aggregates them
//! into a bottleneck report. Observability only: the budget classifies
//! severity in the report, it does not cancel work that overruns.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Pipeline stages that get individually timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    AiResponse,
    Synthesis,
    Total,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::AiResponse => "ai_response",
            Stage::Synthesis => "synthesis",
            Stage::Total => "total",
        }
    }

    /// Rough share of the end-to-end budget a healthy stage should use.
    fn budget_share(&self) -> f64 {
        match self {
            Stage::Transcription => 0.3,
            Stage::AiResponse => 0.4,
            Stage::Synthesis => 0.3,
            Stage::Total => 1.0,
        }
    }
}

/// Severity of a stage's average latency against its budget share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageSeverity {
    Ok,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, Copy, Default)]
struct StageAccumulator {
    count: u64,
    total_ms: u64,
    max_ms: u64,
    min_ms: u64,
}

impl StageAccumulator {
    fn record(&mut self, ms: u64) {
        if self.count == 0 {
            self.min_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
        }
        self.count += 1;
        self.total_ms += ms;
        self.max_ms = self.max_ms.max(ms);
    }
}

/// One stage's aggregate in the bottleneck report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
    pub min_ms: u64,
    pub severity: StageSeverity,
}

/// Full latency report exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    pub budget_ms: u64,
    pub stages: Vec<StageReport>,
}

/// Thread-safe latency recorder shared by all pipeline invocations.
pub struct PipelineMetrics {
    stages: Mutex<HashMap<Stage, StageAccumulator>>,
    budget_ms: u64,
}

impl PipelineMetrics {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            stages: Mutex::new(HashMap::new()),
            budget_ms,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn record(&self, stage: Stage, duration: Duration) {
        let ms = duration.as_millis().min(u128::from(u64::MAX)) as u64;
        self.stages.lock().entry(stage).or_default().record(ms);
    }

    fn classify(&self, stage: Stage, avg_ms: u64) -> StageSeverity {
        let allowance = (self.budget_ms as f64 * stage.budget_share()) as u64;
        if avg_ms <= allowance / 2 {
            StageSeverity::Ok
        } else if avg_ms <= allowance {
            StageSeverity::Elevated
        } else {
            StageSeverity::Critical
        }
    }

    /// Aggregate everything recorded so far, worst stage first.
    pub fn report(&self) -> LatencyReport {
        let stages = self.stages.lock();
        let mut reports: Vec<StageReport> = stages
            .iter()
            .map(|(stage, acc)| {
                let avg_ms = if acc.count == 0 { 0 } else { acc.total_ms / acc.count };
                StageReport {
                    stage: *stage,
                    count: acc.count,
                    avg_ms,
                    max_ms: acc.max_ms,
                    min_ms: acc.min_ms,
                    severity: self.classify(*stage, avg_ms),
                }
            })
            .collect();
        reports.sort_by(|a, b| b.avg_ms.cmp(&a.avg_ms));
        LatencyReport {
            budget_ms: self.budget_ms,
            stages: reports,
        }
    }
}
