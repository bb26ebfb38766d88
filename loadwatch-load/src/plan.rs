use loadwatch_client::TargetConfig;
use loadwatch_common::{LoadPhase, LoadWatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A complete load run: where to send requests and which phases to drive.
///
/// The built-in ramp used when no plan file is given:
///
/// | Phase      | Users | Duration | cpu_iterations | memory_mb | response_kb |
/// |------------|-------|----------|----------------|-----------|-------------|
/// | Baseline   |   10  |   30 s   |     100 000    |     5     |     256     |
/// | Moderate   |   50  |   30 s   |     300 000    |    10     |     512     |
/// | High       |  100  |   30 s   |     500 000    |    15     |     768     |
/// | Overload   |  200  |   60 s   |     750 000    |    20     |    1024     |
/// | Saturation |  500  |   60 s   |   1 000 000    |    25     |    1024     |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub target: TargetConfig,
    pub phases: Vec<LoadPhase>,
}

impl RunPlan {
    /// The built-in five-phase ramp against `target`.
    pub fn default_ramp(target: TargetConfig) -> Self {
        Self { target, phases: default_phases() }
    }

    /// Parse and validate a JSON plan.
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: RunPlan =
            serde_json::from_str(json).map_err(|e| LoadWatchError::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| LoadWatchError::InvalidPlan(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// At least one phase; names unique; concurrency ≥ 1; duration finite and positive.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(LoadWatchError::InvalidPlan("plan has no phases".to_string()));
        }
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name.as_str()) {
                return Err(LoadWatchError::DuplicatePhase(phase.name.clone()));
            }
            if phase.concurrency == 0 {
                return Err(LoadWatchError::InvalidPlan(format!(
                    "phase {:?} must have concurrency >= 1",
                    phase.name
                )));
            }
            if !phase.duration_secs.is_finite() || phase.duration_secs <= 0.0 {
                return Err(LoadWatchError::InvalidPlan(format!(
                    "phase {:?} must have a positive duration",
                    phase.name
                )));
            }
        }
        Ok(())
    }

    /// Sum of the phases' time budgets (the run may overrun each by up to one round).
    pub fn planned_duration_secs(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }
}

pub fn default_phases() -> Vec<LoadPhase> {
    [
        ("Baseline", 10, 30.0, 100_000u64, 5u64, 256u64),
        ("Moderate", 50, 30.0, 300_000, 10, 512),
        ("High", 100, 30.0, 500_000, 15, 768),
        ("Overload", 200, 60.0, 750_000, 20, 1024),
        ("Saturation", 500, 60.0, 1_000_000, 25, 1024),
    ]
    .into_iter()
    .map(|(name, users, secs, cpu, ram, net)| {
        LoadPhase::new(name, users, secs)
            .with_param("cpu_iterations", cpu)
            .with_param("memory_mb", ram)
            .with_param("response_kb", net)
    })
    .collect()
}
