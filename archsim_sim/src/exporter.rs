//! JSON exporter for run replays.
//!
//! Exports one frame per advancing tick so a run can be inspected or
//! replayed outside the simulator.

use archsim_core::{ComponentView, LogEntry};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    pub tick: u64,

    /// Simulation time in seconds
    pub time_sec: f64,

    pub total_score: f64,
    pub retention_rate: f64,

    /// Render-ready state of every component
    pub components: Vec<ComponentView>,

    /// Log entries written on this tick
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<LogEntry>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    pub final_retention: f64,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_retention: 1.0,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, final_retention: f64) {
        self.passed = passed;
        self.final_retention = final_retention;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
