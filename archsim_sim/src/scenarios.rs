//! Traffic scenarios for the reference oracle.
//!
//! A scenario is a goal plus an ordered list of traffic phases. Offered load
//! ramps linearly from a phase's start QPS to its end QPS over the phase's
//! duration; past the last phase the final end QPS holds.

use archsim_env::{ScenarioGoal, ScenarioSummary};
use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioId {
    /// s1: URL shortener growing from 100 to 10k QPS
    TinyUrl,

    /// s2: Read-heavy spike when a sale opens
    FlashSale,

    /// s3: Malicious traffic flood followed by packet loss
    DdosSiege,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::TinyUrl, ScenarioId::FlashSale, ScenarioId::DdosSiege]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::TinyUrl => "tinyurl",
            ScenarioId::FlashSale => "flash_sale",
            ScenarioId::DdosSiege => "ddos_siege",
        }
    }

    /// Returns the id the oracle knows the scenario by.
    pub fn wire_id(&self) -> &'static str {
        match self {
            ScenarioId::TinyUrl => "s1",
            ScenarioId::FlashSale => "s2",
            ScenarioId::DdosSiege => "s3",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::TinyUrl => {
                "URL shortener handling 10k QPS, growing exponentially from 100"
            }
            ScenarioId::FlashSale => "Sale opens: 500 to 8k QPS in five seconds with bursts",
            ScenarioId::DdosSiege => "Steady 1k QPS under a 4k QPS attack, then random drops",
        }
    }

    /// Full definition (goal and phases).
    pub fn scenario(&self) -> Scenario {
        match self {
            ScenarioId::TinyUrl => Scenario {
                id: *self,
                title: "TinyURL".to_string(),
                goal: Goal {
                    min_qps: 10_000.0,
                    max_latency_ms: 200.0,
                    availability: 99.9,
                    duration: 60,
                },
                read_ratio: 0.9,
                phases: vec![
                    TrafficPhase::ramp("Initial Launch", 100.0, 1_000.0, 10),
                    TrafficPhase::ramp("Going Viral", 1_000.0, 5_000.0, 10),
                    TrafficPhase::ramp("Peak Traffic", 5_000.0, 10_000.0, 10),
                ],
            },
            ScenarioId::FlashSale => Scenario {
                id: *self,
                title: "Flash Sale".to_string(),
                goal: Goal {
                    min_qps: 8_000.0,
                    max_latency_ms: 300.0,
                    availability: 99.0,
                    duration: 40,
                },
                read_ratio: 0.7,
                phases: vec![
                    TrafficPhase::ramp("Warm-up", 500.0, 500.0, 10),
                    TrafficPhase::ramp("Doors Open", 500.0, 8_000.0, 5).with_burst(1.2),
                    TrafficPhase::ramp("Shopping Frenzy", 8_000.0, 8_000.0, 15),
                    TrafficPhase::ramp("Cooldown", 8_000.0, 2_000.0, 10),
                ],
            },
            ScenarioId::DdosSiege => Scenario {
                id: *self,
                title: "DDoS Siege".to_string(),
                goal: Goal {
                    min_qps: 1_000.0,
                    max_latency_ms: 250.0,
                    availability: 99.0,
                    duration: 40,
                },
                read_ratio: 0.8,
                phases: vec![
                    TrafficPhase::ramp("Business as Usual", 1_000.0, 1_000.0, 10),
                    TrafficPhase::ramp("Siege", 1_000.0, 1_000.0, 15).with_attack(4_000.0),
                    TrafficPhase::ramp("Aftermath", 1_000.0, 1_000.0, 15).with_random_drop(0.02),
                ],
            },
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tinyurl" | "tiny_url" | "s1" => Ok(ScenarioId::TinyUrl),
            "flash_sale" | "flashsale" | "s2" => Ok(ScenarioId::FlashSale),
            "ddos_siege" | "ddos" | "s3" => Ok(ScenarioId::DdosSiege),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// What a design has to sustain to pass a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub min_qps: f64,
    pub max_latency_ms: f64,

    /// Percentage of offered requests that must be fulfilled
    pub availability: f64,

    /// Seconds the run lasts
    pub duration: u64,
}

/// One stretch of the traffic curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficPhase {
    pub name: String,
    pub start_qps: f64,
    pub end_qps: f64,
    pub duration_seconds: u64,

    /// Multiplier on legitimate traffic while the phase is active (1.0 = none)
    pub burst_factor: f64,

    /// Malicious QPS injected at every traffic source
    pub attack_qps: f64,

    /// Upper bound of the per-tick random drop ratio
    pub random_drop: f64,
}

impl TrafficPhase {
    /// A plain linear ramp.
    pub fn ramp(name: &str, start_qps: f64, end_qps: f64, duration_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            start_qps,
            end_qps,
            duration_seconds,
            burst_factor: 1.0,
            attack_qps: 0.0,
            random_drop: 0.0,
        }
    }

    pub fn with_burst(mut self, factor: f64) -> Self {
        self.burst_factor = factor;
        self
    }

    pub fn with_attack(mut self, qps: f64) -> Self {
        self.attack_qps = qps;
        self
    }

    pub fn with_random_drop(mut self, max_ratio: f64) -> Self {
        self.random_drop = max_ratio;
        self
    }
}

/// A scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub title: String,
    pub goal: Goal,

    /// Fraction of legitimate traffic that is reads
    pub read_ratio: f64,

    pub phases: Vec<TrafficPhase>,
}

impl Scenario {
    /// The phase active `elapsed` seconds in, and the QPS it offers.
    ///
    /// Past the last phase, the last phase holds at its end QPS.
    pub fn traffic_at(&self, elapsed: u64) -> Option<(&TrafficPhase, f64)> {
        let mut remaining = elapsed;
        for phase in &self.phases {
            if remaining < phase.duration_seconds {
                let progress = remaining as f64 / phase.duration_seconds as f64;
                let qps = phase.start_qps + (phase.end_qps - phase.start_qps) * progress;
                return Some((phase, qps));
            }
            remaining -= phase.duration_seconds;
        }
        self.phases.last().map(|last| (last, last.end_qps))
    }

    /// Total length of all phases in seconds.
    pub fn ramp_seconds(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_seconds).sum()
    }

    /// Summary in the oracle's `list_scenarios` shape.
    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.wire_id().to_string(),
            title: self.title.clone(),
            description: self.id.description().to_string(),
            goal: ScenarioGoal {
                min_qps: self.goal.min_qps,
                max_latency_ms: self.goal.max_latency_ms,
                availability: self.goal.availability,
                duration: self.goal.duration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_tinyurl_ramp() {
        let s = ScenarioId::TinyUrl.scenario();

        assert_eq!(s.traffic_at(0).unwrap().1, 100.0);
        assert_relative_eq!(s.traffic_at(5).unwrap().1, 550.0);
        assert_eq!(s.traffic_at(10).unwrap().1, 1_000.0);
        assert_eq!(s.traffic_at(15).unwrap().0.name, "Going Viral");
        assert_eq!(s.traffic_at(30).unwrap().1, 10_000.0);
        assert_eq!(s.traffic_at(500).unwrap().1, 10_000.0);
        assert_eq!(s.ramp_seconds(), 30);
    }

    #[test]
    fn test_phase_flags() {
        let siege = ScenarioId::DdosSiege.scenario();
        assert_eq!(siege.traffic_at(12).unwrap().0.attack_qps, 4_000.0);
        assert_eq!(siege.traffic_at(30).unwrap().0.random_drop, 0.02);

        let sale = ScenarioId::FlashSale.scenario();
        assert_eq!(sale.traffic_at(11).unwrap().0.burst_factor, 1.2);
    }

    #[test]
    fn test_scenario_parse() {
        assert_eq!("s1".parse::<ScenarioId>().unwrap(), ScenarioId::TinyUrl);
        assert_eq!("Flash_Sale".parse::<ScenarioId>().unwrap(), ScenarioId::FlashSale);
        assert!("nope".parse::<ScenarioId>().is_err());

        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert_eq!(id.wire_id().parse::<ScenarioId>().unwrap(), id);
        }
    }

    #[test]
    fn test_summary_shape() {
        let summary = ScenarioId::TinyUrl.scenario().summary();
        assert_eq!(summary.id, "s1");
        assert_eq!(summary.goal.min_qps, 10_000.0);
        assert_eq!(summary.goal.duration, 60);
    }

    proptest! {
        #[test]
        fn prop_traffic_stays_between_phase_bounds(elapsed in 0u64..200) {
            for id in ScenarioId::all() {
                let s = id.scenario();
                let (phase, qps) = s.traffic_at(elapsed).unwrap();
                let lo = phase.start_qps.min(phase.end_qps);
                let hi = phase.start_qps.max(phase.end_qps);
                prop_assert!(qps >= lo - 1e-9 && qps <= hi + 1e-9);
            }
        }
    }
}
