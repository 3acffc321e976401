//! Stateful smart-plug power simulator for local development.
//!
//! Models a Tasmota-style plug with an appliance behind it:
//! - Relay state toggled by MQTT commands
//! - Scenario-dependent baseline draw with electronic noise
//! - Occasional draw spikes (compressors, loading screens)
//! - Standby draw below the hub's activity threshold
//! - Flaky mode that drops telemetry samples entirely

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Flat-screen TV: ~90 W steady draw, small noise, rare spikes.
    Tv,
    /// Games console: ~140 W with bursty spikes during loading.
    Console,
    /// Device left in standby: a few watts, never crosses the hub's
    /// activity threshold. Good for testing the no-debit path.
    Standby,
    /// TV-like draw but ~10% of telemetry samples are silently dropped.
    /// Tests the hub's staleness handling without unplugging anything.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "console" => Self::Console,
            "standby" => Self::Standby,
            "flaky" => Self::Flaky,
            _ => Self::Tv, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tv => write!(f, "tv"),
            Self::Console => write!(f, "console"),
            Self::Standby => write!(f, "standby"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

/// Stateful simulator producing realistic plug wattage readings.
pub struct PlugSim {
    relay_on: bool,

    /// Baseline draw while the appliance is running (W).
    base_watts: f64,
    /// Per-sample electronic noise sigma (W).
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_watts: f64,

    /// Probability that a telemetry sample is dropped entirely.
    drop_prob: f32,
}

impl PlugSim {
    pub fn new(scenario: Scenario) -> Self {
        let (base, noise, spike_prob, spike_watts, drop_prob) = match scenario {
            Scenario::Tv => (90.0, 4.0, 0.02_f32, 25.0, 0.0_f32),
            Scenario::Console => (140.0, 12.0, 0.15, 60.0, 0.0),
            Scenario::Standby => (8.0, 1.5, 0.0, 0.0, 0.0),
            Scenario::Flaky => (90.0, 4.0, 0.02, 25.0, 0.10),
        };
        Self {
            relay_on: false,
            base_watts: base,
            noise_sigma: noise,
            spike_prob,
            spike_watts,
            drop_prob,
        }
    }

    pub fn set_relay(&mut self, on: bool) {
        self.relay_on = on;
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    /// True when this sample should be silently dropped (flaky mode).
    pub fn should_drop_sample(&self) -> bool {
        fastrand::f32() < self.drop_prob
    }

    /// Produce the next wattage reading. A switched-off relay draws nothing.
    pub fn sample(&mut self) -> f64 {
        if !self.relay_on {
            return 0.0;
        }

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(self.spike_watts, self.spike_watts * 0.3).max(0.0)
        } else {
            0.0
        };

        (self.base_watts + noise + spike).max(0.0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
