// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for wpx-engine.
//!
//! Config is loaded from the `[wpx-engine]` section of `wpx-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./wpx-rs.toml`
//! 3. `~/.config/wpx-rs/wpx-rs.toml`
//! 4. `/etc/wpx-rs/wpx-rs.toml`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wpx_actuator::{GamepadSettings, KbmSettings};
use wpx_app::ConfigFile;
use wpx_core::actuator::ActuatorMode;
use wpx_core::nav::{EstimatorSettings, StuckSettings};

/// Top-level engine configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Actuation backends and the router
    pub actuator: ActuatorConfig,
    /// Position estimator tuning
    pub estimator: EstimatorSettings,
    /// Camera heading controller
    pub heading: HeadingConfig,
    /// Per-waypoint movement and segment retry
    pub navigation: NavigationConfig,
    /// Stuck detection
    pub stuck: StuckSettings,
    /// Blocking UI recovery
    pub anomaly: AnomalyConfig,
    /// Built-in simulated world used by the CLI
    pub simulation: SimulationConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Route file to execute when `--route` is not given
    pub route: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Backend selected at start-up.
    pub backend: ActuatorMode,
    /// Bounded wait for the router switch lock.
    pub switch_lock_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Directional stick value that holds a movement key.
    pub stick_threshold: i32,
    /// Look stick value to pointer pixels.
    pub pointer_sensitivity: f64,
    /// Left stick deflection used for walking on the gamepad.
    pub walk_deflection: i32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            backend: ActuatorMode::KeyboardMouse,
            switch_lock_timeout_ms: 5000,
            reconnect_attempts: 3,
            reconnect_delay_ms: 100,
            stick_threshold: 16384,
            pointer_sensitivity: 0.01,
            walk_deflection: 16000,
        }
    }
}

impl ActuatorConfig {
    pub fn kbm_settings(&self) -> KbmSettings {
        KbmSettings {
            stick_threshold: self.stick_threshold,
            pointer_sensitivity: self.pointer_sensitivity,
        }
    }

    pub fn gamepad_settings(&self) -> GamepadSettings {
        GamepadSettings {
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay_ms: self.reconnect_delay_ms,
            walk_deflection: self.walk_deflection,
        }
    }

    pub fn switch_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    /// Residual below which steering stops.
    pub tolerance_deg: f64,
    pub poll_interval_ms: u64,
    /// Polls before a rotation gives up and proceeds best-effort.
    pub max_attempts: u32,
    /// Residual band in which the gamepad look stick is released.
    pub gamepad_deadzone_deg: f64,
    /// Display scale applied to pointer deltas.
    pub dpi_scale: f64,
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: 0.5,
            poll_interval_ms: 50,
            max_attempts: 60,
            gamepad_deadzone_deg: 12.0,
            dpi_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Attempts per segment, including the first.
    pub retry_times: u32,
    /// Pause before a segment is retried.
    pub retry_delay_ms: u64,
    /// RetryFree restarts allowed per segment before the failure turns fatal.
    pub free_retry_limit: u32,
    pub segment_timeout_secs: u64,
    pub tick_interval_ms: u64,
    /// Movement tick while flying.
    pub fly_tick_interval_ms: u64,
    pub arrive_distance: f64,
    /// Distances beyond this are implausible for the current waypoint.
    pub far_distance: f64,
    pub far_budget: u32,
    /// Every Nth too-far tick runs anomaly recovery and re-seeds the estimator.
    pub far_recovery_every: u32,
    pub reorient_after_ticks: u32,
    pub reorient_threshold_deg: f64,
    pub reorient_streak: u32,
    pub sprint_distance: f64,
    pub dash_cooldown_ms: u64,
    pub auto_run_cooldown_ms: u64,
    /// Delay after a jump before movement resumes.
    pub jump_settle_ms: u64,
    /// Hold sprint in `run` mode and tap it in `walk` mode past `sprint_distance`.
    pub auto_run: bool,
    /// Poll interval while a too-far reading persists.
    pub far_tick_ms: u64,
    pub far_settle_ms: u64,
    /// Camera turn of a stuck escape, alternating sides.
    pub escape_turn_deg: f64,
    pub escape_move_ms: u64,
    pub close_steps: u32,
    pub close_pulse_ms: u64,
    pub close_step_interval_ms: u64,
    pub close_settle_ms: u64,
    /// Consecutive ticks without a usable fix before a free retry.
    pub sensor_loss_budget: u32,
    /// Tolerance for the initial rotation towards a waypoint.
    pub orient_max_diff: f64,
    /// Tolerance for the re-orientation retrigger.
    pub fine_max_diff: f64,
    pub teleport_delay_ms: u64,
    pub teleport_settle_ms: u64,
    /// Pause after an orientation-only waypoint.
    pub face_settle_ms: u64,
    /// Pause after a waypoint's action handler.
    pub action_settle_ms: u64,
    /// Upper bound on agent speed, units per second. Widens the estimator's
    /// jump radius for long gaps between reads.
    pub max_speed: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            retry_times: 2,
            retry_delay_ms: 1000,
            free_retry_limit: 5,
            segment_timeout_secs: 240,
            tick_interval_ms: 100,
            fly_tick_interval_ms: 100,
            arrive_distance: 2.0,
            far_distance: 500.0,
            far_budget: 50,
            far_recovery_every: 10,
            reorient_after_ticks: 20,
            reorient_threshold_deg: 5.0,
            reorient_streak: 10,
            sprint_distance: 20.0,
            dash_cooldown_ms: 1000,
            auto_run_cooldown_ms: 2500,
            jump_settle_ms: 200,
            auto_run: true,
            far_tick_ms: 50,
            far_settle_ms: 500,
            escape_turn_deg: 90.0,
            escape_move_ms: 1000,
            close_steps: 25,
            close_pulse_ms: 60,
            close_step_interval_ms: 20,
            close_settle_ms: 1000,
            sensor_loss_budget: 50,
            orient_max_diff: 5.0,
            fine_max_diff: 2.0,
            teleport_delay_ms: 1000,
            teleport_settle_ms: 500,
            face_settle_ms: 500,
            action_settle_ms: 1000,
            max_speed: 10.0,
        }
    }
}

impl NavigationConfig {
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Skip dialogues automatically while recovering.
    pub auto_skip: bool,
    /// Wait after dismissing a closable page.
    pub dismiss_delay_ms: u64,
    pub auto_skip_poll_ms: u64,
    /// Consecutive dialogue-free frames that end the auto-skip.
    pub auto_skip_idle_frames: u32,
    pub auto_skip_max_iterations: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            auto_skip: true,
            dismiss_delay_ms: 1000,
            auto_skip_poll_ms: 210,
            auto_skip_idle_frames: 10,
            auto_skip_max_iterations: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub start_x: f64,
    pub start_y: f64,
    pub start_heading: f64,
    /// Units per second while walking.
    pub walk_speed: f64,
    /// Units per second while sprint is held.
    pub sprint_speed: f64,
    /// Heading change per pointer pixel.
    pub degrees_per_pixel: f64,
    /// Heading change per second at full look stick deflection.
    pub stick_turn_rate: f64,
    /// Report no position on every Nth capture; 0 disables dropouts.
    pub dropout_every: u64,
    /// The agent never moves, e.g. to exercise stuck handling.
    pub frozen: bool,
    /// Whether a virtual pad driver is present.
    pub pad_bus_available: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_x: 100.0,
            start_y: 100.0,
            start_heading: 0.0,
            walk_speed: 4.0,
            sprint_speed: 7.0,
            degrees_per_pixel: 0.2,
            stick_turn_rate: 180.0,
            dropout_every: 0,
            frozen: false,
            pad_bus_available: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.actuator.switch_lock_timeout_ms == 0 {
            return Err("[actuator].switch_lock_timeout_ms must be > 0".to_string());
        }
        if self.actuator.stick_threshold <= 0 {
            return Err("[actuator].stick_threshold must be > 0".to_string());
        }
        if !(1..=32767).contains(&self.actuator.walk_deflection) {
            return Err("[actuator].walk_deflection must be in range 1..=32767".to_string());
        }

        if self.estimator.stable_count == 0 {
            return Err("[estimator].stable_count must be > 0".to_string());
        }
        if self.estimator.stable_distance <= 0.0 {
            return Err("[estimator].stable_distance must be > 0".to_string());
        }
        if self.estimator.large_jump <= self.estimator.stable_distance {
            return Err("[estimator].large_jump must be > stable_distance".to_string());
        }

        if self.heading.tolerance_deg <= 0.0 {
            return Err("[heading].tolerance_deg must be > 0".to_string());
        }
        if self.heading.poll_interval_ms == 0 {
            return Err("[heading].poll_interval_ms must be > 0".to_string());
        }
        if self.heading.dpi_scale <= 0.0 {
            return Err("[heading].dpi_scale must be > 0".to_string());
        }

        let nav = &self.navigation;
        if nav.retry_times == 0 {
            return Err("[navigation].retry_times must be > 0".to_string());
        }
        if nav.segment_timeout_secs == 0 {
            return Err("[navigation].segment_timeout_secs must be > 0".to_string());
        }
        if nav.tick_interval_ms == 0 || nav.fly_tick_interval_ms == 0 {
            return Err("[navigation].tick_interval_ms must be > 0".to_string());
        }
        if nav.arrive_distance <= 0.0 {
            return Err("[navigation].arrive_distance must be > 0".to_string());
        }
        if nav.far_distance <= nav.arrive_distance {
            return Err("[navigation].far_distance must be > arrive_distance".to_string());
        }
        if nav.far_recovery_every == 0 {
            return Err("[navigation].far_recovery_every must be > 0".to_string());
        }
        if nav.sensor_loss_budget == 0 {
            return Err("[navigation].sensor_loss_budget must be > 0".to_string());
        }

        if self.stuck.window < 2 {
            return Err("[stuck].window must be >= 2".to_string());
        }
        if self.stuck.budget == 0 {
            return Err("[stuck].budget must be > 0".to_string());
        }

        if self.anomaly.auto_skip_poll_ms == 0 {
            return Err("[anomaly].auto_skip_poll_ms must be > 0".to_string());
        }

        if self.simulation.walk_speed <= 0.0 || self.simulation.sprint_speed <= 0.0 {
            return Err("[simulation] speeds must be > 0".to_string());
        }

        Ok(())
    }

    /// Generate an example configuration wrapped under the `[wpx-engine]`
    /// section header, suitable for use in a combined `wpx-rs.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "wpx-engine")]
            inner: EngineConfig,
        }
        let example = EngineConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                route: Some(PathBuf::from("routes/sample.json")),
            },
            ..EngineConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for EngineConfig {
    fn section_key() -> &'static str {
        "wpx-engine"
    }
}
