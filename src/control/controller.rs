// src/control/controller.rs

use crate::error::{NeurostimError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControllerKind {
    Zero,
    #[default]
    Pid,
    Ift,
    Open,
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerKind::Zero => "ZERO",
            ControllerKind::Pid => "PID",
            ControllerKind::Ift => "IFT",
            ControllerKind::Open => "OPEN",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub kind: ControllerKind,
    /// Controller call period in seconds.
    pub sampling_time: f64,
    /// Biomarker window in ms.
    pub window_length: f64,
    /// Filter transient dropped from the window, in ms.
    pub window_tail_length: f64,
    pub setpoint: f64,
    pub kp: f64,
    /// Integral time constant in seconds, 0 disables the integral term.
    pub ti: f64,
    /// Derivative time constant in seconds.
    pub td: f64,
    pub min_value: f64,
    pub max_value: f64,
    /// Output of the OPEN policy.
    pub constant_value: f64,
    /// Controller calls per IFT tuning stage.
    pub stage_length: usize,
    /// IFT step size.
    pub gamma: f64,
    /// IFT weight of the control effort in the stage cost.
    pub lambda: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::Pid,
            sampling_time: 0.02,
            window_length: 2000.0,
            window_tail_length: 100.0,
            setpoint: 1.0414e-4,
            kp: 5.0,
            ti: 0.2,
            td: 0.0,
            min_value: 0.0,
            max_value: 3.0,
            constant_value: 1.5,
            stage_length: 25,
            gamma: 0.01,
            lambda: 0.1,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_time > 0.0) {
            return Err(NeurostimError::InvalidSchedule(format!(
                "controller sampling time must be positive, got {} s",
                self.sampling_time
            )));
        }
        if !(self.window_length > 0.0) {
            return Err(NeurostimError::InvalidSchedule(format!(
                "controller window must be positive, got {} ms",
                self.window_length
            )));
        }
        if self.window_tail_length < 0.0 {
            return Err(NeurostimError::InvalidConfig(format!(
                "controller window tail can't be negative, got {} ms",
                self.window_tail_length
            )));
        }
        if !(self.min_value <= self.max_value) {
            return Err(NeurostimError::InvalidConfig(format!(
                "controller output range [{}, {}] is empty",
                self.min_value, self.max_value
            )));
        }
        if self.kp < 0.0 || self.ti < 0.0 || self.td < 0.0 {
            return Err(NeurostimError::InvalidConfig(
                "controller gains must be non-negative".to_string(),
            ));
        }
        if self.kind == ControllerKind::Ift && self.stage_length == 0 {
            return Err(NeurostimError::InvalidConfig(
                "IFT stage length must be at least one call".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-call records kept by every controller. The optional series are
/// only filled by policies that have such state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerHistory {
    pub state: Vec<f64>,
    pub error: Vec<f64>,
    pub output: Vec<f64>,
    pub sample_times: Vec<f64>,
    pub reference: Option<Vec<f64>>,
    pub iteration: Option<Vec<f64>>,
    pub parameters: Option<Vec<Vec<f64>>>,
    pub integral_term: Option<Vec<f64>>,
}

impl ControllerHistory {
    fn record(&mut self, state: f64, error: f64, output: f64, time: f64) {
        self.state.push(state);
        self.error.push(error);
        self.output.push(output);
        self.sample_times.push(time);
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

pub trait ControllerInstance: Send {
    fn kind(&self) -> ControllerKind;
    /// Takes the latest biomarker and the simulation time (ms), returns the
    /// stimulation command for the modulated quantity.
    fn update(&mut self, state_value: f64, current_time: f64) -> f64;
    fn history(&self) -> &ControllerHistory;
}

fn normalised_error(state_value: f64, setpoint: f64) -> f64 {
    if setpoint != 0.0 {
        (state_value - setpoint) / setpoint
    } else {
        state_value
    }
}

/// Always returns zero; used for unstimulated reference runs.
#[derive(Debug, Clone)]
pub struct ZeroController {
    setpoint: f64,
    history: ControllerHistory,
}

impl ZeroController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            setpoint: config.setpoint,
            history: ControllerHistory::default(),
        }
    }
}

impl ControllerInstance for ZeroController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Zero
    }

    fn update(&mut self, state_value: f64, current_time: f64) -> f64 {
        let error = normalised_error(state_value, self.setpoint);
        self.history.record(state_value, error, 0.0, current_time);
        0.0
    }

    fn history(&self) -> &ControllerHistory {
        &self.history
    }
}

/// Open loop: a fixed command whatever the biomarker.
#[derive(Debug, Clone)]
pub struct ConstantController {
    setpoint: f64,
    value: f64,
    min_value: f64,
    max_value: f64,
    history: ControllerHistory,
}

impl ConstantController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            setpoint: config.setpoint,
            value: config.constant_value.clamp(config.min_value, config.max_value),
            min_value: config.min_value,
            max_value: config.max_value,
            history: ControllerHistory::default(),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Changes the command issued from the next call on, within the
    /// configured output range.
    pub fn set_value(&mut self, value: f64) {
        self.value = value.clamp(self.min_value, self.max_value);
    }
}

impl ControllerInstance for ConstantController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Open
    }

    fn update(&mut self, state_value: f64, current_time: f64) -> f64 {
        let error = normalised_error(state_value, self.setpoint);
        self.history
            .record(state_value, error, self.value, current_time);
        self.value
    }

    fn history(&self) -> &ControllerHistory {
        &self.history
    }
}

/// Positional PID on the setpoint-normalised error. The integral is frozen
/// while the output is saturated.
#[derive(Debug, Clone)]
pub struct PidController {
    setpoint: f64,
    kp: f64,
    ti: f64,
    td: f64,
    ts: f64,
    min_value: f64,
    max_value: f64,
    integral: f64,
    last_error: Option<f64>,
    history: ControllerHistory,
}

impl PidController {
    pub fn new(config: &ControllerConfig) -> Self {
        let history = ControllerHistory {
            integral_term: Some(Vec::new()),
            ..ControllerHistory::default()
        };
        Self {
            setpoint: config.setpoint,
            kp: config.kp,
            ti: config.ti,
            td: config.td,
            ts: config.sampling_time,
            min_value: config.min_value,
            max_value: config.max_value,
            integral: 0.0,
            last_error: None,
            history,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

impl ControllerInstance for PidController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Pid
    }

    fn update(&mut self, state_value: f64, current_time: f64) -> f64 {
        let error = normalised_error(state_value, self.setpoint);

        let candidate_integral = self.integral + error * self.ts;
        let integral_term = if self.ti > 0.0 {
            candidate_integral / self.ti
        } else {
            0.0
        };
        let derivative_term = match self.last_error {
            Some(previous) => self.td * (error - previous) / self.ts,
            None => 0.0,
        };

        let raw = self.kp * (error + integral_term + derivative_term);
        let output = raw.clamp(self.min_value, self.max_value);

        // anti-windup: only integrate while the output is unsaturated, or
        // when the error drives it back into range
        let saturated_high = raw > self.max_value && error > 0.0;
        let saturated_low = raw < self.min_value && error < 0.0;
        if !(saturated_high || saturated_low) {
            self.integral = candidate_integral;
        }
        self.last_error = Some(error);

        self.history.record(state_value, error, output, current_time);
        if let Some(terms) = self.history.integral_term.as_mut() {
            terms.push(self.integral);
        }
        output
    }

    fn history(&self) -> &ControllerHistory {
        &self.history
    }
}

/// PI controller whose gains are re-tuned from the cost of each stage.
///
/// The stage cost is `mean(e²) + λ·mean(u²)`. After every stage the
/// gradient of the cost with respect to each gain is estimated by a finite
/// difference against the previous stage and the gain takes a step of
/// `-γ·gradient`. A gain that did not move between stages is perturbed by
/// `γ` relative instead, so the next stage yields a difference to work with.
#[derive(Debug, Clone)]
pub struct IftController {
    setpoint: f64,
    ts: f64,
    min_value: f64,
    max_value: f64,
    gamma: f64,
    lambda: f64,
    stage_length: usize,
    /// `[kp, ki]`
    gains: [f64; 2],
    integral: f64,
    stage: usize,
    stage_calls: usize,
    stage_error_sq: f64,
    stage_effort_sq: f64,
    previous_stage: Option<(f64, [f64; 2])>,
    history: ControllerHistory,
}

impl IftController {
    pub fn new(config: &ControllerConfig) -> Self {
        let ki = if config.ti > 0.0 {
            config.kp / config.ti
        } else {
            0.0
        };
        let history = ControllerHistory {
            reference: Some(Vec::new()),
            iteration: Some(Vec::new()),
            parameters: Some(Vec::new()),
            integral_term: Some(Vec::new()),
            ..ControllerHistory::default()
        };
        Self {
            setpoint: config.setpoint,
            ts: config.sampling_time,
            min_value: config.min_value,
            max_value: config.max_value,
            gamma: config.gamma,
            lambda: config.lambda,
            stage_length: config.stage_length.max(1),
            gains: [config.kp, ki],
            integral: 0.0,
            stage: 0,
            stage_calls: 0,
            stage_error_sq: 0.0,
            stage_effort_sq: 0.0,
            previous_stage: None,
            history,
        }
    }

    pub fn gains(&self) -> [f64; 2] {
        self.gains
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    fn finish_stage(&mut self) {
        let calls = self.stage_calls as f64;
        let cost = self.stage_error_sq / calls + self.lambda * self.stage_effort_sq / calls;
        let current = self.gains;

        let mut next = current;
        for i in 0..2 {
            let step = match self.previous_stage {
                Some((previous_cost, previous_gains))
                    if (current[i] - previous_gains[i]).abs() > f64::EPSILON =>
                {
                    let gradient = (cost - previous_cost) / (current[i] - previous_gains[i]);
                    -self.gamma * gradient
                }
                _ => self.gamma * current[i].abs().max(self.gamma),
            };
            next[i] = (current[i] + step).max(0.0);
        }

        self.previous_stage = Some((cost, current));
        self.gains = next;
        self.stage += 1;
        self.stage_calls = 0;
        self.stage_error_sq = 0.0;
        self.stage_effort_sq = 0.0;
    }
}

impl ControllerInstance for IftController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Ift
    }

    fn update(&mut self, state_value: f64, current_time: f64) -> f64 {
        let error = normalised_error(state_value, self.setpoint);
        let [kp, ki] = self.gains;

        let candidate_integral = self.integral + error * self.ts;
        let raw = kp * error + ki * candidate_integral;
        let output = raw.clamp(self.min_value, self.max_value);
        if raw == output {
            self.integral = candidate_integral;
        }

        self.history.record(state_value, error, output, current_time);
        if let Some(reference) = self.history.reference.as_mut() {
            reference.push(self.setpoint);
        }
        if let Some(iteration) = self.history.iteration.as_mut() {
            iteration.push(self.stage as f64);
        }
        if let Some(parameters) = self.history.parameters.as_mut() {
            parameters.push(self.gains.to_vec());
        }
        if let Some(terms) = self.history.integral_term.as_mut() {
            terms.push(self.integral);
        }

        self.stage_calls += 1;
        self.stage_error_sq += error * error;
        self.stage_effort_sq += output * output;
        if self.stage_calls >= self.stage_length {
            self.finish_stage();
        }

        output
    }

    fn history(&self) -> &ControllerHistory {
        &self.history
    }
}

/// The control policy, chosen once from configuration.
#[derive(Debug, Clone)]
pub enum Controller {
    Zero(ZeroController),
    Pid(PidController),
    Ift(IftController),
    Open(ConstantController),
}

impl Controller {
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.kind {
            ControllerKind::Zero => Controller::Zero(ZeroController::new(config)),
            ControllerKind::Pid => Controller::Pid(PidController::new(config)),
            ControllerKind::Ift => Controller::Ift(IftController::new(config)),
            ControllerKind::Open => Controller::Open(ConstantController::new(config)),
        })
    }

    fn inner(&self) -> &dyn ControllerInstance {
        match self {
            Controller::Zero(c) => c,
            Controller::Pid(c) => c,
            Controller::Ift(c) => c,
            Controller::Open(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ControllerInstance {
        match self {
            Controller::Zero(c) => c,
            Controller::Pid(c) => c,
            Controller::Ift(c) => c,
            Controller::Open(c) => c,
        }
    }
}

impl ControllerInstance for Controller {
    fn kind(&self) -> ControllerKind {
        self.inner().kind()
    }

    fn update(&mut self, state_value: f64, current_time: f64) -> f64 {
        self.inner_mut().update(state_value, current_time)
    }

    fn history(&self) -> &ControllerHistory {
        self.inner().history()
    }
}
