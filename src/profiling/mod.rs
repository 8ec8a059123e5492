//! Trial/step profiler for benchmarking kernel runs.
//!
//! A [`Profiler`] records a sequence of [`Trial`]s, each split into
//! [`Step`]s by a strict state machine, then averages them with the first
//! (cold) trial excluded and reports means with sample standard deviations.
//!
//! # Quick Start
//!
//! ```rust
//! use kernel_rt::profiling::{Attribute, Profiler};
//!
//! let mut profiler = Profiler::new("sort_u32_1M");
//! for _ in 0..5 {
//!     profiler.start_trial()?;
//!     profiler.set_step_name("upload")?;
//!     // ... copy input ...
//!     profiler.next_step()?;
//!     profiler.set_step_name("sort")?;
//!     profiler.set(Attribute::Memory, 8.0 * 1_048_576.0)?;
//!     // ... run kernel ...
//!     profiler.stop_trial()?;
//! }
//! profiler.end()?;
//!
//! let mut summary = Vec::new();
//! profiler.write_sum(&mut summary)?;
//! # Ok::<(), kernel_rt::error::ProfileError>(())
//! ```

pub mod attributes;
pub mod report;
pub mod timer;
pub mod trial;

pub use attributes::{Attribute, AttributeTable};
pub use report::ProfileReport;
pub use timer::{Clock, ManualClock, MonotonicClock};
pub use trial::{Step, Trial};

use std::io::Write;

use crate::error::{ProfileError, ProfileResult};

/// Trials skipped by averaging unless changed with [`Profiler::throw_away`].
pub const DEFAULT_THROW_AWAY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InTrial,
    Ended,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InTrial => "in a trial",
            Self::Ended => "ended",
        }
    }
}

/// Records trials and computes cross-trial statistics. Single-threaded.
pub struct Profiler {
    name: String,
    trials: Vec<Trial>,
    average: Option<Trial>,
    throw_away: usize,
    clock: Box<dyn Clock>,
    state: State,
}

impl Profiler {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, MonotonicClock::new())
    }

    /// Profiler reading timestamps from `clock`.
    pub fn with_clock(name: impl Into<String>, clock: impl Clock + 'static) -> Self {
        Self {
            name: name.into(),
            trials: Vec::new(),
            average: None,
            throw_away: DEFAULT_THROW_AWAY,
            clock: Box::new(clock),
            state: State::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of leading (cold) trials left out of averaging.
    ///
    /// At least one trial is always averaged, whatever `n` is.
    pub fn throw_away(&mut self, n: usize) -> &mut Self {
        self.throw_away = n;
        self
    }

    // ── state machine ───────────────────────────────────────────────

    /// Open a new trial and its first step.
    pub fn start_trial(&mut self) -> ProfileResult<()> {
        self.expect_state(State::Idle, "start_trial")?;
        let now = self.now();
        let mut trial = Trial::new(self.trials.len());
        trial.push_step().set(Attribute::StartTime, now);
        self.trials.push(trial);
        self.state = State::InTrial;
        Ok(())
    }

    /// Close the current step and open the next one at the same instant.
    /// Returns the new step's index.
    pub fn next_step(&mut self) -> ProfileResult<usize> {
        self.expect_state(State::InTrial, "next_step")?;
        let now = self.now();
        let trial = self.current_trial_mut()?;
        if let Some(step) = trial.last_step_mut() {
            step.set(Attribute::StopTime, now);
        }
        trial.push_step().set(Attribute::StartTime, now);
        Ok(trial.num_steps() - 1)
    }

    /// Close the last step and the trial, then aggregate it.
    pub fn stop_trial(&mut self) -> ProfileResult<()> {
        self.expect_state(State::InTrial, "stop_trial")?;
        let now = self.now();
        let trial = self.current_trial_mut()?;
        if let Some(step) = trial.last_step_mut() {
            step.set(Attribute::StopTime, now);
        }
        trial.finalize();
        log::debug!(
            "Trial {} finished: {} steps, {} ns",
            trial.serial(),
            trial.num_steps(),
            trial.get(Attribute::Time)
        );
        self.state = State::Idle;
        Ok(())
    }

    /// Close the current trial and open the next one.
    pub fn next_trial(&mut self) -> ProfileResult<()> {
        self.stop_trial()?;
        self.start_trial()
    }

    /// Freeze the profile and compute averages. Must be called exactly once,
    /// outside a trial.
    pub fn end(&mut self) -> ProfileResult<()> {
        self.expect_state(State::Idle, "end")?;
        for trial in &mut self.trials {
            trial.finalize();
        }
        self.calculate_average()?;
        self.state = State::Ended;
        Ok(())
    }

    fn expect_state(&self, expected: State, op: &'static str) -> ProfileResult<()> {
        if self.state == expected {
            return Ok(());
        }
        log::error!("Profiler {}: {op} called while {}", self.name, self.state.name());
        Err(ProfileError::InvalidTransition {
            op,
            state: self.state.name(),
        })
    }

    // Recorded values are frozen once the profile has ended.
    fn expect_open(&self, op: &'static str) -> ProfileResult<()> {
        if self.state != State::Ended {
            return Ok(());
        }
        log::error!("Profiler {}: {op} called after end", self.name);
        Err(ProfileError::InvalidTransition {
            op,
            state: self.state.name(),
        })
    }

    fn now(&self) -> f64 {
        self.clock.now_ns() as f64
    }

    // ── attribute access ────────────────────────────────────────────

    /// Set `attr` on the current step of the current trial.
    pub fn set(&mut self, attr: Attribute, value: f64) -> ProfileResult<()> {
        self.expect_state(State::InTrial, "set")?;
        let trial = self.current_trial_mut()?;
        if let Some(step) = trial.last_step_mut() {
            step.set(attr, value);
        }
        Ok(())
    }

    /// Set `attr` on step `step` of the most recent trial.
    pub fn set_step(&mut self, step: usize, attr: Attribute, value: f64) -> ProfileResult<()> {
        self.expect_open("set_step")?;
        let trial = self.trials.len().checked_sub(1).ok_or(ProfileError::TrialOutOfRange {
            index: 0,
            len: 0,
        })?;
        self.set_trial_step(trial, step, attr, value)
    }

    /// Set `attr` on step `step` of trial `trial`.
    pub fn set_trial_step(
        &mut self,
        trial: usize,
        step: usize,
        attr: Attribute,
        value: f64,
    ) -> ProfileResult<()> {
        self.expect_open("set_trial_step")?;
        self.step_at_mut(trial, step)?.set(attr, value);
        Ok(())
    }

    /// `attr` of the current step of the most recent trial.
    pub fn get(&self, attr: Attribute) -> ProfileResult<f64> {
        let trial = self.current_trial()?;
        let step = trial.num_steps().saturating_sub(1);
        self.get_trial_step(trial.serial(), step, attr)
    }

    pub fn get_step(&self, step: usize, attr: Attribute) -> ProfileResult<f64> {
        let trial = self.current_trial()?;
        self.get_trial_step(trial.serial(), step, attr)
    }

    pub fn get_trial_step(&self, trial: usize, step: usize, attr: Attribute) -> ProfileResult<f64> {
        Ok(self.step_at(trial, step)?.get(attr))
    }

    /// Name the current step.
    pub fn set_step_name(&mut self, name: impl Into<String>) -> ProfileResult<()> {
        self.expect_state(State::InTrial, "set_step_name")?;
        let trial = self.current_trial_mut()?;
        if let Some(step) = trial.last_step_mut() {
            step.set_name(name);
        }
        Ok(())
    }

    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    /// Steps in the most recent trial.
    pub fn num_steps(&self) -> usize {
        self.trials.last().map_or(0, Trial::num_steps)
    }

    /// Index of the most recent trial.
    pub fn trial_num(&self) -> Option<usize> {
        self.trials.len().checked_sub(1)
    }

    /// Index of the current step in the most recent trial.
    pub fn step_num(&self) -> Option<usize> {
        self.num_steps().checked_sub(1)
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn trial(&self, index: usize) -> Option<&Trial> {
        self.trials.get(index)
    }

    /// Averaged trial, available once [`end`](Self::end) (or
    /// [`calculate_average`](Self::calculate_average)) has run.
    pub fn average(&self) -> Option<&Trial> {
        self.average.as_ref()
    }

    fn current_trial(&self) -> ProfileResult<&Trial> {
        self.trials.last().ok_or(ProfileError::TrialOutOfRange { index: 0, len: 0 })
    }

    fn current_trial_mut(&mut self) -> ProfileResult<&mut Trial> {
        self.trials
            .last_mut()
            .ok_or(ProfileError::TrialOutOfRange { index: 0, len: 0 })
    }

    fn step_at(&self, trial: usize, step: usize) -> ProfileResult<&Step> {
        let len = self.trials.len();
        let t = self
            .trials
            .get(trial)
            .ok_or(ProfileError::TrialOutOfRange { index: trial, len })?;
        t.step(step).ok_or(ProfileError::StepOutOfRange {
            index: step,
            len: t.num_steps(),
        })
    }

    fn step_at_mut(&mut self, trial: usize, step: usize) -> ProfileResult<&mut Step> {
        let len = self.trials.len();
        let t = self
            .trials
            .get_mut(trial)
            .ok_or(ProfileError::TrialOutOfRange { index: trial, len })?;
        let steps = t.num_steps();
        t.step_mut(step).ok_or(ProfileError::StepOutOfRange {
            index: step,
            len: steps,
        })
    }

    // ── statistics ──────────────────────────────────────────────────

    /// Trials that take part in averaging: all but the first `throw_away`,
    /// keeping at least one.
    pub fn averaged_trials(&self) -> &[Trial] {
        let skip = self.throw_away.min(self.trials.len().saturating_sub(1));
        &self.trials[skip..]
    }

    /// Average the non-cold trials attribute by attribute, at trial level and
    /// per step index.
    ///
    /// Each mean uses only the trials that recorded a nonzero value; the
    /// standard deviation is the sample one (`n - 1`) over the same values
    /// and stays unset below two samples.
    ///
    /// Only valid between trials; [`end`](Self::end) runs it one last time.
    pub fn calculate_average(&mut self) -> ProfileResult<&Trial> {
        self.expect_state(State::Idle, "calculate_average")?;

        let population = self.averaged_trials();
        let max_steps = population.iter().map(Trial::num_steps).max().unwrap_or(0);

        let mut average = Trial::new(self.trials.len());
        for (attr, stats) in per_attribute(population.iter().map(Trial::attributes)) {
            apply(average.attributes_mut(), attr, stats);
        }

        for index in 0..max_steps {
            let steps: Vec<&Step> = population.iter().filter_map(|t| t.step(index)).collect();
            let mut step = Step::new(index);
            if let Some(first) = steps.first() {
                step.set_name(first.name());
            }
            for (attr, stats) in per_attribute(steps.iter().map(|s| s.attributes())) {
                apply(step.attributes_mut(), attr, stats);
            }
            average.push(step);
        }

        log::info!(
            "Profile {}: averaged {} of {} trials ({} steps)",
            self.name,
            population.len(),
            self.trials.len(),
            max_steps
        );
        Ok(&*self.average.insert(average))
    }

    // ── output ──────────────────────────────────────────────────────

    /// Every recorded trial.
    pub fn report_log(&self) -> ProfileReport {
        ProfileReport::new(&self.name, self.trials.len(), self.averaged_trials().len(), &self.trials)
    }

    /// The averaged trial only.
    pub fn report_sum(&self) -> ProfileReport {
        ProfileReport::new(
            &self.name,
            self.trials.len(),
            self.averaged_trials().len(),
            self.average.iter(),
        )
    }

    pub fn write_log<W: Write>(&self, w: &mut W) -> ProfileResult<()> {
        self.report_log().write_xml(w)
    }

    pub fn write_sum<W: Write>(&self, w: &mut W) -> ProfileResult<()> {
        self.report_sum().write_xml(w)
    }

    /// Summary (averaged trial) as JSON.
    pub fn to_json(&self) -> ProfileResult<String> {
        self.report_sum().to_json()
    }
}

/// Mean and optional sample standard deviation of one attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stats {
    mean: f64,
    std_dev: Option<f64>,
}

fn apply(table: &mut AttributeTable, attr: Attribute, stats: Stats) {
    table.set(attr, stats.mean);
    table.set_std_dev(attr, stats.std_dev);
}

// Ids are serials, not measurements.
fn per_attribute<'a>(
    tables: impl Iterator<Item = &'a AttributeTable> + Clone,
) -> Vec<(Attribute, Stats)> {
    Attribute::ALL
        .into_iter()
        .filter(|&attr| attr != Attribute::Id)
        .filter_map(|attr| stats(tables.clone().map(|t| t.get(attr))).map(|s| (attr, s)))
        .collect()
}

fn stats(values: impl Iterator<Item = f64>) -> Option<Stats> {
    let samples: Vec<f64> = values.filter(|&v| v != 0.0).collect();
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let std_dev = (samples.len() >= 2).then(|| {
        let sq: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
        (sq / (n - 1.0)).sqrt()
    });
    Some(Stats { mean, std_dev })
}
