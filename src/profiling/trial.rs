//! Steps and trials.
//!
//! A [`Trial`] is one timed end-to-end run; its [`Step`]s are the phases
//! inside it (one kernel launch, one copy, ...).

use crate::profiling::attributes::{Attribute, AttributeTable};

/// One timed phase of a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    serial: usize,
    name: String,
    attributes: AttributeTable,
}

impl Step {
    pub fn new(serial: usize) -> Self {
        let mut attributes = AttributeTable::new();
        attributes[Attribute::Id] = serial as f64;
        Self {
            serial,
            name: String::new(),
            attributes,
        }
    }

    pub fn serial(&self) -> usize {
        self.serial
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn get(&self, attr: Attribute) -> f64 {
        self.attributes[attr]
    }

    pub fn set(&mut self, attr: Attribute, value: f64) {
        self.attributes[attr] = value;
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeTable {
        &mut self.attributes
    }

    /// Fill the derived slots from the native ones.
    ///
    /// `Time` is only taken from the timestamps when unset, and no derived
    /// slot is ever overwritten with zero, so calling this twice is a no-op.
    pub fn compute_derived(&mut self) {
        fill_derived(&mut self.attributes);
    }
}

fn fill_derived(attrs: &mut AttributeTable) {
    if !attrs.is_set(Attribute::Time) {
        let elapsed = attrs[Attribute::StopTime] - attrs[Attribute::StartTime];
        if elapsed > 0.0 {
            attrs[Attribute::Time] = elapsed;
        }
    }

    let time = attrs[Attribute::Time];
    if time <= 0.0 {
        return;
    }

    let flops_per_sec = attrs[Attribute::Flops] / time * 1e9;
    if flops_per_sec != 0.0 {
        attrs[Attribute::FlopsPerSec] = flops_per_sec;
    }
    let bandwidth = attrs[Attribute::Memory] / time * 1e9;
    if bandwidth != 0.0 {
        attrs[Attribute::Bandwidth] = bandwidth;
    }
}

/// One timed run made of ordered steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    serial: usize,
    steps: Vec<Step>,
    attributes: AttributeTable,
}

impl Trial {
    pub fn new(serial: usize) -> Self {
        Self {
            serial,
            steps: Vec::new(),
            attributes: AttributeTable::new(),
        }
    }

    pub fn serial(&self) -> usize {
        self.serial
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    /// Append a new step and return it.
    pub fn push_step(&mut self) -> &mut Step {
        let serial = self.steps.len();
        self.steps.push(Step::new(serial));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    /// Trial-level aggregate value.
    pub fn get(&self, attr: Attribute) -> f64 {
        self.attributes[attr]
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut AttributeTable {
        &mut self.attributes
    }

    pub(crate) fn last_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }

    pub(crate) fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Derive every step, then rebuild the trial aggregate from them.
    ///
    /// Start and stop span the first and last step; time, memory and flops
    /// are step sums; device is the first step that recorded one. Safe to
    /// call again after late attribute edits.
    pub fn finalize(&mut self) {
        for step in &mut self.steps {
            step.compute_derived();
        }

        let mut totals = AttributeTable::new();
        totals[Attribute::Id] = self.serial as f64;

        if let (Some(first), Some(last)) = (self.steps.first(), self.steps.last()) {
            totals[Attribute::StartTime] = first.get(Attribute::StartTime);
            totals[Attribute::StopTime] = last.get(Attribute::StopTime);
        }
        for step in &self.steps {
            totals[Attribute::Time] += step.get(Attribute::Time);
            totals[Attribute::Memory] += step.get(Attribute::Memory);
            totals[Attribute::Flops] += step.get(Attribute::Flops);
        }
        totals[Attribute::Device] = self
            .steps
            .iter()
            .map(|step| step.get(Attribute::Device))
            .find(|&device| device != 0.0)
            .unwrap_or(0.0);

        fill_derived(&mut totals);
        self.attributes = totals;
    }
}
