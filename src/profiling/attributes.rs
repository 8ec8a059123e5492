//! Enum-indexed measurement record shared by steps, trials and averages.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::Serialize;

/// One measurement slot. Native slots are recorded, derived slots computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Attribute {
    Id,
    StartTime,
    StopTime,
    Memory,
    Device,
    Flops,
    Time,
    Bandwidth,
    FlopsPerSec,
}

impl Attribute {
    pub const COUNT: usize = 9;

    pub const ALL: [Attribute; Self::COUNT] = [
        Self::Id,
        Self::StartTime,
        Self::StopTime,
        Self::Memory,
        Self::Device,
        Self::Flops,
        Self::Time,
        Self::Bandwidth,
        Self::FlopsPerSec,
    ];

    /// Report label, unit in brackets.
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::StartTime => "StartTime[ns]",
            Self::StopTime => "StopTime[ns]",
            Self::Memory => "MemoryAccesses[bytes]",
            Self::Device => "Device",
            Self::Flops => "#Flops",
            Self::Time => "Time[ns]",
            Self::Bandwidth => "Bandwidth[bytes/s]",
            Self::FlopsPerSec => "Flops/s",
        }
    }

    pub fn is_derived(self) -> bool {
        matches!(self, Self::Time | Self::Bandwidth | Self::FlopsPerSec)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Values plus optional standard deviations, one per [`Attribute`].
///
/// A value of `0.0` means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttributeTable {
    values: [f64; Attribute::COUNT],
    std_devs: [Option<f64>; Attribute::COUNT],
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attr: Attribute) -> f64 {
        self.values[attr.index()]
    }

    pub fn set(&mut self, attr: Attribute, value: f64) {
        self.values[attr.index()] = value;
    }

    pub fn is_set(&self, attr: Attribute) -> bool {
        self.get(attr) != 0.0
    }

    pub fn std_dev(&self, attr: Attribute) -> Option<f64> {
        self.std_devs[attr.index()]
    }

    pub fn set_std_dev(&mut self, attr: Attribute, std_dev: Option<f64>) {
        self.std_devs[attr.index()] = std_dev;
    }

    /// `(attribute, value, std_dev)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Attribute, f64, Option<f64>)> + '_ {
        Attribute::ALL
            .into_iter()
            .map(move |attr| (attr, self.get(attr), self.std_dev(attr)))
    }
}

impl Index<Attribute> for AttributeTable {
    type Output = f64;

    fn index(&self, attr: Attribute) -> &f64 {
        &self.values[attr.index()]
    }
}

impl IndexMut<Attribute> for AttributeTable {
    fn index_mut(&mut self, attr: Attribute) -> &mut f64 {
        &mut self.values[attr.index()]
    }
}
