// biostream — Acquisition Interface
//
// Register access and ADC conversion are board-specific.  Channel tasks see a
// board only through `Acquire`: one scaled reading per call, or a failure.

use crate::error::AcquisitionError;
use crate::events::{Reading, Signal};

/// Per-sample transform applied before a reading is stored (e.g. a FIR stage).
pub trait SampleFilter: Send {
    fn apply(&mut self, reading: Reading) -> Reading;
}

impl<F> SampleFilter for F
where
    F: FnMut(Reading) -> Reading + Send,
{
    fn apply(&mut self, reading: Reading) -> Reading {
        self(reading)
    }
}

pub trait Acquire: Send + Sync {
    fn acquire(&self, signal: Signal) -> Result<Reading, AcquisitionError>;

    /// Whether this board has a front end wired for `signal`.
    fn supports(&self, signal: Signal) -> bool;

    /// Fresh filter state for a channel about to start. Called once per start.
    fn filter_for(&self, _signal: Signal) -> Option<Box<dyn SampleFilter>> {
        None
    }
}
