// biostream — Signals, Samples & System Events

use std::fmt;

// ---------------------------------------------------------------------------
// Signals (closed set — one fixed slot each)
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Ecg,
    PpgRed,
    PpgIr,
    Gsr,
    Temp,
    Resp,
}

impl Signal {
    pub const COUNT: usize = 6;

    pub const ALL: [Signal; Self::COUNT] = [
        Self::Ecg,
        Self::PpgRed,
        Self::PpgIr,
        Self::Gsr,
        Self::Temp,
        Self::Resp,
    ];

    /// Name used in the configuration document and in data topics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ecg    => "ECG",
            Self::PpgRed => "PPGRed",
            Self::PpgIr  => "PPGIR",
            Self::Gsr    => "GSR",
            Self::Temp   => "TEMP",
            Self::Resp   => "RESP",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Fixed index into the controller's slot table.
    pub fn slot(&self) -> usize {
        *self as usize
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Ecg | Self::Resp                => ElementType::I16,
            Self::PpgRed | Self::PpgIr | Self::Gsr => ElementType::U16,
            Self::Temp                            => ElementType::F32,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Sample representation
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I16,
    U16,
    F32,
}

impl ElementType {
    /// Bytes per sample on the wire.
    pub fn size(&self) -> usize {
        match self {
            Self::I16 | Self::U16 => 2,
            Self::F32             => 4,
        }
    }
}

/// One scaled reading as produced by the acquisition back-end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Int(i32),
    Float(f32),
}

impl Reading {
    pub fn as_f32(&self) -> f32 {
        match *self {
            Self::Int(v)   => v as f32,
            Self::Float(v) => v,
        }
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::Int(0)
    }
}

// ---------------------------------------------------------------------------
// Network events — produced by platform callbacks, consumed by the control loop
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// One inbound MQTT message piece. Unfragmented messages arrive as a single
/// fragment with `index == 0` and `total == payload.len()`.
#[derive(Debug, Clone, Copy)]
pub struct InboundFragment<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub index: u32,
    pub total: usize,
}

impl<'a> InboundFragment<'a> {
    pub fn whole(topic: &'a str, payload: &'a [u8]) -> Self {
        Self { topic, payload, index: 0, total: payload.len() }
    }
}
