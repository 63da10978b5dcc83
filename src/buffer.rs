// biostream — Windowed Batch Buffer
//
// Fixed-capacity sample window of length N.  When full, the caller publishes
// the whole window and then compacts it: the last V samples are moved to the
// front so that the next packet starts with V samples of prior context.

use crate::error::ChannelError;
use crate::events::{ElementType, Reading};

/// Result of a single `append`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Accepted,
    PacketReady,
    /// Buffer was already full; the sample was not written.
    Full,
}

/// Element types that can live in a packet.
pub trait SampleValue: Copy + Default + Send + 'static {
    const ELEMENT: ElementType;

    fn from_reading(reading: Reading) -> Self;

    /// Big-endian wire representation.
    fn write_be(&self, out: &mut Vec<u8>);
}

impl SampleValue for i16 {
    const ELEMENT: ElementType = ElementType::I16;

    fn from_reading(reading: Reading) -> Self {
        match reading {
            Reading::Int(v) => v.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            // `as` saturates and maps NaN to 0.
            Reading::Float(v) => v.round() as i16,
        }
    }

    fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl SampleValue for u16 {
    const ELEMENT: ElementType = ElementType::U16;

    fn from_reading(reading: Reading) -> Self {
        match reading {
            Reading::Int(v) => v.clamp(0, u16::MAX as i32) as u16,
            Reading::Float(v) => v.round() as u16,
        }
    }

    fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl SampleValue for f32 {
    const ELEMENT: ElementType = ElementType::F32;

    fn from_reading(reading: Reading) -> Self {
        reading.as_f32()
    }

    fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

#[derive(Debug)]
pub struct WindowedBuffer<T> {
    samples: Vec<T>,
    cursor: usize,
    overlap: usize,
}

impl<T: SampleValue> WindowedBuffer<T> {
    /// Allocate a window of `len` samples keeping `overlap` across packets.
    ///
    /// `overlap >= len` is a configuration error and never reaches runtime.
    pub fn new(len: usize, overlap: usize) -> Result<Self, ChannelError> {
        if len == 0 {
            return Err(ChannelError::InvalidSettings("packet length must be > 0".into()));
        }
        if overlap >= len {
            return Err(ChannelError::InvalidSettings(format!(
                "overlap {} must be smaller than packet length {}",
                overlap, len
            )));
        }

        let mut samples = Vec::new();
        samples
            .try_reserve_exact(len)
            .map_err(|_| ChannelError::AllocationFailure { bytes: Self::bytes_for(len) })?;
        samples.resize(len, T::default());

        Ok(Self { samples, cursor: 0, overlap })
    }

    /// Memory footprint of a window of `len` samples.
    pub fn bytes_for(len: usize) -> usize {
        len.saturating_mul(T::ELEMENT.size())
    }

    pub fn append(&mut self, sample: T) -> Append {
        if self.cursor == self.samples.len() {
            return Append::Full;
        }
        self.samples[self.cursor] = sample;
        self.cursor += 1;
        if self.cursor == self.samples.len() {
            Append::PacketReady
        } else {
            Append::Accepted
        }
    }

    /// Read-only view of the full window. Only meaningful after `PacketReady`.
    pub fn packet(&self) -> &[T] {
        &self.samples
    }

    pub fn compact(&mut self) {
        let len = self.samples.len();
        self.samples.copy_within(len - self.overlap..len, 0);
        self.cursor = self.overlap;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Serialize the full window into `out` (cleared first).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        for s in &self.samples {
            s.write_be(out);
        }
    }
}

// ---------------------------------------------------------------------------
// Type-erased buffer handed across the task boundary
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub enum PacketBuffer {
    I16(WindowedBuffer<i16>),
    U16(WindowedBuffer<u16>),
    F32(WindowedBuffer<f32>),
}

impl PacketBuffer {
    pub fn new(element: ElementType, len: usize, overlap: usize) -> Result<Self, ChannelError> {
        Ok(match element {
            ElementType::I16 => Self::I16(WindowedBuffer::new(len, overlap)?),
            ElementType::U16 => Self::U16(WindowedBuffer::new(len, overlap)?),
            ElementType::F32 => Self::F32(WindowedBuffer::new(len, overlap)?),
        })
    }

    pub fn append(&mut self, reading: Reading) -> Append {
        match self {
            Self::I16(b) => b.append(i16::from_reading(reading)),
            Self::U16(b) => b.append(u16::from_reading(reading)),
            Self::F32(b) => b.append(f32::from_reading(reading)),
        }
    }

    pub fn compact(&mut self) {
        match self {
            Self::I16(b) => b.compact(),
            Self::U16(b) => b.compact(),
            Self::F32(b) => b.compact(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::I16(b) => b.encode_into(out),
            Self::U16(b) => b.encode_into(out),
            Self::F32(b) => b.encode_into(out),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I16(b) => b.len(),
            Self::U16(b) => b.len(),
            Self::F32(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self) -> ElementType {
        match self {
            Self::I16(_) => ElementType::I16,
            Self::U16(_) => ElementType::U16,
            Self::F32(_) => ElementType::F32,
        }
    }

    /// Size of one encoded packet in bytes.
    pub fn packet_bytes(&self) -> usize {
        self.len() * self.element().size()
    }
}
