// biostream — ESP32 Board Wiring
//
// Maps each `Signal` to the front end that produces it.  GSR and respiratory
// flow are not populated on this board revision and report as unsupported,
// which makes the controller skip them as unknown signals.

use std::thread;
use std::time::Duration;

use crate::acquisition::Acquire;
use crate::config::*;
use crate::drivers::max86150::{Max86150, SharedBus};
use crate::drivers::thermistor::Thermistor;
use crate::error::AcquisitionError;
use crate::events::{Reading, Signal};

pub struct EspBoard {
    front_end: Max86150,
    thermistor: Option<Thermistor>,
}

impl EspBoard {
    /// Probe the MAX86150 until it answers; the board is useless without it.
    pub fn init(bus: SharedBus) -> Self {
        let front_end = Max86150::new(bus);
        loop {
            if front_end.is_connected() {
                match front_end.init() {
                    Ok(()) => break,
                    Err(e) => log::error!("MAX86150 init failed: {}", e),
                }
            } else {
                log::error!("MAX86150 not found — retrying in {} ms", SENSOR_RETRY_MS);
            }
            thread::sleep(Duration::from_millis(SENSOR_RETRY_MS));
        }

        let thermistor = match Thermistor::new() {
            Ok(t) => Some(t),
            Err(e) => {
                log::error!("Temperature ADC init failed: {}", e);
                None
            }
        };

        Self { front_end, thermistor }
    }
}

impl Acquire for EspBoard {
    fn acquire(&self, signal: Signal) -> Result<Reading, AcquisitionError> {
        match signal {
            Signal::Ecg | Signal::PpgRed | Signal::PpgIr => {
                let sample = self
                    .front_end
                    .poll()
                    .map_err(|_| AcquisitionError::Bus)?
                    .ok_or(AcquisitionError::NotReady)?;
                Ok(match signal {
                    Signal::Ecg => Reading::Int(sample.ecg as i32),
                    Signal::PpgRed => Reading::Int(sample.red as i32),
                    _ => Reading::Int(sample.ir as i32),
                })
            }
            Signal::Temp => self
                .thermistor
                .as_ref()
                .ok_or(AcquisitionError::Unsupported)?
                .read_celsius()
                .map(Reading::Float),
            Signal::Gsr | Signal::Resp => Err(AcquisitionError::Unsupported),
        }
    }

    fn supports(&self, signal: Signal) -> bool {
        match signal {
            Signal::Ecg | Signal::PpgRed | Signal::PpgIr => true,
            Signal::Temp => self.thermistor.is_some(),
            Signal::Gsr | Signal::Resp => false,
        }
    }
}
