// biostream — MAX86150 ECG/PPG Front-End Driver
//
// Register-level driver over the shared I2C bus.  The chip samples all three
// channels (PPG IR, PPG red, ECG) into one FIFO; each `poll()` drains it and
// keeps the most recent sample of each, so the independent ECG and PPG
// channel tasks can read at their own rates.

use std::sync::Mutex;

use esp_idf_hal::i2c::I2cDriver;

use crate::config::*;

/// Thread-safe handle to a shared I2C bus.
pub type SharedBus = &'static Mutex<I2cDriver<'static>>;

// MAX86150 register addresses
const REG_FIFO_WR_PTR: u8 = 0x04;
const REG_FIFO_OVF: u8 = 0x05;
const REG_FIFO_RD_PTR: u8 = 0x06;
const REG_FIFO_DATA: u8 = 0x07;
const REG_FIFO_CONFIG: u8 = 0x08;
const REG_FIFO_DATA_CTRL1: u8 = 0x09;
const REG_FIFO_DATA_CTRL2: u8 = 0x0A;
const REG_SYS_CTRL: u8 = 0x0D;
const REG_PPG_CONFIG1: u8 = 0x0E;
const REG_PPG_CONFIG2: u8 = 0x0F;
const REG_LED1_PA: u8 = 0x11; // IR
const REG_LED2_PA: u8 = 0x12; // red
const REG_ECG_CONFIG1: u8 = 0x3C;
const REG_ECG_CONFIG3: u8 = 0x3E;
const REG_PART_ID: u8 = 0xFF;
const PART_ID_EXPECTED: u8 = 0x1E;

const SYS_RESET: u8 = 0x01;
const SYS_FIFO_EN: u8 = 0x04;
const FIFO_DEPTH: usize = 32;
const BYTES_PER_SLOT: usize = 3;
const SLOTS: usize = 3; // FD1 = IR, FD2 = red, FD3 = ECG

/// Latest sample of each element, already narrowed to 16 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontEndSample {
    pub ir: u16,
    pub red: u16,
    pub ecg: i16,
}

pub struct Max86150 {
    bus: SharedBus,
    latest: Mutex<Option<FrontEndSample>>,
}

impl Max86150 {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus, latest: Mutex::new(None) }
    }

    /// Verify the device is reachable on the I2C bus.
    pub fn is_connected(&self) -> bool {
        let mut bus = self.bus.lock().unwrap();
        let mut buf = [0u8; 1];
        match bus.write_read(I2C_ADDR_MAX86150, &[REG_PART_ID], &mut buf, I2C_TIMEOUT_TICKS) {
            Ok(()) => buf[0] == PART_ID_EXPECTED,
            Err(_) => false,
        }
    }

    /// Reset and configure PPG (IR + red) and ECG into the FIFO.
    pub fn init(&self) -> anyhow::Result<()> {
        let mut bus = self.bus.lock().unwrap();
        let mut write = |reg: u8, val: u8| bus.write(I2C_ADDR_MAX86150, &[reg, val], I2C_TIMEOUT_TICKS);

        write(REG_SYS_CTRL, SYS_RESET)?;
        std::thread::sleep(std::time::Duration::from_millis(10));

        // FIFO: rollover on full, almost-full at 15 free slots
        write(REG_FIFO_CONFIG, 0x1F)?;
        write(REG_FIFO_DATA_CTRL1, 0x21)?; // FD2 = LED2 (red), FD1 = LED1 (IR)
        write(REG_FIFO_DATA_CTRL2, 0x09)?; // FD3 = ECG
        // PPG: 16384 nA full scale, 400 sps, 100 us pulse
        write(REG_PPG_CONFIG1, 0xD1)?;
        write(REG_PPG_CONFIG2, 0x06)?;
        write(REG_LED1_PA, 0x55)?;
        write(REG_LED2_PA, 0x55)?;
        // ECG: 400 sps decimation, PGA gain 8, IA gain 9.5
        write(REG_ECG_CONFIG1, 0x03)?;
        write(REG_ECG_CONFIG3, 0x0D)?;

        write(REG_SYS_CTRL, SYS_FIFO_EN)?;
        for reg in [REG_FIFO_WR_PTR, REG_FIFO_OVF, REG_FIFO_RD_PTR] {
            write(reg, 0x00)?;
        }

        log::info!("MAX86150 initialised (PPG IR/red 400 sps, ECG 400 sps)");
        Ok(())
    }

    /// Drain the FIFO and return the most recent sample, if any has ever arrived.
    pub fn poll(&self) -> anyhow::Result<Option<FrontEndSample>> {
        let mut latest = self.latest.lock().unwrap();

        let mut bus = self.bus.lock().unwrap();
        let mut ptrs = [0u8; 3];
        bus.write_read(I2C_ADDR_MAX86150, &[REG_FIFO_WR_PTR], &mut ptrs, I2C_TIMEOUT_TICKS)?;
        let (wr, rd) = (ptrs[0] as usize, ptrs[2] as usize);
        let available = (wr + FIFO_DEPTH - rd) % FIFO_DEPTH;

        let mut frame = [0u8; BYTES_PER_SLOT * SLOTS];
        for _ in 0..available {
            bus.write_read(I2C_ADDR_MAX86150, &[REG_FIFO_DATA], &mut frame, I2C_TIMEOUT_TICKS)?;
            *latest = Some(decode_frame(&frame));
        }

        Ok(*latest)
    }
}

/// PPG elements are 19 bits unsigned, ECG is 18 bits two's complement.
/// Both are narrowed to 16 bits by dropping LSBs.
fn decode_frame(frame: &[u8; BYTES_PER_SLOT * SLOTS]) -> FrontEndSample {
    let word = |i: usize| {
        let b = &frame[i * BYTES_PER_SLOT..(i + 1) * BYTES_PER_SLOT];
        ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
    };
    let ir = word(0) & 0x7FFFF;
    let red = word(1) & 0x7FFFF;
    // Sign-extend 18 -> 32 bits, then keep the top 16.
    let ecg = (((word(2) & 0x3FFFF) << 14) as i32) >> 14;

    FrontEndSample {
        ir: (ir >> 3) as u16,
        red: (red >> 3) as u16,
        ecg: (ecg >> 2) as i16,
    }
}
