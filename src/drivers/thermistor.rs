// biostream — Skin Temperature (NTC thermistor on ADC1)
//
// One-shot ADC reads via raw ESP-IDF calls.  The NTC sits on the low side of a
// divider with a 10 kΩ pull-up to 3.3 V.

use crate::config::*;
use crate::error::AcquisitionError;

const ADC_FULL_SCALE: f32 = 4095.0;
const R_PULLUP: f32 = 10_000.0;
const R_NOMINAL: f32 = 10_000.0; // at 25 °C
const BETA: f32 = 3950.0;
const T_NOMINAL_K: f32 = 298.15;

pub struct Thermistor {
    handle: esp_idf_sys::adc_oneshot_unit_handle_t,
    channel: esp_idf_sys::adc_channel_t,
}

// SAFETY: the oneshot driver handle may be used from any task; reads are
// serialised by the single TEMP channel task that owns the board slot.
unsafe impl Send for Thermistor {}
unsafe impl Sync for Thermistor {}

impl Thermistor {
    /// ADC1 / 12 dB attenuation (0–3.3 V range).
    pub fn new() -> anyhow::Result<Self> {
        let channel = PIN_TEMPERATURE_ADC as esp_idf_sys::adc_channel_t;
        unsafe {
            let mut handle: esp_idf_sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
            let unit_cfg = esp_idf_sys::adc_oneshot_unit_init_cfg_t {
                unit_id: esp_idf_sys::adc_unit_t_ADC_UNIT_1,
                ulp_mode: esp_idf_sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
                ..core::mem::zeroed()
            };
            esp_idf_sys::esp!(esp_idf_sys::adc_oneshot_new_unit(&unit_cfg, &mut handle))?;

            let chan_cfg = esp_idf_sys::adc_oneshot_chan_cfg_t {
                atten: esp_idf_sys::adc_atten_t_ADC_ATTEN_DB_12,
                bitwidth: esp_idf_sys::adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            esp_idf_sys::esp!(esp_idf_sys::adc_oneshot_config_channel(handle, channel, &chan_cfg))?;

            Ok(Self { handle, channel })
        }
    }

    /// Temperature in °C.
    pub fn read_celsius(&self) -> Result<f32, AcquisitionError> {
        let mut raw: i32 = 0;
        let ret = unsafe { esp_idf_sys::adc_oneshot_read(self.handle, self.channel, &mut raw) };
        if ret != esp_idf_sys::ESP_OK {
            return Err(AcquisitionError::Bus);
        }
        let raw = raw as f32;
        if raw <= 0.0 || raw >= ADC_FULL_SCALE {
            // Open or shorted sensor.
            return Err(AcquisitionError::NotReady);
        }

        let r_ntc = R_PULLUP * raw / (ADC_FULL_SCALE - raw);
        let inv_t = 1.0 / T_NOMINAL_K + (r_ntc / R_NOMINAL).ln() / BETA;
        Ok(1.0 / inv_t - 273.15)
    }
}
