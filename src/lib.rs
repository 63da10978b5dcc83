// biostream — Wearable Biosignal Acquisition Firmware
//
// Samples ECG, PPG, GSR, temperature and respiratory flow at per-signal rates,
// batches samples into overlapping fixed-size packets and streams them over
// MQTT.  The signal set is reconfigured at runtime from a JSON document on the
// `cfg` topic.
//
// Data path:   channel task -> windowed buffer -> publish `<prefix>/<NAME>`
// Config path: MQTT callback -> router -> reassembler -> control loop
//              -> reconfiguration controller -> start/stop channel tasks

pub mod acquisition;
pub mod buffer;
pub mod config;
#[cfg(target_os = "espidf")]
pub mod drivers;
pub mod error;
pub mod events;
pub mod platform;
pub mod reassembly;
pub mod reconfig;
pub mod router;
pub mod supervisor;
pub mod tasks;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use platform::now_ms;
