// biostream — ESP-IDF Platform
//
// Channel threads map onto FreeRTOS tasks via `std::thread`; their priority
// and core affinity are set through the thread-local spawn configuration
// right before `spawn` and cleared again afterwards.

pub mod board;
pub mod mqtt;
pub mod wifi;

use esp_idf_hal::cpu::Core;
use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

use crate::config::*;

/// Milliseconds since boot (wraps at ~49 days).
pub fn now_ms() -> u32 {
    unsafe { (esp_idf_sys::esp_timer_get_time() / 1000) as u32 }
}

pub fn init_logging() {
    esp_idf_svc::log::EspLogger::initialize_default();
}

/// Sampling tasks run on the APP core, away from Wi-Fi and the MQTT client.
pub fn configure_task_spawn(priority: u8) {
    let conf = ThreadSpawnConfiguration {
        stack_size: STACK_CHANNEL,
        priority,
        pin_to_core: Some(Core::Core1),
        ..Default::default()
    };
    if let Err(e) = conf.set() {
        log::warn!("Cannot apply task priority {} ({}); using defaults", priority, e);
    }
}

pub fn reset_task_spawn() {
    if let Err(e) = ThreadSpawnConfiguration::default().set() {
        log::warn!("Cannot reset spawn configuration ({})", e);
    }
}
