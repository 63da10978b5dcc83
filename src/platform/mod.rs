// biostream — Platform Layer
//
// Everything that differs between the ESP32 firmware and a host build:
// time base, task spawn attributes, logger, and the concrete board/broker.

#[cfg(target_os = "espidf")]
pub mod esp;
#[cfg(target_os = "espidf")]
pub use esp::{configure_task_spawn, init_logging, now_ms, reset_task_spawn};

#[cfg(not(target_os = "espidf"))]
pub mod host;
#[cfg(not(target_os = "espidf"))]
pub use host::{configure_task_spawn, init_logging, now_ms, reset_task_spawn};
