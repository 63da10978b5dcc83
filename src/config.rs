// biostream — Firmware & Deployment Configuration
// Target: ESP32 (Xtensa, dual core) with a MAX86150 ECG/PPG front end.

// ---------------------------------------------------------------------------
// GPIO Pin Definitions
// ---------------------------------------------------------------------------
pub const PIN_I2C_SDA: i32 = 21;       // MAX86150 data line
pub const PIN_I2C_SCL: i32 = 22;       // MAX86150 clock line
pub const PIN_TEMPERATURE_ADC: u32 = 6; // ADC1_CHANNEL_6 (GPIO34), NTC divider

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MAX86150: u8 = 0x5E;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks
pub const I2C_BAUDRATE_KHZ: u32 = 400;

// ---------------------------------------------------------------------------
// MQTT Topics & Payload Limits
// ---------------------------------------------------------------------------
pub const CONFIG_TOPIC: &str = "cfg";
pub const PRESENCE_MESSAGE: &[u8] = b"proximalunit online";
pub const MAX_CONFIG_SIZE: usize = 8192;              // bytes, whole config document
pub const CHANNEL_MEMORY_BUDGET: usize = 64 * 1024;   // bytes, all channel buffers together

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_CHANNEL: usize = 4096;
pub const STACK_CONTROL: usize = 8192;

// ---------------------------------------------------------------------------
// Task Priorities (FreeRTOS)
// ---------------------------------------------------------------------------
pub const DEFAULT_CHANNEL_PRIORITY: u8 = 5;
pub const MAX_CHANNEL_PRIORITY: u8 = 24;  // configMAX_PRIORITIES - 1

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const RECONNECT_INTERVAL_MS: u32 = 5000;     // broker retry backoff
pub const POLL_INTERVAL_MS: u64 = 10;            // control loop tick
pub const CONNECT_TIMEOUT_MS: u64 = 4000;        // single broker connection attempt
pub const SENSOR_RETRY_MS: u64 = 2000;           // front-end probe retry at boot

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------
pub const ACQ_FAILURE_LOG_EVERY: u32 = 1000;     // log 1st and every Nth failed read

// ---------------------------------------------------------------------------
// Deployment settings (baked in at build time)
// ---------------------------------------------------------------------------

/// Network identity of the node. Values come from the build environment so
/// credentials never live in the source tree.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub wifi_ssid: &'static str,
    pub wifi_pass: &'static str,
    pub broker_url: &'static str,
    pub client_id: &'static str,
}

impl NodeSettings {
    pub fn from_build_env() -> Self {
        Self {
            wifi_ssid: option_env!("WIFI_SSID").unwrap_or(""),
            wifi_pass: option_env!("WIFI_PASS").unwrap_or(""),
            broker_url: option_env!("MQTT_BROKER_URL").unwrap_or("mqtt://broker.hivemq.com:1883"),
            client_id: option_env!("MQTT_CLIENT_ID").unwrap_or("proximalunit"),
        }
    }
}
