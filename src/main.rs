// biostream — Firmware Entry Point
//
// Boot sequence:
//   1. Initialise logging and the platform (peripherals, board front ends).
//   2. Build the network event sink (router + config reassembler) and the
//      broker transport around it.
//   3. Spawn the control loop (connectivity supervisor + reconfiguration).
//   4. Bring the link up; the supervisor connects, subscribes to `cfg` and
//      announces presence.  Channels start when a configuration arrives.
//
// On a host build the board is simulated and the broker is an in-process
// loopback; a demo configuration is published once the node is up.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use biostream::acquisition::Acquire;
use biostream::config::*;
use biostream::events::LinkEvent;
use biostream::platform;
use biostream::reconfig::ReconfigurationController;
use biostream::supervisor::ConnectivitySupervisor;
use biostream::tasks::control::{ControlLoop, NetworkEvents};
use biostream::transport::Transport;

/// Channels shared between the callback side and the control loop.
struct Wiring {
    supervisor: Arc<ConnectivitySupervisor>,
    events: Arc<Mutex<NetworkEvents>>,
    link_tx: Sender<LinkEvent>,
    link_rx: Receiver<LinkEvent>,
    doc_rx: Receiver<Vec<u8>>,
}

fn wiring() -> Wiring {
    let supervisor = Arc::new(ConnectivitySupervisor::new());
    let (doc_tx, doc_rx) = mpsc::channel();
    let (link_tx, link_rx) = mpsc::channel();
    let events = Arc::new(Mutex::new(NetworkEvents::new(Arc::clone(&supervisor), doc_tx)));
    Wiring { supervisor, events, link_tx, link_rx, doc_rx }
}

fn spawn_control<T: Transport + 'static>(
    transport: Arc<T>,
    board: Arc<dyn Acquire>,
    supervisor: Arc<ConnectivitySupervisor>,
    link_rx: Receiver<LinkEvent>,
    doc_rx: Receiver<Vec<u8>>,
) -> anyhow::Result<()> {
    let controller = ReconfigurationController::new(board, transport.clone());
    let control = ControlLoop::new(transport, supervisor, controller, link_rx, doc_rx);
    thread::Builder::new()
        .name("control".into())
        .stack_size(STACK_CONTROL)
        .spawn(move || control.run())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ESP32
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use biostream::platform::esp::{board::EspBoard, mqtt::EspTransport, wifi};

    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    platform::init_logging();
    log::info!("biostream firmware starting…");

    let settings = NodeSettings::from_build_env();
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ---- I2C bus (MAX86150) -----------------------------------------------
    let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21, // SDA
        peripherals.pins.gpio22, // SCL
        &i2c_config,
    )?;
    // SAFETY: The I2C peripheral is a singleton obtained from `Peripherals::take()`.
    // It will live for the entire programme duration (embedded firmware never exits).
    let i2c_bus: &'static Mutex<I2cDriver<'static>> =
        Box::leak(Box::new(Mutex::new(unsafe { core::mem::transmute(i2c) })));

    let board: Arc<dyn Acquire> = Arc::new(EspBoard::init(i2c_bus));

    // ---- Network + control ------------------------------------------------
    let w = wiring();
    let transport = Arc::new(EspTransport::new(settings.clone(), w.events));
    spawn_control(transport, board, w.supervisor, w.link_rx, w.doc_rx)?;

    let _link = wifi::start_link(peripherals.modem, sysloop, nvs, &settings, w.link_tx)?;
    log::info!("Boot complete — waiting for configuration on '{}'", CONFIG_TOPIC);

    // Main thread has nothing left to do; park it forever.
    // (All work happens in the spawned FreeRTOS tasks.)
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

// ---------------------------------------------------------------------------
// Host simulation
// ---------------------------------------------------------------------------
#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use biostream::platform::host::{LoopbackBroker, SimBoard};
    use biostream::transport::{Publisher, QoS};

    /// Chunk size of the simulated client's input buffer.
    const LOOPBACK_CHUNK: usize = 64;

    /// What the remote unit sends after it connects.
    const DEMO_CONFIG: &str = r#"{
        "MQTT_TOPIC_PREFIX": "signal/",
        "BIOSIGNALS": {
            "ECG":    {"fsample": 220, "overlay": 20, "npacket": 200, "priority": 10},
            "PPGRed": {"fsample": 300, "overlay": 30, "npacket": 100, "priority": 10},
            "TEMP":   {"fsample": 0.5, "overlay": 1,  "npacket": 5,   "priority": 5}
        }
    }"#;

    platform::init_logging();
    log::info!("biostream host simulation starting…");

    let w = wiring();
    let broker = Arc::new(LoopbackBroker::new(w.events, LOOPBACK_CHUNK));
    spawn_control(Arc::clone(&broker), Arc::new(SimBoard::default()), w.supervisor, w.link_rx, w.doc_rx)?;

    w.link_tx.send(LinkEvent::Up)?;
    thread::sleep(Duration::from_millis(500));

    log::info!("Remote unit: publishing demo configuration");
    if let Err(e) = broker.publish(CONFIG_TOPIC, QoS::AtLeastOnce, true, DEMO_CONFIG.as_bytes()) {
        log::error!("Demo configuration not delivered: {}", e);
    }

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
