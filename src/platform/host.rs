// biostream — Host Platform (simulation)
//
// Runs the firmware core on a workstation: a synthetic board instead of the
// MAX86150, and an in-process loopback broker instead of the MQTT client.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use crate::acquisition::Acquire;
use crate::error::{AcquisitionError, TransportError};
use crate::events::{InboundFragment, Reading, Signal};
use crate::tasks::control::NetworkEvents;
use crate::transport::{Publisher, QoS, Transport};

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since start (wraps at ~49 days).
pub fn now_ms() -> u32 {
    BOOT.get_or_init(Instant::now).elapsed().as_millis() as u32
}

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

pub fn configure_task_spawn(priority: u8) {
    log::trace!("host build: task priority {} not applied", priority);
}

pub fn reset_task_spawn() {}

// ---------------------------------------------------------------------------
// Simulated board
// ---------------------------------------------------------------------------

/// Synthetic physiological waveforms, one phase counter per signal.
pub struct SimBoard {
    ticks: [AtomicU32; Signal::COUNT],
}

impl Default for SimBoard {
    fn default() -> Self {
        Self { ticks: Default::default() }
    }
}

impl Acquire for SimBoard {
    fn acquire(&self, signal: Signal) -> Result<Reading, AcquisitionError> {
        let n = self.ticks[signal.slot()].fetch_add(1, Ordering::Relaxed) as f32;
        let reading = match signal {
            // ~1 Hz beat at 220 Hz sampling: narrow R peak over a slow baseline.
            Signal::Ecg => {
                let phase = (n % 220.0) / 220.0;
                let peak = (-((phase - 0.3) * 60.0).powi(2)).exp() * 4000.0;
                Reading::Int((peak + (TAU * phase).sin() * 150.0) as i32)
            }
            Signal::PpgRed | Signal::PpgIr => {
                let base = if signal == Signal::PpgRed { 30_000.0 } else { 34_000.0 };
                Reading::Int((base + (TAU * n / 300.0).sin() * 2_000.0) as i32)
            }
            Signal::Gsr => Reading::Int((12_000.0 + (n / 50.0).sin() * 500.0) as i32),
            Signal::Temp => Reading::Float(36.6 + (n / 20.0).sin() * 0.1),
            Signal::Resp => Reading::Int(((TAU * n / 400.0).sin() * 8_000.0) as i32),
        };
        Ok(reading)
    }

    fn supports(&self, _signal: Signal) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Loopback broker
// ---------------------------------------------------------------------------

/// In-process broker: messages published to a subscribed topic are delivered
/// back to `NetworkEvents`, split into `chunk`-sized fragments the way the
/// device's MQTT client splits messages larger than its input buffer.
pub struct LoopbackBroker {
    events: Arc<Mutex<NetworkEvents>>,
    subscriptions: Mutex<Vec<String>>,
    connected: AtomicBool,
    chunk: usize,
}

impl LoopbackBroker {
    pub fn new(events: Arc<Mutex<NetworkEvents>>, chunk: usize) -> Self {
        Self {
            events,
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            chunk: chunk.max(1),
        }
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if payload.is_empty() {
            events.on_message(&InboundFragment::whole(topic, payload));
            return;
        }
        for (index, part) in payload.chunks(self.chunk).enumerate() {
            events.on_message(&InboundFragment {
                topic,
                payload: part,
                index: index as u32,
                total: payload.len(),
            });
        }
    }
}

impl Publisher for LoopbackBroker {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        log::debug!("publish {} ({} bytes, {:?}, retain={})", topic, payload.len(), qos, retain);

        let subscribed = self
            .subscriptions
            .lock()
            .map(|subs| subs.iter().any(|s| s == topic))
            .unwrap_or(false);
        if subscribed {
            self.deliver(topic, payload);
        }
        Ok(())
    }
}

impl Transport for LoopbackBroker {
    fn connect(&self) -> bool {
        self.connected.store(true, Ordering::Release);
        true
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        match self.subscriptions.lock() {
            Ok(mut subs) => {
                subs.push(topic.to_string());
                Ok(())
            }
            Err(_) => Err(TransportError::Rejected("subscription table poisoned".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_TOPIC;
    use crate::supervisor::ConnectivitySupervisor;
    use std::sync::mpsc;

    #[test]
    fn loopback_fragments_subscribed_messages() {
        let (doc_tx, doc_rx) = mpsc::channel();
        let events = NetworkEvents::new(Arc::new(ConnectivitySupervisor::new()), doc_tx);
        let broker = LoopbackBroker::new(Arc::new(Mutex::new(events)), 7);

        assert!(broker.publish(CONFIG_TOPIC, QoS::AtLeastOnce, false, b"x").is_err());
        assert!(broker.connect());
        broker.subscribe(CONFIG_TOPIC, QoS::AtLeastOnce).unwrap();

        let doc = br#"{"MQTT_TOPIC_PREFIX":"signal/","BIOSIGNALS":{}}"#;
        broker.publish(CONFIG_TOPIC, QoS::AtLeastOnce, true, doc).unwrap();
        assert_eq!(doc_rx.try_recv().unwrap(), doc.to_vec());

        broker.publish("signal/ECG", QoS::AtMostOnce, false, &[0, 1]).unwrap();
        assert!(doc_rx.try_recv().is_err());
    }

    #[test]
    fn sim_board_produces_plausible_values() {
        let board = SimBoard::default();
        for _ in 0..500 {
            match board.acquire(Signal::Temp).unwrap() {
                Reading::Float(t) => assert!((36.0..37.0).contains(&t)),
                other => panic!("unexpected {:?}", other),
            }
            assert!(matches!(board.acquire(Signal::PpgRed).unwrap(), Reading::Int(v) if v > 0));
        }
    }
}
