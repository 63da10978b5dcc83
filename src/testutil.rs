//! Shared fakes for unit tests: a scripted board and a recording broker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::acquisition::{Acquire, SampleFilter};
use crate::error::{AcquisitionError, TransportError};
use crate::events::{Reading, Signal};
use crate::transport::{Publisher, QoS, Transport};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn decode_i16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]])).collect()
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------
pub struct MockBoard {
    counter: AtomicI32,
    fail: bool,
    supported: HashSet<Signal>,
    filter: Option<fn(Reading) -> Reading>,
}

impl MockBoard {
    /// Every signal wired; each read returns the next integer starting at 1.
    pub fn counting() -> Self {
        Self {
            counter: AtomicI32::new(0),
            fail: false,
            supported: Signal::ALL.iter().copied().collect(),
            filter: None,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::counting() }
    }

    pub fn only(signals: &[Signal]) -> Self {
        Self { supported: signals.iter().copied().collect(), ..Self::counting() }
    }

    pub fn with_filter(mut self, filter: fn(Reading) -> Reading) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl Acquire for MockBoard {
    fn acquire(&self, signal: Signal) -> Result<Reading, AcquisitionError> {
        if self.fail || !self.supported.contains(&signal) {
            return Err(AcquisitionError::Bus);
        }
        Ok(Reading::Int(self.counter.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn supports(&self, signal: Signal) -> bool {
        self.supported.contains(&signal)
    }

    fn filter_for(&self, _signal: Signal) -> Option<Box<dyn SampleFilter>> {
        self.filter.map(|f| Box::new(f) as Box<dyn SampleFilter>)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

pub struct RecordingTransport {
    online: AtomicBool,
    /// Outcomes for successive `connect()` calls; `true` once exhausted.
    connect_script: Mutex<Vec<bool>>,
    pub connect_calls: AtomicUsize,
    pub rejected_publishes: AtomicUsize,
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    cond: Condvar,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            connect_script: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            rejected_publishes: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            cond: Condvar::new(),
        }
    }

    pub fn with_connect_script(script: &[bool]) -> Self {
        let t = Self::new();
        *t.connect_script.lock().unwrap() = script.iter().rev().copied().collect();
        t
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Block until `count` packets have been published to `topic`.
    pub fn wait_for_packets(&self, topic: &str, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut published = self.published.lock().unwrap();
        loop {
            let matching: Vec<Vec<u8>> = published
                .iter()
                .filter(|p| p.topic == topic)
                .map(|p| p.payload.clone())
                .collect();
            if matching.len() >= count {
                return matching;
            }
            let now = Instant::now();
            assert!(now < deadline, "timed out waiting for {} packets on {}", count, topic);
            published = self.cond.wait_timeout(published, deadline - now).unwrap().0;
        }
    }

    /// Block until at least one publish has been refused.
    pub fn wait_for_rejection(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.rejected_publishes.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "no publish was attempted while offline");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Publisher for RecordingTransport {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            self.rejected_publishes.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::NotConnected);
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.to_vec(),
        });
        self.cond.notify_all();
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn connect(&self) -> bool {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_script.lock().unwrap().pop().unwrap_or(true)
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}
