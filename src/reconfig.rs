// biostream — Reconfiguration Controller
//
// Parses a complete configuration document and converges the set of running
// channel tasks to it.  Configuration is always replace, never patch: a
// channel named in the document is stopped and started afresh; a channel not
// named is stopped.  Each channel is applied independently, so one bad entry
// does not prevent the others from running.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::acquisition::Acquire;
use crate::buffer::PacketBuffer;
use crate::config::*;
use crate::error::{ChannelError, ConfigError};
use crate::events::Signal;
use crate::tasks::channel::{self, ChannelSpec, ChannelTaskHandle};
use crate::transport::Publisher;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawDocument {
    #[serde(rename = "MQTT_TOPIC_PREFIX")]
    prefix: String,
    #[serde(rename = "BIOSIGNALS")]
    biosignals: Map<String, Value>,
}

/// Settings for one signal as sent by the remote unit. Unknown keys
/// (e.g. `fpacket`) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelSettings {
    pub fsample: f64,
    #[serde(default)]
    pub overlay: i64,
    pub npacket: i64,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    DEFAULT_CHANNEL_PRIORITY as i64
}

struct ValidSettings {
    period: Duration,
    packet_len: usize,
    overlap: usize,
    priority: u8,
}

impl ChannelSettings {
    fn validate(&self) -> Result<ValidSettings, ChannelError> {
        let invalid = |msg: String| Err(ChannelError::InvalidSettings(msg));

        if !self.fsample.is_finite() || self.fsample <= 0.0 {
            return invalid(format!("fsample must be a positive rate, got {}", self.fsample));
        }
        let period = match Duration::try_from_secs_f64(1.0 / self.fsample) {
            Ok(p) => p,
            Err(_) => return invalid(format!("fsample {} Hz is too low", self.fsample)),
        };
        if period.is_zero() {
            return invalid(format!("fsample {} Hz is too high", self.fsample));
        }
        if self.npacket <= 0 {
            return invalid(format!("npacket must be > 0, got {}", self.npacket));
        }
        if self.overlay < 0 || self.overlay >= self.npacket {
            return invalid(format!(
                "overlay must be in [0, npacket), got {} with npacket {}",
                self.overlay, self.npacket
            ));
        }
        if self.priority < 1 || self.priority > MAX_CHANNEL_PRIORITY as i64 {
            return invalid(format!(
                "priority must be in [1, {}], got {}",
                MAX_CHANNEL_PRIORITY, self.priority
            ));
        }

        Ok(ValidSettings {
            period,
            packet_len: self.npacket as usize,
            overlap: self.overlay as usize,
            priority: self.priority as u8,
        })
    }
}

/// A parsed configuration document. Entries keep document order; an entry
/// whose settings object is malformed carries the parse message instead.
#[derive(Debug)]
pub struct ConfigDocument {
    pub prefix: String,
    pub entries: Vec<(String, Result<ChannelSettings, String>)>,
}

impl ConfigDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_json::from_slice(bytes)?;
        let entries = raw
            .biosignals
            .into_iter()
            .map(|(name, value)| {
                let settings = serde_json::from_value::<ChannelSettings>(value).map_err(|e| e.to_string());
                (name, settings)
            })
            .collect();
        Ok(Self { prefix: raw.prefix, entries })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

/// Data topic for `signal` under `prefix`.
pub fn topic_for(prefix: &str, signal: Signal) -> String {
    if prefix.is_empty() {
        signal.name().to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, signal.name())
    } else {
        format!("{}/{}", prefix, signal.name())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct ReconciliationReport {
    pub started: Vec<Signal>,
    pub stopped: Vec<Signal>,
    pub rejected: Vec<(String, ChannelError)>,
}

pub struct ReconfigurationController {
    acquirer: Arc<dyn Acquire>,
    publisher: Arc<dyn Publisher>,
    slots: [Option<ChannelTaskHandle>; Signal::COUNT],
    memory_budget: usize,
}

impl ReconfigurationController {
    pub fn new(acquirer: Arc<dyn Acquire>, publisher: Arc<dyn Publisher>) -> Self {
        Self::with_memory_budget(acquirer, publisher, CHANNEL_MEMORY_BUDGET)
    }

    pub fn with_memory_budget(acquirer: Arc<dyn Acquire>, publisher: Arc<dyn Publisher>, memory_budget: usize) -> Self {
        Self {
            acquirer,
            publisher,
            slots: Default::default(),
            memory_budget,
        }
    }

    /// Reconcile running channels with `document`.
    ///
    /// A malformed document changes nothing and returns `ConfigError`.
    pub fn apply(&mut self, document: &[u8]) -> Result<ReconciliationReport, ConfigError> {
        let doc = ConfigDocument::parse(document)?;
        let mut report = ReconciliationReport::default();

        for signal in Signal::ALL {
            let named = doc.names().any(|n| n == signal.name());
            if !named && self.stop_slot(signal) {
                report.stopped.push(signal);
            }
        }

        for (name, settings) in &doc.entries {
            match self.apply_entry(&doc.prefix, name, settings, &mut report) {
                Ok(signal) => report.started.push(signal),
                Err(e) => {
                    log::warn!("Channel {} not started: {}", name, e);
                    report.rejected.push((name.clone(), e));
                }
            }
        }

        log::info!(
            "Reconfigured: started {:?}, stopped {:?}, {} rejected",
            report.started,
            report.stopped,
            report.rejected.len()
        );
        Ok(report)
    }

    fn apply_entry(
        &mut self,
        prefix: &str,
        name: &str,
        settings: &Result<ChannelSettings, String>,
        report: &mut ReconciliationReport,
    ) -> Result<Signal, ChannelError> {
        let signal = Signal::from_name(name)
            .filter(|s| self.acquirer.supports(*s))
            .ok_or_else(|| ChannelError::UnknownSignal(name.to_string()))?;

        if self.stop_slot(signal) {
            report.stopped.push(signal);
        }

        let settings = settings.as_ref().map_err(|e| ChannelError::InvalidSettings(e.clone()))?;
        let valid = settings.validate()?;

        let needed = footprint(signal, valid.packet_len);
        let in_use: usize = self
            .slots
            .iter()
            .flatten()
            .map(|h| footprint(h.spec().signal, h.spec().packet_len))
            .sum();
        if in_use.saturating_add(needed) > self.memory_budget {
            return Err(ChannelError::AllocationFailure { bytes: needed });
        }

        let buffer = PacketBuffer::new(signal.element_type(), valid.packet_len, valid.overlap)?;
        let spec = ChannelSpec {
            signal,
            period: valid.period,
            packet_len: valid.packet_len,
            overlap: valid.overlap,
            priority: valid.priority,
            topic: topic_for(prefix, signal),
        };

        let handle = channel::start(spec, buffer, Arc::clone(&self.acquirer), Arc::clone(&self.publisher))?;
        self.slots[signal.slot()] = Some(handle);
        Ok(signal)
    }

    /// Stop the task in `signal`'s slot, if any, and release its buffer.
    /// Returns whether a task was running.
    fn stop_slot(&mut self, signal: Signal) -> bool {
        match self.slots[signal.slot()].take() {
            Some(handle) => {
                // The buffer comes back only once the thread has exited.
                drop(handle.stop());
                true
            }
            None => false,
        }
    }

    /// Specs of all running channels, in slot order.
    pub fn running(&self) -> Vec<ChannelSpec> {
        self.slots.iter().flatten().map(|h| h.spec().clone()).collect()
    }

    pub fn is_running(&self, signal: Signal) -> bool {
        self.slots[signal.slot()].is_some()
    }

    pub fn shutdown(&mut self) {
        for signal in Signal::ALL {
            self.stop_slot(signal);
        }
    }
}

impl Drop for ReconfigurationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bytes reserved by one channel: the sample window plus its encode scratch.
fn footprint(signal: Signal, packet_len: usize) -> usize {
    packet_len.saturating_mul(signal.element_type().size()).saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{decode_i16, init_logger, MockBoard, RecordingTransport};

    fn controller(board: MockBoard) -> (ReconfigurationController, Arc<RecordingTransport>) {
        init_logger();
        let transport = Arc::new(RecordingTransport::new());
        (ReconfigurationController::new(Arc::new(board), transport.clone()), transport)
    }

    const TWO_FAST: &[u8] = br#"{"MQTT_TOPIC_PREFIX":"signal/","BIOSIGNALS":{
        "ECG":{"fsample":1000,"overlay":2,"npacket":10,"priority":10},
        "TEMP":{"fsample":500,"overlay":0,"npacket":4,"priority":5}}}"#;

    #[test]
    fn ecg_scenario_streams_overlapping_packets() {
        let (mut ctl, transport) = controller(MockBoard::counting());
        let doc = br#"{"MQTT_TOPIC_PREFIX":"signal/","BIOSIGNALS":{"ECG":{"fsample":220,"overlay":20,"npacket":200,"priority":10}}}"#;

        let report = ctl.apply(doc).unwrap();
        assert_eq!(report.started, vec![Signal::Ecg]);

        let running = ctl.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].topic, "signal/ECG");
        assert_eq!(running[0].packet_len, 200);
        assert_eq!(running[0].overlap, 20);
        assert_eq!(running[0].priority, 10);
        assert_eq!(running[0].period, Duration::from_secs_f64(1.0 / 220.0));

        let packets = transport.wait_for_packets("signal/ECG", 2, Duration::from_secs(10));
        ctl.shutdown();

        let first = decode_i16(&packets[0]);
        let second = decode_i16(&packets[1]);
        assert_eq!(first.len(), 200);
        assert_eq!(second.len(), 200);
        assert_eq!(&second[..20], &first[180..]);
    }

    #[test]
    fn unknown_signal_is_skipped_others_apply() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        let doc = br#"{"MQTT_TOPIC_PREFIX":"signal/","BIOSIGNALS":{
            "ECG":{"fsample":1000,"overlay":2,"npacket":10,"priority":10},
            "EMG":{"fsample":1000,"overlay":2,"npacket":10,"priority":10},
            "PPGRed":{"fsample":1000,"overlay":5,"npacket":50,"priority":10}}}"#;

        let report = ctl.apply(doc).unwrap();
        assert_eq!(report.started, vec![Signal::Ecg, Signal::PpgRed]);
        assert_eq!(report.rejected, vec![("EMG".to_string(), ChannelError::UnknownSignal("EMG".into()))]);
        let topics: Vec<String> = ctl.running().into_iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec!["signal/ECG", "signal/PPGRed"]);
    }

    #[test]
    fn signal_without_front_end_counts_as_unknown() {
        let (mut ctl, _t) = controller(MockBoard::only(&[Signal::Ecg]));
        let doc = br#"{"MQTT_TOPIC_PREFIX":"s","BIOSIGNALS":{"GSR":{"fsample":10,"npacket":5}}}"#;

        let report = ctl.apply(doc).unwrap();
        assert!(report.started.is_empty());
        assert!(matches!(report.rejected[0].1, ChannelError::UnknownSignal(_)));
    }

    #[test]
    fn applying_twice_converges_to_same_channels() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        ctl.apply(TWO_FAST).unwrap();
        let first = ctl.running();

        let report = ctl.apply(TWO_FAST).unwrap();
        assert_eq!(ctl.running(), first);
        assert_eq!(report.started, vec![Signal::Ecg, Signal::Temp]);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn channels_absent_from_new_document_are_stopped() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        ctl.apply(TWO_FAST).unwrap();

        let doc = br#"{"MQTT_TOPIC_PREFIX":"other","BIOSIGNALS":{"TEMP":{"fsample":500,"npacket":4}}}"#;
        let report = ctl.apply(doc).unwrap();

        assert!(report.stopped.contains(&Signal::Ecg));
        assert!(!ctl.is_running(Signal::Ecg));
        let running = ctl.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].topic, "other/TEMP");
        assert_eq!(running[0].priority, DEFAULT_CHANNEL_PRIORITY);
    }

    #[test]
    fn malformed_document_keeps_running_configuration() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        ctl.apply(TWO_FAST).unwrap();
        let before = ctl.running();

        assert!(matches!(ctl.apply(b"{\"MQTT_TOPIC_PREFIX\": "), Err(ConfigError::Parse(_))));
        assert!(matches!(ctl.apply(br#"{"BIOSIGNALS":{}}"#), Err(ConfigError::Parse(_))));
        assert_eq!(ctl.running(), before);
    }

    #[test]
    fn invalid_settings_replace_running_channel_with_nothing() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        ctl.apply(TWO_FAST).unwrap();

        let doc = br#"{"MQTT_TOPIC_PREFIX":"signal/","BIOSIGNALS":{
            "ECG":{"fsample":1000,"overlay":10,"npacket":10,"priority":10},
            "TEMP":{"fsample":500,"overlay":0,"npacket":4,"priority":5}}}"#;
        let report = ctl.apply(doc).unwrap();

        assert_eq!(report.started, vec![Signal::Temp]);
        assert!(matches!(report.rejected[0].1, ChannelError::InvalidSettings(_)));
        assert!(!ctl.is_running(Signal::Ecg));
    }

    #[test]
    fn rejects_bad_rates_and_types() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        let doc = br#"{"MQTT_TOPIC_PREFIX":"p/","BIOSIGNALS":{
            "ECG":{"fsample":0,"npacket":10},
            "PPGRed":{"fsample":100,"npacket":0},
            "PPGIR":{"fsample":100,"npacket":"ten"},
            "GSR":{"fsample":100,"npacket":10,"overlay":-1},
            "RESP":{"fsample":100,"npacket":10,"priority":0}}}"#;

        let report = ctl.apply(doc).unwrap();
        assert!(report.started.is_empty());
        assert_eq!(report.rejected.len(), 5);
        assert!(report.rejected.iter().all(|(_, e)| matches!(e, ChannelError::InvalidSettings(_))));
    }

    #[test]
    fn vanishing_rate_is_rejected_others_apply() {
        let (mut ctl, _t) = controller(MockBoard::counting());
        let doc = br#"{"MQTT_TOPIC_PREFIX":"p","BIOSIGNALS":{
            "ECG":{"fsample":1e-300,"npacket":10},
            "TEMP":{"fsample":500,"npacket":4}}}"#;

        let report = ctl.apply(doc).unwrap();
        assert_eq!(report.started, vec![Signal::Temp]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "ECG");
        assert!(matches!(report.rejected[0].1, ChannelError::InvalidSettings(_)));
        assert!(!ctl.is_running(Signal::Ecg));
        assert!(ctl.is_running(Signal::Temp));
    }

    #[test]
    fn memory_budget_limits_channel_buffers() {
        init_logger();
        let transport = Arc::new(RecordingTransport::new());
        // ECG needs 10 * 2 * 2 = 40 bytes, TEMP 4 * 4 * 2 = 32 bytes.
        let mut ctl = ReconfigurationController::with_memory_budget(Arc::new(MockBoard::counting()), transport, 50);

        let report = ctl.apply(TWO_FAST).unwrap();
        assert_eq!(report.started, vec![Signal::Ecg]);
        assert_eq!(report.rejected, vec![("TEMP".to_string(), ChannelError::AllocationFailure { bytes: 32 })]);
    }

    #[test]
    fn topics_are_derived_from_prefix() {
        assert_eq!(topic_for("signal/", Signal::Ecg), "signal/ECG");
        assert_eq!(topic_for("signal", Signal::PpgRed), "signal/PPGRed");
        assert_eq!(topic_for("", Signal::Temp), "TEMP");
    }

    #[test]
    fn document_keeps_entry_order() {
        let doc = ConfigDocument::parse(
            br#"{"MQTT_TOPIC_PREFIX":"p","BIOSIGNALS":{"TEMP":{"fsample":1,"npacket":2},"ECG":{"fsample":1,"npacket":2,"fpacket":0.5}}}"#,
        )
        .unwrap();
        assert_eq!(doc.names().collect::<Vec<_>>(), vec!["TEMP", "ECG"]);
        assert!(doc.entries.iter().all(|(_, s)| s.is_ok()));
    }
}
