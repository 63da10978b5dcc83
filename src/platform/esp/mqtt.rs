// biostream — ESP-IDF MQTT Transport
//
// Wraps `EspMqttClient`.  Each `connect()` builds a fresh client and waits for
// the broker's CONNACK; on timeout the client is dropped so the IDF client's
// own reconnect logic never runs behind the supervisor's back.
//
// The IDF client delivers messages larger than its input buffer in chunks:
// only the first chunk carries the topic, later ones carry an offset.  Those
// are mapped onto indexed fragments for the reassembler here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EspMqttEvent, EventPayload, InitialChunkData, MqttClientConfiguration,
    QoS as EspQoS, SubsequentChunkData,
};

use crate::config::*;
use crate::error::TransportError;
use crate::events::InboundFragment;
use crate::tasks::control::NetworkEvents;
use crate::transport::{Publisher, QoS, Transport};

fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

pub struct EspTransport {
    settings: NodeSettings,
    events: Arc<Mutex<NetworkEvents>>,
    client: Mutex<Option<Session>>,
}

/// A client plus the flag that silences its callback once it is replaced.
struct Session {
    client: EspMqttClient<'static>,
    live: Arc<AtomicBool>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
    }
}

impl EspTransport {
    pub fn new(settings: NodeSettings, events: Arc<Mutex<NetworkEvents>>) -> Self {
        Self { settings, events, client: Mutex::new(None) }
    }
}

/// Tracks the topic and chunk count of the message currently being delivered.
#[derive(Default)]
struct ChunkCursor {
    topic: String,
    index: u32,
}

impl ChunkCursor {
    fn dispatch(&mut self, events: &Mutex<NetworkEvents>, topic: Option<&str>, data: &[u8], details: &Details) {
        let total = match details {
            Details::Complete => {
                self.topic = topic.unwrap_or_default().to_string();
                self.index = 0;
                data.len()
            }
            Details::InitialChunk(InitialChunkData { total_data_size }) => {
                self.topic = topic.unwrap_or_default().to_string();
                self.index = 0;
                *total_data_size
            }
            Details::SubsequentChunk(SubsequentChunkData { total_data_size, .. }) => {
                self.index += 1;
                *total_data_size
            }
        };

        let fragment = InboundFragment { topic: &self.topic, payload: data, index: self.index, total };
        events.lock().unwrap().on_message(&fragment);
    }
}

impl Publisher for EspTransport {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.client.lock().unwrap();
        let client = &mut guard.as_mut().ok_or(TransportError::NotConnected)?.client;
        // `enqueue` hands the message to the client's outbox without waiting
        // on the socket, so a sampling task is never blocked by the network.
        client
            .enqueue(topic, esp_qos(qos), retain, payload)
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

impl Transport for EspTransport {
    fn connect(&self) -> bool {
        // Drop any previous session first.
        self.client.lock().unwrap().take();

        let (conn_tx, conn_rx) = mpsc::channel::<bool>();
        let events = Arc::clone(&self.events);
        let live = Arc::new(AtomicBool::new(true));
        let callback_live = Arc::clone(&live);
        let mut cursor = ChunkCursor::default();

        let conf = MqttClientConfiguration {
            client_id: Some(self.settings.client_id),
            ..Default::default()
        };

        let callback = move |event: EspMqttEvent<'_>| match event.payload() {
            EventPayload::Connected(_) => {
                let _ = conn_tx.send(true);
            }
            EventPayload::Disconnected => {
                let _ = conn_tx.send(false);
                if callback_live.load(Ordering::Acquire) {
                    events.lock().unwrap().on_disconnected(crate::now_ms());
                }
            }
            EventPayload::Subscribed(id) => {
                events.lock().unwrap().on_subscribed(id);
            }
            EventPayload::Received { topic, data, details, .. } => {
                cursor.dispatch(&events, topic, data, &details);
            }
            EventPayload::Error(e) => {
                log::warn!("MQTT client error: {:?}", e);
            }
            _ => {}
        };

        let client = match EspMqttClient::new_cb(self.settings.broker_url, &conf, callback) {
            Ok(c) => c,
            Err(e) => {
                log::error!("MQTT client init failed: {}", e);
                return false;
            }
        };

        match conn_rx.recv_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS)) {
            Ok(true) => {
                *self.client.lock().unwrap() = Some(Session { client, live });
                true
            }
            Ok(false) => {
                live.store(false, Ordering::Release);
                log::warn!("Broker {} closed the connection before CONNACK", self.settings.broker_url);
                false
            }
            Err(_) => {
                live.store(false, Ordering::Release);
                log::warn!("No CONNACK from {} within {} ms", self.settings.broker_url, CONNECT_TIMEOUT_MS);
                false
            }
        }
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut guard = self.client.lock().unwrap();
        let client = &mut guard.as_mut().ok_or(TransportError::NotConnected)?.client;
        client
            .subscribe(topic, esp_qos(qos))
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}
