// biostream — Connectivity Supervisor
//
// Drives broker (re)connection.  State is kept in atomics because it is
// written from two contexts: the control loop (link events, ticks) and the
// MQTT client's event callback (broker disconnects).  Retries never give up.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::*;
use crate::transport::{QoS, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

pub struct ConnectivitySupervisor {
    link_up: AtomicBool,
    needs_reconnect: AtomicBool,
    last_attempt_ms: AtomicU32,
    failures: AtomicU32,
    /// Bumped on every broker disconnect; an attempt that saw it move
    /// cannot claim the session.
    disconnects: AtomicU32,
    state: AtomicU8,
}

impl Default for ConnectivitySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySupervisor {
    pub fn new() -> Self {
        Self {
            link_up: AtomicBool::new(false),
            needs_reconnect: AtomicBool::new(false),
            last_attempt_ms: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            state: AtomicU8::new(ConnState::Disconnected as u8),
        }
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn needs_reconnect(&self) -> bool {
        self.needs_reconnect.load(Ordering::Acquire)
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub fn on_link_up<T: Transport + ?Sized>(&self, transport: &T, now_ms: u32) {
        log::info!("Link up — connecting to broker");
        self.link_up.store(true, Ordering::Release);
        self.attempt(transport, now_ms);
    }

    pub fn on_link_down(&self) {
        log::warn!("Link down — broker session lost until link returns");
        self.link_up.store(false, Ordering::Release);
        self.needs_reconnect.store(false, Ordering::Release);
        self.state.store(ConnState::Disconnected as u8, Ordering::Release);
    }

    /// Broker-reported disconnect (callback context).
    pub fn on_broker_disconnected(&self, now_ms: u32) {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        self.state.store(ConnState::Disconnected as u8, Ordering::Release);
        if self.is_link_up() {
            log::warn!("Broker disconnected — retrying in {} ms", RECONNECT_INTERVAL_MS);
            self.last_attempt_ms.store(now_ms, Ordering::Release);
            self.needs_reconnect.store(true, Ordering::Release);
        }
    }

    pub fn on_subscribed(&self, msg_id: u32) {
        log::debug!("Subscription acknowledged (msg {})", msg_id);
    }

    /// Called on every control-loop tick. Returns `true` if an attempt was made.
    pub fn tick<T: Transport + ?Sized>(&self, transport: &T, now_ms: u32) -> bool {
        if !self.is_link_up() || !self.needs_reconnect() {
            return false;
        }
        let elapsed = now_ms.wrapping_sub(self.last_attempt_ms.load(Ordering::Acquire));
        if elapsed < RECONNECT_INTERVAL_MS {
            return false;
        }
        self.attempt(transport, now_ms);
        true
    }

    fn attempt<T: Transport + ?Sized>(&self, transport: &T, now_ms: u32) -> bool {
        self.state.store(ConnState::Connecting as u8, Ordering::Release);
        self.last_attempt_ms.store(now_ms, Ordering::Release);
        let epoch = self.disconnects.load(Ordering::Acquire);

        if transport.connect() && self.open_session(transport) {
            if self
                .state
                .compare_exchange(
                    ConnState::Connecting as u8,
                    ConnState::Connected as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
                || self.disconnects.load(Ordering::Acquire) != epoch
            {
                // Lost while opening; the disconnect already scheduled a retry.
                self.state.store(ConnState::Disconnected as u8, Ordering::Release);
                log::warn!("Broker session dropped while opening");
                return false;
            }
            self.needs_reconnect.store(false, Ordering::Release);
            self.failures.store(0, Ordering::Relaxed);
            log::info!("Broker connected");
            true
        } else {
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            self.state.store(ConnState::Disconnected as u8, Ordering::Release);
            self.needs_reconnect.store(true, Ordering::Release);
            log::warn!(
                "Broker connection failed ({} in a row) — retrying in {} ms",
                failures,
                RECONNECT_INTERVAL_MS
            );
            false
        }
    }

    /// Subscribe to the config topic and announce presence.
    fn open_session<T: Transport + ?Sized>(&self, transport: &T) -> bool {
        if let Err(e) = transport.subscribe(CONFIG_TOPIC, QoS::AtLeastOnce) {
            log::error!("Subscribe to '{}' failed: {}", CONFIG_TOPIC, e);
            return false;
        }
        if let Err(e) = transport.publish(CONFIG_TOPIC, QoS::AtLeastOnce, false, PRESENCE_MESSAGE) {
            // The session is usable without the announcement.
            log::warn!("Presence announcement failed: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testutil::{init_logger, RecordingTransport};
    use crate::transport::Publisher;

    fn calls(t: &RecordingTransport) -> usize {
        t.connect_calls.load(Ordering::SeqCst)
    }

    #[test]
    fn retries_every_five_seconds_until_connected() {
        init_logger();
        let transport = RecordingTransport::with_connect_script(&[false, false, false, true]);
        let sup = ConnectivitySupervisor::new();

        let mut attempts_at = Vec::new();
        sup.on_link_up(&transport, 0);
        attempts_at.push(0u32);

        let mut now = 0;
        while now < 30_000 {
            now += 100;
            let before = calls(&transport);
            sup.tick(&transport, now);
            if calls(&transport) > before {
                attempts_at.push(now);
            }
        }

        assert_eq!(attempts_at.len(), 4);
        for pair in attempts_at.windows(2) {
            assert!(pair[1] - pair[0] >= 5000, "attempts {:?}", attempts_at);
        }
        assert_eq!(sup.state(), ConnState::Connected);
        assert!(!sup.needs_reconnect());

        assert_eq!(transport.subscriptions(), vec![CONFIG_TOPIC.to_string()]);
        let announcements = transport.published_to(CONFIG_TOPIC);
        assert_eq!(announcements, vec![PRESENCE_MESSAGE.to_vec()]);
        let presence = &transport.published()[0];
        assert_eq!(presence.qos, QoS::AtLeastOnce);
        assert!(!presence.retain);
    }

    #[test]
    fn broker_disconnect_schedules_retry() {
        let transport = RecordingTransport::new();
        let sup = ConnectivitySupervisor::new();
        sup.on_link_up(&transport, 1000);
        assert_eq!(sup.state(), ConnState::Connected);

        sup.on_broker_disconnected(2000);
        assert_eq!(sup.state(), ConnState::Disconnected);
        assert!(sup.needs_reconnect());

        assert!(!sup.tick(&transport, 6999));
        assert!(sup.tick(&transport, 7000));
        assert_eq!(sup.state(), ConnState::Connected);
        assert_eq!(transport.subscriptions().len(), 2);
    }

    #[test]
    fn no_retries_while_link_is_down() {
        let transport = RecordingTransport::with_connect_script(&[false]);
        let sup = ConnectivitySupervisor::new();
        sup.on_link_up(&transport, 0);
        sup.on_link_down();

        assert!(!sup.tick(&transport, 60_000));
        assert_eq!(calls(&transport), 1);

        // Broker events after link loss do not schedule retries either.
        sup.on_broker_disconnected(61_000);
        assert!(!sup.needs_reconnect());
    }

    #[test]
    fn failed_subscribe_counts_as_failed_attempt() {
        let transport = RecordingTransport::new();
        transport.set_online(false);
        let sup = ConnectivitySupervisor::new();
        sup.on_link_up(&transport, 0);
        assert_eq!(sup.state(), ConnState::Disconnected);
        assert!(sup.needs_reconnect());

        transport.set_online(true);
        assert!(sup.tick(&transport, 5000));
        assert_eq!(sup.state(), ConnState::Connected);
    }

    /// Broker that drops the first session while the subscription is in flight.
    struct DropsFirstSession<'a> {
        sup: &'a ConnectivitySupervisor,
        dropped: AtomicBool,
        inner: RecordingTransport,
    }

    impl Publisher for DropsFirstSession<'_> {
        fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), TransportError> {
            self.inner.publish(topic, qos, retain, payload)
        }
    }

    impl Transport for DropsFirstSession<'_> {
        fn connect(&self) -> bool {
            self.inner.connect()
        }

        fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
            if !self.dropped.swap(true, Ordering::SeqCst) {
                self.sup.on_broker_disconnected(10);
            }
            self.inner.subscribe(topic, qos)
        }
    }

    #[test]
    fn disconnect_while_opening_session_is_retried() {
        init_logger();
        let sup = ConnectivitySupervisor::new();
        let transport = DropsFirstSession { sup: &sup, dropped: AtomicBool::new(false), inner: RecordingTransport::new() };

        sup.on_link_up(&transport, 0);
        assert_eq!(sup.state(), ConnState::Disconnected);
        assert!(sup.needs_reconnect());

        assert!(!sup.tick(&transport, 5009));
        assert!(sup.tick(&transport, 60_000));
        assert_eq!(sup.state(), ConnState::Connected);
        assert!(!sup.needs_reconnect());
        assert_eq!(transport.inner.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_survives_clock_wrap() {
        let transport = RecordingTransport::with_connect_script(&[false]);
        let sup = ConnectivitySupervisor::new();
        sup.on_link_up(&transport, u32::MAX - 1000);

        assert!(!sup.tick(&transport, 2000));
        assert!(sup.tick(&transport, 4000));
    }
}
