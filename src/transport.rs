// biostream — Broker Transport Interface
//
// The MQTT client itself lives in the platform layer.  The core only needs
// publish from channel tasks and connect/subscribe from the supervisor, all
// through `&self` so one client can be shared behind an `Arc`.

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Outbound half, shared by every channel task.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), TransportError>;
}

/// Full broker session as driven by the connectivity supervisor.
pub trait Transport: Publisher {
    /// One connection attempt, no internal retry.
    fn connect(&self) -> bool;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;
}
