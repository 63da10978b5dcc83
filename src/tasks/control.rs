// biostream — Control Loop & Network Event Sink
//
// Two concurrency domains meet here:
//   * `NetworkEvents` runs inside the MQTT client's callback context. It routes
//     inbound messages and flags broker disconnects, nothing more.
//   * `ControlLoop` is the single polling thread. It reacts to link events,
//     ticks the connectivity supervisor and applies completed config documents.
// They communicate only through `mpsc` channels and the supervisor's atomics.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::*;
use crate::events::{InboundFragment, LinkEvent};
use crate::reassembly::ConfigTopicHandler;
use crate::reconfig::ReconfigurationController;
use crate::router::{RouteOutcome, TopicRouter};
use crate::supervisor::ConnectivitySupervisor;
use crate::transport::Transport;

/// Callback-side half: everything the broker client needs to report into.
pub struct NetworkEvents {
    router: TopicRouter,
    supervisor: Arc<ConnectivitySupervisor>,
}

impl NetworkEvents {
    /// Route table: the config topic feeds the reassembler, whose completed
    /// documents go to `documents`.
    pub fn new(supervisor: Arc<ConnectivitySupervisor>, documents: Sender<Vec<u8>>) -> Self {
        let router = TopicRouter::new().with_route(CONFIG_TOPIC, ConfigTopicHandler::new(documents));
        Self { router, supervisor }
    }

    pub fn on_message(&mut self, fragment: &InboundFragment<'_>) -> RouteOutcome {
        self.router.route(fragment)
    }

    pub fn on_disconnected(&self, now_ms: u32) {
        self.supervisor.on_broker_disconnected(now_ms);
    }

    pub fn on_subscribed(&self, msg_id: u32) {
        self.supervisor.on_subscribed(msg_id);
    }
}

/// Polling-side half.
pub struct ControlLoop<T: Transport + 'static> {
    transport: Arc<T>,
    supervisor: Arc<ConnectivitySupervisor>,
    controller: ReconfigurationController,
    link_rx: Receiver<LinkEvent>,
    doc_rx: Receiver<Vec<u8>>,
}

impl<T: Transport + 'static> ControlLoop<T> {
    pub fn new(
        transport: Arc<T>,
        supervisor: Arc<ConnectivitySupervisor>,
        controller: ReconfigurationController,
        link_rx: Receiver<LinkEvent>,
        doc_rx: Receiver<Vec<u8>>,
    ) -> Self {
        Self { transport, supervisor, controller, link_rx, doc_rx }
    }

    pub fn controller(&self) -> &ReconfigurationController {
        &self.controller
    }

    /// One non-blocking pass over all inputs.
    pub fn poll(&mut self, now_ms: u32) {
        while let Ok(event) = self.link_rx.try_recv() {
            match event {
                LinkEvent::Up => self.supervisor.on_link_up(&*self.transport, now_ms),
                LinkEvent::Down => self.supervisor.on_link_down(),
            }
        }

        self.supervisor.tick(&*self.transport, now_ms);

        while let Ok(document) = self.doc_rx.try_recv() {
            match self.controller.apply(&document) {
                Ok(report) if !report.rejected.is_empty() => {
                    for (name, reason) in &report.rejected {
                        log::warn!("  {}: {}", name, reason);
                    }
                }
                Ok(_) => {}
                Err(e) => log::error!("{} — keeping current configuration", e),
            }
        }
    }

    pub fn run(mut self) -> ! {
        log::info!("Control loop started");
        let interval = Duration::from_millis(POLL_INTERVAL_MS);
        loop {
            self.poll(crate::now_ms());
            thread::sleep(interval);
        }
    }
}
