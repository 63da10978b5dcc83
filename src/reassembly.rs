// biostream — Configuration Message Reassembly
//
// The broker client splits large messages into chunks.  Chunks of one message
// arrive in increasing, contiguous order; index 0 always starts a new message
// and discards whatever was in flight.

use std::sync::mpsc::Sender;

use crate::config::*;
use crate::events::InboundFragment;
use crate::router::MessageHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Oversized { total: usize },
    AllocationFailure { total: usize },
    /// Continuation chunk with nothing in flight for its topic.
    NoPendingMessage,
    /// Continuation chunk declares a different total than its first chunk.
    TotalMismatch { expected: usize, got: usize },
    Overflow { expected: usize, got: usize },
}

#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    Pending,
    Complete(Vec<u8>),
    Rejected(RejectReason),
}

#[derive(Debug)]
struct PendingPayload {
    topic: String,
    data: Vec<u8>,
    expected_total: usize,
}

impl PendingPayload {
    fn received(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug)]
pub struct Reassembler {
    max_total: usize,
    pending: Option<PendingPayload>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(MAX_CONFIG_SIZE)
    }
}

impl Reassembler {
    pub fn new(max_total: usize) -> Self {
        Self { max_total, pending: None }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn on_fragment(&mut self, fragment: &InboundFragment<'_>) -> FragmentOutcome {
        let total = fragment.total;

        if total > self.max_total {
            // Nothing of this message is kept, nor anything it interrupted.
            self.pending = None;
            return FragmentOutcome::Rejected(RejectReason::Oversized { total });
        }

        if fragment.index == 0 {
            self.pending = None;
            let mut data = Vec::new();
            if data.try_reserve_exact(total).is_err() {
                return FragmentOutcome::Rejected(RejectReason::AllocationFailure { total });
            }
            self.pending = Some(PendingPayload {
                topic: fragment.topic.to_string(),
                data,
                expected_total: total,
            });
        }

        let Some(pending) = self.pending.as_mut() else {
            return FragmentOutcome::Rejected(RejectReason::NoPendingMessage);
        };
        if pending.topic != fragment.topic {
            return FragmentOutcome::Rejected(RejectReason::NoPendingMessage);
        }
        if pending.expected_total != total {
            let expected = pending.expected_total;
            self.pending = None;
            return FragmentOutcome::Rejected(RejectReason::TotalMismatch { expected, got: total });
        }

        let got = pending.received() + fragment.payload.len();
        if got > pending.expected_total {
            let expected = pending.expected_total;
            self.pending = None;
            return FragmentOutcome::Rejected(RejectReason::Overflow { expected, got });
        }
        pending.data.extend_from_slice(fragment.payload);
        if pending.received() < pending.expected_total {
            return FragmentOutcome::Pending;
        }

        self.pending
            .take()
            .map_or(FragmentOutcome::Pending, |done| FragmentOutcome::Complete(done.data))
    }
}

// ---------------------------------------------------------------------------
// Config topic handler — reassembles and forwards whole documents
// ---------------------------------------------------------------------------

/// Router endpoint for the config topic. Completed documents are queued to
/// the control loop, which owns the reconfiguration controller.
pub struct ConfigTopicHandler {
    reassembler: Reassembler,
    documents: Sender<Vec<u8>>,
}

impl ConfigTopicHandler {
    pub fn new(documents: Sender<Vec<u8>>) -> Self {
        Self { reassembler: Reassembler::default(), documents }
    }
}

impl MessageHandler for ConfigTopicHandler {
    fn handle(&mut self, fragment: &InboundFragment<'_>) {
        match self.reassembler.on_fragment(fragment) {
            FragmentOutcome::Pending => {
                log::debug!(
                    "Config chunk #{} ({} of {} bytes)",
                    fragment.index,
                    fragment.payload.len(),
                    fragment.total
                );
            }
            FragmentOutcome::Complete(document) => {
                log::info!("Config document received ({} bytes)", document.len());
                if self.documents.send(document).is_err() {
                    log::warn!("Control loop gone — config document dropped");
                }
            }
            FragmentOutcome::Rejected(reason) => {
                log::warn!("Config chunk #{} rejected: {:?}", fragment.index, reason);
            }
        }
    }
}
