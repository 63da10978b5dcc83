// biostream — Channel Task
//
// One thread per active signal.  Wakes on an absolute deadline, acquires one
// reading, appends it to the channel's window and publishes the window each
// time it fills.  The packet buffer is moved into the thread at start and
// handed back through `join()` so it is never released while still in use.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::acquisition::{Acquire, SampleFilter};
use crate::buffer::{Append, PacketBuffer};
use crate::config::*;
use crate::error::ChannelError;
use crate::events::{Reading, Signal};
use crate::platform;
use crate::transport::{Publisher, QoS};

/// Immutable description of one running channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub signal: Signal,
    pub period: Duration,
    pub packet_len: usize,
    pub overlap: usize,
    pub priority: u8,
    pub topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Controller-side reference to a running channel thread.
pub struct ChannelTaskHandle {
    spec: ChannelSpec,
    state: Arc<AtomicU8>,
    stop_tx: Sender<()>,
    join: JoinHandle<PacketBuffer>,
}

impl ChannelTaskHandle {
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Request a stop and block until the thread has exited.
    ///
    /// Returns the buffer the task owned, or `None` if the thread panicked.
    /// Latency is bounded by one sample period.
    pub fn stop(self) -> Option<PacketBuffer> {
        self.state.store(TaskState::Stopping as u8, Ordering::Release);
        let _ = self.stop_tx.send(());

        let result = self.join.join();
        self.state.store(TaskState::Stopped as u8, Ordering::Release);
        match result {
            Ok(buffer) => {
                log::info!("Channel {} stopped", self.spec.signal);
                Some(buffer)
            }
            Err(_) => {
                log::error!("Channel {} task panicked", self.spec.signal);
                None
            }
        }
    }
}

/// Spawn the acquisition thread for `spec`, transferring `buffer` into it.
pub fn start(
    spec: ChannelSpec,
    buffer: PacketBuffer,
    acquirer: Arc<dyn Acquire>,
    publisher: Arc<dyn Publisher>,
) -> Result<ChannelTaskHandle, ChannelError> {
    let packet_bytes = buffer.packet_bytes();
    let mut scratch = Vec::new();
    scratch
        .try_reserve_exact(packet_bytes)
        .map_err(|_| ChannelError::AllocationFailure { bytes: packet_bytes })?;

    let filter = acquirer.filter_for(spec.signal);
    let state = Arc::new(AtomicU8::new(TaskState::Created as u8));
    let (stop_tx, stop_rx) = mpsc::channel();

    let task = ChannelTask {
        spec: spec.clone(),
        buffer,
        scratch,
        filter,
        acquirer,
        publisher,
        state: Arc::clone(&state),
        stop_rx,
    };

    platform::configure_task_spawn(spec.priority);
    let spawned = thread::Builder::new()
        .name(format!("ch_{}", spec.signal))
        .stack_size(STACK_CHANNEL)
        .spawn(move || task.run());
    platform::reset_task_spawn();

    let join = spawned.map_err(|e| ChannelError::Spawn(e.to_string()))?;
    Ok(ChannelTaskHandle { spec, state, stop_tx, join })
}

struct ChannelTask {
    spec: ChannelSpec,
    buffer: PacketBuffer,
    scratch: Vec<u8>,
    filter: Option<Box<dyn SampleFilter>>,
    acquirer: Arc<dyn Acquire>,
    publisher: Arc<dyn Publisher>,
    state: Arc<AtomicU8>,
    stop_rx: Receiver<()>,
}

impl ChannelTask {
    fn run(mut self) -> PacketBuffer {
        // A stop request may already be pending; never overwrite `Stopping`.
        let _ = self.state.compare_exchange(
            TaskState::Created as u8,
            TaskState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        log::info!(
            "Channel {} started (period {:?}, N={}, V={}, prio {}) -> {}",
            self.spec.signal,
            self.spec.period,
            self.spec.packet_len,
            self.spec.overlap,
            self.spec.priority,
            self.spec.topic
        );

        let mut deadline = Instant::now();
        let mut failures: u32 = 0;

        loop {
            deadline += self.spec.period;
            if self.wait_until(deadline) {
                break;
            }

            let reading = match self.acquirer.acquire(self.spec.signal) {
                Ok(r) => match self.filter.as_mut() {
                    Some(f) => f.apply(r),
                    None => r,
                },
                Err(e) => {
                    failures = failures.wrapping_add(1);
                    if failures == 1 || failures % ACQ_FAILURE_LOG_EVERY == 0 {
                        log::warn!(
                            "Channel {}: acquisition failed ({}), {} so far — using fallback",
                            self.spec.signal,
                            e,
                            failures
                        );
                    }
                    Reading::default()
                }
            };

            if self.buffer.append(reading) == Append::PacketReady {
                self.publish_packet();
                self.buffer.compact();
            }
        }

        self.buffer
    }

    /// Sleep until `deadline`. Returns `true` if a stop was requested.
    fn wait_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if deadline > now {
            !matches!(self.stop_rx.recv_timeout(deadline - now), Err(RecvTimeoutError::Timeout))
        } else {
            // Overrun: catch up without sleeping, but still honour a stop.
            !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
        }
    }

    fn publish_packet(&mut self) {
        self.buffer.encode_into(&mut self.scratch);
        if let Err(e) = self
            .publisher
            .publish(&self.spec.topic, QoS::AtMostOnce, false, &self.scratch)
        {
            // Sampling continues; this packet is lost.
            log::warn!("Channel {}: publish skipped ({})", self.spec.signal, e);
        }
    }
}
