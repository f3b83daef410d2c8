//! Background producer keeping a steady capture cadence.
//!
//! The worker owns the [`FrameSource`] on its own thread, ticks at the
//! configured rate and moves each produced frame into the controller's
//! command queue. It never touches the ring, and reaches the pool only
//! through [`ControllerHandle::frame_produced`] once the queue has closed.
//!
//! A tick is skipped while the queue already holds [`PRODUCER_BACKLOG`]
//! commands, so a controller that is not being pumped does not accumulate
//! frames without bound.

use crate::command::ControllerHandle;
use crate::source::{FrameSource, SourceError};
use clipreel_core::CaptureRate;
use crossbeam_channel::{select, tick, unbounded, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Queued commands above which the producer skips ticks.
pub const PRODUCER_BACKLOG: usize = 32;

#[derive(Debug, Clone, Copy)]
enum WorkerControl {
    Pause,
    Resume,
    SetRate(CaptureRate),
    Stop,
}

/// Handle to the producer thread.
pub struct ProducerWorker {
    control: Sender<WorkerControl>,
    thread: Option<JoinHandle<()>>,
}

impl ProducerWorker {
    /// Spawn the worker, producing immediately at `rate`.
    pub fn spawn<S: FrameSource>(
        mut source: S,
        rate: CaptureRate,
        sink: ControllerHandle<S::Handle>,
    ) -> std::io::Result<Self> {
        let (control, control_rx) = unbounded();

        let thread = thread::Builder::new()
            .name("clipreel-producer".into())
            .spawn(move || {
                info!(%rate, "producer started");
                let mut ticker = tick(rate.frame_interval());
                let mut producing = true;

                loop {
                    let mut next_rate = None;
                    select! {
                        recv(control_rx) -> msg => match msg {
                            Ok(WorkerControl::Pause) => producing = false,
                            Ok(WorkerControl::Resume) => producing = true,
                            Ok(WorkerControl::SetRate(rate)) => next_rate = Some(rate),
                            Ok(WorkerControl::Stop) | Err(_) => break,
                        },
                        recv(ticker) -> _ => {
                            if !producing {
                                continue;
                            }
                            if sink.queued() >= PRODUCER_BACKLOG {
                                trace!(queued = sink.queued(), "controller behind, skipping tick");
                                continue;
                            }
                            let frame = source.produce();
                            let ended = matches!(frame, Err(SourceError::Ended));
                            if sink.frame_produced(frame).is_err() {
                                debug!("command queue closed");
                                break;
                            }
                            if ended {
                                break;
                            }
                        }
                    }
                    if let Some(rate) = next_rate {
                        debug!(%rate, "producer rate changed");
                        ticker = tick(rate.frame_interval());
                    }
                }
                info!("producer stopped");
            })?;

        Ok(Self {
            control,
            thread: Some(thread),
        })
    }

    pub fn pause(&self) {
        let _ = self.control.send(WorkerControl::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(WorkerControl::Resume);
    }

    pub fn set_rate(&self, rate: CaptureRate) {
        let _ = self.control.send(WorkerControl::SetRate(rate));
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(WorkerControl::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("producer thread panicked");
            }
        }
    }
}

impl Drop for ProducerWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
