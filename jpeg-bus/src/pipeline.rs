//! Admission-controlled submit/drain pipeline.
//!
//! ```text
//!               window_limit
//!  frames ──► [submit actor] ──submit──► DecodeSink ──poll_output──► [drain actor]
//!                  ▲                                                      │
//!                  └──────────────── completion signal ◄──────────────────┘
//! ```
//!
//! The submit actor never lets `submitted - completed` exceed the window. It
//! blocks on the completion channel while the window is full. The drain actor
//! polls the sink, because the sink's output query is non-blocking by
//! contract. Both run on blocking threads and share a cancellation token: the
//! first fatal error cancels it and the other actor unwinds.

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
    mpsc::{Receiver, RecvTimeoutError, Sender},
};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::frame::EncodedFrame;
use crate::sink::{DecodeSink, SinkError};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Frames to push through per run
    pub total_items: usize,
    /// Maximum submitted-but-not-completed frames
    pub window_limit: usize,
    /// Sleep between empty output polls, and the wait slice while the window is full
    pub poll_interval: Duration,
    /// Abort when frames are in flight and none completes for this long
    pub stall_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_items: 200,
            window_limit: 4,
            poll_interval: Duration::from_millis(5),
            stall_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    pub fn with_total_items(mut self, total_items: usize) -> Self {
        self.total_items = total_items;
        self
    }

    pub fn with_window_limit(mut self, window_limit: usize) -> Self {
        self.window_limit = window_limit;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.total_items == 0 {
            return Err(PipelineError::InvalidConfig(
                "total_items must be positive".to_string(),
            ));
        }
        if self.window_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_limit must be positive".to_string(),
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "stall_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    /// `index` is zero-based, so it equals the number of earlier successful submits.
    #[error("submit of frame {index} failed ({submitted} submitted, {completed} completed): {source}")]
    Submit {
        index: usize,
        submitted: usize,
        completed: usize,
        source: SinkError,
    },

    #[error("output query failed ({submitted} submitted, {completed} completed): {source}")]
    Poll {
        submitted: usize,
        completed: usize,
        source: SinkError,
    },

    #[error("decoder stalled for {waited:?} ({submitted} submitted, {completed} completed)")]
    Stalled {
        submitted: usize,
        completed: usize,
        waited: Duration,
    },

    #[error("pipeline cancelled ({submitted} submitted, {completed} completed)")]
    Cancelled { submitted: usize, completed: usize },

    #[error("pipeline actor failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

/// Counters shared by the two actors. Each counter has a single writer.
#[derive(Default)]
struct PipelineState {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    peak_in_flight: AtomicUsize,
    decoded_bytes: AtomicU64,
}

impl PipelineState {
    fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Acquire)
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// A completion can be counted before the matching submit is, so this saturates.
    fn in_flight(&self) -> usize {
        self.submitted().saturating_sub(self.completed())
    }

    fn cancelled(&self) -> PipelineError {
        PipelineError::Cancelled {
            submitted: self.submitted(),
            completed: self.completed(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub total_items: usize,
    pub submitted: usize,
    pub completed: usize,
    pub peak_in_flight: usize,
    pub decoded_bytes: u64,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Completed frames per second of wall-clock time.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct Pipeline {
    sink: Arc<dyn DecodeSink>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn DecodeSink>, config: PipelineConfig) -> Self {
        Self {
            sink,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the run to an outside token, e.g. one cancelled on Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submits `config.total_items` frames, cycling through `frames` in order,
    /// and waits until every one of them has been drained.
    pub async fn run(&self, frames: Vec<EncodedFrame>) -> Result<PipelineReport, PipelineError> {
        self.config.validate()?;
        if frames.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no frames to submit".to_string(),
            ));
        }

        let caps = self.sink.caps();
        log::info!("decoder: {}", caps);
        for frame in &frames {
            if !caps.supports(frame.width() as u32, frame.height() as u32) {
                log::warn!(
                    "image size {} x {} is outside the decoder's advertised range",
                    frame.width(),
                    frame.height()
                );
            }
        }

        let state = Arc::new(PipelineState::default());
        // A failing run cancels only itself, never the caller's token.
        let cancel = self.cancel.child_token();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        log::info!(
            "pipeline: {} frames, window {}",
            self.config.total_items,
            self.config.window_limit
        );
        let start = Instant::now();

        let submit = tokio::task::spawn_blocking({
            let sink = self.sink.clone();
            let config = self.config.clone();
            let state = state.clone();
            let cancel = cancel.clone();
            move || Self::submit_loop(sink, frames, config, state, cancel, done_rx)
        });
        let drain = tokio::task::spawn_blocking({
            let sink = self.sink.clone();
            let config = self.config.clone();
            let state = state.clone();
            let cancel = cancel.clone();
            move || Self::drain_loop(sink, config, state, cancel, done_tx)
        });

        let (submit_result, drain_result) = tokio::join!(submit, drain);
        let elapsed = start.elapsed();

        match (submit_result?, drain_result?) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
            (Err(submit_err), Err(drain_err)) => {
                // the actor that failed first is the one that did not just see the token
                if submit_err.is_cancelled() && !drain_err.is_cancelled() {
                    return Err(drain_err);
                }
                return Err(submit_err);
            }
        }

        let report = PipelineReport {
            total_items: self.config.total_items,
            submitted: state.submitted(),
            completed: state.completed(),
            peak_in_flight: state.peak_in_flight.load(Ordering::Acquire),
            decoded_bytes: state.decoded_bytes.load(Ordering::Acquire),
            elapsed,
        };
        log::info!(
            "decoded {} images in {:.3} sec, {:.1} FPS",
            report.completed,
            elapsed.as_secs_f64(),
            report.fps()
        );
        Ok(report)
    }

    fn submit_loop(
        sink: Arc<dyn DecodeSink>,
        frames: Vec<EncodedFrame>,
        config: PipelineConfig,
        state: Arc<PipelineState>,
        cancel: CancellationToken,
        done_rx: Receiver<()>,
    ) -> Result<(), PipelineError> {
        let guard = cancel.clone().drop_guard();
        for index in 0..config.total_items {
            Self::wait_for_window(&config, &state, &cancel, &done_rx)?;

            let frame = frames[index % frames.len()].clone();
            let size = frame.size();
            if let Err(source) = sink.submit(frame) {
                log::error!("submit of frame {} failed: {}", index, source);
                return Err(PipelineError::Submit {
                    index,
                    submitted: state.submitted(),
                    completed: state.completed(),
                    source,
                });
            }
            let submitted = state.submitted.fetch_add(1, Ordering::AcqRel) + 1;
            let in_flight = submitted.saturating_sub(state.completed());
            state.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);
            log::trace!(
                "submitted frame {} ({} bytes), {} in flight",
                index,
                size,
                in_flight
            );
        }
        guard.disarm();
        Ok(())
    }

    /// Blocks until another frame fits in the admission window. Completion
    /// signals queued while the window was open are discarded first, so a
    /// blocking wait only wakes on completions that happen during it.
    fn wait_for_window(
        config: &PipelineConfig,
        state: &PipelineState,
        cancel: &CancellationToken,
        done_rx: &Receiver<()>,
    ) -> Result<(), PipelineError> {
        loop {
            if cancel.is_cancelled() {
                return Err(state.cancelled());
            }
            // stale signals, the counters already reflect them
            done_rx.try_iter().for_each(drop);
            if state.in_flight() < config.window_limit {
                return Ok(());
            }
            match done_rx.recv_timeout(config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                // the drain actor is gone, nothing will free the window
                Err(RecvTimeoutError::Disconnected) => return Err(state.cancelled()),
            }
        }
    }

    fn drain_loop(
        sink: Arc<dyn DecodeSink>,
        config: PipelineConfig,
        state: Arc<PipelineState>,
        cancel: CancellationToken,
        done_tx: Sender<()>,
    ) -> Result<(), PipelineError> {
        let guard = cancel.clone().drop_guard();
        let mut idle_since = Instant::now();
        while state.completed() < config.total_items {
            if cancel.is_cancelled() {
                return Err(state.cancelled());
            }
            match sink.poll_output() {
                Ok(Some(frame)) => {
                    if frame.is_all_zero() {
                        log::warn!("output image is all zero");
                    }
                    let size = frame.packed_len();
                    log::debug!("decoded {} bytes ({})", size, frame);
                    state.decoded_bytes.fetch_add(size as u64, Ordering::AcqRel);
                    state.completed.fetch_add(1, Ordering::AcqRel);
                    // the submit actor may already be done and gone
                    let _ = done_tx.send(());
                    idle_since = Instant::now();
                }
                Ok(None) => {
                    if state.in_flight() == 0 {
                        idle_since = Instant::now();
                    } else if idle_since.elapsed() >= config.stall_timeout {
                        log::error!(
                            "no output for {:?} with {} frames in flight",
                            idle_since.elapsed(),
                            state.in_flight()
                        );
                        return Err(PipelineError::Stalled {
                            submitted: state.submitted(),
                            completed: state.completed(),
                            waited: idle_since.elapsed(),
                        });
                    }
                    std::thread::sleep(config.poll_interval);
                }
                Err(source) => {
                    log::error!("output query failed: {}", source);
                    return Err(PipelineError::Poll {
                        submitted: state.submitted(),
                        completed: state.completed(),
                        source,
                    });
                }
            }
        }
        guard.disarm();
        Ok(())
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
