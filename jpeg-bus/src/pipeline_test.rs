// ============================================================================
// Pipeline Tests
// ============================================================================

use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{Pipeline, PipelineConfig, PipelineError, PipelineState};
use crate::frame::{DecodedFrame, EncodedFrame, PixelFormat, PlaneLayout};
use crate::sink::{Acceleration, DecodeSink, SinkCaps, SinkError};

/// Sink that completes each submission after a per-item delay, so outputs
/// come back out of submission order. Tracks its own in-flight count.
#[derive(Default)]
struct ScriptedSink {
    pending: Mutex<VecDeque<(Instant, usize)>>,
    submits: AtomicUsize,
    outputs: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fail_submit_at: Option<usize>,
    fail_poll_after: Option<usize>,
    never_complete: bool,
}

impl ScriptedSink {
    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

fn gray_frame() -> DecodedFrame {
    DecodedFrame::new(
        Bytes::from(vec![1u8; 4]),
        2,
        2,
        PixelFormat::Gray8,
        vec![PlaneLayout::packed(2, 2, 1, 0)],
    )
    .unwrap()
}

impl DecodeSink for ScriptedSink {
    fn submit(&self, _frame: EncodedFrame) -> Result<(), SinkError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        if self.fail_submit_at == Some(n) {
            return Err(SinkError::ResourceExhausted);
        }
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.never_complete {
            let delay = Duration::from_micros(500 * (n % 4) as u64);
            self.pending
                .lock()
                .unwrap()
                .push_back((Instant::now() + delay, n));
        }
        Ok(())
    }

    fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError> {
        if let Some(limit) = self.fail_poll_after {
            if self.outputs.load(Ordering::SeqCst) >= limit {
                return Err(SinkError::EndOfStream);
            }
        }
        let mut pending = self.pending.lock().unwrap();
        let now = Instant::now();
        let Some(pos) = pending.iter().position(|(ready_at, _)| *ready_at <= now) else {
            return Ok(None);
        };
        pending.remove(pos);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outputs.fetch_add(1, Ordering::SeqCst);
        Ok(Some(gray_frame()))
    }

    fn caps(&self) -> SinkCaps {
        SinkCaps {
            name: "scripted".to_string(),
            acceleration: Acceleration::Software,
            width_range: 1..=8192,
            height_range: 1..=8192,
        }
    }
}

fn encoded() -> Vec<EncodedFrame> {
    vec![EncodedFrame::new(
        Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        2,
        2,
    )]
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_stall_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_window_is_never_exceeded() -> anyhow::Result<()> {
    let sink = Arc::new(ScriptedSink::default());
    let pipeline = Pipeline::new(
        sink.clone(),
        fast_config().with_total_items(200).with_window_limit(4),
    );

    let report = pipeline.run(encoded()).await?;
    assert_eq!(report.submitted, 200);
    assert_eq!(report.completed, 200);
    assert!(report.peak_in_flight <= 4, "peak {}", report.peak_in_flight);
    assert!(sink.peak_in_flight() <= 4, "sink peak {}", sink.peak_in_flight());
    assert_eq!(report.decoded_bytes, 200 * 4);
    assert!(report.fps() > 0.0);
    Ok(())
}

#[tokio::test]
async fn test_window_of_one_is_lockstep() -> anyhow::Result<()> {
    let sink = Arc::new(ScriptedSink::default());
    let pipeline = Pipeline::new(
        sink.clone(),
        fast_config().with_total_items(20).with_window_limit(1),
    );
    let report = pipeline.run(encoded()).await?;
    assert_eq!(report.completed, 20);
    assert_eq!(report.peak_in_flight, 1);
    assert_eq!(sink.peak_in_flight(), 1);
    Ok(())
}

#[tokio::test]
async fn test_frames_are_cycled_in_order() -> anyhow::Result<()> {
    #[derive(Default)]
    struct RecordingSink {
        sizes: Mutex<Vec<usize>>,
        ready: AtomicUsize,
    }

    impl DecodeSink for RecordingSink {
        fn submit(&self, frame: EncodedFrame) -> Result<(), SinkError> {
            self.sizes.lock().unwrap().push(frame.size());
            self.ready.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError> {
            let taken = self
                .ready
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            Ok(taken.ok().map(|_| gray_frame()))
        }

        fn caps(&self) -> SinkCaps {
            SinkCaps {
                name: "recording".to_string(),
                acceleration: Acceleration::NotSupported,
                width_range: 0..=0,
                height_range: 0..=0,
            }
        }
    }

    let sink = Arc::new(RecordingSink::default());
    let frames = vec![
        EncodedFrame::new(Bytes::from_static(&[0; 1]), 2, 2),
        EncodedFrame::new(Bytes::from_static(&[0; 2]), 2, 2),
        EncodedFrame::new(Bytes::from_static(&[0; 3]), 2, 2),
    ];
    let pipeline = Pipeline::new(sink.clone(), fast_config().with_total_items(7));
    let report = pipeline.run(frames).await?;
    assert_eq!(report.completed, 7);
    assert_eq!(*sink.sizes.lock().unwrap(), vec![1, 2, 3, 1, 2, 3, 1]);
    Ok(())
}

#[tokio::test]
async fn test_submit_failure_reports_prior_submits() {
    // the 10th submit (zero-based index 9) fails
    let sink = Arc::new(ScriptedSink {
        fail_submit_at: Some(9),
        ..Default::default()
    });
    let pipeline = Pipeline::new(sink, fast_config().with_total_items(200));

    let err = pipeline.run(encoded()).await.unwrap_err();
    match err {
        PipelineError::Submit {
            index,
            submitted,
            completed,
            source,
        } => {
            assert_eq!(index, 9);
            assert_eq!(submitted, 9);
            assert!(completed <= 9);
            assert_eq!(source, SinkError::ResourceExhausted);
        }
        other => panic!("expected submit error, got {other}"),
    }
}

#[tokio::test]
async fn test_poll_error_is_fatal() {
    let sink = Arc::new(ScriptedSink {
        fail_poll_after: Some(5),
        ..Default::default()
    });
    let pipeline = Pipeline::new(sink, fast_config().with_total_items(50));

    let err = pipeline.run(encoded()).await.unwrap_err();
    match err {
        PipelineError::Poll {
            completed, source, ..
        } => {
            assert_eq!(completed, 5);
            assert_eq!(source, SinkError::EndOfStream);
        }
        other => panic!("expected poll error, got {other}"),
    }
}

#[tokio::test]
async fn test_stalled_sink_times_out() {
    let sink = Arc::new(ScriptedSink {
        never_complete: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(
        sink.clone(),
        fast_config().with_stall_timeout(Duration::from_millis(50)),
    );

    let err = pipeline.run(encoded()).await.unwrap_err();
    match err {
        PipelineError::Stalled {
            submitted,
            completed,
            waited,
        } => {
            assert_eq!(submitted, 4);
            assert_eq!(completed, 0);
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected stall, got {other}"),
    }
    assert_eq!(sink.peak_in_flight(), 4);
}

#[tokio::test]
async fn test_external_cancel_unwinds_both_actors() {
    let sink = Arc::new(ScriptedSink {
        never_complete: true,
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(sink, fast_config()).with_cancel(cancel.clone());

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_clone.cancel();
    });

    let err = pipeline.run(encoded()).await.unwrap_err();
    assert!(
        matches!(err, PipelineError::Cancelled { completed: 0, .. }),
        "got {err}"
    );
}

#[tokio::test]
async fn test_failed_run_leaves_caller_token_alone() {
    let sink = Arc::new(ScriptedSink {
        fail_submit_at: Some(0),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(sink, fast_config()).with_cancel(cancel.clone());
    assert!(pipeline.run(encoded()).await.is_err());
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_invalid_config() {
    let sink = Arc::new(ScriptedSink::default());

    let pipeline = Pipeline::new(sink.clone(), fast_config().with_window_limit(0));
    assert!(matches!(
        pipeline.run(encoded()).await,
        Err(PipelineError::InvalidConfig(_))
    ));

    let pipeline = Pipeline::new(sink.clone(), fast_config().with_total_items(0));
    assert!(matches!(
        pipeline.run(encoded()).await,
        Err(PipelineError::InvalidConfig(_))
    ));

    let pipeline = Pipeline::new(sink, fast_config());
    assert!(matches!(
        pipeline.run(Vec::new()).await,
        Err(PipelineError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_decoded_bytes_exclude_padding() -> anyhow::Result<()> {
    /// Hands back an all-zero 4x2 gray frame stored with a pitch of 8.
    #[derive(Default)]
    struct PaddedSink {
        ready: AtomicUsize,
    }

    impl DecodeSink for PaddedSink {
        fn submit(&self, _frame: EncodedFrame) -> Result<(), SinkError> {
            self.ready.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError> {
            let taken = self
                .ready
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if taken.is_err() {
                return Ok(None);
            }
            let plane = PlaneLayout {
                width: 4,
                height: 2,
                pixel_size: 1,
                pitch: 8,
                offset_x: 0,
                offset_y: 0,
                byte_offset: 0,
            };
            let frame = DecodedFrame::new(
                Bytes::from(vec![0u8; 16]),
                4,
                2,
                PixelFormat::Gray8,
                vec![plane],
            )
            .map_err(|e| SinkError::Decode(e.to_string()))?;
            Ok(Some(frame))
        }

        fn caps(&self) -> SinkCaps {
            SinkCaps {
                name: "padded".to_string(),
                acceleration: Acceleration::Software,
                width_range: 1..=8,
                height_range: 1..=8,
            }
        }
    }

    let pipeline = Pipeline::new(
        Arc::new(PaddedSink::default()),
        fast_config().with_total_items(10),
    );
    // an all-zero output is only a warning
    let report = pipeline.run(encoded()).await?;
    assert_eq!(report.completed, 10);
    assert_eq!(report.decoded_bytes, 10 * 4 * 2);
    Ok(())
}

#[test]
fn test_window_wait_discards_stale_signals() {
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    let state = PipelineState::default();
    let cancel = CancellationToken::new();
    let config = fast_config().with_window_limit(2);
    for _ in 0..3 {
        done_tx.send(()).unwrap();
    }

    Pipeline::wait_for_window(&config, &state, &cancel, &done_rx).unwrap();
    assert!(done_rx.try_recv().is_err());
}

#[test]
fn test_window_wait_wakes_on_completion() {
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    let state = Arc::new(PipelineState::default());
    state.submitted.store(2, Ordering::SeqCst);
    let cancel = CancellationToken::new();
    let config = fast_config()
        .with_window_limit(2)
        .with_poll_interval(Duration::from_secs(5));
    // queued before the window filled up
    done_tx.send(()).unwrap();

    let completer = std::thread::spawn({
        let state = state.clone();
        move || {
            std::thread::sleep(Duration::from_millis(20));
            state.completed.fetch_add(1, Ordering::SeqCst);
            done_tx.send(()).unwrap();
        }
    });

    let start = Instant::now();
    Pipeline::wait_for_window(&config, &state, &cancel, &done_rx).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(state.in_flight(), 1);
    completer.join().unwrap();
}
