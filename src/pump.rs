// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame pump.
//!
//! One cycle negotiates the requested format, allocates buffers, queues the
//! raw buffer, waits for the device, converts when required and publishes a
//! freshly allocated [`OutputBuffer`](crate::image::OutputBuffer). Buffers
//! are released on every path through [`FrameBuffers`].
//!
//! Capture failures end the run. Negotiation, allocation, conversion and
//! publish failures drop the frame and the run continues.

use crate::buffers::{acquire_buffers, FrameBuffers};
use crate::error::{classify, sdk_call, ErrorClass, NegotiationError, PipelineError, Result};
use crate::format::{negotiate, FrameDescriptor, Negotiated, PixelFormat};
use crate::image::Dimensions;
use crate::sdk::{names, Camera, FrameInfo};
use crate::sink::{ImageMode, OutputSink, RequestedFormat};
use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, trace, warn};

/// Pause before retrying after a cycle dropped at negotiation or allocation.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Source of the capture trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSource {
    /// The camera captures continuously at its frame rate.
    #[default]
    FreeRun,
    /// The pump fires `TriggerSoftware` once per queued buffer.
    Software,
}

/// Cooperative stop request shared between the controller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps up to `timeout` unless cancelled first. Returns the flag.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let mut cancelled = flag.lock();
        if !*cancelled {
            cond.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClockState {
    sequence: u64,
    last_timestamp: u64,
}

/// Sequence ids and output timestamps shared by every run of one
/// connection. Both only move forward until [`FrameClock::reset`].
#[derive(Debug, Default)]
pub struct FrameClock {
    state: Mutex<ClockState>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence id of the most recently published frame.
    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    pub fn last_timestamp(&self) -> u64 {
        self.state.lock().last_timestamp
    }

    pub fn reset(&self) {
        *self.state.lock() = ClockState::default();
    }

    /// Hands the next sequence id and a timestamp strictly after the last
    /// one to `publish`, committing both only if it succeeds. The clock
    /// stays locked while `publish` runs.
    pub fn advance<F>(&self, device_timestamp: u64, publish: F) -> Result<u64>
    where
        F: FnOnce(u64, u64) -> Result<()>,
    {
        let mut state = self.state.lock();
        let sequence_id = state.sequence + 1;
        let timestamp_ns = device_timestamp.max(state.last_timestamp + 1);
        publish(sequence_id, timestamp_ns)?;
        *state = ClockState {
            sequence: sequence_id,
            last_timestamp: timestamp_ns,
        };
        Ok(sequence_id)
    }
}

/// How an acquisition run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The image mode's frame count was reached.
    Completed,
    /// A stop request was observed.
    Stopped,
    /// A capture error ended the stream.
    Failed(PipelineError),
}

/// Summary of one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Fixed for the lifetime of one run.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// `None` waits for the device indefinitely.
    pub capture_timeout: Option<Duration>,
    pub trigger: TriggerSource,
    pub pixel_index: u32,
    /// Geometry the stream was opened with.
    pub dims: Dimensions,
    /// Encoding written to the device's `PixelFormat` register.
    pub native: PixelFormat,
}

enum Cycle {
    Published { sequence_id: u64, mode: ImageMode },
    Dropped(PipelineError),
}

pub struct FramePump<C: Camera, K: OutputSink> {
    camera: Arc<C>,
    sink: Arc<K>,
    settings: PumpSettings,
    cancel: CancelToken,
    clock: Arc<FrameClock>,
}

impl<C: Camera, K: OutputSink> FramePump<C, K> {
    pub fn new(
        camera: Arc<C>,
        sink: Arc<K>,
        settings: PumpSettings,
        cancel: CancelToken,
        clock: Arc<FrameClock>,
    ) -> Self {
        Self {
            camera,
            sink,
            settings,
            cancel,
            clock,
        }
    }

    /// Runs cycles until the image mode completes, a stop is requested or a
    /// capture error occurs.
    pub fn run(self) -> RunReport {
        let mut published = 0u64;
        let mut dropped = 0u64;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Stopped;
            }
            match self.cycle() {
                Ok(Cycle::Published { sequence_id, mode }) => {
                    published += 1;
                    trace!(sequence_id, published, "frame published");
                    if mode.is_complete(published) {
                        break RunOutcome::Completed;
                    }
                }
                Ok(Cycle::Dropped(err)) => {
                    dropped += 1;
                    debug!(class = ?err.class(), "frame dropped: {err}");
                    let retry = matches!(
                        err.class(),
                        ErrorClass::Negotiation | ErrorClass::Allocation
                    );
                    if retry && self.cancel.wait(RETRY_DELAY) {
                        break RunOutcome::Stopped;
                    }
                }
                Err(err) if self.cancel.is_cancelled() => {
                    debug!("capture interrupted by stop: {err}");
                    break RunOutcome::Stopped;
                }
                Err(err) => {
                    warn!("acquisition failed: {err}");
                    break RunOutcome::Failed(err);
                }
            }
        };

        info!(published, dropped, ?outcome, "acquisition run finished");
        RunReport {
            frames_published: published,
            frames_dropped: dropped,
            outcome,
        }
    }

    fn negotiate(
        &self,
        request: &RequestedFormat,
    ) -> std::result::Result<Negotiated, NegotiationError> {
        let dims = self.settings.dims;
        if request.dims != dims {
            return Err(NegotiationError::GeometryMismatch {
                requested: (request.dims.width, request.dims.height),
                streaming: (dims.width, dims.height),
            });
        }
        let negotiated = negotiate(request.color, request.dtype, self.settings.pixel_index)?;
        if negotiated.native != self.settings.native {
            return Err(NegotiationError::FormatMismatch {
                requested: negotiated.native,
                streaming: self.settings.native,
            });
        }
        Ok(negotiated)
    }

    fn cycle(&self) -> Result<Cycle> {
        let request = self.sink.requested_format();
        let negotiated = match self.negotiate(&request) {
            Ok(n) => n,
            Err(e) => return Ok(Cycle::Dropped(e.into())),
        };
        let dims = self.settings.dims;
        let (raw_desc, conv_desc) =
            match FrameDescriptor::for_cycle(&negotiated, dims.width, dims.height) {
                Ok(d) => d,
                Err(e) => return Ok(Cycle::Dropped(e.into())),
            };

        let camera = Arc::clone(&self.camera);
        let mut buffers = match acquire_buffers(&*camera, &raw_desc, conv_desc.as_ref()) {
            Ok(b) => b,
            Err(e) => return Ok(Cycle::Dropped(e)),
        };

        let info = self.capture(&*camera, &mut buffers)?;
        trace!(frame_id = info.frame_id, "frame captured");

        let converted = match buffers.split_mut() {
            (Some(src), Some(dst)) => camera.convert_frame(src, dst, negotiated.conversion),
            _ => Ok(()),
        };
        if let Err(status) = converted {
            let err = classify("convertFrame", ErrorClass::Conversion, status);
            release(buffers);
            return Ok(Cycle::Dropped(err));
        }

        let result = self.publish(&request, &buffers, info.timestamp_ns);
        release(buffers);
        match result {
            Ok(sequence_id) => Ok(Cycle::Published {
                sequence_id,
                mode: request.image_mode,
            }),
            Err(e) => Ok(Cycle::Dropped(e)),
        }
    }

    /// Queues the raw buffer, fires the software trigger when configured,
    /// and blocks until the device delivers a frame.
    fn capture(
        &self,
        camera: &C,
        buffers: &mut FrameBuffers<'_, C>,
    ) -> Result<FrameInfo> {
        let raw = buffers
            .raw_mut()
            .ok_or_else(|| PipelineError::InvalidState("raw buffer missing".to_string()))?;
        sdk_call("queueFrame", ErrorClass::Capture, camera.queue_frame(raw))?;
        if self.settings.trigger == TriggerSource::Software {
            sdk_call(
                names::TRIGGER_SOFTWARE,
                ErrorClass::Capture,
                camera.execute_command(names::TRIGGER_SOFTWARE),
            )?;
        }
        sdk_call(
            "getFrame",
            ErrorClass::Capture,
            camera.get_frame(raw, self.settings.capture_timeout),
        )
    }

    /// Copies the frame into a fresh output buffer and hands it to the sink.
    /// The clock only advances when the sink accepts the frame.
    fn publish(
        &self,
        request: &RequestedFormat,
        buffers: &FrameBuffers<'_, C>,
        device_timestamp: u64,
    ) -> Result<u64> {
        let src = buffers
            .output()
            .ok_or_else(|| PipelineError::InvalidState("output buffer missing".to_string()))?;
        let mut image = self
            .sink
            .allocate(request.dims, request.color, request.dtype)?;
        if image.size() != src.len() {
            return Err(PipelineError::Publish(format!(
                "output buffer holds {} bytes but frame has {}",
                image.size(),
                src.len()
            )));
        }
        image.as_slice_mut().copy_from_slice(src.as_slice());

        self.clock
            .advance(device_timestamp, |sequence_id, timestamp_ns| {
                image.stamp(sequence_id, timestamp_ns);
                self.sink.publish(image, sequence_id, timestamp_ns)
            })
    }
}

fn release<C: Camera>(buffers: FrameBuffers<'_, C>) {
    if let Err(e) = buffers.release() {
        warn!("frame buffer release failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ColorMode, DataType};
    use crate::sim::{Fault, SimCamera, SimConfig};
    use crate::sink::ChannelSink;
    use std::{thread, time::Instant};

    fn setup(
        format: RequestedFormat,
    ) -> (
        Arc<SimCamera>,
        Arc<ChannelSink>,
        kanal::Receiver<crate::image::OutputBuffer>,
    ) {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(4).unwrap();
        cam.execute_command(names::ACQUISITION_START).unwrap();
        let (sink, rx) = ChannelSink::new(format, 64);
        (Arc::new(cam), Arc::new(sink), rx)
    }

    fn settings(dims: Dimensions) -> PumpSettings {
        PumpSettings {
            capture_timeout: Some(Duration::from_secs(1)),
            trigger: TriggerSource::FreeRun,
            pixel_index: 0,
            dims,
            native: PixelFormat::Mono8,
        }
    }

    fn format(mode: ImageMode) -> RequestedFormat {
        RequestedFormat {
            color: ColorMode::Mono,
            dtype: DataType::UInt8,
            dims: Dimensions::new(16, 8),
            image_mode: mode,
        }
    }

    #[test]
    fn test_multi_shot_sequence() {
        let (cam, sink, rx) = setup(format(ImageMode::Multiple(4)));
        let clock = Arc::new(FrameClock::new());
        let pump = FramePump::new(
            cam.clone(),
            sink,
            settings(Dimensions::new(16, 8)),
            CancelToken::new(),
            clock.clone(),
        );
        let report = pump.run();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.frames_published, 4);
        let ids: Vec<u64> = rx.drain_into_vec();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(clock.sequence(), 4);
        assert_eq!(cam.counters().outstanding(), 0);
    }

    trait Drain {
        fn drain_into_vec(&self) -> Vec<u64>;
    }

    impl Drain for kanal::Receiver<crate::image::OutputBuffer> {
        fn drain_into_vec(&self) -> Vec<u64> {
            let mut ids = Vec::new();
            while let Ok(Some(img)) = self.try_recv() {
                ids.push(img.sequence_id());
            }
            ids
        }
    }

    #[test]
    fn test_conversion_failure_keeps_streaming() {
        let mut request = format(ImageMode::Multiple(3));
        request.dtype = DataType::UInt16;
        let (cam, sink, rx) = setup(request);
        cam.inject(Fault::Convert { after: 1 });
        let mut s = settings(Dimensions::new(16, 8));
        s.pixel_index = 4;
        s.native = PixelFormat::Mono12Packed;
        let pump = FramePump::new(cam.clone(), sink, s, CancelToken::new(), Default::default());
        let report = pump.run();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.frames_published, 3);
        assert_eq!(report.frames_dropped, 1);
        assert_eq!(rx.drain_into_vec(), vec![1, 2, 3]);
        assert_eq!(cam.counters().outstanding(), 0);
    }

    #[test]
    fn test_capture_error_ends_run() {
        let (cam, sink, rx) = setup(format(ImageMode::Multiple(5)));
        cam.inject(Fault::Capture { after: 2 });
        let pump = FramePump::new(
            cam.clone(),
            sink,
            settings(Dimensions::new(16, 8)),
            CancelToken::new(),
            Default::default(),
        );
        let report = pump.run();
        assert_eq!(report.frames_published, 2);
        assert_eq!(
            report.error().map(PipelineError::class),
            Some(ErrorClass::Capture)
        );
        assert_eq!(rx.len(), 2);
        assert_eq!(cam.counters().outstanding(), 0);
    }

    #[test]
    fn test_geometry_mismatch_never_touches_hardware() {
        let (cam, sink, rx) = setup(format(ImageMode::Continuous));
        let cancel = CancelToken::new();
        let pump = FramePump::new(
            cam.clone(),
            sink,
            settings(Dimensions::new(32, 8)),
            cancel.clone(),
            Default::default(),
        );
        let worker = thread::spawn(move || pump.run());
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        let report = worker.join().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(report.frames_published, 0);
        assert!(report.frames_dropped > 0);
        assert_eq!(cam.counters().allocated, 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_software_trigger() {
        let (cam, sink, rx) = setup(format(ImageMode::Single));
        cam.set_bool(names::TRIGGER_MODE, true).unwrap();
        let mut s = settings(Dimensions::new(16, 8));
        s.trigger = TriggerSource::Software;
        let pump = FramePump::new(cam.clone(), sink, s, CancelToken::new(), Default::default());
        let report = pump.run();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(rx.drain_into_vec(), vec![1]);
    }

    #[test]
    fn test_encoding_change_never_touches_hardware() {
        let mut request = format(ImageMode::Continuous);
        request.color = ColorMode::Rgb;
        let (cam, sink, rx) = setup(request);
        let cancel = CancelToken::new();
        let pump = FramePump::new(
            cam.clone(),
            sink,
            settings(Dimensions::new(16, 8)),
            cancel.clone(),
            Default::default(),
        );
        let worker = thread::spawn(move || pump.run());
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        let report = worker.join().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(report.frames_published, 0);
        assert!(report.frames_dropped > 0);
        assert_eq!(cam.counters().allocated, 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_output_change_on_same_encoding_streams() {
        let mut request = format(ImageMode::Multiple(2));
        request.dtype = DataType::UInt16;
        let (cam, sink, rx) = setup(request);
        let mut s = settings(Dimensions::new(16, 8));
        s.pixel_index = 4;
        s.native = PixelFormat::Mono12Packed;
        let pump = FramePump::new(
            cam.clone(),
            sink.clone(),
            s,
            CancelToken::new(),
            Default::default(),
        );
        assert_eq!(pump.run().frames_published, 2);

        sink.update_format(|r| r.dtype = DataType::UInt8);
        let pump = FramePump::new(cam.clone(), sink, s, CancelToken::new(), Default::default());
        let report = pump.run();
        assert_eq!(report.outcome, RunOutcome::Completed);
        let frames: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok().flatten()).collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].format(), PixelFormat::Mono8);
    }

    #[test]
    fn test_clock_spans_runs() {
        let (cam, sink, rx) = setup(format(ImageMode::Multiple(2)));
        let clock = Arc::new(FrameClock::new());
        for _ in 0..2 {
            let pump = FramePump::new(
                cam.clone(),
                sink.clone(),
                settings(Dimensions::new(16, 8)),
                CancelToken::new(),
                clock.clone(),
            );
            pump.run();
        }
        let stamps: Vec<(u64, u64)> = std::iter::from_fn(|| rx.try_recv().ok().flatten())
            .map(|img| (img.sequence_id(), img.timestamp_ns()))
            .collect();
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert_eq!(pair[1].0, pair[0].0 + 1);
            assert!(pair[1].1 > pair[0].1);
        }
        assert_eq!(clock.sequence(), 4);
        assert_eq!(clock.last_timestamp(), stamps[3].1);
    }

    #[test]
    fn test_clock_holds_after_refused_publish() {
        let clock = FrameClock::new();
        assert_eq!(clock.advance(100, |_, _| Ok(())), Ok(1));
        let refused = clock.advance(500, |_, _| {
            Err(PipelineError::Publish("full".to_string()))
        });
        assert!(refused.is_err());
        assert_eq!(clock.sequence(), 1);
        assert_eq!(clock.last_timestamp(), 100);
        clock.advance(50, |seq, ts| {
            assert_eq!((seq, ts), (2, 101));
            Ok(())
        })
        .unwrap();
        clock.reset();
        assert_eq!(clock.sequence(), 0);
    }

    #[test]
    fn test_cancel_token_wait() {
        let token = CancelToken::new();
        let started = Instant::now();
        assert!(!token.wait(Duration::from_millis(5)));
        assert!(started.elapsed() >= Duration::from_millis(5));
        let other = token.clone();
        thread::spawn(move || other.cancel());
        assert!(token.wait(Duration::from_secs(5)));
    }
}
