// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Acquisition controller.
//!
//! Owns the connection to one camera and the Idle/Streaming state machine.
//! Control requests (connect, start, stop, parameter writes) are serialized
//! by an internal lock. The frame pump runs on a dedicated worker thread and
//! shares only the acquisition state and its cancellation token with the
//! control side.

use crate::error::{sdk_call, ErrorClass, PipelineError, Result};
use crate::format::{negotiate, FrameDescriptor};
use crate::pump::{CancelToken, FrameClock, FramePump, PumpSettings, RunReport, TriggerSource};
use crate::sdk::{
    names, BoolParam, Camera, CameraSdk, DeviceInfo, ParamRange, UIntParam, MAX_CAMERAS,
};
use crate::sink::OutputSink;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Acquisition state visible to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Streaming,
}

/// Stream buffering mode written to the camera's `BufferMode` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Frames are delivered in capture order.
    #[default]
    Fifo = 0,
    /// Only the most recent frame is kept.
    Latest = 1,
}

/// Driver settings applied when acquisition starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Bound on each frame wait. `None` waits indefinitely.
    pub capture_timeout: Option<Duration>,
    /// Bound on how long `stop` waits for the worker before tearing the
    /// stream down underneath it.
    pub stop_timeout: Duration,
    /// Buffers requested when opening the stream.
    pub buffer_count: u32,
    pub trigger: TriggerSource,
    pub max_cameras: usize,
    pub buffer_mode: BufferMode,
    /// Selects among the native encodings of the requested color mode.
    pub pixel_index: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Some(Duration::from_secs(1)),
            stop_timeout: Duration::from_secs(2),
            buffer_count: 30,
            trigger: TriggerSource::FreeRun,
            max_cameras: MAX_CAMERAS,
            buffer_mode: BufferMode::Fifo,
            pixel_index: 0,
        }
    }
}

struct Status {
    state: AcquisitionState,
    /// Run that owns `state`, bumped at every start.
    generation: u64,
    last_report: Option<RunReport>,
}

struct Shared {
    status: Mutex<Status>,
    clock: Arc<FrameClock>,
}

impl Shared {
    /// Records the end of run `generation`. A run replaced by a later start
    /// leaves the state and report alone.
    fn finish(&self, generation: u64, report: &RunReport) -> bool {
        let mut status = self.status.lock();
        if status.generation != generation {
            return false;
        }
        status.state = AcquisitionState::Idle;
        status.last_report = Some(report.clone());
        true
    }
}

/// Stream opened for one run.
struct Stream {
    generation: u64,
    open: AtomicBool,
    finished: AtomicBool,
}

struct Run {
    cancel: CancelToken,
    done: kanal::Receiver<RunReport>,
    handle: JoinHandle<()>,
    stream: Arc<Stream>,
}

struct Connection<C> {
    camera: Arc<C>,
    info: DeviceInfo,
}

struct Inner<C> {
    connection: Option<Connection<C>>,
    run: Option<Run>,
}

pub struct AcquisitionController<S: CameraSdk, K: OutputSink> {
    sdk: Arc<S>,
    sink: Arc<K>,
    config: Mutex<ControllerConfig>,
    inner: Mutex<Inner<S::Camera>>,
    shared: Arc<Shared>,
}

/// Stops acquisition and closes the run's stream exactly once, whichever of
/// the worker and the controller gets here first.
fn teardown<C: Camera>(camera: &C, stream: &Stream) -> Result<()> {
    if !stream.open.swap(false, Ordering::AcqRel) {
        return Ok(());
    }
    if let Err(status) = camera.execute_command(names::ACQUISITION_STOP) {
        warn!("{} failed: {status}", names::ACQUISITION_STOP);
    }
    sdk_call("closeStream", ErrorClass::Setup, camera.close_stream())?;
    debug!("stream closed");
    Ok(())
}

impl<S: CameraSdk, K: OutputSink> AcquisitionController<S, K> {
    pub fn new(sdk: Arc<S>, sink: Arc<K>, config: ControllerConfig) -> Self {
        Self {
            sdk,
            sink,
            config: Mutex::new(config),
            inner: Mutex::new(Inner {
                connection: None,
                run: None,
            }),
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: AcquisitionState::Idle,
                    generation: 0,
                    last_report: None,
                }),
                clock: Arc::new(FrameClock::new()),
            }),
        }
    }

    pub fn sdk_version(&self) -> String {
        self.sdk.version()
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.status.lock().state
    }

    pub fn is_acquiring(&self) -> bool {
        self.state() == AcquisitionState::Streaming
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.lock().connection.as_ref().map(|c| c.info.clone())
    }

    /// Sequence id of the most recently published frame.
    pub fn sequence_id(&self) -> u64 {
        self.shared.clock.sequence()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.shared.status.lock().last_report.clone()
    }

    pub fn config(&self) -> ControllerConfig {
        self.config.lock().clone()
    }

    /// Opens the camera with serial number `serial`.
    pub fn connect(&self, serial: &str) -> Result<DeviceInfo> {
        let mut inner = self.inner.lock();
        if inner.connection.is_some() {
            return Err(PipelineError::InvalidState(
                "camera already connected".to_string(),
            ));
        }
        if serial.is_empty() {
            return Err(PipelineError::Connection {
                op: "connect",
                reason: "serial number is empty".to_string(),
            });
        }

        let max = self.config.lock().max_cameras.min(MAX_CAMERAS);
        let devices = sdk_call(
            "listDevices",
            ErrorClass::Connection,
            self.sdk.list_devices(max),
        )?;
        debug!("found {} cameras", devices.len());
        if devices.is_empty() {
            return Err(PipelineError::Connection {
                op: "listDevices",
                reason: "no cameras found".to_string(),
            });
        }
        let info = devices
            .into_iter()
            .find(|d| d.serial_number == serial)
            .ok_or_else(|| PipelineError::Connection {
                op: "connect",
                reason: format!("no camera with serial number {serial}"),
            })?;

        let camera = sdk_call(
            "openDevice",
            ErrorClass::Connection,
            self.sdk.open_device(&info),
        )?;
        info!(
            manufacturer = %info.manufacturer_name,
            model = %info.model_name,
            serial = %info.serial_number,
            firmware = %info.device_version,
            ip = %info.current_ip,
            "camera connected"
        );

        self.shared.clock.reset();
        self.shared.status.lock().last_report = None;
        inner.connection = Some(Connection {
            camera: Arc::new(camera),
            info: info.clone(),
        });
        Ok(info)
    }

    /// Stops acquisition if running, then closes the camera.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let stopped = self.stop_locked(&mut inner);
        let Some(connection) = inner.connection.take() else {
            return stopped;
        };
        let closed = sdk_call(
            "closeDevice",
            ErrorClass::Connection,
            self.sdk.close_device(&connection.camera),
        );
        info!(serial = %connection.info.serial_number, "camera disconnected");
        stopped.and(closed)
    }

    /// Opens the stream and spawns the frame pump. Valid only from Idle with
    /// a connected camera.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.start_locked(&mut inner)
    }

    fn start_locked(&self, inner: &mut Inner<S::Camera>) -> Result<()> {
        let camera = match &inner.connection {
            Some(c) => Arc::clone(&c.camera),
            None => return Err(PipelineError::NotConnected),
        };
        if self.state() == AcquisitionState::Streaming {
            return Err(PipelineError::InvalidState(
                "acquisition already running".to_string(),
            ));
        }
        self.reap(inner);

        let config = self.config();
        let request = self.sink.requested_format();
        let negotiated = negotiate(request.color, request.dtype, config.pixel_index)?;
        let dims = request.dims;
        FrameDescriptor::for_cycle(&negotiated, dims.width, dims.height)?;

        let setup = |name: &'static str, value: u32| {
            sdk_call(name, ErrorClass::Setup, camera.set_u32(name, value))
        };
        setup(names::WIDTH, dims.width)?;
        setup(names::HEIGHT, dims.height)?;
        setup(names::PIXEL_FORMAT, negotiated.native.code())?;

        let generation = {
            let mut status = self.shared.status.lock();
            status.generation += 1;
            status.generation
        };
        sdk_call(
            "openStream",
            ErrorClass::Setup,
            camera.open_stream(config.buffer_count),
        )?;
        let stream = Arc::new(Stream {
            generation,
            open: AtomicBool::new(true),
            finished: AtomicBool::new(false),
        });

        let software = config.trigger == TriggerSource::Software;
        let configured = (|| {
            sdk_call(
                names::TRIGGER_MODE,
                ErrorClass::Setup,
                camera.set_bool(names::TRIGGER_MODE, software),
            )?;
            sdk_call(
                names::TRIGGER_SOFTWARE_SOURCE,
                ErrorClass::Setup,
                camera.set_bool(names::TRIGGER_SOFTWARE_SOURCE, software),
            )?;
            if let Some(count) = request.image_mode.frame_count() {
                setup(names::ACQUISITION_FRAME_COUNT, count)?;
            }
            setup(names::BUFFER_MODE, config.buffer_mode as u32)?;
            sdk_call(
                names::ACQUISITION_START,
                ErrorClass::Setup,
                camera.execute_command(names::ACQUISITION_START),
            )
        })();
        if let Err(e) = configured {
            if let Err(close) = teardown(&*camera, &stream) {
                warn!("stream close after failed setup: {close}");
            }
            return Err(e);
        }

        let settings = PumpSettings {
            capture_timeout: config.capture_timeout,
            trigger: config.trigger,
            pixel_index: config.pixel_index,
            dims,
            native: negotiated.native,
        };
        let cancel = CancelToken::new();
        let pump = FramePump::new(
            Arc::clone(&camera),
            Arc::clone(&self.sink),
            settings,
            cancel.clone(),
            Arc::clone(&self.shared.clock),
        );
        let (done_tx, done) = kanal::bounded(1);
        let shared = Arc::clone(&self.shared);
        let owned = Arc::clone(&stream);

        self.shared.status.lock().state = AcquisitionState::Streaming;
        let spawned = thread::Builder::new()
            .name("evt-frame-pump".to_string())
            .spawn(move || {
                let report = pump.run();
                if let Err(e) = teardown(&*camera, &owned) {
                    error!("stream teardown failed: {e}");
                }
                if !shared.finish(owned.generation, &report) {
                    debug!(generation = owned.generation, "superseded frame pump exited");
                }
                owned.finished.store(true, Ordering::Release);
                let _ = done_tx.send(report);
            });

        match spawned {
            Ok(handle) => {
                info!(
                    width = dims.width,
                    height = dims.height,
                    native = %negotiated.native,
                    output = %negotiated.output,
                    conversion = ?negotiated.conversion,
                    mode = ?request.image_mode,
                    "acquisition started"
                );
                inner.run = Some(Run {
                    cancel,
                    done,
                    handle,
                    stream,
                });
                Ok(())
            }
            Err(e) => {
                self.shared.status.lock().state = AcquisitionState::Idle;
                if let Some(conn) = &inner.connection {
                    if let Err(close) = teardown(&*conn.camera, &stream) {
                        warn!("stream close after failed spawn: {close}");
                    }
                }
                Err(PipelineError::InvalidState(format!(
                    "frame pump spawn failed: {e}"
                )))
            }
        }
    }

    /// Requests the frame pump to stop and waits for it. A no-op when Idle.
    ///
    /// The wait is bounded by [`ControllerConfig::stop_timeout`]. If the
    /// worker has not exited by then the stream is closed underneath it,
    /// which fails its in-flight capture, and `StopTimeout` is returned.
    /// The state is Idle when this returns. A worker still blocked after the
    /// forced close is detached and cannot affect later runs.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner)
    }

    fn stop_locked(&self, inner: &mut Inner<S::Camera>) -> Result<()> {
        let Some(run) = inner.run.take() else {
            return Ok(());
        };
        run.cancel.cancel();
        let bound = self.config.lock().stop_timeout;

        let mut result = Ok(());
        if !self.wait_run(&run, bound) {
            warn!("frame pump did not stop within {bound:?}, closing stream");
            if let Some(conn) = &inner.connection {
                if let Err(e) = teardown(&*conn.camera, &run.stream) {
                    warn!("forced stream close failed: {e}");
                }
            }
            if !self.wait_run(&run, bound) {
                error!("frame pump still running after forced close");
            }
            result = Err(PipelineError::StopTimeout(bound));
        }
        if run.handle.is_finished() && run.handle.join().is_err() {
            error!("frame pump panicked");
        }
        if let Some(conn) = &inner.connection {
            if let Err(e) = teardown(&*conn.camera, &run.stream) {
                result = result.and(Err(e));
            }
        }

        self.shared.status.lock().state = AcquisitionState::Idle;
        info!("acquisition stopped");
        result
    }

    /// Waits for the worker to report. True when it has exited.
    fn wait_run(&self, run: &Run, timeout: Duration) -> bool {
        match run.done.recv_timeout(timeout) {
            Ok(_) => true,
            Err(_) => run.stream.finished.load(Ordering::Acquire) || run.handle.is_finished(),
        }
    }

    /// Joins a worker that exited on its own.
    fn reap(&self, inner: &mut Inner<S::Camera>) {
        if let Some(run) = inner.run.take() {
            if run.handle.join().is_err() {
                error!("frame pump panicked");
            }
        }
    }

    /// Blocks until the current run ends on its own or `timeout` elapses,
    /// returning its report. Returns the last report when Idle.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<RunReport> {
        let done = {
            let inner = self.inner.lock();
            match &inner.run {
                Some(run) => run.done.clone(),
                None => return self.last_report(),
            }
        };
        let received = match timeout {
            Some(t) => done.recv_timeout(t).ok(),
            None => done.recv().ok(),
        };
        match received {
            Some(report) => Some(report),
            None if self.state() == AcquisitionState::Idle => self.last_report(),
            None => None,
        }
    }

    fn camera(&self) -> Result<Arc<S::Camera>> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(|c| Arc::clone(&c.camera))
            .ok_or(PipelineError::NotConnected)
    }

    /// Applies a change that must not race an in-flight cycle. While
    /// Streaming this goes through stop, apply, start.
    fn reconfigure(&self, apply: impl FnOnce(&S::Camera) -> Result<()>) -> Result<()> {
        let mut inner = self.inner.lock();
        let camera = match &inner.connection {
            Some(c) => Arc::clone(&c.camera),
            None => return Err(PipelineError::NotConnected),
        };
        let restart = self.state() == AcquisitionState::Streaming;
        if restart {
            self.stop_locked(&mut inner)?;
        }
        let applied = apply(&camera);
        if restart {
            self.start_locked(&mut inner)?;
        }
        applied
    }

    pub fn get_u32(&self, param: UIntParam) -> Result<u32> {
        let name = param.name();
        sdk_call(name, ErrorClass::Parameter, self.camera()?.get_u32(name))
    }

    pub fn u32_range(&self, param: UIntParam) -> Result<ParamRange> {
        let name = param.name();
        sdk_call(name, ErrorClass::Parameter, self.camera()?.u32_range(name))
    }

    /// Writes `value` after checking it against the parameter's limits.
    ///
    /// Width and height are rewritten from the sink's requested dimensions
    /// whenever acquisition starts.
    pub fn set_u32(&self, param: UIntParam, value: u32) -> Result<()> {
        let name = param.name();
        let range = self.u32_range(param)?;
        if !range.contains(value) {
            return Err(PipelineError::OutOfRange {
                name,
                value,
                min: range.min,
                max: range.max,
                inc: range.inc,
            });
        }
        self.reconfigure(|camera| {
            sdk_call(name, ErrorClass::Parameter, camera.set_u32(name, value))?;
            debug!(name, value, "parameter set");
            Ok(())
        })
    }

    pub fn get_bool(&self, param: BoolParam) -> Result<bool> {
        let name = param.name();
        sdk_call(name, ErrorClass::Parameter, self.camera()?.get_bool(name))
    }

    pub fn set_bool(&self, param: BoolParam, value: bool) -> Result<()> {
        let name = param.name();
        self.reconfigure(|camera| {
            sdk_call(name, ErrorClass::Parameter, camera.set_bool(name, value))?;
            debug!(name, value, "parameter set");
            Ok(())
        })
    }

    /// Selects the native encoding used from the next start.
    pub fn set_pixel_index(&self, index: u32) -> Result<()> {
        self.update_config(|c| c.pixel_index = index)
    }

    pub fn set_buffer_count(&self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(PipelineError::OutOfRange {
                name: "BufferCount",
                value: count,
                min: 1,
                max: u32::MAX,
                inc: 1,
            });
        }
        self.update_config(|c| c.buffer_count = count)
    }

    pub fn set_buffer_mode(&self, mode: BufferMode) -> Result<()> {
        self.update_config(|c| c.buffer_mode = mode)
    }

    pub fn set_trigger(&self, trigger: TriggerSource) -> Result<()> {
        self.update_config(|c| c.trigger = trigger)
    }

    /// Driver settings take effect on the next start, so a change while
    /// Streaming restarts acquisition.
    fn update_config(&self, f: impl FnOnce(&mut ControllerConfig)) -> Result<()> {
        let mut inner = self.inner.lock();
        let restart = self.state() == AcquisitionState::Streaming;
        if restart {
            self.stop_locked(&mut inner)?;
        }
        f(&mut self.config.lock());
        if restart {
            self.start_locked(&mut inner)?;
        }
        Ok(())
    }
}

impl<S: CameraSdk, K: OutputSink> Drop for AcquisitionController<S, K> {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!("disconnect on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkStatus;
    use crate::sim::{SimConfig, SimSdk};
    use crate::sink::{ChannelSink, RequestedFormat};

    const SERIAL: &str = "EVT-SIM-0001";

    fn controller() -> AcquisitionController<SimSdk, ChannelSink> {
        let (sink, _rx) = ChannelSink::new(RequestedFormat::default(), 8);
        AcquisitionController::new(
            Arc::new(SimSdk::new(SimConfig::default())),
            Arc::new(sink),
            ControllerConfig::default(),
        )
    }

    #[test]
    fn test_connect_errors() {
        let ctrl = controller();
        let err = ctrl.connect("").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Connection);
        let err = ctrl.connect("missing").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Connection);
        assert!(!ctrl.is_connected());

        let info = ctrl.connect(SERIAL).unwrap();
        assert_eq!(info.serial_number, SERIAL);
        assert!(matches!(
            ctrl.connect(SERIAL),
            Err(PipelineError::InvalidState(_))
        ));
        ctrl.disconnect().unwrap();
        assert!(!ctrl.is_connected());
    }

    #[test]
    fn test_no_cameras() {
        let (sink, _rx) = ChannelSink::new(RequestedFormat::default(), 1);
        let ctrl = AcquisitionController::new(
            Arc::new(SimSdk::empty()),
            Arc::new(sink),
            ControllerConfig::default(),
        );
        let err = ctrl.connect(SERIAL).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Connection {
                op: "listDevices",
                ..
            }
        ));
    }

    #[test]
    fn test_open_failure() {
        let sdk = Arc::new(SimSdk::new(SimConfig::default()));
        sdk.fail_next_open(SdkStatus::DeviceAlreadyConnected);
        let (sink, _rx) = ChannelSink::new(RequestedFormat::default(), 1);
        let ctrl = AcquisitionController::new(sdk, Arc::new(sink), ControllerConfig::default());
        let err = ctrl.connect(SERIAL).unwrap_err();
        assert!(matches!(err, PipelineError::Connection { op: "openDevice", .. }));
        ctrl.connect(SERIAL).unwrap();
    }

    #[test]
    fn test_requires_connection() {
        let ctrl = controller();
        assert_eq!(ctrl.start(), Err(PipelineError::NotConnected));
        assert_eq!(
            ctrl.get_u32(UIntParam::Exposure),
            Err(PipelineError::NotConnected)
        );
        assert_eq!(ctrl.stop(), Ok(()));
        assert_eq!(ctrl.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_superseded_run_leaves_state() {
        let shared = Shared {
            status: Mutex::new(Status {
                state: AcquisitionState::Streaming,
                generation: 2,
                last_report: None,
            }),
            clock: Arc::new(FrameClock::new()),
        };
        let report = RunReport {
            frames_published: 0,
            frames_dropped: 0,
            outcome: crate::pump::RunOutcome::Stopped,
        };
        assert!(!shared.finish(1, &report));
        assert_eq!(shared.status.lock().state, AcquisitionState::Streaming);
        assert_eq!(shared.status.lock().last_report, None);
        assert!(shared.finish(2, &report));
        assert_eq!(shared.status.lock().state, AcquisitionState::Idle);
        assert_eq!(shared.status.lock().last_report, Some(report));
    }

    #[test]
    fn test_parameter_validation() {
        let ctrl = controller();
        ctrl.connect(SERIAL).unwrap();
        ctrl.set_u32(UIntParam::Exposure, 2000).unwrap();
        assert_eq!(ctrl.get_u32(UIntParam::Exposure), Ok(2000));
        let err = ctrl.set_u32(UIntParam::PacketSize, 577).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfRange {
                name: "GevSCPSPacketSize",
                inc: 4,
                ..
            }
        ));
        ctrl.set_bool(BoolParam::AutoGain, true).unwrap();
        assert_eq!(ctrl.get_bool(BoolParam::AutoGain), Ok(true));
    }
}
