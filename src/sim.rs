// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-process simulated camera SDK.
//!
//! Implements [`CameraSdk`] and [`Camera`] without hardware: frames are
//! synthesized at a fixed period, zero-copy buffers are heap regions the
//! host can only give back through `release_frame_buffer`, and conversions
//! run through [`crate::convert`]. Faults can be injected per operation to
//! exercise the pipeline's error paths.

use crate::convert::{self, encode_samples};
use crate::error::{SdkResult, SdkStatus};
use crate::format::{ConversionMode, FrameDescriptor, PixelFormat};
use crate::sdk::{names, Camera, CameraSdk, DeviceInfo, FrameBuffer, FrameInfo, ParamRange};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{HashMap, HashSet},
    ptr::{self, NonNull},
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, trace};

/// Simulated camera configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub serial_number: String,
    /// Interval between frames in free-running mode.
    pub frame_period: Duration,
    pub width: u32,
    pub height: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            serial_number: "EVT-SIM-0001".to_string(),
            frame_period: Duration::from_millis(1),
            width: 64,
            height: 48,
        }
    }
}

/// One-shot fault. `after` counts the successful calls of that operation
/// to let through before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `allocateFrameBuffer` fails with `NoMemory`.
    Allocate { after: u32 },
    /// `queueFrame` fails with `Io`.
    Queue { after: u32 },
    /// `getFrame` fails with `DeviceLostConnection`.
    Capture { after: u32 },
    /// `convertFrame` fails with `Io`.
    Convert { after: u32 },
    /// `openStream` fails with `Again`.
    OpenStream,
    /// `getFrame` never delivers; returns `Timeout` when its wait elapses
    /// or `Io` when the stream is closed underneath it.
    Hang { after: u32 },
    /// Like `Hang`, but once the stream is closed the call stays blocked
    /// for `linger` before failing with `Io`.
    Wedge { after: u32, linger: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Allocate,
    Queue,
    Capture,
    Convert,
    OpenStream,
    Hang,
}

impl Fault {
    fn arm(self) -> Armed {
        let (op, after, linger) = match self {
            Fault::Allocate { after } => (Op::Allocate, after, Duration::ZERO),
            Fault::Queue { after } => (Op::Queue, after, Duration::ZERO),
            Fault::Capture { after } => (Op::Capture, after, Duration::ZERO),
            Fault::Convert { after } => (Op::Convert, after, Duration::ZERO),
            Fault::OpenStream => (Op::OpenStream, 0, Duration::ZERO),
            Fault::Hang { after } => (Op::Hang, after, Duration::ZERO),
            Fault::Wedge { after, linger } => (Op::Hang, after, linger),
        };
        Armed { op, after, linger }
    }
}

struct Armed {
    op: Op,
    after: u32,
    linger: Duration,
}

/// Call counters, used to check that every allocation is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub allocated: u64,
    pub released: u64,
    pub queued: u64,
    pub frames: u64,
    pub conversions: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
}

impl SimCounters {
    /// Buffers allocated but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocated - self.released
    }
}

struct Register {
    value: u32,
    range: ParamRange,
}

struct State {
    device_open: bool,
    streaming: bool,
    acquiring: bool,
    registers: HashMap<&'static str, Register>,
    flags: HashMap<&'static str, bool>,
    live: HashMap<u64, usize>,
    queued: HashSet<u64>,
    next_buffer_id: u64,
    next_frame_at: Instant,
    triggers: u32,
    frame_id: u64,
    faults: Vec<Armed>,
    counters: SimCounters,
}

impl State {
    fn take_fault(&mut self, op: Op) -> bool {
        self.fire(op).is_some()
    }

    /// Consumes the first due fault for `op`, returning its linger.
    fn fire(&mut self, op: Op) -> Option<Duration> {
        let mut fired = None;
        self.faults.retain_mut(|armed| {
            if armed.op != op {
                return true;
            }
            if armed.after == 0 && fired.is_none() {
                fired = Some(armed.linger);
                return false;
            }
            armed.after = armed.after.saturating_sub(1);
            true
        });
        fired
    }
}

fn register(value: u32, min: u32, max: u32, inc: u32) -> Register {
    Register {
        value,
        range: ParamRange { min, max, inc },
    }
}

struct Inner {
    config: SimConfig,
    state: Mutex<State>,
    cond: Condvar,
}

/// Handle to a simulated camera. Clones share the same device.
#[derive(Clone)]
pub struct SimCamera {
    inner: Arc<Inner>,
}

fn epoch_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl SimCamera {
    pub fn new(config: SimConfig) -> Self {
        let registers = HashMap::from([
            (names::WIDTH, register(config.width, 8, 4096, 8)),
            (names::HEIGHT, register(config.height, 2, 3072, 2)),
            (names::OFFSET_X, register(0, 0, 4088, 8)),
            (names::OFFSET_Y, register(0, 0, 3070, 2)),
            (
                names::PIXEL_FORMAT,
                register(PixelFormat::Mono8.code(), 0, u32::MAX, 1),
            ),
            (names::EXPOSURE, register(10_000, 10, 1_000_000, 1)),
            (names::GAIN, register(256, 0, 4095, 1)),
            (names::FRAME_RATE, register(30, 1, 1000, 1)),
            (names::PACKET_SIZE, register(8164, 576, 9000, 4)),
            (names::ACQUISITION_FRAME_COUNT, register(1, 1, 65535, 1)),
            (names::BUFFER_MODE, register(0, 0, 1, 1)),
        ]);
        let flags = HashMap::from([
            (names::TRIGGER_MODE, false),
            (names::TRIGGER_SOFTWARE_SOURCE, false),
            (names::LUT_ENABLE, false),
            (names::AUTO_GAIN, false),
        ]);
        let state = State {
            // Standalone cameras (unit tests) behave as already opened.
            device_open: true,
            streaming: false,
            acquiring: false,
            registers,
            flags,
            live: HashMap::new(),
            queued: HashSet::new(),
            next_buffer_id: 1,
            next_frame_at: Instant::now(),
            triggers: 0,
            frame_id: 0,
            faults: Vec::new(),
            counters: SimCounters::default(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
        }
    }

    /// Arms a one-shot fault.
    pub fn inject(&self, fault: Fault) {
        self.inner.state.lock().faults.push(fault.arm());
        self.inner.cond.notify_all();
    }

    pub fn clear_faults(&self) {
        self.inner.state.lock().faults.clear();
    }

    pub fn counters(&self) -> SimCounters {
        self.inner.state.lock().counters
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().streaming
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().device_open
    }

    fn fill(&self, buffer: &mut FrameBuffer, frame: u64) {
        let desc = *buffer.descriptor();
        let (w, h) = (desc.width as u64, desc.height as u64);
        let dst = buffer.as_mut_slice();
        match desc.format {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
                for (i, px) in dst.chunks_exact_mut(3).enumerate() {
                    let (x, y) = (i as u64 % w, i as u64 / w);
                    px[0] = (x + frame) as u8;
                    px[1] = (y + frame) as u8;
                    px[2] = frame as u8;
                }
            }
            PixelFormat::Yuv422 => {
                for (i, px) in dst.chunks_exact_mut(4).enumerate() {
                    let x = (i as u64 * 2) % w;
                    px[0] = 128;
                    px[1] = (x + frame) as u8;
                    px[2] = 128;
                    px[3] = (x + 1 + frame) as u8;
                }
            }
            PixelFormat::Rgb16 => {
                for (i, px) in dst.chunks_exact_mut(2).enumerate() {
                    px.copy_from_slice(&((i as u64 + frame) as u16).to_le_bytes());
                }
            }
            format => {
                let mask = (1u64 << format.bit_depth()) - 1;
                let samples: Vec<u16> = (0..w * h)
                    .map(|i| (((i % w) + (i / w) + frame) & mask) as u16)
                    .collect();
                if let Err(e) = encode_samples(format, &samples, dst) {
                    debug!("frame synthesis failed: {e}");
                }
            }
        }
    }
}

impl Camera for SimCamera {
    fn open_stream(&self, buffers: u32) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        if !state.device_open {
            return Err(SdkStatus::DeviceNotConnected);
        }
        if state.take_fault(Op::OpenStream) || state.streaming {
            return Err(SdkStatus::Again);
        }
        state.streaming = true;
        state.triggers = 0;
        state.next_frame_at = Instant::now() + self.inner.config.frame_period;
        state.counters.streams_opened += 1;
        debug!(buffers, "sim stream opened");
        Ok(())
    }

    fn close_stream(&self) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        if !state.streaming {
            return Err(SdkStatus::Io);
        }
        state.streaming = false;
        state.acquiring = false;
        state.queued.clear();
        state.counters.streams_closed += 1;
        self.inner.cond.notify_all();
        debug!("sim stream closed");
        Ok(())
    }

    fn execute_command(&self, name: &str) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        if !state.device_open {
            return Err(SdkStatus::DeviceNotConnected);
        }
        match name {
            names::ACQUISITION_START => {
                if !state.streaming {
                    return Err(SdkStatus::Io);
                }
                state.acquiring = true;
            }
            names::ACQUISITION_STOP => state.acquiring = false,
            names::TRIGGER_SOFTWARE => {
                if !state.acquiring {
                    return Err(SdkStatus::Io);
                }
                state.triggers += 1;
            }
            _ => return Err(SdkStatus::NotSupported),
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    fn get_u32(&self, name: &str) -> SdkResult<u32> {
        let state = self.inner.state.lock();
        state
            .registers
            .get(name)
            .map(|r| r.value)
            .ok_or(SdkStatus::NotSupported)
    }

    fn set_u32(&self, name: &str, value: u32) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        let locked = state.streaming
            && matches!(
                name,
                names::WIDTH | names::HEIGHT | names::PIXEL_FORMAT | names::PACKET_SIZE
            );
        if locked {
            return Err(SdkStatus::Again);
        }
        let reg = state
            .registers
            .get_mut(name)
            .ok_or(SdkStatus::NotSupported)?;
        if !reg.range.contains(value) {
            return Err(SdkStatus::InvalidArgument);
        }
        reg.value = value;
        Ok(())
    }

    fn u32_range(&self, name: &str) -> SdkResult<ParamRange> {
        let state = self.inner.state.lock();
        state
            .registers
            .get(name)
            .map(|r| r.range)
            .ok_or(SdkStatus::NotSupported)
    }

    fn get_bool(&self, name: &str) -> SdkResult<bool> {
        let state = self.inner.state.lock();
        state.flags.get(name).copied().ok_or(SdkStatus::NotSupported)
    }

    fn set_bool(&self, name: &str, value: bool) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        let flag = state.flags.get_mut(name).ok_or(SdkStatus::NotSupported)?;
        *flag = value;
        Ok(())
    }

    fn allocate_frame_buffer(&self, descriptor: &FrameDescriptor) -> SdkResult<FrameBuffer> {
        let mut state = self.inner.state.lock();
        if !state.device_open {
            return Err(SdkStatus::DeviceNotConnected);
        }
        if state.take_fault(Op::Allocate) {
            return Err(SdkStatus::NoMemory);
        }
        let len = descriptor.len();
        if len == 0 {
            return Err(SdkStatus::InvalidArgument);
        }
        let region = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::new(Box::into_raw(region) as *mut u8).ok_or(SdkStatus::NoMemory)?;
        let id = state.next_buffer_id;
        state.next_buffer_id += 1;
        state.live.insert(id, len);
        state.counters.allocated += 1;
        // SAFETY: `ptr` comes from a leaked boxed slice of `len` bytes that
        // only this FrameBuffer references until `release_frame_buffer`.
        Ok(unsafe { FrameBuffer::from_raw_parts(id, *descriptor, ptr, len) })
    }

    fn queue_frame(&self, buffer: &mut FrameBuffer) -> SdkResult<()> {
        let mut state = self.inner.state.lock();
        if !state.streaming {
            return Err(SdkStatus::Io);
        }
        if !state.live.contains_key(&buffer.id()) {
            return Err(SdkStatus::InvalidArgument);
        }
        if state.take_fault(Op::Queue) {
            return Err(SdkStatus::Io);
        }
        state.queued.insert(buffer.id());
        state.counters.queued += 1;
        Ok(())
    }

    fn get_frame(
        &self,
        buffer: &mut FrameBuffer,
        timeout: Option<Duration>,
    ) -> SdkResult<FrameInfo> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut state = self.inner.state.lock();
        if !state.queued.contains(&buffer.id()) {
            return Err(SdkStatus::InvalidArgument);
        }
        if state.take_fault(Op::Capture) {
            state.queued.remove(&buffer.id());
            return Err(SdkStatus::DeviceLostConnection);
        }
        let linger = state.fire(Op::Hang);
        let hang = linger.is_some();

        loop {
            if !state.streaming {
                if let Some(linger) = linger.filter(|l| !l.is_zero()) {
                    drop(state);
                    thread::sleep(linger);
                }
                return Err(SdkStatus::Io);
            }
            let trigger_mode = state.flags.get(names::TRIGGER_MODE).copied().unwrap_or(false);
            let now = Instant::now();
            let ready = !hang
                && state.acquiring
                && if trigger_mode {
                    state.triggers > 0
                } else {
                    now >= state.next_frame_at
                };
            if ready {
                break;
            }
            if deadline.is_some_and(|d| now >= d) {
                state.queued.remove(&buffer.id());
                return Err(SdkStatus::Timeout);
            }

            let free_running = !hang && state.acquiring && !trigger_mode;
            let frame_at = free_running.then_some(state.next_frame_at);
            let wake = match (frame_at, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake {
                Some(at) => {
                    self.inner.cond.wait_until(&mut state, at);
                }
                None => self.inner.cond.wait(&mut state),
            }
        }

        if state.triggers > 0 {
            state.triggers -= 1;
        }
        state.next_frame_at = Instant::now() + self.inner.config.frame_period;
        state.queued.remove(&buffer.id());
        state.frame_id += 1;
        state.counters.frames += 1;
        let frame_id = state.frame_id;
        drop(state);

        self.fill(buffer, frame_id);
        trace!(frame_id, "sim frame delivered");
        Ok(FrameInfo {
            frame_id,
            timestamp_ns: epoch_ns(),
        })
    }

    fn release_frame_buffer(&self, buffer: FrameBuffer) -> SdkResult<()> {
        let (id, ptr, len) = buffer.into_raw_parts();
        let mut state = self.inner.state.lock();
        match state.live.remove(&id) {
            Some(known) if known == len => {}
            _ => return Err(SdkStatus::InvalidArgument),
        }
        state.queued.remove(&id);
        state.counters.released += 1;
        drop(state);
        // SAFETY: `id` was live, so `ptr`/`len` are the leaked boxed slice
        // created in `allocate_frame_buffer` and are reclaimed exactly once.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len)));
        }
        Ok(())
    }

    fn convert_frame(
        &self,
        src: &FrameBuffer,
        dst: &mut FrameBuffer,
        mode: ConversionMode,
    ) -> SdkResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.take_fault(Op::Convert) {
                return Err(SdkStatus::Io);
            }
            state.counters.conversions += 1;
        }
        if mode == ConversionMode::None {
            return Err(SdkStatus::InvalidArgument);
        }
        let from = *src.descriptor();
        let to = *dst.descriptor();
        convert::convert(
            from.format,
            src.as_slice(),
            to.format,
            dst.as_mut_slice(),
            from.width,
            from.height,
        )
        .map_err(|e| {
            debug!("sim conversion rejected: {e}");
            SdkStatus::InvalidArgument
        })
    }
}

/// Simulated SDK exposing a fixed set of cameras.
pub struct SimSdk {
    devices: Vec<(DeviceInfo, SimCamera)>,
    open_failure: Mutex<Option<SdkStatus>>,
}

impl SimSdk {
    /// SDK with one simulated camera.
    pub fn new(config: SimConfig) -> Self {
        let info = DeviceInfo {
            spec_version_major: 2,
            spec_version_minor: 0,
            device_mode: 1,
            device_version: "1.0.0-sim".to_string(),
            manufacturer_name: "Emergent Vision Technologies".to_string(),
            model_name: "HR-SIM".to_string(),
            current_ip: "192.168.10.2".to_string(),
            current_subnet_mask: "255.255.255.0".to_string(),
            mac_address: "00:00:00:00:00:01".to_string(),
            serial_number: config.serial_number.clone(),
            user_defined_name: String::new(),
            manufacturer_specific_info: "simulated".to_string(),
        };
        let camera = SimCamera::new(config);
        camera.inner.state.lock().device_open = false;
        Self {
            devices: vec![(info, camera)],
            open_failure: Mutex::new(None),
        }
    }

    /// SDK that finds no cameras.
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
            open_failure: Mutex::new(None),
        }
    }

    /// Shared handle to the simulated camera with `serial`.
    pub fn camera(&self, serial: &str) -> Option<SimCamera> {
        self.devices
            .iter()
            .find(|(info, _)| info.serial_number == serial)
            .map(|(_, cam)| cam.clone())
    }

    /// Makes the next `open_device` fail with `status`.
    pub fn fail_next_open(&self, status: SdkStatus) {
        *self.open_failure.lock() = Some(status);
    }
}

impl CameraSdk for SimSdk {
    type Camera = SimCamera;

    fn version(&self) -> String {
        format!("sim-{}", env!("CARGO_PKG_VERSION"))
    }

    fn list_devices(&self, max: usize) -> SdkResult<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .take(max)
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn open_device(&self, info: &DeviceInfo) -> SdkResult<SimCamera> {
        if let Some(status) = self.open_failure.lock().take() {
            return Err(status);
        }
        let camera = self.camera(&info.serial_number).ok_or(SdkStatus::Search)?;
        let mut state = camera.inner.state.lock();
        if state.device_open {
            return Err(SdkStatus::DeviceAlreadyConnected);
        }
        state.device_open = true;
        drop(state);
        Ok(camera)
    }

    fn close_device(&self, camera: &SimCamera) -> SdkResult<()> {
        let mut state = camera.inner.state.lock();
        if !state.device_open {
            return Err(SdkStatus::DeviceNotConnected);
        }
        state.device_open = false;
        state.streaming = false;
        state.acquiring = false;
        state.queued.clear();
        camera.inner.cond.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{negotiate, ColorMode, DataType};

    fn raw_descriptor(color: ColorMode, dtype: DataType, index: u32) -> FrameDescriptor {
        let n = negotiate(color, dtype, index).unwrap();
        FrameDescriptor::for_cycle(&n, 8, 4).unwrap().0
    }

    #[test]
    fn test_capture_cycle() {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(4).unwrap();
        cam.execute_command(names::ACQUISITION_START).unwrap();
        let mut buf = cam
            .allocate_frame_buffer(&raw_descriptor(ColorMode::Mono, DataType::UInt8, 0))
            .unwrap();
        cam.queue_frame(&mut buf).unwrap();
        let info = cam.get_frame(&mut buf, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(info.frame_id, 1);
        assert_eq!(buf.as_slice()[1], 2);
        cam.release_frame_buffer(buf).unwrap();
        cam.close_stream().unwrap();
        let c = cam.counters();
        assert_eq!(c.outstanding(), 0);
        assert_eq!(c.frames, 1);
    }

    #[test]
    fn test_get_frame_requires_queue() {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(1).unwrap();
        let mut buf = cam
            .allocate_frame_buffer(&raw_descriptor(ColorMode::Mono, DataType::UInt8, 0))
            .unwrap();
        assert_eq!(
            cam.get_frame(&mut buf, Some(Duration::from_millis(5))).unwrap_err(),
            SdkStatus::InvalidArgument
        );
        cam.release_frame_buffer(buf).unwrap();
    }

    #[test]
    fn test_hang_times_out() {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(1).unwrap();
        cam.execute_command(names::ACQUISITION_START).unwrap();
        cam.inject(Fault::Hang { after: 0 });
        let mut buf = cam
            .allocate_frame_buffer(&raw_descriptor(ColorMode::Mono, DataType::UInt8, 0))
            .unwrap();
        cam.queue_frame(&mut buf).unwrap();
        let err = cam
            .get_frame(&mut buf, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err, SdkStatus::Timeout);
        cam.release_frame_buffer(buf).unwrap();
    }

    #[test]
    fn test_wedge_lingers_after_close() {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(1).unwrap();
        cam.execute_command(names::ACQUISITION_START).unwrap();
        cam.inject(Fault::Wedge {
            after: 0,
            linger: Duration::from_millis(40),
        });
        let mut buf = cam
            .allocate_frame_buffer(&raw_descriptor(ColorMode::Mono, DataType::UInt8, 0))
            .unwrap();
        cam.queue_frame(&mut buf).unwrap();

        let closer = cam.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            closer.close_stream().unwrap();
        });
        let err = cam.get_frame(&mut buf, None).unwrap_err();
        handle.join().unwrap();
        assert_eq!(err, SdkStatus::Io);
        assert!(started.elapsed() >= Duration::from_millis(50));
        cam.release_frame_buffer(buf).unwrap();
    }

    #[test]
    fn test_faults_fire_after_count() {
        let cam = SimCamera::new(SimConfig::default());
        cam.inject(Fault::Allocate { after: 2 });
        let desc = raw_descriptor(ColorMode::Mono, DataType::UInt8, 0);
        let a = cam.allocate_frame_buffer(&desc).unwrap();
        let b = cam.allocate_frame_buffer(&desc).unwrap();
        assert_eq!(
            cam.allocate_frame_buffer(&desc).unwrap_err(),
            SdkStatus::NoMemory
        );
        let c = cam.allocate_frame_buffer(&desc).unwrap();
        for buf in [a, b, c] {
            cam.release_frame_buffer(buf).unwrap();
        }
        assert_eq!(cam.counters().outstanding(), 0);
    }

    #[test]
    fn test_packed_frames_convert() {
        let cam = SimCamera::new(SimConfig::default());
        cam.open_stream(1).unwrap();
        cam.execute_command(names::ACQUISITION_START).unwrap();
        let n = negotiate(ColorMode::Mono, DataType::UInt16, 4).unwrap();
        let (raw, conv) = FrameDescriptor::for_cycle(&n, 8, 4).unwrap();
        let mut raw = cam.allocate_frame_buffer(&raw).unwrap();
        let mut conv = cam.allocate_frame_buffer(&conv.unwrap()).unwrap();
        cam.queue_frame(&mut raw).unwrap();
        cam.get_frame(&mut raw, None).unwrap();
        cam.convert_frame(&raw, &mut conv, n.conversion).unwrap();
        let px: Vec<u16> = conv
            .as_slice()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(&px[..3], &[1, 2, 3]);
        cam.release_frame_buffer(raw).unwrap();
        cam.release_frame_buffer(conv).unwrap();
    }

    #[test]
    fn test_registers_lock_while_streaming() {
        let cam = SimCamera::new(SimConfig::default());
        cam.set_u32(names::WIDTH, 128).unwrap();
        assert_eq!(cam.set_u32(names::WIDTH, 129), Err(SdkStatus::InvalidArgument));
        cam.open_stream(1).unwrap();
        assert_eq!(cam.set_u32(names::WIDTH, 256), Err(SdkStatus::Again));
        cam.set_u32(names::EXPOSURE, 500).unwrap();
        assert_eq!(cam.get_u32(names::EXPOSURE), Ok(500));
    }
}
