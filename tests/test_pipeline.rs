// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use emergent_camera::{
    error::{PipelineError, Result},
    format::{negotiate, ColorMode, DataType, PixelFormat},
    image::{Dimensions, OutputBuffer},
    pump::{CancelToken, FrameClock, FramePump, PumpSettings, RunOutcome, TriggerSource},
    sdk::{names, Camera},
    sim::{Fault, SimCamera, SimConfig},
    sink::{ImageMode, OutputSink, RequestedFormat},
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serial_test::serial;
use std::{sync::Arc, time::Duration};

/// Sink that randomly refuses allocations and publishes.
struct FlakySink {
    format: Mutex<RequestedFormat>,
    rng: Mutex<StdRng>,
    published: Mutex<Vec<(u64, u64)>>,
}

impl FlakySink {
    fn new(seed: u64) -> Self {
        Self {
            format: Mutex::new(RequestedFormat::default()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl OutputSink for FlakySink {
    fn requested_format(&self) -> RequestedFormat {
        *self.format.lock()
    }

    fn allocate(
        &self,
        dims: Dimensions,
        color: ColorMode,
        dtype: DataType,
    ) -> Result<OutputBuffer> {
        if self.rng.lock().gen_bool(0.05) {
            return Err(PipelineError::Publish("allocation refused".to_string()));
        }
        Ok(OutputBuffer::new(dims, color, dtype))
    }

    fn publish(&self, buffer: OutputBuffer, sequence_id: u64, timestamp_ns: u64) -> Result<()> {
        if self.rng.lock().gen_bool(0.1) {
            return Err(PipelineError::Publish("consumer busy".to_string()));
        }
        assert_eq!(buffer.sequence_id(), sequence_id);
        self.published.lock().push((sequence_id, timestamp_ns));
        Ok(())
    }
}

/// Requests served by the simulated camera, with and without conversion.
const FORMATS: &[(ColorMode, DataType, u32)] = &[
    (ColorMode::Mono, DataType::UInt8, 0),
    (ColorMode::Mono, DataType::UInt8, 2),
    (ColorMode::Mono, DataType::UInt16, 3),
    (ColorMode::Mono, DataType::UInt16, 4),
    (ColorMode::Bayer, DataType::UInt16, 2),
    (ColorMode::Bayer, DataType::UInt8, 4),
    (ColorMode::Rgb, DataType::UInt8, 0),
    (ColorMode::Rgb, DataType::UInt8, 1),
    (ColorMode::Rgb, DataType::UInt8, 2),
    (ColorMode::Rgb, DataType::UInt16, 5),
];

#[test]
#[serial]
fn test_randomized_cycles_release_every_buffer() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let cam = Arc::new(SimCamera::new(SimConfig {
        frame_period: Duration::from_micros(50),
        ..Default::default()
    }));
    cam.open_stream(8).unwrap();
    cam.execute_command(names::ACQUISITION_START).unwrap();

    let sink = Arc::new(FlakySink::new(7));
    let clock = Arc::new(FrameClock::new());
    let dims = Dimensions::new(16, 8);

    let mut cycles = 0u64;
    let mut published = 0u64;
    let mut failed_runs = 0u64;
    while cycles < 1000 {
        let (color, dtype, pixel_index) = FORMATS[rng.gen_range(0..FORMATS.len())];
        *sink.format.lock() = RequestedFormat {
            color,
            dtype,
            dims,
            image_mode: ImageMode::Multiple(rng.gen_range(1..20)),
        };
        if rng.gen_bool(0.3) {
            cam.inject(Fault::Allocate {
                after: rng.gen_range(0..10),
            });
        }
        if rng.gen_bool(0.1) {
            cam.inject(Fault::Queue {
                after: rng.gen_range(0..10),
            });
        }
        if rng.gen_bool(0.1) {
            cam.inject(Fault::Capture {
                after: rng.gen_range(0..10),
            });
        }
        if rng.gen_bool(0.3) {
            cam.inject(Fault::Convert {
                after: rng.gen_range(0..10),
            });
        }

        let settings = PumpSettings {
            capture_timeout: Some(Duration::from_secs(1)),
            trigger: TriggerSource::FreeRun,
            pixel_index,
            dims,
            native: negotiate(color, dtype, pixel_index).unwrap().native,
        };
        let pump = FramePump::new(
            cam.clone(),
            sink.clone(),
            settings,
            CancelToken::new(),
            clock.clone(),
        );
        let report = pump.run();
        cycles += report.frames_published + report.frames_dropped;
        published += report.frames_published;
        if let RunOutcome::Failed(_) = report.outcome {
            failed_runs += 1;
            cycles += 1;
        }
        cam.clear_faults();

        let counters = cam.counters();
        assert_eq!(counters.outstanding(), 0, "after {cycles} cycles");
    }

    assert!(failed_runs > 0);
    let counters = cam.counters();
    assert_eq!(counters.allocated, counters.released);

    let frames = sink.published.lock();
    assert_eq!(frames.len() as u64, published);
    assert_eq!(clock.sequence(), published);
    for (i, pair) in frames.windows(2).enumerate() {
        assert_eq!(pair[1].0, pair[0].0 + 1, "sequence gap at {i}");
        assert!(pair[1].1 > pair[0].1, "timestamp not increasing at {i}");
    }
    assert_eq!(frames.first().map(|f| f.0), Some(1));
}

#[test]
#[serial]
fn test_dropped_frames_do_not_count_toward_completion() {
    let cam = Arc::new(SimCamera::new(SimConfig::default()));
    cam.open_stream(4).unwrap();
    cam.execute_command(names::ACQUISITION_START).unwrap();
    cam.inject(Fault::Allocate { after: 0 });
    cam.inject(Fault::Convert { after: 1 });

    let sink = Arc::new(FlakySink::new(1));
    *sink.format.lock() = RequestedFormat {
        color: ColorMode::Mono,
        dtype: DataType::UInt8,
        dims: Dimensions::new(16, 8),
        image_mode: ImageMode::Multiple(5),
    };
    let settings = PumpSettings {
        capture_timeout: Some(Duration::from_secs(1)),
        trigger: TriggerSource::FreeRun,
        pixel_index: 2,
        dims: Dimensions::new(16, 8),
        native: PixelFormat::Mono10,
    };
    let clock = Arc::new(FrameClock::new());
    let report = FramePump::new(
        cam.clone(),
        sink.clone(),
        settings,
        CancelToken::new(),
        clock.clone(),
    )
    .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.frames_published, 5);
    assert!(report.frames_dropped >= 2);
    assert_eq!(clock.sequence(), 5);
    let ids: Vec<u64> = sink.published.lock().iter().map(|f| f.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(cam.counters().outstanding(), 0);
}
