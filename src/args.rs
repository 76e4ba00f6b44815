// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use emergent_camera::{
    controller::ControllerConfig,
    format::{ColorMode, DataType},
    image::Dimensions,
    pump::TriggerSource,
    sink::{ImageMode, RequestedFormat},
};
use serde_json::json;
use std::time::Duration;
use zenoh::config::{Config, WhatAmI};

/// Requested color mode of published images.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum ColorSetting {
    /// Single channel
    Mono,
    /// Three channel RGB
    Rgb,
    /// Raw Bayer GB mosaic
    Bayer,
}

impl From<ColorSetting> for ColorMode {
    fn from(value: ColorSetting) -> Self {
        match value {
            ColorSetting::Mono => ColorMode::Mono,
            ColorSetting::Rgb => ColorMode::Rgb,
            ColorSetting::Bayer => ColorMode::Bayer,
        }
    }
}

/// Requested sample type of published images.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum DataTypeSetting {
    /// 8 bits per sample
    Uint8,
    /// 16 bits per sample
    Uint16,
}

impl From<DataTypeSetting> for DataType {
    fn from(value: DataTypeSetting) -> Self {
        match value {
            DataTypeSetting::Uint8 => DataType::UInt8,
            DataTypeSetting::Uint16 => DataType::UInt16,
        }
    }
}

/// Acquisition length.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum ImageModeSetting {
    /// Capture one frame then stop
    Single,
    /// Capture --image-count frames then stop
    Multiple,
    /// Capture until interrupted
    Continuous,
}

/// Capture trigger source.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum TriggerSetting {
    /// Camera free-runs at its frame rate
    FreeRun,
    /// One software trigger per queued buffer
    Software,
}

impl From<TriggerSetting> for TriggerSource {
    fn from(value: TriggerSetting) -> Self {
        match value {
            TriggerSetting::FreeRun => TriggerSource::FreeRun,
            TriggerSetting::Software => TriggerSource::Software,
        }
    }
}

/// Command-line arguments for the Emergent camera node.
///
/// Every option can also be given through the environment variable named
/// in its help text.
///
/// # Example
///
/// ```bash
/// emergent-camera --serial 2100123 --color rgb --image-size 1920 1080
///
/// export SERIAL=2100123
/// export IMAGE_MODE=multiple IMAGE_COUNT=100
/// emergent-camera
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial number of the camera to connect to
    #[arg(short, long, env = "SERIAL", default_value = "EVT-SIM-0001")]
    pub serial: String,

    /// Image size in pixels (width height)
    #[arg(
        long,
        env = "IMAGE_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub image_size: Vec<u32>,

    /// Sensor offset in pixels (x y)
    #[arg(
        long,
        env = "OFFSET",
        default_value = "0 0",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub offset: Vec<u32>,

    /// Requested color mode
    #[arg(long, env = "COLOR", default_value = "mono", value_enum)]
    pub color: ColorSetting,

    /// Requested sample type
    #[arg(long, env = "DATA_TYPE", default_value = "uint8", value_enum)]
    pub data_type: DataTypeSetting,

    /// Index among the camera's native encodings for the color mode
    #[arg(long, env = "PIXEL_INDEX", default_value = "0")]
    pub pixel_index: u32,

    /// Acquisition length
    #[arg(long, env = "IMAGE_MODE", default_value = "continuous", value_enum)]
    pub image_mode: ImageModeSetting,

    /// Frames to capture in multiple image mode
    #[arg(long, env = "IMAGE_COUNT", default_value = "10")]
    pub image_count: u32,

    /// Exposure time in microseconds
    #[arg(long, env = "EXPOSURE")]
    pub exposure: Option<u32>,

    /// Analog gain
    #[arg(long, env = "GAIN")]
    pub gain: Option<u32>,

    /// Camera frame rate
    #[arg(long, env = "FRAME_RATE")]
    pub frame_rate: Option<u32>,

    /// Capture trigger source
    #[arg(long, env = "TRIGGER", default_value = "free-run", value_enum)]
    pub trigger: TriggerSetting,

    /// Frame wait bound in milliseconds, 0 waits indefinitely
    #[arg(long, env = "CAPTURE_TIMEOUT", default_value = "1000")]
    pub capture_timeout: u64,

    /// Stream buffers requested from the camera
    #[arg(long, env = "BUFFER_COUNT", default_value = "30")]
    pub buffer_count: u32,

    /// Frame period of the simulated camera in milliseconds
    #[arg(long, env = "SIM_FRAME_PERIOD", default_value = "33")]
    pub sim_frame_period: u64,

    /// Zenoh topic for published images (sensor_msgs/Image)
    #[arg(long, env = "TOPIC", default_value = "rt/camera/image")]
    pub topic: String,

    /// Frame ID placed in message headers
    #[arg(long, env = "FRAME_ID", default_value = "camera")]
    pub frame_id: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,

    /// Zenoh participant mode (peer, client, or router)
    #[arg(long, env = "MODE", default_value = "peer")]
    mode: WhatAmI,

    /// Zenoh endpoints to connect to (can specify multiple)
    #[arg(long, env = "CONNECT")]
    connect: Vec<String>,

    /// Zenoh endpoints to listen on (can specify multiple)
    #[arg(long, env = "LISTEN")]
    listen: Vec<String>,

    /// Disable Zenoh multicast peer discovery
    #[arg(long, env = "NO_MULTICAST_SCOUTING")]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.image_size[0], self.image_size[1])
    }

    pub fn requested_format(&self) -> RequestedFormat {
        let image_mode = match self.image_mode {
            ImageModeSetting::Single => ImageMode::Single,
            ImageModeSetting::Multiple => ImageMode::Multiple(self.image_count),
            ImageModeSetting::Continuous => ImageMode::Continuous,
        };
        RequestedFormat {
            color: self.color.into(),
            dtype: self.data_type.into(),
            dims: self.dimensions(),
            image_mode,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let capture_timeout =
            (self.capture_timeout > 0).then(|| Duration::from_millis(self.capture_timeout));
        ControllerConfig {
            capture_timeout,
            buffer_count: self.buffer_count,
            trigger: self.trigger.into(),
            pixel_index: self.pixel_index,
            ..Default::default()
        }
    }
}

impl TryFrom<&Args> for Config {
    type Error = zenoh::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}
