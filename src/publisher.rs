// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use cdr::{CdrLe, Infinite};
use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::Image, std_msgs::Header};
use emergent_camera::{format::PixelFormat, image::OutputBuffer};
use std::error::Error;
use tracing::trace;
use zenoh::Session;

/// ROS image encoding for an output pixel format.
pub fn encoding(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Mono16 => "mono16",
        PixelFormat::Rgb8 => "rgb8",
        PixelFormat::Rgb16 => "rgb16",
        PixelFormat::BayerGB8 => "bayer_gbrg8",
        PixelFormat::BayerGB16 => "bayer_gbrg16",
        _ => "mono8",
    }
}

pub fn build_image_msg(img: OutputBuffer, frame_id: &str) -> Image {
    let ts = img.timestamp_ns();
    Image {
        header: Header {
            stamp: Time {
                sec: (ts / 1_000_000_000) as i32,
                nanosec: (ts % 1_000_000_000) as u32,
            },
            frame_id: frame_id.to_string(),
        },
        height: img.height(),
        width: img.width(),
        encoding: encoding(img.format()).to_string(),
        is_bigendian: 0,
        step: img.stride() as u32,
        data: img.into_vec(),
    }
}

/// Publishes frames as CDR-encoded `sensor_msgs/Image` on one topic.
pub struct ImagePublisher {
    session: Session,
    topic: String,
    frame_id: String,
}

impl ImagePublisher {
    pub fn new(session: Session, topic: String, frame_id: String) -> Self {
        Self {
            session,
            topic,
            frame_id,
        }
    }

    pub async fn publish(&self, img: OutputBuffer) -> Result<(), Box<dyn Error + Send + Sync>> {
        let seq = img.sequence_id();
        let msg = build_image_msg(img, &self.frame_id);
        let encoded = cdr::serialize::<_, _, CdrLe>(&msg, Infinite)?;
        trace!(seq, bytes = encoded.len(), topic = %self.topic, "put");
        self.session.put(&self.topic, encoded).await?;
        Ok(())
    }
}
