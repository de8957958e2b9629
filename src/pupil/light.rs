//! Light-onset detection from the Pupil Core world camera.
//!
//! Watches the world-camera stream and sends an annotation stamped with the Pupil
//! timestamp of the first frame whose mean brightness jumps by more than a threshold.
//! Useful for extracting PLRs and for time-critical measures such as latency and
//! time-to-peak constriction. Start it before administering the stimulus.
//!
//! Tested with these Pupil Capture settings:
//!
//! 1. Resolution (320, 240) for eye and world
//! 2. Frame rate 120 for eye and world
//! 3. Manual exposure; absolute exposure time 60 for world, 63 for eye
//! 4. Frame Publisher format BGR

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{LightConfig, PupilConfig};
use crate::error::{PlrError, PlrResult};
use crate::pupil::message::{Annotation, Message};
use crate::pupil::pubsub::{Publisher, Subscriber};
use crate::pupil::transport::MessageSocket;

/// Topic of BGR world-camera frames from the Frame Publisher plugin.
pub const WORLD_FRAME_TOPIC: &str = "frame.world";

/// Color channels per pixel in a published frame.
pub const CHANNELS: usize = 3;

/// A decoded world-camera frame, reduced to what onset detection needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldFrame {
    /// Pupil timestamp of the frame
    pub timestamp: f64,
    pub width: usize,
    pub height: usize,
    /// Mean over every byte of the `height x width x 3` buffer
    pub mean_brightness: f64,
}

impl WorldFrame {
    /// Decode a `frame.world` message: dimensions and timestamp from the payload,
    /// pixels from the first raw frame.
    pub fn from_message(message: &Message) -> PlrResult<Self> {
        let payload = &message.payload;
        let height = frame_dimension(payload.require_u64("height")?, "height")?;
        let width = frame_dimension(payload.require_u64("width")?, "width")?;
        let timestamp = payload.require_f64("timestamp")?;

        let buffer = payload.raw_frames().first().copied().ok_or_else(|| {
            PlrError::Protocol(format!("'{}' message carries no image buffer", message.topic))
        })?;

        let expected = height
            .checked_mul(width)
            .and_then(|pixels| pixels.checked_mul(CHANNELS))
            .ok_or_else(|| {
                PlrError::Protocol(format!("frame size {height}x{width}x{CHANNELS} overflows"))
            })?;
        if expected == 0 || buffer.len() != expected {
            return Err(PlrError::Protocol(format!(
                "frame buffer has {} bytes, expected {height}x{width}x{CHANNELS} = {expected}",
                buffer.len()
            )));
        }

        Ok(Self {
            timestamp,
            width,
            height,
            mean_brightness: mean_brightness(buffer),
        })
    }
}

fn frame_dimension(value: u64, name: &str) -> PlrResult<usize> {
    usize::try_from(value)
        .map_err(|_| PlrError::Protocol(format!("frame {name} {value} does not fit in memory")))
}

/// Mean byte value of an image buffer.
pub fn mean_brightness(buffer: &[u8]) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    let total: u64 = buffer.iter().map(|&b| u64::from(b)).sum();
    total as f64 / buffer.len() as f64
}

/// Outcome of a detection run.
#[derive(Debug, Clone, PartialEq)]
pub enum LightOnset {
    /// Brightness rose by `delta` at the frame stamped `timestamp`
    Detected { timestamp: f64, delta: f64 },
    /// The wait time elapsed first
    NotDetected,
}

/// Detects a step increase in world-camera brightness.
#[derive(Debug, Clone)]
pub struct LightOnsetDetector {
    threshold: f64,
    wait_time: Option<Duration>,
    frame_topic: String,
}

impl LightOnsetDetector {
    /// Detector that runs until it sees an onset.
    ///
    /// The right threshold depends on the stimulus and the ambient lighting and
    /// usually needs some trial and error.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            wait_time: None,
            frame_topic: WORLD_FRAME_TOPIC.to_string(),
        }
    }

    /// Give up after `wait_time`. Use when the light is controlled from the same
    /// program; some light engines take ~5 s to process a request, so 6 s is safe.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn with_frame_topic(mut self, topic: impl Into<String>) -> Self {
        self.frame_topic = topic.into();
        self
    }

    pub fn from_config(light: &LightConfig, pupil: &PupilConfig) -> Self {
        Self {
            threshold: light.threshold,
            wait_time: light.wait_time(),
            frame_topic: pupil.frame_topic.clone(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn wait_time(&self) -> Option<Duration> {
        self.wait_time
    }

    pub fn frame_topic(&self) -> &str {
        &self.frame_topic
    }

    /// Watch `subscriber` until the onset, then publish `annotation` with its
    /// timestamp replaced by the detecting frame's Pupil timestamp.
    ///
    /// Messages on other topics are skipped. Giving up after the wait time is not
    /// an error: it is logged and reported as [`LightOnset::NotDetected`].
    pub fn run<S, P>(
        &self,
        subscriber: &mut Subscriber<S>,
        publisher: &mut Publisher<P>,
        annotation: &mut Annotation,
    ) -> PlrResult<LightOnset>
    where
        S: MessageSocket,
        P: MessageSocket,
    {
        info!(threshold = self.threshold, "Waiting for the light...");
        let started = Instant::now();
        let mut previous: Option<f64> = None;

        loop {
            let remaining = match self.wait_time {
                Some(wait) => match wait.checked_sub(started.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => break,
                },
                None => None,
            };

            let Some(message) = subscriber.recv_within(remaining)? else {
                if remaining.is_none() {
                    return Err(PlrError::Protocol(
                        "subscriber returned without a message".to_string(),
                    ));
                }
                continue;
            };
            if message.topic != self.frame_topic {
                continue;
            }

            let frame = WorldFrame::from_message(&message)?;
            if let Some(prev) = previous {
                let delta = frame.mean_brightness - prev;
                if delta > self.threshold {
                    info!(timestamp = frame.timestamp, delta, "Light detected at {}", frame.timestamp);
                    annotation.set_timestamp(frame.timestamp);
                    publisher.send_annotation(annotation)?;
                    return Ok(LightOnset::Detected {
                        timestamp: frame.timestamp,
                        delta,
                    });
                }
            }
            debug!(timestamp = frame.timestamp, mean = frame.mean_brightness, "World frame");
            previous = Some(frame.mean_brightness);
        }

        warn!("Failed to detect a light.");
        Ok(LightOnset::NotDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pupil::mock::ScriptedSocket;
    use crate::pupil::payload::{decode_payload, Payload};
    use tracing_test::traced_test;

    fn frame_message(timestamp: f64, level: u8) -> Message {
        let mut payload = Payload::new()
            .with("height", 2u64)
            .with("width", 2u64)
            .with("timestamp", timestamp)
            .with("format", "bgr");
        payload.set_raw_frames(vec![vec![level; 12]]);
        Message {
            topic: WORLD_FRAME_TOPIC.to_string(),
            payload,
        }
    }

    #[test]
    fn mean_brightness_of_buffer() {
        assert_eq!(mean_brightness(&[0, 10, 20, 30]), 15.0);
        assert_eq!(mean_brightness(&[]), 0.0);
    }

    #[test]
    fn world_frame_decodes_dimensions_and_timestamp() {
        let frame = WorldFrame::from_message(&frame_message(7.25, 100)).unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.timestamp, 7.25);
        assert_eq!(frame.mean_brightness, 100.0);
    }

    #[test]
    fn world_frame_rejects_wrong_buffer_size() {
        let mut message = frame_message(1.0, 0);
        message.payload.set_raw_frames(vec![vec![0; 11]]);
        assert!(matches!(
            WorldFrame::from_message(&message),
            Err(PlrError::Protocol(_))
        ));
    }

    #[test]
    fn world_frame_rejects_oversized_dimensions() {
        let mut message = frame_message(1.0, 0);
        message.payload.insert("height", u64::MAX / 2);
        message.payload.insert("width", 4u64);
        assert!(matches!(
            WorldFrame::from_message(&message),
            Err(PlrError::Protocol(_))
        ));
    }

    #[test]
    fn world_frame_requires_buffer() {
        let mut message = frame_message(1.0, 0);
        message.payload.remove(crate::pupil::RAW_DATA_KEY);
        assert!(WorldFrame::from_message(&message).is_err());
    }

    #[test]
    fn from_config_copies_settings() {
        let light = LightConfig {
            threshold: 30.0,
            wait_time_secs: Some(6.0),
        };
        let detector = LightOnsetDetector::from_config(&light, &PupilConfig::default());
        assert_eq!(detector.threshold(), 30.0);
        assert_eq!(detector.wait_time(), Some(Duration::from_secs(6)));
        assert_eq!(detector.frame_topic(), WORLD_FRAME_TOPIC);
    }

    fn push_frame(socket: &mut ScriptedSocket, timestamp: f64, level: u8) {
        let payload = Payload::new()
            .with("height", 2u64)
            .with("width", 2u64)
            .with("timestamp", timestamp)
            .with("format", "bgr");
        socket
            .push_payload(WORLD_FRAME_TOPIC, &payload, vec![vec![level; 12]])
            .unwrap();
    }

    #[test]
    #[traced_test]
    fn onset_is_annotated_with_frame_timestamp() {
        let mut socket = ScriptedSocket::new();
        push_frame(&mut socket, 1.0, 10);
        push_frame(&mut socket, 1.5, 12);
        socket
            .push_payload("pupil.0.2d", &Payload::new().with("timestamp", 1.7), vec![])
            .unwrap();
        push_frame(&mut socket, 2.5, 100);
        push_frame(&mut socket, 3.0, 200);

        let mut subscriber = Subscriber::new(socket);
        let mut publisher = Publisher::new(ScriptedSocket::new());
        let mut annotation = Annotation::new("light_on");

        let onset = LightOnsetDetector::new(15.0)
            .with_wait_time(Duration::from_secs(5))
            .run(&mut subscriber, &mut publisher, &mut annotation)
            .unwrap();

        assert_eq!(
            onset,
            LightOnset::Detected {
                timestamp: 2.5,
                delta: 88.0
            }
        );
        assert_eq!(annotation.timestamp(), Some(2.5));
        assert_eq!(subscriber.socket().pending(), 1);

        let sent = publisher.socket().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], b"annotation");
        let payload = decode_payload(&sent[0][1]).unwrap();
        assert_eq!(payload.get_f64("timestamp"), Some(2.5));
        assert_eq!(payload.get_str("label"), Some("light_on"));
        assert!(logs_contain("Light detected at 2.5"));
    }

    #[test]
    #[traced_test]
    fn steady_light_times_out_without_annotation() {
        let mut socket = ScriptedSocket::new();
        push_frame(&mut socket, 1.0, 50);
        push_frame(&mut socket, 1.5, 60);

        let mut subscriber = Subscriber::new(socket);
        let mut publisher = Publisher::new(ScriptedSocket::new());
        let mut annotation = Annotation::new("light_on");

        let onset = LightOnsetDetector::new(15.0)
            .with_wait_time(Duration::from_millis(50))
            .run(&mut subscriber, &mut publisher, &mut annotation)
            .unwrap();

        assert_eq!(onset, LightOnset::NotDetected);
        assert!(publisher.socket().sent().is_empty());
        assert!(logs_contain("Failed to detect a light."));
    }

    #[test]
    fn unbounded_wait_on_closed_stream_is_an_error() {
        let mut subscriber = Subscriber::new(ScriptedSocket::new());
        let mut publisher = Publisher::new(ScriptedSocket::new());
        let mut annotation = Annotation::new("light_on");
        let result = LightOnsetDetector::new(15.0).run(&mut subscriber, &mut publisher, &mut annotation);
        assert!(matches!(result, Err(PlrError::Protocol(_))));
    }
}
