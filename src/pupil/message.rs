//! Notifications, annotations and received messages.

use chrono::Utc;
use rmpv::Value;
use tracing::warn;

use crate::error::{PlrError, PlrResult};
use crate::pupil::payload::{decode_payload, encode_payload, Payload};
use crate::pupil::transport::{frame_to_string, Frames};

/// Topic Pupil Capture's Annotation Capture plugin listens on.
pub const ANNOTATION_TOPIC: &str = "annotation";

/// Prefix of every notification topic.
pub const NOTIFY_PREFIX: &str = "notify.";

/// A notification for Pupil Remote.
///
/// Every notification has a `subject`; the wire topic is `notify.<subject>` and the
/// whole mapping, subject included, is the payload. To find out which plugins send and
/// receive notifications, search Pupil's codebase for `notify_all(` and `on_notify(`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    payload: Payload,
}

impl Notification {
    pub fn new(subject: impl Into<String>) -> Self {
        let subject: String = subject.into();
        Self {
            payload: Payload::new().with("subject", subject),
        }
    }

    /// Wrap an existing mapping. It must carry a string `subject`.
    pub fn from_payload(payload: Payload) -> PlrResult<Self> {
        payload.require_str("subject")?;
        Ok(Self { payload })
    }

    /// `{'subject': 'start_plugin', 'name': <name>, 'args': <args>}`
    pub fn start_plugin(name: &str, args: Payload) -> Self {
        Self::new("start_plugin")
            .with("name", name)
            .with("args", args.to_value())
    }

    /// `{'subject': 'recording.should_start', 'session_name': <name>}`
    pub fn recording_should_start(session_name: &str) -> Self {
        Self::new("recording.should_start").with("session_name", session_name)
    }

    /// `{'subject': 'recording.should_stop'}`
    pub fn recording_should_stop() -> Self {
        Self::new("recording.should_stop")
    }

    /// Add a field to the notification. A non-string `subject` is ignored so the
    /// topic always names the subject.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key: String = key.into();
        let value: Value = value.into();
        if key == "subject" && !value.is_str() {
            warn!(?value, subject = self.subject(), "Ignoring non-string notification subject");
            return self;
        }
        self.payload.insert(key, value);
        self
    }

    pub fn subject(&self) -> &str {
        self.payload.get_str("subject").unwrap_or_default()
    }

    /// `notify.` followed by the subject.
    pub fn topic(&self) -> String {
        format!("{NOTIFY_PREFIX}{}", self.subject())
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Topic frame followed by the msgpack payload frame.
    pub fn to_frames(&self) -> PlrResult<Frames> {
        Ok(vec![
            self.topic().into_bytes(),
            encode_payload(&self.payload)?,
        ])
    }
}

/// An annotation (a.k.a. trigger, event marker).
///
/// Use to mark the timing of events in a Pupil Capture recording. The Annotation
/// Capture plugin must be running for Capture to record them.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    payload: Payload,
}

impl Annotation {
    /// New annotation stamped with the current wall-clock time.
    ///
    /// Pupil time and wall-clock time differ unless Pupil time was reset with `T`;
    /// use [`Annotation::set_timestamp`] to stamp with a Pupil timestamp.
    pub fn new(label: impl Into<String>) -> Self {
        let label: String = label.into();
        let now = Utc::now().timestamp_micros() as f64 / 1e6;
        Self {
            payload: Payload::new()
                .with("topic", ANNOTATION_TOPIC)
                .with("label", label)
                .with("timestamp", now),
        }
    }

    /// Add a custom field (e.g. `duration`, `color`).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key, value);
        self
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.payload.insert("timestamp", timestamp);
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.payload.get_f64("timestamp")
    }

    pub fn label(&self) -> &str {
        self.payload.get_str("label").unwrap_or_default()
    }

    /// Topic the annotation is published on (its own `topic` field).
    pub fn topic(&self) -> &str {
        self.payload.get_str("topic").unwrap_or(ANNOTATION_TOPIC)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Topic frame followed by the msgpack payload frame.
    pub fn to_frames(&self) -> PlrResult<Frames> {
        Ok(vec![
            self.topic().as_bytes().to_vec(),
            encode_payload(&self.payload)?,
        ])
    }
}

/// A message received from the IPC backbone.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic frame
    pub topic: String,
    /// Decoded payload; extra frames live under [`crate::pupil::RAW_DATA_KEY`]
    pub payload: Payload,
}

impl Message {
    /// Decode `topic, payload, raw...` frames.
    ///
    /// Extra frames are stored in arrival order under the raw-data key, which is
    /// only present when at least one extra frame arrived.
    pub fn from_frames(frames: Frames) -> PlrResult<Self> {
        let mut frames = frames.into_iter();
        let topic = frames
            .next()
            .ok_or_else(|| PlrError::Protocol("empty message".to_string()))?;
        let topic = frame_to_string(&topic)?;
        let body = frames
            .next()
            .ok_or_else(|| PlrError::Protocol(format!("message on '{topic}' has no payload")))?;
        let mut payload = decode_payload(&body)?;

        let extra: Vec<Vec<u8>> = frames.collect();
        if !extra.is_empty() {
            payload.set_raw_frames(extra);
        }

        Ok(Self { topic, payload })
    }
}
