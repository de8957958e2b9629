//! Mock Pupil Capture sockets
//!
//! Provides an in-memory [`MessageSocket`] for testing without a running Pupil Capture.
//!
//! # Available Mocks
//!
//! - `ScriptedSocket::new()` - replays queued messages, records everything sent
//! - `ScriptedSocket::pupil_remote()` - additionally answers requests the way Pupil
//!   Remote does (ports, time, version, notifications, `Unknown command.`)
//!
//! When nothing is queued, a bounded receive sleeps for its timeout and returns
//! `Ok(None)`; an unbounded receive returns `Ok(None)` immediately instead of
//! blocking forever.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::PlrResult;
use crate::pupil::message::NOTIFY_PREFIX;
use crate::pupil::payload::{encode_payload, Payload};
use crate::pupil::remote::UNKNOWN_COMMAND_REPLY;
use crate::pupil::transport::{Frames, MessageSocket};

type Responder = Box<dyn FnMut(&Frames) -> Option<Frames> + Send>;

/// In-memory socket with a queue of incoming messages.
#[derive(Default)]
pub struct ScriptedSocket {
    incoming: VecDeque<Frames>,
    sent: Vec<Frames>,
    responder: Option<Responder>,
}

impl ScriptedSocket {
    /// Socket with nothing queued and no responder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket that answers like Pupil Remote with the given backbone ports.
    pub fn pupil_remote(sub_port: &str, pub_port: &str) -> Self {
        let sub_port = sub_port.to_string();
        let pub_port = pub_port.to_string();
        let mut pupil_time = 0.0_f64;

        let responder = move |request: &Frames| -> Option<Frames> {
            let first = request.first()?;
            let cmd = String::from_utf8_lossy(first).into_owned();
            let reply = if cmd.starts_with(NOTIFY_PREFIX) && request.len() == 2 {
                "Notification received.".to_string()
            } else if cmd == "SUB_PORT" {
                sub_port.clone()
            } else if cmd == "PUB_PORT" {
                pub_port.clone()
            } else if cmd == "t" {
                pupil_time.to_string()
            } else if let Some(value) = cmd.strip_prefix("T ") {
                match value.trim().parse::<f64>() {
                    Ok(t) => {
                        pupil_time = t;
                        "Timesync successful.".to_string()
                    }
                    Err(_) => UNKNOWN_COMMAND_REPLY.to_string(),
                }
            } else if cmd == "v" {
                "3.5.1".to_string()
            } else if cmd == "R" || cmd.starts_with("R ") || ["r", "C", "c"].contains(&cmd.as_str())
            {
                "OK".to_string()
            } else {
                UNKNOWN_COMMAND_REPLY.to_string()
            };
            Some(vec![reply.into_bytes()])
        };

        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// Install a custom responder invoked for every sent message.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&Frames) -> Option<Frames> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Stop answering requests.
    pub fn clear_responder(&mut self) {
        self.responder = None;
    }

    /// Queue an incoming multi-part message.
    pub fn push_message(&mut self, frames: Frames) {
        self.incoming.push_back(frames);
    }

    /// Queue a single-frame string reply.
    pub fn push_reply(&mut self, reply: &str) {
        self.incoming.push_back(vec![reply.as_bytes().to_vec()]);
    }

    /// Queue a `topic, payload, raw...` message.
    pub fn push_payload(&mut self, topic: &str, payload: &Payload, raw: Vec<Vec<u8>>) -> PlrResult<()> {
        let mut frames = vec![topic.as_bytes().to_vec(), encode_payload(payload)?];
        frames.extend(raw);
        self.incoming.push_back(frames);
        Ok(())
    }

    /// Everything sent so far.
    pub fn sent(&self) -> &[Frames] {
        &self.sent
    }

    /// First frame of every sent message, decoded lossily.
    pub fn sent_strings(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|frames| frames.first())
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Number of queued, not yet received messages.
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }
}

impl MessageSocket for ScriptedSocket {
    fn send_multipart(&mut self, frames: Frames) -> PlrResult<()> {
        if let Some(responder) = self.responder.as_mut() {
            if let Some(reply) = responder(&frames) {
                self.incoming.push_back(reply);
            }
        }
        self.sent.push(frames);
        Ok(())
    }

    fn recv_multipart(&mut self, timeout: Option<Duration>) -> PlrResult<Option<Frames>> {
        match self.incoming.pop_front() {
            Some(frames) => Ok(Some(frames)),
            None => {
                if let Some(timeout) = timeout {
                    std::thread::sleep(timeout);
                }
                Ok(None)
            }
        }
    }
}
