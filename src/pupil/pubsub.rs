//! Publishing to and subscribing from Pupil Capture's IPC backbone.

use std::time::Duration;

use tracing::debug;

use crate::error::PlrResult;
use crate::pupil::message::{Annotation, Message};
use crate::pupil::payload::{encode_payload, Payload};
use crate::pupil::transport::MessageSocket;

/// Sends two-frame messages (topic, msgpack payload). No reply is expected.
pub struct Publisher<S: MessageSocket> {
    socket: S,
}

impl<S: MessageSocket> Publisher<S> {
    pub fn new(socket: S) -> Self {
        Self { socket }
    }

    /// Publish an arbitrary payload on `topic`.
    pub fn publish(&mut self, topic: &str, payload: &Payload) -> PlrResult<()> {
        self.socket
            .send_multipart(vec![topic.as_bytes().to_vec(), encode_payload(payload)?])
    }

    /// Publish an annotation on its own topic.
    pub fn send_annotation(&mut self, annotation: &Annotation) -> PlrResult<()> {
        self.socket.send_multipart(annotation.to_frames()?)?;
        debug!(
            label = annotation.label(),
            timestamp = annotation.timestamp(),
            "Published annotation"
        );
        Ok(())
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }
}

/// Receives `topic, payload, raw...` messages from a subscribed socket.
pub struct Subscriber<S: MessageSocket> {
    socket: S,
}

impl<S: MessageSocket> Subscriber<S> {
    pub fn new(socket: S) -> Self {
        Self { socket }
    }

    /// Block for the next message.
    ///
    /// Returns `Ok(None)` only if the transport gave up without a message (the
    /// ZeroMQ socket never does on an unbounded wait).
    pub fn recv(&mut self) -> PlrResult<Option<Message>> {
        self.recv_within(None)
    }

    /// Wait at most `timeout` (unbounded when `None`) for the next message.
    pub fn recv_within(&mut self, timeout: Option<Duration>) -> PlrResult<Option<Message>> {
        match self.socket.recv_multipart(timeout)? {
            Some(frames) => Message::from_frames(frames).map(Some),
            None => Ok(None),
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}
