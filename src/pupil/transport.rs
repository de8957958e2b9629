//! Multi-frame socket abstraction.
//!
//! Pupil Capture speaks ZeroMQ: a REQ/REP pair for Pupil Remote and a PUB/SUB
//! backbone for data. Everything above this module only needs "send these frames"
//! and "give me the next multi-frame message", so that is all [`MessageSocket`]
//! exposes. [`ZmqSocket`] is the real implementation; tests use
//! [`crate::pupil::mock::ScriptedSocket`].

use std::time::Duration;

use tracing::debug;

use crate::error::{PlrError, PlrResult};

/// One multi-part message, frame by frame.
pub type Frames = Vec<Vec<u8>>;

/// A socket that moves whole multi-part messages.
///
/// # Contract
/// - `send_multipart` sends every frame as one logical message (SNDMORE on all
///   but the last).
/// - `recv_multipart(None)` blocks until a message arrives.
/// - `recv_multipart(Some(t))` returns `Ok(None)` if nothing arrived within `t`.
pub trait MessageSocket {
    /// Send one multi-part message.
    fn send_multipart(&mut self, frames: Frames) -> PlrResult<()>;

    /// Receive one multi-part message, optionally bounded by `timeout`.
    fn recv_multipart(&mut self, timeout: Option<Duration>) -> PlrResult<Option<Frames>>;
}

/// Decode a frame that the protocol defines as a UTF-8 string.
pub fn frame_to_string(frame: &[u8]) -> PlrResult<String> {
    String::from_utf8(frame.to_vec())
        .map_err(|e| PlrError::Protocol(format!("frame is not valid UTF-8: {e}")))
}

/// ZeroMQ-backed [`MessageSocket`].
pub struct ZmqSocket {
    context: zmq::Context,
    socket: zmq::Socket,
    endpoint: String,
}

impl ZmqSocket {
    fn connect(
        context: &zmq::Context,
        kind: zmq::SocketType,
        endpoint: &str,
    ) -> PlrResult<zmq::Socket> {
        let socket = context.socket(kind)?;
        socket.connect(endpoint)?;
        debug!(endpoint, ?kind, "Connected ZeroMQ socket");
        Ok(socket)
    }

    /// Connect a REQ socket (Pupil Remote).
    pub fn request(context: &zmq::Context, endpoint: &str) -> PlrResult<Self> {
        Ok(Self {
            context: context.clone(),
            socket: Self::connect(context, zmq::REQ, endpoint)?,
            endpoint: endpoint.to_string(),
        })
    }

    /// Connect a PUB socket to the IPC backbone's PUB port.
    pub fn publisher(context: &zmq::Context, endpoint: &str) -> PlrResult<Self> {
        Ok(Self {
            context: context.clone(),
            socket: Self::connect(context, zmq::PUB, endpoint)?,
            endpoint: endpoint.to_string(),
        })
    }

    /// Connect a SUB socket to the IPC backbone's SUB port, subscribed to `topics`.
    pub fn subscriber(context: &zmq::Context, endpoint: &str, topics: &[&str]) -> PlrResult<Self> {
        let socket = Self::connect(context, zmq::SUB, endpoint)?;
        for topic in topics {
            socket.set_subscribe(topic.as_bytes())?;
            debug!(endpoint, topic, "Subscribed");
        }
        Ok(Self {
            context: context.clone(),
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    /// The context this socket was created from.
    pub fn context(&self) -> &zmq::Context {
        &self.context
    }

    /// Endpoint this socket is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MessageSocket for ZmqSocket {
    fn send_multipart(&mut self, frames: Frames) -> PlrResult<()> {
        self.socket.send_multipart(frames, 0)?;
        Ok(())
    }

    fn recv_multipart(&mut self, timeout: Option<Duration>) -> PlrResult<Option<Frames>> {
        if let Some(timeout) = timeout {
            let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            if self.socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
                return Ok(None);
            }
        }
        Ok(Some(self.socket.recv_multipart(0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_to_string_accepts_utf8() {
        assert_eq!(frame_to_string(b"frame.world").unwrap(), "frame.world");
    }

    #[test]
    fn frame_to_string_rejects_binary() {
        assert!(matches!(
            frame_to_string(&[0xff, 0xfe]),
            Err(PlrError::Protocol(_))
        ));
    }

    #[test]
    fn request_socket_connects_without_peer() {
        // ZeroMQ connects lazily, so no Pupil Capture instance is needed here.
        let context = zmq::Context::new();
        let socket = ZmqSocket::request(&context, "tcp://127.0.0.1:50020").unwrap();
        assert_eq!(socket.endpoint(), "tcp://127.0.0.1:50020");
    }

    #[test]
    fn subscriber_times_out_without_publisher() {
        let context = zmq::Context::new();
        let mut socket =
            ZmqSocket::subscriber(&context, "tcp://127.0.0.1:59999", &["frame.world"]).unwrap();
        let received = socket
            .recv_multipart(Some(Duration::from_millis(20)))
            .unwrap();
        assert!(received.is_none());
    }
}
