//! Pupil Remote: the request/reply control channel of Pupil Capture.
//!
//! Each call sends exactly one request and blocks for exactly one reply. On
//! connection the client asks for the IPC backbone's SUB and PUB ports, which are
//! needed to build a [`Subscriber`] or [`Publisher`].

use std::fmt;

use tracing::{debug, info};

use crate::error::{PlrError, PlrResult};
use crate::pupil::message::Notification;
use crate::pupil::pubsub::{Publisher, Subscriber};
use crate::pupil::transport::{frame_to_string, MessageSocket, ZmqSocket};

/// Default Pupil Remote port.
pub const DEFAULT_REQUEST_PORT: u16 = 50020;

/// Reply Pupil Remote sends for a command it does not understand.
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command.";

/// Commands understood by Pupil Remote.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    /// `R` / `R <name>`: start recording, optionally with a session name
    StartRecording(Option<String>),
    /// `r`: stop recording
    StopRecording,
    /// `C`: start the currently selected calibration
    StartCalibration,
    /// `c`: stop the currently selected calibration
    StopCalibration,
    /// `T <t>`: reset Pupil time to the given timestamp
    SetTime(f64),
    /// `t`: current Pupil time, replied as a float string
    GetTime,
    /// `v`: Pupil Capture software version
    Version,
    /// `PUB_PORT`: port for publishing to the IPC backbone
    PubPort,
    /// `SUB_PORT`: port for subscribing to the IPC backbone
    SubPort,
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCommand::StartRecording(None) => write!(f, "R"),
            RemoteCommand::StartRecording(Some(name)) => write!(f, "R {name}"),
            RemoteCommand::StopRecording => write!(f, "r"),
            RemoteCommand::StartCalibration => write!(f, "C"),
            RemoteCommand::StopCalibration => write!(f, "c"),
            RemoteCommand::SetTime(t) => write!(f, "T {t}"),
            RemoteCommand::GetTime => write!(f, "t"),
            RemoteCommand::Version => write!(f, "v"),
            RemoteCommand::PubPort => write!(f, "PUB_PORT"),
            RemoteCommand::SubPort => write!(f, "SUB_PORT"),
        }
    }
}

/// Client for Pupil Remote.
pub struct PupilRemote<S: MessageSocket = ZmqSocket> {
    socket: S,
    address: String,
    sub_port: String,
    pub_port: String,
}

impl PupilRemote<ZmqSocket> {
    /// Connect to Pupil Remote at `tcp://address:request_port` and discover the
    /// backbone ports.
    pub fn connect(address: &str, request_port: u16) -> PlrResult<Self> {
        let context = zmq::Context::new();
        let endpoint = format!("tcp://{address}:{request_port}");
        let socket = ZmqSocket::request(&context, &endpoint)?;
        Self::with_socket(socket, address)
    }

    /// PUB socket connected to the backbone, for annotations.
    pub fn publisher(&self) -> PlrResult<Publisher<ZmqSocket>> {
        let socket = ZmqSocket::publisher(self.socket.context(), &self.pub_endpoint())?;
        Ok(Publisher::new(socket))
    }

    /// SUB socket connected to the backbone and subscribed to `topics`.
    pub fn subscriber(&self, topics: &[&str]) -> PlrResult<Subscriber<ZmqSocket>> {
        let socket = ZmqSocket::subscriber(self.socket.context(), &self.sub_endpoint(), topics)?;
        Ok(Subscriber::new(socket))
    }
}

impl<S: MessageSocket> PupilRemote<S> {
    /// Wrap a connected request socket and discover the backbone ports
    /// (`SUB_PORT` first, then `PUB_PORT`).
    pub fn with_socket(socket: S, address: &str) -> PlrResult<Self> {
        let mut remote = Self {
            socket,
            address: address.to_string(),
            sub_port: String::new(),
            pub_port: String::new(),
        };
        remote.sub_port = remote.send(&RemoteCommand::SubPort)?;
        remote.pub_port = remote.send(&RemoteCommand::PubPort)?;
        info!(
            address,
            sub_port = %remote.sub_port,
            pub_port = %remote.pub_port,
            "Connected to Pupil Remote"
        );
        Ok(remote)
    }

    /// Send a multi-frame request and read the single string reply.
    fn request(&mut self, frames: Vec<Vec<u8>>) -> PlrResult<String> {
        self.socket.send_multipart(frames)?;
        let reply = self
            .socket
            .recv_multipart(None)?
            .ok_or_else(|| PlrError::Protocol("Pupil Remote sent no reply".to_string()))?;
        let first = reply
            .first()
            .ok_or_else(|| PlrError::Protocol("Pupil Remote sent an empty reply".to_string()))?;
        frame_to_string(first)
    }

    /// Send a raw command string and return the reply verbatim.
    ///
    /// Unrecognized commands are not an error: Pupil Remote answers them with
    /// [`UNKNOWN_COMMAND_REPLY`].
    pub fn command(&mut self, cmd: &str) -> PlrResult<String> {
        let reply = self.request(vec![cmd.as_bytes().to_vec()])?;
        debug!(cmd, reply = %reply, "Pupil Remote command");
        Ok(reply)
    }

    /// Send a typed command.
    pub fn send(&mut self, cmd: &RemoteCommand) -> PlrResult<String> {
        self.command(&cmd.to_string())
    }

    /// Current Pupil time in seconds.
    pub fn pupil_time(&mut self) -> PlrResult<f64> {
        let reply = self.send(&RemoteCommand::GetTime)?;
        reply
            .trim()
            .parse::<f64>()
            .map_err(|_| PlrError::Protocol(format!("Pupil time reply '{reply}' is not a float")))
    }

    /// Send a notification; returns Pupil Remote's acknowledgement.
    pub fn notify(&mut self, notification: &Notification) -> PlrResult<String> {
        let reply = self.request(notification.to_frames()?)?;
        debug!(topic = %notification.topic(), reply = %reply, "Sent notification");
        Ok(reply)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// SUB port reported by Pupil Remote.
    pub fn sub_port(&self) -> &str {
        &self.sub_port
    }

    /// PUB port reported by Pupil Remote.
    pub fn pub_port(&self) -> &str {
        &self.pub_port
    }

    pub fn sub_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.address, self.sub_port)
    }

    pub fn pub_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.address, self.pub_port)
    }

    /// The underlying request socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }
}
