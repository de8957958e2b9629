//! Pupil Core client
//!
//! A thin client for Pupil Capture's network API:
//!
//! - **`remote`**: Pupil Remote request/reply commands and notifications
//! - **`pubsub`**: annotations out, data messages in, over the IPC backbone
//! - **`light`**: light-onset detection from the world camera
//! - **`payload`** / **`message`**: msgpack payloads and the message types built on them
//! - **`transport`**: the multi-frame socket seam (ZeroMQ in production)
//! - **`mock`**: in-memory sockets for tests
//!
//! # Example
//!
//! ```no_run
//! use rust_plr::pupil::{Annotation, LightOnsetDetector, Notification, PupilRemote, RemoteCommand};
//! use std::time::Duration;
//!
//! # fn main() -> rust_plr::error::PlrResult<()> {
//! let mut remote = PupilRemote::connect("127.0.0.1", 50020)?;
//! remote.notify(&Notification::start_plugin("Annotation_Capture", Default::default()))?;
//! remote.send(&RemoteCommand::StartRecording(None))?;
//!
//! let mut subscriber = remote.subscriber(&["frame.world"])?;
//! let mut publisher = remote.publisher()?;
//! let mut annotation = Annotation::new("light_on");
//! LightOnsetDetector::new(15.0)
//!     .with_wait_time(Duration::from_secs(6))
//!     .run(&mut subscriber, &mut publisher, &mut annotation)?;
//!
//! remote.send(&RemoteCommand::StopRecording)?;
//! # Ok(())
//! # }
//! ```

pub mod light;
pub mod message;
pub mod mock;
pub mod payload;
pub mod pubsub;
pub mod remote;
pub mod transport;

pub use light::{LightOnset, LightOnsetDetector, WorldFrame, WORLD_FRAME_TOPIC};
pub use message::{Annotation, Message, Notification, ANNOTATION_TOPIC};
pub use payload::{decode_payload, encode_payload, Payload, RAW_DATA_KEY};
pub use pubsub::{Publisher, Subscriber};
pub use remote::{PupilRemote, RemoteCommand, DEFAULT_REQUEST_PORT, UNKNOWN_COMMAND_REPLY};
pub use transport::{Frames, MessageSocket, ZmqSocket};
