//! Control protocol layer for the Courier broker.
//!
//! This crate provides:
//! - NDJSON frame codec with partial-input buffering
//! - Per-connection dispatcher mapping frames onto the queue engine
//! - Unix domain socket server
//! - Request/reply correlating client
//! - Optional frame recorder

mod client;
mod codec;
mod dispatcher;
mod error;
mod recorder;
mod server;

pub use client::CourierClient;
pub use codec::{encode_frame, FrameDecoder, Inbound};
pub use dispatcher::{Dispatcher, Outbound, ServerContext};
pub use error::{ClientError, ClientResult, IpcError, IpcResult};
pub use recorder::{Direction, FrameRecorder};
pub use server::{serve_connection, CourierServer};

pub use courier_protocol_types::{ControlFrame, Envelope, ErrorCode, StreamStats};
