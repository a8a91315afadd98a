//! Trellis Server — Unix-socket graph server and client

pub mod client;
pub mod protocol;
pub mod server;


pub use client::{ClientError, ExplainPayload, GraphClient, QueryOutcome, DEFAULT_BATCH_SIZE};
pub use protocol::{error_codes, ProtocolError, Request, Response};
pub use server::{GraphServer, ServerConfig, ShutdownHandle};
