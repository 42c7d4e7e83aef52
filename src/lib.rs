#![deny(unsafe_code)]
#![warn(missing_docs)]

//! An IPMI v1.5 LAN client library.
//!
//! The crate implements:
//! - RMCP/ASF framing, presence ping and IPMI message checksums
//! - v1.5 session establishment (NONE, PASSWORD, MD2 and MD5 authtypes)
//! - Request tracking with retries and duplicate-response filtering
//! - One- and two-hop IPMB bridging through Send Message
//! - Serial-over-LAN data with partial-acknowledgement retransmission
//!
//! It exposes a small public API (`Client`, `ClientBuilder`, a few commands
//! and types) while keeping session and transport details internal.
//!
//! # Features
//!
//! - `blocking` (default): `Client` over a blocking UDP socket.
//! - `async`: `AsyncClient` on tokio. Its tests only build with this feature,
//!   so run the full suite with `cargo test --all-features`.
//! - `tracing` (default) and `metrics`: structured logs and counters.

mod bridge;
mod client;
pub mod commands;
mod crypto;
mod debug;
mod error;
mod observe;
mod protocol;
mod session;
mod sol;
mod tracker;
mod transport;
mod types;

pub use crate::bridge::{BridgeHop, BridgePath};
#[cfg(feature = "blocking")]
pub use crate::client::blocking::Client;
pub use crate::client::ClientBuilder;
#[cfg(feature = "async")]
pub use crate::client::tokio::AsyncClient;
pub use crate::error::{Error, Result};
pub use crate::sol::{SolControl, SolPacket, SolStatus};
#[cfg(feature = "blocking")]
pub use crate::transport::Transport;
#[cfg(feature = "async")]
pub use crate::transport::{AsyncTransport, TransportFuture};
pub use crate::types::{
    ActivatedSession, AuthType, ChannelAuthCapabilities, DeviceId, OemProfile, Pong,
    PrivilegeLevel, RawResponse, Request, Response, RetryPolicy, SessionChallenge, SessionState,
};
