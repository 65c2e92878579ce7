//! # flux-gateway
//!
//! Raw TCP gateway multiplexing three behaviours over one line-oriented
//! stream per client:
//!
//! - plain lines are relayed to the bus, and bus messages are pushed back;
//! - `UPLOAD:<name>` followed by one block stores the block in the blob store;
//! - `DOWNLOAD:<name>` writes the stored bytes back, then reports throughput.
//!
//! Failures talking to the bus or blob store never end a session; only
//! transport failures do.

pub mod command;
pub mod frame;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod writer;

pub use command::Command;
pub use frame::FrameReader;
pub use registry::{SessionInfo, SessionRegistry};
pub use server::{start, GatewayConfig, GatewayHandle};
pub use session::{download_speed, Session, SessionConfig, SessionContext, SessionEnd};
pub use writer::Outbound;
