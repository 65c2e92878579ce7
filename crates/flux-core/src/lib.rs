//! # flux-core
//!
//! Shared vocabulary for the Flux gateway crates:
//!
//! - **Ids**: [`ids::SessionId`], one per accepted connection
//! - **Errors**: [`errors::BusError`], [`errors::BlobError`], [`errors::FrameError`]
//! - **Ports**: [`ports::BusPort`], [`ports::BusSubscription`], [`ports::BlobPort`],
//!   the narrow boundaries the gateway uses to reach the message bus and blob store

pub mod errors;
pub mod ids;
pub mod ports;

pub use errors::{BlobError, BusError, FrameError};
pub use ids::SessionId;
pub use ports::{BlobPort, BusPort, BusSubscription};
