//! Message bus adapters for the Flux gateway.
//!
//! - [`PandaproxyBus`]: Redpanda/Kafka through the HTTP Proxy REST v2 API
//! - [`MemoryBus`]: in-process broadcast bus for local runs and tests

pub mod memory;
pub mod pandaproxy;

pub use memory::MemoryBus;
pub use pandaproxy::{PandaproxyBus, PandaproxyConfig};
