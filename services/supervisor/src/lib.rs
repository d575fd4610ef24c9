//! convoy fleet supervisor library
//!
//! The supervisor manages a fleet of hosts, each running one device process
//! inside a container. It checks host and container-engine liveness,
//! (re)creates the device container and its volumes, and keeps a line-based
//! command channel open to every device.
//!
//! ## Architecture
//!
//! ```text
//! Fleet
//! └── FleetMember(name)
//!     ├── Node            (liveness, container engine session)
//!     └── DeviceSession   (command channel, reply demultiplexing)
//! ```
//!
//! Workflows fan out one future per selected member and report through a
//! [`convoy_protocol::Reporter`]. Every I/O seam lives on the
//! [`context::FleetContext`], so tests swap in the mock engine, the static
//! prober, the scripted device connector and the scripted rebooter.
//!
//! ## Modules
//!
//! - `config`: YAML and environment configuration
//! - `engine`: container engine trait, Docker HTTP client and mock
//! - `device`: device sessions and connectors
//! - `node`: per-host state and container lifecycle
//! - `fleet`: the node registry
//! - `reboot`: remote reboots over SSH
//! - `workflows`: status, reconnect, broadcast and reboot

pub mod cli;
pub mod config;
pub mod context;
pub mod device;
pub mod engine;
pub mod fleet;
pub mod node;
pub mod output;
pub mod pool;
pub mod probe;
pub mod reboot;
pub mod selector;
pub mod workflows;

pub use config::FleetConfig;
pub use context::FleetContext;
pub use fleet::Fleet;
