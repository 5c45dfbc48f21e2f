//! Streaming network-telemetry collector for router fleets.
//!
//! Two ingestion engines (gNMI streaming RPC and NETCONF session XML-RPC)
//! push canonical measurements into a shared accumulator; batches drain
//! through an ordered chain of processors before reaching the output writer.

pub mod accumulator;
pub mod agent;
pub mod config;
pub mod export;
pub mod gnmi;
pub mod measure;
pub mod netconf;
pub mod path;
pub mod process;
