//! Patchbay - signal/slot fabric for industrial control processes
//!
//! The control plane is a registry of named, typed signals and slots and
//! the wiring between them, served over a framed socket protocol. The
//! data plane carries timestamped typed values from each signal's
//! producer directly to the slots wired to it.

pub use patchbay_client as client;

pub mod config;
pub mod filter;
pub mod registry;
pub mod rpc;
pub mod storage;
pub mod transport;
pub mod utils;
