//! OpenCL module for device discovery and kernel dispatch
//!
//! This module handles interaction with the compute driver via OpenCL,
//! including platform enumeration, device selection, kernel compilation,
//! buffer allocation and data transfer.

mod discovery;
mod processor;

pub use discovery::{device_type_name, list_devices};
pub use processor::{ComputeProcessor, ProcessorConfig};

#[cfg(test)]
pub(crate) use processor::tests::open_default;
