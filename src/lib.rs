//! accelshim gives containers vendor-neutral access to hardware
//! accelerators: it probes each vendor toolchain, picks one device under
//! a cost/performance policy, grants it through the container's launch
//! spec, and re-validates the grant right before the container starts.

pub mod config;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod runtime;
pub mod utils;
