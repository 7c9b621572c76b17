//! Job host: queue watching, job execution, retirement.

pub mod control;

pub use control::{ControlConfig, ControlPlane};
