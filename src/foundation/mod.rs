//! Value types shared by every layer: geometry, matrices, orientation and errors.

pub mod core;
pub mod error;
pub mod math;
pub mod orientation;
