//! The processing graph: node arena, edges, propagation and the processing queue.

pub mod container;
pub mod node;
pub mod pipeline;
pub mod queue;
