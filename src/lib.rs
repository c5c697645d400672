//! Three-stage bounded-buffer pipeline: milk -> cheese -> burgers.

pub mod bounded_buffer;
pub mod config;
pub mod delay;
pub mod error;
pub mod id_generator;
pub mod logging;
pub mod pipeline;
pub mod sim;
pub mod stages;
pub mod types;
