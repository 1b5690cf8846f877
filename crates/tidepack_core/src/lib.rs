//! Core data model for the tidepack bundler: modules as the host build
//! exposes them, output chunks, the groups chunks load in, and the graph
//! tying all three together.
//!
//! Optimizer crates rewrite chunk membership exclusively through
//! [`chunk_graph::ChunkGraph`]; modules themselves stay read only behind the
//! [`module::Module`] trait.

pub mod chunk;
pub mod chunk_graph;
pub mod chunk_group;
pub mod hash;
pub mod module;
