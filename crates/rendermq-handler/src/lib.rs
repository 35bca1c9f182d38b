//! Tile-request HTTP front end: parses paths, applies style policy, queries
//! storage, runs the admission decision, and dispatches to the broker ring
//! when a render is required. Grounded throughout in
//! `original_source/tile_handler.cpp`.

pub mod admission;
pub mod date;
pub mod path;
pub mod pipeline;
pub mod reactor;
pub mod runner;
pub mod storage;
pub mod style;

pub use pipeline::{Pipeline, PipelineConfig};
