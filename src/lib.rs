//! Duplicate image detection: exact copies by content hash, scaled copies by
//! perceptual hashes and average colour, and the filesystem side of culling
//! them (moves, renames, history, undo).

pub mod config;
pub mod cull;
pub mod engine;
pub mod extract;
pub mod history;
pub mod review;
pub mod scan;

pub use config::Config;
pub use engine::{Decision, Engine, EngineOutput, ImageFeatures, MatchParams};
