//! Integration tests
//!
//! - `fixtures`: in-memory backend
//! - `pipeline`, `facade`: orchestration behavior on that backend
//! - `e2e`: real transcodes through FFmpeg

mod e2e;
mod facade;
mod fixtures;
mod pipeline;
