// src/engine/mod.rs

//! The quiz session engine: ordering, scoring and the session life cycle.

pub mod evaluator;
pub mod locks;
pub mod orchestrator;
pub mod sequencer;

pub use orchestrator::{EngineOptions, SessionOrchestrator};
