// Library interface for the newsbrief pipeline
// This allows tests and the binary to import modules

pub mod alert;
pub mod classifier;
pub mod collector;
pub mod dedup;
pub mod delivery;
pub mod digest;
pub mod error;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod schedule;
pub mod scoring;
pub mod storage;
pub mod transport;
