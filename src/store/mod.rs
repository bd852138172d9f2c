//! Persistence for the dedup state.

pub mod processed;

pub use processed::ProcessedIds;
