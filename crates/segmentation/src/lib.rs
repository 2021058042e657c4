//! Segmentation engine — boolean rule-set evaluation over customer records.

pub mod engine;
pub mod rules;

pub use engine::{compute_count, matches, preview, validate, SegmentPreview};
pub use rules::{evaluate, CustomerField};
