//! Tiered memory: Recent, Daily, Archived and Static.

mod knowledge;
mod similarity;
mod tiered;

pub use knowledge::{load_knowledge_file, parse_knowledge};
pub use similarity::{cosine_similarity, normalize, weighted_combine};
pub use tiered::{MemoryStats, RolloverReport, TieredMemoryStore};
