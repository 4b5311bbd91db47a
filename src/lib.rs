//! Filters speaker-label manifests (`utt2spk`) down to the utterances that
//! have an embedding in a vector store, ahead of PLDA backend training.

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod manifest;
pub mod plan;
pub mod sampling;
pub mod vector_index;

pub use crate::config::State;
pub use crate::error::{FilterError, Result};
pub use crate::filter::{filter_lists, FilterJob, FilterStats, VectorListFilter};
pub use crate::manifest::LinePolicy;
pub use crate::plan::FilterPlan;
pub use crate::sampling::{SamplingStrategy, SegmentDedup};
pub use crate::vector_index::VectorStoreIndex;
