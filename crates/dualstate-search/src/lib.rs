//! Retrieval for dualstate: a vector similarity index over interface text
//! and the hybrid engine that merges it with exact graph traversal.

pub mod embed;
pub mod error;
pub mod retrieval;
pub mod vector;

pub use embed::{Embedder, HashingEmbedder};
pub use error::SearchError;
pub use retrieval::{Candidate, CandidateScores, HybridRetriever, PatternAffinity, RetrievalQuery};
pub use vector::VectorIndex;
