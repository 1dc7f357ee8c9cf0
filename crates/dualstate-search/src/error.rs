/// Faults inside the vector index. Retrieval logs these and falls back to
/// graph-only results; they never reach a retrieval caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("vector has {found} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("text produced no tokens to embed")]
    EmptyEmbedding,
}
