//! Apply & learning loop for dualstate.
//!
//! Turns a gate-passed proposal into real changes:
//! - [`apply`]: [`ApplyLoop`], which splices, writes, commits, re-ingests and clears
//! - [`lock`]: the exclusive apply section (PID lockfile)
//! - [`writer`]: working-tree writes with rollback
//! - [`vcs`]: the version-control seam and its git CLI implementation
//! - [`learning`]: accepted/rejected outcomes for the pattern knowledge base

pub mod apply;
pub mod error;
pub mod learning;
pub mod lock;
pub mod vcs;
pub mod writer;

pub use apply::{ApplyLoop, ApplyReceipt, ApplyRequest};
pub use error::{ApplyError, CommitError};
pub use learning::PatternLearner;
pub use lock::ApplyLock;
pub use vcs::{GitCli, VersionControl};
pub use writer::{FsWriter, SourceWriter};
