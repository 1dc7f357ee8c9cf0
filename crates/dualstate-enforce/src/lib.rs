//! Validation and gating for dualstate.
//!
//! - [`patterns`]: the pattern knowledge base and its rule registry
//! - [`validator`]: bound deltas and anti-pattern distances per candidate
//! - [`simulator`]: future snapshots, blast radius and RED/GREEN marking
//! - [`gate`]: the safety gate state machine over in-memory buffers
//! - [`planning`]: the reasoner retry loop, driven by [`circuit_breaker`]

pub mod circuit_breaker;
pub mod error;
pub mod gate;
pub mod patterns;
pub mod planning;
pub mod simulator;
pub mod splice;
pub mod types;
pub mod validator;

pub use error::{GateError, PatternError, PlanningError, SpliceError};
pub use gate::{
    FsSourceTree, GateReport, GateSession, GateState, Overlay, PassedGate, SourceTree,
    StaticChecker,
};
pub use patterns::PatternKnowledgeBase;
pub use simulator::{ChangeSimulator, ProposedEdit, ProposedSignature, SimulationResult};
pub use types::{Diagnostic, Marking, Severity};
