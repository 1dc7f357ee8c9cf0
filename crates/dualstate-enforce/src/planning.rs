//! The retrieve -> validate -> propose -> simulate -> gate loop.
//!
//! Each attempt is a fresh call to the [`Reasoner`] with the previous
//! attempt's diagnostics in the [`ContextBundle`]. The circuit breaker
//! decides between a plain retry, a retry with widened retrieval, and
//! giving up.

use std::sync::Arc;
use std::time::Duration;

use dualstate_core::config::GateConfig;
use dualstate_core::error::LedgerError;
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::InterfaceNode;
use dualstate_search::{Candidate, HybridRetriever, RetrievalQuery, VectorIndex};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{BreakerAction, CircuitBreaker};
use crate::error::PlanningError;
use crate::gate::{GateReport, GateSession, PassedGate, SourceTree, StaticChecker};
use crate::simulator::{ChangeSimulator, ProposedEdit, SimulationResult};
use crate::types::{codes, Diagnostic};
use crate::validator::{Annotation, ConstraintValidator};

/// Everything the reasoner sees for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub attempt: u32,
    pub snapshot_version: u64,
    pub query: RetrievalQuery,
    pub candidates: Vec<Candidate>,
    /// Current nodes of the candidates, in candidate order.
    pub interfaces: Vec<InterfaceNode>,
    pub annotations: Vec<Annotation>,
    /// Diagnostics of the previous attempt.
    pub feedback: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerProposal {
    pub edits: Vec<ProposedEdit>,
    pub confidence: f64,
}

/// The external collaborator that turns context into a proposed change.
pub trait Reasoner: Send + Sync {
    fn propose(&self, bundle: &ContextBundle) -> ReasonerProposal;
}

pub enum PlanningOutcome {
    Passed {
        pass: PassedGate,
        simulation: SimulationResult,
        report: GateReport,
        proposal: ReasonerProposal,
        attempts: u32,
    },
    GaveUp {
        diagnostics: Vec<Diagnostic>,
        attempts: u32,
    },
}

pub struct PlanningLoop {
    retriever: HybridRetriever,
    validator: ConstraintValidator,
    gate_config: GateConfig,
    source: Arc<dyn SourceTree>,
    checker: Arc<dyn StaticChecker>,
    gate_timeout: Option<Duration>,
}

impl PlanningLoop {
    pub fn new(
        retriever: HybridRetriever,
        validator: ConstraintValidator,
        gate_config: GateConfig,
        source: Arc<dyn SourceTree>,
        checker: Arc<dyn StaticChecker>,
    ) -> Self {
        Self {
            retriever,
            validator,
            gate_config,
            source,
            checker,
            gate_timeout: None,
        }
    }

    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = Some(timeout);
        self
    }

    /// Run attempts until a gate passes or the breaker gives up. At most
    /// `gate.max_attempts` attempts are made. The ledger holds the latest
    /// proposal when this returns.
    pub async fn run(
        &self,
        current: &GraphSnapshot,
        index: &VectorIndex,
        ledger: &mut ChangeLedger,
        mut query: RetrievalQuery,
        reasoner: &dyn Reasoner,
    ) -> Result<PlanningOutcome, PlanningError> {
        let mut breaker = CircuitBreaker::from_config(&self.gate_config);
        let max_attempts = self.gate_config.max_attempts.max(1);
        let mut feedback = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let bundle = self.context(current, index, &query, attempt, feedback);
            let proposal = reasoner.propose(&bundle);
            tracing::info!(
                attempt,
                edits = proposal.edits.len(),
                confidence = proposal.confidence,
                "reasoner proposal received"
            );

            ledger.clear()?;
            let diagnostics = match ChangeSimulator::record(ledger, current, &proposal.edits) {
                Ok((simulation, _)) => {
                    let mut gate = self.gate();
                    let report = gate.run(current, ledger, &simulation.red_keys()).await?;
                    if let Some(pass) = gate.take_pass() {
                        return Ok(PlanningOutcome::Passed {
                            pass,
                            simulation,
                            report,
                            proposal,
                            attempts: attempt,
                        });
                    }
                    report.diagnostics
                }
                Err(LedgerError::Unrepresentable(e)) => {
                    vec![Diagnostic::error(codes::UNREPRESENTABLE, e.to_string()).for_key(e.key().clone())]
                }
                Err(LedgerError::Store(e)) => return Err(e.into()),
            };

            let action = breaker.record_diagnostics(&diagnostics);
            if action == BreakerAction::GiveUp || attempt >= max_attempts {
                tracing::warn!(attempts = attempt, "planning gave up");
                return Ok(PlanningOutcome::GaveUp {
                    diagnostics,
                    attempts: attempt,
                });
            }
            if action == BreakerAction::WiderContext {
                let config = self.retriever.config();
                query.max_hops = Some(query.max_hops.unwrap_or(config.max_hops) + 1);
                query.k = Some(query.k.unwrap_or(config.k) * 2);
                tracing::debug!(max_hops = ?query.max_hops, k = ?query.k, "widened retrieval context");
            }
            feedback = diagnostics;
        }
    }

    fn context(
        &self,
        current: &GraphSnapshot,
        index: &VectorIndex,
        query: &RetrievalQuery,
        attempt: u32,
        feedback: Vec<Diagnostic>,
    ) -> ContextBundle {
        let candidates = self.retriever.retrieve(current, index, query);
        let annotations = self.validator.annotate_candidates(current, &candidates);
        let interfaces = candidates
            .iter()
            .filter_map(|c| current.node(&c.key).cloned())
            .collect();
        ContextBundle {
            attempt,
            snapshot_version: current.version(),
            query: query.clone(),
            candidates,
            interfaces,
            annotations,
            feedback,
        }
    }

    fn gate(&self) -> GateSession {
        let gate = GateSession::new(
            &self.gate_config,
            Arc::clone(&self.source),
            Arc::clone(&self.checker),
        );
        match self.gate_timeout {
            Some(timeout) => gate.with_timeout(timeout),
            None => gate,
        }
    }
}

#[cfg(test)]
#[path = "planning_tests.rs"]
mod tests;
