// Ingest -> retrieve -> plan with retries -> gate -> apply -> re-ingest.
use std::process::Command;
use std::sync::{Arc, Mutex};

use dualstate_apply::{ApplyLoop, ApplyRequest, FsWriter, PatternLearner};
use dualstate_core::config::DualStateConfig;
use dualstate_core::store::OutcomeStore;
use dualstate_enforce::planning::{
    ContextBundle, PlanningLoop, PlanningOutcome, Reasoner, ReasonerProposal,
};
use dualstate_enforce::validator::ConstraintValidator;
use dualstate_enforce::{FsSourceTree, PatternKnowledgeBase, ProposedEdit, ProposedSignature};
use dualstate_search::{HashingEmbedder, HybridRetriever, RetrievalQuery, VectorIndex};

use super::common::{
    create_project, init_tracing, in_memory_store, ingest_project, key, new_ledger, FnLineSource, MarkerChecker,
    RecordingVcs,
};

const LIB: &str = "fn run() { load(1); }\nfn load(id: u32) { parse(); }\nfn parse() {}\n";
const CONFIG: &str = r#"{ "apply": { "commit_prefix": "[auto]" }, "gate": { "max_attempts": 4 } }"#;

/// First proposal fails the checker, the second is clean.
struct TwoStepReasoner {
    bundles: Mutex<Vec<ContextBundle>>,
}

impl Reasoner for TwoStepReasoner {
    fn propose(&self, bundle: &ContextBundle) -> ReasonerProposal {
        self.bundles.lock().unwrap().push(bundle.clone());
        let body = if bundle.feedback.is_empty() { "BROKEN" } else { "parse();" };
        ReasonerProposal {
            edits: vec![ProposedEdit::edit(
                key("src/lib.rs", "load"),
                format!("fn load(id: u64) {{ {body} }}"),
            )
            .with_signature(ProposedSignature::new("fn load(id: u64)"))],
            confidence: 0.8,
        }
    }
}

#[tokio::test]
async fn test_plan_gate_apply_end_to_end() {
    init_tracing();
    let (_dir, root) = create_project(&[("src/lib.rs", LIB), (".dualstate/dualstate.json", CONFIG)]);
    let config = DualStateConfig::load_for_root(&root);
    assert_eq!(config.apply.commit_prefix, "[auto]");

    let graph = ingest_project(&root);
    let current = graph.current();
    let embedder = Arc::new(HashingEmbedder::new(config.vector.dimensions));
    let index = VectorIndex::build(&current, embedder.as_ref());
    let kb = Arc::new(PatternKnowledgeBase::load(&config.patterns).unwrap());

    let planner = PlanningLoop::new(
        HybridRetriever::new(config.retrieval.clone(), embedder).with_affinity(kb.clone()),
        ConstraintValidator::new(kb.clone()),
        config.gate.clone(),
        Arc::new(FsSourceTree::new(&root)),
        Arc::new(MarkerChecker { marker: "BROKEN" }),
    );
    let mut ledger = new_ledger();
    let reasoner = TwoStepReasoner {
        bundles: Mutex::new(Vec::new()),
    };
    let query = RetrievalQuery::from_seeds(vec![key("src/lib.rs", "load")]);
    let outcome = planner
        .run(&current, &index, &mut ledger, query, &reasoner)
        .await
        .unwrap();

    let PlanningOutcome::Passed {
        pass,
        simulation,
        attempts,
        ..
    } = outcome
    else {
        panic!("expected the retry to pass");
    };
    assert_eq!(attempts, 2);
    assert!(simulation.is_red(&key("src/lib.rs", "run")));
    assert!(!simulation.is_red(&key("src/lib.rs", "parse")));

    let bundles = reasoner.bundles.lock().unwrap();
    let retrieved: Vec<&str> = bundles[0].candidates.iter().map(|c| c.key.name.as_str()).collect();
    assert!(retrieved.contains(&"run") && retrieved.contains(&"parse"));
    assert!(bundles[1].feedback.iter().any(|d| d.message.contains("BROKEN")));
    drop(bundles);

    let vcs = RecordingVcs::default();
    let mut apply = ApplyLoop::new(
        &root,
        config.apply.clone(),
        Box::new(FsWriter::new(&root)),
        Box::new(vcs.clone()),
        Arc::new(FnLineSource),
    )
    .with_learner(PatternLearner::new(kb, Box::new(in_memory_store())));

    let receipt = apply
        .apply(&ApplyRequest::approve("plan-1"), pass, &graph, &mut ledger)
        .unwrap();

    assert_eq!(
        vcs.commits.lock().unwrap()[0].1,
        "[auto] apply proposal plan-1 (1 interfaces)"
    );
    assert_eq!(receipt.files, vec!["src/lib.rs"]);
    assert_eq!(
        std::fs::read_to_string(root.join("src/lib.rs")).unwrap(),
        "fn run() { load(1); }\nfn load(id: u64) { parse(); }\nfn parse() {}\n"
    );

    let after = graph.current();
    assert_eq!(after.version(), current.version() + 1);
    assert_eq!(after.node(&key("src/lib.rs", "load")).unwrap().signature, "fn load(id: u64)");
    assert_eq!(after.callees(&key("src/lib.rs", "load")), vec![&key("src/lib.rs", "parse")]);
    assert!(ledger.rows().unwrap().is_empty());

    let learner = apply.learner().unwrap();
    for id in &receipt.patterns {
        assert_eq!(learner.outcomes().outcome(id).unwrap().accepted, 1);
    }
}

#[tokio::test]
async fn test_apply_commits_through_git() {
    if Command::new("git").arg("--version").output().is_err() {
        return;
    }
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    for args in [
        vec!["init", "-q"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
        vec!["config", "commit.gpgsign", "false"],
    ] {
        assert!(Command::new("git").args(&args).current_dir(&root).status().unwrap().success());
    }

    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    let edits = vec![ProposedEdit::edit(key("src/lib.rs", "parse"), "fn parse() { run(); }")];
    let (simulation, _) =
        dualstate_enforce::ChangeSimulator::record(&mut ledger, &current, &edits).unwrap();
    let mut gate = dualstate_enforce::GateSession::new(
        &Default::default(),
        Arc::new(FsSourceTree::new(&root)),
        Arc::new(MarkerChecker { marker: "BROKEN" }),
    );
    gate.run(&current, &mut ledger, &simulation.red_keys()).await.unwrap();
    let pass = gate.take_pass().unwrap();

    let mut apply = ApplyLoop::for_root(&root, Default::default(), Arc::new(FnLineSource));
    let receipt = apply
        .apply(&ApplyRequest::approve("git-1"), pass, &graph, &mut ledger)
        .unwrap();

    let head = Command::new("git")
        .args(["log", "-1", "--format=%H %s"])
        .current_dir(&root)
        .output()
        .unwrap();
    let head = String::from_utf8_lossy(&head.stdout).trim().to_string();
    assert_eq!(
        head,
        format!("{} dualstate: apply proposal git-1 (1 interfaces)", receipt.commit_id)
    );
    // The new call edge is in the re-ingested graph.
    assert_eq!(graph.current().callees(&key("src/lib.rs", "parse")), vec![&key("src/lib.rs", "run")]);
}
