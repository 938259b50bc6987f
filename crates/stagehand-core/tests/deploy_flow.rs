mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use semver::Version;
use serde_json::json;

use stagehand_core::deploy::{DriverError, Phase, PollPolicy, SegmentMetadata, StepError};
use stagehand_core::runner::{RunMode, RunOutput};
use stagehand_core::store::{Transaction, paths};
use stagehand_core::types::{DeployedContract, StateMutation};

use support::{FakeChain, FakeMultisig, FakeRunner, Fixture, session, success};

const DEPLOY_V2: &str = "2024-05-01-12-30-v2";

fn broadcast_output() -> RunOutput {
    RunOutput {
        success: true,
        transactions: vec!["0xaaa".to_string()],
        deployments: vec![DeployedContract {
            contract: "Token".to_string(),
            address: "0x0000000000000000000000000000000000000001".to_string(),
            singleton: true,
            deployed_in: None,
        }],
        mutations: vec![StateMutation {
            name: "fee".to_string(),
            prev: json!(null),
            next: json!(30),
            internal_type: None,
        }],
        ..RunOutput::default()
    }
}

fn eoa_then_script(fixture: &Fixture) {
    fixture.create_env("dev", "1.0.0");
    fixture.register(
        "v2",
        "1.0.0",
        "2.0.0",
        &[("eoa", "Deploy.s.sol"), ("script", "Configure.s.sol")],
    );
}

#[test]
fn eoa_and_script_deploy_runs_to_completion() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Broadcast => broadcast_output(),
        _ => success(),
    });
    let chain = FakeChain::default();
    chain.mine("0xaaa", true);
    let multisig = FakeMultisig::default();
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    let deploys = driver
        .run_path("dev", &["v2".to_string()])
        .expect("deploy should run");
    assert_eq!(deploys.len(), 1);
    let deploy = &deploys[0];
    assert_eq!(deploy.name, DEPLOY_V2);
    assert_eq!(deploy.phase, Phase::Complete);
    assert_eq!(deploy.segment_id, 1);
    assert!(deploy.end_timestamp.is_some());

    assert_eq!(
        runner.modes(),
        vec![RunMode::Test, RunMode::Broadcast, RunMode::Execute]
    );
    let broadcast = &runner.calls()[1];
    assert_eq!(broadcast.signer.as_deref(), Some("0xdeployer"));
    let execute = &runner.calls()[2];
    assert_eq!(execute.env["STAGEHAND_ENV"], "dev");
    assert_eq!(execute.env["STAGEHAND_DEPLOY"], DEPLOY_V2);
    assert_eq!(
        execute.env["STAGEHAND_DEPLOYED_TOKEN"],
        "0x0000000000000000000000000000000000000001"
    );

    let manifest = fixture.read(&paths::environment_manifest("dev"));
    assert_eq!(manifest["deployedVersion"], "2.0.0");
    assert_eq!(manifest["latestDeployedCommit"], "v2-commit");
    assert_eq!(
        manifest["contracts"]["static"]["Token"]["deployedIn"]["deploy"],
        DEPLOY_V2
    );
    assert_eq!(fixture.read(&paths::parameters("dev"))["fee"], 30);

    let pointer = fixture.read(&paths::deploy_manifest("dev"));
    assert!(pointer.get("inProgressDeploy").is_none());
    let lock = fixture.read(&paths::deploy_lock("dev"));
    assert!(lock.get("holder").is_none());

    let stored = fixture.read(&paths::deploy("dev", DEPLOY_V2));
    assert_eq!(stored["phase"], "complete");
    assert_eq!(stored["metadata"][0]["type"], "eoa");
    assert_eq!(stored["metadata"][0]["confirmed"], true);
    assert_eq!(stored["metadata"][1]["success"], true);
    assert!(
        fixture
            .store
            .file(&paths::segment_file(
                "dev",
                DEPLOY_V2,
                0,
                paths::evidence::CONFIRMED_TRANSACTIONS
            ))
            .is_some()
    );
}

#[test]
fn deploy_without_segments_completes_immediately() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("noop", "1.0.0", "1.0.1", &[]);

    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let deploys = fixture
        .driver(&session)
        .run_path("dev", &["noop".to_string()])
        .expect("deploy should run");
    assert_eq!(deploys[0].phase, Phase::Complete);
    assert_eq!(deploys[0].segment_id, -1);
    assert!(runner.calls().is_empty());
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "1.0.1"
    );
}

#[test]
fn missing_script_is_skipped() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);
    std::fs::remove_file(fixture.upgrades_dir().join("v2/Deploy.s.sol"))
        .expect("remove should succeed");

    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let deploys = fixture
        .driver(&session)
        .run_path("dev", &["v2".to_string()])
        .expect("deploy should run");
    assert_eq!(deploys[0].phase, Phase::Complete);
    assert_eq!(runner.modes(), vec![RunMode::Execute]);
    assert!(
        fixture
            .store
            .commit_messages()
            .iter()
            .any(|message| message.contains("skip segment 0"))
    );
}

#[test]
fn failing_tests_halt_before_signing() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Test => RunOutput {
            success: false,
            error: Some("assertion failed".to_string()),
            ..RunOutput::default()
        },
        _ => success(),
    });
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .run_path("dev", &["v2".to_string()])
        .expect_err("deploy should halt");
    let step = match err {
        DriverError::Step(step @ StepError::Halt { .. }) => step,
        other => panic!("expected a halt, got {other}"),
    };
    assert!(step.to_string().contains("assertion failed"));
    assert_eq!(
        step.resume_command().as_deref(),
        Some("stagehand deploy run --resume --env dev")
    );
    assert_eq!(runner.modes(), vec![RunMode::Test]);

    let stored = fixture.read(&paths::deploy("dev", DEPLOY_V2));
    assert_eq!(stored["phase"], "eoa_start");
    assert!(
        fixture
            .store
            .file(&paths::segment_file("dev", DEPLOY_V2, 0, paths::evidence::TEST_RUN))
            .is_some()
    );
    let lock = fixture.read(&paths::deploy_lock("dev"));
    assert!(lock.get("holder").is_none());
}

#[test]
fn runner_that_cannot_start_halts_with_a_resume_command() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);

    let broken = FakeRunner::failing("forge: command not found");
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&broken, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .run_path("dev", &["v2".to_string()])
        .expect_err("deploy should halt");
    let step = match err {
        DriverError::Step(step @ StepError::Halt { .. }) => step,
        other => panic!("expected a halt, got {other}"),
    };
    assert!(step.to_string().contains("forge: command not found"));
    assert_eq!(
        step.resume_command().as_deref(),
        Some("stagehand deploy run --resume --env dev")
    );
    let stored = fixture.read(&paths::deploy("dev", DEPLOY_V2));
    assert_eq!(stored["phase"], "eoa_start");
    let lock = fixture.read(&paths::deploy_lock("dev"));
    assert!(lock.get("holder").is_none());

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Broadcast => broadcast_output(),
        _ => success(),
    });
    chain.mine("0xaaa", true);
    let recovered = support::session(&runner, &chain, &multisig);
    let deploy = fixture
        .driver(&recovered)
        .resume("dev")
        .expect("resume should finish");
    assert_eq!(deploy.phase, Phase::Complete);
}

#[test]
fn pending_receipts_pause_and_resume_later() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Broadcast => broadcast_output(),
        _ => success(),
    });
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    let err = driver
        .run_path("dev", &["v2".to_string()])
        .expect_err("deploy should pause");
    assert!(matches!(err, DriverError::Step(StepError::Pause { .. })));
    let status = driver
        .status("dev")
        .expect("status should succeed")
        .expect("deploy should be active");
    assert_eq!(status.phase, Phase::EoaWaitConfirm);

    chain.mine("0xaaa", true);
    let deploy = driver.resume("dev").expect("resume should finish");
    assert_eq!(deploy.phase, Phase::Complete);
    assert_eq!(
        runner.modes().iter().filter(|mode| **mode == RunMode::Broadcast).count(),
        1
    );
}

#[test]
fn reverted_transaction_fails_the_deploy() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Broadcast => broadcast_output(),
        _ => success(),
    });
    let chain = FakeChain::default();
    chain.mine("0xaaa", false);
    let multisig = FakeMultisig::default();
    let session = session(&runner, &chain, &multisig);

    let deploys = fixture
        .driver(&session)
        .run_path("dev", &["v2".to_string()])
        .expect("run should return the failed deploy");
    assert_eq!(deploys[0].phase, Phase::Failed);
    assert!(deploys[0].end_timestamp.is_some());

    let manifest = fixture.read(&paths::environment_manifest("dev"));
    assert_eq!(manifest["deployedVersion"], "1.0.0");
    let pointer = fixture.read(&paths::deploy_manifest("dev"));
    assert!(pointer.get("inProgressDeploy").is_none());
}

fn multisig_fixture() -> (Fixture, FakeRunner) {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("safe", "1.0.0", "1.1.0", &[("multisig", "Upgrade.s.sol")]);
    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Propose => RunOutput {
            success: true,
            safe_address: Some("0xsafe".to_string()),
            safe_tx_hash: Some("0xproposal".to_string()),
            ..RunOutput::default()
        },
        _ => success(),
    });
    (fixture, runner)
}

#[test]
fn multisig_deploy_waits_for_approvals_and_execution() {
    let (fixture, runner) = multisig_fixture();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    let err = driver
        .run_path("dev", &["safe".to_string()])
        .expect_err("deploy should wait for signers");
    let DriverError::Step(StepError::Pause { deploy, reason }) = err else {
        panic!("expected a pause");
    };
    assert_eq!(deploy.phase, Phase::MultisigWaitSigners);
    assert!(reason.contains("0 of 0"));

    multisig.approve(2, 2);
    let err = driver.resume("dev").expect_err("deploy should wait for execution");
    assert!(matches!(
        err,
        DriverError::Step(StepError::Pause { ref deploy, .. }) if deploy.phase == Phase::MultisigExecute
    ));

    multisig.execute("0xexec");
    chain.mine("0xexec", true);
    let deploy = driver.resume("dev").expect("deploy should complete");
    assert_eq!(deploy.phase, Phase::Complete);
    match deploy.metadata[0].as_ref() {
        Some(SegmentMetadata::Multisig(meta)) => {
            assert_eq!(meta.safe_tx_hash.as_deref(), Some("0xproposal"));
            assert_eq!(meta.transaction_hash.as_deref(), Some("0xexec"));
            assert!(meta.confirmed);
        }
        other => panic!("unexpected metadata {other:?}"),
    }
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "1.1.0"
    );
    assert_eq!(runner.modes(), vec![RunMode::Test, RunMode::Propose]);
}

#[test]
fn cancelling_rejects_the_outstanding_proposal() {
    let (fixture, runner) = multisig_fixture();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    driver
        .run_path("dev", &["safe".to_string()])
        .expect_err("deploy should wait for signers");

    let deploy = driver.cancel("dev").expect("cancel should succeed");
    assert_eq!(deploy.phase, Phase::Cancelled);
    assert!(deploy.end_timestamp.is_some());
    assert_eq!(multisig.rejections(), vec!["0xproposal".to_string()]);

    let evidence = fixture.read(&paths::segment_file(
        "dev",
        &deploy.name,
        0,
        paths::evidence::MULTISIG_CANCEL,
    ));
    assert_eq!(evidence["rejection"], "0xproposal-reject");
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "1.0.0"
    );
    assert!(driver.status("dev").expect("status should succeed").is_none());
    assert!(matches!(
        driver.cancel("dev"),
        Err(DriverError::NoActiveDeploy(_))
    ));
}

#[test]
fn approvals_and_execution_are_rechecked_before_pausing() {
    let (fixture, runner) = multisig_fixture();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig).with_poll(PollPolicy {
        attempts: 3,
        delay: Duration::ZERO,
    });
    let driver = fixture.driver(&session);

    let err = driver
        .run_path("dev", &["safe".to_string()])
        .expect_err("deploy should wait for signers");
    let DriverError::Step(StepError::Pause { deploy, reason }) = err else {
        panic!("expected a pause");
    };
    assert_eq!(deploy.phase, Phase::MultisigWaitSigners);
    assert!(reason.contains("after 3 checks"), "unexpected reason {reason}");
    assert_eq!(multisig.approval_checks(), 3);
    assert_eq!(multisig.execution_checks(), 0);

    multisig.approve_after(5);
    let err = driver.resume("dev").expect_err("deploy should wait for execution");
    let DriverError::Step(StepError::Pause { deploy, .. }) = err else {
        panic!("expected a pause");
    };
    assert_eq!(deploy.phase, Phase::MultisigExecute);
    assert_eq!(multisig.approval_checks(), 5);
    assert_eq!(multisig.execution_checks(), 3);
}

#[test]
fn cancel_without_automatic_rejection_needs_force() {
    let (fixture, runner) = multisig_fixture();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    multisig.refuse_cancel();
    let session = session(&runner, &chain, &multisig);

    fixture
        .driver(&session)
        .run_path("dev", &["safe".to_string()])
        .expect_err("deploy should wait for signers");

    let err = fixture
        .driver(&session)
        .cancel("dev")
        .expect_err("cancel should halt");
    let step = match err {
        DriverError::Step(step @ StepError::Halt { .. }) => step,
        other => panic!("expected a halt, got {other}"),
    };
    assert!(step.to_string().contains("--force"));
    let active = fixture
        .driver(&session)
        .status("dev")
        .expect("status should succeed")
        .expect("deploy should still be active");
    assert_eq!(active.phase, Phase::MultisigWaitSigners);

    let mut forced = support::session(&runner, &chain, &multisig);
    forced.options.force_cancel = true;
    let deploy = fixture
        .driver(&forced)
        .cancel("dev")
        .expect("forced cancel should succeed");
    assert_eq!(deploy.phase, Phase::Cancelled);
    assert!(multisig.rejections().is_empty());

    let evidence = fixture.read(&paths::segment_file(
        "dev",
        &deploy.name,
        0,
        paths::evidence::MULTISIG_CANCEL,
    ));
    assert_eq!(evidence["proposal"], "0xproposal");
    assert!(evidence["rejection"].is_null());
    assert_eq!(
        evidence["pendingWithOperator"],
        "rejections must be proposed from the Safe app"
    );
    let pointer = fixture.read(&paths::deploy_manifest("dev"));
    assert!(pointer.get("inProgressDeploy").is_none());
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "1.0.0"
    );
}

#[test]
fn second_deploy_is_refused_while_one_is_active() {
    let (fixture, runner) = multisig_fixture();
    fixture.register("other", "1.0.0", "1.2.0", &[]);
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    driver
        .run_path("dev", &["safe".to_string()])
        .expect_err("deploy should wait for signers");
    let err = driver.start("dev", "other").expect_err("start should be refused");
    assert!(matches!(err, DriverError::AlreadyInProgress { ref active, .. } if active == "2024-05-01-12-30-safe"));
}

#[test]
fn upgrade_must_apply_to_the_deployed_version() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("v3", "^2.0.0", "3.0.0", &[]);
    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .start("dev", "v3")
        .expect_err("start should be refused");
    assert!(matches!(err, DriverError::NotApplicable { .. }));
    assert!(matches!(
        fixture.driver(&session).start("dev", "missing"),
        Err(DriverError::UnknownUpgrade(_))
    ));
}

#[test]
fn multi_hop_runs_each_upgrade_in_turn() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("a", "1.0.0", "2.0.0", &[("script", "A.s.sol")]);
    fixture.register("b", "^2.0.0", "3.0.0", &[("script", "B.s.sol")]);

    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);
    let driver = fixture.driver(&session);

    let path = driver
        .plan("dev", &Version::new(3, 0, 0))
        .expect("a path should exist");
    assert_eq!(path, vec!["a".to_string(), "b".to_string()]);

    let deploys = driver.run_path("dev", &path).expect("deploys should run");
    assert_eq!(deploys.len(), 2);
    assert!(deploys.iter().all(|deploy| deploy.phase == Phase::Complete));
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "3.0.0"
    );
    let versions: Vec<String> = runner
        .calls()
        .iter()
        .map(|call| call.env["STAGEHAND_ENV_VERSION"].clone())
        .collect();
    assert_eq!(versions, vec!["1.0.0", "2.0.0"]);
}

#[test]
fn tied_paths_are_reported_as_ambiguous() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("left", "1.0.0", "2.0.0", &[]);
    fixture.register("right", "1.0.0", "2.0.0", &[]);
    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .plan("dev", &Version::new(2, 0, 0))
        .expect_err("paths tie");
    let DriverError::AmbiguousPath { paths } = err else {
        panic!("expected ambiguity");
    };
    assert_eq!(paths.len(), 2);

    assert!(matches!(
        fixture.driver(&session).plan("dev", &Version::new(9, 0, 0)),
        Err(DriverError::NoPath { .. })
    ));
}

#[test]
fn mutation_violating_the_schema_halts_finalization() {
    let fixture = Fixture::new();
    eoa_then_script(&fixture);
    {
        let mut txn = Transaction::begin(&*fixture.store).expect("begin should succeed");
        txn.write(
            &paths::parameters_schema("dev"),
            &json!({"properties": {"fee": {"type": "string"}}}),
        )
        .expect("write should succeed");
        txn.commit("add schema").expect("commit should succeed");
    }

    let runner = FakeRunner::new(|request| match request.mode {
        RunMode::Broadcast => broadcast_output(),
        _ => success(),
    });
    let chain = FakeChain::default();
    chain.mine("0xaaa", true);
    let multisig = FakeMultisig::default();
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .run_path("dev", &["v2".to_string()])
        .expect_err("finalization should halt");
    let DriverError::Step(StepError::Halt { deploy, reason }) = err else {
        panic!("expected a halt");
    };
    assert_eq!(deploy.phase, Phase::Complete);
    assert!(reason.contains("fee"));
    assert_eq!(
        fixture.read(&paths::environment_manifest("dev"))["deployedVersion"],
        "1.0.0"
    );
}

#[test]
fn conflicting_writer_causes_the_step_to_be_redone() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("s", "1.0.0", "1.0.1", &[("script", "S.s.sol")]);

    let store = Arc::clone(&fixture.store);
    let interfere = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&interfere);
    let runner = FakeRunner::new(move |_| {
        if flag.swap(false, Ordering::SeqCst) {
            let mut txn = Transaction::begin(&*store).expect("begin should succeed");
            txn.write("notes/other.json", &json!({"by": "someone else"}))
                .expect("write should succeed");
            txn.commit("outside write").expect("commit should succeed");
        }
        success()
    });
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let deploys = fixture
        .driver(&session)
        .run_path("dev", &["s".to_string()])
        .expect("deploy should run");
    assert_eq!(deploys[0].phase, Phase::Complete);
    assert_eq!(runner.modes(), vec![RunMode::Execute, RunMode::Execute]);
}

#[test]
fn persistent_conflicts_give_up() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("s", "1.0.0", "1.0.1", &[("script", "S.s.sol")]);

    let store = Arc::clone(&fixture.store);
    let runner = FakeRunner::new(move |_| {
        let mut txn = Transaction::begin(&*store).expect("begin should succeed");
        let count: u64 = txn.read_or_default("notes/count.json").expect("read should succeed");
        txn.write("notes/count.json", &(count + 1))
            .expect("write should succeed");
        txn.commit("outside write").expect("commit should succeed");
        success()
    });
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .with_conflict_attempts(2)
        .run_path("dev", &["s".to_string()])
        .expect_err("conflicts should exhaust retries");
    assert!(matches!(
        err,
        DriverError::ConflictRetriesExhausted { attempts: 2 }
    ));
}
