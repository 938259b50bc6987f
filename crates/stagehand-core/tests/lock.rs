mod support;

use chrono::TimeDelta;

use stagehand_core::deploy::{DriverError, Phase};
use stagehand_core::lock::{DeployLock, LockDecision, ReleaseOutcome};
use stagehand_core::store::MemoryStore;

use support::{FakeChain, FakeMultisig, FakeRunner, Fixture, fixed_now, session};

#[test]
fn acquire_twice_keeps_the_original_expiry() {
    let store = MemoryStore::new();
    let lock = DeployLock::new(&store, "dev").with_ttl(TimeDelta::minutes(5));

    let first = lock
        .acquire_at("d1", "alice", fixed_now())
        .expect("acquire should succeed");
    let LockDecision::Acquired { until_timestamp_ms } = first else {
        panic!("expected a fresh acquisition");
    };
    let commits = store.commit_messages().len();

    let again = lock
        .acquire_at("d1", "alice", fixed_now() + TimeDelta::minutes(1))
        .expect("acquire should succeed");
    assert_eq!(
        again,
        LockDecision::Reacquired {
            until_timestamp_ms: Some(until_timestamp_ms)
        }
    );
    assert_eq!(store.commit_messages().len(), commits);
    assert_eq!(
        lock.status().expect("status should load").until_timestamp_ms,
        Some(until_timestamp_ms)
    );
}

#[test]
fn live_lock_of_another_holder_is_respected() {
    let store = MemoryStore::new();
    let lock = DeployLock::new(&store, "dev");
    lock.acquire_at("d1", "alice", fixed_now())
        .expect("acquire should succeed");

    let decision = lock
        .acquire_at("d2", "bob", fixed_now() + TimeDelta::minutes(1))
        .expect("acquire should succeed");
    assert!(!decision.is_held());
    assert!(matches!(decision, LockDecision::HeldByOther { ref holder, .. } if holder == "alice"));

    assert_eq!(
        lock.release("d2", "bob").expect("release should succeed"),
        ReleaseOutcome::HeldByOther {
            holder: "alice".to_string()
        }
    );
    assert_eq!(
        lock.status().expect("status should load").holder.as_deref(),
        Some("alice")
    );
}

#[test]
fn expired_lock_is_taken_over() {
    let store = MemoryStore::new();
    let lock = DeployLock::new(&store, "dev").with_ttl(TimeDelta::minutes(5));
    lock.acquire_at("d1", "alice", fixed_now())
        .expect("acquire should succeed");

    let later = fixed_now() + TimeDelta::minutes(6);
    let decision = lock
        .acquire_at("d2", "bob", later)
        .expect("acquire should succeed");
    let LockDecision::TookOver {
        previous_holder,
        previous_description,
        ..
    } = decision
    else {
        panic!("expected a takeover");
    };
    assert_eq!(previous_holder, "alice");
    assert_eq!(previous_description.as_deref(), Some("d1"));

    let record = lock.status().expect("status should load");
    assert_eq!(record.holder.as_deref(), Some("bob"));
    assert_eq!(record.description.as_deref(), Some("d2"));
    assert!(!record.is_stale(later.timestamp_millis()));
}

#[test]
fn release_clears_the_record() {
    let store = MemoryStore::new();
    let lock = DeployLock::new(&store, "dev");
    assert_eq!(
        lock.release("d1", "alice").expect("release should succeed"),
        ReleaseOutcome::NotHeld
    );

    lock.acquire_at("d1", "alice", fixed_now())
        .expect("acquire should succeed");
    assert_eq!(
        lock.release("d1", "alice").expect("release should succeed"),
        ReleaseOutcome::Released
    );
    let record = lock.status().expect("status should load");
    assert!(!record.is_held());
    assert_eq!(
        store.commit_messages(),
        vec![
            "[dev] acquire deploy lock (d1)".to_string(),
            "[dev] release deploy lock (d1)".to_string(),
        ]
    );
}

#[test]
fn driver_refuses_to_step_under_a_foreign_lock() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("noop", "1.0.0", "1.0.1", &[]);
    DeployLock::new(&*fixture.store, "dev")
        .acquire_at("maintenance", "bob@example.com", fixed_now())
        .expect("acquire should succeed");

    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let err = fixture
        .driver(&session)
        .start("dev", "noop")
        .expect_err("start should be locked out");
    match err {
        DriverError::Locked {
            holder,
            description,
            ..
        } => {
            assert_eq!(holder, "bob@example.com");
            assert_eq!(description.as_deref(), Some("maintenance"));
        }
        other => panic!("expected a lock error, got {other}"),
    }
    let pointer = fixture.read(&stagehand_core::store::paths::deploy_manifest("dev"));
    assert!(pointer.get("inProgressDeploy").is_none());
}

#[test]
fn driver_takes_over_an_abandoned_lock() {
    let fixture = Fixture::new();
    fixture.create_env("dev", "1.0.0");
    fixture.register("noop", "1.0.0", "1.0.1", &[]);
    DeployLock::new(&*fixture.store, "dev")
        .acquire_at("crashed run", "bob@example.com", fixed_now() - TimeDelta::minutes(10))
        .expect("acquire should succeed");

    let runner = FakeRunner::succeeding();
    let (chain, multisig) = (FakeChain::default(), FakeMultisig::default());
    let session = session(&runner, &chain, &multisig);

    let deploys = fixture
        .driver(&session)
        .run_path("dev", &["noop".to_string()])
        .expect("deploy should run");
    assert_eq!(deploys[0].phase, Phase::Complete);
    let lock = DeployLock::new(&*fixture.store, "dev")
        .status()
        .expect("status should load");
    assert!(!lock.is_held());
}
