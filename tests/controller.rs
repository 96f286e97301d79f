// ABOUTME: End-to-end controller tests over fake collaborators.
// ABOUTME: Covers phase sequencing, rollback triggering, and exit outcomes.

mod support;

use slipway::attempt::{AttemptStatus, RolloutKind, RolloutStatus};
use slipway::config::Environment;
use slipway::deploy::{AbortFlag, DeployController, DeployError, FailureKind};
use support::{Fakes, seeded_orchestrator, test_config, version};

fn controller(fakes: &Fakes, dir: &std::path::Path, environment: Environment) -> DeployController {
    let config = test_config(dir, environment);
    DeployController::new(
        config,
        environment,
        "registry.example.com".to_string(),
        fakes.backends(),
        AbortFlag::new(),
    )
    .unwrap()
}

/// Happy path: every phase runs, the attempt succeeds, and the audit log
/// carries the full status progression.
#[tokio::test(start_paused = true)]
async fn successful_deploy_walks_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let controller = controller(&fakes, dir.path(), Environment::Staging);

    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    assert!(result.is_ok(), "deploy failed: {result:?}");
    assert_eq!(attempt.status, AttemptStatus::Succeeded);
    assert!(attempt.finished_at.is_some());

    // Both artifacts pushed with matching digests.
    assert_eq!(attempt.artifacts.len(), 2);
    assert!(attempt.artifacts.iter().all(|a| a.is_pushed()));

    // Both services rolled out to primary-stable.
    assert_eq!(attempt.rollouts.len(), 2);
    assert!(
        attempt
            .rollouts
            .iter()
            .all(|r| r.status == RolloutStatus::PrimaryStable && r.kind == RolloutKind::Forward)
    );

    // Health gate passed and the report landed at the well-known path.
    assert!(attempt.health_passed());
    let report = std::fs::read_to_string(dir.path().join("health-report.json")).unwrap();
    assert!(report.contains("\"healthy\""));

    // Infra applied exactly once, state lock not leaked.
    assert_eq!(fakes.provisioner.applies.lock().len(), 1);
    assert!(!*fakes.provisioner.locked.lock());

    // Audit log carries the status progression.
    let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
    for action in [
        "attempt.status.VALIDATING",
        "attempt.status.BUILDING",
        "attempt.status.APPLYING_INFRA",
        "attempt.status.ROLLING_OUT",
        "attempt.status.VERIFYING",
        "attempt.status.SUCCEEDED",
    ] {
        assert!(audit.contains(action), "missing audit action {action}");
    }
}

/// Predecessors are captured before any mutation and stored on the attempt.
#[tokio::test(start_paused = true)]
async fn predecessors_captured_before_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let controller = controller(&fakes, dir.path(), Environment::Staging);

    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    assert!(result.is_ok());
    assert_eq!(attempt.predecessors.len(), 2);
    assert_eq!(
        attempt.predecessors.get("api").unwrap().spec_version.as_str(),
        "api:42"
    );
    assert_eq!(
        attempt
            .predecessors
            .get("worker")
            .unwrap()
            .spec_version
            .as_str(),
        "worker:17"
    );
}

/// Scenario: the worker service never reaches its desired count. Its result
/// is TIMED_OUT, the attempt fails without running phase-5 verification, and
/// rollback reverts to the captured predecessors.
#[tokio::test(start_paused = true)]
async fn worker_timeout_fails_attempt_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = seeded_orchestrator();
    orchestrator.never_stable.lock().insert("worker".to_string());
    let fakes = Fakes::new(orchestrator);
    let controller = controller(&fakes, dir.path(), Environment::Production);

    let (attempt, result) = controller.deploy(version("v2.0.0")).await;

    let error = result.unwrap_err();
    assert!(matches!(error, DeployError::Rollout { .. }));
    assert_eq!(error.kind(), FailureKind::ConvergenceTimeout);
    assert_eq!(attempt.status, AttemptStatus::Failed);

    let worker_forward = attempt
        .rollouts
        .iter()
        .find(|r| r.service.as_str() == "worker" && r.kind == RolloutKind::Forward)
        .unwrap();
    assert_eq!(worker_forward.status, RolloutStatus::TimedOut);

    // Phase-5 verification was skipped: the only battery run is the
    // rollback's re-verification.
    assert_eq!(*fakes.api.calls.lock(), 1);

    // Each service was reverted exactly once, to the captured predecessor.
    let api_reverts: Vec<_> = fakes
        .orchestrator
        .replacements_for("api")
        .into_iter()
        .filter(|spec| spec == "api:42")
        .collect();
    let worker_reverts: Vec<_> = fakes
        .orchestrator
        .replacements_for("worker")
        .into_iter()
        .filter(|spec| spec == "worker:17")
        .collect();
    assert_eq!(api_reverts.len(), 1);
    assert_eq!(worker_reverts.len(), 1);

    // Reversion entries were appended and converged.
    assert!(
        attempt
            .rollouts
            .iter()
            .filter(|r| r.kind == RolloutKind::Reversion)
            .all(|r| r.status == RolloutStatus::PrimaryStable)
    );
}

/// Verification failure after retries triggers exactly one rollback per
/// service, and the reverted spec equals the captured predecessor.
#[tokio::test(start_paused = true)]
async fn failed_verification_rolls_back_to_predecessors() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());

    // Phase-5 verification fails all 3 attempts; the rollback re-check then
    // sees the default healthy response.
    for _ in 0..3 {
        fakes
            .api
            .push(support::FakeApiProbe::respond(500, 100));
    }

    let controller = controller(&fakes, dir.path(), Environment::Staging);
    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    let error = result.unwrap_err();
    assert!(matches!(error, DeployError::Verification { .. }));
    assert_eq!(attempt.status, AttemptStatus::Failed);

    assert_eq!(fakes.orchestrator.replacements_for("api").iter().filter(|s| *s == "api:42").count(), 1);
    assert_eq!(fakes.orchestrator.replacements_for("worker").iter().filter(|s| *s == "worker:17").count(), 1);

    // The reverted state passed its own health gate.
    assert!(attempt.health_passed());
}

/// A rollback whose re-verification also fails is terminal and surfaces the
/// distinct rollback-failed outcome with its own exit code.
#[tokio::test(start_paused = true)]
async fn rollback_that_fails_verification_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());

    // Phase-5 (3 attempts) and the rollback re-verification (3 attempts)
    // all fail.
    for _ in 0..6 {
        fakes
            .api
            .push(support::FakeApiProbe::respond(500, 100));
    }

    let controller = controller(&fakes, dir.path(), Environment::Staging);
    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    let error = result.unwrap_err();
    assert_eq!(error.kind(), FailureKind::RollbackFailed);
    assert_eq!(error.exit_code(), 2);
    assert_eq!(attempt.status, AttemptStatus::Failed);
}

/// Mutual exclusion: while one attempt holds the environment, a second
/// refuses to start and performs no side effects.
#[tokio::test(start_paused = true)]
async fn concurrent_attempt_for_same_environment_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let config = test_config(dir.path(), Environment::Staging);

    let _held = slipway::deploy::AttemptLock::acquire(&config.state_dir, Environment::Staging)
        .unwrap();

    let controller = controller(&fakes, dir.path(), Environment::Staging);
    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    let error = result.unwrap_err();
    assert!(matches!(error, DeployError::Exclusion { .. }));
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(fakes.builder.builds.lock().is_empty());
    assert!(fakes.provisioner.applies.lock().is_empty());
}

/// Environments are isolated: staging being locked does not block production.
#[tokio::test(start_paused = true)]
async fn different_environments_do_not_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let config = test_config(dir.path(), Environment::Staging);

    let _held = slipway::deploy::AttemptLock::acquire(&config.state_dir, Environment::Staging)
        .unwrap();

    let controller = controller(&fakes, dir.path(), Environment::Production);
    let (_, result) = controller.deploy(version("v1.2.3")).await;
    assert!(result.is_ok());
}

/// Standalone rollback command: reverts the most recent recorded attempt
/// using its captured predecessors.
#[tokio::test(start_paused = true)]
async fn manual_rollback_uses_recorded_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let controller = controller(&fakes, dir.path(), Environment::Staging);

    let (_, result) = controller.deploy(version("v1.2.3")).await;
    assert!(result.is_ok());

    let (attempt, result) = controller.rollback().await;
    assert!(result.is_ok(), "manual rollback failed: {result:?}");

    let attempt = attempt.unwrap();
    assert!(
        attempt
            .rollouts
            .iter()
            .any(|r| r.kind == RolloutKind::Reversion)
    );
    assert_eq!(
        fakes
            .orchestrator
            .replacements_for("api")
            .iter()
            .filter(|s| *s == "api:42")
            .count(),
        1
    );
}

/// Standalone rollback with nothing recorded is rollback-impossible.
#[tokio::test(start_paused = true)]
async fn manual_rollback_without_recorded_attempt_is_impossible() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let controller = controller(&fakes, dir.path(), Environment::Staging);

    let (attempt, result) = controller.rollback().await;
    assert!(attempt.is_none());
    assert_eq!(result.unwrap_err().kind(), FailureKind::RollbackImpossible);
}

/// An abort requested before rollout stops the attempt at the next phase
/// boundary; nothing is rolled out.
#[tokio::test(start_paused = true)]
async fn abort_before_rollout_stops_the_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());
    let config = test_config(dir.path(), Environment::Staging);

    let abort = AbortFlag::new();
    abort.trigger();

    let controller = DeployController::new(
        config,
        Environment::Staging,
        "registry.example.com".to_string(),
        fakes.backends(),
        abort,
    )
    .unwrap();

    let (attempt, result) = controller.deploy(version("v1.2.3")).await;

    assert!(matches!(result.unwrap_err(), DeployError::Aborted));
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(fakes.orchestrator.replacements.lock().is_empty());
}

/// Scenario: restoring the snapshot leaves infrastructure state with no
/// deployment-tag metadata from the aborted attempt.
#[tokio::test(start_paused = true)]
async fn snapshot_restore_removes_deployment_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(seeded_orchestrator());

    // Force verification failure so rollback (and the state restore) runs.
    for _ in 0..3 {
        fakes
            .api
            .push(support::FakeApiProbe::respond(500, 100));
    }

    let controller = controller(&fakes, dir.path(), Environment::Staging);
    let (attempt, result) = controller.deploy(version("v1.2.3")).await;
    assert!(result.is_err());

    // The apply stamped the attempt id into state; the restore removed it.
    let state = fakes.provisioner.state.lock().clone();
    assert!(!state.contains(&attempt.correlation_id.to_string()));
    assert_eq!(state, "baseline infrastructure");
    assert_eq!(fakes.provisioner.restores.lock().len(), 1);
}

/// The data restore collaborator runs only when the attempt was flagged.
#[tokio::test(start_paused = true)]
async fn data_restore_runs_only_when_flagged() {
    let dir = tempfile::tempdir().unwrap();

    // Not flagged: rollback skips the restore.
    let fakes = Fakes::new(seeded_orchestrator());
    for _ in 0..3 {
        fakes
            .api
            .push(support::FakeApiProbe::respond(500, 100));
    }
    let controller = controller(&fakes, dir.path(), Environment::Staging);
    let (_, result) = controller.deploy(version("v1.2.3")).await;
    assert!(result.is_err());
    assert!(fakes.restore.calls.lock().is_empty());

    // Flagged via config: rollback triggers it.
    let dir2 = tempfile::tempdir().unwrap();
    let fakes2 = Fakes::new(seeded_orchestrator());
    for _ in 0..3 {
        fakes2
            .api
            .push(support::FakeApiProbe::respond(500, 100));
    }
    let mut config = test_config(dir2.path(), Environment::Staging);
    config.restore_on_rollback = true;
    let controller = DeployController::new(
        config,
        Environment::Staging,
        "registry.example.com".to_string(),
        fakes2.backends(),
        AbortFlag::new(),
    )
    .unwrap();
    let (_, result) = controller.deploy(version("v1.2.3")).await;
    assert!(result.is_err());
    assert_eq!(fakes2.restore.calls.lock().as_slice(), &[Environment::Staging]);
}
