// ABOUTME: Rollout controller tests: convergence polling, timeouts, and
// ABOUTME: the no-new-starts rule after a hard failure.

mod support;

use std::time::Duration;

use slipway::attempt::{RolloutKind, RolloutStatus};
use slipway::config::ServiceConfig;
use slipway::deploy::{FailureKind, RolloutController, RolloutError, RolloutTarget};
use slipway::poll::PollConfig;
use slipway::types::{ClusterId, ImageRef, ServiceName, SpecVersionId};
use support::{Fakes, seeded_orchestrator};

fn target(service: &str) -> RolloutTarget {
    RolloutTarget {
        service: ServiceConfig {
            name: ServiceName::new(service).unwrap(),
            cluster: ClusterId::new("arena-cluster"),
            container: None,
            component: None,
        },
        image: ImageRef::parse(&format!("registry.example.com/arena-{service}:v1.2.3")).unwrap(),
    }
}

fn poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_secs(10),
        deadline: Duration::from_secs(60),
    }
}

/// Every service registers a new spec, gets replaced, and converges to
/// primary-stable.
#[tokio::test(start_paused = true)]
async fn services_converge_to_primary_stable() {
    let fakes = Fakes::new(seeded_orchestrator());
    let controller = RolloutController::new(fakes.orchestrator.clone(), poll());

    let (results, outcome) = controller.run(&[target("api"), target("worker")]).await;

    assert!(outcome.is_ok());
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == RolloutStatus::PrimaryStable));
    assert!(results.iter().all(|r| r.kind == RolloutKind::Forward));

    // The previous version was resolved before replacement, and a new spec
    // version was registered rather than the old one mutated.
    let api = results.iter().find(|r| r.service.as_str() == "api").unwrap();
    assert_eq!(api.previous_version.as_ref().unwrap().as_str(), "api:42");
    assert_ne!(api.new_version.as_str(), "api:42");

    assert_eq!(fakes.orchestrator.registrations.lock().len(), 2);
    assert_eq!(fakes.orchestrator.replacements.lock().len(), 2);
}

/// A service that needs several polls converges; the elapsed wait reflects
/// the poll interval.
#[tokio::test(start_paused = true)]
async fn slow_service_converges_within_deadline() {
    let orchestrator = seeded_orchestrator();
    orchestrator.stable_after.lock().insert("api".to_string(), 4);
    let fakes = Fakes::new(orchestrator);
    let controller = RolloutController::new(fakes.orchestrator.clone(), poll());

    let (results, outcome) = controller.run(&[target("api")]).await;

    assert!(outcome.is_ok());
    assert_eq!(results[0].status, RolloutStatus::PrimaryStable);
    // Three extra polls at a 10s interval.
    assert_eq!(results[0].elapsed, Duration::from_secs(30));
}

/// A service that never stabilizes is marked TIMED_OUT and the overall
/// outcome is a convergence timeout.
#[tokio::test(start_paused = true)]
async fn never_stable_service_times_out() {
    let orchestrator = seeded_orchestrator();
    orchestrator.never_stable.lock().insert("worker".to_string());
    let fakes = Fakes::new(orchestrator);
    let controller = RolloutController::new(fakes.orchestrator.clone(), poll());

    let (results, outcome) = controller.run(&[target("api"), target("worker")]).await;

    let error = outcome.unwrap_err();
    match &error {
        RolloutError::TimedOut { services } => {
            assert_eq!(services.len(), 1);
            assert_eq!(services[0].as_str(), "worker");
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert_eq!(error.kind(), FailureKind::ConvergenceTimeout);

    // The api rollout already succeeded and is left running; its result is
    // recorded alongside the timed-out worker.
    let api = results.iter().find(|r| r.service.as_str() == "api").unwrap();
    assert_eq!(api.status, RolloutStatus::PrimaryStable);
    let worker = results.iter().find(|r| r.service.as_str() == "worker").unwrap();
    assert_eq!(worker.status, RolloutStatus::TimedOut);
}

/// Polling is idempotent: repeated status queries after convergence keep
/// reporting the same terminal outcome.
#[tokio::test(start_paused = true)]
async fn status_queries_are_idempotent() {
    let fakes = Fakes::new(seeded_orchestrator());
    let cluster = ClusterId::new("arena-cluster");
    let service = ServiceName::new("api").unwrap();
    let spec = SpecVersionId::new("api:42");

    use slipway::backends::ServiceOrchestrator;
    let first = fakes
        .orchestrator
        .deployment_status(&cluster, &service, &spec)
        .await
        .unwrap();
    assert!(first.primary_stable());

    for _ in 0..5 {
        let again = fakes
            .orchestrator
            .deployment_status(&cluster, &service, &spec)
            .await
            .unwrap();
        assert_eq!(again, first);
    }
}

/// First deployment: a service with no active deployment rolls out with no
/// previous version recorded.
#[tokio::test(start_paused = true)]
async fn first_deploy_has_no_previous_version() {
    // No seeded services at all.
    let fakes = Fakes::new(support::FakeOrchestrator::default());
    let controller = RolloutController::new(fakes.orchestrator.clone(), poll());

    let (results, outcome) = controller.run(&[target("api")]).await;

    assert!(outcome.is_ok());
    assert!(results[0].previous_version.is_none());
}
