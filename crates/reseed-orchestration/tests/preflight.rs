//! Pre-flight validation against recording fakes

use reseed_orchestration::testing::{FakeCredentialProvider, RecordingRunner};
use reseed_orchestration::{
    ConfigMap, Mode, PreflightValidator, RunPlan, ServiceCatalog, Target, TargetResolver,
};
use std::sync::Arc;

fn config() -> reseed_config::Config {
    reseed_config::parser::parse_str(reseed_config::DEFAULT_CONFIG).unwrap()
}

fn catalog() -> ServiceCatalog {
    ServiceCatalog::from_config(&config())
}

fn target() -> Target {
    TargetResolver::from_config(&config())
        .resolve("qa", "sandbox", Mode::Remote)
        .unwrap()
}

async fn validate(
    provider: FakeCredentialProvider,
    runner: &Arc<RecordingRunner>,
) -> reseed_orchestration::PreflightReport {
    let plan = RunPlan::build(&catalog(), &[]).unwrap();
    PreflightValidator::new(Arc::new(provider), runner.clone(), config().timeouts)
        .validate(&target(), plan.services())
        .await
}

#[smol_potat::test]
async fn test_all_services_pass() {
    let runner = Arc::new(RecordingRunner::new());
    let report = validate(FakeCredentialProvider::complete(&catalog()), &runner).await;

    assert!(report.all_passed());
    assert_eq!(report.passed().len(), 6);
    assert!(report.not_found.is_empty());
    assert!(runner.mutating_calls().is_empty());
}

#[smol_potat::test]
async fn test_exactly_one_probe_against_first_schema() {
    let runner = Arc::new(RecordingRunner::new());
    validate(FakeCredentialProvider::complete(&catalog()), &runner).await;

    for service in catalog().names() {
        let probes: Vec<_> = runner
            .calls_for(service)
            .into_iter()
            .filter(|c| c.label.starts_with("probe"))
            .collect();
        assert_eq!(probes.len(), 1, "{}", service);
    }

    let probe = runner
        .calls_for("data-builder")
        .into_iter()
        .find(|c| c.label.starts_with("probe"))
        .unwrap();
    assert_eq!(probe.label, "probe data_builder");
    assert_eq!(probe.env_keys, vec!["DATABASE_URL"]);
}

#[smol_potat::test]
async fn test_not_found_is_excluded() {
    let runner = Arc::new(RecordingRunner::new());
    let provider = FakeCredentialProvider::complete(&catalog()).without("workflow-api");
    let report = validate(provider, &runner).await;

    assert_eq!(report.not_found, vec!["workflow-api"]);
    assert!(!report.results.contains_key("workflow-api"));
    assert!(report.all_passed());
    assert!(runner.calls_for("workflow-api").is_empty());
}

#[smol_potat::test]
async fn test_missing_keys_fail_validation() {
    let runner = Arc::new(RecordingRunner::new());
    let provider = FakeCredentialProvider::complete(&catalog()).with_secret(
        "workflow-api",
        ConfigMap::from([(
            "DATABASE_URL".to_string(),
            "postgresql://wf:pw@db/workflow".to_string(),
        )]),
    );
    let report = validate(provider, &runner).await;

    let result = &report.results["workflow-api"];
    assert!(!result.passed);
    assert_eq!(result.reasons, vec!["missing configuration keys: REDIS_URL"]);
    assert_eq!(report.failed().len(), 1);
}

#[smol_potat::test]
async fn test_probe_and_tool_failures_are_reported() {
    let runner = Arc::new(
        RecordingRunner::new()
            .fail_on("auth-api", "alembic --version", 127, "sh: 1: alembic: not found")
            .fail_on("core-api", "SELECT 1", 1, "Error: P1001: Can't reach database server"),
    );
    let report = validate(FakeCredentialProvider::complete(&catalog()), &runner).await;

    let auth = &report.results["auth-api"];
    assert!(!auth.passed);
    assert!(auth.reasons[0].starts_with("alembic not available"));

    let core = &report.results["core-api"];
    assert_eq!(core.reasons.len(), 1);
    assert!(core.reasons[0].contains("schema 'core'"));
    assert!(core.reasons[0].contains("datastore unreachable"));
}

#[smol_potat::test]
async fn test_unavailable_and_provider_errors() {
    let runner = Arc::new(RecordingRunner::new().with_unlocatable("notification-api"));
    let provider = FakeCredentialProvider::complete(&catalog())
        .with_error("auth-api", "ThrottlingException");
    let report = validate(provider, &runner).await;

    assert_eq!(report.unavailable, vec!["notification-api"]);
    assert!(!report.results["notification-api"].passed);
    assert_eq!(report.provider_errors.len(), 1);
    assert!(report.provider_errors[0].contains("ThrottlingException"));
    assert!(!report.results["auth-api"].passed);
}

#[smol_potat::test]
async fn test_datastores_are_redacted() {
    let runner = Arc::new(RecordingRunner::new());
    let report = validate(FakeCredentialProvider::complete(&catalog()), &runner).await;

    // data-builder contributes its own schema and the shared one
    assert_eq!(report.datastores.len(), 7);
    assert!(report.datastores.iter().all(|d| !d.location.contains("pw-")));

    let shared = report
        .datastores
        .iter()
        .find(|d| d.service == "data-builder" && d.schema == "core")
        .unwrap();
    assert_eq!(shared.shared_from.as_deref(), Some("core-api"));
    assert_eq!(shared.location, "postgres://***@db.internal:5432/core");
}
