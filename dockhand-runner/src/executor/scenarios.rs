//! Whole-job runs against the in-memory engine

use super::docker::{DockerExecutor, EngineFactory, Executor, ExecutorCommand};
use super::stage::ExecutorStage;
use super::variant::ExecutorVariant;
use crate::context::test_support::{job, settings};
use crate::error::{ExecutorError, FailureKind, Result};
use crate::testing::FakeEngine;
use crate::trace::BufferTrace;
use dockhand_client::ContainerEngine;
use dockhand_client::types::{EmptyObject, ImageConfig};
use dockhand_core::config::{DockerSettings, RunnerSettings};
use dockhand_core::image::ImageSpec;
use dockhand_core::job::Job;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn executor_on(
    engine: &Arc<FakeEngine>,
    job: Job,
    settings: RunnerSettings,
) -> (DockerExecutor, Arc<BufferTrace>) {
    let trace = Arc::new(BufferTrace::new());
    let shared = engine.clone();
    let connect: EngineFactory =
        Arc::new(move |_: &DockerSettings| -> Result<Arc<dyn ContainerEngine>> { Ok(shared.clone()) });
    let executor = DockerExecutor::new(ExecutorVariant::linux(), job, settings, trace.clone(), connect)
        .with_helper_search_paths(Vec::new())
        .with_drain_delay(Duration::ZERO);
    (executor, trace)
}

fn command(script: &str) -> ExecutorCommand {
    ExecutorCommand {
        stage: "build_script".to_string(),
        script: format!("{}\n", script),
        predefined: false,
    }
}

fn service(name: &str, alias: Option<&str>) -> ImageSpec {
    ImageSpec {
        name: name.to_string(),
        alias: alias.map(str::to_string),
        ..Default::default()
    }
}

fn expose(engine: &FakeEngine, image: &str, port: &str) {
    engine.set_image_config(
        image,
        ImageConfig {
            exposed_ports: Some(HashMap::from([(port.to_string(), EmptyObject {})])),
            ..Default::default()
        },
    );
}

fn job_containers(engine: &FakeEngine) -> Vec<String> {
    engine.containers_with_label("job.id", "1234")
}

#[tokio::test]
async fn test_job_with_service() {
    let engine = Arc::new(FakeEngine::new());
    expose(&engine, "postgres:14.4", "5432/tcp");
    let mut job = job();
    job.services = vec![service("postgres:14.4", Some("db"))];
    let (mut executor, trace) = executor_on(&engine, job, settings());
    let cancel = CancellationToken::new();

    executor.prepare(&cancel).await.unwrap();
    assert_eq!(engine.containers_with_label("service", "postgres").len(), 1);
    assert_eq!(engine.network_names().len(), 1);
    assert!(!engine.volume_names().is_empty());

    executor.run(&cancel, &command("echo hello")).await.unwrap();
    assert!(trace.contents().contains("hello"));

    executor.cleanup().await;
    assert_eq!(executor.stage(), ExecutorStage::Cleanup);
    assert!(job_containers(&engine).is_empty());
    assert_eq!(engine.container_count(), 0);
    assert!(engine.network_names().is_empty());
    assert!(engine.volume_names().is_empty());
    assert_eq!(engine.count_calls("close"), 1);
}

#[tokio::test]
async fn test_pull_policy_fallback() {
    let engine = Arc::new(FakeEngine::new());
    engine.add_local_image("alpine:latest");
    engine.fail_pull("alpine:latest", 502, "received unexpected HTTP status: 502 Bad Gateway");
    let mut settings = settings();
    settings.docker.pull_policy = vec!["always".to_string(), "if-not-present".to_string()];
    let (mut executor, trace) = executor_on(&engine, job(), settings);
    let cancel = CancellationToken::new();

    executor.prepare(&cancel).await.unwrap();
    executor.run(&cancel, &command("echo done")).await.unwrap();
    executor.cleanup().await;

    let output = trace.contents();
    assert!(output.contains("Failed to pull image with policy \"always\""));
    assert!(output.contains("502 Bad Gateway"));
    assert!(output.contains("Attempt #2: Trying \"if-not-present\" pull policy"));
    assert!(output.contains("done"));
}

#[tokio::test]
async fn test_disallowed_build_image() {
    let engine = Arc::new(FakeEngine::new());
    let mut job = job();
    job.image = service("ubuntu", None);
    let mut settings = settings();
    settings.docker.allowed_images = vec!["alpine".to_string()];
    let (mut executor, trace) = executor_on(&engine, job, settings);

    let err = executor.prepare(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::ScriptFailure);
    assert!(trace.contents().contains("- alpine"));
    assert_eq!(engine.count_calls_with_prefix("pull "), 0);
    assert!(engine.created_containers().is_empty());

    executor.cleanup().await;
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_unhealthy_service_does_not_fail_job() {
    let engine = Arc::new(FakeEngine::new());
    expose(&engine, "redis:7.0", "6379/tcp");
    engine.set_health_check(1, "waiting for TCP connection to 172.17.0.3 on [6379]...");
    engine.set_service_output("Ready to accept connections tcp\n");
    let mut job = job();
    job.services = vec![ImageSpec {
        command: Some(vec!["redis-server".into(), "--port".into(), "9999".into()]),
        ..service("redis:7.0", None)
    }];
    let (mut executor, trace) = executor_on(&engine, job, settings());
    let cancel = CancellationToken::new();

    executor.prepare(&cancel).await.unwrap();
    let output = trace.contents();
    assert!(output.contains("*** WARNING:"));
    assert!(output.contains("probably didn't start properly."));
    assert!(output.contains("Health check error:"));
    assert!(output.contains("Ready to accept connections tcp"));

    executor.run(&cancel, &command("echo still building")).await.unwrap();
    assert!(trace.contents().contains("still building"));
    executor.cleanup().await;
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_cancelled_step() {
    let engine = Arc::new(FakeEngine::new());
    let (mut executor, _) = executor_on(&engine, job(), settings());
    let cancel = CancellationToken::new();
    executor.prepare(&cancel).await.unwrap();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });
    let err = executor.run(&cancel, &command("sleep 300")).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Cancelled));
    assert!(engine.count_calls_with_prefix("kill ") >= 1);

    executor.cleanup().await;
    assert!(job_containers(&engine).is_empty());
}

#[tokio::test]
async fn test_duplicate_user_volume() {
    let engine = Arc::new(FakeEngine::new());
    let mut settings = settings();
    settings.docker.volumes = vec!["/cache".to_string(), "/cache".to_string()];
    let (mut executor, _) = executor_on(&engine, job(), settings);

    let err = executor.prepare(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&err, ExecutorError::VolumeAlreadyDefined(path) if path == "/cache"));
    assert_eq!(err.failure_kind(), FailureKind::ScriptFailure);

    executor.cleanup().await;
    // Only the persistent cache volume is left behind
    assert_eq!(
        engine.volume_names(),
        vec![
            "runner-abcdefghi-project-42-concurrent-0-cache-3c3f060a0374fc8bc39395164f415a70"
                .to_string()
        ]
    );
    assert!(engine.network_names().is_empty());
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_services_limit_checked_before_pulling() {
    let engine = Arc::new(FakeEngine::new());
    let mut job = job();
    job.services = vec![service("postgres:14.4", None)];
    let mut settings = settings();
    settings.docker.services_limit = Some(0);
    let (mut executor, _) = executor_on(&engine, job, settings);

    let err = executor.prepare(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::TooManyServicesRequested {
            requested: 1,
            allowed: 0
        }
    ));
    assert_eq!(engine.count_calls_with_prefix("pull "), 0);
    assert!(engine.network_names().is_empty());
    assert!(engine.created_containers().is_empty());

    executor.cleanup().await;
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_stray_container_on_job_network() {
    let engine = Arc::new(FakeEngine::new());
    let (mut executor, _) = executor_on(&engine, job(), settings());
    let cancel = CancellationToken::new();

    executor.prepare(&cancel).await.unwrap();
    let networks = engine.network_names();
    assert_eq!(networks.len(), 1);
    engine.add_stray_container_to_network(&networks[0], "stray");
    executor.run(&cancel, &command("echo hello")).await.unwrap();

    executor.cleanup().await;
    assert!(engine.network_names().is_empty());
    assert!(job_containers(&engine).is_empty());
    // Containers the job did not create are left alone
    assert_eq!(engine.container_count(), 1);
}
