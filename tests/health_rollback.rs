use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use driftwatch::config::{DispatcherConfig, RawConfig};
use driftwatch::health::{AUTO_ROLLBACK_ACTION, ROLLBACK_COUNTER};
use driftwatch::store::{InMemoryAuditStore, InMemoryBackupStore, InMemoryMetrics};
use driftwatch::tag::SemverDiff;
use driftwatch::trigger::docker::UPDATE_ACTION;
use driftwatch::trigger::{DockerOptions, DockerTrigger, Notification, ProviderContext, TriggerDispatcher, TriggerProvider};
use driftwatch::{
    AuditStatus, BackupStore, Container, ContainerInspection, EventBus, HandlerError, HandlerOptions,
    HealthMonitorConfig, HealthStatus, InMemoryRuntime, MonitorState, UpdateKind, UpdateKindType,
};

struct World {
    runtime: Arc<InMemoryRuntime>,
    backups: Arc<InMemoryBackupStore>,
    audit: Arc<InMemoryAuditStore>,
    metrics: Arc<InMemoryMetrics>,
    ctx: ProviderContext,
}

fn world() -> World {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container(ContainerInspection {
        id: "c1".into(),
        name: "web".into(),
        image: "nginx:1.25".into(),
        running: true,
        health: HealthStatus::Healthy,
    });
    let backups = Arc::new(InMemoryBackupStore::new());
    let audit = Arc::new(InMemoryAuditStore::new());
    let metrics = Arc::new(InMemoryMetrics::new());
    let ctx = ProviderContext {
        bus: Arc::new(EventBus::new()),
        runtime: runtime.clone(),
        backups: backups.clone(),
        audit: audit.clone(),
        metrics: Some(metrics.clone()),
    };
    World {
        runtime,
        backups,
        audit,
        metrics,
        ctx,
    }
}

fn web(id: &str) -> Container {
    let mut c = Container {
        id: id.into(),
        name: "web".into(),
        update_available: true,
        update_kind: UpdateKind {
            kind: UpdateKindType::Tag,
            local_value: Some("1.25".into()),
            remote_value: Some("1.26".into()),
            semver_diff: SemverDiff::Minor,
        },
        ..Container::default()
    };
    c.image.name = "nginx".into();
    c.image.tag = "1.25".into();
    c
}

fn rollback_options() -> DockerOptions {
    DockerOptions {
        backup_count: 3,
        auto_rollback: true,
        rollback: HealthMonitorConfig {
            window: Duration::from_secs(60),
            interval: Duration::from_secs(5),
        },
    }
}

#[tokio::test(start_paused = true)]
async fn unhealthy_update_is_rolled_back_to_the_backup_image() {
    let w = world();
    // recreate assigns "<name>-<n>" ids
    w.runtime.script_health(
        "web-1",
        [Ok(HealthStatus::Starting), Ok(HealthStatus::Starting), Ok(HealthStatus::Unhealthy)],
    );
    let trigger = DockerTrigger::new("docker.local", rollback_options(), w.ctx.clone());

    trigger.trigger(&web("c1"), &Notification::default()).await.unwrap();
    let monitor = trigger.monitor("web").unwrap();
    assert_eq!(monitor.state(), MonitorState::Polling);

    assert_eq!(monitor.wait().await, MonitorState::RolledBack);
    assert_eq!(
        w.runtime.calls(),
        vec![
            "pull:nginx:1.26",
            "stop-remove:c1",
            "recreate:web=nginx:1.26",
            "inspect:web-1",
            "inspect:web-1",
            "inspect:web-1",
            "stop-remove:web-1",
            "recreate:web=nginx:1.25",
        ]
    );
    assert_eq!(w.runtime.container_by_name("web").unwrap().image, "nginx:1.25");

    let applied = w.audit.by_action(UPDATE_ACTION).unwrap();
    assert_eq!(applied.len(), 1);
    let rolled_back = w.audit.by_action(AUTO_ROLLBACK_ACTION).unwrap();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].status, AuditStatus::Success);
    assert_eq!(w.metrics.counter(ROLLBACK_COUNTER, &[("action", AUTO_ROLLBACK_ACTION)]), 1);
}

#[tokio::test(start_paused = true)]
async fn a_new_update_cancels_the_previous_monitor() {
    let w = world();
    w.runtime.set_recreate_health(HealthStatus::Starting);
    let trigger = DockerTrigger::new("docker.local", rollback_options(), w.ctx.clone());

    trigger.trigger(&web("c1"), &Notification::default()).await.unwrap();
    let first = trigger.monitor("web").unwrap();

    let mut next = web("web-1");
    next.image.tag = "1.26".into();
    next.update_kind.local_value = Some("1.26".into());
    next.update_kind.remote_value = Some("1.27".into());
    trigger.trigger(&next, &Notification::default()).await.unwrap();

    assert_eq!(first.state(), MonitorState::Cancelled);
    let second = trigger.monitor("web").unwrap();
    assert!(!second.is_stopped());
    second.cancel();
    assert_eq!(second.wait().await, MonitorState::Cancelled);

    assert_eq!(w.backups.get_backups("web-1").unwrap()[0].image_tag, "1.26");
    assert!(w.audit.by_action(AUTO_ROLLBACK_ACTION).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rollback_without_backup_is_recorded_as_failed() {
    let w = world();
    w.runtime.script_health("web-1", [Ok(HealthStatus::Unhealthy)]);
    let trigger = DockerTrigger::new(
        "docker.local",
        DockerOptions {
            backup_count: 0,
            ..rollback_options()
        },
        w.ctx.clone(),
    );

    trigger.trigger(&web("c1"), &Notification::default()).await.unwrap();
    assert!(w.backups.get_backups("c1").unwrap().is_empty());

    let monitor = trigger.monitor("web").unwrap();
    assert_eq!(monitor.wait().await, MonitorState::RollbackFailed);
    let entries = w.audit.by_action(AUTO_ROLLBACK_ACTION).unwrap();
    assert_eq!(entries[0].status, AuditStatus::Error);
    assert_eq!(w.metrics.counter(ROLLBACK_COUNTER, &[("action", AUTO_ROLLBACK_ACTION)]), 0);
    // the unhealthy container is left in place
    assert!(w.runtime.container("web-1").is_some());
}

#[tokio::test(start_paused = true)]
async fn configured_docker_trigger_monitors_after_dispatch() {
    let w = world();
    w.runtime.set_recreate_health(HealthStatus::Healthy);
    let raw = RawConfig::from_value(json!({
        "docker": {
            "local": {
                "autorollback": "true",
                "rollbackwindow": "2200",
                "rollbackinterval": "500",
            }
        }
    }))
    .unwrap();
    let dispatcher = TriggerDispatcher::from_config(DispatcherConfig::default(), &raw, &w.ctx).unwrap();

    let report = dispatcher.dispatch(&[web("c1")]).await;
    assert_eq!(report.fired(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let inspections = w.runtime.calls().iter().filter(|c| c.starts_with("inspect:")).count();
    assert_eq!(inspections, 4);
    assert!(w.audit.by_action(AUTO_ROLLBACK_ACTION).unwrap().is_empty());
    assert_eq!(w.runtime.container_by_name("web").unwrap().image, "nginx:1.26");
}

fn fail_update_applied(bus: &EventBus) {
    let _h = bus.register_container_update_applied(HandlerOptions::new(1, "notify"), |_| async {
        Err(HandlerError::new("notify down"))
    });
}

#[tokio::test(start_paused = true)]
async fn failing_applied_handler_still_starts_the_monitor() {
    let w = world();
    w.runtime.script_health("web-1", [Ok(HealthStatus::Unhealthy)]);
    fail_update_applied(&w.ctx.bus);
    let trigger = DockerTrigger::new("docker.local", rollback_options(), w.ctx.clone());

    trigger.trigger(&web("c1"), &Notification::default()).await.unwrap();
    assert_eq!(w.runtime.container_by_name("web").unwrap().image, "nginx:1.26");

    let monitor = trigger.monitor("web").unwrap();
    assert_eq!(monitor.wait().await, MonitorState::RolledBack);
    assert_eq!(w.runtime.container_by_name("web").unwrap().image, "nginx:1.25");
}

#[tokio::test(start_paused = true)]
async fn applied_handler_failure_counts_as_delivered() {
    let w = world();
    w.runtime.set_recreate_health(HealthStatus::Healthy);
    fail_update_applied(&w.ctx.bus);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let _failed = w.ctx.bus.register_container_update_failed(HandlerOptions::default(), move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event.trigger.clone());
            Ok(())
        }
    });
    let raw = RawConfig::from_value(json!({
        "docker": {
            "local": {
                "autorollback": "true",
                "rollbackwindow": "2200",
                "rollbackinterval": "500",
            }
        }
    }))
    .unwrap();
    let dispatcher = TriggerDispatcher::from_config(DispatcherConfig::default(), &raw, &w.ctx).unwrap();

    let first = dispatcher.dispatch(&[web("c1")]).await;
    assert_eq!(first.outcome("docker.local").unwrap().fired, vec!["web"]);
    assert_eq!(first.failed(), 0);

    let second = dispatcher.dispatch(&[web("c1")]).await;
    assert_eq!(second.fired(), 0);
    assert!(failures.lock().unwrap().is_empty());

    // monitor polls the recreated container until its window closes
    tokio::time::sleep(Duration::from_secs(10)).await;
    let calls = w.runtime.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("pull:")).count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "inspect:web-1").count(), 4);
}
