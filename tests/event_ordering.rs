use std::sync::{Arc, Mutex};
use std::time::Duration;

use driftwatch::events::UpdateApplied;
use driftwatch::{Container, ContainerReport, EventBus, EventKind, HandlerError, HandlerOptions};

fn report(name: &str) -> ContainerReport {
    ContainerReport::new(
        Container {
            id: format!("id-{name}"),
            name: name.to_string(),
            ..Container::default()
        },
        true,
    )
}

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

#[tokio::test]
async fn awaited_handlers_run_sequentially_in_order() {
    let bus = EventBus::new();
    let log: Log = Arc::default();

    // (order, id, sleep ms): a slow early handler must still finish first
    let plan = [(10, "audit", 30), (5, "store", 50), (10, "metrics", 0), (100, "", 0), (-1, "first", 10)];
    for (order, id, sleep) in plan {
        let log = Arc::clone(&log);
        let _h = bus.register_container_reports(HandlerOptions::new(order, id), move |reports| {
            let log = Arc::clone(&log);
            async move {
                push(&log, format!("start:{id}"));
                tokio::time::sleep(Duration::from_millis(sleep)).await;
                push(&log, format!("end:{id}:{}", reports.len()));
                Ok(())
            }
        });
    }

    bus.emit_container_reports(vec![report("a"), report("b")]).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start:first", "end:first:2",
            "start:store", "end:store:2",
            "start:audit", "end:audit:2",
            "start:metrics", "end:metrics:2",
            "start:", "end::2",
        ]
    );
}

#[tokio::test]
async fn equal_order_and_id_keeps_registration_order() {
    let bus = EventBus::new();
    let log: Log = Arc::default();
    for n in 0..5 {
        let log = Arc::clone(&log);
        let _h = bus.register_container_report(HandlerOptions::default(), move |_| {
            let log = Arc::clone(&log);
            async move {
                push(&log, n.to_string());
                Ok(())
            }
        });
    }
    bus.emit_container_report(report("web")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn failing_handler_aborts_the_rest_of_the_chain() {
    let bus = EventBus::new();
    let log: Log = Arc::default();
    for (order, id, fail) in [(1, "persist", false), (2, "audit", true), (3, "notify", false)] {
        let log = Arc::clone(&log);
        let _h = bus.register_container_update_applied(HandlerOptions::new(order, id), move |_| {
            let log = Arc::clone(&log);
            async move {
                push(&log, id);
                if fail {
                    return Err(HandlerError::new("audit store unavailable"));
                }
                Ok(())
            }
        });
    }

    let err = bus
        .emit_container_update_applied(UpdateApplied {
            trigger: "docker.local".into(),
            container: Container::default(),
        })
        .await
        .unwrap_err();
    assert_eq!(*log.lock().unwrap(), vec!["persist", "audit"]);
    let message = err.to_string();
    assert!(message.contains("audit"), "{message}");
    assert!(message.contains("container-update-applied"), "{message}");
}

#[tokio::test]
async fn handlers_registered_during_emission_wait_for_the_next_one() {
    let bus = Arc::new(EventBus::new());
    let log: Log = Arc::default();

    let inner_bus = Arc::clone(&bus);
    let inner_log = Arc::clone(&log);
    let _outer = bus.register_container_report(HandlerOptions::new(1, "outer"), move |_| {
        let bus = Arc::clone(&inner_bus);
        let log = Arc::clone(&inner_log);
        async move {
            push(&log, "outer");
            let late_log = Arc::clone(&log);
            let _late = bus.register_container_report(HandlerOptions::new(0, "late"), move |_| {
                let log = Arc::clone(&late_log);
                async move {
                    push(&log, "late");
                    Ok(())
                }
            });
            Ok(())
        }
    });

    bus.emit_container_report(report("web")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["outer"]);
    assert_eq!(bus.handler_count(EventKind::ContainerReport), 2);
}

#[test]
fn fire_and_forget_listeners_are_synchronous_and_registration_ordered() {
    let bus = EventBus::new();
    let log: Log = Arc::default();
    let mut handles = Vec::new();
    for n in ["one", "two", "three"] {
        let log = Arc::clone(&log);
        handles.push(bus.on_container_added(move |c| {
            push(&log, format!("{n}:{}", c.name));
            Ok(())
        }));
    }
    handles[1].unregister();

    bus.emit_container_added(&report("web").container).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["one:web", "three:web"]);
}

#[test]
fn reset_isolates_subsequent_use() {
    let bus = EventBus::new();
    let _a = bus.on_container_removed(|_| Err(HandlerError::new("stale listener")));
    assert!(bus.emit_container_removed(&Container::default()).is_err());
    bus.reset();
    assert!(bus.emit_container_removed(&Container::default()).is_ok());
}
