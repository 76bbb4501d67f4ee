//! Container runtime collaborator.
//!
//! The engine never talks to a container daemon directly. Everything it needs
//! (inspection, pulls, stop/remove, recreate) goes through
//! [`ContainerRuntime`]. [`InMemoryRuntime`] is a scriptable implementation
//! for embedded use and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::error::RuntimeError;

/// Health check status reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No health check configured.
    #[default]
    None,
    /// Health check has not produced a verdict yet.
    Starting,
    /// Passing.
    Healthy,
    /// Failing.
    Unhealthy,
}

/// What the runtime reports for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInspection {
    /// Runtime id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Image reference the container runs.
    pub image: String,
    /// Whether the container is running.
    pub running: bool,
    /// Health check status.
    pub health: HealthStatus,
}

/// Operations the engine performs on containers.
///
/// All methods are async and may fail.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspects a container.
    async fn inspect(&self, container_id: &str) -> Result<ContainerInspection, RuntimeError>;

    /// Starts a stopped container.
    async fn start(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Stops a running container.
    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Restarts a container.
    async fn restart(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Pulls an image reference.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Stops and removes a container.
    async fn stop_and_remove(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Recreates `container` from `image`, returning the new container id.
    async fn recreate(&self, container: &Container, image: &str) -> Result<String, RuntimeError>;
}

#[derive(Debug, Default)]
struct RuntimeState {
    containers: HashMap<String, ContainerInspection>,
    health_script: HashMap<String, VecDeque<Result<HealthStatus, RuntimeError>>>,
    failures: HashMap<String, RuntimeError>,
    recreate_health: HealthStatus,
    calls: Vec<String>,
    next_id: u64,
}

impl RuntimeState {
    fn record(&mut self, op: &str, target: &str) -> Result<(), RuntimeError> {
        self.calls.push(format!("{op}:{target}"));
        match self.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut ContainerInspection, RuntimeError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.to_string() })
    }
}

/// Scriptable runtime.
///
/// Health answers can be queued per container with
/// [`InMemoryRuntime::script_health`]; once the queue is empty the last
/// observed status sticks. Any operation can be made to fail with
/// [`InMemoryRuntime::fail_on`].
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<RuntimeState>,
}

impl InMemoryRuntime {
    /// An empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container.
    pub fn add_container(&self, inspection: ContainerInspection) {
        self.lock().containers.insert(inspection.id.clone(), inspection);
    }

    /// Queues health answers for `container_id`.
    pub fn script_health<I>(&self, container_id: &str, answers: I)
    where
        I: IntoIterator<Item = Result<HealthStatus, RuntimeError>>,
    {
        self.lock()
            .health_script
            .entry(container_id.to_string())
            .or_default()
            .extend(answers);
    }

    /// Makes every call of `operation` fail with `error`.
    ///
    /// Operation names: `inspect`, `start`, `stop`, `restart`, `pull`,
    /// `stop-remove`, `recreate`.
    pub fn fail_on(&self, operation: &str, error: RuntimeError) {
        self.lock().failures.insert(operation.to_string(), error);
    }

    /// Clears a failure set with [`InMemoryRuntime::fail_on`].
    pub fn clear_failure(&self, operation: &str) {
        self.lock().failures.remove(operation);
    }

    /// Health reported by containers created through `recreate`.
    pub fn set_recreate_health(&self, health: HealthStatus) {
        self.lock().recreate_health = health;
    }

    /// Every call made so far, as `operation:target`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Current view of a container.
    #[must_use]
    pub fn container(&self, id: &str) -> Option<ContainerInspection> {
        self.lock().containers.get(id).cloned()
    }

    /// Current view of a container looked up by name.
    #[must_use]
    pub fn container_by_name(&self, name: &str) -> Option<ContainerInspection> {
        self.lock()
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn inspect(&self, container_id: &str) -> Result<ContainerInspection, RuntimeError> {
        let mut state = self.lock();
        state.record("inspect", container_id)?;
        let scripted = state
            .health_script
            .get_mut(container_id)
            .and_then(VecDeque::pop_front);
        let container = state.container_mut(container_id)?;
        if let Some(answer) = scripted {
            container.health = answer?;
        }
        Ok(container.clone())
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("start", container_id)?;
        state.container_mut(container_id)?.running = true;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("stop", container_id)?;
        state.container_mut(container_id)?.running = false;
        Ok(())
    }

    async fn restart(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("restart", container_id)?;
        state.container_mut(container_id)?.running = true;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.lock().record("pull", image)
    }

    async fn stop_and_remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("stop-remove", container_id)?;
        state
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ContainerNotFound {
                id: container_id.to_string(),
            })
    }

    async fn recreate(&self, container: &Container, image: &str) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.record("recreate", &format!("{}={image}", container.name))?;
        state.next_id += 1;
        let id = format!("{}-{}", container.name, state.next_id);
        let health = state.recreate_health;
        state.containers.insert(
            id.clone(),
            ContainerInspection {
                id: id.clone(),
                name: container.name.clone(),
                image: image.to_string(),
                running: true,
                health,
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspection(id: &str) -> ContainerInspection {
        ContainerInspection {
            id: id.to_string(),
            name: "web".to_string(),
            image: "nginx:1.25".to_string(),
            running: true,
            health: HealthStatus::Starting,
        }
    }

    #[tokio::test]
    async fn scripted_health_is_consumed_then_sticks() {
        let rt = InMemoryRuntime::new();
        rt.add_container(inspection("c1"));
        rt.script_health(
            "c1",
            [
                Ok(HealthStatus::Healthy),
                Err(RuntimeError::Api {
                    operation: "inspect".into(),
                    message: "502".into(),
                }),
                Ok(HealthStatus::Unhealthy),
            ],
        );
        assert_eq!(rt.inspect("c1").await.unwrap().health, HealthStatus::Healthy);
        assert!(rt.inspect("c1").await.unwrap_err().is_transient());
        assert_eq!(rt.inspect("c1").await.unwrap().health, HealthStatus::Unhealthy);
        assert_eq!(rt.inspect("c1").await.unwrap().health, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn recreate_replaces_and_failures_are_injectable() {
        let rt = InMemoryRuntime::new();
        rt.add_container(inspection("c1"));
        let container = Container {
            id: "c1".into(),
            name: "web".into(),
            ..Container::default()
        };
        rt.stop_and_remove("c1").await.unwrap();
        let new_id = rt.recreate(&container, "nginx:1.26").await.unwrap();
        assert_eq!(rt.container(&new_id).unwrap().image, "nginx:1.26");
        assert!(rt.container("c1").is_none());

        rt.fail_on(
            "pull",
            RuntimeError::PullFailed {
                image: "nginx:2".into(),
                message: "manifest unknown".into(),
            },
        );
        assert!(rt.pull_image("nginx:2").await.is_err());
        assert_eq!(
            rt.calls(),
            vec!["stop-remove:c1", "recreate:web=nginx:1.26", "pull:nginx:2"]
        );
    }
}
