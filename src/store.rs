//! Persistent document store interface.
//!
//! Handlers only see `Arc<dyn ProjectStore>`, injected through
//! [`crate::AppState`]. Every project operation is scoped by owner: a
//! project that exists but belongs to someone else is indistinguishable from
//! one that does not exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewProject, Project};

/// Storage for user-owned projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Cheap liveness check used by the readiness check.
    async fn ping(&self) -> AppResult<()>;

    /// Projects owned by `owner_id`, newest first.
    async fn list_projects(&self, owner_id: &str) -> AppResult<Vec<Project>>;

    async fn create_project(&self, owner_id: &str, project: NewProject) -> AppResult<Project>;

    /// `None` when the project does not exist or belongs to another owner.
    async fn get_project(&self, id: Uuid, owner_id: &str) -> AppResult<Option<Project>>;

    /// `false` when nothing owned by `owner_id` had that id.
    async fn delete_project(&self, id: Uuid, owner_id: &str) -> AppResult<bool>;

    /// Release connections. Later calls fail with `StoreError`.
    async fn close(&self);
}

/// In-process store, used for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::StoreError("store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        self.ensure_open()
    }

    async fn list_projects(&self, owner_id: &str) -> AppResult<Vec<Project>> {
        self.ensure_open()?;

        let projects = self.projects.read().await;
        let mut owned: Vec<Project> = projects
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn create_project(&self, owner_id: &str, project: NewProject) -> AppResult<Project> {
        self.ensure_open()?;

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: project.title,
            description: project.description,
            created_at: now,
            updated_at: now,
        };

        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        debug!(project_id = %project.id, owner_id, "Project created");
        Ok(project)
    }

    async fn get_project(&self, id: Uuid, owner_id: &str) -> AppResult<Option<Project>> {
        self.ensure_open()?;

        let projects = self.projects.read().await;
        Ok(projects
            .get(&id)
            .filter(|p| p.owner_id == owner_id)
            .cloned())
    }

    async fn delete_project(&self, id: Uuid, owner_id: &str) -> AppResult<bool> {
        self.ensure_open()?;

        let mut projects = self.projects.write().await;
        let owned = projects.get(&id).is_some_and(|p| p.owner_id == owner_id);
        if owned {
            projects.remove(&id);
            debug!(project_id = %id, owner_id, "Project deleted");
        }
        Ok(owned)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Memory store closed");
        }
    }
}
