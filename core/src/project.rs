use crate::state::{Project, ProjectId, ProjectSummary, DEFAULT_PROJECT_NAME};
use crate::store::{KeyValueStore, ACTIVE_PROJECT_KEY, PROJECTS_KEY};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deep copy of the project collection taken before an optimistic edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSnapshot {
    projects: Vec<Project>,
}

impl ProjectSnapshot {
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }
}

/// Owns the project list and the active-project pointer.
///
/// The collection is never empty once loaded: deleting the last project
/// synthesizes a fresh default one. Every mutation is written through to the
/// key-value store before the lock is released.
#[derive(Clone)]
pub struct ProjectStore {
    inner: Arc<RwLock<Collection>>,
    kv: Arc<dyn KeyValueStore>,
}

#[derive(Default)]
struct Collection {
    projects: Vec<Project>,
    active: Option<ProjectId>,
}

impl Collection {
    fn contains(&self, id: ProjectId) -> bool {
        self.projects.iter().any(|p| p.id == id)
    }

    fn find_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.id == id)
    }

    /// Re-establishes the non-empty and resolvable-active invariants.
    fn repair(&mut self) {
        if self.projects.is_empty() {
            let project = Project::new(DEFAULT_PROJECT_NAME);
            info!(project = %project.id, "synthesized default project");
            self.active = Some(project.id);
            self.projects.push(project);
            return;
        }
        match self.active {
            Some(id) if self.contains(id) => {}
            _ => self.active = self.projects.first().map(|p| p.id),
        }
    }
}

impl ProjectStore {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let projects = read_projects(kv.as_ref());
        let active = read_active(kv.as_ref());
        let mut collection = Collection { projects, active };
        collection.repair();
        let store = Self {
            inner: Arc::new(RwLock::new(Collection::default())),
            kv,
        };
        store.persist(&collection);
        *store.inner.write() = collection;
        store
    }

    pub fn len(&self) -> usize {
        self.inner.read().projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().projects.is_empty()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.inner.read().projects.clone()
    }

    pub fn summaries(&self) -> Vec<ProjectSummary> {
        self.inner
            .read()
            .projects
            .iter()
            .map(Project::summary)
            .collect()
    }

    pub fn project(&self, id: ProjectId) -> Option<Project> {
        self.inner
            .read()
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn active_project_id(&self) -> Option<ProjectId> {
        self.inner.read().active
    }

    pub fn active_project(&self) -> Option<Project> {
        let inner = self.inner.read();
        let id = inner.active?;
        inner.projects.iter().find(|p| p.id == id).cloned()
    }

    pub fn create_project(&self) -> ProjectId {
        let mut inner = self.inner.write();
        let name = if inner.projects.is_empty() {
            DEFAULT_PROJECT_NAME.to_string()
        } else {
            format!("Website {}", inner.projects.len() + 1)
        };
        let project = Project::new(name);
        let id = project.id;
        inner.projects.push(project);
        inner.active = Some(id);
        self.persist(&inner);
        id
    }

    /// Activates `id`. Unknown ids leave the selection unchanged.
    pub fn select_project(&self, id: ProjectId) -> bool {
        let mut inner = self.inner.write();
        if !inner.contains(id) {
            debug!(project = %id, "ignoring selection of unknown project");
            return false;
        }
        inner.active = Some(id);
        self.persist(&inner);
        true
    }

    pub fn delete_project(&self, id: ProjectId) -> bool {
        let mut inner = self.inner.write();
        let Some(position) = inner.projects.iter().position(|p| p.id == id) else {
            return false;
        };
        inner.projects.remove(position);
        if inner.active == Some(id) {
            inner.active = None;
        }
        inner.repair();
        self.persist(&inner);
        true
    }

    /// Overwrites a project's name by id. Last writer wins.
    pub fn rename_project(&self, id: ProjectId, name: impl Into<String>) -> bool {
        let name = name.into();
        self.update_project(id, move |project| project.name = name)
    }

    /// Applies `edit` to the project with `id` as it exists right now.
    ///
    /// Returns `false`, and drops the edit, when the project no longer exists.
    pub fn update_project<F>(&self, id: ProjectId, edit: F) -> bool
    where
        F: FnOnce(&mut Project),
    {
        let mut inner = self.inner.write();
        let Some(project) = inner.find_mut(id) else {
            debug!(project = %id, "dropping update for missing project");
            return false;
        };
        edit(project);
        project.touch();
        self.persist(&inner);
        true
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            projects: self.inner.read().projects.clone(),
        }
    }

    /// Replaces the whole collection with a snapshot. The active pointer is
    /// kept when it still resolves.
    pub fn restore(&self, snapshot: ProjectSnapshot) {
        let mut inner = self.inner.write();
        inner.projects = snapshot.projects;
        inner.repair();
        self.persist(&inner);
    }

    fn persist(&self, collection: &Collection) {
        match serde_json::to_string(&collection.projects) {
            Ok(serialized) => {
                if let Err(err) = self.kv.set(PROJECTS_KEY, &serialized) {
                    warn!(%err, "failed to persist projects");
                }
            }
            Err(err) => warn!(%err, "failed to serialize projects"),
        }
        let result = match collection.active {
            Some(id) => self.kv.set(ACTIVE_PROJECT_KEY, &id.to_string()),
            None => self.kv.remove(ACTIVE_PROJECT_KEY),
        };
        if let Err(err) = result {
            warn!(%err, "failed to persist active project id");
        }
    }
}

fn read_projects(kv: &dyn KeyValueStore) -> Vec<Project> {
    let raw = match kv.get(PROJECTS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(%err, "failed to read stored projects");
            return Vec::new();
        }
    };
    let projects: Vec<Project> = match serde_json::from_str(&raw) {
        Ok(projects) => projects,
        Err(err) => {
            warn!(%err, "failed to parse stored projects, starting fresh");
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    projects
        .into_iter()
        .filter(|project| seen.insert(project.id))
        .collect()
}

fn read_active(kv: &dyn KeyValueStore) -> Option<ProjectId> {
    match kv.get(ACTIVE_PROJECT_KEY) {
        Ok(raw) => raw.and_then(|value| Uuid::parse_str(value.trim()).ok()),
        Err(err) => {
            warn!(%err, "failed to read active project id");
            None
        }
    }
}
