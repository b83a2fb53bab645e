//! Workflow Definition Store
//!
//! Persists workflow definitions, execution records, schedules and user
//! templates as pretty-printed JSON under a root directory (`.mage` by
//! default):
//!
//! ```text
//! .mage/
//!   workflows/<name>.json       definitions (.yaml/.yml also read)
//!   executions/<id>.json        execution records
//!   templates/<name>.json       user templates
//!   schedules.json              scheduled workflows
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::execution::WorkflowExecution;
use super::model::WorkflowDefinition;
use super::schedule::ScheduledWorkflow;
use super::templates::WorkflowTemplate;

/// Default store root, relative to the current directory.
pub const DEFAULT_ROOT: &str = ".mage";

const WORKFLOWS_DIR: &str = "workflows";
const EXECUTIONS_DIR: &str = "executions";
const TEMPLATES_DIR: &str = "templates";
const SCHEDULES_FILE: &str = "schedules.json";

/// Errors from reading or writing store documents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid {kind} name '{name}': must not contain path separators or '..'")]
    InvalidName { kind: &'static str, name: String },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// True when `name` can be used as a document file stem inside the store.
pub fn is_document_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains("..")
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

fn checked_name(kind: &'static str, name: &str) -> Result<(), StoreError> {
    if is_document_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Filter applied when querying execution history.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Only executions of this workflow, when set
    pub workflow: Option<String>,
    /// Maximum number of executions; zero means unlimited
    pub limit: usize,
}

/// File-backed store for workflow documents.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    root: PathBuf,
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl WorkflowStore {
    /// Creates a store rooted at `root`. Nothing is created until a write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join(WORKFLOWS_DIR)
    }

    pub fn executions_dir(&self) -> PathBuf {
        self.root.join(EXECUTIONS_DIR)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join(TEMPLATES_DIR)
    }

    /// Path a definition is saved to.
    pub fn workflow_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        checked_name("workflow", name)?;
        Ok(self.workflows_dir().join(format!("{}.json", name)))
    }

    pub fn execution_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        checked_name("execution", id)?;
        Ok(self.executions_dir().join(format!("{}.json", id)))
    }

    fn template_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        checked_name("template", name)?;
        Ok(self.templates_dir().join(format!("{}.json", name)))
    }

    fn schedules_path(&self) -> PathBuf {
        self.root.join(SCHEDULES_FILE)
    }

    // Definitions

    /// Loads a definition by name.
    ///
    /// `<name>.json` is preferred; `<name>.yaml` and `<name>.yml` are read
    /// when no JSON document exists.
    pub fn load_definition(&self, name: &str) -> Result<WorkflowDefinition, StoreError> {
        let json_path = self.workflow_path(name)?;
        if json_path.is_file() {
            return read_json(&json_path);
        }

        for extension in ["yaml", "yml"] {
            let yaml_path = self.workflows_dir().join(format!("{}.{}", name, extension));
            if yaml_path.is_file() {
                return read_yaml(&yaml_path);
            }
        }

        Err(StoreError::NotFound {
            kind: "workflow",
            name: name.to_string(),
        })
    }

    /// Saves a definition under its name, refreshing `last_updated`.
    pub fn save_definition(&self, definition: &mut WorkflowDefinition) -> Result<PathBuf, StoreError> {
        definition.last_updated = Utc::now();
        let path = self.workflow_path(&definition.name)?;
        write_json(&path, definition)?;
        info!("Saved workflow '{}' to {}", definition.name, path.display());
        Ok(path)
    }

    /// Loads every readable definition in the workflows directory.
    ///
    /// Documents that fail to parse are skipped with a warning. A missing
    /// directory yields an empty list.
    pub fn discover_definitions(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let mut names: Vec<String> = document_stems(&self.workflows_dir(), &["json", "yaml", "yml"])?;
        names.sort();
        names.dedup();

        let mut definitions = Vec::with_capacity(names.len());
        for name in names {
            match self.load_definition(&name) {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!("Skipping workflow '{}': {}", name, e),
            }
        }
        Ok(definitions)
    }

    // Executions

    pub fn save_execution(&self, execution: &WorkflowExecution) -> Result<PathBuf, StoreError> {
        let path = self.execution_path(&execution.id)?;
        write_json(&path, execution)?;
        debug!("Saved execution {} to {}", execution.id, path.display());
        Ok(path)
    }

    pub fn load_execution(&self, id: &str) -> Result<WorkflowExecution, StoreError> {
        let path = self.execution_path(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "execution",
                name: id.to_string(),
            });
        }
        read_json(&path)
    }

    /// Loads every readable execution record, in directory order.
    pub fn list_executions(&self) -> Result<Vec<WorkflowExecution>, StoreError> {
        let ids = document_stems(&self.executions_dir(), &["json"])?;

        let mut executions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_execution(&id) {
                Ok(execution) => executions.push(execution),
                Err(e) => warn!("Skipping execution '{}': {}", id, e),
            }
        }
        Ok(executions)
    }

    /// Execution history, newest first, filtered and limited by `query`.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<WorkflowExecution>, StoreError> {
        let mut executions: Vec<WorkflowExecution> = self
            .list_executions()?
            .into_iter()
            .filter(|e| match &query.workflow {
                Some(name) => &e.workflow.name == name,
                None => true,
            })
            .collect();

        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        if query.limit > 0 {
            executions.truncate(query.limit);
        }
        Ok(executions)
    }

    // Templates

    pub fn load_template(&self, name: &str) -> Result<WorkflowTemplate, StoreError> {
        let path = self.template_path(name)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "template",
                name: name.to_string(),
            });
        }
        read_json(&path)
    }

    pub fn save_template(&self, template: &WorkflowTemplate) -> Result<PathBuf, StoreError> {
        let path = self.template_path(&template.name)?;
        write_json(&path, template)?;
        info!("Saved template '{}' to {}", template.name, path.display());
        Ok(path)
    }

    /// Removes a stored template. Returns false when none existed.
    pub fn delete_template(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.template_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted template '{}'", name);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let mut names = document_stems(&self.templates_dir(), &["json"])?;
        names.sort();

        let mut templates = Vec::with_capacity(names.len());
        for name in names {
            match self.load_template(&name) {
                Ok(template) => templates.push(template),
                Err(e) => warn!("Skipping template '{}': {}", name, e),
            }
        }
        Ok(templates)
    }

    // Schedules

    /// Loads all scheduled workflows; a missing file is an empty schedule.
    pub fn load_schedules(&self) -> Result<Vec<ScheduledWorkflow>, StoreError> {
        let path = self.schedules_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    pub fn save_schedules(&self, schedules: &[ScheduledWorkflow]) -> Result<PathBuf, StoreError> {
        let path = self.schedules_path();
        write_json(&path, &schedules)?;
        debug!("Saved {} schedules to {}", schedules.len(), path.display());
        Ok(path)
    }
}

/// File stems of regular files in `dir` with one of `extensions`.
fn document_stems(dir: &Path, extensions: &[&str]) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut stems = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let matches_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e))
            .unwrap_or(false);
        if !matches_extension {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&content).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))
}
