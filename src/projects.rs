//! Project registry.
//!
//! Projects are named bundles of model and data-source settings kept in a
//! TOML file:
//!
//! ```toml
//! default_project = "default"
//!
//! [projects.default]
//! description = "Default project"
//! model_name = "cancer"
//! data_source = "fixed-sample"
//!
//! [projects.default.parameters]
//! max_depth = 3
//! eta = 0.3
//! max_features = 1000
//! positive_ratio = 0.5
//! ```
//!
//! The file is read once when the registry is loaded and rewritten in full
//! after every mutation. There is no locking: two processes mutating the same
//! file concurrently will lose each other's writes.
//!
//! Projects are kept in a [`BTreeMap`], so "the first project" always means
//! the lexicographically smallest name.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::models::{ProjectConfig, ProjectSummary};

pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default = "default_project_name")]
    default_project: String,
    #[serde(default)]
    projects: BTreeMap<String, ProjectConfig>,
}

fn default_project_name() -> String {
    DEFAULT_PROJECT.to_string()
}

impl RegistryFile {
    fn builtin() -> Self {
        let mut projects = BTreeMap::new();
        projects.insert(DEFAULT_PROJECT.to_string(), ProjectConfig::builtin_default());
        Self {
            default_project: DEFAULT_PROJECT.to_string(),
            projects,
        }
    }
}

/// In-memory view of the project file plus the currently selected project.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    path: PathBuf,
    file: RegistryFile,
    current: String,
}

impl ProjectRegistry {
    /// Load the registry from `path`.
    ///
    /// Never fails: a missing or unreadable file yields the built-in
    /// `default` project and a warning. `env_project` is the value of the
    /// project override variable, if set.
    pub fn load(path: &Path, env_project: Option<&str>) -> Self {
        let file = if !path.exists() {
            warn!(
                "Configuration file {} not found. Using default configuration.",
                path.display()
            );
            RegistryFile::builtin()
        } else {
            match read_registry_file(path) {
                Ok(file) => {
                    info!("Loaded configuration from {}", path.display());
                    file
                }
                Err(e) => {
                    error!("Error loading configuration: {:#}", e);
                    RegistryFile::builtin()
                }
            }
        };

        let mut registry = Self {
            path: path.to_path_buf(),
            file,
            current: String::new(),
        };
        registry.current = registry.resolve_current_project(env_project);
        registry
    }

    /// Pick the active project: the override if it names a known project,
    /// else the declared default, else the first project by name.
    pub fn resolve_current_project(&self, env_project: Option<&str>) -> String {
        if let Some(project) = env_project {
            if self.file.projects.contains_key(project) {
                info!("Using project from environment variable: {}", project);
                return project.to_string();
            }
            warn!("Project {} from environment variable not found", project);
        }

        if self.file.projects.contains_key(&self.file.default_project) {
            info!("Using default project: {}", self.file.default_project);
            return self.file.default_project.clone();
        }

        let first = self.first_project();
        warn!(
            "Default project not found. Using first available project: {}",
            first
        );
        first
    }

    fn first_project(&self) -> String {
        // Loading guarantees at least one project.
        self.file
            .projects
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(default_project_name)
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    pub fn contains(&self, name: &str) -> bool {
        self.file.projects.contains_key(name)
    }

    /// The named project, or the current project when `name` is absent or
    /// unknown.
    pub fn get(&self, name: Option<&str>) -> &ProjectConfig {
        let name = match name {
            Some(n) if self.file.projects.contains_key(n) => n,
            Some(n) => {
                warn!(
                    "Project {} not found. Using current project: {}",
                    n, self.current
                );
                &self.current
            }
            None => &self.current,
        };
        &self.file.projects[name]
    }

    pub fn model_name(&self, name: Option<&str>) -> &str {
        &self.get(name).model_name
    }

    pub fn list(&self) -> Vec<ProjectSummary> {
        self.file
            .projects
            .iter()
            .map(|(name, cfg)| ProjectSummary {
                name: name.clone(),
                description: cfg.description.clone(),
                model_name: cfg.model_name.clone(),
                data_source: cfg.data_source,
                is_current: *name == self.current,
            })
            .collect()
    }

    pub fn set_current(&mut self, name: &str) -> bool {
        if self.file.projects.contains_key(name) {
            self.current = name.to_string();
            info!("Current project set to: {}", name);
            true
        } else {
            warn!(
                "Project {} not found. Current project unchanged: {}",
                name, self.current
            );
            false
        }
    }

    pub fn add(&mut self, name: &str, config: ProjectConfig) -> bool {
        if self.file.projects.contains_key(name) {
            warn!(
                "Project {} already exists. Use update to modify it.",
                name
            );
            return false;
        }
        self.file.projects.insert(name.to_string(), config);
        info!("Added new project: {}", name);
        self.save()
    }

    pub fn update(&mut self, name: &str, config: ProjectConfig) -> bool {
        match self.file.projects.get_mut(name) {
            Some(existing) => {
                *existing = config;
                info!("Updated project: {}", name);
                self.save()
            }
            None => {
                warn!("Project {} not found. Use add to create it.", name);
                false
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        if !self.file.projects.contains_key(name) {
            warn!("Project {} not found.", name);
            return false;
        }
        if self.file.projects.len() <= 1 {
            warn!("Cannot remove the last project.");
            return false;
        }

        self.file.projects.remove(name);
        info!("Removed project: {}", name);

        if name == self.current {
            self.current = self.first_project();
            info!("Current project set to: {}", self.current);
        }

        self.save()
    }

    /// Write the whole registry back to its file. Failures are logged and
    /// reported as `false`.
    pub fn save(&self) -> bool {
        match write_registry_file(&self.path, &self.file) {
            Ok(()) => {
                info!("Configuration saved to {}", self.path.display());
                true
            }
            Err(e) => {
                error!("Error saving configuration: {:#}", e);
                false
            }
        }
    }
}

fn read_registry_file(path: &Path) -> Result<RegistryFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project file: {}", path.display()))?;
    let file: RegistryFile =
        toml::from_str(&content).with_context(|| "Failed to parse project file")?;
    if file.projects.is_empty() {
        anyhow::bail!("project file declares no projects");
    }
    Ok(file)
}

fn write_registry_file(path: &Path, file: &RegistryFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory: {}", parent.display())
            })?;
        }
    }
    let content = toml::to_string_pretty(file).context("Failed to serialize projects")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write project file: {}", path.display()))?;
    Ok(())
}

/// Print a project listing the way `boost train --list-projects` shows it.
pub fn print_projects(projects: &[ProjectSummary]) {
    let rule = "-".repeat(80);
    println!();
    println!("Available projects:");
    println!("{}", rule);
    for project in projects {
        let current = if project.is_current { " (current)" } else { "" };
        println!("{}{}", project.name, current);
        println!("  Description: {}", project.description);
        println!("  Model: {}", project.model_name);
        println!("  Data source: {}", project.data_source);
        println!("{}", rule);
    }
}
