//! Stateful model service.
//!
//! [`ModelService`] owns the project registry, the model store, the loaded
//! booster and the current project/model selection. The HTTP server and the
//! CLI both drive it; nothing here is global.

use serde::{Deserialize, Serialize};

use crate::config::{Config, EnvOverrides};
use crate::errors::{PredictError, TrainError};
use crate::gbdt::{Booster, PredictorConfig};
use crate::models::{ProjectConfig, ProjectSummary};
use crate::projects::ProjectRegistry;
use crate::store::{ModelInfo, ModelStore, ModelTag, LATEST};
use crate::train::{resolve_params, TrainArgs, TrainingExecutor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentModel {
    pub model_tag: String,
    pub model_name: String,
    pub model_version: String,
    pub project: String,
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentProject {
    pub name: String,
    #[serde(flatten)]
    pub config: ProjectConfig,
}

/// Outcome of a project or model switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub model_tag: String,
}

/// Training request accepted by the service API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(flatten)]
    pub args: TrainArgs,
    #[serde(default)]
    pub save_to_config: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// True when the request was rejected before any work started.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invalid: bool,
}

impl TrainResponse {
    fn failure(err: &TrainError) -> Self {
        let (stdout, stderr) = match err {
            TrainError::Subprocess { stdout, stderr, .. } => {
                (Some(stdout.clone()), Some(stderr.clone()))
            }
            _ => (None, None),
        };
        let message = match err {
            TrainError::Validation(msg) => msg.clone(),
            TrainError::Subprocess { code, .. } => match code {
                Some(code) => format!("Model training failed with return code: {}", code),
                None => "Model training was terminated by a signal".to_string(),
            },
            other => format!("Error during model training: {}", other),
        };
        Self {
            success: false,
            message,
            model_tag: None,
            project: None,
            model: None,
            stdout,
            stderr,
            invalid: err.is_validation(),
        }
    }
}

pub struct ModelService {
    registry: ProjectRegistry,
    store: ModelStore,
    executor: Box<dyn TrainingExecutor>,
    pool: rayon::ThreadPool,
    model: Option<Booster>,
    model_name: String,
    model_version: String,
    model_tag: String,
}

impl ModelService {
    /// Load the registry, pick the startup model from the environment or the
    /// current project, and try to load it. A missing model is logged; the
    /// service still starts.
    pub fn new(
        config: &Config,
        env: &EnvOverrides,
        executor: Box<dyn TrainingExecutor>,
    ) -> anyhow::Result<Self> {
        let registry = ProjectRegistry::load(&config.registry.path, env.project.as_deref());
        let store = ModelStore::new(&config.store.root);
        let pool = PredictorConfig::from_env(env).build_pool()?;

        let model_name = env
            .model_name
            .clone()
            .unwrap_or_else(|| registry.model_name(None).to_string());
        let model_version = env
            .model_version
            .clone()
            .unwrap_or_else(|| LATEST.to_string());
        let model_tag = format!("{}:{}", model_name, model_version);

        tracing::info!(
            "Using project: {}, model: {}",
            registry.current_name(),
            model_tag
        );

        let mut service = Self {
            registry,
            store,
            executor,
            pool,
            model: None,
            model_name,
            model_version,
            model_tag: model_tag.clone(),
        };
        service.load_model(&model_tag);
        Ok(service)
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Load `tag` into memory. On failure the previous model stays loaded.
    fn load_model(&mut self, tag: &str) -> bool {
        tracing::info!("Loading model: {}", tag);
        match self.store.load(tag) {
            Ok(booster) => {
                self.model = Some(booster);
                self.model_tag = tag.to_string();
                tracing::info!("Successfully loaded model: {}", tag);
                true
            }
            Err(e) => {
                tracing::error!("Failed to load model {}: {}", tag, e);
                false
            }
        }
    }

    fn select_model(&mut self, tag: &ModelTag) {
        self.model_name = tag.name.clone();
        self.model_version = tag.version.clone();
        self.model_tag = tag.to_string();
    }

    pub fn projects(&self) -> Vec<ProjectSummary> {
        self.registry.list()
    }

    pub fn current_project(&self) -> CurrentProject {
        CurrentProject {
            name: self.registry.current_name().to_string(),
            config: self.registry.get(None).clone(),
        }
    }

    pub fn switch_project(&mut self, name: &str) -> SwitchResponse {
        if !self.registry.set_current(name) {
            return SwitchResponse {
                success: false,
                message: format!("Failed to switch to project: {}", name),
                project: Some(self.registry.current_name().to_string()),
                model_tag: self.model_tag.clone(),
            };
        }

        let model_name = self.registry.model_name(None).to_string();
        let tag = format!("{}:{}", model_name, LATEST);
        if self.load_model(&tag) {
            self.model_name = model_name;
            self.model_version = LATEST.to_string();
            SwitchResponse {
                success: true,
                message: format!("Successfully switched to project: {}", name),
                project: Some(name.to_string()),
                model_tag: self.model_tag.clone(),
            }
        } else {
            SwitchResponse {
                success: false,
                message: format!(
                    "Switched to project {}, but failed to load model {}",
                    name, tag
                ),
                project: Some(name.to_string()),
                model_tag: self.model_tag.clone(),
            }
        }
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        match self.store.list() {
            Ok(models) => models,
            Err(e) => {
                tracing::error!("Error getting available models: {}", e);
                Vec::new()
            }
        }
    }

    pub fn current_model(&self) -> CurrentModel {
        CurrentModel {
            model_tag: self.model_tag.clone(),
            model_name: self.model_name.clone(),
            model_version: self.model_version.clone(),
            project: self.registry.current_name().to_string(),
            loaded: self.model.is_some(),
        }
    }

    pub fn switch_model(&mut self, tag: &str) -> SwitchResponse {
        let parsed = match ModelTag::parse(tag) {
            Ok(parsed) => parsed,
            Err(e) => {
                return SwitchResponse {
                    success: false,
                    message: e.to_string(),
                    project: None,
                    model_tag: self.model_tag.clone(),
                }
            }
        };

        if self.load_model(&parsed.to_string()) {
            self.select_model(&parsed);
            SwitchResponse {
                success: true,
                message: format!("Successfully switched to model: {}", tag),
                project: None,
                model_tag: self.model_tag.clone(),
            }
        } else {
            SwitchResponse {
                success: false,
                message: format!("Failed to switch to model: {}", tag),
                project: None,
                model_tag: self.model_tag.clone(),
            }
        }
    }

    /// Resolve parameters, train through the executor, load the result and
    /// optionally write the resolved bundle back to the project.
    pub fn train_model(&mut self, request: &TrainRequest) -> TrainResponse {
        match self.try_train(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Model training failed: {}", e);
                TrainResponse::failure(&e)
            }
        }
    }

    fn try_train(&mut self, request: &TrainRequest) -> Result<TrainResponse, TrainError> {
        if let Some(project) = request.project_name.as_deref() {
            if !self.registry.set_current(project) {
                return Err(TrainError::Validation(format!(
                    "Project not found: {}",
                    project
                )));
            }
        }

        let project_config = self.registry.get(None).clone();
        let params = resolve_params(&request.args, &project_config)?;
        let outcome = self.executor.execute(&params)?;

        let tag = ModelTag::parse(&outcome.model_tag)?;
        if !self.load_model(&tag.to_string()) {
            return Ok(TrainResponse {
                success: false,
                message: format!("Trained model {} but failed to load it", outcome.model_tag),
                model_tag: Some(self.model_tag.clone()),
                project: Some(self.registry.current_name().to_string()),
                model: outcome.info,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                invalid: false,
            });
        }
        self.select_model(&tag);

        if request.save_to_config {
            if let Some(project) = request.project_name.as_deref() {
                let description = if project_config.description.is_empty() {
                    format!("Project for {}", params.model_name)
                } else {
                    project_config.description.clone()
                };
                if !self
                    .registry
                    .update(project, params.to_project_config(&description))
                {
                    tracing::warn!("Trained model but could not save project {}", project);
                }
            } else {
                tracing::warn!("save_to_config requested without a project name; skipping");
            }
        }

        Ok(TrainResponse {
            success: true,
            message: format!("Successfully trained and loaded model: {}", outcome.model_tag),
            model_tag: Some(outcome.model_tag),
            project: Some(self.registry.current_name().to_string()),
            model: outcome.info,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            invalid: false,
        })
    }

    /// Class probabilities for each row from the loaded model.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, PredictError> {
        let model = self.model.as_ref().ok_or(PredictError::NoModel)?;
        self.pool.install(|| model.predict(rows))
    }
}
