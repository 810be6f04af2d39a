//! Training orchestration.
//!
//! A run goes through four steps:
//!
//! 1. **Resolve** every parameter independently: explicit argument, then the
//!    project's value, then a built-in fallback ([`resolve_params`]).
//! 2. **Validate** the result before touching the network.
//! 3. **Acquire and featurize**: fetch data with the [`DataAcquirer`] and, for
//!    text sources, run the [`FeaturePipeline`].
//! 4. **Train and store**: hand the dataset to a [`Trainer`] and save the
//!    booster in the [`ModelStore`].
//!
//! Steps 3 and 4 run behind a [`TrainingExecutor`]. [`InProcessExecutor`]
//! calls them directly; [`SubprocessExecutor`] re-runs `boost train` with the
//! resolved flags and captures its output.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use crate::acquire::{Acquired, DataAcquirer};
use crate::config::AcquireConfig;
use crate::errors::TrainError;
use crate::features::FeaturePipeline;
use crate::gbdt::{TrainParams, Trainer};
use crate::models::{DataSourceKind, ProjectConfig, ProjectParameters};
use crate::store::{ModelInfo, ModelStore};
use crate::web::WebClient;

pub const FALLBACK_MODEL_NAME: &str = "cancer";
pub const FALLBACK_MAX_PAGES: usize = 10;
pub const FALLBACK_MAX_FEATURES: usize = 1000;
pub const FALLBACK_POSITIVE_RATIO: f64 = 0.5;
pub const FALLBACK_MAX_DEPTH: usize = 3;
pub const FALLBACK_ETA: f64 = 0.3;

/// Training arguments as given by a caller. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainArgs {
    pub model_name: Option<String>,
    /// Kept as text so an unknown kind is reported as a validation error.
    pub data_source: Option<String>,
    pub source_url: Option<String>,
    pub max_pages: Option<usize>,
    pub max_features: Option<usize>,
    pub positive_ratio: Option<f64>,
    pub max_depth: Option<usize>,
    pub eta: Option<f64>,
}

/// Fully resolved and validated training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub model_name: String,
    pub data_source: DataSourceKind,
    pub source_url: Option<String>,
    pub max_pages: usize,
    pub max_features: usize,
    pub positive_ratio: f64,
    pub max_depth: usize,
    pub eta: f64,
}

impl ResolvedParams {
    /// Project bundle recording these parameters. `max_pages` is only kept
    /// for crawls and the URL only for sources that need one.
    pub fn to_project_config(&self, description: &str) -> ProjectConfig {
        ProjectConfig {
            description: description.to_string(),
            model_name: self.model_name.clone(),
            data_source: self.data_source,
            source_url: if self.data_source.requires_locator() {
                self.source_url.clone()
            } else {
                None
            },
            parameters: ProjectParameters {
                max_depth: Some(self.max_depth),
                eta: Some(self.eta),
                max_features: Some(self.max_features),
                positive_ratio: Some(self.positive_ratio),
                max_pages: (self.data_source == DataSourceKind::Crawl).then_some(self.max_pages),
            },
        }
    }

    /// `boost train` flags that reproduce this run.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![format!("--model-name={}", self.model_name)];
        let url = self.source_url.as_deref().unwrap_or_default();
        match self.data_source {
            DataSourceKind::FixedSample => args.push("--use-default-dataset".to_string()),
            DataSourceKind::ArchiveUrl => args.push(format!("--github-repo-url={}", url)),
            DataSourceKind::WebPage => args.push(format!("--web-url={}", url)),
            DataSourceKind::Crawl => {
                args.push(format!("--crawl-url={}", url));
                args.push(format!("--max-pages={}", self.max_pages));
            }
        }
        args.extend([
            format!("--max-features={}", self.max_features),
            format!("--positive-ratio={}", self.positive_ratio),
            format!("--max-depth={}", self.max_depth),
            format!("--eta={}", self.eta),
        ]);
        args
    }
}

/// Apply argument > project > fallback precedence per field and validate.
pub fn resolve_params(args: &TrainArgs, project: &ProjectConfig) -> Result<ResolvedParams, TrainError> {
    let params = &project.parameters;

    let data_source = match &args.data_source {
        Some(kind) => kind
            .parse::<DataSourceKind>()
            .map_err(|e| TrainError::Validation(e.to_string()))?,
        None => project.data_source,
    };

    let resolved = ResolvedParams {
        model_name: args
            .model_name
            .clone()
            .unwrap_or_else(|| non_empty_or(&project.model_name, FALLBACK_MODEL_NAME)),
        data_source,
        source_url: args.source_url.clone().or_else(|| project.source_url.clone()),
        max_pages: args.max_pages.or(params.max_pages).unwrap_or(FALLBACK_MAX_PAGES),
        max_features: args
            .max_features
            .or(params.max_features)
            .unwrap_or(FALLBACK_MAX_FEATURES),
        positive_ratio: args
            .positive_ratio
            .or(params.positive_ratio)
            .unwrap_or(FALLBACK_POSITIVE_RATIO),
        max_depth: args.max_depth.or(params.max_depth).unwrap_or(FALLBACK_MAX_DEPTH),
        eta: args.eta.or(params.eta).unwrap_or(FALLBACK_ETA),
    };

    validate(&resolved)?;
    Ok(resolved)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn validate(params: &ResolvedParams) -> Result<(), TrainError> {
    let invalid = |msg: String| Err(TrainError::Validation(msg));

    if params.data_source.requires_locator()
        && params.source_url.as_deref().map_or(true, |u| u.trim().is_empty())
    {
        return invalid(format!("URL is required for data source: {}", params.data_source));
    }
    if crate::store::ModelTag::latest(&params.model_name).is_err() {
        return invalid(format!(
            "Invalid model name: '{}'. Use letters, digits, '_', '.' or '-'.",
            params.model_name
        ));
    }
    if !params.positive_ratio.is_finite() || !(0.0..=1.0).contains(&params.positive_ratio) {
        return invalid(format!(
            "positive_ratio must be between 0 and 1, got {}",
            params.positive_ratio
        ));
    }
    if params.max_depth == 0 || params.max_features == 0 || params.max_pages == 0 {
        return invalid("max_depth, max_features and max_pages must be at least 1".to_string());
    }
    if !params.eta.is_finite() || params.eta <= 0.0 {
        return invalid(format!("eta must be a finite number greater than 0, got {}", params.eta));
    }
    Ok(())
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainOutcome {
    /// Tag to load the new model with.
    pub model_tag: String,
    /// Present when the run happened in this process.
    pub info: Option<ModelInfo>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

pub trait TrainingExecutor: Send + Sync {
    fn execute(&self, params: &ResolvedParams) -> Result<TrainOutcome, TrainError>;
}

/// Acquire, featurize, train and store in the calling thread.
pub struct TrainingRun<'a> {
    pub acquirer: &'a DataAcquirer,
    pub trainer: &'a dyn Trainer,
    pub store: &'a ModelStore,
    pub num_rounds: usize,
}

impl TrainingRun<'_> {
    pub fn run(&self, params: &ResolvedParams) -> Result<ModelInfo, TrainError> {
        let dataset = match self.acquirer.acquire(
            params.data_source,
            params.source_url.as_deref(),
            params.max_pages,
        )? {
            Acquired::Sample(dataset) => dataset,
            Acquired::Documents(documents) => {
                tracing::info!("Acquired {} documents", documents.len());
                let texts: Vec<String> = documents.into_iter().map(|d| d.body).collect();
                let mut pipeline = FeaturePipeline::new(params.max_features);
                pipeline.prepare_training_data(
                    &texts,
                    params.positive_ratio,
                    &mut StdRng::from_entropy(),
                )?
            }
        };

        let train_params = TrainParams {
            max_depth: params.max_depth,
            eta: params.eta,
            num_rounds: self.num_rounds,
            ..TrainParams::default()
        };
        let booster = self.trainer.train(&dataset, &train_params)?;

        tracing::info!("Saving model as '{}'", params.model_name);
        let info = self.store.save(&params.model_name, &booster)?;
        tracing::info!("Model saved successfully as '{}'", info.tag);
        Ok(info)
    }
}

pub struct InProcessExecutor {
    web: Arc<dyn WebClient>,
    acquire: AcquireConfig,
    trainer: Arc<dyn Trainer>,
    store: ModelStore,
    num_rounds: usize,
}

impl InProcessExecutor {
    pub fn new(
        web: Arc<dyn WebClient>,
        acquire: AcquireConfig,
        trainer: Arc<dyn Trainer>,
        store: ModelStore,
        num_rounds: usize,
    ) -> Self {
        Self {
            web,
            acquire,
            trainer,
            store,
            num_rounds,
        }
    }
}

impl TrainingExecutor for InProcessExecutor {
    fn execute(&self, params: &ResolvedParams) -> Result<TrainOutcome, TrainError> {
        let acquirer = DataAcquirer::new(self.web.clone(), &self.acquire)?;
        let info = TrainingRun {
            acquirer: &acquirer,
            trainer: self.trainer.as_ref(),
            store: &self.store,
            num_rounds: self.num_rounds,
        }
        .run(params)?;

        Ok(TrainOutcome {
            model_tag: format!("{}:latest", params.model_name),
            info: Some(info),
            stdout: None,
            stderr: None,
        })
    }
}

/// Runs `program [leading_args..] train <flags>` and waits for it.
pub struct SubprocessExecutor {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl SubprocessExecutor {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Re-invoke the running binary with the same config file.
    pub fn current_exe(config_path: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["--config".into(), config_path.as_os_str().to_os_string()],
        ))
    }
}

impl TrainingExecutor for SubprocessExecutor {
    fn execute(&self, params: &ResolvedParams) -> Result<TrainOutcome, TrainError> {
        let flags = params.to_cli_args();
        tracing::info!(
            "Starting model training with command: {} train {}",
            self.program.display(),
            flags.join(" ")
        );

        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("train")
            .args(&flags)
            .output()
            .map_err(TrainError::Launch)?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::error!(
                code = ?output.status.code(),
                "Model training failed"
            );
            return Err(TrainError::Subprocess {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(TrainOutcome {
            model_tag: format!("{}:latest", params.model_name),
            info: None,
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }
}
