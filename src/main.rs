//! # Boost Harness CLI (`boost`)
//!
//! ## Usage
//!
//! ```bash
//! boost --config ./config/boost.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `boost train` | Acquire data, train a model and store it |
//! | `boost projects list` | List projects in the registry |
//! | `boost projects show [name]` | Print one project's bundle |
//! | `boost projects add <name>` | Add a project |
//! | `boost projects update <name>` | Change fields of a project |
//! | `boost projects remove <name>` | Remove a project |
//! | `boost models list` | List stored models |
//! | `boost models show <tag>` | Print a stored model's metadata |
//! | `boost predict <tag> --row ...` | Score rows with a stored model |
//! | `boost serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Train on the bundled sample
//! boost train --use-default-dataset
//!
//! # Train on a crawl of up to 20 pages, saved as "docs"
//! boost train --crawl-url https://docs.example.com --max-pages 20 --model-name docs
//!
//! # Train with a project's settings, overriding the depth
//! boost train --project docs --max-depth 5
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use boost_harness::config::{self, Config, EnvOverrides, ExecutorKind};
use boost_harness::gbdt::{GbdtTrainer, PredictorConfig};
use boost_harness::models::{DataSourceKind, ProjectConfig, ProjectParameters};
use boost_harness::projects::{print_projects, ProjectRegistry};
use boost_harness::server;
use boost_harness::store::ModelStore;
use boost_harness::train::{
    resolve_params, InProcessExecutor, SubprocessExecutor, TrainArgs, TrainingExecutor,
};
use boost_harness::web::HttpWebClient;

/// Boost Harness CLI: project-driven data acquisition and boosted-tree training.
#[derive(Parser)]
#[command(
    name = "boost",
    about = "Boost Harness: train and serve boosted-tree models from projects",
    version
)]
struct Cli {
    /// Path to the application config (TOML). Defaults apply when missing.
    #[arg(long, global = true, default_value = "./config/boost.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire training data, train a model and save it to the store.
    ///
    /// Every parameter not given on the command line comes from the selected
    /// project, then from the built-in defaults.
    Train(TrainOpts),

    /// Manage projects in the registry file.
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Inspect the model store.
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Score rows with a stored model and print class probabilities as JSON.
    Predict {
        /// Model tag (`name`, `name:latest` or `name:version`).
        tag: String,
        /// Comma-separated feature values; repeat for several rows.
        #[arg(long = "row", required = true)]
        rows: Vec<String>,
    },

    /// Start the HTTP API.
    Serve,
}

#[derive(Args)]
struct TrainOpts {
    /// Project whose settings fill in missing parameters.
    #[arg(long)]
    project: Option<String>,
    /// List all projects and exit.
    #[arg(long)]
    list_projects: bool,

    /// Use the bundled sample dataset.
    #[arg(long)]
    use_default_dataset: bool,
    /// URL of a repository ZIP archive to train on.
    #[arg(long)]
    github_repo_url: Option<String>,
    /// URL of a single web page to train on.
    #[arg(long)]
    web_url: Option<String>,
    /// Seed URL of a crawl to train on.
    #[arg(long)]
    crawl_url: Option<String>,
    /// Maximum number of pages to crawl.
    #[arg(long)]
    max_pages: Option<usize>,

    /// Maximum depth of each tree.
    #[arg(long)]
    max_depth: Option<usize>,
    /// Learning rate.
    #[arg(long)]
    eta: Option<f64>,
    /// Name to store the model under.
    #[arg(long)]
    model_name: Option<String>,

    /// Maximum number of text features.
    #[arg(long)]
    max_features: Option<usize>,
    /// Share of synthetic positive labels for text sources.
    #[arg(long)]
    positive_ratio: Option<f64>,
}

impl TrainOpts {
    /// The first data-source flag given wins.
    fn data_source(&self) -> Option<(DataSourceKind, Option<String>)> {
        if self.use_default_dataset {
            Some((DataSourceKind::FixedSample, None))
        } else if let Some(url) = &self.github_repo_url {
            Some((DataSourceKind::ArchiveUrl, Some(url.clone())))
        } else if let Some(url) = &self.web_url {
            Some((DataSourceKind::WebPage, Some(url.clone())))
        } else {
            self.crawl_url
                .as_ref()
                .map(|url| (DataSourceKind::Crawl, Some(url.clone())))
        }
    }

    fn to_train_args(&self) -> TrainArgs {
        let (data_source, source_url) = match self.data_source() {
            Some((kind, url)) => (Some(kind.to_string()), url),
            None => (None, None),
        };
        TrainArgs {
            model_name: self.model_name.clone(),
            data_source,
            source_url,
            max_pages: self.max_pages,
            max_features: self.max_features,
            positive_ratio: self.positive_ratio,
            max_depth: self.max_depth,
            eta: self.eta,
        }
    }
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List all projects.
    List,
    /// Print a project's bundle as TOML (the current project by default).
    Show { name: Option<String> },
    /// Add a new project.
    Add {
        name: String,
        #[command(flatten)]
        fields: ProjectFields,
    },
    /// Change fields of an existing project.
    Update {
        name: String,
        #[command(flatten)]
        fields: ProjectFields,
    },
    /// Remove a project. The last project cannot be removed.
    Remove { name: String },
}

#[derive(Args)]
struct ProjectFields {
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    model_name: Option<String>,
    /// One of `fixed-sample`, `archive-url`, `web-page`, `crawl`.
    #[arg(long)]
    data_source: Option<DataSourceKind>,
    #[arg(long)]
    source_url: Option<String>,
    #[arg(long)]
    max_depth: Option<usize>,
    #[arg(long)]
    eta: Option<f64>,
    #[arg(long)]
    max_features: Option<usize>,
    #[arg(long)]
    positive_ratio: Option<f64>,
    #[arg(long)]
    max_pages: Option<usize>,
}

impl ProjectFields {
    /// Overlay the given fields on `base`.
    fn apply(self, mut base: ProjectConfig) -> ProjectConfig {
        if let Some(v) = self.description {
            base.description = v;
        }
        if let Some(v) = self.model_name {
            base.model_name = v;
        }
        if let Some(v) = self.data_source {
            base.data_source = v;
        }
        if let Some(v) = self.source_url {
            base.source_url = Some(v);
        }
        let p = &mut base.parameters;
        p.max_depth = self.max_depth.or(p.max_depth);
        p.eta = self.eta.or(p.eta);
        p.max_features = self.max_features.or(p.max_features);
        p.positive_ratio = self.positive_ratio.or(p.positive_ratio);
        p.max_pages = self.max_pages.or(p.max_pages);
        base
    }
}

#[derive(Subcommand)]
enum ModelAction {
    /// List stored models.
    List,
    /// Print the metadata of one model (`name` resolves to its latest version).
    Show { tag: String },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_minimal(&cli.config)?;
    let env = EnvOverrides::from_env();

    match cli.command {
        Commands::Train(opts) => run_train(&cfg, &env, opts)?,
        Commands::Projects { action } => run_projects(&cfg, &env, action)?,
        Commands::Models { action } => match action {
            ModelAction::List => run_models_list(&cfg)?,
            ModelAction::Show { tag } => run_models_show(&cfg, &tag)?,
        },
        Commands::Predict { tag, rows } => run_predict(&cfg, &env, &tag, &rows)?,
        Commands::Serve => {
            let config_path = cli.config.clone();
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::run_server(cfg, move |cfg| {
                make_executor(cfg, &config_path)
            }))?;
        }
    }

    Ok(())
}

fn in_process_executor(cfg: &Config) -> anyhow::Result<InProcessExecutor> {
    let web = HttpWebClient::new(&cfg.acquire).context("Failed to build HTTP client")?;
    Ok(InProcessExecutor::new(
        Arc::new(web),
        cfg.acquire.clone(),
        Arc::new(GbdtTrainer),
        ModelStore::new(&cfg.store.root),
        cfg.training.num_rounds,
    ))
}

fn make_executor(
    cfg: &Config,
    config_path: &std::path::Path,
) -> anyhow::Result<Box<dyn TrainingExecutor>> {
    match cfg.training.executor {
        ExecutorKind::InProcess => Ok(Box::new(in_process_executor(cfg)?)),
        ExecutorKind::Subprocess => Ok(Box::new(
            SubprocessExecutor::current_exe(config_path)
                .context("Failed to locate the boost binary")?,
        )),
    }
}

fn run_train(cfg: &Config, env: &EnvOverrides, opts: TrainOpts) -> anyhow::Result<()> {
    let mut registry = ProjectRegistry::load(&cfg.registry.path, env.project.as_deref());

    if opts.list_projects {
        print_projects(&registry.list());
        return Ok(());
    }

    if let Some(project) = &opts.project {
        if registry.set_current(project) {
            tracing::info!("Using configuration from project: {}", project);
        }
    }

    let params = resolve_params(&opts.to_train_args(), registry.get(None))?;
    let outcome = in_process_executor(cfg)?.execute(&params)?;

    match outcome.info {
        Some(info) => println!("Model saved as {}", info.tag),
        None => println!("Model saved as {}", outcome.model_tag),
    }
    Ok(())
}

fn run_projects(cfg: &Config, env: &EnvOverrides, action: ProjectAction) -> anyhow::Result<()> {
    let mut registry = ProjectRegistry::load(&cfg.registry.path, env.project.as_deref());

    match action {
        ProjectAction::List => print_projects(&registry.list()),
        ProjectAction::Show { name } => {
            let name = name.unwrap_or_else(|| registry.current_name().to_string());
            let project = registry.get(Some(&name));
            println!("[{}]", name);
            print!("{}", toml::to_string_pretty(project)?);
        }
        ProjectAction::Add { name, fields } => {
            let base = ProjectConfig {
                description: String::new(),
                model_name: name.clone(),
                data_source: DataSourceKind::FixedSample,
                source_url: None,
                parameters: ProjectParameters::default(),
            };
            if !registry.add(&name, fields.apply(base)) {
                bail!("Failed to add project: {}", name);
            }
            println!("Added project: {}", name);
        }
        ProjectAction::Update { name, fields } => {
            if !registry.contains(&name) {
                bail!("Project not found: {}", name);
            }
            let updated = fields.apply(registry.get(Some(&name)).clone());
            if !registry.update(&name, updated) {
                bail!("Failed to update project: {}", name);
            }
            println!("Updated project: {}", name);
        }
        ProjectAction::Remove { name } => {
            if !registry.remove(&name) {
                bail!("Failed to remove project: {}", name);
            }
            println!("Removed project: {}", name);
        }
    }
    Ok(())
}

fn run_models_list(cfg: &Config) -> anyhow::Result<()> {
    let store = ModelStore::new(&cfg.store.root);
    let models = store.list()?;
    if models.is_empty() {
        println!("No models in {}", store.root().display());
        return Ok(());
    }
    println!("{:<40} {:<10} CREATED", "TAG", "FEATURES");
    for model in models {
        println!(
            "{:<40} {:<10} {}",
            model.tag,
            model.n_features,
            model.creation_time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn run_models_show(cfg: &Config, tag: &str) -> anyhow::Result<()> {
    let info = ModelStore::new(&cfg.store.root)
        .info(tag)
        .with_context(|| format!("Failed to read model {}", tag))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn run_predict(cfg: &Config, env: &EnvOverrides, tag: &str, rows: &[String]) -> anyhow::Result<()> {
    let rows = rows
        .iter()
        .map(|row| {
            row.split(',')
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .with_context(|| format!("invalid number '{}' in row '{}'", v, row))
                })
                .collect::<anyhow::Result<Vec<f64>>>()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let booster = ModelStore::new(&cfg.store.root)
        .load(tag)
        .with_context(|| format!("Failed to load model {}", tag))?;
    let pool = PredictorConfig::from_env(env).build_pool()?;
    let predictions = pool.install(|| booster.predict(&rows))?;
    println!("{}", serde_json::to_string(&predictions)?);
    Ok(())
}
