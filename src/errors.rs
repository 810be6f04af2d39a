use thiserror::Error;

/// Failures while fetching or unpacking training data.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("no URL given for data source '{0}'")]
    MissingUrl(String),

    #[error("markup conversion failed: {0}")]
    Markup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sample dataset: {0}")]
    Sample(String),
}

/// Failures inside the feature pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("{0} is not fitted yet; call it with fit=true first")]
    NotFitted(&'static str),

    #[error("empty vocabulary; the documents contain only stop words or no words at all")]
    EmptyVocabulary,

    #[error("expected {expected} columns, got {actual}")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("matrix has {rows} rows but {labels} labels were given")]
    LabelMismatch { rows: usize, labels: usize },
}

/// Failures reading or writing the model store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid model tag '{0}'")]
    InvalidTag(String),

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("model {tag} is corrupt: {reason}")]
    Corrupt { tag: String, reason: String },
}

/// Everything that can stop a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("{0}")]
    Validation(String),

    #[error("data acquisition failed: {0}")]
    Acquisition(#[from] AcquireError),

    #[error("feature pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("training failed: {0}")]
    Training(String),

    #[error("model store error: {0}")]
    Store(#[from] StoreError),

    #[error("training process exited with status {code:?}")]
    Subprocess {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to launch training process: {0}")]
    Launch(#[source] std::io::Error),
}

impl TrainError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TrainError::Validation(_))
    }
}

/// Failures while scoring rows with a loaded model.
#[derive(Debug, Error, PartialEq)]
pub enum PredictError {
    #[error("no model is loaded")]
    NoModel,

    #[error("row {row} has {actual} features but the model was trained on {expected}")]
    FeatureCount {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row} contains a non-finite value")]
    NonFinite { row: usize },
}
