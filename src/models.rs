//! Core data models shared by the registry, the acquirer and the trainer.
//!
//! These types represent project bundles, the raw documents produced by the
//! data acquirer, and the summaries returned through the service API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where training data comes from.
///
/// The short names used by older configuration files (`default`, `github`,
/// `web`) are accepted on input; the long names are always written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceKind {
    #[serde(rename = "fixed-sample", alias = "default")]
    FixedSample,
    #[serde(rename = "archive-url", alias = "github")]
    ArchiveUrl,
    #[serde(rename = "web-page", alias = "web")]
    WebPage,
    #[serde(rename = "crawl")]
    Crawl,
}

impl DataSourceKind {
    pub const ALL: [DataSourceKind; 4] = [
        DataSourceKind::FixedSample,
        DataSourceKind::ArchiveUrl,
        DataSourceKind::WebPage,
        DataSourceKind::Crawl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::FixedSample => "fixed-sample",
            DataSourceKind::ArchiveUrl => "archive-url",
            DataSourceKind::WebPage => "web-page",
            DataSourceKind::Crawl => "crawl",
        }
    }

    /// Whether this source needs a URL to fetch from.
    pub fn requires_locator(&self) -> bool {
        !matches!(self, DataSourceKind::FixedSample)
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataSource(pub String);

impl fmt::Display for UnknownDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid data source: '{}'. Must be one of 'fixed-sample', 'archive-url', 'web-page', or 'crawl'.",
            self.0
        )
    }
}

impl std::error::Error for UnknownDataSource {}

impl FromStr for DataSourceKind {
    type Err = UnknownDataSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fixed-sample" | "default" => Ok(DataSourceKind::FixedSample),
            "archive-url" | "github" => Ok(DataSourceKind::ArchiveUrl),
            "web-page" | "web" => Ok(DataSourceKind::WebPage),
            "crawl" => Ok(DataSourceKind::Crawl),
            other => Err(UnknownDataSource(other.to_string())),
        }
    }
}

/// Tunable parameters stored with a project. Every field is optional; absent
/// fields fall through to the built-in defaults at training time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_features: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
}

/// A named bundle of model, data-source and parameter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_data_source")]
    pub data_source: DataSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub parameters: ProjectParameters,
}

pub(crate) fn default_model_name() -> String {
    "cancer".to_string()
}

fn default_data_source() -> DataSourceKind {
    DataSourceKind::FixedSample
}

impl ProjectConfig {
    /// The built-in project used when no registry file can be read.
    pub fn builtin_default() -> Self {
        Self {
            description: "Default project".to_string(),
            model_name: default_model_name(),
            data_source: DataSourceKind::FixedSample,
            source_url: None,
            parameters: ProjectParameters {
                max_depth: Some(3),
                eta: Some(0.3),
                max_features: Some(1000),
                positive_ratio: Some(0.5),
                max_pages: None,
            },
        }
    }
}

/// Row in a project listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub description: String,
    pub model_name: String,
    pub data_source: DataSourceKind,
    pub is_current: bool,
}

/// Raw text produced by one acquisition. Lives only for the duration of a
/// training run.
#[derive(Debug, Clone)]
pub struct Document {
    /// Relative path for archive entries, URL for fetched pages.
    pub source_id: String,
    pub title: Option<String>,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_names() {
        assert_eq!("fixed-sample".parse(), Ok(DataSourceKind::FixedSample));
        assert_eq!("default".parse(), Ok(DataSourceKind::FixedSample));
        assert_eq!("github".parse(), Ok(DataSourceKind::ArchiveUrl));
        assert_eq!("web".parse(), Ok(DataSourceKind::WebPage));
        assert_eq!("crawl".parse(), Ok(DataSourceKind::Crawl));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "ftp".parse::<DataSourceKind>().unwrap_err();
        assert!(err.to_string().contains("Invalid data source: 'ftp'"));
    }

    #[test]
    fn project_config_accepts_legacy_source_names() {
        let cfg: ProjectConfig = toml::from_str(
            "model_name = \"docs\"\ndata_source = \"github\"\nsource_url = \"https://example.com/a.zip\"\n",
        )
        .unwrap();
        assert_eq!(cfg.data_source, DataSourceKind::ArchiveUrl);
        assert_eq!(cfg.parameters, ProjectParameters::default());

        let written = toml::to_string(&cfg).unwrap();
        assert!(written.contains("data_source = \"archive-url\""));
    }

    #[test]
    fn only_fixed_sample_skips_locator() {
        for kind in DataSourceKind::ALL {
            assert_eq!(kind.requires_locator(), kind != DataSourceKind::FixedSample);
        }
    }
}
