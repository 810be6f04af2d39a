//! Filesystem model store.
//!
//! Boosters are stored per name and version:
//!
//! ```text
//! <root>/<name>/<version>/model.json
//! <root>/<name>/<version>/info.json
//! <root>/<name>/latest            # version string of the newest save
//! ```
//!
//! Versions are UTC timestamps, so they sort in save order. A tag is
//! `name:version`; a bare `name` or `name:latest` resolves through the
//! `latest` file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::StoreError;
use crate::gbdt::Booster;

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTag {
    pub name: String,
    pub version: String,
}

impl ModelTag {
    pub fn parse(tag: &str) -> Result<Self, StoreError> {
        let (name, version) = match tag.trim().split_once(':') {
            Some((name, version)) => (name, version),
            None => (tag.trim(), LATEST),
        };
        if !is_valid_part(name) || !is_valid_part(version) {
            return Err(StoreError::InvalidTag(tag.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn latest(name: &str) -> Result<Self, StoreError> {
        Self::parse(&format!("{}:{}", name, LATEST))
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Metadata written next to every stored model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub tag: String,
    pub creation_time: DateTime<Utc>,
    /// SHA-256 of `model.json`, hex encoded.
    pub checksum: String,
    pub n_features: usize,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `booster` under a new version of `name` and point `latest` at it.
    pub fn save(&self, name: &str, booster: &Booster) -> Result<ModelInfo, StoreError> {
        let name_dir = self.root.join(&ModelTag::latest(name)?.name);
        std::fs::create_dir_all(&name_dir)?;

        let now = Utc::now();
        let base = now.format("%Y%m%d-%H%M%S-%6f").to_string();
        let mut version = base.clone();
        let mut n = 1;
        while name_dir.join(&version).exists() {
            version = format!("{}-{}", base, n);
            n += 1;
        }
        let dir = name_dir.join(&version);
        std::fs::create_dir_all(&dir)?;

        let model_json = serde_json::to_vec(booster)?;
        let info = ModelInfo {
            name: name.to_string(),
            version: version.clone(),
            tag: format!("{}:{}", name, version),
            creation_time: now,
            checksum: hex::encode(Sha256::digest(&model_json)),
            n_features: booster.n_features,
        };
        std::fs::write(dir.join("model.json"), &model_json)?;
        std::fs::write(dir.join("info.json"), serde_json::to_vec_pretty(&info)?)?;
        std::fs::write(name_dir.join(LATEST), &version)?;

        tracing::info!("Saved model {}", info.tag);
        Ok(info)
    }

    /// Replace `latest` in `tag` with the concrete version it points at.
    pub fn resolve(&self, tag: &str) -> Result<ModelTag, StoreError> {
        let mut tag = ModelTag::parse(tag)?;
        if tag.is_latest() {
            let latest = self.root.join(&tag.name).join(LATEST);
            let version = std::fs::read_to_string(&latest)
                .map_err(|_| StoreError::NotFound(tag.to_string()))?;
            tag.version = version.trim().to_string();
        }
        if !self.root.join(&tag.name).join(&tag.version).is_dir() {
            return Err(StoreError::NotFound(tag.to_string()));
        }
        Ok(tag)
    }

    pub fn load(&self, tag: &str) -> Result<Booster, StoreError> {
        let tag = self.resolve(tag)?;
        let dir = self.root.join(&tag.name).join(&tag.version);
        let bytes = std::fs::read(dir.join("model.json"))?;

        if let Ok(info) = self.read_info(&dir) {
            let checksum = hex::encode(Sha256::digest(&bytes));
            if checksum != info.checksum {
                tracing::warn!("Checksum mismatch for model {}", tag);
            }
        }
        let booster: Booster = serde_json::from_slice(&bytes)?;
        booster.validate().map_err(|reason| StoreError::Corrupt {
            tag: tag.to_string(),
            reason,
        })?;
        Ok(booster)
    }

    pub fn info(&self, tag: &str) -> Result<ModelInfo, StoreError> {
        let tag = self.resolve(tag)?;
        self.read_info(&self.root.join(&tag.name).join(&tag.version))
    }

    fn read_info(&self, dir: &Path) -> Result<ModelInfo, StoreError> {
        let bytes = std::fs::read(dir.join("info.json"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every stored model, sorted by tag. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<ModelInfo>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut models = Vec::new();
        for name_entry in std::fs::read_dir(&self.root)? {
            let name_entry = name_entry?;
            if !name_entry.file_type()?.is_dir() {
                continue;
            }
            for version_entry in std::fs::read_dir(name_entry.path())? {
                let version_entry = version_entry?;
                if !version_entry.file_type()?.is_dir() {
                    continue;
                }
                match self.read_info(&version_entry.path()) {
                    Ok(info) => models.push(info),
                    Err(e) => tracing::warn!(
                        "Skipping {}: {}",
                        version_entry.path().display(),
                        e
                    ),
                }
            }
        }
        models.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(models)
    }
}
