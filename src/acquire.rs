//! Data acquisition strategies.
//!
//! [`DataAcquirer`] turns a [`DataSourceKind`] and an optional URL into
//! training input:
//!
//! | Kind | Result |
//! |------|--------|
//! | `fixed-sample` | the bundled labeled dataset, no text processing |
//! | `archive-url` | one document per eligible file in a downloaded zip |
//! | `web-page` | one document with the page rendered as text |
//! | `crawl` | one document per same-host page, breadth-first |
//!
//! Any network failure aborts the whole acquisition.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::config::AcquireConfig;
use crate::crawl::crawl_site;
use crate::errors::AcquireError;
use crate::matrix::LabeledDataset;
use crate::models::{DataSourceKind, Document};
use crate::sample::load_sample;
use crate::web::WebClient;

const INCLUDE_GLOBS: &[&str] = &["**/*.*"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/node_modules/**", "**/target/**"];

/// Output of one acquisition.
#[derive(Debug)]
pub enum Acquired {
    /// Ready-to-train numeric data.
    Sample(LabeledDataset),
    /// Raw text that still has to go through the feature pipeline.
    Documents(Vec<Document>),
}

enum WorkDir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Fixed(path) => path,
        }
    }
}

pub struct DataAcquirer {
    web: Arc<dyn WebClient>,
    work_dir: WorkDir,
    include: GlobSet,
    exclude: GlobSet,
}

impl DataAcquirer {
    /// Create an acquirer. Without a configured `work_dir`, downloads go to a
    /// temporary directory that is removed when the acquirer is dropped.
    pub fn new(web: Arc<dyn WebClient>, config: &AcquireConfig) -> Result<Self, AcquireError> {
        let work_dir = match &config.work_dir {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                WorkDir::Fixed(path.clone())
            }
            None => WorkDir::Temp(tempfile::Builder::new().prefix("boost-").tempdir()?),
        };

        Ok(Self {
            web,
            work_dir,
            include: build_globset(INCLUDE_GLOBS)?,
            exclude: build_globset(EXCLUDE_GLOBS)?,
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn acquire(
        &self,
        kind: DataSourceKind,
        url: Option<&str>,
        max_pages: usize,
    ) -> Result<Acquired, AcquireError> {
        match kind {
            DataSourceKind::FixedSample => {
                tracing::info!("Using the bundled sample dataset");
                Ok(Acquired::Sample(load_sample()?))
            }
            DataSourceKind::ArchiveUrl => {
                let url = require_url(kind, url)?;
                Ok(Acquired::Documents(self.archive(url)?))
            }
            DataSourceKind::WebPage => {
                let url = require_url(kind, url)?;
                Ok(Acquired::Documents(vec![self.web_page(url)?]))
            }
            DataSourceKind::Crawl => {
                let url = require_url(kind, url)?;
                Ok(Acquired::Documents(self.crawl(url, max_pages)?))
            }
        }
    }

    /// Download a zip archive, unpack it and read every eligible file.
    pub fn archive(&self, url: &str) -> Result<Vec<Document>, AcquireError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let archive_path = self.work_dir().join(format!("archive-{}.zip", run_id));
        let extract_dir = self.work_dir().join(format!("extract-{}", run_id));

        self.web.download(url, &archive_path)?;

        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        tracing::info!(
            entries = archive.len(),
            "Extracting {}",
            archive_path.display()
        );
        archive.extract(&extract_dir)?;

        let documents = self.read_tree(&extract_dir)?;
        tracing::info!("Read {} documents from {}", documents.len(), url);
        Ok(documents)
    }

    /// Fetch a single page and render it as text.
    pub fn web_page(&self, url: &str) -> Result<Document, AcquireError> {
        let markup = self.web.fetch_page(url)?;
        let body = self.web.html_to_text(&markup)?;
        Ok(Document {
            source_id: url.to_string(),
            title: None,
            body,
        })
    }

    pub fn crawl(&self, seed: &str, max_pages: usize) -> Result<Vec<Document>, AcquireError> {
        crawl_site(self.web.as_ref(), seed, max_pages)?
            .into_iter()
            .map(|page| {
                let body = self.web.html_to_text(&page.markup)?;
                Ok(Document {
                    source_id: page.url,
                    title: None,
                    body,
                })
            })
            .collect()
    }

    fn read_tree(&self, root: &Path) -> Result<Vec<Document>, AcquireError> {
        let mut documents = Vec::new();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let body = match std::fs::read(path).map(String::from_utf8) {
                Ok(Ok(body)) => body,
                Ok(Err(_)) => {
                    tracing::warn!("Skipping {}: not valid UTF-8", rel_str);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", rel_str, e);
                    continue;
                }
            };

            documents.push(Document {
                title: path.file_name().map(|n| n.to_string_lossy().to_string()),
                source_id: rel_str,
                body,
            });
        }

        documents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(documents)
    }
}

fn require_url(kind: DataSourceKind, url: Option<&str>) -> Result<&str, AcquireError> {
    match url.map(str::trim) {
        Some(u) if !u.is_empty() => Ok(u),
        _ => Err(AcquireError::MissingUrl(kind.to_string())),
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet, AcquireError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    #[derive(Default)]
    struct FakeWeb {
        pages: HashMap<String, String>,
        archive: Option<Vec<u8>>,
    }

    impl WebClient for FakeWeb {
        fn fetch_page(&self, url: &str) -> Result<String, AcquireError> {
            self.pages.get(url).cloned().ok_or(AcquireError::Status {
                url: url.to_string(),
                status: 500,
            })
        }

        fn download(&self, url: &str, dest: &Path) -> Result<u64, AcquireError> {
            let bytes = self.archive.as_ref().ok_or(AcquireError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            std::fs::write(dest, bytes)?;
            Ok(bytes.len() as u64)
        }

        fn html_to_text(&self, markup: &str) -> Result<String, AcquireError> {
            Ok(markup.replace("<p>", "").replace("</p>", ""))
        }
    }

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn acquirer(web: FakeWeb) -> DataAcquirer {
        DataAcquirer::new(Arc::new(web), &AcquireConfig::default()).unwrap()
    }

    #[test]
    fn fixed_sample_returns_bundled_dataset() {
        let acq = acquirer(FakeWeb::default());
        match acq.acquire(DataSourceKind::FixedSample, None, 10).unwrap() {
            Acquired::Sample(ds) => assert_eq!(ds.len(), 80),
            other => panic!("expected sample, got {:?}", other),
        }
    }

    #[test]
    fn archive_reads_eligible_files_sorted() {
        let archive = zip_of(&[
            ("repo-main/src/lib.rs", b"pub fn hello() {}"),
            ("repo-main/README.md", b"# Hello"),
            ("repo-main/Makefile", b"all:"),
            ("repo-main/.git/config", b"[core]"),
            ("repo-main/node_modules/x/index.js", b"x"),
            ("repo-main/target/debug/out.txt", b"y"),
            ("repo-main/logo.bin", &[0xff, 0xfe, 0x00]),
        ]);
        let acq = acquirer(FakeWeb {
            archive: Some(archive),
            ..Default::default()
        });

        let docs = acq.archive("https://example.com/repo.zip").unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["repo-main/README.md", "repo-main/src/lib.rs"]);
        assert_eq!(docs[0].title.as_deref(), Some("README.md"));
        assert_eq!(docs[1].body, "pub fn hello() {}");
    }

    #[test]
    fn archive_download_failure_aborts() {
        let acq = acquirer(FakeWeb::default());
        let err = acq.archive("https://example.com/missing.zip").unwrap_err();
        assert!(matches!(err, AcquireError::Status { status: 404, .. }));
    }

    #[test]
    fn configured_work_dir_keeps_downloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = AcquireConfig {
            work_dir: Some(tmp.path().join("work")),
            ..Default::default()
        };
        let web = FakeWeb {
            archive: Some(zip_of(&[("a.txt", b"alpha")])),
            ..Default::default()
        };
        let acq = DataAcquirer::new(Arc::new(web), &config).unwrap();
        let docs = acq.archive("https://example.com/a.zip").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, "a.txt");

        let zips = std::fs::read_dir(tmp.path().join("work"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "zip"))
            .count();
        assert_eq!(zips, 1);
    }

    #[test]
    fn web_page_yields_one_document() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            "<p>Hello world</p>".to_string(),
        );
        let acq = acquirer(FakeWeb {
            pages,
            ..Default::default()
        });

        match acq
            .acquire(DataSourceKind::WebPage, Some("https://example.com/"), 10)
            .unwrap()
        {
            Acquired::Documents(docs) => {
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].body, "Hello world");
                assert_eq!(docs[0].source_id, "https://example.com/");
            }
            other => panic!("expected documents, got {:?}", other),
        }
    }

    #[test]
    fn crawl_converts_each_page() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            r#"<p>root</p><a href="/next">next</a>"#.to_string(),
        );
        pages.insert(
            "https://example.com/next".to_string(),
            "<p>second</p>".to_string(),
        );
        let acq = acquirer(FakeWeb {
            pages,
            ..Default::default()
        });

        let docs = acq.crawl("https://example.com/", 10).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].source_id, "https://example.com/next");
        assert_eq!(docs[1].body, "second");
    }

    #[test]
    fn missing_url_is_rejected() {
        let acq = acquirer(FakeWeb::default());
        for kind in [
            DataSourceKind::ArchiveUrl,
            DataSourceKind::WebPage,
            DataSourceKind::Crawl,
        ] {
            assert!(matches!(
                acq.acquire(kind, Some("  "), 10),
                Err(AcquireError::MissingUrl(_))
            ));
        }
    }
}
