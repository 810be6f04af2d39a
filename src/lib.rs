//! # Boost Harness
//!
//! Project-driven data acquisition, text featurization and boosted-tree
//! training behind a small model-serving API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌─────────┐   ┌─────────┐
//! │ Projects │──▶│ Acquirer  │──▶│ Features  │──▶│  GBDT   │──▶│  Store  │
//! │  (TOML)  │   │ zip/web/  │   │ tf-idf +  │   │ trainer │   │ name:ver│
//! └──────────┘   │ crawl/csv │   │ scaling   │   └─────────┘   └────┬────┘
//!                └───────────┘   └───────────┘                      │
//!                                        ┌──────────────────────────┤
//!                                        ▼                          ▼
//!                                  ┌──────────┐              ┌──────────┐
//!                                  │   CLI    │              │   HTTP   │
//!                                  │ (boost)  │              │ service  │
//!                                  └──────────┘              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! boost train --list-projects                 # show configured projects
//! boost train --use-default-dataset           # train on the bundled sample
//! boost train --web-url https://example.com --model-name example
//! boost models list
//! boost serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Application config and environment overrides |
//! | [`models`] | Project bundles and documents |
//! | [`projects`] | Project registry |
//! | [`web`] | HTTP fetching and markup rendering |
//! | [`acquire`] | Data acquisition strategies |
//! | [`crawl`] | Same-host breadth-first crawler |
//! | [`sample`] | Bundled labeled dataset |
//! | [`features`] | Normalization, TF-IDF, scaling, synthetic labels |
//! | [`stopwords`] | English stop-word list |
//! | [`matrix`] | Sparse matrix and labeled dataset |
//! | [`gbdt`] | Boosted-tree trainer and model |
//! | [`store`] | Versioned model store |
//! | [`train`] | Parameter resolution and training executors |
//! | [`service`] | Stateful model service |
//! | [`server`] | HTTP API |

pub mod acquire;
pub mod config;
pub mod crawl;
pub mod errors;
pub mod features;
pub mod gbdt;
pub mod matrix;
pub mod models;
pub mod projects;
pub mod sample;
pub mod server;
pub mod service;
pub mod stopwords;
pub mod store;
pub mod train;
pub mod web;
