//! credsweep-core — the scan pipeline behind the `credsweep` CLI.
//!
//! This crate owns the machinery that turns a set of repositories into a
//! stream of findings: provider enumeration and pagination, the
//! bounded-concurrency job/artifact queue, archive decomposition, and the
//! hybrid regex + verifier detection engine. Command-line parsing, logging
//! setup, and the terminal report rendering live in `credsweep-cli`.

pub mod archive;
pub mod artifact;
pub mod config;
pub mod detect;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod report;
pub mod rules;
pub mod session;

pub use config::ScanConfig;
pub use detect::{detect, Finding};
pub use error::CredsweepError;
pub use orchestrator::ScanOrchestrator;
pub use report::{FindingContext, Reporter};
pub use rules::{Confidence, Pattern, RuleStore};
pub use session::ScanSession;
