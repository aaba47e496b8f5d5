//! Error types for the core crate.
//!
//! Unsupported pages and missing chat containers are not errors; they are
//! represented as `None` and empty transcripts respectively.

use std::path::PathBuf;

use thiserror::Error;

/// A selector string the matcher cannot parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unexpected character {found:?} at offset {offset} in selector {selector:?}")]
    Unexpected {
        selector: String,
        offset: usize,
        found: char,
    },

    #[error("unterminated attribute selector in {0:?}")]
    UnterminatedAttribute(String),

    #[error("unsupported selector syntax {syntax:?} in {selector:?}")]
    Unsupported { selector: String, syntax: String },
}

/// Failures while reading the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("node is no longer part of the document")]
    Detached,

    #[error("{0}")]
    Host(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizerError {
    #[error("tokenizer unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode text: {0}")]
    Encode(String),
}

/// Failures reported by the summarization backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("free tier limit reached ({current}/{limit} summaries used)")]
    LimitExceeded { limit: u64, current: u64 },

    #[error("gateway returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Failures of the summarize action, each shown to the user.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("There is no text to summarize.")]
    EmptyTranscript,

    #[error("API key not set. Please set it in the options.")]
    MissingCredential,

    #[error("A summary is already being generated.")]
    Busy,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("No page captures found under {0:?}")]
    NoCaptures(PathBuf),

    #[error("failed to read capture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture {path} is not a valid page snapshot: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("failed to read page: {0}")]
    Dom(#[from] DomError),

    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}
