//! Offline processing of captured pages into JSONL transcripts.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::TrackerConfig;
use crate::error::BatchError;
use crate::extractor::ConversationExtractor;
use crate::helpers::usage_percent;
use crate::platform::{detect_platform, selectors_for, Platform};
use crate::snapshot::{PageCapture, SnapshotPage};
use crate::tokenizer::TokenEstimator;

/// One processed capture.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub source: String,
    pub platform: Platform,
    pub total_tokens: usize,
    pub context_window: usize,
    pub percent: f64,
    pub conversation: Vec<BatchMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMessage {
    pub from: String,
    pub value: String,
}

/// Records plus the captures that produced none.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub total_captures: usize,
    pub records: Vec<BatchRecord>,
    pub unsupported: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub total_captures: usize,
    pub records: usize,
    pub unsupported: usize,
    pub errors: usize,
    pub total_messages: usize,
    pub total_tokens: usize,
}

/// Every `*.json` file under `root`, sorted.
pub fn discover_capture_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

pub fn load_capture(path: &Path) -> Result<PageCapture, BatchError> {
    let content = fs::read_to_string(path).map_err(|source| BatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| BatchError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Process one capture. `Ok(None)` means the page is not a supported chat.
pub fn process_capture(
    path: &Path,
    estimator: &TokenEstimator,
    config: &TrackerConfig,
) -> Result<Option<BatchRecord>, BatchError> {
    let capture = load_capture(path)?;
    let Some(platform) = detect_platform(&capture.url) else {
        return Ok(None);
    };
    let page = SnapshotPage::from_capture(&capture);
    let extractor = ConversationExtractor::new(selectors_for(platform))?;

    let transcript = extractor.try_extract(&page)?;
    let total_tokens = estimator.estimate(&extractor.recount_text(&page)?);
    let context_window = config.context_window(platform);

    Ok(Some(BatchRecord {
        source: path.to_string_lossy().to_string(),
        platform,
        total_tokens,
        context_window,
        percent: usage_percent(total_tokens, context_window),
        conversation: transcript
            .into_entries()
            .into_iter()
            .map(|entry| BatchMessage {
                from: entry.role.label().to_string(),
                value: entry.text,
            })
            .collect(),
    }))
}

/// Process every capture under `root` in parallel. Failed captures are
/// logged and counted, not fatal.
pub fn process_all_captures(
    root: &Path,
    estimator: &TokenEstimator,
    config: &TrackerConfig,
) -> Result<BatchOutcome, BatchError> {
    let files = discover_capture_files(root);
    if files.is_empty() {
        return Err(BatchError::NoCaptures(root.to_path_buf()));
    }

    let total = files.len();
    let processed = AtomicUsize::new(0);
    let unsupported = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);

    let mut records: Vec<BatchRecord> = files
        .into_par_iter()
        .filter_map(|path| {
            let result = process_capture(&path, estimator, config);
            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 || count == total {
                info!("Processed {}/{} captures...", count, total);
            }
            match result {
                Ok(Some(record)) => Some(record),
                Ok(None) => {
                    unsupported.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(e) => {
                    errors.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), error = %e, "capture failed");
                    None
                }
            }
        })
        .collect();
    records.sort_by(|a, b| a.source.cmp(&b.source));

    let errors = errors.load(Ordering::Relaxed);
    if errors > 0 {
        warn!("{} captures failed to process", errors);
    }

    Ok(BatchOutcome {
        total_captures: total,
        records,
        unsupported: unsupported.load(Ordering::Relaxed),
        errors,
    })
}

/// Write one JSON line per record to `output`.
pub fn write_jsonl_output(outcome: &BatchOutcome, output: &Path) -> Result<BatchSummary, BatchError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(output)?);

    let mut total_messages = 0;
    let mut total_tokens = 0;
    for record in &outcome.records {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        total_messages += record.conversation.len();
        total_tokens += record.total_tokens;
    }
    file.flush()?;

    Ok(BatchSummary {
        total_captures: outcome.total_captures,
        records: outcome.records.len(),
        unsupported: outcome.unsupported,
        errors: outcome.errors,
        total_messages,
        total_tokens,
    })
}
