//! `/registrations`: registration attempts recovered from local log files.
//!
//! Log files are named `btt_register_sn<subnet>_ck<coldkey>-hk<hotkey>.log`.
//! Every line carrying the green `Registered` marker is one registration;
//! its cost is taken from the nearest preceding `The cost to register`
//! line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_core::{FetchError, QueryRequest};
use mirror_storage::Fetcher;
use once_cell::sync::Lazy;
use regex::Regex;

use super::table::csv_record;

pub const PATH: &str = "/registrations";
const SOURCE_NAME: &str = "registrations";

const REGISTERED_MARKER: &str = "[32mRegistered";
const COST_MARKER: &str = "The cost to register";
const HEADER: [&str; 7] = [
    "Subnet",
    "ColdKey",
    "HotKey",
    "Cost",
    "Line",
    "ModifiedTime",
    "Filename",
];

static LOG_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^btt_register_sn(\d+)_ck(\d+)-hk(\d+)\.log$").expect("Invalid log name regex")
});
static COST: Lazy<Regex> = Lazy::new(|| Regex::new(r"τ\s*([\d.]+)").expect("Invalid cost regex"));

/// One registration found in a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub subnet: String,
    pub coldkey: String,
    pub hotkey: String,
    pub cost: String,
    /// 1-based line number of the marker.
    pub line: usize,
    pub modified: String,
    pub filename: String,
}

impl Registration {
    fn dedup_key(&self) -> (String, String, String, String, usize) {
        (
            self.subnet.clone(),
            self.coldkey.clone(),
            self.hotkey.clone(),
            self.cost.clone(),
            self.line,
        )
    }

    fn to_csv(&self) -> String {
        csv_record(&[
            self.subnet.clone(),
            self.coldkey.clone(),
            self.hotkey.clone(),
            self.cost.clone(),
            self.line.to_string(),
            self.modified.clone(),
            self.filename.clone(),
        ])
    }
}

/// `(cost, line)` for every registration in one log's contents.
pub fn parse_log(contents: &str) -> Vec<(String, usize)> {
    let lines: Vec<&str> = contents.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(REGISTERED_MARKER))
        .map(|(i, _)| {
            let cost = lines[..i]
                .iter()
                .rev()
                .find(|l| l.contains(COST_MARKER))
                .and_then(|l| COST.captures(l))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "N/A".to_string());
            (cost, i + 1)
        })
        .collect()
}

/// Scan `dir` for registration logs.
///
/// Results are deduplicated and sorted by file name, then line.
pub fn scan_directory(dir: &Path) -> Result<Vec<Registration>, FetchError> {
    let entries = std::fs::read_dir(dir).map_err(|e| FetchError::Upstream {
        source_name: SOURCE_NAME.to_string(),
        reason: format!("cannot read {}: {}", dir.display(), e),
    })?;

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let filename = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = LOG_NAME.captures(&filename) else {
            continue;
        };
        let path = entry.path();
        let (contents, modified) = match read_log(&path) {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable registration log");
                continue;
            }
        };

        for (cost, line) in parse_log(&contents) {
            let registration = Registration {
                subnet: caps[1].to_string(),
                coldkey: caps[2].to_string(),
                hotkey: caps[3].to_string(),
                cost,
                line,
                modified: modified.clone(),
                filename: filename.clone(),
            };
            if seen.insert(registration.dedup_key()) {
                found.push(registration);
            }
        }
    }

    found.sort_by(|a, b| a.filename.cmp(&b.filename).then(a.line.cmp(&b.line)));
    Ok(found)
}

fn read_log(path: &Path) -> std::io::Result<(String, String)> {
    let bytes = std::fs::read(path)?;
    let modified: DateTime<Utc> = std::fs::metadata(path)?.modified()?.into();
    Ok((
        String::from_utf8_lossy(&bytes).into_owned(),
        modified.format("%Y-%m-%d %H:%M:%S").to_string(),
    ))
}

/// Render registrations as CSV; empty when there are none.
pub fn to_csv(registrations: &[Registration]) -> String {
    if registrations.is_empty() {
        return String::new();
    }
    let mut csv = csv_record(&HEADER);
    for registration in registrations {
        csv.push_str(&registration.to_csv());
    }
    csv
}

#[derive(Debug, Clone)]
pub struct RegistrationsSource {
    log_dir: PathBuf,
}

impl RegistrationsSource {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl Fetcher for RegistrationsSource {
    async fn fetch(&self, _request: &QueryRequest) -> Result<String, FetchError> {
        let dir = self.log_dir.clone();
        let registrations = tokio::task::spawn_blocking(move || scan_directory(&dir))
            .await
            .map_err(|e| FetchError::Upstream {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("scan task failed: {}", e),
            })??;
        Ok(to_csv(&registrations))
    }
}
