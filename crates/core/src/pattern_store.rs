// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Persistent store of per-process ready/busy patterns.
//!
//! Patterns are kept as raw DSL strings (never persisted compiled) in a
//! nested map `process -> state -> [pattern]`, loaded from and atomically
//! rewritten to a TOML file. A process name of `""` or `"ssh"` is treated
//! as an escape hatch: when matching against it, every known process's
//! patterns are tried in turn rather than just one.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dsl::compile_dsl;

/// Readiness label a pattern can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternState {
    Ready,
    Busy,
}

impl PatternState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Busy => "busy",
        }
    }
}

impl std::str::FromStr for PatternState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "busy" => Ok(Self::Busy),
            other => Err(format!("unknown pattern state: {other}")),
        }
    }
}

/// Process name treated as a transparent proxy: its own patterns (if any)
/// are tried, but if nothing matches, all known processes are consulted.
pub const PROXY_PROCESS: &str = "ssh";

/// A single ready/busy pattern for a given process.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub raw: String,
    pub process: String,
    pub state: PatternState,
}

impl Pattern {
    /// Split into per-line DSL strings, trimming leading/trailing blank
    /// lines off the pattern body (not individual lines).
    fn dsl_lines(&self) -> Vec<&str> {
        self.raw.trim_matches('\n').split('\n').collect()
    }

    /// Match against `output`: a single-line pattern matches if any output
    /// line matches; a multi-line pattern matches iff there is a
    /// contiguous run of output lines, in order, each matching the
    /// corresponding pattern line. Every line (pattern and output) is
    /// right-trimmed before matching.
    pub fn matches(&self, output: &str) -> bool {
        let pattern_lines = self.dsl_lines();
        let output_lines: Vec<&str> =
            output.trim_end_matches('\n').split('\n').map(|l| l.trim_end()).collect();

        if output_lines.len() < pattern_lines.len() {
            return false;
        }

        let compiled: Vec<_> = match pattern_lines.iter().map(|l| compile_dsl(l)).collect() {
            Ok(c) => c,
            Err(_) => return false,
        };

        if compiled.len() == 1 {
            return output_lines.iter().any(|line| compiled[0].is_match(line));
        }

        for start in 0..=(output_lines.len() - compiled.len()) {
            if compiled.iter().enumerate().all(|(i, re)| re.is_match(output_lines[start + i])) {
                return true;
            }
        }
        false
    }
}

/// On-disk shape: `process -> state -> [raw pattern]`.
type PatternFile = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Persistent mapping of process name to ready/busy patterns.
#[derive(Debug)]
pub struct PatternStore {
    path: PathBuf,
    patterns: PatternFile,
}

impl PatternStore {
    /// Load from `path`. A missing or unparseable file resets the store to
    /// empty rather than failing daemon startup.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let patterns = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| match toml::from_str::<PatternFile>(&s) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "pattern store parse error, resetting to empty");
                    None
                }
            })
            .unwrap_or_default();
        Self { path, patterns }
    }

    /// Atomically rewrite the backing file (write to a temp file in the
    /// same directory, then rename over the target).
    fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized =
            toml::to_string_pretty(&self.patterns).map_err(std::io::Error::other)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile_in(dir)?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.flush()?;
        let tmp_path = tmp.path().to_owned();
        tmp.persist(&self.path)?;
        let _ = tmp_path; // path consumed by persist
        Ok(())
    }

    pub fn add(&mut self, process: &str, raw: &str, state: PatternState) -> std::io::Result<()> {
        self.patterns
            .entry(process.to_owned())
            .or_default()
            .entry(state.as_str().to_owned())
            .or_default()
            .push(raw.to_owned());
        self.save()
    }

    /// Remove a pattern. A no-op for a pattern that isn't present — this
    /// does not trigger a save.
    pub fn remove(&mut self, process: &str, raw: &str, state: PatternState) -> std::io::Result<()> {
        let Some(by_state) = self.patterns.get_mut(process) else { return Ok(()) };
        let Some(list) = by_state.get_mut(state.as_str()) else { return Ok(()) };
        let before = list.len();
        list.retain(|p| p != raw);
        if list.len() == before {
            return Ok(());
        }
        if list.is_empty() {
            by_state.remove(state.as_str());
        }
        if by_state.is_empty() {
            self.patterns.remove(process);
        }
        self.save()
    }

    /// Patterns for a single process, keyed by state label.
    pub fn get(&self, process: &str) -> BTreeMap<String, Vec<String>> {
        self.patterns.get(process).cloned().unwrap_or_default()
    }

    /// All patterns for every known process.
    pub fn all(&self) -> PatternFile {
        self.patterns.clone()
    }

    /// Match `output` against patterns for `process`. Ready patterns are
    /// tried before busy ones so a concurrent double-match favors ready.
    /// When `process` is empty or [`PROXY_PROCESS`], every known process
    /// is tried in map order until one matches.
    pub fn match_output(&self, process: &str, output: &str) -> Option<PatternState> {
        if process.is_empty() || process == PROXY_PROCESS {
            return self.patterns.keys().find_map(|p| self.match_process(p, output));
        }
        self.match_process(process, output)
    }

    fn match_process(&self, process: &str, output: &str) -> Option<PatternState> {
        let by_state = self.patterns.get(process)?;
        for state in [PatternState::Ready, PatternState::Busy] {
            let Some(list) = by_state.get(state.as_str()) else { continue };
            for raw in list {
                let pattern =
                    Pattern { raw: raw.clone(), process: process.to_owned(), state };
                if pattern.matches(output) {
                    return Some(state);
                }
            }
        }
        None
    }
}

/// Minimal write-temp-then-rename helper so we don't need the `tempfile`
/// crate as a runtime dependency just for this one atomic write.
struct TempPersist {
    file: std::fs::File,
    path: PathBuf,
}

impl TempPersist {
    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(self, dest: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, dest)
    }
}

impl std::io::Write for TempPersist {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn tempfile_in(dir: &Path) -> std::io::Result<TempPersist> {
    let pid = std::process::id();
    let nonce: u32 = rand::random();
    let path = dir.join(format!(".patterns-{pid}-{nonce:x}.tmp"));
    let file = std::fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
    Ok(TempPersist { file, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trip_save_load_is_bit_for_bit() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("patterns.toml");
        let mut store = PatternStore::load(&path);
        store.add("bash", "[$ ]$", PatternState::Ready).expect("add");
        store.add("bash", "[Running]", PatternState::Busy).expect("add");

        let reloaded = PatternStore::load(&path);
        assert_eq!(reloaded.all(), store.all());
    }

    #[test]
    fn add_then_remove_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("patterns.toml");
        let mut store = PatternStore::load(&path);
        let before = store.all();
        store.add("bash", "[$ ]$", PatternState::Ready).expect("add");
        store.remove("bash", "[$ ]$", PatternState::Ready).expect("remove");
        assert_eq!(store.all(), before);
    }

    #[test]
    fn remove_of_missing_pattern_is_silent_noop() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("patterns.toml");
        let mut store = PatternStore::load(&path);
        store.remove("bash", "nope", PatternState::Ready).expect("remove");
        assert!(store.all().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_resets_to_empty_without_panicking() {
        let store = PatternStore::load("/nonexistent/path/patterns.toml");
        assert!(store.all().is_empty());
    }

    #[test]
    fn ready_wins_over_busy_on_tie() {
        let mut store = PatternStore::load_in_memory_for_test();
        store.patterns.entry("x".into()).or_default().insert("ready".into(), vec!["[ok]".into()]);
        store.patterns.entry("x".into()).or_default().insert("busy".into(), vec!["[ok]".into()]);
        assert_eq!(store.match_output("x", "ok"), Some(PatternState::Ready));
    }

    #[test]
    fn unknown_process_falls_back_to_all() {
        let mut store = PatternStore::load_in_memory_for_test();
        store.patterns.entry("node".into()).or_default().insert("ready".into(), vec!["[$ ]$".into()]);
        assert_eq!(store.match_output("ssh", "prompt $ "), Some(PatternState::Ready));
        assert_eq!(store.match_output("", "prompt $ "), Some(PatternState::Ready));
    }

    #[test]
    fn multiline_pattern_requires_contiguous_lines_in_order() {
        let pattern = Pattern {
            raw: "VITE v5\n  \u{27a4}  Local".to_owned(),
            process: "node".to_owned(),
            state: PatternState::from_str("ready").expect("parse"),
        };
        assert!(pattern
            .matches("VITE v5.0.0 ready\n  \u{27a4}  Local:   http://localhost:5173/"));
        assert!(!pattern
            .matches("VITE v5.0.0 ready\n  \u{27a4}  Network: disabled"));
    }

    impl PatternStore {
        fn load_in_memory_for_test() -> Self {
            Self { path: PathBuf::from("/dev/null/unused"), patterns: Default::default() }
        }
    }
}
