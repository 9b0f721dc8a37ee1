// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Workspace discovery and whole-run orchestration.
//!
//! The input is either a single JSON file or a workspace storage directory.
//!
//! A file holding a JSON list is a multi-workspace dump: each entry
//! (`{ workspaceInfo, chatData }`) is its own workspace, named after the
//! basename of `workspaceInfo.folder`. Any other file is one workspace named
//! after the file stem.
//!
//! The immediate children of a storage directory are candidate workspaces.
//! A child is exported when it holds at least one recognized artifact:
//!
//! - [`CHAT_DATA_FILE`]: a `{ tabs, composers }` dump
//! - [`COMPOSER_DATA_FILE`]: composer sessions, merged in as `composers`
//! - [`CHAT_SESSIONS_DIR`]`/*.json`: chat session files, appended to `tabs`
//! - [`EDITING_SESSIONS_DIR`]`/*/`[`EDITING_STATE_FILE`]: editing session
//!   states, appended to `editingSessions`
//!
//! Children without any of them are skipped. A workspace that fails to load
//! or export is recorded in the [`RunReport`] and does not stop its siblings.

use crate::exporter::{
    self, OutputLayout, WorkspaceError, WorkspaceInfo, WorkspaceSummary, safe_filename,
    with_suffix,
};
use crate::renderer::RenderOptions;
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Pre-extracted chat data inside a workspace directory.
pub const CHAT_DATA_FILE: &str = "chatdata.json";

/// Pre-extracted composer data inside a workspace directory.
pub const COMPOSER_DATA_FILE: &str = "composerdata.json";

/// Directory of chat session files inside a workspace directory.
pub const CHAT_SESSIONS_DIR: &str = "chatSessions";

/// Directory of editing sessions, one subdirectory per session.
pub const EDITING_SESSIONS_DIR: &str = "chatEditingSessions";

/// State file inside each editing session directory.
pub const EDITING_STATE_FILE: &str = "state.json";

/// Workspace metadata naming the project folder.
pub const WORKSPACE_META_FILE: &str = "workspace.json";

/// Children of the storage directory that never hold a workspace.
const SKIPPED_DIRS: &[&str] = &["images"];

/// Error type for failures that abort the whole run.
#[derive(Debug, Snafu)]
pub enum DriverError {
    /// The input path does not exist.
    #[snafu(display("input path not found: {}", path.display()))]
    InputNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The output directory tree could not be created.
    #[snafu(display("failed to create output directory {}: {source}", path.display()))]
    CreateOutputDir {
        /// The output root.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// Error type for workspace artifacts that cannot be loaded.
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// An artifact could not be read.
    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        /// The artifact path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// An artifact is not valid JSON.
    #[snafu(display("failed to parse {}: {source}", path.display()))]
    ParseJson {
        /// The artifact path.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// Error type for a workspace that produced no output.
#[derive(Debug, Snafu)]
pub enum SourceError {
    /// The workspace artifacts could not be loaded.
    #[snafu(display("{source}"))]
    Load {
        /// The underlying load error.
        source: LoadError,
    },

    /// The workspace could not be exported.
    #[snafu(display("{source}"))]
    Export {
        /// The underlying export error.
        source: WorkspaceError,
    },
}

/// The files a workspace is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifacts {
    /// A single JSON file holding the whole workspace.
    Dump(PathBuf),

    /// One entry of a multi-workspace dump, already parsed.
    Entry(Value),

    /// Artifacts found in a workspace storage directory.
    Storage {
        /// The chat data dump, if present.
        chat_data: Option<PathBuf>,
        /// The composer data dump, if present.
        composer_data: Option<PathBuf>,
        /// Chat session files, sorted by name.
        sessions: Vec<PathBuf>,
        /// Editing session state files, sorted by session directory.
        editing_sessions: Vec<PathBuf>,
    },
}

/// A discovered workspace and where to read it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSource {
    /// Name and metadata for the output.
    pub info: WorkspaceInfo,

    /// Files to load.
    pub artifacts: Artifacts,
}

/// A workspace that produced no output, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFailure {
    /// Workspace name.
    pub workspace: String,

    /// Why it failed.
    pub message: String,
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Summaries of exported workspaces, in discovery order.
    pub summaries: Vec<WorkspaceSummary>,

    /// Workspaces that failed entirely.
    pub failures: Vec<WorkspaceFailure>,
}

impl RunReport {
    /// Returns `true` if at least one workspace was exported, even partially.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.summaries.is_empty()
    }

    /// Total conversations written across all workspaces.
    #[must_use]
    pub fn exported_conversations(&self) -> usize {
        self.summaries.iter().map(|s| s.succeeded).sum()
    }

    /// Total conversations that failed across all workspaces.
    #[must_use]
    pub fn failed_conversations(&self) -> usize {
        self.summaries.iter().map(|s| s.failed).sum()
    }
}

/// Exports every workspace found at `input` into `output_dir`.
///
/// # Errors
///
/// Returns an error if `input` does not exist or the output tree cannot be
/// created. Failures of individual workspaces are recorded in the report.
pub fn export_all(
    input: &Path,
    output_dir: &Path,
    opts: &RenderOptions,
) -> Result<RunReport, DriverError> {
    let sources = discover(input)?;

    let layout = OutputLayout::new(output_dir);
    layout
        .create_roots()
        .context(CreateOutputDirSnafu { path: output_dir })?;

    let mut report = RunReport::default();
    for source in &sources {
        match export_source(source, &layout, opts) {
            Ok(summary) => report.summaries.push(summary),
            Err(err) => {
                warn!(workspace = %source.info.name, "{err}");
                report.failures.push(WorkspaceFailure {
                    workspace: source.info.name.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

fn export_source(
    source: &WorkspaceSource,
    layout: &OutputLayout,
    opts: &RenderOptions,
) -> Result<WorkspaceSummary, SourceError> {
    let raw = load_workspace(&source.artifacts).context(LoadSnafu)?;
    exporter::export_workspace(&source.info, &raw, layout, opts).context(ExportSnafu)
}

/// Finds the workspaces at `input`.
///
/// # Errors
///
/// Returns [`DriverError::InputNotFound`] if `input` does not exist.
pub fn discover(input: &Path) -> Result<Vec<WorkspaceSource>, DriverError> {
    ensure!(input.exists(), InputNotFoundSnafu { path: input });

    if !input.is_dir() {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = safe_filename(&stem);

        // Anything but a list stays one workspace, so read errors are
        // reported against it when it is loaded.
        if let Ok(Value::Array(entries)) = read_json(input) {
            info!(workspaces = entries.len(), "reading multi-workspace dump");
            return Ok(dump_entries(input, &stem, entries));
        }
        return Ok(vec![WorkspaceSource {
            info: WorkspaceInfo {
                name: stem,
                id: None,
                storage_path: Some(input.display().to_string()),
            },
            artifacts: Artifacts::Dump(input.to_path_buf()),
        }]);
    }

    let mut used_names = HashSet::new();
    let mut sources = Vec::new();

    let children = WalkDir::new(input)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in children {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type().is_dir() || SKIPPED_DIRS.contains(&dir_name.as_str()) {
            continue;
        }

        let Some(artifacts) = probe_artifacts(entry.path()) else {
            debug!(dir = %entry.path().display(), "no chat data, skipping");
            continue;
        };

        let base = workspace_folder_name(entry.path()).unwrap_or_else(|| dir_name.clone());
        let name = unique_name(&mut used_names, &safe_filename(&base), &dir_name);
        info!(workspace = %name, dir = %dir_name, "found workspace");

        sources.push(WorkspaceSource {
            info: WorkspaceInfo {
                name,
                id: Some(dir_name),
                storage_path: Some(entry.path().display().to_string()),
            },
            artifacts,
        });
    }

    Ok(sources)
}

/// Splits a multi-workspace dump into one source per entry.
///
/// Entries are named after their project folder, falling back to
/// `{stem}-{n}` with `n` counting from 1.
fn dump_entries(path: &Path, stem: &str, entries: Vec<Value>) -> Vec<WorkspaceSource> {
    let mut used_names = HashSet::new();

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let position = (i + 1).to_string();
            let meta = entry.get("workspaceInfo");
            let base = meta
                .and_then(folder_basename)
                .unwrap_or_else(|| format!("{stem}-{position}"));
            let name = unique_name(&mut used_names, &safe_filename(&base), &position);
            let id = meta
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            info!(workspace = %name, entry = i, "found workspace");

            WorkspaceSource {
                info: WorkspaceInfo {
                    name,
                    id,
                    storage_path: Some(path.display().to_string()),
                },
                artifacts: Artifacts::Entry(entry),
            }
        })
        .collect()
}

/// Reads a workspace's artifacts into one raw JSON value.
///
/// Storage artifacts are merged: composer data becomes `composers` unless the
/// chat data already has one, every chat session file is appended to `tabs`
/// and every editing session state to `editingSessions`. A chat data root that is not an object is returned unchanged so
/// the normalizer can reject it.
///
/// # Errors
///
/// Returns an error if any artifact cannot be read or parsed.
pub fn load_workspace(artifacts: &Artifacts) -> Result<Value, LoadError> {
    let (chat_data, composer_data, sessions, editing_sessions) = match artifacts {
        Artifacts::Dump(path) => return read_json(path),
        Artifacts::Entry(entry) => return Ok(entry.clone()),
        Artifacts::Storage {
            chat_data,
            composer_data,
            sessions,
            editing_sessions,
        } => (chat_data, composer_data, sessions, editing_sessions),
    };

    let mut data = match chat_data {
        Some(path) => read_json(path)?,
        None => Value::Object(Map::new()),
    };
    if let Some(root) = data.as_object_mut() {
        merge_storage(root, composer_data.as_deref(), sessions, editing_sessions)?;
    }

    Ok(data)
}

fn merge_storage(
    root: &mut Map<String, Value>,
    composer_data: Option<&Path>,
    sessions: &[PathBuf],
    editing_sessions: &[PathBuf],
) -> Result<(), LoadError> {
    if let Some(path) = composer_data
        && !root.contains_key("composers")
    {
        root.insert("composers".to_owned(), read_json(path)?);
    }

    append_files(root, "tabs", sessions)?;
    append_files(root, "editingSessions", editing_sessions)
}

/// Appends each file's JSON to the list stored under `key`.
fn append_files(
    root: &mut Map<String, Value>,
    key: &str,
    paths: &[PathBuf],
) -> Result<(), LoadError> {
    if paths.is_empty() {
        return Ok(());
    }
    match root
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(list) => {
            for path in paths {
                list.push(read_json(path)?);
            }
        }
        _ => warn!(
            field = key,
            files = paths.len(),
            "chat data entry is not a list, ignoring its files"
        ),
    }

    Ok(())
}

fn read_json(path: &Path) -> Result<Value, LoadError> {
    let text = fs::read_to_string(path).context(ReadFileSnafu { path })?;
    serde_json::from_str(&text).context(ParseJsonSnafu { path })
}

fn probe_artifacts(dir: &Path) -> Option<Artifacts> {
    let existing = |name: &str| Some(dir.join(name)).filter(|p| p.is_file());
    let chat_data = existing(CHAT_DATA_FILE);
    let composer_data = existing(COMPOSER_DATA_FILE);

    let sessions: Vec<PathBuf> = WalkDir::new(dir.join(CHAT_SESSIONS_DIR))
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .map(walkdir::DirEntry::into_path)
        .collect();

    let editing_sessions: Vec<PathBuf> = WalkDir::new(dir.join(EDITING_SESSIONS_DIR))
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().join(EDITING_STATE_FILE))
        .filter(|p| p.is_file())
        .collect();

    if chat_data.is_none()
        && composer_data.is_none()
        && sessions.is_empty()
        && editing_sessions.is_empty()
    {
        return None;
    }
    Some(Artifacts::Storage {
        chat_data,
        composer_data,
        sessions,
        editing_sessions,
    })
}

/// Reads the project folder's name from `workspace.json`, if present.
fn workspace_folder_name(dir: &Path) -> Option<String> {
    let text = fs::read_to_string(dir.join(WORKSPACE_META_FILE)).ok()?;
    let meta: Value = serde_json::from_str(&text).ok()?;
    folder_basename(&meta)
}

/// Basename of the `folder` URI in workspace metadata, `file://` stripped.
fn folder_basename(meta: &Value) -> Option<String> {
    let folder = meta
        .get("folder")
        .or_else(|| meta.get("workspace"))?
        .as_str()?;
    let folder = folder.strip_prefix("file://").unwrap_or(folder);

    Path::new(folder.trim_end_matches('/'))
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Returns `base`, or `base-{qualifier}` when a name differing only in case
/// is already used, adding a numeric suffix if that is taken too.
fn unique_name(used: &mut HashSet<String>, base: &str, qualifier: &str) -> String {
    if used.insert(base.to_lowercase()) {
        return base.to_owned();
    }
    let qualified = safe_filename(&format!("{base}-{qualifier}"));
    if used.insert(qualified.to_lowercase()) {
        return qualified;
    }
    let mut n = 1;
    loop {
        n += 1;
        let candidate = with_suffix(&qualified, n);
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
    }
}
