// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Export of a single workspace to Markdown, HTML and a JSON summary.
//!
//! A workspace is normalized once, then every conversation is rendered and
//! written on its own. A conversation that cannot be written is recorded in
//! the summary's `errors` list and the export moves on; only a workspace
//! that cannot be normalized, or whose output directories cannot be created,
//! fails as a whole.
//!
//! # Output Layout
//!
//! ```text
//! <root>/
//!   html/<workspace>/<file>.html
//!   markdown/<workspace>/<file>.md
//!   json/<workspace>.json
//! ```

use crate::html::render_hypertext;
use crate::normalizer::{self, Conversation, ConversationKind, NormalizeError};
use crate::renderer::{RenderOptions, render_markdown};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Maximum length of a generated filename stem, in characters.
pub const MAX_FILENAME_CHARS: usize = 100;

const ILLEGAL_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Error type for failures that abort a whole workspace.
#[derive(Debug, Snafu)]
pub enum WorkspaceError {
    /// The raw workspace data could not be normalized.
    #[snafu(display("malformed data for workspace {workspace}: {source}"))]
    Malformed {
        /// The workspace name.
        workspace: String,
        /// The underlying normalization error.
        source: NormalizeError,
    },

    /// An output directory for the workspace could not be created.
    #[snafu(display("failed to create {}: {source}", path.display()))]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The summary could not be serialized.
    #[snafu(display("failed to serialize summary: {source}"))]
    SerializeSummary {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The summary file could not be written.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteSummary {
        /// The summary path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// Error type for a single conversation that could not be exported.
#[derive(Debug, Snafu)]
pub enum ConversationError {
    /// A rendered file could not be written.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile {
        /// The file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// Identity and location of a workspace being exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    /// Filesystem-safe name used for output directories and the summary file.
    pub name: String,

    /// Identifier of the workspace in the editor's storage, if known.
    pub id: Option<String>,

    /// Where the workspace data was read from.
    pub storage_path: Option<String>,
}

impl WorkspaceInfo {
    /// Creates workspace info with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            storage_path: None,
        }
    }
}

/// The three-way output tree rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a workspace's Markdown files.
    #[must_use]
    pub fn markdown_dir(&self, workspace: &str) -> PathBuf {
        self.root.join("markdown").join(workspace)
    }

    /// Directory holding a workspace's HTML files.
    #[must_use]
    pub fn html_dir(&self, workspace: &str) -> PathBuf {
        self.root.join("html").join(workspace)
    }

    /// Path of a workspace's JSON summary.
    #[must_use]
    pub fn summary_path(&self, workspace: &str) -> PathBuf {
        self.root.join("json").join(format!("{workspace}.json"))
    }

    /// Creates the `html/`, `markdown/` and `json/` roots.
    ///
    /// Existing directories are not an error.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error encountered.
    pub fn create_roots(&self) -> io::Result<()> {
        for dir in ["html", "markdown", "json"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }
}

/// The JSON summary written for each exported workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    /// Workspace name.
    pub workspace: String,

    /// Identifier of the workspace in the editor's storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Where the workspace data was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,

    /// Number of conversations found after normalization.
    pub conversation_count: usize,

    /// Number of conversations written successfully.
    pub succeeded: usize,

    /// Number of conversations that failed.
    pub failed: usize,

    /// Conversations that were written.
    pub exported: Vec<ExportedConversation>,

    /// Conversations that failed, with the reason.
    pub errors: Vec<ConversationFailure>,
}

/// Summary entry for a conversation that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedConversation {
    /// Conversation identifier.
    pub id: String,

    /// Source shape of the conversation.
    pub kind: ConversationKind,

    /// Resolved title.
    pub title: String,

    /// Markdown file, relative to the output root.
    pub markdown_file: String,

    /// HTML file, relative to the output root.
    pub html_file: String,

    /// Number of messages rendered.
    pub message_count: usize,

    /// When the conversation was started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the conversation was last changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Summary entry for a conversation that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFailure {
    /// Identifier of the failed conversation.
    pub conversation_id: String,

    /// Why it failed.
    pub message: String,
}

/// Exports one workspace and writes its JSON summary.
///
/// Conversation-level failures are recorded in the returned summary rather
/// than aborting the export.
///
/// # Errors
///
/// Returns an error if the data cannot be normalized (no file is written),
/// if the workspace's output directories cannot be created, or if the
/// summary cannot be written.
pub fn export_workspace(
    workspace: &WorkspaceInfo,
    raw: &Value,
    layout: &OutputLayout,
    opts: &RenderOptions,
) -> Result<WorkspaceSummary, WorkspaceError> {
    let conversations = normalizer::normalize(raw).context(MalformedSnafu {
        workspace: &workspace.name,
    })?;

    let markdown_dir = layout.markdown_dir(&workspace.name);
    let html_dir = layout.html_dir(&workspace.name);
    for dir in [&markdown_dir, &html_dir] {
        fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
    }

    info!(
        workspace = %workspace.name,
        conversations = conversations.len(),
        "exporting workspace"
    );

    let opts = RenderOptions {
        workspace: Some(workspace.name.clone()),
        ..opts.clone()
    };
    let stems = assign_filenames(&conversations);

    let mut exported = Vec::with_capacity(conversations.len());
    let mut errors = Vec::new();
    for (conversation, stem) in conversations.iter().zip(&stems) {
        match export_conversation(conversation, stem, &markdown_dir, &html_dir, &opts) {
            Ok(()) => exported.push(ExportedConversation {
                id: conversation.id.clone(),
                kind: conversation.kind,
                title: conversation.title.clone(),
                markdown_file: format!("markdown/{}/{stem}.md", workspace.name),
                html_file: format!("html/{}/{stem}.html", workspace.name),
                message_count: conversation.messages.len(),
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
            }),
            Err(err) => {
                warn!(conversation = %conversation.id, "{err}");
                errors.push(ConversationFailure {
                    conversation_id: conversation.id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    let summary = WorkspaceSummary {
        workspace: workspace.name.clone(),
        workspace_id: workspace.id.clone(),
        storage_path: workspace.storage_path.clone(),
        conversation_count: conversations.len(),
        succeeded: exported.len(),
        failed: errors.len(),
        exported,
        errors,
    };

    let path = layout.summary_path(&workspace.name);
    let json = serde_json::to_string_pretty(&summary).context(SerializeSummarySnafu)?;
    fs::write(&path, json).context(WriteSummarySnafu { path: &path })?;
    info!(path = %path.display(), "wrote summary");

    Ok(summary)
}

fn export_conversation(
    conversation: &Conversation,
    stem: &str,
    markdown_dir: &Path,
    html_dir: &Path,
    opts: &RenderOptions,
) -> Result<(), ConversationError> {
    let markdown_path = markdown_dir.join(format!("{stem}.md"));
    fs::write(&markdown_path, render_markdown(conversation, opts)).context(WriteFileSnafu {
        path: &markdown_path,
    })?;

    let html_path = html_dir.join(format!("{stem}.html"));
    if let Err(source) = fs::write(&html_path, render_hypertext(conversation, opts)) {
        // A failed conversation leaves no half-written pair behind.
        if let Err(err) = fs::remove_file(&markdown_path) {
            warn!(path = %markdown_path.display(), "failed to remove partial export: {err}");
        }
        return Err(ConversationError::WriteFile {
            path: html_path,
            source,
        });
    }

    info!(path = %markdown_path.display(), "wrote conversation");
    Ok(())
}

/// Turns arbitrary text into a filename stem that is legal on common
/// filesystems.
///
/// Characters illegal on Windows or Unix (`/ \ : * ? " < > |`) and control
/// characters become `_`, whitespace runs become a single `-`, leading and
/// trailing separators and dots are dropped, and the result is cut to
/// [`MAX_FILENAME_CHARS`] characters. Empty results become `untitled`.
///
/// # Example
///
/// ```
/// use cursor_export::exporter::safe_filename;
///
/// assert_eq!(safe_filename("What is  Rust?"), "What-is-Rust");
/// assert_eq!(safe_filename("a/b:c"), "a_b_c");
/// assert_eq!(safe_filename("   "), "untitled");
/// ```
#[must_use]
pub fn safe_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for c in raw.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push('-');
        }
        pending_space = false;

        if c.is_control() || ILLEGAL_FILENAME_CHARS.contains(&c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    let truncated: String = trim_separators(&out)
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    let stem = trim_separators(&truncated);

    if stem.is_empty() {
        "untitled".to_owned()
    } else {
        stem.to_owned()
    }
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c: char| matches!(c, '.' | '-' | '_'))
}

/// Assigns each conversation a distinct filename stem.
///
/// The base stem is [`safe_filename`] of `"{id}--{title}"`. When several
/// conversations share a base stem, each of them gets a `-1`, `-2`, ...
/// suffix in encounter order, skipping any name that is already taken.
/// Stems are compared ignoring case, since common filesystems do.
#[must_use]
pub fn assign_filenames(conversations: &[Conversation]) -> Vec<String> {
    let stems: Vec<String> = conversations
        .iter()
        .map(|c| safe_filename(&format!("{}--{}", c.id, c.title)))
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.to_lowercase()).or_default() += 1;
    }

    let mut taken: HashSet<String> = counts
        .iter()
        .filter(|&(_, &count)| count == 1)
        .map(|(key, _)| key.clone())
        .collect();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();

    stems
        .into_iter()
        .map(|stem| {
            let key = stem.to_lowercase();
            if counts[&key] == 1 {
                return stem;
            }
            let suffix = next_suffix.entry(key).or_default();
            loop {
                *suffix += 1;
                let candidate = with_suffix(&stem, *suffix);
                if taken.insert(candidate.to_lowercase()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// Appends `-{n}` to a stem, shortening the stem so the result stays within
/// [`MAX_FILENAME_CHARS`].
pub(crate) fn with_suffix(stem: &str, n: usize) -> String {
    let suffix = format!("-{n}");
    let keep = MAX_FILENAME_CHARS.saturating_sub(suffix.len());
    let base: String = stem.chars().take(keep).collect();
    format!("{base}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn conversation(id: &str, title: &str) -> Conversation {
        Conversation {
            id: id.into(),
            kind: ConversationKind::ChatSession,
            title: title.into(),
            created_at: None,
            updated_at: None,
            messages: Vec::new(),
        }
    }

    fn setup() -> (TempDir, OutputLayout) {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        layout.create_roots().unwrap();
        (dir, layout)
    }

    #[test]
    fn replaces_illegal_characters() {
        assert_eq!(safe_filename(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(safe_filename("tab\u{7}bell"), "tab_bell");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(safe_filename("  many \t\n spaces  here "), "many-spaces-here");
    }

    #[test]
    fn truncates_long_names() {
        let name = safe_filename(&"é".repeat(300));
        assert_eq!(name.chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn trims_dots_and_separators() {
        assert_eq!(safe_filename("...hidden..."), "hidden");
        assert_eq!(safe_filename("<tag>"), "tag");
        assert_eq!(safe_filename("???"), "untitled");
    }

    #[test]
    fn assigns_plain_names_when_unique() {
        let names = assign_filenames(&[conversation("a1", "Hi"), conversation("b2", "Hi")]);
        assert_eq!(names, ["a1--Hi", "b2--Hi"]);
    }

    #[test]
    fn suffixes_colliding_names_in_order() {
        let convs = [
            conversation("x", "Same"),
            conversation("y", "Other"),
            conversation("x", "Same"),
        ];
        let names = assign_filenames(&convs);

        assert_eq!(names, ["x--Same-1", "y--Other", "x--Same-2"]);
        assert_eq!(names, assign_filenames(&convs));
    }

    #[test]
    fn suffixes_skip_existing_names() {
        let convs = [
            conversation("x", "Same-1"),
            conversation("x", "Same"),
            conversation("x", "Same"),
        ];
        let names = assign_filenames(&convs);

        assert_eq!(names, ["x--Same-1", "x--Same-2", "x--Same-3"]);
    }

    #[test]
    fn treats_names_differing_in_case_as_collisions() {
        let names = assign_filenames(&[conversation("a1", "Hello"), conversation("A1", "hello")]);
        assert_eq!(names, ["a1--Hello-1", "A1--hello-2"]);

        let convs = [
            conversation("X", "same-1"),
            conversation("x", "Same"),
            conversation("x", "Same"),
        ];
        assert_eq!(assign_filenames(&convs), ["X--same-1", "x--Same-2", "x--Same-3"]);
    }

    #[test]
    fn suffixed_names_stay_within_limit() {
        let title = "t".repeat(200);
        let names = assign_filenames(&[conversation("x", &title), conversation("x", &title)]);

        assert_ne!(names[0], names[1]);
        assert!(names[0].ends_with("-1"));
        assert!(names[1].ends_with("-2"));
        for name in &names {
            assert_eq!(name.chars().count(), MAX_FILENAME_CHARS);
        }
    }

    #[test]
    fn with_suffix_keeps_short_stems_whole() {
        assert_eq!(with_suffix("chat", 3), "chat-3");
        assert_eq!(with_suffix(&"a".repeat(MAX_FILENAME_CHARS), 12).len(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn exports_workspace_files_and_summary() {
        let (_dir, layout) = setup();
        let raw = json!({
            "tabs": [{
                "id": "a1",
                "messages": [
                    { "role": "user", "content": "Hi" },
                    { "role": "assistant", "content": "Hello" }
                ]
            }]
        });

        let summary =
            export_workspace(&WorkspaceInfo::named("ws"), &raw, &layout, &RenderOptions::default())
                .unwrap();

        assert_eq!(summary.conversation_count, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.exported[0].markdown_file, "markdown/ws/a1--Hi.md");

        let markdown = fs::read_to_string(layout.root().join("markdown/ws/a1--Hi.md")).unwrap();
        assert!(markdown.contains("- **Workspace:** ws"));
        assert!(layout.root().join("html/ws/a1--Hi.html").is_file());
        assert!(layout.summary_path("ws").is_file());
    }

    #[test]
    fn writes_summary_for_empty_workspace() {
        let (_dir, layout) = setup();

        let summary =
            export_workspace(&WorkspaceInfo::named("empty"), &json!({}), &layout, &RenderOptions::default())
                .unwrap();

        assert_eq!(summary.conversation_count, 0);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(layout.summary_path("empty")).unwrap()).unwrap();
        assert_eq!(written["conversationCount"], 0);
        assert_eq!(written["errors"], json!([]));
        assert!(written.get("workspaceId").is_none());
    }

    #[test]
    fn malformed_workspace_writes_nothing() {
        let (_dir, layout) = setup();

        let err = export_workspace(
            &WorkspaceInfo::named("bad"),
            &json!("nope"),
            &layout,
            &RenderOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, WorkspaceError::Malformed { .. }));
        assert!(!layout.markdown_dir("bad").exists());
        assert!(!layout.summary_path("bad").exists());
    }

    #[test]
    fn records_conversation_write_failures() {
        let (_dir, layout) = setup();
        let raw = json!({
            "tabs": [
                { "id": "blocked", "title": "t", "messages": [] },
                { "id": "fine", "title": "t", "messages": [] }
            ]
        });
        // A directory where the Markdown file should go makes the write fail.
        fs::create_dir_all(layout.markdown_dir("ws").join("blocked--t.md")).unwrap();

        let summary =
            export_workspace(&WorkspaceInfo::named("ws"), &raw, &layout, &RenderOptions::default())
                .unwrap();

        assert_eq!(summary.conversation_count, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].conversation_id, "blocked");
        assert_eq!(summary.exported[0].id, "fine");
    }

    #[test]
    fn removes_markdown_when_html_write_fails() {
        let (_dir, layout) = setup();
        let raw = json!({ "tabs": [{ "id": "half", "title": "t", "messages": [] }] });
        fs::create_dir_all(layout.html_dir("ws").join("half--t.html")).unwrap();

        let summary =
            export_workspace(&WorkspaceInfo::named("ws"), &raw, &layout, &RenderOptions::default())
                .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(summary.exported.is_empty());
        assert!(summary.errors[0].message.contains("half--t.html"));
        assert!(!layout.markdown_dir("ws").join("half--t.md").exists());
    }

    #[test]
    fn summary_uses_camel_case_fields() {
        let summary = WorkspaceSummary {
            workspace: "ws".into(),
            workspace_id: Some("abc123".into()),
            storage_path: None,
            conversation_count: 1,
            succeeded: 0,
            failed: 1,
            exported: Vec::new(),
            errors: vec![ConversationFailure {
                conversation_id: "c1".into(),
                message: "boom".into(),
            }],
        };
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["workspaceId"], "abc123");
        assert_eq!(value["conversationCount"], 1);
        assert_eq!(value["errors"][0]["conversationId"], "c1");
        assert!(value.get("storagePath").is_none());
    }
}
