// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Normalization of raw workspace chat records.
//!
//! Cursor keeps chat history in more than one shape. Plain chat tabs hold a
//! linear list of messages, while composer sessions wrap their human-readable
//! turns in step and tool-use metadata. This module turns either shape into
//! one canonical [`Conversation`] model so the renderers never look at raw
//! JSON.
//!
//! # Accepted Shapes
//!
//! The workspace root is a JSON object with optional `tabs` and `composers`
//! entries:
//!
//! - `tabs`: chat sessions whose turns live under `messages`, `bubbles`
//!   (with attached `codeBlocks`) or `requests` (the `chatSessions/` files)
//! - `chatSessions`: more chat sessions in the `requests` shape, as found in
//!   whole-history dumps
//! - `composers`: a list, or an object with an `allComposers` list, whose
//!   turns live under `conversation`
//! - `editingSessions`: editing session states whose `linearHistory` entries
//!   list the files each edit touched; they normalize as composer sessions,
//!   and states with an empty history are dropped
//!
//! A root holding none of these but carrying a `chatData` object is unwrapped
//! first.
//!
//! # Example
//!
//! ```
//! use cursor_export::normalizer::{normalize, Role};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "tabs": [{
//!         "id": "a1",
//!         "messages": [
//!             { "role": "user", "content": "Hello" },
//!             { "role": "assistant", "content": "Hi there!" }
//!         ]
//!     }]
//! });
//!
//! let conversations = normalize(&raw).unwrap();
//! assert_eq!(conversations.len(), 1);
//! assert_eq!(conversations[0].title, "Hello");
//! assert_eq!(conversations[0].messages[1].role, Role::Assistant);
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::fmt::Write;
use tracing::{debug, warn};

/// Maximum number of characters taken from the first user message when a
/// conversation has no explicit title.
pub const TITLE_PREVIEW_CHARS: usize = 60;

/// Epoch values above this magnitude are milliseconds, below it seconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

const TITLE_KEYS: &[&str] = &["title", "name", "customTitle", "chatTitle"];
const ID_KEYS: &[&str] = &["id", "tabId", "composerId", "sessionId"];
const CREATED_KEYS: &[&str] = &["createdAt", "creationDate", "timestamp"];
const UPDATED_KEYS: &[&str] = &["updatedAt", "lastUpdatedAt", "lastSendTime"];
const MESSAGE_TIME_KEYS: &[&str] = &["timestamp", "createdAt"];
const CODE_BLOCK_KEYS: &[&str] = &["codeBlocks", "suggestedCodeBlocks"];
const ROOT_KEYS: &[&str] = &["tabs", "chatSessions", "composers", "editingSessions"];

/// Maximum number of inserted-text previews listed per changed file.
const MAX_EDIT_PREVIEWS: usize = 5;

/// Maximum length of one inserted-text preview, in characters.
const EDIT_PREVIEW_CHARS: usize = 100;

/// Error type for workspace data that cannot be normalized.
#[derive(Debug, Snafu)]
pub enum NormalizeError {
    /// The workspace root is not a JSON object.
    #[snafu(display("workspace data must be a JSON object, found {found}"))]
    NotAnObject {
        /// The JSON type that was found instead.
        found: &'static str,
    },
}

/// The source shape a conversation was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConversationKind {
    /// A linear chat tab.
    #[serde(rename = "chat")]
    ChatSession,
    /// A multi-step composer editing session.
    #[serde(rename = "composer")]
    ComposerSession,
}

impl ConversationKind {
    /// Short lowercase name used in generated titles and identifiers.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::ChatSession => "chat",
            Self::ComposerSession => "composer",
        }
    }

    /// Human-readable name used in rendered metadata.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ChatSession => "Chat session",
            Self::ComposerSession => "Composer session",
        }
    }
}

/// The author of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The person using the editor.
    User,
    /// The AI assistant.
    Assistant,
    /// System or instruction text.
    System,
    /// Any other role, kept verbatim so it can still be rendered.
    Other(String),
}

impl Role {
    /// Maps a role name from the source data, keeping unrecognized names.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" => Self::unknown(),
            "user" | "human" => Self::User,
            "assistant" | "ai" | "bot" | "model" => Self::Assistant,
            "system" => Self::System,
            _ => Self::Other(name.trim().to_owned()),
        }
    }

    /// The role given to messages whose source carries no role at all.
    #[must_use]
    pub fn unknown() -> Self {
        Self::Other("unknown".to_owned())
    }

    /// Display name used for message headings.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
            Self::Other(name) => name,
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,

    /// The raw message text, including any fenced code blocks.
    pub content: String,

    /// When the message was sent, if the source recorded it.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One chat tab or composer session in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Stable identifier from the source, or `{kind}-{index}` when missing.
    pub id: String,

    /// Which raw shape this conversation came from.
    pub kind: ConversationKind,

    /// The resolved title (see [`resolve_title`]).
    pub title: String,

    /// When the conversation was started.
    pub created_at: Option<DateTime<Utc>>,

    /// When the conversation was last changed.
    pub updated_at: Option<DateTime<Utc>>,

    /// Messages in conversational order.
    pub messages: Vec<Message>,
}

/// Normalizes raw workspace data into canonical conversations.
///
/// Chat tabs come first, then chat sessions, composer sessions and editing
/// sessions, each in source order. Missing or malformed fields are defaulted
/// rather than rejected.
///
/// # Errors
///
/// Returns [`NormalizeError::NotAnObject`] if the root is not a JSON object.
///
/// # Example
///
/// ```
/// use cursor_export::normalizer::normalize;
/// use serde_json::json;
///
/// assert!(normalize(&json!({})).unwrap().is_empty());
/// assert!(normalize(&json!("not a workspace")).is_err());
/// ```
pub fn normalize(raw: &Value) -> Result<Vec<Conversation>, NormalizeError> {
    let root = raw.as_object().context(NotAnObjectSnafu {
        found: json_type_name(raw),
    })?;
    let root = unwrap_chat_data(root);

    let tabs: Vec<&Value> = as_list(root.get("tabs"))
        .iter()
        .chain(as_list(root.get("chatSessions")))
        .collect();
    let composers = composer_list(root.get("composers"));
    let editing_sessions = as_list(root.get("editingSessions"));

    let mut conversations =
        Vec::with_capacity(tabs.len() + composers.len() + editing_sessions.len());
    for (i, tab) in tabs.into_iter().enumerate() {
        conversations.push(normalize_tab(tab, i + 1));
    }
    for (i, composer) in composers.iter().enumerate() {
        conversations.push(normalize_composer(composer, i + 1));
    }
    for (i, session) in editing_sessions.iter().enumerate() {
        if as_list(session.get("linearHistory")).is_empty() {
            debug!(index = i, "skipping editing session without history");
            continue;
        }
        conversations.push(normalize_editing_session(session, composers.len() + i + 1));
    }

    Ok(conversations)
}

/// Resolves a conversation title.
///
/// Precedence: a non-blank explicit title, then the first line of the first
/// user message cut to [`TITLE_PREVIEW_CHARS`] characters, then
/// `Untitled-{kind}-{index}`.
#[must_use]
pub fn resolve_title(
    explicit: Option<&str>,
    messages: &[Message],
    kind: ConversationKind,
    index: usize,
) -> String {
    if let Some(title) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_owned();
    }

    messages
        .iter()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(|line| {
            line.chars()
                .take(TITLE_PREVIEW_CHARS)
                .collect::<String>()
                .trim_end()
                .to_owned()
        })
        .unwrap_or_else(|| format!("Untitled-{}-{index}", kind.slug()))
}

/// Coerces a timestamp value into a UTC instant.
///
/// Numbers are epoch milliseconds when their magnitude exceeds `1e10` and
/// epoch seconds otherwise. Strings may be numeric (same rule), RFC 3339, or
/// ISO-8601 without an offset (read as UTC). Anything else yields `None`.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| n.as_f64().and_then(from_epoch_float), from_epoch),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    let millis = if raw.unsigned_abs() > MILLIS_THRESHOLD.unsigned_abs() {
        raw
    } else {
        raw.checked_mul(1000)?
    };
    DateTime::from_timestamp_millis(millis)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn from_epoch_float(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let millis = if raw.abs() > MILLIS_THRESHOLD as f64 {
        raw
    } else {
        raw * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return from_epoch(n);
    }
    if let Ok(n) = s.parse::<f64>() {
        return from_epoch_float(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
        })
        .map(|naive| naive.and_utc())
}

fn normalize_tab(tab: &Value, index: usize) -> Conversation {
    let messages = if let Some(messages) = tab.get("messages").and_then(Value::as_array) {
        messages.iter().map(plain_message).collect()
    } else if let Some(bubbles) = tab.get("bubbles").and_then(Value::as_array) {
        bubbles.iter().map(plain_message).collect()
    } else {
        as_list(tab.get("requests"))
            .iter()
            .flat_map(request_messages)
            .collect()
    };

    let id = resolve_id(tab, ConversationKind::ChatSession, index);
    build_conversation(tab, id, ConversationKind::ChatSession, index, messages)
}

fn normalize_composer(composer: &Value, index: usize) -> Conversation {
    let id = resolve_id(composer, ConversationKind::ComposerSession, index);
    let turns = as_list(
        composer
            .get("conversation")
            .or_else(|| composer.get("messages")),
    );

    let mut messages = Vec::with_capacity(turns.len());
    for (turn_index, turn) in turns.iter().enumerate() {
        let content = turn_content(turn);
        if content.trim().is_empty() {
            warn!(
                composer = %id,
                turn = turn_index,
                "skipping composer turn without text"
            );
            continue;
        }
        messages.push(Message {
            role: message_role(turn),
            content,
            timestamp: timestamp_field(turn, MESSAGE_TIME_KEYS),
        });
    }

    build_conversation(
        composer,
        id,
        ConversationKind::ComposerSession,
        index,
        messages,
    )
}

/// Maps an editing session, one assistant message per `linearHistory` entry.
///
/// Entries that name no file are skipped with a warning.
fn normalize_editing_session(session: &Value, index: usize) -> Conversation {
    let id = resolve_id(session, ConversationKind::ComposerSession, index);

    let mut messages = Vec::new();
    for (edit_index, entry) in as_list(session.get("linearHistory")).iter().enumerate() {
        let content = edit_content(entry);
        if content.is_empty() {
            warn!(
                session = %id,
                edit = edit_index,
                "skipping edit without file changes"
            );
            continue;
        }
        messages.push(Message {
            role: Role::Assistant,
            content,
            timestamp: timestamp_field(entry, MESSAGE_TIME_KEYS),
        });
    }

    let mut conversation = build_conversation(
        session,
        id,
        ConversationKind::ComposerSession,
        index,
        messages,
    );
    if explicit_title(session).is_none() {
        conversation.title = format!("Editing session {}", conversation.id);
    }
    conversation
}

/// Describes one editing step: the files it touched, then what changed.
fn edit_content(entry: &Value) -> String {
    let mut content = String::new();

    let touched = as_list(entry.get("stops"))
        .iter()
        .flat_map(|stop| as_list(stop.get("entries")))
        .filter_map(resource_path);
    for path in touched {
        writeln!(content, "**Modified file:** {}\n", inline_code(path)).unwrap();
    }

    let changes: Vec<(&str, &Value)> = as_list(entry.get("postEdit"))
        .iter()
        .filter_map(|edit| resource_path(edit).map(|path| (path, edit)))
        .collect();
    if changes.is_empty() {
        return content.trim_end().to_owned();
    }

    content.push_str("**Changes made:**\n\n");
    for (path, edit) in changes {
        writeln!(content, "- Modified: {}", inline_code(path)).unwrap();
        let inserted = as_list(edit.get("originalToCurrentEdit"))
            .iter()
            .filter_map(|change| get_str(change, &["txt"]))
            .filter(|txt| !txt.trim().is_empty())
            .take(MAX_EDIT_PREVIEWS);
        for txt in inserted {
            writeln!(content, "  - Added: {}", inline_code(&edit_preview(txt))).unwrap();
        }
    }

    content.trim_end().to_owned()
}

/// Reads a file path from a `resource` URI string or `{ path }` object.
fn resource_path(value: &Value) -> Option<&str> {
    let path = match value.get("resource")? {
        Value::String(uri) => uri.strip_prefix("file://")?,
        resource => get_str(resource, &["path"])?,
    };
    (!path.is_empty()).then_some(path)
}

/// Flattens inserted text onto one line and cuts it to a short preview.
fn edit_preview(txt: &str) -> String {
    let flat = txt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > EDIT_PREVIEW_CHARS {
        let mut preview: String = flat.chars().take(EDIT_PREVIEW_CHARS).collect();
        preview.push_str("...");
        preview
    } else {
        flat
    }
}

fn explicit_title(raw: &Value) -> Option<&str> {
    TITLE_KEYS
        .iter()
        .find_map(|key| get_str(raw, &[*key]))
        .filter(|title| !title.trim().is_empty())
}

fn build_conversation(
    raw: &Value,
    id: String,
    kind: ConversationKind,
    index: usize,
    messages: Vec<Message>,
) -> Conversation {
    Conversation {
        title: resolve_title(explicit_title(raw), &messages, kind, index),
        created_at: timestamp_field(raw, CREATED_KEYS),
        updated_at: timestamp_field(raw, UPDATED_KEYS),
        id,
        kind,
        messages,
    }
}

fn resolve_id(raw: &Value, kind: ConversationKind, index: usize) -> String {
    ID_KEYS
        .iter()
        .find_map(|key| match raw.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("{}-{index}", kind.slug()))
}

/// Maps a `messages` or `bubbles` entry, keeping it even when empty.
fn plain_message(value: &Value) -> Message {
    Message {
        role: message_role(value),
        content: turn_content(value),
        timestamp: timestamp_field(value, MESSAGE_TIME_KEYS),
    }
}

/// Splits a `chatSessions` request into its user and assistant messages.
fn request_messages(request: &Value) -> Vec<Message> {
    let timestamp = timestamp_field(request, &["timestamp"]);
    let mut messages = Vec::with_capacity(2);

    if let Some(text) = get_str(request, &["message", "text"]).filter(|t| !t.is_empty()) {
        messages.push(Message {
            role: Role::User,
            content: text.to_owned(),
            timestamp,
        });
    }

    let parts: Vec<&str> = as_list(request.get("response"))
        .iter()
        .filter_map(|part| get_str(part, &["value"]))
        .filter(|s| !s.is_empty())
        .collect();
    if !parts.is_empty() {
        messages.push(Message {
            role: Role::Assistant,
            content: parts.join("\n"),
            timestamp,
        });
    }

    messages
}

fn message_role(value: &Value) -> Role {
    match value.get("role").or_else(|| value.get("type")) {
        Some(Value::String(name)) => Role::from_name(name),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(1) => Role::User,
            Some(2) => Role::Assistant,
            _ => Role::Other(n.to_string()),
        },
        _ => Role::unknown(),
    }
}

/// Extracts a turn's text followed by any attached code blocks as fences.
fn turn_content(value: &Value) -> String {
    let mut content = extract_text(value).unwrap_or_default();

    let blocks = CODE_BLOCK_KEYS
        .iter()
        .flat_map(|key| as_list(value.get(*key)));
    for block in blocks {
        let Some(code) = get_str(block, &["code"]) else {
            continue;
        };
        let language = get_str(block, &["language"]).unwrap_or_default();

        if !content.is_empty() {
            if !content.ends_with('\n') {
                content.push('\n');
            }
            content.push('\n');
        }
        let fence = code_fence(code);
        content.push_str(&fence);
        content.push_str(language);
        content.push('\n');
        content.push_str(code);
        if !code.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&fence);
    }

    content
}

/// Returns a backtick fence longer than any backtick run inside `code`.
fn code_fence(code: &str) -> String {
    "`".repeat(longest_backtick_run(code).max(2) + 1)
}

fn longest_backtick_run(s: &str) -> usize {
    s.split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or_default()
}

/// Wraps text in an inline code span that survives embedded backticks.
fn inline_code(text: &str) -> String {
    let ticks = "`".repeat(longest_backtick_run(text) + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{ticks} {text} {ticks}")
    } else {
        format!("{ticks}{text}{ticks}")
    }
}

/// Reads `content` or `text`, joining text parts when stored as a list.
fn extract_text(value: &Value) -> Option<String> {
    ["content", "text"]
        .iter()
        .find_map(|key| match value.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| p.as_str().or_else(|| get_str(p, &["text"])))
                    .collect();
                (!texts.is_empty()).then(|| texts.join("\n"))
            }
            _ => None,
        })
}

/// Reads the first present timestamp field, treating garbage as absent.
fn timestamp_field(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let (key, value) = keys
        .iter()
        .find_map(|key| raw.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))?;

    let parsed = parse_timestamp(value);
    if parsed.is_none() {
        debug!(field = key, value = %value, "ignoring unparsable timestamp");
    }
    parsed
}

fn unwrap_chat_data(root: &Map<String, Value>) -> &Map<String, Value> {
    if ROOT_KEYS.iter().any(|key| root.contains_key(*key)) {
        return root;
    }
    root.get("chatData")
        .and_then(Value::as_object)
        .unwrap_or(root)
}

fn composer_list(value: Option<&Value>) -> &[Value] {
    as_list(value.map(|v| v.get("allComposers").unwrap_or(v)))
}

fn as_list(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Navigates a JSON path and returns the string value at the end.
fn get_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
