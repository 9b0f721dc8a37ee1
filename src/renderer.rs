// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Markdown rendering for normalized conversations.
//!
//! This module transforms a [`Conversation`] into a readable Markdown
//! document. Rendering is a pure function of the conversation and the
//! [`RenderOptions`]: the same input always produces byte-identical output.
//!
//! # Output Format
//!
//! The rendered Markdown includes:
//! - A top-level heading with the conversation title
//! - A metadata list (workspace, kind, created/updated timestamps), where
//!   absent values are left out entirely
//! - A `## {Role}` section for each message, with its content verbatim
//!
//! # Example
//!
//! ```
//! use cursor_export::normalizer::{Conversation, ConversationKind, Message, Role};
//! use cursor_export::renderer::{render_markdown, RenderOptions};
//!
//! let conversation = Conversation {
//!     id: "a1".into(),
//!     kind: ConversationKind::ChatSession,
//!     title: "Greetings".into(),
//!     created_at: None,
//!     updated_at: None,
//!     messages: vec![Message {
//!         role: Role::User,
//!         content: "Hello!".into(),
//!         timestamp: None,
//!     }],
//! };
//!
//! let markdown = render_markdown(&conversation, &RenderOptions::default());
//!
//! assert!(markdown.starts_with("# Greetings\n"));
//! assert!(markdown.contains("## User\n\nHello!\n"));
//! ```

use crate::normalizer::{Conversation, Message};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Format used for every rendered timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Configuration options for Markdown rendering.
///
/// Controls which optional elements are included in the rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Workspace name shown in the metadata block.
    ///
    /// Filled in per workspace by the exporter; `None` omits the line.
    pub workspace: Option<String>,

    /// Whether to show per-message timestamps under each role heading.
    pub show_timestamps: bool,

    /// Number of heading levels to shift (0-5).
    ///
    /// A value of 0 produces H1/H2 headings (default).
    /// A value of 1 produces H2/H3 headings, useful for embedding.
    pub heading_offset: u8,
}

/// Returns a markdown heading prefix with the given level and offset.
///
/// The heading level is clamped to a maximum of 6 (H6).
fn heading(level: u8, offset: u8) -> String {
    let actual = level.saturating_add(offset).min(6);
    "#".repeat(actual as usize)
}

/// Formats a timestamp the way every output format shows it.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Renders a conversation as Markdown.
///
/// # Arguments
///
/// * `conversation` - The normalized conversation to render
/// * `opts` - Configuration options controlling the output format
///
/// # Returns
///
/// A `String` containing the complete Markdown document.
#[must_use]
pub fn render_markdown(conversation: &Conversation, opts: &RenderOptions) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "{} {}\n",
        heading(1, opts.heading_offset),
        single_line(&conversation.title)
    )
    .unwrap();

    render_metadata(&mut out, conversation, opts);

    for message in &conversation.messages {
        render_message(&mut out, message, opts);
    }

    out
}

fn render_metadata(out: &mut String, conversation: &Conversation, opts: &RenderOptions) {
    if let Some(workspace) = opts.workspace.as_deref() {
        writeln!(out, "- **Workspace:** {workspace}").unwrap();
    }
    writeln!(out, "- **Kind:** {}", conversation.kind.label()).unwrap();
    if let Some(created) = conversation.created_at {
        writeln!(out, "- **Created:** {}", format_timestamp(created)).unwrap();
    }
    if let Some(updated) = conversation.updated_at {
        writeln!(out, "- **Updated:** {}", format_timestamp(updated)).unwrap();
    }
    out.push('\n');
}

fn render_message(out: &mut String, message: &Message, opts: &RenderOptions) {
    writeln!(
        out,
        "{} {}\n",
        heading(2, opts.heading_offset),
        single_line(message.role.label())
    )
    .unwrap();

    if opts.show_timestamps
        && let Some(ts) = message.timestamp
    {
        writeln!(out, "*{}*\n", format_timestamp(ts)).unwrap();
    }

    if message.content.is_empty() {
        return;
    }

    out.push_str(&message.content);
    if !message.content.ends_with('\n') {
        out.push('\n');
    }
    if let Some(fence) = unclosed_fence(&message.content) {
        writeln!(out, "{fence}").unwrap();
    }
    out.push('\n');
}

/// Collapses whitespace so a value fits on a heading line.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the closing fence for a code block left open at the end of `content`.
///
/// Follows `CommonMark` fence rules: a fence is three or more backticks or
/// tildes indented at most three spaces, closed by a run of the same
/// character at least as long with nothing else on the line.
fn unclosed_fence(content: &str) -> Option<String> {
    let mut open: Option<(char, usize)> = None;

    for line in content.lines() {
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() > 3 {
            continue;
        }
        let Some(marker) = trimmed.chars().next().filter(|&c| matches!(c, '`' | '~')) else {
            continue;
        };
        let run = trimmed.chars().take_while(|&c| c == marker).count();
        if run < 3 {
            continue;
        }

        match open {
            None => open = Some((marker, run)),
            Some((m, n)) if m == marker && run >= n && trimmed[run..].trim().is_empty() => {
                open = None;
            }
            Some(_) => {}
        }
    }

    open.map(|(marker, run)| marker.to_string().repeat(run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{ConversationKind, Role};

    fn make_message(role: Role, content: &str) -> Message {
        Message {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    fn make_conversation(messages: Vec<Message>) -> Conversation {
        Conversation {
            id: "a1".into(),
            kind: ConversationKind::ChatSession,
            title: "Test Chat".into(),
            created_at: None,
            updated_at: None,
            messages,
        }
    }

    fn default_opts() -> RenderOptions {
        RenderOptions::default()
    }

    #[test]
    fn renders_basic_structure() {
        let conv = make_conversation(vec![
            make_message(Role::User, "Hello"),
            make_message(Role::Assistant, "Hi there!"),
        ]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.starts_with("# Test Chat\n\n"));
        assert!(output.contains("## User\n\nHello\n"));
        assert!(output.contains("## Assistant\n\nHi there!\n"));
    }

    #[test]
    fn keeps_message_order() {
        let conv = make_conversation(vec![
            make_message(Role::User, "first"),
            make_message(Role::Assistant, "second"),
            make_message(Role::User, "third"),
        ]);
        let output = render_markdown(&conv, &default_opts());

        let first = output.find("first").unwrap();
        let second = output.find("second").unwrap();
        let third = output.find("third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn output_is_deterministic() {
        let mut conv = make_conversation(vec![make_message(Role::User, "same")]);
        conv.created_at = DateTime::from_timestamp(1_733_356_800, 0);
        let opts = RenderOptions {
            workspace: Some("ws".into()),
            show_timestamps: true,
            heading_offset: 0,
        };

        assert_eq!(render_markdown(&conv, &opts), render_markdown(&conv, &opts));
    }

    #[test]
    fn omits_absent_metadata_lines() {
        let conv = make_conversation(vec![]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.contains("- **Kind:** Chat session\n"));
        assert!(!output.contains("Workspace"));
        assert!(!output.contains("Created"));
        assert!(!output.contains("Updated"));
        assert!(!output.contains("None"));
        assert!(!output.contains("null"));
    }

    #[test]
    fn renders_present_metadata() {
        let mut conv = make_conversation(vec![]);
        conv.kind = ConversationKind::ComposerSession;
        conv.created_at = DateTime::from_timestamp(1_733_356_800, 0);
        conv.updated_at = DateTime::from_timestamp(1_733_360_400, 0);
        let opts = RenderOptions {
            workspace: Some("my-project".into()),
            ..Default::default()
        };
        let output = render_markdown(&conv, &opts);

        assert!(output.contains("- **Workspace:** my-project\n"));
        assert!(output.contains("- **Kind:** Composer session\n"));
        assert!(output.contains("- **Created:** 2024-12-05 00:00:00 UTC\n"));
        assert!(output.contains("- **Updated:** 2024-12-05 01:00:00 UTC\n"));
    }

    #[test]
    fn preserves_code_fences_verbatim() {
        let content = "Try this:\n\n```python\nprint(1)\n```";
        let conv = make_conversation(vec![make_message(Role::Assistant, content)]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.contains("```python\nprint(1)\n```\n"));
        assert_eq!(output.matches("```").count(), 2);
    }

    #[test]
    fn closes_unterminated_fence() {
        let conv = make_conversation(vec![
            make_message(Role::Assistant, "```rust\nfn main() {}"),
            make_message(Role::User, "thanks"),
        ]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.contains("fn main() {}\n```\n\n## User"));
    }

    #[test]
    fn renders_unknown_roles_by_name() {
        let conv = make_conversation(vec![
            make_message(Role::unknown(), "who said this"),
            make_message(Role::Other("tool".into()), "ran ls"),
            make_message(Role::System, "be brief"),
        ]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.contains("## unknown\n\nwho said this"));
        assert!(output.contains("## tool\n\nran ls"));
        assert!(output.contains("## System\n\nbe brief"));
    }

    #[test]
    fn hides_message_timestamps_by_default() {
        let mut message = make_message(Role::User, "Hi");
        message.timestamp = DateTime::from_timestamp(1_733_356_800, 0);
        let conv = make_conversation(vec![message]);

        let hidden = render_markdown(&conv, &default_opts());
        assert!(!hidden.contains("2024-12-05"));

        let opts = RenderOptions {
            show_timestamps: true,
            ..Default::default()
        };
        let shown = render_markdown(&conv, &opts);
        assert!(shown.contains("## User\n\n*2024-12-05 00:00:00 UTC*\n\nHi"));
    }

    #[test]
    fn applies_heading_offset() {
        let conv = make_conversation(vec![make_message(Role::User, "Hi")]);
        let opts = RenderOptions {
            heading_offset: 1,
            ..Default::default()
        };
        let output = render_markdown(&conv, &opts);

        assert!(output.starts_with("## Test Chat"));
        assert!(output.contains("### User"));
    }

    #[test]
    fn clamps_heading_level() {
        assert_eq!(heading(2, 5), "######");
        assert_eq!(heading(1, 0), "#");
    }

    #[test]
    fn flattens_multiline_titles() {
        let mut conv = make_conversation(vec![]);
        conv.title = "line one\nline two".into();
        let output = render_markdown(&conv, &default_opts());

        assert!(output.starts_with("# line one line two\n"));
    }

    #[test]
    fn empty_content_renders_only_heading() {
        let conv = make_conversation(vec![make_message(Role::User, "")]);
        let output = render_markdown(&conv, &default_opts());

        assert!(output.ends_with("## User\n\n"));
    }

    #[test]
    fn detects_unclosed_fences() {
        assert_eq!(unclosed_fence("```"), Some("```".into()));
        assert_eq!(unclosed_fence("~~~~ text\nbody"), Some("~~~~".into()));
        assert_eq!(unclosed_fence("```rust\nx\n```"), None);
        assert_eq!(unclosed_fence("````\n```\n"), Some("````".into()));
        assert_eq!(unclosed_fence("    ```\nindented code"), None);
        assert_eq!(unclosed_fence("plain text"), None);
    }
}
