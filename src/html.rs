// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! HTML rendering for normalized conversations.
//!
//! The HTML document is derived from the Markdown rendering, so both formats
//! always agree. Markdown is converted with `pulldown-cmark` and wrapped in a
//! standalone page styled after GitHub's Markdown view.
//!
//! Raw HTML in conversation content is never passed through: it is emitted as
//! escaped text, so a stray `<script>` in a chat ends up as `&lt;script&gt;`.

use crate::normalizer::Conversation;
use crate::renderer::{RenderOptions, render_markdown};
use pulldown_cmark::{Event, Options, Parser, html};

const STYLESHEET: &str = r"
      .markdown-body {
        box-sizing: border-box;
        min-width: 200px;
        max-width: 980px;
        margin: 0 auto;
        padding: 45px;
        font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
        font-size: 16px;
        line-height: 1.6;
        color: #1f2328;
        background-color: #ffffff;
        word-wrap: break-word;
      }
      .markdown-body h1, .markdown-body h2, .markdown-body h3 {
        margin-top: 24px;
        margin-bottom: 16px;
        font-weight: 600;
        line-height: 1.25;
        border-bottom: 1px solid #d1d9e0;
        padding-bottom: 0.3em;
      }
      .markdown-body pre {
        background-color: #f6f8fa;
        border-radius: 6px;
        padding: 16px;
        overflow: auto;
        font-size: 85%;
        line-height: 1.45;
      }
      .markdown-body code {
        font-family: ui-monospace, SFMono-Regular, 'SF Mono', Menlo, Consolas, monospace;
        background-color: rgba(129, 139, 152, 0.12);
        border-radius: 6px;
        padding: 0.2em 0.4em;
        font-size: 85%;
      }
      .markdown-body pre code {
        background-color: transparent;
        padding: 0;
        font-size: 100%;
        white-space: pre;
      }
      .markdown-body blockquote {
        margin: 0;
        padding: 0 1em;
        color: #59636e;
        border-left: 0.25em solid #d1d9e0;
      }
      .markdown-body table {
        border-collapse: collapse;
      }
      .markdown-body th, .markdown-body td {
        border: 1px solid #d1d9e0;
        padding: 6px 13px;
      }
      .markdown-body ul, .markdown-body ol {
        margin-top: 0.5em;
        margin-bottom: 0.5em;
        padding-left: 2em;
      }
      @media (max-width: 767px) {
        .markdown-body {
          padding: 15px;
        }
      }
";

/// Renders a conversation as a standalone HTML document.
///
/// # Example
///
/// ```
/// use cursor_export::html::render_hypertext;
/// use cursor_export::normalizer::{Conversation, ConversationKind, Message, Role};
/// use cursor_export::renderer::RenderOptions;
///
/// let conversation = Conversation {
///     id: "a1".into(),
///     kind: ConversationKind::ChatSession,
///     title: "Snippet".into(),
///     created_at: None,
///     updated_at: None,
///     messages: vec![Message {
///         role: Role::Assistant,
///         content: "```python\nprint(1)\n```".into(),
///         timestamp: None,
///     }],
/// };
///
/// let page = render_hypertext(&conversation, &RenderOptions::default());
/// assert!(page.starts_with("<!DOCTYPE html>"));
/// assert!(page.contains("<title>Snippet</title>"));
/// assert!(page.contains("<code class=\"language-python\">print(1)"));
/// ```
#[must_use]
pub fn render_hypertext(conversation: &Conversation, opts: &RenderOptions) -> String {
    let markdown = render_markdown(conversation, opts);
    let body = markdown_to_html(&markdown);
    let title = escape_html(&conversation.title);

    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
  <head>
    <meta charset=\"UTF-8\">
    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">
    <title>{title}</title>
    <style>{STYLESHEET}    </style>
  </head>
  <body>
    <article class=\"markdown-body\">
{body}    </article>
  </body>
</html>
"
    )
}

/// Converts Markdown to an HTML fragment, escaping any raw HTML it contains.
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let events = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut body = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut body, events);
    body
}

/// Escapes text for use in HTML element content or attribute values.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{ConversationKind, Message, Role};

    fn make_conversation(title: &str, contents: &[(Role, &str)]) -> Conversation {
        Conversation {
            id: "a1".into(),
            kind: ConversationKind::ChatSession,
            title: title.into(),
            created_at: None,
            updated_at: None,
            messages: contents
                .iter()
                .map(|(role, content)| Message {
                    role: role.clone(),
                    content: (*content).into(),
                    timestamp: None,
                })
                .collect(),
        }
    }

    #[test]
    fn wraps_body_in_document_template() {
        let conv = make_conversation("Chat", &[(Role::User, "Hello")]);
        let page = render_hypertext(&conv, &RenderOptions::default());

        assert!(page.starts_with("<!DOCTYPE html>\n<html lang=\"en\">"));
        assert!(page.contains("<meta charset=\"UTF-8\">"));
        assert!(page.contains(".markdown-body pre {"));
        assert!(page.contains("<h1>Chat</h1>"));
        assert!(page.contains("<h2>User</h2>"));
        assert!(page.contains("<p>Hello</p>"));
        assert!(page.trim_end().ends_with("</html>"));
    }

    #[test]
    fn keeps_python_fence_as_code_element() {
        let conv = make_conversation("Code", &[(Role::Assistant, "```python\nprint(1)\n```")]);
        let page = render_hypertext(&conv, &RenderOptions::default());

        assert!(page.contains("<pre><code class=\"language-python\">print(1)\n</code></pre>"));
    }

    #[test]
    fn keeps_nested_fence_inside_longer_fence() {
        let conv = make_conversation(
            "Code",
            &[(
                Role::Assistant,
                "````markdown\n```python\nprint(1)\n```\nafter\n````",
            )],
        );
        let page = render_hypertext(&conv, &RenderOptions::default());

        assert!(page.contains(
            "<pre><code class=\"language-markdown\">```python\nprint(1)\n```\nafter\n</code></pre>"
        ));
        assert!(!page.contains("<p>after</p>"));
        assert_eq!(page.matches("<pre>").count(), 1);
    }

    #[test]
    fn escapes_title() {
        let conv = make_conversation("<b>Tom & \"Jerry\"</b>", &[]);
        let page = render_hypertext(&conv, &RenderOptions::default());

        assert!(page.contains("<title>&lt;b&gt;Tom &amp; &quot;Jerry&quot;&lt;/b&gt;</title>"));
    }

    #[test]
    fn escapes_raw_html_blocks() {
        let conv = make_conversation(
            "Chat",
            &[(Role::User, "<script>alert(1)</script>\n\n<div>block</div>")],
        );
        let page = render_hypertext(&conv, &RenderOptions::default());

        assert!(!page.contains("<script>"));
        assert!(!page.contains("<div>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("&lt;div&gt;block&lt;/div&gt;"));
    }

    #[test]
    fn escapes_inline_html() {
        let html = markdown_to_html("Use <code> tags for x < 5");

        assert!(html.contains("Use &lt;code&gt; tags for x &lt; 5"));
    }

    #[test]
    fn escapes_angle_brackets_inside_code() {
        let html = markdown_to_html("```html\n<p>hi</p>\n```\n");

        assert!(html.contains("&lt;p&gt;hi&lt;/p&gt;"));
    }

    #[test]
    fn escape_html_handles_plain_text() {
        assert_eq!(escape_html("plain"), "plain");
        assert_eq!(escape_html(""), "");
        assert_eq!(escape_html("a < b > c"), "a &lt; b &gt; c");
    }
}
