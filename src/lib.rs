// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Export Cursor chat history to Markdown, HTML and JSON summaries.
//!
//! This crate reads the chat records Cursor keeps per workspace (or a
//! pre-extracted JSON dump of them) and writes every conversation as a
//! Markdown document and a styled HTML page, plus one JSON summary per
//! workspace.
//!
//! # Overview
//!
//! 1. The [`normalizer`] turns chat tabs, composer and editing sessions into one
//!    canonical [`Conversation`](normalizer::Conversation) model
//! 2. The [`renderer`] and [`html`] modules render that model
//! 3. The [`exporter`] writes one workspace's files and summary
//! 4. The [`driver`] finds workspaces and exports each of them in turn
//!
//! # Example
//!
//! ```no_run
//! use cursor_export::{driver, renderer::RenderOptions};
//! use std::path::Path;
//!
//! let report = driver::export_all(
//!     Path::new("workspaceStorage"),
//!     Path::new("exports"),
//!     &RenderOptions::default(),
//! )
//! .unwrap();
//!
//! println!("exported {} conversations", report.exported_conversations());
//! ```
//!
//! # Modules
//!
//! - [`normalizer`]: raw JSON to canonical conversations
//! - [`renderer`]: Markdown generation with configurable output options
//! - [`html`]: HTML documents built from the Markdown rendering
//! - [`exporter`]: per-workspace file output and summaries
//! - [`driver`]: workspace discovery and whole-run orchestration

#![deny(missing_docs)]

pub mod driver;
pub mod exporter;
pub mod html;
pub mod normalizer;
pub mod renderer;
