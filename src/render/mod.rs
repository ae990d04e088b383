//! Output rendering: Markdown text and the relational-insert script.

pub mod markdown;
pub mod sql;

pub use markdown::{extract_toc, render_markdown, NO_DESCRIPTION_MARKER};
pub use sql::{render_insert_script, InsertScriptOptions, SETUP_SQL};
