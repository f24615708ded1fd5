//! End-to-end tests of the runner through real files
//!
//! Tests are organized by topic:
//! - `run` - CSV + YAML in, result and diagnostics tables out

mod run;
