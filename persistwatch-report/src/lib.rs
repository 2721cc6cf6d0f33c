//! # persistwatch-report
//!
//! Tera-based rendering of snapshot diffs into notification bodies and
//! Markdown / plain-text reports.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use persistwatch_core::Diff;
//! use persistwatch_report::{Renderer, ReportKind};
//!
//! fn print_report(diff: &Diff) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(md) = renderer.render(diff, ReportKind::Markdown) {
//!             println!("{md}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod notification;

pub use context::ReportContext;
pub use engine::{Renderer, ReportKind};
pub use error::RenderError;
pub use notification::{NotificationPayload, REVEAL_PENDING_DIFF};
