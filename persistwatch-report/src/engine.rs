//! Tera rendering engine — [`ReportKind`] enum and [`Renderer`].
//!
//! | Kind           | Template                 | Used for                        |
//! |----------------|--------------------------|---------------------------------|
//! | `Notification` | `notification.txt.tera`  | user notification body          |
//! | `Markdown`     | `diff.md.tera`           | `persistwatch diff --format md` |
//! | `Text`         | `diff.txt.tera`          | plain-text diff summaries       |
//!
//! Any of these can be overridden by a same-named file in the user template
//! directory (`~/.persistwatch/templates/`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use persistwatch_core::Diff;

use crate::context::ReportContext;
use crate::error::RenderError;
use crate::notification::NotificationPayload;

// ---------------------------------------------------------------------------
// Embedded templates — baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/macros.md.tera", include_str!("templates/macros.md.tera")),
    ("notification.txt.tera", include_str!("templates/notification.txt.tera")),
    ("diff.md.tera", include_str!("templates/diff.md.tera")),
    ("diff.txt.tera", include_str!("templates/diff.txt.tera")),
];

pub const TEMPLATES_DIR: &str = "templates";

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            tracing::debug!("template override: {name}");
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ReportKind
// ---------------------------------------------------------------------------

/// Every report the renderer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Notification,
    Markdown,
    Text,
}

impl ReportKind {
    pub fn all() -> &'static [ReportKind] {
        &[ReportKind::Notification, ReportKind::Markdown, ReportKind::Text]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            ReportKind::Notification => "notification.txt.tera",
            ReportKind::Markdown     => "diff.md.tera",
            ReportKind::Text         => "diff.txt.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Tera-based renderer for diff reports and notifications.
///
/// Create once and reuse; templates are parsed at construction.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(None)? })
    }

    /// Embedded templates plus any `.tera` overrides under `dir`.
    pub fn with_user_templates(dir: &Path) -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(Some(dir))? })
    }

    /// Renderer honoring overrides in `<data_root>/templates/`.
    pub fn for_data_root(data_root: &Path) -> Result<Self, RenderError> {
        Self::with_user_templates(&data_root.join(TEMPLATES_DIR))
    }

    pub fn render(&self, diff: &Diff, kind: ReportKind) -> Result<String, RenderError> {
        let ctx = ReportContext::from_diff(diff);
        self.render_with_context(&ctx, kind)
    }

    pub fn render_with_context(
        &self,
        ctx: &ReportContext,
        kind: ReportKind,
    ) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let rendered = self.tera.render(kind.template_name(), &tera_ctx)?;
        Ok(normalize_output(&rendered))
    }

    /// Notification for a watch-detected diff.
    pub fn notification(&self, diff: &Diff) -> Result<NotificationPayload, RenderError> {
        let body = self.render(diff, ReportKind::Notification)?;
        Ok(NotificationPayload::new(body.trim()))
    }
}

/// CRLF → LF, trailing whitespace trimmed per line, single trailing newline.
fn normalize_output(rendered: &str) -> String {
    let mut out: String = rendered
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
