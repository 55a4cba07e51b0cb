//! Output template validation and filename materialization.
//!
//! Client-supplied templates use the extractor's `%(name)s` placeholder
//! syntax. A template is parsed once into a [`ValidatedTemplate`] and is
//! immutable afterwards; rendering substitutes sanitized metadata values and
//! resolves collisions inside the output directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Default output template when the client does not supply one.
pub const DEFAULT_TEMPLATE: &str = "%(title)s-%(id)s.%(ext)s";

/// Placeholders a template may reference.
const ALLOWED_PLACEHOLDERS: &[&str] = &[
    "title",
    "id",
    "ext",
    "upload_date",
    "uploader",
    "resolution",
    "format_id",
];

/// Characters illegal in filenames on Windows/Linux/Mac.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Metadata values are truncated to this many code points before substitution.
const MAX_VALUE_CODEPOINTS: usize = 200;

/// Maximum rendered filename length.
const MAX_FILENAME_LENGTH: usize = 200;

/// Collision suffixes `_1` .. `_1000` are tried before giving up.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Reserved device names on Windows.
const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template cannot be empty")]
    Empty,
    #[error("template contains path traversal sequences")]
    Traversal,
    #[error("template cannot use absolute paths")]
    AbsolutePath,
    #[error("template contains invalid characters")]
    NullByte,
    #[error("unterminated placeholder in template")]
    Unterminated,
    #[error("placeholder '{0}' is not allowed")]
    UnknownPlaceholder(String),
    #[error("placeholder '{0}' contains a path separator")]
    SeparatorInPlaceholder(String),
    #[error("could not generate a unique filename after {MAX_COLLISION_SUFFIX} attempts")]
    CollisionLimit,
    #[error("output path escapes the configured output directory")]
    OutsideOutputDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A parsed output template: ordered literals and whitelisted placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTemplate {
    segments: Vec<Segment>,
}

impl ValidatedTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TemplateError::Empty);
        }
        if raw.contains('\0') {
            return Err(TemplateError::NullByte);
        }
        if raw.contains("../") || raw.contains("..\\") || raw == ".." {
            return Err(TemplateError::Traversal);
        }
        if raw.starts_with('/') || is_windows_drive(raw) {
            return Err(TemplateError::AbsolutePath);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '%' && chars.peek() == Some(&'(') {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(')') => break,
                        Some(inner) => name.push(inner),
                        None => return Err(TemplateError::Unterminated),
                    }
                }
                // The extractor syntax requires a conversion suffix, e.g. %(title)s.
                match chars.next() {
                    Some('s') => {}
                    _ => return Err(TemplateError::Unterminated),
                }
                if name.contains('/') || name.contains('\\') {
                    return Err(TemplateError::SeparatorInPlaceholder(name));
                }
                if !ALLOWED_PLACEHOLDERS.contains(&name.as_str()) {
                    return Err(TemplateError::UnknownPlaceholder(name));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Var(name));
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Substitute metadata values. Each value is sanitized independently;
    /// missing variables render as `NA` like the extractor itself does.
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = variables.get(name).map(String::as_str).unwrap_or("NA");
                    out.push_str(&sanitize_value(value));
                }
            }
        }
        out
    }
}

fn is_windows_drive(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() > 1 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Sanitize a single metadata value before it enters a filename.
///
/// NFKC-normalizes, strips control characters, replaces unsafe filesystem
/// characters with `_` and truncates to 200 code points.
pub fn sanitize_value(value: &str) -> String {
    let normalized: String = value.nfkc().collect();
    normalized
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_VALUE_CODEPOINTS)
        .collect()
}

/// Sanitize a complete filename.
///
/// Applied to the rendered template as a whole, so separators surviving in
/// literal segments also collapse to `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let mut name: String = filename
        .nfkc()
        .filter(|c| !c.is_control())
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .collect();

    name = name.trim().trim_matches('.').to_string();

    if is_windows_reserved(&name) {
        name = format!("_{name}");
    }

    if name.chars().count() > MAX_FILENAME_LENGTH {
        name = truncate_preserving_extension(&name);
        if is_windows_reserved(&name) {
            name = format!("_{name}");
            name = name.chars().take(MAX_FILENAME_LENGTH).collect();
        }
    }

    if name.is_empty() || name == "." || name == ".." {
        name = "unnamed".to_string();
    }

    name
}

fn is_windows_reserved(name: &str) -> bool {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    WINDOWS_RESERVED.contains(&stem.to_ascii_uppercase().as_str())
}

fn truncate_preserving_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => {
            let ext_len = ext.chars().count().min(MAX_FILENAME_LENGTH - 2);
            let ext: String = ext.chars().take(ext_len).collect();
            let stem_len = (MAX_FILENAME_LENGTH - ext_len - 1).max(1);
            let stem: String = stem.chars().take(stem_len).collect();
            format!("{stem}.{ext}")
        }
        _ => name.chars().take(MAX_FILENAME_LENGTH).collect(),
    }
}

/// Renders templates into concrete paths under the output directory.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    output_dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render a filename from a template (or the default) and metadata.
    pub fn render_filename(
        &self,
        template: Option<&str>,
        variables: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let template = ValidatedTemplate::parse(template.unwrap_or(DEFAULT_TEMPLATE))?;
        Ok(sanitize_filename(&template.render(variables)))
    }

    /// Build the full output path: render, resolve collisions, and verify the
    /// result stays a strict descendant of the output directory.
    pub fn build_output_path(
        &self,
        template: Option<&str>,
        variables: &HashMap<String, String>,
    ) -> Result<PathBuf, TemplateError> {
        let filename = self.render_filename(template, variables)?;
        let unique = self.unique_filename(&filename)?;
        let full = self.output_dir.join(&unique);

        if !is_strict_descendant(&full, &self.output_dir) {
            return Err(TemplateError::OutsideOutputDir);
        }

        debug!(filename = %unique, "output path rendered");
        Ok(full)
    }

    fn unique_filename(&self, filename: &str) -> Result<String, TemplateError> {
        if !self.output_dir.join(filename).exists() {
            return Ok(filename.to_string());
        }

        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (filename.to_string(), String::new()),
        };

        for counter in 1..=MAX_COLLISION_SUFFIX {
            let candidate = format!("{stem}_{counter}{ext}");
            if !self.output_dir.join(&candidate).exists() {
                debug!(original = filename, unique = %candidate, "collision suffix applied");
                return Ok(candidate);
            }
        }

        Err(TemplateError::CollisionLimit)
    }
}

/// Lexical strict-descendant check. The candidate may not exist yet, so the
/// comparison normalizes `.`/`..` components without touching the filesystem.
pub fn is_strict_descendant(candidate: &Path, root: &Path) -> bool {
    let candidate = lexical_normalize(candidate);
    let root = lexical_normalize(root);
    candidate != root && candidate.starts_with(&root)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_default_template() {
        let template = ValidatedTemplate::parse(DEFAULT_TEMPLATE).unwrap();
        let rendered = template.render(&vars(&[
            ("title", "My Video"),
            ("id", "abc123"),
            ("ext", "mp4"),
        ]));
        assert_eq!(rendered, "My Video-abc123.mp4");
    }

    #[test]
    fn rejects_traversal() {
        assert_eq!(
            ValidatedTemplate::parse("../etc/%(id)s.%(ext)s"),
            Err(TemplateError::Traversal)
        );
        assert_eq!(
            ValidatedTemplate::parse("foo/..\\bar.%(ext)s"),
            Err(TemplateError::Traversal)
        );
    }

    #[test]
    fn rejects_absolute_paths() {
        assert_eq!(
            ValidatedTemplate::parse("/etc/%(id)s"),
            Err(TemplateError::AbsolutePath)
        );
        assert_eq!(
            ValidatedTemplate::parse("C:\\temp\\%(id)s"),
            Err(TemplateError::AbsolutePath)
        );
    }

    #[test]
    fn rejects_unknown_placeholders() {
        assert_eq!(
            ValidatedTemplate::parse("%(playlist)s.%(ext)s"),
            Err(TemplateError::UnknownPlaceholder("playlist".to_string()))
        );
    }

    #[test]
    fn rejects_separator_in_placeholder() {
        assert!(matches!(
            ValidatedTemplate::parse("%(title/..)s"),
            Err(TemplateError::SeparatorInPlaceholder(_))
        ));
    }

    #[test]
    fn rejects_unterminated_placeholder() {
        assert_eq!(
            ValidatedTemplate::parse("%(title"),
            Err(TemplateError::Unterminated)
        );
        assert_eq!(
            ValidatedTemplate::parse("%(title)x"),
            Err(TemplateError::Unterminated)
        );
    }

    #[test]
    fn missing_variable_renders_na() {
        let template = ValidatedTemplate::parse("%(uploader)s.%(ext)s").unwrap();
        assert_eq!(template.render(&vars(&[("ext", "mp4")])), "NA.mp4");
    }

    #[test]
    fn values_with_separators_are_neutralized() {
        let template = ValidatedTemplate::parse("%(title)s.%(ext)s").unwrap();
        let rendered = template.render(&vars(&[("title", "../../etc/passwd"), ("ext", "mp4")]));
        assert!(!rendered.contains('/'));
        assert_eq!(rendered, ".._.._etc_passwd.mp4");
    }

    #[test]
    fn sanitize_value_truncates_to_200_codepoints() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_value(&long).chars().count(), 200);
    }

    #[test]
    fn sanitize_value_strips_control_chars() {
        assert_eq!(sanitize_value("a\x00b\x1fc"), "abc");
    }

    #[test]
    fn sanitize_filename_replaces_illegal_chars() {
        assert_eq!(sanitize_filename("a<b>c:d\"e|f?g*h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn sanitize_filename_handles_windows_reserved() {
        assert_eq!(sanitize_filename("CON.mp4"), "_CON.mp4");
        assert_eq!(sanitize_filename("aux"), "_aux");
    }

    #[test]
    fn sanitize_filename_empty_becomes_unnamed() {
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("..."), "unnamed");
    }

    #[test]
    fn idempotent_rendering() {
        let renderer = TemplateRenderer::new("/tmp/vidgate-out");
        let variables = vars(&[("title", "T"), ("id", "abc"), ("ext", "mp4")]);
        let a = renderer.render_filename(None, &variables).unwrap();
        let b = renderer.render_filename(None, &variables).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn collision_suffixes_applied_in_order() {
        let dir = TempDir::new().unwrap();
        let renderer = TemplateRenderer::new(dir.path());
        let variables = vars(&[("title", "T"), ("id", "abc"), ("ext", "mp4")]);

        let first = renderer.build_output_path(None, &variables).unwrap();
        assert_eq!(first.file_name().unwrap(), "T-abc.mp4");
        std::fs::write(&first, b"x").unwrap();

        let second = renderer.build_output_path(None, &variables).unwrap();
        assert_eq!(second.file_name().unwrap(), "T-abc_1.mp4");
        std::fs::write(&second, b"x").unwrap();

        let third = renderer.build_output_path(None, &variables).unwrap();
        assert_eq!(third.file_name().unwrap(), "T-abc_2.mp4");
    }

    #[test]
    fn rendered_path_is_strict_descendant() {
        let dir = TempDir::new().unwrap();
        let renderer = TemplateRenderer::new(dir.path());
        let variables = vars(&[("title", "../escape"), ("id", "abc"), ("ext", "mp4")]);
        let path = renderer.build_output_path(None, &variables).unwrap();
        assert!(is_strict_descendant(&path, dir.path()));
    }

    #[test]
    fn strict_descendant_check() {
        assert!(is_strict_descendant(
            Path::new("/data/out/file.mp4"),
            Path::new("/data/out")
        ));
        assert!(!is_strict_descendant(
            Path::new("/data/out/../etc/passwd"),
            Path::new("/data/out")
        ));
        assert!(!is_strict_descendant(Path::new("/data/out"), Path::new("/data/out")));
    }
}
