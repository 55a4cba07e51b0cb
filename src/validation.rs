//! Request input validation.
//!
//! URL, format-ID and parameter checks performed before any job is created
//! or any extractor process is spawned. All checks are pure.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Domains accepted by the default URL validator.
const DEFAULT_ALLOWED_DOMAINS: &[&str] =
    &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

/// Schemes that are rejected outright regardless of domain.
const DANGEROUS_SCHEMES: &[&str] = &["javascript", "data", "file", "vbscript", "about"];

/// Maximum accepted length for a format ID.
const MAX_FORMAT_ID_LENGTH: usize = 64;

/// Format selectors accepted beyond the plain ID pattern.
const SPECIAL_SELECTORS: &[&str] = &[
    "best",
    "worst",
    "bestvideo",
    "worstvideo",
    "bestaudio",
    "worstaudio",
    "bestvideo+bestaudio",
    "best[height<=720]",
    "best[height<=1080]",
];

static FORMAT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9+/-]+$").expect("format id pattern"));

static LANGUAGE_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[a-zA-Z]{2,4})?$").expect("language pattern"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is required")]
    EmptyUrl,
    #[error("URL scheme '{0}' is not allowed")]
    DangerousScheme(String),
    #[error("URL must use http or https scheme")]
    UnsupportedScheme,
    #[error("URL must include a valid domain")]
    MissingDomain,
    #[error("domain '{0}' is not in the allowed list")]
    DomainNotAllowed(String),
    #[error("format ID is required")]
    EmptyFormatId,
    #[error("format ID exceeds maximum length of {MAX_FORMAT_ID_LENGTH}")]
    FormatIdTooLong,
    #[error("format ID contains invalid characters")]
    FormatIdInvalidChars,
    #[error("invalid audio format '{0}', valid options: mp3, m4a, wav, opus")]
    InvalidAudioFormat(String),
    #[error("invalid audio quality '{0}', valid options: 128, 192, 320")]
    InvalidAudioQuality(String),
    #[error("invalid language code, use ISO 639 format (e.g. 'en', 'en-US')")]
    InvalidLanguageCode,
}

/// Supported audio output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
    Opus,
}

impl AudioFormat {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "wav" => Ok(Self::Wav),
            "opus" => Ok(Self::Opus),
            other => Err(ValidationError::InvalidAudioFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Opus => "opus",
        }
    }

    /// Lossy formats get an explicit best-quality flag on extraction.
    pub fn wants_quality_flag(&self) -> bool {
        matches!(self, Self::Mp3 | Self::M4a)
    }
}

/// Supported audio quality levels (kbps).
pub fn validate_audio_quality(quality: &str) -> Result<(), ValidationError> {
    match quality {
        "128" | "192" | "320" => Ok(()),
        other => Err(ValidationError::InvalidAudioQuality(other.to_string())),
    }
}

/// Validates URLs against an allowed domain whitelist.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    allowed_domains: HashSet<String>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self {
            allowed_domains: DEFAULT_ALLOWED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl UrlValidator {
    pub fn new(allowed_domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().collect(),
        }
    }

    pub fn validate(&self, url: &str) -> Result<(), ValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let parsed = Url::parse(url).map_err(|_| ValidationError::MissingDomain)?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        if DANGEROUS_SCHEMES.contains(&scheme.as_str()) {
            return Err(ValidationError::DangerousScheme(scheme));
        }
        if scheme != "http" && scheme != "https" {
            return Err(ValidationError::UnsupportedScheme);
        }

        let domain = parsed
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or(ValidationError::MissingDomain)?;

        if !self.allowed_domains.contains(&domain) {
            return Err(ValidationError::DomainNotAllowed(domain));
        }

        Ok(())
    }

    pub fn is_valid(&self, url: &str) -> bool {
        self.validate(url).is_ok()
    }
}

/// Validate an extractor format ID or selector.
pub fn validate_format_id(format_id: &str) -> Result<(), ValidationError> {
    let format_id = format_id.trim();
    if format_id.is_empty() {
        return Err(ValidationError::EmptyFormatId);
    }
    if format_id.len() > MAX_FORMAT_ID_LENGTH {
        return Err(ValidationError::FormatIdTooLong);
    }
    if SPECIAL_SELECTORS.contains(&format_id.to_ascii_lowercase().as_str()) {
        return Ok(());
    }
    if !FORMAT_ID_PATTERN.is_match(format_id) {
        return Err(ValidationError::FormatIdInvalidChars);
    }
    Ok(())
}

/// Validate a subtitle language code (ISO 639, optional region).
pub fn validate_language_code(lang: &str) -> Result<(), ValidationError> {
    let lang = lang.trim();
    if !LANGUAGE_CODE_PATTERN.is_match(&lang.to_ascii_lowercase()) {
        return Err(ValidationError::InvalidLanguageCode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_standard_watch_urls() {
        let validator = UrlValidator::default();
        assert!(validator.is_valid("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(validator.is_valid("https://youtu.be/dQw4w9WgXcQ"));
        assert!(validator.is_valid("http://m.youtube.com/watch?v=abc12345678"));
    }

    #[test]
    fn rejects_unlisted_domains() {
        let validator = UrlValidator::default();
        assert_eq!(
            validator.validate("https://vimeo.com/12345"),
            Err(ValidationError::DomainNotAllowed("vimeo.com".to_string()))
        );
    }

    #[test]
    fn rejects_dangerous_schemes() {
        let validator = UrlValidator::default();
        assert!(matches!(
            validator.validate("javascript:alert(1)"),
            Err(ValidationError::DangerousScheme(_))
        ));
        assert!(matches!(
            validator.validate("file:///etc/passwd"),
            Err(ValidationError::DangerousScheme(_))
        ));
    }

    #[test]
    fn rejects_empty_and_garbage() {
        let validator = UrlValidator::default();
        assert_eq!(validator.validate(""), Err(ValidationError::EmptyUrl));
        assert_eq!(
            validator.validate("   "),
            Err(ValidationError::EmptyUrl)
        );
        assert!(validator.validate("not a url").is_err());
    }

    #[test]
    fn domain_match_ignores_case() {
        let validator = UrlValidator::default();
        assert!(validator.is_valid("https://WWW.YOUTUBE.COM/watch?v=abc12345678"));
    }

    #[test]
    fn format_id_accepts_plain_and_merged() {
        assert!(validate_format_id("22").is_ok());
        assert!(validate_format_id("137+140").is_ok());
        assert!(validate_format_id("hls-1080/fallback").is_ok());
    }

    #[test]
    fn format_id_accepts_special_selectors() {
        assert!(validate_format_id("best").is_ok());
        assert!(validate_format_id("bestvideo+bestaudio").is_ok());
        assert!(validate_format_id("best[height<=720]").is_ok());
    }

    #[test]
    fn format_id_rejects_shell_metacharacters() {
        assert!(validate_format_id("22; rm -rf /").is_err());
        assert!(validate_format_id("$(whoami)").is_err());
        assert!(validate_format_id("").is_err());
    }

    #[test]
    fn format_id_rejects_underscore() {
        assert_eq!(
            validate_format_id("abc_123"),
            Err(ValidationError::FormatIdInvalidChars)
        );
    }

    #[test]
    fn format_id_rejects_overlong_input() {
        let long = "a".repeat(MAX_FORMAT_ID_LENGTH + 1);
        assert_eq!(
            validate_format_id(&long),
            Err(ValidationError::FormatIdTooLong)
        );
        let ok = "a".repeat(MAX_FORMAT_ID_LENGTH);
        assert!(validate_format_id(&ok).is_ok());
    }

    #[test]
    fn audio_format_whitelist() {
        assert_eq!(AudioFormat::parse("mp3").unwrap(), AudioFormat::Mp3);
        assert_eq!(AudioFormat::parse("OPUS").unwrap(), AudioFormat::Opus);
        assert!(AudioFormat::parse("flac").is_err());
    }

    #[test]
    fn audio_quality_whitelist() {
        assert!(validate_audio_quality("128").is_ok());
        assert!(validate_audio_quality("320").is_ok());
        assert!(validate_audio_quality("256").is_err());
    }

    #[test]
    fn language_codes() {
        assert!(validate_language_code("en").is_ok());
        assert!(validate_language_code("en-US").is_ok());
        assert!(validate_language_code("fil").is_ok());
        assert!(validate_language_code("english").is_err());
        assert!(validate_language_code("e").is_err());
    }
}
