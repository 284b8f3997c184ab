//! Download source descriptors: URL, checksum, archive kind.

use crate::core::TomeiError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// A concrete download descriptor, either declared inline in a manifest or
/// produced by a package resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Source {
    /// Artifact URL. Manifests must use `https://`.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSpec>,
    /// Omitted means "guess from the URL extension".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveKind>,
}

impl Source {
    /// The archive kind, falling back to a guess from the URL.
    pub fn archive_kind(&self) -> ArchiveKind {
        self.archive.unwrap_or_else(|| ArchiveKind::guess(&self.url))
    }

    /// The artifact filename, used to match checksum-file lines.
    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }

    pub(crate) fn validate(&self, resource: &str) -> Result<(), TomeiError> {
        if !self.url.starts_with("https://") {
            return Err(TomeiError::Schema {
                resource: resource.to_string(),
                field: "source.url".to_string(),
                reason: format!("URL must use https://, got {}", self.url),
            });
        }
        if let Some(checksum) = &self.checksum {
            checksum.validate(resource)?;
        }
        Ok(())
    }
}

/// A checksum declaration: an inline `sha256:`/`sha512:` literal or the URL
/// of a checksums file whose lines look like `<hex>  <filename>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumSpec(pub String);

/// Parsed view of a [`ChecksumSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum<'a> {
    Sha256(&'a str),
    Sha512(&'a str),
    Url(&'a str),
}

fn inline_checksum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(sha256:[0-9a-f]{64}|sha512:[0-9a-f]{128})$").unwrap())
}

impl ChecksumSpec {
    pub fn parse(&self) -> Checksum<'_> {
        if let Some(hex) = self.0.strip_prefix("sha256:") {
            Checksum::Sha256(hex)
        } else if let Some(hex) = self.0.strip_prefix("sha512:") {
            Checksum::Sha512(hex)
        } else {
            Checksum::Url(&self.0)
        }
    }

    fn validate(&self, resource: &str) -> Result<(), TomeiError> {
        let ok = match self.parse() {
            Checksum::Sha256(_) | Checksum::Sha512(_) => inline_checksum_re().is_match(&self.0),
            Checksum::Url(url) => url.starts_with("https://"),
        };
        if ok {
            Ok(())
        } else {
            Err(TomeiError::Schema {
                resource: resource.to_string(),
                field: "source.checksum".to_string(),
                reason: format!(
                    "expected sha256:<64 hex>, sha512:<128 hex>, or an https:// URL, got {}",
                    self.0
                ),
            })
        }
    }
}

/// Supported archive formats for downloaded artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveKind {
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.xz")]
    TarXz,
    #[serde(rename = "zip")]
    Zip,
    /// A bare binary: written to a file as-is with the exec bit set.
    #[serde(rename = "raw")]
    Raw,
}

impl ArchiveKind {
    /// Guesses the kind from a URL's extension; unknown extensions are `raw`.
    pub fn guess(url: &str) -> Self {
        if url.ends_with(".tar.gz") || url.ends_with(".tgz") {
            Self::TarGz
        } else if url.ends_with(".tar.xz") || url.ends_with(".txz") {
            Self::TarXz
        } else if url.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TarGz => write!(f, "tar.gz"),
            Self::TarXz => write!(f, "tar.xz"),
            Self::Zip => write!(f, "zip"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str, checksum: Option<&str>) -> Source {
        Source {
            url: url.to_string(),
            checksum: checksum.map(|c| ChecksumSpec(c.to_string())),
            archive: None,
        }
    }

    #[test]
    fn archive_guess_from_url() {
        assert_eq!(ArchiveKind::guess("https://x/go1.25.6.linux-arm64.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::guess("https://x/tool.tar.xz"), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::guess("https://x/tool.zip"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::guess("https://x/tool"), ArchiveKind::Raw);
    }

    #[test]
    fn inline_checksum_validation() {
        let good = source("https://x/a", Some(&format!("sha256:{}", "a".repeat(64))));
        assert!(good.validate("Tool/a").is_ok());

        let short = source("https://x/a", Some("sha256:abc"));
        assert!(short.validate("Tool/a").is_err());

        let plain_http = source("http://x/a", None);
        assert!(plain_http.validate("Tool/a").is_err());
    }

    #[test]
    fn checksum_url_parses() {
        let spec = ChecksumSpec("https://x/checksums.txt".to_string());
        assert_eq!(spec.parse(), Checksum::Url("https://x/checksums.txt"));
    }

    #[test]
    fn filename_is_last_segment() {
        let s = source("https://dl.example.com/gh/2.86.0/gh_linux_arm64.tar.gz", None);
        assert_eq!(s.filename(), "gh_linux_arm64.tar.gz");
    }
}
