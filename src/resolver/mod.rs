//! Package resolver plug-in interface.
//!
//! A resolver turns `(package, version, os, arch)` into a concrete download
//! descriptor. The real implementation (e.g. an aqua-registry client) lives
//! outside this crate; the engine only depends on the trait, configured per
//! installer name at construction. A simple URL-template resolver ships here
//! for registries whose layout is predictable and for tests.

use crate::core::TomeiError;
use crate::resource::{ArchiveKind, ChecksumSpec, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait PackageResolver: Send + Sync {
    /// Resolves a package reference for a platform into a download source.
    async fn resolve(
        &self,
        package: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<Source, TomeiError>;
}

/// Resolvers keyed by installer name.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn PackageResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, installer: impl Into<String>, resolver: Arc<dyn PackageResolver>) {
        self.resolvers.insert(installer.into(), resolver);
    }

    pub fn get(&self, installer: &str) -> Option<Arc<dyn PackageResolver>> {
        self.resolvers.get(installer).cloned()
    }
}

/// Expands `{package}`, `{version}`, `{os}`, `{arch}` in a URL template.
pub struct UrlTemplateResolver {
    pub url_template: String,
    pub checksum_template: Option<String>,
    pub archive: Option<ArchiveKind>,
}

impl UrlTemplateResolver {
    fn expand(template: &str, package: &str, version: &str, os: &str, arch: &str) -> String {
        template
            .replace("{package}", package)
            .replace("{version}", version)
            .replace("{os}", os)
            .replace("{arch}", arch)
    }
}

#[async_trait]
impl PackageResolver for UrlTemplateResolver {
    async fn resolve(
        &self,
        package: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<Source, TomeiError> {
        Ok(Source {
            url: Self::expand(&self.url_template, package, version, os, arch),
            checksum: self
                .checksum_template
                .as_deref()
                .map(|t| ChecksumSpec(Self::expand(t, package, version, os, arch))),
            archive: self.archive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn template_resolver_expands_placeholders() {
        let resolver = UrlTemplateResolver {
            url_template: "https://dl.example.com/{package}/{version}/{package}_{os}_{arch}.tar.gz"
                .to_string(),
            checksum_template: Some(
                "https://dl.example.com/{package}/{version}/checksums.txt".to_string(),
            ),
            archive: None,
        };

        let source = resolver.resolve("gh", "2.86.0", "linux", "arm64").await.unwrap();
        assert_eq!(source.url, "https://dl.example.com/gh/2.86.0/gh_linux_arm64.tar.gz");
        assert_eq!(source.archive_kind(), ArchiveKind::TarGz);
        assert_eq!(
            source.checksum.unwrap().0,
            "https://dl.example.com/gh/2.86.0/checksums.txt"
        );
    }

    #[test]
    fn registry_lookup_by_installer_name() {
        let mut registry = ResolverRegistry::new();
        registry.register(
            "aqua",
            Arc::new(UrlTemplateResolver {
                url_template: "https://x/{package}".to_string(),
                checksum_template: None,
                archive: None,
            }),
        );
        assert!(registry.get("aqua").is_some());
        assert!(registry.get("missing").is_none());
    }
}
