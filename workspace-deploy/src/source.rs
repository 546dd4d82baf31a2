//! Where a deployment's artifacts come from.
//!
//! A source is declared in the `[source]` table of the deployment manifest. Exactly one key of
//! the table names the kind of source:
//!
//! ```toml
//! [source]
//! zip = "build/artifacts.zip"
//! ```
//!
//! Acquiring a source either yields archive bytes of a declared [`ArchiveKind`], or, for
//! repository sources, the entries themselves.

use std::path::{Path, PathBuf};

use crate::archive::{ArchiveError, ArchiveKind, ArchiveMap};
use crate::gitlab::GitlabSource;
#[cfg(feature = "registry")]
use crate::registry::RegistrySource;

pub(crate) type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors encountered when parsing the `[source]` table.
#[derive(Debug, thiserror::Error)]
pub enum SourceParseError {
    /// No key of the table names a known source variant.
    #[error("expected a source type in the [source] table: expected one of: {known}", known = SOURCE_VARIANTS.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    VariantUnknown,

    /// More than one key of the table names a source variant.
    #[error("multiple source types in the [source] table: expected exactly one of: {known}", known = SOURCE_VARIANTS.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    VariantMultiple,

    /// The source variant depends on a disabled feature.
    #[error("source has type '{variant}' but needs disabled feature '{requires}'")]
    VariantDisabled { variant: String, requires: String },

    /// A toml deserialisation error occurred.
    #[error(transparent)]
    TomlInvalid(#[from] toml::de::Error),
}

/// Errors raised while acquiring a source. Any of these aborts a deployment before anything
/// is published.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read archive {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("{url} answered with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    UrlInvalid(#[from] url::ParseError),

    #[error("'{url}' is not an http or https base URL")]
    BaseUrl { url: String },

    #[error("content of '{path}' is not valid base64")]
    Base64 {
        path: String,
        #[source]
        err: base64::DecodeError,
    },

    #[error("failed to pull '{reference}' from the registry")]
    Registry {
        reference: String,
        #[source]
        err: BoxedError,
    },

    #[error("'{reference}' has no layers")]
    EmptyArtifact { reference: String },
}

/// What acquiring a source produced.
#[derive(Debug)]
pub enum Fetched {
    /// Archive bytes still to be unpacked.
    Archive { kind: ArchiveKind, bytes: Vec<u8> },
    /// Entries read directly from a repository.
    Entries(ArchiveMap),
}

impl Fetched {
    /// Unpack if necessary, yielding the entry map.
    pub fn into_entries(self) -> Result<ArchiveMap, SourceError> {
        match self {
            Self::Archive { kind, bytes } => Ok(kind.extract(&bytes)?),
            Self::Entries(entries) => Ok(entries),
        }
    }
}

/// A zip archive on the local filesystem.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct ZipFile {
    #[serde(rename = "zip")]
    pub(crate) path: PathBuf,
}

/// A gzip-compressed tar archive on the local filesystem.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct TarFile {
    #[serde(rename = "tar")]
    pub(crate) path: PathBuf,
}

fn read_archive(path: &Path, kind: ArchiveKind) -> Result<Fetched, SourceError> {
    tracing::info!(path = %path.display(), %kind, "reading archive");
    let bytes = std::fs::read(path).map_err(|err| SourceError::Read {
        path: path.to_path_buf(),
        err,
    })?;
    Ok(Fetched::Archive { kind, bytes })
}

/// Allowed source variants.
#[derive(Debug, PartialEq, Eq, Hash)]
enum SourceVariant {
    Zip,
    Tar,
    Gitlab,
    Registry,
}

const SOURCE_VARIANTS: &[SourceVariant] = &[
    SourceVariant::Zip,
    SourceVariant::Tar,
    SourceVariant::Gitlab,
    SourceVariant::Registry,
];

impl std::fmt::Display for SourceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zip => write!(f, "zip"),
            Self::Tar => write!(f, "tar"),
            Self::Gitlab => write!(f, "gitlab"),
            Self::Registry => write!(f, "registry"),
        }
    }
}

impl SourceVariant {
    fn from<S: AsRef<str>>(name: S) -> Option<Self> {
        match name.as_ref() {
            "zip" => Some(Self::Zip),
            "tar" => Some(Self::Tar),
            "gitlab" => Some(Self::Gitlab),
            "registry" => Some(Self::Registry),
            _ => None,
        }
    }

    fn is_enabled(&self) -> bool {
        match self {
            Self::Registry => cfg!(feature = "registry"),
            _ => true,
        }
    }

    fn feature(&self) -> Option<&'static str> {
        match self {
            Self::Registry => Some("registry"),
            _ => None,
        }
    }
}

/// The `[source]` table of a deployment manifest.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Source {
    Zip(ZipFile),
    Tar(TarFile),
    Gitlab(GitlabSource),
    #[cfg(feature = "registry")]
    Registry(RegistrySource),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Zip(zip) => write!(f, "zip archive {}", zip.path.display()),
            Source::Tar(tar) => write!(f, "tar archive {}", tar.path.display()),
            Source::Gitlab(gitlab) => write!(f, "gitlab repository {gitlab}"),
            #[cfg(feature = "registry")]
            Source::Registry(registry) => write!(f, "registry artifact {registry}"),
        }
    }
}

impl Source {
    /// A local zip archive.
    pub fn zip<P: Into<PathBuf>>(path: P) -> Self {
        Self::Zip(ZipFile { path: path.into() })
    }

    /// A local gzip-compressed tar archive.
    pub fn tar<P: Into<PathBuf>>(path: P) -> Self {
        Self::Tar(TarFile { path: path.into() })
    }

    /// Acquire the source. Network sources read their credentials from the environment.
    pub fn fetch(&self) -> Result<Fetched, SourceError> {
        match self {
            Source::Zip(zip) => read_archive(&zip.path, ArchiveKind::Zip),
            Source::Tar(tar) => read_archive(&tar.path, ArchiveKind::TarGz),
            Source::Gitlab(gitlab) => gitlab.fetch().map(Fetched::Entries),
            #[cfg(feature = "registry")]
            Source::Registry(registry) => registry.fetch(),
        }
    }

    /// Acquire the source and unpack it.
    pub fn entries(&self) -> Result<ArchiveMap, SourceError> {
        self.fetch()?.into_entries()
    }

    /// Interpret relative archive paths as relative to `base`.
    pub fn relative_to<P: AsRef<Path>>(self, base: P) -> Self {
        let base = base.as_ref();
        match self {
            Source::Zip(ZipFile { path }) if path.is_relative() => Self::zip(base.join(path)),
            Source::Tar(TarFile { path }) if path.is_relative() => Self::tar(base.join(path)),
            other => other,
        }
    }

    fn enforce_one_valid_variant(source: &toml::Table) -> Result<SourceVariant, SourceParseError> {
        let mut detected_variant = None;
        for key in source.keys() {
            if let Some(variant) = SourceVariant::from(key) {
                if detected_variant.is_some() {
                    return Err(SourceParseError::VariantMultiple);
                }
                if !variant.is_enabled() {
                    return Err(SourceParseError::VariantDisabled {
                        variant: variant.to_string(),
                        requires: variant.feature().unwrap_or("?").to_string(),
                    });
                }
                detected_variant = Some(variant);
            }
        }
        detected_variant.ok_or(SourceParseError::VariantUnknown)
    }

    /// Parse a TOML table into a `Source`. Exactly one key in the table must identify a valid,
    /// enabled source type, otherwise an error is returned.
    pub fn parse(source: toml::Table) -> Result<Self, SourceParseError> {
        Self::enforce_one_valid_variant(&source)?;
        Ok(toml::Value::Table(source).try_into::<Self>()?)
    }
}

#[cfg(test)]
use SourceParseError::*;


#[cfg(test)]
mod test_local_sources {
    use super::*;
    use crate::archive::test_archives::{tar_gz_of, zip_of};

    #[test]
    fn zip_file_is_read_and_extracted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("artifacts.zip"),
            zip_of(&[("notebook/nb1.json", b"{}")]),
        )
        .unwrap();
        let entries = Source::zip("artifacts.zip")
            .relative_to(dir.path())
            .entries()
            .unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["notebook/nb1.json"]);
    }

    #[test]
    fn tar_kind_is_taken_from_the_source_not_the_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.zip");
        std::fs::write(&path, tar_gz_of(&[("dataset/d.json", b"{}")])).unwrap();
        let fetched = Source::tar(&path).fetch().unwrap();
        assert!(matches!(
            fetched,
            Fetched::Archive {
                kind: ArchiveKind::TarGz,
                ..
            }
        ));
        assert!(Source::zip(&path).entries().is_err());
    }

    #[test]
    fn missing_archive_is_a_read_error() {
        let result = Source::zip("/no/such/archive.zip").fetch();
        assert!(matches!(result, Err(SourceError::Read { .. })));
    }

    #[test]
    fn absolute_paths_are_not_rebased() {
        let source = Source::zip("/abs/a.zip").relative_to("/base");
        assert_eq!(source, Source::zip("/abs/a.zip"));
    }
}
