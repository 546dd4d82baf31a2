//! The deployment manifest, `deploy.toml`.
//!
//! ```toml
//! [source]
//! zip = "build/artifacts.zip"
//!
//! [target]
//! workspace = "synapse-dev"
//! types = ["linkedService", "notebook", "pipeline"]
//!
//! [auth]
//! method = "azure-cli"
//!
//! [publish]
//! on-error = "continue"
//!
//! [transform]
//! replacements = "env/dev.yaml"
//! exclude = ["Default"]
//! ```
//!
//! Only `[source]` and `[target]` are required. Relative paths are resolved against the
//! directory containing the manifest.

use std::path::{Path, PathBuf};

use crate::artifact::{ArtifactType, Matching, NameStyle};
use crate::client::{DEFAULT_API_VERSION, RestWorkspaceClient, is_http_base};
use crate::credential::{AccessToken, AuthMethod};
use crate::publish::{Concurrency, ErrorPolicy};
use crate::source::{Source, SourceParseError};
use crate::transform::{ReplacementRules, TransformError};

/// The conventional file name of a deployment manifest.
pub const MANIFEST_FILE_NAME: &str = "deploy.toml";

/// Errors encountered when reading a deployment manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    /// A required table is absent.
    #[error("required table '{name}' not found in manifest")]
    TableNotFound { name: &'static str },

    /// A toml value was expected to be a table.
    #[error("expected value '{name}' to be a toml table")]
    ValueNotTable { name: &'static str },

    #[error(transparent)]
    SourceInvalid(#[from] SourceParseError),

    #[error(transparent)]
    TomlInvalid(#[from] toml::de::Error),

    /// `[target]` must name exactly one of `workspace` or `endpoint`.
    #[error("[target] must set exactly one of 'workspace' or 'endpoint'")]
    TargetInvalid,

    #[error(transparent)]
    UrlInvalid(#[from] url::ParseError),

    /// The target endpoint is not an absolute `http` or `https` URL.
    #[error("[target] endpoint '{endpoint}' must be an absolute http or https URL")]
    EndpointInvalid { endpoint: String },

    /// Neither the manifest nor the caller chose an error policy.
    #[error("no error policy chosen: set [publish] on-error to 'fail-fast' or 'continue'")]
    ErrorPolicyMissing,
}

/// The `[target]` table: which workspace to publish to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetConfig {
    /// Workspace name, published to at `https://{workspace}.dev.azuresynapse.net`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// An explicit API base URL, used instead of `workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// The artifact types the target accepts. All types when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ArtifactType>>,
    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl TargetConfig {
    /// How the target names artifacts.
    pub fn name_style(&self) -> NameStyle {
        RestWorkspaceClient::NAME_STYLE
    }

    pub fn base_url(&self) -> Result<url::Url, ManifestError> {
        match (&self.workspace, &self.endpoint) {
            (Some(workspace), None) => Ok(RestWorkspaceClient::workspace_url(workspace)?),
            (None, Some(endpoint)) => match url::Url::parse(endpoint) {
                Ok(url) if is_http_base(&url) => Ok(url),
                _ => Err(ManifestError::EndpointInvalid {
                    endpoint: endpoint.clone(),
                }),
            },
            _ => Err(ManifestError::TargetInvalid),
        }
    }
}

/// The `[publish]` table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PublishConfig {
    /// No default: a run refuses to start until a policy is chosen here or by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub matching: Matching,
    #[serde(default = "default_json_only")]
    pub json_only: bool,
}

fn default_json_only() -> bool {
    true
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            on_error: None,
            parallel: false,
            matching: Matching::default(),
            json_only: default_json_only(),
        }
    }
}

/// The `[transform]` table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TransformConfig {
    /// A YAML file with a `replacements` mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacements: Option<PathBuf>,
    /// Artifacts whose file name contains one of these literal substrings are published without
    /// replacements. Workspace-default linked services are left alone unless this is overridden.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_exclude() -> Vec<String> {
    vec!["Default".to_string()]
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            replacements: None,
            exclude: default_exclude(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ManifestTables {
    target: TargetConfig,
    #[serde(default)]
    auth: AuthMethod,
    #[serde(default)]
    publish: PublishConfig,
    #[serde(default)]
    transform: TransformConfig,
}

/// A parsed `deploy.toml`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeployManifest {
    pub source: Source,
    pub target: TargetConfig,
    pub auth: AuthMethod,
    pub publish: PublishConfig,
    pub transform: TransformConfig,
}

impl DeployManifest {
    /// Parse a manifest document. Relative paths are left as they are.
    pub fn try_parse_toml<S: AsRef<str>>(document: S) -> Result<Self, ManifestError> {
        let mut table = document.as_ref().parse::<toml::Table>()?;
        let source = match table.remove("source") {
            Some(toml::Value::Table(source)) => Source::parse(source)?,
            Some(_) => return Err(ManifestError::ValueNotTable { name: "source" }),
            None => return Err(ManifestError::TableNotFound { name: "source" }),
        };
        if !table.contains_key("target") {
            return Err(ManifestError::TableNotFound { name: "target" });
        }
        let tables: ManifestTables = toml::Value::Table(table).try_into()?;
        tables.target.base_url()?;
        Ok(Self {
            source,
            target: tables.target,
            auth: tables.auth,
            publish: tables.publish,
            transform: tables.transform,
        })
    }

    /// Read and parse the manifest at `path`, resolving relative paths against its directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|err| ManifestError::Read {
            path: path.to_path_buf(),
            err,
        })?;
        let manifest = Self::try_parse_toml(document)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(manifest.relative_to(base))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        self.source = self.source.relative_to(base);
        if let Some(file) = self.transform.replacements.take() {
            self.transform.replacements = Some(if file.is_relative() {
                base.join(file)
            } else {
                file
            });
        }
        self
    }

    /// The error policy, preferring the caller's choice over the manifest's.
    pub fn error_policy(&self, choice: Option<ErrorPolicy>) -> Result<ErrorPolicy, ManifestError> {
        choice
            .or(self.publish.on_error)
            .ok_or(ManifestError::ErrorPolicyMissing)
    }

    pub fn concurrency(&self) -> Concurrency {
        if self.publish.parallel {
            Concurrency::Parallel
        } else {
            Concurrency::Sequential
        }
    }

    /// Rules from the replacement file, if any, followed by `extra`.
    pub fn replacement_rules(
        &self,
        extra: ReplacementRules,
    ) -> Result<ReplacementRules, TransformError> {
        let mut rules = match &self.transform.replacements {
            Some(file) => ReplacementRules::load(file)?,
            None => ReplacementRules::new(),
        };
        rules.extend(extra);
        Ok(rules)
    }

    /// A REST client for the target, authenticated with `token`.
    pub fn rest_client(&self, token: &AccessToken) -> Result<RestWorkspaceClient, crate::Error> {
        let mut client = RestWorkspaceClient::new(self.target.base_url()?, token.secret())?
            .with_api_version(&self.target.api_version);
        if let Some(types) = &self.target.types {
            client = client.with_supported_types(types.iter().copied());
        }
        if let Some(secs) = self.target.timeout_secs {
            client = client.with_timeout(std::time::Duration::from_secs(secs))?;
        }
        Ok(client)
    }
}

/// Search `dir` and its parents for a `deploy.toml`.
pub fn find_manifest<P: AsRef<Path>>(dir: P) -> Option<PathBuf> {
    let mut current_dir = dir.as_ref().to_path_buf();
    loop {
        let manifest = current_dir.join(MANIFEST_FILE_NAME);
        if manifest.is_file() {
            break Some(manifest);
        }
        if !current_dir.pop() {
            break None;
        }
    }
}

#[cfg(test)]
use ManifestError::*;
