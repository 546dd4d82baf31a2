//! Pulling packaged artifacts from an OCI registry.

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;

use crate::archive::ArchiveKind;
use crate::source::{BoxedError, Fetched, SourceError};

pub const REGISTRY_USERNAME_ENV: &str = "REGISTRY_USERNAME";
pub const REGISTRY_PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Layer media types accepted when pulling. Packaged artifacts are pushed with whatever media
/// type the packaging tool chose, so this is deliberately broad.
const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    "application/zip",
    "application/gzip",
    "application/x-gzip",
    "application/x-tar",
    "application/octet-stream",
    "application/vnd.oci.image.layer.v1.tar",
    "application/vnd.oci.image.layer.v1.tar+gzip",
    "application/vnd.docker.image.rootfs.diff.tar.gzip",
];

/// An artifact pushed to a registry as a single-layer archive:
///
/// ```toml
/// [source]
/// registry = "myacr.azurecr.io/synapse/artifacts:1.2.0"
/// format = "zip"
/// ```
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RegistrySource {
    #[serde(rename = "registry")]
    pub(crate) reference: String,
    #[serde(default = "default_format")]
    pub(crate) format: ArchiveKind,
    /// Talk plain HTTP to the registry.
    #[serde(default)]
    pub(crate) insecure: bool,
    #[serde(default = "default_username_env")]
    pub(crate) username_env: String,
    #[serde(default = "default_password_env")]
    pub(crate) password_env: String,
}

fn default_format() -> ArchiveKind {
    ArchiveKind::Zip
}

fn default_username_env() -> String {
    REGISTRY_USERNAME_ENV.to_string()
}

fn default_password_env() -> String {
    REGISTRY_PASSWORD_ENV.to_string()
}

impl std::fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reference, self.format)
    }
}

impl RegistrySource {
    pub fn new<S: Into<String>>(reference: S, format: ArchiveKind) -> Self {
        Self {
            reference: reference.into(),
            format,
            insecure: false,
            username_env: default_username_env(),
            password_env: default_password_env(),
        }
    }

    /// Basic auth from the configured environment variables, anonymous when both are unset.
    pub fn auth(&self) -> Result<RegistryAuth, SourceError> {
        let username = std::env::var(&self.username_env).unwrap_or_default();
        let password = std::env::var(&self.password_env).unwrap_or_default();
        match (username.is_empty(), password.is_empty()) {
            (true, true) => Ok(RegistryAuth::Anonymous),
            (false, false) => Ok(RegistryAuth::Basic(username, password)),
            _ => Err(SourceError::Registry {
                reference: self.reference.clone(),
                err: format!(
                    "registry credentials incomplete: set both {} and {}",
                    self.username_env, self.password_env
                )
                .into(),
            }),
        }
    }

    fn parsed_reference(&self) -> Result<Reference, SourceError> {
        Reference::try_from(self.reference.as_str()).map_err(|err| SourceError::Registry {
            reference: self.reference.clone(),
            err: err.into(),
        })
    }

    /// Pull the artifact and return its first layer as archive bytes.
    pub fn fetch(&self) -> Result<Fetched, SourceError> {
        let reference = self.parsed_reference()?;
        let auth = self.auth()?;
        let config = ClientConfig {
            protocol: if self.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        let mut client = Client::new(config);
        let registry_error = |err: BoxedError| SourceError::Registry {
            reference: self.reference.clone(),
            err,
        };
        let rt = tokio::runtime::Runtime::new().map_err(|err| registry_error(err.into()))?;
        tracing::info!(reference = %self.reference, "pulling from registry");
        let image = rt
            .block_on(async {
                client
                    .pull(&reference, &auth, ACCEPTED_MEDIA_TYPES.to_vec())
                    .await
            })
            .map_err(|err| registry_error(err.into()))?;
        let layers = image.layers.len();
        let layer = image
            .layers
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::EmptyArtifact {
                reference: self.reference.clone(),
            })?;
        if layers > 1 {
            tracing::warn!(reference = %self.reference, layers, "artifact has several layers; using the first");
        }
        tracing::debug!(media_type = %layer.media_type, bytes = layer.data.len(), "pulled layer");
        Ok(Fetched::Archive {
            kind: self.format,
            bytes: layer.data,
        })
    }
}

#[cfg(test)]
mod test_registry_source {
    use super::*;

    fn source_with_env(username_env: &str, password_env: &str) -> RegistrySource {
        RegistrySource {
            username_env: username_env.to_string(),
            password_env: password_env.to_string(),
            ..RegistrySource::new("example.azurecr.io/synapse/artifacts:1.0", ArchiveKind::Zip)
        }
    }

    #[test]
    fn format_defaults_to_zip() {
        let source: RegistrySource = toml::from_str(
            r#"registry = "example.azurecr.io/synapse/artifacts:1.0""#,
        )
        .unwrap();
        assert_eq!(source.format, ArchiveKind::Zip);
        assert!(!source.insecure);
    }

    #[test]
    fn tar_format_is_gzip_tar() {
        let source: RegistrySource = toml::from_str(
            r#"
            registry = "example.azurecr.io/synapse/artifacts:1.0"
            format = "tar"
            "#,
        )
        .unwrap();
        assert_eq!(source.format, ArchiveKind::TarGz);
    }

    #[test]
    fn missing_credentials_mean_anonymous() {
        let source = source_with_env(
            "WORKSPACE_DEPLOY_TEST_UNSET_USER",
            "WORKSPACE_DEPLOY_TEST_UNSET_PASSWORD",
        );
        assert!(matches!(source.auth().unwrap(), RegistryAuth::Anonymous));
    }

    #[test]
    fn half_configured_credentials_are_an_error() {
        // PATH is always set, the other variable never is
        let source = source_with_env("PATH", "WORKSPACE_DEPLOY_TEST_UNSET_PASSWORD");
        assert!(matches!(
            source.auth(),
            Err(SourceError::Registry { .. })
        ));
    }

    #[test]
    fn invalid_reference_is_rejected_before_any_request() {
        let source = RegistrySource::new("Not A Reference!", ArchiveKind::Zip);
        assert!(matches!(
            source.fetch(),
            Err(SourceError::Registry { .. })
        ));
    }
}
