//! The workspace API seam: publishing one artifact of one type.

use crate::artifact::{ArtifactType, DEPLOYMENT_ORDER, NameStyle};

/// Default `api-version` query parameter sent to the workspace API.
pub const DEFAULT_API_VERSION: &str = "2020-12-01";

/// Acknowledgement of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Ack {
    /// The HTTP(-equivalent) status returned by the workspace.
    pub status: u16,
}

/// Errors returned by a [`WorkspaceClient`] for a single artifact.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The workspace answered with a non-success status.
    #[error("workspace rejected the artifact with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The request could not be sent or its response could not be read.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The client does not know how to publish this type.
    #[error("artifact type '{0}' is not supported by this workspace client")]
    Unsupported(ArtifactType),

    /// The URL artifacts would be published under cannot take an artifact path.
    #[error("'{url}' is not an http or https base URL")]
    BaseUrl { url: String },

    #[error("{0}")]
    Other(String),
}

/// Whether `url` is an absolute `http` or `https` URL that path segments can be appended to.
pub(crate) fn is_http_base(url: &url::Url) -> bool {
    matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base()
}

/// Create-or-update of artifacts in a target workspace.
///
/// Implementations must be idempotent: publishing identical content under the same name again
/// is a successful no-op.
pub trait WorkspaceClient: Send + Sync {
    /// The artifact types this client can publish. Artifacts of other types are skipped.
    fn supported_types(&self) -> &[ArtifactType];

    /// Whether the API identifies artifacts by bare name or by literal file name.
    fn name_style(&self) -> NameStyle {
        NameStyle::Bare
    }

    /// Create or update the artifact `name` of type `kind` with `content`.
    fn publish(&self, kind: ArtifactType, name: &str, content: &[u8]) -> Result<Ack, PublishError>;
}

impl<C: WorkspaceClient + ?Sized> WorkspaceClient for &C {
    fn supported_types(&self) -> &[ArtifactType] {
        (**self).supported_types()
    }

    fn name_style(&self) -> NameStyle {
        (**self).name_style()
    }

    fn publish(&self, kind: ArtifactType, name: &str, content: &[u8]) -> Result<Ack, PublishError> {
        (**self).publish(kind, name, content)
    }
}

impl<C: WorkspaceClient + ?Sized> WorkspaceClient for Box<C> {
    fn supported_types(&self) -> &[ArtifactType] {
        (**self).supported_types()
    }

    fn name_style(&self) -> NameStyle {
        (**self).name_style()
    }

    fn publish(&self, kind: ArtifactType, name: &str, content: &[u8]) -> Result<Ack, PublishError> {
        (**self).publish(kind, name, content)
    }
}

/// Publishes artifacts with `PUT {base}/{collection}/{name}?api-version={version}`.
#[derive(Debug)]
pub struct RestWorkspaceClient {
    http: reqwest::blocking::Client,
    base_url: url::Url,
    api_version: String,
    token: String,
    supported: Vec<ArtifactType>,
}

impl RestWorkspaceClient {
    /// A client for `base_url`, authenticating with the bearer `token`. All artifact types are
    /// supported until restricted with [`with_supported_types`](Self::with_supported_types).
    pub fn new<S: Into<String>>(base_url: url::Url, token: S) -> Result<Self, PublishError> {
        if !is_http_base(&base_url) {
            return Err(PublishError::BaseUrl {
                url: base_url.to_string(),
            });
        }
        Ok(Self {
            http: reqwest::blocking::Client::builder().build()?,
            base_url,
            api_version: DEFAULT_API_VERSION.to_string(),
            token: token.into(),
            supported: DEPLOYMENT_ORDER.to_vec(),
        })
    }

    /// Artifacts are addressed by file stem.
    pub const NAME_STYLE: NameStyle = NameStyle::Bare;

    /// The development endpoint of the named workspace.
    pub fn workspace_url(workspace: &str) -> Result<url::Url, url::ParseError> {
        url::Url::parse(&format!("https://{workspace}.dev.azuresynapse.net"))
    }

    pub fn with_api_version<S: Into<String>>(mut self, api_version: S) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_supported_types<I: IntoIterator<Item = ArtifactType>>(mut self, types: I) -> Self {
        self.supported = types.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Result<Self, PublishError> {
        self.http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(self)
    }

    /// The URL an artifact is published to.
    pub fn artifact_url(&self, kind: ArtifactType, name: &str) -> Result<url::Url, PublishError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PublishError::BaseUrl {
                url: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .push(kind.plural())
            .push(name);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

impl WorkspaceClient for RestWorkspaceClient {
    fn supported_types(&self) -> &[ArtifactType] {
        &self.supported
    }

    fn name_style(&self) -> NameStyle {
        Self::NAME_STYLE
    }

    fn publish(&self, kind: ArtifactType, name: &str, content: &[u8]) -> Result<Ack, PublishError> {
        if !self.supported.contains(&kind) {
            return Err(PublishError::Unsupported(kind));
        }
        let url = self.artifact_url(kind, name)?;
        tracing::debug!(%url, "PUT artifact");
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(content.to_vec())
            .send()?;
        let status = response.status();
        match status.as_u16() {
            200 | 201 | 202 => Ok(Ack {
                status: status.as_u16(),
            }),
            code => Err(PublishError::Rejected {
                status: code,
                body: response.text()?,
            }),
        }
    }
}
