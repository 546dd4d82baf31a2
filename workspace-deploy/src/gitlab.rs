//! Reading artifacts straight from a GitLab repository.

use base64::Engine;

use crate::archive::ArchiveMap;
use crate::client::is_http_base;
use crate::source::SourceError;

/// Default environment variable holding the GitLab private token.
pub const GITLAB_TOKEN_ENV: &str = "GITLAB_PRIVATE_TOKEN";

const PAGE_SIZE: &str = "100";

/// A GitLab project at a given ref, declared as:
///
/// ```toml
/// [source]
/// gitlab = "https://gitlab.com"
/// project = "data-platform/synapse"   # numeric id or full path
/// ref = "main"
/// path = "workspace"                  # optional sub-tree
/// ```
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GitlabSource {
    #[serde(rename = "gitlab")]
    pub(crate) url: String,
    pub(crate) project: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub(crate) reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) path: Option<String>,
    #[serde(default = "default_token_env")]
    pub(crate) token_env: String,
}

fn default_ref() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    GITLAB_TOKEN_ENV.to_string()
}

impl std::fmt::Display for GitlabSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} project {} (ref: {})", self.url, self.project, self.reference)?;
        if let Some(path) = &self.path {
            write!(f, " [path: {path}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct TreeItem {
    id: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, serde::Deserialize)]
struct Blob {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

impl GitlabSource {
    pub fn new<U: Into<String>, P: Into<String>, R: Into<String>>(
        url: U,
        project: P,
        reference: R,
    ) -> Self {
        Self {
            url: url.into(),
            project: project.into(),
            reference: reference.into(),
            path: None,
            token_env: default_token_env(),
        }
    }

    pub fn with_path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Fetch every `.json` blob of the tree, authenticating with the token from the configured
    /// environment variable when it is set.
    pub fn fetch(&self) -> Result<ArchiveMap, SourceError> {
        let token = std::env::var(&self.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!(variable = %self.token_env, "no GitLab token set; requesting anonymously");
        }
        self.fetch_with_token(token.as_deref())
    }

    /// Fetch every `.json` blob of the tree with an explicit token.
    pub fn fetch_with_token(&self, token: Option<&str>) -> Result<ArchiveMap, SourceError> {
        let http = reqwest::blocking::Client::new();
        let mut entries = ArchiveMap::new();
        for item in self.list_tree(&http, token)? {
            if item.kind != "blob" || !item.path.ends_with(".json") {
                continue;
            }
            let content = self.read_blob(&http, token, &item)?;
            tracing::debug!(path = %item.path, bytes = content.len(), "fetched blob");
            entries.insert(item.path, content);
        }
        tracing::info!(source = %self, entries = entries.len(), "fetched repository tree");
        Ok(entries)
    }

    fn project_url(&self) -> Result<url::Url, SourceError> {
        let mut url = url::Url::parse(&self.url)?;
        if !is_http_base(&url) {
            return Err(SourceError::BaseUrl {
                url: self.url.clone(),
            });
        }
        push_segments(&mut url, ["api", "v4", "projects", self.project.as_str(), "repository"])?;
        Ok(url)
    }

    fn list_tree(
        &self,
        http: &reqwest::blocking::Client,
        token: Option<&str>,
    ) -> Result<Vec<TreeItem>, SourceError> {
        let mut items = Vec::new();
        let mut page = Some("1".to_string());
        while let Some(current) = page.take() {
            let mut url = self.project_url()?;
            push_segments(&mut url, ["tree"])?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("ref", &self.reference)
                    .append_pair("recursive", "true")
                    .append_pair("per_page", PAGE_SIZE)
                    .append_pair("page", &current);
                if let Some(path) = &self.path {
                    query.append_pair("path", path);
                }
            }
            let response = get(http, &url, token)?;
            page = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|next| !next.is_empty())
                .map(str::to_string);
            let batch: Vec<TreeItem> = response.json().map_err(|err| SourceError::Http {
                url: url.to_string(),
                err,
            })?;
            items.extend(batch);
        }
        Ok(items)
    }

    fn read_blob(
        &self,
        http: &reqwest::blocking::Client,
        token: Option<&str>,
        item: &TreeItem,
    ) -> Result<Vec<u8>, SourceError> {
        let mut url = self.project_url()?;
        push_segments(&mut url, ["blobs", item.id.as_str()])?;
        let blob: Blob = get(http, &url, token)?
            .json()
            .map_err(|err| SourceError::Http {
                url: url.to_string(),
                err,
            })?;
        match blob.encoding.as_deref() {
            Some("base64") | None => {
                // GitLab wraps long base64 payloads across lines
                let compact = blob
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect::<String>();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|err| SourceError::Base64 {
                        path: item.path.clone(),
                        err,
                    })
            }
            Some(_) => Ok(blob.content.into_bytes()),
        }
    }
}

fn get(
    http: &reqwest::blocking::Client,
    url: &url::Url,
    token: Option<&str>,
) -> Result<reqwest::blocking::Response, SourceError> {
    tracing::debug!(%url, "GET");
    let mut request = http.get(url.clone());
    if let Some(token) = token {
        request = request.header("PRIVATE-TOKEN", token);
    }
    let response = request.send().map_err(|err| SourceError::Http {
        url: url.to_string(),
        err,
    })?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        })
    }
}

fn push_segments<'a, I>(url: &mut url::Url, segments: I) -> Result<(), SourceError>
where
    I: IntoIterator<Item = &'a str>,
{
    let base = url.to_string();
    url.path_segments_mut()
        .map_err(|()| SourceError::BaseUrl { url: base })?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}
