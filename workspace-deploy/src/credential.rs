//! Bearer tokens for the workspace API.
//!
//! A token is acquired once per run, before anything is published. Secrets never appear in the
//! deployment manifest; each method reads them from the environment.

use crate::client::is_http_base;

/// The audience of tokens issued for the workspace development endpoint.
pub const WORKSPACE_RESOURCE: &str = "https://dev.azuresynapse.net/";
pub const WORKSPACE_SCOPE: &str = "https://dev.azuresynapse.net/.default";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

pub const TENANT_ID_ENV: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";
pub const TOKEN_ENV: &str = "WORKSPACE_DEPLOY_TOKEN";

/// Errors raised while acquiring a token. All of them are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("environment variable {name} must be set")]
    MissingEnv { name: String },

    #[error(transparent)]
    UrlInvalid(#[from] url::ParseError),

    #[error("authority '{url}' is not an http or https base URL")]
    BaseUrl { url: String },

    #[error("token request to {url} failed")]
    Http {
        url: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("token endpoint answered with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint response has no access_token: {body}")]
    NoAccessToken { body: String },

    #[error("failed to run '{command}'")]
    Spawn {
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("Command '{command}' exited with status {status}\n{stderr}")]
    Subprocess {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("'{command}' printed no token")]
    EmptyToken { command: String },
}

/// A bearer token. Its value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(***)")
    }
}

/// The `[auth]` table of a deployment manifest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "method", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum AuthMethod {
    /// OAuth2 client-credentials grant against the identity provider.
    ClientSecret {
        #[serde(default = "default_authority")]
        authority: String,
        #[serde(default = "default_tenant_env")]
        tenant_env: String,
        #[serde(default = "default_client_id_env")]
        client_id_env: String,
        #[serde(default = "default_client_secret_env")]
        client_secret_env: String,
    },
    /// Ask a logged-in `az` CLI for a token.
    AzureCli,
    /// Use a token issued elsewhere.
    TokenEnv {
        #[serde(default = "default_token_env")]
        variable: String,
    },
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_tenant_env() -> String {
    TENANT_ID_ENV.to_string()
}

fn default_client_id_env() -> String {
    CLIENT_ID_ENV.to_string()
}

fn default_client_secret_env() -> String {
    CLIENT_SECRET_ENV.to_string()
}

fn default_token_env() -> String {
    TOKEN_ENV.to_string()
}

impl Default for AuthMethod {
    fn default() -> Self {
        Self::ClientSecret {
            authority: default_authority(),
            tenant_env: default_tenant_env(),
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientSecret { .. } => write!(f, "client-secret"),
            Self::AzureCli => write!(f, "azure-cli"),
            Self::TokenEnv { variable } => write!(f, "token-env ({variable})"),
        }
    }
}

fn require_env(name: &str) -> Result<String, CredentialError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CredentialError::MissingEnv {
            name: name.to_string(),
        })
}

impl AuthMethod {
    /// Acquire a token for the workspace API.
    pub fn acquire(&self) -> Result<AccessToken, CredentialError> {
        tracing::info!(method = %self, "acquiring access token");
        match self {
            Self::ClientSecret {
                authority,
                tenant_env,
                client_id_env,
                client_secret_env,
            } => ClientCredentials {
                authority: authority.clone(),
                tenant: require_env(tenant_env)?,
                client_id: require_env(client_id_env)?,
                client_secret: require_env(client_secret_env)?,
                scope: WORKSPACE_SCOPE.to_string(),
            }
            .request_token(),
            Self::AzureCli => azure_cli_token(),
            Self::TokenEnv { variable } => require_env(variable).map(AccessToken),
        }
    }
}

/// The parameters of an OAuth2 client-credentials grant.
#[derive(Clone)]
pub struct ClientCredentials {
    pub authority: String,
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

impl ClientCredentials {
    /// `{authority}/{tenant}/oauth2/v2.0/token`
    pub fn token_url(&self) -> Result<url::Url, CredentialError> {
        let mut url = url::Url::parse(&self.authority)?;
        let not_a_base = || CredentialError::BaseUrl {
            url: self.authority.clone(),
        };
        if !is_http_base(&url) {
            return Err(not_a_base());
        }
        url.path_segments_mut()
            .map_err(|()| not_a_base())?
            .pop_if_empty()
            .extend([self.tenant.as_str(), "oauth2", "v2.0", "token"]);
        Ok(url)
    }

    pub fn request_token(&self) -> Result<AccessToken, CredentialError> {
        let url = self.token_url()?;
        let http_error = |err: reqwest::Error| CredentialError::Http {
            url: url.to_string(),
            err,
        };
        let response = reqwest::blocking::Client::new()
            .post(url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .map_err(http_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(http_error)?;
        if status != 200 {
            return Err(CredentialError::Rejected { status, body });
        }
        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();
        match parsed.and_then(|r| r.access_token).filter(|t| !t.is_empty()) {
            Some(token) => Ok(AccessToken(token)),
            None => Err(CredentialError::NoAccessToken { body }),
        }
    }
}

fn azure_cli_token() -> Result<AccessToken, CredentialError> {
    let resource = format!("--resource={WORKSPACE_RESOURCE}");
    let args = [
        "account",
        "get-access-token",
        resource.as_str(),
        "--query",
        "accessToken",
        "--output",
        "tsv",
    ];
    let command = format!("az {}", args.join(" "));
    let output = std::process::Command::new("az")
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|err| CredentialError::Spawn {
            command: command.clone(),
            err,
        })?;
    if !output.status.success() {
        return Err(CredentialError::Subprocess {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let token = stdout.trim();
    if token.is_empty() {
        return Err(CredentialError::EmptyToken { command });
    }
    Ok(AccessToken(token.to_string()))
}


#[cfg(test)]
mod test_auth_method {
    use super::*;

    #[test]
    fn parses_methods_from_toml() {
        let method: AuthMethod = toml::from_str(r#"method = "azure-cli""#).unwrap();
        assert_eq!(method, AuthMethod::AzureCli);

        let method: AuthMethod = toml::from_str(r#"method = "client-secret""#).unwrap();
        assert_eq!(method, AuthMethod::default());

        let method: AuthMethod = toml::from_str(
            r#"
            method = "client-secret"
            tenant-env = "DEV_TENANT"
            "#,
        )
        .unwrap();
        assert!(matches!(
            method,
            AuthMethod::ClientSecret { ref tenant_env, .. } if tenant_env == "DEV_TENANT"
        ));
    }

    #[test]
    fn token_env_reads_the_named_variable() {
        let method = AuthMethod::TokenEnv {
            variable: "PATH".to_string(),
        };
        let token = method.acquire().unwrap();
        assert_eq!(token.secret(), std::env::var("PATH").unwrap());
    }

    #[test]
    fn unset_variables_are_reported_by_name() {
        let method = AuthMethod::TokenEnv {
            variable: "WORKSPACE_DEPLOY_TEST_UNSET_TOKEN".to_string(),
        };
        assert!(matches!(
            method.acquire(),
            Err(CredentialError::MissingEnv { name }) if name == "WORKSPACE_DEPLOY_TEST_UNSET_TOKEN"
        ));
    }
}
