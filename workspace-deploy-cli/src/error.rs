use std::process::ExitCode;

use workspace_deploy::credential::CredentialError;
use workspace_deploy::manifest::ManifestError;
use workspace_deploy::transform::TransformError;

/// Categories of application errors that can be matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorKind {
    /// Argument validation errors, including a run without an error policy
    ArgValidation,
    /// General IO errors
    IO,
    /// Manifest file reading errors
    ManifestRead,
    /// Manifest file parsing errors
    ManifestParse,
    /// The source could not be fetched or unpacked
    Source,
    /// No access token could be acquired
    Credential,
    /// The replacement rules could not be loaded
    Transform,
    /// The workspace client could not be built
    Client,
    /// The report or plan could not be rendered
    Output,
    /// Used to indicate that one or more artifacts failed to publish. The failures are reported
    /// as they happen, so this variant only exists to produce the correct `ExitCode`.
    Publish,
}

/// Internal error type that contains all application error variants.
#[derive(Debug, thiserror::Error)]
pub enum AppErrorInner {
    #[error("Argument error: {0}")]
    ArgValidation(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Failed to read manifest file: {manifest}")]
    ManifestRead {
        manifest: String,
        #[source]
        err: ManifestError,
    },
    #[error("Failed to parse manifest file: {manifest}")]
    ManifestParse {
        manifest: String,
        #[source]
        err: ManifestError,
    },
    #[error("Failed to acquire artifacts from {source_name}")]
    Source {
        source_name: String,
        #[source]
        err: workspace_deploy::Error,
    },
    #[error("Failed to acquire an access token using {method}")]
    Credential {
        method: String,
        #[source]
        err: CredentialError,
    },
    #[error("Failed to load replacement rules")]
    Transform(#[source] TransformError),
    #[error("Failed to create the workspace client")]
    Client(#[source] workspace_deploy::Error),
    #[error(transparent)]
    Output(#[from] anyhow::Error),
    #[error("{failed} artifact(s) failed to publish")]
    Publish { failed: usize },
}

/// The main application-level error type. This represents all top-level application errors we'd
/// want to report to the user. We keep the concrete error kind (for the exit code) while adding
/// context to the error, such as what the application was doing when a library call failed. The
/// `Publish` variant only signals that artifacts failed: those failures are printed as they
/// happen rather than being returned.
///
/// This type uses the newtype pattern to wrap a boxed inner error, reducing stack size.
#[derive(Debug)]
pub struct AppError(Box<AppErrorInner>, AppErrorKind);

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl AppError {
    /// Create a new AppError with the given inner error and kind
    pub fn new(inner: AppErrorInner, kind: AppErrorKind) -> Self {
        Self(Box::new(inner), kind)
    }

    /// Get the error kind for pattern matching
    pub fn error_kind(&self) -> &AppErrorKind {
        &self.1
    }

    /// Create an argument validation error
    pub fn arg_validation(msg: String) -> Self {
        Self::new(AppErrorInner::ArgValidation(msg), AppErrorKind::ArgValidation)
    }

    /// Create a manifest error, distinguishing a file that could not be read from one that
    /// could not be parsed
    pub fn manifest(manifest: String, err: ManifestError) -> Self {
        match err {
            ManifestError::Read { .. } => Self::new(
                AppErrorInner::ManifestRead { manifest, err },
                AppErrorKind::ManifestRead,
            ),
            err => Self::new(
                AppErrorInner::ManifestParse { manifest, err },
                AppErrorKind::ManifestParse,
            ),
        }
    }

    /// Create a source acquisition error
    pub fn source_acquisition(source_name: String, err: workspace_deploy::Error) -> Self {
        Self::new(
            AppErrorInner::Source { source_name, err },
            AppErrorKind::Source,
        )
    }

    /// Create a token acquisition error
    pub fn credential(method: String, err: CredentialError) -> Self {
        Self::new(
            AppErrorInner::Credential { method, err },
            AppErrorKind::Credential,
        )
    }

    /// Create a replacement rules error
    pub fn transform(err: TransformError) -> Self {
        Self::new(AppErrorInner::Transform(err), AppErrorKind::Transform)
    }

    /// Create a client construction error
    pub fn client(err: workspace_deploy::Error) -> Self {
        Self::new(AppErrorInner::Client(err), AppErrorKind::Client)
    }

    /// Create an error for a run with failed artifacts
    pub fn publish(failed: usize) -> Self {
        Self::new(AppErrorInner::Publish { failed }, AppErrorKind::Publish)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::new(AppErrorInner::IO(err), AppErrorKind::IO)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(AppErrorInner::Output(err), AppErrorKind::Output)
    }
}

/// Errors from building a publisher are setup failures of different kinds.
impl From<workspace_deploy::Error> for AppError {
    fn from(err: workspace_deploy::Error) -> Self {
        match err {
            workspace_deploy::Error::Manifest(ManifestError::ErrorPolicyMissing) => {
                Self::arg_validation(ManifestError::ErrorPolicyMissing.to_string())
            }
            workspace_deploy::Error::Transform(err) => Self::transform(err),
            err => Self::client(err),
        }
    }
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self.error_kind() {
            AppErrorKind::Publish => 1,
            AppErrorKind::ArgValidation => 2,
            _ => 3,
        }
    }
}

impl From<AppError> for ExitCode {
    fn from(error: AppError) -> Self {
        ExitCode::from(error.exit_code())
    }
}
