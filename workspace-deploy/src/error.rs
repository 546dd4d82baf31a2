/// The main error enum for this crate.
///
/// Each variant wraps the error of one collaborator. Errors raised for a single artifact while
/// publishing are not represented here: they are recorded in the
/// [`PublishReport`](crate::PublishReport) as an [`ArtifactError`](crate::ArtifactError).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] crate::archive::ArchiveError),
    #[error(transparent)]
    Source(#[from] crate::source::SourceError),
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),
    #[error(transparent)]
    Credential(#[from] crate::credential::CredentialError),
    #[error(transparent)]
    Transform(#[from] crate::transform::TransformError),
    #[error(transparent)]
    Publish(#[from] crate::client::PublishError),
}
