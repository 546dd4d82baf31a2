//! Deploy workspace artifacts from a packaged archive to a live workspace.
//!
//! An archive of JSON artifact definitions (linked services, datasets, notebooks, pipelines and
//! so on) is unpacked, each file is classified by the folder it sits in, optional literal
//! replacements parameterise the content for the target environment, and the artifacts are
//! published type by type in dependency order through a [`WorkspaceClient`].
//!
//! # Optional Features
//!
//! - `rayon` (default): publish the artifacts of one type in parallel with
//!   [`Concurrency::Parallel`].
//! - `registry` (default): pull archives from an OCI registry. This uses the
//!   [`oci-distribution`] crate and an async runtime.
//!
//! [`oci-distribution`]: https://crates.io/crates/oci-distribution
//!
//! # Usage
//!
//! Publish entries to a workspace, stopping at the first failure:
//!
//! ```rust
//! use workspace_deploy::{ArchiveMap, ArtifactType, ErrorPolicy, MemoryWorkspace, Publisher};
//!
//! let mut entries = ArchiveMap::new();
//! entries.insert("pipeline/copy.json".to_string(), br#"{"name":"copy"}"#.to_vec());
//! entries.insert("linkedService/sql.json".to_string(), br#"{"name":"sql"}"#.to_vec());
//!
//! let workspace = MemoryWorkspace::new();
//! let report = Publisher::new(&workspace, ErrorPolicy::FailFast).publish(entries);
//!
//! assert!(!report.has_failures());
//! // linked services are published before the pipelines that use them
//! assert_eq!(workspace.calls()[0].0, ArtifactType::LinkedService);
//! ```
//!
//! Run a whole deployment described by a manifest:
//!
//! ```rust,no_run
//! use workspace_deploy::{DeployManifest, DeployOptions, deploy};
//!
//! # fn main() -> Result<(), workspace_deploy::Error> {
//! let manifest = DeployManifest::load("deploy.toml")?;
//! let token = manifest.auth.acquire()?;
//! let client = manifest.rest_client(&token)?;
//! let report = deploy(&manifest, client, &DeployOptions::default())?;
//! for result in report.results() {
//!     println!("{result}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Structure of `deploy.toml`
//!
//! **`[source]`** identifies exactly one source:
//! - `zip = "<path>"` or `tar = "<path>"` for a local archive.
//! - `gitlab = "<url>"` with `project` and `ref` to read a repository tree.
//! - `registry = "<host>/<repository>:<tag>"` to pull a packaged archive.
//!
//! **`[target]`** names a `workspace` or an explicit `endpoint`, optionally with the
//! `api-version` and the `types` the workspace accepts.
//!
//! **`[auth]`**, **`[publish]`** and **`[transform]`** are optional. See [`manifest`].
//!

pub mod archive;
pub mod artifact;
pub mod client;
pub mod credential;
mod deploy;
mod error;
pub mod gitlab;
mod helper;
pub mod manifest;
mod memory;
pub mod publish;
#[cfg(feature = "registry")]
pub mod registry;
pub mod source;
pub mod transform;

#[doc(inline)]
pub use crate::archive::{ArchiveKind, ArchiveMap};
#[doc(inline)]
pub use crate::artifact::{
    ArtifactType, Catalog, ClassifiedArtifact, DEPLOYMENT_ORDER, Matching, NameStyle, SkipReason,
};
#[doc(inline)]
pub use crate::client::{Ack, PublishError, RestWorkspaceClient, WorkspaceClient};
#[doc(inline)]
pub use crate::credential::{AccessToken, AuthMethod};
#[doc(inline)]
pub use crate::deploy::{DeployOptions, deploy};
#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use crate::manifest::{DeployManifest, find_manifest};
#[doc(inline)]
pub use crate::memory::MemoryWorkspace;
#[doc(inline)]
pub use crate::publish::*;
#[doc(inline)]
pub use crate::source::Source;
#[doc(inline)]
pub use crate::transform::ReplacementRules;
