//! Artifact types, the deployment order and classification of archive paths.

use crate::archive::ArchiveMap;

/// Errors encountered when parsing an artifact type name.
#[derive(Debug, thiserror::Error)]
#[error("unknown artifact type '{name}': expected one of: {known}", known = DEPLOYMENT_ORDER.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "))]
pub struct UnknownArtifactType {
    pub name: String,
}

/// The kinds of workspace artifact that can be published.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
pub enum ArtifactType {
    #[serde(rename = "managedVirtualNetwork")]
    ManagedVirtualNetwork,
    #[serde(rename = "integrationRuntime")]
    IntegrationRuntime,
    #[serde(rename = "linkedService")]
    LinkedService,
    #[serde(rename = "dataset")]
    Dataset,
    #[serde(rename = "notebook")]
    Notebook,
    #[serde(rename = "sqlscript")]
    SqlScript,
    #[serde(rename = "kqlscript")]
    KqlScript,
    #[serde(rename = "sparkJobDefinition")]
    SparkJobDefinition,
    #[serde(rename = "pipeline")]
    Pipeline,
}

/// Artifact types in the order they must be published: anything an artifact may reference is
/// published before it.
pub const DEPLOYMENT_ORDER: [ArtifactType; 9] = [
    ArtifactType::ManagedVirtualNetwork,
    ArtifactType::IntegrationRuntime,
    ArtifactType::LinkedService,
    ArtifactType::Dataset,
    ArtifactType::Notebook,
    ArtifactType::SqlScript,
    ArtifactType::KqlScript,
    ArtifactType::SparkJobDefinition,
    ArtifactType::Pipeline,
];

impl ArtifactType {
    /// The folder token identifying this type in an archive path.
    pub fn token(self) -> &'static str {
        match self {
            Self::ManagedVirtualNetwork => "managedVirtualNetwork",
            Self::IntegrationRuntime => "integrationRuntime",
            Self::LinkedService => "linkedService",
            Self::Dataset => "dataset",
            Self::Notebook => "notebook",
            Self::SqlScript => "sqlscript",
            Self::KqlScript => "kqlscript",
            Self::SparkJobDefinition => "sparkJobDefinition",
            Self::Pipeline => "pipeline",
        }
    }

    /// The collection name used in workspace API paths.
    pub fn plural(self) -> &'static str {
        match self {
            Self::ManagedVirtualNetwork => "managedVirtualNetworks",
            Self::IntegrationRuntime => "integrationRuntimes",
            Self::LinkedService => "linkedServices",
            Self::Dataset => "datasets",
            Self::Notebook => "notebooks",
            Self::SqlScript => "sqlScripts",
            Self::KqlScript => "kqlScripts",
            Self::SparkJobDefinition => "sparkJobDefinitions",
            Self::Pipeline => "pipelines",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = UnknownArtifactType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DEPLOYMENT_ORDER
            .into_iter()
            .find(|t| t.token() == s)
            .ok_or_else(|| UnknownArtifactType {
                name: s.to_string(),
            })
    }
}

/// How an artifact type token is matched against the directory part of a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Matching {
    /// The token may appear anywhere in the directory string, so `pipelineTemplates/x.json`
    /// classifies as a pipeline.
    #[default]
    Substring,
    /// Some directory segment must equal the token exactly.
    Segment,
}

/// How an artifact's name is derived from its file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameStyle {
    /// The file name without its extension, for APIs keyed by an opaque identifier.
    #[default]
    Bare,
    /// The literal file name.
    FileName,
}

/// The directory part of a slash-separated path, or `""` for a top-level file.
fn directory_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Classify `path` by its directory. When more than one type matches, the first in
/// [`DEPLOYMENT_ORDER`] wins.
pub fn classify(path: &str, matching: Matching) -> Option<ArtifactType> {
    let dir = directory_of(path);
    DEPLOYMENT_ORDER.into_iter().find(|t| match matching {
        Matching::Substring => dir.contains(t.token()),
        Matching::Segment => dir.split('/').any(|segment| segment == t.token()),
    })
}

/// Derive an artifact name from the final component of `path`.
pub fn artifact_name(path: &str, style: NameStyle) -> String {
    let file_name = path.rsplit_once('/').map(|(_, f)| f).unwrap_or(path);
    match style {
        NameStyle::FileName => file_name.to_string(),
        NameStyle::Bare => std::path::Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string()),
    }
}

/// An archive entry that has been matched to an artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedArtifact {
    pub kind: ArtifactType,
    pub name: String,
    pub content: Vec<u8>,
    pub source_path: String,
}

/// Why an entry is not published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No artifact type matched the entry's directory.
    Unclassified,
    /// The entry is not a `.json` file.
    NotJson,
    /// The target workspace client does not support this artifact type.
    UnsupportedType(ArtifactType),
    /// A fail-fast run stopped before this artifact was attempted.
    Aborted,
    /// The run was cancelled before this artifact was attempted.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclassified => write!(f, "unclassified"),
            Self::NotJson => write!(f, "not a JSON artifact"),
            Self::UnsupportedType(kind) => write!(f, "artifact type '{kind}' is not supported"),
            Self::Aborted => write!(f, "aborted after an earlier failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Options controlling how archive entries become [`ClassifiedArtifact`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub matching: Matching,
    pub name_style: NameStyle,
    pub json_only: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            matching: Matching::Substring,
            name_style: NameStyle::Bare,
            json_only: true,
        }
    }
}

/// The classified view of an archive: the artifacts to publish and the entries left out.
#[derive(Debug, Default)]
pub struct Catalog {
    artifacts: Vec<ClassifiedArtifact>,
    skipped: Vec<(String, SkipReason)>,
}

impl Catalog {
    /// Classify every entry in `entries`. Entries are visited in path order.
    pub fn build(entries: ArchiveMap, options: &ClassifyOptions) -> Self {
        let mut catalog = Self::default();
        for (path, content) in entries {
            if options.json_only && !path.ends_with(".json") {
                catalog.skipped.push((path, SkipReason::NotJson));
                continue;
            }
            match classify(&path, options.matching) {
                Some(kind) => catalog.artifacts.push(ClassifiedArtifact {
                    kind,
                    name: artifact_name(&path, options.name_style),
                    content,
                    source_path: path,
                }),
                None => {
                    tracing::warn!(%path, "no artifact type matches path; skipping");
                    catalog.skipped.push((path, SkipReason::Unclassified));
                }
            }
        }
        catalog
    }

    /// Artifacts of `kind`, in path order.
    pub fn of_type(&self, kind: ArtifactType) -> impl Iterator<Item = &ClassifiedArtifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    /// Artifacts in the order they would be published.
    pub fn in_deployment_order(&self) -> impl Iterator<Item = &ClassifiedArtifact> {
        DEPLOYMENT_ORDER.iter().flat_map(|kind| self.of_type(*kind))
    }

    /// Every classified artifact, in path order.
    pub fn artifacts(&self) -> &[ClassifiedArtifact] {
        &self.artifacts
    }

    /// Entries that were not classified, with the reason.
    pub fn skipped(&self) -> &[(String, SkipReason)] {
        &self.skipped
    }

    pub(crate) fn into_parts(self) -> (Vec<ClassifiedArtifact>, Vec<(String, SkipReason)>) {
        (self.artifacts, self.skipped)
    }
}


#[cfg(test)]
mod test_names_and_types {
    use super::*;

    #[test]
    fn bare_names_drop_the_extension() {
        assert_eq!(artifact_name("notebook/nb1.json", NameStyle::Bare), "nb1");
        assert_eq!(artifact_name("a/b/my.model.json", NameStyle::Bare), "my.model");
        assert_eq!(artifact_name("pipeline/p1", NameStyle::Bare), "p1");
    }

    #[test]
    fn file_names_keep_the_extension() {
        assert_eq!(
            artifact_name("notebook/nb1.json", NameStyle::FileName),
            "nb1.json"
        );
    }

    #[test]
    fn types_round_trip_through_their_token() {
        for kind in DEPLOYMENT_ORDER {
            assert_eq!(kind.token().parse::<ArtifactType>().unwrap(), kind);
        }
        assert!("notebooks".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn linked_services_precede_pipelines() {
        let position = |kind| DEPLOYMENT_ORDER.iter().position(|t| *t == kind).unwrap();
        assert!(position(ArtifactType::LinkedService) < position(ArtifactType::Dataset));
        assert!(position(ArtifactType::Dataset) < position(ArtifactType::Notebook));
        assert_eq!(position(ArtifactType::Pipeline), DEPLOYMENT_ORDER.len() - 1);
    }
}

#[cfg(test)]
mod test_catalog {
    use super::*;

    fn entries(paths: &[&str]) -> ArchiveMap {
        paths
            .iter()
            .map(|p| (p.to_string(), b"{}".to_vec()))
            .collect()
    }

    #[test]
    fn catalog_separates_artifacts_from_skipped_entries() {
        let catalog = Catalog::build(
            entries(&[
                "pipeline/p1.json",
                "linkedService/ls1.json",
                "misc/other.json",
                "notebook/readme.md",
            ]),
            &ClassifyOptions::default(),
        );
        let names = catalog
            .in_deployment_order()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["ls1", "p1"]);
        assert_eq!(
            catalog.skipped(),
            &[
                ("misc/other.json".to_string(), SkipReason::Unclassified),
                ("notebook/readme.md".to_string(), SkipReason::NotJson),
            ]
        );
    }

    #[test]
    fn non_json_entries_are_kept_when_requested() {
        let options = ClassifyOptions {
            json_only: false,
            name_style: NameStyle::FileName,
            ..Default::default()
        };
        let catalog = Catalog::build(entries(&["notebook/nb.ipynb"]), &options);
        assert_eq!(catalog.artifacts().len(), 1);
        assert_eq!(catalog.artifacts()[0].name, "nb.ipynb");
    }
}
