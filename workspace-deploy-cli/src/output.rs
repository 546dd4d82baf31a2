use anyhow::Context;

use workspace_deploy::artifact::Catalog;
use workspace_deploy::{ArtifactType, SkipReason};

use crate::args::OutputFormat;

/// Render `value` as pretty JSON or TOML.
pub fn render<T: serde::Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("Failed to render output as JSON")
        }
        OutputFormat::Toml => {
            toml::to_string_pretty(value).context("Failed to render output as TOML")
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PlannedArtifact {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub name: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

/// What a publish would do with each entry of the source.
#[derive(Debug, Default, serde::Serialize)]
pub struct Plan {
    pub artifacts: Vec<PlannedArtifact>,
    pub skipped: Vec<SkippedEntry>,
}

impl Plan {
    /// Artifacts in deployment order. Entries the catalog left out, and artifacts of types the
    /// target does not accept, are listed as skipped.
    pub fn new(catalog: &Catalog, supported: Option<&[ArtifactType]>) -> Self {
        let mut plan = Plan::default();
        for (path, reason) in catalog.skipped() {
            plan.skipped.push(SkippedEntry {
                path: path.clone(),
                reason: reason.to_string(),
            });
        }
        for artifact in catalog.in_deployment_order() {
            if supported.is_some_and(|types| !types.contains(&artifact.kind)) {
                plan.skipped.push(SkippedEntry {
                    path: artifact.source_path.clone(),
                    reason: SkipReason::UnsupportedType(artifact.kind).to_string(),
                });
            } else {
                plan.artifacts.push(PlannedArtifact {
                    path: artifact.source_path.clone(),
                    kind: artifact.kind,
                    name: artifact.name.clone(),
                });
            }
        }
        plan
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, artifact) in self.artifacts.iter().enumerate() {
            writeln!(
                f,
                "{:>3}. {} '{}' ({})",
                i + 1,
                artifact.kind,
                artifact.name,
                artifact.path
            )?;
        }
        for entry in &self.skipped {
            writeln!(f, "  -  {} skipped: {}", entry.path, entry.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_plan {
    use super::*;
    use workspace_deploy::ArchiveMap;
    use workspace_deploy::artifact::ClassifyOptions;

    fn catalog() -> Catalog {
        let mut entries = ArchiveMap::new();
        for path in [
            "pipeline/p1.json",
            "kqlscript/q1.json",
            "linkedService/ls1.json",
            "docs/readme.json",
        ] {
            entries.insert(path.to_string(), b"{}".to_vec());
        }
        Catalog::build(entries, &ClassifyOptions::default())
    }

    #[test]
    fn plan_is_in_deployment_order() {
        let plan = Plan::new(&catalog(), None);
        let names = plan
            .artifacts
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["ls1", "q1", "p1"]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].path, "docs/readme.json");
    }

    #[test]
    fn unsupported_types_are_planned_as_skipped() {
        let supported = [ArtifactType::LinkedService, ArtifactType::Pipeline];
        let plan = Plan::new(&catalog(), Some(&supported));
        assert_eq!(plan.artifacts.len(), 2);
        assert!(
            plan.skipped
                .iter()
                .any(|s| s.path == "kqlscript/q1.json" && s.reason.contains("kqlscript"))
        );
    }

    #[test]
    fn plan_renders_as_json_and_toml() {
        let plan = Plan::new(&catalog(), None);
        let json: serde_json::Value =
            serde_json::from_str(&render(&plan, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["artifacts"][0]["type"], "linkedService");
        let toml = render(&plan, OutputFormat::Toml).unwrap();
        assert!(toml.contains("[[artifacts]]"));
    }
}
