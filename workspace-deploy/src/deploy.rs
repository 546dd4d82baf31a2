//! A whole deployment run: manifest, source and client in, report out.

use crate::archive::ArchiveMap;
use crate::artifact::ClassifyOptions;
use crate::client::WorkspaceClient;
use crate::manifest::DeployManifest;
use crate::memory::MemoryWorkspace;
use crate::publish::{CancelFlag, Concurrency, ErrorPolicy, PublishReport, Publisher};
use crate::transform::ReplacementRules;

/// Choices a caller makes on top of the manifest.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Overrides `[publish] on-error`.
    pub policy: Option<ErrorPolicy>,
    /// Forces parallel publishing within a type.
    pub parallel: bool,
    /// Overrides `[transform] replacements`.
    pub replacements_file: Option<std::path::PathBuf>,
    /// Rules applied after those from the replacement file.
    pub extra_rules: ReplacementRules,
    pub cancel: CancelFlag,
}

impl DeployManifest {
    /// A publisher configured from the manifest and `options`. Fails when no error policy has
    /// been chosen or the replacement rules cannot be loaded.
    pub fn publisher<C: WorkspaceClient>(
        &self,
        client: C,
        options: &DeployOptions,
    ) -> Result<Publisher<C>, crate::Error> {
        let policy = self.error_policy(options.policy)?;
        let rules = match &options.replacements_file {
            Some(file) => {
                let mut rules = ReplacementRules::load(file)?;
                rules.extend(options.extra_rules.clone());
                rules
            }
            None => self.replacement_rules(options.extra_rules.clone())?,
        };
        let concurrency = if options.parallel {
            Concurrency::Parallel
        } else {
            self.concurrency()
        };
        tracing::debug!(%policy, ?concurrency, rules = rules.len(), "configured publisher");
        Ok(Publisher::new(client, policy)
            .with_concurrency(concurrency)
            .with_matching(self.publish.matching)
            .with_json_only(self.publish.json_only)
            .with_rules(rules)
            .with_rule_exclusions(self.transform.exclude.iter().cloned())
            .with_cancel_flag(options.cancel.clone()))
    }

    /// How entries are classified for `client`. Publishing classifies the same way.
    pub fn classify_options<C: WorkspaceClient>(&self, client: &C) -> ClassifyOptions {
        ClassifyOptions {
            matching: self.publish.matching,
            name_style: client.name_style(),
            json_only: self.publish.json_only,
        }
    }

    /// An in-memory stand-in for the target that accepts the same artifact types and names
    /// artifacts the same way, for dry runs and listings that need no credentials.
    pub fn preview_client(&self) -> MemoryWorkspace {
        let workspace = MemoryWorkspace::new().with_name_style(self.target.name_style());
        match &self.target.types {
            Some(types) => workspace.with_supported_types(types.iter().copied()),
            None => workspace,
        }
    }

    /// Acquire the source and unpack it.
    pub fn fetch_entries(&self) -> Result<ArchiveMap, crate::Error> {
        tracing::info!(source = %self.source, "fetching source");
        Ok(self.source.entries()?)
    }
}

/// Run a deployment end to end. Everything that can fail before the first publish does, and
/// aborts the run with an error. Per-artifact failures are in the returned report.
pub fn deploy<C: WorkspaceClient>(
    manifest: &DeployManifest,
    client: C,
    options: &DeployOptions,
) -> Result<PublishReport, crate::Error> {
    let publisher = manifest.publisher(client, options)?;
    let entries = manifest.fetch_entries()?;
    Ok(publisher.publish(entries))
}
