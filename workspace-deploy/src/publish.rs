//! Dependency-ordered publishing of classified artifacts.
//!
//! Artifact types are published one after another in [`DEPLOYMENT_ORDER`]. Every artifact of a
//! type has been attempted before the first artifact of the next type is, whether artifacts of
//! one type are published one at a time or on the rayon pool. Each entry of the source ends up
//! in the [`PublishReport`] exactly once, as a success, a failure or a skip.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::archive::ArchiveMap;
use crate::artifact::{
    ArtifactType, Catalog, ClassifiedArtifact, ClassifyOptions, DEPLOYMENT_ORDER, Matching,
    SkipReason,
};
use crate::client::{Ack, PublishError, WorkspaceClient};
use crate::transform::{ReplacementRules, TransformError};

/// What happens to the rest of a run after an artifact fails to publish.
///
/// There is deliberately no default: every caller picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop at the first publish failure. Artifacts not yet attempted are reported as
    /// [`SkipReason::Aborted`].
    FailFast,
    /// Keep publishing after a failure.
    Continue,
}

impl std::fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(Self::FailFast),
            "continue" => Ok(Self::Continue),
            other => Err(format!(
                "unknown error policy '{other}': expected 'fail-fast' or 'continue'"
            )),
        }
    }
}

/// How artifacts of the same type are published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    #[default]
    Sequential,
    /// Publish artifacts of one type concurrently, waiting for all of them before moving on to
    /// the next type. Requires the `rayon` feature, without it this behaves as `Sequential`.
    Parallel,
}

/// Cooperative cancellation of a run, checked before each publish.
///
/// Clones share the same flag, so a clone can be handed to a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Called with each result as soon as it is produced.
pub type Observer = Box<dyn Fn(&PublishResult) + Send + Sync>;

/// Why a single artifact could not be published.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to publish {kind} '{name}' from {path}")]
    Publish {
        kind: ArtifactType,
        name: String,
        path: String,
        #[source]
        err: PublishError,
    },

    #[error("failed to apply replacements to {kind} '{name}' from {path}")]
    Transform {
        kind: ArtifactType,
        name: String,
        path: String,
        #[source]
        err: TransformError,
    },
}

/// The outcome of one archive entry.
#[derive(Debug)]
pub enum Outcome {
    Success(Ack),
    Failure(ArtifactError),
    Skipped(SkipReason),
}

/// The outcome for one archive entry, with enough context to act on it.
#[derive(Debug)]
pub struct PublishResult {
    pub source_path: String,
    /// `None` when the entry was never classified.
    pub kind: Option<ArtifactType>,
    pub name: Option<String>,
    pub outcome: Outcome,
}

impl PublishResult {
    fn for_artifact(artifact: &ClassifiedArtifact, outcome: Outcome) -> Self {
        Self {
            source_path: artifact.source_path.clone(),
            kind: Some(artifact.kind),
            name: Some(artifact.name.clone()),
            outcome,
        }
    }

    fn unclassified(source_path: String, reason: SkipReason) -> Self {
        Self {
            source_path,
            kind: None,
            name: None,
            outcome: Outcome::Skipped(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped(_))
    }
}

impl std::fmt::Display for PublishResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.name) {
            (Some(kind), Some(name)) => write!(f, "{kind} '{name}'")?,
            _ => write!(f, "{}", self.source_path)?,
        }
        match &self.outcome {
            Outcome::Success(ack) => write!(f, ": published ({})", ack.status),
            Outcome::Failure(err) => {
                write!(f, ": {err}")?;
                let mut source = std::error::Error::source(err);
                while let Some(cause) = source {
                    write!(f, ": {cause}")?;
                    source = cause.source();
                }
                Ok(())
            }
            Outcome::Skipped(reason) => write!(f, ": skipped ({reason})"),
        }
    }
}

#[derive(serde::Serialize)]
struct ResultRecord<'a> {
    path: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<ArtifactType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl<'a> From<&'a PublishResult> for ResultRecord<'a> {
    fn from(result: &'a PublishResult) -> Self {
        let (outcome, status, reason) = match &result.outcome {
            Outcome::Success(ack) => ("success", Some(ack.status), None),
            Outcome::Failure(err) => {
                let status = match err {
                    ArtifactError::Publish {
                        err: PublishError::Rejected { status, .. },
                        ..
                    } => Some(*status),
                    _ => None,
                };
                let reason = match err {
                    ArtifactError::Publish { err, .. } => err.to_string(),
                    ArtifactError::Transform { err, .. } => err.to_string(),
                };
                ("failure", status, Some(reason))
            }
            Outcome::Skipped(reason) => ("skipped", None, Some(reason.to_string())),
        };
        Self {
            path: &result.source_path,
            kind: result.kind,
            name: result.name.as_deref(),
            outcome,
            status,
            reason,
        }
    }
}

impl serde::Serialize for PublishResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&ResultRecord::from(self), serializer)
    }
}

/// Every result of a run, in the order produced: classification skips in path order, then
/// artifacts in deployment order.
#[derive(Debug, Default)]
pub struct PublishReport {
    results: Vec<PublishResult>,
}

impl PublishReport {
    pub fn results(&self) -> &[PublishResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<PublishResult> {
        self.results
    }

    pub fn successes(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| r.is_skipped())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(serde::Serialize)]
struct ReportRecord<'a> {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    results: Vec<ResultRecord<'a>>,
}

impl serde::Serialize for PublishReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = ReportRecord {
            succeeded: self.successes().count(),
            failed: self.failures().count(),
            skipped: self.skipped().count(),
            results: self.results.iter().map(ResultRecord::from).collect(),
        };
        serde::Serialize::serialize(&record, serializer)
    }
}

/// Publishes archive entries to a workspace through a [`WorkspaceClient`].
pub struct Publisher<C> {
    client: C,
    policy: ErrorPolicy,
    concurrency: Concurrency,
    matching: Matching,
    json_only: bool,
    rules: Option<ReplacementRules>,
    rule_exclusions: Vec<String>,
    cancel: CancelFlag,
    observer: Option<Observer>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for Publisher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("client", &self.client)
            .field("policy", &self.policy)
            .field("concurrency", &self.concurrency)
            .field("matching", &self.matching)
            .field("json_only", &self.json_only)
            .field("rules", &self.rules)
            .field("rule_exclusions", &self.rule_exclusions)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<C: WorkspaceClient> Publisher<C> {
    pub fn new(client: C, policy: ErrorPolicy) -> Self {
        Self {
            client,
            policy,
            concurrency: Concurrency::default(),
            matching: Matching::default(),
            json_only: true,
            rules: None,
            rule_exclusions: Vec::new(),
            cancel: CancelFlag::default(),
            observer: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_matching(mut self, matching: Matching) -> Self {
        self.matching = matching;
        self
    }

    /// Whether entries that are not `.json` files are skipped rather than published.
    pub fn with_json_only(mut self, json_only: bool) -> Self {
        self.json_only = json_only;
        self
    }

    /// Replacements applied to each artifact body just before it is published.
    pub fn with_rules(mut self, rules: ReplacementRules) -> Self {
        self.rules = (!rules.is_empty()).then_some(rules);
        self
    }

    /// Artifacts whose file name contains any of `patterns` are published without replacements.
    pub fn with_rule_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule_exclusions = patterns
            .into_iter()
            .map(Into::into)
            .filter(|pattern: &String| !pattern.is_empty())
            .collect();
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&PublishResult) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Classify `entries` the way [`publish`](Self::publish) would.
    pub fn catalog(&self, entries: ArchiveMap) -> Catalog {
        Catalog::build(
            entries,
            &ClassifyOptions {
                matching: self.matching,
                name_style: self.client.name_style(),
                json_only: self.json_only,
            },
        )
    }

    /// Classify and publish every entry of an extracted archive.
    pub fn publish(&self, entries: ArchiveMap) -> PublishReport {
        self.publish_catalog(self.catalog(entries))
    }

    /// Publish an already classified set of artifacts.
    pub fn publish_catalog(&self, catalog: Catalog) -> PublishReport {
        let (artifacts, unclassified) = catalog.into_parts();
        let mut report = PublishReport::default();
        for (path, reason) in unclassified {
            let result = PublishResult::unclassified(path, reason);
            self.observe(&result);
            report.results.push(result);
        }

        warn_on_duplicates(&artifacts);
        let supported = self.client.supported_types();
        let failed = AtomicBool::new(false);
        let attempt = |artifact: &ClassifiedArtifact| {
            let result = match self.halt_reason(&failed) {
                Some(reason) => {
                    tracing::warn!(kind = %artifact.kind, name = %artifact.name, %reason, "not publishing");
                    PublishResult::for_artifact(artifact, Outcome::Skipped(reason))
                }
                None => self.publish_one(artifact, &failed),
            };
            self.observe(&result);
            result
        };

        for kind in DEPLOYMENT_ORDER {
            let batch = artifacts
                .iter()
                .filter(|a| a.kind == kind)
                .collect::<Vec<_>>();
            if batch.is_empty() {
                continue;
            }
            if !supported.contains(&kind) {
                tracing::warn!(%kind, count = batch.len(), "artifact type not supported by the workspace; skipping");
                for artifact in batch {
                    let result = PublishResult::for_artifact(
                        artifact,
                        Outcome::Skipped(SkipReason::UnsupportedType(kind)),
                    );
                    self.observe(&result);
                    report.results.push(result);
                }
                continue;
            }
            tracing::info!(%kind, count = batch.len(), "publishing artifacts");
            let results = match self.concurrency {
                Concurrency::Sequential => crate::helper::serial::publish_batch(&batch, &attempt),
                #[cfg(feature = "rayon")]
                Concurrency::Parallel => {
                    crate::helper::parallel::publish_batch_par(&batch, &attempt)
                }
                #[cfg(not(feature = "rayon"))]
                Concurrency::Parallel => crate::helper::serial::publish_batch(&batch, &attempt),
            };
            report.results.extend(results);
        }
        report
    }

    fn halt_reason(&self, failed: &AtomicBool) -> Option<SkipReason> {
        if self.cancel.is_cancelled() {
            Some(SkipReason::Cancelled)
        } else if self.policy == ErrorPolicy::FailFast && failed.load(Ordering::SeqCst) {
            Some(SkipReason::Aborted)
        } else {
            None
        }
    }

    /// Transform failures are confined to their artifact and never halt a fail-fast run.
    fn publish_one(&self, artifact: &ClassifiedArtifact, failed: &AtomicBool) -> PublishResult {
        let rules = self
            .rules
            .as_ref()
            .filter(|_| !self.excluded_from_rules(artifact));
        let content = match rules.map(|rules| rules.apply(&artifact.content)) {
            Some(Ok(content)) => std::borrow::Cow::<[u8]>::Owned(content),
            Some(Err(err)) => {
                tracing::error!(kind = %artifact.kind, name = %artifact.name, error = %err, "replacement failed");
                return PublishResult::for_artifact(
                    artifact,
                    Outcome::Failure(ArtifactError::Transform {
                        kind: artifact.kind,
                        name: artifact.name.clone(),
                        path: artifact.source_path.clone(),
                        err,
                    }),
                );
            }
            None => std::borrow::Cow::Borrowed(artifact.content.as_slice()),
        };
        match self.client.publish(artifact.kind, &artifact.name, &content) {
            Ok(ack) => {
                tracing::info!(kind = %artifact.kind, name = %artifact.name, status = ack.status, "published");
                PublishResult::for_artifact(artifact, Outcome::Success(ack))
            }
            Err(err) => {
                tracing::error!(kind = %artifact.kind, name = %artifact.name, error = %err, "publish failed");
                failed.store(true, Ordering::SeqCst);
                PublishResult::for_artifact(
                    artifact,
                    Outcome::Failure(ArtifactError::Publish {
                        kind: artifact.kind,
                        name: artifact.name.clone(),
                        path: artifact.source_path.clone(),
                        err,
                    }),
                )
            }
        }
    }

    fn excluded_from_rules(&self, artifact: &ClassifiedArtifact) -> bool {
        let file_name = artifact
            .source_path
            .rsplit('/')
            .next()
            .unwrap_or(&artifact.source_path);
        let excluded = self
            .rule_exclusions
            .iter()
            .any(|pattern| file_name.contains(pattern.as_str()));
        if excluded {
            tracing::debug!(path = %artifact.source_path, "replacements not applied");
        }
        excluded
    }

    fn observe(&self, result: &PublishResult) {
        if let Some(observer) = &self.observer {
            observer(result);
        }
    }
}

/// Both artifacts are still published; the later one wins at the target.
fn warn_on_duplicates(artifacts: &[ClassifiedArtifact]) {
    let mut seen = HashSet::new();
    for artifact in artifacts {
        if !seen.insert((artifact.kind, artifact.name.as_str())) {
            tracing::warn!(
                kind = %artifact.kind,
                name = %artifact.name,
                path = %artifact.source_path,
                "duplicate artifact name; the last one published wins"
            );
        }
    }
}
