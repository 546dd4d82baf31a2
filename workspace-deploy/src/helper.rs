use crate::artifact::ClassifiedArtifact;
use crate::publish::PublishResult;

pub(crate) mod serial {
    use super::*;

    pub fn publish_batch<F>(batch: &[&ClassifiedArtifact], attempt: F) -> Vec<PublishResult>
    where
        F: Fn(&ClassifiedArtifact) -> PublishResult,
    {
        batch.iter().map(|artifact| attempt(artifact)).collect()
    }
}

#[cfg(feature = "rayon")]
pub(crate) mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Results come back in batch order, whatever order the publishes complete in. Returns
    /// once every artifact in the batch has been attempted.
    pub fn publish_batch_par<F>(batch: &[&ClassifiedArtifact], attempt: F) -> Vec<PublishResult>
    where
        F: Fn(&ClassifiedArtifact) -> PublishResult + Send + Sync,
    {
        batch
            .par_iter()
            .map(|artifact| attempt(artifact))
            .collect::<Vec<_>>()
    }
}
