//! An in-memory workspace, used for dry runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::artifact::{ArtifactType, DEPLOYMENT_ORDER, NameStyle};
use crate::client::{Ack, PublishError, WorkspaceClient};

type Key = (ArtifactType, String);

/// A [`WorkspaceClient`] that stores published artifacts in memory and records every call.
///
/// Publishing new content answers `201`, publishing content identical to what is stored answers
/// `200` without changing anything. Failures can be injected per artifact.
#[derive(Debug)]
pub struct MemoryWorkspace {
    supported: Vec<ArtifactType>,
    name_style: NameStyle,
    failing: HashSet<Key>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Key>,
    store: HashMap<Key, Vec<u8>>,
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkspace {
    /// An empty workspace supporting every artifact type.
    pub fn new() -> Self {
        Self {
            supported: DEPLOYMENT_ORDER.to_vec(),
            name_style: NameStyle::Bare,
            failing: HashSet::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_supported_types<I: IntoIterator<Item = ArtifactType>>(mut self, types: I) -> Self {
        self.supported = types.into_iter().collect();
        self
    }

    pub fn with_name_style(mut self, name_style: NameStyle) -> Self {
        self.name_style = name_style;
        self
    }

    /// Reject every publish of `name` as `kind`.
    pub fn fail_on<S: Into<String>>(mut self, kind: ArtifactType, name: S) -> Self {
        self.failing.insert((kind, name.into()));
        self
    }

    /// Every publish call received, in order, including failed ones.
    pub fn calls(&self) -> Vec<(ArtifactType, String)> {
        self.lock().calls.clone()
    }

    /// The stored content of an artifact, if it was published.
    pub fn get(&self, kind: ArtifactType, name: &str) -> Option<Vec<u8>> {
        self.lock().store.get(&(kind, name.to_string())).cloned()
    }

    /// The number of distinct artifacts stored.
    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkspaceClient for MemoryWorkspace {
    fn supported_types(&self) -> &[ArtifactType] {
        &self.supported
    }

    fn name_style(&self) -> NameStyle {
        self.name_style
    }

    fn publish(&self, kind: ArtifactType, name: &str, content: &[u8]) -> Result<Ack, PublishError> {
        let key = (kind, name.to_string());
        let mut state = self.lock();
        state.calls.push(key.clone());
        if !self.supported.contains(&kind) {
            return Err(PublishError::Unsupported(kind));
        }
        if self.failing.contains(&key) {
            return Err(PublishError::Rejected {
                status: 500,
                body: format!("injected failure for {kind} '{name}'"),
            });
        }
        let status = match state.store.get(&key) {
            Some(existing) if existing.as_slice() == content => 200,
            _ => {
                state.store.insert(key, content.to_vec());
                201
            }
        };
        Ok(Ack { status })
    }
}
