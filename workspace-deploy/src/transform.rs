//! Literal token replacement in artifact bodies, used to parameterise artifacts per environment.
//!
//! Rules are applied one after another in the order they were declared. A rule's replacement
//! text may contain another rule's search token, in which case a later rule rewrites it again
//! and applying the same rules twice does not give the same result as applying them once.

use indexmap::IndexMap;

/// Errors raised while loading or applying replacement rules.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The artifact body is not valid UTF-8 text.
    #[error("artifact content is not valid UTF-8")]
    InvalidEncoding(#[from] std::string::FromUtf8Error),

    /// A rule given as `token=value` had no `=`.
    #[error("expected a replacement of the form 'token=value', got '{0}'")]
    InvalidPair(String),

    /// A rule has an empty search token.
    #[error("replacement tokens must not be empty")]
    EmptyToken,

    #[error("failed to read replacement file {}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error(transparent)]
    YamlInvalid(#[from] serde_yaml::Error),
}

/// An ordered mapping of literal token to replacement text.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ReplacementRules(IndexMap<String, String>);

#[derive(serde::Deserialize)]
struct ReplacementFile {
    #[serde(default)]
    replacements: ReplacementRules,
}

impl ReplacementRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `replacements` mapping from a YAML document. Rules keep document order.
    pub fn from_yaml<S: AsRef<str>>(document: S) -> Result<Self, TransformError> {
        let file: ReplacementFile = serde_yaml::from_str(document.as_ref())?;
        file.replacements.validated()
    }

    /// Read and parse a YAML replacement file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TransformError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|err| TransformError::Read {
            path: path.to_path_buf(),
            err,
        })?;
        Self::from_yaml(document)
    }

    /// Append a rule. A token that is already present keeps its original position but takes
    /// the new replacement.
    pub fn insert<K: Into<String>, V: Into<String>>(
        &mut self,
        token: K,
        replacement: V,
    ) -> Result<(), TransformError> {
        let token = token.into();
        if token.is_empty() {
            return Err(TransformError::EmptyToken);
        }
        self.0.insert(token, replacement.into());
        Ok(())
    }

    /// Append a rule written as `token=value`. Only the first `=` separates the two.
    pub fn insert_pair<S: AsRef<str>>(&mut self, pair: S) -> Result<(), TransformError> {
        let pair = pair.as_ref();
        let (token, replacement) = pair
            .split_once('=')
            .ok_or_else(|| TransformError::InvalidPair(pair.to_string()))?;
        self.insert(token, replacement)
    }

    /// Append every rule from `other`, in order.
    pub fn extend(&mut self, other: ReplacementRules) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace every occurrence of each token in `content`, rule by rule. The content is not
    /// modified in place.
    pub fn apply(&self, content: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut text = String::from_utf8(content.to_vec())?;
        for (token, replacement) in self.iter() {
            if text.contains(token) {
                text = text.replace(token, replacement);
            }
        }
        Ok(text.into_bytes())
    }

    fn validated(self) -> Result<Self, TransformError> {
        if self.0.keys().any(String::is_empty) {
            Err(TransformError::EmptyToken)
        } else {
            Ok(self)
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReplacementRules {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
