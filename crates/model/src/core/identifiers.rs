use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, sync::Arc};

/// Identifies one pass of the pipeline over a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Arc<str>);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn generate() -> Self {
        Self::new(format!("run-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-derived identifier of a settled batch.
///
/// Two batches holding the same paths observed at the same instants
/// share an id, which keeps log lines stable across a deferred retry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Arc<str>);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn derive<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a Path, i64)>,
    {
        let mut h = blake3::Hasher::new();
        for (path, ts) in parts {
            h.update(path.to_string_lossy().as_bytes());
            h.update(b":");
            h.update(ts.to_string().as_bytes());
            h.update(b";");
        }
        Self::new(format!("bat-{}", &h.finalize().to_hex()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_is_stable_for_same_input() {
        let a = BatchId::derive([(Path::new("/w/a.jpg"), 10), (Path::new("/w/b.jpg"), 11)]);
        let b = BatchId::derive([(Path::new("/w/a.jpg"), 10), (Path::new("/w/b.jpg"), 11)]);
        let c = BatchId::derive([(Path::new("/w/a.jpg"), 12)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("bat-"));
    }

    #[test]
    fn generated_run_ids_differ() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
