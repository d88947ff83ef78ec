//! Compiled script cache
//!
//! Chunks are keyed by the lowercase hex SHA1 of their source, the same
//! digest `SCRIPT LOAD`-style hosts hand back to callers. A cached chunk is
//! immutable and `Send + Sync`, so one compile serves every thread.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::lua::codegen::{compile, Chunk};
use crate::lua::error::LuaResult;

/// Thread-safe map from source digest to compiled chunk
#[derive(Default)]
pub struct ScriptCache {
    scripts: RwLock<HashMap<String, Arc<Chunk>>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest used as the cache key for `source`
    pub fn digest(source: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(source.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compile `source` unless an identical script is already cached.
    /// Returns the digest and the shared chunk.
    pub fn load(&self, source: &str, chunk_name: &str) -> LuaResult<(String, Arc<Chunk>)> {
        let sha = Self::digest(source);
        if let Some(chunk) = self.read().get(&sha) {
            return Ok((sha, Arc::clone(chunk)));
        }

        // Compile outside the lock; a racing loader produces an equal chunk
        let chunk = Arc::new(compile(source, chunk_name)?);
        let chunk = Arc::clone(self.write().entry(sha.clone()).or_insert(chunk));
        debug!(sha = %sha, "cached script");
        Ok((sha, chunk))
    }

    pub fn get(&self, sha: &str) -> Option<Arc<Chunk>> {
        self.read().get(&sha.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, sha: &str) -> bool {
        self.read().contains_key(&sha.to_ascii_lowercase())
    }

    /// Drop every cached script
    pub fn flush(&self) {
        let mut scripts = self.write();
        debug!(count = scripts.len(), "flushing script cache");
        scripts.clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Chunk>>> {
        self.scripts.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Chunk>>> {
        self.scripts.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::value::Value;
    use crate::lua::vm::LuaVM;
    use std::thread;

    #[test]
    fn test_digest_is_lowercase_sha1() {
        assert_eq!(
            ScriptCache::digest("return 1"),
            "e0e1f9fabfc9d4800c877a703b823ac0578ff8db"
        );
    }

    #[test]
    fn test_load_reuses_chunk() {
        let cache = ScriptCache::new();
        let (sha1, first) = cache.load("return 1 + 1", "a").unwrap();
        let (sha2, second) = cache.load("return 1 + 1", "b").unwrap();
        assert_eq!(sha1, sha2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&sha1.to_uppercase()));

        cache.flush();
        assert!(cache.is_empty());
        assert!(cache.get(&sha1).is_none());
    }

    #[test]
    fn test_syntax_error_is_not_cached() {
        let cache = ScriptCache::new();
        assert!(cache.load("return +", "bad").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_chunk_shared_across_threads() {
        let cache = Arc::new(ScriptCache::new());
        let (sha, _) = cache
            .load("local n = ... return n * n", "square")
            .unwrap();

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let sha = sha.clone();
                thread::spawn(move || {
                    let chunk = cache.get(&sha).unwrap();
                    let vm = LuaVM::new().unwrap();
                    let result = vm
                        .execute_with_args(&chunk, vec![Value::from(i)].into())
                        .unwrap();
                    result.first().as_number()
                })
            })
            .collect();

        let results: Vec<Option<f64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![Some(1.0), Some(4.0), Some(9.0), Some(16.0)]);
    }
}
