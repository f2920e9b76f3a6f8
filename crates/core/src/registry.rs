//! Session registry: `PresentationKey -> ReflectorSession` with
//! reference-counted handles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reflector::session::ReflectorSession;
use crate::sdp::Sdp;

/// Case-sensitive normalized absolute path derived from an RTSP request
/// URI: scheme and host stripped, query string stripped, a trailing
/// `.sdp` suffix preserved. Primary key of the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresentationKey(String);

impl PresentationKey {
    /// Derive a key from a request URI (absolute or relative), stripping
    /// scheme/host/query and any trailing `/trackID=<n>` or `/streamid=<n>`
    /// suffix added by SETUP requests.
    pub fn from_uri(uri: &str) -> Self {
        let mut path = if let Some(after) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            match after.find('/') {
                Some(slash) => &after[slash..],
                None => "/",
            }
        } else {
            uri
        };

        if let Some(q) = path.find('?') {
            path = &path[..q];
        }

        // Strip a trailing per-track control suffix appended by SETUP,
        // e.g. `/live.sdp/trackID=2` -> `/live.sdp`.
        let stripped = path
            .rfind("/trackID=")
            .or_else(|| path.rfind("/streamid="))
            .map(|pos| &path[..pos])
            .unwrap_or(path);

        PresentationKey(stripped.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PresentationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    session: Arc<ReflectorSession>,
    refcount: usize,
}

/// Reference-counted `PresentationKey -> ReflectorSession` map.
///
/// All operations are serialized by a single mutex; no per-session work
/// is performed while the lock is held — the registry mutex is always
/// the outermost lock.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<PresentationKey, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up a session, incrementing its refcount on hit.
    pub fn resolve(&self, key: &PresentationKey) -> Option<Arc<ReflectorSession>> {
        let mut map = self.inner.lock();
        map.get_mut(key).map(|entry| {
            entry.refcount += 1;
            entry.session.clone()
        })
    }

    /// Register a new session under `key`. Fails if the key is already
    /// taken by a live session.
    pub fn register(&self, key: PresentationKey, session: Arc<ReflectorSession>) -> Result<Arc<ReflectorSession>, Arc<ReflectorSession>> {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(&key) {
            return Err(existing.session.clone());
        }
        let session_clone = session.clone();
        map.insert(
            key,
            Entry {
                session,
                refcount: 1,
            },
        );
        Ok(session_clone)
    }

    /// Decrement the refcount for `key`; removes and returns the session
    /// if the count reaches zero (caller tears it down on its own task).
    pub fn release(&self, key: &PresentationKey) -> Option<Arc<ReflectorSession>> {
        let mut map = self.inner.lock();
        let remove = match map.get_mut(key) {
            Some(entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            }
            None => false,
        };
        if remove { map.remove(key).map(|e| e.session) } else { None }
    }

    /// Remove `key` iff its refcount is currently zero — used during
    /// shutdown to avoid a race with a late subscriber resolving the
    /// same key between the last release and this call.
    pub fn try_unregister(&self, key: &PresentationKey) -> bool {
        let mut map = self.inner.lock();
        if map.get(key).is_some_and(|e| e.refcount == 0) {
            map.remove(key);
            true
        } else {
            false
        }
    }

    /// Number of live presentations (for diagnostics/tests).
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the most recent ANNOUNCEd SDP per presentation, so a
/// DESCRIBE arriving before any SETUP/RECORD (or after the broadcaster
/// has gone away) can still materialize a pull-only `ReflectorSession`.
#[derive(Clone)]
pub struct SdpCache {
    inner: Arc<Mutex<HashMap<PresentationKey, Sdp>>>,
}

impl SdpCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn insert(&self, key: PresentationKey, sdp: Sdp) {
        self.inner.lock().insert(key, sdp);
    }

    pub fn get(&self, key: &PresentationKey) -> Option<Sdp> {
        self.inner.lock().get(key).cloned()
    }
}

impl Default for SdpCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::session::ReflectorSession;
    use crate::sdp::Sdp;

    fn dummy_session() -> Arc<ReflectorSession> {
        let sdp = Sdp::parse("v=0\r\no=- 0 0 IN IP4 1.2.3.4\r\ns=s\r\nt=0 0\r\nm=video 0 RTP/AVP 96\r\n")
            .unwrap();
        Arc::new(ReflectorSession::new(sdp, 16, false))
    }

    #[test]
    fn key_strips_scheme_host_and_track_suffix() {
        let key = PresentationKey::from_uri("rtsp://host:554/live.sdp/trackID=2");
        assert_eq!(key.as_str(), "/live.sdp");
    }

    #[test]
    fn key_preserves_sdp_suffix() {
        let key = PresentationKey::from_uri("rtsp://host/cam1.sdp");
        assert_eq!(key.as_str(), "/cam1.sdp");
    }

    #[test]
    fn register_duplicate_key_fails() {
        let registry = SessionRegistry::new();
        let key = PresentationKey::from_uri("rtsp://host/live.sdp");
        registry.register(key.clone(), dummy_session()).unwrap();
        assert!(registry.register(key, dummy_session()).is_err());
    }

    #[test]
    fn resolve_increments_refcount_release_decrements() {
        let registry = SessionRegistry::new();
        let key = PresentationKey::from_uri("rtsp://host/live.sdp");
        registry.register(key.clone(), dummy_session()).unwrap();

        assert!(registry.resolve(&key).is_some()); // refcount now 2
        assert!(registry.release(&key).is_none()); // -> 1, not removed
        assert!(registry.release(&key).is_some()); // -> 0, removed
        assert!(registry.resolve(&key).is_none());
    }

    #[test]
    fn try_unregister_only_removes_at_zero_refcount() {
        let registry = SessionRegistry::new();
        let key = PresentationKey::from_uri("rtsp://host/live.sdp");
        registry.register(key.clone(), dummy_session()).unwrap();
        assert!(!registry.try_unregister(&key));
        registry.release(&key);
        assert!(registry.is_empty());
    }
}
