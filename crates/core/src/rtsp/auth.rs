//! Authentication/authorization interface.
//!
//! Only the interface the RTSP state machine dispatches through is
//! defined here; wiring up a real backend (LDAP, a user database, a
//! token service) is left to the embedder. [`AllowAll`] is the
//! permissive default used when the server is configured without a
//! provider.

use base64::Engine;

/// Action flags checked against a resource during the authorize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Admin,
}

/// Identity established by the authenticate stage.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub username: Option<String>,
    /// Access groups this user belongs to, used to check
    /// `ServerConfig::broadcaster_group` membership for RECORD.
    pub groups: Vec<String>,
}

impl UserProfile {
    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Pluggable authentication/authorization backend.
///
/// Implementations decide, per request, who the caller is
/// ([`authenticate`](Self::authenticate)) and whether that identity may
/// perform a given [`Action`] on a presentation
/// ([`authorize`](Self::authorize)).
pub trait AuthProvider: Send + Sync {
    /// Evaluate the `Authorization` header (if any) and return the
    /// resolved identity. Returning `Err(())` maps to 401.
    fn authenticate(&self, authorization_header: Option<&str>) -> Result<UserProfile, ()>;

    /// Check whether `user` may perform `action` on `presentation`.
    /// Returning `false` maps to 403.
    fn authorize(&self, user: &UserProfile, presentation: &str, action: Action) -> bool;
}

/// Default provider: authenticates anyone (including anonymous callers)
/// and authorizes every action. Used when the server is not configured
/// with a real backend.
pub struct AllowAll;

impl AuthProvider for AllowAll {
    fn authenticate(&self, _authorization_header: Option<&str>) -> Result<UserProfile, ()> {
        Ok(UserProfile::default())
    }

    fn authorize(&self, _user: &UserProfile, _presentation: &str, _action: Action) -> bool {
        true
    }
}

/// Decode an HTTP/RTSP `Authorization: Basic <base64>` header into
/// `(username, password)`. Returns `None` for anything else (e.g.
/// `Digest`, malformed base64) — digest authentication is not
/// implemented.
pub fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_authenticates_anonymous() {
        let provider = AllowAll;
        let user = provider.authenticate(None).unwrap();
        assert!(user.username.is_none());
    }

    #[test]
    fn allow_all_authorizes_everything() {
        let provider = AllowAll;
        let user = UserProfile::default();
        assert!(provider.authorize(&user, "/live.sdp", Action::Write));
    }

    #[test]
    fn decode_basic_roundtrip() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alice:secret")
        );
        let (user, pass) = decode_basic(&header).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "secret");
    }

    #[test]
    fn decode_basic_rejects_digest() {
        assert!(decode_basic("Digest username=\"alice\"").is_none());
    }
}
