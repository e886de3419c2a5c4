//! Caller key builders.
//!
//! Keys are namespaced per caller class so an IP and a session with
//! the same textual value can never collide within a pool.

use taxhub_core::types::id::{SessionId, UserId};

/// Key for an anonymous caller identified by IP address.
pub fn client_ip(ip: &str) -> String {
    format!("ip:{ip}")
}

/// Key for a filing session.
pub fn session(session_id: SessionId) -> String {
    format!("session:{session_id}")
}

/// Key for an authenticated user.
pub fn user(user_id: UserId) -> String {
    format!("user:{user_id}")
}

/// Key for an API key, identified by its fingerprint (never the raw
/// credential).
pub fn api_key(fingerprint: &str) -> String {
    format!("key:{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_do_not_collide() {
        assert_ne!(client_ip("abc"), api_key("abc"));
    }

    #[test]
    fn test_session_key_format() {
        let id = SessionId::new();
        assert_eq!(session(id), format!("session:{id}"));
    }
}
