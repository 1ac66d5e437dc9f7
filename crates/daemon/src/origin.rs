//! Origin checks for WebSocket upgrade requests.

use crate::config::SecurityConfig;

/// Decides which `Origin` header values may open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Any origin is accepted, including a missing header.
    AllowAll,
    /// Only exact matches against the list are accepted.
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// Builds the policy described by the security section of the config.
    pub fn from_config(security: &SecurityConfig) -> Self {
        if security.allow_all_origins {
            OriginPolicy::AllowAll
        } else {
            OriginPolicy::AllowList(security.allowed_origins.clone())
        }
    }

    /// Returns true if a request carrying `origin` may be upgraded.
    ///
    /// Matching is exact: scheme, host and port all count, and there is no
    /// wildcard or suffix matching. A request without an `Origin` header is
    /// only accepted under [`OriginPolicy::AllowAll`].
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            OriginPolicy::AllowAll => true,
            OriginPolicy::AllowList(list) => match origin {
                Some(origin) => list.iter().any(|allowed| allowed == origin),
                None => false,
            },
        }
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, OriginPolicy::AllowAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(origins: &[&str]) -> OriginPolicy {
        OriginPolicy::AllowList(origins.iter().map(|o| o.to_string()).collect())
    }

    #[test]
    fn test_allow_list_exact_match() {
        let policy = list(&["http://localhost", "https://term.example.com"]);

        assert!(policy.allows(Some("http://localhost")));
        assert!(policy.allows(Some("https://term.example.com")));
    }

    #[test]
    fn test_allow_list_rejects_near_misses() {
        let policy = list(&["http://localhost"]);

        assert!(!policy.allows(Some("http://localhost:3000")));
        assert!(!policy.allows(Some("https://localhost")));
        assert!(!policy.allows(Some("http://localhost.evil.test")));
        assert!(!policy.allows(Some("")));
    }

    #[test]
    fn test_allow_list_rejects_missing_origin() {
        let policy = list(&["http://localhost"]);
        assert!(!policy.allows(None));
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let policy = list(&[]);
        assert!(!policy.allows(Some("http://localhost")));
        assert!(!policy.allows(None));
    }

    #[test]
    fn test_allow_all() {
        let policy = OriginPolicy::AllowAll;

        assert!(policy.allows(Some("http://anything.test")));
        assert!(policy.allows(None));
        assert!(policy.is_allow_all());
    }

    #[test]
    fn test_from_config() {
        let mut security = SecurityConfig::default();
        assert_eq!(
            OriginPolicy::from_config(&security),
            list(&["http://localhost"])
        );

        security.allow_all_origins = true;
        assert_eq!(OriginPolicy::from_config(&security), OriginPolicy::AllowAll);
    }
}
