//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod exchange_rate {
    use super::*;

    pub const NAMESPACE: &str = "rate";

    /// Latest snapshot of rates quoted against `base`
    #[derive(Debug, Clone)]
    pub struct SnapshotKey {
        pub base: String,
    }

    impl SnapshotKey {
        pub fn new(base: impl Into<String>) -> Self {
            Self {
                base: base.into().to_uppercase(),
            }
        }
    }

    impl fmt::Display for SnapshotKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:snapshot:{}", VERSION, NAMESPACE, self.base)
        }
    }
}

pub mod rate_limit {
    use super::*;

    pub const NAMESPACE: &str = "ratelimit";

    /// Sliding-window counter for one subject (user id, hashed address) in one scope
    #[derive(Debug, Clone)]
    pub struct WindowKey {
        pub scope: String,
        pub subject: String,
    }

    impl WindowKey {
        pub fn new(scope: impl Into<String>, subject: impl Into<String>) -> Self {
            Self {
                scope: scope.into(),
                subject: subject.into(),
            }
        }
    }

    impl fmt::Display for WindowKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}:{}", VERSION, NAMESPACE, self.scope, self.subject)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_key_is_versioned_and_uppercased() {
        let key = exchange_rate::SnapshotKey::new("usd");
        assert_eq!(key.to_string(), "v1:rate:snapshot:USD");
    }

    #[test]
    fn window_key_includes_scope_and_subject() {
        let key = rate_limit::WindowKey::new("lookup_user", "user-1");
        assert_eq!(key.to_string(), "v1:ratelimit:lookup_user:user-1");
    }
}
