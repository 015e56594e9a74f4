// Local ↔ remote path mapping

use serde::{Deserialize, Serialize};

/// One configured mapping between a local filesystem prefix and the
/// prefix the remote interpreter sees. Pairs with a blank endpoint are
/// inert and never match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingPair {
    pub local_prefix: String,
    pub remote_prefix: String,
}

/// Prefix-based bidirectional path translation. First matching pair wins.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    pairs: Vec<MappingPair>,
}

impl PathMapper {
    pub fn new(pairs: Vec<MappingPair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[MappingPair] {
        &self.pairs
    }

    /// Translate a local path into the remote form, or `None` when no
    /// configured pair applies.
    pub fn to_remote(&self, local: &str) -> Option<String> {
        let local = normalize_separators(local);
        for pair in &self.pairs {
            if pair.local_prefix.is_empty() || pair.remote_prefix.is_empty() {
                continue;
            }
            let prefix = normalize_separators(&pair.local_prefix);
            if let Some(suffix) = local.strip_prefix(&prefix) {
                return Some(format!("{}{}", pair.remote_prefix, suffix));
            }
        }
        None
    }

    /// Translate a remote path back into the local form. Structural
    /// inverse of [`to_remote`](Self::to_remote).
    pub fn to_local(&self, remote: &str) -> Option<String> {
        let remote = normalize_separators(remote);
        for pair in &self.pairs {
            if pair.local_prefix.is_empty() || pair.remote_prefix.is_empty() {
                continue;
            }
            let prefix = normalize_separators(&pair.remote_prefix);
            if let Some(suffix) = remote.strip_prefix(&prefix) {
                return Some(format!("{}{}", pair.local_prefix, suffix));
            }
        }
        None
    }
}

/// Normalize Windows separators to the forward slashes the interpreter
/// uses in chunk names.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new(vec![
            MappingPair {
                local_prefix: "/home/dev/project".into(),
                remote_prefix: "/var/game".into(),
            },
            MappingPair {
                local_prefix: "/home/dev/shared".into(),
                remote_prefix: "/var/shared".into(),
            },
        ])
    }

    #[test]
    fn test_to_remote_first_match_wins() {
        let m = mapper();
        assert_eq!(
            m.to_remote("/home/dev/project/main.lua"),
            Some("/var/game/main.lua".to_string())
        );
        assert_eq!(
            m.to_remote("/home/dev/shared/util.lua"),
            Some("/var/shared/util.lua".to_string())
        );
    }

    #[test]
    fn test_to_remote_unmapped_is_none() {
        assert_eq!(mapper().to_remote("/tmp/elsewhere.lua"), None);
    }

    #[test]
    fn test_to_local_inverts_to_remote() {
        let m = mapper();
        for p in [
            "/home/dev/project/main.lua",
            "/home/dev/project/sub/dir/mod.lua",
            "/home/dev/shared/util.lua",
        ] {
            let remote = m.to_remote(p).unwrap();
            assert_eq!(m.to_local(&remote).as_deref(), Some(p));
        }
    }

    #[test]
    fn test_blank_endpoints_never_match() {
        let m = PathMapper::new(vec![MappingPair {
            local_prefix: String::new(),
            remote_prefix: "/var/game".into(),
        }]);
        assert_eq!(m.to_remote("/anything.lua"), None);
        assert_eq!(m.to_local("/var/game/anything.lua"), None);
    }

    #[test]
    fn test_windows_separators_normalized() {
        let m = PathMapper::new(vec![MappingPair {
            local_prefix: "C:\\dev\\project".into(),
            remote_prefix: "/var/game".into(),
        }]);
        assert_eq!(
            m.to_remote("C:\\dev\\project\\main.lua"),
            Some("/var/game/main.lua".to_string())
        );
    }
}
