//! Path resolution between the local project and the remote interpreter.
//!
//! Explicit prefix mappings are tried first; when none apply, paths under
//! the project root map to their project-relative form, which is how the
//! interpreter names chunks loaded from the project. An unmappable file
//! yields no candidates, so no breakpoint can be set for it.

use std::path::{Path, PathBuf};

use luascope_config::mapping::{normalize_separators, PathMapper};
use luascope_engine::SourceResolver;

pub struct PathResolver {
    mapper: PathMapper,
    project_root: String,
}

impl PathResolver {
    pub fn new(mapper: PathMapper, project_root: impl AsRef<Path>) -> Self {
        let root = normalize_separators(&project_root.as_ref().to_string_lossy());
        Self {
            mapper,
            project_root: root.trim_end_matches('/').to_string(),
        }
    }

    /// Local path → remote form: explicit mapping first, then
    /// project-relative fallback.
    pub fn to_remote(&self, local: &str) -> Option<String> {
        self.mapper
            .to_remote(local)
            .or_else(|| self.project_relative(local))
    }

    /// Remote path (possibly an "@" chunk name) → local path. Absolute
    /// remote paths only resolve through explicit mappings; relative ones
    /// fall back to the project root.
    pub fn to_local(&self, remote: &str) -> Option<String> {
        let stripped = remote.strip_prefix('@').unwrap_or(remote);
        if let Some(local) = self.mapper.to_local(stripped) {
            return Some(local);
        }
        let normalized = normalize_separators(stripped);
        if normalized.starts_with('/') || self.project_root.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.project_root, normalized))
    }

    /// All remote forms worth registering a breakpoint under: the bare
    /// candidate plus its "@" chunk-name variant, deduplicated. Empty when
    /// the file cannot be mapped at all.
    pub fn remote_candidates(&self, local: &str) -> Vec<String> {
        let remote = match self.to_remote(local) {
            Some(r) => r,
            None => return Vec::new(),
        };
        let chunk = format!("@{}", remote);
        let mut candidates = vec![remote];
        if !candidates.contains(&chunk) {
            candidates.push(chunk);
        }
        candidates
    }

    pub fn project_root(&self) -> PathBuf {
        PathBuf::from(&self.project_root)
    }

    fn project_relative(&self, local: &str) -> Option<String> {
        if self.project_root.is_empty() {
            return None;
        }
        let local = normalize_separators(local);
        let suffix = local.strip_prefix(&self.project_root)?;
        let relative = suffix.trim_start_matches('/');
        if relative.is_empty() {
            return None;
        }
        Some(relative.to_string())
    }
}

impl SourceResolver for PathResolver {
    fn resolve_local(&self, remote_source: &str) -> Option<String> {
        self.to_local(remote_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascope_config::MappingPair;

    fn resolver() -> PathResolver {
        let mapper = PathMapper::new(vec![MappingPair {
            local_prefix: "/home/dev/lib".into(),
            remote_prefix: "/var/lib".into(),
        }]);
        PathResolver::new(mapper, "/home/dev/project")
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let r = resolver();
        assert_eq!(
            r.to_remote("/home/dev/lib/util.lua"),
            Some("/var/lib/util.lua".to_string())
        );
        assert_eq!(
            r.to_local("/var/lib/util.lua"),
            Some("/home/dev/lib/util.lua".to_string())
        );
    }

    #[test]
    fn test_project_relative_fallback() {
        let r = resolver();
        assert_eq!(
            r.to_remote("/home/dev/project/game/player.script"),
            Some("game/player.script".to_string())
        );
        assert_eq!(
            r.to_local("game/player.script"),
            Some("/home/dev/project/game/player.script".to_string())
        );
    }

    #[test]
    fn test_chunk_name_prefix_is_stripped() {
        let r = resolver();
        assert_eq!(
            r.to_local("@game/player.script"),
            Some("/home/dev/project/game/player.script".to_string())
        );
        assert_eq!(
            r.to_local("@/var/lib/util.lua"),
            Some("/home/dev/lib/util.lua".to_string())
        );
    }

    #[test]
    fn test_round_trip_under_project_root() {
        let r = resolver();
        for p in [
            "/home/dev/project/main.lua",
            "/home/dev/project/deep/nest/mod.lua",
        ] {
            let remote = r.to_remote(p).unwrap();
            assert_eq!(r.to_local(&remote).as_deref(), Some(p));
        }
    }

    #[test]
    fn test_candidates_include_chunk_variant() {
        let r = resolver();
        assert_eq!(
            r.remote_candidates("/home/dev/project/main.lua"),
            vec!["main.lua".to_string(), "@main.lua".to_string()]
        );
    }

    #[test]
    fn test_unmappable_path_yields_no_candidates() {
        let r = resolver();
        assert!(r.remote_candidates("/tmp/outside.lua").is_empty());
        assert_eq!(r.to_remote("/tmp/outside.lua"), None);
    }

    #[test]
    fn test_absolute_unmapped_remote_does_not_resolve() {
        let r = resolver();
        assert_eq!(r.to_local("/var/other/x.lua"), None);
    }

    #[test]
    fn test_source_resolver_seam() {
        let r = resolver();
        let dyn_resolver: &dyn SourceResolver = &r;
        assert_eq!(
            dyn_resolver.resolve_local("@game/player.script"),
            Some("/home/dev/project/game/player.script".to_string())
        );
    }
}
