//! Translation between the three path namespaces a configured library
//! can be addressed in: the media server's own view, the host
//! filesystem's view, and the cache tier's view.

use plexcache_types::PathMapping;

/// `true` iff `path` is `prefix` itself or `prefix` followed by a `/`.
/// An empty prefix never matches (`spec.md` §4.1: "empty prefixes must
/// never match — empty `startswith` returns true in most languages").
fn matches_prefix_boundary(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    if path == prefix {
        return true;
    }
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

fn rewrite_prefix(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    format!("{to}{}", &path[from.len()..])
}

/// Holds the sorted mapping table for one run. Effectively immutable
/// once built — mappings are loaded at startup (`spec.md` §5).
pub struct PathRouter {
    mappings: Vec<PathMapping>,
}

impl PathRouter {
    /// `mappings` must already be sorted by descending `plex_path`
    /// length (see `plexcache_types::mapping::sort_by_descending_prefix_len`).
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        PathRouter { mappings }
    }

    /// `p` → `(q, mapping)`. Idempotent: a path already prefixed by a
    /// mapping's `real_path` is returned unchanged, tagged with that
    /// mapping. Otherwise rewrites the longest-matching enabled
    /// `plex_path` prefix to `real_path`. A match against a disabled
    /// mapping returns `(p, None)` silently; no match at all also
    /// returns `(p, None)`.
    pub fn plex_to_real(&self, p: &str) -> (String, Option<&PathMapping>) {
        for m in &self.mappings {
            if matches_prefix_boundary(p, m.real_path.as_str()) {
                return (p.to_string(), Some(m));
            }
        }
        for m in self.mappings.iter().filter(|m| m.enabled) {
            if matches_prefix_boundary(p, m.plex_path.as_str()) {
                return (rewrite_prefix(p, m.plex_path.as_str(), m.real_path.as_str()), Some(m));
            }
        }
        (p.to_string(), None)
    }

    /// `p` (real/host path) → cache path, or `(None, mapping)` if the
    /// matching mapping is non-cacheable.
    pub fn real_to_cache(&self, p: &str) -> (Option<String>, Option<&PathMapping>) {
        for m in self.mappings.iter().filter(|m| m.enabled) {
            if matches_prefix_boundary(p, m.real_path.as_str()) {
                if !m.cacheable {
                    return (None, Some(m));
                }
                let Some(cache_path) = &m.cache_path else {
                    return (None, Some(m));
                };
                return (Some(rewrite_prefix(p, m.real_path.as_str(), cache_path.as_str())), Some(m));
            }
        }
        (None, None)
    }

    /// Inverse of [`PathRouter::real_to_cache`]: a cache path back to
    /// its real/host equivalent.
    pub fn cache_to_real(&self, p: &str) -> (Option<String>, Option<&PathMapping>) {
        for m in self.mappings.iter().filter(|m| m.enabled) {
            let Some(cache_path) = &m.cache_path else {
                continue;
            };
            if matches_prefix_boundary(p, cache_path.as_str()) {
                return (Some(rewrite_prefix(p, cache_path.as_str(), m.real_path.as_str())), Some(m));
            }
        }
        (None, None)
    }

    /// Rewrites a cache path from the core's own (possibly
    /// containerized) view to the external bulk mover's host-side
    /// view, when the matching mapping's `host_cache_path` differs
    /// from `cache_path`.
    pub fn translate_container_to_host(&self, p: &str) -> String {
        for m in self.mappings.iter().filter(|m| m.enabled) {
            let (Some(cache_path), Some(host_cache_path)) = (&m.cache_path, &m.host_cache_path) else {
                continue;
            };
            if cache_path == host_cache_path {
                continue;
            }
            if matches_prefix_boundary(p, cache_path.as_str()) {
                return rewrite_prefix(p, cache_path.as_str(), host_cache_path.as_str());
            }
        }
        p.to_string()
    }

    /// Symmetric inverse of [`PathRouter::translate_container_to_host`].
    pub fn translate_host_to_container(&self, p: &str) -> String {
        for m in self.mappings.iter().filter(|m| m.enabled) {
            let (Some(cache_path), Some(host_cache_path)) = (&m.cache_path, &m.host_cache_path) else {
                continue;
            };
            if cache_path == host_cache_path {
                continue;
            }
            if matches_prefix_boundary(p, host_cache_path.as_str()) {
                return rewrite_prefix(p, host_cache_path.as_str(), cache_path.as_str());
            }
        }
        p.to_string()
    }

    pub fn mappings(&self) -> &[PathMapping] {
        &self.mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_types::mapping::sort_by_descending_prefix_len;

    fn mapping(name: &str, plex: &str, real: &str, cache: Option<&str>, cacheable: bool) -> PathMapping {
        PathMapping {
            name: name.to_string(),
            plex_path: plex.into(),
            real_path: real.into(),
            cache_path: cache.map(Into::into),
            host_cache_path: cache.map(Into::into),
            cacheable,
            enabled: true,
        }
    }

    fn router() -> PathRouter {
        let mut mappings = vec![
            mapping("Movies", "/data/Movies", "/mnt/user/Movies", Some("/mnt/cache/Movies"), true),
            mapping("Remote", "/data/Remote", "/mnt/remote/Remote", None, false),
        ];
        sort_by_descending_prefix_len(&mut mappings);
        PathRouter::new(mappings)
    }

    #[test]
    fn exact_prefix_match_rewrites() {
        let r = router();
        let (real, m) = r.plex_to_real("/data/Movies/Matrix (1999)/Matrix.mkv");
        assert_eq!(real, "/mnt/user/Movies/Matrix (1999)/Matrix.mkv");
        assert_eq!(m.unwrap().name, "Movies");
    }

    #[test]
    fn exact_equality_with_prefix_matches() {
        let r = router();
        let (real, m) = r.plex_to_real("/data/Movies");
        assert_eq!(real, "/mnt/user/Movies");
        assert!(m.is_some());
    }

    #[test]
    fn similarly_named_sibling_does_not_match() {
        let r = router();
        let (real, m) = r.plex_to_real("/data/Movies2/Matrix.mkv");
        assert_eq!(real, "/data/Movies2/Matrix.mkv");
        assert!(m.is_none());
    }

    #[test]
    fn already_real_path_is_idempotent() {
        let r = router();
        let (real, m) = r.plex_to_real("/mnt/user/Movies/Matrix.mkv");
        assert_eq!(real, "/mnt/user/Movies/Matrix.mkv");
        assert!(m.is_some());
    }

    #[test]
    fn non_cacheable_mapping_yields_no_cache_path() {
        let r = router();
        let (cache, m) = r.real_to_cache("/mnt/remote/Remote/show.mkv");
        assert!(cache.is_none());
        assert!(!m.unwrap().cacheable);
    }

    #[test]
    fn boundary_match_rejects_substring_prefix() {
        let mut mappings = vec![mapping(
            "Cache",
            "/data/x",
            "/mnt/cache",
            Some("/mnt/cache"),
            true,
        )];
        sort_by_descending_prefix_len(&mut mappings);
        let r = PathRouter::new(mappings);
        let (cache, m) = r.real_to_cache("/mnt/cache_downloads/file.mkv");
        assert!(cache.is_none());
        assert!(m.is_none());
    }

    #[test]
    fn empty_prefix_never_matches() {
        let mapping = PathMapping {
            name: "bad".to_string(),
            plex_path: "".into(),
            real_path: "".into(),
            cache_path: None,
            host_cache_path: None,
            cacheable: false,
            enabled: true,
        };
        let r = PathRouter::new(vec![mapping]);
        let (real, m) = r.plex_to_real("/anything");
        assert_eq!(real, "/anything");
        assert!(m.is_none());
    }
}
