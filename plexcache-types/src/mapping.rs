use serde::{Deserialize, Serialize};

macro_rules! path_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

path_newtype!(
    PlexPath,
    "A path prefix/file as the media server reports it. Never compare directly with a `RealPath` or `CachePath`; go through `PathRouter`."
);
path_newtype!(
    RealPath,
    "A path prefix/file as the host filesystem sees it."
);
path_newtype!(
    CachePath,
    "A path prefix/file on the cache tier, as the core's own process sees it (may differ from the bulk mover's view, see `host_cache_path`)."
);

/// One configured library mapping. A set of mappings is kept sorted by
/// descending `plex_path` length so the longest matching prefix wins
/// (see `spec.md` §3, PathMapping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapping {
    pub name: String,
    pub plex_path: PlexPath,
    pub real_path: RealPath,
    #[serde(default)]
    pub cache_path: Option<CachePath>,
    /// Differs from `cache_path` only when the core runs inside a
    /// container with remapped volumes; the external bulk mover running
    /// outside the container needs this host-side view.
    #[serde(default)]
    pub host_cache_path: Option<CachePath>,
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PathMapping {
    /// Normalizes a trailing slash off every configured prefix, as
    /// required by `spec.md` §4.1 ("trailing slashes in config must be
    /// normalized on load").
    pub fn normalized(mut self) -> Self {
        self.plex_path.0 = trim_trailing_slash(&self.plex_path.0);
        self.real_path.0 = trim_trailing_slash(&self.real_path.0);
        if let Some(ref mut c) = self.cache_path {
            c.0 = trim_trailing_slash(&c.0);
        }
        if let Some(ref mut c) = self.host_cache_path {
            c.0 = trim_trailing_slash(&c.0);
        }
        self
    }
}

fn trim_trailing_slash(s: &str) -> String {
    if s.len() > 1 {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

/// Sorts mappings by descending `plex_path` length, the order
/// `PathRouter` requires for longest-prefix matching.
pub fn sort_by_descending_prefix_len(mappings: &mut [PathMapping]) {
    mappings.sort_by(|a, b| b.plex_path.0.len().cmp(&a.plex_path.0.len()));
}
