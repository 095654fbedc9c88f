//! Resolution of the named working directories handed to stages.

use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The standard named directories, in the order they are resolved.
pub const NAMED_DIRECTORIES: [&str; 5] = ["work", "input", "output", "update", "scratch"];

/// Location key carrying the database URL.
pub const DB_URL_KEY: &str = "dbUrl";

/// Turns the policy's `dir` section into a location map.
pub trait DirectoryResolver: Send + Sync {
    /// Resolves the location map for one run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the `dir` document is unusable.
    fn resolve(
        &self,
        dir_policy: &serde_json::Value,
        short_name: &str,
        run_id: &str,
    ) -> ConfigResult<HashMap<String, String>>;
}

fn default_root() -> String {
    ".".to_string()
}

fn default_run_dir_pattern() -> String {
    "%(runid)s".to_string()
}

/// Shape of the `dir` section understood by [`PolicyDirectories`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirPolicy {
    #[serde(default = "default_root")]
    default_root: String,
    #[serde(default = "default_run_dir_pattern")]
    run_dir_pattern: String,
    #[serde(flatten)]
    named: HashMap<String, serde_json::Value>,
}

/// Resolver for the conventional layout: a default root, a per-run
/// subdirectory pattern, and optional per-role overrides.
///
/// Patterns may reference `%(runid)s` and `%(shortname)s`. Relative paths are
/// anchored at the run directory; a role with no entry falls back to the
/// `update` entry, and to the run directory itself if that is absent too.
#[derive(Debug, Clone, Default)]
pub struct PolicyDirectories {
    cwd: Option<PathBuf>,
}

impl PolicyDirectories {
    /// Creates a resolver anchored at the process working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchors relative roots at `cwd` instead of the process working directory.
    #[must_use]
    pub fn with_working_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn working_dir(&self) -> ConfigResult<PathBuf> {
        match &self.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => std::env::current_dir().map_err(|e| {
                ConfigError::invalid(format!("cannot determine working directory: {e}"))
            }),
        }
    }
}

fn expand(pattern: &str, short_name: &str, run_id: &str) -> String {
    pattern
        .replace("%(runid)s", run_id)
        .replace("%(shortname)s", short_name)
}

/// Strips the root so an absolute run pattern still lands under the default root.
fn relative_part(path: &str) -> &Path {
    let path = Path::new(path);
    path.strip_prefix("/").unwrap_or(path)
}

impl DirectoryResolver for PolicyDirectories {
    fn resolve(
        &self,
        dir_policy: &serde_json::Value,
        short_name: &str,
        run_id: &str,
    ) -> ConfigResult<HashMap<String, String>> {
        let policy: DirPolicy = serde_json::from_value(dir_policy.clone())
            .map_err(|e| ConfigError::invalid(format!("malformed dir policy: {e}")))?;

        let root = Path::new(&policy.default_root);
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else if policy.default_root == "." {
            self.working_dir()?
        } else {
            self.working_dir()?.join(root)
        };
        let run_dir = root.join(relative_part(&expand(
            &policy.run_dir_pattern,
            short_name,
            run_id,
        )));

        let named = |role: &str| -> Option<String> {
            policy
                .named
                .get(role)
                .and_then(serde_json::Value::as_str)
                .map(|p| expand(p, short_name, run_id))
        };

        let mut locations = HashMap::with_capacity(NAMED_DIRECTORIES.len());
        for role in NAMED_DIRECTORIES {
            let path = match named(role).or_else(|| named("update")) {
                Some(p) if Path::new(&p).is_absolute() => PathBuf::from(p),
                Some(p) => run_dir.join(p),
                None => run_dir.clone(),
            };
            locations.insert(role.to_string(), path.to_string_lossy().into_owned());
        }
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolve(policy: serde_json::Value) -> HashMap<String, String> {
        PolicyDirectories::new()
            .with_working_dir("/home/pipe")
            .resolve(&policy, "imgPipe", "rlp0220")
            .unwrap()
    }

    #[test]
    fn test_defaults_use_run_dir() {
        let dirs = resolve(json!({}));
        assert_eq!(dirs.len(), 5);
        assert_eq!(dirs["work"], "/home/pipe/rlp0220");
    }

    #[test]
    fn test_named_roles_and_update_fallback() {
        let dirs = resolve(json!({
            "defaultRoot": "/data",
            "runDirPattern": "/runs/%(shortname)s/%(runid)s",
            "work": "work",
            "output": "/archive/%(runid)s",
            "update": "upd",
        }));

        assert_eq!(dirs["work"], "/data/runs/imgPipe/rlp0220/work");
        assert_eq!(dirs["output"], "/archive/rlp0220");
        assert_eq!(dirs["update"], "/data/runs/imgPipe/rlp0220/upd");
        assert_eq!(dirs["input"], "/data/runs/imgPipe/rlp0220/upd");
        assert_eq!(dirs["scratch"], "/data/runs/imgPipe/rlp0220/upd");
    }

    #[test]
    fn test_malformed_policy_rejected() {
        let err = PolicyDirectories::new()
            .resolve(&json!({"defaultRoot": 7}), "p", "r")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
