// Suite Loader
// Discovers and parses `*.flow.yml` suite documents

use crate::error::LoadError;
use crate::model::Suite;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File suffixes recognized as suite documents
pub const SUITE_SUFFIXES: [&str; 2] = [".flow.yml", ".flow.yaml"];

/// Suite document loader
pub struct SuiteLoader;

impl SuiteLoader {
    /// Parse a suite from YAML; `path` names the document in errors and
    /// supplies the node id when the document has none
    pub fn parse(content: &str, path: &Path) -> Result<Suite, LoadError> {
        let mut suite: Suite = serde_yaml::from_str(content).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        if suite.suite_name.trim().is_empty() {
            return Err(LoadError::invalid(path, "missing 'suite_name'"));
        }
        if suite.node_id.trim().is_empty() {
            suite.node_id = Self::node_id_from_path(path)
                .ok_or_else(|| LoadError::invalid(path, "cannot derive a node id from the file name"))?;
        }
        if let Some(index) = suite.steps.iter().position(|s| s.name.trim().is_empty()) {
            return Err(LoadError::invalid(
                path,
                format!("step {} has no name", index + 1),
            ));
        }

        suite.source_path = Some(path.to_path_buf());
        Ok(suite)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Suite, LoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// `auth.flow.yml` becomes `auth`
    pub fn node_id_from_path(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let stem = SUITE_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .or_else(|| path.file_stem().and_then(|s| s.to_str()))?;
        (!stem.is_empty()).then(|| stem.to_string())
    }

    pub fn is_suite_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| SUITE_SUFFIXES.iter().any(|s| name.ends_with(s)))
    }

    /// Recursively find suite documents under `dir`, sorted by path
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let mut found = Vec::new();
        Self::walk(dir, &mut found)?;
        found.sort();
        debug!(dir = %dir.display(), count = found.len(), "discovered suites");
        Ok(found)
    }

    fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), LoadError> {
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let path = entry
                .map_err(|source| LoadError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.is_dir() {
                Self::walk(&path, found)?;
            } else if Self::is_suite_file(&path) {
                found.push(path);
            }
        }
        Ok(())
    }

    /// Load every path; failures are collected per file
    ///
    /// Loaded suites are ordered by priority, keeping the given order within
    /// a priority.
    pub fn load_all(paths: &[PathBuf]) -> (Vec<Suite>, Vec<LoadError>) {
        let mut suites = Vec::with_capacity(paths.len());
        let mut errors = Vec::new();

        for path in paths {
            match Self::parse_file(path) {
                Ok(suite) => suites.push(suite),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to load suite");
                    errors.push(err);
                }
            }
        }

        suites.sort_by_key(|s| s.priority);
        (suites, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DelaySpec, Priority};
    use serde_json::json;
    use tempfile::TempDir;

    const AUTH: &str = r#"
suite_name: Authenticate
base_url: https://api.example.com
priority: critical
required: true
exports: [token]
variables:
  user: "{{$faker.internet.email}}"
steps:
  - name: login
    request:
      method: POST
      url: /login
      body:
        user: "{{user}}"
    capture:
      token: body.token
    assert:
      status_code: 200
    delay: { min: 10, max: 20 }
"#;

    #[test]
    fn test_parse_suite() {
        let suite = SuiteLoader::parse(AUTH, Path::new("suites/auth.flow.yml")).unwrap();
        assert_eq!(suite.node_id, "auth");
        assert_eq!(suite.suite_name, "Authenticate");
        assert_eq!(suite.priority, Priority::Critical);
        assert!(suite.required);
        assert_eq!(suite.exports, vec!["token"]);
        assert_eq!(suite.steps[0].capture["token"], json!("body.token"));
        assert_eq!(suite.steps[0].delay, Some(DelaySpec::Range { min: 10, max: 20 }));
        assert_eq!(
            suite.source_path.as_deref(),
            Some(Path::new("suites/auth.flow.yml"))
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = SuiteLoader::parse("steps: []", Path::new("a.flow.yml")).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { .. }));
        assert!(err.to_string().contains("suite_name"));

        let err = SuiteLoader::parse("suite_name: [", Path::new("b.flow.yml")).unwrap_err();
        assert!(matches!(err, LoadError::Yaml { .. }));
        assert_eq!(err.path(), &PathBuf::from("b.flow.yml"));
    }

    #[test]
    fn test_explicit_node_id_wins() {
        let suite =
            SuiteLoader::parse("node_id: login\nsuite_name: L\n", Path::new("x.flow.yaml")).unwrap();
        assert_eq!(suite.node_id, "login");
        assert_eq!(
            SuiteLoader::node_id_from_path(Path::new("dir/users.flow.yaml")).as_deref(),
            Some("users")
        );
    }

    #[test]
    fn test_discover_and_load_all() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();

        fs::write(dir.path().join("z.flow.yml"), "suite_name: Z\n").unwrap();
        fs::write(nested.join("auth.flow.yaml"), AUTH).unwrap();
        fs::write(dir.path().join("broken.flow.yml"), "steps: [").unwrap();
        fs::write(dir.path().join("notes.yml"), "suite_name: ignored\n").unwrap();

        let paths = SuiteLoader::discover(dir.path()).unwrap();
        assert_eq!(paths.len(), 3);

        let (suites, errors) = SuiteLoader::load_all(&paths);
        assert_eq!(errors.len(), 1);
        let ids: Vec<&str> = suites.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["auth", "z"]);
    }
}
