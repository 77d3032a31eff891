use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `wpimport db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".wpimport";
pub const DB_FILENAME: &str = "wpimport.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})\npolicy={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            MIGRATIONS_POLICY_MESSAGE
        )
    }

    /// Relative input paths are taken from the project root.
    pub fn input_path(&self, path: &Path) -> PathBuf {
        absolutize(path, &self.project_root)
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let state_dir_exists = paths.state_dir.exists();
    let data_dir_exists = paths.data_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `wpimport init` to create it"
        ));
    }
    if !db_exists {
        warnings.push(format!(
            "{} does not exist yet; {MIGRATIONS_POLICY_MESSAGE}",
            normalize_for_display(&paths.db_path)
        ));
    }

    Ok(RuntimeStatus {
        state_dir_exists,
        data_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("WPIMPORT_DATA_DIR") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("data"), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("WPIMPORT_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.data_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    "# wpimport configuration (materialized by `wpimport init`)\n# Run `wpimport db migrate` to apply pending schema migrations.\n\n[source]\n# dump_path = \"wp-backup/database.sql\"\ntable_prefix = \"wp_\"\n\n[import]\n# default_author = \"admin@example.com\"\npublished_only = false\nexcerpt_chars = 160\n\n[categories]\n# default = \"berita\"\n\n[categories.mapping]\n# nasional = \"berita\"\n\n[media]\n# rewrite_from = \"http://old.example.com\"\n# rewrite_to = \"https://example.com\"\n".to_string()
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("WPIMPORT_PROJECT_ROOT") {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }

    match detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref()) {
        Some(root) => Ok((root, ValueSource::Heuristic)),
        None => Ok((context.cwd.clone(), ValueSource::Default)),
    }
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    let candidates = cwd
        .ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors));
    for candidate in candidates {
        if !seen.insert(candidate.to_path_buf()) {
            continue;
        }
        if candidate.join(STATE_DIR_NAME).is_dir() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, init_layout, inspect_runtime,
        resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            executable_dir: None,
        };

        let env = HashMap::from([(
            "WPIMPORT_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(
            resolved.db_path,
            from_flag.join(".wpimport").join("data").join("wpimport.db")
        );
    }

    #[test]
    fn resolve_paths_reads_env_for_data_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let env = HashMap::from([
            ("WPIMPORT_DATA_DIR".to_string(), "var/db".to_string()),
            ("WPIMPORT_CONFIG".to_string(), "import.toml".to_string()),
        ]);

        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
                env.get(key).cloned()
            })
            .expect("resolve paths");
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(resolved.data_dir, root.join("var/db"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.config_path, root.join("import.toml"));
        assert_eq!(resolved.config_source, ValueSource::Env);
    }

    #[test]
    fn resolve_paths_finds_state_dir_in_ancestors() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("wp-backup").join("uploads");
        fs::create_dir_all(root.join(".wpimport")).expect("create state dir");
        fs::create_dir_all(&nested).expect("create nested");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert_eq!(report.created_dirs.len(), 2);
        assert!(report.wrote_config);
        assert!(paths.state_dir.exists());
        assert!(paths.data_dir.exists());

        let config = load_config(&paths.config_path).expect("materialized config parses");
        assert_eq!(config.source.table_prefix.as_deref(), Some("wp_"));

        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(again.created_dirs.is_empty());
        assert!(!again.wrote_config);
    }

    #[test]
    fn inspect_runtime_warns_before_init() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.state_dir_exists);
        assert!(!status.db_exists);
        assert_eq!(status.warnings.len(), 2);
    }
}
