use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogOptions, MediaRewrite};
use crate::content::DEFAULT_EXCERPT_CHARS;
use crate::wordpress::{DEFAULT_TABLE_PREFIX, TablePrefix};

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WpImportConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub categories: CategoriesSection,
    #[serde(default)]
    pub media: MediaSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub dump_path: Option<String>,
    pub table_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ImportSection {
    /// Email of the destination user that owns posts whose WordPress author
    /// is unknown.
    pub default_author: Option<String>,
    #[serde(default)]
    pub published_only: bool,
    pub excerpt_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CategoriesSection {
    pub default: Option<String>,
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MediaSection {
    pub rewrite_from: Option<String>,
    pub rewrite_to: Option<String>,
}

/// Config values after applying `WPIMPORT_*` environment overrides.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub dump_path: Option<PathBuf>,
    pub table_prefix: TablePrefix,
    pub default_author: Option<String>,
    pub catalog: CatalogOptions,
}

impl WpImportConfig {
    pub fn settings(&self) -> ImportSettings {
        self.settings_with_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn settings_with_lookup<F>(&self, lookup_env: F) -> ImportSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let dump_path = non_empty("WPIMPORT_DUMP_PATH")
            .or_else(|| self.source.dump_path.clone())
            .map(PathBuf::from);
        let table_prefix = non_empty("WPIMPORT_TABLE_PREFIX")
            .or_else(|| self.source.table_prefix.clone())
            .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_string());
        let default_author =
            non_empty("WPIMPORT_DEFAULT_AUTHOR").or_else(|| self.import.default_author.clone());

        ImportSettings {
            dump_path,
            table_prefix: TablePrefix::new(table_prefix),
            default_author,
            catalog: self.catalog_options(),
        }
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        let media_rewrite = match (&self.media.rewrite_from, &self.media.rewrite_to) {
            (Some(from), Some(to)) if !from.is_empty() => Some(MediaRewrite {
                from: from.clone(),
                to: to.clone(),
            }),
            _ => None,
        };
        CatalogOptions {
            category_mapping: self.categories.mapping.clone(),
            default_category: self.categories.default.clone(),
            media_rewrite,
            published_only: self.import.published_only,
            excerpt_chars: self.import.excerpt_chars.unwrap_or(DEFAULT_EXCERPT_CHARS),
        }
    }
}

/// Load and parse a WpImportConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WpImportConfig> {
    if !config_path.exists() {
        return Ok(WpImportConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WpImportConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_stock_prefix() {
        let settings = WpImportConfig::default().settings_with_lookup(|_| None);
        assert!(settings.dump_path.is_none());
        assert_eq!(settings.table_prefix.as_str(), "wp_");
        assert!(settings.default_author.is_none());
        assert_eq!(settings.catalog.excerpt_chars, 160);
        assert!(settings.catalog.media_rewrite.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, WpImportConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[source]
dump_path = "wp-backup/database.sql"
table_prefix = "SERVMASK_PREFIX_"

[import]
default_author = "admin@example.com"
published_only = true
excerpt_chars = 200

[categories]
default = "berita-depok"

[categories.mapping]
nasional = "berita-depok"
edukasi = "pendidikan"

[media]
rewrite_from = "http://demo.example.com/blog"
rewrite_to = "https://example.com"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let settings = config.settings_with_lookup(|_| None);
        assert_eq!(
            settings.dump_path.as_deref(),
            Some(Path::new("wp-backup/database.sql"))
        );
        assert_eq!(settings.table_prefix.table("posts"), "SERVMASK_PREFIX_posts");
        assert_eq!(settings.default_author.as_deref(), Some("admin@example.com"));
        assert!(settings.catalog.published_only);
        assert_eq!(settings.catalog.excerpt_chars, 200);
        assert_eq!(
            settings.catalog.default_category.as_deref(),
            Some("berita-depok")
        );
        assert_eq!(
            settings.catalog.category_mapping.get("edukasi").map(String::as_str),
            Some("pendidikan")
        );
        assert_eq!(
            settings.catalog.media_rewrite,
            Some(MediaRewrite {
                from: "http://demo.example.com/blog".to_string(),
                to: "https://example.com".to_string(),
            })
        );
    }

    #[test]
    fn env_overrides_config_values() {
        let config = WpImportConfig {
            source: SourceSection {
                dump_path: Some("from-config.sql".to_string()),
                table_prefix: Some("wp_".to_string()),
            },
            ..WpImportConfig::default()
        };
        let env = HashMap::from([
            ("WPIMPORT_DUMP_PATH".to_string(), "from-env.sql".to_string()),
            ("WPIMPORT_TABLE_PREFIX".to_string(), " wps9_ ".to_string()),
            ("WPIMPORT_DEFAULT_AUTHOR".to_string(), String::new()),
        ]);
        let settings = config.settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.dump_path.as_deref(), Some(Path::new("from-env.sql")));
        assert_eq!(settings.table_prefix.as_str(), "wps9_");
        assert!(settings.default_author.is_none());
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[media]\nrewrite_to = \"https://cdn\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.catalog_options().media_rewrite.is_none());
        assert!(config.categories.mapping.is_empty());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[source\ndump_path = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
