use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::{Catalog, MissingAttachment, featured_images};
use crate::config::ImportSettings;
use crate::dump::{TableExtraction, decode_dump};
use crate::migrate::open_migrated;
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::store::{self, BackfillOutcome, ImportRunRecord};
use crate::wordpress::{SkippedRow, TablePrefix, WordPressDump};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dump_path: Option<PathBuf>,
    pub table_prefix: Option<String>,
    pub dry_run: bool,
    pub published_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportIssue {
    pub table: Option<String>,
    pub row: Option<usize>,
    pub subject: Option<String>,
    pub message: String,
}

impl ImportIssue {
    fn for_subject(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: None,
            row: None,
            subject: Some(subject.into()),
            message: message.into(),
        }
    }
}

impl From<SkippedRow> for ImportIssue {
    fn from(skipped: SkippedRow) -> Self {
        Self {
            table: Some(skipped.table),
            row: Some(skipped.row),
            subject: None,
            message: skipped.reason,
        }
    }
}

impl From<MissingAttachment> for ImportIssue {
    fn from(missing: MissingAttachment) -> Self {
        Self::for_subject(
            missing.post_slug,
            format!(
                "featured image attachment {} not found in dump",
                missing.attachment_id
            ),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub dump_path: String,
    pub dump_sha256: String,
    pub table_prefix: String,
    pub dry_run: bool,
    pub tables: Vec<TableExtraction>,
    pub users_created: usize,
    pub users_matched: usize,
    pub categories_created: usize,
    pub categories_matched: usize,
    pub tags_created: usize,
    pub tags_matched: usize,
    pub posts_imported: Vec<String>,
    pub posts_skipped: Vec<String>,
    pub posts_with_images: usize,
    pub category_links: usize,
    pub tag_links: usize,
    pub run_id: Option<i64>,
    pub errors: Vec<ImportIssue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeaturedImageReport {
    pub dump_path: String,
    pub table_prefix: String,
    pub updated: Vec<String>,
    pub already_set: usize,
    pub post_not_found: usize,
    pub errors: Vec<ImportIssue>,
}

struct LoadedDump {
    path: String,
    sha256: String,
    prefix: TablePrefix,
    parsed: WordPressDump,
}

/// Import a WordPress dump into the destination store.
///
/// Setup problems (no dump, unmigrated database, unknown default author, a
/// dump with no rows for the prefix) fail before anything is written. Row
/// problems are collected in `errors` and the run continues. All writes share
/// one transaction; a dry run rolls it back.
pub fn run_import(
    paths: &ResolvedPaths,
    settings: &ImportSettings,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let dump_path = resolve_dump_path(paths, settings, options.dump_path.as_deref())?;
    let mut connection = open_migrated(paths)?;
    let loaded = load_dump(&dump_path, settings, options.table_prefix.as_deref())?;

    let mut catalog_options = settings.catalog.clone();
    catalog_options.published_only |= options.published_only;
    let catalog = Catalog::build(&loaded.parsed, &catalog_options);
    log::info!(
        "catalog: {} articles, {} categories, {} tags, {} authors",
        catalog.articles.len(),
        catalog.categories.len(),
        catalog.tags.len(),
        catalog.authors.len()
    );

    let mut report = ImportReport {
        dump_path: loaded.path.clone(),
        dump_sha256: loaded.sha256.clone(),
        table_prefix: loaded.prefix.as_str().to_string(),
        dry_run: options.dry_run,
        tables: loaded.parsed.tables.clone(),
        errors: loaded
            .parsed
            .skipped
            .iter()
            .cloned()
            .map(ImportIssue::from)
            .collect(),
        ..ImportReport::default()
    };
    report.errors.extend(
        catalog
            .missing_attachments
            .iter()
            .cloned()
            .map(ImportIssue::from),
    );

    let transaction = connection
        .transaction()
        .context("failed to start import transaction")?;
    write_catalog(&transaction, &catalog, settings, &mut report)?;

    if options.dry_run {
        transaction
            .rollback()
            .context("failed to roll back dry run")?;
        log::info!("dry run: rolled back all changes");
    } else {
        let run_id = store::record_import_run(
            &transaction,
            &ImportRunRecord {
                dump_path: report.dump_path.clone(),
                dump_sha256: report.dump_sha256.clone(),
                table_prefix: report.table_prefix.clone(),
                users_upserted: report.users_created + report.users_matched,
                categories_upserted: report.categories_created + report.categories_matched,
                tags_upserted: report.tags_created + report.tags_matched,
                posts_imported: report.posts_imported.len(),
                posts_skipped: report.posts_skipped.len(),
                issues: report.errors.len(),
            },
        )?;
        transaction
            .commit()
            .context("failed to commit import transaction")?;
        report.run_id = Some(run_id);
    }

    Ok(report)
}

fn write_catalog(
    connection: &Connection,
    catalog: &Catalog,
    settings: &ImportSettings,
    report: &mut ImportReport,
) -> Result<()> {
    let mut users = HashMap::new();
    for author in &catalog.authors {
        let upserted = store::upsert_user(connection, author)?;
        if upserted.created {
            report.users_created += 1;
        } else {
            report.users_matched += 1;
        }
        users.insert(author.wp_id, upserted.id);
        for alias in &author.aliases {
            report.users_matched += 1;
            users.insert(*alias, upserted.id);
        }
    }
    let default_author = resolve_default_author(connection, settings)?;

    let mut categories = HashMap::new();
    for category in &catalog.categories {
        let upserted = store::upsert_category(connection, category)?;
        if upserted.created {
            report.categories_created += 1;
        } else {
            report.categories_matched += 1;
        }
        categories.insert(category.slug.as_str(), upserted.id);
    }

    let mut tags = HashMap::new();
    for tag in &catalog.tags {
        let upserted = store::upsert_tag(connection, tag)?;
        if upserted.created {
            report.tags_created += 1;
        } else {
            report.tags_matched += 1;
        }
        tags.insert(tag.slug.as_str(), upserted.id);
    }

    for article in &catalog.articles {
        if store::post_exists(connection, &article.slug)? {
            log::debug!("skipping existing post {}", article.slug);
            report.posts_skipped.push(article.slug.clone());
            continue;
        }

        let Some(author_id) = users.get(&article.author_wp_id).copied().or(default_author) else {
            push_issue(
                report,
                ImportIssue::for_subject(
                    &article.slug,
                    format!(
                        "author {} is not in the dump and no default author is configured",
                        article.author_wp_id
                    ),
                ),
            );
            continue;
        };

        let post_id = match store::insert_post(connection, article, author_id) {
            Ok(id) => id,
            Err(err) => {
                push_issue(
                    report,
                    ImportIssue::for_subject(&article.slug, format!("{err:#}")),
                );
                continue;
            }
        };
        report.posts_imported.push(article.slug.clone());
        if article.featured_image.is_some() {
            report.posts_with_images += 1;
        }

        for slug in &article.category_slugs {
            match categories.get(slug.as_str()) {
                Some(category_id) => {
                    if store::link_post_category(connection, post_id, *category_id)? {
                        report.category_links += 1;
                    }
                }
                None => push_issue(
                    report,
                    ImportIssue::for_subject(&article.slug, format!("unknown category `{slug}`")),
                ),
            }
        }
        for slug in &article.tag_slugs {
            match tags.get(slug.as_str()) {
                Some(tag_id) => {
                    if store::link_post_tag(connection, post_id, *tag_id)? {
                        report.tag_links += 1;
                    }
                }
                None => push_issue(
                    report,
                    ImportIssue::for_subject(&article.slug, format!("unknown tag `{slug}`")),
                ),
            }
        }
    }
    Ok(())
}

fn resolve_default_author(connection: &Connection, settings: &ImportSettings) -> Result<Option<i64>> {
    match settings.default_author.as_deref() {
        Some(email) => match store::user_id_by_email(connection, email)? {
            Some(id) => Ok(Some(id)),
            None => bail!(
                "default author {email} is neither in the dump nor in the database"
            ),
        },
        None => store::first_admin_id(connection),
    }
}

/// Fill `featured_image` on already imported posts from the dump's
/// `_thumbnail_id` metadata. Posts that already have an image are left alone.
pub fn backfill_featured_images(
    paths: &ResolvedPaths,
    settings: &ImportSettings,
    options: &ImportOptions,
) -> Result<FeaturedImageReport> {
    let dump_path = resolve_dump_path(paths, settings, options.dump_path.as_deref())?;
    let mut connection = open_migrated(paths)?;
    let loaded = load_dump(&dump_path, settings, options.table_prefix.as_deref())?;
    let (found, missing) = featured_images(
        &loaded.parsed,
        settings.catalog.media_rewrite.as_ref(),
    );

    let mut report = FeaturedImageReport {
        dump_path: loaded.path,
        table_prefix: loaded.prefix.as_str().to_string(),
        errors: missing.into_iter().map(ImportIssue::from).collect(),
        ..FeaturedImageReport::default()
    };
    for issue in &report.errors {
        log::warn!(
            "{}: {}",
            issue.subject.as_deref().unwrap_or("-"),
            issue.message
        );
    }

    let transaction = connection
        .transaction()
        .context("failed to start featured image transaction")?;
    for image in &found {
        match store::backfill_featured_image(&transaction, &image.post_slug, &image.url)? {
            BackfillOutcome::Updated => report.updated.push(image.post_slug.clone()),
            BackfillOutcome::AlreadySet => report.already_set += 1,
            BackfillOutcome::PostNotFound => report.post_not_found += 1,
        }
    }
    if options.dry_run {
        transaction
            .rollback()
            .context("failed to roll back dry run")?;
    } else {
        transaction
            .commit()
            .context("failed to commit featured images")?;
    }
    Ok(report)
}

fn push_issue(report: &mut ImportReport, issue: ImportIssue) {
    log::warn!(
        "{}: {}",
        issue.subject.as_deref().unwrap_or("-"),
        issue.message
    );
    report.errors.push(issue);
}

fn resolve_dump_path(
    paths: &ResolvedPaths,
    settings: &ImportSettings,
    explicit: Option<&Path>,
) -> Result<PathBuf> {
    let Some(path) = explicit.or(settings.dump_path.as_deref()) else {
        bail!(
            "no dump file given\nPass a path, set [source] dump_path in {}, or export WPIMPORT_DUMP_PATH",
            normalize_for_display(&paths.config_path)
        );
    };
    let path = paths.input_path(path);
    if !path.is_file() {
        bail!("dump file not found: {}", normalize_for_display(&path));
    }
    Ok(path)
}

fn load_dump(path: &Path, settings: &ImportSettings, prefix: Option<&str>) -> Result<LoadedDump> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let sha256 = compute_sha256(&bytes);
    let text = decode_dump(bytes, path);
    log::info!(
        "read {} ({:.2} MB)",
        path.display(),
        text.len() as f64 / 1024.0 / 1024.0
    );

    let prefix = prefix
        .map(TablePrefix::new)
        .unwrap_or_else(|| settings.table_prefix.clone());
    let parsed = WordPressDump::parse(&text, &prefix);
    if parsed.is_empty() {
        bail!(
            "no INSERT statements for `{}*` tables found in {}\nCheck the table prefix (--prefix or WPIMPORT_TABLE_PREFIX)",
            prefix.as_str(),
            normalize_for_display(path)
        );
    }

    Ok(LoadedDump {
        path: normalize_for_display(path),
        sha256,
        prefix,
        parsed,
    })
}

fn compute_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rusqlite::params;

    use super::*;
    use crate::config::WpImportConfig;
    use crate::migrate::{open_migrated, run_migrations, tests::test_paths};

    const DUMP: &str = r#"-- MySQL dump
DROP TABLE IF EXISTS `wp_posts`;
INSERT INTO `wp_users` VALUES (1,'admin','hash','admin','admin@example.com','','2020-01-01 00:00:00','',0,'Site Admin');
INSERT INTO `wp_terms` VALUES (1,'Nasional','nasional',0),(2,'Pilkada','pilkada',0);
INSERT INTO `wp_term_taxonomy` VALUES (11,1,'category','',0,1),(12,2,'post_tag','',0,1);
INSERT INTO `wp_term_relationships` VALUES (10,11,0),(10,12,0),(30,11,0);
INSERT INTO `wp_postmeta` VALUES (1,10,'_thumbnail_id','20'),(2,30,'_thumbnail_id','20');
INSERT INTO `wp_posts` VALUES (10,1,'2024-03-01 09:00:00','2024-03-01 02:00:00','<p>Isi berita</p>','Berita Utama','','publish','open','open','','berita-utama','','','2024-03-02 10:00:00','2024-03-02 03:00:00','',0,'https://example.com/?p=10',0,'post','',0),(20,1,'2024-03-01 08:00:00','2024-03-01 01:00:00','','foto','','inherit','open','closed','','foto','','','2024-03-01 08:00:00','2024-03-01 01:00:00','',10,'https://example.com/wp-content/uploads/foto.jpg',0,'attachment','image/jpeg',0);
INSERT INTO `wp_posts` VALUES (30,9,'2024-03-03 09:00:00','2024-03-03 02:00:00','Plain body','Penulis Hilang','','publish','open','open','','penulis-hilang','','','2024-03-03 09:00:00','2024-03-03 02:00:00','',0,'https://example.com/?p=30',0,'post','',0),(abc,1,'x');
"#;

    fn setup(dump: &str) -> (tempfile::TempDir, ResolvedPaths, PathBuf) {
        let (temp, paths) = test_paths();
        run_migrations(&paths).expect("migrate");
        let dump_path = paths.project_root.join("database.sql");
        fs::write(&dump_path, dump).expect("write dump");
        (temp, paths, dump_path)
    }

    fn options(dump_path: &Path) -> ImportOptions {
        ImportOptions {
            dump_path: Some(dump_path.to_path_buf()),
            ..ImportOptions::default()
        }
    }

    fn settings() -> ImportSettings {
        WpImportConfig::default().settings_with_lookup(|_| None)
    }

    #[test]
    fn imports_posts_with_relations_and_reports_issues() {
        let (_temp, paths, dump_path) = setup(DUMP);
        let report = run_import(&paths, &settings(), &options(&dump_path)).expect("import");

        assert_eq!(report.posts_imported, vec!["berita-utama"]);
        assert_eq!(report.users_created, 1);
        assert_eq!(report.categories_created, 1);
        assert_eq!(report.tags_created, 1);
        assert_eq!(report.category_links, 1);
        assert_eq!(report.tag_links, 1);
        assert_eq!(report.posts_with_images, 1);
        assert_eq!(report.dump_sha256.len(), 64);
        assert!(report.run_id.is_some());

        // one unparseable post row, one post whose author is unknown
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|issue| {
            issue.table.as_deref() == Some("wp_posts") && issue.row == Some(4)
        }));
        assert!(report.errors.iter().any(|issue| {
            issue.subject.as_deref() == Some("penulis-hilang")
        }));

        let connection = open_migrated(&paths).expect("open");
        let (content, image, status): (String, Option<String>, String) = connection
            .query_row(
                "SELECT content, featured_image, status FROM posts WHERE slug = ?1",
                params!["berita-utama"],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("imported post");
        assert_eq!(content, "<p>Isi berita</p>");
        assert_eq!(image.as_deref(), Some("https://example.com/wp-content/uploads/foto.jpg"));
        assert_eq!(status, "PUBLISHED");
    }

    #[test]
    fn default_author_takes_orphaned_posts_and_reruns_skip() {
        let (_temp, paths, dump_path) = setup(DUMP);
        let mut settings = settings();
        settings.default_author = Some("admin@example.com".to_string());

        let first = run_import(&paths, &settings, &options(&dump_path)).expect("first import");
        assert_eq!(first.posts_imported, vec!["berita-utama", "penulis-hilang"]);
        assert_eq!(first.category_links, 2);

        let second = run_import(&paths, &settings, &options(&dump_path)).expect("second import");
        assert!(second.posts_imported.is_empty());
        assert_eq!(second.posts_skipped, vec!["berita-utama", "penulis-hilang"]);
        assert_eq!(second.users_matched, 1);
        assert_eq!(second.categories_matched, 1);

        let connection = open_migrated(&paths).expect("open");
        let stats = store::stats(&connection).expect("stats");
        assert_eq!(stats.posts, 2);
        assert_eq!(stats.import_runs, 2);
    }

    #[test]
    fn users_sharing_an_email_keep_their_posts() {
        let dump = r#"
INSERT INTO `wp_users` VALUES (1,'same','hash','same','same@example.com','','2020-01-01 00:00:00','',0,'Same'),(2,'writer','hash','writer','SAME@example.com','','2020-01-01 00:00:00','',0,'Writer');
INSERT INTO `wp_posts` VALUES (10,2,'2024-03-01 09:00:00','2024-03-01 02:00:00','Body','By Writer','','publish','open','open','','by-writer','','','2024-03-01 09:00:00','2024-03-01 02:00:00','',0,'https://example.com/?p=10',0,'post','',0);
"#;
        let (_temp, paths, dump_path) = setup(dump);
        let report = run_import(&paths, &settings(), &options(&dump_path)).expect("import");

        assert_eq!(report.posts_imported, vec!["by-writer"]);
        assert_eq!(report.users_created, 1);
        assert_eq!(report.users_matched, 1);
        assert!(report.errors.is_empty());

        let connection = open_migrated(&paths).expect("open");
        let email: String = connection
            .query_row(
                "SELECT users.email FROM posts JOIN users ON users.id = posts.author_id WHERE posts.slug = ?1",
                params!["by-writer"],
                |row| row.get(0),
            )
            .expect("post author");
        assert_eq!(email, "same@example.com");
    }

    #[test]
    fn dry_run_leaves_database_untouched() {
        let (_temp, paths, dump_path) = setup(DUMP);
        let report = run_import(
            &paths,
            &settings(),
            &ImportOptions {
                dry_run: true,
                ..options(&dump_path)
            },
        )
        .expect("dry run");
        assert_eq!(report.posts_imported.len(), 1);
        assert!(report.run_id.is_none());

        let connection = open_migrated(&paths).expect("open");
        let stats = store::stats(&connection).expect("stats");
        assert_eq!(stats.posts, 0);
        assert_eq!(stats.users, 0);
        assert_eq!(stats.import_runs, 0);
    }

    #[test]
    fn setup_errors_fail_before_writing() {
        let (_temp, paths, dump_path) = setup(DUMP);

        let missing = run_import(
            &paths,
            &settings(),
            &options(&paths.project_root.join("nope.sql")),
        )
        .expect_err("missing dump");
        assert!(missing.to_string().contains("dump file not found"));

        let no_path = run_import(&paths, &settings(), &ImportOptions::default())
            .expect_err("no dump path");
        assert!(no_path.to_string().contains("no dump file given"));

        let wrong_prefix = run_import(
            &paths,
            &settings(),
            &ImportOptions {
                table_prefix: Some("wps9_".to_string()),
                ..options(&dump_path)
            },
        )
        .expect_err("wrong prefix");
        assert!(wrong_prefix.to_string().contains("no INSERT statements"));

        let mut unknown_author = settings();
        unknown_author.default_author = Some("ghost@example.com".to_string());
        let err = run_import(&paths, &unknown_author, &options(&dump_path))
            .expect_err("unknown default author");
        assert!(err.to_string().contains("ghost@example.com"));

        let connection = open_migrated(&paths).expect("open");
        assert_eq!(store::stats(&connection).expect("stats").users, 0);
    }

    #[test]
    fn unmigrated_database_is_rejected() {
        let (_temp, paths) = test_paths();
        let dump_path = paths.project_root.join("database.sql");
        fs::write(&dump_path, DUMP).expect("write dump");
        let err = run_import(&paths, &settings(), &options(&dump_path)).expect_err("must fail");
        assert!(err.to_string().contains("wpimport db migrate"));
    }

    #[test]
    fn backfill_sets_missing_images_only() {
        let (_temp, paths, dump_path) = setup(DUMP);
        let mut settings = settings();
        settings.default_author = Some("admin@example.com".to_string());
        run_import(&paths, &settings, &options(&dump_path)).expect("import");

        let connection = open_migrated(&paths).expect("open");
        connection
            .execute(
                "UPDATE posts SET featured_image = NULL WHERE slug = 'berita-utama'",
                [],
            )
            .expect("clear image");
        drop(connection);

        let report =
            backfill_featured_images(&paths, &settings, &options(&dump_path)).expect("backfill");
        assert_eq!(report.updated, vec!["berita-utama"]);
        assert_eq!(report.already_set, 1);
        assert_eq!(report.post_not_found, 0);
        assert!(report.errors.is_empty());
    }
}
