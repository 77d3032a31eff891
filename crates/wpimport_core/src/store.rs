use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::catalog::{Article, Author, Taxon};
use crate::migrate::unix_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Upserted {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillOutcome {
    Updated,
    AlreadySet,
    PostNotFound,
}

#[derive(Debug, Clone)]
pub struct ImportRunRecord {
    pub dump_path: String,
    pub dump_sha256: String,
    pub table_prefix: String,
    pub users_upserted: usize,
    pub categories_upserted: usize,
    pub tags_upserted: usize,
    pub posts_imported: usize,
    pub posts_skipped: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub users: usize,
    pub categories: usize,
    pub tags: usize,
    pub posts: usize,
    pub posts_with_featured_image: usize,
    pub post_categories: usize,
    pub post_tags: usize,
    pub import_runs: usize,
    pub last_import_sha256: Option<String>,
}

/// Match on email (case-insensitive). An existing user keeps its name and
/// role; only the WordPress id is refreshed.
pub fn upsert_user(connection: &Connection, author: &Author) -> Result<Upserted> {
    let now = unix_timestamp()?;
    let existing: Option<i64> = connection
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![author.email],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up user {}", author.email))?;

    if let Some(id) = existing {
        connection
            .execute(
                "UPDATE users SET wp_id = ?1, updated_at_unix = ?2 WHERE id = ?3",
                params![to_i64(author.wp_id)?, now, id],
            )
            .with_context(|| format!("failed to update user {}", author.email))?;
        return Ok(Upserted { id, created: false });
    }

    connection
        .execute(
            "INSERT INTO users (email, name, username, role, wp_id, created_at_unix, updated_at_unix)
             VALUES (?1, ?2, ?3, 'AUTHOR', ?4, ?5, ?5)",
            params![
                author.email,
                author.name,
                author.login,
                to_i64(author.wp_id)?,
                now
            ],
        )
        .with_context(|| format!("failed to insert user {}", author.email))?;
    Ok(Upserted {
        id: connection.last_insert_rowid(),
        created: true,
    })
}

pub fn user_id_by_email(connection: &Connection, email: &str) -> Result<Option<i64>> {
    connection
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email.trim()],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up user {email}"))
}

pub fn first_admin_id(connection: &Connection) -> Result<Option<i64>> {
    connection
        .query_row(
            "SELECT id FROM users WHERE role = 'ADMIN' ORDER BY id LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up admin user")
}

pub fn upsert_category(connection: &Connection, category: &Taxon) -> Result<Upserted> {
    if let Some(id) = id_by_slug(connection, "categories", &category.slug)? {
        return Ok(Upserted { id, created: false });
    }
    connection
        .execute(
            "INSERT INTO categories (name, slug, description, created_at_unix) VALUES (?1, ?2, ?3, ?4)",
            params![
                category.name,
                category.slug,
                category.description,
                unix_timestamp()?
            ],
        )
        .with_context(|| format!("failed to insert category {}", category.slug))?;
    Ok(Upserted {
        id: connection.last_insert_rowid(),
        created: true,
    })
}

pub fn upsert_tag(connection: &Connection, tag: &Taxon) -> Result<Upserted> {
    if let Some(id) = id_by_slug(connection, "tags", &tag.slug)? {
        return Ok(Upserted { id, created: false });
    }
    connection
        .execute(
            "INSERT INTO tags (name, slug, created_at_unix) VALUES (?1, ?2, ?3)",
            params![tag.name, tag.slug, unix_timestamp()?],
        )
        .with_context(|| format!("failed to insert tag {}", tag.slug))?;
    Ok(Upserted {
        id: connection.last_insert_rowid(),
        created: true,
    })
}

pub fn post_id_by_slug(connection: &Connection, slug: &str) -> Result<Option<i64>> {
    id_by_slug(connection, "posts", slug)
}

pub fn post_exists(connection: &Connection, slug: &str) -> Result<bool> {
    Ok(post_id_by_slug(connection, slug)?.is_some())
}

pub fn insert_post(connection: &Connection, article: &Article, author_id: i64) -> Result<i64> {
    let created_at = article.created_at.as_ref().or(article.updated_at.as_ref());
    let updated_at = article.updated_at.as_ref().or(article.created_at.as_ref());

    connection
        .execute(
            "INSERT INTO posts (title, slug, content, excerpt, featured_image, author_id, status,
                                published_at, created_at, updated_at, imported_at_unix, wp_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                article.title,
                article.slug,
                article.content,
                article.excerpt,
                article.featured_image,
                author_id,
                article.status.as_str(),
                article.published_at,
                created_at,
                updated_at,
                unix_timestamp()?,
                to_i64(article.wp_id)?
            ],
        )
        .with_context(|| format!("failed to insert post {}", article.slug))?;
    Ok(connection.last_insert_rowid())
}

/// Returns `true` when a new link row was written.
pub fn link_post_category(connection: &Connection, post_id: i64, category_id: i64) -> Result<bool> {
    let changed = connection
        .execute(
            "INSERT OR IGNORE INTO post_categories (post_id, category_id) VALUES (?1, ?2)",
            params![post_id, category_id],
        )
        .with_context(|| format!("failed to link post {post_id} to category {category_id}"))?;
    Ok(changed > 0)
}

/// Returns `true` when a new link row was written.
pub fn link_post_tag(connection: &Connection, post_id: i64, tag_id: i64) -> Result<bool> {
    let changed = connection
        .execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)",
            params![post_id, tag_id],
        )
        .with_context(|| format!("failed to link post {post_id} to tag {tag_id}"))?;
    Ok(changed > 0)
}

/// Set the featured image of the post with `slug` unless it already has one.
pub fn backfill_featured_image(
    connection: &Connection,
    slug: &str,
    url: &str,
) -> Result<BackfillOutcome> {
    let current: Option<Option<String>> = connection
        .query_row(
            "SELECT featured_image FROM posts WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up post {slug}"))?;

    match current {
        None => Ok(BackfillOutcome::PostNotFound),
        Some(Some(existing)) if !existing.trim().is_empty() => Ok(BackfillOutcome::AlreadySet),
        Some(_) => {
            connection
                .execute(
                    "UPDATE posts SET featured_image = ?1 WHERE slug = ?2",
                    params![url, slug],
                )
                .with_context(|| format!("failed to update featured image of {slug}"))?;
            Ok(BackfillOutcome::Updated)
        }
    }
}

pub fn record_import_run(connection: &Connection, run: &ImportRunRecord) -> Result<i64> {
    connection
        .execute(
            "INSERT INTO import_runs (dump_path, dump_sha256, table_prefix, users_upserted,
                                      categories_upserted, tags_upserted, posts_imported,
                                      posts_skipped, issues, finished_at_unix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.dump_path,
                run.dump_sha256,
                run.table_prefix,
                to_i64(run.users_upserted)?,
                to_i64(run.categories_upserted)?,
                to_i64(run.tags_upserted)?,
                to_i64(run.posts_imported)?,
                to_i64(run.posts_skipped)?,
                to_i64(run.issues)?,
                unix_timestamp()?
            ],
        )
        .context("failed to record import run")?;
    Ok(connection.last_insert_rowid())
}

pub fn stats(connection: &Connection) -> Result<StoreStats> {
    let last_import_sha256 = connection
        .query_row(
            "SELECT dump_sha256 FROM import_runs ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read last import run")?;

    Ok(StoreStats {
        users: count(connection, "SELECT COUNT(*) FROM users")?,
        categories: count(connection, "SELECT COUNT(*) FROM categories")?,
        tags: count(connection, "SELECT COUNT(*) FROM tags")?,
        posts: count(connection, "SELECT COUNT(*) FROM posts")?,
        posts_with_featured_image: count(
            connection,
            "SELECT COUNT(*) FROM posts WHERE featured_image IS NOT NULL AND featured_image != ''",
        )?,
        post_categories: count(connection, "SELECT COUNT(*) FROM post_categories")?,
        post_tags: count(connection, "SELECT COUNT(*) FROM post_tags")?,
        import_runs: count(connection, "SELECT COUNT(*) FROM import_runs")?,
        last_import_sha256,
    })
}

fn id_by_slug(connection: &Connection, table: &str, slug: &str) -> Result<Option<i64>> {
    connection
        .query_row(
            &format!("SELECT id FROM {table} WHERE slug = ?1"),
            params![slug],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up {table} slug {slug}"))
}

fn count(connection: &Connection, sql: &str) -> Result<usize> {
    let value: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to run `{sql}`"))?;
    usize::try_from(value).context("row count does not fit into usize")
}

fn to_i64<T: TryInto<i64>>(value: T) -> Result<i64> {
    value
        .try_into()
        .map_err(|_| anyhow::anyhow!("value does not fit into i64"))
}
