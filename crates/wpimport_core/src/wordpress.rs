use serde::Serialize;

use crate::dump::{Row, TableExtraction, extract_table};
use crate::unescape::unescape_mysql;

pub const DEFAULT_TABLE_PREFIX: &str = "wp_";

/// Table suffixes read by the importer, in the order they are parsed.
pub const WORDPRESS_TABLES: [&str; 6] = [
    WpUser::TABLE,
    WpPost::TABLE,
    WpPostMeta::TABLE,
    WpTerm::TABLE,
    WpTermTaxonomy::TABLE,
    WpTermRelationship::TABLE,
];

/// Naming prefix applied by the dump producer, e.g. `wp_`, `wps9_` or the
/// All-in-One WP Migration placeholder `SERVMASK_PREFIX_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePrefix(String);

impl TablePrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn table(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.0)
    }
}

impl Default for TablePrefix {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome<T> {
    Parsed(T),
    Skipped { reason: String },
}

impl<T> RowOutcome<T> {
    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Maps a raw row of one WordPress table onto a named record.
///
/// Column positions follow the stock WordPress schema; the mapping is the only
/// place that knows which ordinal means what.
pub trait FromRow: Sized {
    const TABLE: &'static str;

    fn from_row(row: &Row) -> RowOutcome<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WpPost {
    pub id: u64,
    pub author: u64,
    pub date: String,
    pub date_gmt: String,
    pub content: String,
    pub title: String,
    pub excerpt: String,
    pub status: String,
    pub slug: String,
    pub modified: String,
    pub modified_gmt: String,
    pub guid: String,
    pub post_type: String,
}

impl FromRow for WpPost {
    const TABLE: &'static str = "posts";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let id = match required_id(row, 0, "ID") {
            Ok(id) => id,
            Err(reason) => return RowOutcome::skipped(reason),
        };
        RowOutcome::Parsed(Self {
            id,
            author: optional_int(row, 1, "post_author"),
            date: text(row, 2),
            date_gmt: text(row, 3),
            content: text(row, 4),
            title: text(row, 5),
            excerpt: text(row, 6),
            status: text(row, 7),
            slug: text(row, 11),
            modified: text(row, 14),
            modified_gmt: text(row, 15),
            guid: text(row, 18),
            post_type: text(row, 20),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WpTerm {
    pub term_id: u64,
    pub name: String,
    pub slug: String,
}

impl FromRow for WpTerm {
    const TABLE: &'static str = "terms";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let term_id = match required_id(row, 0, "term_id") {
            Ok(id) => id,
            Err(reason) => return RowOutcome::skipped(reason),
        };
        RowOutcome::Parsed(Self {
            term_id,
            name: text(row, 1),
            slug: text(row, 2),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WpTermTaxonomy {
    pub term_taxonomy_id: u64,
    pub term_id: u64,
    pub taxonomy: String,
    pub description: String,
}

impl FromRow for WpTermTaxonomy {
    const TABLE: &'static str = "term_taxonomy";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let ids = required_id(row, 0, "term_taxonomy_id")
            .and_then(|taxonomy_id| Ok((taxonomy_id, required_id(row, 1, "term_id")?)));
        let (term_taxonomy_id, term_id) = match ids {
            Ok(ids) => ids,
            Err(reason) => return RowOutcome::skipped(reason),
        };
        RowOutcome::Parsed(Self {
            term_taxonomy_id,
            term_id,
            taxonomy: text(row, 2),
            description: text(row, 3),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WpTermRelationship {
    pub object_id: u64,
    pub term_taxonomy_id: u64,
}

impl FromRow for WpTermRelationship {
    const TABLE: &'static str = "term_relationships";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let ids = required_id(row, 0, "object_id")
            .and_then(|object_id| Ok((object_id, required_id(row, 1, "term_taxonomy_id")?)));
        match ids {
            Ok((object_id, term_taxonomy_id)) => RowOutcome::Parsed(Self {
                object_id,
                term_taxonomy_id,
            }),
            Err(reason) => RowOutcome::skipped(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WpUser {
    pub id: u64,
    pub login: String,
    pub nicename: String,
    pub email: String,
    pub display_name: String,
}

impl FromRow for WpUser {
    const TABLE: &'static str = "users";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let id = match required_id(row, 0, "ID") {
            Ok(id) => id,
            Err(reason) => return RowOutcome::skipped(reason),
        };
        let login = text(row, 1);
        let email = text(row, 4);
        if login.trim().is_empty() {
            return RowOutcome::skipped(format!("user {id} has an empty user_login"));
        }
        if email.trim().is_empty() {
            return RowOutcome::skipped(format!("user {id} ({login}) has no user_email"));
        }
        let display_name = match text(row, 9) {
            name if name.trim().is_empty() => login.clone(),
            name => name,
        };
        RowOutcome::Parsed(Self {
            id,
            nicename: text(row, 3),
            email,
            display_name,
            login,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WpPostMeta {
    pub meta_id: u64,
    pub post_id: u64,
    pub meta_key: String,
    pub meta_value: String,
}

impl FromRow for WpPostMeta {
    const TABLE: &'static str = "postmeta";

    fn from_row(row: &Row) -> RowOutcome<Self> {
        let ids = required_id(row, 0, "meta_id")
            .and_then(|meta_id| Ok((meta_id, required_id(row, 1, "post_id")?)));
        match ids {
            Ok((meta_id, post_id)) => RowOutcome::Parsed(Self {
                meta_id,
                post_id,
                meta_key: text(row, 2),
                meta_value: text(row, 3),
            }),
            Err(reason) => RowOutcome::skipped(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub table: String,
    /// 1-based position of the row within the table's parse result.
    pub row: usize,
    pub reason: String,
}

/// Every WordPress table the importer needs, tokenized and mapped.
#[derive(Debug, Clone, Default)]
pub struct WordPressDump {
    pub users: Vec<WpUser>,
    pub posts: Vec<WpPost>,
    pub postmeta: Vec<WpPostMeta>,
    pub terms: Vec<WpTerm>,
    pub taxonomies: Vec<WpTermTaxonomy>,
    pub relationships: Vec<WpTermRelationship>,
    pub tables: Vec<TableExtraction>,
    pub skipped: Vec<SkippedRow>,
}

impl WordPressDump {
    pub fn parse(dump: &str, prefix: &TablePrefix) -> Self {
        let mut parsed = Self::default();
        parsed.users = parsed.map_table(dump, prefix);
        parsed.posts = parsed.map_table(dump, prefix);
        parsed.postmeta = parsed.map_table(dump, prefix);
        parsed.terms = parsed.map_table(dump, prefix);
        parsed.taxonomies = parsed.map_table(dump, prefix);
        parsed.relationships = parsed.map_table(dump, prefix);
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|table| table.statements == 0)
    }

    fn map_table<T: FromRow>(&mut self, dump: &str, prefix: &TablePrefix) -> Vec<T> {
        let table = prefix.table(T::TABLE);
        let mut extraction = extract_table(dump, &table);
        let rows = std::mem::take(&mut extraction.rows);
        if extraction.unterminated_statements > 0 {
            log::warn!(
                "{table}: {} of {} INSERT statements were truncated; rows may be missing",
                extraction.unterminated_statements,
                extraction.statements
            );
        }
        self.tables.push(extraction);

        let (mapped, skipped) = map_rows::<T>(&table, &rows);
        for skip in &skipped {
            log::warn!("{}: skipping row {}: {}", skip.table, skip.row, skip.reason);
        }
        self.skipped.extend(skipped);
        log::info!("{table}: {} rows mapped", mapped.len());
        mapped
    }
}

/// Apply a column mapping to already tokenized rows.
pub fn map_rows<T: FromRow>(table: &str, rows: &[Row]) -> (Vec<T>, Vec<SkippedRow>) {
    let mut mapped = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match T::from_row(row) {
            RowOutcome::Parsed(record) => mapped.push(record),
            RowOutcome::Skipped { reason } => skipped.push(SkippedRow {
                table: table.to_string(),
                row: index + 1,
                reason,
            }),
        }
    }
    (mapped, skipped)
}

fn text(row: &Row, index: usize) -> String {
    row.get(index)
        .map(|value| unescape_mysql(value))
        .unwrap_or_default()
}

fn required_id(row: &Row, index: usize, column: &str) -> Result<u64, String> {
    let Some(value) = row.get(index) else {
        return Err(format!(
            "missing {column} (row has {} fields)",
            row.len()
        ));
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(format!("{column} is 0")),
        Ok(id) => Ok(id),
        Err(_) => Err(format!("non-numeric {column} `{value}`")),
    }
}

fn optional_int(row: &Row, index: usize, column: &str) -> u64 {
    let Some(value) = row.get(index) else {
        return 0;
    };
    match value.trim().parse::<u64>() {
        Ok(number) => number,
        Err(_) => {
            log::debug!("non-numeric {column} `{value}`, using 0");
            0
        }
    }
}
