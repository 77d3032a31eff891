use std::mem;
use std::path::Path;

use serde::Serialize;

/// One parenthesized value group, fields in column order.
pub type Row = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTermination {
    /// A row closed and the next non-whitespace character was `;`.
    Semicolon,
    /// A `)` closed more groups than were open.
    Unbalanced,
    /// Input ran out before the statement terminated.
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub rows: Vec<Row>,
    /// Byte offset where scanning stopped (just past the `;` on a clean finish).
    pub end: usize,
    pub termination: ScanTermination,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableExtraction {
    pub table: String,
    #[serde(skip)]
    pub rows: Vec<Row>,
    pub statements: usize,
    pub unterminated_statements: usize,
}

/// Lazily yields the byte offset right after every
/// ``INSERT INTO `<table>` VALUES`` (and trailing whitespace) in a dump.
///
/// Matching is lexical: keywords compare ASCII case-insensitively, the table
/// name must match exactly, and string literals or comments are not skipped.
pub struct InsertLocator<'a> {
    dump: &'a str,
    needle: String,
    cursor: usize,
}

impl<'a> InsertLocator<'a> {
    pub fn new(dump: &'a str, table: &str) -> Self {
        Self {
            dump,
            needle: format!("`{table}`"),
            cursor: 0,
        }
    }

    /// Continue searching from `offset` so already-scanned row data is not re-matched.
    /// Offsets behind the current cursor are ignored.
    pub fn resume_at(&mut self, offset: usize) {
        let mut offset = offset.min(self.dump.len());
        while !self.dump.is_char_boundary(offset) {
            offset += 1;
        }
        if offset > self.cursor {
            self.cursor = offset;
        }
    }
}

impl Iterator for InsertLocator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.dump.len() {
            let found = self.cursor + self.dump[self.cursor..].find(&self.needle)?;
            self.cursor = found + self.needle.len();
            if !preceded_by_insert_into(&self.dump[..found]) {
                continue;
            }
            if let Some(start) = values_start(self.dump, self.cursor) {
                self.cursor = start;
                return Some(start);
            }
        }
        None
    }
}

/// Scan the VALUES list beginning at `start` (the first `(` of the list, or
/// whitespace before it) and collect every row up to the terminating `;`.
///
/// Never fails: malformed input yields whatever rows completed before the
/// scanner hit an unbalanced `)` or the end of input.
pub fn scan_rows(dump: &str, start: usize) -> ScanOutcome {
    if start > dump.len() || !dump.is_char_boundary(start) {
        return ScanOutcome {
            rows: Vec::new(),
            end: dump.len(),
            termination: ScanTermination::EndOfInput,
        };
    }

    let mut rows = Vec::new();
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut quote_char = '\'';
    let mut escaped = false;
    let mut current_value = String::new();
    let mut current_row: Row = Vec::new();
    let mut row_started = false;
    let mut pos = start;

    while let Some(ch) = dump[pos..].chars().next() {
        let next = pos + ch.len_utf8();

        if escaped {
            current_value.push(ch);
            escaped = false;
            pos = next;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            current_value.push(ch);
            pos = next;
            continue;
        }
        if !in_string && (ch == '\'' || ch == '"') {
            in_string = true;
            quote_char = ch;
            pos = next;
            continue;
        }
        if in_string && ch == quote_char {
            if dump[next..].starts_with(quote_char) {
                current_value.push(quote_char);
                pos = next + quote_char.len_utf8();
                continue;
            }
            in_string = false;
            pos = next;
            continue;
        }
        if in_string {
            current_value.push(ch);
            pos = next;
            continue;
        }

        match ch {
            '(' => {
                if depth == 0 {
                    row_started = true;
                    current_row.clear();
                    current_value.clear();
                } else {
                    current_value.push(ch);
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 && row_started {
                    current_row.push(current_value.trim().to_string());
                    rows.push(mem::take(&mut current_row));
                    row_started = false;
                    current_value.clear();

                    let rest = &dump[next..];
                    let trimmed = rest.trim_start();
                    if trimmed.starts_with(';') {
                        return ScanOutcome {
                            rows,
                            end: next + (rest.len() - trimmed.len()) + 1,
                            termination: ScanTermination::Semicolon,
                        };
                    }
                } else if depth < 0 {
                    return ScanOutcome {
                        rows,
                        end: pos,
                        termination: ScanTermination::Unbalanced,
                    };
                } else {
                    current_value.push(ch);
                }
            }
            ',' if depth == 1 => {
                current_row.push(current_value.trim().to_string());
                current_value.clear();
            }
            _ => {
                if row_started {
                    current_value.push(ch);
                }
            }
        }
        pos = next;
    }

    ScanOutcome {
        rows,
        end: dump.len(),
        termination: ScanTermination::EndOfInput,
    }
}

/// Collect the rows of every INSERT statement for `table`, in file order,
/// along with statement counts.
pub fn extract_table(dump: &str, table: &str) -> TableExtraction {
    let mut extraction = TableExtraction {
        table: table.to_string(),
        ..TableExtraction::default()
    };
    let mut locator = InsertLocator::new(dump, table);

    while let Some(start) = locator.next() {
        let outcome = scan_rows(dump, start);
        extraction.statements += 1;
        if outcome.termination != ScanTermination::Semicolon {
            extraction.unterminated_statements += 1;
            log::debug!(
                "INSERT into `{table}` at byte {start} ended without `;` ({:?}) after {} rows",
                outcome.termination,
                outcome.rows.len()
            );
        }
        locator.resume_at(outcome.end);
        extraction.rows.extend(outcome.rows);
    }

    extraction
}

/// Rows for `table` across all INSERT statements in the dump.
pub fn extract_table_rows(dump: &str, table: &str) -> Vec<Row> {
    extract_table(dump, table).rows
}

/// Decode a dump read from `origin`. Invalid UTF-8 is replaced with U+FFFD
/// and logged once.
pub fn decode_dump(bytes: Vec<u8>, origin: &Path) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!(
                "{} is not valid UTF-8; invalid sequences will be replaced",
                origin.display()
            );
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

fn preceded_by_insert_into(before: &str) -> bool {
    let Some(rest) = strip_keyword_suffix(before.trim_end(), "INTO") else {
        return false;
    };
    let spaced = rest.trim_end();
    if spaced.len() == rest.len() {
        return false;
    }
    let Some(head) = strip_keyword_suffix(spaced, "INSERT") else {
        return false;
    };
    !head
        .chars()
        .next_back()
        .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
}

fn values_start(dump: &str, after_table: usize) -> Option<usize> {
    let rest = &dump[after_table..];
    let trimmed = rest.trim_start();
    let keyword = trimmed.get(..6)?;
    if !keyword.eq_ignore_ascii_case("VALUES") {
        return None;
    }
    let after_keyword = &trimmed[6..];
    let values = after_keyword.trim_start();
    Some(dump.len() - values.len())
}

fn strip_keyword_suffix<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(keyword.len())?;
    let tail = text.get(split..)?;
    if tail.eq_ignore_ascii_case(keyword) {
        Some(&text[..split])
    } else {
        None
    }
}
