//! PostgreSQL target: DDL generation plus the rewrites applied to captured
//! MySQL insert statements before they are replayed.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::Generator;
use crate::error::{MigrateError, Result};
use crate::model::{Field, Table};

static RE_LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n]+").expect("Invalid regex"));
static RE_BOOLEAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(true|false)\b").expect("Invalid regex"));
static RE_ENGINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\bENGINE\s*=\s*\w+").expect("Invalid regex"));
static RE_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\b(?:DEFAULT\s+)?CHARSET\s*=\s*\w+").expect("Invalid regex")
});
static RE_DEFAULT_NULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+DEFAULT\s+NULL\b").expect("Invalid regex"));
static RE_BIT_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bb'([01])'").expect("Invalid regex"));
static RE_SPACE_BEFORE_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+,").expect("Invalid regex"));
static RE_VALUES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bVALUES\s*\(").expect("Invalid regex"));
static RE_CURRENT_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^current_timestamp(?:\s*\(\s*\d*\s*\))?$").expect("Invalid regex")
});
static RE_BIT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^b'([01])'$").expect("Invalid regex"));

struct TypeRule {
    patterns: &'static [&'static str],
    /// `None` keeps the source type as written.
    target: Option<&'static str>,
}

// Evaluated top to bottom; "int" must stay below "tinyint" and "bigint".
const TYPE_RULES: &[TypeRule] = &[
    TypeRule { patterns: &["tinyint"], target: Some("SMALLINT") },
    TypeRule { patterns: &["bigint"], target: Some("BIGINT") },
    TypeRule { patterns: &["int"], target: Some("INTEGER") },
    TypeRule { patterns: &["varchar"], target: None },
    TypeRule { patterns: &["text"], target: Some("TEXT") },
    TypeRule { patterns: &["datetime", "timestamp"], target: Some("TIMESTAMP") },
    TypeRule { patterns: &["date"], target: Some("DATE") },
    TypeRule { patterns: &["decimal"], target: Some("NUMERIC") },
    TypeRule { patterns: &["float", "double"], target: Some("DOUBLE PRECISION") },
];

const NUMERIC_TYPES: &[&str] = &["INT", "NUMERIC", "SMALLINT", "BIGINT", "DOUBLE"];
const ZERO_DATE: &str = "0000-00-00";

pub struct PostgresGenerator;

impl Generator for PostgresGenerator {
    fn dialect(&self) -> &'static str {
        "postgres"
    }

    fn generate_schema(&self, tables: &[Table]) -> Result<String> {
        generate_schema(tables)
    }

    fn prepare_insert(&self, statement: &str) -> String {
        repair_value_list(&normalize_syntax(statement))
    }
}

pub fn map_type(source_type: &str, auto_increment: bool) -> String {
    if auto_increment {
        return "SERIAL".to_string();
    }
    let lower = source_type.to_lowercase();
    TYPE_RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| lower.contains(p)))
        .map(|rule| match rule.target {
            Some(target) => target.to_string(),
            None => source_type.trim().to_string(),
        })
        .unwrap_or_else(|| "TEXT".to_string())
}

/// Renders the `DEFAULT ...` clause for a column of the given target type, or
/// `None` when the default should be dropped.
pub fn render_default(raw: &str, pg_type: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // b'0' / b'1' bit literals carry their value inside quotes.
    let raw = match RE_BIT_DEFAULT.captures(raw) {
        Some(caps) => if &caps[1] == "1" { "1" } else { "0" },
        None => raw,
    };
    let lower = raw.to_lowercase();
    let unquoted = strip_quotes(raw);

    if RE_CURRENT_TIMESTAMP.is_match(raw) {
        Some("DEFAULT CURRENT_TIMESTAMP".to_string())
    } else if lower == "null" {
        Some("DEFAULT NULL".to_string())
    } else if pg_type.starts_with("DATE") || pg_type.starts_with("TIMESTAMP") {
        // Postgres rejects the zero date, so it is treated as no default.
        if unquoted.starts_with(ZERO_DATE) || unquoted.is_empty() {
            None
        } else {
            Some(format!("DEFAULT {}", quote_literal(unquoted)))
        }
    } else if pg_type == "SERIAL" {
        None
    } else if NUMERIC_TYPES.iter().any(|t| pg_type.starts_with(t)) {
        Some(format!("DEFAULT {}", unquoted))
    } else if matches!(lower.as_str(), "true" | "false" | "1" | "0") {
        Some(format!("DEFAULT {}", lower))
    } else {
        Some(format!("DEFAULT {}", quote_literal(unquoted)))
    }
}

/// Drops one pair of surrounding single quotes, if present.
fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// Renders `value` as a single-quoted literal. `\'` and lone `'` become `''`;
/// an existing `''` pair is kept as is.
fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'\'') => {
                chars.next();
                out.push_str("''");
            }
            '\'' => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                }
                out.push_str("''");
            }
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn render_column(field: &Field, inline_primary_key: bool) -> String {
    let pg_type = map_type(&field.data_type, field.auto_increment);
    let mut column = format!("{} {}", field.name, pg_type);
    if !field.nullable {
        column.push_str(" NOT NULL");
    }
    if let Some(default) = field.default.as_deref().and_then(|d| render_default(d, &pg_type)) {
        column.push(' ');
        column.push_str(&default);
    }
    if field.primary_key && inline_primary_key {
        column.push_str(" PRIMARY KEY");
    }
    column
}

/// Generates the merged PostgreSQL script for a table set: every table body
/// first, then a `-- Foreign Keys` section, then an `-- Indexes` section.
pub fn generate_schema(tables: &[Table]) -> Result<String> {
    let mut out = String::new();
    let mut foreign_keys = Vec::new();
    let mut indexes = Vec::new();

    for table in tables.iter().filter(|t| !t.name.is_empty()) {
        let composite = table.has_composite_key();
        let mut clauses: Vec<String> = table
            .fields
            .iter()
            .map(|f| render_column(f, !composite))
            .collect();
        if composite {
            clauses.push(format!("PRIMARY KEY ({})", table.primary_keys.join(", ")));
        }

        out.push_str(&format!("CREATE TABLE {} (\n", table.name));
        for (i, clause) in clauses.iter().enumerate() {
            let separator = if i + 1 < clauses.len() { "," } else { "" };
            out.push_str(&format!("  {}{}\n", clause, separator));
        }
        out.push_str(");\n\n");

        for field in &table.fields {
            if let Some(fk) = field.foreign_key.as_ref().filter(|fk| fk.is_complete()) {
                foreign_keys.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT fk_{}_{} FOREIGN KEY ({}) REFERENCES {}({});",
                    table.name, table.name, field.name, field.name, fk.referenced_table, fk.referenced_field
                ));
            }
            if field.unique && !field.primary_key {
                indexes.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_{}_{} ON {}({});",
                    table.name, field.name, table.name, field.name
                ));
            }
            if field.index {
                indexes.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({});",
                    table.name, field.name, table.name, field.name
                ));
            }
        }
    }

    if out.is_empty() {
        return Err(MigrateError::Generation("no named tables to generate".to_string()));
    }

    if !foreign_keys.is_empty() {
        out.push_str("-- Foreign Keys\n");
        for line in &foreign_keys {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }

    if !indexes.is_empty() {
        out.push_str("-- Indexes\n");
        for line in &indexes {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }

    Ok(out)
}

/// Lexical rewrite of a MySQL statement into something PostgreSQL accepts.
/// Applying it twice gives the same result as applying it once.
pub fn normalize_syntax(sql: &str) -> String {
    // A removal can expose a new match; repeat until nothing changes.
    let mut current = normalize_pass(sql);
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_pass(sql: &str) -> String {
    let mut out = sql.replace('`', "\"");
    out = RE_LINE_BREAKS.replace_all(&out, " ").into_owned();
    for glyph in ['\u{2019}', '\u{2018}', '\u{00B4}'] {
        out = out.replace(glyph, "''");
    }
    out = unescape_apostrophes(&out);
    out = fold_booleans(&out);
    out = RE_ENGINE.replace_all(&out, "").into_owned();
    out = RE_CHARSET.replace_all(&out, "").into_owned();
    out = out
        .replace("'0000-00-00 00:00:00'", "'1970-01-01 00:00:00'")
        .replace("'0000-00-00'", "'1970-01-01'");
    out = RE_DEFAULT_NULL.replace_all(&out, "").into_owned();
    out = RE_BIT_LITERAL
        .replace_all(&out, |caps: &Captures| if &caps[1] == "1" { "true" } else { "false" })
        .into_owned();
    out = RE_SPACE_BEFORE_COMMA.replace_all(&out, ",").into_owned();
    out.trim().to_string()
}

// `\'` becomes `''`; an escaped backslash (`\\`) is kept as a pair so the quote
// after it still closes the literal.
fn unescape_apostrophes(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('\'') => {
                chars.next();
                out.push_str("''");
            }
            Some('\\') => {
                chars.next();
                out.push_str("\\\\");
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn fold_booleans(sql: &str) -> String {
    let fold = |segment: &str| {
        RE_BOOLEAN
            .replace_all(segment, |caps: &Captures| caps[1].to_ascii_lowercase())
            .into_owned()
    };

    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in sql.char_indices() {
        if c != '\'' {
            continue;
        }
        let segment = &sql[start..i];
        if in_quote {
            out.push_str(segment);
        } else {
            out.push_str(&fold(segment));
        }
        out.push('\'');
        in_quote = !in_quote;
        start = i + 1;
    }
    let tail = &sql[start..];
    if in_quote {
        out.push_str(tail);
    } else {
        out.push_str(&fold(tail));
    }
    out
}

/// Quotes bare alphabetic values inside the `VALUES (...)` tuples of a
/// statement. Numbers, `NULL`, empty values and anything already carrying a
/// quote are left alone. Statements whose value list does not balance are
/// returned unchanged.
pub fn repair_value_list(statement: &str) -> String {
    let Some(keyword) = RE_VALUES.find(statement) else {
        return statement.to_string();
    };
    let open = keyword.end() - 1;
    let Some((tuples, consumed)) = split_tuples(&statement[open..]) else {
        return statement.to_string();
    };

    let rendered: Vec<String> = tuples
        .iter()
        .map(|values| {
            let values: Vec<String> = values.iter().map(|v| repair_value(v)).collect();
            format!("({})", values.join(", "))
        })
        .collect();

    format!(
        "{}VALUES {}{}",
        &statement[..keyword.start()],
        rendered.join(", "),
        &statement[open + consumed..]
    )
}

fn repair_value(raw: &str) -> String {
    let value = raw.trim();
    let keep = value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value.contains('\'')
        || !value.chars().any(char::is_alphabetic);
    if keep {
        value.to_string()
    } else {
        format!("'{}'", value)
    }
}

/// Splits `(a, b), (c, d)` into value slices, honouring quotes and nested
/// parentheses. Returns the tuples and the number of bytes they span.
fn split_tuples(input: &str) -> Option<(Vec<Vec<&str>>, usize)> {
    let mut tuples = Vec::new();
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut value_start = 0;
    let mut end = 0;

    for (i, c) in input.char_indices() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' if depth > 0 => in_quote = true,
            '(' => {
                depth += 1;
                if depth == 1 {
                    value_start = i + 1;
                }
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    values.push(&input[value_start..i]);
                    tuples.push(std::mem::take(&mut values));
                    end = i + 1;
                }
            }
            ',' if depth == 1 => {
                values.push(&input[value_start..i]);
                value_start = i + 1;
            }
            c if depth == 0 && c != ',' && !c.is_whitespace() => break,
            _ => {}
        }
    }

    if depth != 0 || tuples.is_empty() {
        return None;
    }
    Some((tuples, end))
}
