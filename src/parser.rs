//! Line-oriented reader for MySQL-style dump files.
//!
//! The parser does not implement a SQL grammar. It recognizes `CREATE TABLE`
//! blocks, `ALTER TABLE` additions and `INSERT INTO` statements by their
//! leading keywords and pulls facts out of them with patterns. Anything it
//! does not recognize is skipped.

use std::path::Path;

use async_compression::tokio::bufread::GzipDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::model::{Field, ForeignKey, Table};

static RE_CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:`([^`]+)`|([A-Za-z0-9_$]+))")
        .expect("Invalid regex")
});
static RE_PRIMARY_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)PRIMARY\s+KEY\s*\(([^)]+)\)").expect("Invalid regex"));
static RE_UNIQUE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)UNIQUE\s+KEY\s+`[^`]+`\s*\(`([^`]+)`\)").expect("Invalid regex")
});
static RE_ENGINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ENGINE\s*=\s*([a-zA-Z0-9]+)").expect("Invalid regex"));
static RE_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CHARSET\s*=\s*([a-zA-Z0-9_]+)").expect("Invalid regex"));
static RE_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^`([^`]+)`\s+([A-Za-z0-9_]+(?:\s*\([^)]*\))?)(.*)$").expect("Invalid regex")
});
static RE_INLINE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:KEY|INDEX)\s+(?:`[^`]+`\s*)?\(([^)]+)\)").expect("Invalid regex")
});
static RE_INLINE_FOREIGN_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^CONSTRAINT\s+`[^`]+`\s+FOREIGN\s+KEY\s*\(`([^`]+)`\)\s+REFERENCES\s+`([^`]+)`\s*\(`([^`]+)`\)",
    )
    .expect("Invalid regex")
});
static RE_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bDEFAULT\s+('(?:[^'\\]|\\.|'')*'|"[^"]*"|[^\s,]+)"#).expect("Invalid regex")
});

static RE_ALTER_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(?:ONLY\s+)?`([^`]+)`").expect("Invalid regex")
});
static RE_ADD_PRIMARY_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ADD\s+PRIMARY\s+KEY\s*\(([^)]+)\)").expect("Invalid regex"));
static RE_MODIFY_AUTO_INCREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)MODIFY\s+(?:COLUMN\s+)?`([^`]+)`.*AUTO_INCREMENT").expect("Invalid regex")
});
static RE_ADD_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ADD\s+(?:KEY|INDEX)\s+`[^`]+`\s*\(([^)]+)\)").expect("Invalid regex")
});
static RE_ADD_UNIQUE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ADD\s+UNIQUE\s+(?:KEY|INDEX)\s+`[^`]+`\s*\(`([^`]+)`\)")
        .expect("Invalid regex")
});
static RE_ADD_FOREIGN_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ADD\s+CONSTRAINT\s+`[^`]+`\s+FOREIGN\s+KEY\s*\(`([^`]+)`\)\s+REFERENCES\s+`([^`]+)`\s*\(`([^`]+)`\)",
    )
    .expect("Invalid regex")
});

enum ScanState {
    Idle,
    CreateTable(Vec<String>),
    AlterTable(Vec<String>),
}

/// Reads a dump from disk (gzip when the name ends in `.gz`) and parses it.
pub async fn parse_file(path: &Path) -> Result<Vec<Table>> {
    let text = read_dump(path).await.map_err(|source| MigrateError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let tables = tokio::task::spawn_blocking(move || parse_dump(&text))
        .await
        .map_err(|e| MigrateError::Parse {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

    info!("Parsed {} tables from {}", tables.len(), path.display());
    Ok(tables)
}

async fn read_dump(path: &Path) -> std::io::Result<String> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut text = String::new();

    let compressed = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if compressed {
        GzipDecoder::new(reader).read_to_string(&mut text).await?;
    } else {
        reader.read_to_string(&mut text).await?;
    }
    Ok(text)
}

/// Parses dump text into tables in the order their definitions appear.
///
/// Inserts are attached to their tables after the whole text has been
/// scanned, so an insert may precede the definition of its table.
pub fn parse_dump(text: &str) -> Vec<Table> {
    let mut tables: Vec<Table> = Vec::new();
    let mut inserts: Vec<String> = Vec::new();
    let mut state = ScanState::Idle;
    let mut lines = text.lines().map(str::trim);

    while let Some(line) = lines.next() {
        state = match state {
            ScanState::CreateTable(mut block) => {
                block.push(line.to_string());
                if closes_create(line) {
                    finish_create(&block, &mut tables);
                    ScanState::Idle
                } else {
                    ScanState::CreateTable(block)
                }
            }
            ScanState::AlterTable(mut block) => {
                block.push(line.to_string());
                if line.ends_with(';') {
                    apply_alter(&block.join(" "), &mut tables);
                    ScanState::Idle
                } else {
                    ScanState::AlterTable(block)
                }
            }
            ScanState::Idle => {
                if starts_with_keyword(line, "CREATE TABLE") {
                    let block = vec![line.to_string()];
                    if line.ends_with(");") {
                        finish_create(&block, &mut tables);
                        ScanState::Idle
                    } else {
                        ScanState::CreateTable(block)
                    }
                } else if starts_with_keyword(line, "ALTER TABLE") {
                    if line.ends_with(';') {
                        apply_alter(line, &mut tables);
                        ScanState::Idle
                    } else {
                        ScanState::AlterTable(vec![line.to_string()])
                    }
                } else if starts_with_keyword(line, "INSERT INTO") {
                    let mut statement = line.to_string();
                    while !statement.ends_with(';') {
                        let Some(next) = lines.next() else { break };
                        statement.push(' ');
                        statement.push_str(next);
                    }
                    inserts.push(statement);
                    ScanState::Idle
                } else {
                    ScanState::Idle
                }
            }
        };
    }

    match state {
        ScanState::CreateTable(block) => debug!("Unterminated CREATE TABLE block skipped ({} lines)", block.len()),
        ScanState::AlterTable(block) => debug!("Unterminated ALTER TABLE block skipped ({} lines)", block.len()),
        ScanState::Idle => {}
    }

    attach_inserts(&mut tables, inserts);
    tables
}

fn starts_with_keyword(line: &str, keyword: &str) -> bool {
    line.get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

fn closes_create(line: &str) -> bool {
    line.ends_with(");") || (line.starts_with(')') && line.ends_with(';'))
}

fn finish_create(block: &[String], tables: &mut Vec<Table>) {
    match parse_create_block(block) {
        Some(table) => tables.push(table),
        None => debug!("Skipped CREATE TABLE block without a recognizable name"),
    }
}

fn parse_create_block(lines: &[String]) -> Option<Table> {
    let stmt = lines.join(" ");
    let caps = RE_CREATE_TABLE.captures(&stmt)?;
    let name = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let mut table = Table::new(name);

    if let Some(caps) = RE_PRIMARY_KEY.captures(&stmt) {
        table.primary_keys = split_columns(&caps[1]);
    }
    table.unique_keys = RE_UNIQUE_KEY
        .captures_iter(&stmt)
        .map(|caps| caps[1].to_string())
        .collect();
    table.engine = RE_ENGINE.captures(&stmt).map(|caps| caps[1].to_string());
    table.charset = RE_CHARSET.captures(&stmt).map(|caps| caps[1].to_string());

    let mut indexed = Vec::new();
    let mut references = Vec::new();
    for line in lines.iter().skip(1) {
        if let Some(caps) = RE_COLUMN.captures(line) {
            table.fields.push(parse_column(&caps[1], &caps[2], &caps[3]));
        } else if let Some(caps) = RE_INLINE_KEY.captures(line) {
            indexed.extend(split_columns(&caps[1]));
        } else if let Some(caps) = RE_INLINE_FOREIGN_KEY.captures(line) {
            references.push((caps[1].to_string(), ForeignKey::new(&caps[2], &caps[3])));
        }
    }

    // The key clauses can sit before or after the columns they name.
    let inline_keys: Vec<String> = table
        .fields
        .iter()
        .filter(|f| f.primary_key)
        .map(|f| f.name.clone())
        .collect();
    for key in inline_keys {
        table.add_primary_key(&key);
    }
    let primary_keys = table.primary_keys.clone();
    let unique_keys = table.unique_keys.clone();
    for field in &mut table.fields {
        if primary_keys.iter().any(|k| k.eq_ignore_ascii_case(&field.name)) {
            field.primary_key = true;
        }
        if unique_keys.iter().any(|k| k.eq_ignore_ascii_case(&field.name)) {
            field.unique = true;
        }
        if indexed.iter().any(|k| k.eq_ignore_ascii_case(&field.name)) {
            field.index = true;
        }
    }
    for (column, reference) in references {
        if let Some(field) = table.field_mut(&column) {
            field.foreign_key = reference;
        }
    }

    Some(table)
}

fn parse_column(name: &str, data_type: &str, extra: &str) -> Field {
    let upper = extra.to_ascii_uppercase();
    Field {
        name: name.to_string(),
        data_type: data_type.trim().to_string(),
        nullable: !upper.contains("NOT NULL"),
        default: extract_default(extra),
        primary_key: upper.contains("PRIMARY KEY"),
        auto_increment: upper.contains("AUTO_INCREMENT"),
        ..Field::default()
    }
}

// Strips one pair of matching quotes; `b'0'` and similar prefixed literals
// are kept whole.
fn extract_default(extra: &str) -> Option<String> {
    let caps = RE_DEFAULT.captures(extra)?;
    let value = caps[1].trim_end_matches(',');
    let unquoted = ['\'', '"'].iter().find_map(|&q| {
        value
            .strip_prefix(q)
            .and_then(|v| v.strip_suffix(q))
    });
    Some(unquoted.unwrap_or(value).to_string())
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|col| {
            // `name`(10) is a prefix-length index column
            let col = col.split('(').next().unwrap_or_default();
            let col = col.trim_matches(|c: char| c == '`' || c.is_whitespace());
            (!col.is_empty()).then(|| col.to_string())
        })
        .collect()
}

fn apply_alter(stmt: &str, tables: &mut [Table]) {
    if let Some(caps) = RE_ALTER_TARGET.captures(stmt) {
        let target = &caps[1];
        for table in tables.iter_mut().filter(|t| t.name == target) {
            if let Some(caps) = RE_ADD_PRIMARY_KEY.captures(stmt) {
                for column in split_columns(&caps[1]) {
                    let Some(field) = table.field_mut(&column) else { continue };
                    field.primary_key = true;
                    table.add_primary_key(&column);
                }
            }

            if let Some(caps) = RE_MODIFY_AUTO_INCREMENT.captures(stmt) {
                if let Some(field) = table.field_mut(&caps[1]) {
                    field.auto_increment = true;
                }
            }

            for caps in RE_ADD_KEY.captures_iter(stmt) {
                for column in split_columns(&caps[1]) {
                    if let Some(field) = table.field_mut(&column) {
                        field.index = true;
                    }
                }
            }

            for caps in RE_ADD_UNIQUE_KEY.captures_iter(stmt) {
                let column = caps[1].to_string();
                if let Some(field) = table.field_mut(&column) {
                    field.unique = true;
                    if !table.unique_keys.iter().any(|k| k.eq_ignore_ascii_case(&column)) {
                        table.unique_keys.push(column);
                    }
                }
            }
        }
    }

    // Foreign keys attach to every table that owns a column of that name, not
    // only the table named by the ALTER statement.
    for caps in RE_ADD_FOREIGN_KEY.captures_iter(stmt) {
        let source = &caps[1];
        let reference = ForeignKey::new(&caps[2], &caps[3]);
        let mut owners = Vec::new();
        for table in tables.iter_mut() {
            let name = table.name.clone();
            for field in table
                .fields
                .iter_mut()
                .filter(|f| f.name.eq_ignore_ascii_case(source))
            {
                field.foreign_key = reference.clone();
                owners.push(name.clone());
            }
        }
        if owners.len() > 1 {
            warn!(
                "Foreign key on `{}` -> {}.{} attached to {} tables: {}",
                source,
                &caps[2],
                &caps[3],
                owners.len(),
                owners.join(", ")
            );
        }
    }
}

fn attach_inserts(tables: &mut [Table], inserts: Vec<String>) {
    for insert in inserts {
        let Some(token) = insert.split_whitespace().nth(2) else { continue };
        let name = token
            .split('(')
            .next()
            .unwrap_or_default()
            .trim_matches(|c| c == '`' || c == '"');

        let mut matched = false;
        for table in tables.iter_mut().filter(|t| t.name == name) {
            table.inserts.push(insert.clone());
            matched = true;
        }
        if !matched {
            debug!("Dropped insert for unknown table {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHPMYADMIN_DUMP: &str = r#"
-- phpMyAdmin SQL Dump
SET SQL_MODE = "NO_AUTO_VALUE_ON_ZERO";

CREATE TABLE `users` (
  `id` int(11) NOT NULL,
  `email` varchar(255) NOT NULL,
  `nickname` varchar(64) DEFAULT NULL,
  `created_at` timestamp NOT NULL DEFAULT current_timestamp(),
  `score` decimal(10,2) DEFAULT '0.00'
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_general_ci;

INSERT INTO `users` (`id`, `email`, `nickname`, `created_at`, `score`) VALUES
(1, 'ann@example.com', 'ann', '2024-01-01 10:00:00', '1.50'),
(2, 'bob@example.com', NULL, '2024-01-02 10:00:00', '0.00');

CREATE TABLE `orders` (
  `id` int(11) NOT NULL,
  `user_id` int(11) NOT NULL,
  `total` double DEFAULT NULL
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;

ALTER TABLE `users`
  ADD PRIMARY KEY (`id`),
  ADD UNIQUE KEY `email` (`email`);

ALTER TABLE `orders`
  ADD PRIMARY KEY (`id`),
  ADD KEY `user_id` (`user_id`);

ALTER TABLE `users`
  MODIFY `id` int(11) NOT NULL AUTO_INCREMENT, AUTO_INCREMENT=3;

ALTER TABLE `orders`
  ADD CONSTRAINT `orders_ibfk_1` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`);
"#;

    #[test]
    fn test_parses_phpmyadmin_dump() {
        let tables = parse_dump(PHPMYADMIN_DUMP);
        assert_eq!(tables.len(), 2);

        let users = &tables[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.engine.as_deref(), Some("InnoDB"));
        assert_eq!(users.charset.as_deref(), Some("utf8mb4"));
        assert_eq!(users.primary_keys, vec!["id"]);
        assert_eq!(users.fields.len(), 5);

        let id = users.field("id").unwrap();
        assert!(id.primary_key);
        assert!(id.auto_increment);
        assert!(!id.nullable);

        let email = users.field("email").unwrap();
        assert!(email.unique);
        assert_eq!(email.data_type, "varchar(255)");

        let nickname = users.field("nickname").unwrap();
        assert!(nickname.nullable);
        assert_eq!(nickname.default.as_deref(), Some("NULL"));

        let created = users.field("created_at").unwrap();
        assert_eq!(created.default.as_deref(), Some("current_timestamp()"));

        let score = users.field("score").unwrap();
        assert_eq!(score.data_type, "decimal(10,2)");
        assert_eq!(score.default.as_deref(), Some("0.00"));

        assert_eq!(users.inserts.len(), 1);
        assert!(users.inserts[0].contains("(2, 'bob@example.com'"));

        let orders = &tables[1];
        let user_id = orders.field("user_id").unwrap();
        assert!(user_id.index);
        assert_eq!(user_id.foreign_key, ForeignKey::new("users", "id"));
        assert!(orders.inserts.is_empty());
    }

    #[test]
    fn test_parses_mysqldump_inline_keys() {
        let dump = r#"
DROP TABLE IF EXISTS `posts`;
CREATE TABLE `posts` (
  `id` bigint(20) unsigned NOT NULL AUTO_INCREMENT,
  `author_id` int(11) NOT NULL,
  `title` varchar(200) NOT NULL DEFAULT 'untitled draft',
  PRIMARY KEY (`id`),
  KEY `idx_author` (`author_id`),
  CONSTRAINT `fk_author` FOREIGN KEY (`author_id`) REFERENCES `authors` (`id`)
) ENGINE=InnoDB AUTO_INCREMENT=10 DEFAULT CHARSET=latin1;
"#;
        let tables = parse_dump(dump);
        assert_eq!(tables.len(), 1);
        let posts = &tables[0];
        assert_eq!(posts.fields.len(), 3);
        assert_eq!(posts.charset.as_deref(), Some("latin1"));
        assert!(posts.field("id").unwrap().primary_key);
        assert!(posts.field("id").unwrap().auto_increment);
        assert!(posts.field("author_id").unwrap().index);
        assert_eq!(
            posts.field("author_id").unwrap().foreign_key,
            ForeignKey::new("authors", "id")
        );
        assert_eq!(
            posts.field("title").unwrap().default.as_deref(),
            Some("untitled draft")
        );
    }

    #[test]
    fn test_primary_key_clause_before_columns() {
        let dump = "CREATE TABLE `t` (\nPRIMARY KEY (`b`, `a`),\n`a` int NOT NULL,\n`b` int NOT NULL\n);\n";
        let tables = parse_dump(dump);
        assert_eq!(tables[0].primary_keys, vec!["b", "a"]);
        assert!(tables[0].fields.iter().all(|f| f.primary_key));
    }

    #[test]
    fn test_composite_primary_key_dedupes_case_insensitively() {
        let dump = r#"
CREATE TABLE `memberships` (
  `user_id` int NOT NULL,
  `group_id` int NOT NULL
);
ALTER TABLE `memberships` ADD PRIMARY KEY (`user_id`,`group_id`);
ALTER TABLE `memberships` ADD PRIMARY KEY (`USER_ID`);
"#;
        let tables = parse_dump(dump);
        assert_eq!(tables[0].primary_keys, vec!["user_id", "group_id"]);
    }

    #[test]
    fn test_foreign_key_attaches_to_every_table_with_the_column() {
        let dump = r#"
CREATE TABLE `comments` (
  `id` int NOT NULL,
  `user_id` int NOT NULL
);
CREATE TABLE `likes` (
  `id` int NOT NULL,
  `user_id` int NOT NULL
);
ALTER TABLE `comments`
  ADD CONSTRAINT `c_user` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`);
"#;
        let tables = parse_dump(dump);
        let expected = ForeignKey::new("users", "id");
        assert_eq!(tables[0].field("user_id").unwrap().foreign_key, expected);
        assert_eq!(tables[1].field("user_id").unwrap().foreign_key, expected);
    }

    #[test]
    fn test_multiline_insert_is_joined() {
        let dump = "CREATE TABLE `t` (\n`id` int NOT NULL\n);\nINSERT INTO `t` VALUES\n(1),\n(2);\n";
        let tables = parse_dump(dump);
        assert_eq!(tables[0].inserts, vec!["INSERT INTO `t` VALUES (1), (2);"]);
    }

    #[test]
    fn test_unknown_and_unattributable_inserts_are_dropped() {
        let dump = "CREATE TABLE `t` (\n`id` int NOT NULL\n);\nINSERT INTO `other` VALUES (1);\nINSERT INTO `t`(`id`) VALUES (2);\n";
        let tables = parse_dump(dump);
        assert_eq!(tables[0].inserts, vec!["INSERT INTO `t`(`id`) VALUES (2);"]);
    }

    #[test]
    fn test_malformed_blocks_are_skipped() {
        let dump = r#"
CREATE TABLE (
  `id` int NOT NULL
);
CREATE TABLE `kept` (
  `id` int NOT NULL,
  this line is not a column
);
ALTER TABLE nothing useful here;
"#;
        let tables = parse_dump(dump);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "kept");
        assert_eq!(tables[0].fields.len(), 1);
    }

    #[test]
    fn test_single_line_alter_does_not_swallow_next_statement() {
        let dump = "CREATE TABLE `t` (\n`id` int NOT NULL\n);\nALTER TABLE `t` ADD PRIMARY KEY (`id`);\nINSERT INTO `t` VALUES (1);\n";
        let tables = parse_dump(dump);
        assert!(tables[0].field("id").unwrap().primary_key);
        assert_eq!(tables[0].inserts.len(), 1);
    }

    #[test]
    fn test_quoted_and_bit_defaults() {
        let dump = "CREATE TABLE `flags` (\n`active` bit(1) NOT NULL DEFAULT b'0',\n`label` varchar(20) DEFAULT 'it\\'s',\n`code` char(2) DEFAULT \"xy\"\n);\n";
        let flags = &parse_dump(dump)[0];
        assert_eq!(flags.field("active").unwrap().default.as_deref(), Some("b'0'"));
        assert_eq!(flags.field("label").unwrap().default.as_deref(), Some("it\\'s"));
        assert_eq!(flags.field("code").unwrap().default.as_deref(), Some("xy"));
    }

    #[tokio::test]
    async fn test_parse_file_reads_gzip_dump() {
        use async_compression::tokio::write::GzipEncoder;
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql.gz");
        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut encoder = GzipEncoder::new(file);
        encoder.write_all(PHPMYADMIN_DUMP.as_bytes()).await.unwrap();
        encoder.shutdown().await.unwrap();

        let tables = parse_file(&path).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "users");
        assert_eq!(tables[0].inserts.len(), 1);
        assert!(tables[1].field("user_id").unwrap().index);
    }

    #[tokio::test]
    async fn test_parse_file_reports_missing_file() {
        let err = parse_file(Path::new("/definitely/not/here.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Parse { .. }));
    }
}
