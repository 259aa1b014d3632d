// ABOUTME: PostgreSQL dialect implementation
// ABOUTME: Double-quote quoting, identity columns, ENGINE/charset dropped with warnings

use super::{hex_encode, CheckProbe, Dialect, DialectKind, SqlValue};
use crate::schema::{ForeignKey, Index, TableSchema};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_ENUM_OR_SET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(enum|set)\(").unwrap());

pub struct PostgresDialect;

impl PostgresDialect {
    fn translate_default(&self, raw: &str, source: DialectKind) -> Option<String> {
        let text = raw.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return None;
        }
        if source == DialectKind::MariaDb {
            if text.eq_ignore_ascii_case("current_timestamp")
                || text.eq_ignore_ascii_case("current_timestamp()")
                || text.eq_ignore_ascii_case("now()")
            {
                return Some("CURRENT_TIMESTAMP".to_string());
            }
        }
        Some(text.to_string())
    }

    /// Whether an identity clause can hang off the mapped type.
    fn identity_capable(ty: &str) -> bool {
        matches!(
            ty.to_ascii_lowercase().as_str(),
            "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8"
        )
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn session_setup(&self) -> Vec<String> {
        vec![
            "SET client_encoding = 'UTF8'".to_string(),
            "SET standard_conforming_strings = on".to_string(),
            "SET session_replication_role = replica".to_string(),
        ]
    }

    fn session_check_probes(&self) -> Vec<CheckProbe> {
        vec![CheckProbe {
            probe: "SHOW session_replication_role",
            relax: "SET session_replication_role = replica",
            restore: "SET session_replication_role = {}",
        }]
    }

    fn create_database(&self, name: &str) -> String {
        format!("CREATE DATABASE {}", self.quote_ident(name))
    }

    fn database_exists_query(&self, name: &str) -> String {
        format!(
            "SELECT 1 FROM pg_catalog.pg_database WHERE datname = '{}'",
            name
        )
    }

    fn drop_table_if_exists(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", self.quote_ident(table))
    }

    fn map_column_type(
        &self,
        raw: &str,
        source: DialectKind,
        _auto_increment: bool,
    ) -> (String, Option<String>) {
        if source == DialectKind::Postgres {
            return (raw.to_string(), None);
        }
        let trimmed = raw.trim();
        if RE_ENUM_OR_SET.is_match(trimmed) {
            return (
                "TEXT".to_string(),
                Some(format!("'{}' flattened to TEXT on PostgreSQL", trimmed)),
            );
        }
        let lowered = trimmed.to_ascii_lowercase();
        let unsigned = lowered.contains("unsigned");
        let (base, params) = match lowered.split_once('(') {
            Some((b, rest)) => (
                b.trim().to_string(),
                Some(
                    rest.split_once(')')
                        .map(|(p, _)| p.to_string())
                        .unwrap_or_default(),
                ),
            ),
            None => (
                lowered.trim_end_matches(" unsigned").trim().to_string(),
                None,
            ),
        };
        let mapped = match base.as_str() {
            "tinyint" => {
                if params.as_deref() == Some("1") {
                    ("BOOLEAN".to_string(), None)
                } else {
                    ("SMALLINT".to_string(), None)
                }
            }
            "smallint" => {
                if unsigned {
                    ("INTEGER".to_string(), None)
                } else {
                    ("SMALLINT".to_string(), None)
                }
            }
            "mediumint" => ("INTEGER".to_string(), None),
            "int" | "integer" => {
                if unsigned {
                    ("BIGINT".to_string(), None)
                } else {
                    ("INTEGER".to_string(), None)
                }
            }
            "bigint" => {
                if unsigned {
                    (
                        "NUMERIC(20,0)".to_string(),
                        Some("BIGINT UNSIGNED widened to NUMERIC(20,0)".to_string()),
                    )
                } else {
                    ("BIGINT".to_string(), None)
                }
            }
            "float" => ("REAL".to_string(), None),
            "double" | "double precision" | "real" => ("DOUBLE PRECISION".to_string(), None),
            "decimal" | "numeric" => match params {
                Some(p) => (format!("NUMERIC({})", p), None),
                None => ("NUMERIC".to_string(), None),
            },
            "varchar" | "character varying" => match params {
                Some(p) => (format!("VARCHAR({})", p), None),
                None => ("TEXT".to_string(), None),
            },
            "char" | "character" => match params {
                Some(p) => (format!("CHAR({})", p), None),
                None => ("CHAR(1)".to_string(), None),
            },
            "tinytext" | "text" | "mediumtext" | "longtext" => ("TEXT".to_string(), None),
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                ("BYTEA".to_string(), None)
            }
            "datetime" | "timestamp" => ("TIMESTAMP".to_string(), None),
            "date" => ("DATE".to_string(), None),
            "time" => ("TIME".to_string(), None),
            "year" => (
                "SMALLINT".to_string(),
                Some("YEAR stored as SMALLINT on PostgreSQL".to_string()),
            ),
            "json" => ("JSONB".to_string(), None),
            "bit" => {
                if params.as_deref() == Some("1") {
                    ("BOOLEAN".to_string(), None)
                } else {
                    ("BIT VARYING".to_string(), None)
                }
            }
            _ => (trimmed.to_string(), None),
        };
        mapped
    }

    fn create_table(
        &self,
        table: &TableSchema,
        source: DialectKind,
        if_not_exists: bool,
    ) -> (String, Vec<String>) {
        let mut warnings = Vec::new();
        let mut lines = Vec::with_capacity(table.columns.len() + 1);

        for col in &table.columns {
            let (ty, warning) = self.map_column_type(&col.data_type, source, col.auto_increment);
            if let Some(w) = warning {
                warnings.push(format!("{}.{}: {}", table.name, col.name, w));
            }
            let mut line = format!("  {} {}", self.quote_ident(&col.name), ty);
            if col.auto_increment {
                if Self::identity_capable(&ty) {
                    line.push_str(" GENERATED BY DEFAULT AS IDENTITY");
                } else {
                    warnings.push(format!(
                        "{}.{}: auto-increment dropped (type {} cannot be an identity column)",
                        table.name, col.name, ty
                    ));
                }
            }
            if !col.is_nullable || col.auto_increment {
                line.push_str(" NOT NULL");
            }
            if !col.auto_increment {
                if let Some(default) = col
                    .default
                    .as_deref()
                    .and_then(|d| self.translate_default(d, source))
                {
                    line.push_str(&format!(" DEFAULT {}", default));
                }
            }
            lines.push(line);
        }

        if !table.primary_key.is_empty() {
            let cols = table
                .primary_key
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  PRIMARY KEY ({})", cols));
        }

        if source == DialectKind::MariaDb {
            if let Some(engine) = &table.engine {
                warnings.push(format!(
                    "{}: table option ENGINE={} dropped for PostgreSQL",
                    table.name, engine
                ));
            }
            if let Some(charset) = &table.charset {
                warnings.push(format!(
                    "{}: charset {} has no table-level equivalent on PostgreSQL (database ENCODING applies); dropped",
                    table.name, charset
                ));
            }
        }

        let head = if if_not_exists {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n",
                self.quote_ident(&table.name)
            )
        } else {
            format!("CREATE TABLE {} (\n", self.quote_ident(&table.name))
        };
        let ddl = format!("{}{}\n)", head, lines.join(",\n"));
        (ddl, warnings)
    }

    fn create_index(&self, table: &str, index: &Index) -> String {
        let cols = index
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let unique = if index.is_unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote_ident(&index.name),
            self.quote_ident(table),
            cols
        )
    }

    fn add_foreign_key(&self, table: &str, fk: &ForeignKey) -> String {
        let cols = fk
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let ref_cols = fk
            .ref_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_ident(table),
            self.quote_ident(&fk.name),
            cols,
            self.quote_ident(&fk.ref_table),
            ref_cols
        );
        if let Some(rule) = &fk.on_delete {
            sql.push_str(&format!(" ON DELETE {}", rule));
        }
        if let Some(rule) = &fk.on_update {
            sql.push_str(&format!(" ON UPDATE {}", rule));
        }
        sql
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::UInt(u) => u.to_string(),
            SqlValue::Float(f) => {
                if f.is_finite() {
                    f.to_string()
                } else if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_sign_positive() {
                    "'Infinity'".to_string()
                } else {
                    "'-Infinity'".to_string()
                }
            }
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => format!("'\\x{}'", hex_encode(b)),
        }
    }
}
