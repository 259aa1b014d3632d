// ABOUTME: MariaDB dialect implementation
// ABOUTME: Backtick quoting, AUTO_INCREMENT, ENGINE/charset table options

use super::{hex_encode, CheckProbe, Dialect, DialectKind, SqlValue};
use crate::schema::{ForeignKey, Index, TableSchema};
use once_cell::sync::Lazy;
use regex::Regex;

/// Strips PostgreSQL `::type` casts from default expressions.
static RE_PG_CAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"::[A-Za-z_][A-Za-z0-9_ ]*(\([^)]*\))?").unwrap());

pub struct MariaDbDialect;

impl MariaDbDialect {
    fn translate_default(&self, raw: &str, source: DialectKind) -> Option<String> {
        let mut text = raw.trim().to_string();
        if source == DialectKind::Postgres {
            if text.to_ascii_lowercase().starts_with("nextval(") {
                return None;
            }
            text = RE_PG_CAST.replace_all(&text, "").to_string();
            if text.eq_ignore_ascii_case("now()") {
                text = "CURRENT_TIMESTAMP".to_string();
            }
        }
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(text)
        }
    }
}

impl Dialect for MariaDbDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MariaDb
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn session_setup(&self) -> Vec<String> {
        vec![
            "SET NAMES utf8mb4".to_string(),
            "SET FOREIGN_KEY_CHECKS=0".to_string(),
            "SET UNIQUE_CHECKS=0".to_string(),
            "SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO'".to_string(),
        ]
    }

    fn session_check_probes(&self) -> Vec<CheckProbe> {
        vec![
            CheckProbe {
                probe: "SELECT @@foreign_key_checks",
                relax: "SET FOREIGN_KEY_CHECKS=0",
                restore: "SET FOREIGN_KEY_CHECKS={}",
            },
            CheckProbe {
                probe: "SELECT @@unique_checks",
                relax: "SET UNIQUE_CHECKS=0",
                restore: "SET UNIQUE_CHECKS={}",
            },
        ]
    }

    fn create_database(&self, name: &str) -> String {
        format!("CREATE DATABASE IF NOT EXISTS {}", self.quote_ident(name))
    }

    fn database_exists_query(&self, name: &str) -> String {
        format!(
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = '{}'",
            name
        )
    }

    fn drop_table_if_exists(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_ident(table))
    }

    fn map_column_type(
        &self,
        raw: &str,
        source: DialectKind,
        _auto_increment: bool,
    ) -> (String, Option<String>) {
        if source == DialectKind::MariaDb {
            return (raw.to_string(), None);
        }
        let lowered = raw.trim().to_ascii_lowercase();
        let (base, params) = match lowered.split_once('(') {
            Some((b, rest)) => (b.trim(), Some(rest.trim_end_matches(')'))),
            None => (lowered.as_str(), None),
        };
        let mapped = match base {
            "smallint" | "int2" => ("SMALLINT".to_string(), None),
            "integer" | "int" | "int4" => ("INT".to_string(), None),
            "bigint" | "int8" => ("BIGINT".to_string(), None),
            "boolean" | "bool" => ("TINYINT(1)".to_string(), None),
            "real" | "float4" => ("FLOAT".to_string(), None),
            "double precision" | "float8" => ("DOUBLE".to_string(), None),
            "numeric" | "decimal" => match params {
                Some(p) => (format!("DECIMAL({})", p), None),
                None => ("DECIMAL(65,30)".to_string(), None),
            },
            "character varying" | "varchar" => match params {
                Some(p) => (format!("VARCHAR({})", p), None),
                None => ("LONGTEXT".to_string(), None),
            },
            "character" | "char" | "bpchar" => match params {
                Some(p) => (format!("CHAR({})", p), None),
                None => ("CHAR(1)".to_string(), None),
            },
            "text" => ("LONGTEXT".to_string(), None),
            "bytea" => ("LONGBLOB".to_string(), None),
            "date" => ("DATE".to_string(), None),
            "time" | "time without time zone" => ("TIME".to_string(), None),
            "timestamp" | "timestamp without time zone" => ("DATETIME".to_string(), None),
            "timestamptz" | "timestamp with time zone" => (
                "DATETIME".to_string(),
                Some(format!("time zone of '{}' dropped for MariaDB", raw.trim())),
            ),
            "json" | "jsonb" => ("JSON".to_string(), None),
            "uuid" => (
                "CHAR(36)".to_string(),
                Some("UUID stored as CHAR(36) on MariaDB".to_string()),
            ),
            "interval" => (
                "VARCHAR(64)".to_string(),
                Some("INTERVAL stored as VARCHAR(64) on MariaDB".to_string()),
            ),
            _ => (raw.trim().to_string(), None),
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
            if !col.is_nullable || col.auto_increment {
                line.push_str(" NOT NULL");
            }
            if col.auto_increment {
                line.push_str(" AUTO_INCREMENT");
            } else if let Some(default) = col
                .default
                .as_deref()
                .and_then(|d| self.translate_default(d, source))
            {
                line.push_str(&format!(" DEFAULT {}", default));
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

        let mut options = String::from(" ENGINE=InnoDB");
        if source == DialectKind::MariaDb {
            if let Some(charset) = &table.charset {
                options.push_str(&format!(" DEFAULT CHARSET={}", charset));
            }
            if let Some(collation) = &table.collation {
                options.push_str(&format!(" COLLATE={}", collation));
            }
        }

        let head = if if_not_exists {
            format!("CREATE TABLE IF NOT EXISTS {} (\n", self.quote_ident(&table.name))
        } else {
            format!("CREATE TABLE {} (\n", self.quote_ident(&table.name))
        };
        let ddl = format!("{}{}\n){}", head, lines.join(",\n"), options);
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
                } else {
                    // MariaDB has no literal for NaN/inf.
                    "NULL".to_string()
                }
            }
            SqlValue::Text(s) => {
                format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
            }
            SqlValue::Bytes(b) => format!("X'{}'", hex_encode(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn column(name: &str, ty: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: ty.to_string(),
            is_nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    #[test]
    fn test_quote_ident_escapes_backticks() {
        let d = MariaDbDialect;
        assert_eq!(d.quote_ident("users"), "`users`");
        assert_eq!(d.quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_postgres_types_mapped() {
        let d = MariaDbDialect;
        let (ty, _) = d.map_column_type("integer", DialectKind::Postgres, false);
        assert_eq!(ty, "INT");
        let (ty, _) = d.map_column_type("boolean", DialectKind::Postgres, false);
        assert_eq!(ty, "TINYINT(1)");
        let (ty, _) = d.map_column_type("text", DialectKind::Postgres, false);
        assert_eq!(ty, "LONGTEXT");
        let (ty, _) = d.map_column_type("bytea", DialectKind::Postgres, false);
        assert_eq!(ty, "LONGBLOB");
        let (ty, warn) = d.map_column_type("timestamp with time zone", DialectKind::Postgres, false);
        assert_eq!(ty, "DATETIME");
        assert!(warn.is_some());
    }

    #[test]
    fn test_same_dialect_types_pass_through() {
        let d = MariaDbDialect;
        let (ty, warn) = d.map_column_type("mediumint(9) unsigned", DialectKind::MariaDb, false);
        assert_eq!(ty, "mediumint(9) unsigned");
        assert!(warn.is_none());
    }

    #[test]
    fn test_create_table_auto_increment_and_pk() {
        let d = MariaDbDialect;
        let mut id = column("id", "int(11)");
        id.is_nullable = false;
        id.auto_increment = true;
        let table = TableSchema {
            name: "users".to_string(),
            columns: vec![id, column("name", "varchar(100)")],
            primary_key: vec!["id".to_string()],
            indexes: vec![],
            foreign_keys: vec![],
            engine: Some("InnoDB".to_string()),
            charset: Some("utf8mb4".to_string()),
            collation: None,
        };
        let (ddl, warnings) = d.create_table(&table, DialectKind::MariaDb, false);
        assert!(warnings.is_empty());
        assert!(ddl.contains("`id` int(11) NOT NULL AUTO_INCREMENT"));
        assert!(ddl.contains("PRIMARY KEY (`id`)"));
        assert!(ddl.contains("ENGINE=InnoDB"));
        assert!(ddl.contains("DEFAULT CHARSET=utf8mb4"));
        assert!(!ddl.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_foreign_key_rendered_as_alter() {
        let d = MariaDbDialect;
        let fk = ForeignKey {
            name: "fk_orders_user".to_string(),
            columns: vec!["user_id".to_string()],
            ref_table: "users".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: Some("CASCADE".to_string()),
            on_update: None,
        };
        let sql = d.add_foreign_key("orders", &fk);
        assert_eq!(
            sql,
            "ALTER TABLE `orders` ADD CONSTRAINT `fk_orders_user` FOREIGN KEY (`user_id`) \
             REFERENCES `users` (`id`) ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_literals() {
        let d = MariaDbDialect;
        assert_eq!(d.render_literal(&SqlValue::Null), "NULL");
        assert_eq!(d.render_literal(&SqlValue::Int(-5)), "-5");
        assert_eq!(
            d.render_literal(&SqlValue::Text("it's a \\ path".to_string())),
            "'it''s a \\\\ path'"
        );
        assert_eq!(
            d.render_literal(&SqlValue::Bytes(vec![0xde, 0xad])),
            "X'dead'"
        );
        assert_eq!(d.render_literal(&SqlValue::Float(f64::NAN)), "NULL");
    }
}
