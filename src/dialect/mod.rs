// ABOUTME: Dialect capability interface for MariaDB and PostgreSQL
// ABOUTME: One trait, two implementations, selected once per connection

mod mariadb;
mod postgres;

pub use mariadb::MariaDbDialect;
pub use postgres::PostgresDialect;

use crate::schema::{ForeignKey, Index, TableSchema};
use serde::{Deserialize, Serialize};

/// The database engine families this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialectKind {
    MariaDb,
    Postgres,
}

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::MariaDb => &MariaDbDialect,
            DialectKind::Postgres => &PostgresDialect,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DialectKind::MariaDb => "mariadb",
            DialectKind::Postgres => "postgres",
        }
    }
}

/// One value read from a source row, ready for literal rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A session variable relaxed during bulk loads and restored afterwards.
///
/// `probe` reads the current value, `relax` loosens it, `restore` is a
/// template whose `{}` takes the probed value back.
pub struct CheckProbe {
    pub probe: &'static str,
    pub relax: &'static str,
    pub restore: &'static str,
}

/// Everything that differs between MariaDB and PostgreSQL vocabulary.
///
/// Translation is best-effort: features the target cannot represent are
/// dropped and reported through the returned warning lists, never errors.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn statement_separator(&self) -> char {
        ';'
    }

    fn quote_ident(&self, ident: &str) -> String;

    /// Session SET statements placed at the top of a dump (`includeVars`).
    fn session_setup(&self) -> Vec<String>;

    /// FK/unique-check variables to relax for the duration of an import.
    fn session_check_probes(&self) -> Vec<CheckProbe>;

    fn create_database(&self, name: &str) -> String;

    fn database_exists_query(&self, name: &str) -> String;

    fn drop_table_if_exists(&self, table: &str) -> String;

    /// Map a column type coming from `source` into this dialect.
    /// Returns the mapped type and an optional warning when something was
    /// dropped or approximated.
    fn map_column_type(
        &self,
        raw: &str,
        source: DialectKind,
        auto_increment: bool,
    ) -> (String, Option<String>);

    /// Render CREATE TABLE for a schema introspected from `source`.
    ///
    /// Foreign keys are never inlined; they are applied afterwards via
    /// [`add_foreign_key`](Dialect::add_foreign_key) so replay order never
    /// matters.
    fn create_table(
        &self,
        table: &TableSchema,
        source: DialectKind,
        if_not_exists: bool,
    ) -> (String, Vec<String>);

    fn create_index(&self, table: &str, index: &Index) -> String;

    fn add_foreign_key(&self, table: &str, fk: &ForeignKey) -> String;

    /// Render one SQL literal.
    fn render_literal(&self, value: &SqlValue) -> String;

    /// Render a bounded multi-row INSERT.
    fn insert_statement(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let tuples = rows
            .iter()
            .map(|row| {
                let vals = row
                    .iter()
                    .map(|v| self.render_literal(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", vals)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_ident(table),
            cols,
            tuples
        )
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Normalize a type string so structurally equal columns compare equal
/// across introspection spellings ("character varying(255)" vs
/// "varchar(255)", "int(11)" vs "integer").
pub fn normalize_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let (base, params) = match lowered.split_once('(') {
        Some((b, rest)) => (b.trim().to_string(), Some(rest.trim_end_matches(')').to_string())),
        None => (lowered.clone(), None),
    };
    let base = base.trim();
    let unsigned = base.ends_with(" unsigned") || lowered.ends_with(" unsigned");
    let base = base.trim_end_matches(" unsigned").trim();

    let canonical = match base {
        "int" | "integer" | "int4" | "mediumint" => "integer",
        "smallint" | "int2" => "smallint",
        "bigint" | "int8" => "bigint",
        "tinyint" => {
            if params.as_deref() == Some("1") {
                return "boolean".to_string();
            }
            "smallint"
        }
        "bool" | "boolean" => "boolean",
        "character varying" | "varchar" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "text" | "tinytext" | "mediumtext" | "longtext" => "text",
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            "bytes"
        }
        "double" | "double precision" | "float8" => "double precision",
        "float" | "real" | "float4" => "real",
        "decimal" | "numeric" => "numeric",
        "datetime" | "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "json" | "jsonb" => "json",
        other => other,
    };

    // Length parameters matter for varchar/char/numeric, nowhere else.
    match canonical {
        "varchar" | "char" | "numeric" => match params {
            Some(p) => format!("{}({})", canonical, p.replace(' ', "")),
            None => canonical.to_string(),
        },
        "integer" if unsigned => "bigint".to_string(),
        _ => canonical.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type_synonyms() {
        assert_eq!(normalize_type("INT(11)"), "integer");
        assert_eq!(normalize_type("integer"), "integer");
        assert_eq!(normalize_type("character varying(255)"), "varchar(255)");
        assert_eq!(normalize_type("VARCHAR(255)"), "varchar(255)");
        assert_eq!(normalize_type("LONGTEXT"), "text");
        assert_eq!(normalize_type("text"), "text");
        assert_eq!(normalize_type("tinyint(1)"), "boolean");
        assert_eq!(normalize_type("boolean"), "boolean");
        assert_eq!(normalize_type("double precision"), "double precision");
        assert_eq!(normalize_type("double"), "double precision");
        assert_eq!(normalize_type("bytea"), "bytes");
        assert_eq!(normalize_type("longblob"), "bytes");
        assert_eq!(normalize_type("datetime"), "timestamp");
        assert_eq!(normalize_type("timestamp without time zone"), "timestamp");
    }

    #[test]
    fn test_normalize_type_keeps_meaningful_lengths() {
        assert_eq!(normalize_type("decimal(10,2)"), "numeric(10,2)");
        assert_eq!(normalize_type("numeric(10, 2)"), "numeric(10,2)");
        assert_ne!(normalize_type("varchar(10)"), normalize_type("varchar(20)"));
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0xff]), "00abff");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_insert_statement_shared_rendering() {
        let d = DialectKind::MariaDb.dialect();
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::Text("a".into())],
            vec![SqlValue::Int(2), SqlValue::Null],
        ];
        let sql = d.insert_statement("users", &["id".into(), "name".into()], &rows);
        assert_eq!(
            sql,
            "INSERT INTO `users` (`id`, `name`) VALUES (1, 'a'), (2, NULL)"
        );
    }
}
