// ABOUTME: Schema metadata types and live-connection introspection
// ABOUTME: Produces dependency-ordered table lists for DDL emission

use crate::connect::DbConn;
use crate::dialect::DialectKind;
use crate::error::TransferError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Table metadata, database-agnostic.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Storage engine (MariaDB only).
    pub engine: Option<String>,
    /// Default charset (MariaDB only).
    pub charset: Option<String>,
    pub collation: Option<String>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Column metadata. `data_type` keeps the source dialect's raw spelling;
/// translation happens in the dialect adapter.
#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
    pub auto_increment: bool,
}

/// Secondary (non-primary-key) index.
#[derive(Debug, Clone, Serialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// Foreign key constraint.
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// Escape a string for use as a SQL literal in introspection queries.
fn sql_str(s: &str) -> String {
    s.replace('\'', "''")
}

/// Read every base table of `database`, dependency-ordered.
///
/// A table referenced by a foreign key sorts before the referencing
/// table; cycles keep name order (harmless, since FK constraints are
/// applied in a second ALTER pass after data).
pub async fn describe_tables(
    conn: &mut DbConn,
    database: &str,
) -> Result<Vec<TableSchema>, TransferError> {
    let tables = match conn.kind() {
        DialectKind::MariaDb => describe_mariadb(conn, database).await?,
        DialectKind::Postgres => describe_postgres(conn).await?,
    };
    tracing::info!("introspected {} table(s) from '{}'", tables.len(), database);
    Ok(order_by_dependencies(tables))
}

/// Read a single table's schema, if it exists.
pub async fn describe_table(
    conn: &mut DbConn,
    database: &str,
    table: &str,
) -> Result<Option<TableSchema>, TransferError> {
    let tables = describe_tables(conn, database).await?;
    Ok(tables.into_iter().find(|t| t.name == table))
}

async fn describe_mariadb(
    conn: &mut DbConn,
    database: &str,
) -> Result<Vec<TableSchema>, TransferError> {
    let db = sql_str(database);
    let table_rows = conn
        .query_strings(&format!(
            "SELECT TABLE_NAME, ENGINE, TABLE_COLLATION \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
            db
        ))
        .await?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in table_rows {
        let name = match row.first().cloned().flatten() {
            Some(n) => n,
            None => continue,
        };
        let engine = row.get(1).cloned().flatten();
        let collation = row.get(2).cloned().flatten();
        let charset = collation
            .as_deref()
            .and_then(|c| c.split('_').next())
            .map(|c| c.to_string());
        let t = sql_str(&name);

        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        let column_rows = conn
            .query_strings(&format!(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA, COLUMN_KEY \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
                 ORDER BY ORDINAL_POSITION",
                db, t
            ))
            .await?;
        for col in column_rows {
            let col_name = col.first().cloned().flatten().unwrap_or_default();
            let extra = col.get(4).cloned().flatten().unwrap_or_default();
            if col.get(5).cloned().flatten().as_deref() == Some("PRI") {
                primary_key.push(col_name.clone());
            }
            columns.push(Column {
                name: col_name,
                data_type: col.get(1).cloned().flatten().unwrap_or_default(),
                is_nullable: col.get(2).cloned().flatten().as_deref() == Some("YES"),
                default: col.get(3).cloned().flatten(),
                auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
            });
        }

        let index_rows = conn
            .query_strings(&format!(
                "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' AND INDEX_NAME <> 'PRIMARY' \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                db, t
            ))
            .await?;
        let mut indexes: BTreeMap<String, Index> = BTreeMap::new();
        for row in index_rows {
            let idx_name = row.first().cloned().flatten().unwrap_or_default();
            let col = row.get(1).cloned().flatten().unwrap_or_default();
            let unique = row.get(2).cloned().flatten().as_deref() == Some("0");
            indexes
                .entry(idx_name.clone())
                .or_insert_with(|| Index {
                    name: idx_name,
                    columns: Vec::new(),
                    is_unique: unique,
                })
                .columns
                .push(col);
        }

        let fk_rows = conn
            .query_strings(&format!(
                "SELECT k.CONSTRAINT_NAME, k.COLUMN_NAME, k.REFERENCED_TABLE_NAME, \
                        k.REFERENCED_COLUMN_NAME, r.DELETE_RULE, r.UPDATE_RULE \
                 FROM information_schema.KEY_COLUMN_USAGE k \
                 JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
                   ON k.CONSTRAINT_NAME = r.CONSTRAINT_NAME \
                  AND k.CONSTRAINT_SCHEMA = r.CONSTRAINT_SCHEMA \
                 WHERE k.TABLE_SCHEMA = '{}' AND k.TABLE_NAME = '{}' \
                   AND k.REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
                db, t
            ))
            .await?;
        let foreign_keys = collect_foreign_keys(fk_rows);

        tables.push(TableSchema {
            name,
            columns,
            primary_key,
            indexes: indexes.into_values().collect(),
            foreign_keys,
            engine,
            charset,
            collation,
        });
    }
    Ok(tables)
}

/// Columns of a parsed `CREATE INDEX` definition, e.g.
/// `CREATE UNIQUE INDEX x ON public.t USING btree (a, b)` -> [a, b].
static RE_INDEX_COLUMNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]*)\)\s*$").unwrap());

async fn describe_postgres(conn: &mut DbConn) -> Result<Vec<TableSchema>, TransferError> {
    let table_rows = conn
        .query_strings(
            "SELECT c.relname \
             FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = 'public' AND c.relkind = 'r' \
             ORDER BY c.relname",
        )
        .await?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in table_rows {
        let name = match row.first().cloned().flatten() {
            Some(n) => n,
            None => continue,
        };
        let t = sql_str(&name);

        let column_rows = conn
            .query_strings(&format!(
                "SELECT a.attname, \
                        pg_catalog.format_type(a.atttypid, a.atttypmod), \
                        a.attnotnull, \
                        pg_catalog.pg_get_expr(d.adbin, d.adrelid), \
                        (a.attidentity <> '' OR \
                         COALESCE(pg_catalog.pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%') \
                 FROM pg_catalog.pg_attribute a \
                 JOIN pg_catalog.pg_class c ON a.attrelid = c.oid \
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid \
                 LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum \
                 WHERE n.nspname = 'public' AND c.relname = '{}' \
                   AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY a.attnum",
                t
            ))
            .await?;
        let mut columns = Vec::new();
        for col in column_rows {
            let auto_increment = col.get(4).cloned().flatten().as_deref() == Some("t");
            columns.push(Column {
                name: col.first().cloned().flatten().unwrap_or_default(),
                data_type: col.get(1).cloned().flatten().unwrap_or_default(),
                is_nullable: col.get(2).cloned().flatten().as_deref() != Some("t"),
                // Identity/serial defaults are machinery, not data defaults.
                default: if auto_increment {
                    None
                } else {
                    col.get(3).cloned().flatten()
                },
                auto_increment,
            });
        }

        let pk_rows = conn
            .query_strings(&format!(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = '{}' \
                   AND tc.constraint_type = 'PRIMARY KEY' \
                 ORDER BY kcu.ordinal_position",
                t
            ))
            .await?;
        let primary_key: Vec<String> = pk_rows
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .collect();

        let index_rows = conn
            .query_strings(&format!(
                "SELECT indexname, indexdef FROM pg_catalog.pg_indexes \
                 WHERE schemaname = 'public' AND tablename = '{}' \
                 ORDER BY indexname",
                t
            ))
            .await?;
        let mut indexes = Vec::new();
        for row in index_rows {
            let idx_name = row.first().cloned().flatten().unwrap_or_default();
            let def = row.get(1).cloned().flatten().unwrap_or_default();
            // The primary key's backing index is covered by the PK clause.
            if idx_name.ends_with("_pkey") {
                continue;
            }
            let columns: Vec<String> = RE_INDEX_COLUMNS
                .captures(&def)
                .and_then(|c| c.get(1))
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|c| c.trim().trim_matches('"').to_string())
                        .collect()
                })
                .unwrap_or_default();
            if columns.is_empty() {
                continue;
            }
            indexes.push(Index {
                name: idx_name,
                columns,
                is_unique: def.contains("UNIQUE INDEX"),
            });
        }

        let fk_rows = conn
            .query_strings(&format!(
                "SELECT tc.constraint_name, kcu.column_name, ccu.table_name, ccu.column_name, \
                        rc.delete_rule, rc.update_rule \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.table_schema = tc.table_schema \
                 JOIN information_schema.referential_constraints rc \
                   ON rc.constraint_name = tc.constraint_name \
                  AND rc.constraint_schema = tc.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = '{}' \
                   AND tc.constraint_type = 'FOREIGN KEY' \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                t
            ))
            .await?;
        let foreign_keys = collect_foreign_keys(fk_rows);

        tables.push(TableSchema {
            name,
            columns,
            primary_key,
            indexes,
            foreign_keys,
            engine: None,
            charset: None,
            collation: None,
        });
    }
    Ok(tables)
}

fn collect_foreign_keys(rows: Vec<Vec<Option<String>>>) -> Vec<ForeignKey> {
    let mut fks: BTreeMap<String, ForeignKey> = BTreeMap::new();
    for row in rows {
        let name = row.first().cloned().flatten().unwrap_or_default();
        let column = row.get(1).cloned().flatten().unwrap_or_default();
        let ref_table = row.get(2).cloned().flatten().unwrap_or_default();
        let ref_column = row.get(3).cloned().flatten().unwrap_or_default();
        let on_delete = row.get(4).cloned().flatten().filter(is_meaningful_rule);
        let on_update = row.get(5).cloned().flatten().filter(is_meaningful_rule);
        let fk = fks.entry(name.clone()).or_insert_with(|| ForeignKey {
            name,
            columns: Vec::new(),
            ref_table,
            ref_columns: Vec::new(),
            on_delete,
            on_update,
        });
        fk.columns.push(column);
        fk.ref_columns.push(ref_column);
    }
    fks.into_values().collect()
}

fn is_meaningful_rule(rule: &String) -> bool {
    !rule.eq_ignore_ascii_case("RESTRICT") && !rule.eq_ignore_ascii_case("NO ACTION")
}

/// Topologically sort tables so FK-referenced tables come first.
///
/// Deterministic: ties and cycle members resolve alphabetically.
pub fn order_by_dependencies(tables: Vec<TableSchema>) -> Vec<TableSchema> {
    let names: HashSet<String> = tables.iter().map(|t| t.name.clone()).collect();
    let mut by_name: HashMap<String, TableSchema> = HashMap::new();
    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for table in tables {
        let wanted: BTreeSet<String> = table
            .foreign_keys
            .iter()
            .map(|fk| fk.ref_table.clone())
            .filter(|r| *r != table.name && names.contains(r))
            .collect();
        deps.insert(table.name.clone(), wanted);
        by_name.insert(table.name.clone(), table);
    }

    let mut ordered = Vec::with_capacity(by_name.len());
    while !deps.is_empty() {
        let next = deps
            .iter()
            .find(|(_, wanted)| wanted.is_empty())
            .map(|(name, _)| name.clone());
        match next {
            Some(name) => {
                deps.remove(&name);
                for wanted in deps.values_mut() {
                    wanted.remove(&name);
                }
                ordered.push(name);
            }
            None => {
                // Cycle: emit the remainder in name order; their FKs are
                // added in the second DDL pass anyway.
                ordered.extend(deps.keys().cloned());
                break;
            }
        }
    }

    ordered
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, refs: &[&str]) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: vec![],
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: refs
                .iter()
                .map(|r| ForeignKey {
                    name: format!("fk_{}_{}", name, r),
                    columns: vec!["x".to_string()],
                    ref_table: r.to_string(),
                    ref_columns: vec!["id".to_string()],
                    on_delete: None,
                    on_update: None,
                })
                .collect(),
            engine: None,
            charset: None,
            collation: None,
        }
    }

    fn names(tables: &[TableSchema]) -> Vec<&str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_referenced_table_sorts_first() {
        let ordered = order_by_dependencies(vec![table("orders", &["users"]), table("users", &[])]);
        assert_eq!(names(&ordered), vec!["users", "orders"]);
    }

    #[test]
    fn test_chain_ordering() {
        let ordered = order_by_dependencies(vec![
            table("c", &["b"]),
            table("a", &[]),
            table("b", &["a"]),
        ]);
        assert_eq!(names(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_tables_alphabetical() {
        let ordered = order_by_dependencies(vec![table("zeta", &[]), table("alpha", &[])]);
        assert_eq!(names(&ordered), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_cycle_falls_back_to_name_order() {
        let ordered = order_by_dependencies(vec![
            table("b", &["a"]),
            table("a", &["b"]),
            table("standalone", &[]),
        ]);
        assert_eq!(names(&ordered), vec!["standalone", "a", "b"]);
    }

    #[test]
    fn test_self_reference_ignored() {
        let ordered = order_by_dependencies(vec![table("employees", &["employees"])]);
        assert_eq!(names(&ordered), vec!["employees"]);
    }

    #[test]
    fn test_fk_to_table_outside_set_ignored() {
        // A filtered export may exclude the referenced table.
        let ordered = order_by_dependencies(vec![table("orders", &["users"])]);
        assert_eq!(names(&ordered), vec!["orders"]);
    }

    #[test]
    fn test_collect_foreign_keys_groups_composite_columns() {
        let rows = vec![
            vec![
                Some("fk_a".to_string()),
                Some("x1".to_string()),
                Some("parent".to_string()),
                Some("id1".to_string()),
                Some("CASCADE".to_string()),
                Some("NO ACTION".to_string()),
            ],
            vec![
                Some("fk_a".to_string()),
                Some("x2".to_string()),
                Some("parent".to_string()),
                Some("id2".to_string()),
                Some("CASCADE".to_string()),
                Some("NO ACTION".to_string()),
            ],
        ];
        let fks = collect_foreign_keys(rows);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["x1", "x2"]);
        assert_eq!(fks[0].ref_columns, vec!["id1", "id2"]);
        assert_eq!(fks[0].on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(fks[0].on_update, None);
    }

    #[test]
    fn test_index_columns_regex() {
        let def = "CREATE UNIQUE INDEX idx_users_email ON public.users USING btree (email)";
        let caps = RE_INDEX_COLUMNS.captures(def).unwrap();
        assert_eq!(&caps[1], "email");

        let def2 = "CREATE INDEX i ON public.t USING btree (a, \"B\")";
        let caps2 = RE_INDEX_COLUMNS.captures(def2).unwrap();
        let cols: Vec<&str> = caps2[1].split(',').map(|c| c.trim().trim_matches('"')).collect();
        assert_eq!(cols, vec!["a", "B"]);
    }
}
