// ABOUTME: Merge of several source databases into one destination
// ABOUTME: Per-table conflict resolution: skip, replace, append or rename

use crate::connect::DbConn;
use crate::dialect::{normalize_type, DialectKind};
use crate::error::{TransferError, TransferFailure};
use crate::executor::SessionChecksGuard;
use crate::options::MergeOptions;
use crate::progress::Stats;
use crate::schema::{self, TableSchema};
use crate::utils::{ensure_distinct, validate_identifier};
use std::collections::HashMap;
use std::time::Instant;

/// What to do about a table name collision during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Leave the target table untouched; exclude it from this source.
    Skip,
    /// Drop the target table and recreate it from the current source.
    Replace,
    /// Insert this source's rows into the existing table; schemas must
    /// match structurally.
    Append,
    /// Create the table as `<name>_<source database>` instead.
    Rename,
}

impl ConflictAction {
    pub fn from_name(name: &str) -> Option<ConflictAction> {
        match name.to_ascii_lowercase().as_str() {
            "skip" => Some(ConflictAction::Skip),
            "replace" => Some(ConflictAction::Replace),
            "append" => Some(ConflictAction::Append),
            "rename" => Some(ConflictAction::Rename),
            _ => None,
        }
    }
}

/// Pure decision function: (table, source database, existing target
/// schema) -> action. Supplied up front by the caller so it can be a
/// prompt, a fixed policy or a test table; the engine caches the result
/// per (table, source) pair for the whole merge, so repeated inputs can
/// never diverge within one run.
pub type ConflictDecider =
    Box<dyn Fn(&str, &str, Option<&TableSchema>) -> ConflictAction + Send + Sync>;

/// Merge the declared sources into the destination, in caller order.
pub async fn merge(opts: &MergeOptions) -> Result<Stats, TransferFailure> {
    let started = Instant::now();
    let mut stats = Stats::default();
    let result = run_merge(opts, &mut stats).await;
    stats.duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(
                "merge finished: {} source(s), {} table(s), {} row(s) in {:?}",
                opts.sources.len(),
                stats.tables_transferred,
                stats.rows_transferred,
                stats.duration
            );
            Ok(stats)
        }
        Err(error) => Err(TransferFailure::new(error, stats)),
    }
}

async fn run_merge(opts: &MergeOptions, stats: &mut Stats) -> Result<(), TransferError> {
    if opts.sources.is_empty() {
        return Err(TransferError::InvalidOptions(
            "merge needs at least one source database".to_string(),
        ));
    }
    validate_identifier(&opts.destination.database)?;
    for source in &opts.sources {
        validate_identifier(&source.database)?;
        ensure_distinct(source, &opts.destination)?;
    }

    let mut dest = DbConn::connect(&opts.destination).await?;
    let mut target_tables: HashMap<String, TableSchema> =
        schema::describe_tables(&mut dest, &opts.destination.database)
            .await?
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();

    let guard = SessionChecksGuard::disable(&mut dest).await?;
    let result = merge_sources(opts, &mut dest, &mut target_tables, stats).await;
    let restore_result = guard.restore(&mut dest).await;
    dest.disconnect().await;
    result?;
    restore_result
}

async fn merge_sources(
    opts: &MergeOptions,
    dest: &mut DbConn,
    target_tables: &mut HashMap<String, TableSchema>,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let mut decisions: HashMap<(String, String), ConflictAction> = HashMap::new();

    for source_cfg in &opts.sources {
        tracing::info!("merging source database '{}'", source_cfg.database);
        let mut source = DbConn::connect(source_cfg).await?;
        let src_kind = source.kind();
        let tables = schema::describe_tables(&mut source, &source_cfg.database).await?;
        let mut created: Vec<TableSchema> = Vec::new();

        for table in &tables {
            if opts.pipeline.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let action = match target_tables.get(&table.name) {
                None => None,
                Some(existing) => {
                    let key = (table.name.clone(), source_cfg.database.clone());
                    let action = match decisions.get(&key) {
                        Some(action) => *action,
                        None => {
                            let action =
                                (opts.decide)(&table.name, &source_cfg.database, Some(existing));
                            decisions.insert(key, action);
                            action
                        }
                    };
                    Some(action)
                }
            };

            match action {
                None => {
                    // No collision: plain create and copy.
                    if create_and_copy(&mut source, dest, table, &table.name, src_kind, opts, stats)
                        .await?
                    {
                        target_tables.insert(table.name.clone(), table.clone());
                        created.push(table.clone());
                    }
                }
                Some(ConflictAction::Skip) => {
                    tracing::info!(
                        "skipping table '{}' from '{}'",
                        table.name,
                        source_cfg.database
                    );
                }
                Some(ConflictAction::Replace) => {
                    let drop = dest.dialect().drop_table_if_exists(&table.name);
                    dest.execute(&drop).await?;
                    stats.statements_executed += 1;
                    if create_and_copy(&mut source, dest, table, &table.name, src_kind, opts, stats)
                        .await?
                    {
                        target_tables.insert(table.name.clone(), table.clone());
                        created.push(table.clone());
                    }
                }
                Some(ConflictAction::Append) => {
                    let existing = target_tables
                        .get(&table.name)
                        .cloned()
                        .unwrap_or_else(|| table.clone());
                    if let Err(mismatch) = check_append_compatible(&existing, table) {
                        // Fatal for this table, not for the merge.
                        stats.errors_skipped += 1;
                        opts.pipeline.events.warning(format!(
                            "cannot append '{}' from '{}': {}",
                            table.name, source_cfg.database, mismatch
                        ));
                        continue;
                    }
                    super::copy_rows(
                        &mut source,
                        dest,
                        table,
                        &table.name,
                        None,
                        &opts.pipeline,
                        stats,
                    )
                    .await?;
                    stats.tables_transferred += 1;
                }
                Some(ConflictAction::Rename) => {
                    // Unique per source, so later iterations never
                    // re-collide on the synthesized name.
                    let new_name = format!("{}_{}", table.name, source_cfg.database);
                    if create_and_copy(&mut source, dest, table, &new_name, src_kind, opts, stats)
                        .await?
                    {
                        let renamed = retarget(table, &new_name);
                        target_tables.insert(new_name, renamed.clone());
                        created.push(renamed);
                    }
                }
            }
        }

        // Constraint pass for tables created from this source. Merged
        // targets may legitimately lack a referenced table (skipped or
        // renamed), so failures downgrade to warnings.
        for table in &created {
            for fk in &table.foreign_keys {
                if !target_tables.contains_key(&fk.ref_table) {
                    opts.pipeline.events.warning(format!(
                        "foreign key '{}' on '{}' skipped: referenced table '{}' not present in target",
                        fk.name, table.name, fk.ref_table
                    ));
                    continue;
                }
                let sql = dest.dialect().add_foreign_key(&table.name, fk);
                match dest.execute(&sql).await {
                    Ok(()) => stats.statements_executed += 1,
                    Err(error) => opts.pipeline.events.warning(format!(
                        "could not add foreign key '{}' to '{}': {}",
                        fk.name, table.name, error
                    )),
                }
            }
        }

        source.disconnect().await;
    }
    Ok(())
}

async fn create_and_copy(
    source: &mut DbConn,
    dest: &mut DbConn,
    table: &TableSchema,
    target_name: &str,
    src_kind: DialectKind,
    opts: &MergeOptions,
    stats: &mut Stats,
) -> Result<bool, TransferError> {
    let create_schema = if target_name == table.name {
        table.clone()
    } else {
        retarget(table, target_name)
    };
    if !super::clone::create_table_on(dest, &create_schema, src_kind, &opts.pipeline, stats).await? {
        return Ok(false);
    }
    super::copy_rows(
        source,
        dest,
        table,
        target_name,
        None,
        &opts.pipeline,
        stats,
    )
    .await?;
    stats.tables_transferred += 1;
    Ok(true)
}

/// The same table under a new name, with index and constraint names
/// re-prefixed so they cannot collide with the original's.
fn retarget(table: &TableSchema, new_name: &str) -> TableSchema {
    let mut renamed = table.clone();
    renamed.name = new_name.to_string();
    for index in &mut renamed.indexes {
        index.name = format!("{}_{}", new_name, index.name);
    }
    for fk in &mut renamed.foreign_keys {
        fk.name = format!("{}_{}", new_name, fk.name);
    }
    renamed
}

/// Structural compatibility for Append: same column names, same order,
/// same normalized types. Any mismatch is fatal for the table.
fn check_append_compatible(existing: &TableSchema, incoming: &TableSchema) -> Result<(), String> {
    if existing.columns.len() != incoming.columns.len() {
        return Err(format!(
            "column count differs (target has {}, source has {})",
            existing.columns.len(),
            incoming.columns.len()
        ));
    }
    for (have, want) in existing.columns.iter().zip(&incoming.columns) {
        if have.name != want.name {
            return Err(format!(
                "column order differs: target has '{}' where source has '{}'",
                have.name, want.name
            ));
        }
        let have_ty = normalize_type(&have.data_type);
        let want_ty = normalize_type(&want.data_type);
        if have_ty != want_ty {
            return Err(format!(
                "column '{}' type differs: target {} vs source {}",
                have.name, have_ty, want_ty
            ));
        }
    }
    Ok(())
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

    fn table(name: &str, cols: &[(&str, &str)]) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: cols.iter().map(|(n, t)| column(n, t)).collect(),
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
            engine: None,
            charset: None,
            collation: None,
        }
    }

    #[test]
    fn test_conflict_action_from_name() {
        assert_eq!(ConflictAction::from_name("skip"), Some(ConflictAction::Skip));
        assert_eq!(
            ConflictAction::from_name("REPLACE"),
            Some(ConflictAction::Replace)
        );
        assert_eq!(
            ConflictAction::from_name("Append"),
            Some(ConflictAction::Append)
        );
        assert_eq!(
            ConflictAction::from_name("rename"),
            Some(ConflictAction::Rename)
        );
        assert_eq!(ConflictAction::from_name("merge"), None);
    }

    #[test]
    fn test_append_compatible_same_schema() {
        let a = table("users", &[("id", "int(11)"), ("name", "varchar(50)")]);
        let b = table("users", &[("id", "integer"), ("name", "character varying(50)")]);
        // Different spellings of the same structure are compatible.
        assert!(check_append_compatible(&a, &b).is_ok());
    }

    #[test]
    fn test_append_rejects_extra_column() {
        let a = table("users", &[("id", "int")]);
        let b = table("users", &[("id", "int"), ("name", "text")]);
        assert!(check_append_compatible(&a, &b).is_err());
    }

    #[test]
    fn test_append_rejects_reordered_columns() {
        let a = table("users", &[("id", "int"), ("name", "text")]);
        let b = table("users", &[("name", "text"), ("id", "int")]);
        assert!(check_append_compatible(&a, &b).is_err());
    }

    #[test]
    fn test_append_rejects_type_mismatch() {
        let a = table("users", &[("id", "int"), ("name", "varchar(50)")]);
        let b = table("users", &[("id", "int"), ("name", "varchar(100)")]);
        let err = check_append_compatible(&a, &b).unwrap_err();
        assert!(err.contains("name"));
    }

    #[test]
    fn test_retarget_renames_table_and_constraints() {
        let mut t = table("users", &[("id", "int")]);
        t.indexes.push(crate::schema::Index {
            name: "idx_email".to_string(),
            columns: vec!["email".to_string()],
            is_unique: true,
        });
        t.foreign_keys.push(crate::schema::ForeignKey {
            name: "fk_group".to_string(),
            columns: vec!["group_id".to_string()],
            ref_table: "groups".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: None,
            on_update: None,
        });
        let renamed = retarget(&t, "users_shop2");
        assert_eq!(renamed.name, "users_shop2");
        assert_eq!(renamed.indexes[0].name, "users_shop2_idx_email");
        assert_eq!(renamed.foreign_keys[0].name, "users_shop2_fk_group");
        // The original is untouched.
        assert_eq!(t.indexes[0].name, "idx_email");
    }

    #[test]
    fn test_decider_cache_means_one_call_per_pair() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let decide: ConflictDecider = Box::new(move |_, _, _| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            ConflictAction::Skip
        });

        // Simulate the orchestrator's caching loop.
        let mut decisions: HashMap<(String, String), ConflictAction> = HashMap::new();
        let existing = table("users", &[("id", "int")]);
        for _ in 0..3 {
            let key = ("users".to_string(), "shop1".to_string());
            decisions
                .entry(key)
                .or_insert_with(|| decide("users", "shop1", Some(&existing)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            decisions.get(&("users".to_string(), "shop1".to_string())),
            Some(&ConflictAction::Skip)
        );
    }
}
