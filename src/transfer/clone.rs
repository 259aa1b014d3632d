// ABOUTME: Clone and single-table copy between two live databases
// ABOUTME: DDL translated per dialect, rows streamed connection-to-connection

use crate::connect::DbConn;
use crate::dialect::DialectKind;
use crate::error::{TransferError, TransferFailure};
use crate::executor::SessionChecksGuard;
use crate::options::{CloneOptions, CopyOptions, ErrorPolicy, PipelineOptions};
use crate::progress::Stats;
use crate::schema::{self, TableSchema};
use crate::utils::{ensure_distinct, validate_identifier};
use std::time::Instant;

/// Clone every (filtered) table of one live database into another.
///
/// Schema is translated through the destination dialect; rows stream
/// connection-to-connection without touching disk. `structure_only`
/// skips the data phase entirely. Foreign keys land in a second ALTER
/// pass after all tables.
pub async fn clone_database(opts: &CloneOptions) -> Result<Stats, TransferFailure> {
    let started = Instant::now();
    let mut stats = Stats::default();
    let result = run_clone(opts, &mut stats).await;
    stats.duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(
                "clone finished: {} table(s), {} row(s) in {:?}",
                stats.tables_transferred,
                stats.rows_transferred,
                stats.duration
            );
            Ok(stats)
        }
        Err(error) => Err(TransferFailure::new(error, stats)),
    }
}

async fn run_clone(opts: &CloneOptions, stats: &mut Stats) -> Result<(), TransferError> {
    validate_identifier(&opts.source.database)?;
    validate_identifier(&opts.destination.database)?;
    ensure_distinct(&opts.source, &opts.destination)?;

    let mut source = DbConn::connect(&opts.source).await?;
    let mut dest = DbConn::connect(&opts.destination).await?;
    let src_kind = source.kind();

    let mut tables = schema::describe_tables(&mut source, &opts.source.database).await?;
    tables.retain(|t| opts.filter.includes(&t.name));

    let guard = SessionChecksGuard::disable(&mut dest).await?;
    let result = clone_tables(&mut source, &mut dest, &tables, src_kind, opts, stats).await;
    let restore_result = guard.restore(&mut dest).await;
    source.disconnect().await;
    dest.disconnect().await;
    result?;
    restore_result
}

async fn clone_tables(
    source: &mut DbConn,
    dest: &mut DbConn,
    tables: &[TableSchema],
    src_kind: DialectKind,
    opts: &CloneOptions,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let dst_dialect = dest.dialect();

    for table in tables {
        if opts.pipeline.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if opts.drop_if_exists {
            dest.execute(&dst_dialect.drop_table_if_exists(&table.name))
                .await?;
            stats.statements_executed += 1;
        }
        if !create_table_on(dest, table, src_kind, &opts.pipeline, stats).await? {
            // Creation failed under the Continue policy; data would have
            // nowhere to go.
            continue;
        }
        if !opts.structure_only {
            super::copy_rows(
                source,
                dest,
                table,
                &table.name,
                None,
                &opts.pipeline,
                stats,
            )
            .await?;
        }
        stats.tables_transferred += 1;
    }

    // Second DDL pass: constraints after all tables and data exist.
    for table in tables {
        for fk in &table.foreign_keys {
            let sql = dst_dialect.add_foreign_key(&table.name, fk);
            match dest.execute(&sql).await {
                Ok(()) => stats.statements_executed += 1,
                Err(error)
                    if opts.pipeline.error_policy == ErrorPolicy::Continue
                        && error.is_recoverable() =>
                {
                    stats.errors_skipped += 1;
                    opts.pipeline
                        .events
                        .statement_skipped(&sql, &error.to_string());
                }
                Err(error) => return Err(error),
            }
        }
    }
    Ok(())
}

/// Create a translated table on the destination. Returns `false` when the
/// CREATE was rejected and skipped under the Continue policy.
pub(super) async fn create_table_on(
    dest: &mut DbConn,
    table: &TableSchema,
    src_kind: DialectKind,
    pipeline: &PipelineOptions,
    stats: &mut Stats,
) -> Result<bool, TransferError> {
    let dialect = dest.dialect();
    let (ddl, warnings) = dialect.create_table(table, src_kind, false);
    for warning in warnings {
        pipeline.events.warning(warning);
    }
    if let Err(error) = dest.execute(&ddl).await {
        if pipeline.error_policy == ErrorPolicy::Continue && error.is_recoverable() {
            stats.errors_skipped += 1;
            pipeline.events.statement_skipped(&ddl, &error.to_string());
            return Ok(false);
        }
        return Err(error);
    }
    stats.statements_executed += 1;
    for index in &table.indexes {
        let sql = dialect.create_index(&table.name, index);
        match dest.execute(&sql).await {
            Ok(()) => stats.statements_executed += 1,
            Err(error)
                if pipeline.error_policy == ErrorPolicy::Continue && error.is_recoverable() =>
            {
                stats.errors_skipped += 1;
                pipeline.events.statement_skipped(&sql, &error.to_string());
            }
            Err(error) => return Err(error),
        }
    }
    Ok(true)
}

/// Copy a single table between two live databases, optionally filtered by
/// a WHERE predicate applied at the source read.
pub async fn copy_table(opts: &CopyOptions) -> Result<Stats, TransferFailure> {
    let started = Instant::now();
    let mut stats = Stats::default();
    let result = run_copy(opts, &mut stats).await;
    stats.duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(
                "copy finished: {} row(s) of '{}' in {:?}",
                stats.rows_transferred,
                opts.table,
                stats.duration
            );
            Ok(stats)
        }
        Err(error) => Err(TransferFailure::new(error, stats)),
    }
}

async fn run_copy(opts: &CopyOptions, stats: &mut Stats) -> Result<(), TransferError> {
    validate_identifier(&opts.source.database)?;
    validate_identifier(&opts.destination.database)?;
    validate_identifier(&opts.table)?;
    ensure_distinct(&opts.source, &opts.destination)?;

    let mut source = DbConn::connect(&opts.source).await?;
    let mut dest = DbConn::connect(&opts.destination).await?;
    let src_kind = source.kind();

    let table = schema::describe_table(&mut source, &opts.source.database, &opts.table)
        .await?
        .ok_or_else(|| {
            TransferError::InvalidOptions(format!(
                "table '{}' not found in source database '{}'",
                opts.table, opts.source.database
            ))
        })?;

    let guard = SessionChecksGuard::disable(&mut dest).await?;
    let result = copy_one(&mut source, &mut dest, &table, src_kind, opts, stats).await;
    let restore_result = guard.restore(&mut dest).await;
    source.disconnect().await;
    dest.disconnect().await;
    result?;
    restore_result
}

async fn copy_one(
    source: &mut DbConn,
    dest: &mut DbConn,
    table: &TableSchema,
    src_kind: DialectKind,
    opts: &CopyOptions,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let dst_dialect = dest.dialect();
    if opts.drop_if_exists {
        dest.execute(&dst_dialect.drop_table_if_exists(&table.name))
            .await?;
        stats.statements_executed += 1;
    }
    if !create_table_on(dest, table, src_kind, &opts.pipeline, stats).await? {
        return Ok(());
    }
    super::copy_rows(
        source,
        dest,
        table,
        &table.name,
        opts.where_clause.as_deref(),
        &opts.pipeline,
        stats,
    )
    .await?;
    stats.tables_transferred += 1;

    // Referenced tables may not exist on the destination of a
    // single-table copy; constraints are best-effort here.
    for fk in &table.foreign_keys {
        let sql = dst_dialect.add_foreign_key(&table.name, fk);
        match dest.execute(&sql).await {
            Ok(()) => stats.statements_executed += 1,
            Err(error) => opts.pipeline.events.warning(format!(
                "could not add foreign key '{}' to '{}': {}",
                fk.name, table.name, error
            )),
        }
    }
    Ok(())
}
