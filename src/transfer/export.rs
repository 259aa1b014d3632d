// ABOUTME: Export operation: live database -> SQL dump file through the codec layer
// ABOUTME: DDL first, batched INSERTs per table, foreign keys in a final ALTER pass

use crate::codec::{ByteSink, Codec};
use crate::connect::DbConn;
use crate::error::{TransferError, TransferFailure};
use crate::options::ExportOptions;
use crate::progress::Stats;
use crate::schema;
use crate::stream::StatementWriter;
use crate::utils::validate_identifier;
use std::time::Instant;

/// Dump a database's schema and/or data to a file.
///
/// The dump carries the source dialect's SQL: statements re-imported into
/// the same dialect replay byte-faithfully. Multi-row INSERTs are bounded
/// by `batch_size` rows each. Foreign keys are emitted as ALTER TABLE
/// statements after all data, so replay order never trips on references.
pub async fn export(opts: &ExportOptions) -> Result<Stats, TransferFailure> {
    let started = Instant::now();
    let mut stats = Stats::default();
    let result = run_export(opts, &mut stats).await;
    stats.duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(
                "export finished: {} table(s), {} row(s), {} byte(s) in {:?}",
                stats.tables_transferred,
                stats.rows_transferred,
                stats.bytes_written,
                stats.duration
            );
            Ok(stats)
        }
        Err(error) => Err(TransferFailure::new(error, stats)),
    }
}

async fn run_export(opts: &ExportOptions, stats: &mut Stats) -> Result<(), TransferError> {
    validate_identifier(&opts.source.database)?;

    let mut conn = DbConn::connect(&opts.source).await?;
    let dialect = conn.dialect();

    let mut tables = schema::describe_tables(&mut conn, &opts.source.database).await?;
    tables.retain(|t| opts.filter.includes(&t.name));

    let codec = opts.codec.unwrap_or_else(|| Codec::from_path(&opts.path));
    let sink = ByteSink::create(&opts.path, codec)?;
    let mut writer = StatementWriter::new(sink);
    writer.write_comment(&format!(
        "dump of database '{}' ({})",
        opts.source.database,
        dialect.name()
    ))?;

    if opts.include_vars {
        for statement in dialect.session_setup() {
            writer.write_statement(&statement)?;
        }
    }

    for table in &tables {
        if opts.pipeline.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if opts.drop_if_exists {
            writer.write_statement(&dialect.drop_table_if_exists(&table.name))?;
        }
        if !opts.no_create {
            let (ddl, warnings) = dialect.create_table(table, dialect.kind(), false);
            for warning in warnings {
                opts.pipeline.events.warning(warning);
            }
            writer.write_statement(&ddl)?;
            for index in &table.indexes {
                writer.write_statement(&dialect.create_index(&table.name, index))?;
            }
        }

        if opts.include_data {
            let columns = table.column_names();
            let total = conn
                .query_scalar(&format!(
                    "SELECT COUNT(*) FROM {}",
                    dialect.quote_ident(&table.name)
                ))
                .await?
                .and_then(|t| t.parse::<u64>().ok());
            opts.pipeline.events.progress(&table.name, 0, total);

            let select = super::build_select(dialect, &table.name, &columns, None);
            let mut done = 0u64;
            let mut rows = conn.read_rows(&select).await?;
            while let Some(batch) = rows.next_batch(opts.pipeline.batch_size).await? {
                if opts.pipeline.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                done += batch.len() as u64;
                writer.write_statement(&dialect.insert_statement(&table.name, &columns, &batch))?;
                stats.rows_transferred += batch.len() as u64;
                opts.pipeline.events.progress(&table.name, done, total);
            }
        }
        stats.tables_transferred += 1;
    }

    if !opts.no_create {
        for table in &tables {
            for fk in &table.foreign_keys {
                writer.write_statement(&dialect.add_foreign_key(&table.name, fk))?;
            }
        }
    }

    stats.bytes_written = writer.bytes_written();
    writer.into_inner().finish()?;
    conn.disconnect().await;
    Ok(())
}
