// ABOUTME: Transfer orchestrator composing codec, stream, schema and executor
// ABOUTME: One module per public operation; shared row-copy plumbing lives here

pub mod clone;
pub mod export;
pub mod import;
pub mod merge;

pub use clone::{clone_database, copy_table};
pub use export::export;
pub use import::import;
pub use merge::merge;

use crate::connect::DbConn;
use crate::dialect::Dialect;
use crate::error::TransferError;
use crate::executor::BatchExecutor;
use crate::options::PipelineOptions;
use crate::progress::Stats;
use crate::schema::TableSchema;

pub(crate) fn build_select(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    where_clause: Option<&str>,
) -> String {
    let cols = columns
        .iter()
        .map(|c| dialect.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {} FROM {}", cols, dialect.quote_ident(table));
    if let Some(clause) = where_clause {
        sql.push_str(&format!(" WHERE {}", clause));
    }
    sql
}

/// Stream one table's rows from a live source straight into a live
/// destination, batch by batch, never touching disk.
pub(crate) async fn copy_rows(
    source: &mut DbConn,
    dest: &mut DbConn,
    table: &TableSchema,
    target_name: &str,
    where_clause: Option<&str>,
    pipeline: &PipelineOptions,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let src_dialect = source.dialect();
    let dst_dialect = dest.dialect();
    let columns = table.column_names();

    let mut count_sql = format!(
        "SELECT COUNT(*) FROM {}",
        src_dialect.quote_ident(&table.name)
    );
    if let Some(clause) = where_clause {
        count_sql.push_str(&format!(" WHERE {}", clause));
    }
    let total = source
        .query_scalar(&count_sql)
        .await?
        .and_then(|t| t.parse::<u64>().ok());

    let select = build_select(src_dialect, &table.name, &columns, where_clause);
    pipeline.events.progress(target_name, 0, total);

    let mut done = 0u64;
    let mut rows = source.read_rows(&select).await?;
    loop {
        if pipeline.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let batch = match rows.next_batch(pipeline.batch_size).await? {
            Some(batch) => batch,
            None => break,
        };
        done += batch.len() as u64;
        let insert = dst_dialect.insert_statement(target_name, &columns, &batch);
        BatchExecutor::new(dest, pipeline)
            .execute_one(insert, stats)
            .await?;
        pipeline.events.progress(target_name, done, total);
    }
    tracing::debug!("copied {} row(s) into '{}'", done, target_name);
    Ok(())
}
