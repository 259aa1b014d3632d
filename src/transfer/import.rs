// ABOUTME: Import operation: SQL dump file -> live database through the batching executor
// ABOUTME: Binary PostgreSQL dumps route to the native tool bridge instead

use crate::codec;
use crate::connect::{ConnectionConfig, DbConn};
use crate::dialect::DialectKind;
use crate::error::{TransferError, TransferFailure};
use crate::executor::{BatchExecutor, SessionChecksGuard};
use crate::options::ImportOptions;
use crate::progress::Stats;
use crate::restore;
use crate::stream::StatementReader;
use crate::utils::validate_identifier;
use std::cell::Cell;
use std::time::Instant;

/// Replay a dump file into a live database.
///
/// `.dump`/`.pgdump` files are handed to pg_restore; everything else goes
/// through the codec layer and statement stream into batched
/// transactions, with FK/unique checks relaxed for the session. A parse
/// error is fatal: correctness cannot be assumed past the parse point.
pub async fn import(opts: &ImportOptions) -> Result<Stats, TransferFailure> {
    let started = Instant::now();
    let mut stats = Stats::default();
    let result = run_import(opts, &mut stats).await;
    stats.duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(
                "import finished: {} statement(s), {} row(s), {} skipped in {:?}",
                stats.statements_executed,
                stats.rows_transferred,
                stats.errors_skipped,
                stats.duration
            );
            Ok(stats)
        }
        Err(error) => Err(TransferFailure::new(error, stats)),
    }
}

async fn run_import(opts: &ImportOptions, stats: &mut Stats) -> Result<(), TransferError> {
    let target_db = opts
        .rename_to
        .as_deref()
        .unwrap_or(&opts.destination.database);
    validate_identifier(target_db)?;
    let dest = opts.destination.with_database(target_db);

    if restore::is_native_dump(&opts.path) {
        if dest.dialect != DialectKind::Postgres {
            return Err(TransferError::InvalidOptions(format!(
                "{} is a PostgreSQL binary dump; the destination must be a PostgreSQL server",
                opts.path.display()
            )));
        }
        if opts.create_db {
            ensure_database(&dest).await?;
        }
        let tool_stats =
            restore::restore_native(&opts.path, &dest, opts.jobs, &opts.pipeline).await?;
        stats.bytes_written = tool_stats.bytes_written;
        return Ok(());
    }

    if opts.create_db {
        ensure_database(&dest).await?;
    }

    let mut conn = DbConn::connect(&dest).await?;
    let reader = codec::open_reader(&opts.path, opts.codec)?;
    let statements = StatementReader::new(reader)
        .with_backslash_escapes(dest.dialect == DialectKind::MariaDb)
        .with_dollar_quoting(dest.dialect == DialectKind::Postgres);

    // With an explicit rename target, database-level statements inside
    // the dump would redirect or duplicate work; the open connection
    // already points at the right database.
    let rename_active = opts.rename_to.is_some();
    let tables_created = Cell::new(0u64);
    let statements = statements.filter(|item| match item {
        Ok(statement) => !(rename_active && is_database_statement(statement)),
        Err(_) => true,
    });
    let statements = statements.inspect(|item| {
        if let Ok(statement) = item {
            if statement
                .trim_start()
                .get(..12)
                .is_some_and(|head| head.eq_ignore_ascii_case("create table"))
            {
                tables_created.set(tables_created.get() + 1);
            }
        }
    });

    let guard = SessionChecksGuard::disable(&mut conn).await?;
    let run_result = BatchExecutor::new(&mut conn, &opts.pipeline)
        .run(statements, stats)
        .await;
    let restore_result = guard.restore(&mut conn).await;
    conn.disconnect().await;

    run_result?;
    restore_result?;
    stats.tables_transferred += tables_created.get();
    Ok(())
}

fn is_database_statement(statement: &str) -> bool {
    let head = statement.trim_start().to_ascii_uppercase();
    head.starts_with("USE ") || head.starts_with("CREATE DATABASE") || head.starts_with("DROP DATABASE")
}

/// Create the destination database when it does not exist yet.
async fn ensure_database(cfg: &ConnectionConfig) -> Result<(), TransferError> {
    let mut server = DbConn::connect_server(cfg).await?;
    let probe = server.dialect().database_exists_query(&cfg.database);
    let exists = server.query_scalar(&probe).await?.is_some();
    if !exists {
        let create = server.dialect().create_database(&cfg.database);
        server.execute(&create).await?;
        tracing::info!("created database '{}'", cfg.database);
    }
    server.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_statements_detected() {
        assert!(is_database_statement("USE shop"));
        assert!(is_database_statement("use `shop`"));
        assert!(is_database_statement("CREATE DATABASE shop"));
        assert!(is_database_statement("drop database old_shop"));
        assert!(!is_database_statement("CREATE TABLE users (id INT)"));
        assert!(!is_database_statement("INSERT INTO used_cars VALUES (1)"));
    }
}
