// ABOUTME: Native tool bridge supervising pg_restore for binary dump formats
// ABOUTME: Parallelism is the tool's own; we only manage the process lifecycle

use crate::connect::ConnectionConfig;
use crate::error::TransferError;
use crate::options::PipelineOptions;
use crate::progress::Stats;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use which::which;

/// Suffixes routed to the native restore path instead of statement replay.
pub fn is_native_dump(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("dump") | Some("pgdump")
    )
}

/// Verify pg_restore is installed before spawning anything.
pub fn check_restore_tool() -> Result<(), TransferError> {
    which("pg_restore").map_err(|_| {
        TransferError::connectivity(
            "pg_restore not found in PATH; install the PostgreSQL client tools \
             (postgresql-client on Debian/Ubuntu, postgresql on Homebrew)",
        )
    })?;
    Ok(())
}

/// Restore a PostgreSQL binary-format dump with the platform's native tool.
///
/// `jobs > 1` requests pg_restore's own parallel mode. Its stderr is
/// streamed line-by-line into the event sink as unparsed status lines. A
/// non-zero exit is fatal; whatever partial state the tool left behind is
/// left as-is, no cleanup rollback is attempted.
pub async fn restore_native(
    dump_path: &Path,
    destination: &ConnectionConfig,
    jobs: u32,
    pipeline: &PipelineOptions,
) -> Result<Stats, TransferError> {
    check_restore_tool()?;
    let started = Instant::now();

    let mut cmd = tokio::process::Command::new("pg_restore");
    cmd.arg("--no-owner")
        .arg("--host")
        .arg(&destination.host)
        .arg("--port")
        .arg(destination.port.to_string())
        .arg("--username")
        .arg(&destination.user)
        .arg("--dbname")
        .arg(&destination.database)
        .arg("--verbose");
    if jobs > 1 {
        cmd.arg("--jobs").arg(jobs.to_string());
    }
    cmd.arg(dump_path)
        .env("PGPASSWORD", &destination.password)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    tracing::info!(
        "running pg_restore for {} into '{}' (jobs={})",
        dump_path.display(),
        destination.database,
        jobs.max(1)
    );

    let mut child = cmd.spawn().map_err(|e| {
        TransferError::connectivity(format!("failed to spawn pg_restore: {}", e))
    })?;

    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(TransferError::Io)?
        {
            pipeline.events.tool_output(line);
        }
    }

    let status = child.wait().await.map_err(TransferError::Io)?;
    let mut stats = Stats::default();
    stats.duration = started.elapsed();

    if status.success() {
        tracing::info!("pg_restore finished in {:?}", stats.duration);
        Ok(stats)
    } else {
        Err(TransferError::ExternalTool {
            tool: "pg_restore".to_string(),
            status: status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_native_dump_suffixes() {
        assert!(is_native_dump(&PathBuf::from("backup.dump")));
        assert!(is_native_dump(&PathBuf::from("backup.PGDUMP")));
        assert!(!is_native_dump(&PathBuf::from("backup.sql")));
        assert!(!is_native_dump(&PathBuf::from("backup.sql.gz")));
        assert!(!is_native_dump(&PathBuf::from("backup")));
    }

    #[tokio::test]
    #[ignore]
    async fn test_restore_nonexistent_file_fails() {
        // Requires pg_restore on PATH and a reachable server.
        let url = std::env::var("TEST_POSTGRES_URL").unwrap();
        let cfg = crate::utils::parse_db_url(&url).unwrap();
        let result = restore_native(
            &PathBuf::from("/nonexistent/backup.dump"),
            &cfg,
            1,
            &PipelineOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(TransferError::ExternalTool { .. })));
    }
}
