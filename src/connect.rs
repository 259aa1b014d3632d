// ABOUTME: Connection configuration and a unified handle over both drivers
// ABOUTME: MariaDB via mysql_async, PostgreSQL via tokio-postgres

use crate::dialect::{Dialect, DialectKind, SqlValue};
use crate::error::TransferError;
use mysql_async::prelude::Queryable;
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to open one database connection.
///
/// Built by the caller (the CLI parses URLs with
/// [`utils::parse_db_url`](crate::utils::parse_db_url)); the engine itself
/// reads no environment variables or config files. Immutable once a
/// connection is open.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub dialect: DialectKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub socket: Option<PathBuf>,
    pub database: String,
}

impl ConnectionConfig {
    /// The same endpoint pointed at a different database.
    pub fn with_database(&self, database: &str) -> ConnectionConfig {
        let mut cfg = self.clone();
        cfg.database = database.to_string();
        cfg
    }

    /// Printable endpoint for logs and same-target checks.
    pub fn endpoint(&self) -> String {
        match &self.socket {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

/// One open connection to either engine.
pub enum DbConn {
    MariaDb(mysql_async::Conn),
    Postgres(tokio_postgres::Client),
}

/// Cursor name used for server-side paging of PostgreSQL reads.
const PG_CURSOR: &str = "dbferry_read_cursor";

impl DbConn {
    /// Connect to the database named in the config.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<DbConn, TransferError> {
        Self::open(cfg, Some(cfg.database.as_str())).await
    }

    /// Connect to the server without selecting the target database, for
    /// CREATE DATABASE and existence probes.
    pub async fn connect_server(cfg: &ConnectionConfig) -> Result<DbConn, TransferError> {
        match cfg.dialect {
            DialectKind::MariaDb => Self::open(cfg, None).await,
            // PostgreSQL has no database-less sessions; use the
            // maintenance database.
            DialectKind::Postgres => Self::open(cfg, Some("postgres")).await,
        }
    }

    async fn open(cfg: &ConnectionConfig, database: Option<&str>) -> Result<DbConn, TransferError> {
        match cfg.dialect {
            DialectKind::MariaDb => {
                let mut builder = mysql_async::OptsBuilder::default()
                    .ip_or_hostname(cfg.host.clone())
                    .tcp_port(cfg.port)
                    .user(Some(cfg.user.clone()))
                    .pass(Some(cfg.password.clone()))
                    .db_name(database.map(|d| d.to_string()));
                if let Some(socket) = &cfg.socket {
                    builder = builder.socket(Some(socket.display().to_string()));
                }
                let conn = mysql_async::Conn::new(builder).await.map_err(|e| {
                    TransferError::connectivity(format!(
                        "cannot connect to MariaDB at {}: {}",
                        cfg.endpoint(),
                        e
                    ))
                })?;
                tracing::debug!("connected to mariadb at {}", cfg.endpoint());
                Ok(DbConn::MariaDb(conn))
            }
            DialectKind::Postgres => {
                let mut pg = tokio_postgres::Config::new();
                pg.user(&cfg.user)
                    .password(&cfg.password)
                    .port(cfg.port)
                    .connect_timeout(Duration::from_secs(30));
                if let Some(db) = database {
                    pg.dbname(db);
                }
                match &cfg.socket {
                    Some(path) => {
                        pg.host_path(path);
                    }
                    None => {
                        pg.host(&cfg.host);
                    }
                }
                let (client, connection) =
                    pg.connect(tokio_postgres::NoTls).await.map_err(|e| {
                        TransferError::connectivity(classify_pg_error(&cfg.endpoint(), e))
                    })?;
                // The connection future drives the socket; errors after
                // setup surface on the next query.
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!("postgres connection error: {}", e);
                    }
                });
                tracing::debug!("connected to postgres at {}", cfg.endpoint());
                Ok(DbConn::Postgres(client))
            }
        }
    }

    pub fn kind(&self) -> DialectKind {
        match self {
            DbConn::MariaDb(_) => DialectKind::MariaDb,
            DbConn::Postgres(_) => DialectKind::Postgres,
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.kind().dialect()
    }

    /// Execute one statement, discarding any result.
    pub async fn execute(&mut self, sql: &str) -> Result<(), TransferError> {
        match self {
            DbConn::MariaDb(conn) => conn
                .query_drop(sql)
                .await
                .map_err(|e| TransferError::execution(truncate_statement(sql), e.to_string())),
            DbConn::Postgres(client) => client
                .batch_execute(sql)
                .await
                .map_err(|e| TransferError::execution(truncate_statement(sql), e.to_string())),
        }
    }

    /// Run a query and return all values as text, row-major.
    ///
    /// Used for introspection and session probes; result sets there are
    /// small by construction.
    pub async fn query_strings(
        &mut self,
        sql: &str,
    ) -> Result<Vec<Vec<Option<String>>>, TransferError> {
        match self {
            DbConn::MariaDb(conn) => {
                let rows: Vec<mysql_async::Row> = conn
                    .query(sql)
                    .await
                    .map_err(|e| TransferError::execution(truncate_statement(sql), e.to_string()))?;
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        (0..row.len())
                            .map(|i| row.as_ref(i).and_then(mysql_value_to_text))
                            .collect()
                    })
                    .collect())
            }
            DbConn::Postgres(client) => {
                let messages = client
                    .simple_query(sql)
                    .await
                    .map_err(|e| TransferError::execution(truncate_statement(sql), e.to_string()))?;
                let mut rows = Vec::new();
                for msg in messages {
                    if let tokio_postgres::SimpleQueryMessage::Row(row) = msg {
                        rows.push(
                            (0..row.len())
                                .map(|i| row.get(i).map(|s| s.to_string()))
                                .collect(),
                        );
                    }
                }
                Ok(rows)
            }
        }
    }

    /// First column of the first row, as text.
    pub async fn query_scalar(&mut self, sql: &str) -> Result<Option<String>, TransferError> {
        let rows = self.query_strings(sql).await?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()).flatten())
    }

    /// Stream rows of a SELECT in bounded batches.
    ///
    /// MariaDB uses the driver's streaming result; PostgreSQL uses a
    /// server-side cursor fetched `batch` rows at a time. Either way,
    /// memory is bounded by the batch size, and a slow consumer
    /// back-pressures the server read.
    pub async fn read_rows<'a>(&'a mut self, select: &str) -> Result<RowStream<'a>, TransferError> {
        match self {
            DbConn::MariaDb(conn) => {
                let result = conn.query_iter(select.to_string()).await.map_err(|e| {
                    TransferError::execution(truncate_statement(select), e.to_string())
                })?;
                Ok(RowStream::MariaDb(result))
            }
            DbConn::Postgres(client) => {
                client
                    .batch_execute("BEGIN")
                    .await
                    .map_err(|e| TransferError::execution("BEGIN", e.to_string()))?;
                let declare = format!("DECLARE {} NO SCROLL CURSOR FOR {}", PG_CURSOR, select);
                if let Err(e) = client.batch_execute(&declare).await {
                    let _ = client.batch_execute("ROLLBACK").await;
                    return Err(TransferError::execution(
                        truncate_statement(select),
                        e.to_string(),
                    ));
                }
                Ok(RowStream::Postgres {
                    client,
                    open: true,
                })
            }
        }
    }

    /// Close the connection politely where the protocol supports it.
    pub async fn disconnect(self) {
        match self {
            DbConn::MariaDb(conn) => {
                if let Err(e) = conn.disconnect().await {
                    tracing::warn!("error closing mariadb connection: {}", e);
                }
            }
            // tokio-postgres closes on drop.
            DbConn::Postgres(_) => {}
        }
    }
}

/// A streaming read of one SELECT, yielded in bounded batches.
pub enum RowStream<'a> {
    MariaDb(mysql_async::QueryResult<'a, 'static, mysql_async::TextProtocol>),
    Postgres {
        client: &'a tokio_postgres::Client,
        open: bool,
    },
}

impl RowStream<'_> {
    /// Next batch of up to `limit` rows; `None` once the result is
    /// exhausted.
    pub async fn next_batch(
        &mut self,
        limit: usize,
    ) -> Result<Option<Vec<Vec<SqlValue>>>, TransferError> {
        match self {
            RowStream::MariaDb(result) => {
                let mut rows = Vec::with_capacity(limit);
                while rows.len() < limit {
                    match result.next().await.map_err(|e| {
                        TransferError::execution("reading source rows", e.to_string())
                    })? {
                        Some(row) => rows.push(mysql_row_to_values(row)),
                        None => break,
                    }
                }
                if rows.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(rows))
                }
            }
            RowStream::Postgres { client, open } => {
                if !*open {
                    return Ok(None);
                }
                let fetch = format!("FETCH {} FROM {}", limit, PG_CURSOR);
                let messages = client
                    .simple_query(&fetch)
                    .await
                    .map_err(|e| TransferError::execution(fetch.clone(), e.to_string()))?;
                let mut rows = Vec::new();
                for msg in messages {
                    if let tokio_postgres::SimpleQueryMessage::Row(row) = msg {
                        rows.push(
                            (0..row.len())
                                .map(|i| match row.get(i) {
                                    Some(text) => SqlValue::Text(text.to_string()),
                                    None => SqlValue::Null,
                                })
                                .collect(),
                        );
                    }
                }
                if rows.is_empty() {
                    *open = false;
                    let close = format!("CLOSE {}", PG_CURSOR);
                    client
                        .batch_execute(&close)
                        .await
                        .map_err(|e| TransferError::execution(close.clone(), e.to_string()))?;
                    client
                        .batch_execute("COMMIT")
                        .await
                        .map_err(|e| TransferError::execution("COMMIT", e.to_string()))?;
                    Ok(None)
                } else {
                    Ok(Some(rows))
                }
            }
        }
    }
}

fn classify_pg_error(endpoint: &str, e: tokio_postgres::Error) -> String {
    let msg = e.to_string();
    if msg.contains("password authentication failed") {
        format!("authentication failed for {}: check user and password", endpoint)
    } else if msg.contains("does not exist") {
        format!("cannot connect to {}: {}", endpoint, msg)
    } else if msg.contains("Connection refused") || msg.contains("connection refused") {
        format!(
            "connection refused by {}: is the server running and reachable?",
            endpoint
        )
    } else {
        format!("cannot connect to PostgreSQL at {}: {}", endpoint, msg)
    }
}

/// Keep rejected-statement errors readable; dumps carry megabyte INSERTs.
pub(crate) fn truncate_statement(sql: &str) -> String {
    const LIMIT: usize = 500;
    if sql.len() <= LIMIT {
        sql.to_string()
    } else {
        let mut end = LIMIT;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes)", &sql[..end], sql.len())
    }
}

fn mysql_row_to_values(row: mysql_async::Row) -> Vec<SqlValue> {
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            Some(value) => mysql_value_to_sql(value),
            None => SqlValue::Null,
        })
        .collect()
}

fn mysql_value_to_sql(value: &mysql_async::Value) -> SqlValue {
    use mysql_async::Value;
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) => SqlValue::Int(*i),
        Value::UInt(u) => SqlValue::UInt(*u),
        Value::Float(f) => SqlValue::Float(*f as f64),
        Value::Double(d) => SqlValue::Float(*d),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => SqlValue::Text(s.to_string()),
            Err(_) => SqlValue::Bytes(b.clone()),
        },
        Value::Date(y, mo, d, h, mi, s, us) => SqlValue::Text(format_mysql_date(
            *y, *mo, *d, *h, *mi, *s, *us,
        )),
        Value::Time(neg, days, h, mi, s, us) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u64::from(*days) * 24 + u64::from(*h);
            let mut text = format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s);
            if *us > 0 {
                text.push_str(&format!(".{:06}", us));
            }
            SqlValue::Text(text)
        }
    }
}

fn format_mysql_date(y: u16, mo: u8, d: u8, h: u8, mi: u8, s: u8, us: u32) -> String {
    if h == 0 && mi == 0 && s == 0 && us == 0 {
        format!("{:04}-{:02}-{:02}", y, mo, d)
    } else if us == 0 {
        format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
    } else {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            y, mo, d, h, mi, s, us
        )
    }
}

fn mysql_value_to_text(value: &mysql_async::Value) -> Option<String> {
    match mysql_value_to_sql(value) {
        SqlValue::Null => None,
        SqlValue::Int(i) => Some(i.to_string()),
        SqlValue::UInt(u) => Some(u.to_string()),
        SqlValue::Float(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}
