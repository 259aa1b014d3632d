// ABOUTME: Round-trip tests for the dump pipeline without a live server
// ABOUTME: Writer -> codec -> file -> codec -> statement reader

use dbferry::codec::{self, ByteSink, Codec};
use dbferry::dialect::{DialectKind, SqlValue};
use dbferry::executor::insert_row_count;
use dbferry::stream::{StatementReader, StatementWriter};
use std::io::Write;

fn sample_statements() -> Vec<String> {
    let mariadb = DialectKind::MariaDb.dialect();
    let rows = vec![
        vec![SqlValue::Int(1), SqlValue::Text("Alice".into())],
        vec![SqlValue::Int(2), SqlValue::Text("it's; tricky".into())],
        vec![SqlValue::Int(3), SqlValue::Null],
    ];
    vec![
        "DROP TABLE IF EXISTS `users`".to_string(),
        "CREATE TABLE `users` (\n  `id` int(11) NOT NULL AUTO_INCREMENT,\n  `name` varchar(100),\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB".to_string(),
        mariadb.insert_statement("users", &["id".into(), "name".into()], &rows),
    ]
}

#[test]
fn dump_roundtrip_through_every_codec() {
    let statements = sample_statements();
    for codec in [Codec::None, Codec::Gzip, Codec::Xz, Codec::Zstd] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        let sink = ByteSink::create(&path, codec).unwrap();
        let mut writer = StatementWriter::new(sink);
        writer.write_comment("round-trip fixture").unwrap();
        for stmt in &statements {
            writer.write_statement(stmt).unwrap();
        }
        assert!(writer.bytes_written() > 0);
        writer.into_inner().finish().unwrap();

        let reader = codec::open_reader(&path, Some(codec)).unwrap();
        let back: Vec<String> = StatementReader::new(reader)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(back, statements, "statements drifted through {:?}", codec);
    }
}

#[test]
fn suffix_detection_matches_written_codec() {
    let statements = sample_statements();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.sql.zst");

    let codec = Codec::from_path(&path);
    assert_eq!(codec, Codec::Zstd);

    let sink = ByteSink::create(&path, codec).unwrap();
    let mut writer = StatementWriter::new(sink);
    for stmt in &statements {
        writer.write_statement(stmt).unwrap();
    }
    writer.into_inner().finish().unwrap();

    // Reading with no explicit codec must sniff .zst and decompress.
    let reader = codec::open_reader(&path, None).unwrap();
    let back: Vec<String> = StatementReader::new(reader)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(back, statements);
}

#[test]
fn batch_size_bounds_rows_per_insert() {
    let dialect = DialectKind::Postgres.dialect();
    let columns = vec!["id".to_string(), "label".to_string()];
    let rows: Vec<Vec<SqlValue>> = (0..10)
        .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("row {}", i))])
        .collect();

    // batch_size=1: exactly one statement per row.
    let singles: Vec<String> = rows
        .chunks(1)
        .map(|chunk| dialect.insert_statement("t", &columns, chunk))
        .collect();
    assert_eq!(singles.len(), 10);
    for stmt in &singles {
        assert_eq!(insert_row_count(stmt), 1);
    }

    // batch_size=4: at most 4 rows per statement, all rows covered.
    let batched: Vec<String> = rows
        .chunks(4)
        .map(|chunk| dialect.insert_statement("t", &columns, chunk))
        .collect();
    assert_eq!(batched.len(), 3);
    let counts: Vec<u64> = batched.iter().map(|s| insert_row_count(s)).collect();
    assert!(counts.iter().all(|&c| c <= 4));
    assert_eq!(counts.iter().sum::<u64>(), 10);
    assert_eq!(counts, vec![4, 4, 2]);
}

#[test]
fn corrupt_compressed_stream_surfaces_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.sql.gz");
    // Not a gzip stream at all.
    std::fs::File::create(&path)
        .unwrap()
        .write_all(b"plainly not gzip")
        .unwrap();

    let reader = codec::open_reader(&path, None).unwrap();
    let result: Result<Vec<String>, _> = StatementReader::new(reader).collect();
    assert!(result.is_err(), "corrupt stream must fail, not truncate");
}

#[test]
fn unterminated_dump_fails_parse_not_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.sql");
    std::fs::write(&path, "CREATE TABLE t (id INT);\nINSERT INTO t VALUES ('open").unwrap();

    let reader = codec::open_reader(&path, None).unwrap();
    let mut stream = StatementReader::new(reader);
    assert_eq!(
        stream.next().unwrap().unwrap(),
        "CREATE TABLE t (id INT)"
    );
    assert!(stream.next().unwrap().is_err());
}
