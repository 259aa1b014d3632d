// ABOUTME: Lazy statement tokenizer over a decompressed dump byte stream
// ABOUTME: Splits on top-level separators, aware of quotes, escapes and comments

use crate::error::TransferError;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Single,
    Double,
    Backtick,
    LineComment,
    BlockComment,
    Dollar,
}

enum ScanOutcome {
    /// Byte offset of a top-level separator in the buffer.
    Found(usize),
    /// The buffer is exhausted (or a lookahead spans its end).
    NeedMore,
}

enum TagMatch {
    Opened(usize, String),
    NotATag,
    NeedMore,
}

/// Lazily tokenizes a byte stream into discrete executable SQL statements.
///
/// A statement ends at a `;` that is not inside a single-, double- or
/// backtick-quoted span, a `--`/`#` line comment, a `/* */` block comment
/// or a PostgreSQL dollar-quoted string. Comment-only segments are
/// swallowed; MySQL `/*! ... */` conditional statements are kept. The
/// sequence is finite and non-restartable; an unterminated quote or
/// comment at end of input yields a parse error, never a truncated
/// statement.
pub struct StatementReader<R: BufRead> {
    input: R,
    buf: String,
    /// Bytes of `buf` already scanned.
    scan: usize,
    state: State,
    dollar_tag: Option<String>,
    escape_pending: bool,
    has_content: bool,
    /// Treat backslash as an escape inside quoted strings (MariaDB dumps).
    backslash_escapes: bool,
    /// Recognize `$tag$ ... $tag$` spans (PostgreSQL dumps).
    dollar_quoting: bool,
    /// Statements yielded so far, for error positions.
    index: u64,
    eof: bool,
    done: bool,
}

impl<R: BufRead> StatementReader<R> {
    pub fn new(input: R) -> Self {
        StatementReader {
            input,
            buf: String::new(),
            scan: 0,
            state: State::Normal,
            dollar_tag: None,
            escape_pending: false,
            has_content: false,
            backslash_escapes: true,
            dollar_quoting: true,
            index: 0,
            eof: false,
            done: false,
        }
    }

    pub fn with_backslash_escapes(mut self, enabled: bool) -> Self {
        self.backslash_escapes = enabled;
        self
    }

    pub fn with_dollar_quoting(mut self, enabled: bool) -> Self {
        self.dollar_quoting = enabled;
        self
    }

    fn byte(&self, i: usize) -> u8 {
        self.buf.as_bytes()[i]
    }

    fn match_dollar_tag(&self, start: usize) -> TagMatch {
        let len = self.buf.len();
        let mut j = start + 1;
        while j < len {
            let b = self.byte(j);
            if b == b'$' {
                return TagMatch::Opened(j - start + 1, self.buf[start..=j].to_string());
            }
            if !(b.is_ascii_alphanumeric() || b == b'_') {
                return TagMatch::NotATag;
            }
            j += 1;
        }
        if self.eof {
            TagMatch::NotATag
        } else {
            TagMatch::NeedMore
        }
    }

    fn find_separator(&mut self) -> ScanOutcome {
        let len = self.buf.len();
        let mut i = self.scan;
        while i < len {
            let b = self.byte(i);
            if self.escape_pending {
                self.escape_pending = false;
                i += 1;
                continue;
            }
            match self.state {
                State::Normal => match b {
                    b';' => {
                        self.scan = i;
                        return ScanOutcome::Found(i);
                    }
                    b'\'' => {
                        self.state = State::Single;
                        self.has_content = true;
                    }
                    b'"' => {
                        self.state = State::Double;
                        self.has_content = true;
                    }
                    b'`' => {
                        self.state = State::Backtick;
                        self.has_content = true;
                    }
                    b'#' => self.state = State::LineComment,
                    b'-' => {
                        if i + 1 >= len {
                            if !self.eof {
                                self.scan = i;
                                return ScanOutcome::NeedMore;
                            }
                            self.has_content = true;
                        } else if self.byte(i + 1) == b'-' {
                            self.state = State::LineComment;
                            i += 1;
                        } else {
                            self.has_content = true;
                        }
                    }
                    b'/' => {
                        if i + 1 >= len {
                            if !self.eof {
                                self.scan = i;
                                return ScanOutcome::NeedMore;
                            }
                            self.has_content = true;
                        } else if self.byte(i + 1) == b'*' {
                            // MySQL /*!NNNNN ... */ spans are executable.
                            if i + 2 < len && self.byte(i + 2) == b'!' {
                                self.has_content = true;
                            }
                            self.state = State::BlockComment;
                            i += 1;
                        } else {
                            self.has_content = true;
                        }
                    }
                    b'$' if self.dollar_quoting => match self.match_dollar_tag(i) {
                        TagMatch::Opened(tag_len, tag) => {
                            self.state = State::Dollar;
                            self.dollar_tag = Some(tag);
                            self.has_content = true;
                            i += tag_len - 1;
                        }
                        TagMatch::NotATag => self.has_content = true,
                        TagMatch::NeedMore => {
                            self.scan = i;
                            return ScanOutcome::NeedMore;
                        }
                    },
                    _ => {
                        if !b.is_ascii_whitespace() {
                            self.has_content = true;
                        }
                    }
                },
                State::Single => match b {
                    b'\'' => self.state = State::Normal,
                    b'\\' if self.backslash_escapes => {
                        if i + 1 >= len {
                            self.escape_pending = true;
                        } else {
                            i += 1;
                        }
                    }
                    _ => {}
                },
                State::Double => match b {
                    b'"' => self.state = State::Normal,
                    b'\\' if self.backslash_escapes => {
                        if i + 1 >= len {
                            self.escape_pending = true;
                        } else {
                            i += 1;
                        }
                    }
                    _ => {}
                },
                State::Backtick => {
                    if b == b'`' {
                        self.state = State::Normal;
                    }
                }
                State::LineComment => {
                    if b == b'\n' {
                        self.state = State::Normal;
                    }
                }
                State::BlockComment => {
                    if b == b'*' {
                        if i + 1 >= len {
                            if !self.eof {
                                self.scan = i;
                                return ScanOutcome::NeedMore;
                            }
                        } else if self.byte(i + 1) == b'/' {
                            self.state = State::Normal;
                            i += 1;
                        }
                    }
                }
                State::Dollar => {
                    if b == b'$' {
                        let tag_len = self.dollar_tag.as_ref().map(|t| t.len()).unwrap_or(1);
                        if i + tag_len > len {
                            if !self.eof {
                                self.scan = i;
                                return ScanOutcome::NeedMore;
                            }
                        } else if self
                            .dollar_tag
                            .as_deref()
                            .is_some_and(|t| &self.buf[i..i + tag_len] == t)
                        {
                            self.state = State::Normal;
                            self.dollar_tag = None;
                            i += tag_len - 1;
                        }
                    }
                }
            }
            i += 1;
        }
        self.scan = i;
        ScanOutcome::NeedMore
    }

    fn take_statement(&mut self, sep: usize) -> Option<String> {
        let stmt = self.buf[..sep].trim().to_string();
        self.buf.drain(..=sep);
        self.scan = 0;
        let had_content = self.has_content;
        self.has_content = false;
        if had_content && !stmt.is_empty() {
            self.index += 1;
            Some(stmt)
        } else {
            None
        }
    }

    fn finish_at_eof(&mut self) -> Option<Result<String, TransferError>> {
        self.done = true;
        let unterminated = |what: &str, index: u64| {
            Some(Err(TransferError::parse(
                index + 1,
                format!("unterminated {} at end of input", what),
            )))
        };
        match self.state {
            State::Normal | State::LineComment => {
                let stmt = self.buf.trim().to_string();
                if self.has_content && !stmt.is_empty() {
                    self.index += 1;
                    Some(Ok(stmt))
                } else {
                    None
                }
            }
            State::Single | State::Double | State::Backtick => {
                unterminated("quoted string", self.index)
            }
            State::BlockComment => unterminated("block comment", self.index),
            State::Dollar => unterminated("dollar-quoted string", self.index),
        }
    }
}

impl<R: BufRead> Iterator for StatementReader<R> {
    type Item = Result<String, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.find_separator() {
                ScanOutcome::Found(sep) => {
                    if let Some(stmt) = self.take_statement(sep) {
                        return Some(Ok(stmt));
                    }
                }
                ScanOutcome::NeedMore => {
                    if self.eof {
                        return self.finish_at_eof();
                    }
                    match self.input.read_line(&mut self.buf) {
                        Ok(0) => self.eof = true,
                        Ok(_) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
    }
}

/// Writes statements to a dump sink, one per line, separator-terminated.
pub struct StatementWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> StatementWriter<W> {
    pub fn new(inner: W) -> Self {
        StatementWriter { inner, bytes: 0 }
    }

    pub fn write_statement(&mut self, statement: &str) -> std::io::Result<()> {
        self.inner.write_all(statement.as_bytes())?;
        self.inner.write_all(b";\n")?;
        self.bytes += statement.len() as u64 + 2;
        Ok(())
    }

    pub fn write_comment(&mut self, text: &str) -> std::io::Result<()> {
        let line = format!("-- {}\n", text);
        self.inner.write_all(line.as_bytes())?;
        self.bytes += line.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &str) -> Vec<String> {
        StatementReader::new(Cursor::new(input))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn read_pg(input: &str) -> Vec<String> {
        StatementReader::new(Cursor::new(input))
            .with_backslash_escapes(false)
            .with_dollar_quoting(true)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_two_simple_statements() {
        let stmts = read_all("SELECT 1;\nSELECT 2;\n");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_separator_inside_single_quotes() {
        let stmts = read_all("INSERT INTO t VALUES ('a;b');SELECT 1;");
        assert_eq!(stmts, vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]);
    }

    #[test]
    fn test_separator_inside_double_quotes_and_backticks() {
        let stmts = read_all("CREATE TABLE \"a;b\" (`c;d` INT);");
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("a;b"));
        assert!(stmts[0].contains("c;d"));
    }

    #[test]
    fn test_backslash_escaped_quote() {
        let stmts = read_all(r"INSERT INTO t VALUES ('it\'s; fine');SELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], r"INSERT INTO t VALUES ('it\'s; fine')");
    }

    #[test]
    fn test_doubled_quote_inside_string() {
        let stmts = read_all("INSERT INTO t VALUES ('it''s; fine');SELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('it''s; fine')");
    }

    #[test]
    fn test_backslash_literal_when_escapes_disabled() {
        // PostgreSQL standard strings: backslash is a plain character, so
        // the quote after it closes the string.
        let stmts = read_pg("INSERT INTO t VALUES ('c:\\');SELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('c:\\')");
    }

    #[test]
    fn test_line_comment_hides_separator() {
        let stmts = read_all("SELECT 1 -- trailing; not a separator\n, 2;");
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].starts_with("SELECT 1"));
        assert!(stmts[0].ends_with(", 2"));
    }

    #[test]
    fn test_hash_comment_hides_separator() {
        let stmts = read_all("SELECT 1 # no; split here\n+ 1;");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_block_comment_hides_separator() {
        let stmts = read_all("SELECT /* not; here */ 1;SELECT 2;");
        assert_eq!(stmts, vec!["SELECT /* not; here */ 1", "SELECT 2"]);
    }

    #[test]
    fn test_comment_only_segments_swallowed() {
        let stmts = read_all("-- header comment\n;\n/* block */;\nSELECT 1;");
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn test_conditional_comment_kept_as_statement() {
        let stmts = read_all("/*!40101 SET NAMES utf8mb4 */;\nSELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "/*!40101 SET NAMES utf8mb4 */");
    }

    #[test]
    fn test_dollar_quoted_body() {
        let stmts = read_pg(
            "CREATE FUNCTION f() RETURNS int AS $fn$ BEGIN RETURN 1; END $fn$ LANGUAGE plpgsql;SELECT 1;",
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("RETURN 1; END"));
    }

    #[test]
    fn test_anonymous_dollar_quote() {
        let stmts = read_pg("DO $$ BEGIN NULL; END $$;SELECT 2;");
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("NULL; END"));
    }

    #[test]
    fn test_dollar_sign_that_is_not_a_tag() {
        let stmts = read_all("SELECT price, 1 $ 2 FROM t;");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_multi_row_insert_preserved_verbatim() {
        let input = "INSERT INTO users (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c');";
        let stmts = read_all(input);
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0], input.trim_end_matches(';'));
    }

    #[test]
    fn test_statement_spanning_many_lines() {
        let input = "INSERT INTO t VALUES\n(1, 'a'),\n(2, 'b;c'),\n(3, 'd');\n";
        let stmts = read_all(input);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("b;c"));
    }

    #[test]
    fn test_trailing_statement_without_separator() {
        let stmts = read_all("SELECT 1;\nSELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(read_all("").is_empty());
        assert!(read_all("  \n\n  ").is_empty());
    }

    #[test]
    fn test_unterminated_quote_is_parse_error() {
        let result: Result<Vec<_>, _> =
            StatementReader::new(Cursor::new("SELECT 'oops")).collect();
        match result {
            Err(TransferError::Parse { message, .. }) => {
                assert!(message.contains("quoted string"));
            }
            other => panic!("expected parse error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_unterminated_block_comment_is_parse_error() {
        let result: Result<Vec<_>, _> =
            StatementReader::new(Cursor::new("SELECT 1; /* never closed")).collect();
        assert!(matches!(result, Err(TransferError::Parse { .. })));
    }

    #[test]
    fn test_unterminated_dollar_quote_is_parse_error() {
        let result: Result<Vec<_>, _> = StatementReader::new(Cursor::new("DO $$ BEGIN"))
            .with_backslash_escapes(false)
            .collect();
        assert!(matches!(result, Err(TransferError::Parse { .. })));
    }

    #[test]
    fn test_parse_error_reports_statement_position() {
        let result: Result<Vec<_>, _> =
            StatementReader::new(Cursor::new("SELECT 1;\nSELECT 2;\nSELECT 'bad")).collect();
        match result {
            Err(TransferError::Parse { index, .. }) => assert_eq!(index, 3),
            other => panic!("expected parse error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_writer_counts_bytes() {
        let mut writer = StatementWriter::new(Vec::new());
        writer.write_statement("SELECT 1").unwrap();
        writer.write_comment("header").unwrap();
        let expected = "SELECT 1;\n".len() as u64 + "-- header\n".len() as u64;
        assert_eq!(writer.bytes_written(), expected);
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(out, "SELECT 1;\n-- header\n");
    }

    #[test]
    fn test_writer_reader_roundtrip() {
        let statements = vec![
            "CREATE TABLE t (id INT, note TEXT)".to_string(),
            "INSERT INTO t VALUES (1, 'semi;colon'), (2, 'it''s')".to_string(),
        ];
        let mut writer = StatementWriter::new(Vec::new());
        for s in &statements {
            writer.write_statement(s).unwrap();
        }
        let bytes = writer.into_inner();
        let back = StatementReader::new(Cursor::new(bytes))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(back, statements);
    }
}
