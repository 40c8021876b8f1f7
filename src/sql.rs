//! First-keyword SQL classification.
//!
//! The dispatcher only needs to know whether a statement reads or writes
//! and whether it is already an EXPLAIN, so classification stops at the
//! first significant keyword. A leading `WITH [RECURSIVE] ... AS (...)`
//! prefix is peeled by scanning for the first DML keyword outside the
//! CTE parentheses.

/// The leading command of a SQL statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlCommand {
    Select,
    Insert,
    Update,
    Delete,
    Explain,
    ExplainQueryPlan,
    /// Any other leading keyword, uppercased (`CREATE`, `PRAGMA`, ...).
    Other(String),
}

impl SqlCommand {
    /// Whether the statement is served by the query endpoint.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Select | Self::Explain | Self::ExplainQueryPlan)
    }
}

/// Classifies `sql` by its first keyword outside comments and strings.
pub fn classify(sql: &str) -> SqlCommand {
    let mut scanner = Scanner::new(sql);
    let first = loop {
        match scanner.next_token() {
            None => return SqlCommand::Other(String::new()),
            Some(Token::Word(word)) => break word,
            Some(_) => continue,
        }
    };

    match first.as_str() {
        "SELECT" => SqlCommand::Select,
        "INSERT" => SqlCommand::Insert,
        "UPDATE" => SqlCommand::Update,
        "DELETE" => SqlCommand::Delete,
        "EXPLAIN" => classify_explain(&mut scanner),
        "WITH" => classify_after_cte(&mut scanner),
        other => SqlCommand::Other(other.to_owned()),
    }
}

fn classify_explain(scanner: &mut Scanner<'_>) -> SqlCommand {
    let mut lookahead = scanner.clone();
    if lookahead.next_word().as_deref() == Some("QUERY")
        && lookahead.next_word().as_deref() == Some("PLAN")
    {
        SqlCommand::ExplainQueryPlan
    } else {
        SqlCommand::Explain
    }
}

/// After a leading `WITH`, the command is the first DML keyword at paren
/// depth zero; everything before it belongs to the CTE list.
fn classify_after_cte(scanner: &mut Scanner<'_>) -> SqlCommand {
    let mut depth = 0usize;
    while let Some(token) = scanner.next_token() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 => match word.as_str() {
                "SELECT" => return SqlCommand::Select,
                "INSERT" => return SqlCommand::Insert,
                "UPDATE" => return SqlCommand::Update,
                "DELETE" => return SqlCommand::Delete,
                _ => {}
            },
            _ => {}
        }
    }
    SqlCommand::Other("WITH".to_owned())
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    LParen,
    RParen,
    Other,
}

/// Minimal SQL scanner: skips whitespace, comments, string literals and
/// quoted identifiers, and yields words and parentheses.
#[derive(Clone)]
struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn next_word(&mut self) -> Option<String> {
        loop {
            match self.next_token()? {
                Token::Word(word) => return Some(word),
                _ => continue,
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_trivia();
        let byte = *self.src.get(self.pos)?;
        match byte {
            b'(' => {
                self.pos += 1;
                Some(Token::LParen)
            }
            b')' => {
                self.pos += 1;
                Some(Token::RParen)
            }
            b'\'' => {
                self.skip_string(b'\'');
                Some(Token::Other)
            }
            b'"' => {
                self.skip_string(b'"');
                Some(Token::Other)
            }
            b'`' => {
                self.skip_string(b'`');
                Some(Token::Other)
            }
            b'[' => {
                self.pos += 1;
                while self.pos < self.src.len() && self.src[self.pos] != b']' {
                    self.pos += 1;
                }
                self.pos = (self.pos + 1).min(self.src.len());
                Some(Token::Other)
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = self.pos;
                while self
                    .src
                    .get(self.pos)
                    .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$')
                {
                    self.pos += 1;
                }
                let word = String::from_utf8_lossy(&self.src[start..self.pos]).to_uppercase();
                Some(Token::Word(word))
            }
            _ => {
                self.pos += 1;
                Some(Token::Other)
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.src.get(self.pos), self.src.get(self.pos + 1)) {
                (Some(b), _) if b.is_ascii_whitespace() => self.pos += 1,
                (Some(b'-'), Some(b'-')) => {
                    while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    self.pos += 2;
                    while self.pos < self.src.len() {
                        if self.src[self.pos] == b'*' && self.src.get(self.pos + 1) == Some(&b'/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    /// Skips a quoted region, honoring the doubled-quote escape.
    fn skip_string(&mut self, quote: u8) {
        self.pos += 1;
        while self.pos < self.src.len() {
            if self.src[self.pos] == quote {
                if self.src.get(self.pos + 1) == Some(&quote) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return;
            }
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, SqlCommand};

    #[test]
    fn plain_commands() {
        assert_eq!(classify("SELECT * FROM t"), SqlCommand::Select);
        assert_eq!(classify("insert into t values (1)"), SqlCommand::Insert);
        assert_eq!(classify("  Update t set v = 1"), SqlCommand::Update);
        assert_eq!(classify("DELETE FROM t"), SqlCommand::Delete);
        assert_eq!(
            classify("CREATE TABLE t(id INTEGER)"),
            SqlCommand::Other("CREATE".to_owned())
        );
        assert_eq!(
            classify("PRAGMA journal_mode"),
            SqlCommand::Other("PRAGMA".to_owned())
        );
    }

    #[test]
    fn explain_variants() {
        assert_eq!(classify("EXPLAIN SELECT 1"), SqlCommand::Explain);
        assert_eq!(
            classify("explain query plan SELECT 1"),
            SqlCommand::ExplainQueryPlan
        );
        assert_eq!(classify("EXPLAIN QUERY SELECT 1"), SqlCommand::Explain);
    }

    #[test]
    fn cte_prefix_is_peeled() {
        assert_eq!(
            classify("WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x"),
            SqlCommand::Insert
        );
        assert_eq!(
            classify("WITH RECURSIVE cnt(n) AS (SELECT 1 UNION ALL SELECT n+1 FROM cnt) SELECT n FROM cnt"),
            SqlCommand::Select
        );
        assert_eq!(
            classify("WITH a AS (SELECT 1), b(c) AS (SELECT 2) DELETE FROM t WHERE v IN (SELECT c FROM b)"),
            SqlCommand::Delete
        );
    }

    #[test]
    fn comments_and_strings_are_skipped() {
        assert_eq!(
            classify("-- delete everything\nSELECT 1"),
            SqlCommand::Select
        );
        assert_eq!(classify("/* INSERT */ SELECT 1"), SqlCommand::Select);
        assert_eq!(
            classify("WITH x AS (SELECT '(' || ')''(' ) UPDATE t SET v = 1"),
            SqlCommand::Update
        );
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(classify(""), SqlCommand::Other(String::new()));
        assert_eq!(classify("   "), SqlCommand::Other(String::new()));
        assert_eq!(classify("WITH"), SqlCommand::Other("WITH".to_owned()));
    }

    #[test]
    fn read_detection() {
        assert!(classify("SELECT 1").is_read());
        assert!(classify("EXPLAIN QUERY PLAN SELECT 1").is_read());
        assert!(!classify("INSERT INTO t VALUES (1)").is_read());
        assert!(!classify("VACUUM").is_read());
    }
}
