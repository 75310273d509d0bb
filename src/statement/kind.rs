use std::sync::LazyLock;

use regex::Regex;

/// Leading keyword of a statement, skipping whitespace and SQL comments.
static LEADING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/)*([A-Za-z]+)")
        .expect("leading keyword regex is valid")
});

/// Coarse classification of a SQL statement by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    /// INSERT, UPDATE, REPLACE, DELETE
    Update,
    Attach,
    Begin,
    Commit,
    /// ROLLBACK, including ROLLBACK TO
    Abort,
    Savepoint,
    Release,
    Pragma,
    /// CREATE, ALTER, DROP
    Ddl,
    /// ANALYZE, DETACH
    Unprepared,
    Other,
}

impl StatementKind {
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        LEADING_KEYWORD
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map_or(StatementKind::Other, |m| {
                Self::from_keyword(&m.as_str().to_ascii_uppercase())
            })
    }

    /// Classify every statement of a semicolon-separated script.
    ///
    /// String literals, quoted identifiers and comments are skipped. The body of a
    /// `CREATE TRIGGER` belongs to the trigger statement, so its inner statements and the
    /// closing `END` are not reported.
    #[must_use]
    pub fn classify_script(sql: &str) -> Vec<Self> {
        leading_keywords(sql)
            .iter()
            .map(|keyword| Self::from_keyword(keyword))
            .collect()
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" | "VALUES" => StatementKind::Select,
            "INSERT" | "UPDATE" | "REPLACE" | "DELETE" => StatementKind::Update,
            "ATTACH" => StatementKind::Attach,
            "BEGIN" => StatementKind::Begin,
            "COMMIT" | "END" => StatementKind::Commit,
            "ROLLBACK" => StatementKind::Abort,
            "SAVEPOINT" => StatementKind::Savepoint,
            "RELEASE" => StatementKind::Release,
            "PRAGMA" => StatementKind::Pragma,
            "CREATE" | "ALTER" | "DROP" => StatementKind::Ddl,
            "ANALYZE" | "DETACH" => StatementKind::Unprepared,
            _ => StatementKind::Other,
        }
    }

    /// Executing this statement may change table or column layouts seen by cached plans.
    #[must_use]
    pub fn alters_schema(self) -> bool {
        matches!(self, StatementKind::Ddl)
    }

    /// Statements that would bypass the connection's transaction stack.
    #[must_use]
    pub fn is_transaction_control(self) -> bool {
        matches!(
            self,
            StatementKind::Begin
                | StatementKind::Commit
                | StatementKind::Abort
                | StatementKind::Savepoint
                | StatementKind::Release
        )
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Index just past the quote that closes the one at `start`. Doubled quotes stay inside.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Upper-cased first keyword of each statement in `sql`.
fn leading_keywords(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut keywords = Vec::new();
    let mut at_start = true;
    let mut words = 0_usize;
    let mut creating_trigger = false;
    let mut in_trigger_body = false;
    let mut body_statement_start = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i, b),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&c| c == b'\n')
                    .map_or(bytes.len(), |end| i + end + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            b';' => {
                if in_trigger_body {
                    body_statement_start = true;
                } else {
                    at_start = true;
                    creating_trigger = false;
                }
                i += 1;
            }
            _ if is_word_byte(b) => {
                let end = bytes[i..]
                    .iter()
                    .position(|&c| !is_word_byte(c))
                    .map_or(bytes.len(), |len| i + len);
                if !b.is_ascii_digit() {
                    let word = sql[i..end].to_ascii_uppercase();
                    if in_trigger_body {
                        if body_statement_start {
                            body_statement_start = false;
                            in_trigger_body = word != "END";
                        }
                    } else if at_start {
                        at_start = false;
                        words = 1;
                        keywords.push(word);
                    } else {
                        words += 1;
                        let creating = keywords.last().is_some_and(|k| k == "CREATE");
                        if creating && word == "TRIGGER" && words <= 3 {
                            creating_trigger = true;
                        } else if creating_trigger && word == "BEGIN" {
                            creating_trigger = false;
                            in_trigger_body = true;
                            body_statement_start = true;
                        }
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    keywords
}
