// パス: src/repl/classify.rs
// 役割: Structural classification of a completed statement into a Statement variant
// 意図: Route input by shape alone so the dispatcher never inspects raw text
// 関連ファイル: src/repl/accumulator.rs, src/repl/dispatch.rs
//! 文の分類。
//!
//! 次の順に構造だけを照合し、最初に一致したものを採用する（文法解析はしない）。
//! 1. `Set(<識別子>, <残り>)` → `Assignment`
//! 2. `<識別子> = <残り>`（`==` は除く）→ `NamedFormula`
//! 3. `<識別子>(<名前>: <型>, ...): <型>` に続く `=` または `{` → `FunctionDefinition`
//! 4. 空白とコメント以外の文字を含む → `Evaluation`
//! 5. それ以外 → `Empty`
//!
//! 文字列リテラル内の `=` は考慮しないため、`"a = b"` のような先頭識別子に続く
//! `=` を含む入力は `NamedFormula` と判定されうる。

use super::accumulator::scan;

/// 分類済みの文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Assignment { identifier: String, expression: String },
    NamedFormula { identifier: String, formula: String },
    FunctionDefinition { raw_text: String },
    Evaluation { expression: String },
    Empty,
}

/// 文を分類する。純粋関数でセッション状態には触れない。
pub fn classify(statement: &str) -> Statement {
    let text = statement.trim();
    if scan(text).non_trivial_char_count == 0 {
        return Statement::Empty;
    }
    if let Some((identifier, expression)) = match_set(text) {
        return Statement::Assignment {
            identifier: identifier.to_string(),
            expression: expression.to_string(),
        };
    }
    if let Some((identifier, formula)) = match_named_formula(text) {
        return Statement::NamedFormula {
            identifier: identifier.to_string(),
            formula: formula.to_string(),
        };
    }
    if is_function_definition(text) {
        return Statement::FunctionDefinition {
            raw_text: text.to_string(),
        };
    }
    Statement::Evaluation {
        expression: text.to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 構造照合用の小さなカーソル。
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// 英数字とアンダースコアの最長の並びを読む。
    fn word(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }
}

/// `Set( ident , rest )`。`rest` は最後の `)` の手前まで。
fn match_set(text: &str) -> Option<(&str, &str)> {
    let mut cur = Cursor::new(text);
    if !cur.eat_str("Set") {
        return None;
    }
    cur.skip_ws();
    if !cur.eat('(') {
        return None;
    }
    cur.skip_ws();
    let ident = cur.word()?;
    cur.skip_ws();
    if !cur.eat(',') {
        return None;
    }
    let inner = cur.rest().strip_suffix(')')?;
    Some((ident, inner.trim()))
}

/// `ident = rest`。`=` の直後が `=` なら一致しない。
fn match_named_formula(text: &str) -> Option<(&str, &str)> {
    let mut cur = Cursor::new(text);
    let ident = cur.word()?;
    cur.skip_ws();
    if !cur.eat('=') || cur.rest().starts_with('=') {
        return None;
    }
    Some((ident, cur.rest().trim()))
}

/// `ident ( (p : T ,?)* ) : R` に続いて `=` か `{` が来るか。
fn is_function_definition(text: &str) -> bool {
    let mut cur = Cursor::new(text);
    if cur.word().is_none() {
        return false;
    }
    cur.skip_ws();
    if !cur.eat('(') {
        return false;
    }
    loop {
        cur.skip_ws();
        if cur.eat(')') {
            break;
        }
        if cur.word().is_none() {
            return false;
        }
        cur.skip_ws();
        if !cur.eat(':') {
            return false;
        }
        cur.skip_ws();
        if cur.word().is_none() {
            return false;
        }
        cur.skip_ws();
        cur.eat(',');
    }
    cur.skip_ws();
    if !cur.eat(':') {
        return false;
    }
    cur.skip_ws();
    if cur.word().is_none() {
        return false;
    }
    cur.skip_ws();
    cur.rest().starts_with('=') || cur.rest().starts_with('{')
}
