// パス: src/engine/lexer.rs
// 役割: 数式言語の UTF-8 対応字句解析器とトークン定義を提供する
// 意図: 構文解析に必要な位置付きトークンを生成する
// 関連ファイル: src/engine/parser.rs, src/errors.rs
//! 数式言語の字句解析。
//!
//! - 文字列は `"` で囲み、内部の `"` は `""` と重ねて書く（バックスラッシュエスケープなし）。
//! - `'...'` は空白などを含む識別子を表す。内部の `'` は `''`。
//! - コメントは `//` 行コメントと `/* */` ブロックコメント。
//! - `And` / `Or` / `Not` は演算子キーワードとして扱う。

use crate::errors::LexerError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// 生成されたトークンとその位置情報を保持するレコード。
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: usize,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// 字句解析で識別されるトークンの分類。
pub enum TokenKind {
    EOF,
    LPAREN,
    RPAREN,
    LBRACE,
    RBRACE,
    LBRACK,
    RBRACK,
    COMMA,
    SEMI,
    COLON,
    DOT,
    PLUS,
    MINUS,
    STAR,
    SLASH,
    CARET,
    PERCENT,
    AMP,
    EQUAL,
    NE,
    LT,
    LE,
    GT,
    GE,
    AND,
    OR,
    NOT,
    NUMBER,
    STRING,
    IDENT,
    TRUE,
    FALSE,
}

#[derive(Debug)]
/// 行頭オフセットを事前計算し、行・列情報を素早く算出するヘルパ。
struct LineMap {
    starts: Vec<usize>,
}

impl LineMap {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        for (idx, ch) in src.char_indices() {
            if ch == '\n' {
                starts.push(idx + 1);
            }
        }
        Self { starts }
    }

    /// 指定バイト位置の行番号と桁位置を返す。
    fn locate(&self, src: &str, pos: usize) -> (usize, usize) {
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let start = self.starts[idx];
        let col = src[start..pos].chars().count() + 1;
        (idx + 1, col)
    }

    fn line_text<'a>(&self, src: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.starts.get(i)) else {
            return "";
        };
        let end = self.starts.get(line).copied().unwrap_or(src.len());
        let slice = &src[start..end];
        slice.strip_suffix('\n').unwrap_or(slice)
    }
}

/// 識別子の先頭に使用可能な文字かどうかを判定する。
fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}
/// 識別子の後続として許容される文字か判定する。
fn is_ident_rest(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    src: &'a str,
    cursor: usize,
    line_map: LineMap,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            cursor: 0,
            line_map: LineMap::new(src),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexerError> {
        loop {
            self.consume_trivia()?;
            let Some(ch) = self.peek_char() else {
                break;
            };
            self.lex_token(ch)?;
        }
        self.push(TokenKind::EOF, String::new(), self.src.len());
        Ok(self.tokens)
    }

    fn consume_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match self.peek_char() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance_char();
                }
                Some('/') if self.starts_with("//") => {
                    while let Some(ch) = self.advance_char() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.starts_with("/*") => {
                    let start = self.cursor;
                    match self.src[start + 2..].find("*/") {
                        Some(end) => self.cursor = start + 2 + end + 2,
                        None => {
                            return Err(self.err("LEX001", "Unterminated block comment.", start))
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_token(&mut self, ch: char) -> Result<(), LexerError> {
        if self.try_multi_char_symbol() || self.try_single_char_symbol(ch) {
            return Ok(());
        }
        if ch == '"' {
            return self.lex_string_literal();
        }
        if ch == '\'' {
            return self.lex_quoted_identifier();
        }
        if ch.is_ascii_digit() {
            self.lex_number();
            return Ok(());
        }
        if is_ident_start(ch) {
            self.lex_identifier_or_keyword();
            return Ok(());
        }
        Err(self.err("LEX090", format!("Unexpected character {:?}.", ch), self.cursor))
    }

    fn try_multi_char_symbol(&mut self) -> bool {
        const SYMBOLS: &[(&str, TokenKind)] = &[
            ("<>", TokenKind::NE),
            ("<=", TokenKind::LE),
            (">=", TokenKind::GE),
            ("&&", TokenKind::AND),
            ("||", TokenKind::OR),
        ];
        for (text, kind) in SYMBOLS {
            if self.starts_with(text) {
                let start = self.cursor;
                self.cursor += text.len();
                self.push(kind.clone(), (*text).to_string(), start);
                return true;
            }
        }
        false
    }

    fn try_single_char_symbol(&mut self, ch: char) -> bool {
        let kind = match ch {
            '(' => TokenKind::LPAREN,
            ')' => TokenKind::RPAREN,
            '{' => TokenKind::LBRACE,
            '}' => TokenKind::RBRACE,
            '[' => TokenKind::LBRACK,
            ']' => TokenKind::RBRACK,
            ',' => TokenKind::COMMA,
            ';' => TokenKind::SEMI,
            ':' => TokenKind::COLON,
            '.' => TokenKind::DOT,
            '+' => TokenKind::PLUS,
            '-' => TokenKind::MINUS,
            '*' => TokenKind::STAR,
            '/' => TokenKind::SLASH,
            '^' => TokenKind::CARET,
            '%' => TokenKind::PERCENT,
            '&' => TokenKind::AMP,
            '=' => TokenKind::EQUAL,
            '<' => TokenKind::LT,
            '>' => TokenKind::GT,
            '!' => TokenKind::NOT,
            _ => return false,
        };
        let start = self.cursor;
        self.advance_char();
        self.push(kind, ch.to_string(), start);
        true
    }

    /// `"..."` を読み、`""` を `"` に戻した本文をトークン値とする。
    fn lex_string_literal(&mut self) -> Result<(), LexerError> {
        let start = self.cursor;
        let body = self.read_delimited('"', "LEX003", "Unterminated string literal.")?;
        self.push(TokenKind::STRING, body, start);
        Ok(())
    }

    fn lex_quoted_identifier(&mut self) -> Result<(), LexerError> {
        let start = self.cursor;
        let body = self.read_delimited('\'', "LEX004", "Unterminated quoted identifier.")?;
        if body.is_empty() {
            return Err(self.err("LEX005", "Empty identifier.", start));
        }
        self.push(TokenKind::IDENT, body, start);
        Ok(())
    }

    fn read_delimited(
        &mut self,
        quote: char,
        code: &'static str,
        msg: &str,
    ) -> Result<String, LexerError> {
        let start = self.cursor;
        self.advance_char(); // 開始クォート
        let mut body = String::new();
        loop {
            match self.advance_char() {
                None => return Err(self.err(code, msg, start)),
                Some(ch) if ch == quote => {
                    if self.peek_char() == Some(quote) {
                        self.advance_char();
                        body.push(quote);
                    } else {
                        return Ok(body);
                    }
                }
                Some(ch) => body.push(ch),
            }
        }
    }

    fn lex_number(&mut self) {
        let start = self.cursor;
        self.skip_digits();
        if self.peek_char() == Some('.') && self.peek_second_char().is_some_and(|c| c.is_ascii_digit())
        {
            self.advance_char(); // '.'
            self.skip_digits();
        }
        if let Some('e') | Some('E') = self.peek_char() {
            let mut idx = self.cursor + 1;
            if let Some('+') | Some('-') = self.char_at(idx) {
                idx += 1;
            }
            if self.char_at(idx).is_some_and(|c| c.is_ascii_digit()) {
                self.cursor = idx;
                self.skip_digits();
            }
        }
        let text = self.src[start..self.cursor].to_string();
        self.push(TokenKind::NUMBER, text, start);
    }

    fn skip_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance_char();
        }
    }

    fn lex_identifier_or_keyword(&mut self) {
        let start = self.cursor;
        while self.peek_char().is_some_and(is_ident_rest) {
            self.advance_char();
        }
        let slice = &self.src[start..self.cursor];
        let kind = match slice {
            "true" => TokenKind::TRUE,
            "false" => TokenKind::FALSE,
            "And" => TokenKind::AND,
            "Or" => TokenKind::OR,
            "Not" => TokenKind::NOT,
            _ => TokenKind::IDENT,
        };
        self.push(kind, slice.to_string(), start);
    }

    fn push(&mut self, kind: TokenKind, value: String, start: usize) {
        let (line, col) = self.line_map.locate(self.src, start);
        self.tokens.push(Token {
            kind,
            value,
            pos: start,
            line,
            col,
        });
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.cursor..].chars().next()
    }

    fn peek_second_char(&self) -> Option<char> {
        let mut iter = self.src[self.cursor..].chars();
        iter.next()?;
        iter.next()
    }

    fn char_at(&self, idx: usize) -> Option<char> {
        self.src.get(idx..).and_then(|s| s.chars().next())
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.cursor += ch.len_utf8();
        Some(ch)
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.src[self.cursor..].starts_with(pattern)
    }

    fn err(&self, code: &'static str, message: impl Into<String>, pos: usize) -> LexerError {
        let (line, col) = self.line_map.locate(self.src, pos);
        LexerError::at_with_snippet(
            code,
            message,
            Some(pos),
            Some(line),
            Some(col),
            self.line_map.line_text(self.src, line).to_string(),
        )
    }
}

pub fn lex(src: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(src).run()
}
