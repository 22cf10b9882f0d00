// パス: src/engine/parser.rs
// 役割: 数式とユーザー定義関数の再帰下降パーサを実装する
// 意図: 演算子の優先順位を 1 つの表にまとめ、すべてのエラーに位置を付ける
// 関連ファイル: src/engine/lexer.rs, src/engine/ast.rs, src/engine/recalc.rs
//! 構文解析。
//!
//! - 中置演算子の優先順位と結合性は `INFIX_LEVELS` の並び順（弱い順）で決まる。
//! - 単項演算子は中置演算子よりも強く結合し、`-2^2` は `(-2)^2` と読む。
//! - 後置の `%` とフィールド参照 `.` は単項演算子よりさらに強い。
//! - 関数定義は `;` で複数並べられ、`=` 本体は連結式を含まない。
//! - 括弧や単項演算子の入れ子は `MAX_NESTING` までに制限する。

use super::ast::{BinOp, Expr, FunctionDef, Param, TypeRef, UnaryOp};
use super::lexer::{lex, Token, TokenKind};
use super::EngineError;
use crate::errors::ParseError;

#[derive(Clone, Copy)]
enum Assoc {
    Left,
    Right,
    Non,
}

struct InfixSpec {
    tokens: &'static [TokenKind],
    assoc: Assoc,
}

impl InfixSpec {
    fn contains(&self, kind: &TokenKind) -> bool {
        self.tokens.iter().any(|tk| tk == kind)
    }
}

const INFIX_LEVELS: &[InfixSpec] = &[
    InfixSpec {
        tokens: &[TokenKind::OR],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[TokenKind::AND],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[
            TokenKind::EQUAL,
            TokenKind::NE,
            TokenKind::LT,
            TokenKind::LE,
            TokenKind::GT,
            TokenKind::GE,
        ],
        assoc: Assoc::Non,
    },
    InfixSpec {
        tokens: &[TokenKind::AMP],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[TokenKind::PLUS, TokenKind::MINUS],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[TokenKind::STAR, TokenKind::SLASH],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[TokenKind::CARET],
        assoc: Assoc::Right,
    },
];

fn binop_of(kind: &TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::OR => BinOp::Or,
        TokenKind::AND => BinOp::And,
        TokenKind::EQUAL => BinOp::Eq,
        TokenKind::NE => BinOp::Ne,
        TokenKind::LT => BinOp::Lt,
        TokenKind::LE => BinOp::Le,
        TokenKind::GT => BinOp::Gt,
        TokenKind::GE => BinOp::Ge,
        TokenKind::AMP => BinOp::Concat,
        TokenKind::PLUS => BinOp::Add,
        TokenKind::MINUS => BinOp::Sub,
        TokenKind::STAR => BinOp::Mul,
        TokenKind::SLASH => BinOp::Div,
        TokenKind::CARET => BinOp::Pow,
        _ => return None,
    })
}

/// 式の入れ子の上限。
pub const MAX_NESTING: usize = 100;

struct Parser {
    ts: Vec<Token>,
    i: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            ts: tokens,
            i: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        // lex は必ず EOF で終わるので末尾を指し続ける
        let last = self.ts.len().saturating_sub(1);
        &self.ts[self.i.min(last)]
    }

    fn pop_any(&mut self) -> Token {
        let t = self.peek().clone();
        if t.kind != TokenKind::EOF {
            self.i += 1;
        }
        t
    }

    fn pop(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let t = self.peek().clone();
        if t.kind != kind {
            return Err(self.err_here(
                "PAR001",
                format!("Expected {:?} but found {:?} ({}).", kind, t.kind, t.value),
            ));
        }
        self.i += 1;
        Ok(t)
    }

    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().kind == kind {
            Some(self.pop_any())
        } else {
            None
        }
    }

    fn err_here(&self, code: &'static str, msg: impl Into<String>) -> ParseError {
        let t = self.peek();
        ParseError::at(code, msg, Some(t.pos), Some(t.line), Some(t.col))
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.peek().kind != TokenKind::EOF {
            let t = self.peek();
            return Err(self.err_here(
                "PAR090",
                format!("Unexpected characters after the expression: {}", t.value),
            ));
        }
        Ok(())
    }

    /// `a; b; c` を読む。末尾の `;` は許容する。
    fn parse_chain(&mut self, end: TokenKind) -> Result<Expr, ParseError> {
        let mut items = vec![self.parse_expr()?];
        while self.accept(TokenKind::SEMI).is_some() {
            if self.peek().kind == end {
                break;
            }
            items.push(self.parse_expr()?);
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Expr::Chain(items))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_infix_level(0)
    }

    fn parse_infix_level(&mut self, level: usize) -> Result<Expr, ParseError> {
        if level >= INFIX_LEVELS.len() {
            return self.parse_unary();
        }
        let spec = &INFIX_LEVELS[level];
        let mut left = self.parse_infix_level(level + 1)?;
        match spec.assoc {
            Assoc::Left => {
                while spec.contains(&self.peek().kind) {
                    let op_token = self.pop_any();
                    let right = self.parse_infix_level(level + 1)?;
                    left = Self::mk_binop(left, &op_token, right)?;
                }
                Ok(left)
            }
            Assoc::Right => {
                if spec.contains(&self.peek().kind) {
                    let op_token = self.pop_any();
                    let right = self.parse_infix_level(level)?;
                    Self::mk_binop(left, &op_token, right)
                } else {
                    Ok(left)
                }
            }
            Assoc::Non => {
                if spec.contains(&self.peek().kind) {
                    let op_token = self.pop_any();
                    let right = self.parse_infix_level(level + 1)?;
                    Self::mk_binop(left, &op_token, right)
                } else {
                    Ok(left)
                }
            }
        }
    }

    fn mk_binop(left: Expr, op_token: &Token, right: Expr) -> Result<Expr, ParseError> {
        let op = binop_of(&op_token.kind).ok_or_else(|| {
            ParseError::at(
                "PAR010",
                format!("Unknown operator: {}", op_token.value),
                Some(op_token.pos),
                Some(op_token.line),
                Some(op_token.col),
            )
        })?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// 入れ子はすべてここを通るので、深さをここで数える。
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.err_here(
                "PAR050",
                format!("Expression is nested too deeply (limit {}).", MAX_NESTING),
            ));
        }
        self.depth += 1;
        let result = self.parse_unary_op();
        self.depth -= 1;
        result
    }

    fn parse_unary_op(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::MINUS => UnaryOp::Neg,
            TokenKind::NOT => UnaryOp::Not,
            TokenKind::PLUS => {
                self.pop_any();
                return self.parse_unary();
            }
            _ => return self.parse_postfix(),
        };
        self.pop_any();
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.accept(TokenKind::PERCENT).is_some() {
                expr = Expr::Percent(Box::new(expr));
            } else if self.accept(TokenKind::DOT).is_some() {
                let field = self.pop(TokenKind::IDENT)?;
                expr = Expr::Field {
                    expr: Box::new(expr),
                    name: field.value,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::NUMBER => {
                self.pop_any();
                let value = tok.value.parse::<f64>().map_err(|_| {
                    ParseError::at(
                        "PAR020",
                        format!("Invalid number literal: {}", tok.value),
                        Some(tok.pos),
                        Some(tok.line),
                        Some(tok.col),
                    )
                })?;
                Ok(Expr::Number(value))
            }
            TokenKind::STRING => {
                self.pop_any();
                Ok(Expr::Str(tok.value))
            }
            TokenKind::TRUE | TokenKind::FALSE => {
                self.pop_any();
                Ok(Expr::Bool(tok.kind == TokenKind::TRUE))
            }
            TokenKind::IDENT => {
                self.pop_any();
                if self.accept(TokenKind::LPAREN).is_some() {
                    let args = self.parse_args(TokenKind::RPAREN)?;
                    Ok(Expr::Call {
                        name: tok.value,
                        args,
                        pos: tok.pos,
                    })
                } else {
                    Ok(Expr::Ident {
                        name: tok.value,
                        pos: tok.pos,
                    })
                }
            }
            TokenKind::LPAREN => {
                self.pop_any();
                let inner = self.parse_chain(TokenKind::RPAREN)?;
                self.pop(TokenKind::RPAREN)?;
                Ok(inner)
            }
            TokenKind::LBRACE => self.parse_record(),
            TokenKind::LBRACK => {
                self.pop_any();
                let items = self.parse_args(TokenKind::RBRACK)?;
                Ok(Expr::Table(items))
            }
            TokenKind::EOF => Err(self.err_here("PAR030", "Expected an expression.")),
            _ => Err(self.err_here("PAR031", format!("Unexpected token: {}", tok.value))),
        }
    }

    /// 開き括弧の直後から `end` までのカンマ区切り式を読む。
    fn parse_args(&mut self, end: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.accept(end.clone()).is_some() {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.accept(TokenKind::COMMA).is_some() {
                continue;
            }
            self.pop(end)?;
            return Ok(args);
        }
    }

    fn parse_record(&mut self) -> Result<Expr, ParseError> {
        self.pop(TokenKind::LBRACE)?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        if self.accept(TokenKind::RBRACE).is_some() {
            return Ok(Expr::Record(fields));
        }
        loop {
            let name = self.pop(TokenKind::IDENT)?;
            if fields.iter().any(|(n, _)| *n == name.value) {
                return Err(ParseError::at(
                    "PAR040",
                    format!("Duplicate field name: {}", name.value),
                    Some(name.pos),
                    Some(name.line),
                    Some(name.col),
                ));
            }
            self.pop(TokenKind::COLON)?;
            let value = self.parse_expr()?;
            fields.push((name.value, value));
            if self.accept(TokenKind::COMMA).is_some() {
                continue;
            }
            self.pop(TokenKind::RBRACE)?;
            return Ok(Expr::Record(fields));
        }
    }

    fn parse_type_ref(&mut self) -> Result<TypeRef, ParseError> {
        let tok = self.pop(TokenKind::IDENT)?;
        Ok(TypeRef {
            name: tok.value,
            pos: tok.pos,
        })
    }

    fn parse_function_def(&mut self) -> Result<FunctionDef, ParseError> {
        let name = self.pop(TokenKind::IDENT)?;
        self.pop(TokenKind::LPAREN)?;
        let mut params: Vec<Param> = Vec::new();
        if self.accept(TokenKind::RPAREN).is_none() {
            loop {
                let pname = self.pop(TokenKind::IDENT)?;
                self.pop(TokenKind::COLON)?;
                let ty = self.parse_type_ref()?;
                params.push(Param {
                    name: pname.value,
                    ty,
                });
                if self.accept(TokenKind::COMMA).is_some() {
                    continue;
                }
                self.pop(TokenKind::RPAREN)?;
                break;
            }
        }
        self.pop(TokenKind::COLON)?;
        let ret = self.parse_type_ref()?;
        let body = if self.accept(TokenKind::LBRACE).is_some() {
            let body = self.parse_chain(TokenKind::RBRACE)?;
            self.pop(TokenKind::RBRACE)?;
            body
        } else {
            self.pop(TokenKind::EQUAL)?;
            self.parse_expr()?
        };
        Ok(FunctionDef {
            name: name.value,
            pos: name.pos,
            params,
            ret,
            body,
        })
    }

    fn parse_function_defs(&mut self) -> Result<Vec<FunctionDef>, ParseError> {
        let mut defs = Vec::new();
        loop {
            defs.push(self.parse_function_def()?);
            let separated = self.accept(TokenKind::SEMI).is_some();
            if !separated || self.peek().kind == TokenKind::EOF {
                self.expect_eof()?;
                return Ok(defs);
            }
        }
    }
}

/// 数式（`;` 連結を含む）を解析する。
pub fn parse_formula(src: &str) -> Result<Expr, EngineError> {
    let ts = lex(src)?;
    let mut p = Parser::new(ts);
    let e = p.parse_chain(TokenKind::EOF)?;
    p.expect_eof()?;
    Ok(e)
}

/// 1 つ以上の関数定義を解析する。
pub fn parse_function_defs(src: &str) -> Result<Vec<FunctionDef>, EngineError> {
    let ts = lex(src)?;
    let mut p = Parser::new(ts);
    Ok(p.parse_function_defs()?)
}
