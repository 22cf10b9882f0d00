// パス: src/engine/ast.rs
// 役割: 数式とユーザー定義関数の構文木を定義する
// 意図: 評価と依存関係の収集に必要な形だけを持つ
// 関連ファイル: src/engine/parser.rs, src/engine/eval.rs, src/engine/recalc.rs
//! 数式の抽象構文木。
//!
//! - 単項マイナスや `%` は専用ノードで保持し、評価時に数値演算へ落とす。
//! - 識別子と関数呼び出しはエラー表示用にバイト位置を持つ。
//! - 型注釈は名前のまま保持し、種別への解決は定義登録時に行う。

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident {
        name: String,
        pos: usize,
    },
    Record(Vec<(String, Expr)>),
    /// `[a, b, c]` 形式の単一列テーブル。
    Table(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Percent(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Field {
        expr: Box<Expr>,
        name: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        pos: usize,
    },
    /// `;` で連結された式。最後の値が全体の値になる。
    Chain(Vec<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Concat => "&",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }
}

/// 型注釈（名前と出現位置）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
    pub pos: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

/// `Name(p: T, ...): R = body` または `{ ...; ... }` 形式の関数定義。
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub pos: usize,
    pub params: Vec<Param>,
    pub ret: TypeRef,
    pub body: Expr,
}

impl Expr {
    /// 式が参照する自由な名前を出現順に集める（重複なし）。
    ///
    /// 行スコープの引数（`ForAll` などの第 2 引数以降）の中の名前も含む。
    /// 呼び出す関数の本体が読む名前は含まない。
    pub fn free_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    /// 式の中で呼び出される関数名を出現順に集める（重複なし）。
    pub fn call_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Ident { .. } => {}
            Expr::Record(fields) => fields.iter().for_each(|(_, e)| e.collect_calls(out)),
            Expr::Table(items) | Expr::Chain(items) => {
                items.iter().for_each(|e| e.collect_calls(out))
            }
            Expr::Unary { expr, .. } | Expr::Percent(expr) | Expr::Field { expr, .. } => {
                expr.collect_calls(out)
            }
            Expr::Binary { left, right, .. } => {
                left.collect_calls(out);
                right.collect_calls(out);
            }
            Expr::Call { name, args, .. } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
                args.iter().for_each(|e| e.collect_calls(out));
            }
        }
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) => {}
            Expr::Ident { name, .. } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Record(fields) => fields.iter().for_each(|(_, e)| e.collect_names(out)),
            Expr::Table(items) | Expr::Chain(items) => {
                items.iter().for_each(|e| e.collect_names(out))
            }
            Expr::Unary { expr, .. } | Expr::Percent(expr) | Expr::Field { expr, .. } => {
                expr.collect_names(out)
            }
            Expr::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_names(out)),
        }
    }
}
