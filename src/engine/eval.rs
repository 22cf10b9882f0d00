// パス: src/engine/eval.rs
// 役割: 名前検査・木構造評価器・組み込み関数表を実装する
// 意図: 実行時の失敗をエラー値として返し、評価を止めない
// 関連ファイル: src/engine/ast.rs, src/engine/recalc.rs, src/value.rs
//! 評価器。
//!
//! 仕様要点:
//! - 実行時の失敗は `Value::Error` として返し、`Err` は中断（取り消し・期限切れ）だけに使う。
//! - 演算子はエラー値を左から順に伝播する。`And`/`Or`/`If` は短絡評価。
//! - `Blank` は数値演算で 0、文字列連結で空文字として扱う。
//! - `ForAll`/`Filter` と表を受け取る `Sum`/`Max`/`Min` は行スコープを持ち、
//!   行のフィールドと `ThisRecord` を名前として参照できる。
//! - ユーザー関数は新しいスコープで評価され、呼び出し深さは `MAX_CALL_DEPTH` まで。

use std::collections::HashMap;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use super::ast::{BinOp, Expr, UnaryOp};
use super::{CancelToken, EngineError, HostFunction};
use crate::errors::ErrorInfo;
use crate::format::format_number;
use crate::value::{Record, Table, Value, ValueKind, VALUE_COLUMN};

pub const MAX_CALL_DEPTH: usize = 64;
pub const MAX_SEQUENCE: usize = 50_000;
const CANCEL_POLL_INTERVAL: u32 = 128;
const THIS_RECORD: &str = "ThisRecord";
const VARIADIC: usize = usize::MAX;

/// 評価時に内側から順に探索する名前フレームの並び。
type Frames = Vec<Record>;

macro_rules! try_val {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(err) => return err,
        }
    };
}

/// 登録済みのユーザー定義関数。型注釈は解決済み。
#[derive(Clone, Debug, PartialEq)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<(String, ValueKind)>,
    pub ret: ValueKind,
    pub body: Expr,
}

type StrictFn = fn(&[Value]) -> Value;
type DeferredFn = fn(&mut Evaluator<'_>, &[Expr], &mut Frames) -> Result<Value, EngineError>;

enum Imp {
    /// 引数を先に評価する。`propagate` なら最初のエラー引数をそのまま返す。
    Strict { f: StrictFn, propagate: bool },
    /// 引数式を受け取り、評価順を自分で決める。
    Deferred(DeferredFn),
}

struct Builtin {
    min: usize,
    max: usize,
    row_scoped: bool,
    imp: Imp,
}

fn strict(min: usize, max: usize, f: StrictFn) -> Builtin {
    Builtin {
        min,
        max,
        row_scoped: false,
        imp: Imp::Strict { f, propagate: true },
    }
}

fn deferred(min: usize, max: usize, row_scoped: bool, f: DeferredFn) -> Builtin {
    Builtin {
        min,
        max,
        row_scoped,
        imp: Imp::Deferred(f),
    }
}

static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Builtin> = HashMap::new();
    m.insert("Blank", strict(0, 0, |_| Value::Blank));
    m.insert("If", deferred(2, VARIADIC, false, builtin_if));
    m.insert("IsBlank", strict(1, 1, builtin_is_blank));
    m.insert(
        "IsError",
        Builtin {
            min: 1,
            max: 1,
            row_scoped: false,
            imp: Imp::Strict {
                f: |args| Value::Boolean(args[0].is_error()),
                propagate: false,
            },
        },
    );
    m.insert("Error", strict(1, 1, |args| {
        Value::error(try_val!(to_text(&args[0])))
    }));
    m.insert("Not", strict(1, 1, |args| {
        Value::Boolean(!try_val!(to_bool(&args[0])))
    }));
    m.insert("Abs", strict(1, 1, builtin_abs));
    m.insert("Round", strict(2, 2, builtin_round));
    m.insert("Sqrt", strict(1, 1, builtin_sqrt));
    m.insert("Mod", strict(2, 2, builtin_mod));
    m.insert("Sum", deferred(1, VARIADIC, true, builtin_sum));
    m.insert("Max", deferred(1, VARIADIC, true, builtin_max));
    m.insert("Min", deferred(1, VARIADIC, true, builtin_min));
    m.insert("Len", strict(1, 1, |args| {
        Value::Number(try_val!(to_text(&args[0])).chars().count() as f64)
    }));
    m.insert("Upper", strict(1, 1, |args| {
        Value::String(try_val!(to_text(&args[0])).to_uppercase())
    }));
    m.insert("Lower", strict(1, 1, |args| {
        Value::String(try_val!(to_text(&args[0])).to_lowercase())
    }));
    m.insert("Concatenate", strict(1, VARIADIC, |args| {
        let mut out = String::new();
        for arg in args {
            out.push_str(&try_val!(to_text(arg)));
        }
        Value::String(out)
    }));
    m.insert("Text", strict(1, 1, |args| {
        Value::String(try_val!(to_text(&args[0])))
    }));
    m.insert("Value", strict(1, 1, builtin_value));
    m.insert("Decimal", strict(1, 1, builtin_decimal));
    m.insert("Table", strict(0, VARIADIC, builtin_table));
    m.insert("Sequence", strict(1, 3, builtin_sequence));
    m.insert("CountRows", strict(1, 1, |args| {
        Value::Number(try_val!(to_table(&args[0], "CountRows")).len() as f64)
    }));
    m.insert("First", strict(1, 1, |args| {
        let t = try_val!(to_table(&args[0], "First"));
        t.rows().first().cloned().map(Value::Record).unwrap_or(Value::Blank)
    }));
    m.insert("Last", strict(1, 1, |args| {
        let t = try_val!(to_table(&args[0], "Last"));
        t.rows().last().cloned().map(Value::Record).unwrap_or(Value::Blank)
    }));
    m.insert("Index", strict(2, 2, builtin_index));
    m.insert("ForAll", deferred(2, 2, true, builtin_for_all));
    m.insert("Filter", deferred(2, VARIADIC, true, builtin_filter));
    m
});

/// 組み込み関数名を名前順で返す。
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTINS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// 組み込み関数の引数個数範囲。可変長の上限は `usize::MAX`。
pub fn builtin_arity(name: &str) -> Option<(usize, usize)> {
    BUILTINS.get(name).map(|b| (b.min, b.max))
}

// ---------------------------------------------------------------------------
// 名前検査
// ---------------------------------------------------------------------------

/// 評価前に未知の名前・関数・引数個数の誤りを報告する。
///
/// 行スコープ関数の第 2 引数以降では名前を検査しない（行のフィールドは実行時まで分からない）。
pub fn check(
    expr: &Expr,
    is_name: &dyn Fn(&str) -> bool,
    arity: &dyn Fn(&str) -> Option<(usize, usize)>,
) -> Result<(), EngineError> {
    Checker { is_name, arity }.walk(expr, true)
}

struct Checker<'a> {
    is_name: &'a dyn Fn(&str) -> bool,
    arity: &'a dyn Fn(&str) -> Option<(usize, usize)>,
}

impl Checker<'_> {
    fn walk(&self, expr: &Expr, names: bool) -> Result<(), EngineError> {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) => Ok(()),
            Expr::Ident { name, pos } => {
                if names && !(self.is_name)(name) {
                    return Err(EngineError::Check(ErrorInfo::new(
                        "CHK001",
                        format!("Name isn't valid. '{}' isn't recognized.", name),
                        Some(*pos),
                    )));
                }
                Ok(())
            }
            Expr::Record(fields) => fields.iter().try_for_each(|(_, e)| self.walk(e, names)),
            Expr::Table(items) | Expr::Chain(items) => {
                items.iter().try_for_each(|e| self.walk(e, names))
            }
            Expr::Unary { expr, .. } | Expr::Percent(expr) | Expr::Field { expr, .. } => {
                self.walk(expr, names)
            }
            Expr::Binary { left, right, .. } => {
                self.walk(left, names)?;
                self.walk(right, names)
            }
            Expr::Call { name, args, pos } => {
                let Some((min, max)) = (self.arity)(name) else {
                    return Err(EngineError::Check(ErrorInfo::new(
                        "CHK002",
                        format!("'{}' is an unknown or unsupported function.", name),
                        Some(*pos),
                    )));
                };
                if args.len() < min || args.len() > max {
                    return Err(EngineError::Check(ErrorInfo::new(
                        "CHK003",
                        format!(
                            "Invalid number of arguments to {}: expected {}, received {}.",
                            name,
                            describe_arity(min, max),
                            args.len()
                        ),
                        Some(*pos),
                    )));
                }
                let row_scoped = BUILTINS.get(name.as_str()).is_some_and(|b| b.row_scoped);
                for (idx, arg) in args.iter().enumerate() {
                    self.walk(arg, names && !(row_scoped && idx > 0))?;
                }
                Ok(())
            }
        }
    }
}

fn describe_arity(min: usize, max: usize) -> String {
    match (min, max) {
        (a, b) if a == b => a.to_string(),
        (a, VARIADIC) => format!("at least {}", a),
        (a, b) => format!("{} to {}", a, b),
    }
}

// ---------------------------------------------------------------------------
// 評価器
// ---------------------------------------------------------------------------

/// 1 回の評価に必要な環境への参照をまとめたもの。
pub struct Evaluator<'a> {
    globals: &'a HashMap<String, Value>,
    bindings: &'a Record,
    functions: &'a HashMap<String, UserFunction>,
    host: &'a mut HashMap<String, HostFunction>,
    cancel: &'a CancelToken,
    depth: usize,
    ticks: u32,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        globals: &'a HashMap<String, Value>,
        bindings: &'a Record,
        functions: &'a HashMap<String, UserFunction>,
        host: &'a mut HashMap<String, HostFunction>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            globals,
            bindings,
            functions,
            host,
            cancel,
            depth: 0,
            ticks: 0,
        }
    }

    /// 式を評価する。`Err` は中断時のみ。
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, EngineError> {
        self.cancel.check()?;
        let mut frames = Frames::new();
        self.eval(expr, &mut frames)
    }

    fn tick(&mut self) -> Result<(), EngineError> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % CANCEL_POLL_INTERVAL == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, frames: &mut Frames) -> Result<Value, EngineError> {
        self.tick()?;
        let value = match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Bool(b) => Value::Boolean(*b),
            Expr::Ident { name, .. } => self.lookup(name, frames),
            Expr::Record(fields) => {
                let mut record = Record::new();
                for (name, e) in fields {
                    let v = self.eval(e, frames)?;
                    record.insert(name.clone(), v);
                }
                Value::Record(record)
            }
            Expr::Table(items) => {
                let mut values = Vec::with_capacity(items.len());
                for e in items {
                    values.push(self.eval(e, frames)?);
                }
                Value::Table(Table::from_values(values))
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, frames)?;
                unary(*op, &v)
            }
            Expr::Percent(expr) => {
                let v = self.eval(expr, frames)?;
                arithmetic(BinOp::Div, &v, &Value::Number(100.0))
            }
            Expr::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                left,
                right,
            } => {
                let l = self.eval(left, frames)?;
                let l = match to_bool(&l) {
                    Ok(b) => b,
                    Err(e) => return Ok(e),
                };
                // And は偽、Or は真で確定する
                if l == (*op == BinOp::Or) {
                    return Ok(Value::Boolean(l));
                }
                let r = self.eval(right, frames)?;
                match to_bool(&r) {
                    Ok(b) => Value::Boolean(b),
                    Err(e) => e,
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, frames)?;
                let r = self.eval(right, frames)?;
                binary(*op, &l, &r)
            }
            Expr::Field { expr, name } => {
                let v = self.eval(expr, frames)?;
                field_access(&v, name)
            }
            Expr::Call { name, args, .. } => self.call(name, args, frames)?,
            Expr::Chain(items) => {
                let mut last = Value::Blank;
                for e in items {
                    last = self.eval(e, frames)?;
                    if last.is_error() {
                        break;
                    }
                }
                last
            }
        };
        Ok(value)
    }

    fn lookup(&self, name: &str, frames: &Frames) -> Value {
        for frame in frames.iter().rev() {
            if let Some(v) = frame.get(name) {
                return v.clone();
            }
        }
        self.bindings
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .unwrap_or_else(|| Value::error(format!("Name isn't valid. '{}' isn't recognized.", name)))
    }

    fn eval_args(&mut self, args: &[Expr], frames: &mut Frames) -> Result<Vec<Value>, EngineError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frames)?);
        }
        Ok(values)
    }

    fn call(&mut self, name: &str, args: &[Expr], frames: &mut Frames) -> Result<Value, EngineError> {
        let functions = self.functions;
        if let Some(func) = functions.get(name) {
            return self.call_user(func, args, frames);
        }
        if self.host.contains_key(name) {
            let values = self.eval_args(args, frames)?;
            if let Some(err) = values.iter().find(|v| v.is_error()) {
                return Ok(err.clone());
            }
            let Some(host) = self.host.get_mut(name) else {
                return Ok(unknown_function(name));
            };
            if values.len() < host.min_args || values.len() > host.max_args {
                return Ok(arity_error(name, host.min_args, host.max_args, values.len()));
            }
            return Ok((host.handler)(&values));
        }
        let Some(builtin) = BUILTINS.get(name) else {
            return Ok(unknown_function(name));
        };
        if args.len() < builtin.min || args.len() > builtin.max {
            return Ok(arity_error(name, builtin.min, builtin.max, args.len()));
        }
        match builtin.imp {
            Imp::Strict { f, propagate } => {
                let values = self.eval_args(args, frames)?;
                if propagate {
                    if let Some(err) = values.iter().find(|v| v.is_error()) {
                        return Ok(err.clone());
                    }
                }
                Ok(f(&values))
            }
            Imp::Deferred(f) => f(self, args, frames),
        }
    }

    fn call_user(
        &mut self,
        func: &UserFunction,
        args: &[Expr],
        frames: &mut Frames,
    ) -> Result<Value, EngineError> {
        if args.len() != func.params.len() {
            return Ok(arity_error(
                &func.name,
                func.params.len(),
                func.params.len(),
                args.len(),
            ));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Ok(Value::error(format!(
                "Maximum call depth of {} exceeded in '{}'",
                MAX_CALL_DEPTH, func.name
            )));
        }
        let mut scope = Record::new();
        for ((param, kind), arg) in func.params.iter().zip(args) {
            let v = self.eval(arg, frames)?;
            if v.is_error() {
                return Ok(v);
            }
            let v = match coerce_to(v, *kind) {
                Ok(v) => v,
                Err(e) => return Ok(e),
            };
            scope.insert(param.clone(), v);
        }
        self.depth += 1;
        let mut inner = vec![scope];
        let result = self.eval(&func.body, &mut inner);
        self.depth -= 1;
        let value = result?;
        if value.is_error() {
            return Ok(value);
        }
        if func.ret == ValueKind::Blank {
            return Ok(Value::Blank);
        }
        Ok(coerce_to(value, func.ret).unwrap_or_else(|e| e))
    }

    /// 行スコープを 1 段積んで式を評価する。
    fn eval_in_row(
        &mut self,
        expr: &Expr,
        row: &Record,
        frames: &mut Frames,
    ) -> Result<Value, EngineError> {
        let mut frame = row.clone();
        frame.insert(THIS_RECORD, Value::Record(row.clone()));
        frames.push(frame);
        let result = self.eval(expr, frames);
        frames.pop();
        result
    }

    /// 第 1 引数を表として評価する。表でなければ返すべき値を `Err` で返す。
    fn eval_table_arg(
        &mut self,
        fname: &str,
        arg: &Expr,
        frames: &mut Frames,
    ) -> Result<Result<Table, Value>, EngineError> {
        let v = self.eval(arg, frames)?;
        Ok(to_table(&v, fname))
    }
}

fn unknown_function(name: &str) -> Value {
    Value::error(format!("'{}' is an unknown or unsupported function.", name))
}

fn arity_error(name: &str, min: usize, max: usize, got: usize) -> Value {
    let expected = match (min, max) {
        (a, b) if a == b => a.to_string(),
        (a, VARIADIC) => format!("at least {}", a),
        (a, b) => format!("{} to {}", a, b),
    };
    Value::error(format!(
        "Invalid number of arguments to '{}': received {}, expected {}.",
        name, got, expected
    ))
}

// ---------------------------------------------------------------------------
// 型変換
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum Num {
    F(f64),
    D(Decimal),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::F(f) => f,
            Num::D(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }
}

fn to_num(v: &Value) -> Result<Num, Value> {
    match v {
        Value::Number(n) => Ok(Num::F(*n)),
        Value::Decimal(d) => Ok(Num::D(*d)),
        Value::Blank => Ok(Num::F(0.0)),
        Value::Boolean(b) => Ok(Num::F(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Num::F)
            .ok_or_else(|| Value::error(format!("Can't convert \"{}\" to a number.", s))),
        Value::Error { .. } => Err(v.clone()),
        other => Err(Value::error(format!(
            "Expected a number but got {}.",
            other.kind()
        ))),
    }
}

fn to_f64(v: &Value) -> Result<f64, Value> {
    to_num(v).map(Num::as_f64)
}

fn to_text(v: &Value) -> Result<String, Value> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(format_number(*n)),
        Value::Decimal(d) => Ok(d.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Blank => Ok(String::new()),
        Value::Error { .. } => Err(v.clone()),
        other => Err(Value::error(format!(
            "Expected text but got {}.",
            other.kind()
        ))),
    }
}

fn to_bool(v: &Value) -> Result<bool, Value> {
    match v {
        Value::Boolean(b) => Ok(*b),
        Value::Blank => Ok(false),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Decimal(d) => Ok(!d.is_zero()),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        Value::Error { .. } => Err(v.clone()),
        other => Err(Value::error(format!(
            "Expected a boolean but got {}.",
            other.kind()
        ))),
    }
}

fn to_table(v: &Value, fname: &str) -> Result<Table, Value> {
    match v {
        Value::Table(t) => Ok(t.clone()),
        Value::Blank => Ok(Table::default()),
        Value::Error { .. } => Err(v.clone()),
        other => Err(Value::error(format!(
            "{} expects a table but got {}.",
            fname,
            other.kind()
        ))),
    }
}

/// 関数シグネチャの種別へ値を合わせる。`Blank` はどの種別にも適合する。
pub fn coerce_to(v: Value, kind: ValueKind) -> Result<Value, Value> {
    if v.is_blank() || v.kind() == kind || kind == ValueKind::Blank {
        return Ok(v);
    }
    match (&v, kind) {
        (Value::Number(n), ValueKind::Decimal) => Decimal::from_f64(*n)
            .map(Value::Decimal)
            .ok_or_else(|| Value::error(format!("Can't convert {} to Decimal.", n))),
        (Value::Decimal(d), ValueKind::Number) => Ok(Value::Number(d.to_f64().unwrap_or(f64::NAN))),
        _ => Err(Value::error(format!(
            "Expected {} but got {}.",
            kind,
            v.kind()
        ))),
    }
}

fn finite(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::error("Numeric result is out of range.")
    }
}

// ---------------------------------------------------------------------------
// 演算子
// ---------------------------------------------------------------------------

fn unary(op: UnaryOp, v: &Value) -> Value {
    match op {
        UnaryOp::Neg => match try_val!(to_num(v)) {
            Num::F(n) => Value::Number(-n),
            Num::D(d) => Value::Decimal(-d),
        },
        UnaryOp::Not => Value::Boolean(!try_val!(to_bool(v))),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Value {
    if l.is_error() {
        return l.clone();
    }
    if r.is_error() {
        return r.clone();
    }
    match op {
        BinOp::Concat => {
            let mut s = try_val!(to_text(l));
            s.push_str(&try_val!(to_text(r)));
            Value::String(s)
        }
        BinOp::Eq => Value::Boolean(equals(l, r)),
        BinOp::Ne => Value::Boolean(!equals(l, r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, l, r),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow => arithmetic(op, l, r),
        // 短絡評価は呼び出し側で済んでいる
        BinOp::And | BinOp::Or => {
            let a = try_val!(to_bool(l));
            let b = try_val!(to_bool(r));
            Value::Boolean(if op == BinOp::And { a && b } else { a || b })
        }
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Value {
    let a = try_val!(to_num(l));
    let b = try_val!(to_num(r));
    if let (Num::D(x), Num::D(y)) = (a, b) {
        if op != BinOp::Pow {
            if op == BinOp::Div && y.is_zero() {
                return Value::error("Division by zero.");
            }
            let out = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                BinOp::Mul => x.checked_mul(y),
                _ => x.checked_div(y),
            };
            return out
                .map(Value::Decimal)
                .unwrap_or_else(|| Value::error("Numeric result is out of range."));
        }
    }
    let (x, y) = (a.as_f64(), b.as_f64());
    match op {
        BinOp::Add => finite(x + y),
        BinOp::Sub => finite(x - y),
        BinOp::Mul => finite(x * y),
        BinOp::Div if y == 0.0 => Value::error("Division by zero."),
        BinOp::Div => finite(x / y),
        _ => finite(x.powf(y)),
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Decimal(x), Value::Decimal(y)) => x == y,
        (
            Value::Number(_) | Value::Decimal(_),
            Value::Number(_) | Value::Decimal(_),
        ) => to_f64(l).ok() == to_f64(r).ok(),
        _ => l == r,
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Value {
    use std::cmp::Ordering;
    let ord = match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
        (
            Value::Number(_) | Value::Decimal(_) | Value::Blank,
            Value::Number(_) | Value::Decimal(_) | Value::Blank,
        ) => {
            let a = try_val!(to_f64(l));
            let b = try_val!(to_f64(r));
            a.partial_cmp(&b)
        }
        _ => {
            return Value::error(format!(
                "Can't compare {} with {}.",
                l.kind(),
                r.kind()
            ))
        }
    };
    let Some(ord) = ord else {
        return Value::Boolean(false);
    };
    Value::Boolean(match op {
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

fn field_access(v: &Value, name: &str) -> Value {
    match v {
        Value::Record(r) => r
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::error(format!("Field '{}' doesn't exist.", name))),
        Value::Table(t) => {
            if !t.is_empty() && !t.column_names().contains(&name) {
                return Value::error(format!("Column '{}' doesn't exist.", name));
            }
            Value::Table(Table::from_values(
                t.rows()
                    .iter()
                    .map(|row| row.get(name).cloned().unwrap_or(Value::Blank)),
            ))
        }
        Value::Blank => Value::Blank,
        Value::Error { .. } => v.clone(),
        other => Value::error(format!(
            "Can't access field '{}' of a {} value.",
            name,
            other.kind()
        )),
    }
}

/// 列の和集合をとり、欠けたフィールドを `Blank` で埋めて表にする。
fn union_rows(rows: Vec<Record>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for name in row.names() {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }
    }
    Table::new(
        rows.into_iter()
            .map(|row| {
                Record::from_fields(
                    columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Blank))),
                )
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// 組み込み関数
// ---------------------------------------------------------------------------

fn builtin_if(ev: &mut Evaluator<'_>, args: &[Expr], frames: &mut Frames) -> Result<Value, EngineError> {
    let mut idx = 0;
    while idx + 1 < args.len() {
        let cond = ev.eval(&args[idx], frames)?;
        match to_bool(&cond) {
            Ok(true) => return ev.eval(&args[idx + 1], frames),
            Ok(false) => idx += 2,
            Err(e) => return Ok(e),
        }
    }
    match args.get(idx) {
        Some(otherwise) => ev.eval(otherwise, frames),
        None => Ok(Value::Blank),
    }
}

fn builtin_is_blank(args: &[Value]) -> Value {
    Value::Boolean(match &args[0] {
        Value::Blank => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    })
}

fn builtin_abs(args: &[Value]) -> Value {
    match try_val!(to_num(&args[0])) {
        Num::F(n) => Value::Number(n.abs()),
        Num::D(d) => Value::Decimal(d.abs()),
    }
}

fn builtin_round(args: &[Value]) -> Value {
    let digits = try_val!(to_f64(&args[1])).trunc();
    match try_val!(to_num(&args[0])) {
        Num::D(d) if digits >= 0.0 => Value::Decimal(
            d.round_dp_with_strategy(digits as u32, RoundingStrategy::MidpointAwayFromZero),
        ),
        n => {
            let scale = 10f64.powf(digits);
            finite((n.as_f64() * scale).round() / scale)
        }
    }
}

fn builtin_sqrt(args: &[Value]) -> Value {
    let n = try_val!(to_f64(&args[0]));
    if n < 0.0 {
        return Value::error("Sqrt requires a non-negative number.");
    }
    Value::Number(n.sqrt())
}

fn builtin_mod(args: &[Value]) -> Value {
    let n = try_val!(to_f64(&args[0]));
    let d = try_val!(to_f64(&args[1]));
    if d == 0.0 {
        return Value::error("Division by zero.");
    }
    // 結果の符号は除数に合わせる
    finite(n - d * (n / d).floor())
}

fn builtin_value(args: &[Value]) -> Value {
    if args[0].is_blank() {
        return Value::Blank;
    }
    Value::Number(try_val!(to_f64(&args[0])))
}

fn builtin_decimal(args: &[Value]) -> Value {
    match &args[0] {
        Value::Blank => Value::Blank,
        Value::Decimal(d) => Value::Decimal(*d),
        Value::String(s) => Decimal::from_str(s.trim())
            .map(Value::Decimal)
            .unwrap_or_else(|_| Value::error(format!("Can't convert \"{}\" to a decimal.", s))),
        other => {
            let n = try_val!(to_f64(other));
            Decimal::from_f64(n)
                .map(Value::Decimal)
                .unwrap_or_else(|| Value::error(format!("Can't convert {} to a decimal.", n)))
        }
    }
}

fn builtin_table(args: &[Value]) -> Value {
    let mut rows = Vec::new();
    for arg in args {
        match arg {
            Value::Record(r) => rows.push(r.clone()),
            Value::Table(t) => rows.extend(t.rows().iter().cloned()),
            Value::Blank => {}
            other => {
                return Value::error(format!(
                    "Table expects records or tables but got {}.",
                    other.kind()
                ))
            }
        }
    }
    Value::Table(union_rows(rows))
}

fn builtin_sequence(args: &[Value]) -> Value {
    let count = try_val!(to_f64(&args[0])).trunc();
    if !(0.0..=MAX_SEQUENCE as f64).contains(&count) {
        return Value::error(format!(
            "Sequence count must be between 0 and {}.",
            MAX_SEQUENCE
        ));
    }
    let start = match args.get(1) {
        Some(v) => try_val!(to_f64(v)),
        None => 1.0,
    };
    let step = match args.get(2) {
        Some(v) => try_val!(to_f64(v)),
        None => 1.0,
    };
    Value::Table(Table::from_values(
        (0..count as usize).map(|i| Value::Number(start + step * i as f64)),
    ))
}

fn builtin_index(args: &[Value]) -> Value {
    let t = try_val!(to_table(&args[0], "Index"));
    let idx = try_val!(to_f64(&args[1])).trunc();
    // NaN は範囲外として扱う
    if !(1.0..=t.len() as f64).contains(&idx) {
        return Value::error(format!(
            "Index {} is out of range for a table of {} rows.",
            format_number(idx),
            t.len()
        ));
    }
    Value::Record(t.rows()[idx as usize - 1].clone())
}

fn builtin_for_all(
    ev: &mut Evaluator<'_>,
    args: &[Expr],
    frames: &mut Frames,
) -> Result<Value, EngineError> {
    let table = match ev.eval_table_arg("ForAll", &args[0], frames)? {
        Ok(t) => t,
        Err(e) => return Ok(e),
    };
    let mut results = Vec::with_capacity(table.len());
    for row in table.rows() {
        results.push(ev.eval_in_row(&args[1], row, frames)?);
    }
    if !results.is_empty() && results.iter().all(|v| matches!(v, Value::Record(_))) {
        let rows = results
            .into_iter()
            .filter_map(|v| match v {
                Value::Record(r) => Some(r),
                _ => None,
            })
            .collect();
        return Ok(Value::Table(union_rows(rows)));
    }
    Ok(Value::Table(Table::from_values(results)))
}

fn builtin_filter(
    ev: &mut Evaluator<'_>,
    args: &[Expr],
    frames: &mut Frames,
) -> Result<Value, EngineError> {
    let table = match ev.eval_table_arg("Filter", &args[0], frames)? {
        Ok(t) => t,
        Err(e) => return Ok(e),
    };
    let mut kept = Vec::new();
    'rows: for row in table.rows() {
        for cond in &args[1..] {
            let v = ev.eval_in_row(cond, row, frames)?;
            match to_bool(&v) {
                Ok(true) => {}
                Ok(false) => continue 'rows,
                Err(e) => return Ok(e),
            }
        }
        kept.push(row.clone());
    }
    Ok(Value::Table(Table::new(kept)))
}

/// `Sum`/`Max`/`Min` の引数を数値列に展開する。
///
/// - `F(table, expr)` は各行で `expr` を評価する。
/// - `F(table)` は単一列テーブルの `Value` 列を使う。
/// - それ以外は各引数をそのまま数値とみなす。`Blank` は読み飛ばす。
fn collect_numbers(
    fname: &str,
    ev: &mut Evaluator<'_>,
    args: &[Expr],
    frames: &mut Frames,
) -> Result<Result<Vec<Num>, Value>, EngineError> {
    let first = ev.eval(&args[0], frames)?;
    let mut values = Vec::new();
    match (&first, args.len()) {
        (Value::Table(t), 2) => {
            for row in t.rows() {
                values.push(ev.eval_in_row(&args[1], row, frames)?);
            }
        }
        (Value::Table(t), 1) => {
            if !t.is_column() {
                return Ok(Err(Value::error(format!(
                    "{} of a table needs a single-column table or a formula.",
                    fname
                ))));
            }
            values.extend(t.rows().iter().filter_map(|r| r.get(VALUE_COLUMN).cloned()));
        }
        (Value::Table(_), _) => {
            return Ok(Err(arity_error(fname, 1, 2, args.len())));
        }
        _ => {
            values.push(first);
            for arg in &args[1..] {
                values.push(ev.eval(arg, frames)?);
            }
        }
    }
    let mut nums = Vec::with_capacity(values.len());
    for v in values.iter().filter(|v| !v.is_blank()) {
        match to_num(v) {
            Ok(n) => nums.push(n),
            Err(e) => return Ok(Err(e)),
        }
    }
    Ok(Ok(nums))
}

fn builtin_sum(ev: &mut Evaluator<'_>, args: &[Expr], frames: &mut Frames) -> Result<Value, EngineError> {
    let nums = match collect_numbers("Sum", ev, args, frames)? {
        Ok(nums) => nums,
        Err(e) => return Ok(e),
    };
    if !nums.is_empty() && nums.iter().all(|n| matches!(n, Num::D(_))) {
        let mut acc = Decimal::ZERO;
        for n in &nums {
            if let Num::D(d) = n {
                match acc.checked_add(*d) {
                    Some(next) => acc = next,
                    None => return Ok(Value::error("Numeric result is out of range.")),
                }
            }
        }
        return Ok(Value::Decimal(acc));
    }
    Ok(finite(nums.iter().map(|n| n.as_f64()).sum()))
}

fn extreme(
    fname: &str,
    ev: &mut Evaluator<'_>,
    args: &[Expr],
    frames: &mut Frames,
    prefer: std::cmp::Ordering,
) -> Result<Value, EngineError> {
    let nums = match collect_numbers(fname, ev, args, frames)? {
        Ok(nums) => nums,
        Err(e) => return Ok(e),
    };
    let mut best: Option<Num> = None;
    for n in nums {
        best = match best {
            None => Some(n),
            Some(b) => {
                let ord = match (n, b) {
                    (Num::D(x), Num::D(y)) => x.cmp(&y),
                    _ => n
                        .as_f64()
                        .partial_cmp(&b.as_f64())
                        .unwrap_or(std::cmp::Ordering::Equal),
                };
                Some(if ord == prefer { n } else { b })
            }
        };
    }
    Ok(match best {
        None => Value::Blank,
        Some(Num::F(f)) => Value::Number(f),
        Some(Num::D(d)) => Value::Decimal(d),
    })
}

fn builtin_max(ev: &mut Evaluator<'_>, args: &[Expr], frames: &mut Frames) -> Result<Value, EngineError> {
    extreme("Max", ev, args, frames, std::cmp::Ordering::Greater)
}

fn builtin_min(ev: &mut Evaluator<'_>, args: &[Expr], frames: &mut Frames) -> Result<Value, EngineError> {
    extreme("Min", ev, args, frames, std::cmp::Ordering::Less)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{builtin_names, check, Evaluator, UserFunction, MAX_CALL_DEPTH};
    use crate::engine::parser::parse_formula;
    use crate::engine::{CancelToken, EngineError, HostFunction};
    use crate::value::{Record, Table, Value, ValueKind};

    fn eval_with(src: &str, functions: &HashMap<String, UserFunction>) -> Value {
        let globals: HashMap<String, Value> =
            HashMap::from([("x".to_string(), Value::Number(10.0))]);
        let bindings = Record::new();
        let mut host: HashMap<String, HostFunction> = HashMap::new();
        let cancel = CancelToken::never();
        let expr = parse_formula(src).unwrap();
        Evaluator::new(&globals, &bindings, functions, &mut host, &cancel)
            .evaluate(&expr)
            .unwrap()
    }

    fn eval(src: &str) -> Value {
        eval_with(src, &HashMap::new())
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("2 ^ 3 ^ 2"), Value::Number(512.0));
        assert_eq!(eval("50%"), Value::Number(0.5));
        assert_eq!(eval("x / 4"), Value::Number(2.5));
        assert_eq!(eval("Blank() + 1"), Value::Number(1.0));
    }

    #[test]
    /// ゼロ除算がエラー値となり、後続の演算へ伝播することを確認する。
    fn division_by_zero_is_an_error_value() {
        assert!(eval("1/0").is_error());
        assert_eq!(eval("1/0 + 1").error_message(), Some("Division by zero."));
        assert_eq!(eval("IsError(1/0)"), Value::Boolean(true));
        assert_eq!(eval("IsError(1)"), Value::Boolean(false));
    }

    #[test]
    fn short_circuit_logic_and_if() {
        assert_eq!(eval("false && 1/0"), Value::Boolean(false));
        assert_eq!(eval("true Or 1/0"), Value::Boolean(true));
        assert_eq!(eval("If(x > 5, \"big\", \"small\")"), Value::from("big"));
        assert_eq!(eval("If(false, 1)"), Value::Blank);
        assert_eq!(eval("If(false, 1, x = 10, 2, 3)"), Value::Number(2.0));
    }

    #[test]
    fn text_functions() {
        assert_eq!(eval("\"a\" & 1 & true"), Value::from("a1true"));
        assert_eq!(eval("Len(\"hello\")"), Value::Number(5.0));
        assert_eq!(eval("Upper(\"ab\") & Lower(\"CD\")"), Value::from("ABcd"));
        assert_eq!(eval("Concatenate(\"a\", \"b\", 3)"), Value::from("ab3"));
        assert_eq!(eval("Text(2.5)"), Value::from("2.5"));
        assert_eq!(eval("Value(\" 42 \")"), Value::Number(42.0));
        assert!(eval("Value(\"abc\")").is_error());
    }

    #[test]
    /// 数値関数と Decimal 演算を確認する。
    fn numeric_functions_and_decimals() {
        assert_eq!(eval("Abs(-3)"), Value::Number(3.0));
        assert_eq!(eval("Round(1.25, 1)"), Value::Number(1.3));
        assert_eq!(eval("Round(Decimal(\"2.345\"), 2)"), eval("Decimal(\"2.35\")"));
        assert_eq!(eval("Mod(-7, 3)"), Value::Number(2.0));
        assert_eq!(eval("Sqrt(16)"), Value::Number(4.0));
        assert!(eval("Sqrt(-1)").is_error());
        assert_eq!(eval("Text(Decimal(\"0.1\") + Decimal(\"0.2\"))"), Value::from("0.3"));
    }

    #[test]
    fn tables_and_records() {
        assert_eq!(eval("{a: 1, b: 2}.b"), Value::Number(2.0));
        assert_eq!(eval("CountRows(Sequence(4))"), Value::Number(4.0));
        assert_eq!(eval("Sum([1, 2, 3])"), Value::Number(6.0));
        assert_eq!(eval("Sum(Sequence(3), Value * 2)"), Value::Number(12.0));
        assert_eq!(eval("Max(3, 9, 4)"), Value::Number(9.0));
        assert_eq!(eval("Min([5, 2, 8])"), Value::Number(2.0));
        assert_eq!(eval("Index([7, 8], 2).Value"), Value::Number(8.0));
        assert!(eval("Index([7, 8], 3)").is_error());
        assert_eq!(
            eval("ForAll([1, 2], Value * 10)"),
            Value::Table(Table::from_values(vec![Value::Number(10.0), Value::Number(20.0)]))
        );
        assert_eq!(
            eval("Filter(Sequence(5), Value > 3)"),
            Value::Table(Table::from_values(vec![Value::Number(4.0), Value::Number(5.0)]))
        );
    }

    #[test]
    /// 非有限の添字や件数はエラー値になり、パニックしない。
    fn non_finite_numbers_are_rejected() {
        assert!(eval("Index([1, 2, 3], \"NaN\")").is_error());
        assert!(eval("Sequence(\"inf\")").is_error());
        assert!(eval("\"NaN\" + 1").is_error());
        let t = Value::Table(Table::from_values(vec![Value::Number(1.0)]));
        assert!(super::builtin_index(&[t.clone(), Value::Number(f64::NAN)]).is_error());
        assert!(super::builtin_index(&[t, Value::Number(f64::INFINITY)]).is_error());
        assert!(super::builtin_sequence(&[Value::Number(f64::NAN)]).is_error());
    }

    #[test]
    /// Table は列の和集合をとり、欠けたフィールドを Blank で埋める。
    fn table_unions_schemas() {
        let v = eval("Table({a: 1}, {b: 2})");
        let Value::Table(t) = v else {
            panic!("table expected");
        };
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert_eq!(t.rows()[0].get("b"), Some(&Value::Blank));
        assert_eq!(eval("Table({n: 1}, {n: 2}).n"), eval("[1, 2]"));
    }

    #[test]
    fn user_function_call_and_type_check() {
        let mut functions = HashMap::new();
        functions.insert(
            "Double".to_string(),
            UserFunction {
                name: "Double".into(),
                params: vec![("n".into(), ValueKind::Number)],
                ret: ValueKind::Number,
                body: parse_formula("n * 2").unwrap(),
            },
        );
        assert_eq!(eval_with("Double(21)", &functions), Value::Number(42.0));
        assert!(eval_with("Double(\"a\")", &functions).is_error());
    }

    #[test]
    /// 無限再帰が呼び出し深さの上限でエラー値になることを確認する。
    fn recursion_depth_is_bounded() {
        let mut functions = HashMap::new();
        functions.insert(
            "Loop".to_string(),
            UserFunction {
                name: "Loop".into(),
                params: vec![("n".into(), ValueKind::Number)],
                ret: ValueKind::Number,
                body: parse_formula("Loop(n + 1)").unwrap(),
            },
        );
        let v = eval_with("Loop(0)", &functions);
        let msg = v.error_message().unwrap_or_default().to_string();
        assert!(msg.contains(&MAX_CALL_DEPTH.to_string()), "{}", msg);
    }

    #[test]
    fn checker_reports_unknown_names_outside_row_scope() {
        let known = |n: &str| n == "x";
        let arity = |n: &str| super::builtin_arity(n);
        let ok = parse_formula("ForAll([1], Value + x)").unwrap();
        assert!(check(&ok, &known, &arity).is_ok());
        let bad = parse_formula("x + y").unwrap();
        assert!(matches!(
            check(&bad, &known, &arity),
            Err(EngineError::Check(ref e)) if e.code == "CHK001" && e.pos == Some(4)
        ));
        let unknown_fn = parse_formula("Nope(1)").unwrap();
        assert!(matches!(check(&unknown_fn, &known, &arity), Err(EngineError::Check(ref e)) if e.code == "CHK002"));
        let arity_bad = parse_formula("Len(1, 2)").unwrap();
        assert!(matches!(check(&arity_bad, &known, &arity), Err(EngineError::Check(ref e)) if e.code == "CHK003"));
    }

    #[test]
    fn cancelled_token_aborts_evaluation() {
        let globals = HashMap::new();
        let bindings = Record::new();
        let functions = HashMap::new();
        let mut host = HashMap::new();
        let cancel = CancelToken::never();
        cancel.cancel();
        let expr = parse_formula("1").unwrap();
        let err = Evaluator::new(&globals, &bindings, &functions, &mut host, &cancel)
            .evaluate(&expr)
            .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn builtin_names_are_sorted() {
        let names = builtin_names();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.contains(&"ForAll"));
    }
}
