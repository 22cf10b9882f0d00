// パス: src/engine/recalc.rs
// 役割: 変数・名前付き数式・ユーザー関数を保持する参照エンジンを実装する
// 意図: 変数が変わるたびに依存する数式を定義順に再計算する
// 関連ファイル: src/engine/mod.rs, src/engine/eval.rs, src/repl/session.rs
//! 参照実装のエンジン。
//!
//! - 名前付き数式は定義時点で既知の名前だけを参照できるため、定義順がそのまま依存順になる。
//! - 変数更新時は変更された名前を汚れ集合に入れ、定義順に 1 回走査して再計算する。
//! - 変数は一度 `Blank` 以外の値を持つと種別が固定される。

use std::collections::{HashMap, HashSet};

use log::debug;

use super::ast::{Expr, FunctionDef};
use super::eval::{builtin_arity, builtin_names, check, Evaluator, UserFunction};
use super::parser::{parse_formula, parse_function_defs};
use super::{CancelToken, Engine, EngineError, HostFunction, RecalcCallback};
use crate::errors::ErrorInfo;
use crate::value::{Record, Value, ValueKind};

enum Binding {
    /// 種別が確定していれば `Some`。
    Variable(Option<ValueKind>),
    Formula,
}

struct NamedFormula {
    name: String,
    expr: Expr,
    deps: Vec<String>,
    on_recalc: RecalcCallback,
}

/// 変数・名前付き数式・ユーザー関数を保持するエンジン。
#[derive(Default)]
pub struct RecalcEngine {
    values: HashMap<String, Value>,
    bindings: HashMap<String, Binding>,
    formulas: Vec<NamedFormula>,
    functions: HashMap<String, UserFunction>,
    host: HashMap<String, HostFunction>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn run(
    values: &HashMap<String, Value>,
    functions: &HashMap<String, UserFunction>,
    host: &mut HashMap<String, HostFunction>,
    expr: &Expr,
    bindings: &Record,
    cancel: &CancelToken,
) -> Result<Value, EngineError> {
    Evaluator::new(values, bindings, functions, host, cancel).evaluate(expr)
}

impl RecalcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数または名前付き数式の現在値。
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn arity_of(&self, name: &str) -> Option<(usize, usize)> {
        if let Some(f) = self.functions.get(name) {
            return Some((f.params.len(), f.params.len()));
        }
        if let Some(h) = self.host.get(name) {
            return Some((h.min_args, h.max_args));
        }
        builtin_arity(name)
    }

    fn is_function_name(&self, name: &str) -> bool {
        self.arity_of(name).is_some()
    }

    fn check_expr(&self, expr: &Expr, bindings: &Record) -> Result<(), EngineError> {
        check(
            expr,
            &|n: &str| bindings.get(n).is_some() || self.values.contains_key(n),
            &|n: &str| self.arity_of(n),
        )
    }

    /// 式の依存する名前。呼び出すユーザー関数の本体が読む大域名も推移的に含める。
    fn dependencies(&self, expr: &Expr) -> Vec<String> {
        let mut deps = expr.free_names();
        let mut pending = expr.call_names();
        let mut visited: HashSet<String> = HashSet::new();
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(f) = self.functions.get(&name) else {
                continue;
            };
            for n in f.body.free_names() {
                if !f.params.iter().any(|(p, _)| *p == n) && !deps.contains(&n) {
                    deps.push(n);
                }
            }
            pending.extend(f.body.call_names());
        }
        deps
    }

    /// `changed` に依存する名前付き数式を定義順に再計算し、通知する。
    fn recalc(&mut self, changed: &str) {
        let mut dirty: HashSet<String> = HashSet::from([changed.to_string()]);
        let empty = Record::new();
        let cancel = CancelToken::never();
        for idx in 0..self.formulas.len() {
            if !self.formulas[idx].deps.iter().any(|d| dirty.contains(d)) {
                continue;
            }
            let value = run(
                &self.values,
                &self.functions,
                &mut self.host,
                &self.formulas[idx].expr,
                &empty,
                &cancel,
            )
            .unwrap_or_else(|e| Value::error(e.to_string()));
            let formula = &mut self.formulas[idx];
            debug!("recalc: {} (changed: {})", formula.name, changed);
            self.values.insert(formula.name.clone(), value.clone());
            dirty.insert(formula.name.clone());
            (formula.on_recalc)(&formula.name, &value);
        }
    }

    fn resolve_type(name: &str, pos: usize) -> Result<ValueKind, EngineError> {
        ValueKind::from_type_name(name).ok_or_else(|| {
            EngineError::Definition(ErrorInfo::new(
                "DEF002",
                format!("Unknown type: {}", name),
                Some(pos),
            ))
        })
    }

    /// 1 件の定義を検証し、登録可能な形へ変換する。エラーはすべて `errors` に積む。
    fn validate_def(
        &self,
        def: &FunctionDef,
        batch: &[FunctionDef],
        errors: &mut Vec<EngineError>,
    ) -> Option<UserFunction> {
        let before = errors.len();
        if self.is_function_name(&def.name)
            || batch.iter().filter(|d| d.name == def.name).count() > 1
        {
            errors.push(EngineError::Definition(ErrorInfo::new(
                "DEF001",
                format!("Function name is already in use: {}", def.name),
                Some(def.pos),
            )));
        }
        let mut params = Vec::with_capacity(def.params.len());
        for (idx, p) in def.params.iter().enumerate() {
            if def.params[..idx].iter().any(|q| q.name == p.name) {
                errors.push(EngineError::definition(
                    "DEF003",
                    format!("Duplicate parameter name in {}: {}", def.name, p.name),
                ));
            }
            match Self::resolve_type(&p.ty.name, p.ty.pos) {
                Ok(kind) => params.push((p.name.clone(), kind)),
                Err(e) => errors.push(e),
            }
        }
        let ret = match Self::resolve_type(&def.ret.name, def.ret.pos) {
            Ok(kind) => Some(kind),
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let body_check = check(
            &def.body,
            &|n: &str| def.params.iter().any(|p| p.name == n) || self.values.contains_key(n),
            &|n: &str| {
                batch
                    .iter()
                    .find(|d| d.name == n)
                    .map(|d| (d.params.len(), d.params.len()))
                    .or_else(|| self.arity_of(n))
            },
        );
        if let Err(e) = body_check {
            errors.push(e);
        }
        if errors.len() != before {
            return None;
        }
        Some(UserFunction {
            name: def.name.clone(),
            params,
            ret: ret?,
            body: def.body.clone(),
        })
    }
}

impl Engine for RecalcEngine {
    fn evaluate(
        &mut self,
        expression: &str,
        bindings: &Record,
        cancel: &CancelToken,
    ) -> Result<Value, EngineError> {
        let expr = parse_formula(expression)?;
        self.check_expr(&expr, bindings)?;
        run(
            &self.values,
            &self.functions,
            &mut self.host,
            &expr,
            bindings,
            cancel,
        )
    }

    fn define_named_formula(
        &mut self,
        name: &str,
        expression: &str,
        mut on_recalc: RecalcCallback,
    ) -> Result<(), EngineError> {
        if !is_identifier(name) {
            return Err(EngineError::Definition(ErrorInfo::new(
                "FML001",
                format!("Not a valid name: {}", name),
                None,
            )));
        }
        if self.bindings.contains_key(name) {
            return Err(EngineError::Definition(ErrorInfo::new(
                "FML002",
                format!("Name is already in use: {}", name),
                None,
            )));
        }
        let expr = parse_formula(expression)?;
        self.check_expr(&expr, &Record::new())?;
        let value = run(
            &self.values,
            &self.functions,
            &mut self.host,
            &expr,
            &Record::new(),
            &CancelToken::never(),
        )?;
        debug!("named formula defined: {}", name);
        self.values.insert(name.to_string(), value.clone());
        self.bindings.insert(name.to_string(), Binding::Formula);
        on_recalc(name, &value);
        self.formulas.push(NamedFormula {
            name: name.to_string(),
            deps: self.dependencies(&expr),
            expr,
            on_recalc,
        });
        Ok(())
    }

    fn define_functions(&mut self, source: &str) -> Result<(), Vec<EngineError>> {
        let defs = parse_function_defs(source).map_err(|e| vec![e])?;
        let mut errors = Vec::new();
        let mut resolved = Vec::with_capacity(defs.len());
        for def in &defs {
            if let Some(f) = self.validate_def(def, &defs, &mut errors) {
                resolved.push(f);
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        for f in resolved {
            debug!("function defined: {}/{}", f.name, f.params.len());
            self.functions.insert(f.name.clone(), f);
        }
        Ok(())
    }

    fn update_variable(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        if !is_identifier(name) {
            return Err(EngineError::variable(
                "VAR001",
                format!("Not a valid name: {}", name),
            ));
        }
        let locked = match self.bindings.get(name) {
            Some(Binding::Formula) => {
                return Err(EngineError::variable(
                    "VAR003",
                    format!("Can't assign to named formula {}.", name),
                ))
            }
            Some(Binding::Variable(kind)) => *kind,
            None => None,
        };
        if let Some(kind) = locked {
            if !value.is_blank() && value.kind() != kind {
                return Err(EngineError::variable(
                    "VAR002",
                    format!("Can't change the type of {} from {} to {}.", name, kind, value.kind()),
                ));
            }
        }
        let kind = locked.or_else(|| (!value.is_blank()).then(|| value.kind()));
        self.bindings.insert(name.to_string(), Binding::Variable(kind));
        self.values.insert(name.to_string(), value);
        self.recalc(name);
        Ok(())
    }

    fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = builtin_names().into_iter().map(String::from).collect();
        names.extend(self.functions.keys().cloned());
        names.extend(self.host.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn add_host_function(&mut self, function: HostFunction) {
        self.host.insert(function.name.clone(), function);
    }
}
