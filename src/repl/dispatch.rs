// パス: src/repl/dispatch.rs
// 役割: Route a classified statement to the matching engine operation
// 意図: Turn every engine result into a DispatchOutcome so no failure escapes the statement
// 関連ファイル: src/repl/classify.rs, src/repl/session.rs, src/engine/mod.rs
//! 文の実行。
//!
//! - 評価結果のエラー値は `EngineError` に変換し、致命的な失敗として伝播させない。
//! - 名前付き数式の再計算通知はコールバックから `mpsc` で `RecalcEvent` として送り、
//!   セッション側が文の結果の後にまとめて表示する。
//! - 関数定義のエラーは先頭の 1 件だけを返し、残りはログに流す。

use std::sync::mpsc::Sender;

use log::{debug, warn};

use super::classify::Statement;
use crate::engine::{CancelToken, Engine};
use crate::format::{format_value, FormatOptions};
use crate::value::{Record, Value};

/// 文の実行結果。
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Printed(String),
    Updated { name: String, value: Value },
    DefinitionError(String),
    EngineError(String),
}

/// 名前付き数式の再計算通知。
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcEvent {
    pub name: String,
    pub value: Value,
}

/// 分類済みの文を実行する。`Empty` と成功した定義は `None`。
pub fn dispatch(
    engine: &mut dyn Engine,
    statement: Statement,
    recalc_tx: &Sender<RecalcEvent>,
    opts: &FormatOptions,
    cancel: &CancelToken,
) -> Option<DispatchOutcome> {
    debug!("dispatch {:?}", statement);
    match statement {
        Statement::Empty => None,
        Statement::Assignment {
            identifier,
            expression,
        } => Some(assign(engine, identifier, &expression, cancel)),
        Statement::NamedFormula {
            identifier,
            formula,
        } => {
            let tx = recalc_tx.clone();
            let on_recalc = Box::new(move |name: &str, value: &Value| {
                // 受信側が先に破棄されていれば通知は捨てる
                let _ = tx.send(RecalcEvent {
                    name: name.to_string(),
                    value: value.clone(),
                });
            });
            engine
                .define_named_formula(&identifier, &formula, on_recalc)
                .err()
                .map(|e| DispatchOutcome::EngineError(e.to_string()))
        }
        Statement::FunctionDefinition { raw_text } => match engine.define_functions(&raw_text) {
            Ok(()) => None,
            Err(errors) => {
                let mut iter = errors.into_iter();
                let first = iter.next()?;
                for rest in iter {
                    warn!("additional definition error: {}", rest);
                }
                Some(DispatchOutcome::DefinitionError(first.to_string()))
            }
        },
        Statement::Evaluation { expression } => {
            Some(match evaluate(engine, &expression, cancel) {
                Ok(value) => DispatchOutcome::Printed(format_value(&value, opts)),
                Err(message) => DispatchOutcome::EngineError(message),
            })
        }
    }
}

/// 評価し、エラー値とエンジンの失敗をどちらもメッセージにそろえる。
fn evaluate(engine: &mut dyn Engine, expression: &str, cancel: &CancelToken) -> Result<Value, String> {
    match engine.evaluate(expression, &Record::new(), cancel) {
        Ok(Value::Error { message }) => Err(message),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}

fn assign(
    engine: &mut dyn Engine,
    identifier: String,
    expression: &str,
    cancel: &CancelToken,
) -> DispatchOutcome {
    let value = match evaluate(engine, expression, cancel) {
        Ok(value) => value,
        Err(message) => return DispatchOutcome::EngineError(message),
    };
    match engine.update_variable(&identifier, value.clone()) {
        Ok(()) => DispatchOutcome::Updated {
            name: identifier,
            value,
        },
        Err(e) => DispatchOutcome::EngineError(e.to_string()),
    }
}
