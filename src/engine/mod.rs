// パス: src/engine/mod.rs
// 役割: REPL が使うエンジンのインターフェースと同梱の参照エンジンを束ねる
// 意図: 数式の解析・評価の方法からフロントエンドを切り離す
// 関連ファイル: src/engine/recalc.rs, src/repl/dispatch.rs, src/repl/session.rs
//! 数式エンジンとの境界。
//!
//! REPL はこのモジュールの `Engine` トレイトだけを通して評価・定義・変数更新を行う。
//! `RecalcEngine` は同梱の参照実装で、バイナリとテストが外部依存なしに動くようにする。

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod recalc;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::errors::{ErrorInfo, LexerError, ParseError};
use crate::value::{Record, Value};

pub use recalc::RecalcEngine;

/// エンジンが返す失敗。評価時の実行エラーは `Value::Error` で返り、ここには来ない。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Lex(#[from] LexerError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Check(ErrorInfo),
    #[error("{0}")]
    Definition(ErrorInfo),
    #[error("{0}")]
    Variable(ErrorInfo),
    #[error("evaluation timed out")]
    TimedOut,
    #[error("evaluation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn check(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Check(ErrorInfo::new(code, msg, None))
    }

    pub fn definition(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Definition(ErrorInfo::new(code, msg, None))
    }

    pub fn variable(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Variable(ErrorInfo::new(code, msg, None))
    }

    /// 中断（タイムアウトまたは取り消し）による失敗かどうか。
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Cancelled)
    }
}

/// 名前付き数式の再計算通知。初回定義時と依存先の変更時に同期的に呼ばれる。
pub type RecalcCallback = Box<dyn FnMut(&str, &Value)>;

/// ホストが登録する関数（Help/Reset など）。引数は評価済みの値で渡される。
pub struct HostFunction {
    pub name: String,
    pub min_args: usize,
    pub max_args: usize,
    pub handler: Box<dyn FnMut(&[Value]) -> Value>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: FnMut(&[Value]) -> Value + 'static,
    {
        Self {
            name: name.into(),
            min_args: arity,
            max_args: arity,
            handler: Box::new(handler),
        }
    }
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// 評価の取り消しと期限を共有するトークン。
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// 取り消されず期限もないトークン。対話セッションで使う。
    pub fn never() -> Self {
        Self::default()
    }

    /// 指定時間後に期限切れとなるトークン。
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// 中断理由があればそれを返す。明示的な取り消しを期限切れより優先する。
    pub fn check(&self) -> Result<(), EngineError> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::TimedOut),
            _ => Ok(()),
        }
    }
}

/// REPL が利用するエンジン操作の集合。
pub trait Engine {
    /// 式を評価する。`bindings` のフィールドは式中から名前で参照できる。
    fn evaluate(
        &mut self,
        expression: &str,
        bindings: &Record,
        cancel: &CancelToken,
    ) -> Result<Value, EngineError>;

    /// 自動再計算される名前付き数式を定義する。
    fn define_named_formula(
        &mut self,
        name: &str,
        expression: &str,
        on_recalc: RecalcCallback,
    ) -> Result<(), EngineError>;

    /// ユーザー定義関数を登録する。1 件でも失敗すれば何も登録しない。
    fn define_functions(&mut self, source: &str) -> Result<(), Vec<EngineError>>;

    /// 変数を作成または更新し、依存する名前付き数式を再計算する。
    fn update_variable(&mut self, name: &str, value: Value) -> Result<(), EngineError>;

    /// 呼び出し可能な関数名を重複なしで返す。
    fn function_names(&self) -> Vec<String>;

    /// ホスト関数を登録する。
    fn add_host_function(&mut self, function: HostFunction);
}

#[cfg(test)]
mod tests {
    use super::{CancelToken, EngineError};
    use std::time::Duration;

    #[test]
    fn cancel_token_reports_cancel_before_deadline() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(token.check().is_ok());
        let shared = token.clone();
        shared.cancel();
        assert_eq!(token.check(), Err(EngineError::Cancelled));
    }

    #[test]
    /// 期限ゼロのトークンは即座にタイムアウト扱いになる。
    fn zero_timeout_is_timed_out() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        let err = token.check().unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(err.to_string(), "evaluation timed out");
    }
}
