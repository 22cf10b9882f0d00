// パス: src/repl/mod.rs
// 役割: REPL module facade and re-exports
// 意図: Expose interactive entry points without leaking internals
// 関連ファイル: src/repl/cmd.rs, src/repl/session.rs, src/bin/fxrepl.rs
//! 数式 REPL の対話環境を構成するモジュール群をまとめたファサード。
//!
//! 入力・分類・実行・表示を役割ごとに分ける。
//! - `accumulator`: 複数行入力を 1 文にまとめる
//! - `classify`: 文の形による振り分け
//! - `dispatch`: エンジン操作の呼び出しと結果の正規化
//! - `session`: エンジンとオプションの保持、ディレクティブ
//! - `cmd`: メインループと Import
//! - `printer`: ユーザー向けの表示ロジック

pub mod accumulator;
pub mod classify;
pub mod cmd;
pub mod dispatch;
pub mod line_editor;
pub mod printer;
pub mod session;

pub use classify::{classify, Statement};
pub use cmd::{run_repl, run_repl_with, FsIo, ReplIo, ReplOptions};
pub use dispatch::{dispatch, DispatchOutcome, RecalcEvent};
pub use line_editor::{ReadResult, ReplLineSource, ScriptSource};
pub use printer::ReplMsg;
pub use session::{Session, SessionOptions};
