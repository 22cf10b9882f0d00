// パス: src/lib.rs
// 役割: Crate root wiring modules and exports
// 意図: Expose the REPL front-end, the engine interface and the formatter
// 関連ファイル: src/repl/mod.rs, src/engine/mod.rs, src/format.rs
//! 数式 REPL (Rust) ルートモジュール
//!
//! 目的:
//! - Excel 風の数式言語の対話フロントエンドを提供する。
//! - 複数行入力の蓄積、文の振り分け、評価結果の整形を担う。
//!
//! 方針:
//! - コメント/ドキュメントは日本語、識別子は英語。
//! - 数式の解析と評価は `engine::Engine` トレイトの向こう側に置く。
//! - パブリックAPIは最小限。

pub mod engine;
pub mod errors;
pub mod format;
pub mod host;
pub mod logging;
pub mod repl;
pub mod value;

// 便利な再エクスポート（値モデルとエラー型のみ）
pub use crate::errors::*;
pub use crate::value::{Record, Table, Value, ValueKind};
