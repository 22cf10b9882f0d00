// パス: src/logging.rs
// 役割: `log` の出力先として tracing-subscriber を初期化する
// 意図: 環境変数でレベルを選べる診断出力を標準エラーへ出す
// 関連ファイル: src/bin/fxrepl.rs, src/repl/session.rs, src/repl/cmd.rs
//! ログ出力の初期化。
//!
//! ライブラリは `log` のマクロだけを使い、バイナリがここで購読側を登録する。
//! `tracing-subscriber` は `log` のレコードも取り込むので、出力先は 1 つで済む。
//! レベルは環境変数 `FXREPL_LOG` に `EnvFilter` の書式で指定する（既定は `warn`）。

use tracing_subscriber::EnvFilter;

/// ログレベルを指定する環境変数。
pub const LOG_ENV: &str = "FXREPL_LOG";
/// 環境変数が未設定または不正なときのフィルタ。
pub const DEFAULT_FILTER: &str = "warn";

/// 指定文字列からフィルタを作る。空・不正なら既定値に戻す。
pub fn filter_from(spec: Option<&str>) -> EnvFilter {
    spec.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// 購読側を登録する。2 回目以降の呼び出しは何もしない。
pub fn init() {
    let spec = std::env::var(LOG_ENV).ok();
    // 登録済みなら Err が返るだけなので無視してよい
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from(spec.as_deref()))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::{filter_from, init};
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn filter_falls_back_to_warn() {
        assert_eq!(filter_from(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(filter_from(Some("  ")).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            filter_from(Some("fxrepl=loud")).max_level_hint(),
            Some(LevelFilter::WARN)
        );
    }

    #[test]
    fn filter_accepts_levels_and_directives() {
        assert_eq!(filter_from(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(
            filter_from(Some("fxrepl=trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }

    #[test]
    /// 2 回呼んでも失敗しない。
    fn init_is_idempotent() {
        init();
        init();
        log::warn!("logger smoke test");
    }
}
