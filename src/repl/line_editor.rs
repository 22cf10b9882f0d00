// パス: src/repl/line_editor.rs
// 役割: Line sources for the REPL (rustyline terminal editor, piped stdin, script text)
// 意図: Let the statement reader pull lines without knowing where they come from
// 関連ファイル: src/repl/accumulator.rs, src/repl/cmd.rs
use std::collections::VecDeque;
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::{debug, warn};
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const HISTORY_ENV: &str = "FXREPL_HISTORY_FILE";
const HISTORY_FILE_NAME: &str = ".fxrepl_history";
const MAX_HISTORY: usize = 1000;

/// 行入力の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Line(String),
    Eof,
}

/// REPL が行を取り出す入力元。
pub trait ReplLineSource {
    /// プロンプトを表示（対話時のみ）して 1 行読む。改行は含めない。
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult>;
    /// 対話入力元なら `true`。偽ならプロンプトを出さず文をエコーする。
    fn is_interactive(&self) -> bool;
    fn add_history(&mut self, _entry: &str) {}
    fn save_history(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 標準入力から読む入力元。
///
/// 端末では rustyline の行編集を使い、上下キーで履歴を呼び戻せる。
/// 履歴は `FXREPL_HISTORY_FILE`（なければ `~/.fxrepl_history`）に保存する。
pub struct StdinSource {
    interactive: bool,
    editor: Option<DefaultEditor>,
    history_path: Option<PathBuf>,
}

impl StdinSource {
    /// 端末向け。履歴ファイルを読み込む。行編集を初期化できなければ素の入力に戻る。
    pub fn interactive() -> Self {
        Self::with_history_path(history_path())
    }

    /// パイプ入力向け。プロンプトも履歴も持たない。
    pub fn piped() -> Self {
        Self {
            interactive: false,
            editor: None,
            history_path: None,
        }
    }

    fn with_history_path(history_path: Option<PathBuf>) -> Self {
        let mut editor = match new_editor() {
            Ok(editor) => editor,
            Err(e) => {
                warn!("line editor unavailable, falling back to plain input: {}", e);
                return Self {
                    interactive: true,
                    editor: None,
                    history_path: None,
                };
            }
        };
        if let Some(path) = &history_path {
            // 初回起動時はファイルがないので失敗してよい
            if let Err(e) = editor.load_history(path) {
                debug!("no history loaded from {}: {}", path.display(), e);
            }
        }
        Self {
            interactive: true,
            editor: Some(editor),
            history_path,
        }
    }
}

fn new_editor() -> rustyline::Result<DefaultEditor> {
    let config = Config::builder()
        .max_history_size(MAX_HISTORY)?
        .history_ignore_dups(true)?
        .auto_add_history(false)
        .build();
    DefaultEditor::with_config(config)
}

fn readline_error(e: ReadlineError) -> io::Error {
    match e {
        ReadlineError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl ReplLineSource for StdinSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
        let Some(editor) = &mut self.editor else {
            if self.interactive {
                let mut stdout = io::stdout();
                write!(stdout, "{}", prompt)?;
                stdout.flush()?;
            }
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                return Ok(ReadResult::Eof);
            }
            return Ok(ReadResult::Line(strip_line_ending(line)));
        };
        match editor.readline(prompt) {
            Ok(line) => Ok(ReadResult::Line(line)),
            // Ctrl-C は空行として扱い、入力途中の文を打ち切る
            Err(ReadlineError::Interrupted) => Ok(ReadResult::Line(String::new())),
            Err(ReadlineError::Eof) => Ok(ReadResult::Eof),
            Err(e) => Err(readline_error(e)),
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn add_history(&mut self, entry: &str) {
        let Some(editor) = &mut self.editor else {
            return;
        };
        if let Some(folded) = fold_entry(entry) {
            if let Err(e) = editor.add_history_entry(folded) {
                warn!("failed to record history entry: {}", e);
            }
        }
    }

    fn save_history(&mut self) -> io::Result<()> {
        let (Some(editor), Some(path)) = (&mut self.editor, &self.history_path) else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        editor.save_history(path).map_err(readline_error)
    }
}

/// 複数行の文を 1 行に畳む。空なら `None`。
fn fold_entry(entry: &str) -> Option<String> {
    let folded = entry
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!folded.is_empty()).then_some(folded)
}

fn strip_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
    }
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// 文字列（Import したスクリプトなど）を行単位で返す非対話の入力元。
#[derive(Debug, Clone)]
pub struct ScriptSource {
    lines: VecDeque<String>,
}

impl ScriptSource {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect(),
        }
    }
}

impl ReplLineSource for ScriptSource {
    fn read_line(&mut self, _prompt: &str) -> io::Result<ReadResult> {
        Ok(match self.lines.pop_front() {
            Some(line) => ReadResult::Line(line),
            None => ReadResult::Eof,
        })
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// 履歴ファイルの場所。環境変数を優先し、なければホーム直下。
fn history_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(HISTORY_ENV) {
        return Some(PathBuf::from(path));
    }
    let home = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE"));
    if home.is_none() {
        warn!("history disabled: neither {} nor HOME is set", HISTORY_ENV);
    }
    home.map(PathBuf::from).map(|h| h.join(HISTORY_FILE_NAME))
}
