// パス: src/repl/cmd.rs
// 役割: REPL statement loop, prompt/echo protocol, Import and Exit handling
// 意図: Drive a session from any line source and keep going after per-statement failures
// 関連ファイル: src/repl/accumulator.rs, src/repl/session.rs, src/repl/printer.rs
//! 対話ループ本体。
//! 入力元から文を読み、セッションで実行し、結果を出力へ書き出す。
//! 非対話の入力元（パイプ・Import したスクリプト）では文を `>> ` 付きでエコーする。

use std::io::{self, IsTerminal, Write};

use log::info;

use super::accumulator::read_statement;
use super::line_editor::{ReplLineSource, ScriptSource, StdinSource};
use super::printer::{write_msg, write_msgs, ReplMsg};
use super::session::{Session, SessionOptions};
use crate::engine::CancelToken;

/// 非対話時に文の前へ付けるエコー記号。
pub const ECHO_PREFIX: &str = ">> ";
/// Import の入れ子の上限。
pub const MAX_IMPORT_DEPTH: usize = 8;

/// REPL の起動設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplOptions {
    pub format_tables: bool,
    /// エラーを色付きで表示するか。
    pub color: bool,
    /// 対話ループの前に読み込むスクリプト。
    pub scripts: Vec<String>,
    /// スクリプトを読み終えたら対話ループに入らず終了する。
    pub batch: bool,
}

impl Default for ReplOptions {
    fn default() -> Self {
        Self {
            format_tables: true,
            color: true,
            scripts: Vec::new(),
            batch: false,
        }
    }
}

/// 標準入出力で対話セッションを開始する。端末でなければパイプ入力として扱う。
///
/// # Examples
/// ```no_run
/// # fn main() -> std::io::Result<()> {
/// fxrepl::repl::run_repl(&fxrepl::repl::ReplOptions::default())?;
/// # Ok(())
/// # }
/// ```
pub fn run_repl(options: &ReplOptions) -> io::Result<()> {
    let mut source = if io::stdin().is_terminal() {
        StdinSource::interactive()
    } else {
        StdinSource::piped()
    };
    let fs = FsIo;
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    run_repl_with(&mut source, &fs, &mut stdout, &mut stderr, options)
}

/// 任意の入力元・ファイル I/O・出力先でセッションを動かす。
///
/// 文ごとの失敗は出力へ書いて継続する。`Exit()` か入力の終端で戻る。
pub fn run_repl_with<S, I, W, E>(
    source: &mut S,
    file_io: &I,
    out: &mut W,
    err: &mut E,
    options: &ReplOptions,
) -> io::Result<()>
where
    S: ReplLineSource + ?Sized,
    I: ReplIo,
    W: Write,
    E: Write,
{
    writeln!(out, "Formula REPL (Rust) {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "Enter formulas.  Use \"Help()\" for details.")?;

    let session = Session::with_recalc_engine(SessionOptions {
        format_tables: options.format_tables,
    });
    let mut runner = Runner {
        session,
        file_io,
        color: options.color,
        depth: 0,
    };

    let mut flow = Flow::Continue;
    for script in &options.scripts {
        flow = runner.import(script, out)?;
        if flow == Flow::Exit {
            break;
        }
    }
    if flow == Flow::Continue && !options.batch {
        if let Err(e) = runner.run_source(source, out) {
            writeln!(err, "input error: {}", e)?;
        }
    }

    if let Err(e) = source.save_history() {
        writeln!(err, "failed to save history: {}", e)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Runner<'a, I: ReplIo> {
    session: Session,
    file_io: &'a I,
    color: bool,
    depth: usize,
}

impl<I: ReplIo> Runner<'_, I> {
    /// 入力元が尽きるか `Exit()` が呼ばれるまで文を処理する。
    fn run_source<S, W>(&mut self, source: &mut S, out: &mut W) -> io::Result<Flow>
    where
        S: ReplLineSource + ?Sized,
        W: Write,
    {
        while let Some(statement) = read_statement(source)? {
            if source.is_interactive() {
                source.add_history(&statement);
            } else {
                writeln!(out, "{}{}", ECHO_PREFIX, statement.trim_end())?;
            }
            let step = self.session.execute(&statement, &CancelToken::never());
            write_msgs(out, &step.messages, self.color)?;
            for path in &step.imports {
                if self.import(path, out)? == Flow::Exit {
                    return Ok(Flow::Exit);
                }
            }
            if step.exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// ファイルを読み込み、エコー付きで文を順に実行する。
    fn import<W: Write>(&mut self, path: &str, out: &mut W) -> io::Result<Flow> {
        if self.depth >= MAX_IMPORT_DEPTH {
            let msg = ReplMsg::Err(format!(
                "Import nesting is limited to {} levels: {}",
                MAX_IMPORT_DEPTH, path
            ));
            write_msg(out, &msg, self.color)?;
            return Ok(Flow::Continue);
        }
        let text = match self.file_io.read_to_string(path) {
            Ok(text) => text,
            Err(message) => {
                write_msg(out, &ReplMsg::Err(message), self.color)?;
                return Ok(Flow::Continue);
            }
        };
        info!("import {} (depth {})", path, self.depth + 1);
        let mut script = ScriptSource::new(&text);
        self.depth += 1;
        let flow = self.run_source(&mut script, out);
        self.depth -= 1;
        flow
    }
}

/// REPL に必要な最小限のファイル読み込み抽象。
pub trait ReplIo {
    /// 指定されたパスのテキストを取得する。失敗は表示用のメッセージで返す。
    fn read_to_string(&self, path: &str) -> Result<String, String>;
}

/// 実際のファイルシステムにアクセスする標準実装。
pub struct FsIo;

impl ReplIo for FsIo {
    fn read_to_string(&self, path: &str) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => format!("File not found: {}", path),
            _ => format!("Could not read {}: {}", path, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::io;

    use super::{run_repl_with, FsIo, ReplIo, ReplOptions};
    use crate::repl::line_editor::{ReadResult, ReplLineSource};
    use pretty_assertions::assert_eq;

    struct NoopIo;
    impl ReplIo for NoopIo {
        fn read_to_string(&self, path: &str) -> Result<String, String> {
            Err(format!("File not found: {}", path))
        }
    }

    struct MapIo(HashMap<String, String>);
    impl ReplIo for MapIo {
        fn read_to_string(&self, path: &str) -> Result<String, String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| format!("File not found: {}", path))
        }
    }

    struct ScriptedLineSource {
        lines: VecDeque<&'static str>,
        interactive: bool,
        history: Vec<String>,
        saved: bool,
    }

    impl ScriptedLineSource {
        fn new(lines: &[&'static str], interactive: bool) -> Self {
            Self {
                lines: lines.iter().copied().collect(),
                interactive,
                history: Vec::new(),
                saved: false,
            }
        }
    }

    impl ReplLineSource for ScriptedLineSource {
        fn read_line(&mut self, _prompt: &str) -> io::Result<ReadResult> {
            Ok(match self.lines.pop_front() {
                Some(s) => ReadResult::Line(s.to_string()),
                None => ReadResult::Eof,
            })
        }

        fn is_interactive(&self) -> bool {
            self.interactive
        }

        fn add_history(&mut self, entry: &str) {
            self.history.push(entry.to_string());
        }

        fn save_history(&mut self) -> io::Result<()> {
            self.saved = true;
            Ok(())
        }
    }

    fn plain() -> ReplOptions {
        ReplOptions {
            color: false,
            ..ReplOptions::default()
        }
    }

    /// バナー 2 行を除いた出力を返す。
    fn run<I: ReplIo>(src: &mut ScriptedLineSource, io: &I, options: &ReplOptions) -> String {
        let mut out = Vec::new();
        let mut err = Vec::new();
        run_repl_with(src, io, &mut out, &mut err, options).unwrap();
        let text = String::from_utf8(out).unwrap();
        text.lines().skip(2).map(|l| format!("{l}\n")).collect()
    }

    #[test]
    /// 対話モードではエコーせず、文を履歴に積んで終了時に保存する。
    fn interactive_session_records_history() {
        let mut src = ScriptedLineSource::new(&["Set(x,", "2)", "x * 3", "// note"], true);
        let output = run(&mut src, &NoopIo, &plain());
        assert_eq!(output, "x: 2\n6\n");
        assert_eq!(src.history, vec!["Set(x,\n2)\n", "x * 3\n"]);
        assert!(src.saved);
    }

    #[test]
    fn piped_session_echoes_statements() {
        let mut src = ScriptedLineSource::new(&["1 + 1", "1/0"], false);
        let output = run(&mut src, &NoopIo, &plain());
        assert_eq!(output, ">> 1 + 1\n2\n>> 1/0\nError: Division by zero.\n");
    }

    #[test]
    /// Exit() 以降の入力は読まれない。
    fn exit_stops_the_loop() {
        let mut src = ScriptedLineSource::new(&["Exit()", "1 + 1"], true);
        let output = run(&mut src, &NoopIo, &plain());
        assert_eq!(output, "");
        assert_eq!(src.lines.len(), 1);
        assert!(src.saved);
    }

    #[test]
    fn import_runs_script_with_echo_then_returns() {
        let mut files = HashMap::new();
        files.insert("lib.fx".to_string(), "Set(a, 10)\n// skipped\nb = a * 2\n".to_string());
        let mut src = ScriptedLineSource::new(&["Import(\"lib.fx\")", "Set(a, 1)"], true);
        let output = run(&mut src, &MapIo(files), &plain());
        assert_eq!(
            output,
            ">> Set(a, 10)\na: 10\n>> b = a * 2\nb: 20\na: 1\nb: 2\n"
        );
    }

    #[test]
    fn missing_import_is_reported_and_session_continues() {
        let mut src = ScriptedLineSource::new(&["Import(\"nope.fx\")", "3"], true);
        let output = run(&mut src, &NoopIo, &plain());
        assert_eq!(output, "Error: File not found: nope.fx\n3\n");
    }

    #[test]
    /// 自分自身を読み込むスクリプトは入れ子の上限で止まる。
    fn recursive_import_is_bounded() {
        let mut files = HashMap::new();
        files.insert("self.fx".to_string(), "Import(\"self.fx\")\n".to_string());
        let mut src = ScriptedLineSource::new(&["Import(\"self.fx\")"], true);
        let output = run(&mut src, &MapIo(files), &plain());
        assert_eq!(output.matches(">> Import(\"self.fx\")").count(), 8);
        assert!(output.contains("Error: Import nesting is limited to 8 levels: self.fx"));
    }

    #[test]
    fn batch_mode_runs_scripts_only() {
        let mut files = HashMap::new();
        files.insert("init.fx".to_string(), "Table({a: 1, b: 22})\n".to_string());
        let options = ReplOptions {
            scripts: vec!["init.fx".into()],
            batch: true,
            ..plain()
        };
        let mut src = ScriptedLineSource::new(&["99"], true);
        let output = run(&mut src, &MapIo(files), &options);
        assert_eq!(
            output,
            ">> Table({a: 1, b: 22})\n a   b  \n=== ====\n 1   22 \n"
        );
        assert_eq!(src.lines.len(), 1);
    }

    #[test]
    fn fs_io_reports_missing_file() {
        let err = FsIo
            .read_to_string("/definitely/not/here.fx")
            .unwrap_err();
        assert_eq!(err, "File not found: /definitely/not/here.fx");
    }
}
