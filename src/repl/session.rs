// パス: src/repl/session.rs
// 役割: Session state (engine instance and options) plus the Help/Reset/Exit/Option/Import directives
// 意図: Hold all per-session mutable state in one value so sessions never share engines
// 関連ファイル: src/repl/dispatch.rs, src/repl/cmd.rs, src/engine/mod.rs
//! 1 セッション分の状態。
//!
//! - エンジンとオプションをまとめて所有し、`Reset` で丸ごと作り直す。
//! - `Help` などのディレクティブはエンジンのホスト関数として登録する。
//!   ホスト関数は評価の途中で呼ばれるため、セッションを直接触らず `mpsc` に
//!   `Directive` を積むだけにし、文の実行後にまとめて適用する。
//! - 出力順は「文の結果 → 再計算通知 → ディレクティブの出力」。
//!   ディレクティブを積んだ式の評価結果（`true`）は表示しない。

use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, info, warn};

use super::classify::classify;
use super::dispatch::{dispatch, DispatchOutcome, RecalcEvent};
use super::printer::{help_text, ReplMsg};
use crate::engine::{CancelToken, Engine, HostFunction, RecalcEngine};
use crate::format::{format_value, FormatOptions};
use crate::value::{Record, Value};

/// `Option` で指定できるオプション名（正規形）。
pub const OPTION_FORMAT_TABLE: &str = "FormatTable";
/// オプション名を値に持つ定数レコードの名前。
pub const OPTIONS_RECORD: &str = "Options";

/// ホスト関数から積まれるセッション操作。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Help,
    Reset,
    Exit,
    SetOption { name: String, value: bool },
    Import(String),
}

/// セッションの表示オプション。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub format_tables: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            format_tables: true,
        }
    }
}

/// エンジンを生成する関数。`Reset` のたびに呼ばれる。
pub type EngineFactory = Box<dyn Fn() -> Box<dyn Engine>>;

/// 1 文を実行した結果。`cmd` 側が出力と制御に使う。
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub messages: Vec<ReplMsg>,
    /// 読み込むスクリプトのパス（積まれた順）。
    pub imports: Vec<String>,
    pub exit: bool,
}

/// 対話セッション。
pub struct Session {
    engine: Box<dyn Engine>,
    factory: EngineFactory,
    startup: SessionOptions,
    options: SessionOptions,
    recalc_tx: Sender<RecalcEvent>,
    recalc_rx: Receiver<RecalcEvent>,
    directive_tx: Sender<Directive>,
    directive_rx: Receiver<Directive>,
}

impl Session {
    /// 同梱の `RecalcEngine` を使うセッションを作る。
    pub fn with_recalc_engine(options: SessionOptions) -> Self {
        Self::new(Box::new(|| Box::new(RecalcEngine::new()) as Box<dyn Engine>), options)
    }

    pub fn new(factory: EngineFactory, options: SessionOptions) -> Self {
        let (recalc_tx, recalc_rx) = mpsc::channel();
        let (directive_tx, directive_rx) = mpsc::channel();
        let engine = prepare_engine(&factory, &directive_tx);
        Self {
            engine,
            factory,
            startup: options,
            options,
            recalc_tx,
            recalc_rx,
            directive_tx,
            directive_rx,
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            format_tables: self.options.format_tables,
        }
    }

    pub fn function_names(&self) -> Vec<String> {
        self.engine.function_names()
    }

    /// 1 文を分類・実行し、表示すべきメッセージと制御を返す。
    pub fn execute(&mut self, statement: &str, cancel: &CancelToken) -> Step {
        let opts = self.format_options();
        let outcome = dispatch(
            self.engine.as_mut(),
            classify(statement),
            &self.recalc_tx,
            &opts,
            cancel,
        );
        let directives: Vec<Directive> = self.directive_rx.try_iter().collect();

        let mut step = Step::default();
        match outcome {
            Some(DispatchOutcome::Printed(_)) if !directives.is_empty() => {}
            Some(outcome) => step.messages.push(outcome_message(outcome, &opts)),
            None => {}
        }
        step.messages
            .extend(self.recalc_rx.try_iter().map(|ev| recalc_message(ev, &opts)));
        for directive in directives {
            self.apply(directive, &mut step);
        }
        step
    }

    fn apply(&mut self, directive: Directive, step: &mut Step) {
        debug!("directive {:?}", directive);
        match directive {
            Directive::Help => step
                .messages
                .push(ReplMsg::Out(help_text(&self.engine.function_names()))),
            Directive::Reset => self.reset(),
            Directive::Exit => step.exit = true,
            Directive::SetOption { name, value } => {
                if name == OPTION_FORMAT_TABLE {
                    self.options.format_tables = value;
                }
            }
            Directive::Import(path) => step.imports.push(path),
        }
    }

    /// エンジンを作り直し、オプションを起動時の値に戻す。
    pub fn reset(&mut self) {
        info!("session reset");
        self.engine = prepare_engine(&self.factory, &self.directive_tx);
        self.options = self.startup;
        // 破棄したエンジンから届いた通知は捨てる
        for _ in self.recalc_rx.try_iter() {}
    }
}

/// 正規のオプション名を返す。大文字小文字は区別しない。
pub fn canonical_option_name(name: &str) -> Option<&'static str> {
    [OPTION_FORMAT_TABLE]
        .into_iter()
        .find(|known| known.eq_ignore_ascii_case(name))
}

fn prepare_engine(factory: &EngineFactory, tx: &Sender<Directive>) -> Box<dyn Engine> {
    let mut engine = factory();
    install_directives(engine.as_mut(), tx);
    let options = Record::new().with(OPTION_FORMAT_TABLE, OPTION_FORMAT_TABLE);
    if let Err(e) = engine.update_variable(OPTIONS_RECORD, Value::Record(options)) {
        warn!("could not bind {}: {}", OPTIONS_RECORD, e);
    }
    engine
}

fn install_directives(engine: &mut dyn Engine, tx: &Sender<Directive>) {
    for (name, directive) in [
        ("Help", Directive::Help),
        ("Reset", Directive::Reset),
        ("Exit", Directive::Exit),
    ] {
        let tx = tx.clone();
        engine.add_host_function(HostFunction::new(name, 0, move |_| {
            let _ = tx.send(directive.clone());
            Value::Boolean(true)
        }));
    }

    let option_tx = tx.clone();
    engine.add_host_function(HostFunction::new("Option", 2, move |args| match args {
        [Value::String(name), Value::Boolean(value)] => match canonical_option_name(name) {
            Some(canonical) => {
                let _ = option_tx.send(Directive::SetOption {
                    name: canonical.to_string(),
                    value: *value,
                });
                Value::Boolean(true)
            }
            None => Value::error(format!("Invalid option name: {}.", name)),
        },
        [Value::String(_), other] => Value::error(format!(
            "Option value must be a Boolean, found {}.",
            other.kind()
        )),
        _ => Value::error("Option name must be Text."),
    }));

    let import_tx = tx.clone();
    engine.add_host_function(HostFunction::new("Import", 1, move |args| match args {
        [Value::String(path)] => {
            let _ = import_tx.send(Directive::Import(path.clone()));
            Value::Boolean(true)
        }
        _ => Value::error("Import expects a file path."),
    }));
}

fn outcome_message(outcome: DispatchOutcome, opts: &FormatOptions) -> ReplMsg {
    match outcome {
        DispatchOutcome::Printed(text) => ReplMsg::Out(text),
        DispatchOutcome::Updated { name, value } => {
            ReplMsg::Out(format!("{}: {}", name, format_value(&value, opts)))
        }
        DispatchOutcome::DefinitionError(message) | DispatchOutcome::EngineError(message) => {
            ReplMsg::Err(message)
        }
    }
}

fn recalc_message(event: RecalcEvent, opts: &FormatOptions) -> ReplMsg {
    match event.value {
        Value::Error { message } => ReplMsg::LabeledErr {
            label: event.name,
            message,
        },
        value => ReplMsg::Out(format!("{}: {}", event.name, format_value(&value, opts))),
    }
}

#[cfg(test)]
mod tests {
    use super::{canonical_option_name, Session, SessionOptions, Step};
    use crate::engine::CancelToken;
    use crate::repl::printer::ReplMsg;

    fn run(session: &mut Session, src: &str) -> Step {
        session.execute(src, &CancelToken::never())
    }

    fn out(s: &str) -> ReplMsg {
        ReplMsg::Out(s.to_string())
    }

    #[test]
    /// 代入の表示が再計算通知より先に出る。
    fn assignment_echo_precedes_recalc_output() {
        let mut s = Session::with_recalc_engine(SessionOptions::default());
        assert_eq!(run(&mut s, "Set(x, 1)").messages, vec![out("x: 1")]);
        assert_eq!(run(&mut s, "y = x + 1").messages, vec![out("y: 2")]);
        assert_eq!(
            run(&mut s, "Set(x, 5)").messages,
            vec![out("x: 5"), out("y: 6")]
        );
    }

    #[test]
    fn recalc_error_is_labeled() {
        let mut s = Session::with_recalc_engine(SessionOptions::default());
        run(&mut s, "Set(d, 1)");
        run(&mut s, "q = 10 / d");
        assert_eq!(
            run(&mut s, "Set(d, 0)").messages,
            vec![
                out("d: 0"),
                ReplMsg::LabeledErr {
                    label: "q".into(),
                    message: "Division by zero.".into()
                }
            ]
        );
    }

    #[test]
    /// Option でテーブル表示を切り替え、Reset で起動時の設定に戻る。
    fn option_and_reset_restore_startup_options() {
        let mut s = Session::with_recalc_engine(SessionOptions::default());
        let step = run(&mut s, "Option(\"formattable\", false)");
        assert!(step.messages.is_empty(), "{:?}", step.messages);
        assert!(!s.options().format_tables);

        run(&mut s, "Set(k, 1)");
        run(&mut s, "Reset()");
        assert!(s.options().format_tables);
        let step = run(&mut s, "k");
        assert!(matches!(step.messages.as_slice(), [ReplMsg::Err(_)]));

        run(&mut s, "Option(Options.FormatTable, false)");
        assert!(!s.options().format_tables);
    }

    #[test]
    fn invalid_option_name_is_reported() {
        let mut s = Session::with_recalc_engine(SessionOptions::default());
        assert_eq!(
            run(&mut s, "Option(\"Colors\", true)").messages,
            vec![ReplMsg::Err("Invalid option name: Colors.".into())]
        );
        assert!(s.options().format_tables);
    }

    #[test]
    fn help_exit_and_import_are_collected() {
        let mut s = Session::with_recalc_engine(SessionOptions::default());
        let step = run(&mut s, "Help()");
        match step.messages.as_slice() {
            [ReplMsg::Out(text)] => {
                assert!(text.contains("Available functions"));
                assert!(text.contains("Import"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let step = run(&mut s, "Import(\"a.fx\"); Exit()");
        assert_eq!(step.imports, vec!["a.fx".to_string()]);
        assert!(step.exit);
        assert!(step.messages.is_empty());
    }

    #[test]
    fn option_names_match_case_insensitively() {
        assert_eq!(canonical_option_name("FORMATTABLE"), Some("FormatTable"));
        assert_eq!(canonical_option_name("Format"), None);
    }
}
