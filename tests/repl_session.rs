// パス: tests/repl_session.rs
// 役割: スクリプト入力で REPL ループ全体を動かす統合テスト
// 意図: 複数行入力・分類・実行・表示の順序が利用者から見て正しいことを保証する
// 関連ファイル: src/repl/cmd.rs, src/repl/session.rs, tests/test_support.rs
#[path = "test_support.rs"]
mod support;

use fxrepl::repl::ReplOptions;
use pretty_assertions::assert_eq;
use support::{plain_options, run_lines, run_session, MapIo, ScriptedLineSource};

#[test]
/// 括弧が閉じるまで行をまとめてから実行する。
fn multi_line_set_is_one_statement() {
    let mut source = ScriptedLineSource::interactive(&["Set(x,", "1+1)", "x"]);
    let (out, err) = run_session(&mut source, &MapIo::default(), &plain_options());
    assert_eq!(out, "x: 2\n2\n");
    assert_eq!(err, "");
    assert_eq!(source.history, vec!["Set(x,\n1+1)\n", "x\n"]);
}

#[test]
fn blank_line_aborts_unbalanced_statement() {
    let out = run_lines(&["Sum(1,", "", "3"]);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2, "{out}");
    assert!(lines[0].starts_with("Error: [PAR"), "{out}");
    assert_eq!(lines[1], "3");
}

#[test]
/// 名前付き数式は定義時と依存先の変更時に通知される。
fn named_formula_recalculates_after_assignment() {
    let out = run_lines(&[
        "Set(m, 2)",
        "Set(a, 3)",
        "F = m * a",
        "Set(a, 10)",
        "Set(m, 0.5)",
    ]);
    assert_eq!(out, "m: 2\na: 3\nF: 6\na: 10\nF: 20\nm: 0.5\nF: 5\n");
}

#[test]
fn trailing_equals_continues_formula_definition() {
    let out = run_lines(&["Set(w, 4)", "Area =", "  w * w", "Set(w, 5)"]);
    assert_eq!(out, "w: 4\nArea: 16\nw: 5\nArea: 25\n");
}

#[test]
fn function_definitions_are_silent_until_called() {
    let out = run_lines(&[
        "Hyp(a: Number, b: Number): Number = Sqrt(a^2 + b^2)",
        "Twice(x: Number): Number {",
        "  x;",
        "  x * 2",
        "}",
        "Hyp(3, 4) + Twice(5)",
    ]);
    assert_eq!(out, "15\n");
}

#[test]
/// 定義エラーは先頭の 1 件だけが表示される。
fn definition_error_shows_first_message_only() {
    let out = run_lines(&["Bad(a: Widget, a: Number): Number = a"]);
    assert_eq!(out.lines().count(), 1, "{out}");
    assert!(out.starts_with("Error: [DEF002]"), "{out}");
}

#[test]
fn errors_do_not_end_the_session() {
    let out = run_lines(&["1/0", "Nope(1)", "Set(t, \"a\")", "Set(t, 1)", "t"]);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "Error: Division by zero.");
    assert!(lines[1].starts_with("Error: [CHK002]"), "{out}");
    assert_eq!(lines[2], "t: \"a\"");
    assert!(lines[3].starts_with("Error: [VAR002]"), "{out}");
    assert_eq!(lines[4], "\"a\"");
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let out = run_lines(&["// header", "", "/* block */", "1 + /* inline */ 2 // tail"]);
    assert_eq!(out, "3\n");
}

#[test]
/// Option でテーブルの表示形式を切り替える。
fn option_switches_table_layout() {
    let out = run_lines(&[
        "Set(t, Table({a: 1, b: \"x\"}))",
        "Option(Options.FormatTable, false)",
        "t",
        "Option(\"FormatTable\", true)",
        "t",
    ]);
    assert_eq!(
        out,
        concat!(
            "t:  a   b \n=== ===\n 1   x \n",
            "[{a:1, b:\"x\"}]\n",
            " a   b \n=== ===\n 1   x \n",
        )
    );
}

#[test]
fn no_format_tables_flag_starts_flat() {
    let options = ReplOptions {
        format_tables: false,
        ..plain_options()
    };
    let mut source = ScriptedLineSource::interactive(&["Table({a: 1}, {a: 2})", "Reset()", "Table({a: 3})"]);
    let (out, _) = run_session(&mut source, &MapIo::default(), &options);
    assert_eq!(out, "[{a:1}, {a:2}]\n[{a:3}]\n");
}

#[test]
/// Reset は変数と数式を消し、同じ名前を再定義できるようにする。
fn reset_clears_definitions() {
    let out = run_lines(&["G = 1", "Reset()", "G = 2", "G"]);
    assert_eq!(out, "G: 1\nG: 2\n2\n");
}

#[test]
fn help_lists_functions_and_syntax() {
    let out = run_lines(&["Help()"]);
    assert!(out.contains("Set( <identifier>, <expression> ) creates or changes a variable's value."));
    assert!(out.contains("Available functions (all are case sensitive):"));
    assert!(out.contains(&format!("  {:<14}", "Sum")));
    assert!(out.contains("  Set\n"));
    assert!(!out.contains("true"), "{out}");
}

#[test]
fn exit_ends_the_session_early() {
    let mut source = ScriptedLineSource::interactive(&["1", "Exit()", "2"]);
    let (out, _) = run_session(&mut source, &MapIo::default(), &plain_options());
    assert_eq!(out, "1\n");
    assert_eq!(source.remaining(), 1);
    assert!(source.saved);
}

#[test]
/// パイプ入力では文がエコーされ、プロンプトは出ない。
fn piped_input_echoes_each_statement() {
    let mut source = ScriptedLineSource::piped(&["Set(n,", "  5)", "n * 2"]);
    let (out, _) = run_session(&mut source, &MapIo::default(), &plain_options());
    assert_eq!(out, ">> Set(n,\n  5)\nn: 5\n>> n * 2\n10\n");
}

#[test]
fn recalc_error_is_reported_with_formula_name() {
    let out = run_lines(&["Set(d, 2)", "R = 1 / d", "Set(d, 0)"]);
    assert_eq!(out, "d: 2\nR: 0.5\nd: 0\nR: Error: Division by zero.\n");
}
