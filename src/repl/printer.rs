// パス: src/repl/printer.rs
// 役割: Help text and the output sink for REPL messages
// 意図: Keep interactive messaging and the error color channel in one place
// 関連ファイル: src/repl/session.rs, src/repl/cmd.rs, src/format.rs
//! REPL で用いるヘルプメッセージと出力の書き出しを集約したモジュール。
//! エラーは `Error: ` 付きで赤色のチャネルに出し、行末で必ず既定色に戻す。

use std::io::{self, Write};

use colored::Colorize;

/// 使い方の概要（関数一覧の前に出す部分）。
const HELP_USAGE: &str = concat!(
    "\n",
    "Set( <identifier>, <expression> ) creates or changes a variable's value.\n",
    "<identifier> = <expression> defines a formula with automatic recalc.\n",
    "<expression> alone is evaluated and the result displayed.\n",
    "\n",
    "Available functions (all are case sensitive):\n",
);

/// 関数一覧の後に出す演算子と構文の説明。
const HELP_SYNTAX: &str = concat!(
    "\n",
    "Available operators: = <> <= >= + - * / % && And || Or ! Not & ^\n",
    "\n",
    "Record syntax is { < field name >: < value >, ... } without a comma before the first field,\n",
    "  for example: { Name: \"Joe\", Age: 29 }\n",
    "Use the Table function for a list of records:\n",
    "  for example: Table( { Name: \"Joe\" }, { Name: \"Sally\" } )\n",
    "Use [ <value>, ... ] for a single column table, field name is \"Value\",\n",
    "  for example: [ 1, 2, 3 ]\n",
    "Records and Tables can be arbitrarily nested.\n",
    "\n",
    "Once a formula is defined or a variable's type is defined, it cannot be changed.\n",
    "Use the Reset() function to clear all formulas and variables.\n",
);

/// 1 行に並べる関数名の数。
const NAMES_PER_ROW: usize = 5;

/// 対話セッションがユーザーへ返す応答メッセージのカテゴリ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplMsg {
    /// 通常出力。
    Out(String),
    /// `Error: ` を付けてエラーチャネルに出す。
    Err(String),
    /// `label: ` の後ろにエラーを続ける（再計算通知のエラー）。
    LabeledErr { label: String, message: String },
}

/// ヘルプ本文を組み立てる。関数名は 14 桁に揃えて 5 個ずつ並べ、最後に `Set` を添える。
pub fn help_text(function_names: &[String]) -> String {
    let mut text = String::from(HELP_USAGE);
    let mut column = 0;
    for name in function_names {
        text.push_str(&format!("  {:<14}", name));
        column += 1;
        if column == NAMES_PER_ROW {
            text.push('\n');
            column = 0;
        }
    }
    if column != 0 {
        text.push('\n');
    }
    text.push_str("  Set\n");
    text.push_str(HELP_SYNTAX);
    text
}

/// ヘルプメッセージを任意のライターへ描画する。
pub fn render_help<W: Write + ?Sized>(out: &mut W, function_names: &[String]) -> io::Result<()> {
    out.write_all(help_text(function_names).as_bytes())
}

fn error_text(message: &str, color: bool) -> String {
    let text = format!("Error: {}", message);
    if color {
        text.red().to_string()
    } else {
        text
    }
}

/// メッセージを 1 件書き出す。`color` が真ならエラーを赤で表示する。
pub fn write_msg<W: Write + ?Sized>(out: &mut W, msg: &ReplMsg, color: bool) -> io::Result<()> {
    match msg {
        ReplMsg::Out(s) => writeln!(out, "{}", s),
        ReplMsg::Err(s) => writeln!(out, "{}", error_text(s, color)),
        ReplMsg::LabeledErr { label, message } => {
            writeln!(out, "{}: {}", label, error_text(message, color))
        }
    }
}

/// 複数のメッセージを順に書き出す。
pub fn write_msgs<W: Write + ?Sized>(out: &mut W, msgs: &[ReplMsg], color: bool) -> io::Result<()> {
    for msg in msgs {
        write_msg(out, msg, color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{help_text, render_help, write_msg, ReplMsg};
    use pretty_assertions::assert_eq;

    fn write_to_string(msg: &ReplMsg, color: bool) -> String {
        let mut buf = Vec::new();
        write_msg(&mut buf, msg, color).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    /// 関数名が 5 個ごとに改行され、最後に Set が続くことを確かめる。
    fn help_lists_functions_in_rows_of_five() {
        let names: Vec<String> = ["Abs", "Blank", "If", "Len", "Max", "Min"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let text = help_text(&names);
        let expected = format!(
            "  {:<14}  {:<14}  {:<14}  {:<14}  {:<14}\n  {:<14}\n  Set\n",
            "Abs", "Blank", "If", "Len", "Max", "Min"
        );
        assert!(text.contains(&expected), "{text}");
        assert!(text.contains("Available functions (all are case sensitive):\n"));
        assert!(text.contains("Records and Tables can be arbitrarily nested."));
    }

    #[test]
    fn help_with_full_row_has_no_blank_line() {
        let names: Vec<String> = (0..5).map(|i| format!("F{i}")).collect();
        let text = help_text(&names);
        assert!(text.contains(&format!("  {:<14}\n  Set\n", "F4")), "{text}");
    }

    #[test]
    fn render_help_matches_help_text() {
        let names = vec!["Sum".to_string()];
        let mut buf = Vec::new();
        render_help(&mut buf, &names).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), help_text(&names));
    }

    #[test]
    /// 色なしではエラーが素の `Error: ` 付きで出る。
    fn plain_messages_render_expected_strings() {
        assert_eq!(write_to_string(&ReplMsg::Out("3".into()), false), "3\n");
        assert_eq!(
            write_to_string(&ReplMsg::Err("bad".into()), false),
            "Error: bad\n"
        );
        assert_eq!(
            write_to_string(
                &ReplMsg::LabeledErr {
                    label: "y".into(),
                    message: "Division by zero.".into()
                },
                false
            ),
            "y: Error: Division by zero.\n"
        );
    }

    #[test]
    fn colored_error_keeps_message_text() {
        let rendered = write_to_string(&ReplMsg::Err("bad".into()), true);
        assert!(rendered.contains("Error: bad"));
        assert!(rendered.ends_with('\n'));
    }
}
