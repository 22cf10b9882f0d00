// パス: src/format.rs
// 役割: 評価結果を再帰的に文字列へ整形する
// 意図: 表・レコード・単一列テーブルの表示規則を一か所にまとめる
// 関連ファイル: src/value.rs, src/repl/printer.rs, src/host.rs
//! 評価結果の文字列化。
//!
//! - 通常表示（full）と、テーブルのセル内で使う最小表示（minimal）の 2 モードを持つ。
//! - テーブルは単一列なら `[v1, v2]`、それ以外は `format_tables` に応じて
//!   桁揃えの表形式かフラットな `[{..}, {..}]` 形式で描画する。
//! - 表形式の列幅は全行を見ないと決まらないため、幅の算出と描画で 2 回走査する。
//! - 状態を持たない純粋関数のみで構成し、再計算コールバックから並行に呼ばれても安全。

use crate::value::{Record, Table, Value, VALUE_COLUMN};

/// 型未確定の値を通常表示するときの固定文言。
pub const UNTYPED_PLACEHOLDER: &str =
    "<Untyped: Use Value, Text, Boolean, and other functions to establish the type.>";

/// 描画オプション。セッションの設定から作る。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    /// 複数列テーブルを表形式で描画するか。
    pub format_tables: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            format_tables: true,
        }
    }
}

/// 値を通常モードで描画する。
///
/// # Examples
/// ```
/// use fxrepl::format::{format_value, FormatOptions};
/// use fxrepl::value::{Table, Value};
/// let t = Value::Table(Table::from_values(vec![Value::Number(1.0), Value::Number(2.0)]));
/// assert_eq!(format_value(&t, &FormatOptions::default()), "[1, 2]");
/// ```
pub fn format_value(value: &Value, opts: &FormatOptions) -> String {
    render(value, false, opts)
}

/// 値を最小モード（テーブルのセル用）で描画する。
pub fn format_minimal(value: &Value, opts: &FormatOptions) -> String {
    render(value, true, opts)
}

/// 値の種別ごとに描画規則を適用する。
pub fn render(value: &Value, minimal: bool, opts: &FormatOptions) -> String {
    match value {
        Value::Blank => {
            if minimal {
                String::new()
            } else {
                "Blank()".to_string()
            }
        }
        Value::Error { message } => {
            if minimal {
                "<error>".to_string()
            } else {
                format!("<Error: {}>", message)
            }
        }
        Value::Opaque { .. } => {
            if minimal {
                "<untyped>".to_string()
            } else {
                UNTYPED_PLACEHOLDER.to_string()
            }
        }
        Value::String(s) => {
            if minimal {
                s.clone()
            } else {
                quote_string(s)
            }
        }
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Decimal(d) => d.to_string(),
        Value::Record(record) => {
            if minimal {
                "<record>".to_string()
            } else {
                render_record(record, opts)
            }
        }
        Value::Table(table) => {
            if minimal {
                "<table>".to_string()
            } else {
                render_table(table, opts)
            }
        }
    }
}

/// 二重引用符で囲み、内部の `"` は `""` に重ねる。
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// ロケールに依存しない数値表記。`-0` は `0` に揃える。
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        format!("{}", n)
    }
}

fn render_record(record: &Record, opts: &FormatOptions) -> String {
    let fields: Vec<String> = record
        .fields()
        .map(|(name, value)| format!("{}:{}", name, render(value, false, opts)))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn render_table(table: &Table, opts: &FormatOptions) -> String {
    if table.is_column() {
        let items: Vec<String> = table
            .rows()
            .iter()
            .map(|row| render(row.get(VALUE_COLUMN).unwrap_or(&Value::Blank), false, opts))
            .collect();
        return format!("[{}]", items.join(", "));
    }
    let columns = table.column_names();
    if opts.format_tables && !columns.is_empty() {
        render_tabular(table, &columns, opts)
    } else {
        render_flat(table, opts)
    }
}

/// `[{..}, {..}]` 形式。各行は通常モードのレコード表記。
fn render_flat(table: &Table, opts: &FormatOptions) -> String {
    let rows: Vec<String> = table
        .rows()
        .iter()
        .map(|row| render_record(row, opts))
        .collect();
    format!("[{}]", rows.join(", "))
}

fn cell_text(row: &Record, column: &str, opts: &FormatOptions) -> String {
    // スキーマ不一致の行は欠けた列を空セルとして扱う。
    row.get(column)
        .map(|v| render(v, true, opts))
        .unwrap_or_default()
}

/// 見出し・区切り線・各行からなる桁揃えの表。
fn render_tabular(table: &Table, columns: &[&str], opts: &FormatOptions) -> String {
    // 1 回目: 列ごとの最大幅を求める。
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in table.rows() {
        for (idx, column) in columns.iter().enumerate() {
            let width = cell_text(row, column, opts).chars().count();
            if width > widths[idx] {
                widths[idx] = width;
            }
        }
    }

    // 2 回目: 求めた幅で整形する。
    let mut lines = Vec::with_capacity(table.len() + 2);
    lines.push(
        columns
            .iter()
            .zip(&widths)
            .map(|(name, w)| format!(" {:<w$} ", name, w = *w))
            .collect::<Vec<_>>()
            .join(" "),
    );
    lines.push(
        widths
            .iter()
            .map(|w| "=".repeat(w + 2))
            .collect::<Vec<_>>()
            .join(" "),
    );
    for row in table.rows() {
        lines.push(
            columns
                .iter()
                .zip(&widths)
                .map(|(column, w)| format!(" {:>w$} ", cell_text(row, column, opts), w = *w))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    lines.join("\n")
}

/// ホスト向けの正規化表記。フィールドは名前順、区切りは `,` のみ。
///
/// 同じ値からは常に同じ文字列が得られるので、応答の比較や記録に使える。
pub fn format_canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Table(table) => {
            let column = table.is_column();
            out.push_str(if column { "[" } else { "Table(" });
            for (idx, row) in table.rows().iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                if column {
                    write_canonical(row.get(VALUE_COLUMN).unwrap_or(&Value::Blank), out);
                } else {
                    write_canonical_record(row, out);
                }
            }
            out.push_str(if column { "]" } else { ")" });
        }
        Value::Record(record) => write_canonical_record(record, out),
        other => out.push_str(&render(other, false, &FormatOptions::default())),
    }
}

fn write_canonical_record(record: &Record, out: &mut String) {
    let mut fields: Vec<(&str, &Value)> = record.fields().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (idx, (name, value)) in fields.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::{format_canonical, format_minimal, format_number, format_value, FormatOptions};
    use crate::value::{Record, Table, Value};
    use rust_decimal::Decimal;

    fn full(v: &Value) -> String {
        format_value(v, &FormatOptions::default())
    }

    fn minimal(v: &Value) -> String {
        format_minimal(v, &FormatOptions::default())
    }

    #[test]
    /// スカラー値の通常表示と最小表示を確認する。
    fn scalars_in_both_modes() {
        assert_eq!(full(&Value::Blank), "Blank()");
        assert_eq!(minimal(&Value::Blank), "");
        assert_eq!(full(&Value::error("boom")), "<Error: boom>");
        assert_eq!(minimal(&Value::error("boom")), "<error>");
        assert_eq!(full(&Value::Boolean(true)), "true");
        assert_eq!(minimal(&Value::Boolean(false)), "false");
        assert_eq!(full(&Value::Number(2.5)), "2.5");
        assert_eq!(full(&Value::Decimal(Decimal::new(150, 2))), "1.50");
        assert_eq!(
            minimal(&Value::Opaque {
                description: "json".into()
            }),
            "<untyped>"
        );
    }

    #[test]
    /// 文字列中の二重引用符が重ねられることを検証する。
    fn string_quotes_are_doubled() {
        assert_eq!(full(&Value::from("a\"b")), "\"a\"\"b\"");
        assert_eq!(minimal(&Value::from("a\"b")), "a\"b");
    }

    #[test]
    fn numbers_render_without_locale() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-12.25), "-12.25");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }

    #[test]
    /// レコードが宣言順・`, ` 区切りで、入れ子も通常表示されることを確認する。
    fn record_keeps_declaration_order() {
        let inner = Record::new().with("x", 1.0);
        let r = Value::Record(Record::new().with("b", "s").with("a", Value::Record(inner)));
        assert_eq!(full(&r), "{b:\"s\", a:{x:1}}");
        assert_eq!(minimal(&r), "<record>");
    }

    #[test]
    fn column_table_uses_brackets_in_both_table_modes() {
        let t = Value::Table(Table::from_values(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
        ]));
        assert_eq!(full(&t), "[1, 2, 3]");
        let flat = FormatOptions {
            format_tables: false,
        };
        assert_eq!(format_value(&t, &flat), "[1, 2, 3]");
        assert_eq!(minimal(&t), "<table>");
        assert_eq!(full(&Value::Table(Table::new(Vec::new()))), "[]");
    }

    #[test]
    /// 表形式で列幅が見出しとセルの最大に揃うことを確認する。
    fn tabular_layout_pads_columns() {
        let t = Value::Table(Table::new(vec![
            Record::new().with("Name", "Joe").with("Age", 29.0),
            Record::new().with("Name", "Sally").with("Age", 7.0),
        ]));
        let expected = [
            " Name    Age ",
            "======= =====",
            "   Joe    29 ",
            " Sally     7 ",
        ]
        .join("\n");
        assert_eq!(full(&t), expected);
    }

    #[test]
    fn flat_mode_renders_full_records() {
        let t = Value::Table(Table::new(vec![Record::new()
            .with("Name", "Joe")
            .with("Age", 29.0)]));
        let flat = FormatOptions {
            format_tables: false,
        };
        assert_eq!(format_value(&t, &flat), "[{Name:\"Joe\", Age:29}]");
    }

    #[test]
    /// 正規化表記はフィールドを名前順に並べ、非単一列テーブルを `Table(` で包む。
    fn canonical_sorts_fields() {
        let t = Value::Table(Table::new(vec![Record::new()
            .with("Name", "Joe")
            .with("Age", 29.0)]));
        assert_eq!(format_canonical(&t), "Table({Age:29,Name:\"Joe\"})");
        let c = Value::Table(Table::from_values(vec![Value::Boolean(true), Value::Blank]));
        assert_eq!(format_canonical(&c), "[true,Blank()]");
    }
}
