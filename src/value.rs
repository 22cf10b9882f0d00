// パス: src/value.rs
// 役割: エンジン・ディスパッチャ・整形器が共有する閉じた値モデルを定義する
// 意図: 値の種別を列挙型で閉じ、種別ごとの分岐を網羅的にする
// 関連ファイル: src/format.rs, src/engine/eval.rs, src/repl/dispatch.rs
//! 評価結果を表す値モデル。
//!
//! - `Value` は評価結果が取りうる形をすべて列挙した閉じた列挙体で、構築後は不変。
//! - `Record` はフィールド宣言順を保持し、同名フィールドは後勝ちで上書きする。
//! - `Table` は `Record` の列。全行が同一スキーマであることはエンジン側が保証する。

use std::fmt;

use rust_decimal::Decimal;

/// 単一列テーブルの列名。`[1, 2, 3]` 形式のテーブルはこの列だけを持つ。
pub const VALUE_COLUMN: &str = "Value";

/// 式の評価結果。
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Blank,
    Error { message: String },
    Boolean(bool),
    Number(f64),
    Decimal(Decimal),
    String(String),
    Record(Record),
    Table(Table),
    /// 型の確定していないオブジェクト（JSON 由来の未解釈値など）。
    Opaque { description: String },
}

/// 値の種別。変数の型固定や関数シグネチャの照合で使う。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Blank,
    Error,
    Boolean,
    Number,
    Decimal,
    Text,
    Record,
    Table,
    Untyped,
}

impl ValueKind {
    /// 型注釈で使う名前から種別を引く。`Void` は `Blank` の別名。
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "Number" => Some(Self::Number),
            "Decimal" => Some(Self::Decimal),
            "Text" => Some(Self::Text),
            "Boolean" => Some(Self::Boolean),
            "Record" => Some(Self::Record),
            "Table" => Some(Self::Table),
            "Blank" | "Void" => Some(Self::Blank),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Blank => "Blank",
            ValueKind::Error => "Error",
            ValueKind::Boolean => "Boolean",
            ValueKind::Number => "Number",
            ValueKind::Decimal => "Decimal",
            ValueKind::Text => "Text",
            ValueKind::Record => "Record",
            ValueKind::Table => "Table",
            ValueKind::Untyped => "Untyped",
        };
        f.write_str(name)
    }
}

impl Value {
    /// メッセージ付きのエラー値を作る。
    pub fn error(message: impl Into<String>) -> Self {
        Value::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Blank => ValueKind::Blank,
            Value::Error { .. } => ValueKind::Error,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::String(_) => ValueKind::Text,
            Value::Record(_) => ValueKind::Record,
            Value::Table(_) => ValueKind::Table,
            Value::Opaque { .. } => ValueKind::Untyped,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error { .. })
    }

    /// エラー値ならそのメッセージを返す。
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Value::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

/// 宣言順を保持する名前付きフィールドの並び。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(名前, 値)` の列からレコードを組み立てる。重複名は最初の位置で後勝ち。
    pub fn from_fields<I, N>(fields: I) -> Self
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<String>,
    {
        let mut record = Self::new();
        for (name, value) in fields {
            record.insert(name, value);
        }
        record
    }

    /// ビルダー形式でフィールドを追加する。
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    /// フィールドを追加する。既存名なら位置を保ったまま値だけ差し替える。
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// スキーマが `{Value}` ちょうどかどうか。
    fn is_value_row(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].0 == VALUE_COLUMN
    }
}

/// レコードの並び。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    rows: Vec<Record>,
}

impl Table {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    /// 値の列を `Value` 列だけを持つ単一列テーブルへ包む。
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self {
            rows: values
                .into_iter()
                .map(|v| Record::new().with(VALUE_COLUMN, v))
                .collect(),
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 全行のスキーマが `{Value}` であれば単一列テーブルとみなす（空テーブルを含む）。
    pub fn is_column(&self) -> bool {
        self.rows.iter().all(Record::is_value_row)
    }

    /// 列名を初出順に返す。
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for row in &self.rows {
            for name in row.names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}
