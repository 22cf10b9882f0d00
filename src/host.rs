// パス: src/host.rs
// 役割: ホスト向けの 1 回限りの評価（JSON リクエスト/レスポンス）を提供する
// 意図: 期限付きで新しいエンジンに評価させ、結果を JSON で返す
// 関連ファイル: src/engine/mod.rs, src/format.rs, src/bin/fxrepl.rs
//! ホスト向けの評価。
//!
//! - リクエストごとに新しいエンジンを作り、セッション間で状態を共有しない。
//! - `context` は JSON オブジェクトの文字列で、フィールドは式から名前で参照できる。
//! - 結果は `format_canonical` による正規化表記で返す。エラー値と中断は `error` に入れる。

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{CancelToken, Engine, EngineError, RecalcEngine};
use crate::format::format_canonical;
use crate::value::{Record, Table, Value};

/// 既定の評価タイムアウト。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// 評価リクエスト。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRequest {
    /// 追加の名前を定義する JSON オブジェクト（文字列）。
    #[serde(default)]
    pub context: Option<String>,
    pub expression: String,
}

/// 評価レスポンス。`result` と `error` のどちらか一方だけが入る。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalResponse {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }
}

/// リクエストの解釈と評価の失敗。
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid request: {0}")]
    Request(#[source] serde_json::Error),
    #[error("invalid context: {0}")]
    Context(#[source] serde_json::Error),
    #[error("context must be a JSON object")]
    ContextNotObject,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("could not encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// JSON の値を評価値に変換する。
///
/// オブジェクトの配列はテーブル、スカラーの配列は単一列テーブルになる。
/// 混在した配列は型未確定の値として扱う。
pub fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as J;
    match json {
        J::Null => Value::Blank,
        J::Bool(b) => Value::Boolean(*b),
        J::Number(n) => match n.as_f64() {
            Some(f) => Value::Number(f),
            None => Value::Opaque {
                description: n.to_string(),
            },
        },
        J::String(s) => Value::String(s.clone()),
        J::Object(map) => Value::Record(json_object_to_record(map)),
        J::Array(items) => {
            if items.iter().all(|i| i.is_object()) {
                let rows = items
                    .iter()
                    .filter_map(|i| i.as_object())
                    .map(json_object_to_record)
                    .collect();
                Value::Table(Table::new(rows))
            } else if items.iter().all(|i| !i.is_object() && !i.is_array()) {
                Value::Table(Table::from_values(items.iter().map(json_to_value)))
            } else {
                Value::Opaque {
                    description: json.to_string(),
                }
            }
        }
    }
}

fn json_object_to_record(map: &serde_json::Map<String, serde_json::Value>) -> Record {
    Record::from_fields(map.iter().map(|(k, v)| (k.clone(), json_to_value(v))))
}

/// `context` 文字列を束縛用のレコードに変換する。未指定・空・`null` は空レコード。
pub fn context_record(context: Option<&str>) -> Result<Record, HostError> {
    let Some(text) = context.filter(|t| !t.trim().is_empty()) else {
        return Ok(Record::new());
    };
    let json: serde_json::Value = serde_json::from_str(text).map_err(HostError::Context)?;
    match json {
        serde_json::Value::Null => Ok(Record::new()),
        serde_json::Value::Object(map) => Ok(json_object_to_record(&map)),
        _ => Err(HostError::ContextNotObject),
    }
}

/// 新しいエンジンで 1 件評価する。
pub fn evaluate(request: &EvalRequest, timeout: Duration) -> Result<Value, HostError> {
    let bindings = context_record(request.context.as_deref())?;
    let mut engine = RecalcEngine::new();
    let cancel = CancelToken::with_timeout(timeout);
    debug!("hosted evaluation of {:?}", request.expression);
    Ok(engine.evaluate(&request.expression, &bindings, &cancel)?)
}

/// リクエストに応答する。失敗はすべて `error` に入る。
pub fn respond(request: &EvalRequest, timeout: Duration) -> EvalResponse {
    match evaluate(request, timeout) {
        Ok(Value::Error { message }) => EvalResponse::err(message),
        Ok(value) => EvalResponse::ok(format_canonical(&value)),
        Err(e) => EvalResponse::err(e.to_string()),
    }
}

/// JSON テキストのリクエストに JSON テキストで応答する。
pub fn respond_json(input: &str, timeout: Duration) -> Result<String, HostError> {
    let response = match serde_json::from_str::<EvalRequest>(input) {
        Ok(request) => respond(&request, timeout),
        Err(e) => EvalResponse::err(HostError::Request(e).to_string()),
    };
    serde_json::to_string(&response).map_err(HostError::Encode)
}
