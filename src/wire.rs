use serde::{
    ser::{SerializeSeq, Serializer},
    Deserialize, Serialize,
};

use crate::{params::Operation, RqliteError};

/// Top-level `error` value the server uses to signal a freshness miss on
/// `level=none` reads.
pub(crate) const STALE_READ: &str = "stale read";

/// Body for the query/execute endpoints: a JSON array of operations,
/// each `[sql, ...params]`.
pub(crate) struct ExecuteRequest<'a>(pub(crate) &'a [Operation]);

impl Serialize for ExecuteRequest<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for op in self.0 {
            seq.serialize_element(&OperationWire(op))?;
        }
        seq.end()
    }
}

struct OperationWire<'a>(&'a Operation);

impl Serialize for OperationWire<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.0.params.0.len()))?;
        seq.serialize_element(&self.0.sql)?;
        for value in &self.0.params.0 {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

pub(crate) fn encode_operations(ops: &[Operation]) -> Result<String, RqliteError> {
    serde_json::to_string(&ExecuteRequest(ops))
        .map_err(|err| RqliteError::Protocol(format!("failed to encode request body: {err}")))
}

/// Response envelope shared by the query and execute endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteResponse {
    #[serde(default)]
    pub results: Option<Vec<RawResultItem>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One per-operation result as it appears on the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawResultItem {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub values: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub last_insert_id: Option<i64>,
    #[serde(default)]
    pub rows_affected: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{encode_operations, ExecuteResponse};
    use crate::{Operation, Value};

    #[test]
    fn encodes_operations_as_nested_arrays() {
        let ops = vec![
            Operation::new("INSERT INTO t(v) VALUES (?)", [Value::text("a")]),
            Operation::new("SELECT 1", ()),
        ];
        let body = encode_operations(&ops).expect("must encode");
        assert_eq!(body, r#"[["INSERT INTO t(v) VALUES (?)","a"],["SELECT 1"]]"#);
    }

    #[test]
    fn decodes_query_response() {
        let body = r#"{"results":[{"columns":["v"],"types":["text"],"values":[["a"]]}]}"#;
        let response: ExecuteResponse = serde_json::from_str(body).expect("must decode");
        let results = response.results.expect("must carry results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].columns.as_deref(), Some(&["v".to_owned()][..]));
        assert!(results[0].error.is_none());
    }

    #[test]
    fn decodes_short_bulk_response_with_trailing_error() {
        let body = r#"{"results":[{"rows_affected":1},{"error":"UNIQUE constraint failed"}]}"#;
        let response: ExecuteResponse = serde_json::from_str(body).expect("must decode");
        let results = response.results.expect("must carry results");
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1].error.as_deref(),
            Some("UNIQUE constraint failed")
        );
    }

    #[test]
    fn decodes_top_level_error_without_results() {
        let response: ExecuteResponse =
            serde_json::from_str(r#"{"error":"stale read"}"#).expect("must decode");
        assert!(response.results.is_none());
        assert_eq!(response.error.as_deref(), Some(super::STALE_READ));
    }
}
