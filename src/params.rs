use crate::Value;

/// Positional SQL parameters mapped to `?` placeholders.
///
/// The execute endpoints take each operation as a JSON array of the SQL
/// text followed by its parameters, so parameters are positional by
/// construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(pub(crate) Vec<Value>);

impl Params {
    pub fn new(values: impl Into<Vec<Value>>) -> Self {
        Self(values.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Self(values.into())
    }
}

/// Single operation inside a bulk request.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// SQL text.
    pub sql: String,
    /// Operation parameters.
    pub params: Params,
}

impl Operation {
    pub fn new<P: Into<Params>>(sql: impl Into<String>, params: P) -> Self {
        Self {
            sql: sql.into(),
            params: params.into(),
        }
    }

    /// Builds operations from parallel lists of SQL texts and parameter
    /// vectors. The lists are expected to be the same length; extra
    /// entries on either side are dropped.
    pub fn zip<S, P>(
        sqls: impl IntoIterator<Item = S>,
        params: impl IntoIterator<Item = P>,
    ) -> Vec<Self>
    where
        S: Into<String>,
        P: Into<Params>,
    {
        sqls.into_iter()
            .zip(params)
            .map(|(sql, params)| Self::new(sql, params))
            .collect()
    }
}

impl From<&str> for Operation {
    fn from(sql: &str) -> Self {
        Self::new(sql, ())
    }
}

impl From<String> for Operation {
    fn from(sql: String) -> Self {
        Self::new(sql, ())
    }
}

impl<S: Into<String>, P: Into<Params>> From<(S, P)> for Operation {
    fn from((sql, params): (S, P)) -> Self {
        Self::new(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Operation, Params, Value};

    #[test]
    fn positional_from_array() {
        let params: Params = [Value::integer(1), Value::text("kit")].into();
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn unit_builds_empty_params() {
        let params: Params = ().into();
        assert!(params.is_empty());
    }

    #[test]
    fn operation_from_tuple_and_bare_sql() {
        let op: Operation = ("INSERT INTO t(v) VALUES (?)", [Value::text("a")]).into();
        assert_eq!(op.params.len(), 1);

        let bare: Operation = "CREATE TABLE t(id INTEGER)".into();
        assert!(bare.params.is_empty());
    }

    #[test]
    fn zip_pairs_parallel_lists() {
        let ops = Operation::zip(
            ["INSERT INTO t(v) VALUES (?)", "DELETE FROM t WHERE v = ?"],
            [
                Params::new([Value::text("a")]),
                Params::new([Value::text("b")]),
            ],
        );
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].params.0[0], Value::text("b"));
    }
}
