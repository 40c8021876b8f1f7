use crate::wire::RawResultItem;

/// Result of a single operation, adapted from the wire shape.
///
/// Accessors borrow from the underlying raw item; rows are never copied.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultItem {
    raw: RawResultItem,
}

impl ResultItem {
    /// Rows returned by a read, outer `Vec` per row.
    pub fn results(&self) -> Option<&[Vec<serde_json::Value>]> {
        self.raw.values.as_deref()
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.raw.columns.as_deref()
    }

    pub fn types(&self) -> Option<&[String]> {
        self.raw.types.as_deref()
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.raw.last_insert_id
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.raw.rows_affected
    }

    /// Per-operation SQL error, present when `raise_on_error` was disabled.
    pub fn error(&self) -> Option<&str> {
        self.raw.error.as_deref()
    }

    pub fn raw(&self) -> &RawResultItem {
        &self.raw
    }

    pub fn into_raw(self) -> RawResultItem {
        self.raw
    }
}

impl From<RawResultItem> for ResultItem {
    fn from(raw: RawResultItem) -> Self {
        Self { raw }
    }
}

/// Result of a bulk execute.
///
/// When a SQL error aborts the batch server-side, the response carries
/// fewer items than operations were submitted; that shortfall is
/// preserved here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkResult {
    items: Vec<ResultItem>,
}

impl BulkResult {
    pub(crate) fn new(raw: Vec<RawResultItem>) -> Self {
        Self {
            items: raw.into_iter().map(ResultItem::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResultItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultItem> {
        self.items.iter()
    }

    pub fn items_raw(&self) -> impl Iterator<Item = &RawResultItem> {
        self.items.iter().map(ResultItem::raw)
    }

    pub fn into_items(self) -> Vec<ResultItem> {
        self.items
    }

    /// First item carrying a SQL error, with its 0-based operation index.
    pub fn first_error(&self) -> Option<(usize, &str)> {
        self.items
            .iter()
            .enumerate()
            .find_map(|(index, item)| item.error().map(|message| (index, message)))
    }
}

impl<'a> IntoIterator for &'a BulkResult {
    type Item = &'a ResultItem;
    type IntoIter = std::slice::Iter<'a, ResultItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
