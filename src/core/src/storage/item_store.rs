//! Primitives of a managed key-value store with secondary indexes.
//!
//! `NoSqlStorage` only speaks in terms of this trait, so its key construction
//! and index translation can run against DynamoDB (`dynamo_store`) or the
//! in-process emulation (`memory_store`).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error_handling::types::StorageError;

/// A scalar attribute value. Numbers keep their decimal text form, like the
/// wire format of the managed store.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    S(String),
    N(String),
}

impl AttrValue {
    pub fn number(value: f64) -> Self {
        AttrValue::N(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            AttrValue::N(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::N(n) => n.parse().ok(),
            AttrValue::S(_) => None,
        }
    }

    /// Ordering used by index range conditions. Values of different kinds
    /// are not comparable.
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (AttrValue::S(a), AttrValue::S(b)) => Some(a.cmp(b)),
            (AttrValue::N(_), AttrValue::N(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            _ => None,
        }
    }
}

pub type Item = HashMap<String, AttrValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    String,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAttr {
    pub name: &'static str,
    pub kind: AttrKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub partition_key: KeyAttr,
    pub sort_key: Option<KeyAttr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: KeyAttr,
    pub sort_key: Option<KeyAttr>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Every key attribute of the table and its indexes, without duplicates.
    pub fn key_attributes(&self) -> Vec<KeyAttr> {
        self.key_attributes_for(&self.indexes)
    }

    /// Key attributes of the table plus those of `indexes` only.
    pub fn key_attributes_for(&self, indexes: &[IndexSpec]) -> Vec<KeyAttr> {
        let mut attrs: Vec<KeyAttr> =
            std::iter::once(self.partition_key).chain(self.sort_key).collect();
        for index in indexes {
            for attr in std::iter::once(index.partition_key).chain(index.sort_key) {
                if !attrs.iter().any(|a| a.name == attr.name) {
                    attrs.push(attr);
                }
            }
        }
        attrs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyMatch {
    pub attribute: &'static str,
    pub value: AttrValue,
}

/// Exact match on a partition key, optionally narrowed by
/// `sort key >= value`.
///
/// With `index: None` the table's own key is queried, and the read is
/// strongly consistent. Index reads are eventually consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery<'a> {
    pub table: &'a str,
    pub index: Option<&'static str>,
    pub partition: KeyMatch,
    pub sort_at_least: Option<KeyMatch>,
}

pub trait ItemStore: Send + Sync {
    /// Creates the table and its indexes when missing and returns once all of
    /// them can serve requests.
    fn ensure_table(&self, spec: &TableSpec) -> Result<(), StorageError>;

    /// Writes an item, replacing any item with the same primary key.
    fn put_item(&self, table: &str, item: Item) -> Result<(), StorageError>;

    /// Strongly consistent read of one item by partition key. Only valid on
    /// tables without a sort key.
    fn get_item(&self, table: &str, key: &KeyMatch) -> Result<Option<Item>, StorageError>;

    /// Runs a table or index query, following pagination until exhausted.
    /// Items come back ordered by the sort key when there is one.
    fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<Item>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_numerically() {
        let small = AttrValue::number(0.5);
        let large = AttrValue::N("10".into());
        assert_eq!(small.compare(&large), Some(Ordering::Less));
        assert_eq!(
            AttrValue::S("10".into()).compare(&AttrValue::S("9".into())),
            Some(Ordering::Less)
        );
        assert_eq!(small.compare(&AttrValue::S("0.5".into())), None);
    }

    #[test]
    fn test_key_attributes_are_unique() {
        let uid = KeyAttr { name: "uid", kind: AttrKind::String };
        let seq = KeyAttr { name: "seq", kind: AttrKind::Number };
        let spec = TableSpec {
            name: "t".into(),
            partition_key: uid,
            sort_key: None,
            indexes: vec![
                IndexSpec { name: "a", partition_key: uid, sort_key: Some(seq) },
                IndexSpec { name: "b", partition_key: seq, sort_key: None },
            ],
        };
        assert_eq!(spec.key_attributes(), vec![uid, seq]);
    }

    #[test]
    fn test_key_attributes_for_subset_of_indexes() {
        let uid = KeyAttr { name: "uid", kind: AttrKind::String };
        let id = KeyAttr { name: "id", kind: AttrKind::String };
        let label = KeyAttr { name: "label", kind: AttrKind::String };
        let score = KeyAttr { name: "score", kind: AttrKind::Number };
        let by_label = IndexSpec { name: "label-index", partition_key: label, sort_key: None };
        let spec = TableSpec {
            name: "t".into(),
            partition_key: uid,
            sort_key: Some(id),
            indexes: vec![
                by_label.clone(),
                IndexSpec { name: "score-index", partition_key: label, sort_key: Some(score) },
            ],
        };
        assert_eq!(spec.key_attributes_for(&[]), vec![uid, id]);
        assert_eq!(spec.key_attributes_for(&[by_label]), vec![uid, id, label]);
        assert_eq!(spec.key_attributes(), vec![uid, id, label, score]);
    }
}
