//! In-process `ItemStore` with the same key and index semantics as the
//! managed store: primary keys overwrite, indexes are sparse, range
//! conditions compare numbers numerically.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::error_handling::types::StorageError;
use crate::storage::item_store::{
    AttrValue, IndexQuery, Item, ItemStore, KeyAttr, KeyMatch, TableSpec,
};

/// Partition and sort key text of one item; the sort part is empty for
/// tables keyed on the partition key alone.
type PrimaryKey = (String, String);

struct MemoryTable {
    spec: TableSpec,
    items: BTreeMap<PrimaryKey, Item>,
}

fn value_text(value: &AttrValue) -> String {
    match value {
        AttrValue::S(s) => s.clone(),
        AttrValue::N(n) => n.clone(),
    }
}

fn key_text(table: &str, item: &Item, attr: KeyAttr) -> Result<String, StorageError> {
    item.get(attr.name).map(value_text).ok_or_else(|| {
        StorageError::Unavailable(format!("item for {} lacks key attribute {}", table, attr.name))
    })
}

fn matches(item: &Item, partition: KeyAttr, sort: Option<KeyAttr>, query: &IndexQuery<'_>) -> bool {
    if item.get(partition.name) != Some(&query.partition.value) {
        return false;
    }
    if let Some(sort) = sort {
        let Some(value) = item.get(sort.name) else {
            return false;
        };
        if let Some(bound) = &query.sort_at_least {
            return matches!(
                value.compare(&bound.value),
                Some(Ordering::Greater | Ordering::Equal)
            );
        }
    }
    true
}

#[derive(Default)]
pub struct MemoryItemStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryTable>>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))
    }
}

fn missing_table(name: &str) -> StorageError {
    StorageError::Unavailable(format!("table {} does not exist", name))
}

impl ItemStore for MemoryItemStore {
    fn ensure_table(&self, spec: &TableSpec) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let table = tables.entry(spec.name.clone()).or_insert_with(|| {
            debug!("Created in-memory table {}", spec.name);
            MemoryTable {
                spec: TableSpec {
                    name: spec.name.clone(),
                    partition_key: spec.partition_key,
                    sort_key: spec.sort_key,
                    indexes: Vec::new(),
                },
                items: BTreeMap::new(),
            }
        });
        if table.spec.partition_key != spec.partition_key || table.spec.sort_key != spec.sort_key {
            return Err(StorageError::Unavailable(format!(
                "table {} exists with a different key schema",
                spec.name
            )));
        }
        for index in &spec.indexes {
            if !table.spec.indexes.iter().any(|i| i.name == index.name) {
                table.spec.indexes.push(index.clone());
            }
        }
        Ok(())
    }

    fn put_item(&self, table: &str, item: Item) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let target = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        let partition = key_text(table, &item, target.spec.partition_key)?;
        let sort = match target.spec.sort_key {
            Some(attr) => key_text(table, &item, attr)?,
            None => String::new(),
        };
        target.items.insert((partition, sort), item);
        Ok(())
    }

    fn get_item(&self, table: &str, key: &KeyMatch) -> Result<Option<Item>, StorageError> {
        let tables = self.lock()?;
        let target = tables.get(table).ok_or_else(|| missing_table(table))?;
        if key.attribute != target.spec.partition_key.name || target.spec.sort_key.is_some() {
            return Err(StorageError::Unavailable(format!(
                "{} is not the full key of {}",
                key.attribute, table
            )));
        }
        Ok(target.items.get(&(value_text(&key.value), String::new())).cloned())
    }

    fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<Item>, StorageError> {
        let tables = self.lock()?;
        let target = tables.get(query.table).ok_or_else(|| missing_table(query.table))?;
        let (partition, sort) = match query.index {
            None => (target.spec.partition_key, target.spec.sort_key),
            Some(name) => {
                let index = target
                    .spec
                    .indexes
                    .iter()
                    .find(|i| i.name == name)
                    .ok_or_else(|| {
                        StorageError::Unavailable(format!("index {} does not exist", name))
                    })?;
                (index.partition_key, index.sort_key)
            }
        };

        let mut found: Vec<Item> = target
            .items
            .values()
            .filter(|item| matches(item, partition, sort, query))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            found.sort_by(|a, b| match (a.get(sort.name), b.get(sort.name)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::item_store::{AttrKind, IndexSpec};

    const ID: KeyAttr = KeyAttr { name: "id", kind: AttrKind::String };
    const GROUP: KeyAttr = KeyAttr { name: "group", kind: AttrKind::String };
    const RANK: KeyAttr = KeyAttr { name: "rank", kind: AttrKind::Number };

    fn store() -> MemoryItemStore {
        let store = MemoryItemStore::new();
        store
            .ensure_table(&TableSpec {
                name: "things".into(),
                partition_key: ID,
                sort_key: None,
                indexes: vec![IndexSpec { name: "by-rank", partition_key: GROUP, sort_key: Some(RANK) }],
            })
            .unwrap();
        store
    }

    fn thing(id: &str, group: Option<&str>, rank: f64) -> Item {
        let mut item = Item::new();
        item.insert("id".into(), AttrValue::S(id.into()));
        if let Some(group) = group {
            item.insert("group".into(), AttrValue::S(group.into()));
        }
        item.insert("rank".into(), AttrValue::number(rank));
        item
    }

    #[test]
    fn test_put_overwrites_same_key() {
        let store = store();
        store.put_item("things", thing("a", Some("g"), 1.0)).unwrap();
        store.put_item("things", thing("a", Some("g"), 2.0)).unwrap();
        let key = KeyMatch { attribute: "id", value: AttrValue::S("a".into()) };
        let item = store.get_item("things", &key).unwrap().unwrap();
        assert_eq!(item.get("rank"), Some(&AttrValue::N("2".into())));
    }

    #[test]
    fn test_range_query_is_inclusive_sorted_and_sparse() {
        let store = store();
        store.put_item("things", thing("a", Some("g"), 9.0)).unwrap();
        store.put_item("things", thing("b", Some("g"), 0.5)).unwrap();
        store.put_item("things", thing("c", Some("g"), 10.0)).unwrap();
        store.put_item("things", thing("d", None, 50.0)).unwrap();
        let found = store
            .query(&IndexQuery {
                table: "things",
                index: Some("by-rank"),
                partition: KeyMatch { attribute: "group", value: AttrValue::S("g".into()) },
                sort_at_least: Some(KeyMatch { attribute: "rank", value: AttrValue::number(9.0) }),
            })
            .unwrap();
        let ids: Vec<&str> = found.iter().filter_map(|i| i.get("id")?.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_missing_table_and_index_fail() {
        let store = store();
        assert!(store.put_item("nope", thing("a", None, 1.0)).is_err());
        let err = store.query(&IndexQuery {
            table: "things",
            index: Some("missing"),
            partition: KeyMatch { attribute: "group", value: AttrValue::S("g".into()) },
            sort_at_least: None,
        });
        assert!(matches!(err, Err(StorageError::Unavailable(_))));
    }

    #[test]
    fn test_table_query_with_sort_key() {
        let store = MemoryItemStore::new();
        store
            .ensure_table(&TableSpec {
                name: "ranked".into(),
                partition_key: GROUP,
                sort_key: Some(RANK),
                indexes: Vec::new(),
            })
            .unwrap();
        store.put_item("ranked", thing("a", Some("g"), 2.0)).unwrap();
        store.put_item("ranked", thing("b", Some("g"), 1.0)).unwrap();
        store.put_item("ranked", thing("c", Some("h"), 1.0)).unwrap();
        // same partition and sort key replaces the earlier item
        store.put_item("ranked", thing("d", Some("g"), 2.0)).unwrap();

        let found = store
            .query(&IndexQuery {
                table: "ranked",
                index: None,
                partition: KeyMatch { attribute: "group", value: AttrValue::S("g".into()) },
                sort_at_least: None,
            })
            .unwrap();
        let ids: Vec<&str> = found.iter().filter_map(|i| i.get("id")?.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);

        let key = KeyMatch { attribute: "group", value: AttrValue::S("g".into()) };
        assert!(store.get_item("ranked", &key).is_err());
    }

    #[test]
    fn test_changed_key_schema_is_rejected() {
        let store = store();
        let reshaped = TableSpec {
            name: "things".into(),
            partition_key: GROUP,
            sort_key: Some(ID),
            indexes: Vec::new(),
        };
        assert!(matches!(store.ensure_table(&reshaped), Err(StorageError::Unavailable(_))));
    }
}
