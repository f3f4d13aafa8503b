//! `ItemStore` backed by Amazon DynamoDB.
//!
//! Like `DatabaseStorage`, the store owns a current-thread tokio runtime so
//! the synchronous storage contract can drive the async SDK.

use std::collections::HashMap;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, CreateGlobalSecondaryIndexAction,
    GlobalSecondaryIndex, GlobalSecondaryIndexUpdate, IndexStatus, KeySchemaElement, KeyType,
    Projection, ProjectionType, ScalarAttributeType, TableDescription, TableStatus,
};
use aws_sdk_dynamodb::Client;
use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::item_store::{
    AttrKind, AttrValue, IndexQuery, IndexSpec, Item, ItemStore, KeyAttr, KeyMatch, TableSpec,
};

const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ACTIVE_POLL_ATTEMPTS: u32 = 150;

fn unavailable(context: &str, message: impl std::fmt::Display) -> StorageError {
    error!("{}: {}", context, message);
    StorageError::Unavailable(format!("{}: {}", context, message))
}

fn to_sdk(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s.clone()),
        AttrValue::N(n) => AttributeValue::N(n.clone()),
    }
}

fn from_sdk(item: &HashMap<String, AttributeValue>) -> Item {
    item.iter()
        .filter_map(|(name, value)| match value {
            AttributeValue::S(s) => Some((name.clone(), AttrValue::S(s.clone()))),
            AttributeValue::N(n) => Some((name.clone(), AttrValue::N(n.clone()))),
            _ => {
                debug!("Ignoring non-scalar attribute {}", name);
                None
            }
        })
        .collect()
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement, StorageError> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(|e| unavailable("Invalid key schema", e))
}

fn key_schema(partition: KeyAttr, sort: Option<KeyAttr>) -> Result<Vec<KeySchemaElement>, StorageError> {
    let mut keys = vec![key_element(partition.name, KeyType::Hash)?];
    if let Some(sort) = sort {
        keys.push(key_element(sort.name, KeyType::Range)?);
    }
    Ok(keys)
}

fn index_key_schema(index: &IndexSpec) -> Result<Vec<KeySchemaElement>, StorageError> {
    key_schema(index.partition_key, index.sort_key)
}

/// True when a deployed table is keyed the way `spec` expects.
fn table_key_matches(table: &TableDescription, spec: &TableSpec) -> bool {
    let expected: Vec<(&str, KeyType)> = std::iter::once((spec.partition_key.name, KeyType::Hash))
        .chain(spec.sort_key.map(|sort| (sort.name, KeyType::Range)))
        .collect();
    let deployed: Vec<(&str, KeyType)> = table
        .key_schema()
        .iter()
        .map(|k| (k.attribute_name(), k.key_type().clone()))
        .collect();
    deployed.len() == expected.len() && expected.iter().all(|e| deployed.contains(e))
}

/// Definitions for the table key and the key attributes of `indexes`.
/// The store rejects definitions no key uses.
fn attribute_definitions(
    spec: &TableSpec,
    indexes: &[IndexSpec],
) -> Result<Vec<AttributeDefinition>, StorageError> {
    spec.key_attributes_for(indexes)
        .into_iter()
        .map(|attr| {
            let kind = match attr.kind {
                AttrKind::String => ScalarAttributeType::S,
                AttrKind::Number => ScalarAttributeType::N,
            };
            AttributeDefinition::builder()
                .attribute_name(attr.name)
                .attribute_type(kind)
                .build()
                .map_err(|e| unavailable("Invalid attribute definition", e))
        })
        .collect()
}

fn projection_all() -> Projection {
    Projection::builder().projection_type(ProjectionType::All).build()
}

fn is_active(table: &TableDescription, expected_indexes: &[IndexSpec]) -> bool {
    if table.table_status() != Some(&TableStatus::Active) {
        return false;
    }
    expected_indexes.iter().all(|expected| {
        table.global_secondary_indexes().iter().any(|index| {
            index.index_name() == Some(expected.name)
                && index.index_status() == Some(&IndexStatus::Active)
        })
    })
}

pub struct DynamoItemStore {
    rt: tokio::runtime::Runtime,
    client: Client,
}

impl DynamoItemStore {
    /// Build a client for `region`, optionally pointed at a custom endpoint
    /// such as DynamoDB Local.
    pub fn connect(region: &str, endpoint_url: Option<&str>) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| unavailable("Failed to build runtime", e))?;
        let client = rt.block_on(async {
            let mut loader =
                aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
            if let Some(url) = endpoint_url {
                loader = loader.endpoint_url(url);
            }
            Client::new(&loader.load().await)
        });
        info!(
            "DynamoDB client ready (region {}, endpoint {})",
            region,
            endpoint_url.unwrap_or("default")
        );
        Ok(Self { rt, client })
    }

    async fn describe(&self, table: &str) -> Result<Option<TableDescription>, StorageError> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(output) => Ok(output.table().cloned()),
            Err(err) => {
                let message = DisplayErrorContext(&err).to_string();
                if err.into_service_error().is_resource_not_found_exception() {
                    Ok(None)
                } else {
                    Err(unavailable(&format!("Failed to describe {}", table), message))
                }
            }
        }
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<(), StorageError> {
        let mut indexes = Vec::with_capacity(spec.indexes.len());
        for index in &spec.indexes {
            indexes.push(
                GlobalSecondaryIndex::builder()
                    .index_name(index.name)
                    .set_key_schema(Some(index_key_schema(index)?))
                    .projection(projection_all())
                    .build()
                    .map_err(|e| unavailable("Invalid index definition", e))?,
            );
        }
        let request = self
            .client
            .create_table()
            .table_name(&spec.name)
            .billing_mode(BillingMode::PayPerRequest)
            .set_key_schema(Some(key_schema(spec.partition_key, spec.sort_key)?))
            .set_attribute_definitions(Some(attribute_definitions(spec, &spec.indexes)?))
            .set_global_secondary_indexes(if indexes.is_empty() { None } else { Some(indexes) });

        match request.send().await {
            Ok(_) => {
                info!("Creating DynamoDB table {}", spec.name);
                Ok(())
            }
            Err(err) => {
                let message = DisplayErrorContext(&err).to_string();
                if err.into_service_error().is_resource_in_use_exception() {
                    // created concurrently by another process
                    debug!("Table {} already being created", spec.name);
                    Ok(())
                } else {
                    Err(unavailable(&format!("Failed to create {}", spec.name), message))
                }
            }
        }
    }

    /// Adds one missing index next to the `present` ones. The store accepts a
    /// single index creation per table update.
    async fn create_index(
        &self,
        spec: &TableSpec,
        present: &[IndexSpec],
        index: &IndexSpec,
    ) -> Result<(), StorageError> {
        let mut defined = present.to_vec();
        defined.push(index.clone());
        let action = CreateGlobalSecondaryIndexAction::builder()
            .index_name(index.name)
            .set_key_schema(Some(index_key_schema(index)?))
            .projection(projection_all())
            .build()
            .map_err(|e| unavailable("Invalid index definition", e))?;
        self.client
            .update_table()
            .table_name(&spec.name)
            .set_attribute_definitions(Some(attribute_definitions(spec, &defined)?))
            .global_secondary_index_updates(
                GlobalSecondaryIndexUpdate::builder().create(action).build(),
            )
            .send()
            .await
            .map_err(|e| {
                unavailable(
                    &format!("Failed to add index {} to {}", index.name, spec.name),
                    DisplayErrorContext(&e),
                )
            })?;
        info!("Adding index {} to {}", index.name, spec.name);
        Ok(())
    }

    async fn wait_until_active(&self, spec: &TableSpec, indexes: &[IndexSpec]) -> Result<(), StorageError> {
        for attempt in 0..ACTIVE_POLL_ATTEMPTS {
            if let Some(table) = self.describe(&spec.name).await? {
                if is_active(&table, indexes) {
                    return Ok(());
                }
            }
            if attempt % 10 == 0 {
                debug!("Waiting for {} to become active", spec.name);
            }
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
        Err(unavailable(
            &format!("Table {}", spec.name),
            "did not become active in time",
        ))
    }
}

impl ItemStore for DynamoItemStore {
    fn ensure_table(&self, spec: &TableSpec) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let Some(existing) = self.describe(&spec.name).await? else {
                self.create_table(spec).await?;
                return self.wait_until_active(spec, &spec.indexes).await;
            };

            if !table_key_matches(&existing, spec) {
                return Err(unavailable(
                    &format!("Table {}", spec.name),
                    "exists with a different key schema",
                ));
            }

            // Deployed tables may predate some of the indexes.
            let mut ready: Vec<IndexSpec> = Vec::new();
            for index in &spec.indexes {
                let present = existing
                    .global_secondary_indexes()
                    .iter()
                    .any(|i| i.index_name() == Some(index.name));
                if !present {
                    warn!("Table {} lacks index {}", spec.name, index.name);
                    self.wait_until_active(spec, &ready).await?;
                    self.create_index(spec, &ready, index).await?;
                }
                ready.push(index.clone());
            }
            self.wait_until_active(spec, &spec.indexes).await
        })
    }

    fn put_item(&self, table: &str, item: Item) -> Result<(), StorageError> {
        let item: HashMap<String, AttributeValue> =
            item.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect();
        self.rt
            .block_on(self.client.put_item().table_name(table).set_item(Some(item)).send())
            .map_err(|e| unavailable(&format!("Failed to write to {}", table), DisplayErrorContext(&e)))?;
        Ok(())
    }

    fn get_item(&self, table: &str, key: &KeyMatch) -> Result<Option<Item>, StorageError> {
        let output = self
            .rt
            .block_on(
                self.client
                    .get_item()
                    .table_name(table)
                    .key(key.attribute, to_sdk(&key.value))
                    .consistent_read(true)
                    .send(),
            )
            .map_err(|e| unavailable(&format!("Failed to read from {}", table), DisplayErrorContext(&e)))?;
        Ok(output.item().map(from_sdk))
    }

    fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<Item>, StorageError> {
        self.rt.block_on(async {
            let mut items = Vec::new();
            let mut start_key: Option<HashMap<String, AttributeValue>> = None;
            loop {
                let mut condition = String::from("#pk = :pk");
                let request = self.client.query().table_name(query.table);
                // only the table itself supports consistent reads
                let mut request = match query.index {
                    Some(index) => request.index_name(index),
                    None => request.consistent_read(true),
                };
                request = request
                    .expression_attribute_names("#pk", query.partition.attribute)
                    .expression_attribute_values(":pk", to_sdk(&query.partition.value));
                if let Some(sort) = &query.sort_at_least {
                    condition.push_str(" AND #sk >= :sk");
                    request = request
                        .expression_attribute_names("#sk", sort.attribute)
                        .expression_attribute_values(":sk", to_sdk(&sort.value));
                }
                let output = request
                    .key_condition_expression(condition)
                    .set_exclusive_start_key(start_key.take())
                    .send()
                    .await
                    .map_err(|e| {
                        unavailable(
                            &format!(
                                "Failed to query {} on {}",
                                query.index.unwrap_or("primary key"),
                                query.table
                            ),
                            DisplayErrorContext(&e),
                        )
                    })?;
                items.extend(output.items().iter().map(from_sdk));
                match output.last_evaluated_key() {
                    Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                    _ => break,
                }
            }
            Ok(items)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::GlobalSecondaryIndexDescription;

    const PK: KeyAttr = KeyAttr { name: "id", kind: AttrKind::String };
    const SCORE: KeyAttr = KeyAttr { name: "score", kind: AttrKind::Number };

    fn index() -> IndexSpec {
        IndexSpec { name: "score-index", partition_key: PK, sort_key: Some(SCORE) }
    }

    #[test]
    fn test_attribute_values_convert_both_ways() {
        let item = Item::from([
            ("id".to_string(), AttrValue::S("a".into())),
            ("score".to_string(), AttrValue::N("0.25".into())),
        ]);
        let sdk: HashMap<String, AttributeValue> =
            item.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect();
        assert_eq!(sdk.get("score"), Some(&AttributeValue::N("0.25".into())));
        assert_eq!(from_sdk(&sdk), item);
    }

    #[test]
    fn test_non_scalar_attributes_are_dropped() {
        let sdk = HashMap::from([
            ("id".to_string(), AttributeValue::S("a".into())),
            ("flag".to_string(), AttributeValue::Bool(true)),
        ]);
        assert_eq!(from_sdk(&sdk).len(), 1);
    }

    #[test]
    fn test_index_key_schema_orders_hash_then_range() {
        let keys = index_key_schema(&index()).unwrap();
        assert_eq!(keys[0].key_type(), &KeyType::Hash);
        assert_eq!(keys[1].attribute_name(), "score");
        assert_eq!(keys[1].key_type(), &KeyType::Range);
    }

    #[test]
    fn test_is_active_requires_every_index() {
        let creating = TableDescription::builder()
            .table_status(TableStatus::Active)
            .global_secondary_indexes(
                GlobalSecondaryIndexDescription::builder()
                    .index_name("score-index")
                    .index_status(IndexStatus::Creating)
                    .build(),
            )
            .build();
        assert!(!is_active(&creating, &[index()]));
        assert!(is_active(&creating, &[]));

        let ready = TableDescription::builder()
            .table_status(TableStatus::Active)
            .global_secondary_indexes(
                GlobalSecondaryIndexDescription::builder()
                    .index_name("score-index")
                    .index_status(IndexStatus::Active)
                    .build(),
            )
            .build();
        assert!(is_active(&ready, &[index()]));
    }

    fn detections_spec() -> TableSpec {
        let label = KeyAttr { name: "label", kind: AttrKind::String };
        TableSpec {
            name: "t_detection_objects".into(),
            partition_key: KeyAttr { name: "prediction_uid", kind: AttrKind::String },
            sort_key: Some(PK),
            indexes: vec![
                IndexSpec { name: "label-index", partition_key: label, sort_key: None },
                IndexSpec {
                    name: "score-index",
                    partition_key: KeyAttr { name: "score_partition", kind: AttrKind::String },
                    sort_key: Some(SCORE),
                },
            ],
        }
    }

    fn defined_names(defs: &[AttributeDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.attribute_name()).collect()
    }

    #[test]
    fn test_index_update_defines_only_keys_in_use() {
        let spec = detections_spec();
        let adding_label = attribute_definitions(&spec, &spec.indexes[..1]).unwrap();
        assert_eq!(defined_names(&adding_label), vec!["prediction_uid", "id", "label"]);

        let all = attribute_definitions(&spec, &spec.indexes).unwrap();
        assert_eq!(
            defined_names(&all),
            vec!["prediction_uid", "id", "label", "score_partition", "score"]
        );
    }

    #[test]
    fn test_table_key_matches() {
        let spec = detections_spec();
        let keyed = |elements: Vec<KeySchemaElement>| {
            TableDescription::builder().set_key_schema(Some(elements)).build()
        };
        let current = keyed(vec![
            key_element("prediction_uid", KeyType::Hash).unwrap(),
            key_element("id", KeyType::Range).unwrap(),
        ]);
        assert!(table_key_matches(&current, &spec));

        let legacy = keyed(vec![key_element("id", KeyType::Hash).unwrap()]);
        assert!(!table_key_matches(&legacy, &spec));
    }
}

