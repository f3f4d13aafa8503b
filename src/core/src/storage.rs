//! Storage subsystem
//!
//! This module provides one query contract over prediction sessions and
//! their detections, with two interchangeable backends.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `db_entities`: SeaORM entity models for the database backend.
//! - `item_store`: key-value item model and the `ItemStore` boundary.
//! - `nosql_storage`: the contract mapped onto an `ItemStore` with secondary indexes.
//! - `dynamo_store`: `ItemStore` over DynamoDB.
//! - `memory_store`: in-process `ItemStore` emulating the same index semantics.
//! - `factory`: backend selection from configuration.

pub mod database_storage;
pub mod db_entities;
pub mod dynamo_store;
pub mod factory;
pub mod item_store;
pub mod memory_store;
pub mod nosql_storage;
pub mod storage_trait;
pub mod types;
