//! Remote bucket and table of a table sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tracing::info;

use sinkbridge_core::{BranchId, BucketId, OperationContext, Sink, TableSink};
use sinkbridge_storage_api::error::{
    BUCKET_ALREADY_EXISTS, BUCKET_NOT_FOUND, TABLE_ALREADY_EXISTS,
};
use sinkbridge_storage_api::{
    Bucket, MetadataEntry, StorageApi, StorageApiError, Table, TableDefinition,
};

use crate::bridge::BridgeState;
use crate::error::BridgeError;

/// Table metadata naming the source that writes into the table.
pub const SOURCE_ID_METADATA: &str = "KBC.stream.source.id";
/// Table metadata naming the sink that writes into the table.
pub const SINK_ID_METADATA: &str = "KBC.stream.sink.id";

/// Result of a shared get-or-create bucket call.
#[derive(Debug, Clone)]
pub(crate) struct EnsuredBucket {
    bucket: Bucket,
    /// Set if the call created the bucket. The first caller to take it owns
    /// the rollback.
    created: Arc<AtomicBool>,
}

impl EnsuredBucket {
    fn new(bucket: Bucket, created: bool) -> Self {
        Self {
            bucket,
            created: Arc::new(AtomicBool::new(created)),
        }
    }

    fn take_created(&self) -> bool {
        self.created.swap(false, Ordering::AcqRel)
    }
}

impl BridgeState {
    /// Get the bucket, creating it if it does not exist.
    ///
    /// Concurrent calls for the same bucket share one round trip. A created
    /// bucket is deleted again if the operation of `ctx` fails.
    pub(crate) async fn ensure_bucket_exists(
        &self,
        ctx: &OperationContext,
        api: Arc<dyn StorageApi>,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, BridgeError> {
        let key = format!("{branch}/{bucket}");
        let ensured = {
            let api = Arc::clone(&api);
            let bucket = bucket.clone();
            self.buckets
                .run(&key, move || get_or_create_bucket(api, branch, bucket))
                .await?
        };

        if ensured.take_created() {
            let bucket = bucket.clone();
            ctx.rollback.add("delete bucket", move || async move {
                info!(bucket = %bucket, "rollback: deleting bucket");
                api.delete_bucket(branch, &bucket).await
            });
        }
        Ok(ensured.bucket)
    }

    /// Get the table of the sink, creating it if it does not exist.
    ///
    /// An existing table must have exactly the columns and primary key of
    /// the sink mapping. A created table is deleted again if the operation
    /// of `ctx` fails.
    pub(crate) async fn ensure_table_exists(
        &self,
        ctx: &OperationContext,
        api: &Arc<dyn StorageApi>,
        sink: &Sink,
        target: &TableSink,
    ) -> Result<Table, BridgeError> {
        let branch = sink.key.branch().branch_id;
        let columns = target.mapping.column_names();
        let primary_key = target.mapping.primary_key();

        let table = match api.get_table(branch, &target.table_id).await {
            Ok(table) => table,
            Err(e) if e.is_not_found() => {
                info!(table = %target.table_id, "creating table");
                let definition = TableDefinition::new(columns.clone(), primary_key.clone());
                match api.create_table(branch, &target.table_id, &definition).await {
                    Ok(table) => {
                        info!(table = %target.table_id, "created table");
                        let api = Arc::clone(api);
                        let table_id = target.table_id.clone();
                        ctx.rollback.add("delete table", move || async move {
                            info!(table = %table_id, "rollback: deleting table");
                            api.delete_table(branch, &table_id).await
                        });
                        table
                    }
                    Err(e) if e.has_code(TABLE_ALREADY_EXISTS) => {
                        api.get_table(branch, &target.table_id).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        verify_table(&table, &columns, &primary_key)?;

        let missing: Vec<MetadataEntry> = [
            (SOURCE_ID_METADATA, sink.key.source.source_id.as_str()),
            (SINK_ID_METADATA, sink.key.sink_id.as_str()),
        ]
        .into_iter()
        .filter(|(key, _)| table.metadata_value(key).is_none())
        .map(|(key, value)| MetadataEntry {
            key: key.to_owned(),
            value: value.to_owned(),
        })
        .collect();
        if !missing.is_empty() {
            api.add_table_metadata(branch, &target.table_id, &missing)
                .await?;
        }

        Ok(table)
    }
}

async fn get_or_create_bucket(
    api: Arc<dyn StorageApi>,
    branch: BranchId,
    bucket: BucketId,
) -> Result<EnsuredBucket, StorageApiError> {
    match api.get_bucket(branch, &bucket).await {
        Ok(found) => return Ok(EnsuredBucket::new(found, false)),
        Err(e) if e.has_code(BUCKET_NOT_FOUND) => {}
        Err(e) => return Err(e),
    }

    info!(bucket = %bucket, "creating bucket");
    match api.create_bucket(branch, &bucket).await {
        Ok(created) => {
            info!(bucket = %bucket, "created bucket");
            Ok(EnsuredBucket::new(created, true))
        }
        // Created concurrently by another node.
        Err(e) if e.has_code(BUCKET_ALREADY_EXISTS) => {
            Ok(EnsuredBucket::new(Bucket { id: bucket }, false))
        }
        Err(e) => Err(e),
    }
}

fn verify_table(table: &Table, columns: &[String], primary_key: &[String]) -> Result<(), BridgeError> {
    if table.columns != columns {
        return Err(BridgeError::BadRequest(format!(
            "columns of the table \"{}\" do not match expected {}, found {}",
            table.id,
            json!(columns),
            json!(table.columns)
        )));
    }
    if table.primary_key != primary_key {
        return Err(BridgeError::BadRequest(format!(
            "primary key of the table \"{}\" does not match expected {}, found {}",
            table.id,
            json!(primary_key),
            json!(table.primary_key)
        )));
    }
    Ok(())
}
