//! Staging files holding the uploaded slices of a sink file.

use std::sync::Arc;

use tracing::info;

use sinkbridge_core::{File, FileKey, OperationContext, Sink, TableSink};
use sinkbridge_crypto::{CryptoError, decrypt_json, encrypt_json, metadata};
use sinkbridge_state::{AtomicOp, Versioned};
use sinkbridge_storage_api::{FileRequest, FileResource, StorageApi};

use crate::bridge::BridgeState;
use crate::error::BridgeError;
use crate::model::StagingFile;
use crate::repository::staging_file_key;

/// Provider of staging and target storage of table sink files.
pub const KEBOOLA_PROVIDER: &str = "keboola";

const FILE_NAME_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

fn credentials_metadata(file: &FileKey) -> sinkbridge_crypto::Metadata {
    metadata("file", file)
}

impl BridgeState {
    /// Provision the remote resources of a newly opened file.
    pub(crate) async fn setup_file(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        file: &mut File,
        op: &mut AtomicOp,
    ) -> Result<(), BridgeError> {
        let Some(target) = sink.table() else {
            return Ok(());
        };
        let branch = sink.key.branch().branch_id;

        // Background operators run without a user token, the bucket must
        // already exist then.
        if let Some(api) = self.context_api(ctx) {
            self.ensure_bucket_exists(ctx, api, branch, &target.table_id.bucket_id())
                .await?;
        }

        let token = self.token_for_sink(ctx, sink, op).await?;
        let api = self.api.authorized(&token.token);

        self.ensure_table_exists(ctx, &api, sink, target).await?;
        let resource = self.create_staging_file(ctx, api, sink, target, file, op).await?;

        file.mapping = target.mapping.clone();
        file.staging_storage.provider = KEBOOLA_PROVIDER.to_owned();
        file.staging_storage.expiration = resource.expiration;
        file.target_storage.provider = KEBOOLA_PROVIDER.to_owned();
        Ok(())
    }

    async fn create_staging_file(
        &self,
        ctx: &OperationContext,
        api: Arc<dyn StorageApi>,
        sink: &Sink,
        target: &TableSink,
        file: &File,
        op: &mut AtomicOp,
    ) -> Result<FileResource, BridgeError> {
        let branch = sink.key.branch().branch_id;
        let name = format!(
            "{}_{}_{}",
            sink.key.source.source_id,
            sink.key.sink_id,
            file.key.opened_at.format(FILE_NAME_DATE_FORMAT)
        );
        let request = FileRequest {
            name: name.clone(),
            is_sliced: true,
            tags: vec![
                format!("stream.sourceID={}", sink.key.source.source_id),
                format!("stream.sinkID={}", sink.key.sink_id),
            ],
        };

        info!(file = %file.key, name = %name, "creating staging file");
        let resource = api.prepare_file(branch, &request).await?;

        {
            let api = Arc::clone(&api);
            let file_id = resource.id;
            ctx.rollback.add("delete staging file", move || async move {
                info!(file_id = %file_id, "rollback: deleting staging file");
                api.delete_file(branch, file_id).await
            });
        }

        let mut row = StagingFile {
            file_key: file.key.clone(),
            sink_key: sink.key.clone(),
            table_id: target.table_id.clone(),
            columns: target.mapping.column_names(),
            file_id: resource.id,
            file_name: resource.name.clone(),
            upload_credentials: None,
            encrypted_credentials: None,
            credentials_expiration: resource.credentials_expiration,
            storage_job_id: None,
            import_attempts: 0,
        };
        match self.encryptor.as_deref() {
            Some(encryptor) => {
                row.encrypted_credentials = Some(
                    encrypt_json(encryptor, &resource, &credentials_metadata(&file.key)).await?,
                );
            }
            None => row.upload_credentials = Some(resource.clone()),
        }

        let key = staging_file_key(&file.key);
        op.require_revision(key.clone(), None).put_json(key, &row)?;

        info!(file = %file.key, file_id = %resource.id, "created staging file");
        Ok(resource)
    }

    pub(crate) async fn staging_file(
        &self,
        file: &FileKey,
    ) -> Result<Versioned<StagingFile>, BridgeError> {
        self.repo
            .get_staging_file(file)
            .await?
            .ok_or_else(|| BridgeError::StagingFileNotFound {
                file: file.to_string(),
            })
    }

    /// Upload credentials of the staging file, decrypted.
    pub(crate) async fn upload_credentials(
        &self,
        row: &StagingFile,
    ) -> Result<FileResource, BridgeError> {
        if let Some(ciphertext) = &row.encrypted_credentials {
            let encryptor = self.encryptor.as_deref().ok_or_else(|| {
                CryptoError::Configuration(format!(
                    "credentials of file \"{}\" are encrypted but no encryptor is configured",
                    row.file_key
                ))
            })?;
            return Ok(
                decrypt_json(encryptor, ciphertext, &credentials_metadata(&row.file_key)).await?,
            );
        }
        row.upload_credentials
            .clone()
            .ok_or_else(|| BridgeError::StagingFileNotFound {
                file: row.file_key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use sinkbridge_core::{BucketId, TableId, VolumeId};
    use sinkbridge_storage_api::{StorageApiError, paths};

    use super::*;
    use crate::testing::{TestBridge, branch_id, now, sink};

    #[tokio::test]
    async fn opening_file_provisions_remote_resources() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        let file = t
            .bridge
            .storage()
            .open_file(&ctx, &sink(), &[VolumeId::new("vol-1")])
            .await
            .unwrap();

        assert!(t.api.bucket(branch_id(), &BucketId::new("in.c-bucket")).is_some());
        assert!(t.api.table(branch_id(), &TableId::new("in.c-bucket.my-table")).is_some());
        assert_eq!(file.staging_storage.provider, "keboola");
        assert_eq!(file.target_storage.provider, "keboola");
        assert!(file.staging_storage.expiration.is_some());
        assert_eq!(file.mapping, sink().table().unwrap().mapping);

        let row = t.state().staging_file(&file.key).await.unwrap().value;
        assert_eq!(row.file_name, "my-source_my-sink_20000101010000");
        assert_eq!(row.columns, vec!["id", "body"]);
        assert!(row.upload_credentials.is_none());
        let resource = t.state().upload_credentials(&row).await.unwrap();
        assert_eq!(resource.id, row.file_id);
        assert_eq!(
            resource.tags,
            vec!["stream.sourceID=my-source", "stream.sinkID=my-sink"]
        );
        assert!(resource.is_sliced);

        // The table is managed with the scoped sink token.
        let create_table = format!(
            "POST {}",
            paths::table_definition(branch_id(), &BucketId::new("in.c-bucket"))
        );
        let table_call = t.api.calls_matching(&create_table).pop().unwrap();
        assert_eq!(table_call.token.as_deref(), Some("secret-1000"));
        assert!(ctx.rollback.is_empty());
    }

    #[tokio::test]
    async fn failed_open_deletes_created_resources() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        t.api.inject_error(
            format!("POST {}", paths::file_prepare(branch_id())),
            StorageApiError::Connection("reset".into()),
            1,
        );

        t.bridge
            .storage()
            .open_file(&ctx, &sink(), &[VolumeId::new("vol-1")])
            .await
            .unwrap_err();

        // The minted token is revoked, the created table and bucket are
        // deleted and nothing is stored.
        assert!(t.api.token_ids().is_empty());
        assert!(t.api.table(branch_id(), &TableId::new("in.c-bucket.my-table")).is_none());
        assert!(t.api.bucket(branch_id(), &BucketId::new("in.c-bucket")).is_none());
        assert_eq!(
            t.api.call_count(&format!(
                "DELETE {}",
                paths::bucket(branch_id(), &BucketId::new("in.c-bucket"))
            )),
            1
        );
        assert!(t.state().repo.get_token(&sink().key).await.unwrap().is_none());
        assert!(t.bridge.storage().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn background_open_uses_stored_token() {
        let t = TestBridge::new();
        t.activate().await;
        t.api.clear_calls();

        let file = t
            .bridge
            .storage()
            .open_file(
                &OperationContext::background(now()),
                &sink(),
                &[VolumeId::new("vol-1")],
            )
            .await
            .unwrap();

        assert!(t.api.calls().iter().all(|c| c.token.as_deref() == Some("secret-1000")));
        assert_eq!(t.api.call_count(&format!("POST {}", paths::tokens())), 0);
        assert!(t.state().staging_file(&file.key).await.is_ok());
    }

    #[tokio::test]
    async fn background_open_without_token_fails() {
        let t = TestBridge::new();
        let err = t
            .bridge
            .storage()
            .open_file(
                &OperationContext::background(now()),
                &sink(),
                &[VolumeId::new("vol-1")],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found in the database"));
    }

    #[tokio::test]
    async fn deleting_file_deletes_staging_row() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        let file = t
            .bridge
            .storage()
            .open_file(&ctx, &sink(), &[VolumeId::new("vol-1")])
            .await
            .unwrap();
        let guard = t.lock_file(&file.key).await;

        t.bridge
            .storage()
            .delete_file(&OperationContext::background(now()), &file.key, guard.as_ref())
            .await
            .unwrap();

        assert!(matches!(
            t.state().staging_file(&file.key).await,
            Err(BridgeError::StagingFileNotFound { .. })
        ));
        // The remote staging file is left to expire.
        assert_eq!(t.api.file_count(), 1);
    }
}
