//! Scoped storage tokens of table sinks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sinkbridge_core::{OperationContext, Sink, SinkKey};
use sinkbridge_crypto::{CryptoError, decrypt_json, encrypt_json, metadata};
use sinkbridge_state::{AtomicOp, Versioned};
use sinkbridge_storage_api::{ApiToken, BucketPermission, StorageApi, TokenRequest};

use crate::bridge::BridgeState;
use crate::error::BridgeError;
use crate::model::Token;
use crate::repository::token_key;

fn token_metadata(sink: &SinkKey) -> sinkbridge_crypto::Metadata {
    metadata("sink", sink)
}

impl BridgeState {
    /// Token the background operations of the sink authorize with.
    ///
    /// In an authorized context a new token is minted and written into `op`;
    /// the previous one is revoked after `op` commits. Otherwise the stored
    /// token is required.
    pub(crate) async fn token_for_sink(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        op: &mut AtomicOp,
    ) -> Result<ApiToken, BridgeError> {
        let existing = self.repo.get_token(&sink.key).await?;

        let Some(api) = self.context_api(ctx) else {
            let existing = existing.ok_or_else(|| BridgeError::TokenNotFound {
                sink: sink.key.to_string(),
            })?;
            return self.decrypt_token(&existing.value).await;
        };

        let Some(table) = sink.table() else {
            return Err(BridgeError::BadRequest(format!(
                "sink \"{}\" has no table target",
                sink.key
            )));
        };
        let bucket = table.table_id.bucket_id();
        let request = TokenRequest {
            description: format!(
                "[_internal] Stream Sink {}/{}",
                sink.key.source.source_id, sink.key.sink_id
            ),
            bucket_permissions: BTreeMap::from([(bucket.clone(), BucketPermission::Write)]),
            can_read_all_file_uploads: true,
        };

        info!(sink = %sink.key, bucket = %bucket, "creating token");
        let created = api.create_token(&request).await.inspect_err(|e| {
            warn!(sink = %sink.key, error = %e, "cannot create token");
        })?;

        {
            let api = Arc::clone(&api);
            let token_id = created.id.clone();
            ctx.rollback.add("delete token", move || async move {
                info!(token_id = %token_id, "rollback: deleting token");
                api.delete_token(&token_id).await
            });
        }

        let row = self.seal_token(&sink.key, &created).await?;
        let key = token_key(&sink.key);
        op.require_revision(key.clone(), existing.as_ref().map(|v| v.mod_revision))
            .put_json(key, &row)?;

        if let Some(old) = existing {
            let old_id = old.value.token_id;
            let sink_key = sink.key.clone();
            op.on_commit(move || async move {
                info!(sink = %sink_key, token_id = %old_id, "deleting old token");
                match api.delete_token(&old_id).await {
                    Ok(()) => info!(sink = %sink_key, token_id = %old_id, "deleted old token"),
                    Err(e) => {
                        warn!(sink = %sink_key, token_id = %old_id, error = %e, "cannot delete old token");
                    }
                }
            });
        }

        info!(sink = %sink.key, token_id = %created.id, "created token");
        Ok(created)
    }

    /// Stored token of the sink, decrypted.
    pub(crate) async fn sink_token(
        &self,
        sink: &SinkKey,
    ) -> Result<(Versioned<Token>, ApiToken), BridgeError> {
        let row = self
            .repo
            .get_token(sink)
            .await?
            .ok_or_else(|| BridgeError::TokenNotFound {
                sink: sink.to_string(),
            })?;
        let token = self.decrypt_token(&row.value).await?;
        Ok((row, token))
    }

    /// Client authorized by the stored token of the sink.
    pub(crate) async fn sink_api(&self, sink: &SinkKey) -> Result<Arc<dyn StorageApi>, BridgeError> {
        let (_, token) = self.sink_token(sink).await?;
        Ok(self.api.authorized(&token.token))
    }

    pub(crate) async fn decrypt_token(&self, row: &Token) -> Result<ApiToken, BridgeError> {
        if let Some(ciphertext) = &row.encrypted_token {
            let encryptor = self.encryptor.as_deref().ok_or_else(|| {
                CryptoError::Configuration(format!(
                    "token of sink \"{}\" is encrypted but no encryptor is configured",
                    row.sink_key
                ))
            })?;
            return Ok(decrypt_json(encryptor, ciphertext, &token_metadata(&row.sink_key)).await?);
        }
        row.token.clone().ok_or_else(|| BridgeError::TokenNotFound {
            sink: row.sink_key.to_string(),
        })
    }

    /// Revoke the stored token of a deactivated sink.
    ///
    /// While import jobs of the sink are still stored, the token is only
    /// marked so the job cleanup revokes it with the last job.
    pub(crate) async fn release_sink_token(
        &self,
        ctx: &OperationContext,
        sink: &SinkKey,
        op: &mut AtomicOp,
    ) -> Result<(), BridgeError> {
        let Some(existing) = self.repo.get_token(sink).await? else {
            return Ok(());
        };
        let key = token_key(sink);

        let jobs = self.repo.list_sink_jobs(sink).await?;
        if !jobs.is_empty() {
            let mut row = existing.value;
            row.revoke_pending = true;
            op.require_revision(key.clone(), Some(existing.mod_revision))
                .put_json(key, &row)?;
            info!(sink = %sink, jobs = jobs.len(), "token revocation postponed until jobs finish");
            return Ok(());
        }

        let api = match self.context_api(ctx) {
            Some(api) => api,
            None => self.api.authorized(&self.decrypt_token(&existing.value).await?.token),
        };
        op.require_revision(key.clone(), Some(existing.mod_revision))
            .delete(key);
        let token_id = existing.value.token_id;
        let sink = sink.clone();
        op.on_commit(move || revoke_token(api, sink, token_id));
        Ok(())
    }

    /// Revoke and delete the token of a deactivated sink whose last job is
    /// gone.
    pub(crate) async fn revoke_pending_token(&self, sink: &SinkKey) -> Result<bool, BridgeError> {
        let Some(existing) = self.repo.get_token(sink).await? else {
            return Ok(false);
        };
        if !existing.value.revoke_pending || !self.repo.list_sink_jobs(sink).await?.is_empty() {
            return Ok(false);
        }

        let token = self.decrypt_token(&existing.value).await?;
        let api = self.api.authorized(&token.token);
        let mut op = AtomicOp::new();
        op.require_revision(existing.key.clone(), Some(existing.mod_revision))
            .delete(existing.key);
        let sink_key = sink.clone();
        op.on_commit(move || revoke_token(api, sink_key, token.id));
        match op.commit(self.repo.store()).await {
            Ok(_) => Ok(true),
            // Revoked concurrently by the cleanup of another job.
            Err(e) if e.is_conflict() && self.repo.get_token(sink).await?.is_none() => {
                debug!(sink = %sink, "token already revoked");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Encrypt every token stored in plaintext.
    pub(crate) async fn migrate_tokens(&self, _ctx: &OperationContext) -> Result<usize, BridgeError> {
        if self.encryptor.is_none() {
            debug!("no encryptor configured, skipping token migration");
            return Ok(0);
        }

        let mut op = AtomicOp::new();
        let mut migrated = 0;
        for row in self.repo.list_tokens().await? {
            let Some(plain) = row.value.token.as_ref().filter(|_| row.value.is_plaintext()) else {
                continue;
            };
            let mut sealed = self.seal_token(&row.value.sink_key, plain).await?;
            sealed.revoke_pending = row.value.revoke_pending;
            op.require_revision(row.key.clone(), Some(row.mod_revision))
                .put_json(row.key, &sealed)?;
            migrated += 1;
        }

        if migrated > 0 {
            op.commit(self.repo.store()).await?;
        }
        info!(migrated, "migrated tokens");
        Ok(migrated)
    }

    /// Row of a freshly minted token, encrypted when an encryptor is set.
    async fn seal_token(&self, sink: &SinkKey, token: &ApiToken) -> Result<Token, BridgeError> {
        Ok(match self.encryptor.as_deref() {
            Some(encryptor) => {
                let ciphertext = encrypt_json(encryptor, token, &token_metadata(sink)).await?;
                Token::encrypted(sink.clone(), token.id.clone(), ciphertext)
            }
            None => Token::plain(sink.clone(), token.clone()),
        })
    }
}

async fn revoke_token(api: Arc<dyn StorageApi>, sink: SinkKey, token_id: String) {
    info!(sink = %sink, token_id = %token_id, "deleting token");
    match api.delete_token(&token_id).await {
        Ok(()) => info!(sink = %sink, token_id = %token_id, "deleted token"),
        Err(e) => warn!(sink = %sink, token_id = %token_id, error = %e, "cannot delete token"),
    }
}

#[cfg(test)]
mod tests {
    use sinkbridge_state::{AtomicOp, MetadataStore};
    use sinkbridge_storage_api::{StorageApiError, paths};

    use super::*;
    use crate::testing::{TestBridge, now, sink};

    #[tokio::test]
    async fn background_context_requires_stored_token() {
        let t = TestBridge::new();
        let mut op = AtomicOp::new();
        let err = t
            .state()
            .token_for_sink(&OperationContext::background(now()), &sink(), &mut op)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::TokenNotFound { .. }));
        assert!(t.api.calls().is_empty());
    }

    #[tokio::test]
    async fn authorized_context_mints_encrypted_token() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        let mut op = AtomicOp::new();
        let token = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        let request = t.api.token_request(&token.id).unwrap();
        assert_eq!(request.description, "[_internal] Stream Sink my-source/my-sink");
        assert!(request.can_read_all_file_uploads);
        assert_eq!(
            request.bucket_permissions.values().collect::<Vec<_>>(),
            vec![&BucketPermission::Write]
        );

        let row = t.state().repo.get_token(&sink().key).await.unwrap().unwrap();
        assert_eq!(row.value.token_id, token.id);
        assert!(row.value.token.is_none());
        assert!(row.value.encrypted_token.as_deref().unwrap().starts_with("native::"));
        assert_eq!(t.state().decrypt_token(&row.value).await.unwrap(), token);
        assert_eq!(ctx.rollback.len(), 1);
    }

    #[tokio::test]
    async fn rotation_revokes_previous_token_after_commit() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");

        let mut op = AtomicOp::new();
        let first = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        let mut op = AtomicOp::new();
        let second = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        assert!(t.api.token(&first.id).is_some());
        op.commit(t.store.as_ref()).await.unwrap();

        assert!(t.api.token(&first.id).is_none());
        assert!(t.api.token(&second.id).is_some());
        let (row, _) = t.state().sink_token(&sink().key).await.unwrap();
        assert_eq!(row.value.token_id, second.id);
    }

    #[tokio::test]
    async fn failed_old_token_revoke_is_not_fatal() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        let mut op = AtomicOp::new();
        let first = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        t.api.inject_error(
            format!("DELETE {}", paths::token(&first.id)),
            StorageApiError::Connection("reset".into()),
            1,
        );
        let mut op = AtomicOp::new();
        let second = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        let (row, _) = t.state().sink_token(&sink().key).await.unwrap();
        assert_eq!(row.value.token_id, second.id);
    }

    #[tokio::test]
    async fn plaintext_without_encryptor() {
        let t = TestBridge::without_encryption();
        let ctx = OperationContext::authorized(now(), "admin");
        let mut op = AtomicOp::new();
        let token = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        let row = t.state().repo.get_token(&sink().key).await.unwrap().unwrap();
        assert!(row.value.is_plaintext());
        assert_eq!(row.value.token.as_ref(), Some(&token));
        assert_eq!(t.bridge.migrate_tokens(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn migration_encrypts_plaintext_tokens_once() {
        let plain = TestBridge::without_encryption();
        let ctx = OperationContext::authorized(now(), "admin");
        let mut op = AtomicOp::new();
        let token = plain.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(plain.store.as_ref()).await.unwrap();

        let t = plain.with_encryption();
        assert_eq!(t.bridge.migrate_tokens(&ctx).await.unwrap(), 1);
        let row = t.state().repo.get_token(&sink().key).await.unwrap().unwrap();
        assert!(!row.value.is_plaintext());
        assert_eq!(row.value.token_id, token.id);
        assert_eq!(t.state().decrypt_token(&row.value).await.unwrap(), token);

        // The second run leaves the stored ciphertext byte-identical.
        let key = token_key(&sink().key);
        let migrated = t.store.get(&key).await.unwrap().unwrap();
        assert_eq!(t.bridge.migrate_tokens(&ctx).await.unwrap(), 0);
        let again = t.store.get(&key).await.unwrap().unwrap();
        assert_eq!(again.value, migrated.value);
        assert_eq!(again.mod_revision, migrated.mod_revision);
    }

    #[tokio::test]
    async fn migration_skips_tokens_encrypted_at_creation() {
        let t = TestBridge::new();
        t.activate().await;
        let key = token_key(&sink().key);
        let before = t.store.get(&key).await.unwrap().unwrap();

        let ctx = OperationContext::authorized(now(), "admin");
        assert_eq!(t.bridge.migrate_tokens(&ctx).await.unwrap(), 0);

        let after = t.store.get(&key).await.unwrap().unwrap();
        assert_eq!(after.value, before.value);
        assert_eq!(after.mod_revision, before.mod_revision);
    }

    #[tokio::test]
    async fn released_token_is_revoked() {
        let t = TestBridge::new();
        let ctx = OperationContext::authorized(now(), "admin");
        let mut op = AtomicOp::new();
        let token = t.state().token_for_sink(&ctx, &sink(), &mut op).await.unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        let mut op = AtomicOp::new();
        t.state()
            .release_sink_token(&OperationContext::background(now()), &sink().key, &mut op)
            .await
            .unwrap();
        op.commit(t.store.as_ref()).await.unwrap();

        assert!(t.api.token(&token.id).is_none());
        assert!(t.state().repo.get_token(&sink().key).await.unwrap().is_none());
    }
}
