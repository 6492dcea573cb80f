use crate::app::ports::PersistencePort;
use crate::constants::DUPLICATE_RECORDS_KEY;
use crate::error::Result;
use crate::types::{AssetKind, DuplicateCheckResult, DuplicateRecord, OwnerScope};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// SHA-256 of the raw content, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Looks up prior submissions of byte-identical content. Records live in the
/// persistence collaborator; this type only reads and appends through it.
/// Appends are serialized so concurrent submissions never overwrite each other.
pub struct DuplicateDetector {
    store: Arc<dyn PersistencePort>,
    write_lock: Mutex<()>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn PersistencePort>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<DuplicateRecord>> {
        let raw = self.store.get(DUPLICATE_RECORDS_KEY).await?;
        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<DuplicateRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping malformed duplicate record"),
            }
        }
        Ok(records)
    }

    /// Same hash under the same normalized owner scope counts as a duplicate.
    /// The asset kind is not part of the key.
    pub async fn check_duplicate(
        &self,
        content_hash: &str,
        asset_kind: AssetKind,
        owner_scope: &OwnerScope,
    ) -> Result<DuplicateCheckResult> {
        let scope = owner_scope.normalized();
        let records = self.load().await?;
        let matched = records
            .into_iter()
            .find(|r| r.content_hash == content_hash && r.owner_scope == scope);
        match matched {
            Some(record) => {
                debug!(
                    hash = content_hash,
                    scope = %scope,
                    kind = %asset_kind,
                    existing_asset_id = record.existing_asset_id,
                    "Duplicate content found"
                );
                Ok(DuplicateCheckResult::matched(record))
            }
            None => Ok(DuplicateCheckResult::none()),
        }
    }

    /// Asset ids are globally unique, so scope is ignored here.
    pub async fn check_duplicate_by_asset_id(&self, asset_id: u64) -> Result<DuplicateCheckResult> {
        let records = self.load().await?;
        Ok(records
            .into_iter()
            .find(|r| r.existing_asset_id == asset_id)
            .map(DuplicateCheckResult::matched)
            .unwrap_or_else(DuplicateCheckResult::none))
    }

    /// Append a record unless the exact (hash, scope, asset) triple is already stored.
    pub async fn record(&self, record: DuplicateRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let exists = records.iter().any(|r| {
            r.content_hash == record.content_hash
                && r.owner_scope == record.owner_scope
                && r.existing_asset_id == record.existing_asset_id
        });
        if exists {
            return Ok(());
        }
        records.push(record);
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.store.put(DUPLICATE_RECORDS_KEY, values).await
    }
}
