use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::RepoResult;
use crate::storage::facet::StorageFacet;
use crate::storage::records::{EntityId, Record};
use crate::util::digesting_stream::{Digester, HashAlgorithm};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub fixed: usize,
}

/// Recomputes the digests of every blob-backed asset in the repository's bucket and rewrites
///  stored checksums that no longer match the content. An external checksum that matched the
///  stale value is rewritten too.
pub async fn reconcile_checksums(storage: &StorageFacet) -> RepoResult<ReconcileReport> {
    let assets = storage.open_tx().browse_bucket_assets(storage.bucket()).await?;
    info!("reconciling checksums of {} assets in {}", assets.len(), storage.bucket());

    let mut report = ReconcileReport::default();
    for asset in assets.into_iter().filter(|a| a.blob_ref.is_some()) {
        let _guard = storage.lock(&asset.key).await;
        report.checked += 1;
        if reconcile_asset(storage, &asset.id).await? {
            report.fixed += 1;
        }
    }

    info!("reconciled {}: {} assets checked, {} fixed", storage.bucket(), report.checked, report.fixed);
    Ok(report)
}

async fn reconcile_asset(storage: &StorageFacet, id: &EntityId) -> RepoResult<bool> {
    let mut tx = storage.open_tx();
    let mut asset = match tx.find_asset_by_id(id).await? {
        Some(asset) => asset,
        None => {
            debug!("asset {} was deleted during reconciliation", id);
            return Ok(false);
        }
    };

    let blob = tx.require_blob(&asset).await?;
    let mut digester = Digester::new();
    let mut data = blob.data;
    while let Some(chunk) = data.next().await {
        digester.update(&chunk?);
    }
    let digests = digester.finish();

    let mut changed = false;
    if asset.size != Some(digests.size) {
        warn!("size of {} in {} was {:?}, content has {} bytes", asset.name, asset.bucket, asset.size, digests.size);
        asset.size = Some(digests.size);
        changed = true;
    }

    for algorithm in HashAlgorithm::ALL {
        let stored = match asset.property(&format!("checksum.{}", algorithm.name())) {
            Some(stored) => stored.to_string(),
            None => continue,
        };
        let actual = digests.get(algorithm);
        if stored == actual {
            continue;
        }

        warn!("stale {} of {} in {}: stored {}, content has {}", algorithm.name(), asset.name, asset.bucket, stored, actual);
        asset.attributes.child_mut("checksum").set(algorithm.name(), actual);

        let ext_checksum_path = format!("{}.extChecksum.{}", asset.format, algorithm.name());
        if asset.property(&ext_checksum_path) == Some(stored.as_str()) {
            let format = asset.format.clone();
            asset.attributes.child_mut(&format).child_mut("extChecksum").set(algorithm.name(), actual);
        }
        changed = true;
    }

    if changed {
        tx.save_asset(&asset).await?;
        tx.commit().await?;
    }
    else {
        tx.rollback().await;
    }
    Ok(changed)
}
