//! Garbage collection and repository wipes.

use std::collections::BTreeSet;

use cip_core::{Digest, ImageName, Manifest, RegistryName};
use tracing::info;

use crate::error::{Result, SyncError};
use crate::inventory::{SyncContext, SyncState};
use crate::promote::{Executor, PromotionReport, PromotionRequest};

/// Deletion requests for untagged digests in destination registries.
///
/// Source registries are never touched. A digest is kept if a manifest
/// still asks for it in that registry and image, or if it is a child of a
/// manifest list present in the same image.
#[must_use]
pub fn garbage_collection_requests(manifests: &[Manifest], state: &SyncState) -> Vec<PromotionRequest> {
    let sources: BTreeSet<&RegistryName> = manifests
        .iter()
        .map(|m| &m.source_registry().name)
        .collect();

    let mut wanted: BTreeSet<(&RegistryName, &ImageName, &Digest)> = BTreeSet::new();
    let mut destinations: BTreeSet<&RegistryName> = BTreeSet::new();
    for manifest in manifests {
        for registry in manifest.destination_registries() {
            destinations.insert(&registry.name);
            for image in manifest.images() {
                for digest in image.dmap.keys() {
                    wanted.insert((&registry.name, &image.name, digest));
                }
            }
        }
    }

    let mut requests = Vec::new();
    for registry in destinations.difference(&sources) {
        let Some(rii) = state.inventory.get(*registry) else {
            continue;
        };
        for (image, dmap) in rii {
            for (digest, tags) in dmap {
                if !tags.is_empty() || wanted.contains(&(*registry, image, digest)) {
                    continue;
                }
                let referenced = state
                    .parent_digests
                    .get(digest)
                    .is_some_and(|parent| dmap.contains_key(parent));
                if referenced {
                    continue;
                }
                requests.push(PromotionRequest::delete(registry, image, digest, &[]));
            }
        }
    }
    requests
}

/// Deletes untagged digests from the destination registries of
/// `manifests`, using the inventory already read into `context`.
///
/// # Errors
///
/// Returns an error only if a worker panicked.
pub async fn garbage_collect(
    manifests: &[Manifest],
    context: &SyncContext,
    executor: &Executor,
) -> Result<PromotionReport> {
    let requests = context.with_state(|state| garbage_collection_requests(manifests, state));
    info!(requests = requests.len(), "collecting garbage");
    executor.delete(requests).await
}

/// Deletion requests emptying `registry`, as two phases: manifest lists
/// first, then everything else. Each request removes a digest's tags before
/// the digest.
#[must_use]
pub fn clear_repository_requests(
    registry: &RegistryName,
    state: &SyncState,
) -> (Vec<PromotionRequest>, Vec<PromotionRequest>) {
    let mut lists = Vec::new();
    let mut rest = Vec::new();
    let Some(rii) = state.inventory.get(registry) else {
        return (lists, rest);
    };
    for (image, dmap) in rii {
        for (digest, tags) in dmap {
            let request = PromotionRequest::delete(registry, image, digest, tags);
            let is_list = state
                .media_types
                .get(digest)
                .is_some_and(cip_registry::MediaType::is_manifest_list);
            if is_list {
                lists.push(request);
            } else {
                rest.push(request);
            }
        }
    }
    (lists, rest)
}

/// Deletes every image in `registry`. Manifest lists are all deleted before
/// any other digest.
///
/// # Errors
///
/// Returns an error if `registry` is a source registry of `context`, or if a
/// worker panicked.
pub async fn clear_repository(
    registry: &RegistryName,
    context: &SyncContext,
    executor: &Executor,
) -> Result<PromotionReport> {
    if context
        .registries()
        .iter()
        .any(|r| r.src && &r.name == registry)
    {
        return Err(SyncError::SourceRegistry {
            registry: registry.to_string(),
        });
    }

    let (lists, rest) = context.with_state(|state| clear_repository_requests(registry, state));
    info!(
        registry = %registry,
        manifest_lists = lists.len(),
        manifests = rest.len(),
        "clearing repository"
    );

    let mut report = executor.delete(lists).await?;
    report.merge(executor.delete(rest).await?);
    Ok(report)
}
