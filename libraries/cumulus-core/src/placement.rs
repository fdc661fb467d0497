//! Hub selection for new fragments. The source hub and any explicitly
//! excluded hubs are never eligible; disjointness across a file's own
//! fragments is preferred but relaxed when the pool runs out.

use std::collections::HashSet;

use cumulus_structs::id::HubId;
use rand::Rng;

use crate::Core;
use crate::catalog::{self, Hub};
use crate::error::CoreError;
use crate::fragment::Fragment;

/// Pick a hub for a fragment of `required_bytes`. First pass excludes the
/// source, the caller's exclusions and every hub already holding one of
/// `placed`; if that yields nothing and some fragment-derived exclusion
/// existed, the fragment set is forgiven and the pick retried.
pub(crate) async fn select_hub(
    core: &Core,
    source: &HubId,
    placed: &[Fragment],
    required_bytes: u64,
    excluded: &HashSet<HubId>,
) -> Result<Hub, CoreError> {
    let mut base_exclude: HashSet<HubId> = excluded.clone();
    base_exclude.insert(source.clone());

    let mut exclude = base_exclude.clone();
    for fragment in placed {
        exclude.insert(fragment.remote.clone());
    }

    let candidates = catalog::candidate_hubs(core, &exclude, required_bytes).await?;
    if let Some(hub) = choose(candidates) {
        return Ok(hub);
    }
    if exclude == base_exclude {
        return Err(CoreError::NoStorageLocation);
    }
    let candidates = catalog::candidate_hubs(core, &base_exclude, required_bytes).await?;
    choose(candidates).ok_or(CoreError::NoStorageLocation)
}

fn choose(mut candidates: Vec<Hub>) -> Option<Hub> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use cumulus_structs::id::HubId;

    use super::select_hub;
    use crate::error::CoreError;
    use crate::fragment::Fragment;
    use crate::testing;

    #[tokio::test]
    async fn never_selects_source_or_excluded() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "source", 1 << 40).await;
        let banned = testing::register_hub(&core, "banned", 1 << 40).await;
        let good = testing::register_hub(&core, "good", 1 << 40).await;

        let mut excluded = HashSet::new();
        excluded.insert(banned.hub_id.clone());
        for _ in 0..20 {
            let hub = select_hub(&core, &source.hub_id, &[], 1024, &excluded)
                .await
                .expect("a hub is available");
            assert_eq!(hub.hub_id, good.hub_id);
        }
    }

    #[tokio::test]
    async fn prefers_disjoint_hubs_then_relaxes() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "source", 1 << 40).await;
        let first = testing::register_hub(&core, "first", 1 << 40).await;
        let second = testing::register_hub(&core, "second", 1 << 40).await;

        let placed = vec![Fragment::new(0, first.hub_id.clone())];
        let hub = select_hub(&core, &source.hub_id, &placed, 1024, &HashSet::new())
            .await
            .expect("disjoint hub available");
        assert_eq!(hub.hub_id, second.hub_id);

        // both non-source hubs used: the fragment-derived exclusions are
        // forgiven and an already-used hub is handed out again
        let placed = vec![
            Fragment::new(0, first.hub_id.clone()),
            Fragment::new(1, second.hub_id.clone()),
        ];
        let hub = select_hub(&core, &source.hub_id, &placed, 1024, &HashSet::new())
            .await
            .expect("relaxed hub available");
        assert_ne!(hub.hub_id, source.hub_id);
    }

    #[tokio::test]
    async fn explicit_exclusions_survive_relaxation() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "source", 1 << 40).await;
        let only = testing::register_hub(&core, "only", 1 << 40).await;

        let mut excluded = HashSet::new();
        excluded.insert(only.hub_id.clone());
        let placed = vec![Fragment::new(0, only.hub_id.clone())];
        let result = select_hub(&core, &source.hub_id, &placed, 1024, &excluded).await;
        assert!(matches!(result, Err(CoreError::NoStorageLocation)));
    }

    #[tokio::test]
    async fn honors_capacity_filter() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "source", 1 << 40).await;
        let _small = testing::register_hub(&core, "small", 100).await;
        let big = testing::register_hub(&core, "big", 1 << 40).await;

        for _ in 0..20 {
            let hub = select_hub(&core, &source.hub_id, &[], 4096, &HashSet::new())
                .await
                .expect("big hub qualifies");
            assert_eq!(hub.hub_id, big.hub_id);
        }
        // nothing clears the bar at all
        let result = select_hub(&core, &source.hub_id, &[], 1 << 50, &HashSet::new()).await;
        assert!(matches!(result, Err(CoreError::NoStorageLocation)));
    }

    #[tokio::test]
    async fn fails_without_any_candidate() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "source", 1 << 40).await;
        let result = select_hub(
            &core,
            &source.hub_id,
            &[],
            1024,
            &HashSet::<HubId>::new(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::NoStorageLocation)));
    }
}
