//! Periodic verification sweeps. `All` walks every file; `Random` samples
//! a fraction through the catalog's uniform sampler. Failing files are
//! logged and reported; scheduling their repair is someone else's job.

use cumulus_structs::id::FileId;

use crate::Core;
use crate::catalog;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Download every fragment and check its content digest.
    Full,
    /// Compare the hubs' own digests against the catalog.
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyScope {
    All,
    Random(f64),
}

#[derive(Debug, Default, serde::Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub failed: Vec<FileId>,
}

pub async fn verify_files(
    core: &Core,
    mode: VerifyMode,
    scope: VerifyScope,
) -> Result<VerifyReport, CoreError> {
    let file_ids = match scope {
        VerifyScope::All => catalog::all_file_ids(core).await?,
        VerifyScope::Random(fraction) => catalog::sample_file_ids(core, fraction).await?,
    };

    let mut report = VerifyReport::default();
    for file_id in file_ids {
        let mut file = catalog::load_file(core, &file_id).await?;
        let clean = match mode {
            VerifyMode::Full => file.verify_full(core).await?,
            VerifyMode::Hash => file.verify_hash(core).await?,
        };
        report.checked += 1;
        if !clean {
            tracing::debug!(
                %file_id,
                source = %file.source,
                collection = %file.collection,
                filename = %file.filename,
                "{mode:?} check failed"
            );
            report.failed.push(file_id);
        }
    }
    tracing::info!(
        checked = report.checked,
        files_to_reconstruct = report.failed.len(),
        "verification sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use cumulus_structs::encoding::Encoding;

    use super::{VerifyMode, VerifyScope, verify_files};
    use crate::file::store_file;
    use crate::testing::{self, MemoryHub};

    #[tokio::test]
    async fn random_scope_with_full_fraction_checks_everything() {
        let (core, _guard) = testing::test_core().await;
        let source = testing::register_hub(&core, "H1", 1 << 40).await;
        for reference in ["H2", "H3", "H4"] {
            testing::add_live_hub(&core, reference, MemoryHub::new(1 << 40), 1 << 40).await;
        }
        for name in ["a", "b", "c"] {
            store_file(
                &core,
                &source.hub_id,
                "c",
                name,
                name.as_bytes(),
                &Encoding::new("rs_vand", 2, 1),
            )
            .await
            .expect("store");
        }

        let report = verify_files(&core, VerifyMode::Hash, VerifyScope::Random(1.0))
            .await
            .expect("sweep");
        assert_eq!(report.checked, 3);
        assert!(report.failed.is_empty());
    }
}
