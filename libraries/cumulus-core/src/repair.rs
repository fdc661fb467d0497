//! Offline repair sweep: every file carrying a dirty fragment gets its
//! fragments reconstructed from the survivors. A lock file keeps the
//! sweep single-holder across processes.

use crate::Core;
use crate::catalog;
use crate::error::CoreError;

#[derive(Debug, Default, serde::Serialize)]
pub struct RepairReport {
    pub repaired: usize,
    pub failed: usize,
}

pub async fn repair_files(core: &Core) -> Result<RepairReport, CoreError> {
    let lock_path = core.config().repair_lock_path.clone();
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::info!("another file reconstruction is running, aborting");
            return Err(CoreError::RepairLocked);
        }
        Err(err) => return Err(err.into()),
    }
    scopeguard::defer!({
        let _ = std::fs::remove_file(&lock_path);
    });

    tracing::info!("starting file reconstruction");
    let mut report = RepairReport::default();
    for file_id in catalog::files_with_dirty_fragments(core).await? {
        let outcome = async {
            let mut file = catalog::load_file(core, &file_id).await?;
            tracing::debug!(%file_id, "reconstructing");
            file.reconstruct(core).await
        }
        .await;
        match outcome {
            Ok(()) => report.repaired += 1,
            Err(err) => {
                tracing::warn!(%file_id, error = %err, "reconstruction failed");
                report.failed += 1;
            }
        }
    }
    tracing::info!(
        repaired = report.repaired,
        failed = report.failed,
        "finished file reconstruction"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::repair_files;
    use crate::error::CoreError;
    use crate::testing;

    #[tokio::test]
    async fn lock_file_keeps_second_sweep_out() {
        let (core, _guard) = testing::test_core().await;
        let lock_path = core.config().repair_lock_path.clone();
        std::fs::create_dir_all(lock_path.parent().expect("lock dir")).expect("mkdir");
        std::fs::write(&lock_path, b"").expect("hold the lock");
        assert!(matches!(
            repair_files(&core).await,
            Err(CoreError::RepairLocked)
        ));
        std::fs::remove_file(&lock_path).expect("release");
        let report = repair_files(&core).await.expect("sweep with no files");
        assert_eq!(report.repaired, 0);
        // the sweep released its own lock
        assert!(!lock_path.exists());
    }
}
