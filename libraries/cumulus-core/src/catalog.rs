//! Runtime accessors for the catalog database. The catalog is the ordering
//! authority for files and fragments: fragment rows are only ever written
//! in the same transaction as their owning file row.

use std::collections::HashSet;
use std::str::FromStr;

use cumulus_crypt::hash::Hash;
use cumulus_structs::encoding::Encoding;
use cumulus_structs::id::{FileId, FragId, HubId};
use cumulus_structs::timestamp::Timestamp;
use smol_str::SmolStr;
use sqlx::Row;
use url::Url;

use crate::error::CoreError;
use crate::file::File;
use crate::fragment::Fragment;
use crate::orphan::Orphan;
use crate::Core;

/// A storage hub known to the catalog. `available_bytes` mirrors the most
/// recent figure reported by the hub itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Hub {
    pub hub_id: HubId,
    pub reference: SmolStr,
    pub endpoint: Url,
    pub available_bytes: u64,
}

/// Exactly one result, or a typed cardinality error.
pub(crate) fn one<T>(mut items: Vec<T>) -> Result<T, CoreError> {
    match items.len() {
        0 => Err(CoreError::DoesNotExist),
        1 => Ok(items.remove(0)),
        _ => Err(CoreError::MultipleFound),
    }
}

fn parse<T: FromStr>(value: &str, what: &str) -> Result<T, CoreError> {
    value
        .parse::<T>()
        .map_err(|_| CoreError::InvalidRecord(format!("bad {what}: {value}")))
}

// ---------------------------------------------------------------- hubs

pub async fn insert_hub(core: &Core, hub: &Hub) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO hubs (hub_id, reference, endpoint, available_bytes) VALUES (?, ?, ?, ?)",
    )
    .bind(hub.hub_id.as_str())
    .bind(hub.reference.as_str())
    .bind(hub.endpoint.as_str())
    .bind(hub.available_bytes as i64)
    .execute(core.catalog())
    .await?;
    Ok(())
}

pub async fn get_hub(core: &Core, hub_id: &HubId) -> Result<Hub, CoreError> {
    let row = sqlx::query_as::<_, (String, String, String, i64)>(
        "SELECT hub_id, reference, endpoint, available_bytes FROM hubs WHERE hub_id = ?",
    )
    .bind(hub_id.as_str())
    .fetch_optional(core.catalog())
    .await?;
    row.map(hub_from_row).transpose()?.ok_or(CoreError::DoesNotExist)
}

pub async fn list_hubs(core: &Core) -> Result<Vec<Hub>, CoreError> {
    let rows = sqlx::query_as::<_, (String, String, String, i64)>(
        "SELECT hub_id, reference, endpoint, available_bytes FROM hubs ORDER BY hub_id",
    )
    .fetch_all(core.catalog())
    .await?;
    rows.into_iter().map(hub_from_row).collect()
}

/// Record the capacity a hub just reported about itself.
pub(crate) async fn update_hub_capacity(
    core: &Core,
    hub_id: &HubId,
    available_bytes: u64,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE hubs SET available_bytes = ? WHERE hub_id = ?")
        .bind(available_bytes as i64)
        .bind(hub_id.as_str())
        .execute(core.catalog())
        .await?;
    Ok(())
}

/// Hubs that could hold a fragment of `required_bytes`: not excluded and
/// with more than the required space left by their own last report.
pub(crate) async fn candidate_hubs(
    core: &Core,
    exclude: &HashSet<HubId>,
    required_bytes: u64,
) -> Result<Vec<Hub>, CoreError> {
    let sql = if exclude.is_empty() {
        "SELECT hub_id, reference, endpoint, available_bytes FROM hubs \
         WHERE available_bytes > ?"
            .to_owned()
    } else {
        let placeholders = vec!["?"; exclude.len()].join(", ");
        format!(
            "SELECT hub_id, reference, endpoint, available_bytes FROM hubs \
             WHERE available_bytes > ? AND hub_id NOT IN ({placeholders})"
        )
    };
    let mut query = sqlx::query_as::<_, (String, String, String, i64)>(&sql)
        .bind(required_bytes as i64);
    for hub_id in exclude {
        query = query.bind(hub_id.as_str().to_owned());
    }
    let rows = query.fetch_all(core.catalog()).await?;
    rows.into_iter().map(hub_from_row).collect()
}

fn hub_from_row(row: (String, String, String, i64)) -> Result<Hub, CoreError> {
    let (hub_id, reference, endpoint, available_bytes) = row;
    Ok(Hub {
        hub_id: parse(&hub_id, "hub id")?,
        reference: SmolStr::new(reference),
        endpoint: Url::parse(&endpoint)
            .map_err(|_| CoreError::InvalidRecord(format!("bad endpoint: {endpoint}")))?,
        available_bytes: available_bytes.max(0) as u64,
    })
}

// --------------------------------------------------------------- files

type FileRow = (
    String,         // file_id
    i64,            // created_at
    String,         // source_hub
    String,         // collection
    String,         // filename
    Option<String>, // hash
    Option<i64>,    // size
    String,         // enc_name
    i64,            // enc_k
    i64,            // enc_m
);

const FILE_COLUMNS: &str =
    "file_id, created_at, source_hub, collection, filename, hash, size, enc_name, enc_k, enc_m";

pub async fn find_file(
    core: &Core,
    source: &HubId,
    collection: &str,
    filename: &str,
) -> Result<Option<File>, CoreError> {
    let rows = sqlx::query_as::<_, FileRow>(&format!(
        "SELECT {FILE_COLUMNS} FROM files \
         WHERE source_hub = ? AND collection = ? AND filename = ?"
    ))
    .bind(source.as_str())
    .bind(collection)
    .bind(filename)
    .fetch_all(core.catalog())
    .await?;
    match one(rows) {
        Ok(row) => Ok(Some(load_file_from_row(core, row).await?)),
        Err(CoreError::DoesNotExist) => Ok(None),
        Err(err) => Err(err),
    }
}

pub async fn load_file(core: &Core, file_id: &FileId) -> Result<File, CoreError> {
    let row = sqlx::query_as::<_, FileRow>(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE file_id = ?"
    ))
    .bind(file_id.as_str())
    .fetch_optional(core.catalog())
    .await?
    .ok_or(CoreError::DoesNotExist)?;
    load_file_from_row(core, row).await
}

pub async fn list_files(core: &Core, source: Option<&HubId>) -> Result<Vec<File>, CoreError> {
    let rows = match source {
        Some(source) => {
            sqlx::query_as::<_, FileRow>(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE source_hub = ? ORDER BY created_at"
            ))
            .bind(source.as_str())
            .fetch_all(core.catalog())
            .await?
        }
        None => {
            sqlx::query_as::<_, FileRow>(&format!(
                "SELECT {FILE_COLUMNS} FROM files ORDER BY created_at"
            ))
            .fetch_all(core.catalog())
            .await?
        }
    };
    let mut files = Vec::with_capacity(rows.len());
    for row in rows {
        files.push(load_file_from_row(core, row).await?);
    }
    Ok(files)
}

async fn load_file_from_row(core: &Core, row: FileRow) -> Result<File, CoreError> {
    let (file_id, created_at, source, collection, filename, hash, size, enc_name, enc_k, enc_m) =
        row;
    let file_id: FileId = parse(&file_id, "file id")?;
    let fragments = load_fragments(core, &file_id).await?;
    Ok(File {
        file_id,
        created_at: Timestamp(created_at.max(0) as u64),
        source: parse(&source, "hub id")?,
        collection: SmolStr::new(collection),
        filename: SmolStr::new(filename),
        hash: hash.as_deref().map(|h| parse::<Hash>(h, "file hash")).transpose()?,
        size: size.map(|s| s.max(0) as u64),
        encoding: Encoding::new(enc_name, enc_k.max(0) as u16, enc_m.max(0) as u16),
        fragments,
    })
}

async fn load_fragments(core: &Core, file_id: &FileId) -> Result<Vec<Fragment>, CoreError> {
    let rows = sqlx::query_as::<_, (String, i64, i64, String, String, i64)>(
        "SELECT frag_id, created_at, idx, remote_hub, hash, is_clean \
         FROM fragments WHERE file_id = ? ORDER BY idx",
    )
    .bind(file_id.as_str())
    .fetch_all(core.catalog())
    .await?;
    rows.into_iter()
        .map(|(frag_id, created_at, idx, remote, hash, is_clean)| {
            Ok(Fragment {
                frag_id: parse(&frag_id, "fragment id")?,
                created_at: Timestamp(created_at.max(0) as u64),
                index: idx.max(0) as u16,
                remote: parse(&remote, "hub id")?,
                hash: parse(&hash, "fragment hash")?,
                is_clean: is_clean != 0,
            })
        })
        .collect()
}

/// Commit a file together with its fragment set, atomically replacing any
/// previous fragments and recording the given orphans in the same
/// transaction.
pub(crate) async fn commit_file_replace(
    core: &Core,
    file: &File,
    orphans: &[Orphan],
) -> Result<(), CoreError> {
    let mut tx = core.catalog().begin().await?;
    sqlx::query(
        "INSERT INTO files \
           (file_id, created_at, source_hub, collection, filename, hash, size, \
            enc_name, enc_k, enc_m) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (file_id) DO UPDATE SET hash = excluded.hash, size = excluded.size",
    )
    .bind(file.file_id.as_str())
    .bind(file.created_at.0 as i64)
    .bind(file.source.as_str())
    .bind(file.collection.as_str())
    .bind(file.filename.as_str())
    .bind(file.hash.map(|h| h.to_string()))
    .bind(file.size.map(|s| s as i64))
    .bind(file.encoding.name.as_str())
    .bind(i64::from(file.encoding.k))
    .bind(i64::from(file.encoding.m))
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM fragments WHERE file_id = ?")
        .bind(file.file_id.as_str())
        .execute(&mut *tx)
        .await?;
    for fragment in &file.fragments {
        sqlx::query(
            "INSERT INTO fragments \
               (frag_id, file_id, idx, created_at, remote_hub, hash, is_clean) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fragment.frag_id.as_str())
        .bind(file.file_id.as_str())
        .bind(i64::from(fragment.index))
        .bind(fragment.created_at.0 as i64)
        .bind(fragment.remote.as_str())
        .bind(fragment.hash.to_string())
        .bind(fragment.is_clean)
        .execute(&mut *tx)
        .await?;
    }
    insert_orphans_tx(&mut tx, orphans).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn set_fragment_clean(
    core: &Core,
    frag_id: &FragId,
    is_clean: bool,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE fragments SET is_clean = ? WHERE frag_id = ?")
        .bind(is_clean)
        .bind(frag_id.as_str())
        .execute(core.catalog())
        .await?;
    Ok(())
}

pub(crate) async fn update_fragment(core: &Core, fragment: &Fragment) -> Result<(), CoreError> {
    sqlx::query("UPDATE fragments SET hash = ?, is_clean = ? WHERE frag_id = ?")
        .bind(fragment.hash.to_string())
        .bind(fragment.is_clean)
        .bind(fragment.frag_id.as_str())
        .execute(core.catalog())
        .await?;
    Ok(())
}

/// Delete a file's catalog record, demoting its fragments to the given
/// orphans in the same transaction.
pub(crate) async fn remove_file(
    core: &Core,
    file_id: &FileId,
    orphans: &[Orphan],
) -> Result<(), CoreError> {
    let mut tx = core.catalog().begin().await?;
    sqlx::query("DELETE FROM fragments WHERE file_id = ?")
        .bind(file_id.as_str())
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
        .bind(file_id.as_str())
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::DoesNotExist);
    }
    insert_orphans_tx(&mut tx, orphans).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn files_with_dirty_fragments(core: &Core) -> Result<Vec<FileId>, CoreError> {
    let rows = sqlx::query(
        "SELECT DISTINCT file_id FROM fragments WHERE is_clean = 0 ORDER BY file_id",
    )
    .fetch_all(core.catalog())
    .await?;
    rows.into_iter()
        .map(|row| parse(&row.get::<String, _>(0), "file id"))
        .collect()
}

pub(crate) async fn all_file_ids(core: &Core) -> Result<Vec<FileId>, CoreError> {
    let rows = sqlx::query("SELECT file_id FROM files ORDER BY created_at")
        .fetch_all(core.catalog())
        .await?;
    rows.into_iter()
        .map(|row| parse(&row.get::<String, _>(0), "file id"))
        .collect()
}

/// Uniform sample of roughly `fraction` of all files, via the database's
/// own randomness.
pub(crate) async fn sample_file_ids(core: &Core, fraction: f64) -> Result<Vec<FileId>, CoreError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(core.catalog())
        .await?;
    let limit = ((total as f64) * fraction) as i64;
    let rows = sqlx::query("SELECT file_id FROM files ORDER BY RANDOM() LIMIT ?")
        .bind(limit)
        .fetch_all(core.catalog())
        .await?;
    rows.into_iter()
        .map(|row| parse(&row.get::<String, _>(0), "file id"))
        .collect()
}

// ------------------------------------------------------------- orphans

pub(crate) async fn insert_orphans(core: &Core, orphans: &[Orphan]) -> Result<(), CoreError> {
    let mut tx = core.catalog().begin().await?;
    insert_orphans_tx(&mut tx, orphans).await?;
    tx.commit().await?;
    Ok(())
}

async fn insert_orphans_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    orphans: &[Orphan],
) -> Result<(), CoreError> {
    for orphan in orphans {
        sqlx::query(
            "INSERT INTO orphans \
               (frag_id, file_id, idx, created_at, orphaned_at, remote_hub, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(orphan.frag_id.as_str())
        .bind(orphan.file_id.as_str())
        .bind(i64::from(orphan.index))
        .bind(orphan.created_at.0 as i64)
        .bind(orphan.orphaned_at.0 as i64)
        .bind(orphan.remote.as_str())
        .bind(orphan.hash.to_string())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn list_orphans(core: &Core) -> Result<Vec<Orphan>, CoreError> {
    let rows = sqlx::query_as::<_, (String, String, i64, i64, i64, String, String)>(
        "SELECT frag_id, file_id, idx, created_at, orphaned_at, remote_hub, hash \
         FROM orphans ORDER BY orphaned_at",
    )
    .fetch_all(core.catalog())
    .await?;
    rows.into_iter()
        .map(|(frag_id, file_id, idx, created_at, orphaned_at, remote, hash)| {
            Ok(Orphan {
                frag_id: parse(&frag_id, "fragment id")?,
                file_id: parse(&file_id, "file id")?,
                index: idx.max(0) as u16,
                created_at: Timestamp(created_at.max(0) as u64),
                orphaned_at: Timestamp(orphaned_at.max(0) as u64),
                remote: parse(&remote, "hub id")?,
                hash: parse(&hash, "fragment hash")?,
            })
        })
        .collect()
}

pub(crate) async fn delete_orphan(core: &Core, frag_id: &FragId) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM orphans WHERE frag_id = ?")
        .bind(frag_id.as_str())
        .execute(core.catalog())
        .await?;
    Ok(())
}
