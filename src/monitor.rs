//! One pass over the auto-upload folders. Each feed folder keeps a
//! `last_processed_timestamps.json` of file name to modification time, and
//! only new or modified spreadsheets are imported.

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use crate::{
    cli::{import_inventory_file, import_material_details_file, import_order_models_file, CliError},
    config::Config,
    database::Database,
    excel::is_spreadsheet_name,
    sync::{ImportSummary, DEFAULT_DETAILS_QTY_COLUMN},
};

pub const TIMESTAMP_FILE: &str = "last_processed_timestamps.json";

/// Folders are processed in this order so material details always find the
/// order scopes they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    OrderModels,
    MaterialDetails,
    Inventory,
}

impl Feed {
    pub const ALL: [Feed; 3] = [Feed::OrderModels, Feed::MaterialDetails, Feed::Inventory];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Feed::OrderModels => "order_models",
            Feed::MaterialDetails => "material_details",
            Feed::Inventory => "inventory",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Feed::OrderModels => "Order & Model",
            Feed::MaterialDetails => "Material Details",
            Feed::Inventory => "Inventory",
        }
    }
}

pub type Timestamps = BTreeMap<String, f64>;

pub fn load_timestamps(dir: &Path) -> Timestamps {
    fs::read_to_string(dir.join(TIMESTAMP_FILE))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

pub fn save_timestamps(dir: &Path, timestamps: &Timestamps) -> io::Result<()> {
    let json = serde_json::to_string_pretty(timestamps).map_err(io::Error::other)?;
    fs::write(dir.join(TIMESTAMP_FILE), json)
}

fn modified_secs(path: &Path) -> io::Result<f64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default())
}

/// What one folder pass has to do.
#[derive(Debug, Default, PartialEq)]
pub struct Scan {
    /// New or modified spreadsheets with their current modification time.
    pub changed: Vec<(String, PathBuf, f64)>,
    /// Recorded files that no longer exist.
    pub removed: Vec<String>,
}

pub fn scan(dir: &Path, timestamps: &Timestamps) -> io::Result<Scan> {
    let mut scan = Scan::default();
    let mut present = Vec::new();

    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_spreadsheet_name(&name) {
            if name != TIMESTAMP_FILE {
                log::debug!("skipping non-Excel file: {}", name);
            }
            continue;
        }
        let path = entry.path();
        let mtime = modified_secs(&path)?;
        present.push(name.clone());
        match timestamps.get(&name) {
            Some(seen) if mtime <= *seen => log::debug!("no change detected for {}", name),
            _ => scan.changed.push((name, path, mtime)),
        }
    }

    scan.removed = timestamps
        .keys()
        .filter(|name| !present.contains(name))
        .cloned()
        .collect();
    Ok(scan)
}

async fn import(db: &Database, config: &Config, feed: Feed, path: &Path) -> Result<ImportSummary, CliError> {
    match feed {
        Feed::OrderModels => import_order_models_file(db, path).await,
        Feed::MaterialDetails => import_material_details_file(db, config, path, DEFAULT_DETAILS_QTY_COLUMN).await,
        Feed::Inventory => import_inventory_file(db, path).await,
    }
}

/// Processes one feed folder. A file that fails to import is logged and
/// retried on the next pass; the rest of the folder still runs.
pub async fn run_feed(db: &Database, config: &Config, feed: Feed) -> io::Result<()> {
    let dir = config.auto_upload_dir.join(feed.dir_name());
    fs::create_dir_all(&dir)?;
    log::info!("running {} monitor on {}", feed.label(), dir.display());

    let mut timestamps = load_timestamps(&dir);
    let scan = scan(&dir, &timestamps)?;

    for (name, path, mtime) in scan.changed {
        log::info!("detected change in {}, importing", name);
        match import(db, config, feed, &path).await {
            Ok(summary) => {
                log::info!("processed {}: {}", name, summary.describe());
                timestamps.insert(name, mtime);
            }
            Err(e) => log::error!("error while processing {}: {}", name, e),
        }
    }
    for name in scan.removed {
        log::info!("removing timestamp for deleted file: {}", name);
        timestamps.remove(&name);
    }

    save_timestamps(&dir, &timestamps)
}

pub async fn run_once(db: &Database, config: &Config) {
    for feed in Feed::ALL {
        if let Err(e) = run_feed(db, config, feed).await {
            log::error!("{} monitor failed: {}", feed.label(), e);
        }
    }
    log::info!("all monitors finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_round_trip_through_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_timestamps(dir.path()).is_empty());

        let mut timestamps = Timestamps::new();
        timestamps.insert("訂單.xlsx".into(), 1_700_000_000.5);
        save_timestamps(dir.path(), &timestamps).unwrap();
        assert_eq!(load_timestamps(dir.path()), timestamps);
    }

    #[test]
    fn test_corrupt_timestamp_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TIMESTAMP_FILE), "{not json").unwrap();
        assert!(load_timestamps(dir.path()).is_empty());
    }

    #[test]
    fn test_scan_picks_new_and_modified_spreadsheets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xlsx"), b"a").unwrap();
        fs::write(dir.path().join("b.xls"), b"b").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        let a_mtime = modified_secs(&dir.path().join("a.xlsx")).unwrap();

        let mut timestamps = Timestamps::new();
        timestamps.insert("a.xlsx".into(), a_mtime);
        timestamps.insert("gone.xlsx".into(), 1.0);

        let scan = scan(dir.path(), &timestamps).unwrap();
        let changed: Vec<&str> = scan.changed.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(changed, vec!["b.xls"]);
        assert_eq!(scan.removed, vec!["gone.xlsx".to_string()]);
    }

    #[test]
    fn test_older_record_counts_as_modified() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xlsx"), b"a").unwrap();
        let mut timestamps = Timestamps::new();
        timestamps.insert("a.xlsx".into(), 0.0);
        let scan = scan(dir.path(), &timestamps).unwrap();
        assert_eq!(scan.changed.len(), 1);
        assert!(scan.removed.is_empty());
    }

    #[test]
    fn test_feed_order() {
        let dirs: Vec<&str> = Feed::ALL.iter().map(Feed::dir_name).collect();
        assert_eq!(dirs, vec!["order_models", "material_details", "inventory"]);
    }
}
