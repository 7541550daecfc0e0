//! Upload orchestration.
//!
//! Loads activities from a directory of watch files, tags the ones the
//! ledger already knows, and uploads the rest one at a time. Batch uploads
//! stop issuing work as soon as the cancel flag is set; the ledger then
//! holds exactly the ids whose upload succeeded.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::ledger::SyncLedger;
use crate::providers::{ActivityListProvider, KeyValueStore, UploadProvider, UploadRequest};
use crate::raw::RawFile;
use crate::reconcile::parse_activity_with_id;
use crate::{gpx, ActivityRecord, SyncConfig};

/// File extensions recognised as watch exports.
const ACTIVITY_EXTENSIONS: [&str; 2] = ["json", "txt"];

/// What happened to one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Already synced, nothing sent
    Skipped,
    Uploaded,
    /// Uploaded, but the ledger could not record it
    UploadedUnrecorded,
}

/// Per-activity results of a batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<(String, Result<UploadOutcome>)>,
    /// Set when the batch stopped early
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&self, outcome: UploadOutcome) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| r.as_ref().is_ok_and(|o| *o == outcome))
            .count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(UploadOutcome::Uploaded) + self.count(UploadOutcome::UploadedUnrecorded)
    }

    pub fn skipped(&self) -> usize {
        self.count(UploadOutcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Activities parsed from a directory plus the files that failed.
#[derive(Debug, Default)]
pub struct LoadedActivities {
    pub activities: Vec<ActivityRecord>,
    pub failures: Vec<(PathBuf, SyncError)>,
}

// ============================================================================
// Upload
// ============================================================================

/// Upload one activity unless it is already synced.
///
/// On success the activity is marked synced and its id recorded in the
/// ledger. A failed upload leaves both untouched.
pub async fn upload_activity<S: KeyValueStore>(
    activity: &mut ActivityRecord,
    uploader: &dyn UploadProvider,
    ledger: &SyncLedger<S>,
    config: &SyncConfig,
) -> Result<UploadOutcome> {
    if activity.is_synced {
        debug!("[Sync] '{}' already synced, skipping", activity.id);
        return Ok(UploadOutcome::Skipped);
    }
    if activity.id.is_empty() {
        return Err(SyncError::Upload {
            activity_id: String::new(),
            message: "activity has no id".to_string(),
        });
    }

    let document = gpx::encode(activity, config)?;
    let request = UploadRequest {
        name: activity.sport_type.activity_name().to_string(),
        external_id: activity.id.clone(),
        activity_type: activity.sport_type.strava_activity_type().to_string(),
    };

    uploader
        .upload(document.into_bytes(), &request)
        .await
        .map_err(|e| SyncError::Upload {
            activity_id: activity.id.clone(),
            message: e.to_string(),
        })?;

    activity.mark_synced();
    match ledger.mark_synced(&activity.id).await {
        Ok(()) => {
            info!("[Sync] Uploaded '{}'", activity.id);
            Ok(UploadOutcome::Uploaded)
        }
        Err(e) => {
            error!("[Sync] Uploaded '{}' but could not record it: {}", activity.id, e);
            Ok(UploadOutcome::UploadedUnrecorded)
        }
    }
}

/// Upload a batch sequentially.
///
/// Ids already in the ledger are tagged first and skipped. `cancel` is
/// checked before each activity.
pub async fn upload_activities<S: KeyValueStore>(
    activities: &mut [ActivityRecord],
    uploader: &dyn UploadProvider,
    remote: &dyn ActivityListProvider,
    ledger: &SyncLedger<S>,
    config: &SyncConfig,
    cancel: &AtomicBool,
) -> BatchReport {
    let synced = ledger.synced_ids(remote).await;
    annotate_synced(activities, &synced);

    let total = activities.len();
    let mut report = BatchReport::default();
    for activity in activities.iter_mut() {
        if cancel.load(Ordering::Relaxed) {
            warn!(
                "[Sync] Cancelled with {} of {} activities processed",
                report.results.len(),
                total
            );
            report.cancelled = true;
            break;
        }
        let result = upload_activity(activity, uploader, ledger, config).await;
        if let Err(e) = &result {
            warn!("[Sync] '{}' failed: {}", activity.id, e);
        }
        report.results.push((activity.id.clone(), result));
    }

    info!(
        "[Sync] Batch done: {} uploaded, {} skipped, {} failed",
        report.uploaded(),
        report.skipped(),
        report.failed()
    );
    report
}

/// Set `is_synced` on every activity whose id is in `ids`. Never clears it.
pub fn annotate_synced(activities: &mut [ActivityRecord], ids: &BTreeSet<String>) {
    for activity in activities.iter_mut().filter(|a| ids.contains(&a.id)) {
        activity.mark_synced();
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Watch files in `dir`, sorted by path. Not recursive.
pub fn discover_activity_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| SyncError::InvalidFile {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ACTIVITY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parse one watch file; its id is the file stem.
pub fn load_activity(path: &Path, config: &SyncConfig) -> Result<ActivityRecord> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SyncError::InvalidFile {
            path: path.display().to_string(),
            message: "file name is not valid UTF-8".to_string(),
        })?;
    let raw = RawFile::load(path)?;
    parse_activity_with_id(id, &raw, config).map_err(|e| match e {
        SyncError::MissingData { .. } => e,
        SyncError::InvalidFile { message, .. } => SyncError::InvalidFile {
            path: path.display().to_string(),
            message,
        },
        other => SyncError::InvalidFile {
            path: path.display().to_string(),
            message: other.to_string(),
        },
    })
}

/// Parse every watch file in `dir`. Files that fail are reported, not fatal.
pub fn load_activities(dir: &Path, config: &SyncConfig) -> Result<LoadedActivities> {
    let files = discover_activity_files(dir)?;
    let mut loaded = LoadedActivities::default();

    for path in files {
        match load_activity(&path, config) {
            Ok(activity) => loaded.activities.push(activity),
            Err(e) => {
                warn!("[Sync] Skipping {}: {}", path.display(), e);
                loaded.failures.push((path, e));
            }
        }
    }

    info!(
        "[Sync] Loaded {} activities from {} ({} failed)",
        loaded.activities.len(),
        dir.display(),
        loaded.failures.len()
    );
    Ok(loaded)
}

/// Encode every activity to GPX, in input order.
pub fn prepare_gpx(activities: &[ActivityRecord], config: &SyncConfig) -> Vec<Result<String>> {
    activities.iter().map(|a| gpx::encode(a, config)).collect()
}

/// Parallel version of [`prepare_gpx`].
#[cfg(feature = "parallel")]
pub fn prepare_gpx_parallel(activities: &[ActivityRecord], config: &SyncConfig) -> Vec<Result<String>> {
    use rayon::prelude::*;

    activities.par_iter().map(|a| gpx::encode(a, config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{FakeRemote, FlakyStore, RecordingUploader};
    use crate::store::MemoryStore;
    use crate::{GpsPoint, SportType, Waypoint};

    fn activity(id: &str) -> ActivityRecord {
        let waypoints = vec![
            Waypoint {
                latitude: 60.0,
                longitude: 24.0,
                timestamp: 1_635_700_800_000,
                elevation: 5.0,
                heart_rate: 140.0,
                cadence: 80.0,
            },
            Waypoint {
                latitude: 60.001,
                longitude: 24.0,
                timestamp: 1_635_700_830_000,
                elevation: 6.0,
                heart_rate: 141.0,
                cadence: 81.0,
            },
        ];
        ActivityRecord {
            id: id.to_string(),
            start_time: 1_635_700_800_000,
            total_time: 30,
            sport_type: SportType::Running,
            total_distance: 111.0,
            avg_speed: 270.0,
            avg_heart_rate: 140.0,
            avg_cadence: 160.0,
            start_point: GpsPoint::new(60.0, 24.0),
            first_fix: GpsPoint::new(60.0, 24.0),
            start_time_gps: 1_635_700_800_000,
            avg_heart_rate_during_gap: 0.0,
            lead_in_points: 0,
            is_synced: false,
            waypoints,
        }
    }

    fn ledger<S: KeyValueStore>(store: S) -> SyncLedger<S> {
        SyncLedger::new(store, &SyncConfig::default())
    }

    #[tokio::test]
    async fn test_upload_marks_synced() {
        let uploader = RecordingUploader::default();
        let ledger = ledger(MemoryStore::new());
        let remote = FakeRemote::default();
        let mut run = activity("run-1");

        let outcome = upload_activity(&mut run, &uploader, &ledger, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Uploaded);
        assert!(run.is_synced);
        assert!(ledger.is_synced("run-1", &remote).await);

        let uploads = uploader.uploads.lock().unwrap();
        let (request, body) = &uploads[0];
        assert_eq!(request.external_id, "run-1");
        assert_eq!(request.name, "Run");
        assert_eq!(request.activity_type, "run");
        assert!(String::from_utf8_lossy(body).contains("<trkpt"));
    }

    #[tokio::test]
    async fn test_upload_skips_synced() {
        let uploader = RecordingUploader::default();
        let ledger = ledger(MemoryStore::new());
        let mut run = activity("run-1");
        run.mark_synced();

        let outcome = upload_activity(&mut run, &uploader, &ledger, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Skipped);
        assert!(uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_flag() {
        let uploader = RecordingUploader {
            reject: vec!["run-1".to_string()],
            ..Default::default()
        };
        let ledger = ledger(MemoryStore::new());
        let remote = FakeRemote::default();
        let mut run = activity("run-1");

        let err = upload_activity(&mut run, &uploader, &ledger, &SyncConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upload { ref activity_id, .. } if activity_id == "run-1"));
        assert!(!run.is_synced);
        assert!(!ledger.is_synced("run-1", &remote).await);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_reports_unrecorded() {
        let uploader = RecordingUploader::default();
        let store = FlakyStore::default();
        *store.fail_writes.lock().unwrap() = true;
        let ledger = ledger(store);
        let mut run = activity("run-1");

        let outcome = upload_activity(&mut run, &uploader, &ledger, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::UploadedUnrecorded);
        assert!(run.is_synced);
    }

    #[tokio::test]
    async fn test_unreadable_ledger_does_not_reupload_remote_activities() {
        let uploader = RecordingUploader::default();
        let remote = FakeRemote::with_ids(&["a"]);
        let store = FlakyStore::default();
        *store.fail_reads.lock().unwrap() = true;
        let ledger = ledger(store);
        let mut batch = vec![activity("a")];

        let report = upload_activities(
            &mut batch,
            &uploader,
            &remote,
            &ledger,
            &SyncConfig::default(),
            &AtomicBool::new(false),
        )
        .await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.uploaded(), 0);
        assert!(batch[0].is_synced);
        assert!(uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_records_only_successes() {
        let uploader = RecordingUploader {
            reject: vec!["b".to_string()],
            ..Default::default()
        };
        let remote = FakeRemote::with_ids(&["c.gpx"]);
        let ledger = ledger(MemoryStore::new());
        let mut batch = vec![activity("a"), activity("b"), activity("c"), activity("d")];

        let report = upload_activities(
            &mut batch,
            &uploader,
            &remote,
            &ledger,
            &SyncConfig::default(),
            &AtomicBool::new(false),
        )
        .await;

        assert!(!report.cancelled);
        assert_eq!(report.uploaded(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        let synced: Vec<bool> = batch.iter().map(|a| a.is_synced).collect();
        assert_eq!(synced, vec![true, false, true, true]);

        let expected: BTreeSet<String> = ["a", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ledger.synced_ids(&remote).await, expected);
    }

    #[tokio::test]
    async fn test_batch_honours_cancel() {
        let uploader = RecordingUploader::default();
        let remote = FakeRemote::default();
        let ledger = ledger(MemoryStore::new());
        let mut batch = vec![activity("a"), activity("b")];

        let report = upload_activities(
            &mut batch,
            &uploader,
            &remote,
            &ledger,
            &SyncConfig::default(),
            &AtomicBool::new(true),
        )
        .await;

        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert!(uploader.uploads.lock().unwrap().is_empty());
        assert!(ledger.synced_ids(&remote).await.is_empty());
    }

    #[test]
    fn test_annotate_never_clears() {
        let mut batch = vec![activity("a"), activity("b")];
        batch[1].mark_synced();
        let ids: BTreeSet<String> = ["a".to_string()].into_iter().collect();

        annotate_synced(&mut batch, &ids);
        assert!(batch[0].is_synced);
        assert!(batch[1].is_synced);
    }

    #[test]
    fn test_discover_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let good = r#"{
            "gpsData": [{ "latitude": 60.1, "longitude": 24.9, "timeStamp": 100 }],
            "detailData": [{ "timeStamp": 100, "heartRate": 150, "frequency": 80, "elevation": 500 }],
            "startTime": 100, "totalTime": 60, "sportType": 1
        }"#;
        let no_gps = r#"{ "gpsData": [], "detailData": [{ "timeStamp": 1 }] }"#;
        fs::write(dir.path().join("b-walk.json"), good).unwrap();
        fs::write(dir.path().join("a-broken.txt"), no_gps).unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let files = discover_activity_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a-broken.txt", "b-walk.json"]);

        let loaded = load_activities(dir.path(), &SyncConfig::default()).unwrap();
        assert_eq!(loaded.activities.len(), 1);
        assert_eq!(loaded.activities[0].id, "b-walk");
        assert_eq!(loaded.activities[0].sport_type, SportType::Walking);
        assert_eq!(loaded.failures.len(), 1);
        assert!(matches!(loaded.failures[0].1, SyncError::MissingData { .. }));
    }

    #[test]
    fn test_load_out_of_range_timestamp_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("far-future.json");
        let content = r#"{
            "gpsData": [{ "latitude": 60.1, "longitude": 24.9, "timeStamp": 100 }],
            "detailData": [{ "timeStamp": 100, "heartRate": 150 }],
            "startTime": 9000000000000000000
        }"#;
        fs::write(&path, content).unwrap();

        match load_activity(&path, &SyncConfig::default()) {
            Err(SyncError::InvalidFile { path: reported, message }) => {
                assert_eq!(reported, path.display().to_string());
                assert!(message.contains("startTime"));
            }
            other => panic!("expected invalid file, got {:?}", other),
        }
    }

    #[test]
    fn test_discover_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_activity_files(&dir.path().join("nope"));
        assert!(matches!(result, Err(SyncError::InvalidFile { .. })));
    }

    #[test]
    fn test_prepare_gpx_keeps_order() {
        let batch = vec![activity("a"), activity("b")];
        let docs = prepare_gpx(&batch, &SyncConfig::default());
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.is_ok()));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_prepare_gpx_parallel_matches_sequential() {
        let batch: Vec<ActivityRecord> = (0..16).map(|i| activity(&format!("run-{}", i))).collect();
        let config = SyncConfig::default();
        assert_eq!(prepare_gpx_parallel(&batch, &config), prepare_gpx(&batch, &config));
    }
}
