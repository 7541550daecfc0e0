//! Contracts for the external collaborators the pipeline talks to.
//!
//! Network-facing collaborators are async and object-safe so callers can
//! hand in `&dyn` adapters (real HTTP clients or in-memory fakes). The
//! key-value store is synchronous: it is local and cheap.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::GpsPoint;

/// Walking directions between two coordinates.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    /// Ordered route geometry as `[longitude, latitude]` pairs.
    async fn route(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<[f64; 2]>>;
}

/// Metadata sent along with an uploaded GPX document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Activity name shown on the platform
    pub name: String,
    /// Ledger id, echoed back by the remote list as `external_id`
    pub external_id: String,
    /// Platform activity type (e.g. "run")
    pub activity_type: String,
}

/// Upload of a finished GPX document.
#[async_trait]
pub trait UploadProvider: Send + Sync {
    async fn upload(&self, gpx: Vec<u8>, request: &UploadRequest) -> Result<()>;
}

/// An activity as listed by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActivity {
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Paginated listing of the athlete's remote activities.
#[async_trait]
pub trait ActivityListProvider: Send + Sync {
    /// `page` starts at 1.
    async fn list_activities(&self, page: u32, per_page: u32) -> Result<Vec<RemoteActivity>>;
}

/// Scoped byte store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory collaborators for unit tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::SyncError;

    /// Straight line from start to end with `steps` segments.
    pub struct LineDirections {
        pub steps: usize,
    }

    #[async_trait]
    impl DirectionsProvider for LineDirections {
        async fn route(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<[f64; 2]>> {
            Ok((0..=self.steps)
                .map(|i| {
                    let f = i as f64 / self.steps as f64;
                    [
                        start.longitude + (end.longitude - start.longitude) * f,
                        start.latitude + (end.latitude - start.latitude) * f,
                    ]
                })
                .collect())
        }
    }

    pub struct FailingDirections;

    #[async_trait]
    impl DirectionsProvider for FailingDirections {
        async fn route(&self, _start: GpsPoint, _end: GpsPoint) -> Result<Vec<[f64; 2]>> {
            Err(SyncError::route("Mapbox API error: NoRoute"))
        }
    }

    pub struct EmptyDirections;

    #[async_trait]
    impl DirectionsProvider for EmptyDirections {
        async fn route(&self, _start: GpsPoint, _end: GpsPoint) -> Result<Vec<[f64; 2]>> {
            Ok(Vec::new())
        }
    }

    pub struct SlowDirections {
        pub delay: Duration,
    }

    #[async_trait]
    impl DirectionsProvider for SlowDirections {
        async fn route(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<[f64; 2]>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![
                [start.longitude, start.latitude],
                [end.longitude, end.latitude],
            ])
        }
    }

    /// Remote list serving fixed ids, counting calls; fails while `fail` is set.
    #[derive(Default)]
    pub struct FakeRemote {
        pub ids: Mutex<Vec<String>>,
        pub fail: Mutex<bool>,
        pub calls: AtomicU32,
    }

    impl FakeRemote {
        pub fn with_ids(ids: &[&str]) -> Self {
            Self {
                ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActivityListProvider for FakeRemote {
        async fn list_activities(&self, page: u32, per_page: u32) -> Result<Vec<RemoteActivity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(SyncError::Http {
                    message: "service unavailable".to_string(),
                    status_code: Some(503),
                });
            }
            let ids = self.ids.lock().unwrap();
            let start = ((page - 1) * per_page) as usize;
            Ok(ids
                .iter()
                .skip(start)
                .take(per_page as usize)
                .map(|id| RemoteActivity {
                    external_id: Some(id.clone()),
                })
                .collect())
        }
    }

    /// Uploader recording requests; ids listed in `reject` fail.
    #[derive(Default)]
    pub struct RecordingUploader {
        pub uploads: Mutex<Vec<(UploadRequest, Vec<u8>)>>,
        pub reject: Vec<String>,
    }

    #[async_trait]
    impl UploadProvider for RecordingUploader {
        async fn upload(&self, gpx: Vec<u8>, request: &UploadRequest) -> Result<()> {
            if self.reject.contains(&request.external_id) {
                return Err(SyncError::Http {
                    message: "duplicate".to_string(),
                    status_code: Some(409),
                });
            }
            self.uploads.lock().unwrap().push((request.clone(), gpx));
            Ok(())
        }
    }

    /// Store whose reads and/or writes fail on demand.
    #[derive(Default)]
    pub struct FlakyStore {
        pub data: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_reads: Mutex<bool>,
        pub fail_writes: Mutex<bool>,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if *self.fail_reads.lock().unwrap() {
                return Err(SyncError::persistence("disk unavailable"));
            }
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if *self.fail_writes.lock().unwrap() {
                return Err(SyncError::persistence("disk full"));
            }
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
