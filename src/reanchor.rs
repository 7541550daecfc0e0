//! Start-point re-anchoring.
//!
//! The user picks a new start location; a synthetic lead-in from that point
//! to the first GPS fix replaces any previous lead-in. Records are never
//! mutated in place: a new record is built and only swapped in on success.

use log::info;

use crate::providers::DirectionsProvider;
use crate::synthesis::synthesize_lead_in;
use crate::{ActivityRecord, GpsPoint, Result, SyncConfig};

/// Build a copy of `activity` whose route starts at `new_start`.
///
/// The recorded tail (everything after the current lead-in) is kept as-is.
/// On error the caller still holds the untouched input.
pub async fn reanchor(
    activity: &ActivityRecord,
    new_start: GpsPoint,
    directions: &dyn DirectionsProvider,
    config: &SyncConfig,
) -> Result<ActivityRecord> {
    let lead_in = synthesize_lead_in(activity, new_start, directions, config).await?;
    let tail = activity.recorded_waypoints();

    let mut anchored = activity.clone();
    anchored.lead_in_points = lead_in.len();
    anchored.waypoints = lead_in;
    anchored.waypoints.extend_from_slice(tail);
    anchored.start_point = new_start;
    anchored.recalculate_distance();

    info!(
        "[Reanchor] Activity '{}' now starts at ({:.5}, {:.5}) with {} synthetic points, {:.0}m total",
        anchored.id, new_start.latitude, new_start.longitude, anchored.lead_in_points, anchored.total_distance
    );
    Ok(anchored)
}

/// An activity being edited, remembering how it looked when loaded.
#[derive(Debug, Clone)]
pub struct ReanchorSession {
    pristine: ActivityRecord,
    current: ActivityRecord,
}

impl ReanchorSession {
    pub fn new(activity: ActivityRecord) -> Self {
        Self {
            current: activity.clone(),
            pristine: activity,
        }
    }

    /// Re-anchor the current record. Failure leaves it unchanged.
    pub async fn reanchor(
        &mut self,
        new_start: GpsPoint,
        directions: &dyn DirectionsProvider,
        config: &SyncConfig,
    ) -> Result<&ActivityRecord> {
        let anchored = reanchor(&self.current, new_start, directions, config).await?;
        self.current = anchored;
        Ok(&self.current)
    }

    /// Discard every re-anchor and return to the loaded record.
    pub fn reset(&mut self) {
        // is_synced never goes back to false
        let synced = self.current.is_synced;
        self.current = self.pristine.clone();
        self.current.is_synced |= synced;
    }

    pub fn is_reanchored(&self) -> bool {
        self.current.waypoints != self.pristine.waypoints || self.current.start_point != self.pristine.start_point
    }

    pub fn current(&self) -> &ActivityRecord {
        &self.current
    }

    /// Mutable access for marking the record synced after an upload.
    pub fn current_mut(&mut self) -> &mut ActivityRecord {
        &mut self.current
    }

    pub fn into_current(self) -> ActivityRecord {
        self.current
    }
}
