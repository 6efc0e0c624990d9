//! # Synchronization State Manager
//!
//! Turns directory snapshots into file operations.
//!
//! ## Overview
//!
//! The state manager is a pure state machine: it remembers the last snapshot
//! seen for each side and, for every [`IncomingEvent`], returns the ordered
//! list of [`OutgoingEvent`]s needed to bring both sides together. It performs
//! no I/O.
//!
//! ## Rules
//!
//! Nothing is decided until both sides finished gathering. From then on,
//! files are matched by name:
//!
//! - present on one side only: created on the other side
//! - present on both with different modification dates: the side that changed
//!   since the two last agreed is copied over the other one
//! - changed on both sides since they last agreed: the local copy is kept
//!   under a device-specific name, then the cloud version is written locally
//! - never seen in agreement: the newer copy wins
//! - gone from a side since its previous snapshot: removed from the other side,
//!   unless the other side was edited since they last agreed, in which case the
//!   edited copy is put back
//! - cloud items that are not downloaded yet: downloaded first, written later
//! - cloud items with conflicting versions: resolved, and left alone until
//!   resolved; the rest of the snapshot is handled as usual
//!
//! During the device's initial synchronization, same-named files with
//! different dates only get their local copy duplicated under a new name
//! ([`OutgoingEvent::ResolveInitialSynchronizationConflict`]). Both originals
//! stay as they are and the divergence is accepted until either side changes.
//!
//! Removals in flight are remembered by name until the other side reflects
//! them, so a stale snapshot cannot bring a removed file back. A removal the
//! writer failed to perform is forgotten through
//! [`SynchronizationStateManager::handle_failed_intent`].

use std::collections::{HashMap, HashSet};

use bridge_traits::{CloudContents, CloudMetadataItem, LocalContents, LocalMetadataItem};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::events::{IncomingEvent, OutgoingEvent};

/// Decides which file operations follow from a monitor event.
pub trait SynchronizationStateManager: Send {
    fn resolve_event(&mut self, event: IncomingEvent) -> Vec<OutgoingEvent>;

    /// Called when the writer could not carry out `intent`.
    fn handle_failed_intent(&mut self, intent: &OutgoingEvent);

    /// Forget both snapshots; the next session starts by gathering again.
    fn reset_state(&mut self);
}

/// Modification dates of both copies the last time they were reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Baseline {
    local: DateTime<Utc>,
    cloud: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciliation {
    InSync,
    UpdateCloud,
    UpdateLocal,
    Conflict,
}

#[derive(Debug, Default)]
pub struct DefaultSynchronizationStateManager {
    current_local_contents: LocalContents,
    current_cloud_contents: CloudContents,
    local_contents_gathering_is_finished: bool,
    cloud_contents_gathering_is_finished: bool,
    is_initial_synchronization: bool,
    baselines: HashMap<String, Baseline>,
    /// Names sent for removal from the cloud that the cloud still lists.
    pending_cloud_removals: HashSet<String>,
    /// Names sent for removal from the local directory that it still lists.
    pending_local_removals: HashSet<String>,
}

impl DefaultSynchronizationStateManager {
    pub fn new(is_initial_synchronization: bool) -> Self {
        Self {
            is_initial_synchronization,
            ..Self::default()
        }
    }

    pub fn is_initial_synchronization(&self) -> bool {
        self.is_initial_synchronization
    }

    fn both_sides_gathered(&self) -> bool {
        self.local_contents_gathering_is_finished && self.cloud_contents_gathering_is_finished
    }

    fn resolve_did_finish_gathering(&mut self) -> Vec<OutgoingEvent> {
        if !self.both_sides_gathered() {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.is_initial_synchronization {
            events.extend(self.initial_synchronization_conflicts());
        }
        events.extend(self.cloud_changes(&[]));
        events.extend(self.local_changes(&[]));

        if self.is_initial_synchronization {
            events.push(OutgoingEvent::DidFinishInitialSynchronization);
            self.is_initial_synchronization = false;
        }

        self.remember_removals(&events);
        events
    }

    fn resolve_did_update_local_contents(&mut self, contents: LocalContents) -> Vec<OutgoingEvent> {
        let previous = std::mem::replace(&mut self.current_local_contents, contents);
        self.prune_pending_local_removals();

        if !self.both_sides_gathered() {
            return Vec::new();
        }

        let events = self.local_changes(&previous);
        self.remember_removals(&events);
        events
    }

    fn resolve_did_update_cloud_contents(&mut self, contents: CloudContents) -> Vec<OutgoingEvent> {
        let previous = std::mem::replace(&mut self.current_cloud_contents, contents);
        self.prune_pending_cloud_removals();

        if !self.both_sides_gathered() {
            return Vec::new();
        }

        let events = self.cloud_changes(&previous);
        self.remember_removals(&events);
        events
    }

    /// Same-named files that differ get their local copy kept aside; the
    /// divergence becomes the baseline.
    fn initial_synchronization_conflicts(&mut self) -> Vec<OutgoingEvent> {
        let cloud_by_name = index_by_name(&self.current_cloud_contents, |item| &item.file_name);
        let mut events = Vec::new();

        for local_item in &self.current_local_contents {
            let Some(cloud_item) = cloud_by_name.get(local_item.file_name.as_str()) else {
                continue;
            };
            if cloud_item.has_unresolved_conflicts
                || cloud_item.last_modification_date == local_item.last_modification_date
            {
                continue;
            }

            debug!(file = %local_item.file_name, "Initial synchronization conflict");
            self.baselines.insert(
                local_item.file_name.clone(),
                Baseline {
                    local: local_item.last_modification_date,
                    cloud: cloud_item.last_modification_date,
                },
            );
            events.push(OutgoingEvent::ResolveInitialSynchronizationConflict(
                local_item.clone(),
            ));
        }

        events
    }

    fn reconcile(&self, local: &LocalMetadataItem, cloud: &CloudMetadataItem) -> Reconciliation {
        let (local_date, cloud_date) = (local.last_modification_date, cloud.last_modification_date);
        if local_date == cloud_date {
            return Reconciliation::InSync;
        }

        match self.baselines.get(&local.file_name) {
            Some(baseline) => match (local_date != baseline.local, cloud_date != baseline.cloud) {
                (true, true) => Reconciliation::Conflict,
                (true, false) => Reconciliation::UpdateCloud,
                (false, true) => Reconciliation::UpdateLocal,
                (false, false) => Reconciliation::InSync,
            },
            None if cloud_date > local_date => Reconciliation::UpdateLocal,
            None => Reconciliation::UpdateCloud,
        }
    }

    fn record_baseline(&mut self, local: &LocalMetadataItem, cloud: &CloudMetadataItem) {
        self.baselines.insert(
            local.file_name.clone(),
            Baseline {
                local: local.last_modification_date,
                cloud: cloud.last_modification_date,
            },
        );
    }

    fn local_changed_since_baseline(&self, local: &LocalMetadataItem) -> bool {
        self.baselines
            .get(&local.file_name)
            .is_some_and(|baseline| baseline.local != local.last_modification_date)
    }

    fn cloud_changed_since_baseline(&self, cloud: &CloudMetadataItem) -> bool {
        self.baselines
            .get(&cloud.file_name)
            .is_some_and(|baseline| baseline.cloud != cloud.last_modification_date)
    }

    /// Operations needed after the cloud side changed from `previous` to the
    /// current snapshot.
    fn cloud_changes(&mut self, previous: &[CloudMetadataItem]) -> Vec<OutgoingEvent> {
        let current = self.current_cloud_contents.clone();
        let local = self.current_local_contents.clone();
        let local_by_name = index_by_name(&local, |item| &item.file_name);
        let current_by_name = index_by_name(&current, |item| &item.file_name);

        let mut events = Vec::new();
        for item in &current {
            if let Some(error) = item.downloading_error {
                events.push(OutgoingEvent::DidReceiveError(error));
            }
            if let Some(error) = item.uploading_error {
                events.push(OutgoingEvent::DidReceiveError(error));
            }
        }
        events.extend(
            current
                .iter()
                .filter(|item| item.has_unresolved_conflicts)
                .map(|item| OutgoingEvent::ResolveVersionsConflict(item.clone())),
        );

        let mut downloads = Vec::new();
        let mut writes = Vec::new();

        for removed in previous
            .iter()
            .filter(|item| !current_by_name.contains_key(item.file_name.as_str()))
        {
            if let Some(local_item) = local_by_name.get(removed.file_name.as_str()) {
                if self.local_changed_since_baseline(local_item) {
                    debug!(file = %removed.file_name, "Local edit outlives cloud removal");
                    writes.push(OutgoingEvent::CreateCloudItem((*local_item).clone()));
                } else {
                    writes.push(OutgoingEvent::RemoveLocalItem(removed.clone()));
                }
            }
            self.baselines.remove(&removed.file_name);
        }

        for item in &current {
            if item.has_unresolved_conflicts
                || self.pending_cloud_removals.contains(&item.file_name)
            {
                continue;
            }

            let local_item = local_by_name.get(item.file_name.as_str()).copied();
            let (wanted, conflict) = match local_item {
                None => (vec![OutgoingEvent::CreateLocalItem(item.clone())], false),
                Some(local_item) => match self.reconcile(local_item, item) {
                    Reconciliation::InSync => {
                        self.record_baseline(local_item, item);
                        continue;
                    }
                    // Uploads are decided on the local side.
                    Reconciliation::UpdateCloud => continue,
                    Reconciliation::UpdateLocal => {
                        (vec![OutgoingEvent::UpdateLocalItem(item.clone())], false)
                    }
                    Reconciliation::Conflict => (
                        vec![
                            OutgoingEvent::ResolveInitialSynchronizationConflict(local_item.clone()),
                            OutgoingEvent::UpdateLocalItem(item.clone()),
                        ],
                        true,
                    ),
                },
            };

            if !item.is_downloaded {
                if !item.is_downloading {
                    downloads.push(OutgoingEvent::StartDownloading(item.clone()));
                }
                continue;
            }

            if let Some(local_item) = local_item.filter(|_| conflict) {
                debug!(file = %item.file_name, "Both sides changed");
                self.record_baseline(local_item, item);
            }
            writes.extend(wanted);
        }

        events.extend(downloads);
        events.extend(writes);
        events
    }

    /// Operations needed after the local side changed from `previous` to the
    /// current snapshot.
    fn local_changes(&mut self, previous: &[LocalMetadataItem]) -> Vec<OutgoingEvent> {
        let current = self.current_local_contents.clone();
        let cloud = self.current_cloud_contents.clone();
        let cloud_by_name = index_by_name(&cloud, |item| &item.file_name);
        let current_by_name = index_by_name(&current, |item| &item.file_name);
        let mut events = Vec::new();

        for removed in previous
            .iter()
            .filter(|item| !current_by_name.contains_key(item.file_name.as_str()))
        {
            if let Some(cloud_item) = cloud_by_name.get(removed.file_name.as_str()) {
                if self.cloud_changed_since_baseline(cloud_item) {
                    debug!(file = %removed.file_name, "Cloud edit outlives local removal");
                    events.push(if cloud_item.is_downloaded {
                        OutgoingEvent::CreateLocalItem((*cloud_item).clone())
                    } else {
                        OutgoingEvent::StartDownloading((*cloud_item).clone())
                    });
                } else {
                    events.push(OutgoingEvent::RemoveCloudItem(removed.clone()));
                }
            }
            self.baselines.remove(&removed.file_name);
        }

        for item in &current {
            if self.pending_local_removals.contains(&item.file_name) {
                continue;
            }

            let Some(cloud_item) = cloud_by_name.get(item.file_name.as_str()) else {
                events.push(OutgoingEvent::CreateCloudItem(item.clone()));
                continue;
            };
            if cloud_item.has_unresolved_conflicts {
                continue;
            }

            match self.reconcile(item, cloud_item) {
                Reconciliation::InSync => self.record_baseline(item, cloud_item),
                Reconciliation::UpdateCloud => {
                    events.push(OutgoingEvent::UpdateCloudItem(item.clone()));
                }
                // Downloads and writes of cloud data are decided on the cloud side.
                Reconciliation::UpdateLocal => {}
                Reconciliation::Conflict if cloud_item.is_downloaded => {
                    debug!(file = %item.file_name, "Both sides changed");
                    self.record_baseline(item, cloud_item);
                    events.push(OutgoingEvent::ResolveInitialSynchronizationConflict(
                        item.clone(),
                    ));
                    events.push(OutgoingEvent::UpdateLocalItem((*cloud_item).clone()));
                }
                Reconciliation::Conflict => {}
            }
        }

        events
    }

    fn remember_removals(&mut self, events: &[OutgoingEvent]) {
        for event in events {
            match event {
                OutgoingEvent::RemoveCloudItem(item) => {
                    self.pending_cloud_removals.insert(item.file_name.clone());
                }
                OutgoingEvent::RemoveLocalItem(item) => {
                    self.pending_local_removals.insert(item.file_name.clone());
                }
                _ => {}
            }
        }
    }

    fn prune_pending_cloud_removals(&mut self) {
        let listed: HashSet<&str> = self
            .current_cloud_contents
            .iter()
            .map(|item| item.file_name.as_str())
            .collect();
        self.pending_cloud_removals
            .retain(|name| listed.contains(name.as_str()));
    }

    fn prune_pending_local_removals(&mut self) {
        let listed: HashSet<&str> = self
            .current_local_contents
            .iter()
            .map(|item| item.file_name.as_str())
            .collect();
        self.pending_local_removals
            .retain(|name| listed.contains(name.as_str()));
    }
}

impl SynchronizationStateManager for DefaultSynchronizationStateManager {
    fn resolve_event(&mut self, event: IncomingEvent) -> Vec<OutgoingEvent> {
        let events = match event {
            IncomingEvent::DidFinishGatheringLocalContents(contents) => {
                self.local_contents_gathering_is_finished = true;
                self.current_local_contents = contents;
                self.prune_pending_local_removals();
                self.resolve_did_finish_gathering()
            }
            IncomingEvent::DidFinishGatheringCloudContents(contents) => {
                self.cloud_contents_gathering_is_finished = true;
                self.current_cloud_contents = contents;
                self.prune_pending_cloud_removals();
                self.resolve_did_finish_gathering()
            }
            IncomingEvent::DidUpdateLocalContents(contents) => {
                self.resolve_did_update_local_contents(contents)
            }
            IncomingEvent::DidUpdateCloudContents(contents) => {
                self.resolve_did_update_cloud_contents(contents)
            }
        };

        trace!(
            local = self.current_local_contents.len(),
            cloud = self.current_cloud_contents.len(),
            baselines = self.baselines.len(),
            "Known contents"
        );
        debug!(intents = events.len(), "Resolved synchronization event");
        events
    }

    fn handle_failed_intent(&mut self, intent: &OutgoingEvent) {
        // The file stays listed, so it is treated as present again.
        let forgotten = match intent {
            OutgoingEvent::RemoveCloudItem(item) => {
                self.pending_cloud_removals.remove(&item.file_name)
            }
            OutgoingEvent::RemoveLocalItem(item) => {
                self.pending_local_removals.remove(&item.file_name)
            }
            _ => false,
        };
        if forgotten {
            debug!(intent = %intent, "Forgot failed removal");
        }
    }

    fn reset_state(&mut self) {
        debug!("Resetting synchronization state");
        self.current_local_contents.clear();
        self.current_cloud_contents.clear();
        self.local_contents_gathering_is_finished = false;
        self.cloud_contents_gathering_is_finished = false;
        self.baselines.clear();
        self.pending_cloud_removals.clear();
        self.pending_local_removals.clear();
    }
}

fn index_by_name<T>(items: &[T], name: impl Fn(&T) -> &str) -> HashMap<&str, &T> {
    items.iter().map(|item| (name(item), item)).collect()
}
