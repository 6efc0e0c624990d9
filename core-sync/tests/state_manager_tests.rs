//! Scenario tests for the synchronization state manager.

mod common;

use bridge_traits::{CloudMetadataItem, LocalMetadataItem};
use common::date;
use core_sync::{
    DefaultSynchronizationStateManager, IncomingEvent, OutgoingEvent,
    SynchronizationStateManager,
};

fn local(name: &str, hour: u32) -> LocalMetadataItem {
    LocalMetadataItem::new(format!("/local/{}", name), date(hour, 0))
}

fn cloud(name: &str, hour: u32) -> CloudMetadataItem {
    CloudMetadataItem::new(format!("/cloud/{}", name), date(hour, 0))
}

fn started(
    is_initial: bool,
    local: Vec<LocalMetadataItem>,
    cloud: Vec<CloudMetadataItem>,
) -> (DefaultSynchronizationStateManager, Vec<OutgoingEvent>) {
    let mut manager = DefaultSynchronizationStateManager::new(is_initial);
    manager.resolve_event(IncomingEvent::DidFinishGatheringCloudContents(cloud));
    let events = manager.resolve_event(IncomingEvent::DidFinishGatheringLocalContents(local));
    (manager, events)
}

#[test]
fn test_local_only_files_are_created_in_cloud_once() {
    let (mut manager, events) = started(false, vec![local("a.kml", 1), local("b.kml", 2)], vec![]);
    assert_eq!(
        events,
        vec![
            OutgoingEvent::CreateCloudItem(local("a.kml", 1)),
            OutgoingEvent::CreateCloudItem(local("b.kml", 2)),
        ]
    );

    // Once the cloud reports them, nothing more happens.
    let events = manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![
        cloud("a.kml", 1),
        cloud("b.kml", 2),
    ]));
    assert!(events.is_empty());
}

#[test]
fn test_cloud_only_downloaded_file_is_created_locally() {
    let (_, events) = started(false, vec![], vec![cloud("a.kml", 1)]);
    assert_eq!(events, vec![OutgoingEvent::CreateLocalItem(cloud("a.kml", 1))]);
}

#[test]
fn test_cloud_file_is_downloaded_before_being_written() {
    let remote = cloud("a.kml", 1).with_downloaded(false);
    let (mut manager, events) = started(false, vec![], vec![remote.clone()]);
    assert_eq!(events, vec![OutgoingEvent::StartDownloading(remote)]);

    let downloading = cloud("a.kml", 1).with_downloaded(false).with_downloading(true);
    let events = manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![downloading]));
    assert!(events.is_empty());

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 1)]));
    assert_eq!(events, vec![OutgoingEvent::CreateLocalItem(cloud("a.kml", 1))]);
}

#[test]
fn test_local_edit_updates_cloud() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![local("a.kml", 3)]));
    assert_eq!(events, vec![OutgoingEvent::UpdateCloudItem(local("a.kml", 3))]);
}

#[test]
fn test_cloud_edit_updates_local() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 4)]));
    assert_eq!(events, vec![OutgoingEvent::UpdateLocalItem(cloud("a.kml", 4))]);
}

#[test]
fn test_removals_propagate_both_ways() {
    let (mut manager, _) = started(
        false,
        vec![local("a.kml", 1), local("b.kml", 1)],
        vec![cloud("a.kml", 1), cloud("b.kml", 1)],
    );

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("b.kml", 1)]));
    assert_eq!(events, vec![OutgoingEvent::RemoveLocalItem(cloud("a.kml", 1))]);

    let events = manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![]));
    assert_eq!(events, vec![OutgoingEvent::RemoveCloudItem(local("b.kml", 1))]);
}

#[test]
fn test_initial_synchronization_with_diverging_file() {
    let (manager, events) = started(true, vec![local("a.kml", 10)], vec![cloud("a.kml", 9)]);

    // Only the local copy is duplicated; neither original is overwritten.
    assert_eq!(
        events,
        vec![
            OutgoingEvent::ResolveInitialSynchronizationConflict(local("a.kml", 10)),
            OutgoingEvent::DidFinishInitialSynchronization,
        ]
    );
    assert!(!manager.is_initial_synchronization());
}

#[test]
fn test_initial_synchronization_with_identical_file() {
    let (_, events) = started(true, vec![local("a.kml", 9)], vec![cloud("a.kml", 9)]);
    assert_eq!(events, vec![OutgoingEvent::DidFinishInitialSynchronization]);
}

#[test]
fn test_initial_synchronization_merges_disjoint_sides() {
    let (_, events) = started(true, vec![local("mine.kml", 1)], vec![cloud("theirs.kml", 2)]);
    assert_eq!(
        events,
        vec![
            OutgoingEvent::CreateLocalItem(cloud("theirs.kml", 2)),
            OutgoingEvent::CreateCloudItem(local("mine.kml", 1)),
            OutgoingEvent::DidFinishInitialSynchronization,
        ]
    );
}

#[test]
fn test_conflicting_cloud_item_does_not_hold_back_other_cloud_changes() {
    let conflicted = cloud("a.kml", 5).with_unresolved_conflicts(true);
    let (mut manager, events) = started(
        false,
        vec![local("a.kml", 1)],
        vec![conflicted.clone(), cloud("new.kml", 2)],
    );
    assert_eq!(
        events,
        vec![
            OutgoingEvent::ResolveVersionsConflict(conflicted),
            OutgoingEvent::CreateLocalItem(cloud("new.kml", 2)),
        ]
    );

    let events = manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![
        cloud("a.kml", 6),
        cloud("a_1.kml", 6),
        cloud("new.kml", 2),
    ]));
    assert_eq!(
        events,
        vec![
            OutgoingEvent::UpdateLocalItem(cloud("a.kml", 6)),
            OutgoingEvent::CreateLocalItem(cloud("a_1.kml", 6)),
            OutgoingEvent::CreateLocalItem(cloud("new.kml", 2)),
        ]
    );
}

#[test]
fn test_cloud_removal_is_not_lost_behind_a_versions_conflict() {
    let (mut manager, _) = started(
        false,
        vec![local("a.kml", 1), local("b.kml", 1)],
        vec![cloud("a.kml", 1), cloud("b.kml", 1)],
    );

    // b.kml was deleted on another device while a.kml got conflicting versions.
    let conflicted = cloud("a.kml", 5).with_unresolved_conflicts(true);
    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![conflicted.clone()]));
    assert_eq!(
        events,
        vec![
            OutgoingEvent::ResolveVersionsConflict(conflicted),
            OutgoingEvent::RemoveLocalItem(cloud("b.kml", 1)),
        ]
    );

    let events = manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![
        cloud("a.kml", 6),
        cloud("a_1.kml", 6),
    ]));
    assert_eq!(
        events,
        vec![
            OutgoingEvent::UpdateLocalItem(cloud("a.kml", 6)),
            OutgoingEvent::CreateLocalItem(cloud("a_1.kml", 6)),
        ]
    );

    // The local listing still shows b.kml until the store deletes it.
    let events = manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![
        local("a.kml", 6),
        local("a_1.kml", 6),
        local("b.kml", 1),
    ]));
    assert!(events.is_empty());
}

#[test]
fn test_edits_on_both_sides_keep_local_copy_and_take_cloud_version() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![local("a.kml", 3)]));
    assert_eq!(events, vec![OutgoingEvent::UpdateCloudItem(local("a.kml", 3))]);

    // Another device saved its own edit before the upload landed.
    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 2)]));
    assert_eq!(
        events,
        vec![
            OutgoingEvent::ResolveInitialSynchronizationConflict(local("a.kml", 3)),
            OutgoingEvent::UpdateLocalItem(cloud("a.kml", 2)),
        ]
    );

    // Raised once, then settled when the local side catches up.
    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 2)]));
    assert!(events.is_empty());
    let events =
        manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![local("a.kml", 2)]));
    assert!(events.is_empty());
}

#[test]
fn test_own_upload_landing_is_not_a_conflict() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);
    manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![local("a.kml", 3)]));

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 3)]));
    assert!(events.is_empty());
}

#[test]
fn test_local_edit_outlives_cloud_removal() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);
    manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![local("a.kml", 4)]));

    let events = manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![]));
    assert_eq!(events, vec![OutgoingEvent::CreateCloudItem(local("a.kml", 4))]);
}

#[test]
fn test_cloud_edit_outlives_local_removal() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);
    manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 4)]));

    let events = manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![]));
    assert_eq!(events, vec![OutgoingEvent::CreateLocalItem(cloud("a.kml", 4))]);
}

#[test]
fn test_failed_cloud_removal_lets_cloud_edits_through() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);

    let events = manager.resolve_event(IncomingEvent::DidUpdateLocalContents(vec![]));
    let removal = OutgoingEvent::RemoveCloudItem(local("a.kml", 1));
    assert_eq!(events, vec![removal.clone()]);

    manager.handle_failed_intent(&removal);

    let events =
        manager.resolve_event(IncomingEvent::DidUpdateCloudContents(vec![cloud("a.kml", 5)]));
    assert_eq!(events, vec![OutgoingEvent::CreateLocalItem(cloud("a.kml", 5))]);
}

#[test]
fn test_restart_after_reset_gathers_again() {
    let (mut manager, _) = started(false, vec![local("a.kml", 1)], vec![cloud("a.kml", 1)]);
    manager.reset_state();

    let (events_after_local, events_after_cloud) = (
        manager.resolve_event(IncomingEvent::DidFinishGatheringLocalContents(vec![local(
            "a.kml", 1,
        )])),
        manager.resolve_event(IncomingEvent::DidFinishGatheringCloudContents(vec![])),
    );
    assert!(events_after_local.is_empty());
    assert_eq!(
        events_after_cloud,
        vec![OutgoingEvent::CreateCloudItem(local("a.kml", 1))]
    );
}
