//! Line lock / edit / offset protocol end to end.

mod common;

use common::{expect_event, line, lock_verdict, numbered, open, wait_until, HostBuilder};
use linelock_client::{ClientError, ClientEvent};
use linelock_core::WorkspaceError;
use serde_json::Value;

#[test]
fn edit_cycle_updates_disk_log_and_other_viewers() {
    let host = HostBuilder::new().file("main.py", &numbered(8)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(5)).unwrap();
    assert!(lock_verdict(&alice_events));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineLocked { line: l } if *l == line(5)));

    assert_eq!(alice.extend_block().unwrap(), 2);
    alice
        .update_line(vec!["first".into(), "second".into()])
        .unwrap();

    expect_event(&alice_events, |e| matches!(e, ClientEvent::CommitConfirmed { line: l } if *l == line(5)));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineUnlocked { line: l } if *l == line(5)));
    let offset = match expect_event(&bob_events, |e| matches!(e, ClientEvent::OffsetPending { .. })) {
        ClientEvent::OffsetPending { offset, line: l, delta } => {
            assert_eq!(l, line(5));
            assert_eq!(delta, 1);
            offset
        }
        _ => unreachable!(),
    };

    let expected = "line 1\nline 2\nline 3\nline 4\nfirst\nsecond\nline 6\nline 7\nline 8\n";
    wait_until("main.py to be rewritten", || host.read("main.py") == expected);
    wait_until("the change to be logged", || host.changes("main.py").len() == 1);
    let log = host.changes("main.py");
    let entry = log.values().next().unwrap();
    assert_eq!(entry["line"], Value::from(5));
    assert_eq!(entry["removed"], Value::from("line 5"));
    assert_eq!(entry["added"], serde_json::json!(["first", "second"]));

    // Bob's view changes only once the offset is applied.
    assert_eq!(bob.with_workspace(|w| w.local().unwrap().lines().len()), 8);
    bob.accept_offset(offset).unwrap();
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineUpdated { .. }));
    let bob_lines = bob.with_workspace(|w| w.local().unwrap().lines().to_vec());
    assert_eq!(bob_lines, alice.with_workspace(|w| w.local().unwrap().lines().to_vec()));
    assert_eq!(bob_lines[4], "first");
    assert_eq!(bob_lines[8], "line 8");

    assert!(matches!(
        bob.accept_offset(offset),
        Err(ClientError::Workspace(WorkspaceError::NoPendingOffset(_)))
    ));
}

#[test]
fn edits_survive_key_rotation() {
    let host = HostBuilder::new().file("main.py", &numbered(3)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.rotate_key().unwrap();
    alice.request_line(line(2)).unwrap();
    assert!(lock_verdict(&alice_events));
    alice.update_line(vec!["after rotation".into()]).unwrap();
    expect_event(&alice_events, |e| matches!(e, ClientEvent::CommitConfirmed { line: l } if *l == line(2)));
    wait_until("main.py to be rewritten", || {
        host.read("main.py") == "line 1\nafter rotation\nline 3\n"
    });
    expect_event(&bob_events, |e| {
        matches!(e, ClientEvent::LineUpdated { line: l, lines } if *l == line(2) && lines[0] == "after rotation")
    });

    // a second rotation, then a commit through the newest key
    alice.rotate_key().unwrap();
    alice.request_line(line(3)).unwrap();
    assert!(lock_verdict(&alice_events));
    alice.update_line(vec!["twice".into()]).unwrap();
    wait_until("the second commit", || {
        host.read("main.py") == "line 1\nafter rotation\ntwice\n"
    });
    wait_until("both changes to be logged", || host.changes("main.py").len() == 2);
    assert!(alice.last_error().is_none());
    assert_eq!(host.handle.client_count(), 2);
}

#[test]
fn concurrent_lock_requests_have_one_winner() {
    let host = HostBuilder::new().file("main.py", &numbered(5)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(3)).unwrap();
    let alice_granted = lock_verdict(&alice_events);
    let bob_granted = match bob.request_line(line(3)) {
        Ok(()) => lock_verdict(&bob_events),
        Err(ClientError::Workspace(WorkspaceError::LineLocked(_))) => false,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert!(alice_granted);
    assert!(!bob_granted);

    // A different line is still free.
    host.handle.with_coordinator(|c| {
        let id = c.registry().find("main.py").unwrap();
        let locked: Vec<_> = c.registry().get(id).unwrap().locked_lines().collect();
        assert_eq!(locked, vec![line(3)]);
    });
    bob.request_line(line(4)).unwrap();
    assert!(lock_verdict(&bob_events));
}

#[test]
fn racing_lock_requests_resolve_first_writer_wins() {
    let host = HostBuilder::new().file("main.py", &numbered(5)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    // Send both before either verdict can arrive.
    let alice_sent = alice.request_line(line(2)).is_ok();
    let bob_sent = bob.request_line(line(2)).is_ok();
    let alice_granted = alice_sent && lock_verdict(&alice_events);
    let bob_granted = bob_sent && lock_verdict(&bob_events);
    assert!(alice_granted ^ bob_granted, "exactly one lock must be granted");
}

#[test]
fn discarded_lock_is_released_for_others() {
    let host = HostBuilder::new().file("main.py", &numbered(3)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(1)).unwrap();
    assert!(lock_verdict(&alice_events));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineLocked { .. }));

    alice.discard_update().unwrap();
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineUnlocked { line: l } if *l == line(1)));
    bob.request_line(line(1)).unwrap();
    assert!(lock_verdict(&bob_events));
    assert_eq!(host.read("main.py"), numbered(3));
}

#[test]
fn leaving_client_releases_its_lock() {
    let host = HostBuilder::new().file("main.py", &numbered(3)).start();
    let (mut alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(2)).unwrap();
    assert!(lock_verdict(&alice_events));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineLocked { .. }));

    alice.disconnect().unwrap();
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineUnlocked { line: l } if *l == line(2)));
}

#[test]
fn change_log_only_grows() {
    let host = HostBuilder::new().file("notes.txt", &numbered(4)).start();
    let (alice, events) = host.join("alice_01");
    open(&alice, &events, "notes.txt");

    alice.request_line(line(1)).unwrap();
    assert!(lock_verdict(&events));
    alice.update_line(vec!["one".into()]).unwrap();
    wait_until("first entry", || host.changes("notes.txt").len() == 1);
    let first = host.changes("notes.txt");

    alice.request_line(line(2)).unwrap();
    assert!(lock_verdict(&events));
    alice.update_line(vec!["two".into()]).unwrap();
    wait_until("second entry", || host.changes("notes.txt").len() == 2);

    let log = host.changes("notes.txt");
    for (key, entry) in &first {
        assert_eq!(log.get(key), Some(entry));
    }
    let lines: Vec<u64> = log.values().map(|e| e["line"].as_u64().unwrap()).collect();
    assert_eq!(lines, vec![1, 2]);
    assert_eq!(host.read("notes.txt"), "one\ntwo\nline 3\nline 4\n");
}

#[test]
fn only_empty_lines_can_be_deleted() {
    let host = HostBuilder::new()
        .file("main.py", "keep\n\nlast\n")
        .start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(1)).unwrap();
    assert!(lock_verdict(&alice_events));
    assert!(matches!(
        alice.delete_line(),
        Err(ClientError::Workspace(WorkspaceError::LineNotEmpty(_)))
    ));

    alice.request_line(line(2)).unwrap();
    assert!(lock_verdict(&alice_events));
    alice.delete_line().unwrap();

    wait_until("the blank line to go", || host.read("main.py") == "keep\nlast\n");
    let offset = match expect_event(&bob_events, |e| matches!(e, ClientEvent::OffsetPending { .. })) {
        ClientEvent::OffsetPending { offset, delta, .. } => {
            assert_eq!(delta, -1);
            offset
        }
        _ => unreachable!(),
    };
    bob.accept_offset(offset).unwrap();
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineDeleted { line: l } if *l == line(2)));
    let entry = host.changes("main.py").values().next().cloned().unwrap();
    assert_eq!(entry["added"], serde_json::json!([]));
}

#[test]
fn offsets_queue_later_notifications() {
    let host = HostBuilder::new().file("main.py", &numbered(6)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(1)).unwrap();
    assert!(lock_verdict(&alice_events));
    alice.extend_block().unwrap();
    alice.update_line(vec!["a".into(), "b".into()]).unwrap();
    let offset = match expect_event(&bob_events, |e| matches!(e, ClientEvent::OffsetPending { .. })) {
        ClientEvent::OffsetPending { offset, .. } => offset,
        _ => unreachable!(),
    };

    // Locks issued after the offset wait behind it. Viewers are told before
    // the grant goes out, so a listing round trip orders bob after the lock.
    alice.request_line(line(6)).unwrap();
    assert!(lock_verdict(&alice_events));
    bob.request_files().unwrap();
    expect_event(&bob_events, |e| matches!(e, ClientEvent::FilesListed { .. }));
    assert_eq!(bob.with_workspace(|w| w.pending_offsets()), vec![offset]);
    assert!(!bob.with_workspace(|w| w.local().unwrap().is_line_locked(line(6))));

    bob.accept_offset(offset).unwrap();
    assert!(bob.with_workspace(|w| w.local().unwrap().is_line_locked(line(6))));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineLocked { line: l } if *l == line(6)));
}
