//! Host-side file management and client discipline.

mod common;

use common::{expect_event, line, lock_verdict, numbered, open, wait_until, HostBuilder};
use linelock_client::{ClientError, ClientEvent};
use linelock_core::WorkspaceError;
use linelock_types::{AccessLevel, SharedAccess};

#[test]
fn hidden_files_are_registered_but_not_listed() {
    let host = HostBuilder::new()
        .file("main.py", "x\n")
        .file("secrets.txt", "hunter2\n")
        .access("secrets.txt", AccessLevel::Hidden)
        .start();

    let (alice, _events) = host.join("alice_01");
    let names: Vec<String> = alice.with_workspace(|w| w.files().map(|(n, _)| n.to_string()).collect());
    assert_eq!(names, vec!["main.py"]);
    assert!(host
        .handle
        .with_coordinator(|c| c.registry().find("secrets.txt").is_some()));
    assert!(matches!(
        alice.request_file("secrets.txt"),
        Err(ClientError::Workspace(WorkspaceError::UnknownFile(_)))
    ));
}

#[test]
fn limiting_a_file_makes_it_read_only() {
    let host = HostBuilder::new().file("main.py", &numbered(3)).start();
    let (alice, alice_events) = host.join("alice_01");
    let (bob, bob_events) = host.join("bob_02");
    open(&alice, &alice_events, "main.py");
    open(&bob, &bob_events, "main.py");

    alice.request_line(line(2)).unwrap();
    assert!(lock_verdict(&alice_events));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineLocked { .. }));

    host.handle.set_access("main.py", AccessLevel::Limit).unwrap();
    expect_event(&alice_events, |e| {
        matches!(e, ClientEvent::FileUpdated { name, access: SharedAccess::Limit } if name == "main.py")
    });
    expect_event(&bob_events, |e| matches!(e, ClientEvent::LineUnlocked { line: l } if *l == line(2)));
    expect_event(&bob_events, |e| matches!(e, ClientEvent::FileUpdated { .. }));

    assert!(alice.with_workspace(|w| w.block().is_none()));
    assert!(matches!(
        bob.request_line(line(1)),
        Err(ClientError::Workspace(WorkspaceError::ReadOnly(_)))
    ));
    // The edit never reaches disk.
    assert!(alice.update_line(vec!["nope".into()]).is_err());
    assert_eq!(host.read("main.py"), numbered(3));
}

#[test]
fn hiding_a_shared_file_removes_it() {
    let host = HostBuilder::new().file("main.py", "x\n").start();
    let (alice, events) = host.join("alice_01");
    open(&alice, &events, "main.py");

    host.handle.set_access("main.py", AccessLevel::Hidden).unwrap();
    expect_event(&events, |e| matches!(e, ClientEvent::FileRemoved { name } if name == "main.py"));
    assert!(alice.with_workspace(|w| w.local().is_none() && w.files().next().is_none()));

    host.handle.set_access("main.py", AccessLevel::Edit).unwrap();
    expect_event(&events, |e| {
        matches!(e, ClientEvent::FileRegistered { name, access: SharedAccess::Edit } if name == "main.py")
    });
}

#[test]
fn registering_a_file_announces_and_creates_it() {
    let host = HostBuilder::new().start();
    let (alice, events) = host.join("alice_01");

    host.handle.register_file("todo.md", AccessLevel::Edit).unwrap();
    expect_event(&events, |e| matches!(e, ClientEvent::FileRegistered { name, .. } if name == "todo.md"));
    wait_until("todo.md to exist", || host.project().join("todo.md").exists());

    let lines = open(&alice, &events, "todo.md");
    assert_eq!(lines, vec![String::new()]);
}

#[test]
fn renaming_a_file_follows_the_open_view() {
    let host = HostBuilder::new().file("old.txt", "keep\n").start();
    let (alice, events) = host.join("alice_01");
    open(&alice, &events, "old.txt");

    host.handle.rename_file("old.txt", "new.txt").unwrap();
    expect_event(&events, |e| {
        matches!(e, ClientEvent::FileRenamed { old, new } if old == "old.txt" && new == "new.txt")
    });
    assert_eq!(alice.with_workspace(|w| w.local().map(|l| l.name().to_string())), Some("new.txt".into()));
    wait_until("the rename on disk", || !host.project().join("old.txt").exists());
    assert_eq!(host.read("new.txt"), "keep\n");

    // Edits keep working under the new name.
    alice.request_line(line(1)).unwrap();
    assert!(lock_verdict(&events));
    alice.update_line(vec!["changed".into()]).unwrap();
    wait_until("the edit", || host.read("new.txt") == "changed\n");
    assert_eq!(host.changes("new.txt").len(), 1);
}

#[test]
fn rename_onto_a_shared_name_is_reported() {
    let host = HostBuilder::new().file("a.txt", "a\n").file("b.txt", "b\n").start();
    host.handle.rename_file("a.txt", "b.txt").unwrap();
    wait_until("the failure to be recorded", || host.handle.last_error().is_some());
    assert_eq!(host.read("a.txt"), "a\n");
    assert_eq!(host.read("b.txt"), "b\n");
}

#[test]
fn removing_a_file_stops_sharing_but_keeps_it_on_disk() {
    let host = HostBuilder::new().file("main.py", "x\n").start();
    let (_alice, events) = host.join("alice_01");

    host.handle.remove_file("main.py").unwrap();
    expect_event(&events, |e| matches!(e, ClientEvent::FileRemoved { .. }));
    assert!(host.handle.with_coordinator(|c| c.registry().is_empty()));
    assert_eq!(host.read("main.py"), "x\n");
}

#[test]
fn flooding_client_loses_trust_and_is_dropped() {
    let host = HostBuilder::new().messages_per_minute(3).start();
    let (alice, events) = host.join("alice_01");

    for _ in 0..15 {
        // Sends start failing once the host hangs up.
        let _ = alice.request_files();
    }
    expect_event(&events, |e| matches!(e, ClientEvent::Disconnected { .. }));
    wait_until("the session to end", || host.handle.client_count() == 0);
    assert!(host.handle.metrics().rate_limit_hits.load(std::sync::atomic::Ordering::Relaxed) >= 10);
}
