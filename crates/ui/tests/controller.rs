use std::time::Duration;

use fixstream::repair::{
    CONNECTION_ERROR_MESSAGE, EMPTY_SUBMISSION_MESSAGE, EntryView, NOT_CONNECTED_MESSAGE,
    RepairController, RepairHandle, ScrollMetrics, SessionId, ViewEvent,
};
use fixstream::settings::Settings;
use fixstream_transport::{ConnectionManager, ConnectionState, LoopbackPeer};
use tokio::task::JoinHandle;
use tokio::time::Instant;

fn start(settings: Settings, open: bool) -> (RepairHandle, LoopbackPeer, JoinHandle<()>) {
    let (manager, peer) = ConnectionManager::loopback("ws://loopback/ws");
    if open {
        peer.open();
    }
    let (controller, handle) = RepairController::new(&settings, manager);
    let task = tokio::spawn(controller.run());
    (handle, peer, task)
}

fn fixer(code: &str) -> String {
    serde_json::json!({ "type": "fixer", "fixed_code": code }).to_string()
}

fn final_result(code: &str) -> String {
    serde_json::json!({ "final_fixed_code": code }).to_string()
}

async fn submit(handle: &RepairHandle, peer: &mut LoopbackPeer, code: &str) {
    handle.submit(code).expect("controller running");
    let sent = peer.recv_sent().await.expect("submission frame");
    assert_eq!(sent, serde_json::json!({ "code": code }).to_string());
}

async fn events_until(
    handle: &mut RepairHandle,
    mut stop: impl FnMut(&ViewEvent) -> bool,
) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        let done = stop(&event);
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn revealed(events: &[ViewEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            ViewEvent::EntryRevealed {
                session, sequence, ..
            } => Some((session.0, sequence.0)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn results_reveal_in_arrival_order() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "print(0").await;

    assert!(peer.push_text(&fixer("```python\nprint(1)\n```")));
    assert!(peer.push_text(&fixer("print(2)")));
    assert!(peer.push_text(&final_result("print(3)")));

    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::SessionCompleted { .. })
    })
    .await;

    assert_eq!(revealed(&events), vec![(1, 1), (1, 2), (1, 3)]);
    let snapshot = handle.snapshot();
    assert!(!snapshot.loading);
    let texts: Vec<&str> = snapshot.entries.iter().map(EntryView::text).collect();
    assert_eq!(texts, vec!["print(1)", "print(2)", "print(3)"]);
    assert_eq!(snapshot.final_code.as_deref(), Some("print(3)"));
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_between_results_is_ignored() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "x = ").await;

    assert!(peer.push_text(&fixer("x = 1")));
    assert!(peer.push_text("{not json"));
    assert!(peer.push_text(&final_result("x = 2")));

    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::SessionCompleted { .. })
    })
    .await;

    assert_eq!(revealed(&events), vec![(1, 1), (1, 2)]);
    assert_eq!(handle.snapshot().error, None);
}

#[tokio::test(start_paused = true)]
async fn resubmission_mid_reveal_leaves_no_stray_completion() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "first").await;

    assert!(peer.push_text(&fixer("print('a long first attempt')")));
    assert!(peer.push_text(&fixer("print('second attempt')")));
    assert!(peer.push_text(&final_result("print('final')")));

    let mut snapshots = handle.watch_snapshots();
    let _ = snapshots
        .wait_for(|snapshot| {
            snapshot
                .entries
                .first()
                .is_some_and(|entry| entry.revealed_len >= 2)
        })
        .await
        .expect("controller running");
    assert!(!handle.snapshot().entries[0].text().is_empty());

    submit(&handle, &mut peer, "second").await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.session, Some(SessionId::new(2)));
    assert!(snapshot.entries.is_empty());

    assert!(peer.push_text(&final_result("print('b')")));
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::SessionCompleted { .. })
    })
    .await;

    assert_eq!(revealed(&events), vec![(2, 1)]);
    assert!(events.contains(&ViewEvent::SessionCompleted {
        session: SessionId::new(2)
    }));
    assert!(!events.contains(&ViewEvent::SessionCompleted {
        session: SessionId::new(1)
    }));

    // Let any leftover timer run; nothing may reference the old session.
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Some(event) = handle.try_next_event() {
        assert_ne!(event.session(), Some(SessionId::new(1)));
    }
    assert_eq!(handle.snapshot().entries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_submission_sends_nothing() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);

    handle.submit("   ").expect("controller running");
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::ErrorRaised { .. })
    })
    .await;

    assert_eq!(
        events.last(),
        Some(&ViewEvent::ErrorRaised {
            message: EMPTY_SUBMISSION_MESSAGE.to_string()
        })
    );
    assert_eq!(peer.try_recv_sent(), None);
    let snapshot = handle.snapshot();
    assert!(snapshot.entries.is_empty());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.session, None);
}

#[tokio::test(start_paused = true)]
async fn reveal_advances_one_char_per_tick() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "abc").await;

    let started = Instant::now();
    assert!(peer.push_text(&fixer("abcdefgh")));
    events_until(&mut handle, |event| {
        matches!(event, ViewEvent::EntryRevealed { .. })
    })
    .await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(8 * 15), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(10 * 15), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn submit_while_not_open_reports_and_stalls() {
    let (mut handle, mut peer, _task) = start(Settings::default(), false);

    handle.submit("print(1)").expect("controller running");
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::ErrorRaised { .. })
    })
    .await;

    assert!(events.contains(&ViewEvent::ErrorRaised {
        message: NOT_CONNECTED_MESSAGE.to_string()
    }));
    assert_eq!(peer.try_recv_sent(), None);
    assert!(handle.snapshot().loading);
}

#[tokio::test(start_paused = true)]
async fn connection_failure_surfaces_one_banner_and_keeps_loading() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "x").await;

    peer.fail("connection reset");
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::ErrorRaised { .. })
    })
    .await;

    assert_eq!(
        events.last(),
        Some(&ViewEvent::ErrorRaised {
            message: CONNECTION_ERROR_MESSAGE.to_string()
        })
    );
    let snapshot = handle.snapshot();
    assert!(snapshot.loading);
    assert_eq!(snapshot.connection, ConnectionState::Errored);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_connection() {
    let (handle, mut peer, task) = start(Settings::default(), true);

    assert!(handle.shutdown());
    task.await.expect("controller exits cleanly");

    assert!(peer.host_closed());
}

#[tokio::test(start_paused = true)]
async fn close_after_final_result_completes_without_error() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "x").await;

    assert!(peer.push_text(&fixer("print(1)")));
    assert!(peer.push_text(&final_result("print(2)")));
    peer.close();

    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::SessionCompleted { .. })
    })
    .await;

    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ViewEvent::ErrorRaised { .. }))
    );
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.connection, ConnectionState::Closed);
    assert_eq!(snapshot.final_code.as_deref(), Some("print(2)"));
}

#[tokio::test(start_paused = true)]
async fn zero_tick_interval_still_reveals() {
    let settings = Settings {
        tick_interval_ms: 0,
        ..Settings::default()
    };
    let (mut handle, mut peer, _task) = start(settings, true);
    submit(&handle, &mut peer, "x").await;

    assert!(peer.push_text(&final_result("print('done')")));
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::SessionCompleted { .. })
    })
    .await;

    assert_eq!(revealed(&events), vec![(1, 1)]);
    assert_eq!(
        handle.snapshot().final_code.as_deref(),
        Some("print('done')")
    );
}

#[tokio::test(start_paused = true)]
async fn scroll_position_decides_follow_and_jump_restores_it() {
    let (mut handle, mut peer, _task) = start(Settings::default(), true);
    submit(&handle, &mut peer, "x").await;

    for code in ["a", "b", "c"] {
        assert!(peer.push_text(&fixer(code)));
    }
    let mut seen = 0;
    events_until(&mut handle, |event| {
        if matches!(event, ViewEvent::EntryRevealed { .. }) {
            seen += 1;
        }
        seen == 3
    })
    .await;

    // Near the bottom: the next result pulls the view down.
    handle
        .scrolled(ScrollMetrics::at_bottom(900.0, 300.0))
        .expect("controller running");
    assert!(peer.push_text(&fixer("d")));
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::EntryRevealed { .. })
    })
    .await;
    assert!(events.contains(&ViewEvent::ScrollToBottom));
    assert!(!handle.snapshot().scroll.show_jump_to_bottom);

    // 200 units above the bottom: stay put and offer the jump.
    handle
        .scrolled(ScrollMetrics::new(400.0, 900.0, 300.0))
        .expect("controller running");
    assert!(peer.push_text(&fixer("e")));
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::EntryRevealed { .. })
    })
    .await;
    assert!(!events.contains(&ViewEvent::ScrollToBottom));
    let scroll = handle.snapshot().scroll;
    assert!(!scroll.follow);
    assert!(scroll.show_jump_to_bottom);

    handle.jump_to_bottom().expect("controller running");
    let events = events_until(&mut handle, |event| {
        matches!(event, ViewEvent::ScrollToBottom)
    })
    .await;
    assert_eq!(events, vec![ViewEvent::ScrollToBottom]);
    let scroll = handle.snapshot().scroll;
    assert!(scroll.follow);
    assert!(!scroll.show_jump_to_bottom);
}
