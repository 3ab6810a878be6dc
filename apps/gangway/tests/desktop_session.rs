//! End-to-end structured-instruction controller behavior against an
//! in-memory gateway peer.

use std::sync::Arc;
use std::time::Duration;

use gangway::client::clipboard::MemoryClipboard;
use gangway::client::desktop::{
    CLIPBOARD_DISABLED_NOTICE, CLIPBOARD_RECEIVED_NOTICE, DesktopController, DesktopEvent,
    DesktopHandle, DesktopInput, PointerButton, RESIZE_DEBOUNCE,
};
use gangway::session::{ProtocolClass, Session};
use gangway::transport::pair::{PairDialer, PairPeer};
use gangway_proto::Instruction;
use tokio::sync::mpsc;
use tokio::time;

const VIEWPORT: (u32, u32) = (1280, 800);

fn session(clipboard_enabled: bool, fixed_geometry: Option<(u32, u32)>) -> Session {
    Session {
        id: "sess-d1".into(),
        protocol: ProtocolClass::StructuredInstruction,
        idle_budget_secs: 0,
        fixed_geometry,
        watermark: false,
        clipboard_enabled,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<DesktopEvent>) -> Vec<DesktopEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

struct Harness {
    handle: DesktopHandle,
    events: mpsc::UnboundedReceiver<DesktopEvent>,
    clipboard: MemoryClipboard,
    _controller: tokio::task::JoinHandle<Result<(), gangway::client::ClientError>>,
}

async fn attach(session: Session) -> (Harness, PairPeer) {
    let (dialer, mut peers) = PairDialer::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let clipboard = MemoryClipboard::new();
    let (controller, handle) = DesktopController::new(
        session,
        Arc::new(dialer),
        VIEWPORT,
        Box::new(clipboard.clone()),
        events_tx,
    );
    let task = tokio::spawn(controller.run());
    settle().await;
    let peer = peers.recv().await.expect("initial dial");
    // Swallow the connect handshake events.
    assert_eq!(
        drain(&mut events),
        vec![DesktopEvent::Connected, DesktopEvent::Scale(1.0)]
    );
    (
        Harness {
            handle,
            events,
            clipboard,
            _controller: task,
        },
        peer,
    )
}

#[tokio::test(start_paused = true)]
async fn resize_burst_coalesces_to_one_instruction() {
    let (mut harness, peer) = attach(session(true, None)).await;

    for (width, height) in [(1000, 700), (1100, 750), (1200, 760)] {
        harness
            .handle
            .send(DesktopInput::ViewportResized { width, height });
        time::sleep(Duration::from_millis(200)).await;
        settle().await;
    }
    // Still inside the debounce window of the last event.
    assert!(peer.drain_frames().is_empty());

    time::sleep(RESIZE_DEBOUNCE).await;
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![Instruction::size(1200, 760).encode()]
    );
    let events = drain(&mut harness.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DesktopEvent::Scale(_)));
}

#[tokio::test(start_paused = true)]
async fn pinned_geometry_suppresses_resize_but_rescales() {
    let (mut harness, peer) = attach(session(true, Some(VIEWPORT))).await;

    harness.handle.send(DesktopInput::ViewportResized {
        width: 640,
        height: 400,
    });
    time::sleep(RESIZE_DEBOUNCE + Duration::from_millis(100)).await;
    settle().await;

    assert!(peer.drain_frames().is_empty());
    assert_eq!(drain(&mut harness.events), vec![DesktopEvent::Scale(0.5)]);
}

#[tokio::test(start_paused = true)]
async fn pointer_coordinates_divide_by_display_scale() {
    let (mut harness, peer) = attach(session(true, None)).await;

    // Remote shrinks the buffer to half the viewport in each dimension.
    peer.send_text(&Instruction::size(640, 400).encode());
    settle().await;
    assert_eq!(drain(&mut harness.events), vec![DesktopEvent::Scale(2.0)]);

    harness
        .handle
        .send(DesktopInput::PointerMove { x: 100.0, y: 50.0 });
    harness
        .handle
        .send(DesktopInput::PointerDown(PointerButton::Left));
    harness
        .handle
        .send(DesktopInput::PointerUp(PointerButton::Left));
    settle().await;

    assert_eq!(
        peer.drain_frames(),
        vec![
            Instruction::mouse(50, 25, 0).encode(),
            Instruction::mouse(50, 25, 1).encode(),
            Instruction::mouse(50, 25, 0).encode(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn combination_sends_all_downs_then_all_ups() {
    let (_harness, peer) = attach(session(true, None)).await;

    _harness
        .handle
        .send(DesktopInput::Combination("ctrl-alt-delete".into()));
    settle().await;

    assert_eq!(
        peer.drain_frames(),
        vec![
            Instruction::key(0xffe3, true).encode(),
            Instruction::key(0xffe9, true).encode(),
            Instruction::key(0xffff, true).encode(),
            Instruction::key(0xffe3, false).encode(),
            Instruction::key(0xffe9, false).encode(),
            Instruction::key(0xffff, false).encode(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn inbound_clipboard_lands_in_the_local_sink() {
    let (mut harness, peer) = attach(session(true, None)).await;

    peer.send_text("9.clipboard,1.3,10.text/plain;");
    peer.send_text("4.blob,1.3,8.aGVsbG8=;");
    peer.send_text("3.end,1.3;");
    settle().await;

    assert_eq!(harness.clipboard.snapshot(), "hello");
    assert_eq!(
        drain(&mut harness.events),
        vec![
            DesktopEvent::Notice(CLIPBOARD_RECEIVED_NOTICE.into()),
            DesktopEvent::ClipboardWritten("hello".into()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_clipboard_drops_stream_with_one_notice() {
    let (mut harness, peer) = attach(session(false, None)).await;

    peer.send_text("9.clipboard,1.3,10.text/plain;");
    peer.send_text("4.blob,1.3,8.aGVsbG8=;");
    peer.send_text("4.blob,1.3,8.d29ybGQh;");
    peer.send_text("3.end,1.3;");
    settle().await;

    assert_eq!(harness.clipboard.snapshot(), "");
    assert_eq!(
        drain(&mut harness.events),
        vec![DesktopEvent::Notice(CLIPBOARD_DISABLED_NOTICE.into())]
    );
}

#[tokio::test(start_paused = true)]
async fn unfinalized_clipboard_streams_are_discarded_at_the_cap() {
    let (harness, peer) = attach(session(true, None)).await;

    // Five announcements, none finalized; the oldest four get abandoned.
    for stream in 1..=5 {
        peer.send_text(&format!("9.clipboard,1.{stream},10.text/plain;"));
    }
    settle().await;

    peer.send_text("4.blob,1.1,8.aGVsbG8=;");
    peer.send_text("3.end,1.1;");
    settle().await;
    assert_eq!(harness.clipboard.snapshot(), "");

    // The stream that survived the eviction still completes.
    peer.send_text("4.blob,1.5,8.aGVsbG8=;");
    peer.send_text("3.end,1.5;");
    settle().await;
    assert_eq!(harness.clipboard.snapshot(), "hello");
}

#[tokio::test(start_paused = true)]
async fn outbound_binary_clipboard_is_one_write_then_end() {
    let (harness, peer) = attach(session(true, None)).await;

    harness
        .handle
        .send(DesktopInput::SendClipboardBinary(vec![0, 159, 146, 150]));
    settle().await;

    assert_eq!(
        peer.drain_frames(),
        vec![
            "9.clipboard,1.1,24.application/octet-stream;".to_string(),
            Instruction::blob(1, "AJ+Slg==").encode(),
            Instruction::end(1).encode(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn outbound_clipboard_streams_and_focus_dedupes() {
    let (harness, peer) = attach(session(true, None)).await;

    harness
        .handle
        .send(DesktopInput::SendClipboardText("hi".into()));
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![
            "9.clipboard,1.1,10.text/plain;".to_string(),
            Instruction::blob(1, "aGk=").encode(),
            Instruction::end(1).encode(),
        ]
    );

    // Focus regained with unchanged contents sends nothing.
    harness.clipboard.set("hi");
    harness.handle.send(DesktopInput::FocusGained);
    settle().await;
    assert!(peer.drain_frames().is_empty());

    // Fresh contents go out on the next stream id.
    harness.clipboard.set("new");
    harness.handle.send(DesktopInput::FocusGained);
    settle().await;
    let frames = peer.drain_frames();
    assert_eq!(frames[0], "9.clipboard,1.2,10.text/plain;");
    assert_eq!(frames[2], Instruction::end(2).encode());
}

#[tokio::test(start_paused = true)]
async fn parameter_prompt_round_trip() {
    let (mut harness, peer) = attach(session(true, None)).await;

    peer.send_text("8.required,8.username,8.passcode;");
    settle().await;
    assert_eq!(
        drain(&mut harness.events),
        vec![DesktopEvent::ParameterPrompt(vec![
            "username".into(),
            "passcode".into()
        ])]
    );

    harness.handle.send(DesktopInput::SubmitParameters(vec![
        "alice".into(),
        "s3cret".into(),
    ]));
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![
            Instruction::argv(1, "text/plain", "username").encode(),
            Instruction::blob(1, "YWxpY2U=").encode(),
            Instruction::end(1).encode(),
            Instruction::argv(2, "text/plain", "passcode").encode(),
            Instruction::blob(2, "czNjcmV0").encode(),
            Instruction::end(2).encode(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_prompt_closes_the_session() {
    let (mut harness, peer) = attach(session(true, None)).await;

    peer.send_text("8.required,8.username;");
    settle().await;
    drain(&mut harness.events);

    harness.handle.send(DesktopInput::CancelParameters);
    settle().await;

    let (code, reason) = peer.client_close().expect("cancel close");
    assert_eq!(code, 1000);
    assert_eq!(reason, "parameter negotiation cancelled");
    let events = drain(&mut harness.events);
    assert!(matches!(events[0], DesktopEvent::Notice(_)));
    assert!(events.contains(&DesktopEvent::Closed {
        idle_timeout: false
    }));
}

#[tokio::test(start_paused = true)]
async fn sync_probe_is_answered_with_the_same_stamp() {
    let (_harness, peer) = attach(session(true, None)).await;

    peer.send_text(&Instruction::sync("1234567").encode());
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![Instruction::sync("1234567").encode()]
    );
}

#[tokio::test(start_paused = true)]
async fn key_events_translate_to_keysym_instructions() {
    let (_harness, peer) = attach(session(true, None)).await;
    use gangway::client::keymap::HostKey;

    _harness.handle.send(DesktopInput::KeyDown(HostKey::Char('a')));
    _harness.handle.send(DesktopInput::KeyUp(HostKey::Char('a')));
    _harness
        .handle
        .send(DesktopInput::KeyDown(HostKey::Backspace));
    settle().await;

    assert_eq!(
        peer.drain_frames(),
        vec![
            Instruction::key(0x61, true).encode(),
            Instruction::key(0x61, false).encode(),
            "3.key,5.65288,1.1;".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn remote_error_surfaces_and_ends_the_session() {
    let (mut harness, peer) = attach(session(true, None)).await;

    peer.send_text("5.error,11.host fenced;");
    settle().await;

    let events = drain(&mut harness.events);
    assert_eq!(
        events[0],
        DesktopEvent::Notice("remote error: host fenced".into())
    );
    assert!(events.contains(&DesktopEvent::Closed {
        idle_timeout: false
    }));
    assert_eq!(peer.client_close().map(|(code, _)| code), Some(1000));
}

#[tokio::test(start_paused = true)]
async fn disconnect_sends_instruction_then_closes() {
    let (harness, peer) = attach(session(true, None)).await;

    harness.handle.send(DesktopInput::Disconnect);
    settle().await;

    assert_eq!(peer.drain_frames(), vec![Instruction::disconnect().encode()]);
    assert_eq!(peer.client_close().map(|(code, _)| code), Some(1000));
}
