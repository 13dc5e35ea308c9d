//! Conversation loop integration tests
//!
//! Device, playback and transport are replaced by recording doubles; time is
//! driven explicitly by passing the observation instant to `dispatch`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley::conversation::{Conversation, ConversationState, Event, Generation, HEARING};
use parley::voice::{PipelineState, VadConfig};
use parley::{AudioResponse, EchoTransport, Fault};
use tokio::sync::Notify;

mod common;
use common::{Harness, MockDevice, MockPlayback, ScriptedTransport};

fn ms(t0: Instant, millis: u64) -> Instant {
    t0 + Duration::from_millis(millis)
}

fn silence_check(h: &Harness) -> Event {
    Event::SilenceCheck {
        generation: h.conversation.generation(),
    }
}

/// Start, speak at `t0`, then run silence checks until the turn ends
fn speak_one_turn(h: &mut Harness, t0: Instant, chunks: &[&[u8]]) {
    h.conversation.dispatch(Event::Start, t0);
    assert_eq!(h.conversation.state(), ConversationState::Listening);

    let sink = h.device.sink();
    for chunk in chunks {
        sink.chunk(chunk.to_vec());
    }
    sink.level(0.5);
    h.drain(t0);

    let check = silence_check(h);
    h.conversation.dispatch(check, ms(t0, 1600));
    assert_eq!(h.conversation.state(), ConversationState::Thinking);
}

#[tokio::test]
async fn test_silence_alone_never_ends_turn() {
    let (transport, sent) = ScriptedTransport::responding(vec![9]);
    let mut h = Harness::new(transport);
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Start, t0);
    let sink = h.device.sink();

    for tick in 1..=30 {
        let now = ms(t0, tick * 100);
        sink.level(0.0);
        sink.level(0.0);
        sink.level(0.0);
        h.drain(now);

        let check = silence_check(&h);
        h.conversation.dispatch(check, now);
    }

    assert_eq!(h.conversation.state(), ConversationState::Listening);
    assert!(!h.conversation.vad().is_speaking());
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_end_of_turn_after_silence() {
    let (transport, sent) = ScriptedTransport::gated(vec![9], Arc::new(Notify::new()));
    let mut h = Harness::new(transport);
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Start, t0);
    let sink = h.device.sink();
    sink.level(0.5);
    h.drain(t0);

    for tick in 1..=15 {
        let now = ms(t0, tick * 100);
        sink.level(0.0);
        h.drain(now);

        let check = silence_check(&h);
        h.conversation.dispatch(check, now);
        assert_eq!(
            h.conversation.state(),
            ConversationState::Listening,
            "ended early at {}ms",
            tick * 100
        );
    }

    let check = silence_check(&h);
    h.conversation.dispatch(check, ms(t0, 1600));

    assert_eq!(h.conversation.state(), ConversationState::Thinking);
    assert_eq!(h.conversation.pipeline().state(), PipelineState::Sealed);
    assert_eq!(h.device.calls(), vec!["acquire", "start", "stop"]);

    // The transport task runs once the test yields
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_mock_round_trip_loops_back_to_listening() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[1], &[2, 3]]);

    h.step(ms(t0, 1700)).await;
    assert_eq!(h.conversation.state(), ConversationState::Speaking);

    let played = h.playback.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].bytes, vec![1, 2, 3]);
    assert_eq!(played[0].content_type, "audio/webm");

    assert!(h.playback.finish());
    h.step(ms(t0, 2500)).await;

    assert_eq!(h.conversation.state(), ConversationState::Listening);
    assert!(!h.conversation.vad().is_speaking());
    assert_eq!(h.conversation.turns_completed(), 1);
    assert_eq!(h.conversation.pipeline().state(), PipelineState::Open);
    assert_eq!(h.conversation.pipeline().chunk_count(), 0);

    // The device is restarted, not reacquired
    assert_eq!(h.device.calls(), vec!["acquire", "start", "stop", "start"]);
}

#[tokio::test]
async fn test_completed_playback_releases_output() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[1]]);
    h.step(ms(t0, 1700)).await;
    assert_eq!(h.conversation.state(), ConversationState::Speaking);
    let stops = h.playback.stops();

    assert!(h.playback.finish());
    h.step(ms(t0, 2500)).await;

    assert_eq!(h.conversation.state(), ConversationState::Listening);
    assert_eq!(h.playback.stops(), stops + 1);
}

#[tokio::test]
async fn test_transport_failure_returns_to_idle() {
    let (transport, sent) = ScriptedTransport::failing("relay returned 500 Internal Server Error");
    let mut h = Harness::new(transport);
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[1, 2, 3]]);
    h.step(ms(t0, 1700)).await;

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert!(h.playback.played().is_empty());
    assert_eq!(sent.lock().unwrap()[0].bytes, vec![1, 2, 3]);
    assert_eq!(h.device.count("release"), 1);

    let status = h.conversation.status();
    assert_eq!(status.headline, "Error");
    assert_eq!(
        status.fault,
        Some(Fault::Transport(
            "relay returned 500 Internal Server Error".to_string()
        ))
    );
}

#[tokio::test]
async fn test_interrupt_while_listening() {
    let (transport, sent) = ScriptedTransport::responding(vec![9]);
    let mut h = Harness::new(transport);
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Start, t0);
    let sink = h.device.sink();
    sink.chunk(vec![1, 2]);
    sink.level(0.5);
    h.drain(t0);

    let stale_check = silence_check(&h);
    h.conversation.dispatch(Event::Interrupt, ms(t0, 200));

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.device.calls(), vec!["acquire", "start", "stop", "release"]);
    assert_eq!(h.conversation.pipeline().state(), PipelineState::Closed);

    // Callbacks from the abandoned phase are dropped
    sink.level(0.9);
    sink.chunk(vec![3]);
    h.drain(ms(t0, 300));
    h.conversation.dispatch(stale_check, ms(t0, 5000));

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.conversation.pipeline().chunk_count(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupt_while_thinking_ignores_result() {
    let gate = Arc::new(Notify::new());
    let (transport, sent) = ScriptedTransport::gated(vec![7, 7], gate.clone());
    let mut h = Harness::new(transport);
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[1]]);
    h.conversation.dispatch(Event::Interrupt, ms(t0, 1650));
    assert_eq!(h.conversation.state(), ConversationState::Idle);

    gate.notify_one();
    let late = h.next_event().await;
    assert!(matches!(late, Event::TransportDone { .. }));
    h.conversation.dispatch(late, ms(t0, 1800));

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert!(h.playback.played().is_empty());
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_interrupt_while_speaking_stops_playback() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[4, 5]]);
    h.step(ms(t0, 1700)).await;
    assert_eq!(h.conversation.state(), ConversationState::Speaking);
    let speaking_generation = h.conversation.generation();

    h.conversation.dispatch(Event::Interrupt, ms(t0, 1800));

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert!(h.playback.stops() >= 1);
    assert!(!h.playback.is_playing());
    assert!(!h.playback.finish(), "stopped playback must not complete");
    assert!(h.conversation.try_next_event().is_none());

    // A completion that slips through anyway is stale
    h.conversation.dispatch(
        Event::PlaybackFinished {
            generation: speaking_generation,
        },
        ms(t0, 1900),
    );
    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.conversation.turns_completed(), 0);
    assert_eq!(h.device.count("release"), 1);
}

#[tokio::test]
async fn test_interrupt_is_idempotent() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Interrupt, t0);
    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert!(h.device.calls().is_empty());

    h.conversation.dispatch(Event::Start, t0);
    h.conversation.dispatch(Event::Interrupt, t0);
    let generation = h.conversation.generation();
    h.conversation.dispatch(Event::Interrupt, t0);

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.conversation.generation(), generation);
    assert_eq!(h.device.count("release"), 1);
}

#[tokio::test]
async fn test_toggle_starts_and_interrupts() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Toggle, t0);
    assert_eq!(h.conversation.state(), ConversationState::Listening);

    // Start is only legal from idle
    h.conversation.dispatch(Event::Start, t0);
    assert_eq!(h.device.count("acquire"), 1);

    h.conversation.dispatch(Event::Toggle, t0);
    assert_eq!(h.conversation.state(), ConversationState::Idle);
}

#[tokio::test]
async fn test_every_transition_bumps_generation() {
    let mut h = Harness::echo();
    let t0 = Instant::now();
    let initial = h.conversation.generation();

    h.conversation.dispatch(Event::Start, t0);
    let listening = h.conversation.generation();
    assert!(listening > initial);

    h.device.sink().level(0.5);
    h.drain(t0);
    assert_eq!(h.conversation.generation(), listening);

    let check = silence_check(&h);
    h.conversation.dispatch(check, ms(t0, 1600));
    assert!(h.conversation.generation() > listening);
}

#[tokio::test]
async fn test_device_denied_stays_idle() {
    let (device, device_probe) = MockDevice::denied();
    let (playback, playback_probe) = MockPlayback::new();
    let mut h = Harness::with_parts(
        Box::new(device),
        device_probe,
        Box::new(playback),
        playback_probe,
        Arc::new(EchoTransport),
    );

    h.conversation.dispatch(Event::Start, Instant::now());

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.device.calls(), vec!["acquire"]);

    let status = h.conversation.status();
    assert_eq!(status.headline, "Mic Error");
    assert_eq!(status.detail, "permission denied");
}

#[tokio::test]
async fn test_device_fault_while_listening() {
    let mut h = Harness::echo();
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Start, t0);
    h.device.sink().fault("device unplugged");
    h.drain(t0);

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(h.device.count("release"), 1);
    assert_eq!(
        h.conversation.status().fault,
        Some(Fault::Device("device unplugged".to_string()))
    );
}

#[tokio::test]
async fn test_playback_rejection_returns_to_idle() {
    let (device, device_probe) = MockDevice::new();
    let (playback, playback_probe) = MockPlayback::rejecting();
    let mut h = Harness::with_parts(
        Box::new(device),
        device_probe,
        Box::new(playback),
        playback_probe,
        Arc::new(EchoTransport),
    );
    let t0 = Instant::now();

    speak_one_turn(&mut h, t0, &[&[1]]);
    h.step(ms(t0, 1700)).await;

    assert_eq!(h.conversation.state(), ConversationState::Idle);
    assert_eq!(
        h.conversation.status().fault,
        Some(Fault::Playback("unsupported format".to_string()))
    );
}

#[tokio::test]
async fn test_status_tracks_speech() {
    let mut h = Harness::echo();
    let mut status = h.conversation.subscribe();
    let t0 = Instant::now();

    h.conversation.dispatch(Event::Start, t0);
    assert_eq!(status.borrow_and_update().headline, "Listening...");

    let sink = h.device.sink();
    sink.level(0.3);
    h.drain(t0);
    {
        let current = status.borrow_and_update();
        assert_eq!(current.detail, HEARING);
        assert!((current.ring_size - 180.0).abs() < 1e-3);
    }

    sink.level(0.0);
    h.drain(ms(t0, 100));
    {
        let current = status.borrow_and_update();
        assert_eq!(current.detail, "");
        assert!((current.ring_size - 150.0).abs() < 1e-3);
    }

    let check = silence_check(&h);
    h.conversation.dispatch(check, ms(t0, 1600));
    let current = status.borrow_and_update();
    assert_eq!(current.headline, "Thinking...");
    assert_eq!(current.detail, "Asking the AI...");
}

#[tokio::test]
async fn test_silence_timer_posts_checks() {
    let (device, device_probe) = MockDevice::new();
    let (playback, _) = MockPlayback::new();
    let vad = VadConfig {
        check_interval: Duration::from_millis(10),
        ..VadConfig::default()
    };
    let mut conversation = Conversation::new(
        vad,
        Box::new(device),
        Box::new(playback),
        Arc::new(EchoTransport),
    );

    conversation.dispatch(Event::Start, Instant::now());
    assert_eq!(device_probe.count("start"), 1);

    let event = tokio::time::timeout(Duration::from_secs(2), conversation.next_event())
        .await
        .expect("no silence check within two seconds")
        .expect("queue closed");

    match event {
        Event::SilenceCheck { generation } => assert_eq!(generation, conversation.generation()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::echo();
    let Harness {
        conversation,
        device,
        ..
    } = h;

    let handle = conversation.handle();
    assert!(handle.start());
    assert!(handle.shutdown());

    tokio::time::timeout(Duration::from_secs(2), conversation.run())
        .await
        .expect("run did not stop");

    assert_eq!(device.calls(), vec!["acquire", "start", "stop", "release"]);
    assert!(!handle.toggle(), "loop is gone after shutdown");
}

/// Build an event of the named kind under `generation`
fn event_of(kind: &str, generation: Generation) -> Event {
    match kind {
        "level" => Event::Level {
            generation,
            level: 0.9,
        },
        "chunk" => Event::Chunk {
            generation,
            bytes: vec![42],
        },
        "silence_check" => Event::SilenceCheck { generation },
        "transport_done" => Event::TransportDone {
            generation,
            result: Ok(AudioResponse {
                bytes: vec![1],
                content_type: "audio/mpeg".to_string(),
            }),
        },
        "playback_finished" => Event::PlaybackFinished { generation },
        "fault" => Event::Fault {
            generation,
            fault: Fault::Device("unplugged".to_string()),
        },
        other => panic!("unknown event kind {other}"),
    }
}

/// A conversation parked in `state` with nothing left in flight
async fn parked_in(state: ConversationState, t0: Instant) -> Harness {
    match state {
        ConversationState::Idle => Harness::echo(),
        ConversationState::Listening => {
            let mut h = Harness::echo();
            h.conversation.dispatch(Event::Start, t0);
            h
        }
        ConversationState::Thinking => {
            let (transport, _) = ScriptedTransport::gated(vec![9], Arc::new(Notify::new()));
            let mut h = Harness::new(transport);
            speak_one_turn(&mut h, t0, &[&[1]]);
            h
        }
        ConversationState::Speaking => {
            let mut h = Harness::echo();
            speak_one_turn(&mut h, t0, &[&[1]]);
            h.step(ms(t0, 1700)).await;
            h
        }
    }
}

#[tokio::test]
async fn test_current_generation_events_outside_table_are_ignored() {
    let cases: [(ConversationState, &[&str]); 4] = [
        (
            ConversationState::Idle,
            &["level", "chunk", "silence_check", "transport_done", "playback_finished", "fault"],
        ),
        (ConversationState::Listening, &["transport_done", "playback_finished"]),
        (ConversationState::Thinking, &["level", "chunk", "silence_check", "playback_finished"]),
        (ConversationState::Speaking, &["level", "chunk", "silence_check", "transport_done"]),
    ];

    for (state, kinds) in cases {
        for kind in kinds {
            let t0 = Instant::now();
            let mut h = parked_in(state, t0).await;
            assert_eq!(h.conversation.state(), state);

            let generation = h.conversation.generation();
            let calls = h.device.calls();
            let played = h.playback.played().len();
            let stops = h.playback.stops();
            let chunks = h.conversation.pipeline().chunk_count();
            let pipeline = h.conversation.pipeline().state();
            let status = h.conversation.status();

            let running = h.conversation.dispatch(event_of(kind, generation), ms(t0, 5000));

            assert!(running, "{kind} in {state}");
            assert_eq!(h.conversation.state(), state, "{kind} in {state}");
            assert_eq!(h.conversation.generation(), generation, "{kind} in {state}");
            assert_eq!(h.device.calls(), calls, "{kind} in {state}");
            assert_eq!(h.playback.played().len(), played, "{kind} in {state}");
            assert_eq!(h.playback.stops(), stops, "{kind} in {state}");
            assert_eq!(h.conversation.pipeline().chunk_count(), chunks, "{kind} in {state}");
            assert_eq!(h.conversation.pipeline().state(), pipeline, "{kind} in {state}");
            assert_eq!(h.conversation.status(), status, "{kind} in {state}");
            assert_eq!(h.conversation.turns_completed(), 0, "{kind} in {state}");
        }
    }
}
