//! End-to-end daemon tests without devices
//!
//! Input comes from channel sources and sound goes to a recording output, so
//! these run anywhere: no audio card, no /dev/input, no display.

mod common;

use common::*;
use keyclack::config::Config;
use keyclack::control::protocol::{self, Command};
use keyclack::control::{ControlClient, ControlServer};
use keyclack::daemon::{Daemon, DaemonOptions};
use keyclack::daemon_manager::{DaemonManager, StartOptions, StartOutcome};
use keyclack::error::{KeyclackError, ProtocolError};
use keyclack::input::InputEvent;
use keyclack::lock::InstanceLock;
use keyclack::profile::DeviceClass;
use keyclack::state::read_state;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

// ============================================================================
// Input to playback
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn keyboard_profile_plays_press_and_release_clips() {
    let h = harness(80);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    let keyboard = h.injectors.get(DeviceClass::Keyboard);

    for event in [
        InputEvent::press(DeviceClass::Keyboard, "a"),
        // Autorepeat while held
        InputEvent::press(DeviceClass::Keyboard, "a"),
        InputEvent::press(DeviceClass::Keyboard, "a"),
        InputEvent::release(DeviceClass::Keyboard, "a"),
        InputEvent::press(DeviceClass::Keyboard, "space"),
        InputEvent::release(DeviceClass::Keyboard, "space"),
    ] {
        assert!(keyboard.send(event).await);
    }

    assert!(wait_until(|| h.output.played().len() >= 3).await);
    // Nothing else trickles in
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let played = h.output.played();
    let frames: Vec<usize> = played.iter().map(|p| p.frames).collect();
    assert_eq!(frames, vec![KEY_FRAMES, SPACE_DOWN_FRAMES, SPACE_UP_FRAMES]);
    assert!(played.iter().all(|p| (p.volume - 0.8).abs() < 1e-6));
    assert!(h.ctx.key_down_set().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_presses_reuse_the_decoded_clip() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    let keyboard = h.injectors.get(DeviceClass::Keyboard);

    for key in ["a", "b"] {
        keyboard.send(InputEvent::press(DeviceClass::Keyboard, key)).await;
        keyboard.send(InputEvent::release(DeviceClass::Keyboard, key)).await;
    }

    assert!(wait_until(|| h.output.played().len() >= 2).await);
    let played = h.output.played();
    assert_eq!(played[0].buffer_id, played[1].buffer_id);
    assert_eq!(h.ctx.pipeline().cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn keyboard_and_mouse_play_independently() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    h.ctx
        .set_profile(DeviceClass::Mouse, "clicky")
        .await
        .unwrap();

    h.injectors
        .get(DeviceClass::Mouse)
        .send(InputEvent::press(DeviceClass::Mouse, "left"))
        .await;
    assert!(wait_until(|| h.output.played().len() == 1).await);
    assert_eq!(h.output.played()[0].frames, CLICK_FRAMES);

    let state = read_state(&h.root.path().join("daemon.json")).unwrap().unwrap();
    assert_eq!(state.profile.as_deref(), Some("ios"));
    assert_eq!(state.mouse_profile.as_deref(), Some("clicky"));
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_daemon_stays_silent() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    h.ctx.set_enabled(false);

    let keyboard = h.injectors.get(DeviceClass::Keyboard);
    keyboard.send(InputEvent::press(DeviceClass::Keyboard, "a")).await;
    keyboard.send(InputEvent::release(DeviceClass::Keyboard, "a")).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(h.output.played().is_empty());

    h.ctx.set_enabled(true);
    keyboard.send(InputEvent::press(DeviceClass::Keyboard, "a")).await;
    assert!(wait_until(|| h.output.played().len() == 1).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn profile_loaded_while_disabled_follows_the_daemon_switch() {
    let h = harness(100);
    h.ctx.set_enabled(false);
    h.ctx
        .set_profile(DeviceClass::Mouse, "clicky")
        .await
        .unwrap();

    let mouse = h.ctx.resolver(DeviceClass::Mouse).unwrap();
    assert!(!mouse.is_enabled());

    h.ctx.set_enabled(true);
    assert!(mouse.is_enabled());

    // Flipping the switch during a load still leaves one answer for everyone
    let ctx = Arc::clone(&h.ctx);
    let load = tokio::spawn(async move { ctx.set_profile(DeviceClass::Keyboard, "ios").await });
    h.ctx.set_enabled(false);
    load.await.unwrap().unwrap();
    assert!(!h.ctx.is_enabled());
    assert!(!h.ctx.resolver(DeviceClass::Keyboard).unwrap().is_enabled());
    assert!(!mouse.is_enabled());
}

// ============================================================================
// Reconfiguration
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn empty_profile_stops_the_listener() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    assert!(h.ctx.is_listening(DeviceClass::Keyboard).await);
    let keyboard = h.injectors.get(DeviceClass::Keyboard);
    assert!(keyboard.is_running());

    h.ctx
        .set_profile(DeviceClass::Mouse, "clicky")
        .await
        .unwrap();

    h.ctx.set_profile(DeviceClass::Keyboard, "").await.unwrap();

    assert!(!h.ctx.is_listening(DeviceClass::Keyboard).await);
    h.ctx
        .handle_input(&InputEvent::press(DeviceClass::Keyboard, "a"));
    h.injectors
        .get(DeviceClass::Mouse)
        .send(InputEvent::press(DeviceClass::Mouse, "left"))
        .await;
    assert!(wait_until(|| !h.output.played().is_empty()).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let played = h.output.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].frames, CLICK_FRAMES);

    assert!(!keyboard.is_running());
    assert!(h.ctx.resolver(DeviceClass::Keyboard).is_none());
    let state = read_state(&h.root.path().join("daemon.json")).unwrap().unwrap();
    assert_eq!(state.profile, None);

    // Switching back starts a fresh listener
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    assert!(h.ctx.is_listening(DeviceClass::Keyboard).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_profile_switch_keeps_the_old_profile() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();

    assert!(h
        .ctx
        .set_profile(DeviceClass::Keyboard, "missing")
        .await
        .is_err());
    // A mouse profile cannot drive the keyboard
    assert!(h
        .ctx
        .set_profile(DeviceClass::Keyboard, "clicky")
        .await
        .is_err());

    assert_eq!(
        h.ctx.resolver(DeviceClass::Keyboard).unwrap().profile().name(),
        "ios"
    );
    assert_eq!(h.ctx.settings().keyboard_profile.as_deref(), Some("ios"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_volume_changes_leave_a_consistent_record() {
    let h = harness(100);
    h.ctx.persist();

    let state_path = h.root.path().join("daemon.json");
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let state_path = state_path.clone();
        std::thread::spawn(move || {
            while !done.load(std::sync::atomic::Ordering::Acquire) {
                // A half-written record would fail to parse
                read_state(&state_path).unwrap().unwrap();
            }
        })
    };

    let mut tasks = Vec::new();
    for volume in 0..32u32 {
        let ctx = Arc::clone(&h.ctx);
        tasks.push(tokio::spawn(async move { ctx.set_volume(volume).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    done.store(true, std::sync::atomic::Ordering::Release);
    reader.join().unwrap();

    let state = read_state(&state_path).unwrap().unwrap();
    assert_eq!(state.volume, h.ctx.settings().volume);
    assert_eq!(state, h.ctx.state());

    // No temp files left behind
    let leftovers: Vec<_> = std::fs::read_dir(h.root.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".daemon-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn pitch_shift_is_recorded() {
    let h = harness(100);
    h.ctx.set_pitch_shift("2,-2", Some("ios")).await.unwrap();

    let state = h.ctx.state();
    let pitch = state.pitch_shift.unwrap();
    assert_eq!((pitch.lower, pitch.upper), (-2, 2));
    assert_eq!(pitch.profile.as_deref(), Some("ios"));

    assert!(h.ctx.set_pitch_shift("loud", None).await.is_err());
    h.ctx.set_pitch_shift("", None).await.unwrap();
    assert!(h.ctx.state().pitch_shift.is_none());
}

// ============================================================================
// Control server
// ============================================================================

async fn serve(h: &Harness) -> u16 {
    let server = ControlServer::bind(0, Arc::clone(&h.ctx)).await.unwrap();
    let port = server.port().unwrap();
    h.ctx.set_api_port(port);
    tokio::spawn(server.run(h.ctx.shutdown_requested()));
    port
}

#[tokio::test(flavor = "multi_thread")]
async fn control_client_round_trip() {
    let h = harness(100);
    let port = serve(&h).await;
    let mut client = ControlClient::connect(port).await.unwrap();

    client
        .request(&Command::SetVolume { volume: 30 })
        .await
        .unwrap();
    client
        .request(&Command::SetProfile {
            profile: "ios".to_string(),
        })
        .await
        .unwrap();

    let status = client.request(&Command::GetStatus).await.unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["state"]["volume"], 30);
    assert_eq!(status["state"]["profile"], "ios");
    assert_eq!(status["state"]["api_port"], port);

    let err = client
        .request(&Command::SetVolume { volume: 101 })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Command(_)));

    let err = client.request(&Command::ShowDaemonWindow).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Command(_)));

    h.ctx.request_shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_pitch_is_refused_and_playback_continues() {
    let h = harness(100);
    h.ctx
        .set_profile(DeviceClass::Keyboard, "ios")
        .await
        .unwrap();
    let port = serve(&h).await;
    let mut client = ControlClient::connect(port).await.unwrap();

    let err = client
        .request(&Command::SetPitchShift {
            semitones: "-2000,-2000".to_string(),
            profile: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Command(_)));
    assert!(h.ctx.settings().pitch.is_none());

    let keyboard = h.injectors.get(DeviceClass::Keyboard);
    keyboard.send(InputEvent::press(DeviceClass::Keyboard, "a")).await;
    assert!(wait_until(|| h.output.played().len() == 1).await);
    assert_eq!(h.output.played()[0].frames, KEY_FRAMES);

    h.ctx.request_shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_frames_do_not_close_the_connection() {
    let h = harness(100);
    let port = serve(&h).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"%%% not base64 %%%\n").await.unwrap();
    let unknown = protocol::encode_frame(&serde_json::json!({"action": "reboot", "id": 1}));
    writer
        .write_all(format!("{}\n", unknown).as_bytes())
        .await
        .unwrap();
    let status = protocol::encode_request(&Command::GetStatus, Some(2)).unwrap();
    writer
        .write_all(format!("{}\n", status).as_bytes())
        .await
        .unwrap();

    let first = protocol::decode_frame(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["id"], 1);
    assert!(first.get("error").is_some());

    let second = protocol::decode_frame(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(second["id"], 2);
    assert_eq!(second["status"], "ok");

    h.ctx.request_shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn fire_and_forget_commands_apply() {
    let h = harness(100);
    let port = serve(&h).await;
    let mut client = ControlClient::connect(port).await.unwrap();

    client
        .send(&Command::SetVolume { volume: 12 })
        .await
        .unwrap();
    assert!(wait_until(|| h.ctx.settings().volume == 12).await);

    h.ctx.request_shutdown();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn start_reconfigures_a_running_daemon() {
    let h = harness(100);
    serve(&h).await;
    h.ctx.persist();

    let manager = DaemonManager::new(h.root.path()).with_executable("/nonexistent/keyclack");
    assert!(manager.status().is_running());

    let options = StartOptions {
        volume: 25,
        profile: Some("ios".to_string()),
        mouse_profile: Some("clicky".to_string()),
        pitch: Some("-1,1".to_string()),
        pitch_profile: None,
    };
    let outcome = manager.start(&options).await.unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Reconfigured {
            pid: std::process::id()
        }
    );

    let settings = h.ctx.settings();
    assert_eq!(settings.volume, 25);
    assert_eq!(settings.keyboard_profile.as_deref(), Some("ios"));
    assert_eq!(settings.mouse_profile.as_deref(), Some("clicky"));
    assert!(settings.pitch.is_some());

    let record = manager.record().unwrap();
    assert_eq!(record.volume, 25);

    h.ctx.request_shutdown();
}

fn daemon_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.root = Some(root.to_string_lossy().into_owned());
    config.control.port = 0;
    config.playback.workers = 1;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn daemon_runs_and_cleans_up() {
    let root = storage_root();
    let injectors = Injectors::default();
    let output = keyclack::audio::output::RecordingOutput::new();

    let daemon = Daemon::new(
        daemon_config(root.path()),
        DaemonOptions {
            volume: Some(60),
            profile: Some("ios".to_string()),
            ..Default::default()
        },
    )
    .with_output(Arc::new(output.clone()))
    .with_source_factory(injectors.factory());
    let trigger = daemon.shutdown_trigger();
    let task = tokio::spawn(daemon.run());

    let state_path = root.path().join("daemon.json");
    assert!(
        wait_until(|| matches!(
            read_state(&state_path),
            Ok(Some(ref s)) if s.profile.as_deref() == Some("ios") && s.api_port != 0
        ))
        .await
    );

    let record = read_state(&state_path).unwrap().unwrap();
    assert_eq!(record.volume, 60);
    let mut client = ControlClient::connect(record.api_port).await.unwrap();
    client
        .request(&Command::SetVolume { volume: 10 })
        .await
        .unwrap();

    injectors
        .get(DeviceClass::Keyboard)
        .send(InputEvent::press(DeviceClass::Keyboard, "q"))
        .await;
    assert!(wait_until(|| output.played().len() == 1).await);
    assert!((output.played()[0].volume - 0.1).abs() < 1e-6);

    trigger.trigger();
    task.await.unwrap().unwrap();

    assert!(!state_path.exists());
    // The lock is free again
    InstanceLock::acquire(&root.path().join("daemon.lock")).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn second_daemon_exits_without_touching_state() {
    let root = storage_root();
    let _held = InstanceLock::acquire(&root.path().join("daemon.lock")).unwrap();

    let daemon = Daemon::new(daemon_config(root.path()), DaemonOptions::default())
        .with_output(Arc::new(keyclack::audio::output::NullOutput))
        .with_source_factory(Injectors::default().factory());
    daemon.run().await.unwrap();

    assert!(!root.path().join("daemon.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn daemon_with_broken_profile_fails_startup() {
    let root = storage_root();
    let daemon = Daemon::new(
        daemon_config(root.path()),
        DaemonOptions {
            profile: Some("missing".to_string()),
            ..Default::default()
        },
    )
    .with_output(Arc::new(keyclack::audio::output::NullOutput))
    .with_source_factory(Injectors::default().factory());

    let err = daemon.run().await.unwrap_err();
    assert!(matches!(err, KeyclackError::Profile(_)));
    assert!(!root.path().join("daemon.json").exists());
}
