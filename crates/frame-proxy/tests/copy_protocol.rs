mod common;

use std::sync::Arc;

use common::{Harness, FORMAT, HEIGHT, WIDTH, WINDOW};
use frame_proxy::{ColorSpace, PixelFormat, PollBudget, ProxySettings};
use gpu_interop::fake::{Event, Failure};
use gpu_interop::TextureDesc;
use parking_lot::RwLock;

#[test]
fn two_healthy_frames_are_copied_and_presented() {
    let h = Harness::initialized();
    let proxy = h.proxy_device_id();

    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert!(h.manager.copy_frame_from_game_thread(&h.source));

    let stats = h.manager.stats();
    assert_eq!(stats.frames_copied, 2);
    assert_eq!(stats.frames_presented, 2);
    assert_eq!(stats.frames_generated, 0);
    assert_eq!(h.backend.copies_on(proxy), 2);
    assert_eq!(h.backend.copies_on(h.source_device.id()), 2);
    assert_eq!(h.backend.presents(), 2);
    assert_eq!(h.backend.shared_creations(), 1);
    assert_eq!(h.backend.query_creations(), 1);
}

#[test]
fn proxy_copy_waits_for_the_fence() {
    let h = Harness::initialized();
    h.backend.set_query_latency(4);
    let proxy = h.proxy_device_id();
    let source = h.source_device.id();

    assert!(h.manager.copy_frame_from_game_thread(&h.source));

    let events = h.backend.events();
    let signaled = events
        .iter()
        .position(|e| *e == Event::QuerySignaled { device: source })
        .unwrap();
    let proxy_copy = events
        .iter()
        .position(|e| *e == Event::Copy { device: proxy })
        .unwrap();
    let present = events
        .iter()
        .position(|e| matches!(e, Event::Present { .. }))
        .unwrap();
    assert!(signaled < proxy_copy);
    assert!(proxy_copy < present);
}

#[test]
fn unsignaled_fence_never_reaches_the_proxy() {
    let h = Harness::initialized();
    h.manager.set_poll_budget(PollBudget::polls(8));
    h.backend.fail(Failure::QueryNeverSignals);
    let proxy = h.proxy_device_id();

    for _ in 0..4 {
        assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    }

    assert_eq!(h.backend.copies_on(proxy), 0);
    assert_eq!(h.backend.presents(), 0);
    let stats = h.manager.stats();
    assert_eq!(stats.frames_copied, 0);
    assert_eq!(stats.frames_presented, 0);

    h.backend.heal(Failure::QueryNeverSignals);
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.backend.copies_on(proxy), 1);
}

#[test]
fn missing_fence_degrades_to_sleep() {
    let h = Harness::initialized();
    h.backend.fail(Failure::QueryCreation);

    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.backend.query_creations(), 1);
    assert_eq!(h.manager.stats().frames_presented, 2);
}

#[test]
fn same_device_source_skips_the_bridge() {
    let h = Harness::initialized();
    let device = h.manager.device().unwrap();
    let own = h
        .backend
        .create_source_swap_chain(&device, TextureDesc::new(WIDTH, HEIGHT, FORMAT));

    assert!(h.manager.copy_frame_from_game_thread(&own));
    assert_eq!(h.backend.shared_creations(), 0);
    assert_eq!(h.backend.query_creations(), 0);
    assert_eq!(h.backend.copies_on(device.id()), 1);
    assert_eq!(h.manager.stats().frames_presented, 1);
}

#[test]
fn device_only_mode_cannot_copy() {
    let h = Harness::new();
    assert!(h.manager.initialize(None, 0, 0, false));
    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.manager.stats().frames_copied, 0);
}

#[test]
fn copy_before_initialize_fails() {
    let h = Harness::new();
    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    assert!(h.backend.events().iter().all(|e| !common::is_backend_call(e)));
}

#[test]
fn disabled_settings_skip_the_copy() {
    let settings = Arc::new(RwLock::new(ProxySettings::default()));
    let h = Harness::with_settings(settings.clone());
    assert!(h.manager.initialize(Some(WINDOW), WIDTH, HEIGHT, true));

    settings.write().enabled = false;
    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.backend.presents(), 0);

    settings.write().enabled = true;
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
}

#[test]
fn replaced_settings_take_effect() {
    let h = Harness::initialized();
    h.manager.set_settings(ProxySettings {
        enabled: false,
        ..Default::default()
    });
    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
}

#[test]
fn source_resize_follows_through() {
    let h = Harness::initialized();
    assert!(h.manager.copy_frame_from_game_thread(&h.source));

    let smaller = h.source_with(TextureDesc::new(1280, 720, FORMAT));
    assert!(h.manager.copy_frame_from_game_thread(&smaller));

    let stats = h.manager.stats();
    assert_eq!((stats.width, stats.height), (1280, 720));
    assert_eq!(h.manager.swap_chain().unwrap().desc().dimensions(), (1280, 720));
    assert_eq!(h.backend.shared_creations(), 2);
    assert!(!h.backend.events().iter().any(|e| matches!(e, Event::CopyRejected { .. })));
}

#[test]
fn failed_resize_drops_the_frame() {
    let h = Harness::initialized();
    h.backend.fail(Failure::Resize);
    let smaller = h.source_with(TextureDesc::new(1280, 720, FORMAT));

    assert!(!h.manager.copy_frame_from_game_thread(&smaller));
    assert_eq!(h.manager.stats().width, WIDTH);
    assert_eq!(h.backend.presents(), 0);
}

#[test]
fn default_settings_bridge_an_8bit_source() {
    let h = Harness::initialized();
    let bgra = h.source_with(TextureDesc::new(WIDTH, HEIGHT, PixelFormat::Bgra8Unorm));

    for _ in 0..10 {
        assert!(h.manager.copy_frame_from_game_thread(&bgra));
    }

    let stats = h.manager.stats();
    assert_eq!(stats.frames_copied, 10);
    assert_eq!(stats.frames_presented, 10);
    assert_eq!(stats.format, Some(PixelFormat::Bgra8Unorm));
    assert_eq!(h.backend.copies_on(h.proxy_device_id()), 10);
    assert!(!h.backend.events().iter().any(|e| matches!(e, Event::CopyRejected { .. })));

    let swap_chain = h.manager.swap_chain().unwrap();
    assert_eq!(swap_chain.desc().format, PixelFormat::Bgra8Unorm);
    assert_eq!(swap_chain.color_space(), Some(ColorSpace::Srgb));
    assert_eq!(h.manager.output_color_space(), Some(ColorSpace::Srgb));
    let resizes = h
        .backend
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Resize { .. }))
        .count();
    assert_eq!(resizes, 1);

    assert!(h.manager.set_output_color_space());
    assert_eq!(h.manager.output_color_space(), Some(ColorSpace::Srgb));
}

#[test]
fn unpresentable_source_format_is_refused_until_it_changes() {
    let h = Harness::initialized();
    let odd = h.source_with(TextureDesc::new(WIDTH, HEIGHT, PixelFormat::Other(87)));

    for _ in 0..5 {
        assert!(!h.manager.copy_frame_from_game_thread(&odd));
    }
    assert_eq!(h.backend.copies_on(h.proxy_device_id()), 0);
    assert_eq!(h.backend.presents(), 0);
    assert_eq!(h.manager.stats().format, Some(FORMAT));

    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.manager.stats().frames_presented, 1);
}

#[test]
fn present_failure_loses_only_that_frame() {
    let h = Harness::initialized();
    h.backend.fail(Failure::Present);

    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    let stats = h.manager.stats();
    assert_eq!(stats.frames_copied, 1);
    assert_eq!(stats.frames_presented, 0);

    h.backend.heal(Failure::Present);
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.manager.stats().frames_presented, 1);
}

#[test]
fn unreadable_source_drops_the_frame() {
    let h = Harness::initialized();
    h.backend.fail(Failure::BackBuffer);
    assert!(!h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.manager.stats().frames_copied, 0);
}

#[test]
fn present_uses_tearing_when_enabled() {
    let h = Harness::initialized();
    assert!(h.manager.copy_frame_from_game_thread(&h.source));

    let h2 = Harness::with_settings(ProxySettings {
        allow_tearing: false,
        ..Default::default()
    });
    assert!(h2.manager.initialize(Some(WINDOW), WIDTH, HEIGHT, true));
    assert!(h2.manager.copy_frame_from_game_thread(&h2.source));

    let present = |events: Vec<Event>| {
        events.into_iter().find_map(|e| match e {
            Event::Present {
                sync_interval,
                allow_tearing,
                ..
            } => Some((sync_interval, allow_tearing)),
            _ => None,
        })
    };
    assert_eq!(present(h.backend.events()), Some((0, true)));
    assert_eq!(present(h2.backend.events()), Some((1, false)));
}

#[test]
fn shutdown_releases_shared_resources() {
    let h = Harness::initialized();
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    h.manager.shutdown();

    assert!(h.manager.initialize(Some(WINDOW), WIDTH, HEIGHT, true));
    assert!(h.manager.copy_frame_from_game_thread(&h.source));
    assert_eq!(h.backend.shared_creations(), 2);
    assert_eq!(h.backend.query_creations(), 2);
    assert_eq!(h.backend.opens(), 2);
}
