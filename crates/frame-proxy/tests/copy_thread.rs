mod common;

use common::{is_backend_call, wait_for, Harness, FORMAT, HEIGHT, WIDTH, WINDOW};
use gpu_interop::fake::{Event, Failure, Object};
use gpu_interop::TextureDesc;

#[test]
fn background_thread_copies_frames() {
    let h = Harness::initialized();
    assert!(h.manager.start_copy_thread(&h.source));
    assert!(h.manager.is_copy_thread_running());
    assert!(h.manager.stats().copy_thread_running);

    assert!(wait_for(|| h.manager.stats().frames_presented >= 3));
    h.manager.stop_copy_thread();
    assert!(!h.manager.is_copy_thread_running());

    let stopped_at = h.manager.stats().frames_copied;
    std::thread::sleep(std::time::Duration::from_millis(10));
    assert_eq!(h.manager.stats().frames_copied, stopped_at);
}

#[test]
fn second_start_is_a_no_op() {
    let h = Harness::initialized();
    assert!(h.manager.start_copy_thread(&h.source));
    assert!(h.manager.start_copy_thread(&h.source));

    assert!(h.manager.is_copy_thread_running());
    assert_eq!(h.backend.shared_creations(), 1);

    h.manager.stop_copy_thread();
    assert!(!h.manager.is_copy_thread_running());
    assert!(h.manager.start_copy_thread(&h.source));
    assert!(h.manager.is_copy_thread_running());
}

#[test]
fn start_requires_initialize() {
    let h = Harness::new();
    assert!(!h.manager.start_copy_thread(&h.source));
    assert!(!h.manager.is_copy_thread_running());
}

#[test]
fn failed_probe_starts_nothing() {
    let h = Harness::initialized();
    h.backend.fail(Failure::SharedTextureCreation);

    assert!(!h.manager.start_copy_thread(&h.source));
    assert!(!h.manager.is_copy_thread_running());
    assert_eq!(h.backend.shared_creations(), 0);

    h.backend.heal(Failure::SharedTextureCreation);
    assert!(h.manager.start_copy_thread(&h.source));
}

#[test]
fn same_device_thread_needs_no_bridge() {
    let h = Harness::initialized();
    let device = h.manager.device().unwrap();
    let own = h
        .backend
        .create_source_swap_chain(&device, TextureDesc::new(WIDTH, HEIGHT, FORMAT));

    assert!(h.manager.start_copy_thread(&own));
    assert!(wait_for(|| h.manager.stats().frames_presented >= 1));
    h.manager.stop_copy_thread();
    assert_eq!(h.backend.shared_creations(), 0);
}

#[test]
fn shutdown_stops_thread_before_releasing_devices() {
    let h = Harness::initialized();
    let proxy = h.proxy_device_id();
    let swap_chain = h.manager.swap_chain().unwrap().id();
    let factory = h
        .backend
        .events()
        .iter()
        .find_map(|e| match e {
            Event::Created(Object::Factory(id)) => Some(*id),
            _ => None,
        })
        .unwrap();

    assert!(h.manager.start_copy_thread(&h.source));
    assert!(wait_for(|| h.manager.stats().frames_presented >= 2));

    let before = h.backend.events().len();
    h.manager.shutdown();
    assert!(!h.manager.is_copy_thread_running());
    assert!(!h.manager.stats().copy_thread_running);

    let events = h.backend.events().split_off(before);
    let first_release = events
        .iter()
        .position(|e| matches!(e, Event::Released(_)))
        .unwrap();
    assert!(
        events[first_release..].iter().all(|e| !is_backend_call(e)),
        "backend call after release began: {events:?}"
    );

    let pos = |object: Object| {
        events
            .iter()
            .position(|e| *e == Event::Released(object))
            .unwrap_or_else(|| panic!("{object:?} not released"))
    };
    let swap_chain_at = pos(Object::SwapChain(swap_chain));
    let factory_at = pos(Object::Factory(factory));
    let context_at = pos(Object::Context(proxy));
    let device_at = pos(Object::Device(proxy));
    assert!(swap_chain_at < factory_at);
    assert!(factory_at < context_at);
    assert!(context_at < device_at);
}

#[test]
fn drop_with_running_thread_joins() {
    let h = Harness::initialized();
    assert!(h.manager.start_copy_thread(&h.source));
    assert!(wait_for(|| h.manager.stats().frames_copied >= 1));

    let backend = h.backend.clone();
    let proxy = h.proxy_device_id();
    drop(h);
    assert!(backend.events().contains(&Event::Released(Object::Device(proxy))));
    assert_eq!(backend.copies_on(proxy), backend.presents());
}

#[test]
fn thread_records_on_source_context_only_under_its_lock() {
    let h = Harness::initialized();
    let source = h.source_device.id();

    assert!(h.manager.start_copy_thread(&h.source));
    assert!(wait_for(|| h.manager.stats().frames_presented >= 3));
    h.manager.stop_copy_thread();

    let events = h.backend.events();
    assert!(events.contains(&Event::ContextProtected { device: source }));

    let mut depth = 0;
    let mut source_calls = 0;
    for event in &events {
        match *event {
            Event::ContextLocked { device } if device == source => depth += 1,
            Event::ContextUnlocked { device } if device == source => depth -= 1,
            Event::Copy { device }
            | Event::Flush { device }
            | Event::EndQuery { device }
            | Event::QuerySignaled { device }
            | Event::OpenShared { device }
                if device == source =>
            {
                assert_eq!(depth, 1, "unlocked source call in {events:?}");
                source_calls += 1;
            }
            _ => {}
        }
        assert!((0..=1).contains(&depth));
    }
    assert_eq!(depth, 0);
    assert!(source_calls > 0);
}

#[test]
fn context_protection_failure_starts_nothing() {
    let h = Harness::initialized();
    h.backend.fail(Failure::ContextProtection);

    assert!(!h.manager.start_copy_thread(&h.source));
    assert!(!h.manager.is_copy_thread_running());
}

#[test]
fn reinitialize_stops_the_running_thread_first() {
    let h = Harness::initialized();
    let first = h.proxy_device_id();
    assert!(h.manager.start_copy_thread(&h.source));
    assert!(wait_for(|| h.manager.stats().frames_presented >= 1));

    assert!(h.manager.initialize(Some(WINDOW), WIDTH, HEIGHT, true));
    assert!(!h.manager.is_copy_thread_running());
    assert!(h.backend.events().contains(&Event::Released(Object::Device(first))));

    let presented = h.manager.stats().frames_presented;
    std::thread::sleep(std::time::Duration::from_millis(10));
    assert_eq!(h.manager.stats().frames_presented, presented);
}

#[test]
fn start_racing_shutdown_never_outlives_teardown() {
    for _ in 0..200 {
        let h = Harness::initialized();
        std::thread::scope(|scope| {
            scope.spawn(|| h.manager.start_copy_thread(&h.source));
            h.manager.shutdown();
        });
        assert!(!h.manager.is_initialized());
        assert!(!h.manager.is_copy_thread_running());
    }
}
