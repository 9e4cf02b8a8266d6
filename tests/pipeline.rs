use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flotilla::{
    AppResult, ConnectionContext, EchoHandler, EndpointConfig, HandlerRegistry, LineDecoder,
    LineEncoder, PipelineBuilder, ServerError, ServerHandler,
};

fn endpoint(name: &str, handler_name: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        port: 9000,
        boss_count: 1,
        worker_count: 1,
        reader_idle_time_seconds: 5,
        writer_idle_time_seconds: 0,
        all_idle_time_seconds: 0,
        handler_name: handler_name.to_string(),
        keep_alive: true,
        backlog: 10,
        tcp_no_delay: true,
        decoder_name: None,
        encoder_name: None,
        use_native_transport: true,
    }
}

struct Noop;

impl ServerHandler for Noop {
    fn on_read(&mut self, _ctx: &mut ConnectionContext, _msg: Bytes) -> AppResult<()> {
        Ok(())
    }
}

fn noop_factory() -> Arc<dyn Fn() -> Box<dyn ServerHandler> + Send + Sync> {
    Arc::new(|| Box::new(Noop))
}

fn sample_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_handler("Last", "echo", 9, true, noop_factory())
        .register_handler("EchoHandler", "echo", 1, true, Arc::new(|| Box::new(EchoHandler)))
        .register_handler("Middle", "echo", 5, false, noop_factory());
    registry
}

#[test]
fn chain_resolution_is_deterministic() {
    let mut summaries = Vec::new();
    for _ in 0..3 {
        let frozen = sample_registry().freeze();
        let mut pool = frozen.descriptor_pool();
        let spec = PipelineBuilder::build(&endpoint("echo", "EchoHandler"), &mut pool, &frozen)
            .unwrap();
        summaries.push(spec.summary());
    }
    assert_eq!(summaries[0], summaries[1]);
    assert_eq!(summaries[1], summaries[2]);
    assert_eq!(
        summaries[0],
        vec!["idle-monitor", "EchoHandler", "Middle", "Last"]
    );
}

#[test]
fn equal_orders_keep_registration_order() {
    let mut registry = HandlerRegistry::new();
    registry
        .register_handler("First", "s", 3, true, noop_factory())
        .register_handler("Second", "s", 3, true, noop_factory())
        .register_handler("Third", "s", 3, true, noop_factory());
    let frozen = registry.freeze();
    let mut pool = frozen.descriptor_pool();
    let spec = PipelineBuilder::build(&endpoint("s", "First"), &mut pool, &frozen).unwrap();
    assert_eq!(
        spec.summary(),
        vec!["idle-monitor", "First", "Second", "Third"]
    );
}

#[test]
fn codecs_slot_between_idle_monitor_and_handlers() {
    let mut registry = HandlerRegistry::new();
    registry.register_handler("EchoHandler", "echo", 1, true, Arc::new(|| Box::new(EchoHandler)));
    registry.register_decoder("LineDecoder", Arc::new(|| Box::new(LineDecoder::default())));
    registry.register_encoder("LineEncoder", Arc::new(|| Box::new(LineEncoder)));
    let frozen = registry.freeze();
    let mut pool = frozen.descriptor_pool();

    let mut config = endpoint("echo", "EchoHandler");
    config.decoder_name = Some("LineDecoder".to_string());
    config.encoder_name = Some("LineEncoder".to_string());

    let spec = PipelineBuilder::build(&config, &mut pool, &frozen).unwrap();
    assert_eq!(
        spec.summary(),
        vec!["idle-monitor", "LineDecoder", "LineEncoder", "EchoHandler"]
    );
}

#[test]
fn missing_business_handler_fails_resolution() {
    let frozen = sample_registry().freeze();
    let mut pool = frozen.descriptor_pool();
    let err = PipelineBuilder::build(&endpoint("echo", "MissingHandler"), &mut pool, &frozen)
        .unwrap_err();
    match err {
        ServerError::HandlerResolution { server, name } => {
            assert_eq!(server, "echo");
            assert_eq!(name, "MissingHandler");
        }
        other => panic!("expected handler resolution error, got {:?}", other),
    }
}

#[test]
fn missing_decoder_fails_resolution() {
    let frozen = sample_registry().freeze();
    let mut pool = frozen.descriptor_pool();
    let mut config = endpoint("echo", "EchoHandler");
    config.decoder_name = Some("NoSuchDecoder".to_string());
    let err = PipelineBuilder::build(&config, &mut pool, &frozen).unwrap_err();
    match err {
        ServerError::HandlerResolution { name, .. } => assert_eq!(name, "NoSuchDecoder"),
        other => panic!("expected handler resolution error, got {:?}", other),
    }
}

#[test]
fn consumed_descriptors_leave_the_pool() {
    let frozen = sample_registry().freeze();
    let mut pool = frozen.descriptor_pool();
    PipelineBuilder::build(&endpoint("echo", "EchoHandler"), &mut pool, &frozen).unwrap();
    assert!(pool.is_empty());

    // a second resolution for the same server finds nothing left
    let err = PipelineBuilder::build(&endpoint("echo", "EchoHandler"), &mut pool, &frozen)
        .unwrap_err();
    assert!(matches!(err, ServerError::HandlerResolution { .. }));
}

#[test]
fn sharable_handler_is_instantiated_once_at_build() {
    let shared_builds = Arc::new(AtomicUsize::new(0));
    let fresh_builds = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    let shared_counter = shared_builds.clone();
    registry.register_handler(
        "Shared",
        "s",
        1,
        true,
        Arc::new(move || {
            shared_counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Noop)
        }),
    );
    let fresh_counter = fresh_builds.clone();
    registry.register_handler(
        "Fresh",
        "s",
        2,
        false,
        Arc::new(move || {
            fresh_counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Noop)
        }),
    );
    let frozen = registry.freeze();
    let mut pool = frozen.descriptor_pool();
    PipelineBuilder::build(&endpoint("s", "Shared"), &mut pool, &frozen).unwrap();

    // the sharable instance exists before any connection; the per-connection
    // factory has not run yet
    assert_eq!(shared_builds.load(Ordering::SeqCst), 1);
    assert_eq!(fresh_builds.load(Ordering::SeqCst), 0);
}
