// src/session/tests.rs

use super::*;
use crate::display::{CreateRequest, DisplayType};
use crate::headless::{
    wait_for, DisplayCall, DisplayRecord, HeadlessEngine, HeadlessPowerService, Notification,
    RecordingSink,
};
use test_log::test;

const PRIMARY_BACKING: i32 = 0;
const BUILTIN2_BACKING: i32 = 10;
const EXTERNAL_BACKING: i32 = 20;
const VIRTUAL_BACKINGS: [i32; 2] = [30, 31];

const POWER_OFF: i32 = 0;
const POWER_DOZE: i32 = 1;
const POWER_ON: i32 = 2;
const POWER_DOZE_SUSPEND: i32 = 3;

fn test_config() -> Config {
    let mut config = Config::default();
    config.session.notify_retry_interval_ms = 1;
    config.session.hotplug_settle_vsyncs = 0;
    config
}

struct Harness {
    engine: HeadlessEngine,
    power: Arc<HeadlessPowerService>,
    sink: Arc<RecordingSink>,
    session: Session,
}

impl Harness {
    fn build(engine: HeadlessEngine, config: &Config) -> Self {
        let power = HeadlessPowerService::new(["REFRESH_60FPS", "REFRESH_90FPS"]);
        let session = Session::new(Arc::new(engine.clone()), power.connector(), config)
            .expect("session should start");
        Self {
            engine,
            power,
            sink: Arc::new(RecordingSink::new()),
            session,
        }
    }

    /// Built-in primary and second built-in, one disconnected external
    /// connector and two virtual endpoints.
    fn standard() -> Self {
        Self::with_config(&test_config())
    }

    fn with_config(config: &Config) -> Self {
        let engine = HeadlessEngine::new(DisplayType::BuiltIn);
        engine.add_endpoint(PRIMARY_BACKING, DisplayType::BuiltIn, true, true);
        engine.add_endpoint(BUILTIN2_BACKING, DisplayType::BuiltIn, false, true);
        engine.add_endpoint(EXTERNAL_BACKING, DisplayType::Pluggable, false, false);
        for backing_id in VIRTUAL_BACKINGS {
            engine.add_endpoint(backing_id, DisplayType::Virtual, false, true);
        }
        Self::build(engine, config)
    }

    fn without_builtin2() -> Self {
        let engine = HeadlessEngine::new(DisplayType::BuiltIn);
        engine.add_endpoint(PRIMARY_BACKING, DisplayType::BuiltIn, true, true);
        engine.add_endpoint(EXTERNAL_BACKING, DisplayType::Pluggable, false, false);
        engine.add_endpoint(VIRTUAL_BACKINGS[0], DisplayType::Virtual, false, true);
        Self::build(engine, &test_config())
    }

    fn register(&self) {
        self.session.register_sink(self.sink.clone());
    }

    fn present_frame(&self, id: ClientId) {
        self.session.validate_display(id.raw()).expect("validate");
        self.session.present_display(id.raw()).expect("present");
    }

    /// Registers the client and presents the first primary frame.
    fn ready(&self) {
        self.register();
        self.present_frame(ClientId::PRIMARY);
    }

    fn external(&self) -> ClientId {
        self.session
            .display_index(LegacyDisplay::External)
            .expect("external slot")
    }

    fn builtin2(&self) -> ClientId {
        self.session.registry.builtin_ids()[0]
    }

    fn connect_external(&self) -> ClientId {
        self.engine.set_connected(EXTERNAL_BACKING, true);
        self.session.handle_hotplug(false).expect("hotplug");
        self.external()
    }

    fn record<R>(&self, id: ClientId, f: impl FnOnce(&mut DisplayRecord) -> R) -> R {
        self.engine.with_record(id.raw(), f).expect("display record")
    }

    fn activated(&self, id: ClientId) -> bool {
        self.record(id, |r| r.activated)
    }
}

#[test]
fn it_should_partition_slots_from_engine_maximums() {
    let engine = HeadlessEngine::new(DisplayType::BuiltIn);
    engine.set_max_displays(DisplayType::BuiltIn, 2);
    engine.set_max_displays(DisplayType::Pluggable, 9);
    engine.set_max_displays(DisplayType::Virtual, 1);

    let registry = SlotRegistry::init(&engine).expect("registry");

    // Primary takes one built-in; pluggable is clamped.
    assert_eq!(registry.builtin_ids().len(), 1);
    assert_eq!(registry.pluggable_ids().len(), slot::MAX_PLUGGABLE_SLOTS);
    assert_eq!(registry.virtual_ids().len(), 1);
    assert_eq!(registry.len(), 7);
    assert_eq!(registry.resolve(6).map(|id| id.raw()), Ok(6));
    assert_eq!(registry.resolve(7), Err(HwcError::BadDisplay));
    assert_eq!(registry.class_of(ClientId::PRIMARY), SlotClass::Primary);
    assert_eq!(registry.class_of(registry.virtual_ids()[0]), SlotClass::Virtual);
}

#[test]
fn it_should_refuse_to_start_without_engine_capabilities() {
    let engine = HeadlessEngine::new(DisplayType::BuiltIn);
    engine.add_endpoint(PRIMARY_BACKING, DisplayType::BuiltIn, true, true);
    engine.fail_capability_queries(true);
    let power = HeadlessPowerService::new(Vec::<String>::new());

    assert!(Session::new(Arc::new(engine), power.connector(), &test_config()).is_err());

    let virtual_primary = HeadlessEngine::new(DisplayType::Virtual);
    assert!(SlotRegistry::init(&virtual_primary).is_err());
}

#[test]
fn it_should_map_legacy_indices_to_the_first_slot_of_each_class() {
    let h = Harness::standard();
    let registry = &h.session.registry;

    assert_eq!(h.session.display_index(LegacyDisplay::Primary), Some(ClientId::PRIMARY));
    assert_eq!(
        h.session.display_index(LegacyDisplay::External),
        registry.pluggable_ids().first().copied()
    );
    assert_eq!(
        h.session.display_index(LegacyDisplay::Virtual),
        registry.virtual_ids().first().copied()
    );
    assert_eq!(
        h.session.display_index(LegacyDisplay::BuiltIn2),
        registry.builtin_ids().first().copied()
    );

    let empty = SlotRegistry::with_capacities(DisplayType::BuiltIn, 0, 0, 0);
    assert_eq!(empty.lookup(LegacyDisplay::External), None);
    assert_eq!(empty.lookup(LegacyDisplay::BuiltIn2), None);
    assert_eq!(LegacyDisplay::try_from(4), Err(HwcError::BadParameter));
}

#[test]
fn it_should_announce_every_bound_display_on_first_registration() {
    let h = Harness::standard();
    assert_eq!(h.session.bound_displays(), vec![ClientId::PRIMARY]);

    h.register();

    let builtin2 = h.builtin2();
    assert_eq!(h.session.bound_displays(), vec![ClientId::PRIMARY, builtin2]);
    assert_eq!(
        h.sink.hotplugs(),
        vec![
            Notification::Connected(ClientId::PRIMARY),
            Notification::Connected(builtin2),
        ]
    );

    // Re-registration announces again but creates nothing new.
    h.sink.clear();
    h.register();
    assert_eq!(h.engine.created().len(), 2);
    assert_eq!(h.sink.hotplugs().len(), 2);
}

#[test]
fn it_should_defer_hotplug_until_the_primary_presents() {
    let h = Harness::standard();
    h.register();
    h.engine.set_connected(EXTERNAL_BACKING, true);

    h.session.handle_hotplug(false).expect("hotplug");
    assert!(!h.session.bound_displays().contains(&h.external()));

    h.present_frame(ClientId::PRIMARY);

    let external = h.external();
    assert!(h.session.bound_displays().contains(&external));
    assert!(h.sink.hotplugs().contains(&Notification::Connected(external)));
}

#[test]
fn it_should_bind_and_tear_down_an_external_display() {
    let h = Harness::standard();
    h.ready();

    let external = h.connect_external();
    assert!(h.sink.hotplugs().contains(&Notification::Connected(external)));
    assert!(h.engine.created().contains(&CreateRequest::Pluggable {
        client_id: external.raw(),
        backing_id: EXTERNAL_BACKING,
        test_pattern: None,
    }));
    assert_eq!(
        h.session.registry.slot(external).lock().backing_id(),
        Some(EXTERNAL_BACKING)
    );
    // Primary output is revalidated when the display count changes.
    assert!(h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::ResetValidation)) >= 1);

    h.engine.set_connected(EXTERNAL_BACKING, false);
    h.session.handle_hotplug(false).expect("hotplug");

    assert!(h.sink.hotplugs().contains(&Notification::Disconnected(external)));
    assert_eq!(h.engine.destroyed(), vec![external.raw()]);
    assert!(!h.session.bound_displays().contains(&external));
    assert_eq!(h.session.registry.slot(external).lock().backing_id(), None);
}

#[test]
fn it_should_ignore_a_replayed_snapshot() {
    let h = Harness::standard();
    h.ready();
    h.connect_external();
    let created = h.engine.created().len();
    let notifications = h.sink.hotplugs().len();

    h.session.handle_hotplug(false).expect("replay");
    h.session.handle_hotplug(true).expect("replay");

    assert_eq!(h.engine.created().len(), created);
    assert_eq!(h.sink.hotplugs().len(), notifications);
    assert!(h.engine.destroyed().is_empty());
}

#[test]
fn it_should_pass_hotplug_test_patterns_to_new_displays() {
    let h = Harness::standard();
    h.ready();
    let pattern = TestPattern { bpp: 24, pattern: 1 };
    h.session.set_hotplug_params(Some(pattern));

    let external = h.connect_external();

    assert_eq!(
        h.session.registry.slot(external).lock().test_pattern,
        Some(pattern)
    );
    assert!(h.engine.created().contains(&CreateRequest::Pluggable {
        client_id: external.raw(),
        backing_id: EXTERNAL_BACKING,
        test_pattern: Some(pattern),
    }));
}

#[test]
fn it_should_report_create_failures_and_recover_on_the_next_event() {
    let h = Harness::standard();
    h.ready();
    h.engine.set_connected(EXTERNAL_BACKING, true);
    h.engine.fail_next_create(HwcError::NoResources);

    let error = h.session.handle_hotplug(false).expect_err("create should fail");
    assert_eq!(
        error,
        HotplugError::Create {
            id: h.external(),
            error: HwcError::NoResources
        }
    );
    assert!(!error.is_fatal());

    h.session.handle_hotplug(false).expect("retry");
    assert!(h.session.bound_displays().contains(&h.external()));
}

#[test]
fn it_should_stop_binding_when_pluggable_slots_run_out() {
    let engine = HeadlessEngine::new(DisplayType::BuiltIn);
    engine.set_max_displays(DisplayType::Pluggable, 1);
    engine.add_endpoint(PRIMARY_BACKING, DisplayType::BuiltIn, true, true);
    engine.add_endpoint(20, DisplayType::Pluggable, false, true);
    engine.add_endpoint(21, DisplayType::Pluggable, false, true);
    let h = Harness::build(engine, &test_config());

    h.ready();

    let bound: Vec<i32> = h
        .session
        .registry
        .all_displayed()
        .filter_map(|(_, slot)| slot.lock().backing_id())
        .collect();
    assert_eq!(bound, vec![PRIMARY_BACKING, 20]);
}

#[test]
fn it_should_treat_a_connected_primary_over_a_placeholder_as_fatal() {
    let engine = HeadlessEngine::new(DisplayType::Pluggable);
    engine.add_endpoint(PRIMARY_BACKING, DisplayType::Pluggable, true, false);
    let h = Harness::build(engine, &test_config());

    assert_eq!(
        h.engine.created(),
        vec![CreateRequest::Placeholder { client_id: 0 }]
    );
    assert_eq!(h.session.registry.primary().lock().backing_id(), None);
    h.ready();
    assert_eq!(
        h.sink.hotplugs(),
        vec![Notification::Connected(ClientId::PRIMARY)]
    );

    h.engine.set_connected(PRIMARY_BACKING, true);
    let error = h.session.handle_hotplug(true).expect_err("placeholder replaced");

    assert_eq!(error, HotplugError::PrimaryReplaced);
    assert!(error.is_fatal());
}

#[test]
fn it_should_keep_a_pluggable_primary_across_cable_changes() {
    let engine = HeadlessEngine::new(DisplayType::Pluggable);
    engine.add_endpoint(PRIMARY_BACKING, DisplayType::Pluggable, true, true);
    let h = Harness::build(engine, &test_config());
    h.ready();

    h.engine.set_connected(PRIMARY_BACKING, false);
    h.session.handle_hotplug(false).expect("disconnect");
    h.engine.set_connected(PRIMARY_BACKING, true);
    h.session.handle_hotplug(false).expect("reconnect");

    let calls = h.record(ClientId::PRIMARY, |r| r.calls.clone());
    let cable: Vec<_> = calls
        .into_iter()
        .filter(|call| matches!(call, DisplayCall::SetConnected(_)))
        .collect();
    assert_eq!(
        cable,
        vec![DisplayCall::SetConnected(false), DisplayCall::SetConnected(true)]
    );
    assert!(h.engine.destroyed().is_empty());
    assert!(h.record(ClientId::PRIMARY, |r| r.connected));
    assert_eq!(h.sink.refreshes(ClientId::PRIMARY), 2);
}

#[test]
fn it_should_give_a_powered_second_builtin_priority_over_external() {
    let h = Harness::standard();
    h.ready();
    let external = h.connect_external();
    let builtin2 = h.builtin2();
    assert!(h.activated(external));

    h.session.set_power_mode(builtin2.raw(), POWER_ON).expect("power on");
    assert!(!h.activated(external));

    // Recomputing from unchanged state issues nothing new.
    h.session.set_power_mode(builtin2.raw(), POWER_ON).expect("power on");
    assert_eq!(h.record(external, |r| r.count(&DisplayCall::Activate(false))), 1);

    h.session.set_power_mode(builtin2.raw(), POWER_OFF).expect("power off");
    assert!(h.activated(external));
    assert_eq!(h.record(external, |r| r.count(&DisplayCall::Activate(true))), 1);
}

#[test]
fn it_should_keep_only_one_of_external_and_virtual_active() {
    let h = Harness::without_builtin2();
    h.ready();
    let external = h.connect_external();

    let virtual_ = h.session.create_virtual_display(1280, 720).expect("virtual");
    assert!(h.activated(external));
    assert!(!h.activated(virtual_));

    h.engine.set_connected(EXTERNAL_BACKING, false);
    h.session.handle_hotplug(false).expect("disconnect");
    assert!(h.activated(virtual_));
}

#[test]
fn it_should_cancel_the_sequence_when_validate_fails() {
    let h = Harness::standard();
    h.register();
    h.record(ClientId::PRIMARY, |r| r.fail_validate = Some(HwcError::NoResources));

    assert_eq!(h.session.validate_display(0), Err(HwcError::NoResources));
    assert_eq!(h.session.registry.primary().phase(), SequencePhase::Idle);

    h.record(ClientId::PRIMARY, |r| r.fail_validate = None);
    h.present_frame(ClientId::PRIMARY);
}

#[test]
fn it_should_cancel_the_sequence_when_present_fails() {
    let h = Harness::standard();
    h.register();
    h.record(ClientId::PRIMARY, |r| r.fail_present = Some(HwcError::NoResources));

    h.session.validate_display(0).expect("validate");
    assert_eq!(h.session.present_display(0), Err(HwcError::NoResources));
    assert_eq!(h.session.registry.primary().phase(), SequencePhase::Idle);
}

#[test]
fn it_should_present_without_validate_when_nothing_changed() {
    let h = Harness::standard();
    h.ready();
    let validates = h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate));

    assert!(h.session.present_display(0).is_ok());
    assert_eq!(
        h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate)),
        validates
    );
    assert!(h.session.capabilities().contains(SessionCapabilities::SKIP_VALIDATE));
}

#[test]
fn it_should_ask_for_validation_when_a_skipped_frame_needs_client_composition() {
    let h = Harness::standard();
    h.ready();
    h.session.create_layer(0).expect("layer");
    h.record(ClientId::PRIMARY, |r| r.client_composition = true);

    assert_eq!(h.session.present_display(0), Err(HwcError::NotValidated));
    assert_eq!(
        h.record(ClientId::PRIMARY, |r| r.validation_state),
        ValidationState::InternalValidated
    );
    let validates = h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate));

    // The internal result is handed back without validating again.
    let validation = h.session.validate_display(0).expect("validate");
    assert!(validation.has_changes());
    assert_eq!(
        h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate)),
        validates
    );
    assert!(h.session.present_display(0).is_ok());
}

#[test]
fn it_should_always_validate_when_skip_validate_is_disabled() {
    let mut config = test_config();
    config.session.disable_skip_validate = true;
    let h = Harness::with_config(&config);
    h.ready();
    let validates = h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate));

    assert!(h.session.present_display(0).is_ok());

    assert_eq!(
        h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::Validate)),
        validates + 1
    );
    assert_eq!(
        h.session.capabilities(),
        SessionCapabilities::SKIP_CLIENT_COLOR_TRANSFORM
    );
}

#[test]
fn it_should_serialize_sequences_across_threads() {
    let h = Arc::new(Harness::standard());
    h.register();
    h.session.validate_display(0).expect("validate");

    let other = Arc::clone(&h);
    let validated = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&validated);
    let handle = std::thread::spawn(move || {
        other.session.validate_display(0).expect("validate");
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!validated.load(std::sync::atomic::Ordering::SeqCst));

    h.session.present_display(0).expect("present");
    handle.join().expect("validating thread panicked");
    assert!(validated.load(std::sync::atomic::Ordering::SeqCst));
    h.session.present_display(0).expect("present");
}

#[test]
fn it_should_refresh_twice_when_entering_doze() {
    let h = Harness::standard();
    h.register();

    h.session.set_power_mode(0, POWER_DOZE).expect("doze");
    assert_eq!(h.sink.refreshes(ClientId::PRIMARY), 1);

    h.present_frame(ClientId::PRIMARY);
    assert_eq!(h.sink.refreshes(ClientId::PRIMARY), 2);
    assert_eq!(
        h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::SetPendingRefresh)),
        1
    );

    h.present_frame(ClientId::PRIMARY);
    assert_eq!(h.sink.refreshes(ClientId::PRIMARY), 2);
}

#[test]
fn it_should_allow_doze_only_on_primary_and_the_first_builtin() {
    let h = Harness::standard();
    h.register();
    let builtin2 = h.builtin2();
    let other_builtin = h.session.registry.builtin_ids()[1];

    assert_eq!(h.session.get_doze_support(0), Ok(true));
    assert_eq!(h.session.get_doze_support(builtin2.raw()), Ok(true));
    assert_eq!(h.session.get_doze_support(other_builtin.raw()), Ok(false));
    assert_eq!(h.session.get_doze_support(h.external().raw()), Ok(false));

    assert_eq!(
        h.session.set_power_mode(h.external().raw(), POWER_DOZE),
        Err(HwcError::Unsupported)
    );
    assert_eq!(
        h.session.set_power_mode(builtin2.raw(), POWER_DOZE_SUSPEND),
        Ok(())
    );
    assert_eq!(
        h.record(builtin2, |r| r.power_mode),
        PowerMode::DozeSuspend
    );
    assert_eq!(h.session.set_power_mode(0, 7), Err(HwcError::BadParameter));
}

#[test]
fn it_should_apply_client_power_mode_values() {
    let h = Harness::standard();
    h.ready();
    let external = h.connect_external();

    h.session.set_power_mode(0, 2).expect("on");
    assert_eq!(h.record(ClientId::PRIMARY, |r| r.power_mode), PowerMode::On);
    h.session.set_power_mode(0, 1).expect("doze");
    assert_eq!(h.record(ClientId::PRIMARY, |r| r.power_mode), PowerMode::Doze);

    h.session.set_power_mode(external.raw(), 2).expect("external on");
    assert_eq!(h.record(external, |r| r.power_mode), PowerMode::On);
    assert_eq!(
        h.session.set_power_mode(external.raw(), 3),
        Err(HwcError::Unsupported)
    );
}

#[test]
fn it_should_hint_the_primary_refresh_rate() {
    let h = Harness::standard();
    h.register();
    h.record(ClientId::PRIMARY, |r| r.configs = vec![16_666_666, 11_111_111]);

    h.session.set_power_mode(0, POWER_ON).expect("power on");
    assert!(wait_for(|| h.power.sets().len() == 1));

    h.session.set_active_config(0, 1).expect("config");
    assert_eq!(h.session.get_active_config(0), Ok(1));
    assert_eq!(h.session.get_vsync_period(0), Ok(11_111_111));
    assert!(wait_for(|| h.power.sets().len() == 3));
    assert_eq!(
        h.power.sets(),
        vec![
            ("REFRESH_60FPS".to_string(), true, true),
            ("REFRESH_90FPS".to_string(), true, true),
            ("REFRESH_60FPS".to_string(), false, true),
        ]
    );
    assert_eq!(h.session.set_active_config(0, 2), Err(HwcError::BadConfig));
}

#[test]
fn it_should_fall_back_to_sixty_hertz_without_a_vsync_attribute() {
    let h = Harness::standard();
    h.register();
    h.record(ClientId::PRIMARY, |r| r.configs = vec![0]);

    assert_eq!(h.session.get_vsync_period(0), Ok(16_666_666));
}

#[test]
fn it_should_create_and_destroy_virtual_displays() {
    let h = Harness::standard();

    assert_eq!(
        h.session.create_virtual_display(1280, 720),
        Err(HwcError::BadDisplay)
    );
    h.ready();
    assert_eq!(
        h.session.create_virtual_display(0, 720),
        Err(HwcError::BadParameter)
    );

    let first = h.session.create_virtual_display(1280, 720).expect("first");
    let second = h.session.create_virtual_display(640, 480).expect("second");
    assert_eq!(first, h.session.registry.virtual_ids()[0]);
    assert_eq!(second, h.session.registry.virtual_ids()[1]);
    assert_eq!(h.record(first, |r| (r.width, r.height)), (1280, 720));
    assert_eq!(
        h.session.create_virtual_display(320, 240),
        Err(HwcError::NoResources)
    );
    assert!(h.record(ClientId::PRIMARY, |r| r.count(&DisplayCall::ResetValidation)) >= 3);

    assert_eq!(h.session.destroy_virtual_display(first.raw()), Ok(()));
    assert_eq!(h.engine.destroyed(), vec![first.raw()]);
    assert!(!h.session.bound_displays().contains(&first));

    let again = h.session.create_virtual_display(800, 600).expect("reuse");
    assert_eq!(again, first);
    assert_eq!(
        h.session.registry.slot(again).lock().backing_id(),
        Some(VIRTUAL_BACKINGS[0])
    );

    assert_eq!(
        h.session.destroy_virtual_display(0),
        Err(HwcError::BadDisplay)
    );
    assert_eq!(
        h.session.destroy_virtual_display(99),
        Err(HwcError::BadDisplay)
    );
}

#[test]
fn it_should_reject_unknown_and_unbound_displays() {
    let h = Harness::standard();
    h.register();
    let out_of_range = h.session.registry.len() as u64;
    let unbound = h.external().raw();

    assert_eq!(h.session.validate_display(out_of_range), Err(HwcError::BadDisplay));
    assert_eq!(h.session.present_display(out_of_range), Err(HwcError::BadDisplay));
    assert_eq!(
        h.session.set_power_mode(out_of_range, POWER_ON),
        Err(HwcError::BadDisplay)
    );
    assert_eq!(h.session.create_layer(unbound), Err(HwcError::BadDisplay));
    assert_eq!(
        h.session.get_display_capabilities(unbound),
        Err(HwcError::BadDisplay)
    );
    assert_eq!(h.session.set_vsync_enabled(unbound, 1), Err(HwcError::BadDisplay));
    assert_eq!(h.session.set_vsync_enabled(0, 9), Err(HwcError::BadParameter));
    assert!(!h.session.is_hdr_display(out_of_range));
}

#[test]
fn it_should_route_layer_and_attribute_calls_to_the_display() {
    let h = Harness::standard();
    h.register();

    let layer = h.session.create_layer(0).expect("layer");
    assert_eq!(h.session.set_layer_z_order(0, layer, 5), Ok(()));
    assert_eq!(h.record(ClientId::PRIMARY, |r| r.layers[&layer]), 5);
    assert_eq!(h.session.destroy_layer(0, layer), Ok(()));
    assert_eq!(h.session.destroy_layer(0, layer), Err(HwcError::BadLayer));

    assert_eq!(h.session.get_display_attribute(0, 0, 1), Ok(1920));
    assert_eq!(h.session.get_display_attribute(0, 0, 3), Ok(16_666_666));
    assert_eq!(
        h.session.get_display_attribute(0, 0, 42),
        Err(HwcError::BadParameter)
    );
    assert_eq!(
        h.session.get_display_attribute(0, 3, 1),
        Err(HwcError::BadConfig)
    );
    assert_eq!(h.session.set_vsync_enabled(0, 1), Ok(()));
    assert_eq!(h.record(ClientId::PRIMARY, |r| r.vsync), Some(Vsync::Enable));
}

#[test]
fn it_should_report_capabilities_by_display_class() {
    let h = Harness::standard();
    h.ready();
    let external = h.connect_external();

    assert_eq!(
        h.session.get_display_capabilities(0),
        Ok(DisplayCapabilities::SKIP_CLIENT_COLOR_TRANSFORM
            | DisplayCapabilities::DOZE
            | DisplayCapabilities::BRIGHTNESS)
    );
    assert_eq!(
        h.session.get_display_capabilities(external.raw()),
        Ok(DisplayCapabilities::empty())
    );
    assert_eq!(h.session.get_display_brightness_support(0), Ok(true));
    assert_eq!(
        h.session.get_display_brightness_support(external.raw()),
        Ok(false)
    );
    assert_eq!(h.session.set_display_brightness(0, 0.5), Ok(()));
    assert_eq!(
        h.session.set_display_brightness(external.raw(), 0.5),
        Err(HwcError::Unsupported)
    );
}

#[test]
fn it_should_cache_hdr_support_when_binding() {
    let h = Harness::standard();
    h.engine.set_hdr(
        EXTERNAL_BACKING,
        HdrCapabilities {
            types: vec![2],
            max_luminance: 1000.0,
            ..HdrCapabilities::default()
        },
    );
    h.ready();
    let external = h.connect_external();

    assert!(h.session.is_hdr_display(external.raw()));
    assert!(!h.session.is_hdr_display(0));
    assert_eq!(
        h.session.get_hdr_capabilities(external.raw()).map(|hdr| hdr.types),
        Ok(vec![2])
    );
}

#[test]
fn it_should_find_the_first_powered_builtin() {
    let h = Harness::standard();
    h.register();
    let builtin2 = h.builtin2();
    assert_eq!(h.session.active_builtin_display(), None);

    h.session.set_power_mode(builtin2.raw(), POWER_ON).expect("power on");
    assert_eq!(h.session.active_builtin_display(), Some(builtin2));

    h.session.set_power_mode(0, POWER_ON).expect("power on");
    assert_eq!(h.session.active_builtin_display(), Some(ClientId::PRIMARY));
}

#[test]
fn it_should_truncate_the_dump_on_a_char_boundary() {
    let h = Harness::standard();
    h.register();
    h.record(ClientId::PRIMARY, |r| r.dump_text = Some("€".repeat(3000)));

    let dump = h.session.dump();

    assert_eq!(dump.len(), 8190);
    assert!(dump.chars().all(|c| c == '€'));
}

#[test]
fn it_should_destroy_every_display_when_dropped() {
    let h = Harness::standard();
    h.ready();
    let external = h.connect_external();
    let Harness { engine, session, .. } = h;

    drop(session);

    let mut destroyed = engine.destroyed();
    destroyed.sort_unstable();
    let mut expected = vec![0, external.raw(), engine_builtin2(&engine)];
    expected.sort_unstable();
    assert_eq!(destroyed, expected);
}

fn engine_builtin2(engine: &HeadlessEngine) -> u64 {
    engine
        .created()
        .iter()
        .find_map(|request| match request {
            CreateRequest::BuiltIn {
                client_id,
                backing_id: BUILTIN2_BACKING,
            } => Some(*client_id),
            _ => None,
        })
        .expect("second built-in")
}
