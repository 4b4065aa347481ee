use std::{fs, net::Ipv4Addr, time::Duration};

use tlm_router::{
    bus::{LocalBus, LocalPipe},
    router::DEFAULT_UDP_PORT,
    table::{LoadStatus, RecordError, TableError},
    FilterKind, FilterRule, PacketRouter, Qos, Route, RouterError, RouterOptions, StatsState,
    TableDocument,
};
use tlm_transport::Memory;
use tlm_wire::StreamId;

fn router(bus: &LocalBus) -> PacketRouter<LocalPipe, Memory> {
    let _ = tracing_subscriber::fmt::try_init();

    let options = RouterOptions::default()
        .reporting_interval(Duration::from_secs(1))
        .stats_init_delay(Duration::from_secs(20))
        .stats_config_delay(Duration::from_secs(1));
    PacketRouter::with_options(bus.pipe("TO_TLM_PIPE", 32), Memory::new(), options)
}

const TABLE: &str = r#"{
  "name": "Telemetry Output Packet Table",
  "description": "Test routes",
  "packet-array": [
    {"packet": {"name": "HK", "dec-id": 2048, "priority": 0, "reliability": 0, "buf-limit": 4,
                "filter": {"type": 1, "X": 1, "N": 1, "O": 0}}},
    {"packet": {"name": "EVS", "dec-id": 2056, "priority": 1, "reliability": 0, "buf-limit": 32,
                "filter": {"type": 2, "X": 4, "N": 1, "O": 0}}},
    {"packet": {"dec-id": 2339, "priority": 0, "reliability": 1, "buf-limit": 8,
                "filter": {"type": 3, "X": 16, "N": 2, "O": 3}}}
  ]
}"#;

#[test]
fn load_subscribes_and_restarts_stats() {
    let bus = LocalBus::new();
    let mut router = router(&bus);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.json");
    fs::write(&path, TABLE).unwrap();

    let report = router.load_table_file(&path).unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.subscriptions.routes, 3);
    assert_eq!(report.subscriptions.failed, 0);

    for id in [0x0800, 0x0808, 0x0923] {
        assert!(bus.is_subscribed(StreamId::new(id)));
    }

    let evs = router.route_telemetry(StreamId::new(0x0808));
    assert_eq!(evs.qos, Qos { priority: 1, reliability: 0 });
    assert_eq!(evs.buf_limit, 32);
    assert_eq!(evs.filter, FilterRule::new(FilterKind::BySequenceCount, 1, 4, 0).unwrap());

    let status = router.status();
    assert_eq!(status.load_status, LoadStatus::Valid);
    assert_eq!(status.load_count, 3);
    assert_eq!(status.routes, 3);
    assert_eq!(router.stats().state(), StatsState::InitCycles(20));
}

#[test]
fn dump_then_load_round_trips() {
    let bus = LocalBus::new();
    let mut source = router(&bus);
    source.add_route(Route::new(StreamId::new(0x0801), Qos::default(), 4, FilterRule::ALWAYS)).unwrap();
    source
        .add_route(Route::new(
            StreamId::new(0x0A10),
            Qos { priority: 2, reliability: 1 },
            16,
            FilterRule::new(FilterKind::ByTime, 3, 8, 5).unwrap(),
        ))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.json");
    assert_eq!(source.dump_table_file(&path).unwrap(), 2);

    let doc = TableDocument::from_file(&path).unwrap();
    assert!(doc.description.starts_with("Dumped at "));

    let other_bus = LocalBus::new();
    let mut target = router(&other_bus);
    target.load_table_file(&path).unwrap();

    let dumped: Vec<Route> = source.table().iter_used().copied().collect();
    let loaded: Vec<Route> = target.table().iter_used().copied().collect();
    assert_eq!(dumped, loaded);
}

#[test]
fn incomplete_record_rejects_whole_load() {
    let bus = LocalBus::new();
    let mut router = router(&bus);
    router.add_route(Route::new(StreamId::new(0x0801), Qos::default(), 4, FilterRule::ALWAYS)).unwrap();
    let before: Vec<Route> = router.table().iter_used().copied().collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.json");
    fs::write(
        &path,
        r#"{"packet-array": [
            {"packet": {"dec-id": 2050, "priority": 0, "reliability": 0, "buf-limit": 4,
                        "filter": {"type": 1, "X": 1, "N": 1, "O": 0}}},
            {"packet": {"dec-id": 2051, "priority": 0, "reliability": 0,
                        "filter": {"type": 1, "X": 1, "N": 1, "O": 0}}}
        ]}"#,
    )
    .unwrap();

    match router.load_table_file(&path) {
        Err(RouterError::Table(TableError::InvalidRecord { index, source })) => {
            assert_eq!(index, 1);
            assert_eq!(source, RecordError::MissingAttributes(6));
            assert_eq!(source.to_string(), "missing attributes, only 6 of 7 defined");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let after: Vec<Route> = router.table().iter_used().copied().collect();
    assert_eq!(before, after);
    assert!(!bus.is_subscribed(StreamId::new(0x0802)));
    assert_eq!(router.status().load_status, LoadStatus::Invalid);
}

#[test]
fn unreadable_and_empty_files() {
    let bus = LocalBus::new();
    let mut router = router(&bus);
    let dir = tempfile::tempdir().unwrap();

    assert!(matches!(
        router.load_table_file(dir.path().join("missing.json")),
        Err(RouterError::Table(TableError::Io(_)))
    ));

    let path = dir.path().join("bad.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(router.load_table_file(&path), Err(RouterError::Table(TableError::Json(_)))));
    assert_eq!(router.status().load_status, LoadStatus::Invalid);

    fs::write(&path, r#"{"name": "empty", "packet-array": []}"#).unwrap();
    let report = router.load_table_file(&path).unwrap();
    assert_eq!(report.records, 0);
    assert_eq!(router.status().load_status, LoadStatus::Valid);
    assert_eq!(router.status().load_count, 0);

    router.reset_status();
    assert_eq!(router.status().load_status, LoadStatus::Undefined);
}

#[test]
fn failed_resubscription_keeps_stats_running() {
    let bus = LocalBus::new();
    let mut router = router(&bus);
    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();
    assert_eq!(router.status().dest.port(), DEFAULT_UDP_PORT);
    assert_eq!(router.stats().state(), StatsState::InitCycles(1));

    bus.refuse_subscriptions(StreamId::new(0x0808), true);
    let doc: TableDocument = serde_json::from_str(TABLE).unwrap();
    let report = router.load_table(&doc).unwrap();

    assert_eq!(report.subscriptions.routes, 3);
    assert_eq!(report.subscriptions.failed, 1);
    // The route stays in the table even though its subscription failed.
    assert!(router.route_telemetry(StreamId::new(0x0808)).is_used());
    assert_eq!(router.stats().state(), StatsState::InitCycles(1));

    bus.refuse_subscriptions(StreamId::new(0x0808), false);
    let report = router.load_table(&doc).unwrap();
    assert_eq!(report.subscriptions.failed, 0);
    assert_eq!(router.stats().state(), StatsState::InitCycles(20));
}
