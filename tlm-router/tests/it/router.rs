use std::{
    net::{Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use tlm_common::MissionTime;
use tlm_router::{
    bus::{LocalBus, LocalPipe, Publisher},
    stats::MIN_REPORTING_INTERVAL,
    FilterKind, FilterRule, PacketRouter, Qos, Route, RouterError, RouterOptions, StatsState,
};
use tlm_transport::{Memory, Udp};
use tlm_wire::StreamId;

use crate::tlm_packet;

const STREAM: u16 = 0x0923;

fn setup(options: RouterOptions) -> (LocalBus, Memory, PacketRouter<LocalPipe, Memory>) {
    let _ = tracing_subscriber::fmt::try_init();

    let bus = LocalBus::new();
    let transport = Memory::new();
    let router = PacketRouter::with_options(bus.pipe("TO_TLM_PIPE", 64), transport.clone(), options);

    (bus, transport, router)
}

fn route(id: u16, filter: FilterRule) -> Route {
    Route::new(StreamId::new(id), Qos::default(), 32, filter)
}

fn publish_burst(bus: &LocalBus, id: u16, count: u16) {
    for seq in 0..count {
        bus.publish(tlm_packet(id, seq, MissionTime::new(seq.into(), 0))).unwrap();
    }
}

#[test]
fn sequence_filter_forwards_one_in_four() {
    let (bus, transport, mut router) = setup(RouterOptions::default());

    let filter = FilterRule::new(FilterKind::BySequenceCount, 1, 4, 0).unwrap();
    router.add_route(route(STREAM, filter)).unwrap();
    assert_eq!(router.table().get(0x123).map(|r| r.stream_id), Some(StreamId::new(STREAM)));

    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();
    publish_burst(&bus, STREAM, 20);

    let cycle = router.output_telemetry();
    assert_eq!(cycle.drained, 20);
    assert_eq!(cycle.filtered, 15);
    assert_eq!(cycle.forwarded, 5);

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|d| d.dest == SocketAddr::from((Ipv4Addr::LOCALHOST, 1235))));
    assert_eq!(sent[1].payload, tlm_packet(STREAM, 4, MissionTime::new(4, 0)));
}

#[test]
fn disabled_output_drains_without_sending() {
    let (bus, transport, mut router) = setup(RouterOptions::default());
    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    assert!(router.is_suppressed());

    publish_burst(&bus, STREAM, 3);
    let cycle = router.output_telemetry();

    assert_eq!(cycle.drained, 3);
    assert_eq!(cycle.forwarded, 0);
    assert!(transport.sent().is_empty());
    assert_eq!(router.output_telemetry().drained, 0);
}

#[test]
fn send_failure_suppresses_output() {
    let (bus, transport, mut router) = setup(RouterOptions::default());
    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    router.enable_output(Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    assert!(router.is_enabled());
    assert!(!router.is_suppressed());

    transport.fail_sends(true);
    publish_burst(&bus, STREAM, 3);
    let cycle = router.output_telemetry();
    assert!(cycle.send_error.is_some());
    assert_eq!(cycle.forwarded, 0);
    assert!(router.is_suppressed());
    assert!(router.is_enabled());
    assert!(router.socket().is_some());

    // Suppression holds after the socket recovers.
    transport.fail_sends(false);
    publish_burst(&bus, STREAM, 3);
    assert_eq!(router.output_telemetry().forwarded, 0);

    // Re-enabling clears suppression and reuses the open socket.
    router.enable_output(Ipv4Addr::new(10, 0, 0, 3)).unwrap();
    assert_eq!(transport.open_count(), 1);
    publish_burst(&bus, STREAM, 2);
    assert_eq!(router.output_telemetry().forwarded, 2);
    assert!(transport
        .sent()
        .iter()
        .all(|d| d.dest == SocketAddr::from((Ipv4Addr::new(10, 0, 0, 3), 1235))));
}

#[test]
fn open_failure_leaves_output_disabled() {
    let (_bus, transport, mut router) = setup(RouterOptions::default());
    transport.fail_opens(true);

    assert!(matches!(router.enable_output(Ipv4Addr::LOCALHOST), Err(RouterError::Transport(_))));
    assert!(!router.is_enabled());
    assert!(router.socket().is_none());

    transport.fail_opens(false);
    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();
    assert!(router.is_enabled());
}

#[test]
fn add_remove_and_update_filter() {
    let (bus, _transport, mut router) = setup(RouterOptions::default());

    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    assert!(bus.is_subscribed(StreamId::new(STREAM)));
    assert!(matches!(
        router.add_route(route(0x0123, FilterRule::ALWAYS)),
        Err(RouterError::RouteExists(_))
    ));

    router.update_filter(StreamId::new(STREAM), 2, 1, 2, 1).unwrap();
    let filter = router.route_telemetry(StreamId::new(STREAM)).filter;
    assert_eq!((filter.kind(), filter.pass(), filter.group(), filter.offset()), (FilterKind::BySequenceCount, 1, 2, 1));

    assert!(matches!(
        router.update_filter(StreamId::new(STREAM), 9, 1, 2, 0),
        Err(RouterError::Filter(_))
    ));
    assert!(matches!(
        router.update_filter(StreamId::new(0x0801), 1, 0, 0, 0),
        Err(RouterError::RouteUnused(_))
    ));

    router.remove_route(StreamId::new(STREAM)).unwrap();
    assert!(!bus.is_subscribed(StreamId::new(STREAM)));
    assert!(!router.route_telemetry(StreamId::new(STREAM)).is_used());
    router.remove_route(StreamId::new(STREAM)).unwrap();
}

#[test]
fn refused_subscription_does_not_add_route() {
    let (bus, _transport, mut router) = setup(RouterOptions::default());
    bus.refuse_subscriptions(StreamId::new(STREAM), true);

    assert!(matches!(router.add_route(route(STREAM, FilterRule::ALWAYS)), Err(RouterError::Bus(_))));
    assert_eq!(router.table().len_used(), 0);
}

#[test]
fn remove_all_flushes_pipe() {
    let (bus, transport, mut router) = setup(RouterOptions::default());
    router.add_route(route(0x0801, FilterRule::ALWAYS)).unwrap();
    router.add_route(route(0x0802, FilterRule::ALWAYS)).unwrap();
    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();
    publish_burst(&bus, 0x0801, 4);

    assert_eq!(router.remove_all_routes().unwrap(), 2);
    assert_eq!(router.table().len_used(), 0);
    assert!(!bus.is_subscribed(StreamId::new(0x0801)));

    assert_eq!(router.output_telemetry().drained, 0);
    assert!(transport.sent().is_empty());
}

#[test]
fn stats_converge_through_router() {
    let options = RouterOptions::default()
        .reporting_interval(Duration::from_secs(1))
        .stats_config_delay(Duration::from_secs(2));
    let (bus, _transport, mut router) = setup(options);
    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();
    assert_eq!(router.stats().state(), StatsState::InitCycles(2));

    let packet_len = tlm_packet(STREAM, 0, MissionTime::default()).len() as f64;
    let start = Instant::now();
    for cycle in 1..=4u64 {
        publish_burst(&bus, STREAM, 10);
        router.output_telemetry_at(start + Duration::from_secs(cycle));

        match cycle {
            1 | 2 => assert!(!router.status().stats_valid),
            3 => assert_eq!(router.stats().state(), StatsState::InitInterval),
            _ => assert_eq!(router.stats().state(), StatsState::Valid),
        }
    }

    let status = router.status();
    assert!(status.stats_valid);
    assert!((status.pkts_per_sec - 10.0).abs() < 1e-9);
    assert!((status.bytes_per_sec - 10.0 * packet_len).abs() < 1e-9);

    router.reset_status();
    assert!(!router.stats().is_valid());
    assert_eq!(router.stats().pkts_per_sec(), 0.0);
}

#[test]
fn reporting_interval_change_restarts_stats() {
    let (_bus, _transport, mut router) = setup(RouterOptions::default());

    router.set_reporting_interval(Duration::from_secs(2));
    assert_eq!(router.stats().interval(), Duration::from_secs(2));
    // 5 s config delay over 2 s cycles.
    assert_eq!(router.stats().state(), StatsState::InitCycles(3));
}

#[test]
fn zero_reporting_interval_is_raised_to_minimum() {
    let options = RouterOptions::default()
        .reporting_interval(Duration::ZERO)
        .stats_init_delay(Duration::ZERO)
        .stats_config_delay(Duration::ZERO);
    let (bus, _transport, mut router) = setup(options);
    assert_eq!(router.stats().interval(), MIN_REPORTING_INTERVAL);

    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    router.enable_output(Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    // Every cycle lands on the same instant.
    let now = Instant::now();
    for seq in 0..4 {
        bus.publish(tlm_packet(STREAM, seq, MissionTime::new(0, 0))).unwrap();
        router.output_telemetry_at(now);
        assert!(router.stats().pkts_per_sec().is_finite());
        assert!(router.stats().bytes_per_sec().is_finite());
    }

    router.set_reporting_interval(Duration::ZERO);
    assert_eq!(router.stats().interval(), MIN_REPORTING_INTERVAL);
}

#[tokio::test]
async fn forwards_over_udp() {
    let _ = tracing_subscriber::fmt::try_init();

    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = receiver.local_addr().unwrap().port();

    let bus = LocalBus::new();
    let mut router = PacketRouter::with_options(
        bus.pipe("TO_TLM_PIPE", 16),
        Udp::default(),
        RouterOptions::default().udp_port(port),
    );
    router.add_route(route(STREAM, FilterRule::ALWAYS)).unwrap();
    router.enable_output(Ipv4Addr::LOCALHOST).unwrap();

    let packet = tlm_packet(STREAM, 7, MissionTime::new(100, 0));
    bus.publish(packet.clone()).unwrap();
    assert_eq!(router.output_telemetry().forwarded, 1);

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], &packet[..]);
}
