use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tlm::{
    bus::{LocalBus, Publisher},
    table::Qos,
    wire::{
        frame::{Codec, TlmFrame},
        StreamId,
    },
    App, AppConfig, Command, RawFilter, Udp,
};
use tlm_common::MissionTime;
use tokio::{net::UdpSocket, time::interval};
use tokio_util::codec::Encoder;

const DEMO_STREAM: StreamId = StreamId::new(0x0850);

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // Ground side: count what arrives on the telemetry port.
    let ground = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = ground.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let mut received = 0usize;
        while let Ok((len, _)) = ground.recv_from(&mut buf).await {
            received += 1;
            tracing::info!(len, received, "Ground received packet");
        }
    });

    let config = AppConfig { udp_port: port, run_loop_delay_ms: 250, ..Default::default() };
    let bus = LocalBus::new();
    let pipe = bus.pipe(&config.pipe_name, config.pipe_depth);
    let mut app = App::new(config, pipe, Udp::default(), bus.clone()).unwrap();

    // Forward every other packet of the demo stream.
    app.dispatch(Command::AddRoute {
        stream_id: DEMO_STREAM,
        qos: Qos::default(),
        buf_limit: 16,
        filter: RawFilter::new(2, 1, 2, 0),
    })
    .unwrap();
    app.dispatch(Command::EnableOutput("127.0.0.1".into())).unwrap();

    // Producer: another application publishing telemetry on the bus.
    let producer = bus.clone();
    tokio::spawn(async move {
        let mut codec = Codec::default();
        let mut seq = 0u16;
        let mut tick = interval(Duration::from_millis(50));
        loop {
            tick.tick().await;
            let frame = TlmFrame::new(DEMO_STREAM, seq, MissionTime::now(), Bytes::from_static(b"demo"));
            let mut buf = BytesMut::new();
            codec.encode(frame, &mut buf).unwrap();
            if let Err(e) = producer.publish(buf.freeze()) {
                tracing::warn!(err = ?e, "Publish failed");
            }
            seq = seq.wrapping_add(1) & 0x3FFF;
        }
    });

    let mut tick = interval(app.run_loop_delay());
    for cycle in 1..=20u32 {
        tick.tick().await;

        let out = app.run_cycle();
        tracing::info!(drained = out.drained, forwarded = out.forwarded, "Output cycle");

        if cycle % 4 == 0 {
            app.housekeeping().unwrap();
            let hk = app.hk_tlm();
            tracing::info!(
                stats_valid = hk.stats_valid,
                pkts_per_sec = hk.pkts_per_sec,
                bytes_per_sec = hk.bytes_per_sec,
                "Housekeeping"
            );
        }
    }
}
