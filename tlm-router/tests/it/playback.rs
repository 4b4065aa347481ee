use std::{fs, path::PathBuf};

use bytes::BytesMut;
use tlm_common::MissionTime;
use tlm_router::{
    bus::{write_log_filename, EvsClient, LocalBus, LocalPipe, Pipe},
    playback::{PlaybackError, UNDEFINED},
    EventPlayback, PlaybackOptions, PlaybackState, Qos,
};
use tlm_wire::{
    evs::{EventLogCodec, EventRecord, FileHeader},
    frame::CmdFrame,
    StreamId, TimeFormat,
};
use tokio_util::codec::Encoder;

const EVS_CMD_MID: StreamId = StreamId::new(0x1801);
const WRITE_LOG_FC: u8 = 3;

/// Stands in for the event service: answers write-log commands by writing `events`
/// records to the requested file.
struct EventService {
    pipe: LocalPipe,
}

impl EventService {
    fn new(bus: &LocalBus) -> Self {
        let mut pipe = bus.pipe("EVS_CMD_PIPE", 8);
        pipe.subscribe(EVS_CMD_MID, Qos::default(), 8).unwrap();
        Self { pipe }
    }

    /// Handles one pending command, returning the path written.
    fn serve(&mut self, events: u16) -> Option<PathBuf> {
        let raw = self.pipe.try_recv().unwrap()?;
        let cmd = CmdFrame::decode(raw).unwrap();
        assert_eq!(cmd.function_code, WRITE_LOG_FC);

        let path = PathBuf::from(write_log_filename(&cmd.payload));
        let mut buf = BytesMut::new();
        FileHeader::event_log("Event log").encode(&mut buf);
        let mut codec = EventLogCodec::new(TimeFormat::Subsec16);
        for id in 0..events {
            let record = EventRecord {
                time: MissionTime::new(1000 + u32::from(id), 0),
                event_id: id,
                event_type: 2,
                app_name: "TO_LAB".into(),
                message: format!("event number {id}"),
                ..Default::default()
            };
            codec.encode(&record, &mut buf).unwrap();
        }
        fs::write(&path, &buf).unwrap();

        Some(path)
    }
}

fn playback(bus: &LocalBus, log_file: PathBuf) -> EventPlayback<EvsClient<LocalBus>> {
    let _ = tracing_subscriber::fmt::try_init();

    let evs = EvsClient::new(bus.clone(), EVS_CMD_MID, WRITE_LOG_FC);
    EventPlayback::new(evs, PlaybackOptions::default().log_file(log_file).hk_period(1))
}

#[test]
fn replays_log_written_on_request() {
    let bus = LocalBus::new();
    let mut service = EventService::new(&bus);
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("evt_log.dat");
    let mut plbk = playback(&bus, log_file.clone());

    plbk.start().unwrap();
    assert_eq!(service.serve(5), Some(log_file.clone()));

    assert_eq!(plbk.execute().unwrap(), None);
    assert_eq!(plbk.state(), PlaybackState::Playing);
    assert_eq!(plbk.buffer().count(), 5);
    assert_eq!(plbk.buffer().entry(5).unwrap().message, UNDEFINED);

    let batch = plbk.execute().unwrap().unwrap();
    assert_eq!(batch.filename, log_file.display().to_string());
    assert_eq!(batch.cursor, 0);
    assert_eq!(batch.event_count, 5);
    assert_eq!(batch.entries[3].message, "event number 3");

    let batch = plbk.execute().unwrap().unwrap();
    assert_eq!(batch.cursor, 4);
    let ids: Vec<u16> = batch.entries.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![4, 0, 1, 2]);

    assert_eq!(plbk.execute().unwrap().unwrap().cursor, 3);
}

#[test]
fn missing_log_is_abandoned() {
    let bus = LocalBus::new();
    let mut service = EventService::new(&bus);
    let dir = tempfile::tempdir().unwrap();
    let mut plbk = playback(&bus, dir.path().join("never_written.dat"));

    plbk.start().unwrap();
    // The command goes out but nobody answers it.
    assert!(service.pipe.try_recv().unwrap().is_some());

    let results: Vec<_> = (0..3).map(|_| plbk.execute()).collect();
    assert!(results[0].as_ref().is_ok_and(Option::is_none));
    assert!(results[1].as_ref().is_ok_and(Option::is_none));
    assert!(matches!(results[2], Err(PlaybackError::LoadAbandoned { attempts: 3, .. })));
    assert!(!plbk.is_enabled());

    // Restarting begins a fresh session.
    plbk.start().unwrap();
    assert_eq!(plbk.attempts(), 0);
    assert_eq!(plbk.state(), PlaybackState::Loading);
}
