//! Payloads of the telemetry packets the application produces. All fields are
//! big-endian.

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Buf, BufMut, BytesMut};
use tlm_router::{
    filter::FilterKind,
    playback::{PlaybackBatch, EVENTS_PER_BATCH, UNDEFINED},
    table::LoadStatus,
    Route, RouterStatus,
};
use tlm_wire::{
    evs::{EventRecord, APP_NAME_LEN, MESSAGE_LEN},
    get_fixed_str, put_fixed_str, Error, StreamId, TimeFormat,
};

/// Width of the destination address field.
pub const IP_STR_LEN: usize = 16;

/// Width of the playback filename field.
pub const FILENAME_LEN: usize = 64;

fn ensure_len(src: &[u8], needed: usize) -> Result<(), Error> {
    if src.len() < needed {
        return Err(Error::Truncated { len: src.len(), needed });
    }
    Ok(())
}

/// Housekeeping telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HkTlm {
    pub valid_cmds: u16,
    pub invalid_cmds: u16,
    pub run_loop_delay_ms: u16,
    pub load_status: u8,
    pub load_count: u16,
    pub stats_valid: bool,
    /// Rounded, saturating.
    pub pkts_per_sec: u16,
    pub bytes_per_sec: u32,
    pub dest: Ipv4Addr,
    pub output_enabled: bool,
    pub output_suppressed: bool,
    pub playback_enabled: bool,
    pub playback_hk_period: u8,
}

impl HkTlm {
    pub const LEN: usize = 38;

    /// Fills the router fields from a status snapshot. Counters and playback fields are
    /// left zeroed.
    pub fn from_status(status: &RouterStatus) -> Self {
        let dest = match status.dest.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };

        Self {
            valid_cmds: 0,
            invalid_cmds: 0,
            run_loop_delay_ms: 0,
            load_status: status.load_status as u8,
            load_count: u16::try_from(status.load_count).unwrap_or(u16::MAX),
            stats_valid: status.stats_valid,
            pkts_per_sec: status.pkts_per_sec.round() as u16,
            bytes_per_sec: status.bytes_per_sec.round() as u32,
            dest,
            output_enabled: status.enabled,
            output_suppressed: status.suppressed,
            playback_enabled: false,
            playback_hk_period: 0,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::LEN);
        dst.put_u16(self.valid_cmds);
        dst.put_u16(self.invalid_cmds);
        dst.put_u16(self.run_loop_delay_ms);
        dst.put_u8(self.load_status);
        dst.put_u8(0);
        dst.put_u16(self.load_count);
        dst.put_u8(self.stats_valid.into());
        dst.put_u8(0);
        dst.put_u16(self.pkts_per_sec);
        dst.put_u32(self.bytes_per_sec);
        put_fixed_str(dst, &self.dest.to_string(), IP_STR_LEN);
        dst.put_u8(self.output_enabled.into());
        dst.put_u8(self.output_suppressed.into());
        dst.put_u8(self.playback_enabled.into());
        dst.put_u8(self.playback_hk_period);
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, Self::LEN)?;

        let valid_cmds = src.get_u16();
        let invalid_cmds = src.get_u16();
        let run_loop_delay_ms = src.get_u16();
        let load_status = src.get_u8();
        src.advance(1);
        let load_count = src.get_u16();
        let stats_valid = src.get_u8() != 0;
        src.advance(1);
        let pkts_per_sec = src.get_u16();
        let bytes_per_sec = src.get_u32();
        let dest = get_fixed_str(&src[..IP_STR_LEN]).parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
        src.advance(IP_STR_LEN);

        Ok(Self {
            valid_cmds,
            invalid_cmds,
            run_loop_delay_ms,
            load_status,
            load_count,
            stats_valid,
            pkts_per_sec,
            bytes_per_sec,
            dest,
            output_enabled: src.get_u8() != 0,
            output_suppressed: src.get_u8() != 0,
            playback_enabled: src.get_u8() != 0,
            playback_hk_period: src.get_u8(),
        })
    }

    /// The decoded table load status.
    pub fn load_status(&self) -> LoadStatus {
        match self.load_status {
            1 => LoadStatus::Valid,
            2 => LoadStatus::Invalid,
            _ => LoadStatus::Undefined,
        }
    }
}

/// Fixed packet with one field of every basic type, for checking ground decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTypeTlm {
    pub synch: u16,
    pub bl1: bool,
    pub bl2: bool,
    pub b1: i8,
    pub b2: i8,
    pub b3: i8,
    pub b4: i8,
    pub w1: i16,
    pub w2: i16,
    pub dw1: i32,
    pub dw2: i32,
    pub f1: f32,
    pub f2: f32,
    pub df1: f64,
    pub df2: f64,
    pub text: [u8; 10],
}

impl Default for DataTypeTlm {
    fn default() -> Self {
        Self {
            synch: 0x6969,
            bl1: false,
            bl2: true,
            b1: 16,
            b2: 127,
            b3: 0x7F,
            b4: 0x45,
            w1: 0x2468,
            w2: 0x7FFF,
            dw1: 0x1234_5678,
            dw2: 0x8765_4321_u32 as i32,
            f1: 90.01,
            f2: 0.000_004_5,
            df1: 99.9,
            df2: 0.4444,
            text: *b"ABCDEFGHIJ",
        }
    }
}

impl DataTypeTlm {
    pub const LEN: usize = 54;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::LEN);
        dst.put_u16(self.synch);
        dst.put_u8(self.bl1.into());
        dst.put_u8(self.bl2.into());
        for b in [self.b1, self.b2, self.b3, self.b4] {
            dst.put_i8(b);
        }
        dst.put_i16(self.w1);
        dst.put_i16(self.w2);
        dst.put_i32(self.dw1);
        dst.put_i32(self.dw2);
        dst.put_f32(self.f1);
        dst.put_f32(self.f2);
        dst.put_f64(self.df1);
        dst.put_f64(self.df2);
        dst.put_slice(&self.text);
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, Self::LEN)?;

        let synch = src.get_u16();
        let bl1 = src.get_u8() != 0;
        let bl2 = src.get_u8() != 0;
        let (b1, b2, b3, b4) = (src.get_i8(), src.get_i8(), src.get_i8(), src.get_i8());
        let (w1, w2) = (src.get_i16(), src.get_i16());
        let (dw1, dw2) = (src.get_i32(), src.get_i32());
        let (f1, f2) = (src.get_f32(), src.get_f32());
        let (df1, df2) = (src.get_f64(), src.get_f64());
        let mut text = [0u8; 10];
        src.copy_to_slice(&mut text);

        Ok(Self { synch, bl1, bl2, b1, b2, b3, b4, w1, w2, dw1, dw2, f1, f2, df1, df2, text })
    }
}

/// One routing table slot, sent on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTlm {
    pub stream_id: StreamId,
    pub priority: u8,
    pub reliability: u8,
    pub buf_limit: u16,
    pub filter_kind: u16,
    pub pass: u16,
    pub group: u16,
    pub offset: u16,
}

impl From<&Route> for RouteTlm {
    fn from(route: &Route) -> Self {
        Self {
            stream_id: route.stream_id,
            priority: route.qos.priority,
            reliability: route.qos.reliability,
            buf_limit: route.buf_limit,
            filter_kind: u16::from(route.filter.kind()),
            pass: route.filter.pass(),
            group: route.filter.group(),
            offset: route.filter.offset(),
        }
    }
}

impl RouteTlm {
    pub const LEN: usize = 14;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::LEN);
        dst.put_u16(self.stream_id.value());
        dst.put_u8(self.priority);
        dst.put_u8(self.reliability);
        dst.put_u16(self.buf_limit);
        dst.put_u16(self.filter_kind);
        dst.put_u16(self.pass);
        dst.put_u16(self.group);
        dst.put_u16(self.offset);
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, Self::LEN)?;

        Ok(Self {
            stream_id: StreamId::new(src.get_u16()),
            priority: src.get_u8(),
            reliability: src.get_u8(),
            buf_limit: src.get_u16(),
            filter_kind: src.get_u16(),
            pass: src.get_u16(),
            group: src.get_u16(),
            offset: src.get_u16(),
        })
    }

    /// The filter kind, if the raw value is a known one.
    pub fn kind(&self) -> Option<FilterKind> {
        FilterKind::try_from(self.filter_kind).ok()
    }
}

/// A playback batch: always [`EVENTS_PER_BATCH`] event slots, padded with undefined
/// entries when fewer events are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackTlm {
    pub filename: String,
    pub event_count: u16,
    pub cursor: u16,
    pub events: Vec<EventRecord>,
}

impl From<PlaybackBatch> for PlaybackTlm {
    fn from(batch: PlaybackBatch) -> Self {
        Self {
            filename: batch.filename,
            event_count: u16::try_from(batch.event_count).unwrap_or(u16::MAX),
            cursor: u16::try_from(batch.cursor).unwrap_or(u16::MAX),
            events: batch.entries,
        }
    }
}

impl PlaybackTlm {
    /// Encoded length of one event slot.
    pub const fn event_len(format: TimeFormat) -> usize {
        format.len() + 4 + APP_NAME_LEN + MESSAGE_LEN
    }

    pub const fn len(format: TimeFormat) -> usize {
        FILENAME_LEN + 4 + EVENTS_PER_BATCH * Self::event_len(format)
    }

    pub fn encode(&self, format: TimeFormat, dst: &mut BytesMut) {
        dst.reserve(Self::len(format));
        put_fixed_str(dst, &self.filename, FILENAME_LEN);
        dst.put_u16(self.event_count);
        dst.put_u16(self.cursor);

        let undefined = EventRecord {
            app_name: UNDEFINED.to_owned(),
            message: UNDEFINED.to_owned(),
            ..Default::default()
        };
        for i in 0..EVENTS_PER_BATCH {
            let event = self.events.get(i).unwrap_or(&undefined);
            format.write(event.time, dst);
            dst.put_u16(event.event_id);
            dst.put_u16(event.event_type);
            put_fixed_str(dst, &event.app_name, APP_NAME_LEN);
            put_fixed_str(dst, &event.message, MESSAGE_LEN);
        }
    }

    pub fn decode(mut src: &[u8], format: TimeFormat) -> Result<Self, Error> {
        ensure_len(src, Self::len(format))?;

        let filename = get_fixed_str(&src[..FILENAME_LEN]);
        src.advance(FILENAME_LEN);
        let event_count = src.get_u16();
        let cursor = src.get_u16();

        let mut events = Vec::with_capacity(EVENTS_PER_BATCH);
        for _ in 0..EVENTS_PER_BATCH {
            let time = format.read(src).unwrap_or_default();
            src.advance(format.len());
            let event_id = src.get_u16();
            let event_type = src.get_u16();
            let app_name = get_fixed_str(&src[..APP_NAME_LEN]);
            src.advance(APP_NAME_LEN);
            let message = get_fixed_str(&src[..MESSAGE_LEN]);
            src.advance(MESSAGE_LEN);

            events.push(EventRecord { time, event_id, event_type, app_name, message, ..Default::default() });
        }

        Ok(Self { filename, event_count, cursor, events })
    }
}
