use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tlm_common::MissionTime;
use tlm_wire::StreamId;

use super::{Qos, RecordError, Route, RouteTable, TableError};
use crate::filter::FilterRule;

/// Default document name written by dumps.
pub const TABLE_NAME: &str = "Telemetry Output Packet Table";

/// The persisted form of a routing table.
///
/// ```json
/// {
///   "name": "...",
///   "description": "...",
///   "packet-array": [
///     {"packet": {"dec-id": 2059, "priority": 0, "reliability": 0, "buf-limit": 4,
///                 "filter": {"type": 2, "X": 1, "N": 1, "O": 0}}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "packet-array", default)]
    pub packets: Vec<PacketEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketEntry {
    pub packet: PacketRecord,
}

/// One table record. Every field is optional on input so that incomplete records can be
/// reported rather than failing the whole parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacketRecord {
    /// Informational only, not stored in the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dec_id: Option<i64>,
    pub priority: Option<i64>,
    pub reliability: Option<i64>,
    pub buf_limit: Option<i64>,
    pub filter: Option<FilterRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRecord {
    #[serde(rename = "type")]
    pub kind: Option<i64>,
    #[serde(rename = "X")]
    pub x: Option<i64>,
    #[serde(rename = "N")]
    pub n: Option<i64>,
    #[serde(rename = "O")]
    pub o: Option<i64>,
}

fn field<T: TryFrom<i64>>(name: &'static str, value: i64) -> Result<T, RecordError> {
    T::try_from(value).map_err(|_| RecordError::OutOfRange { field: name, value })
}

impl PacketRecord {
    /// Number of non-identity attributes present, out of 7.
    pub fn attribute_count(&self) -> usize {
        let filter = self.filter.as_ref().map_or(0, |f| {
            [f.kind, f.x, f.n, f.o].iter().filter(|v| v.is_some()).count()
        });
        [self.priority, self.reliability, self.buf_limit].iter().filter(|v| v.is_some()).count() +
            filter
    }

    /// Validates the record and converts it into a route.
    pub fn to_route(&self) -> Result<Route, RecordError> {
        let dec_id = self.dec_id.ok_or(RecordError::MissingId)?;
        let stream_id = u16::try_from(dec_id)
            .ok()
            .map(StreamId::new)
            .filter(|id| !id.is_unused())
            .ok_or(RecordError::InvalidId(dec_id))?;

        let (Some(priority), Some(reliability), Some(buf_limit), Some(filter)) =
            (self.priority, self.reliability, self.buf_limit, self.filter.as_ref())
        else {
            return Err(RecordError::MissingAttributes(self.attribute_count()));
        };
        let (Some(kind), Some(x), Some(n), Some(o)) = (filter.kind, filter.x, filter.n, filter.o)
        else {
            return Err(RecordError::MissingAttributes(self.attribute_count()));
        };

        let qos = Qos {
            priority: field("priority", priority)?,
            reliability: field("reliability", reliability)?,
        };
        let filter = FilterRule::from_raw(
            field("filter.type", kind)?,
            field("filter.N", n)?,
            field("filter.X", x)?,
            field("filter.O", o)?,
        )?;

        Ok(Route::new(stream_id, qos, field("buf-limit", buf_limit)?, filter))
    }
}

impl From<&Route> for PacketRecord {
    fn from(route: &Route) -> Self {
        Self {
            name: None,
            dec_id: Some(route.stream_id.value().into()),
            priority: Some(route.qos.priority.into()),
            reliability: Some(route.qos.reliability.into()),
            buf_limit: Some(route.buf_limit.into()),
            filter: Some(FilterRecord {
                kind: Some(u16::from(route.filter.kind()).into()),
                x: Some(route.filter.group().into()),
                n: Some(route.filter.pass().into()),
                o: Some(route.filter.offset().into()),
            }),
        }
    }
}

impl TableDocument {
    /// Reads a table document from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes the document as JSON, replacing any existing file.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// The records of the document, in order.
    pub fn records(&self) -> Vec<PacketRecord> {
        self.packets.iter().map(|p| p.packet.clone()).collect()
    }
}

impl RouteTable {
    /// Builds a document holding every occupied slot in key order.
    pub fn to_document(&self) -> TableDocument {
        TableDocument {
            name: TABLE_NAME.to_owned(),
            description: format!("Dumped at {}", MissionTime::now()),
            packets: self.iter_used().map(|r| PacketEntry { packet: r.into() }).collect(),
        }
    }
}
