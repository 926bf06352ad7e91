//! IPTC-IIM datasets and the Photoshop resource block that carries them.

use std::ops::Range;

use img_parts::Bytes;

use super::exif::parse_hex_u16;
use crate::error::{Error, ErrorCode, Result};

pub(crate) const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_SIGNATURE: &[u8] = b"8BIM";
const IIM_RESOURCE_ID: u16 = 0x0404;
const IIM_MARKER: u8 = 0x1c;
/// Largest dataset the standard (non-extended) length field can describe.
const MAX_DATASET_LEN: usize = 0x7fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    Short,
}

type DatasetInfo = (u8, &'static str, Kind);

const ENVELOPE: &[DatasetInfo] = &[
    (0, "ModelVersion", Kind::Short),
    (5, "Destination", Kind::String),
    (20, "FileFormat", Kind::Short),
    (22, "FileVersion", Kind::Short),
    (30, "ServiceId", Kind::String),
    (40, "EnvelopeNumber", Kind::String),
    (50, "ProductId", Kind::String),
    (60, "EnvelopePriority", Kind::String),
    (70, "DateSent", Kind::String),
    (80, "TimeSent", Kind::String),
    (90, "CharacterSet", Kind::String),
    (100, "UNO", Kind::String),
    (120, "ARMId", Kind::Short),
    (122, "ARMVersion", Kind::Short),
];

const APPLICATION2: &[DatasetInfo] = &[
    (0, "RecordVersion", Kind::Short),
    (3, "ObjectType", Kind::String),
    (4, "ObjectAttribute", Kind::String),
    (5, "ObjectName", Kind::String),
    (7, "EditStatus", Kind::String),
    (10, "Urgency", Kind::String),
    (12, "Subject", Kind::String),
    (15, "Category", Kind::String),
    (20, "SuppCategory", Kind::String),
    (22, "FixtureId", Kind::String),
    (25, "Keywords", Kind::String),
    (26, "LocationCode", Kind::String),
    (27, "LocationName", Kind::String),
    (30, "ReleaseDate", Kind::String),
    (35, "ReleaseTime", Kind::String),
    (40, "SpecialInstructions", Kind::String),
    (55, "DateCreated", Kind::String),
    (60, "TimeCreated", Kind::String),
    (62, "DigitizationDate", Kind::String),
    (63, "DigitizationTime", Kind::String),
    (65, "Program", Kind::String),
    (70, "ProgramVersion", Kind::String),
    (80, "Byline", Kind::String),
    (85, "BylineTitle", Kind::String),
    (90, "City", Kind::String),
    (92, "SubLocation", Kind::String),
    (95, "ProvinceState", Kind::String),
    (100, "CountryCode", Kind::String),
    (101, "CountryName", Kind::String),
    (103, "TransmissionReference", Kind::String),
    (105, "Headline", Kind::String),
    (110, "Credit", Kind::String),
    (115, "Source", Kind::String),
    (116, "Copyright", Kind::String),
    (118, "Contact", Kind::String),
    (120, "Caption", Kind::String),
    (122, "Writer", Kind::String),
];

fn record_name(record: u8) -> Option<&'static str> {
    match record {
        1 => Some("Envelope"),
        2 => Some("Application2"),
        _ => None,
    }
}

fn record_datasets(record: u8) -> &'static [DatasetInfo] {
    match record {
        1 => ENVELOPE,
        2 => APPLICATION2,
        _ => &[],
    }
}

/// A parsed `Iptc.<Record>.<Dataset>` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct IptcKey {
    record: u8,
    dataset: u8,
}

impl IptcKey {
    pub(crate) fn parse(key: &str) -> Result<Self> {
        let mut parts = key.splitn(3, '.');
        let (Some("Iptc"), Some(record_part), Some(dataset_part)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_key(key));
        };

        let record = match record_part {
            "Envelope" => 1,
            "Application2" => 2,
            other => {
                return Err(Error::codec(
                    ErrorCode::InvalidRecord,
                    format!("Invalid record name `{other}'"),
                ));
            }
        };

        let dataset = record_datasets(record)
            .iter()
            .find(|(_, name, _)| *name == dataset_part)
            .map(|(number, _, _)| *number)
            .or_else(|| parse_hex_u16(dataset_part).and_then(|n| u8::try_from(n).ok()))
            .ok_or_else(|| {
                Error::codec(
                    ErrorCode::InvalidDataset,
                    format!("Invalid dataset name `{dataset_part}'"),
                )
            })?;

        Ok(Self { record, dataset })
    }

    fn info(&self) -> Option<&'static DatasetInfo> {
        record_datasets(self.record)
            .iter()
            .find(|(number, _, _)| *number == self.dataset)
    }

    fn kind(&self) -> Kind {
        self.info().map(|(_, _, kind)| *kind).unwrap_or(Kind::String)
    }

    pub(crate) fn render(&self) -> String {
        let record = record_name(self.record)
            .map(str::to_string)
            .unwrap_or_else(|| format!("0x{:04x}", self.record));
        let dataset = self
            .info()
            .map(|(_, name, _)| (*name).to_string())
            .unwrap_or_else(|| format!("0x{:04x}", self.dataset));
        format!("Iptc.{record}.{dataset}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IptcValue {
    String(String),
    Short(u16),
    /// Payload of a dataset whose declared type does not fit its bytes.
    Raw(Vec<u8>),
}

impl IptcValue {
    fn decode(kind: Kind, data: &[u8]) -> Self {
        match (kind, data) {
            (Kind::Short, &[hi, lo]) => Self::Short(u16::from_be_bytes([hi, lo])),
            (Kind::Short, _) => Self::Raw(data.to_vec()),
            (Kind::String, _) => Self::String(String::from_utf8_lossy(data).into_owned()),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Short(v) => v.to_be_bytes().to_vec(),
            Self::Raw(data) => data.clone(),
        }
    }

    pub(crate) fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Short(v) => v.to_string(),
            Self::Raw(data) => data
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Iptcdatum {
    pub(crate) key: IptcKey,
    pub(crate) value: IptcValue,
}

/// Decoded IPTC datasets, in stream order.
#[derive(Debug, Clone, Default)]
pub(crate) struct IptcMetadata {
    pub(crate) entries: Vec<Iptcdatum>,
    /// IIM stream as last read or written.
    pub(crate) raw: Option<Bytes>,
    pub(crate) dirty: bool,
}

impl IptcMetadata {
    /// Decode an IIM dataset stream. Decoding stops at the first byte
    /// that is not a dataset marker.
    pub(crate) fn decode(data: &Bytes) -> Result<Self> {
        let mut iptc = Self {
            raw: Some(data.clone()),
            ..Self::default()
        };

        let mut pos = 0;
        while pos + 5 <= data.len() {
            if data[pos] != IIM_MARKER {
                log::debug!("IPTC stream ends at offset {pos} with byte 0x{:02x}", data[pos]);
                break;
            }
            let key = IptcKey {
                record: data[pos + 1],
                dataset: data[pos + 2],
            };
            let size = u16::from_be_bytes([data[pos + 3], data[pos + 4]]);
            pos += 5;

            let len = if size & 0x8000 != 0 {
                // Extended dataset: the low bits give the length of the length.
                let n = usize::from(size & 0x7fff);
                if n > 4 || pos + n > data.len() {
                    return Err(Error::corrupted("Invalid extended IPTC dataset length"));
                }
                let len = data[pos..pos + n]
                    .iter()
                    .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
                pos += n;
                len
            } else {
                usize::from(size)
            };

            let Some(payload) = data.get(pos..pos + len) else {
                return Err(Error::corrupted(format!(
                    "IPTC dataset {} extends beyond the data",
                    key.render()
                )));
            };
            iptc.entries.push(Iptcdatum {
                key,
                value: IptcValue::decode(key.kind(), payload),
            });
            pos += len;
        }

        log::debug!("Decoded {} IPTC datasets", iptc.entries.len());
        Ok(iptc)
    }

    /// Encode as an IIM stream, records in ascending order. `None` when
    /// there are no datasets.
    pub(crate) fn encode(&self) -> Result<Option<Vec<u8>>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let mut sorted: Vec<&Iptcdatum> = self.entries.iter().collect();
        sorted.sort_by_key(|d| d.key.record);

        let mut out = Vec::new();
        for datum in sorted {
            let payload = datum.value.encode();
            if payload.len() > MAX_DATASET_LEN {
                return Err(Error::codec(
                    ErrorCode::ValueTooLarge,
                    format!("{} value is {} bytes", datum.key.render(), payload.len()),
                ));
            }
            out.extend_from_slice(&[IIM_MARKER, datum.key.record, datum.key.dataset]);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            out.extend_from_slice(&payload);
        }
        Ok(Some(out))
    }

    pub(crate) fn position(&self, key: &IptcKey, occurrence: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, d)| d.key == *key)
            .nth(occurrence)
            .map(|(i, _)| i)
    }

    fn upsert(&mut self, key: IptcKey, value: IptcValue) {
        match self.position(&key, 0) {
            Some(pos) => self.entries[pos].value = value,
            None => self.entries.push(Iptcdatum { key, value }),
        }
        self.dirty = true;
    }

    /// Set the first dataset with `key`, adding it when absent.
    pub(crate) fn set_string(&mut self, key: &str, text: &str) -> Result<()> {
        let key = IptcKey::parse(key)?;
        let value = match key.kind() {
            Kind::String => IptcValue::String(text.to_string()),
            Kind::Short => IptcValue::Short(parse_short(&key, text)?),
        };
        self.upsert(key, value);
        Ok(())
    }

    pub(crate) fn set_short(&mut self, key: &str, text: &str) -> Result<()> {
        let key = IptcKey::parse(key)?;
        let value = IptcValue::Short(parse_short(&key, text)?);
        self.upsert(key, value);
        Ok(())
    }

    /// Remove every dataset with `key`. Returns whether anything was removed.
    pub(crate) fn strip(&mut self, key: &str) -> Result<bool> {
        let key = IptcKey::parse(key)?;
        let before = self.entries.len();
        self.entries.retain(|d| d.key != key);
        let removed = self.entries.len() != before;
        self.dirty |= removed;
        Ok(removed)
    }
}

fn parse_short(key: &IptcKey, text: &str) -> Result<u16> {
    text.trim().parse().map_err(|_| {
        Error::codec(
            ErrorCode::InvalidTypeValue,
            format!("Invalid value `{text}' for {}", key.render()),
        )
    })
}

/// One `8BIM` image resource inside a Photoshop block.
struct Resource<'a> {
    id: u16,
    /// The whole resource, header and padding included.
    raw: &'a [u8],
    /// Resource data, relative to the start of the block.
    data: Range<usize>,
}

fn resources(block: &[u8]) -> Vec<Resource<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 12 <= block.len() && &block[pos..pos + 4] == RESOURCE_SIGNATURE {
        let id = u16::from_be_bytes([block[pos + 4], block[pos + 5]]);
        // Pascal name, padded to even length including the length byte.
        let name_len = usize::from(block[pos + 6]);
        let name_padded = (name_len + 2) & !1;
        let data_start = pos + 6 + name_padded;
        let Some(len_bytes) = block.get(data_start..data_start + 4) else {
            break;
        };
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        let data_end = data_start + 4 + len;
        if data_end > block.len() {
            log::warn!("Photoshop resource 0x{id:04x} is truncated");
            break;
        }
        let end = (data_end + (len & 1)).min(block.len());
        out.push(Resource {
            id,
            raw: &block[pos..end],
            data: data_start + 4..data_end,
        });
        pos = end;
    }
    out
}

/// Locate the IIM stream in an APP13 payload (`Photoshop 3.0\0` + resources).
pub(crate) fn find_iim(app13: &[u8]) -> Option<Range<usize>> {
    let block = app13.strip_prefix(PHOTOSHOP_HEADER)?;
    let data = resources(block)
        .into_iter()
        .find(|r| r.id == IIM_RESOURCE_ID)?
        .data;
    Some(data.start + PHOTOSHOP_HEADER.len()..data.end + PHOTOSHOP_HEADER.len())
}

/// Rebuild an APP13 payload: other resources from `existing` are kept and
/// the IIM resource is replaced by `iim`. `None` when nothing is left.
pub(crate) fn build_app13(existing: Option<&[u8]>, iim: Option<&[u8]>) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(PHOTOSHOP_HEADER);

    let kept = existing
        .and_then(|data| data.strip_prefix(PHOTOSHOP_HEADER))
        .map(resources)
        .unwrap_or_default();
    for resource in kept.iter().filter(|r| r.id != IIM_RESOURCE_ID) {
        out.extend_from_slice(resource.raw);
    }

    if let Some(iim) = iim {
        out.extend_from_slice(RESOURCE_SIGNATURE);
        out.extend_from_slice(&IIM_RESOURCE_ID.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // empty name, padded
        out.extend_from_slice(&(iim.len() as u32).to_be_bytes());
        out.extend_from_slice(iim);
        if iim.len() % 2 != 0 {
            out.push(0);
        }
    }

    (out.len() > PHOTOSHOP_HEADER.len()).then_some(out)
}
