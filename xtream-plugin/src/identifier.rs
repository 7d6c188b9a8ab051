//! Opaque 128-bit item identifiers.
//!
//! Every browsable entity is exposed to the host as a single identifier that
//! packs `(kind, a, b, c)`, four `i32`s, in big-endian order:
//! bytes 0..4 = kind, 4..8 = a, 8..12 = b, 12..16 = c. The meaning of `a`, `b`
//! and `c` depends on the kind (for example `Season` is `(series_id,
//! season_number, 0)`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("malformed identifier `{0}`")]
    Malformed(String),

    #[error("unknown identifier kind {0}")]
    UnknownKind(i32),
}

/// Namespace tag stored in the first four bytes of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ItemKind {
    LiveChannel = 1,
    CatchupDay = 2,
    CatchupStream = 3,
    SeriesCategory = 4,
    Series = 5,
    Season = 6,
    Episode = 7,
    MediaSource = 8,
    EpgEntry = 9,
    FallbackItem = 10,
    VodCategory = 11,
    VodStream = 12,
}

impl ItemKind {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LiveChannel => "live_channel",
            Self::CatchupDay => "catchup_day",
            Self::CatchupStream => "catchup_stream",
            Self::SeriesCategory => "series_category",
            Self::Series => "series",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::MediaSource => "media_source",
            Self::EpgEntry => "epg_entry",
            Self::FallbackItem => "fallback_item",
            Self::VodCategory => "vod_category",
            Self::VodStream => "vod_stream",
        }
    }
}

impl TryFrom<i32> for ItemKind {
    type Error = IdentifierError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::LiveChannel,
            2 => Self::CatchupDay,
            3 => Self::CatchupStream,
            4 => Self::SeriesCategory,
            5 => Self::Series,
            6 => Self::Season,
            7 => Self::Episode,
            8 => Self::MediaSource,
            9 => Self::EpgEntry,
            10 => Self::FallbackItem,
            11 => Self::VodCategory,
            12 => Self::VodStream,
            other => return Err(IdentifierError::UnknownKind(other)),
        })
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pack four `i32`s into 128 bits. Total and lossless.
pub fn encode(kind: i32, a: i32, b: i32, c: i32) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&kind.to_be_bytes());
    bytes[4..8].copy_from_slice(&a.to_be_bytes());
    bytes[8..12].copy_from_slice(&b.to_be_bytes());
    bytes[12..16].copy_from_slice(&c.to_be_bytes());
    Uuid::from_bytes(bytes)
}

/// Inverse of [`encode`].
pub fn decode(id: Uuid) -> (i32, i32, i32, i32) {
    let bytes = id.as_bytes();
    let word = |i: usize| i32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    (word(0), word(4), word(8), word(12))
}

/// A decoded identifier with a known kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId {
    pub kind: ItemKind,
    pub a: i32,
    pub b: i32,
    pub c: i32,
}

impl ItemId {
    pub const fn new(kind: ItemKind, a: i32, b: i32, c: i32) -> Self {
        Self { kind, a, b, c }
    }

    pub fn to_uuid(self) -> Uuid {
        encode(self.kind.as_i32(), self.a, self.b, self.c)
    }

    /// Decode and reject kinds this plugin never issues.
    pub fn from_uuid(id: Uuid) -> Result<Self, IdentifierError> {
        let (kind, a, b, c) = decode(id);
        Ok(Self {
            kind: ItemKind::try_from(kind)?,
            a,
            b,
            c,
        })
    }
}

impl From<ItemId> for Uuid {
    fn from(id: ItemId) -> Self {
        id.to_uuid()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().simple())
    }
}

impl FromStr for ItemId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdentifierError::Malformed(s.to_string()))?;
        Self::from_uuid(id)
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
