use bytes::{BufMut, Bytes};
use prost::encoding::{WireType, encode_key, encode_varint, encoded_len_varint, key_len};
use serde::{Deserialize, Serialize};

/// One already-serialized observability point. The write path never looks
/// inside it; it only frames points into bodies.
pub type Point = Bytes;

/// Field number of the repeated point message inside a protobuf body.
const PB_POINTS_FIELD: u32 = 1;

/// Wire encoding of the points carried by a body. The numeric code is stored
/// in cached records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PayloadEncoding {
    #[default]
    LineProtocol = 0,
    Protobuf = 1,
    Json = 2,
}

impl PayloadEncoding {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PayloadEncoding::LineProtocol),
            1 => Some(PayloadEncoding::Protobuf),
            2 => Some(PayloadEncoding::Json),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            PayloadEncoding::LineProtocol => "text/plain",
            PayloadEncoding::Protobuf => "application/x-protobuf",
            PayloadEncoding::Json => "application/json",
        }
    }

    /// Bytes a body spends on framing regardless of how many points it holds.
    pub fn envelope_len(self) -> usize {
        match self {
            PayloadEncoding::Json => 2,
            PayloadEncoding::LineProtocol | PayloadEncoding::Protobuf => 0,
        }
    }

    /// Bytes `point` adds to a body. `first` is whether it opens the body.
    pub fn framed_len(self, point: &[u8], first: bool) -> usize {
        match self {
            PayloadEncoding::LineProtocol | PayloadEncoding::Json => {
                point.len() + usize::from(!first)
            }
            PayloadEncoding::Protobuf => {
                key_len(PB_POINTS_FIELD) + encoded_len_varint(point.len() as u64) + point.len()
            }
        }
    }

    pub fn open(self, buf: &mut Vec<u8>) {
        if self == PayloadEncoding::Json {
            buf.put_u8(b'[');
        }
    }

    pub fn push(self, buf: &mut Vec<u8>, point: &[u8], first: bool) {
        match self {
            PayloadEncoding::LineProtocol => {
                if !first {
                    buf.put_u8(b'\n');
                }
                buf.put_slice(point);
            }
            PayloadEncoding::Json => {
                if !first {
                    buf.put_u8(b',');
                }
                buf.put_slice(point);
            }
            PayloadEncoding::Protobuf => {
                encode_key(PB_POINTS_FIELD, WireType::LengthDelimited, buf);
                encode_varint(point.len() as u64, buf);
                buf.put_slice(point);
            }
        }
    }

    pub fn close(self, buf: &mut Vec<u8>) {
        if self == PayloadEncoding::Json {
            buf.put_u8(b']');
        }
    }
}
