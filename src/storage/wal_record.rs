//! WAL record framing (spec §4.4, §6.2): each record is an 8-byte
//! little-endian length prefix followed by an optional format-indicator
//! byte and the serialized payload. Legacy records written before the
//! format byte existed are sniffed from the payload's first byte.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const FORMAT_JSON_UTF8: u8 = 0x01;
pub const FORMAT_MSGPACK: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    JsonUtf8,
    MsgPack,
}

impl Format {
    fn tag(self) -> u8 {
        match self {
            Format::JsonUtf8 => FORMAT_JSON_UTF8,
            Format::MsgPack => FORMAT_MSGPACK,
        }
    }
}

/// Appends one length-prefixed, format-tagged record to `writer`
/// (spec §4.4: "length-prefixed (8-byte little-endian unsigned) followed
/// by an optional format indicator byte ... and the serialized
/// payload").
pub fn encode_record<W: Write>(writer: &mut W, format: Format, payload: &[u8]) -> Result<()> {
    let len = (payload.len() + 1) as u64;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&[format.tag()])?;
    writer.write_all(payload)?;
    Ok(())
}

/// A decoded record: payload bytes plus the format it was tagged with
/// (or sniffed as, for legacy records with no format byte).
pub struct DecodedRecord {
    pub format: Format,
    pub payload: Vec<u8>,
}

/// Reads one framed record from `reader`. Distinguishes a legacy,
/// format-byte-less record from a tagged one by inspecting the first
/// payload byte: `{`/`[` means "this was always JSON with no format
/// byte" (spec §9 Open Question, resolved in favor of this sniffing
/// rule since no recorded format byte could otherwise collide with a
/// JSON document's leading brace/bracket).
pub fn decode_record<R: Read>(reader: &mut R) -> Result<DecodedRecord> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf)?;
    let len = u64::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::corruption("WAL record has zero length"));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    match body[0] {
        FORMAT_JSON_UTF8 => Ok(DecodedRecord {
            format: Format::JsonUtf8,
            payload: body[1..].to_vec(),
        }),
        FORMAT_MSGPACK => Ok(DecodedRecord {
            format: Format::MsgPack,
            payload: body[1..].to_vec(),
        }),
        b'{' | b'[' => Ok(DecodedRecord {
            format: Format::JsonUtf8,
            payload: body,
        }),
        other => Err(Error::corruption(format!("unrecognized WAL record format byte 0x{other:02x}"))),
    }
}
