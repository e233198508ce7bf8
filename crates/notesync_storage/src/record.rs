//! Record log framing.
//!
//! Every store mutation is one record:
//!
//! ```text
//! | magic "NSLG" (4) | version (2) | type (1) | length (4) | header crc32 (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian and the payload is CBOR. The header CRC covers
//! magic, version, type and length; the trailing CRC covers everything before
//! it.
//!
//! ## Recovery policy
//!
//! - A trailing record cut short by a crash is a clean end of log, and the
//!   store truncates it away on open. A short payload only counts as torn
//!   when the header CRC verifies, so a damaged length field cannot pass for
//!   a crash.
//! - Bad magic, an unknown type, a newer version or a CRC mismatch is
//!   corruption and the store refuses to open.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use notesync_protocol::{DeadLetter, Document, PendingChange, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes at the start of every record.
pub const RECORD_MAGIC: [u8; 4] = *b"NSLG";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_FIELDS_SIZE: usize = 11;

/// Header fields plus their CRC.
const HEADER_SIZE: usize = HEADER_FIELDS_SIZE + CRC_SIZE;

const CRC_SIZE: usize = 4;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Record {
    PutNote(Document),
    RemoveNote(String),
    AppendChange(PendingChange),
    RemoveChange(u64),
    /// Removes every change with an id at or below the given one.
    ClearChanges(u64),
    SetLastSync(Timestamp),
    DeadLetter(DeadLetter),
}

impl Record {
    fn type_byte(&self) -> u8 {
        match self {
            Record::PutNote(_) => 1,
            Record::RemoveNote(_) => 2,
            Record::AppendChange(_) => 3,
            Record::RemoveChange(_) => 4,
            Record::ClearChanges(_) => 5,
            Record::SetLastSync(_) => 6,
            Record::DeadLetter(_) => 7,
        }
    }

    fn encode_payload(&self) -> StorageResult<Vec<u8>> {
        match self {
            Record::PutNote(doc) => to_cbor(doc),
            Record::RemoveNote(id) => to_cbor(id),
            Record::AppendChange(change) => to_cbor(change),
            Record::RemoveChange(id) | Record::ClearChanges(id) => to_cbor(id),
            Record::SetLastSync(ts) => to_cbor(ts),
            Record::DeadLetter(letter) => to_cbor(letter),
        }
    }

    fn decode_payload(offset: u64, type_byte: u8, payload: &[u8]) -> StorageResult<Self> {
        let record = match type_byte {
            1 => Record::PutNote(from_cbor(payload)?),
            2 => Record::RemoveNote(from_cbor(payload)?),
            3 => Record::AppendChange(from_cbor(payload)?),
            4 => Record::RemoveChange(from_cbor(payload)?),
            5 => Record::ClearChanges(from_cbor(payload)?),
            6 => Record::SetLastSync(from_cbor(payload)?),
            7 => Record::DeadLetter(from_cbor(payload)?),
            other => {
                return Err(StorageError::corrupted(
                    offset,
                    format!("unknown record type {other}"),
                ))
            }
        };
        Ok(record)
    }

    /// Encodes the record with its envelope.
    pub(crate) fn encode(&self) -> StorageResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Codec("record payload exceeds 4 GiB".into()))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        buf.push(self.type_byte());
        buf.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&buf);
        buf.extend_from_slice(&header_crc.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Reads the record at `offset`.
    ///
    /// Returns `Ok(None)` when the remaining bytes hold only a torn record,
    /// and otherwise the record with the offset of the next one.
    pub(crate) fn read_at(
        backend: &dyn StorageBackend,
        offset: u64,
    ) -> StorageResult<Option<(Record, u64)>> {
        let size = backend.size()?;
        if size.saturating_sub(offset) < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != RECORD_MAGIC {
            return Err(StorageError::corrupted(offset, "bad record magic"));
        }
        let (fields, header_crc) = header.split_at(HEADER_FIELDS_SIZE);
        if read_u32(header_crc) != compute_crc32(fields) {
            return Err(StorageError::corrupted(offset, "header checksum mismatch"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > RECORD_VERSION {
            return Err(StorageError::corrupted(
                offset,
                format!("unsupported record version {version}"),
            ));
        }
        let type_byte = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = (HEADER_SIZE + len + CRC_SIZE) as u64;
        if size - offset < total {
            return Ok(None);
        }

        let body = backend.read_at(offset + HEADER_SIZE as u64, len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(len);
        let stored = read_u32(crc_bytes);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let computed = compute_crc32(&covered);
        if stored != computed {
            return Err(StorageError::corrupted(
                offset,
                format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            ));
        }

        let record = Record::decode_payload(offset, type_byte, payload)?;
        Ok(Some((record, offset + total)))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn to_cbor<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| StorageError::Codec(e.to_string()))?;
    Ok(out)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

/// CRC-32 (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use notesync_protocol::ChangeKind;

    fn backend_with(records: &[Record]) -> InMemoryBackend {
        let mut bytes = Vec::new();
        for record in records {
            bytes.extend(record.encode().unwrap());
        }
        InMemoryBackend::with_data(bytes)
    }

    #[test]
    fn crc32_matches_reference_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn reads_records_in_sequence() {
        let doc = Document::new("n1", "Title", "Body").with_tags(["x"]);
        let change = PendingChange::create(doc.clone());
        let backend = backend_with(&[
            Record::PutNote(doc.clone()),
            Record::AppendChange(change.clone()),
            Record::RemoveChange(1),
        ]);

        let (first, next) = Record::read_at(&backend, 0).unwrap().unwrap();
        assert_eq!(first, Record::PutNote(doc));
        let (second, next) = Record::read_at(&backend, next).unwrap().unwrap();
        match second {
            Record::AppendChange(c) => assert_eq!(c.kind, ChangeKind::Create),
            other => panic!("unexpected record {other:?}"),
        }
        let (third, end) = Record::read_at(&backend, next).unwrap().unwrap();
        assert_eq!(third, Record::RemoveChange(1));
        assert_eq!(end, backend.size().unwrap());
        assert!(Record::read_at(&backend, end).unwrap().is_none());
    }

    #[test]
    fn torn_tail_reads_as_end_of_log() {
        let mut bytes = Record::RemoveNote("n1".into()).encode().unwrap();
        let whole = bytes.len() as u64;
        bytes.extend(&Record::RemoveNote("n2".into()).encode().unwrap()[..9]);
        let backend = InMemoryBackend::with_data(bytes);

        let (_, next) = Record::read_at(&backend, 0).unwrap().unwrap();
        assert_eq!(next, whole);
        assert!(Record::read_at(&backend, next).unwrap().is_none());
    }

    #[test]
    fn flipped_bit_is_corruption() {
        let mut bytes = Record::RemoveNote("n1".into()).encode().unwrap();
        let mid = bytes.len() - 6;
        bytes[mid] ^= 0x01;
        let backend = InMemoryBackend::with_data(bytes);

        assert!(matches!(
            Record::read_at(&backend, 0),
            Err(StorageError::Corrupted { offset: 0, .. })
        ));
    }

    #[test]
    fn damaged_length_is_corruption_not_a_torn_tail() {
        let mut bytes = Record::RemoveNote("n1".into()).encode().unwrap();
        bytes.extend(Record::RemoveNote("n2".into()).encode().unwrap());
        bytes[10] = 0x7f;
        let backend = InMemoryBackend::with_data(bytes);

        assert!(matches!(
            Record::read_at(&backend, 0),
            Err(StorageError::Corrupted { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = Record::ClearChanges(3).encode().unwrap();
        bytes[0] = b'X';
        let backend = InMemoryBackend::with_data(bytes);
        assert!(matches!(
            Record::read_at(&backend, 0),
            Err(StorageError::Corrupted { .. })
        ));
    }
}
