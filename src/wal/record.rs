//! # WAL Record Codec
//!
//! Every WAL entry is one [`WalRecord`]: which transaction did what to which
//! table row, stamped with a wall-clock time and the log's monotonic
//! sequence number. On disk a record is framed as a 32-bit little-endian
//! length followed by the serialized body.
//!
//! ## Body Layout
//!
//! ```text
//! op:          u8                     (OpKind tag)
//! txn_id:      i64, little-endian
//! timestamp:   i64, little-endian    (milliseconds since Unix epoch)
//! sequence:    u64, little-endian
//! table:       varint length + UTF-8 bytes
//! key:         u8 flag; if 1: type tag + value body (keys are never null)
//! old_value:   u8 flag; if 1: varint length + bytes
//! new_value:   u8 flag; if 1: varint length + bytes
//! crc64:       u64, little-endian    (CRC-64/ECMA over all preceding bytes)
//! ```
//!
//! The trailing checksum lets the recovery scan distinguish a torn tail
//! from a valid record: a frame whose CRC does not match terminates the
//! scan the same way a short frame does.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result};

use crate::encoding::{read_varint, write_varint};
use crate::types::Value;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// What a WAL record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    Begin = 1,
    Insert = 2,
    Update = 3,
    Delete = 4,
    Commit = 5,
    Rollback = 6,
    Checkpoint = 7,
}

impl OpKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => OpKind::Begin,
            2 => OpKind::Insert,
            3 => OpKind::Update,
            4 => OpKind::Delete,
            5 => OpKind::Commit,
            6 => OpKind::Rollback,
            7 => OpKind::Checkpoint,
            _ => bail!("unknown WAL op tag: {:#04x}", byte),
        })
    }

    /// Whether records of this kind mutate a row (as opposed to marking a
    /// transaction boundary).
    pub fn is_mutation(self) -> bool {
        matches!(self, OpKind::Insert | OpKind::Update | OpKind::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub txn_id: i64,
    pub op: OpKind,
    pub table: String,
    pub key: Option<Value>,
    pub old_value: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
    pub timestamp_ms: i64,
    /// Assigned by the log on append; zero until then.
    pub sequence: u64,
}

impl WalRecord {
    /// A transaction boundary record (`Begin`, `Commit`, `Rollback`,
    /// `Checkpoint`).
    pub fn marker(txn_id: i64, op: OpKind) -> Self {
        Self {
            txn_id,
            op,
            table: String::new(),
            key: None,
            old_value: None,
            new_value: None,
            timestamp_ms: now_ms(),
            sequence: 0,
        }
    }

    /// A row mutation record.
    pub fn mutation(
        txn_id: i64,
        op: OpKind,
        table: &str,
        key: Value,
        old_value: Option<Vec<u8>>,
        new_value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            txn_id,
            op,
            table: table.to_string(),
            key: Some(key),
            old_value,
            new_value,
            timestamp_ms: now_ms(),
            sequence: 0,
        }
    }

    pub fn is_mutation(&self) -> bool {
        self.op.is_mutation()
    }

    /// Serializes the record body, including the trailing checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);

        buf.push(self.op as u8);
        buf.extend_from_slice(&self.txn_id.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());

        write_varint(self.table.len() as u64, &mut buf);
        buf.extend_from_slice(self.table.as_bytes());

        match &self.key {
            Some(key) => {
                buf.push(1);
                key.encode_key_into(&mut buf);
            }
            None => buf.push(0),
        }

        for blob in [&self.old_value, &self.new_value] {
            match blob {
                Some(bytes) => {
                    buf.push(1);
                    write_varint(bytes.len() as u64, &mut buf);
                    buf.extend_from_slice(bytes);
                }
                None => buf.push(0),
            }
        }

        let checksum = CRC64.checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes and checksum-validates a record body.
    pub fn deserialize(body: &[u8]) -> Result<Self> {
        ensure!(body.len() >= 8, "WAL record body too short: {}", body.len());

        let (payload, crc_bytes) = body.split_at(body.len() - 8);
        let stored = u64::from_le_bytes(
            crc_bytes
                .try_into()
                .expect("split_at leaves exactly 8 bytes"),
        );
        ensure!(
            CRC64.checksum(payload) == stored,
            "WAL record checksum mismatch"
        );

        let mut cursor = Cursor::new(payload);

        let op = OpKind::from_byte(cursor.u8()?)?;
        let txn_id = i64::from_le_bytes(cursor.array()?);
        let timestamp_ms = i64::from_le_bytes(cursor.array()?);
        let sequence = u64::from_le_bytes(cursor.array()?);

        let table_len = cursor.varint()? as usize;
        let table = std::str::from_utf8(cursor.bytes(table_len)?)
            .map_err(|e| eyre::eyre!("WAL table name is not valid UTF-8: {}", e))?
            .to_string();

        let key = if cursor.u8()? == 1 {
            let (value, read) = Value::decode_key(cursor.rest())?;
            cursor.skip(read)?;
            Some(value)
        } else {
            None
        };

        let mut blobs = [None, None];
        for blob in &mut blobs {
            if cursor.u8()? == 1 {
                let len = cursor.varint()? as usize;
                *blob = Some(cursor.bytes(len)?.to_vec());
            }
        }
        let [old_value, new_value] = blobs;

        ensure!(
            cursor.rest().is_empty(),
            "{} trailing bytes after WAL record payload",
            cursor.rest().len()
        );

        Ok(Self {
            txn_id,
            op,
            table,
            key,
            old_value,
            new_value,
            timestamp_ms,
            sequence,
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_millis() as i64),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        ensure!(
            self.pos + n <= self.buf.len(),
            "truncated WAL record payload"
        );
        self.pos += n;
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        ensure!(self.pos < self.buf.len(), "truncated WAL record payload");
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + n <= self.buf.len(),
            "truncated WAL record payload"
        );
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, read) = read_varint(self.rest())?;
        self.pos += read;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: WalRecord) {
        let body = record.serialize();
        let decoded = WalRecord::deserialize(&body).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn every_op_kind_roundtrips() {
        roundtrip(WalRecord::marker(1, OpKind::Begin));
        roundtrip(WalRecord::marker(1, OpKind::Commit));
        roundtrip(WalRecord::marker(2, OpKind::Rollback));
        roundtrip(WalRecord::marker(0, OpKind::Checkpoint));
        roundtrip(WalRecord::mutation(
            3,
            OpKind::Insert,
            "users",
            Value::I64(7),
            None,
            Some(b"row-bytes".to_vec()),
        ));
        roundtrip(WalRecord::mutation(
            3,
            OpKind::Update,
            "users",
            Value::Text("alice".into()),
            Some(b"old".to_vec()),
            Some(b"new".to_vec()),
        ));
        roundtrip(WalRecord::mutation(
            4,
            OpKind::Delete,
            "users",
            Value::U32(9),
            Some(b"old".to_vec()),
            None,
        ));
    }

    #[test]
    fn sequence_is_part_of_the_body() {
        let mut record = WalRecord::marker(1, OpKind::Begin);
        record.sequence = 42;
        let decoded = WalRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(decoded.sequence, 42);
    }

    #[test]
    fn flipped_bit_fails_the_checksum() {
        let record = WalRecord::mutation(
            1,
            OpKind::Insert,
            "t",
            Value::I64(1),
            None,
            Some(b"v".to_vec()),
        );
        let mut body = record.serialize();
        body[4] ^= 0x01;

        let result = WalRecord::deserialize(&body);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("checksum mismatch"));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let body = WalRecord::marker(1, OpKind::Begin).serialize();
        assert!(WalRecord::deserialize(&body[..body.len() - 1]).is_err());
        assert!(WalRecord::deserialize(&body[..4]).is_err());
    }

    #[test]
    fn op_kind_tags_are_stable() {
        assert_eq!(OpKind::Begin as u8, 1);
        assert_eq!(OpKind::Insert as u8, 2);
        assert_eq!(OpKind::Update as u8, 3);
        assert_eq!(OpKind::Delete as u8, 4);
        assert_eq!(OpKind::Commit as u8, 5);
        assert_eq!(OpKind::Rollback as u8, 6);
        assert_eq!(OpKind::Checkpoint as u8, 7);
    }

    #[test]
    fn mutation_predicate() {
        assert!(OpKind::Insert.is_mutation());
        assert!(OpKind::Update.is_mutation());
        assert!(OpKind::Delete.is_mutation());
        assert!(!OpKind::Begin.is_mutation());
        assert!(!OpKind::Commit.is_mutation());
        assert!(!OpKind::Rollback.is_mutation());
        assert!(!OpKind::Checkpoint.is_mutation());
    }
}
