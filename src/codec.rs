//! Binary export/import: the certificate's only wire format, and the sole
//! constructor for reading one back (`copy` is built on top of this pair
//! rather than cloning fields by hand).
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! version:      u16
//! flags:        u8
//! valid_from:   i64
//! valid_until:  i64
//! record_count: u32
//! records[record_count]:
//!     key_len:  u16
//!     data_len: u16
//!     flags:    u8
//!     key:      [u8; key_len]
//!     data:     [u8; data_len]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::cert::{CertFlags, Certificate};
use crate::error::{ErrorKind, Result};
use crate::record::{Record, RecordFlags, RecordStore};

/// Controls whether `sk`/`salt` are included in an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Include every record, including `sk` and `salt`.
    WithSecret,
    /// Omit `sk` and `salt` — suitable for handing to a peer.
    PublicOnly,
}

/// Pairs each record in `cert` with the key of the section it currently
/// belongs to (the record itself, if it is a section header), so a record
/// can be matched by section *and* key — e.g. `_cert:sk` specifically, as
/// opposed to any record anywhere happening to be named `sk`.
fn records_with_section(cert: &Certificate) -> impl Iterator<Item = (&Record, Vec<u8>)> {
    let mut current_section: Vec<u8> = Vec::new();
    cert.records().iter().map(move |r| {
        if r.flags.contains(RecordFlags::SECTION) {
            current_section = r.key.clone();
        }
        (r, current_section.clone())
    })
}

/// The exact byte length [`export`] would produce for `cert` under `mode`,
/// without allocating the output buffer — useful for callers sizing a
/// fixed destination up front.
pub fn export_len(cert: &Certificate, mode: ExportMode) -> usize {
    let header = 2 + 1 + 8 + 8 + 4;
    let records: usize = records_with_section(cert)
        .filter(|(r, section)| include_in_export(r, section, mode))
        .map(|(r, _)| 2 + 2 + 1 + r.key.len() + r.data.len())
        .sum();
    header + records
}

fn include_in_export(record: &Record, section: &[u8], mode: ExportMode) -> bool {
    match mode {
        ExportMode::WithSecret => true,
        ExportMode::PublicOnly => {
            !(section == b"_cert" && record.key == b"sk" && !record.flags.contains(RecordFlags::SECTION))
        }
    }
}

/// Serializes `cert` to its binary wire form.
pub fn export(cert: &Certificate, mode: ExportMode) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(export_len(cert, mode));

    out.write_u16::<LittleEndian>(cert.version).map_err(|_| ErrorKind::NoMem)?;
    out.write_u8(cert.flags.bits()).map_err(|_| ErrorKind::NoMem)?;
    out.write_i64::<LittleEndian>(cert.valid_from).map_err(|_| ErrorKind::NoMem)?;
    out.write_i64::<LittleEndian>(cert.valid_until).map_err(|_| ErrorKind::NoMem)?;

    let records: Vec<&Record> = records_with_section(cert)
        .filter(|(r, section)| include_in_export(r, section, mode))
        .map(|(r, _)| r)
        .collect();
    out.write_u32::<LittleEndian>(records.len() as u32).map_err(|_| ErrorKind::NoMem)?;

    for record in records {
        out.write_u16::<LittleEndian>(record.key.len() as u16).map_err(|_| ErrorKind::NoMem)?;
        out.write_u16::<LittleEndian>(record.data.len() as u16).map_err(|_| ErrorKind::NoMem)?;
        out.write_u8(record.flags.bits()).map_err(|_| ErrorKind::NoMem)?;
        out.write_all(&record.key).map_err(|_| ErrorKind::NoMem)?;
        out.write_all(&record.data).map_err(|_| ErrorKind::NoMem)?;
    }

    Ok(out)
}

/// Parses a certificate previously produced by [`export`]. Performs no
/// structural/temporal validation itself — callers that need `CERT` or
/// stronger guarantees run [`validate::check`](crate::validate::check)
/// afterward.
pub fn import(bytes: &[u8]) -> Result<Certificate> {
    let mut cursor = Cursor::new(bytes);

    let version = cursor.read_u16::<LittleEndian>().map_err(|_| ErrorKind::Record)?;
    let raw_flags = cursor.read_u8().map_err(|_| ErrorKind::Record)?;
    let flags = CertFlags::from_bits(raw_flags).ok_or(ErrorKind::Record)?;
    let valid_from = cursor.read_i64::<LittleEndian>().map_err(|_| ErrorKind::Record)?;
    let valid_until = cursor.read_i64::<LittleEndian>().map_err(|_| ErrorKind::Record)?;
    let record_count = cursor.read_u32::<LittleEndian>().map_err(|_| ErrorKind::Record)?;

    let mut records = RecordStore::new();
    let mut in_section: Option<Vec<u8>> = None;

    for _ in 0..record_count {
        let key_len = cursor.read_u16::<LittleEndian>().map_err(|_| ErrorKind::Record)? as usize;
        let data_len = cursor.read_u16::<LittleEndian>().map_err(|_| ErrorKind::Record)? as usize;
        let raw_record_flags = cursor.read_u8().map_err(|_| ErrorKind::Record)?;
        let record_flags = RecordFlags::from_bits(raw_record_flags).ok_or(ErrorKind::Record)?;

        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key).map_err(|_| ErrorKind::Record)?;
        let mut data = vec![0u8; data_len];
        cursor.read_exact(&mut data).map_err(|_| ErrorKind::Record)?;

        if record_flags.contains(RecordFlags::SECTION) {
            in_section = Some(key.clone());
        }

        let buf = if record_flags.contains(RecordFlags::SECTION) {
            // The section header itself: create_buf already wrote one when
            // the first member was inserted, so write straight into the
            // store instead of double-creating a header via create_buf.
            records.push_header(key, record_flags);
            continue;
        } else {
            let section = in_section.as_deref().ok_or(ErrorKind::Record)?;
            records
                .create_buf(section, &key, data.len(), record_flags)
                .ok_or(ErrorKind::NoMem)?
        };
        buf.copy_from_slice(&data);
    }

    if let Some(sk) = records.get(b"_cert", b"sk") {
        crate::secret::lock(&sk.data);
    }

    Ok(Certificate::from_parts(version, flags, valid_from, valid_until, records))
}
