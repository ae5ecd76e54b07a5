//! The record store: an ordered, sectioned, flagged key/value list.
//!
//! The original implementation keeps this as an arena-owned singly linked
//! list with raw pointers cached on the certificate struct for the
//! well-known records (`pk`, `sk`, ...). Per the design notes this crate
//! instead keeps an owning `Vec<Record>` on the certificate and turns the
//! cached pointers into index lookups — there is no aliasing between a
//! "view" and the record it refers to because there is no separate view;
//! callers get a `&mut [u8]` straight out of the vector.

use bitflags::bitflags;

/// Maximum key length in bytes.
pub const KMAX: usize = 256;
/// Maximum data length in bytes.
pub const DMAX: usize = 65535;

bitflags! {
    /// Per-record flags.
    pub struct RecordFlags: u8 {
        /// This record opens a new section; its `key` is the section name.
        const SECTION = 0b0000_0001;
        /// This record is excluded from the canonical digest.
        const NOSIGN  = 0b0000_0010;
        /// This record must validate against the ambient validator.
        const REQUIRE = 0b0000_0100;
    }
}

/// A single key/value entry in a certificate's record store.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: RecordFlags,
}

impl Record {
    /// True if `key` is non-empty, NUL-free, and printable — the shape
    /// required of a section header's name.
    pub fn key_is_printable_string(&self) -> bool {
        !self.key.is_empty()
            && self
                .key
                .iter()
                .all(|&b| b != 0 && (0x20..0x7f).contains(&b))
    }
}

/// The ordered list of records that makes up a certificate's payload.
///
/// Insertion order is preserved and is part of the canonical form the
/// hasher depends on; stripping preserves the order of surviving records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the index of a section's header record, if the section
    /// already exists.
    fn section_header_index(&self, section: &[u8]) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.flags.contains(RecordFlags::SECTION) && r.key == section)
    }

    /// Returns the half-open index range `[start, end)` spanning a section's
    /// records, header included.
    fn section_range(&self, header_idx: usize) -> std::ops::Range<usize> {
        let end = self.records[header_idx + 1..]
            .iter()
            .position(|r| r.flags.contains(RecordFlags::SECTION))
            .map(|offset| header_idx + 1 + offset)
            .unwrap_or(self.records.len());
        header_idx..end
    }

    /// Inserts a new zeroed `length`-byte record at the tail of `section`,
    /// creating the section header if it does not yet exist. Returns a
    /// mutable reference to the new record's data buffer.
    ///
    /// Mirrors `ec_record_buf`: callers write directly into the returned
    /// buffer.
    pub fn create_buf(
        &mut self,
        section: &[u8],
        key: &[u8],
        length: usize,
        flags: RecordFlags,
    ) -> Option<&mut [u8]> {
        if key.len() > KMAX || length > DMAX || section.len() > KMAX {
            return None;
        }

        let insert_at = match self.section_header_index(section) {
            Some(header_idx) => self.section_range(header_idx).end,
            None => {
                // New section: append the header, then the record right after it.
                let header = Record {
                    key: section.to_vec(),
                    data: Vec::new(),
                    flags: RecordFlags::SECTION,
                };
                self.records.push(header);
                self.records.len()
            }
        };

        let record = Record {
            key: key.to_vec(),
            data: vec![0u8; length],
            flags,
        };
        self.records.insert(insert_at, record);
        Some(&mut self.records[insert_at].data)
    }

    /// Returns the first record in `section` (or anywhere, if `section` is
    /// `None`) whose key matches `key` (if given) and whose data begins
    /// with `data_prefix` (if given). Scoped to `section`, this can return
    /// the section's own header record (a `None` key matches it).
    pub fn match_bin(
        &self,
        section: Option<&[u8]>,
        key: Option<&[u8]>,
        data_prefix: Option<&[u8]>,
    ) -> Option<&Record> {
        let range: Box<dyn Iterator<Item = &Record>> = match section {
            Some(s) => match self.section_header_index(s) {
                Some(idx) => Box::new(self.records[self.section_range(idx)].iter()),
                None => return None,
            },
            None => Box::new(self.records.iter()),
        };
        range.find(|r| {
            let key_ok = key.map(|k| r.key == k).unwrap_or(true);
            let data_ok = data_prefix
                .map(|d| r.data.len() >= d.len() && &r.data[..d.len()] == d)
                .unwrap_or(true);
            key_ok && data_ok
        })
    }

    /// Iterates the non-header members of `section`, in order. Used by the
    /// `ROLE` check to walk `$_grant`/`$_role` without re-matching the
    /// header on every step.
    pub fn section_members<'a>(&'a self, section: &[u8]) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
        match self.section_header_index(section) {
            Some(idx) => {
                let range = self.section_range(idx);
                Box::new(self.records[range].iter().skip(1))
            }
            None => Box::new(std::iter::empty()),
        }
    }

    /// String-keyed convenience wrapper over [`match_bin`](Self::match_bin).
    pub fn match_(&self, section: Option<&str>, key: Option<&str>) -> Option<&Record> {
        self.match_bin(
            section.map(str::as_bytes),
            key.map(str::as_bytes),
            None,
        )
    }

    fn find_index(&self, section: &[u8], key: &[u8]) -> Option<usize> {
        let header_idx = self.section_header_index(section)?;
        self.section_range(header_idx)
            .find(|&i| !self.records[i].flags.contains(RecordFlags::SECTION) && self.records[i].key == key)
    }

    /// Inserts a new record as [`create_buf`](Self::create_buf) would, or,
    /// if `section:key` already exists, replaces its data and flags in
    /// place (keeping its original position). Used for fields that get
    /// re-stamped across repeated operations, like `signer_id` and
    /// `signature` across re-signing.
    pub fn create_or_replace_buf(
        &mut self,
        section: &[u8],
        key: &[u8],
        length: usize,
        flags: RecordFlags,
    ) -> Option<&mut [u8]> {
        if length > DMAX {
            return None;
        }
        match self.find_index(section, key) {
            Some(idx) => {
                let record = &mut self.records[idx];
                record.data = vec![0u8; length];
                record.flags = flags;
                Some(&mut record.data)
            }
            None => self.create_buf(section, key, length, flags),
        }
    }

    /// Appends a bare section-header record with no associated members yet.
    /// Used by the codec when importing a wire form that already encodes
    /// headers explicitly, so it doesn't need to go through
    /// [`create_buf`](Self::create_buf)'s open-or-append logic.
    pub fn push_header(&mut self, key: Vec<u8>, flags: RecordFlags) {
        self.records.push(Record {
            key,
            data: Vec::new(),
            flags,
        });
    }

    /// Removes and returns the named record, if present.
    pub fn remove(&mut self, section: &[u8], key: &[u8]) -> Option<Record> {
        let idx = self.find_index(section, key)?;
        Some(self.records.remove(idx))
    }

    /// Removes every record for which `pred` returns true, preserving the
    /// relative order of survivors.
    pub fn retain(&mut self, mut pred: impl FnMut(&Record) -> bool) {
        self.records.retain(|r| pred(r));
    }

    /// Like [`retain`](Self::retain), but also passes the predicate the key
    /// of the section the record currently belongs to (the record itself,
    /// if it is a section header). Lets callers special-case records by
    /// section *and* key — e.g. `_cert:sk` specifically, as opposed to any
    /// record anywhere happening to be named `sk` — without re-deriving
    /// section boundaries themselves.
    pub fn retain_with_section(&mut self, mut pred: impl FnMut(&Record, &[u8]) -> bool) {
        let mut current_section: Vec<u8> = Vec::new();
        self.records.retain(|r| {
            if r.flags.contains(RecordFlags::SECTION) {
                current_section = r.key.clone();
            }
            pred(r, &current_section)
        });
    }

    pub fn get_mut(&mut self, section: &[u8], key: &[u8]) -> Option<&mut Record> {
        let idx = self.find_index(section, key)?;
        Some(&mut self.records[idx])
    }

    pub fn get(&self, section: &[u8], key: &[u8]) -> Option<&Record> {
        let idx = self.find_index(section, key)?;
        Some(&self.records[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_buf_opens_section_and_appends() {
        let mut store = RecordStore::new();
        store.create_buf(b"_cert", b"pk", 32, RecordFlags::empty()).unwrap();
        store.create_buf(b"_cert", b"sk", 64, RecordFlags::NOSIGN).unwrap();
        assert_eq!(store.len(), 3); // header + pk + sk
        assert!(store.iter().next().unwrap().flags.contains(RecordFlags::SECTION));
        assert_eq!(store.get(b"_cert", b"sk").unwrap().data.len(), 64);
    }

    #[test]
    fn match_bin_respects_section_scoping() {
        let mut store = RecordStore::new();
        store.create_buf(b"a", b"k", 1, RecordFlags::empty()).unwrap();
        store.create_buf(b"b", b"k", 1, RecordFlags::empty()).unwrap();
        assert!(store.match_bin(Some(b"a"), Some(b"k"), None).is_some());
        assert!(store.match_bin(Some(b"missing"), Some(b"k"), None).is_none());
    }

    #[test]
    fn remove_preserves_order_of_survivors() {
        let mut store = RecordStore::new();
        store.create_buf(b"_cert", b"a", 1, RecordFlags::empty()).unwrap();
        store.create_buf(b"_cert", b"b", 1, RecordFlags::empty()).unwrap();
        store.create_buf(b"_cert", b"c", 1, RecordFlags::empty()).unwrap();
        store.remove(b"_cert", b"b");
        let keys: Vec<_> = store.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![b"_cert".to_vec(), b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn section_name_printable_check() {
        let printable = Record {
            key: b"_cert".to_vec(),
            data: Vec::new(),
            flags: RecordFlags::SECTION,
        };
        assert!(printable.key_is_printable_string());

        let with_nul = Record {
            key: b"_ce\0rt".to_vec(),
            data: Vec::new(),
            flags: RecordFlags::SECTION,
        };
        assert!(!with_nul.key_is_printable_string());
    }
}
