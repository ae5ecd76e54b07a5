//! Lightweight Ed25519-signed attribute certificates over a sectioned
//! key/value record store.
//!
//! A certificate is a [`RecordStore`](record::RecordStore) holding a
//! well-known `_cert` section (`pk`, `sk`, `salt`, `signer_id`,
//! `signature`) plus whatever application sections a caller adds, all
//! covered by a canonical [`hash::canonical_digest`] and signed with
//! Ed25519. [`validate::check`] runs the fixed `CERT -> SECRET -> SIGN ->
//! CHAIN -> ROLE -> REQUIRE` pipeline against it.
//!
//! ```
//! use ec_cert::cert::{CertFlags, Certificate};
//!
//! let mut root = Certificate::create(0, 0).unwrap();
//! root.flags |= CertFlags::TRUSTED;
//! let signer = root.clone();
//! root.sign(&signer).unwrap();
//! assert!(root.signature().is_some());
//! ```

pub mod cert;
pub mod codec;
pub mod context;
pub mod error;
pub mod hash;
pub mod record;
pub mod secret;
pub mod validate;

pub use cert::{CertFlags, CertId, Certificate, StripFlags};
pub use codec::ExportMode;
pub use context::{CertContext, MapContext};
pub use error::ErrorKind;
pub use record::{Record, RecordFlags, RecordStore};
pub use validate::CheckFlags;
