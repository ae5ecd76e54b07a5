//! The external context store collaborator.
//!
//! Out of scope for this crate's implementation (spec.md §1): a real
//! context store that maps certificate IDs to loaded certificates, with
//! persistence, eviction, and whatever locking discipline a multi-threaded
//! host needs, lives in the consuming application. This module only
//! defines the *interface* the validator consumes.

use crate::cert::{CertId, Certificate};
use crate::error::ErrorKind;
use crate::record::Record;

/// Read-only lookup of certificates by ID, plus an optional
/// application-supplied validator for `REQUIRE`d records.
///
/// The validator must not mutate `cert` or the store; [`validate::check`]
/// treats both as read-only for the duration of a check (spec.md §5).
pub trait CertContext {
    /// Resolves a certificate by its 32-byte public-key identity.
    fn cert(&self, id: &CertId) -> Option<&Certificate>;

    /// Validates a single `REQUIRE`d record. Returning `Ok(())` accepts it;
    /// any `Err` is surfaced by the caller as [`ErrorKind::Required`].
    ///
    /// The default implementation rejects every call — a context that
    /// never registers records with `REQUIRE` set never needs to override
    /// this, and one that does but forgets to implement it fails closed
    /// rather than silently accepting unvalidated records.
    fn validate_record(&self, _cert: &Certificate, _record: &Record) -> Result<(), ErrorKind> {
        Err(ErrorKind::NoValidator)
    }

    /// Whether a validator callback is meaningfully configured. Contexts
    /// that override [`validate_record`](Self::validate_record) should
    /// also override this to return `true`.
    fn has_validator(&self) -> bool {
        false
    }
}

/// A minimal in-memory context store, suitable for tests and small
/// single-process callers that don't need their own persistence layer.
#[derive(Default)]
pub struct MapContext {
    certs: std::collections::HashMap<CertId, Certificate>,
    validator: Option<Box<dyn Fn(&Certificate, &Record) -> Result<(), ErrorKind>>>,
}

impl MapContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cert: Certificate) {
        let id = cert.id();
        self.certs.insert(id, cert);
    }

    pub fn set_validator(
        &mut self,
        f: impl Fn(&Certificate, &Record) -> Result<(), ErrorKind> + 'static,
    ) {
        self.validator = Some(Box::new(f));
    }
}

impl CertContext for MapContext {
    fn cert(&self, id: &CertId) -> Option<&Certificate> {
        self.certs.get(id)
    }

    fn validate_record(&self, cert: &Certificate, record: &Record) -> Result<(), ErrorKind> {
        match &self.validator {
            Some(f) => f(cert, record),
            None => Err(ErrorKind::NoValidator),
        }
    }

    fn has_validator(&self) -> bool {
        self.validator.is_some()
    }
}
