//! Error kinds surfaced at the crate boundary.
//!
//! Every fallible operation in this crate returns `Result<T, ErrorKind>`
//! rather than panicking. The validator in particular returns only the
//! *first* failure it encounters (see `validate::check`); callers that want
//! an exhaustive report must call it again after fixing each cause.

use std::fmt;

/// The full set of boundary error codes this crate can return.
///
/// Variant names mirror the `EC_E*` codes from the original C
/// implementation this crate's wire semantics are derived from, minus the
/// `EC_` / `E` prefixing noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Out of memory / allocation failure.
    NoMem,
    /// `check()` was called with a null certificate.
    Undefined,
    /// `version` does not match `LAYOUT_VERSION`.
    Version,
    /// `valid_from` is in the future.
    Future,
    /// `valid_until` is in the past.
    Expired,
    /// `pk` (or, during SIGN, `signer_id`'s target) is absent.
    NoPk,
    /// `sk` is absent where `SECRET` was required.
    NoSk,
    /// `signature` is absent where `SIGN` was required.
    NoSignature,
    /// `signer_id` is absent, or the signer could not be located.
    Signer,
    /// Ed25519 verification failed.
    Sign,
    /// A non-trusted certificate is self-signed.
    SelfSigned,
    /// Chain validation failed at some ancestor.
    Chain,
    /// Child validity period is not contained in the signer's.
    Validity,
    /// Structural record/section violation.
    Record,
    /// A `$_role` key was not a valid printable string.
    Type,
    /// A grant or role was not extended by the signer.
    Grant,
    /// A `REQUIRE`d record failed the ambient validator callback.
    Required,
    /// `REQUIRE` was requested but the context has no validator callback.
    NoValidator,
    /// `CHAIN`, `ROLE`, or `REQUIRE` was requested without a context.
    NoContext,
    /// The secret key is currently encrypted (`CRYPTSK` set).
    Locked,
    /// `salt` is absent when locking/unlocking was attempted.
    NoSalt,
    /// A size invariant (e.g. `CERT_ID_BYTES == 32`) was violated.
    Size,
}

impl ErrorKind {
    /// The human-readable message for this error code.
    ///
    /// Kept as a single `match` rather than a lookup table indexed by a raw
    /// discriminant — the discriminants aren't part of this crate's public
    /// contract, so there's nothing to index into.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::NoMem => "out of memory",
            ErrorKind::Undefined => "certificate is undefined",
            ErrorKind::Version => "unsupported layout version",
            ErrorKind::Future => "validity period has not started",
            ErrorKind::Expired => "validity period has ended",
            ErrorKind::NoPk => "public key is missing",
            ErrorKind::NoSk => "secret key is missing",
            ErrorKind::NoSignature => "signature is missing",
            ErrorKind::Signer => "signer is missing or unresolvable",
            ErrorKind::Sign => "signature verification failed",
            ErrorKind::SelfSigned => "non-root certificate is self-signed",
            ErrorKind::Chain => "trust chain validation failed",
            ErrorKind::Validity => "validity period exceeds signer's",
            ErrorKind::Record => "structural record violation",
            ErrorKind::Type => "role key is not a valid string",
            ErrorKind::Grant => "grant or role not extended by signer",
            ErrorKind::Required => "a required record failed validation",
            ErrorKind::NoValidator => "no validator callback set on context",
            ErrorKind::NoContext => "operation requires a context",
            ErrorKind::Locked => "secret key is locked",
            ErrorKind::NoSalt => "salt is missing",
            ErrorKind::Size => "size invariant violated",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ErrorKind {}

pub type Result<T> = std::result::Result<T, ErrorKind>;
