//! The layered validation engine: `CERT -> SECRET -> SIGN -> CHAIN -> ROLE
//! -> REQUIRE`, always run in that order and always stopping at the first
//! failure (spec.md §4.4).
//!
//! `CERT` is always forced on regardless of the requested flags. `ROLE`
//! implies `CHAIN`; `CHAIN` implies `SIGN` — requesting the stronger check
//! always pulls in what it depends on. Any of `CHAIN`, `ROLE`, `REQUIRE`
//! without a context fails closed with [`ErrorKind::NoContext`].

use bitflags::bitflags;

use crate::cert::{CertFlags, CertId, Certificate, LAYOUT_VERSION};
use crate::context::CertContext;
use crate::error::{ErrorKind, Result};
use crate::hash::canonical_digest;
use crate::record::{KMAX, RecordFlags};

bitflags! {
    /// Which layers of [`check`] to run. Bits combine freely; the engine
    /// always evaluates them in the fixed order documented on this module,
    /// irrespective of the order the bits happen to be set in.
    pub struct CheckFlags: u16 {
        /// Structural shape and the validity window cover "now".
        const CERT    = 0b0000_0001;
        /// `sk` is present.
        const SECRET  = 0b0000_0010;
        /// `signer_id`/`signature` are present and the signature verifies.
        const SIGN    = 0b0000_0100;
        /// The signer chain resolves up to a `TRUSTED` certificate.
        const CHAIN   = 0b0000_1000;
        /// Every `$_grant`/`$_role` entry is extended by the immediate signer.
        const ROLE    = 0b0001_0000;
        /// Every `REQUIRE`d record passes the context's validator.
        const REQUIRE = 0b0010_0000;
    }
}

/// Recursion bound for the signer-chain walk in [`check_chain`]. Not part
/// of the source's contract (C recurses unbounded and relies on the caller
/// never registering a cycle in a context store) — added because a
/// malicious or buggy context can otherwise make this recurse forever.
const MAX_CHAIN_DEPTH: usize = 64;

/// Runs the requested checks against `cert`, in fixed order, stopping at
/// the first failure.
///
/// `ctx` is only consulted for `SIGN` (to resolve a non-self signer),
/// `CHAIN`, `ROLE`, and `REQUIRE`.
pub fn check<C: CertContext>(ctx: Option<&C>, cert: &Certificate, flags: CheckFlags) -> Result<()> {
    check_at_depth(ctx, cert, flags, 0)
}

fn check_at_depth<C: CertContext>(
    ctx: Option<&C>,
    cert: &Certificate,
    flags: CheckFlags,
    depth: usize,
) -> Result<()> {
    if depth > MAX_CHAIN_DEPTH {
        return Err(ErrorKind::Chain);
    }

    // CERT is always forced on; ROLE implies CHAIN; CHAIN implies SIGN.
    let mut flags = flags | CheckFlags::CERT;
    if flags.contains(CheckFlags::ROLE) {
        flags |= CheckFlags::CHAIN;
    }
    if flags.contains(CheckFlags::CHAIN) {
        flags |= CheckFlags::SIGN;
    }

    if flags.intersects(CheckFlags::CHAIN | CheckFlags::ROLE | CheckFlags::REQUIRE) && ctx.is_none()
    {
        return Err(ErrorKind::NoContext);
    }

    check_cert(cert)?;

    if flags.contains(CheckFlags::SECRET) {
        check_secret(cert)?;
    }
    if flags.contains(CheckFlags::SIGN) {
        check_sign(ctx, cert)?;
    }
    if flags.contains(CheckFlags::CHAIN) {
        check_chain(ctx.expect("context presence checked above"), cert, flags, depth)?;
    }
    if flags.contains(CheckFlags::ROLE) {
        check_role(ctx.expect("context presence checked above"), cert)?;
    }
    if flags.contains(CheckFlags::REQUIRE) {
        check_require(ctx.expect("context presence checked above"), cert)?;
    }
    Ok(())
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Structural shape plus the validity window: version, `valid_from`/
/// `valid_until` against "now", `pk` present, first record (if any) is a
/// section header, every record's `key`/`data` length within bounds, every
/// section header's key is a printable string, and no `$`-prefixed
/// (closed) section contains a `NOSIGN` record.
fn check_cert(cert: &Certificate) -> Result<()> {
    if cert.version != LAYOUT_VERSION {
        return Err(ErrorKind::Version);
    }

    let t = now();
    if t < cert.valid_from {
        return Err(ErrorKind::Future);
    }
    if t > cert.valid_until {
        return Err(ErrorKind::Expired);
    }

    if cert.pk().is_none() {
        return Err(ErrorKind::NoPk);
    }

    let mut current_section_is_closed = false;
    for (index, record) in cert.records().iter().enumerate() {
        if index == 0 && !record.flags.contains(RecordFlags::SECTION) {
            return Err(ErrorKind::Record);
        }
        if record.key.len() > KMAX || record.data.len() > crate::record::DMAX {
            return Err(ErrorKind::Record);
        }
        if record.flags.contains(RecordFlags::SECTION) {
            if !record.key_is_printable_string() {
                return Err(ErrorKind::Record);
            }
            current_section_is_closed = record.key.first() == Some(&b'$');
        }
        if current_section_is_closed && record.flags.contains(RecordFlags::NOSIGN) {
            return Err(ErrorKind::Record);
        }
    }

    Ok(())
}

/// `sk` present. Whether it is `CRYPTSK`-locked is not this layer's
/// concern — a locked certificate can still be read and exported; only
/// *signing with* a locked secret key is forbidden, and that precondition
/// is enforced directly in [`Certificate::sign`](crate::cert::Certificate::sign).
fn check_secret(cert: &Certificate) -> Result<()> {
    if cert.sk().is_none() {
        return Err(ErrorKind::NoSk);
    }
    Ok(())
}

/// `signer_id`/`signature` present; resolves the signer (self, if
/// `signer_id == cert.id()`, otherwise via the context), checks the
/// child's validity window is contained in the signer's, and verifies the
/// signature against the signer's `pk`.
fn check_sign<C: CertContext>(ctx: Option<&C>, cert: &Certificate) -> Result<()> {
    let signer_id = cert.signer_id().ok_or(ErrorKind::Signer)?;
    let signer_id: CertId = signer_id.try_into().map_err(|_| ErrorKind::Size)?;
    let signature_bytes = cert.signature().ok_or(ErrorKind::NoSignature)?;

    let (signer_pk, signer_valid_from, signer_valid_until): (Vec<u8>, i64, i64) =
        if signer_id == cert.id() {
            (
                cert.pk().ok_or(ErrorKind::NoPk)?.to_vec(),
                cert.valid_from,
                cert.valid_until,
            )
        } else {
            let signer = ctx.and_then(|c| c.cert(&signer_id)).ok_or(ErrorKind::Signer)?;
            (
                signer.pk().ok_or(ErrorKind::NoPk)?.to_vec(),
                signer.valid_from,
                signer.valid_until,
            )
        };

    if cert.valid_from < signer_valid_from || cert.valid_until > signer_valid_until {
        return Err(ErrorKind::Validity);
    }

    verify_signature(cert, &signer_pk, signature_bytes)
}

fn verify_signature(cert: &Certificate, signer_pk: &[u8], signature_bytes: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, VerifyingKey};

    let pk_array: [u8; 32] = signer_pk.try_into().map_err(|_| ErrorKind::Size)?;
    let verifying_key = VerifyingKey::from_bytes(&pk_array).map_err(|_| ErrorKind::Sign)?;
    let sig_array: [u8; 64] = signature_bytes.try_into().map_err(|_| ErrorKind::Size)?;
    let signature = Signature::from_bytes(&sig_array);
    let digest = canonical_digest(cert)?;
    verifying_key
        .verify_strict(&digest, &signature)
        .map_err(|_| ErrorKind::Sign)
}

/// If `cert.TRUSTED` is set, the chain terminates successfully here with
/// no further lookup. Otherwise a self-signed certificate fails with
/// [`ErrorKind::SelfSigned`] (only a `TRUSTED` certificate may anchor a
/// chain), and the signer must itself pass every requested check (minus
/// `SECRET`, which only makes sense for the original signing certificate)
/// — failure there is reported as [`ErrorKind::Chain`], not propagated
/// verbatim.
fn check_chain<C: CertContext>(
    ctx: &C,
    cert: &Certificate,
    flags: CheckFlags,
    depth: usize,
) -> Result<()> {
    if cert.flags.contains(CertFlags::TRUSTED) {
        return Ok(());
    }

    let signer_id = cert.signer_id().ok_or(ErrorKind::Signer)?;
    let signer_id: CertId = signer_id.try_into().map_err(|_| ErrorKind::Size)?;
    if signer_id == cert.id() {
        return Err(ErrorKind::SelfSigned);
    }

    let signer = ctx.cert(&signer_id).ok_or(ErrorKind::Signer)?;
    check_at_depth(Some(ctx), signer, flags & !CheckFlags::SECRET, depth + 1)
        .map_err(|_| ErrorKind::Chain)
}

/// For each entry under `$_grant` (key-string failure -> `RECORD`) and
/// `$_role` (key-string failure -> `TYPE`): unless `cert` is `TRUSTED`, the
/// immediate signer must itself carry a matching entry in the same
/// section, else `GRANT`.
///
/// The original C implementation inverts this condition — it rejects
/// when the signer *has* the matching entry and accepts when it doesn't,
/// which defeats delegation entirely. This is treated as a bug per
/// spec.md §9, not a semantics to preserve; the corrected polarity is
/// implemented here.
fn check_role<C: CertContext>(ctx: &C, cert: &Certificate) -> Result<()> {
    for (section, key_error) in [
        (b"$_grant".as_slice(), ErrorKind::Record),
        (b"$_role".as_slice(), ErrorKind::Type),
    ] {
        for entry in cert.records().section_members(section) {
            if !entry.key_is_printable_string() {
                return Err(key_error);
            }
            if cert.flags.contains(CertFlags::TRUSTED) {
                continue;
            }
            let signer_id: CertId = cert
                .signer_id()
                .ok_or(ErrorKind::Signer)?
                .try_into()
                .map_err(|_| ErrorKind::Size)?;
            let signer = ctx.cert(&signer_id).ok_or(ErrorKind::Signer)?;
            if !signer_has_entry(signer, section, &entry.key) {
                return Err(ErrorKind::Grant);
            }
        }
    }
    Ok(())
}

fn signer_has_entry(signer: &Certificate, section: &[u8], key: &[u8]) -> bool {
    signer.records().section_members(section).any(|r| r.key == key)
}

/// Every `REQUIRE`-flagged record must pass the context's validator.
fn check_require<C: CertContext>(ctx: &C, cert: &Certificate) -> Result<()> {
    if !ctx.has_validator() {
        return Err(ErrorKind::NoValidator);
    }
    for record in cert.records().iter() {
        if record.flags.contains(RecordFlags::REQUIRE) {
            ctx.validate_record(cert, record)
                .map_err(|_| ErrorKind::Required)?;
        }
    }
    Ok(())
}
