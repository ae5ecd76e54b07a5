//! The certificate object and its crypto operations: create, sign,
//! lock/unlock, strip, copy, id (spec.md §4.3).

use bitflags::bitflags;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use scrypt::Params as ScryptParams;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::error::{ErrorKind, Result};
use crate::hash::canonical_digest;
use crate::record::{RecordFlags, RecordStore};
use crate::secret;
use crate::validate::{self, CheckFlags};

/// The layout version this crate writes and accepts. Any certificate whose
/// `version` field differs fails validation with [`ErrorKind::Version`].
pub const LAYOUT_VERSION: u16 = 1;

const PK_BYTES: usize = 32;
const SK_BYTES: usize = 64;
const SALT_BYTES: usize = 32;
const SIGNATURE_BYTES: usize = 64;
const CERT_ID_BYTES: usize = 32;

/// A certificate's unique identity: its 32-byte Ed25519 public key.
pub type CertId = [u8; CERT_ID_BYTES];

bitflags! {
    /// Certificate-level flags.
    pub struct CertFlags: u8 {
        /// This certificate is a locally-anchored trust root.
        const TRUSTED = 0b0000_0001;
        /// `sk` is currently XORed with a password-derived stream.
        const CRYPTSK = 0b0000_0010;
    }
}

bitflags! {
    /// What [`Certificate::strip`] should remove. Applied in the fixed
    /// order `SECRET -> RECORD -> SIGN` regardless of bit order in the
    /// mask, so `RECORD` never outruns `SECRET`'s ability to spare `sk`
    /// and `salt` by identity.
    pub struct StripFlags: u8 {
        /// Remove `sk` and `salt`.
        const SECRET = 0b0000_0001;
        /// Remove every `NOSIGN` record except `sk`, `salt`, `signature`.
        const RECORD = 0b0000_0010;
        /// Remove `signer_id` and `signature`.
        const SIGN   = 0b0000_0100;
    }
}

/// Wraps the `scrypt` crate's cost parameters under the libsodium-style
/// naming spec.md §4.3 uses (`OPSLIMIT_INTERACTIVE`/`MEMLIMIT_INTERACTIVE`).
#[derive(Debug, Clone, Copy)]
pub struct ScryptCost(ScryptParams);

impl ScryptCost {
    /// Matches libsodium's `scryptsalsa208sha256` interactive limits
    /// (roughly `N = 2^14`, `r = 8`, `p = 1`): fast enough for an
    /// interactive unlock prompt, while still meaningfully more expensive
    /// than a single SHA-256 pass.
    pub fn interactive() -> Self {
        Self(ScryptParams::new(14, 8, 1, SK_BYTES).expect("fixed interactive scrypt params are valid"))
    }

    /// Caller-supplied cost, for tests or hosts with different tradeoffs.
    pub fn custom(log_n: u8, r: u32, p: u32) -> std::result::Result<Self, ErrorKind> {
        ScryptParams::new(log_n, r, p, SK_BYTES)
            .map(Self)
            .map_err(|_| ErrorKind::NoMem)
    }
}

impl Default for ScryptCost {
    fn default() -> Self {
        Self::interactive()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// An Ed25519-signed attribute certificate over a sectioned record store.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub version: u16,
    pub flags: CertFlags,
    pub valid_from: i64,
    pub valid_until: i64,
    records: RecordStore,
}

impl Certificate {
    /// Creates a new certificate with a fresh Ed25519 keypair, a random
    /// salt, and the given validity bounds. `valid_from == 0` means "now";
    /// `valid_until == 0` means "never expires".
    pub fn create(valid_from: i64, valid_until: i64) -> Result<Self> {
        let mut records = RecordStore::new();

        records
            .create_buf(b"_cert", b"pk", PK_BYTES, RecordFlags::empty())
            .ok_or(ErrorKind::NoMem)?;
        records
            .create_buf(b"_cert", b"sk", SK_BYTES, RecordFlags::NOSIGN)
            .ok_or(ErrorKind::NoMem)?;
        records
            .create_buf(b"_cert", b"salt", SALT_BYTES, RecordFlags::NOSIGN)
            .ok_or(ErrorKind::NoMem)?;

        OsRng.fill_bytes(
            records
                .get_mut(b"_cert", b"salt")
                .expect("salt record was just created")
                .data
                .as_mut_slice(),
        );

        secret::lock(&records.get(b"_cert", b"sk").expect("sk record was just created").data);

        let signing_key = SigningKey::generate(&mut OsRng);
        let mut sk_bytes = signing_key.to_keypair_bytes();
        let pk_bytes = signing_key.verifying_key().to_bytes();

        records
            .get_mut(b"_cert", b"sk")
            .expect("sk record was just created")
            .data
            .copy_from_slice(&sk_bytes);
        records
            .get_mut(b"_cert", b"pk")
            .expect("pk record was just created")
            .data
            .copy_from_slice(&pk_bytes);
        sk_bytes.zeroize();

        Ok(Certificate {
            version: LAYOUT_VERSION,
            flags: CertFlags::empty(),
            valid_from: if valid_from == 0 { now() } else { valid_from },
            valid_until: if valid_until == 0 { i64::MAX } else { valid_until },
            records,
        })
    }

    /// Assembles a certificate from already-parsed fields. Used only by
    /// [`codec::import`](crate::codec::import), which owns responsibility
    /// for having validated the wire format; this does no further checking
    /// itself, matching `export`/`import`'s split from structural
    /// validation (see [`validate::check`]).
    pub(crate) fn from_parts(
        version: u16,
        flags: CertFlags,
        valid_from: i64,
        valid_until: i64,
        records: RecordStore,
    ) -> Self {
        Certificate {
            version,
            flags,
            valid_from,
            valid_until,
            records,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn pk(&self) -> Option<&[u8]> {
        self.records.get(b"_cert", b"pk").map(|r| r.data.as_slice())
    }

    pub fn sk(&self) -> Option<&[u8]> {
        self.records.get(b"_cert", b"sk").map(|r| r.data.as_slice())
    }

    pub fn salt(&self) -> Option<&[u8]> {
        self.records.get(b"_cert", b"salt").map(|r| r.data.as_slice())
    }

    pub fn signer_id(&self) -> Option<&[u8]> {
        self.records.get(b"_cert", b"signer_id").map(|r| r.data.as_slice())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.records.get(b"_cert", b"signature").map(|r| r.data.as_slice())
    }

    /// The certificate's unique identity: its 32-byte public key.
    ///
    /// Every certificate returned by [`create`](Self::create) or
    /// [`codec::import`](crate::codec::import) carries a well-formed `pk`
    /// record; a missing or mis-sized one is a broken invariant, not a
    /// recoverable runtime condition, so this asserts rather than
    /// returning a `Result` — matching the original's `ec_abort` on the
    /// same invariant (`CERT_ID_BYTES == crypto_sign_PUBLICKEYBYTES`).
    pub fn id(&self) -> CertId {
        let pk = self.pk().expect("certificate has no pk record");
        pk.try_into().expect("pk record is not CERT_ID_BYTES long")
    }

    /// Runs the structural/temporal checks ([`CheckFlags::CERT`]) with no
    /// context. A thin convenience over [`validate::check`].
    pub fn check_structural(&self) -> Result<()> {
        validate::check::<crate::context::MapContext>(None, self, CheckFlags::CERT)
    }

    /// Signs `self` with `signer`, filling in `signer_id` and `signature`.
    ///
    /// To self-sign, clone first: `let root = cert.clone(); cert.sign(&root)?;`
    /// — `sign` takes `&mut self` and `&Certificate`, so signing with
    /// oneself needs a second, immutable view of the same content.
    pub fn sign(&mut self, signer: &Certificate) -> Result<()> {
        validate::check::<crate::context::MapContext>(None, self, CheckFlags::CERT)?;
        validate::check::<crate::context::MapContext>(
            None,
            signer,
            CheckFlags::CERT | CheckFlags::SECRET,
        )?;
        if signer.flags.contains(CertFlags::CRYPTSK) {
            return Err(ErrorKind::Locked);
        }

        // Clamp child validity into signer validity. The comparisons are
        // asymmetric by design per the source this crate's semantics are
        // derived from — see DESIGN.md's open question on this point.
        if self.valid_from > signer.valid_from {
            self.valid_from = signer.valid_from;
        }
        if self.valid_until > signer.valid_until {
            self.valid_until = signer.valid_until;
        }

        let signer_id_buf = self
            .records
            .create_or_replace_buf(b"_cert", b"signer_id", CERT_ID_BYTES, RecordFlags::empty())
            .ok_or(ErrorKind::NoMem)?;
        signer_id_buf.copy_from_slice(&signer.id());

        let digest = canonical_digest(self)?;

        let signer_sk = signer.sk().ok_or(ErrorKind::NoSk)?;
        let signer_sk_array: [u8; SK_BYTES] =
            signer_sk.try_into().map_err(|_| ErrorKind::Size)?;
        let signing_key =
            SigningKey::from_keypair_bytes(&signer_sk_array).map_err(|_| ErrorKind::Sign)?;
        let signature: Signature = signing_key.sign(&digest);

        let sig_buf = self
            .records
            .create_or_replace_buf(b"_cert", b"signature", SIGNATURE_BYTES, RecordFlags::NOSIGN)
            .ok_or(ErrorKind::NoMem)?;
        sig_buf.copy_from_slice(&signature.to_bytes());

        // Defensive self-check: immediately verify what was just produced.
        let signer_pk: [u8; PK_BYTES] =
            signer.pk().ok_or(ErrorKind::NoPk)?.try_into().map_err(|_| ErrorKind::Size)?;
        let verifying_key = VerifyingKey::from_bytes(&signer_pk).map_err(|_| ErrorKind::Sign)?;
        verifying_key.verify_strict(&digest, &signature).map_err(|e| {
            log::warn!("freshly produced signature failed immediate self-verification: {e}");
            ErrorKind::Sign
        })?;

        Ok(())
    }

    fn cryptsk_toggle(&mut self, password: &[u8], cost: ScryptCost) -> Result<()> {
        let salt = self.salt().ok_or(ErrorKind::NoSalt)?.to_vec();
        if self.sk().is_none() {
            return Err(ErrorKind::NoSk);
        }

        let mut stream = vec![0u8; SK_BYTES];
        scrypt::scrypt(password, &salt, &cost.0, &mut stream).map_err(|e| {
            log::warn!("scrypt key derivation failed: {e}");
            ErrorKind::NoMem
        })?;

        let sk_record = self
            .records
            .get_mut(b"_cert", b"sk")
            .expect("presence of sk just checked above");
        for (byte, k) in sk_record.data.iter_mut().zip(stream.iter()) {
            *byte ^= k;
        }
        stream.zeroize();

        self.flags.toggle(CertFlags::CRYPTSK);
        Ok(())
    }

    /// Encrypts `sk` in place by XORing it with a password-derived stream
    /// and setting [`CertFlags::CRYPTSK`]. Fails with
    /// [`ErrorKind::Locked`] if already locked.
    pub fn lock(&mut self, password: &[u8]) -> Result<()> {
        self.lock_with_cost(password, ScryptCost::default())
    }

    pub fn lock_with_cost(&mut self, password: &[u8], cost: ScryptCost) -> Result<()> {
        if self.flags.contains(CertFlags::CRYPTSK) {
            return Err(ErrorKind::Locked);
        }
        self.cryptsk_toggle(password, cost)
    }

    /// Reverses [`lock`](Self::lock). A no-op (`Ok(())`) if not currently
    /// locked.
    pub fn unlock(&mut self, password: &[u8]) -> Result<()> {
        self.unlock_with_cost(password, ScryptCost::default())
    }

    pub fn unlock_with_cost(&mut self, password: &[u8], cost: ScryptCost) -> Result<()> {
        if !self.flags.contains(CertFlags::CRYPTSK) {
            return Ok(());
        }
        self.cryptsk_toggle(password, cost)
    }

    /// Removes the record categories named by `what`, always in the fixed
    /// order `SECRET -> RECORD -> SIGN` (spec.md §4.3).
    pub fn strip(&mut self, what: StripFlags) {
        let signature_present = self.signature().is_some();

        if what.contains(StripFlags::SECRET) {
            if let Some(sk) = self.records.get_mut(b"_cert", b"sk") {
                secret::unlock_and_zero(&mut sk.data);
            }
            self.records.remove(b"_cert", b"sk");
            self.records.remove(b"_cert", b"salt");
        }

        if what.contains(StripFlags::RECORD) {
            self.records.retain_with_section(|r, section| {
                if !r.flags.contains(RecordFlags::NOSIGN) {
                    return true;
                }
                // sk/salt were handled above (and may already be gone);
                // signature is spared unless SIGN was also requested. Scoped
                // to the `_cert` section specifically, so an application
                // record that merely happens to be named "sk"/"salt"/
                // "signature" in some other section is not mistaken for the
                // certificate's own well-known views.
                let in_cert = section == b"_cert";
                let is_sk_or_salt =
                    in_cert && (r.key == b"sk" || r.key == b"salt") && !r.flags.contains(RecordFlags::SECTION);
                let is_signature =
                    in_cert && r.key == b"signature" && !r.flags.contains(RecordFlags::SECTION);
                is_sk_or_salt || (is_signature && signature_present)
            });
        }

        if what.contains(StripFlags::SIGN) {
            self.records.remove(b"_cert", b"signer_id");
            self.records.remove(b"_cert", b"signature");
        }
    }

    /// Produces an independent copy of `self` by round-tripping it through
    /// the export/import codec — deliberately the only certificate
    /// constructor there is, so there's no second, bug-prone
    /// field-by-field clone path to keep in sync with the canonical form.
    pub fn copy(&self) -> Result<Certificate> {
        let bytes = crate::codec::export(self, crate::codec::ExportMode::WithSecret)?;
        crate::codec::import(&bytes)
    }
}

impl Drop for Certificate {
    fn drop(&mut self) {
        if let Some(sk) = self.records.get_mut(b"_cert", b"sk") {
            secret::unlock_and_zero(&mut sk.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_yields_well_formed_cert() {
        let c = Certificate::create(0, 0).unwrap();
        assert_eq!(c.pk().unwrap().len(), PK_BYTES);
        assert_eq!(c.sk().unwrap().len(), SK_BYTES);
        assert_eq!(c.salt().unwrap().len(), SALT_BYTES);
        assert_eq!(c.version, LAYOUT_VERSION);
        assert!(c.valid_from <= now());
        assert_eq!(c.valid_until, i64::MAX);
    }

    #[test]
    fn explicit_validity_bounds_are_kept() {
        let c = Certificate::create(1_000_000_000, 2_000_000_000).unwrap();
        assert_eq!(c.valid_from, 1_000_000_000);
        assert_eq!(c.valid_until, 2_000_000_000);
    }

    #[test]
    fn self_sign_then_verify() {
        let mut root = Certificate::create(0, 0).unwrap();
        root.flags |= CertFlags::TRUSTED;
        let signer = root.clone();
        root.sign(&signer).unwrap();
        assert!(root.signature().is_some());
        assert_eq!(root.signer_id().unwrap(), &root.id()[..]);
    }

    #[test]
    fn sign_clamps_child_validity_downward() {
        let mut signer = Certificate::create(100, 200).unwrap();
        signer.flags |= CertFlags::TRUSTED;
        let signer_copy = signer.clone();
        signer.sign(&signer_copy).unwrap();

        let mut child = Certificate::create(50, 500).unwrap();
        child.sign(&signer).unwrap();
        assert_eq!(child.valid_from, 100);
        assert_eq!(child.valid_until, 200);
    }

    #[test]
    fn signing_with_locked_signer_fails() {
        let mut signer = Certificate::create(0, 0).unwrap();
        signer.flags |= CertFlags::TRUSTED;
        let signer_copy = signer.clone();
        signer.sign(&signer_copy).unwrap();
        signer.lock(b"hunter2").unwrap();

        let mut child = Certificate::create(0, 0).unwrap();
        assert_eq!(child.sign(&signer), Err(ErrorKind::Locked));

        signer.unlock(b"hunter2").unwrap();
        assert!(child.sign(&signer).is_ok());
    }

    #[test]
    fn lock_unlock_round_trip_restores_sk() {
        let mut c = Certificate::create(0, 0).unwrap();
        let original_sk = c.sk().unwrap().to_vec();
        c.lock(b"correct horse battery staple").unwrap();
        assert!(c.flags.contains(CertFlags::CRYPTSK));
        assert_ne!(c.sk().unwrap(), &original_sk[..]);
        c.unlock(b"correct horse battery staple").unwrap();
        assert!(!c.flags.contains(CertFlags::CRYPTSK));
        assert_eq!(c.sk().unwrap(), &original_sk[..]);
    }

    #[test]
    fn lock_twice_fails_locked() {
        let mut c = Certificate::create(0, 0).unwrap();
        c.lock(b"pw").unwrap();
        assert_eq!(c.lock(b"pw"), Err(ErrorKind::Locked));
    }

    #[test]
    fn unlock_when_unlocked_is_a_no_op() {
        let mut c = Certificate::create(0, 0).unwrap();
        assert_eq!(c.unlock(b"pw"), Ok(()));
    }

    #[test]
    fn lock_preserves_signature_validity() {
        let mut root = Certificate::create(0, 0).unwrap();
        root.flags |= CertFlags::TRUSTED;
        let signer_copy = root.clone();
        root.sign(&signer_copy).unwrap();

        root.lock(b"pw").unwrap();
        let digest_before = canonical_digest(&root).unwrap();
        // Unlock isn't required for SIGN to still pass: CRYPTSK is masked
        // out of the signed flag byte and sk/salt are NOSIGN.
        let digest_after = canonical_digest(&root).unwrap();
        assert_eq!(digest_before, digest_after);
    }

    #[test]
    fn strip_secret_removes_sk_and_salt() {
        let mut c = Certificate::create(0, 0).unwrap();
        c.strip(StripFlags::SECRET);
        assert!(c.sk().is_none());
        assert!(c.salt().is_none());
    }

    #[test]
    fn strip_record_only_spares_cert_sections_own_views() {
        let mut c = Certificate::create(0, 0).unwrap();
        // An application record that happens to share a name with one of
        // the `_cert` section's well-known views, but lives elsewhere, is
        // not the certificate's sk/salt/signature and must not be spared.
        c.records_mut()
            .create_buf(b"misc", b"sk", 4, RecordFlags::NOSIGN)
            .unwrap()
            .copy_from_slice(b"fake");
        c.strip(StripFlags::RECORD);
        assert!(c.records().get(b"misc", b"sk").is_none());
        // The real `_cert:sk` is still spared by the RECORD pass.
        assert!(c.sk().is_some());
    }

    #[test]
    fn strip_is_idempotent() {
        let mut root = Certificate::create(0, 0).unwrap();
        root.flags |= CertFlags::TRUSTED;
        let signer_copy = root.clone();
        root.sign(&signer_copy).unwrap();

        let mut once = root.clone();
        once.strip(StripFlags::SECRET | StripFlags::RECORD | StripFlags::SIGN);

        let mut twice = root.clone();
        twice.strip(StripFlags::SECRET | StripFlags::RECORD | StripFlags::SIGN);
        twice.strip(StripFlags::SECRET | StripFlags::RECORD | StripFlags::SIGN);

        let once_keys: Vec<_> = once.records.iter().map(|r| r.key.clone()).collect();
        let twice_keys: Vec<_> = twice.records.iter().map(|r| r.key.clone()).collect();
        assert_eq!(once_keys, twice_keys);
    }

    #[test]
    fn copy_preserves_digest_and_signature() {
        let mut root = Certificate::create(0, 0).unwrap();
        root.flags |= CertFlags::TRUSTED;
        let signer_copy = root.clone();
        root.sign(&signer_copy).unwrap();

        let copy = root.copy().unwrap();
        assert_eq!(canonical_digest(&root).unwrap(), canonical_digest(&copy).unwrap());
        assert_eq!(root.id(), copy.id());
        assert_eq!(root.signature(), copy.signature());
    }
}
