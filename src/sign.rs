//! Deterministic event signing and verification.

use anyhow::{anyhow, Context, Result};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::event::Event;

/// Well-known test key ('1') used when no secret key is supplied.
pub const DEFAULT_SECRET_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

/// Compute the Nostr event hash from its canonical fields.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Sign `ev` in place with a hex-encoded secret key, filling `pubkey`, `id`,
/// and `sig`.
///
/// Signing uses BIP-340 Schnorr without auxiliary randomness, so identical
/// fields and key always produce identical ids and signatures.
pub fn sign(ev: &mut Event, seckey: &str) -> Result<()> {
    let sk = hex::decode(seckey).context("secret key is not valid hex")?;
    let secp = Secp256k1::new();
    let kp = Keypair::from_seckey_slice(&secp, &sk).context("secret key is not usable")?;
    // The pubkey is part of the hashed fields, so it must be set first.
    ev.pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    let hash = event_hash(ev)?;
    ev.id = hex::encode(hash);
    let msg = Message::from_digest_slice(&hash)?;
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    ev.sig = hex::encode(sig.as_ref());
    Ok(())
}

/// Verify an event's ID and Schnorr signature.
pub fn verify(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}
