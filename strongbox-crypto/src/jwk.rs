//! JSON Web Key export and RFC 7638 thumbprints for asymmetric keys.

use crate::alg::KeyAlg;
use crate::error::{CryptoError, CryptoResult};
use crate::kms::{Key, KeyMaterial};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub(crate) fn base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn base64url_decode(field: &str, value: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CryptoError::Input(format!("invalid jwk {field}: {e}")))
}

/// Public JWK members. Field order matches the RFC 7638 canonical order so
/// the serialized form doubles as thumbprint input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl Jwk {
    fn curve_alg(&self) -> CryptoResult<KeyAlg> {
        match (self.kty.as_str(), self.crv.as_str()) {
            ("OKP", "Ed25519") => Ok(KeyAlg::Ed25519),
            ("OKP", "X25519") => Ok(KeyAlg::X25519),
            ("EC", "secp256k1") => Ok(KeyAlg::K256),
            ("EC", "P-256") => Ok(KeyAlg::P256),
            ("EC", "P-384" | "P-521") | ("OKP", "Ed448" | "X448") => Err(
                CryptoError::Unsupported(format!("jwk curve {}", self.crv)),
            ),
            (kty, crv) => Err(CryptoError::Input(format!("unknown jwk kty/crv: {kty}/{crv}"))),
        }
    }
}

fn ec_jwk<C: AsRef<[u8]>>(crv: &str, x: Option<&C>, y: Option<&C>) -> CryptoResult<Jwk> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err(CryptoError::Input(format!("{crv} point at infinity")));
    };
    Ok(Jwk {
        crv: crv.into(),
        kty: "EC".into(),
        x: base64url(x.as_ref()),
        y: Some(base64url(y.as_ref())),
        d: None,
    })
}

impl Key {
    /// Builds the public JWK for an asymmetric key.
    pub fn to_jwk(&self) -> CryptoResult<Jwk> {
        match &self.material {
            KeyMaterial::Ed25519 { public, .. } => Ok(Jwk {
                crv: "Ed25519".into(),
                kty: "OKP".into(),
                x: base64url(public.as_bytes()),
                y: None,
                d: None,
            }),
            KeyMaterial::X25519 { public, .. } => Ok(Jwk {
                crv: "X25519".into(),
                kty: "OKP".into(),
                x: base64url(public.as_bytes()),
                y: None,
                d: None,
            }),
            KeyMaterial::K256 { public, .. } => {
                let point = public.to_encoded_point(false);
                ec_jwk("secp256k1", point.x(), point.y())
            }
            KeyMaterial::P256 { public, .. } => {
                let point = public.to_encoded_point(false);
                ec_jwk("P-256", point.x(), point.y())
            }
            KeyMaterial::Symmetric { alg, .. } => Err(CryptoError::Unsupported(format!(
                "{alg} keys have no public jwk"
            ))),
        }
    }

    /// Serializes the public JWK as JSON.
    pub fn to_jwk_public(&self) -> CryptoResult<String> {
        serde_json::to_string(&self.to_jwk()?)
            .map_err(|e| CryptoError::Input(format!("jwk serialization: {e}")))
    }

    /// RFC 7638 thumbprint: SHA-256 over the canonical public members, base64url.
    pub fn jwk_thumbprint(&self) -> CryptoResult<String> {
        let canonical = self.to_jwk_public()?;
        Ok(base64url(&Sha256::digest(canonical.as_bytes())))
    }

    /// Imports a key from JWK JSON. A `d` member makes it a secret key.
    pub fn from_jwk(json: &str) -> CryptoResult<Key> {
        let jwk: Jwk =
            serde_json::from_str(json).map_err(|e| CryptoError::Input(format!("invalid jwk: {e}")))?;
        let alg = jwk.curve_alg()?;
        let x = base64url_decode("x", &jwk.x)?;
        let public = match alg {
            KeyAlg::K256 | KeyAlg::P256 => {
                let y = jwk
                    .y
                    .as_deref()
                    .ok_or_else(|| CryptoError::Input("jwk missing y coordinate".into()))?;
                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(&x);
                sec1.extend_from_slice(&base64url_decode("y", y)?);
                Key::from_public_bytes(alg, &sec1)?
            }
            _ => Key::from_public_bytes(alg, &x)?,
        };
        let Some(d) = jwk.d.as_deref() else {
            return Ok(public);
        };
        let secret = Key::from_secret_bytes(alg, &zeroize::Zeroizing::new(base64url_decode("d", d)?))?;
        if secret.to_public_bytes()? != public.to_public_bytes()? {
            return Err(CryptoError::Input("jwk public and private parts do not match".into()));
        }
        Ok(secret)
    }
}
