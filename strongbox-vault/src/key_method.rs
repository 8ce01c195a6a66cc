//! How a store's master key is obtained from the caller's secret.

use crate::error::{VaultError, VaultResult};
use std::fmt;
use std::str::FromStr;
use strongbox_crypto::kdf::derive_key;
use strongbox_crypto::{
    Argon2Algorithm, Argon2Level, Argon2Params, Argon2Version, KEY_SIZE, KdfConfig, Key, KeyAlg,
    Salt,
};
use zeroize::Zeroizing;

/// Algorithm of every master key.
pub(crate) const MASTER_KEY_ALG: KeyAlg = KeyAlg::C20P;

/// Selects how the pass key is turned into a master key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKeyMethod {
    /// The pass key is a base58-encoded 32-byte key.
    RawKey,
    /// The pass key is a password, stretched with Argon2.
    DeriveKey(KdfConfig),
}

impl Default for StoreKeyMethod {
    fn default() -> Self {
        Self::DeriveKey(KdfConfig::default())
    }
}

impl StoreKeyMethod {
    /// Parses `raw`, `kdf:argon2i[:int|:mod|:13:int|:13:mod]` or
    /// `kdf:argon2:<alg>:<version>:<parallelism>:<mem_cost>:<time_cost>`.
    /// An empty string selects the default.
    pub fn parse(method: &str) -> VaultResult<Self> {
        let method = method.trim();
        if method.is_empty() {
            return Ok(Self::default());
        }
        if method.eq_ignore_ascii_case("raw") {
            return Ok(Self::RawKey);
        }
        if method.eq_ignore_ascii_case("none") {
            return Err(VaultError::Unsupported(
                "unprotected stores are not supported".into(),
            ));
        }
        let Some(rest) = method.strip_prefix("kdf:") else {
            return Err(VaultError::Unsupported(format!("store key method: {method}")));
        };
        let preset = match rest {
            "argon2i" => Some(""),
            _ => rest.strip_prefix("argon2i:"),
        };
        if let Some(level) = preset {
            return Argon2Level::parse(level)
                .map(|level| Self::DeriveKey(KdfConfig::Preset(level)))
                .ok_or_else(|| VaultError::Input(format!("unknown argon2i preset: {level}")));
        }
        if let Some(params) = rest.strip_prefix("argon2:") {
            return parse_explicit(params).map(|p| Self::DeriveKey(KdfConfig::Explicit(p)));
        }
        Err(VaultError::Unsupported(format!("key derivation method: {rest}")))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawKey)
    }

    /// Derives the master key. KDF methods need the store's salt.
    pub(crate) fn derive_master(&self, pass_key: &PassKey, salt: Option<&Salt>) -> VaultResult<Key> {
        match self {
            Self::RawKey => {
                let encoded = pass_key
                    .as_str()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| VaultError::Input("raw key method needs a key".into()))?;
                let raw = Zeroizing::new(
                    bs58::decode(encoded)
                        .into_vec()
                        .map_err(|_| VaultError::Input("raw key is not valid base58".into()))?,
                );
                if raw.len() != KEY_SIZE {
                    return Err(VaultError::Input(format!(
                        "raw key must decode to {KEY_SIZE} bytes, got {}",
                        raw.len()
                    )));
                }
                Ok(Key::from_secret_bytes(MASTER_KEY_ALG, &raw)?)
            }
            Self::DeriveKey(config) => {
                let salt = salt.ok_or_else(|| VaultError::Input("missing kdf salt".into()))?;
                let password = Zeroizing::new(pass_key.as_bytes().to_vec());
                let derived = derive_key(config, password, salt)?;
                Ok(Key::from_secret_bytes(MASTER_KEY_ALG, derived.as_bytes())?)
            }
        }
    }
}

fn parse_explicit(params: &str) -> VaultResult<Argon2Params> {
    let parts: Vec<&str> = params.split(':').collect();
    let &[alg, version, parallelism, mem_cost, time_cost] = parts.as_slice() else {
        return Err(VaultError::Input(format!(
            "expected <alg>:<version>:<parallelism>:<mem_cost>:<time_cost>, got {params}"
        )));
    };
    let number = |value: &str, what: &str| -> VaultResult<i32> {
        value
            .parse::<i32>()
            .map_err(|_| VaultError::Input(format!("invalid value for {what}: {value}")))
    };
    let version = i32::from_str_radix(version, 16)
        .map_err(|_| VaultError::Input(format!("invalid value for argon2 version: {version}")))?;
    let alg: Argon2Algorithm = alg.parse()?;
    Ok(Argon2Params {
        alg,
        ..Argon2Params::from_codes(
            1,
            version,
            number(parallelism, "parallelism")?,
            number(mem_cost, "mem_cost")?,
            number(time_cost, "time_cost")?,
        )?
    })
}

impl fmt::Display for StoreKeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawKey => f.write_str("raw"),
            Self::DeriveKey(KdfConfig::Preset(level)) => {
                write!(f, "kdf:argon2i:{}", level.as_str())
            }
            Self::DeriveKey(KdfConfig::Explicit(p)) => write!(
                f,
                "kdf:argon2:{}:{:x}:{}:{}:{}",
                p.alg.as_str(),
                p.version.code(),
                p.parallelism,
                p.mem_cost,
                p.time_cost
            ),
        }
    }
}

impl FromStr for StoreKeyMethod {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The caller's password or raw key. Zeroized on drop.
#[derive(Clone, Default)]
pub struct PassKey(Option<Zeroizing<String>>);

impl PassKey {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_none_or(|k| k.is_empty())
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        self.0.as_deref().map(String::as_str)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.as_str().map(str::as_bytes).unwrap_or_default()
    }
}

impl From<&str> for PassKey {
    fn from(key: &str) -> Self {
        Self(Some(Zeroizing::new(key.to_string())))
    }
}

impl From<String> for PassKey {
    fn from(key: String) -> Self {
        Self(Some(Zeroizing::new(key)))
    }
}

impl fmt::Debug for PassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassKey(..)")
    }
}

/// Generates a base58 raw store key, deterministically when a seed of at
/// least 32 bytes is given.
pub fn generate_raw_key(seed: Option<&[u8]>) -> VaultResult<String> {
    let key = match seed {
        Some(seed) => Key::from_seed(MASTER_KEY_ALG, seed)?,
        None => Key::generate(MASTER_KEY_ALG)?,
    };
    Ok(bs58::encode(&*key.to_secret_bytes()?).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_presets_and_raw() {
        assert_eq!(StoreKeyMethod::parse("raw").unwrap(), StoreKeyMethod::RawKey);
        assert_eq!(
            StoreKeyMethod::parse("kdf:argon2i").unwrap(),
            StoreKeyMethod::DeriveKey(KdfConfig::Preset(Argon2Level::Moderate))
        );
        assert_eq!(
            StoreKeyMethod::parse("kdf:argon2i:int").unwrap(),
            StoreKeyMethod::DeriveKey(KdfConfig::Preset(Argon2Level::Interactive))
        );
        assert_eq!(
            StoreKeyMethod::parse("kdf:argon2i:13:mod").unwrap(),
            StoreKeyMethod::default()
        );
    }

    #[test]
    fn parses_explicit_params() {
        let method = StoreKeyMethod::parse("kdf:argon2:argon2id:10:2:32768:2").unwrap();
        let StoreKeyMethod::DeriveKey(KdfConfig::Explicit(params)) = method else {
            panic!("expected explicit params, got {method:?}");
        };
        assert_eq!(params.alg, Argon2Algorithm::Argon2id);
        assert_eq!(params.version, Argon2Version::V0x10);
        assert_eq!((params.parallelism, params.mem_cost, params.time_cost), (2, 32768, 2));
        assert_eq!(method.to_string(), "kdf:argon2:argon2id:10:2:32768:2");
        assert_eq!(StoreKeyMethod::parse(&method.to_string()).unwrap(), method);
    }

    #[test]
    fn rejects_bad_methods() {
        assert!(matches!(
            StoreKeyMethod::parse("none"),
            Err(VaultError::Unsupported(_))
        ));
        assert!(matches!(
            StoreKeyMethod::parse("kdf:scrypt"),
            Err(VaultError::Unsupported(_))
        ));
        assert!(matches!(
            StoreKeyMethod::parse("kdf:argon2i:fast"),
            Err(VaultError::Input(_))
        ));
        for name in ["kdf:argon2id", "kdf:argon2id:int", "kdf:argon2ix"] {
            assert!(
                matches!(StoreKeyMethod::parse(name), Err(VaultError::Unsupported(_))),
                "{name}"
            );
        }
        assert!(matches!(
            StoreKeyMethod::parse("kdf:argon2:argon2id:13:0:32768:2"),
            Err(VaultError::Input(_))
        ));
        assert!(matches!(
            StoreKeyMethod::parse("kdf:argon2:argon2id:13:1"),
            Err(VaultError::Input(_))
        ));
    }

    #[test]
    fn raw_keys_are_seedable_and_decodable() {
        let seed = [7u8; 32];
        let a = generate_raw_key(Some(&seed)).unwrap();
        assert_eq!(a, generate_raw_key(Some(&seed)).unwrap());
        assert_ne!(a, generate_raw_key(None).unwrap());
        assert!(generate_raw_key(Some(b"short")).is_err());

        let master = StoreKeyMethod::RawKey
            .derive_master(&PassKey::from(a.as_str()), None)
            .unwrap();
        assert_eq!(master.algorithm(), MASTER_KEY_ALG);
    }

    #[test]
    fn raw_method_rejects_bad_keys() {
        let derive = |key: &str| StoreKeyMethod::RawKey.derive_master(&PassKey::from(key), None);
        assert!(matches!(derive(""), Err(VaultError::Input(_))));
        assert!(matches!(derive("0OIl"), Err(VaultError::Input(_))));
        assert!(matches!(derive("abc"), Err(VaultError::Input(_))));
    }

    #[test]
    fn pass_key_debug_is_redacted() {
        let key = PassKey::from("hunter2");
        assert_eq!(format!("{key:?}"), "PassKey(..)");
        assert!(PassKey::empty().is_empty());
    }
}
