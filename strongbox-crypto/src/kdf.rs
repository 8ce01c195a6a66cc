//! Password-based key derivation with Argon2.
//!
//! A derivation is configured either by a named preset ([`Argon2Level`]) or by
//! an explicit parameter record ([`Argon2Params`]). Both shapes are folded into
//! [`KdfConfig`] and resolved to one parameter tuple before hashing, so the
//! derivation path is identical for both.
//!
//! Output is deterministic: the same `(config, password, salt)` always yields
//! the same bytes. Versions 0x10 and 0x13 of the same algorithm produce
//! different output and are kept distinct.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE, Salt};
use argon2::{Algorithm, Argon2 as Argon2Hasher, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Shortest salt accepted by the Argon2 family.
pub const MIN_SALT_LEN: usize = 8;

/// Argon2 variant. Integer codes follow the wrapper convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argon2Algorithm {
    Argon2d,
    Argon2i,
    Argon2id,
}

impl Argon2Algorithm {
    /// `0` = argon2d, `1` = argon2i, `2` = argon2id.
    pub fn from_code(code: i32) -> CryptoResult<Self> {
        match code {
            0 => Ok(Self::Argon2d),
            1 => Ok(Self::Argon2i),
            2 => Ok(Self::Argon2id),
            _ => Err(CryptoError::Input(format!(
                "invalid value for argon2 algorithm: {code}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Argon2d => "argon2d",
            Self::Argon2i => "argon2i",
            Self::Argon2id => "argon2id",
        }
    }

    fn to_argon2(self) -> Algorithm {
        match self {
            Self::Argon2d => Algorithm::Argon2d,
            Self::Argon2i => Algorithm::Argon2i,
            Self::Argon2id => Algorithm::Argon2id,
        }
    }
}

impl std::str::FromStr for Argon2Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "argon2d" => Ok(Self::Argon2d),
            "argon2i" => Ok(Self::Argon2i),
            "argon2id" => Ok(Self::Argon2id),
            other => Err(CryptoError::Input(format!(
                "invalid value for argon2 algorithm: {other}"
            ))),
        }
    }
}

/// Argon2 version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Argon2Version {
    #[serde(rename = "16")]
    V0x10,
    #[serde(rename = "19")]
    V0x13,
}

impl Argon2Version {
    /// `16` = 0x10, `19` = 0x13.
    pub fn from_code(code: i32) -> CryptoResult<Self> {
        match code {
            0x10 => Ok(Self::V0x10),
            0x13 => Ok(Self::V0x13),
            _ => Err(CryptoError::Input(format!(
                "invalid value for argon2 version: {code}"
            ))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::V0x10 => 0x10,
            Self::V0x13 => 0x13,
        }
    }

    fn to_argon2(self) -> Version {
        match self {
            Self::V0x10 => Version::V0x10,
            Self::V0x13 => Version::V0x13,
        }
    }
}

/// A fully specified Argon2 cost tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argon2Params {
    pub alg: Argon2Algorithm,
    pub version: Argon2Version,
    pub parallelism: u32,
    /// Memory cost in KiB.
    pub mem_cost: u32,
    /// Number of passes.
    pub time_cost: u32,
}

/// Fast preset suitable for interactive unlocks.
pub const PARAMS_INTERACTIVE: Argon2Params = Argon2Params {
    alg: Argon2Algorithm::Argon2i,
    version: Argon2Version::V0x13,
    parallelism: 1,
    mem_cost: 32768,
    time_cost: 4,
};

/// Slower preset; the default for password-protected stores.
pub const PARAMS_MODERATE: Argon2Params = Argon2Params {
    alg: Argon2Algorithm::Argon2i,
    version: Argon2Version::V0x13,
    parallelism: 1,
    mem_cost: 131072,
    time_cost: 6,
};

impl Argon2Params {
    /// Builds parameters from the integer codes used by foreign callers.
    /// Non-positive costs are rejected.
    pub fn from_codes(
        algorithm: i32,
        version: i32,
        parallelism: i32,
        mem_cost: i32,
        time_cost: i32,
    ) -> CryptoResult<Self> {
        let positive = |value: i32, what: &str| -> CryptoResult<u32> {
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| CryptoError::Input(format!("invalid value for {what}: {value}")))
        };
        Ok(Self {
            alg: Argon2Algorithm::from_code(algorithm)?,
            version: Argon2Version::from_code(version)?,
            parallelism: positive(parallelism, "parallelism")?,
            mem_cost: positive(mem_cost, "mem_cost")?,
            time_cost: positive(time_cost, "time_cost")?,
        })
    }

    fn validate(&self) -> CryptoResult<Params> {
        if self.parallelism == 0 {
            return Err(CryptoError::Input("parallelism must be non-zero".into()));
        }
        if self.mem_cost == 0 {
            return Err(CryptoError::Input("mem_cost must be non-zero".into()));
        }
        if self.time_cost == 0 {
            return Err(CryptoError::Input("time_cost must be non-zero".into()));
        }
        Params::new(self.mem_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| CryptoError::Input(format!("invalid argon2 parameters: {e}")))
    }
}

/// Named cost presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argon2Level {
    Interactive,
    #[default]
    Moderate,
}

impl Argon2Level {
    /// `0` = moderate, `1` = interactive.
    pub fn from_code(code: i8) -> CryptoResult<Self> {
        match code {
            0 => Ok(Self::Moderate),
            1 => Ok(Self::Interactive),
            _ => Err(CryptoError::Input(format!(
                "invalid value for argon2 preset: {code}"
            ))),
        }
    }

    /// Parses the short (`int`, `mod`) or versioned (`13:int`, `13:mod`) forms.
    /// An empty string selects the default.
    pub fn parse(level: &str) -> Option<Self> {
        match level {
            "int" | "13:int" => Some(Self::Interactive),
            "mod" | "13:mod" => Some(Self::Moderate),
            "" => Some(Self::default()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "13:int",
            Self::Moderate => "13:mod",
        }
    }

    pub fn params(&self) -> Argon2Params {
        match self {
            Self::Interactive => PARAMS_INTERACTIVE,
            Self::Moderate => PARAMS_MODERATE,
        }
    }
}

/// Either shape of KDF configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfConfig {
    Preset(Argon2Level),
    Explicit(Argon2Params),
}

impl KdfConfig {
    pub fn resolve(&self) -> Argon2Params {
        match self {
            Self::Preset(level) => level.params(),
            Self::Explicit(params) => *params,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self::Preset(Argon2Level::default())
    }
}

impl From<Argon2Level> for KdfConfig {
    fn from(level: Argon2Level) -> Self {
        Self::Preset(level)
    }
}

impl From<Argon2Params> for KdfConfig {
    fn from(params: Argon2Params) -> Self {
        Self::Explicit(params)
    }
}

/// Entry point mirroring the wrapper surface: `Argon2::derive_password`.
pub struct Argon2;

impl Argon2 {
    /// Derives a 32-byte key from `password` and `salt`.
    pub fn derive_password(
        config: impl Into<KdfConfig>,
        password: &[u8],
        salt: &[u8],
    ) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        derive_password_into(&config.into(), password, salt, &mut out[..])?;
        Ok(out)
    }
}

/// Derives `out.len()` bytes into `out`.
pub fn derive_password_into(
    config: &KdfConfig,
    password: &[u8],
    salt: &[u8],
    out: &mut [u8],
) -> CryptoResult<()> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::Input(format!(
            "salt too short: minimum {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    if out.is_empty() {
        return Err(CryptoError::Input("output length must be non-zero".into()));
    }
    let resolved = config.resolve();
    let params = resolved.validate()?;
    Argon2Hasher::new(resolved.alg.to_argon2(), resolved.version.to_argon2(), params)
        .hash_password_into(password, salt, out)
        .map_err(|e| CryptoError::Input(format!("argon2: {e}")))
}

/// Derives a store key from a password, consuming (and so zeroizing) the
/// password buffer once the hash is computed.
pub fn derive_key(
    config: &KdfConfig,
    password: Zeroizing<Vec<u8>>,
    salt: &Salt,
) -> CryptoResult<DerivedKey> {
    let mut key = DerivedKey::zeroed();
    derive_password_into(config, &password, salt.as_bytes(), key.as_mut_bytes())?;
    drop(password);
    Ok(key)
}
