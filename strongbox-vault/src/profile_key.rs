//! Per-profile keys and the encryption of entry fields under them.

use crate::entry::EntryTag;
use crate::error::{VaultError, VaultResult};
use strongbox_crypto::{
    DerivedKey, EncryptedValue, Key, KeyAlg, WrappedKey, decrypt_searchable, decrypt_value,
    encrypt_searchable, encrypt_value,
};
use strongbox_storage::StoredTag;
use zeroize::Zeroizing;

const PROFILE_KEY_ALG: KeyAlg = KeyAlg::C20P;

/// Sub-keys of one profile. Dropping it zeroizes every key.
pub(crate) struct ProfileKey {
    category: DerivedKey,
    name: DerivedKey,
    tag_name: DerivedKey,
    tag_value: DerivedKey,
    value: DerivedKey,
    hmac: DerivedKey,
    key_wrap: Key,
}

impl ProfileKey {
    /// A fresh random profile key.
    pub fn generate() -> VaultResult<(Key, Self)> {
        let key = Key::generate(PROFILE_KEY_ALG)?;
        let derived = Self::from_key(&key)?;
        Ok((key, derived))
    }

    pub fn from_key(key: &Key) -> VaultResult<Self> {
        if key.algorithm() != PROFILE_KEY_ALG {
            return Err(VaultError::Encryption(format!(
                "profile key has algorithm {}",
                key.algorithm()
            )));
        }
        let root = DerivedKey::from_slice(&key.to_secret_bytes()?)?;
        let sub = |label: &str| root.derive_subkey(label.as_bytes());
        let wrap = sub("strongbox:key-wrap")?;
        Ok(Self {
            category: sub("strongbox:category")?,
            name: sub("strongbox:name")?,
            tag_name: sub("strongbox:tag-name")?,
            tag_value: sub("strongbox:tag-value")?,
            value: sub("strongbox:value")?,
            hmac: sub("strongbox:search-hmac")?,
            key_wrap: Key::from_secret_bytes(KeyAlg::C20P, wrap.as_bytes())?,
        })
    }

    /// Unwraps a profile key stored under the master key.
    pub fn unwrap(master: &Key, wrapped: &[u8]) -> VaultResult<Self> {
        let key = unwrap_profile_key(master, wrapped)?;
        Self::from_key(&key)
    }

    pub fn encrypt_category(&self, category: &str) -> VaultResult<Vec<u8>> {
        Ok(encrypt_searchable(&self.category, &self.hmac, category.as_bytes())?)
    }

    pub fn decrypt_category(&self, ciphertext: &[u8]) -> VaultResult<String> {
        utf8(decrypt_searchable(&self.category, ciphertext)?, "category")
    }

    pub fn encrypt_name(&self, name: &str) -> VaultResult<Vec<u8>> {
        Ok(encrypt_searchable(&self.name, &self.hmac, name.as_bytes())?)
    }

    pub fn decrypt_name(&self, ciphertext: &[u8]) -> VaultResult<String> {
        utf8(decrypt_searchable(&self.name, ciphertext)?, "name")
    }

    pub fn encrypt_tag_name(&self, name: &str) -> VaultResult<Vec<u8>> {
        Ok(encrypt_searchable(&self.tag_name, &self.hmac, name.as_bytes())?)
    }

    pub fn encrypt_tag_value(&self, value: &str) -> VaultResult<Vec<u8>> {
        Ok(encrypt_searchable(&self.tag_value, &self.hmac, value.as_bytes())?)
    }

    /// Encrypts an entry value, bound to the record's encrypted category and name.
    pub fn encrypt_value(
        &self,
        category: &[u8],
        name: &[u8],
        value: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let aad = [category, name].concat();
        Ok(encrypt_value(&self.value, value, &aad)?.to_bytes())
    }

    pub fn decrypt_value(
        &self,
        category: &[u8],
        name: &[u8],
        value: &[u8],
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        let aad = [category, name].concat();
        let value = EncryptedValue::from_bytes(value)?;
        Ok(decrypt_value(&self.value, &value, &aad)?)
    }

    pub fn encrypt_tags(&self, tags: &[EntryTag]) -> VaultResult<Vec<StoredTag>> {
        tags.iter()
            .map(|tag| {
                Ok(match tag {
                    EntryTag::Encrypted(name, value) => StoredTag {
                        plaintext: false,
                        name: self.encrypt_tag_name(name)?,
                        value: self.encrypt_tag_value(value)?,
                    },
                    EntryTag::Plaintext(name, value) => StoredTag {
                        plaintext: true,
                        name: name.as_bytes().to_vec(),
                        value: value.as_bytes().to_vec(),
                    },
                })
            })
            .collect()
    }

    pub fn decrypt_tags(&self, tags: &[StoredTag]) -> VaultResult<Vec<EntryTag>> {
        tags.iter()
            .map(|tag| {
                if tag.plaintext {
                    Ok(EntryTag::Plaintext(
                        utf8(tag.name.clone(), "tag name")?,
                        utf8(tag.value.clone(), "tag value")?,
                    ))
                } else {
                    Ok(EntryTag::Encrypted(
                        utf8(decrypt_searchable(&self.tag_name, &tag.name)?, "tag name")?,
                        utf8(decrypt_searchable(&self.tag_value, &tag.value)?, "tag value")?,
                    ))
                }
            })
            .collect()
    }

    /// Wraps key material stored in a key entry.
    pub fn wrap_key(&self, key: &Key) -> VaultResult<Vec<u8>> {
        Ok(self.key_wrap.wrap_key(key)?.into_bytes())
    }

    pub fn unwrap_key(&self, wrapped: &[u8]) -> VaultResult<Key> {
        let wrapped = WrappedKey::from_bytes(wrapped.to_vec())?;
        Ok(self.key_wrap.unwrap_key(&wrapped)?)
    }
}

/// Recovers the raw profile key; used when re-wrapping under a new master key.
pub(crate) fn unwrap_profile_key(master: &Key, wrapped: &[u8]) -> VaultResult<Key> {
    let wrapped = WrappedKey::from_bytes(wrapped.to_vec())?;
    Ok(master.unwrap_key(&wrapped)?)
}

fn utf8(bytes: Vec<u8>, what: &str) -> VaultResult<String> {
    String::from_utf8(bytes).map_err(|_| VaultError::Encryption(format!("{what} is not valid utf-8")))
}
