//! Store lifecycle: provisioning, unlocking, profiles, rekeying and close.
//!
//! A store is unlocked by deriving (or decoding) the master key and
//! decrypting the verification record written at provisioning time. A failed
//! decryption is the only signal of a wrong password or key; no plaintext is
//! compared.

use crate::entry::EntryList;
use crate::error::{VaultError, VaultResult};
use crate::key_method::{PassKey, StoreKeyMethod, generate_raw_key};
use crate::profile_key::{ProfileKey, unwrap_profile_key};
use crate::session::Session;
use crate::wql::TagQuery;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strongbox_crypto::{Argon2Params, KdfConfig, Key, SALT_SIZE, Salt, random_bytes};
use strongbox_storage::{
    Backend, ConflictKey, DuckDbConfig, Snapshot, WriteBatch, WriteOp, open_backend,
    remove_backend,
};
use tracing::{debug, info, warn};

/// Config record holding the key method, KDF parameters and verification record.
const STORE_CONFIG: &str = "store";
const DEFAULT_PROFILE_CONFIG: &str = "default_profile";
const STORE_FORMAT_VERSION: u32 = 1;

/// AAD of the verification record.
const VERIFY_AAD: &[u8] = b"strongbox:verify";
const VERIFY_TOKEN_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct StoreConfig {
    version: u32,
    key_method: String,
    /// Resolved Argon2 parameters, so later preset changes cannot lock a store out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kdf: Option<Argon2Params>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    /// Base64 of `nonce | ciphertext` of a random token under the master key.
    verify: String,
}

impl StoreConfig {
    fn create(method: StoreKeyMethod, pass_key: &PassKey) -> VaultResult<(Self, Key)> {
        let (kdf, salt) = match method {
            StoreKeyMethod::RawKey => (None, None),
            StoreKeyMethod::DeriveKey(config) => (Some(config.resolve()), Some(Salt::random())),
        };
        let master = method.derive_master(pass_key, salt.as_ref())?;
        let config = Self {
            version: STORE_FORMAT_VERSION,
            key_method: method.to_string(),
            kdf,
            salt: salt.map(|s| STANDARD.encode(s.as_bytes())),
            verify: seal_verification(&master)?,
        };
        Ok((config, master))
    }

    fn parse(raw: &str) -> VaultResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| VaultError::Backend(format!("corrupt store config: {e}")))?;
        if config.version != STORE_FORMAT_VERSION {
            return Err(VaultError::Unsupported(format!(
                "store format version {}",
                config.version
            )));
        }
        Ok(config)
    }

    fn to_json(&self) -> VaultResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn salt(&self) -> VaultResult<Option<Salt>> {
        let Some(encoded) = &self.salt else {
            return Ok(None);
        };
        let bytes: [u8; SALT_SIZE] = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| VaultError::Backend("corrupt kdf salt".into()))?;
        Ok(Some(Salt::from_bytes(bytes)))
    }

    /// Re-derives the master key and checks it against the verification record.
    fn unlock(
        &self,
        requested: Option<StoreKeyMethod>,
        pass_key: &PassKey,
    ) -> VaultResult<(StoreKeyMethod, Key)> {
        let stored = StoreKeyMethod::parse(&self.key_method)?;
        if let Some(requested) = requested {
            if requested.is_raw() != stored.is_raw() {
                return Err(VaultError::Input(format!(
                    "store uses key method {stored}, not {requested}"
                )));
            }
        }
        let effective = match (stored, self.kdf) {
            (StoreKeyMethod::RawKey, _) => StoreKeyMethod::RawKey,
            (StoreKeyMethod::DeriveKey(_), Some(params)) => {
                StoreKeyMethod::DeriveKey(KdfConfig::Explicit(params))
            }
            (StoreKeyMethod::DeriveKey(_), None) => {
                return Err(VaultError::Backend("store config lacks kdf parameters".into()));
            }
        };
        let master = effective.derive_master(pass_key, self.salt()?.as_ref())?;
        open_verification(&master, &self.verify)?;
        Ok((stored, master))
    }
}

fn seal_verification(master: &Key) -> VaultResult<String> {
    let token = random_bytes(VERIFY_TOKEN_LEN);
    let mut sealed = master.aead_random_nonce()?;
    let ciphertext = master.aead_encrypt(&token, &sealed, VERIFY_AAD)?;
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

fn open_verification(master: &Key, encoded: &str) -> VaultResult<()> {
    let sealed = STANDARD
        .decode(encoded)
        .map_err(|_| VaultError::Backend("corrupt verification record".into()))?;
    let nonce_len = master.algorithm().nonce_len().unwrap_or_default();
    if sealed.len() < nonce_len {
        return Err(VaultError::Backend("corrupt verification record".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(nonce_len);
    master
        .aead_decrypt(ciphertext, nonce, VERIFY_AAD)
        .map(drop)
        .map_err(|_| VaultError::Authentication("invalid store key".into()))
}

/// Unlocked key material. Dropping it zeroizes the master and profile keys.
struct StoreKeys {
    master: Key,
    key_method: StoreKeyMethod,
    profiles: HashMap<String, ProfileKey>,
}

/// State shared by a store and every session it opened.
pub(crate) struct StoreInner {
    backend: Arc<dyn Backend>,
    keys: RwLock<Option<StoreKeys>>,
}

impl StoreInner {
    fn read_keys(&self) -> VaultResult<RwLockReadGuard<'_, Option<StoreKeys>>> {
        self.keys
            .read()
            .map_err(|_| VaultError::Backend("store key lock poisoned".into()))
    }

    fn write_keys(&self) -> VaultResult<RwLockWriteGuard<'_, Option<StoreKeys>>> {
        self.keys
            .write()
            .map_err(|_| VaultError::Backend("store key lock poisoned".into()))
    }

    /// The backend, provided the store is still open.
    pub(crate) fn backend(&self) -> VaultResult<&dyn Backend> {
        if self.read_keys()?.is_none() {
            return Err(VaultError::closed());
        }
        Ok(&*self.backend)
    }

    pub(crate) fn snapshot(&self) -> VaultResult<Box<dyn Snapshot>> {
        Ok(self.backend()?.snapshot()?)
    }

    /// Runs `f` with the profile's keys, holding the key lock so that a
    /// concurrent close waits for it.
    pub(crate) fn with_profile_key<R>(
        &self,
        profile: &str,
        f: impl FnOnce(&ProfileKey) -> VaultResult<R>,
    ) -> VaultResult<R> {
        {
            let guard = self.read_keys()?;
            let keys = guard.as_ref().ok_or_else(VaultError::closed)?;
            if let Some(key) = keys.profiles.get(profile) {
                return f(key);
            }
        }
        self.load_profile(profile)?;
        let guard = self.read_keys()?;
        let keys = guard.as_ref().ok_or_else(VaultError::closed)?;
        let key = keys
            .profiles
            .get(profile)
            .ok_or_else(|| VaultError::NotFound(format!("profile {profile}")))?;
        f(key)
    }

    fn load_profile(&self, profile: &str) -> VaultResult<()> {
        let wrapped = self
            .snapshot()?
            .profile(profile)?
            .ok_or_else(|| VaultError::NotFound(format!("profile {profile}")))?;
        let mut guard = self.write_keys()?;
        let keys = guard.as_mut().ok_or_else(VaultError::closed)?;
        let key = ProfileKey::unwrap(&keys.master, &wrapped)?;
        keys.profiles.insert(profile.to_string(), key);
        debug!("loaded profile key for {profile}");
        Ok(())
    }
}

/// An open store.
///
/// Clones share the same unlocked keys and backend; closing one closes all.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    profile: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.inner.backend.backend_name())
            .field("profile", &self.profile)
            .finish()
    }
}

impl Store {
    /// Creates a store at `uri`.
    ///
    /// With `recreate`, any existing file-backed store is deleted first.
    /// Otherwise an already provisioned store is opened with the given key.
    /// Without a `profile` name the default profile gets a random one.
    pub fn provision(
        uri: &str,
        key_method: StoreKeyMethod,
        pass_key: PassKey,
        profile: Option<&str>,
        recreate: bool,
    ) -> VaultResult<Self> {
        Self::provision_with_config(
            uri,
            key_method,
            pass_key,
            profile,
            recreate,
            &DuckDbConfig::default(),
        )
    }

    pub fn provision_with_config(
        uri: &str,
        key_method: StoreKeyMethod,
        pass_key: PassKey,
        profile: Option<&str>,
        recreate: bool,
        config: &DuckDbConfig,
    ) -> VaultResult<Self> {
        if recreate && remove_backend(uri)? {
            info!("removed existing store before provisioning");
        }
        let backend = open_backend(uri, config, true)?;
        let snapshot = backend.snapshot()?;
        if snapshot.config(STORE_CONFIG)?.is_some() {
            drop(snapshot);
            info!("store already provisioned, opening instead");
            return Self::unlock(backend, Some(key_method), &pass_key, profile);
        }

        let (store_config, master) = StoreConfig::create(key_method, &pass_key)?;
        drop(pass_key);
        let profile = profile
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (profile_key, derived) = ProfileKey::generate()?;

        let mut batch = WriteBatch::new(snapshot.version());
        drop(snapshot);
        batch.ops = vec![
            WriteOp::SetConfig {
                name: STORE_CONFIG.into(),
                value: store_config.to_json()?,
            },
            WriteOp::SetConfig {
                name: DEFAULT_PROFILE_CONFIG.into(),
                value: profile.clone(),
            },
            WriteOp::PutProfile {
                name: profile.clone(),
                key: master.wrap_key(&profile_key)?.into_bytes(),
            },
        ];
        backend.commit(batch)?;
        info!(
            backend = backend.backend_name(),
            key_method = %key_method,
            "provisioned store"
        );

        let mut profiles = HashMap::new();
        profiles.insert(profile.clone(), derived);
        Ok(Self::from_parts(backend, master, key_method, profiles, profile))
    }

    /// Opens a provisioned store.
    ///
    /// `key_method` may be omitted; when given it must match the stored kind
    /// (raw or derived). The stored KDF parameters and salt are always used.
    pub fn open(
        uri: &str,
        key_method: Option<StoreKeyMethod>,
        pass_key: PassKey,
        profile: Option<&str>,
    ) -> VaultResult<Self> {
        Self::open_with_config(uri, key_method, pass_key, profile, &DuckDbConfig::default())
    }

    pub fn open_with_config(
        uri: &str,
        key_method: Option<StoreKeyMethod>,
        pass_key: PassKey,
        profile: Option<&str>,
        config: &DuckDbConfig,
    ) -> VaultResult<Self> {
        let backend = open_backend(uri, config, false)?;
        Self::unlock(backend, key_method, &pass_key, profile)
    }

    fn unlock(
        backend: Arc<dyn Backend>,
        key_method: Option<StoreKeyMethod>,
        pass_key: &PassKey,
        profile: Option<&str>,
    ) -> VaultResult<Self> {
        let snapshot = backend.snapshot()?;
        let raw = snapshot
            .config(STORE_CONFIG)?
            .ok_or_else(|| VaultError::NotFound("store is not provisioned".into()))?;
        let (key_method, master) = match StoreConfig::parse(&raw)?.unlock(key_method, pass_key) {
            Ok(unlocked) => unlocked,
            Err(err) => {
                warn!("store unlock failed: {}", err.kind());
                return Err(err);
            }
        };

        let profile = match profile {
            Some(profile) => profile.to_string(),
            None => snapshot
                .config(DEFAULT_PROFILE_CONFIG)?
                .ok_or_else(|| VaultError::Backend("store has no default profile".into()))?,
        };
        let wrapped = snapshot
            .profile(&profile)?
            .ok_or_else(|| VaultError::NotFound(format!("profile {profile}")))?;
        let derived = ProfileKey::unwrap(&master, &wrapped)?;
        drop(snapshot);

        info!(backend = backend.backend_name(), "opened store");
        let mut profiles = HashMap::new();
        profiles.insert(profile.clone(), derived);
        Ok(Self::from_parts(backend, master, key_method, profiles, profile))
    }

    fn from_parts(
        backend: Arc<dyn Backend>,
        master: Key,
        key_method: StoreKeyMethod,
        profiles: HashMap<String, ProfileKey>,
        profile: String,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                keys: RwLock::new(Some(StoreKeys {
                    master,
                    key_method,
                    profiles,
                })),
            }),
            profile,
        }
    }

    /// Deletes a file-backed store. Returns `false` when nothing was there.
    pub fn remove(uri: &str) -> VaultResult<bool> {
        Ok(remove_backend(uri)?)
    }

    /// [`Store::provision`] with the key derivation and backend setup run on
    /// the blocking thread pool.
    pub async fn provision_async(
        uri: &str,
        key_method: StoreKeyMethod,
        pass_key: PassKey,
        profile: Option<&str>,
        recreate: bool,
    ) -> VaultResult<Self> {
        let uri = uri.to_string();
        let profile = profile.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            Self::provision(&uri, key_method, pass_key, profile.as_deref(), recreate)
        })
        .await
        .map_err(|e| VaultError::Backend(format!("provision task failed: {e}")))?
    }

    /// [`Store::open`] run on the blocking thread pool.
    pub async fn open_async(
        uri: &str,
        key_method: Option<StoreKeyMethod>,
        pass_key: PassKey,
        profile: Option<&str>,
    ) -> VaultResult<Self> {
        let uri = uri.to_string();
        let profile = profile.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            Self::open(&uri, key_method, pass_key, profile.as_deref())
        })
        .await
        .map_err(|e| VaultError::Backend(format!("open task failed: {e}")))?
    }

    /// See [`generate_raw_key`].
    pub fn generate_raw_key(seed: Option<&[u8]>) -> VaultResult<String> {
        generate_raw_key(seed)
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.backend_name()
    }

    /// Profile used by sessions opened without an explicit one.
    pub fn profile_name(&self) -> &str {
        &self.profile
    }

    pub fn key_method(&self) -> VaultResult<StoreKeyMethod> {
        let guard = self.inner.read_keys()?;
        Ok(guard.as_ref().ok_or_else(VaultError::closed)?.key_method)
    }

    fn resolve_profile(&self, profile: Option<&str>) -> String {
        profile.unwrap_or(&self.profile).to_string()
    }

    /// Opens a read-only session on a consistent snapshot.
    pub fn session(&self, profile: Option<&str>) -> VaultResult<Session> {
        Session::begin(Arc::clone(&self.inner), self.resolve_profile(profile), false)
    }

    /// Opens a read-write transaction.
    pub fn transaction(&self, profile: Option<&str>) -> VaultResult<Session> {
        Session::begin(Arc::clone(&self.inner), self.resolve_profile(profile), true)
    }

    /// Queries entries without holding a session open.
    pub fn scan(
        &self,
        profile: Option<&str>,
        category: Option<&str>,
        tag_filter: Option<&TagQuery>,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> VaultResult<EntryList> {
        let mut session = self.session(profile)?;
        session.fetch_all(category, tag_filter, limit, offset, false)
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Creates a profile with a fresh key. A random name is used when none is given.
    pub fn create_profile(&self, name: Option<&str>) -> VaultResult<String> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if name.is_empty() {
            return Err(VaultError::Input("profile name must not be empty".into()));
        }
        let guard = self.inner.read_keys()?;
        let keys = guard.as_ref().ok_or_else(VaultError::closed)?;
        let snapshot = self.inner.backend.snapshot()?;
        if snapshot.profile(&name)?.is_some() {
            return Err(VaultError::Duplicate(format!("profile {name}")));
        }
        let (profile_key, _) = ProfileKey::generate()?;
        let mut batch = WriteBatch::new(snapshot.version());
        drop(snapshot);
        batch
            .read_set
            .insert(ConflictKey::Config(STORE_CONFIG.into()));
        batch.ops.push(WriteOp::PutProfile {
            name: name.clone(),
            key: keys.master.wrap_key(&profile_key)?.into_bytes(),
        });
        self.inner.backend.commit(batch)?;
        info!("created profile {name}");
        Ok(name)
    }

    /// Removes a profile and every entry in it. The default profile cannot be removed.
    pub fn remove_profile(&self, name: &str) -> VaultResult<bool> {
        let snapshot = self.inner.snapshot()?;
        if snapshot.config(DEFAULT_PROFILE_CONFIG)?.as_deref() == Some(name) {
            return Err(VaultError::Input(format!(
                "cannot remove the default profile {name}"
            )));
        }
        if snapshot.profile(name)?.is_none() {
            return Ok(false);
        }
        let mut batch = WriteBatch::new(snapshot.version());
        drop(snapshot);
        batch
            .read_set
            .insert(ConflictKey::Config(DEFAULT_PROFILE_CONFIG.into()));
        batch.ops.push(WriteOp::RemoveProfile {
            name: name.to_string(),
        });
        self.inner.backend.commit(batch)?;
        if let Some(keys) = self.inner.write_keys()?.as_mut() {
            keys.profiles.remove(name);
        }
        info!("removed profile {name}");
        Ok(true)
    }

    pub fn list_profiles(&self) -> VaultResult<Vec<String>> {
        Ok(self.inner.snapshot()?.list_profiles()?)
    }

    pub fn get_default_profile(&self) -> VaultResult<String> {
        self.inner
            .snapshot()?
            .config(DEFAULT_PROFILE_CONFIG)?
            .ok_or_else(|| VaultError::Backend("store has no default profile".into()))
    }

    pub fn set_default_profile(&self, name: &str) -> VaultResult<()> {
        let snapshot = self.inner.snapshot()?;
        if snapshot.profile(name)?.is_none() {
            return Err(VaultError::NotFound(format!("profile {name}")));
        }
        let mut batch = WriteBatch::new(snapshot.version());
        drop(snapshot);
        batch.read_set.insert(ConflictKey::Profile(name.to_string()));
        batch.ops.push(WriteOp::SetConfig {
            name: DEFAULT_PROFILE_CONFIG.into(),
            value: name.to_string(),
        });
        self.inner.backend.commit(batch)?;
        info!("default profile is now {name}");
        Ok(())
    }

    // ========================================================================
    // Rekey & close
    // ========================================================================

    /// Changes the store key. Every profile key is re-wrapped and the
    /// verification record replaced in one commit; entries are not touched.
    pub fn rekey(&self, key_method: StoreKeyMethod, pass_key: PassKey) -> VaultResult<()> {
        let (store_config, new_master) = StoreConfig::create(key_method, &pass_key)?;
        drop(pass_key);

        let mut guard = self.inner.write_keys()?;
        let keys = guard.as_mut().ok_or_else(VaultError::closed)?;
        let snapshot = self.inner.backend.snapshot()?;
        let mut batch = WriteBatch::new(snapshot.version());
        for name in snapshot.list_profiles()? {
            let wrapped = snapshot
                .profile(&name)?
                .ok_or_else(|| VaultError::Backend(format!("profile {name} vanished")))?;
            let profile_key = unwrap_profile_key(&keys.master, &wrapped)?;
            batch.ops.push(WriteOp::PutProfile {
                key: new_master.wrap_key(&profile_key)?.into_bytes(),
                name,
            });
        }
        drop(snapshot);
        batch.ops.push(WriteOp::SetConfig {
            name: STORE_CONFIG.into(),
            value: store_config.to_json()?,
        });
        let profiles = batch.ops.len() - 1;
        self.inner.backend.commit(batch)?;

        keys.master = new_master;
        keys.key_method = key_method;
        info!(key_method = %key_method, profiles, "rekeyed store");
        Ok(())
    }

    /// Zeroizes all key material and releases the backend. Operations on this
    /// store or its sessions fail afterwards. Closing twice is a no-op.
    pub fn close(&self) -> VaultResult<()> {
        let mut guard = self.inner.write_keys()?;
        if guard.take().is_none() {
            return Ok(());
        }
        drop(guard);
        self.inner.backend.close()?;
        info!("closed store");
        Ok(())
    }
}
