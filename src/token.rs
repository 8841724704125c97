//! Per-identity token storage.
//!
//! Each API identity is a marker type implementing [`ApiIdentity`]. The
//! [`TokenRegistry`] lazily creates one [`TokenHolder`] per identity from a
//! registered factory and hands out the same `Arc` for the registry's lifetime.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::error::{Error, Result};

/// Token value. Its `Display` output is sent verbatim as `Authorization`.
pub type Token = Arc<dyn fmt::Display + Send + Sync>;

/// Factory producing the holder for an identity on first access.
pub type TokenFactory = Arc<dyn Fn() -> TokenHolder + Send + Sync>;

/// Marker for a logical API identity.
///
/// ```
/// use apikit::token::ApiIdentity;
///
/// struct BillingApi;
/// impl ApiIdentity for BillingApi {}
/// ```
pub trait ApiIdentity: 'static + Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name() -> &'static str {
        type_name::<Self>()
    }
}

/// The identity endpoints use unless told otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultApi;

impl ApiIdentity for DefaultApi {}

/// Mutable single-slot holder for the current token of one identity.
#[derive(Default)]
pub struct TokenHolder {
    token: RwLock<Option<Token>>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a holder that already carries a token.
    pub fn with_token<T>(token: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Self {
            token: RwLock::new(Some(Arc::new(token))),
        }
    }

    pub fn set_token<T>(&self, token: T)
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        self.replace(Some(Arc::new(token)));
    }

    /// Resets the holder to no token.
    pub fn clear(&self) {
        self.replace(None);
    }

    /// Current token, if any.
    pub fn token(&self) -> Option<Token> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// String form of the current token, as it would appear in a header.
    pub fn token_value(&self) -> Option<String> {
        self.token().map(|t| t.to_string())
    }

    pub fn is_set(&self) -> bool {
        self.token().is_some()
    }

    fn replace(&self, value: Option<Token>) {
        match self.token.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl fmt::Debug for TokenHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the token itself.
        f.debug_struct("TokenHolder")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// `Authorization` value in the `Bearer <token>` scheme.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    raw: String,
}

impl BearerToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self::new(raw)
    }

    /// The token without the `Bearer ` prefix.
    pub fn raw_token(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bearer {}", self.raw)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Default)]
struct RegistryState {
    factories: HashMap<TypeId, TokenFactory>,
    instances: HashMap<TypeId, Arc<TokenHolder>>,
}

/// Keyed store of token holders, one per [`ApiIdentity`].
///
/// A single mutex serializes lookup-or-create, so concurrent first accesses
/// for the same identity observe the same holder. The lock is released before
/// the holder is returned.
pub struct TokenRegistry {
    state: Mutex<RegistryState>,
}

impl TokenRegistry {
    /// Creates a registry with [`DefaultApi`] already registered.
    pub fn new() -> Self {
        let registry = Self {
            state: Mutex::new(RegistryState::default()),
        };
        registry.register::<DefaultApi, _>(TokenHolder::new);
        registry
    }

    /// Associates a factory with identity `I`.
    ///
    /// Has no effect on a holder that was already created for `I`.
    pub fn register<I, F>(&self, factory: F)
    where
        I: ApiIdentity,
        F: Fn() -> TokenHolder + Send + Sync + 'static,
    {
        debug!("Registering token factory for {}", I::name());
        let mut state = self.lock();
        state.factories.insert(TypeId::of::<I>(), Arc::new(factory));
    }

    /// Whether `I` has a factory or an existing holder.
    pub fn is_registered<I: ApiIdentity>(&self) -> bool {
        let state = self.lock();
        let key = TypeId::of::<I>();
        state.factories.contains_key(&key) || state.instances.contains_key(&key)
    }

    /// Returns the holder for `I`, creating it on first access.
    pub fn get_instance<I: ApiIdentity>(&self) -> Result<Arc<TokenHolder>> {
        let key = TypeId::of::<I>();
        let mut state = self.lock();

        if let Some(holder) = state.instances.get(&key) {
            return Ok(Arc::clone(holder));
        }

        let factory = state.factories.get(&key).cloned().ok_or_else(|| {
            Error::Configuration(format!(
                "No token factory registered for API identity {}",
                I::name()
            ))
        })?;

        debug!("Creating token holder for {}", I::name());
        let holder = Arc::new(factory());
        state.instances.insert(key, Arc::clone(&holder));
        Ok(holder)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenRegistry")
            .field("factories", &state.factories.len())
            .field("instances", &state.instances.len())
            .finish()
    }
}
