//! Call arguments and the capabilities an argument can carry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tether_types::ValueType;
use tokio::sync::{Mutex, MutexGuard};

use crate::builder::RequestDraft;

/// Produces the wire value of a synchronized argument.
///
/// Called while the argument's lock is held, so consecutive calls sharing a
/// [`LockKey`] observe values in dispatch order.
pub trait SynchronizedValueFactory: Send + Sync {
    fn create_value(&self) -> Value;
}

/// Computes a parameter from the otherwise fully built request.
///
/// Digests run after every other binding has been placed, which makes them
/// the hook for request signatures.
pub trait ParamsDigest: Send + Sync {
    fn digest(&self, request: &RequestDraft) -> anyhow::Result<Value>;
}

impl<F> ParamsDigest for F
where
    F: Fn(&RequestDraft) -> anyhow::Result<Value> + Send + Sync,
{
    fn digest(&self, request: &RequestDraft) -> anyhow::Result<Value> {
        self(request)
    }
}

/// Strictly increasing nonces seeded from the wall clock in milliseconds.
#[derive(Debug, Default)]
pub struct IncreasingNonceFactory {
    last: AtomicU64,
}

impl IncreasingNonceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let mut previous = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(previous + 1);
            match self
                .last
                .compare_exchange(previous, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => previous = actual,
            }
        }
    }
}

impl SynchronizedValueFactory for IncreasingNonceFactory {
    fn create_value(&self) -> Value {
        Value::from(self.next())
    }
}

struct LockKeyInner {
    gate: Mutex<()>,
    factory: Option<Arc<dyn SynchronizedValueFactory>>,
}

/// Mutual-exclusion token for the build and dispatch stages.
///
/// Keys compare by identity: clones share one key, while two keys created
/// separately never serialize against each other even if their factories
/// are equal.
#[derive(Clone)]
pub struct LockKey {
    inner: Arc<LockKeyInner>,
}

impl LockKey {
    /// A pure lock with no wire value.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockKeyInner {
                gate: Mutex::new(()),
                factory: None,
            }),
        }
    }

    /// A lock whose argument position is filled by `factory` under the lock.
    pub fn with_factory(factory: impl SynchronizedValueFactory + 'static) -> Self {
        Self::from_shared_factory(Arc::new(factory))
    }

    pub fn from_shared_factory(factory: Arc<dyn SynchronizedValueFactory>) -> Self {
        Self {
            inner: Arc::new(LockKeyInner {
                gate: Mutex::new(()),
                factory: Some(factory),
            }),
        }
    }

    pub fn same_key(&self, other: &LockKey) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity of the key, stable for its lifetime. Used in log fields.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn create_value(&self) -> Option<Value> {
        self.inner.factory.as_ref().map(|factory| factory.create_value())
    }

    pub(crate) async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.gate.lock().await
    }
}

impl Default for LockKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockKey")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("has_factory", &self.inner.factory.is_some())
            .finish()
    }
}

/// One positional argument of a call, explicit or injected.
#[derive(Clone)]
pub enum ArgValue {
    Value(Value),
    /// Omitted; configured defaults apply.
    Absent,
    Synchronized(LockKey),
    Digest(Arc<dyn ParamsDigest>),
}

impl ArgValue {
    pub fn digest(digest: impl ParamsDigest + 'static) -> Self {
        Self::Digest(Arc::new(digest))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn lock_key(&self) -> Option<&LockKey> {
        match self {
            Self::Synchronized(key) => Some(key),
            _ => None,
        }
    }

    /// Runtime type, compared against the provider's declaration when
    /// injected values are assembled.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Value(value) => json_value_type(value),
            Self::Absent => ValueType::Any,
            Self::Synchronized(_) => ValueType::Synchronized,
            Self::Digest(_) => ValueType::Digest,
        }
    }

    /// JSON view of the argument before the request is built.
    pub fn snapshot(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            _ => Value::Null,
        }
    }
}

fn json_value_type(value: &Value) -> ValueType {
    match value {
        Value::Null => ValueType::Any,
        Value::Bool(_) => ValueType::Boolean,
        Value::Number(number) if number.is_i64() || number.is_u64() => ValueType::Integer,
        Value::Number(_) => ValueType::Number,
        Value::String(_) => ValueType::String,
        Value::Array(_) => ValueType::Array,
        Value::Object(_) => ValueType::Object,
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Absent => f.write_str("Absent"),
            Self::Synchronized(key) => f.debug_tuple("Synchronized").field(key).finish(),
            Self::Digest(_) => f.write_str("Digest(..)"),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<LockKey> for ArgValue {
    fn from(key: LockKey) -> Self {
        Self::Synchronized(key)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Absent)
    }
}
