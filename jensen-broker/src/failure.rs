//! Failures raised by invoked operations, and the opt-in capability that lets a failure describe
//! itself beyond its message.
//!
//! When an operation fails, the broker reports the failure back to the caller as the `data` of a
//! JSON-RPC error, in the form of a [`crate::Cause`].  Everything a [`std::error::Error`] can tell
//! us (its message and its `source()` chain) ends up in there automatically.  Failures that have
//! more to say implement [`DescribableFailure`] and fill in [`Properties`].
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::JsonValue;

/// A failure that can describe itself to the caller of a JSON-RPC method.
///
/// Every method has a default, so the minimal implementation is empty:
///
/// ```
/// # use jensen_broker::DescribableFailure;
/// #[derive(Debug, thiserror::Error)]
/// #[error("the ledger is closed")]
/// struct LedgerClosed;
///
/// impl DescribableFailure for LedgerClosed {}
/// ```
///
/// A failure with no properties serializes with an empty property map; that is not an error.
pub trait DescribableFailure: std::error::Error + Send + Sync + 'static {
    /// The type name reported to the caller.
    ///
    /// Defaults to the fully qualified Rust type name of the implementor.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Add whatever key/value detail this failure wants the caller to see.
    fn describe(&self, properties: &mut Properties) {
        let _ = properties;
    }

    /// The failure that caused this one, if it is describable as well.
    ///
    /// When this returns `None` the cause chain continues with [`std::error::Error::source`],
    /// which can only contribute a message.
    fn describable_cause(&self) -> Option<&dyn DescribableFailure> {
        None
    }
}

/// Key/value detail attached to a serialized failure.
///
/// Keys are unique; inserting an existing key replaces its value.  Values are anything
/// [`Serialize`]; a value that fails to serialize is recorded as a diagnostic string in its
/// place instead of failing the whole description.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, JsonValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| JsonValue::String(diagnostic(&e)));
        self.0.insert(key.into(), value);
        self
    }

    /// Insert a property named after an accessor, e.g. `getRetryAfter` becomes `retryAfter` and
    /// `isTransient` becomes `transient`.
    ///
    /// See [`property_name`] for the exact rule.
    pub fn accessor(&mut self, accessor: &str, value: impl Serialize) -> &mut Self {
        self.insert(property_name(accessor), value)
    }

    /// Merge `other` into this map.  Keys from `other` win.
    pub fn merge(&mut self, other: Properties) -> &mut Self {
        self.0.extend(other.0);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, JsonValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value)).collect())
    }
}

/// Derive a property name from an accessor-style name.
///
/// A `get` or `is` prefix followed by an uppercase letter is stripped and the next letter is
/// lower-cased.  Anything else (including names like `issuer` or `getaway`) is kept as-is.
pub fn property_name(accessor: &str) -> String {
    let stripped = ["get", "is"]
        .iter()
        .filter_map(|prefix| accessor.strip_prefix(prefix))
        .find(|rest| rest.chars().next().is_some_and(char::is_uppercase));

    match stripped {
        Some(rest) => {
            let mut chars = rest.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => accessor.to_string(),
            }
        }
        None => accessor.to_string(),
    }
}

/// Diagnostic placeholder for a value that could not be produced, in `{type}: message` form.
pub(crate) fn diagnostic<E: std::error::Error>(error: &E) -> String {
    format!("{{{}}}: {}", std::any::type_name::<E>(), error)
}

/// A failure raised by an invoked operation.
///
/// Operations return their own error types; anything implementing [`DescribableFailure`], as
/// well as [`anyhow::Error`], converts into this with `?` or `.into()`.  A backtrace is captured
/// at the point of conversion, which for `?` is the operation itself.  Like
/// [`anyhow::Error`], this type deliberately does not implement [`std::error::Error`].
pub struct OperationFailure {
    repr: Repr,
    backtrace: Backtrace,
}

enum Repr {
    Describable(Box<dyn DescribableFailure>),
    Anyhow(anyhow::Error),
}

impl OperationFailure {
    /// The failure as the operation raised it, if it was a [`DescribableFailure`].
    pub fn as_describable(&self) -> Option<&dyn DescribableFailure> {
        match &self.repr {
            Repr::Describable(failure) => Some(failure.as_ref()),
            Repr::Anyhow(_) => None,
        }
    }

    /// The failure as the operation raised it, if it was an [`anyhow::Error`].
    pub fn as_anyhow(&self) -> Option<&anyhow::Error> {
        match &self.repr {
            Repr::Anyhow(error) => Some(error),
            Repr::Describable(_) => None,
        }
    }

    pub(crate) fn inner(&self) -> Result<&dyn DescribableFailure, &anyhow::Error> {
        match &self.repr {
            Repr::Describable(failure) => Ok(failure.as_ref()),
            Repr::Anyhow(error) => Err(error),
        }
    }

    /// Attempt to downcast the original failure to a concrete type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        match &self.repr {
            Repr::Describable(failure) => (failure.as_ref() as &(dyn std::error::Error + 'static)).downcast_ref(),
            Repr::Anyhow(error) => error.downcast_ref(),
        }
    }

    /// The backtrace captured when the failure entered the broker.
    ///
    /// This is only populated when backtraces are enabled, e.g. with `RUST_BACKTRACE=1`.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl<E: DescribableFailure> From<E> for OperationFailure {
    fn from(failure: E) -> Self {
        Self {
            repr: Repr::Describable(Box::new(failure)),
            backtrace: Backtrace::capture(),
        }
    }
}

impl From<anyhow::Error> for OperationFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            repr: Repr::Anyhow(error),
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Describable(failure) => fmt::Display::fmt(failure, f),
            Repr::Anyhow(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl fmt::Debug for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Describable(failure) => fmt::Debug::fmt(failure, f),
            Repr::Anyhow(error) => fmt::Debug::fmt(error, f),
        }
    }
}

/// The operation panicked instead of returning.
///
/// The broker catches panics in invoked operations and reports them like any other failure
/// raised by the operation.
#[derive(Debug, thiserror::Error)]
#[error("Operation panicked: {message}")]
pub struct Panicked {
    pub message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "<non-string panic payload>".to_string(),
            },
        };

        Self { message }
    }
}

impl DescribableFailure for Panicked {}
