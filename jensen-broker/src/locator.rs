//! Instance members need an instance of their target to be invoked on.  Where that instance comes
//! from is up to the [`InstanceLocator`] the broker was built with.
use std::sync::{Arc, RwLock};

use crate::failure::{DescribableFailure, Properties};
use crate::registry::{Instance, TargetInfo};
use crate::typemap::TypeMap;

/// Failure to provide an instance of a target.
#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
pub enum LocatorError {
    #[error("Target {target} cannot be instantiated with a parameterless constructor")]
    NotConstructible { target: String },

    #[error("Instance of target {target} could not be located")]
    Other {
        target: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LocatorError {
    pub fn not_constructible(target: &TargetInfo) -> Self {
        LocatorError::NotConstructible {
            target: target.name().to_string(),
        }
    }

    pub fn other(target: &TargetInfo, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LocatorError::Other {
            target: target.name().to_string(),
            source: source.into(),
        }
    }
}

impl DescribableFailure for LocatorError {
    fn type_name(&self) -> &'static str {
        self.into()
    }

    fn describe(&self, properties: &mut Properties) {
        match self {
            LocatorError::NotConstructible { target } | LocatorError::Other { target, .. } => {
                properties.insert("target", target);
            }
        }
    }
}

/// Provides the instance an instance member is invoked on.
///
/// Implemented for closures taking a [`TargetInfo`] as well, for one-off locators:
///
/// ```
/// # use jensen_broker::{InstanceLocator, LocatorError, TargetInfo, Instance};
/// let locator = |target: &TargetInfo| -> Result<Instance, LocatorError> {
///     target.construct().ok_or_else(|| LocatorError::not_constructible(target))
/// };
/// # fn assert_locator(_: impl InstanceLocator) {}
/// # assert_locator(locator);
/// ```
pub trait InstanceLocator: Send + Sync + 'static {
    /// Locate an instance of `target`.  The instance's concrete type must be the one identified by
    /// [`TargetInfo::target_type_id`], otherwise invoking the member fails as inaccessible.
    fn instance(&self, target: &TargetInfo) -> Result<Instance, LocatorError>;
}

impl<F> InstanceLocator for F
where
    F: Fn(&TargetInfo) -> Result<Instance, LocatorError> + Send + Sync + 'static,
{
    fn instance(&self, target: &TargetInfo) -> Result<Instance, LocatorError> {
        self(target)
    }
}

/// Constructs a fresh instance for every invocation, with the constructor the target was
/// registered with.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultInstanceLocator;

impl InstanceLocator for DefaultInstanceLocator {
    fn instance(&self, target: &TargetInfo) -> Result<Instance, LocatorError> {
        target.construct().ok_or_else(|| LocatorError::not_constructible(target))
    }
}

/// Constructs one instance per target on first use, and hands out that same instance from then
/// on.
#[derive(Debug, Default)]
pub struct CachingInstanceLocator {
    instances: RwLock<TypeMap>,
}

impl CachingInstanceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of targets an instance has been constructed for so far.
    pub fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstanceLocator for CachingInstanceLocator {
    fn instance(&self, target: &TargetInfo) -> Result<Instance, LocatorError> {
        // A panicking constructor can't leave the map half-updated, so a poisoned lock is still
        // safe to use
        if let Some(instance) = self
            .instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .instance(target.target_type_id())
        {
            return Ok(instance);
        }

        let instance = target.construct().ok_or_else(|| LocatorError::not_constructible(target))?;
        tracing::debug!(target_name = %target.name(), "Caching new target instance");

        // Another thread may have raced us here; whichever instance got in first wins
        Ok(self
            .instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert_with(target.target_type_id(), || instance))
    }
}

/// Hands out pre-registered instances, keyed by their type.
///
/// Targets without a registered instance are delegated to a fallback locator if there is one,
/// and are not locatable otherwise.
#[derive(Default)]
pub struct SingletonInstanceLocator {
    instances: TypeMap,
    fallback: Option<Arc<dyn InstanceLocator>>,
}

impl SingletonInstanceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the instance that is handed out for targets backed by `T`.
    pub fn with_instance<T: Send + Sync + 'static>(mut self, instance: T) -> Self {
        self.instances.insert(instance);
        self
    }

    /// Register an instance that the host keeps a handle to as well.
    pub fn with_shared_instance<T: Send + Sync + 'static>(mut self, instance: Arc<T>) -> Self {
        self.instances.insert_shared(instance);
        self
    }

    /// Locate instances of targets without a registered instance with `fallback`.
    pub fn with_fallback(mut self, fallback: impl InstanceLocator) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

impl InstanceLocator for SingletonInstanceLocator {
    fn instance(&self, target: &TargetInfo) -> Result<Instance, LocatorError> {
        match (self.instances.instance(target.target_type_id()), &self.fallback) {
            (Some(instance), _) => Ok(instance),
            (None, Some(fallback)) => fallback.instance(target),
            (None, None) => Err(LocatorError::not_constructible(target)),
        }
    }
}

impl std::fmt::Debug for SingletonInstanceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonInstanceLocator")
            .field("instances", &self.instances)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
