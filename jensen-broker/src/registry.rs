//! Requests name the member they want to invoke as `Target.member`.  The [`Registry`] is the table
//! those names are looked up in: it maps target names to [`Target`]s, and each target holds its
//! members in the order they were registered.  Members sharing a name are overloads; resolution
//! tries them in registration order.
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::handler::{self, Arguments, CallError, ErasedMember, Function, Method};
use crate::types::JsonValue;

/// An instance of a target, as handed out by an [`crate::InstanceLocator`].
pub type Instance = Arc<dyn Any + Send + Sync>;

type Constructor = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Why a candidate member cannot take the given parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incompatibility {
    /// Type of the parameter the argument could not be deserialized into, or
    /// [`Incompatibility::NO_PARAMETER`] for a surplus argument.
    pub parameter_type: String,
    /// Zero-based position of the offending argument.
    pub index: usize,
}

impl Incompatibility {
    /// Reported as the parameter type when there are more arguments than parameters.
    pub const NO_PARAMETER: &'static str = "none";

    pub fn new(parameter_type: impl Into<String>, index: usize) -> Self {
        Self {
            parameter_type: parameter_type.into(),
            index,
        }
    }
}

/// Incompatible candidates keyed by their signature.
pub type IncompatibilityReport = BTreeMap<String, Incompatibility>;

/// Static information about a registered target.
pub struct TargetInfo {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    constructor: Option<Constructor>,
}

impl TargetInfo {
    fn new<T: Send + Sync + 'static>(name: String, constructor: Option<Constructor>) -> Self {
        Self {
            name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            constructor,
        }
    }

    /// The name requests use to designate this target.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Rust type backing this target.
    pub fn target_type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether [`TargetInfo::construct`] can produce an instance.
    pub fn is_constructible(&self) -> bool {
        self.constructor.is_some()
    }

    /// Construct a fresh instance with the target's parameterless constructor, if it has one.
    pub fn construct(&self) -> Option<Instance> {
        self.constructor.as_ref().map(|constructor| constructor())
    }
}

impl fmt::Debug for TargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetInfo")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("constructible", &self.is_constructible())
            .finish()
    }
}

/// A member of a target that can be invoked by name.
pub struct Member {
    name: String,
    target: Arc<TargetInfo>,
    parameter_types: Vec<&'static str>,
    is_static: bool,
    invoker: Box<dyn ErasedMember>,
}

impl Member {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target that owns this member.
    pub fn target(&self) -> &Arc<TargetInfo> {
        &self.target
    }

    /// Rust type names of the member's parameters, not counting the instance.
    pub fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    /// Static members are invoked without an instance of their target.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// The declared signature, e.g. `add(i64, i64)`.
    pub fn signature(&self) -> String {
        format!(
            "{}({})",
            self.name,
            self.parameter_types.iter().map(|ty| simple_type_name(ty)).join(", ")
        )
    }

    /// Deserialize `params` into this member's typed arguments.
    pub(crate) fn prepare(&self, params: &[JsonValue]) -> Result<Arguments, Incompatibility> {
        self.invoker.prepare(params)
    }

    pub(crate) fn invoke(&self, instance: Option<&Instance>, arguments: Arguments) -> Result<JsonValue, CallError> {
        self.invoker.invoke(instance, arguments)
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("target", &self.target.name)
            .field("signature", &self.signature())
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// A registered target and its members, in registration order.
#[derive(Debug)]
pub struct Target {
    info: Arc<TargetInfo>,
    members: Vec<Arc<Member>>,
}

impl Target {
    pub fn info(&self) -> &Arc<TargetInfo> {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn members(&self) -> &[Arc<Member>] {
        &self.members
    }

    /// Members called `name`, in registration order.
    pub fn members_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<Member>> + 'a {
        self.members.iter().filter(move |member| member.name == name)
    }
}

/// Builds a [`Target`] backed by the Rust type `T`.
///
/// ```
/// # use jensen_broker::{Registry, TargetBuilder};
/// #[derive(Default)]
/// struct Calc;
///
/// impl Calc {
///     fn add(&self, a: i64, b: i64) -> i64 {
///         a + b
///     }
/// }
///
/// let registry = Registry::new().with_target(
///     TargetBuilder::<Calc>::new("Calc")
///         .method("add", Calc::add)
///         .method("add", |_: &Calc, a: f64, b: f64| a + b)
///         .function("version", || "1.0"),
/// );
/// assert_eq!(registry.target("Calc").unwrap().members().len(), 3);
/// ```
pub struct TargetBuilder<T> {
    info: Arc<TargetInfo>,
    members: Vec<Member>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Default + Send + Sync + 'static> TargetBuilder<T> {
    /// A target whose instances are constructed with [`Default`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_constructor(name, T::default)
    }
}

impl<T: Send + Sync + 'static> TargetBuilder<T> {
    /// A target whose instances are constructed with `constructor`.
    pub fn with_constructor<C>(name: impl Into<String>, constructor: C) -> Self
    where
        C: Fn() -> T + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move || Arc::new(constructor()) as Instance);
        Self::from_info(TargetInfo::new::<T>(name.into(), Some(constructor)))
    }

    /// A target that cannot be constructed by the broker.  Instance members of such a target
    /// can only be invoked if the instance locator knows where to find an instance.
    pub fn without_constructor(name: impl Into<String>) -> Self {
        Self::from_info(TargetInfo::new::<T>(name.into(), None))
    }

    fn from_info(info: TargetInfo) -> Self {
        Self {
            info: Arc::new(info),
            members: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// Register an instance member.
    pub fn method<Args, M>(mut self, name: impl Into<String>, method: M) -> Self
    where
        Args: Send + 'static,
        M: Method<T, Args>,
    {
        self.members.push(Member {
            name: name.into(),
            target: self.info.clone(),
            parameter_types: M::parameter_types(),
            is_static: false,
            invoker: handler::erase_method(method),
        });
        self
    }

    /// Register a static member, which is invoked without an instance.
    pub fn function<Args, F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        Args: Send + 'static,
        F: Function<Args>,
    {
        self.members.push(Member {
            name: name.into(),
            target: self.info.clone(),
            parameter_types: F::parameter_types(),
            is_static: true,
            invoker: handler::erase_function(function),
        });
        self
    }

    pub fn build(self) -> Target {
        Target {
            info: self.info,
            members: self.members.into_iter().map(Arc::new).collect(),
        }
    }
}

/// Table of targets that requests can invoke members of.
///
/// Built once, before the broker, and read-only afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    targets: HashMap<String, Arc<Target>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target.  A target registered under a name that is already taken replaces the
    /// previous one.
    pub fn register<T: Send + Sync + 'static>(&mut self, target: TargetBuilder<T>) -> &mut Self {
        let target = target.build();
        let name = target.name().to_string();

        tracing::debug!(target_name = %name, members = target.members.len(), "Registering target");
        if self.targets.insert(name.clone(), Arc::new(target)).is_some() {
            tracing::warn!(target_name = %name, "Replaced a previously registered target of the same name");
        }
        self
    }

    /// Builder-style variant of [`Registry::register`].
    pub fn with_target<T: Send + Sync + 'static>(mut self, target: TargetBuilder<T>) -> Self {
        self.register(target);
        self
    }

    pub fn target(&self, name: &str) -> Option<&Arc<Target>> {
        self.targets.get(name)
    }

    /// Names of all registered targets, sorted.
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Strip the module paths from a Rust type name, e.g. `alloc::vec::Vec<alloc::string::String>`
/// becomes `Vec<String>`.
pub(crate) fn simple_type_name(full: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut simple = String::with_capacity(full.len());
    let mut path = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            simple.push_str(last_segment(&path));
            path.clear();
            simple.push(c);
        }
    }
    simple.push_str(last_segment(&path));
    simple
}
