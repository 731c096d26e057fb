//! The code that runs when a JSON-RPC method is invoked is called a "member" of a registered
//! target.  Members are ordinary Rust functions and closures; this module is what lets the broker
//! deserialize positional JSON arguments into their typed parameters and call them.
//!
//! Instance members implement [`Method`], static members implement [`Function`].  Neither trait is
//! meant to be implemented by hand: both are implemented for every `Fn` whose parameters implement
//! [`DeserializeOwned`] and whose return type implements [`IntoOutcome`], in the same way axum
//! implements its `Handler` trait for async functions.
use std::any::Any;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::failure::OperationFailure;
use crate::registry::{Incompatibility, Instance, simple_type_name};
use crate::types::JsonValue;

/// Why the call to a resolved member did not produce a value.
#[derive(Debug)]
pub enum CallError {
    /// The arguments handed to the member are not the ones it takes.
    ArgumentMismatch { received: usize },
    /// The instance handed to the member is not of the type that owns it, or it was missing.
    Inaccessible,
    /// The member itself failed.
    Raised(OperationFailure),
    /// The member succeeded but its result could not be serialized to JSON.
    Serialize(serde_json::Error),
}

/// Type implemented by anything a member can return.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<JsonValue, CallError>;
}

/// Members that return a result succeed or fail accordingly, provided the success type
/// implements [`Serialize`] and the error type converts into an [`OperationFailure`].
impl<T, E> IntoOutcome for Result<T, E>
where
    T: Serialize,
    E: Into<OperationFailure>,
{
    fn into_outcome(self) -> Result<JsonValue, CallError> {
        match self {
            Ok(value) => serde_json::to_value(value).map_err(CallError::Serialize),
            Err(e) => Err(CallError::Raised(e.into())),
        }
    }
}

/// Return `T` in JSON.
///
/// Use this for infallible members returning types that don't have their own [`IntoOutcome`]
/// impl, like your own structs.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoOutcome for Json<T> {
    fn into_outcome(self) -> Result<JsonValue, CallError> {
        serde_json::to_value(self.0).map_err(CallError::Serialize)
    }
}

impl IntoOutcome for JsonValue {
    fn into_outcome(self) -> Result<JsonValue, CallError> {
        Ok(self)
    }
}

impl<T: Serialize> IntoOutcome for Vec<T> {
    fn into_outcome(self) -> Result<JsonValue, CallError> {
        serde_json::to_value(self).map_err(CallError::Serialize)
    }
}

impl<T: Serialize> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Result<JsonValue, CallError> {
        serde_json::to_value(self).map_err(CallError::Serialize)
    }
}

macro_rules! impl_into_outcome_for_plain {
    ($($ty:ty),*) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Result<JsonValue, CallError> {
                    serde_json::to_value(self).map_err(CallError::Serialize)
                }
            }
        )*
    };
}

impl_into_outcome_for_plain!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    char,
    String,
    &'static str
);

/// Positional arguments that were deserialized for a member, with their type erased so that
/// members of every signature can be handled alike.
pub struct Arguments {
    values: Box<dyn Any + Send>,
    len: usize,
}

impl Arguments {
    /// Wrap a tuple of `len` typed argument values.
    ///
    /// The broker builds these itself while resolving a request; creating them by hand is only
    /// needed when building a [`crate::MethodCall`] from parts.
    pub fn new<T: Any + Send>(values: T, len: usize) -> Self {
        Self {
            values: Box::new(values),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn downcast<T: Any>(self) -> Result<T, Self> {
        let len = self.len;
        self.values
            .downcast::<T>()
            .map(|values| *values)
            .map_err(|values| Self { values, len })
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arguments").field("len", &self.len).finish_non_exhaustive()
    }
}

/// A member that is invoked on an instance of its target `T`.
///
/// ## Type Parameters
///
/// - `Args`: The tuple of parameter types, minus the instance.  This is only here so that the
///   blanket impls for functions of every arity don't conflict; the compiler deduces it from the
///   function, so try to ignore it mentally.
pub trait Method<T, Args>: Send + Sync + Sized + 'static {
    /// Rust type names of the parameters, in order.
    fn parameter_types() -> Vec<&'static str>;

    /// Deserialize positional parameters into the typed arguments of this member.
    fn extract(params: &[JsonValue]) -> Result<Args, Incompatibility>;

    fn call(&self, instance: &T, args: Args) -> Result<JsonValue, CallError>;
}

/// A static member, which needs no instance of its target.
pub trait Function<Args>: Send + Sync + Sized + 'static {
    /// Rust type names of the parameters, in order.
    fn parameter_types() -> Vec<&'static str>;

    /// Deserialize positional parameters into the typed arguments of this member.
    fn extract(params: &[JsonValue]) -> Result<Args, Incompatibility>;

    fn call(&self, args: Args) -> Result<JsonValue, CallError>;
}

/// Reject a parameter list of the wrong length, naming the first parameter that has no argument
/// or the first argument that has no parameter.
pub(crate) fn check_arity(params: &[JsonValue], parameter_types: &[&'static str]) -> Result<(), Incompatibility> {
    if params.len() < parameter_types.len() {
        Err(Incompatibility::new(
            simple_type_name(parameter_types[params.len()]),
            params.len(),
        ))
    } else if params.len() > parameter_types.len() {
        Err(Incompatibility::new(Incompatibility::NO_PARAMETER, parameter_types.len()))
    } else {
        Ok(())
    }
}

/// Deserialize the positional parameter at `index` into `A`.
pub(crate) fn deserialize_parameter<A: DeserializeOwned>(
    params: &[JsonValue],
    index: usize,
) -> Result<A, Incompatibility> {
    let incompatible = || Incompatibility::new(simple_type_name(std::any::type_name::<A>()), index);

    let value = params.get(index).ok_or_else(incompatible)?;
    <A as serde::Deserialize>::deserialize(value).map_err(|e| {
        tracing::trace!(index, error = %e, "Parameter is not compatible");
        incompatible()
    })
}

/// Invoke a macro for all supported parameter counts, up to 8.
#[rustfmt::skip]
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!();
        $name!(T1);
        $name!(T1, T2);
        $name!(T1, T2, T3);
        $name!(T1, T2, T3, T4);
        $name!(T1, T2, T3, T4, T5);
        $name!(T1, T2, T3, T4, T5, T6);
        $name!(T1, T2, T3, T4, T5, T6, T7);
        $name!(T1, T2, T3, T4, T5, T6, T7, T8);
    };
}

/// Generates the [`Method`] and [`Function`] impls for functions taking the given parameter types.
macro_rules! impl_member {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_variables, unused_mut, unused_assignments)]
        impl<T, F, R, $($ty,)*> Method<T, ($($ty,)*)> for F
        where
            T: Send + Sync + 'static,
            F: Fn(&T, $($ty,)*) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $( $ty: DeserializeOwned + Send + 'static, )*
        {
            fn parameter_types() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$ty>(),)*]
            }

            fn extract(params: &[JsonValue]) -> Result<($($ty,)*), Incompatibility> {
                check_arity(params, &<Self as Method<T, ($($ty,)*)>>::parameter_types())?;

                // Each parameter is deserialized independently, in order, so the first one that
                // fails is the one that gets reported
                let mut index = 0;
                $(
                    let $ty = deserialize_parameter::<$ty>(params, index)?;
                    index += 1;
                )*

                Ok(($($ty,)*))
            }

            fn call(&self, instance: &T, ($($ty,)*): ($($ty,)*)) -> Result<JsonValue, CallError> {
                (self)(instance, $($ty,)*).into_outcome()
            }
        }

        #[allow(non_snake_case, unused_variables, unused_mut, unused_assignments)]
        impl<F, R, $($ty,)*> Function<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $( $ty: DeserializeOwned + Send + 'static, )*
        {
            fn parameter_types() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$ty>(),)*]
            }

            fn extract(params: &[JsonValue]) -> Result<($($ty,)*), Incompatibility> {
                check_arity(params, &<Self as Function<($($ty,)*)>>::parameter_types())?;

                let mut index = 0;
                $(
                    let $ty = deserialize_parameter::<$ty>(params, index)?;
                    index += 1;
                )*

                Ok(($($ty,)*))
            }

            fn call(&self, ($($ty,)*): ($($ty,)*)) -> Result<JsonValue, CallError> {
                (self)($($ty,)*).into_outcome()
            }
        }
    };
}

all_the_tuples!(impl_member);

/// A dyn compatible version of [`Method`] and [`Function`], which erases their type parameters so
/// that members of every signature can live side by side in a registry.
pub(crate) trait ErasedMember: Send + Sync + 'static {
    fn prepare(&self, params: &[JsonValue]) -> Result<Arguments, Incompatibility>;

    fn invoke(&self, instance: Option<&Instance>, arguments: Arguments) -> Result<JsonValue, CallError>;
}

struct MethodMember<T, Args, M> {
    method: M,
    _phantom: PhantomData<fn() -> (T, Args)>,
}

impl<T, Args, M> ErasedMember for MethodMember<T, Args, M>
where
    T: Send + Sync + 'static,
    Args: Send + 'static,
    M: Method<T, Args>,
{
    fn prepare(&self, params: &[JsonValue]) -> Result<Arguments, Incompatibility> {
        M::extract(params).map(|args| Arguments::new(args, params.len()))
    }

    fn invoke(&self, instance: Option<&Instance>, arguments: Arguments) -> Result<JsonValue, CallError> {
        let instance = instance
            .and_then(|instance| (**instance).downcast_ref::<T>())
            .ok_or(CallError::Inaccessible)?;
        let args = arguments
            .downcast::<Args>()
            .map_err(|arguments| CallError::ArgumentMismatch {
                received: arguments.len(),
            })?;

        self.method.call(instance, args)
    }
}

struct FunctionMember<Args, F> {
    function: F,
    _phantom: PhantomData<fn() -> Args>,
}

impl<Args, F> ErasedMember for FunctionMember<Args, F>
where
    Args: Send + 'static,
    F: Function<Args>,
{
    fn prepare(&self, params: &[JsonValue]) -> Result<Arguments, Incompatibility> {
        F::extract(params).map(|args| Arguments::new(args, params.len()))
    }

    fn invoke(&self, _instance: Option<&Instance>, arguments: Arguments) -> Result<JsonValue, CallError> {
        let args = arguments
            .downcast::<Args>()
            .map_err(|arguments| CallError::ArgumentMismatch {
                received: arguments.len(),
            })?;

        self.function.call(args)
    }
}

pub(crate) fn erase_method<T, Args, M>(method: M) -> Box<dyn ErasedMember>
where
    T: Send + Sync + 'static,
    Args: Send + 'static,
    M: Method<T, Args>,
{
    Box::new(MethodMember::<T, Args, M> {
        method,
        _phantom: PhantomData,
    })
}

pub(crate) fn erase_function<Args, F>(function: F) -> Box<dyn ErasedMember>
where
    Args: Send + 'static,
    F: Function<Args>,
{
    Box::new(FunctionMember::<Args, F> {
        function,
        _phantom: PhantomData,
    })
}
