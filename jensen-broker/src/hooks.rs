//! Policy hooks the host can plug into the broker.
//!
//! Each hook is a single-method trait, also implemented for closures of the matching shape, so
//! simple hooks need not declare a type.  All hooks are optional; without them the broker allows
//! every request and passes results and responses through untouched.
use std::panic::{self, AssertUnwindSafe};

use crate::failure::Panicked;
use crate::registry::Instance;
use crate::resolver::MethodCall;
use crate::types::{JsonValue, Request, Response};

/// Decides whether a request may be processed at all.
///
/// Rejected requests are answered with an invalid-request error naming the method.
pub trait SecurityFilter: Send + Sync + 'static {
    fn is_allowed(&self, request: &Request) -> bool;
}

impl<F> SecurityFilter for F
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    fn is_allowed(&self, request: &Request) -> bool {
        self(request)
    }
}

/// Runs right before a resolved member is invoked, with the instance it will be invoked on
/// (`None` for static members).
///
/// Returning an error aborts the invocation; the caller gets a server error whose cause is the
/// returned error.
pub trait InvocationInterceptor: Send + Sync + 'static {
    fn before_invocation(&self, call: &MethodCall, instance: Option<&Instance>) -> anyhow::Result<()>;
}

impl<F> InvocationInterceptor for F
where
    F: Fn(&MethodCall, Option<&Instance>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn before_invocation(&self, call: &MethodCall, instance: Option<&Instance>) -> anyhow::Result<()> {
        self(call, instance)
    }
}

/// Post-processes the result of a successful invocation.  The returned value replaces the
/// result in the response.
pub trait ReturnValueHandler: Send + Sync + 'static {
    fn on_return_value(&self, value: JsonValue) -> anyhow::Result<JsonValue>;
}

impl<F> ReturnValueHandler for F
where
    F: Fn(JsonValue) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
{
    fn on_return_value(&self, value: JsonValue) -> anyhow::Result<JsonValue> {
        self(value)
    }
}

/// Post-processes every response before it is encoded, including error responses.  The
/// returned response replaces the original one.
pub trait ResponseHandler: Send + Sync + 'static {
    fn on_response(&self, response: Response) -> anyhow::Result<Response>;
}

impl<F> ResponseHandler for F
where
    F: Fn(Response) -> anyhow::Result<Response> + Send + Sync + 'static,
{
    fn on_response(&self, response: Response) -> anyhow::Result<Response> {
        self(response)
    }
}

/// Run a hook, turning a panic into the same kind of failure the hook could have returned.
pub(crate) fn run_hook<T>(hook: &'static str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let panicked = Panicked::from_payload(payload);
        tracing::warn!(hook, message = %panicked.message, "Hook panicked");
        Err(anyhow::Error::new(panicked))
    })
}
