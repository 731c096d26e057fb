//! The invocation pipeline: everything between a resolved [`MethodCall`] and the JSON value it
//! produced.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{BrokerError, Result};
use crate::failure::Panicked;
use crate::handler::CallError;
use crate::hooks::{InvocationInterceptor, run_hook};
use crate::locator::{DefaultInstanceLocator, InstanceLocator};
use crate::resolver::MethodCall;
use crate::types::{JsonValue, Request};

/// Invokes resolved members.
///
/// Instance members get their instance from the configured [`InstanceLocator`]; the optional
/// [`InvocationInterceptor`] gets a look at every call before it happens.  Whatever goes wrong,
/// including a panic in the member, comes back as a [`BrokerError`].
#[derive(Clone)]
pub struct Invoker {
    locator: Arc<dyn InstanceLocator>,
    interceptor: Option<Arc<dyn InvocationInterceptor>>,
    slow_threshold: Option<Duration>,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new(Arc::new(DefaultInstanceLocator))
    }
}

impl Invoker {
    pub fn new(locator: Arc<dyn InstanceLocator>) -> Self {
        Self {
            locator,
            interceptor: None,
            slow_threshold: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Option<Arc<dyn InvocationInterceptor>>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Log a warning for invocations that take longer than `threshold`.
    pub fn with_slow_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn invoke(&self, call: MethodCall, request: &Request) -> Result<JsonValue> {
        let signature = call.invocation_signature();
        let member = call.member().clone();

        let instance = if member.is_static() {
            None
        } else {
            let instance = self
                .locator
                .instance(member.target())
                .map_err(|source| BrokerError::NotInstantiable {
                    target: member.target().name().to_string(),
                    source,
                })?;
            Some(instance)
        };

        if let Some(interceptor) = &self.interceptor {
            run_hook("interceptor", || interceptor.before_invocation(&call, instance.as_ref()))
                .map_err(|failure| BrokerError::Interceptor {
                    signature: signature.clone(),
                    failure,
                })?;
        }

        let (member, _params, arguments) = call.into_parts();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| member.invoke(instance.as_ref(), arguments)));
        let elapsed = started.elapsed();

        if let Some(threshold) = self.slow_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    %signature,
                    request_id = ?request.id,
                    elapsed = ?elapsed,
                    threshold = ?threshold,
                    "Slow invocation"
                );
            }
        }

        match outcome {
            Ok(Ok(value)) => {
                tracing::debug!(%signature, elapsed = ?elapsed, "Invocation succeeded");
                Ok(value)
            }
            Ok(Err(CallError::ArgumentMismatch { received })) => Err(BrokerError::ArgumentMismatch {
                signature,
                received,
                expected: member.arity(),
            }),
            Ok(Err(CallError::Inaccessible)) => Err(BrokerError::Inaccessible { signature }),
            Ok(Err(CallError::Raised(failure))) => {
                tracing::warn!(%signature, request_id = ?request.id, error = %failure, "Invocation failed");
                Err(BrokerError::Operation { signature, failure })
            }
            Ok(Err(CallError::Serialize(source))) => Err(BrokerError::ResultEncoding { signature, source }),
            Err(payload) => {
                let panicked = Panicked::from_payload(payload);
                tracing::warn!(%signature, request_id = ?request.id, message = %panicked.message, "Invocation panicked");
                Err(BrokerError::Operation {
                    signature,
                    failure: panicked.into(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("has_interceptor", &self.interceptor.is_some())
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}
