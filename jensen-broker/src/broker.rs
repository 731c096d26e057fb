//! The broker ties the pipeline together: it takes the text of one request, and produces the text
//! of its response, or nothing if the request was a notification.
//!
//! ```text
//! text ─▶ decode ─▶ validate ─▶ authorize ─▶ resolve ─▶ invoke ─▶ post-process ─▶ encode ─▶ text
//! ```
//!
//! Each stage short-circuits on failure, and every failure becomes an error response.  Nothing
//! that goes wrong while processing a request escapes the broker.
use std::sync::Arc;

use crate::cause::CauseSerializer;
use crate::codec::{Codec, JsonCodec};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::hooks::{InvocationInterceptor, ResponseHandler, ReturnValueHandler, SecurityFilter, run_hook};
use crate::invoker::Invoker;
use crate::locator::{DefaultInstanceLocator, InstanceLocator};
use crate::registry::Registry;
use crate::resolver::{DefaultMethodResolver, MethodResolver};
use crate::types::{Id, InvalidRequest, JSONRPC_VERSION, JsonValue, Request, Response};

/// Staged builder for a [`Broker`].
///
/// The first stage has to be given what resolves requests to members, either a [`Registry`] or a
/// custom [`MethodResolver`]; everything else is optional.
pub struct BrokerBuilder<Stage> {
    stage: Stage,
}

impl Default for BrokerBuilder<Stage1> {
    fn default() -> Self {
        Self { stage: Stage1 }
    }
}

impl BrokerBuilder<Stage1> {
    /// Resolve requests against the targets registered in `registry`.
    pub fn with_registry(self, registry: impl Into<Arc<Registry>>) -> BrokerBuilder<Stage2> {
        self.with_resolver(DefaultMethodResolver::new(registry))
    }

    /// Resolve requests with a custom resolver.
    pub fn with_resolver(self, resolver: impl MethodResolver) -> BrokerBuilder<Stage2> {
        BrokerBuilder {
            stage: Stage2 {
                resolver: Arc::new(resolver),
                codec: Arc::new(JsonCodec),
                locator: Arc::new(DefaultInstanceLocator),
                security_filter: None,
                interceptor: None,
                return_value_handler: None,
                response_handler: None,
                config: BrokerConfig::default(),
            },
        }
    }
}

impl BrokerBuilder<Stage2> {
    pub fn with_codec(mut self, codec: impl Codec) -> Self {
        self.stage.codec = Arc::new(codec);
        self
    }

    pub fn with_instance_locator(mut self, locator: impl InstanceLocator) -> Self {
        self.stage.locator = Arc::new(locator);
        self
    }

    pub fn with_security_filter(mut self, filter: impl SecurityFilter) -> Self {
        self.stage.security_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_invocation_interceptor(mut self, interceptor: impl InvocationInterceptor) -> Self {
        self.stage.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn with_return_value_handler(mut self, handler: impl ReturnValueHandler) -> Self {
        self.stage.return_value_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_response_handler(mut self, handler: impl ResponseHandler) -> Self {
        self.stage.response_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the whole configuration, including the pretty-print setting.
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.stage.config = config;
        self
    }

    pub fn with_pretty_print(mut self, pretty_print: bool) -> Self {
        self.stage.config.pretty_print = pretty_print;
        self
    }

    pub fn build(self) -> Broker {
        let Stage2 {
            resolver,
            codec,
            locator,
            security_filter,
            interceptor,
            return_value_handler,
            response_handler,
            config,
        } = self.stage;

        let invoker = Invoker::new(locator)
            .with_interceptor(interceptor)
            .with_slow_threshold(config.slow_invocation_threshold);

        Broker {
            inner: Arc::new(BrokerInner {
                causes: config.cause_serializer(),
                codec,
                resolver,
                invoker,
                security_filter,
                return_value_handler,
                response_handler,
                config,
            }),
        }
    }
}

#[doc(hidden)]
pub struct Stage1;

#[doc(hidden)]
pub struct Stage2 {
    resolver: Arc<dyn MethodResolver>,
    codec: Arc<dyn Codec>,
    locator: Arc<dyn InstanceLocator>,
    security_filter: Option<Arc<dyn SecurityFilter>>,
    interceptor: Option<Arc<dyn InvocationInterceptor>>,
    return_value_handler: Option<Arc<dyn ReturnValueHandler>>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    config: BrokerConfig,
}

/// A JSON-RPC 2.0 broker.
///
/// Cheap to clone, and safe to share between threads: each request is processed independently,
/// against configuration that never changes after [`BrokerBuilder::build`].
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    codec: Arc<dyn Codec>,
    resolver: Arc<dyn MethodResolver>,
    invoker: Invoker,
    security_filter: Option<Arc<dyn SecurityFilter>>,
    return_value_handler: Option<Arc<dyn ReturnValueHandler>>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    config: BrokerConfig,
    causes: CauseSerializer,
}

/// What came out of dispatching a request, before the response is post-processed and encoded.
struct Dispatched {
    response: Option<Response>,
    request: Option<Request>,
}

impl Broker {
    pub fn builder() -> BrokerBuilder<Stage1> {
        BrokerBuilder::default()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Process the text of one request, returning the text of the response.
    ///
    /// Returns `None` if there is nothing to send back: the request was a notification, or the
    /// response could not be encoded at all.
    pub fn process(&self, text: &str) -> Option<String> {
        let Dispatched { response, request } = self.dispatch(text);
        response.and_then(|response| self.emit(response, request.as_ref()))
    }

    /// Process the raw bytes of one request.  Bytes that are not UTF-8 are a parse error.
    pub fn process_bytes(&self, bytes: &[u8]) -> Option<String> {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.process(text),
            Err(source) => self.respond_to_failure(BrokerError::Parse {
                source: crate::codec::CodecError::Utf8 { source },
            }),
        }
    }

    /// Process the text of one request up to the point where the response would be
    /// post-processed by the [`ResponseHandler`] and encoded, and return the response.
    pub fn handle(&self, text: &str) -> Option<Response> {
        self.dispatch(text).response
    }

    fn dispatch(&self, text: &str) -> Dispatched {
        let value = match self.inner.codec.decode(text) {
            Ok(value) => value,
            Err(source) => {
                tracing::debug!(error = %source, "Request could not be decoded");
                return self.envelope_failure(None, BrokerError::Parse { source });
            }
        };

        let request = match validate(value) {
            Ok(request) => request,
            Err(Rejected::Notification(error)) => {
                tracing::debug!(%error, "Notification envelope is invalid; no response will be sent");
                return Dispatched {
                    response: None,
                    request: None,
                };
            }
            Err(Rejected::Envelope(id, error)) => {
                tracing::debug!(%error, request_id = ?id, "Request envelope is invalid");
                return self.envelope_failure(id, error);
            }
        };

        let span = tracing::debug_span!("request", method = %request.method, request_id = ?request.id);
        let _guard = span.enter();

        let outcome = self.execute(&request);
        let response = match (&request.id, outcome) {
            (Some(id), Ok(result)) => Some(Response::success(id.clone(), result)),
            (Some(id), Err(error)) => {
                tracing::debug!(%error, "Request failed");
                Some(Response::error(
                    id.clone(),
                    error.to_error_details(&self.inner.causes, Some(&request)),
                ))
            }
            (None, Ok(_)) => {
                tracing::debug!("Notification processed");
                None
            }
            (None, Err(error)) => {
                tracing::debug!(%error, "Notification failed; no response will be sent");
                None
            }
        };

        Dispatched {
            response,
            request: Some(request),
        }
    }

    fn envelope_failure(&self, id: Option<Id>, error: BrokerError) -> Dispatched {
        let details = error.to_error_details(&self.inner.causes, None);
        Dispatched {
            response: Some(Response::error(id.unwrap_or(Id::Null), details)),
            request: None,
        }
    }

    /// Authorize, resolve, invoke and post-process the result.
    fn execute(&self, request: &Request) -> Result<JsonValue> {
        if let Some(filter) = &self.inner.security_filter {
            let allowed = run_hook("security filter", || Ok(filter.is_allowed(request))).map_err(|failure| {
                BrokerError::SecurityFilter {
                    method: request.method.clone(),
                    failure,
                }
            })?;
            if !allowed {
                return Err(BrokerError::NotAllowed {
                    method: request.method.clone(),
                });
            }
        }

        let call = self.inner.resolver.resolve(request)?;
        tracing::trace!(signature = %call.member().signature(), "Resolved");

        let result = self.inner.invoker.invoke(call, request)?;

        match &self.inner.return_value_handler {
            Some(handler) => run_hook("return value handler", || handler.on_return_value(result))
                .map_err(|failure| BrokerError::ReturnValue { failure }),
            None => Ok(result),
        }
    }

    /// Post-process and encode a response.
    ///
    /// If either step fails, a minimal error response describing that failure is encoded instead,
    /// without post-processing.  If even that can't be encoded, the failure is logged and nothing
    /// is returned.
    fn emit(&self, response: Response, request: Option<&Request>) -> Option<String> {
        let id = response.id.clone();

        let processed = match &self.inner.response_handler {
            Some(handler) => run_hook("response handler", || handler.on_response(response))
                .map_err(|failure| BrokerError::ResponseHandler { failure }),
            None => Ok(response),
        };

        match processed.and_then(|response| self.encode(&response)) {
            Ok(text) => Some(text),
            Err(error) => {
                tracing::warn!(%error, request_id = %id, "Failed to emit response; sending an error response instead");

                let fallback = Response::error(id, error.to_error_details(&self.inner.causes, request));
                match self.encode(&fallback) {
                    Ok(text) => Some(text),
                    Err(error) => {
                        tracing::error!(%error, "Failed to encode error response; no response will be sent");
                        None
                    }
                }
            }
        }
    }

    fn encode(&self, response: &Response) -> Result<String> {
        self.inner
            .codec
            .encode(response, self.inner.config.pretty_print)
            .map_err(|source| BrokerError::Encode { source })
    }

    /// Answer a failure that happened before any request could be read.
    pub(crate) fn respond_to_failure(&self, error: BrokerError) -> Option<String> {
        let Dispatched { response, request } = self.envelope_failure(None, error);
        response.and_then(|response| self.emit(response, request.as_ref()))
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.inner.config)
            .field("invoker", &self.inner.invoker)
            .finish_non_exhaustive()
    }
}

/// Why [`validate`] rejected a decoded value.
#[derive(Debug)]
enum Rejected {
    /// The value is not a request envelope; answered with the salvaged id, if any.
    Envelope(Option<Id>, BrokerError),
    /// The envelope parsed as a notification but is not acceptable; never answered.
    Notification(BrokerError),
}

/// Check that a decoded value is a JSON-RPC 2.0 request.
fn validate(value: JsonValue) -> std::result::Result<Request, Rejected> {
    if value.is_null() {
        return Err(Rejected::Envelope(None, BrokerError::MissingRequest));
    }

    // Only an object can carry an id; anything else would have serde reading the id out of
    // whatever happens to be first in an array
    let salvaged_id = |value: JsonValue| {
        if value.is_object() {
            serde_json::from_value::<InvalidRequest>(value).ok().and_then(|invalid| invalid.id)
        } else {
            None
        }
    };

    let request: Request = match serde_json::from_value(value.clone()) {
        Ok(request) => request,
        Err(source) => {
            return Err(Rejected::Envelope(
                salvaged_id(value),
                BrokerError::InvalidEnvelope { source },
            ));
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let error = BrokerError::UnsupportedVersion {
            version: request.jsonrpc,
        };
        return Err(match request.id {
            Some(id) => Rejected::Envelope(Some(id), error),
            None => Rejected::Notification(error),
        });
    }

    Ok(request)
}
