//! A JSON-RPC 2.0 broker that invokes methods of registered Rust targets.
//!
//! Requests name what they want to invoke as `Target.member`.  Targets are registered in a
//! [`Registry`] with a [`TargetBuilder`], and their members are ordinary Rust functions and
//! closures taking any parameters that implement `serde::Deserialize`.  Members may be overloaded:
//! when several members of a target share a name, the first one registered that can take the
//! request's arguments is invoked.
//!
//! ```
//! use jensen_broker::{Broker, Registry, TargetBuilder};
//!
//! #[derive(Default)]
//! struct Calc;
//!
//! impl Calc {
//!     fn add(&self, a: i64, b: i64) -> i64 {
//!         a + b
//!     }
//! }
//!
//! let broker = Broker::builder()
//!     .with_registry(Registry::new().with_target(TargetBuilder::<Calc>::new("Calc").method("add", Calc::add)))
//!     .build();
//!
//! let response = broker.process(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1}"#);
//! assert_eq!(response.as_deref(), Some(r#"{"jsonrpc":"2.0","result":5,"id":1}"#));
//! ```
//!
//! Whatever goes wrong is reported back to the caller as a JSON-RPC error whose `data` is a
//! [`Cause`]: the failure's type, message, and the chain of failures that caused it.  Failures
//! raised by members can add their own detail by implementing [`DescribableFailure`].
//!
//! This library owes a debt to the [`jsonrpsee`](https://github.com/paritytech/jsonrpsee) project,
//! whose protocol types it re-uses.

mod broker;
mod cause;
mod codec;
mod config;
mod error;
mod failure;
mod handler;
mod hooks;
mod invoker;
mod locator;
mod registry;
mod resolver;
mod stream;
#[cfg(test)]
pub mod testing;
mod typemap;
mod types;

pub use broker::{Broker, BrokerBuilder, Stage1, Stage2};
pub use cause::{Cause, CauseSerializer, DEFAULT_MAX_CAUSE_DEPTH};
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{BrokerConfig, ConfigError};
pub use error::{BrokerError, Result};
pub use failure::{DescribableFailure, OperationFailure, Panicked, Properties, property_name};
pub use handler::{Arguments, CallError, Function, IntoOutcome, Json, Method};
pub use hooks::{InvocationInterceptor, ResponseHandler, ReturnValueHandler, SecurityFilter};
pub use invoker::Invoker;
pub use locator::{
    CachingInstanceLocator, DefaultInstanceLocator, InstanceLocator, LocatorError, SingletonInstanceLocator,
};
pub use registry::{
    Incompatibility, IncompatibilityReport, Instance, Member, Registry, Target, TargetBuilder, TargetInfo,
};
pub use resolver::{DefaultMethodResolver, MethodCall, MethodResolver};
pub use typemap::TypeMap;
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, Id, InvalidRequest, JSONRPC_VERSION, JsonValue, Request, Response,
    ResponsePayload, SERVER_ERROR_CODE, SuccessResponse, TwoPointZero,
};
