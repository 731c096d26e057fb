//! Method overload resolution: from a `Target.member` name and a list of untyped positional
//! arguments to exactly one member that can take them.
use std::sync::Arc;

use itertools::Itertools;

use crate::error::{BrokerError, Result};
use crate::handler::Arguments;
use crate::registry::{IncompatibilityReport, Member, Registry};
use crate::types::{JsonValue, Request, json_kind};

/// A member resolved for a request, together with the arguments it accepted.
///
/// Consumed by the invocation pipeline exactly once.
pub struct MethodCall {
    member: Arc<Member>,
    params: Vec<JsonValue>,
    arguments: Arguments,
}

impl MethodCall {
    /// Assemble a call from its parts.  Custom [`MethodResolver`]s use this; nothing checks that
    /// `arguments` are what `member` takes until the call is invoked.
    pub fn from_parts(member: Arc<Member>, params: Vec<JsonValue>, arguments: Arguments) -> Self {
        Self {
            member,
            params,
            arguments,
        }
    }

    pub fn member(&self) -> &Arc<Member> {
        &self.member
    }

    /// The raw parameters the member accepted.
    pub fn params(&self) -> &[JsonValue] {
        &self.params
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// The signature as invoked, from the member name and the JSON kinds of the arguments,
    /// e.g. `add(number, string)`.
    pub fn invocation_signature(&self) -> String {
        invocation_signature(self.member.name(), &self.params)
    }

    pub(crate) fn into_parts(self) -> (Arc<Member>, Vec<JsonValue>, Arguments) {
        (self.member, self.params, self.arguments)
    }
}

impl std::fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCall")
            .field("member", &self.member)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub(crate) fn invocation_signature(member: &str, params: &[JsonValue]) -> String {
    format!("{}({})", member, params.iter().map(json_kind).join(", "))
}

/// Key of a candidate in the incompatibility report: its signature, unless an earlier candidate
/// with the same signature already took that key, in which case its 1-based position among the
/// candidates is appended, e.g. `add(i64, i64) #2`.
fn report_key(report: &IncompatibilityReport, signature: String, candidate: usize) -> String {
    if report.contains_key(&signature) {
        format!("{signature} #{candidate}")
    } else {
        signature
    }
}

/// Maps a request to the member it invokes.
pub trait MethodResolver: Send + Sync + 'static {
    fn resolve(&self, request: &Request) -> Result<MethodCall>;
}

impl<F> MethodResolver for F
where
    F: Fn(&Request) -> Result<MethodCall> + Send + Sync + 'static,
{
    fn resolve(&self, request: &Request) -> Result<MethodCall> {
        self(request)
    }
}

/// Resolves requests against the members registered in a [`Registry`].
///
/// Same-named members are tried in registration order, and the first one whose parameters all
/// deserialize from the request's arguments wins.  This is a pure function of the registry.
#[derive(Debug, Clone)]
pub struct DefaultMethodResolver {
    registry: Arc<Registry>,
}

impl DefaultMethodResolver {
    pub fn new(registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl MethodResolver for DefaultMethodResolver {
    fn resolve(&self, request: &Request) -> Result<MethodCall> {
        let (target_name, member_name) = request.split_method().ok_or_else(|| BrokerError::MalformedMethod {
            method: request.method.clone(),
        })?;

        let target = self
            .registry
            .target(target_name)
            .ok_or_else(|| BrokerError::UnknownTarget {
                target: target_name.to_string(),
            })?;

        let mut candidates = 0;
        let mut incompatible = IncompatibilityReport::new();
        for member in target.members_named(member_name) {
            candidates += 1;
            match member.prepare(&request.params) {
                Ok(arguments) => {
                    tracing::trace!(signature = %member.signature(), "Member accepts the parameters");
                    return Ok(MethodCall::from_parts(member.clone(), request.params.clone(), arguments));
                }
                Err(incompatibility) => {
                    tracing::trace!(
                        signature = %member.signature(),
                        parameter_type = %incompatibility.parameter_type,
                        index = incompatibility.index,
                        "Member cannot take the parameters"
                    );
                    incompatible.insert(report_key(&incompatible, member.signature(), candidates), incompatibility);
                }
            }
        }

        if candidates == 0 {
            Err(BrokerError::MemberNotFound {
                target: target_name.to_string(),
                member: member_name.to_string(),
            })
        } else {
            Err(BrokerError::IncompatibleMember {
                target: target_name.to_string(),
                member: member_name.to_string(),
                incompatible,
            })
        }
    }
}
