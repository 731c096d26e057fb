//! Serialization of a failure and its causal chain into the `data` member of a JSON-RPC error.
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::failure::{DescribableFailure, OperationFailure, Panicked, Properties};
use crate::locator::LocatorError;
use crate::types::Request;

/// Default bound on how many links of a cause chain are serialized.
pub const DEFAULT_MAX_CAUSE_DEPTH: usize = 32;

/// A failure as reported to the caller, with the failure that caused it nested inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cause {
    /// Name of the failure's type
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub stack_frames: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Cause>>,
    /// The request being processed when the failure happened.  Only ever set on the outermost
    /// cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    /// Set on the innermost serialized cause when the chain went deeper than the configured
    /// maximum depth.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Cause {
    /// Iterate over this cause and every cause nested inside it, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Cause> {
        std::iter::successors(Some(self), |cause| cause.cause.as_deref())
    }

    pub fn with_request(mut self, request: Option<&Request>) -> Self {
        self.request = request.cloned();
        self
    }
}

/// Turns failures into [`Cause`]s.
///
/// Serialization is total: whatever the failure, a `Cause` comes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CauseSerializer {
    max_depth: usize,
    include_stack_frames: bool,
}

impl Default for CauseSerializer {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_CAUSE_DEPTH,
            include_stack_frames: true,
        }
    }
}

impl CauseSerializer {
    pub fn new(max_depth: usize, include_stack_frames: bool) -> Self {
        Self {
            max_depth: max_depth.max(1),
            include_stack_frames,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn include_stack_frames(&self) -> bool {
        self.include_stack_frames
    }

    /// Serialize a describable failure.  `extra` is merged into the outermost cause's properties
    /// last, so its keys win.
    pub fn serialize(&self, failure: &dyn DescribableFailure, extra: Option<Properties>) -> Cause {
        self.build(Link::Describable(failure), None, extra)
    }

    /// Serialize any error.  Errors this crate knows to be describable are described as such;
    /// anything else contributes its type and message only.
    pub fn serialize_error(&self, error: &(dyn StdError + 'static), extra: Option<Properties>) -> Cause {
        self.build(Link::plain(error), None, extra)
    }

    pub fn serialize_anyhow(&self, error: &anyhow::Error, extra: Option<Properties>) -> Cause {
        let root: &(dyn StdError + Send + Sync + 'static) = error.as_ref();
        self.build(Link::plain(root), Some(error.backtrace()), extra)
    }

    pub fn serialize_operation_failure(&self, failure: &OperationFailure, extra: Option<Properties>) -> Cause {
        match failure.inner() {
            Ok(describable) => self.build(Link::Describable(describable), Some(failure.backtrace()), extra),
            Err(error) => {
                // The anyhow error may have been created deeper inside the operation than the
                // point where it became an `OperationFailure`, so prefer its own backtrace.
                let backtrace = match error.backtrace().status() {
                    BacktraceStatus::Captured => error.backtrace(),
                    _ => failure.backtrace(),
                };
                let root: &(dyn StdError + Send + Sync + 'static) = error.as_ref();
                self.build(Link::plain(root), Some(backtrace), extra)
            }
        }
    }

    fn build(&self, top: Link<'_>, backtrace: Option<&Backtrace>, extra: Option<Properties>) -> Cause {
        let mut rest: Vec<Link<'_>> = Vec::new();
        let mut cursor = top.next();
        while let Some(link) = cursor {
            if rest.len() + 1 == self.max_depth {
                break;
            }
            cursor = link.next();
            rest.push(link);
        }
        let truncated = cursor.is_some();

        let mut outer = top.describe();
        if self.include_stack_frames {
            outer.stack_frames = backtrace.map(stack_frames).unwrap_or_default();
        }
        if let Some(extra) = extra {
            outer.properties.merge(extra);
        }

        let mut inner: Vec<Cause> = rest.iter().map(Link::describe).collect();
        match inner.last_mut() {
            Some(innermost) => innermost.truncated = truncated,
            None => outer.truncated = truncated,
        }

        outer.cause = inner.into_iter().rev().fold(None, |nested, mut cause| {
            cause.cause = nested;
            Some(Box::new(cause))
        });
        outer
    }
}

/// Lines of a captured backtrace; empty when none was captured.
fn stack_frames(backtrace: &Backtrace) -> Vec<String> {
    match backtrace.status() {
        BacktraceStatus::Captured => backtrace
            .to_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// One link of a cause chain.
#[derive(Clone, Copy)]
enum Link<'a> {
    Describable(&'a dyn DescribableFailure),
    Plain(&'a (dyn StdError + 'static)),
}

impl<'a> Link<'a> {
    /// Recognize the describable types of this crate behind a plain error reference.
    fn plain(error: &'a (dyn StdError + 'static)) -> Self {
        if let Some(error) = error.downcast_ref::<BrokerError>() {
            Link::Describable(error)
        } else if let Some(error) = error.downcast_ref::<LocatorError>() {
            Link::Describable(error)
        } else if let Some(error) = error.downcast_ref::<Panicked>() {
            Link::Describable(error)
        } else {
            Link::Plain(error)
        }
    }

    fn next(&self) -> Option<Link<'a>> {
        match *self {
            Link::Describable(failure) => failure
                .describable_cause()
                .map(Link::Describable)
                .or_else(|| failure.source().map(Link::plain)),
            Link::Plain(error) => error.source().map(Link::plain),
        }
    }

    fn type_name(&self) -> &'static str {
        match *self {
            Link::Describable(failure) => failure.type_name(),
            Link::Plain(error) => plain_type_name(error),
        }
    }

    fn describe(&self) -> Cause {
        let mut properties = Properties::new();
        let message = match *self {
            Link::Describable(failure) => {
                failure.describe(&mut properties);
                failure.to_string()
            }
            Link::Plain(error) => error.to_string(),
        };

        Cause {
            type_name: self.type_name().to_string(),
            message: (!message.is_empty()).then_some(message),
            stack_frames: Vec::new(),
            properties,
            cause: None,
            request: None,
            truncated: false,
        }
    }
}

/// Best effort at naming an error we only know through `dyn Error`.
fn plain_type_name(error: &(dyn StdError + 'static)) -> &'static str {
    macro_rules! known {
        ($($ty:ty),*) => {
            $(
                if error.is::<$ty>() {
                    return std::any::type_name::<$ty>();
                }
            )*
        };
    }

    known!(
        std::io::Error,
        std::num::ParseIntError,
        std::num::ParseFloatError,
        std::str::Utf8Error,
        std::string::FromUtf8Error,
        std::fmt::Error,
        serde_json::Error,
        serde_yaml::Error
    );

    "std::error::Error"
}
