#![forbid(unsafe_code)]

//! Error types.
//!
//! - [`ProtocolViolation`]: misuse of the hook or context protocol. Fatal
//!   for the render in which it is detected.
//! - [`RenderError`]: what a component returns through `?`. Suspension is
//!   recoverable; failures and violations are not.
//! - [`ReconcileError`]: what callers of the reconciler see.

use std::fmt;
use std::rc::Rc;

use arbor_core::{Lane, WakeableRef};

/// Breach of the hook-order or context contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A component requested more hooks than on its previous render.
    HookCountRegression { component: Rc<str>, index: usize },
    /// A component requested fewer hooks than on its previous render.
    HookCountMismatch {
        component: Rc<str>,
        expected: usize,
        found: usize,
    },
    /// The hook at `index` is of a different kind than last render.
    HookKindMismatch {
        component: Rc<str>,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A context was read while no component was rendering.
    ContextReadOutsideRender,
    /// A provider element was built without a value.
    MissingProviderValue { context: u64 },
    /// A root handle does not belong to this reconciler.
    UnknownRoot { root: usize },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HookCountRegression { component, index } => write!(
                f,
                "{component} rendered more hooks than during the previous render (hook #{index})"
            ),
            Self::HookCountMismatch {
                component,
                expected,
                found,
            } => write!(
                f,
                "{component} rendered {found} hooks, expected {expected} from the previous render"
            ),
            Self::HookKindMismatch {
                component,
                index,
                expected,
                found,
            } => write!(
                f,
                "{component} hook #{index} changed kind: expected {expected}, found {found}"
            ),
            Self::ContextReadOutsideRender => {
                write!(f, "context read outside of a component render")
            }
            Self::MissingProviderValue { context } => {
                write!(f, "provider for context {context} has no value")
            }
            Self::UnknownRoot { root } => write!(f, "unknown root {root}"),
        }
    }
}

impl std::error::Error for ProtocolViolation {}

/// Early exit from a component render.
#[derive(Clone)]
pub enum RenderError {
    /// Data is not ready; retry once the wakeable settles.
    Suspended(WakeableRef),
    /// The component failed.
    Failed(Rc<str>),
    /// The component broke the hook or context contract.
    Protocol(ProtocolViolation),
}

impl RenderError {
    /// A failure with the given message.
    #[must_use]
    pub fn failed(message: impl Into<Rc<str>>) -> Self {
        Self::Failed(message.into())
    }
}

impl fmt::Debug for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended(wakeable) => f
                .debug_tuple("Suspended")
                .field(&wakeable.id())
                .finish(),
            Self::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
            Self::Protocol(violation) => f.debug_tuple("Protocol").field(violation).finish(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended(wakeable) => write!(f, "suspended on resource {}", wakeable.id()),
            Self::Failed(message) => write!(f, "render failed: {message}"),
            Self::Protocol(violation) => write!(f, "{violation}"),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<ProtocolViolation> for RenderError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::Protocol(violation)
    }
}

/// Result of one begin step, consumed by the work loop.
pub enum UnitOutcome<T> {
    /// The step finished; continue with the given value.
    Ready(T),
    /// The step is waiting on data.
    Pending(WakeableRef),
    /// The step failed.
    Failed(Rc<str>),
}

/// Error surfaced to callers of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A render aborted on a protocol violation.
    Protocol(ProtocolViolation),
    /// A component failed and no boundary handles failures.
    RenderFailed { component: Rc<str>, message: Rc<str> },
    /// One render attempt suspended or failed more than the configured cap.
    RetryCapExceeded { lane: Lane, attempts: u32 },
    /// The reconciler was entered while already busy.
    Reentrant,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(violation) => write!(f, "protocol violation: {violation}"),
            Self::RenderFailed { component, message } => {
                write!(f, "{component} failed to render: {message}")
            }
            Self::RetryCapExceeded { lane, attempts } => write!(
                f,
                "render at lane {} exceeded the retry cap after {attempts} attempts",
                lane.label()
            ),
            Self::Reentrant => write!(f, "reconciler entered while busy"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<ProtocolViolation> for ReconcileError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::Protocol(violation)
    }
}

// ---- Tests ----
