use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Serialize};
use strum_macros::IntoStaticStr;

/// The caller asked for a transition that the current state does not allow
/// (e.g. installing a host with no role set).
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictError {
    #[error("cannot install host {host_id}: role '{role}' is not a valid installation role")]
    InvalidRole { host_id: String, role: String },
    #[error("event '{event}' is not valid from state '{state}'")]
    IllegalTransition { event: String, state: String },
    #[error("the caller-supplied transaction observed a stale source state for {entity_id}")]
    StaleTransition { entity_id: String },
}

/// The requested entity does not exist in the store.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("host {host_id} not found in cluster {cluster_id}")]
    Host { host_id: String, cluster_id: String },
    #[error("cluster {cluster_id} not found")]
    Cluster { cluster_id: String },
}

/// A host's reported inventory could not be interpreted.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryError {
    #[error("host {host_id} reported no inventory")]
    Missing { host_id: String },
    #[error("host {host_id} inventory failed to parse: {reason}")]
    Decode { host_id: String, reason: String },
    #[error("host {host_id} inventory is missing cpu or memory information")]
    Incomplete { host_id: String },
}

/// The persistence layer reported a failure unrelated to the shape of the request.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreError {
    #[error("failed to open store")]
    Open,
    #[error("failed to read entity from store")]
    Read,
    #[error("failed to write entity to store")]
    Write,
    #[error("failed to serialize entity for storage")]
    Serialize,
    #[error("failed to deserialize entity from storage")]
    Deserialize,
    #[error("failed to begin transaction")]
    BeginTransaction,
    #[error("failed to commit transaction")]
    CommitTransaction,
}

/// An uncategorized error or a bug was encountered. This indicates a problem with the engine
/// itself, not with caller input or the state of the world.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("internal error: {0}")]
    Internal(&'static str),
    #[error("no refresh rule matched host {host_id} in state {state}")]
    NoRefreshRuleMatched { host_id: String, state: String },
}

/// Each variant corresponds to a different category of error. The categories are intended to be
/// user-meaningful and to be used for routing issues to the proper handling (HTTP status code,
/// retry policy, alerting).
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The caller asked for a transition that is not legal from the current state.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The requested host or cluster does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A host's inventory could not be decoded or is incomplete.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// The persistence layer failed for a reason unrelated to the above.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An uncategorized error or a bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct EngineErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

/// The engine's single error type. Every public operation returns `Result<T, EngineError>` rather
/// than a bare `anyhow::Error`, so that callers can match on `.kind()` to decide how to respond
/// (HTTP status, retry, or surface verbatim) without string-sniffing a message.
pub struct EngineError(Box<EngineErrorInner>);

impl EngineError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        EngineError(Box::new(EngineErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner `ErrorKind`, for callers that need to branch on the
    /// error category (e.g. to map to an HTTP status code).
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.0.kind, ErrorKind::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.0.kind, ErrorKind::NotFound(_))
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured `EngineError`.
    fn structured(self, kind: K) -> Result<T, EngineError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, EngineError> {
        match self {
            Some(t) => Ok(t),
            None => Err(EngineError(Box::new(EngineErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, EngineError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(EngineError(Box::new(EngineErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait EngineResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError>;

    /// Convert the error into an unstructured error, for logging at a boundary that doesn't need
    /// the structured kind any more.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> EngineResultExt<T> for Result<T, EngineError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for EngineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("engine-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Conflict(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Inventory(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Store(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
