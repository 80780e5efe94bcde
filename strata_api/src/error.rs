use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::{
    devicegraph::{DeviceKind, HolderKind, StructuralError},
    Sid,
};

/// Two device graphs could not be compared.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DiffError {
    #[error("Device {sid} changes kind from '{lhs}' to '{rhs}'")]
    IncompatibleTypes {
        sid: Sid,
        lhs: DeviceKind,
        rhs: DeviceKind,
    },

    #[error("Attribute '{attribute}' of {kind} {sid} cannot change from '{lhs}' to '{rhs}'")]
    ImmutableAttribute {
        sid: Sid,
        kind: DeviceKind,
        attribute: String,
        lhs: String,
        rhs: String,
    },

    #[error(
        "Holder of kind '{kind}' from {source_sid} to {target_sid} cannot be \
            changed between existing devices"
    )]
    UnsupportedHolderChange {
        source_sid: Sid,
        target_sid: Sid,
        kind: HolderKind,
    },

    #[error("Target device graph is inconsistent: {violations}")]
    InconsistentTarget { violations: String },

    #[error("Actions form a dependency cycle, {remaining} action(s) could not be ordered")]
    DependencyCycle { remaining: usize },
}

/// Applying an action to the system failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum CommitError {
    #[error("Failed to {action}")]
    ActionFailed { action: String },

    #[error("Cannot {action}: {reason}")]
    Unsupported { action: String, reason: String },

    #[error("Failed to update mount table '{path}'")]
    MountTable { path: String },
}

/// Committing was stopped on request.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum CancellationError {
    #[error("Commit cancelled after {committed} action(s), {remaining} action(s) not started")]
    Requested { committed: usize, remaining: usize },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load storage configuration from '{path}'")]
    LoadConfig { path: String },

    #[error("Failed to parse storage configuration")]
    ParseConfig,

    #[error("Device graph '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Device graph '{name}' does not exist")]
    UnknownDevicegraph { name: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Device {0} referenced by an action is not in its device graph")]
    DanglingSid(Sid),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// A device graph invariant was violated.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// The action graph could not be computed.
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// An action failed while being committed.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Committing was cancelled by the caller.
    #[error(transparent)]
    Cancellation(#[from] CancellationError),

    /// Invalid input was provided.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct StrataErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct StrataError(Box<StrataErrorInner>);
impl StrataError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        StrataError(Box::new(StrataErrorInner {
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

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the underlying cause, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.0.source.as_ref()
    }
}

macro_rules! impl_from_leaf_error {
    ($($leaf:ty),* $(,)?) => {
        $(
            impl From<$leaf> for StrataError {
                #[track_caller]
                fn from(value: $leaf) -> Self {
                    StrataError::new(value)
                }
            }
        )*
    };
}

impl_from_leaf_error!(
    StructuralError,
    DiffError,
    CommitError,
    CancellationError,
    InvalidInputError,
    InternalError,
);

pub trait ReportError<T, K> {
    /// Convert this error into a structured StrataError.
    fn structured(self, kind: K) -> Result<T, StrataError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, StrataError> {
        match self {
            Some(t) => Ok(t),
            None => Err(StrataError(Box::new(StrataErrorInner {
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
    fn structured(self, kind: K) -> Result<T, StrataError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(StrataError(Box::new(StrataErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait StrataResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, StrataError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> StrataResultExt<T> for Result<T, StrataError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, StrataError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for StrataError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("strata-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Structural(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Diff(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Commit(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Cancellation(ref e) => state.serialize_field("error", e)?,
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
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

impl Debug for StrataError {
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

impl std::fmt::Display for StrataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = StrataError(Box::new(StrataErrorInner {
            kind: ErrorKind::InvalidInput(InvalidInputError::LoadConfig {
                path: "/storage.yaml".into(),
            }),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert!(matches!(m["error"], Value::Mapping(_)));
                assert_eq!(m["category"], Value::String("invalid-input".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String(
                        "Failed to load storage configuration from '/storage.yaml'".into()
                    )
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w".into()))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_error_message() {
        let error = Err::<(), _>(StrataError::new(DiffError::DependencyCycle { remaining: 2 }))
            .message("Failed to order actions")
            .unwrap_err();
        assert_eq!(<&str>::from(error.kind()), "diff");
        assert!(format!("{error:?}").contains("Context:\n    0: Failed to order actions"));
    }

    #[test]
    fn test_structural_conversion() {
        fn fails() -> Result<(), StrataError> {
            Err::<(), _>(StructuralError::CycleDetected)?;
            Ok(())
        }

        let error = fails().unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::Structural(StructuralError::CycleDetected)
        );
        assert_eq!(error.to_string(), "Device graph contains a holder cycle");
    }
}
