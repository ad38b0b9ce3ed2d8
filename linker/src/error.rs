use binding::{BindingError, Carrier};

/// Raised while arranging a call or generating its stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    UnsupportedLayout(String),
    Binding(BindingError),
    UnknownSymbol(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLayout(msg) => write!(f, "unsupported layout: {msg}"),
            Self::Binding(err) => write!(f, "binding error: {err}"),
            Self::UnknownSymbol(name) => write!(f, "unknown symbol `{name}`"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Binding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BindingError> for LinkError {
    fn from(value: BindingError) -> Self {
        Self::Binding(value)
    }
}

/// A failure reported by native code. Passed through calls unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "native failure: {}", self.message)
    }
}

impl std::error::Error for NativeError {}

/// Raised by a single call. Argument errors are reported before any
/// storage is written.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    ArgumentCount {
        expected: usize,
        found: usize,
    },
    ArgumentType {
        index: usize,
        expected: Carrier,
        found: Option<Carrier>,
    },
    /// A segment argument shorter than its layout.
    SegmentTooSmall {
        index: usize,
        expected: usize,
        found: usize,
    },
    ResultType {
        expected: Option<Carrier>,
        found: Option<Carrier>,
    },
    Native(NativeError),
    /// The managed target of an upcall failed.
    Target(String),
}

fn carrier_name(carrier: &Option<Carrier>) -> String {
    match carrier {
        Some(c) => c.to_string(),
        None => "void".to_string(),
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArgumentCount { expected, found } => {
                write!(f, "expected {expected} arguments, got {found}")
            }
            Self::ArgumentType {
                index,
                expected,
                found,
            } => write!(
                f,
                "argument {index}: expected {expected}, got {}",
                carrier_name(found)
            ),
            Self::SegmentTooSmall {
                index,
                expected,
                found,
            } => write!(
                f,
                "argument {index}: segment of {found} bytes, layout needs {expected}"
            ),
            Self::ResultType { expected, found } => write!(
                f,
                "result: expected {}, got {}",
                carrier_name(expected),
                carrier_name(found)
            ),
            Self::Native(err) => write!(f, "{err}"),
            Self::Target(msg) => write!(f, "upcall target failed: {msg}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Native(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NativeError> for CallError {
    fn from(value: NativeError) -> Self {
        Self::Native(value)
    }
}
