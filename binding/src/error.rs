use crate::Binding;

/// Errors raised while building a calling sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// A calling sequence has at most one return program.
    ReturnAlreadySet,
    /// A program failed stack-type simulation. `position` is the index of the
    /// offending step, or the program length when the final stack is wrong.
    Verification {
        position: usize,
        binding: Option<Binding>,
        reason: String,
    },
}

impl BindingError {
    pub(crate) fn verification(
        position: usize,
        binding: Option<Binding>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Verification {
            position,
            binding,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReturnAlreadySet => {
                f.write_str("return bindings were already set")
            }
            Self::Verification {
                position,
                binding: Some(binding),
                reason,
            } => write!(f, "invalid step {position} ({binding}): {reason}"),
            Self::Verification {
                position,
                binding: None,
                reason,
            } => write!(f, "invalid program end at {position}: {reason}"),
        }
    }
}

impl std::error::Error for BindingError {}
