use std::fmt;

use crate::{Primitive, VMStorage};

/// One step of a binding microprogram.
///
/// Steps operate on an abstract value stack owned by the executing engine.
/// The same step means the forward operation when unboxing (managed to
/// native) and its inverse when boxing (native to managed). Steps are plain
/// values and carry no call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Unbox: pop a primitive and write it to `storage`.
    /// Box: read `storage` as `ty` and push it.
    Move { storage: VMStorage, ty: Primitive },

    /// Unbox: pop a segment and push the `ty` field at `offset`.
    /// Box: pop a value and a segment, write the field, push the segment.
    Dereference { offset: usize, ty: Primitive },

    /// Unbox: pop a segment and push a scratch copy of its first `size` bytes.
    /// Box: pop an address and push a scratch copy of `size` bytes there.
    Copy { size: usize, alignment: usize },

    /// Push a fresh zeroed scratch buffer.
    AllocateBuffer { size: usize, alignment: usize },

    /// Unbox: address to its bits as `i64`. Box: `i64` bits to an address.
    BoxAddress,

    /// Pop a segment and push its base address.
    BaseAddress,

    /// Push a copy of the top of the stack.
    Dup,
}

impl Binding {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "Move",
            Self::Dereference { .. } => "Deref",
            Self::Copy { .. } => "Copy",
            Self::AllocateBuffer { .. } => "Alloc",
            Self::BoxAddress => "BoxAddress",
            Self::BaseAddress => "BaseAddress",
            Self::Dup => "Dup",
        }
    }

    /// Bytes of scratch memory this step requests from the call context.
    pub const fn allocation_size(&self) -> usize {
        match self {
            Self::Copy { size, .. } | Self::AllocateBuffer { size, .. } => *size,
            _ => 0,
        }
    }

    pub const fn storage(&self) -> Option<VMStorage> {
        match self {
            Self::Move { storage, .. } => Some(*storage),
            _ => None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { storage, ty } => write!(f, "Move {storage} {ty}"),
            Self::Dereference { offset, ty } => write!(f, "Deref +{offset} {ty}"),
            Self::Copy { size, alignment } => write!(f, "Copy {size}/{alignment}"),
            Self::AllocateBuffer { size, alignment } => {
                write!(f, "Alloc {size}/{alignment}")
            }
            Self::BoxAddress => f.write_str("BoxAddress"),
            Self::BaseAddress => f.write_str("BaseAddress"),
            Self::Dup => f.write_str("Dup"),
        }
    }
}

/// Render a program as `[step; step; ...]`.
pub fn display_program(bindings: &[Binding]) -> String {
    let steps: Vec<String> = bindings.iter().map(ToString::to_string).collect();
    format!("[{}]", steps.join("; "))
}
