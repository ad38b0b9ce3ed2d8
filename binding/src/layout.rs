//! Memory shapes of call arguments and results.
//!
//! Only the queries the binding engine needs are provided: size, alignment,
//! the erased carrier and the flattened scalar leaves used by the call
//! arrangers to classify aggregates. Target pointers are 64 bits wide.

use std::fmt;

use crate::{Carrier, Primitive};

pub const ADDRESS_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    Value(Primitive),
    Address,
    /// Members at their natural alignment, padded to the struct alignment.
    Struct(Vec<MemoryLayout>),
    Sequence {
        element: Box<MemoryLayout>,
        count: usize,
    },
    Padding(usize),
}

/// A scalar leaf of an aggregate at an absolute byte offset. Addresses are
/// reported as [`Primitive::I64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarField {
    pub offset: usize,
    pub primitive: Primitive,
}

#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl MemoryLayout {
    pub fn value(primitive: Primitive) -> Self {
        Self::Value(primitive)
    }

    pub fn structure(members: impl IntoIterator<Item = MemoryLayout>) -> Self {
        Self::Struct(members.into_iter().collect())
    }

    pub fn sequence(element: MemoryLayout, count: usize) -> Self {
        Self::Sequence {
            element: Box::new(element),
            count,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            Self::Value(p) => p.byte_size(),
            Self::Address => ADDRESS_SIZE,
            Self::Struct(members) => {
                let mut offset = 0;
                for member in members {
                    offset = align_up(offset, member.byte_alignment());
                    offset += member.byte_size();
                }
                align_up(offset, self.byte_alignment())
            }
            Self::Sequence { element, count } => element.byte_size() * count,
            Self::Padding(size) => *size,
        }
    }

    pub fn byte_alignment(&self) -> usize {
        match self {
            Self::Value(p) => p.byte_size(),
            Self::Address => ADDRESS_SIZE,
            Self::Struct(members) => members
                .iter()
                .map(MemoryLayout::byte_alignment)
                .max()
                .unwrap_or(1),
            Self::Sequence { element, .. } => element.byte_alignment(),
            Self::Padding(_) => 1,
        }
    }

    pub fn carrier(&self) -> Carrier {
        match self {
            Self::Value(p) => Carrier::Primitive(*p),
            Self::Address => Carrier::Address,
            Self::Struct(_) | Self::Sequence { .. } | Self::Padding(_) => {
                Carrier::Segment
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.carrier() == Carrier::Segment
    }

    /// Byte offsets of the direct members of a struct; empty otherwise.
    pub fn member_offsets(&self) -> Vec<usize> {
        let Self::Struct(members) = self else {
            return Vec::new();
        };
        let mut offsets = Vec::with_capacity(members.len());
        let mut offset = 0;
        for member in members {
            offset = align_up(offset, member.byte_alignment());
            offsets.push(offset);
            offset += member.byte_size();
        }
        offsets
    }

    /// All scalar leaves in offset order. Padding contributes nothing.
    pub fn scalar_fields(&self) -> Vec<ScalarField> {
        let mut fields = Vec::new();
        self.collect_scalars(0, &mut fields);
        fields
    }

    fn collect_scalars(&self, base: usize, out: &mut Vec<ScalarField>) {
        match self {
            Self::Value(p) => out.push(ScalarField {
                offset: base,
                primitive: *p,
            }),
            Self::Address => out.push(ScalarField {
                offset: base,
                primitive: Primitive::I64,
            }),
            Self::Struct(members) => {
                for (member, offset) in members.iter().zip(self.member_offsets()) {
                    member.collect_scalars(base + offset, out);
                }
            }
            Self::Sequence { element, count } => {
                let stride = element.byte_size();
                for i in 0..*count {
                    element.collect_scalars(base + i * stride, out);
                }
            }
            Self::Padding(_) => {}
        }
    }
}

impl fmt::Display for MemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(p) => write!(f, "{p}"),
            Self::Address => f.write_str("addr"),
            Self::Struct(members) => {
                f.write_str("[")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str("]")
            }
            Self::Sequence { element, count } => write!(f, "[{count}:{element}]"),
            Self::Padding(size) => write!(f, "x{size}"),
        }
    }
}

/// Native shape of a function: argument layouts and an optional result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionDescriptor {
    args: Vec<MemoryLayout>,
    ret: Option<MemoryLayout>,
}

impl FunctionDescriptor {
    pub fn of(ret: MemoryLayout, args: impl IntoIterator<Item = MemoryLayout>) -> Self {
        Self {
            args: args.into_iter().collect(),
            ret: Some(ret),
        }
    }

    pub fn void(args: impl IntoIterator<Item = MemoryLayout>) -> Self {
        Self {
            args: args.into_iter().collect(),
            ret: None,
        }
    }

    pub fn new(args: Vec<MemoryLayout>, ret: Option<MemoryLayout>) -> Self {
        Self { args, ret }
    }

    pub fn args(&self) -> &[MemoryLayout] {
        &self.args
    }

    pub fn ret(&self) -> Option<&MemoryLayout> {
        self.ret.as_ref()
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        match &self.ret {
            Some(ret) => write!(f, ") -> {ret}"),
            None => f.write_str(") -> void"),
        }
    }
}
