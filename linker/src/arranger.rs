//! Shared machinery of the call arrangers.
//!
//! Argument programs of a downcall and the return program of an upcall move
//! values into native storage (unbox); the other two move them out (box).
//! The helpers below emit either form from the same storage assignment.

use binding::{
    Bindings, CallDirection, CallingSequence, FunctionDescriptor, MemoryLayout, Primitive,
    StorageClass, VMStorage,
};

use crate::{AbiDescriptor, LinkError};

/// Classifies a function descriptor under one ABI.
pub trait CallArranger: Send + Sync {
    fn abi(&self) -> &'static AbiDescriptor;

    fn arrange(
        &self,
        descriptor: &FunctionDescriptor,
        direction: CallDirection,
    ) -> Result<CallingSequence, LinkError>;
}

/// One scalar piece of an aggregate and the storage that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub offset: usize,
    pub ty: Primitive,
    pub storage: VMStorage,
}

/// Hands out registers of one side (arguments or returns) in order, and
/// stack slots once they run out.
pub(crate) struct StorageCursor {
    abi: &'static AbiDescriptor,
    integer_class: StorageClass,
    vector_class: StorageClass,
    next_integer: usize,
    next_vector: usize,
    next_stack: usize,
}

impl StorageCursor {
    pub fn arguments(abi: &'static AbiDescriptor) -> Self {
        Self::new(abi, StorageClass::IntegerArg, StorageClass::VectorArg)
    }

    pub fn returns(abi: &'static AbiDescriptor) -> Self {
        Self::new(abi, StorageClass::IntegerReturn, StorageClass::VectorReturn)
    }

    fn new(
        abi: &'static AbiDescriptor,
        integer_class: StorageClass,
        vector_class: StorageClass,
    ) -> Self {
        Self {
            abi,
            integer_class,
            vector_class,
            next_integer: 0,
            next_vector: 0,
            next_stack: 0,
        }
    }

    pub fn remaining_integer(&self) -> usize {
        self.abi.slot_count(self.integer_class) - self.next_integer
    }

    pub fn remaining_vector(&self) -> usize {
        self.abi.slot_count(self.vector_class) - self.next_vector
    }

    pub fn integer(&mut self) -> Option<VMStorage> {
        (self.remaining_integer() > 0).then(|| {
            self.next_integer += 1;
            self.abi.storage(self.integer_class, self.next_integer - 1)
        })
    }

    pub fn vector(&mut self) -> Option<VMStorage> {
        (self.remaining_vector() > 0).then(|| {
            self.next_vector += 1;
            self.abi.storage(self.vector_class, self.next_vector - 1)
        })
    }

    pub fn stack(&mut self) -> VMStorage {
        self.next_stack += 1;
        self.abi.stack_slot(self.next_stack - 1)
    }

    pub fn exhaust_integer(&mut self) {
        self.next_integer = self.abi.slot_count(self.integer_class);
    }

    pub fn exhaust_vector(&mut self) {
        self.next_vector = self.abi.slot_count(self.vector_class);
    }

    /// Register for a scalar of kind `ty`, or the next stack slot.
    pub fn scalar(&mut self, ty: Primitive) -> VMStorage {
        let register = if ty.is_float() {
            self.vector()
        } else {
            self.integer()
        };
        register.unwrap_or_else(|| self.stack())
    }
}

/// `(offset, size)` of each 8-byte piece of a `size`-byte aggregate.
pub(crate) fn eightbytes(size: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..size.div_ceil(8)).map(move |i| (i * 8, (size - i * 8).min(8)))
}

/// Integral type moving a `size`-byte piece of `layout`. Only 1, 2, 4 and
/// 8 byte pieces have one, so an aggregate whose size leaves a 3, 5, 6 or 7
/// byte tail (`{i16, i16, i16}`, `{i8; 5}`) does not link and is reported
/// as [`LinkError::UnsupportedLayout`].
pub(crate) fn integer_chunk(layout: &MemoryLayout, size: usize) -> Result<Primitive, LinkError> {
    Primitive::integral_for_size(size).ok_or_else(|| {
        LinkError::UnsupportedLayout(format!("{layout}: {size} byte piece"))
    })
}

pub(crate) fn float_chunk(layout: &MemoryLayout, size: usize) -> Result<Primitive, LinkError> {
    Primitive::float_for_size(size).ok_or_else(|| {
        LinkError::UnsupportedLayout(format!("{layout}: {size} byte float piece"))
    })
}

/// Every 8-byte piece of `layout` in consecutive stack slots.
pub(crate) fn stack_chunks(
    layout: &MemoryLayout,
    cursor: &mut StorageCursor,
) -> Result<Vec<Chunk>, LinkError> {
    eightbytes(layout.byte_size())
        .map(|(offset, size)| {
            Ok(Chunk {
                offset,
                ty: integer_chunk(layout, size)?,
                storage: cursor.stack(),
            })
        })
        .collect()
}

pub(crate) fn check_aggregate(layout: &MemoryLayout) -> Result<(), LinkError> {
    if layout.byte_size() == 0 {
        return Err(LinkError::UnsupportedLayout(format!("{layout}: empty aggregate")));
    }
    Ok(())
}

/// A scalar or address through one storage.
pub(crate) fn scalar_program(layout: &MemoryLayout, storage: VMStorage, unbox: bool) -> Bindings {
    let mut b = Bindings::with_capacity(2);
    match layout {
        MemoryLayout::Value(ty) => {
            b.move_to(storage, *ty);
        }
        _ if unbox => {
            b.box_address().move_to(storage, Primitive::I64);
        }
        _ => {
            b.move_to(storage, Primitive::I64).box_address();
        }
    }
    b
}

/// An aggregate split into `chunks`.
pub(crate) fn aggregate_program(layout: &MemoryLayout, chunks: &[Chunk], unbox: bool) -> Bindings {
    let mut b = Bindings::with_capacity(chunks.len() * 3 + 1);
    if unbox {
        for (i, chunk) in chunks.iter().enumerate() {
            if i + 1 < chunks.len() {
                b.dup();
            }
            b.dereference(chunk.offset, chunk.ty)
                .move_to(chunk.storage, chunk.ty);
        }
    } else {
        b.allocate(layout);
        for chunk in chunks {
            b.move_to(chunk.storage, chunk.ty)
                .dereference(chunk.offset, chunk.ty);
        }
    }
    b
}

/// An aggregate passed as a pointer to a private copy.
pub(crate) fn reference_program(layout: &MemoryLayout, storage: VMStorage, unbox: bool) -> Bindings {
    let mut b = Bindings::with_capacity(4);
    if unbox {
        b.copy(layout)
            .base_address()
            .box_address()
            .move_to(storage, Primitive::I64);
    } else {
        b.move_to(storage, Primitive::I64).box_address().copy(layout);
    }
    b
}
