//! AArch64 AAPCS64 argument classification.

use binding::{
    Bindings, CallDirection, CallingSequence, CallingSequenceBuilder, FunctionDescriptor,
    MemoryLayout, Primitive,
};
use log::debug;

use crate::arranger::{
    Chunk, StorageCursor, aggregate_program, check_aggregate, eightbytes, integer_chunk,
    reference_program, scalar_program, stack_chunks,
};
use crate::{AbiDescriptor, CallArranger, LinkError};

const MAX_REGISTER_AGGREGATE: usize = 16;
const MAX_HFA_MEMBERS: usize = 4;

/// Member kind and count of a homogeneous floating-point aggregate.
fn homogeneous_float(layout: &MemoryLayout) -> Option<(Primitive, usize)> {
    let fields = layout.scalar_fields();
    let first = fields.first()?.primitive;
    let homogeneous = first.is_float()
        && fields.len() <= MAX_HFA_MEMBERS
        && fields.iter().all(|f| f.primitive == first)
        && fields.len() * first.byte_size() == layout.byte_size();
    homogeneous.then_some((first, fields.len()))
}

fn hfa_chunks(
    layout: &MemoryLayout,
    ty: Primitive,
    storages: impl Iterator<Item = binding::VMStorage>,
) -> Vec<Chunk> {
    layout
        .scalar_fields()
        .iter()
        .zip(storages)
        .map(|(field, storage)| Chunk {
            offset: field.offset,
            ty,
            storage,
        })
        .collect()
}

fn integer_chunks(
    layout: &MemoryLayout,
    mut storage: impl FnMut() -> binding::VMStorage,
) -> Result<Vec<Chunk>, LinkError> {
    eightbytes(layout.byte_size())
        .map(|(offset, len)| {
            Ok(Chunk {
                offset,
                ty: integer_chunk(layout, len)?,
                storage: storage(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AArch64CallArranger;

impl AArch64CallArranger {
    fn argument(
        &self,
        layout: &MemoryLayout,
        cursor: &mut StorageCursor,
        unbox: bool,
    ) -> Result<Bindings, LinkError> {
        match layout {
            MemoryLayout::Value(ty) => return Ok(scalar_program(layout, cursor.scalar(*ty), unbox)),
            MemoryLayout::Address => {
                let storage = cursor.integer().unwrap_or_else(|| cursor.stack());
                return Ok(scalar_program(layout, storage, unbox));
            }
            _ => check_aggregate(layout)?,
        }

        if let Some((ty, count)) = homogeneous_float(layout) {
            let chunks = if count <= cursor.remaining_vector() {
                let storages: Vec<_> = (0..count).filter_map(|_| cursor.vector()).collect();
                hfa_chunks(layout, ty, storages.into_iter())
            } else {
                cursor.exhaust_vector();
                stack_chunks(layout, cursor)?
            };
            return Ok(aggregate_program(layout, &chunks, unbox));
        }

        let size = layout.byte_size();
        if size > MAX_REGISTER_AGGREGATE {
            let storage = cursor.integer().unwrap_or_else(|| cursor.stack());
            return Ok(reference_program(layout, storage, unbox));
        }

        let pieces = size.div_ceil(8);
        let chunks = if pieces <= cursor.remaining_integer() {
            integer_chunks(layout, || {
                cursor.integer().unwrap_or_else(|| unreachable!())
            })?
        } else {
            cursor.exhaust_integer();
            stack_chunks(layout, cursor)?
        };
        Ok(aggregate_program(layout, &chunks, unbox))
    }

    /// Register return, or `None` if the result is returned in memory.
    fn register_return(
        &self,
        layout: &MemoryLayout,
        unbox: bool,
    ) -> Result<Option<Bindings>, LinkError> {
        let abi = self.abi();
        let mut cursor = StorageCursor::returns(abi);
        match layout {
            MemoryLayout::Value(ty) => {
                return Ok(Some(scalar_program(layout, cursor.scalar(*ty), unbox)));
            }
            MemoryLayout::Address => {
                return Ok(Some(scalar_program(layout, abi.integer_return(0), unbox)));
            }
            _ => check_aggregate(layout)?,
        }
        if let Some((ty, count)) = homogeneous_float(layout) {
            let storages = (0..count).map(|i| abi.vector_return(i));
            let chunks = hfa_chunks(layout, ty, storages);
            return Ok(Some(aggregate_program(layout, &chunks, unbox)));
        }
        if layout.byte_size() > MAX_REGISTER_AGGREGATE {
            return Ok(None);
        }
        let chunks = integer_chunks(layout, || {
            cursor.integer().unwrap_or_else(|| unreachable!())
        })?;
        Ok(Some(aggregate_program(layout, &chunks, unbox)))
    }
}

impl CallArranger for AArch64CallArranger {
    fn abi(&self) -> &'static AbiDescriptor {
        AbiDescriptor::aarch64()
    }

    fn arrange(
        &self,
        descriptor: &FunctionDescriptor,
        direction: CallDirection,
    ) -> Result<CallingSequence, LinkError> {
        let abi = self.abi();
        let mut builder = CallingSequenceBuilder::new(direction);
        let mut cursor = StorageCursor::arguments(abi);

        if let Some(ret) = descriptor.ret() {
            match self.register_return(ret, direction.unboxes_return())? {
                Some(program) => {
                    builder.set_return_bindings(ret.carrier(), ret, program)?;
                }
                None => {
                    // x8 carries the result address and nothing comes back.
                    let Some(x8) = abi.indirect_result_storage() else {
                        return Err(LinkError::UnsupportedLayout(format!(
                            "{} has no indirect result register",
                            abi.name
                        )));
                    };
                    builder.mark_indirect_result(
                        ret,
                        scalar_program(&MemoryLayout::Address, x8, direction.unboxes_arguments()),
                    );
                }
            }
        }

        for layout in descriptor.args() {
            let program = self.argument(layout, &mut cursor, direction.unboxes_arguments())?;
            builder.add_argument_bindings(layout.carrier(), layout, program);
        }

        let sequence = builder.build();
        debug!("arranged {} {descriptor}:\n{sequence}", abi.name);
        Ok(sequence)
    }
}
