//! x86-64 System V argument classification.

use binding::{
    Bindings, CallDirection, CallingSequence, CallingSequenceBuilder, Carrier, FunctionDescriptor,
    MemoryLayout,
};
use log::debug;

use crate::arranger::{
    Chunk, StorageCursor, aggregate_program, check_aggregate, eightbytes, float_chunk,
    integer_chunk, scalar_program, stack_chunks,
};
use crate::{AbiDescriptor, CallArranger, LinkError};

const MAX_REGISTER_AGGREGATE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EightbyteClass {
    Integer,
    Sse,
}

/// `None` when the aggregate is classified MEMORY.
fn classify(
    layout: &MemoryLayout,
) -> Result<Option<Vec<(usize, usize, EightbyteClass)>>, LinkError> {
    check_aggregate(layout)?;
    let size = layout.byte_size();
    if size > MAX_REGISTER_AGGREGATE {
        return Ok(None);
    }
    let fields = layout.scalar_fields();
    if fields
        .iter()
        .any(|f| f.offset % f.primitive.byte_size() != 0)
    {
        return Ok(None);
    }
    let classes = eightbytes(size)
        .map(|(offset, len)| {
            let mut inside = fields
                .iter()
                .filter(|f| f.offset >= offset && f.offset < offset + 8)
                .peekable();
            let sse = inside.peek().is_some() && inside.all(|f| f.primitive.is_float());
            let class = if sse {
                EightbyteClass::Sse
            } else {
                EightbyteClass::Integer
            };
            (offset, len, class)
        })
        .collect();
    Ok(Some(classes))
}

fn chunk_type(
    layout: &MemoryLayout,
    len: usize,
    class: EightbyteClass,
) -> Result<binding::Primitive, LinkError> {
    match class {
        EightbyteClass::Integer => integer_chunk(layout, len),
        EightbyteClass::Sse => float_chunk(layout, len),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SysVCallArranger;

impl SysVCallArranger {
    fn argument(
        &self,
        layout: &MemoryLayout,
        cursor: &mut StorageCursor,
        unbox: bool,
    ) -> Result<Bindings, LinkError> {
        if let MemoryLayout::Value(ty) = layout {
            return Ok(scalar_program(layout, cursor.scalar(*ty), unbox));
        }
        if let MemoryLayout::Address = layout {
            let storage = cursor.integer().unwrap_or_else(|| cursor.stack());
            return Ok(scalar_program(layout, storage, unbox));
        }

        let chunks = match classify(layout)? {
            Some(classes) => {
                let ints = classes
                    .iter()
                    .filter(|c| c.2 == EightbyteClass::Integer)
                    .count();
                let sses = classes.len() - ints;
                if ints <= cursor.remaining_integer() && sses <= cursor.remaining_vector() {
                    classes
                        .iter()
                        .map(|&(offset, len, class)| {
                            let storage = match class {
                                EightbyteClass::Integer => cursor.integer(),
                                EightbyteClass::Sse => cursor.vector(),
                            };
                            Ok(Chunk {
                                offset,
                                ty: chunk_type(layout, len, class)?,
                                storage: storage.unwrap_or_else(|| unreachable!()),
                            })
                        })
                        .collect::<Result<Vec<_>, LinkError>>()?
                } else {
                    stack_chunks(layout, cursor)?
                }
            }
            None => stack_chunks(layout, cursor)?,
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
            MemoryLayout::Value(ty) => Ok(Some(scalar_program(layout, cursor.scalar(*ty), unbox))),
            MemoryLayout::Address => Ok(Some(scalar_program(layout, abi.integer_return(0), unbox))),
            _ => {
                let Some(classes) = classify(layout)? else {
                    return Ok(None);
                };
                let chunks = classes
                    .into_iter()
                    .map(|(offset, len, class)| {
                        let storage = match class {
                            EightbyteClass::Integer => cursor.integer(),
                            EightbyteClass::Sse => cursor.vector(),
                        };
                        Ok(Chunk {
                            offset,
                            ty: chunk_type(layout, len, class)?,
                            storage: storage.unwrap_or_else(|| unreachable!()),
                        })
                    })
                    .collect::<Result<Vec<_>, LinkError>>()?;
                Ok(Some(aggregate_program(layout, &chunks, unbox)))
            }
        }
    }
}

impl CallArranger for SysVCallArranger {
    fn abi(&self) -> &'static AbiDescriptor {
        AbiDescriptor::x86_64_sysv()
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
                    // Hidden pointer in the first integer register; the callee
                    // hands it back in rax.
                    let pointer = cursor.integer().unwrap_or_else(|| unreachable!());
                    builder.mark_indirect_result(
                        ret,
                        scalar_program(&MemoryLayout::Address, pointer, direction.unboxes_arguments()),
                    );
                    builder.set_return_bindings(
                        Carrier::Address,
                        &MemoryLayout::Address,
                        scalar_program(
                            &MemoryLayout::Address,
                            abi.integer_return(0),
                            direction.unboxes_return(),
                        ),
                    )?;
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
