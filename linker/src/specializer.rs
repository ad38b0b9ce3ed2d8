//! Ahead-of-time compilation of simple calling sequences.
//!
//! Each program of an eligible sequence becomes one composed closure: the
//! filter steps (`Dereference`, `BaseAddress`, `BoxAddress`) wrapped around a
//! sink or source bound to a fixed frame offset, with the slot encoder picked
//! from the per-primitive table once. The closures for all arguments, the
//! target and the return are then merged into a single callable. Eligible
//! programs never allocate, so no binding context is involved.

use std::fmt;
use std::sync::Arc;

use binding::{Binding, CallDirection, CallingSequence, Primitive, VMStorage};

use crate::upcall::{check_result_len, result_len};
use crate::value::{decoder, encoder};
use crate::{
    AbiDescriptor, Address, BufferLayout, CallError, CallFrame, DowncallStub, LinkerSettings,
    NativeError, UpcallTarget, Value, is_direct_storage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramPosition {
    Argument(usize),
    Return,
}

impl fmt::Display for ProgramPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(i) => write!(f, "argument {i}"),
            Self::Return => f.write_str("return"),
        }
    }
}

/// Why a sequence stays on the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    Disabled(CallDirection),
    IndirectResult,
    TooManyArguments {
        count: usize,
        max: usize,
    },
    MoveCount {
        position: ProgramPosition,
        count: usize,
    },
    IndirectStorage {
        position: ProgramPosition,
        storage: VMStorage,
        size: usize,
    },
    Step {
        position: ProgramPosition,
        binding: Binding,
    },
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled(direction) => write!(f, "{direction} specialization disabled"),
            Self::IndirectResult => f.write_str("result is returned in memory"),
            Self::TooManyArguments { count, max } => {
                write!(f, "{count} arguments, at most {max} can be direct")
            }
            Self::MoveCount { position, count } => {
                write!(f, "{position} binds through {count} storages")
            }
            Self::IndirectStorage {
                position,
                storage,
                size,
            } => write!(f, "{position}: {size} bytes through {storage} is not direct"),
            Self::Step { position, binding } => write!(f, "{position}: {binding} needs the interpreter"),
        }
    }
}

fn check_program(
    position: ProgramPosition,
    bindings: &[Binding],
    aggregate_size: usize,
) -> Result<(), Ineligible> {
    let mut moves = 0;
    for binding in bindings {
        match *binding {
            Binding::Move { storage, .. } => {
                moves += 1;
                if !is_direct_storage(storage, aggregate_size) {
                    return Err(Ineligible::IndirectStorage {
                        position,
                        storage,
                        size: aggregate_size,
                    });
                }
            }
            Binding::Dereference { .. } | Binding::BaseAddress | Binding::BoxAddress => {}
            Binding::Copy { .. } | Binding::AllocateBuffer { .. } | Binding::Dup => {
                return Err(Ineligible::Step {
                    position,
                    binding: *binding,
                });
            }
        }
    }
    if moves != 1 {
        return Err(Ineligible::MoveCount {
            position,
            count: moves,
        });
    }
    Ok(())
}

/// Decide whether `sequence` can be specialized under `abi`.
pub fn check_eligibility(
    sequence: &CallingSequence,
    abi: &AbiDescriptor,
    settings: &LinkerSettings,
) -> Result<(), Ineligible> {
    let direction = sequence.direction();
    let enabled = match direction {
        CallDirection::Downcall => settings.specialize_downcalls,
        CallDirection::Upcall => settings.specialize_upcalls,
    };
    if !enabled {
        return Err(Ineligible::Disabled(direction));
    }
    if sequence.is_indirect_result() {
        return Err(Ineligible::IndirectResult);
    }
    let max = abi.max_direct_arguments(direction);
    if sequence.argument_count() > max {
        return Err(Ineligible::TooManyArguments {
            count: sequence.argument_count(),
            max,
        });
    }
    let descriptor = sequence.descriptor();
    for (i, (program, layout)) in sequence.arguments().zip(descriptor.args()).enumerate() {
        check_program(ProgramPosition::Argument(i), program, layout.byte_size())?;
    }
    if let Some(ret) = descriptor.ret() {
        check_program(ProgramPosition::Return, sequence.return_bindings(), ret.byte_size())?;
    }
    Ok(())
}

type Filter = Box<dyn Fn(Value) -> Value + Send + Sync>;
type Sink = Box<dyn Fn(Value, &mut CallFrame) + Send + Sync>;
type Source = Box<dyn Fn(&CallFrame) -> Value + Send + Sync>;

fn segment_of(value: Value) -> crate::Segment {
    match value {
        Value::Segment(s) => s,
        other => panic!("expected segment, found {other:?}"),
    }
}

fn unbox_filter(binding: Binding) -> Option<Filter> {
    Some(match binding {
        Binding::Dereference { offset, ty } => {
            Box::new(move |v| segment_of(v).get(ty, offset))
        }
        Binding::BaseAddress => Box::new(|v| Value::Address(segment_of(v).address())),
        Binding::BoxAddress => Box::new(|v| match v {
            Value::Address(a) => Value::I64(a.bits() as i64),
            other => panic!("expected address, found {other:?}"),
        }),
        _ => return None,
    })
}

fn box_filter(binding: Binding) -> Option<Filter> {
    Some(match binding {
        Binding::BoxAddress => Box::new(|v| match v {
            Value::I64(bits) => Value::Address(Address::new(bits as u64)),
            other => panic!("expected i64, found {other:?}"),
        }),
        _ => return None,
    })
}

fn sink(offset: usize, ty: Primitive) -> Sink {
    let encode = encoder(ty);
    Box::new(move |value, frame| frame.write_word(offset, encode(&value)))
}

fn source(offset: usize, ty: Primitive) -> Source {
    let decode = decoder(ty);
    Box::new(move |frame| decode(frame.read_word(offset)))
}

/// Fold the filters in front of the trailing `Move` into its sink.
fn compile_unbox(
    position: ProgramPosition,
    bindings: &[Binding],
    layout: &BufferLayout,
) -> Result<Sink, Ineligible> {
    let shape = |binding: &Binding| Ineligible::Step {
        position,
        binding: *binding,
    };
    let Some((last, filters)) = bindings.split_last() else {
        return Err(Ineligible::MoveCount { position, count: 0 });
    };
    let Binding::Move { storage, ty } = *last else {
        return Err(shape(last));
    };
    let mut composed = sink(layout.offset(storage), ty);
    for binding in filters.iter().rev() {
        let filter = unbox_filter(*binding).ok_or_else(|| shape(binding))?;
        let next = composed;
        composed = Box::new(move |v, frame| next(filter(v), frame));
    }
    Ok(composed)
}

/// Fold the filters after the leading `Move` onto its source.
fn compile_box(
    position: ProgramPosition,
    bindings: &[Binding],
    layout: &BufferLayout,
) -> Result<Source, Ineligible> {
    let shape = |binding: &Binding| Ineligible::Step {
        position,
        binding: *binding,
    };
    let Some((first, filters)) = bindings.split_first() else {
        return Err(Ineligible::MoveCount { position, count: 0 });
    };
    let Binding::Move { storage, ty } = *first else {
        return Err(shape(first));
    };
    let mut composed = source(layout.offset(storage), ty);
    for binding in filters {
        let filter = box_filter(*binding).ok_or_else(|| shape(binding))?;
        let prev = composed;
        composed = Box::new(move |frame| filter(prev(frame)));
    }
    Ok(composed)
}

type DowncallFn = dyn Fn(&[Value], &mut CallFrame) -> Result<Value, NativeError> + Send + Sync;
type UpcallFn = dyn Fn(&mut CallFrame) -> Result<(), CallError> + Send + Sync;

/// A downcall compiled into one callable.
pub struct SpecializedDowncall {
    call: Box<DowncallFn>,
}

impl SpecializedDowncall {
    /// Arguments must already match the signature.
    pub fn invoke(&self, args: &[Value], frame: &mut CallFrame) -> Result<Value, NativeError> {
        (self.call)(args, frame)
    }
}

impl fmt::Debug for SpecializedDowncall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpecializedDowncall")
    }
}

/// An upcall compiled into one callable.
pub struct SpecializedUpcall {
    call: Box<UpcallFn>,
}

impl SpecializedUpcall {
    pub fn invoke(&self, frame: &mut CallFrame) -> Result<(), CallError> {
        (self.call)(frame)
    }
}

impl fmt::Debug for SpecializedUpcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpecializedUpcall")
    }
}

/// Compiles eligible sequences for one ABI.
#[derive(Debug, Clone, Copy)]
pub struct Specializer<'a> {
    abi: &'a AbiDescriptor,
    settings: &'a LinkerSettings,
}

impl<'a> Specializer<'a> {
    pub fn new(abi: &'a AbiDescriptor, settings: &'a LinkerSettings) -> Self {
        Self { abi, settings }
    }

    pub fn check(&self, sequence: &CallingSequence) -> Result<(), Ineligible> {
        check_eligibility(sequence, self.abi, self.settings)
    }

    pub fn downcall(
        &self,
        sequence: &CallingSequence,
        layout: &BufferLayout,
        target: Arc<dyn DowncallStub>,
    ) -> Result<SpecializedDowncall, Ineligible> {
        self.check(sequence)?;
        let sinks = sequence
            .arguments()
            .enumerate()
            .map(|(i, program)| compile_unbox(ProgramPosition::Argument(i), program, layout))
            .collect::<Result<Vec<_>, _>>()?;
        let collect: Source = if sequence.has_return_bindings() {
            compile_box(ProgramPosition::Return, sequence.return_bindings(), layout)?
        } else {
            Box::new(|_| Value::Void)
        };

        let spread = move |args: &[Value], frame: &mut CallFrame| {
            for (sink, arg) in sinks.iter().zip(args) {
                sink(arg.clone(), frame);
            }
        };
        Ok(SpecializedDowncall {
            call: Box::new(move |args, frame| {
                spread(args, frame);
                target.invoke(frame)?;
                Ok(collect(frame))
            }),
        })
    }

    pub fn upcall(
        &self,
        sequence: &CallingSequence,
        layout: &BufferLayout,
        target: UpcallTarget,
    ) -> Result<SpecializedUpcall, Ineligible> {
        self.check(sequence)?;
        let sources = sequence
            .arguments()
            .enumerate()
            .map(|(i, program)| compile_box(ProgramPosition::Argument(i), program, layout))
            .collect::<Result<Vec<_>, _>>()?;
        let deliver: Option<Sink> = if sequence.has_return_bindings() {
            Some(compile_unbox(
                ProgramPosition::Return,
                sequence.return_bindings(),
                layout,
            )?)
        } else {
            None
        };
        let expected = sequence.signature().ret();
        let needed = result_len(sequence);

        let gather = move |frame: &CallFrame| -> Vec<Value> {
            sources.iter().map(|source| source(frame)).collect()
        };
        Ok(SpecializedUpcall {
            call: Box::new(move |frame| {
                let args = gather(frame);
                let result = target(&args).map_err(CallError::Target)?;
                if result.carrier() != expected {
                    return Err(CallError::ResultType {
                        expected,
                        found: result.carrier(),
                    });
                }
                check_result_len(&result, needed)?;
                if let Some(deliver) = &deliver {
                    deliver(result, frame);
                }
                Ok(())
            }),
        })
    }
}
