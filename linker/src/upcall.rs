//! Native-to-managed call driver.

use std::fmt;
use std::sync::Arc;

use binding::{CallingSequence, Carrier};
use log::trace;

use crate::interpreter::{box_value, unbox};
use crate::{
    Address, BindingContext, BufferLayout, CallError, CallFrame, Segment, SpecializedUpcall, Value,
};

/// Managed code behind an upcall. Receives the boxed user arguments and
/// returns the result, [`Value::Void`] for void functions.
pub type UpcallTarget = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Runs a managed target against a frame filled by native code.
pub struct UpcallHandler {
    sequence: Arc<CallingSequence>,
    layout: Arc<BufferLayout>,
    target: UpcallTarget,
    specialized: Option<SpecializedUpcall>,
}

impl UpcallHandler {
    pub(crate) fn new(
        sequence: Arc<CallingSequence>,
        layout: Arc<BufferLayout>,
        target: UpcallTarget,
        specialized: Option<SpecializedUpcall>,
    ) -> Self {
        Self {
            sequence,
            layout,
            target,
            specialized,
        }
    }

    pub fn sequence(&self) -> &Arc<CallingSequence> {
        &self.sequence
    }

    pub fn layout(&self) -> &Arc<BufferLayout> {
        &self.layout
    }

    pub fn is_specialized(&self) -> bool {
        self.specialized.is_some()
    }

    /// What the target must return.
    fn expected_result(&self) -> Option<Carrier> {
        if self.sequence.is_indirect_result() {
            Some(Carrier::Segment)
        } else {
            self.sequence.signature().ret()
        }
    }

    pub fn invoke(&self, frame: &mut CallFrame) -> Result<(), CallError> {
        match &self.specialized {
            Some(specialized) => specialized.invoke(frame),
            None => self.interpret(frame),
        }
    }

    fn interpret(&self, frame: &mut CallFrame) -> Result<(), CallError> {
        let seq = &self.sequence;
        let mut ctx = BindingContext::new(seq.scratch_allocation_size());

        let result_address = match seq.indirect_result_bindings() {
            Some(pointer) => match box_value(pointer, &*frame, &mut ctx) {
                Value::Address(address) => Some(address),
                other => panic!("result pointer boxed as {other:?}"),
            },
            None => None,
        };
        let args: Vec<Value> = seq
            .user_arguments()
            .map(|program| box_value(program, &*frame, &mut ctx))
            .collect();

        trace!("upcall with {} argument(s)", args.len());
        let result = (self.target)(&args).map_err(CallError::Target)?;
        let expected = self.expected_result();
        if result.carrier() != expected {
            return Err(CallError::ResultType {
                expected,
                found: result.carrier(),
            });
        }
        check_result_len(&result, result_len(seq))?;

        match result_address {
            Some(address) => {
                let size = seq.indirect_result_size();
                let Value::Segment(returned) = &result else {
                    unreachable!()
                };
                // SAFETY: the caller reserved `size` bytes at `address` for
                // the result
                let destination = unsafe { Segment::global(address, size) };
                destination.copy_from(&returned.prefix(size));
                if seq.has_return_bindings() {
                    unbox(Value::Address(address), seq.return_bindings(), frame, &mut ctx);
                }
            }
            None if seq.has_return_bindings() => {
                unbox(result, seq.return_bindings(), frame, &mut ctx);
            }
            None => {}
        }
        ctx.close();
        Ok(())
    }
}

/// Bytes a segment result must cover.
pub(crate) fn result_len(sequence: &CallingSequence) -> usize {
    sequence.descriptor().ret().map_or(0, |layout| layout.byte_size())
}

pub(crate) fn check_result_len(result: &Value, needed: usize) -> Result<(), CallError> {
    match result {
        Value::Segment(segment) if segment.len() < needed => Err(CallError::ResultType {
            expected: Some(Carrier::Segment),
            found: Some(Carrier::Segment),
        }),
        _ => Ok(()),
    }
}

impl fmt::Debug for UpcallHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpcallHandler")
            .field("signature", self.sequence.signature())
            .field("specialized", &self.is_specialized())
            .finish()
    }
}

/// A managed function exposed at a native entry point.
#[derive(Debug, Clone)]
pub struct UpcallStub {
    entry: Address,
    handler: Arc<UpcallHandler>,
}

impl UpcallStub {
    pub(crate) fn new(entry: Address, handler: Arc<UpcallHandler>) -> Self {
        Self { entry, handler }
    }

    pub fn address(&self) -> Address {
        self.entry
    }

    pub fn handler(&self) -> &Arc<UpcallHandler> {
        &self.handler
    }

    /// The entry point as a managed argument value.
    pub fn as_value(&self) -> Value {
        Value::Address(self.entry)
    }
}
