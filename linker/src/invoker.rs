//! Managed-to-native call driver.

use std::fmt;
use std::sync::Arc;

use binding::{CallingSequence, Carrier};
use log::trace;

use crate::interpreter::{box_value, unbox};
use crate::{
    BindingContext, BufferLayout, CallError, CallFrame, DowncallStub, NativeError, Segment,
    SpecializedDowncall, Value,
};

/// A linked native function, callable from any thread.
pub struct DowncallHandle {
    name: String,
    sequence: Arc<CallingSequence>,
    layout: Arc<BufferLayout>,
    stub: Arc<dyn DowncallStub>,
    specialized: Option<SpecializedDowncall>,
    returns_indirect_address: bool,
}

impl DowncallHandle {
    pub(crate) fn new(
        name: String,
        sequence: Arc<CallingSequence>,
        layout: Arc<BufferLayout>,
        stub: Arc<dyn DowncallStub>,
        specialized: Option<SpecializedDowncall>,
        returns_indirect_address: bool,
    ) -> Self {
        Self {
            name,
            sequence,
            layout,
            stub,
            specialized,
            returns_indirect_address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
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

    /// Erased carrier of the result: the buffer segment for in-memory
    /// results, otherwise the return program's carrier.
    pub fn result_carrier(&self) -> Option<Carrier> {
        if self.sequence.is_indirect_result() {
            Some(Carrier::Segment)
        } else {
            self.sequence.signature().ret()
        }
    }

    /// A zeroed frame shaped for this call.
    pub fn new_frame(&self) -> CallFrame {
        CallFrame::new(self.layout.clone())
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, CallError> {
        let mut frame = self.new_frame();
        self.invoke_in(args, &mut frame)
    }

    /// Call using `frame` as register and stack image. The frame is left as
    /// the native side saw it on return.
    pub fn invoke_in(&self, args: &[Value], frame: &mut CallFrame) -> Result<Value, CallError> {
        self.check_arguments(args)?;
        match &self.specialized {
            Some(specialized) => Ok(specialized.invoke(args, frame)?),
            None => self.interpret(args, frame),
        }
    }

    /// Call through the interpreter even when a specialized form exists.
    pub fn interpret_in(&self, args: &[Value], frame: &mut CallFrame) -> Result<Value, CallError> {
        self.check_arguments(args)?;
        self.interpret(args, frame)
    }

    fn check_arguments(&self, args: &[Value]) -> Result<(), CallError> {
        let seq = &self.sequence;
        if args.len() != seq.user_argument_count() {
            return Err(CallError::ArgumentCount {
                expected: seq.user_argument_count(),
                found: args.len(),
            });
        }
        let skip = usize::from(seq.is_indirect_result());
        let expected = seq.signature().params()[skip..].iter();
        let layouts = seq.descriptor().args().iter();
        for (index, ((arg, carrier), layout)) in args.iter().zip(expected).zip(layouts).enumerate() {
            if arg.carrier() != Some(*carrier) {
                return Err(CallError::ArgumentType {
                    index,
                    expected: *carrier,
                    found: arg.carrier(),
                });
            }
            if let Value::Segment(segment) = arg
                && segment.len() < layout.byte_size()
            {
                return Err(CallError::SegmentTooSmall {
                    index,
                    expected: layout.byte_size(),
                    found: segment.len(),
                });
            }
        }
        Ok(())
    }

    fn interpret(&self, args: &[Value], frame: &mut CallFrame) -> Result<Value, CallError> {
        let seq = &self.sequence;
        let mut ctx = BindingContext::new(seq.scratch_allocation_size());

        let result_buffer = match seq.indirect_result_bindings() {
            Some(pointer) => {
                let alignment = seq
                    .descriptor()
                    .ret()
                    .map_or(8, |layout| layout.byte_alignment());
                // outlives the context: it is handed back as the result
                let buffer = Segment::allocate(seq.indirect_result_size(), alignment);
                unbox(Value::Address(buffer.address()), pointer, frame, &mut ctx);
                Some(buffer)
            }
            None => None,
        };
        for (arg, program) in args.iter().zip(seq.user_arguments()) {
            unbox(arg.clone(), program, frame, &mut ctx);
        }

        trace!("downcall {}", self.name);
        self.stub.invoke(frame)?;

        let returned = box_value(seq.return_bindings(), &*frame, &mut ctx);
        let result = match result_buffer {
            Some(buffer) => {
                if self.returns_indirect_address
                    && returned.as_address() != Some(buffer.address())
                {
                    return Err(CallError::Native(NativeError::new(format!(
                        "{} returned {returned} instead of its result buffer {}",
                        self.name,
                        buffer.address()
                    ))));
                }
                Value::Segment(buffer)
            }
            None => detach(returned),
        };
        ctx.close();
        Ok(result)
    }
}

/// Move a context segment into owned memory so it survives the call.
fn detach(value: Value) -> Value {
    match value {
        Value::Segment(segment) => Value::Segment(segment.to_owned_segment()),
        other => other,
    }
}

impl fmt::Debug for DowncallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DowncallHandle")
            .field("name", &self.name)
            .field("signature", self.sequence.signature())
            .field("specialized", &self.is_specialized())
            .finish()
    }
}
