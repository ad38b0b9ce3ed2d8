//! Generic execution of binding programs.
//!
//! Works for every program that passes verification and serves as the
//! reference for the specializer. A malformed program or a value of the wrong
//! kind is a defect in sequence generation and panics.

use binding::Binding;
use log::trace;

use crate::{Address, BindingContext, Segment, StorageAccess, Value};

struct ValueStack {
    values: Vec<Value>,
}

impl ValueStack {
    fn new() -> Self {
        Self {
            values: Vec::with_capacity(4),
        }
    }

    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn pop(&mut self, binding: &Binding) -> Value {
        self.values
            .pop()
            .unwrap_or_else(|| panic!("{binding}: value stack underflow"))
    }

    fn pop_segment(&mut self, binding: &Binding) -> Segment {
        match self.pop(binding) {
            Value::Segment(s) => s,
            other => panic!("{binding}: expected segment, found {other:?}"),
        }
    }

    fn pop_address(&mut self, binding: &Binding) -> Address {
        match self.pop(binding) {
            Value::Address(a) => a,
            other => panic!("{binding}: expected address, found {other:?}"),
        }
    }

    fn dup(&mut self, binding: &Binding) {
        let top = self
            .values
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("{binding}: value stack underflow"));
        self.values.push(top);
    }
}

/// Move `value` into native storage as described by `bindings`.
pub fn unbox(
    value: Value,
    bindings: &[Binding],
    storage: &mut dyn StorageAccess,
    ctx: &mut BindingContext,
) {
    let mut stack = ValueStack::new();
    stack.push(value);
    for binding in bindings {
        trace!("unbox {binding}");
        match *binding {
            Binding::Move { storage: slot, ty } => {
                let value = stack.pop(binding);
                assert_eq!(value.primitive(), Some(ty), "{binding}: wrong value kind");
                storage.write(slot, value.to_slot_bits());
            }
            Binding::Dereference { offset, ty } => {
                let segment = stack.pop_segment(binding);
                stack.push(segment.get(ty, offset));
            }
            Binding::Copy { size, alignment } => {
                let source = stack.pop_segment(binding);
                let copy = ctx.allocate(size, alignment);
                copy.copy_from(&source.prefix(size));
                stack.push(Value::Segment(copy));
            }
            Binding::AllocateBuffer { size, alignment } => {
                stack.push(Value::Segment(ctx.allocate(size, alignment)));
            }
            Binding::BoxAddress => {
                let address = stack.pop_address(binding);
                stack.push(Value::I64(address.bits() as i64));
            }
            Binding::BaseAddress => {
                let segment = stack.pop_segment(binding);
                stack.push(Value::Address(segment.address()));
            }
            Binding::Dup => stack.dup(binding),
        }
    }
    assert!(
        stack.values.is_empty(),
        "unbox left {} value(s) on the stack",
        stack.values.len()
    );
}

/// Rebuild a managed value from native storage as described by `bindings`.
pub fn box_value(
    bindings: &[Binding],
    storage: &dyn StorageAccess,
    ctx: &mut BindingContext,
) -> Value {
    let mut stack = ValueStack::new();
    for binding in bindings {
        trace!("box {binding}");
        match *binding {
            Binding::Move { storage: slot, ty } => {
                stack.push(Value::from_slot_bits(ty, storage.read(slot)));
            }
            Binding::Dereference { offset, .. } => {
                let value = stack.pop(binding);
                let segment = stack.pop_segment(binding);
                segment.set(offset, &value);
                stack.push(Value::Segment(segment));
            }
            Binding::Copy { size, alignment } => {
                let address = stack.pop_address(binding);
                // SAFETY: the native side guarantees `size` readable bytes at
                // an address it passes by reference
                let source = unsafe { Segment::global(address, size) };
                let copy = ctx.allocate(size, alignment);
                copy.copy_from(&source);
                stack.push(Value::Segment(copy));
            }
            Binding::AllocateBuffer { size, alignment } => {
                stack.push(Value::Segment(ctx.allocate(size, alignment)));
            }
            Binding::BoxAddress => match stack.pop(binding) {
                Value::I64(bits) => stack.push(Value::Address(Address::new(bits as u64))),
                other => panic!("{binding}: expected i64, found {other:?}"),
            },
            Binding::BaseAddress => {
                let segment = stack.pop_segment(binding);
                stack.push(Value::Address(segment.address()));
            }
            Binding::Dup => stack.dup(binding),
        }
    }
    let result = stack.values.pop().unwrap_or(Value::Void);
    assert!(
        stack.values.is_empty(),
        "box left {} extra value(s) on the stack",
        stack.values.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AbiDescriptor, BufferLayout, CallFrame};
    use binding::{Bindings, MemoryLayout, Primitive};
    use std::sync::Arc;

    fn sysv_frame() -> CallFrame {
        let abi = AbiDescriptor::x86_64_sysv();
        CallFrame::new(Arc::new(BufferLayout::with_stack_slots(abi, 2)))
    }

    #[test]
    fn move_writes_exactly_one_slot() {
        let abi = AbiDescriptor::x86_64_sysv();
        let mut frame = sysv_frame();
        let mut ctx = BindingContext::new(0);
        let mut b = Bindings::new();
        b.move_to(abi.integer_argument(0), Primitive::I64);

        unbox(Value::I64(42), b.as_slice(), &mut frame, &mut ctx);

        assert_eq!(frame.int_arg(0), 42);
        let written = frame.words().iter().filter(|w| **w != 0).count();
        assert_eq!(written, 1);
        assert_eq!(ctx.chunk_count(), 0);
    }

    #[test]
    fn split_struct_writes_two_registers() {
        let abi = AbiDescriptor::x86_64_sysv();
        let layout = MemoryLayout::structure([
            MemoryLayout::value(Primitive::I64),
            MemoryLayout::value(Primitive::I64),
        ]);
        let seg = Segment::allocate(16, 8);
        seg.set(0, &Value::I64(7));
        seg.set(8, &Value::I64(-9));

        let mut b = Bindings::new();
        b.dup()
            .dereference(0, Primitive::I64)
            .move_to(abi.integer_argument(0), Primitive::I64)
            .dereference(8, Primitive::I64)
            .move_to(abi.integer_argument(1), Primitive::I64);
        binding::verify_unbox(b.as_slice(), layout.carrier(), &layout).unwrap();

        let mut frame = sysv_frame();
        let mut ctx = BindingContext::new(0);
        unbox(Value::Segment(seg), b.as_slice(), &mut frame, &mut ctx);
        assert_eq!(frame.int_arg(0), 7);
        assert_eq!(frame.int_arg(1), -9);
    }

    #[test]
    fn aggregate_round_trip() {
        let abi = AbiDescriptor::x86_64_sysv();
        let layout = MemoryLayout::structure([
            MemoryLayout::value(Primitive::I32),
            MemoryLayout::value(Primitive::F32),
            MemoryLayout::value(Primitive::F64),
        ]);
        let seg = Segment::allocate(16, 8);
        seg.set(0, &Value::I32(5));
        seg.set(4, &Value::F32(0.25));
        seg.set(8, &Value::F64(-8.5));

        let (first, second) = (abi.integer_argument(0), abi.vector_argument(0));
        let mut out = Bindings::new();
        out.dup()
            .dereference(0, Primitive::I64)
            .move_to(first, Primitive::I64)
            .dereference(8, Primitive::F64)
            .move_to(second, Primitive::F64);
        let mut back = Bindings::new();
        back.allocate(&layout)
            .move_to(first, Primitive::I64)
            .dereference(0, Primitive::I64)
            .move_to(second, Primitive::F64)
            .dereference(8, Primitive::F64);

        let mut frame = sysv_frame();
        let mut ctx = BindingContext::new(16);
        unbox(Value::Segment(seg.clone()), out.as_slice(), &mut frame, &mut ctx);
        let echoed = box_value(back.as_slice(), &frame, &mut ctx);

        let echoed = echoed.as_segment().unwrap();
        assert_eq!(echoed.to_bytes(), seg.to_bytes());
        assert_eq!(echoed.get(Primitive::F32, 4), Value::F32(0.25));
    }

    #[test]
    fn copy_by_reference_round_trip() {
        let abi = AbiDescriptor::aarch64();
        let layout = MemoryLayout::sequence(MemoryLayout::value(Primitive::I64), 3);
        let seg = Segment::allocate(24, 8);
        for i in 0..3 {
            seg.set(i * 8, &Value::I64(i as i64 + 100));
        }
        let x0 = abi.integer_argument(0);
        let mut out = Bindings::new();
        out.copy(&layout).base_address().box_address().move_to(x0, Primitive::I64);
        let mut back = Bindings::new();
        back.move_to(x0, Primitive::I64).box_address().copy(&layout);

        let mut frame = CallFrame::new(Arc::new(BufferLayout::with_stack_slots(abi, 0)));
        let mut ctx = BindingContext::new(48);
        unbox(Value::Segment(seg.clone()), out.as_slice(), &mut frame, &mut ctx);
        assert_ne!(frame.pointer_arg(0), seg.address());

        let echoed = box_value(back.as_slice(), &frame, &mut ctx);
        assert_eq!(echoed.as_segment().unwrap().to_bytes(), seg.to_bytes());
        assert_eq!(ctx.allocated(), 48);
    }

    #[test]
    fn empty_box_program_is_void() {
        let frame = sysv_frame();
        let mut ctx = BindingContext::new(0);
        assert_eq!(box_value(&[], &frame, &mut ctx), Value::Void);
    }

    #[test]
    #[should_panic(expected = "outside segment")]
    fn dereference_past_end_panics() {
        let abi = AbiDescriptor::x86_64_sysv();
        let mut b = Bindings::new();
        b.dereference(8, Primitive::I64)
            .move_to(abi.integer_argument(0), Primitive::I64);
        let mut frame = sysv_frame();
        let mut ctx = BindingContext::new(0);
        unbox(Value::Segment(Segment::allocate(8, 8)), b.as_slice(), &mut frame, &mut ctx);
    }
}
