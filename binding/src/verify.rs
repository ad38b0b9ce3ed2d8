//! Stack-type simulation of binding programs.
//!
//! A program is checked against the carrier it consumes (unbox) or produces
//! (box) and the layout describing that carrier's memory. Segment bounds are
//! tracked so a `Dereference` past the end of its buffer is caught here
//! instead of at call time.

use crate::{Binding, BindingError, Carrier, MemoryLayout, Primitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Value(Primitive),
    Address,
    /// A buffer of the given byte length.
    Segment(usize),
}

impl Slot {
    fn of(carrier: Carrier, layout: &MemoryLayout) -> Self {
        match carrier {
            Carrier::Primitive(p) => Slot::Value(p),
            Carrier::Address => Slot::Address,
            Carrier::Segment => Slot::Segment(layout.byte_size()),
        }
    }

    fn matches(self, carrier: Carrier) -> bool {
        match (self, carrier) {
            (Slot::Value(a), Carrier::Primitive(b)) => a == b,
            (Slot::Address, Carrier::Address) => true,
            (Slot::Segment(_), Carrier::Segment) => true,
            _ => false,
        }
    }

    fn describe(self) -> String {
        match self {
            Slot::Value(p) => p.to_string(),
            Slot::Address => "address".to_string(),
            Slot::Segment(len) => format!("segment[{len}]"),
        }
    }
}

struct Simulator<'a> {
    stack: Vec<Slot>,
    bindings: &'a [Binding],
    position: usize,
}

impl<'a> Simulator<'a> {
    fn new(bindings: &'a [Binding], initial: Option<Slot>) -> Self {
        Self {
            stack: initial.into_iter().collect(),
            bindings,
            position: 0,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> BindingError {
        BindingError::verification(
            self.position,
            self.bindings.get(self.position).copied(),
            reason,
        )
    }

    fn pop(&mut self) -> Result<Slot, BindingError> {
        self.stack.pop().ok_or_else(|| self.fail("stack underflow"))
    }

    fn pop_value(&mut self, ty: Primitive) -> Result<(), BindingError> {
        match self.pop()? {
            Slot::Value(p) if p == ty => Ok(()),
            other => Err(self.fail(format!(
                "expected {ty}, found {}",
                other.describe()
            ))),
        }
    }

    fn pop_segment(&mut self) -> Result<usize, BindingError> {
        match self.pop()? {
            Slot::Segment(len) => Ok(len),
            other => Err(self.fail(format!(
                "expected segment, found {}",
                other.describe()
            ))),
        }
    }

    fn pop_address(&mut self) -> Result<(), BindingError> {
        match self.pop()? {
            Slot::Address => Ok(()),
            other => Err(self.fail(format!(
                "expected address, found {}",
                other.describe()
            ))),
        }
    }

    fn check_field(
        &self,
        len: usize,
        offset: usize,
        ty: Primitive,
    ) -> Result<(), BindingError> {
        if offset + ty.byte_size() > len {
            return Err(self.fail(format!(
                "field {ty} at +{offset} exceeds segment of {len} bytes"
            )));
        }
        Ok(())
    }

    fn check_slot_width(
        &self,
        binding: &Binding,
    ) -> Result<(), BindingError> {
        if let Binding::Move { storage, ty } = binding
            && ty.byte_size() > storage.size()
        {
            return Err(self.fail(format!(
                "{ty} does not fit {} byte storage",
                storage.size()
            )));
        }
        Ok(())
    }

    fn unbox_step(&mut self, binding: Binding) -> Result<(), BindingError> {
        self.check_slot_width(&binding)?;
        match binding {
            Binding::Move { ty, .. } => self.pop_value(ty)?,
            Binding::Dereference { offset, ty } => {
                let len = self.pop_segment()?;
                self.check_field(len, offset, ty)?;
                self.stack.push(Slot::Value(ty));
            }
            Binding::Copy { size, .. } => {
                let len = self.pop_segment()?;
                if size > len {
                    return Err(self.fail(format!(
                        "copy of {size} bytes from segment of {len}"
                    )));
                }
                self.stack.push(Slot::Segment(size));
            }
            Binding::AllocateBuffer { size, .. } => {
                self.stack.push(Slot::Segment(size));
            }
            Binding::BoxAddress => {
                self.pop_address()?;
                self.stack.push(Slot::Value(Primitive::I64));
            }
            Binding::BaseAddress => {
                self.pop_segment()?;
                self.stack.push(Slot::Address);
            }
            Binding::Dup => {
                let top = *self.stack.last().ok_or_else(|| self.fail("stack underflow"))?;
                self.stack.push(top);
            }
        }
        Ok(())
    }

    fn box_step(&mut self, binding: Binding) -> Result<(), BindingError> {
        self.check_slot_width(&binding)?;
        match binding {
            Binding::Move { ty, .. } => self.stack.push(Slot::Value(ty)),
            Binding::Dereference { offset, ty } => {
                self.pop_value(ty)?;
                let len = self.pop_segment()?;
                self.check_field(len, offset, ty)?;
                self.stack.push(Slot::Segment(len));
            }
            Binding::Copy { size, .. } => {
                self.pop_address()?;
                self.stack.push(Slot::Segment(size));
            }
            Binding::AllocateBuffer { size, .. } => {
                self.stack.push(Slot::Segment(size));
            }
            Binding::BoxAddress => {
                self.pop_value(Primitive::I64)?;
                self.stack.push(Slot::Address);
            }
            Binding::BaseAddress => {
                self.pop_segment()?;
                self.stack.push(Slot::Address);
            }
            Binding::Dup => {
                let top = *self.stack.last().ok_or_else(|| self.fail("stack underflow"))?;
                self.stack.push(top);
            }
        }
        Ok(())
    }
}

/// Check that `bindings` consumes exactly one `carrier` value described by
/// `layout` and leaves the stack empty.
pub fn verify_unbox(
    bindings: &[Binding],
    carrier: Carrier,
    layout: &MemoryLayout,
) -> Result<(), BindingError> {
    let mut sim = Simulator::new(bindings, Some(Slot::of(carrier, layout)));
    for (position, binding) in bindings.iter().enumerate() {
        sim.position = position;
        sim.unbox_step(*binding)?;
    }
    sim.position = bindings.len();
    if !sim.stack.is_empty() {
        return Err(sim.fail(format!(
            "{} value(s) left on the stack",
            sim.stack.len()
        )));
    }
    Ok(())
}

/// Check that `bindings`, run from an empty stack, produces exactly one
/// `carrier` value.
pub fn verify_box(
    bindings: &[Binding],
    carrier: Carrier,
    layout: &MemoryLayout,
) -> Result<(), BindingError> {
    let mut sim = Simulator::new(bindings, None);
    for (position, binding) in bindings.iter().enumerate() {
        sim.position = position;
        sim.box_step(*binding)?;
    }
    sim.position = bindings.len();
    match sim.stack.as_slice() {
        [result] if result.matches(carrier) => {
            if let (Slot::Segment(len), Carrier::Segment) = (result, carrier)
                && *len < layout.byte_size()
            {
                return Err(sim.fail(format!(
                    "result segment of {len} bytes is smaller than {layout}"
                )));
            }
            Ok(())
        }
        [result] => Err(sim.fail(format!(
            "produces {}, expected {carrier}",
            result.describe()
        ))),
        stack => Err(sim.fail(format!(
            "expected one result, stack holds {}",
            stack.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bindings, StorageClass, VMStorage};

    const RDI: VMStorage = VMStorage::new(StorageClass::IntegerArg, 0, 8);
    const RSI: VMStorage = VMStorage::new(StorageClass::IntegerArg, 1, 8);
    const RAX: VMStorage = VMStorage::new(StorageClass::IntegerReturn, 0, 8);

    fn pair() -> MemoryLayout {
        MemoryLayout::structure([
            MemoryLayout::value(Primitive::I64),
            MemoryLayout::value(Primitive::I64),
        ])
    }

    #[test]
    fn scalar_unbox() {
        let mut b = Bindings::new();
        b.move_to(RDI, Primitive::I64);
        let layout = MemoryLayout::value(Primitive::I64);
        assert!(verify_unbox(b.as_slice(), Primitive::I64.into(), &layout).is_ok());
    }

    #[test]
    fn wrong_primitive_is_rejected() {
        let mut b = Bindings::new();
        b.move_to(RDI, Primitive::I32);
        let layout = MemoryLayout::value(Primitive::I64);
        let err = verify_unbox(b.as_slice(), Primitive::I64.into(), &layout)
            .unwrap_err();
        assert!(matches!(err, BindingError::Verification { position: 0, .. }));
    }

    #[test]
    fn split_struct_unbox() {
        let layout = pair();
        let mut b = Bindings::new();
        b.dup()
            .dereference(0, Primitive::I64)
            .move_to(RDI, Primitive::I64)
            .dereference(8, Primitive::I64)
            .move_to(RSI, Primitive::I64);
        assert!(verify_unbox(b.as_slice(), Carrier::Segment, &layout).is_ok());
    }

    #[test]
    fn leftover_value_is_rejected() {
        let layout = pair();
        let mut b = Bindings::new();
        b.dup().dereference(0, Primitive::I64).move_to(RDI, Primitive::I64);
        let err = verify_unbox(b.as_slice(), Carrier::Segment, &layout).unwrap_err();
        match err {
            BindingError::Verification { position, binding, .. } => {
                assert_eq!(position, 3);
                assert_eq!(binding, None);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn dereference_out_of_bounds() {
        let layout = pair();
        let mut b = Bindings::new();
        b.dereference(12, Primitive::I64).move_to(RDI, Primitive::I64);
        assert!(verify_unbox(b.as_slice(), Carrier::Segment, &layout).is_err());
    }

    #[test]
    fn struct_box() {
        let layout = pair();
        let rdx = VMStorage::new(StorageClass::IntegerReturn, 1, 8);
        let mut b = Bindings::new();
        b.allocate(&layout)
            .move_to(RAX, Primitive::I64)
            .dereference(0, Primitive::I64)
            .move_to(rdx, Primitive::I64)
            .dereference(8, Primitive::I64);
        assert!(verify_box(b.as_slice(), Carrier::Segment, &layout).is_ok());
    }

    #[test]
    fn box_must_produce_single_result() {
        let mut b = Bindings::new();
        b.move_to(RAX, Primitive::I64).move_to(RAX, Primitive::I64);
        let layout = MemoryLayout::value(Primitive::I64);
        let err = verify_box(b.as_slice(), Primitive::I64.into(), &layout)
            .unwrap_err();
        assert!(err.to_string().contains("stack holds 2"));
    }

    #[test]
    fn boxed_address() {
        let mut b = Bindings::new();
        b.move_to(RAX, Primitive::I64).box_address();
        assert!(
            verify_box(b.as_slice(), Carrier::Address, &MemoryLayout::Address).is_ok()
        );
    }

    #[test]
    fn oversized_primitive_for_slot() {
        let narrow = VMStorage::new(StorageClass::IntegerArg, 0, 4);
        let mut b = Bindings::new();
        b.move_to(narrow, Primitive::I64);
        let layout = MemoryLayout::value(Primitive::I64);
        assert!(verify_unbox(b.as_slice(), Primitive::I64.into(), &layout).is_err());
    }
}
