use std::collections::BTreeSet;
use std::fmt;

use crate::{
    Binding, BindingError, Carrier, FunctionDescriptor, MemoryLayout, Signature,
    VMStorage, binding::display_program, verify_box, verify_unbox,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallDirection {
    /// Managed code calling native code.
    Downcall,
    /// Native code calling managed code.
    Upcall,
}

impl CallDirection {
    /// Whether argument programs unbox (managed to native).
    pub const fn unboxes_arguments(self) -> bool {
        matches!(self, Self::Downcall)
    }

    /// Whether the return program unboxes.
    pub const fn unboxes_return(self) -> bool {
        matches!(self, Self::Upcall)
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downcall => f.write_str("downcall"),
            Self::Upcall => f.write_str("upcall"),
        }
    }
}

/// Compiled plan for one native call shape. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingSequence {
    direction: CallDirection,
    signature: Signature,
    descriptor: FunctionDescriptor,
    argument_bindings: Vec<Vec<Binding>>,
    return_bindings: Vec<Binding>,
    indirect_result: bool,
    indirect_result_size: usize,
    scratch_allocation_size: usize,
}

impl CallingSequence {
    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Erased signature, including the synthetic result pointer when present.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The user-visible native shape.
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn argument_count(&self) -> usize {
        self.argument_bindings.len()
    }

    pub fn user_argument_count(&self) -> usize {
        self.argument_count() - usize::from(self.indirect_result)
    }

    pub fn argument_bindings(&self, index: usize) -> &[Binding] {
        &self.argument_bindings[index]
    }

    pub fn arguments(&self) -> impl Iterator<Item = &[Binding]> {
        self.argument_bindings.iter().map(Vec::as_slice)
    }

    /// Argument programs of the user-visible arguments only.
    pub fn user_arguments(&self) -> impl Iterator<Item = &[Binding]> {
        self.arguments().skip(usize::from(self.indirect_result))
    }

    /// Program moving the synthetic result pointer, if the result is
    /// delivered in memory.
    pub fn indirect_result_bindings(&self) -> Option<&[Binding]> {
        self.indirect_result.then(|| self.argument_bindings(0))
    }

    pub fn return_bindings(&self) -> &[Binding] {
        &self.return_bindings
    }

    pub fn has_return_bindings(&self) -> bool {
        !self.return_bindings.is_empty()
    }

    pub fn is_indirect_result(&self) -> bool {
        self.indirect_result
    }

    pub fn indirect_result_size(&self) -> usize {
        self.indirect_result_size
    }

    pub fn scratch_allocation_size(&self) -> usize {
        self.scratch_allocation_size
    }

    /// Every storage named by a `Move` step, in storage order.
    pub fn storages(&self) -> BTreeSet<VMStorage> {
        self.argument_bindings
            .iter()
            .flatten()
            .chain(self.return_bindings.iter())
            .filter_map(Binding::storage)
            .collect()
    }

    fn all_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.argument_bindings
            .iter()
            .flatten()
            .chain(self.return_bindings.iter())
    }
}

impl fmt::Display for CallingSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.direction, self.signature)?;
        for (i, program) in self.argument_bindings.iter().enumerate() {
            let tag = if self.indirect_result && i == 0 { " (imr)" } else { "" };
            writeln!(f, "  arg {i}{tag}: {}", display_program(program))?;
        }
        write!(f, "  ret: {}", display_program(&self.return_bindings))?;
        if self.indirect_result {
            write!(f, " imr {}", self.indirect_result_size)?;
        }
        if self.scratch_allocation_size > 0 {
            write!(f, " scratch {}", self.scratch_allocation_size)?;
        }
        Ok(())
    }
}

/// Accumulates argument and return programs for one call shape.
///
/// Every program is verified as it is added. A program that fails
/// verification is a defect in whatever generated it, so adding one panics;
/// use [`verify_unbox`] and [`verify_box`] directly to test a program
/// without panicking.
#[derive(Debug)]
pub struct CallingSequenceBuilder {
    direction: CallDirection,
    signature: Signature,
    arguments: Vec<Vec<Binding>>,
    argument_layouts: Vec<MemoryLayout>,
    return_bindings: Option<Vec<Binding>>,
    return_layout: Option<MemoryLayout>,
    indirect_result: Option<(Vec<Binding>, MemoryLayout)>,
}

impl CallingSequenceBuilder {
    pub fn new(direction: CallDirection) -> Self {
        Self {
            direction,
            signature: Signature::default(),
            arguments: Vec::new(),
            argument_layouts: Vec::new(),
            return_bindings: None,
            return_layout: None,
            indirect_result: None,
        }
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn add_argument_bindings(
        &mut self,
        carrier: Carrier,
        layout: &MemoryLayout,
        bindings: impl Into<Vec<Binding>>,
    ) -> &mut Self {
        let bindings = bindings.into();
        self.check(&bindings, carrier, layout, self.direction.unboxes_arguments(), true);
        self.signature.push_param(carrier);
        self.arguments.push(bindings);
        self.argument_layouts.push(layout.clone());
        self
    }

    pub fn set_return_bindings(
        &mut self,
        carrier: Carrier,
        layout: &MemoryLayout,
        bindings: impl Into<Vec<Binding>>,
    ) -> Result<&mut Self, BindingError> {
        if self.return_bindings.is_some() {
            return Err(BindingError::ReturnAlreadySet);
        }
        let bindings = bindings.into();
        self.check(&bindings, carrier, layout, self.direction.unboxes_return(), false);
        self.signature.set_ret(carrier);
        self.return_bindings = Some(bindings);
        self.return_layout = Some(layout.clone());
        Ok(self)
    }

    /// Deliver the result of shape `layout` in memory. `pointer_bindings`
    /// moves the result buffer address and becomes argument 0.
    pub fn mark_indirect_result(
        &mut self,
        layout: &MemoryLayout,
        pointer_bindings: impl Into<Vec<Binding>>,
    ) -> &mut Self {
        assert!(
            self.indirect_result.is_none(),
            "indirect result already marked"
        );
        let bindings = pointer_bindings.into();
        self.check(
            &bindings,
            Carrier::Address,
            &MemoryLayout::Address,
            self.direction.unboxes_arguments(),
            true,
        );
        self.indirect_result = Some((bindings, layout.clone()));
        self
    }

    fn check(
        &self,
        bindings: &[Binding],
        carrier: Carrier,
        layout: &MemoryLayout,
        unbox: bool,
        argument: bool,
    ) {
        let verified = if unbox {
            verify_unbox(bindings, carrier, layout)
        } else {
            verify_box(bindings, carrier, layout)
        };
        if let Err(err) = verified {
            panic!(
                "malformed {} program {}: {err}",
                self.direction,
                display_program(bindings)
            );
        }
        for storage in bindings.iter().filter_map(Binding::storage) {
            assert_eq!(
                storage.class().is_argument(),
                argument,
                "{storage} used in a{} program",
                if argument { "n argument" } else { " return" },
            );
        }
    }

    pub fn build(self) -> CallingSequence {
        let mut signature = Signature::default();
        let mut arguments = Vec::with_capacity(self.arguments.len() + 1);
        let mut indirect_result_size = 0;
        let mut descriptor_ret = self.return_layout;
        let indirect_result = self.indirect_result.is_some();

        if let Some((pointer, layout)) = self.indirect_result {
            indirect_result_size = layout.byte_size();
            signature.push_param(Carrier::Address);
            arguments.push(pointer);
            descriptor_ret = Some(layout);
        }
        for carrier in self.signature.params() {
            signature.push_param(*carrier);
        }
        if let Some(ret) = self.signature.ret() {
            signature.set_ret(ret);
        }
        arguments.extend(self.arguments);

        let mut sequence = CallingSequence {
            direction: self.direction,
            signature,
            descriptor: FunctionDescriptor::new(self.argument_layouts, descriptor_ret),
            argument_bindings: arguments,
            return_bindings: self.return_bindings.unwrap_or_default(),
            indirect_result,
            indirect_result_size,
            scratch_allocation_size: 0,
        };
        sequence.scratch_allocation_size =
            sequence.all_bindings().map(Binding::allocation_size).sum();
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bindings, Primitive, StorageClass};

    const RDI: VMStorage = VMStorage::new(StorageClass::IntegerArg, 0, 8);
    const RSI: VMStorage = VMStorage::new(StorageClass::IntegerArg, 1, 8);
    const RDX: VMStorage = VMStorage::new(StorageClass::IntegerArg, 2, 8);
    const RAX: VMStorage = VMStorage::new(StorageClass::IntegerReturn, 0, 8);

    fn i64_layout() -> MemoryLayout {
        MemoryLayout::value(Primitive::I64)
    }

    fn scalar(storage: VMStorage) -> Bindings {
        let mut b = Bindings::new();
        b.move_to(storage, Primitive::I64);
        b
    }

    #[test]
    fn arguments_keep_insertion_order() {
        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder
            .add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RDI))
            .add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RSI));
        let seq = builder.build();

        assert_eq!(seq.argument_count(), 2);
        assert_eq!(seq.argument_bindings(0), scalar(RDI).as_slice());
        assert_eq!(seq.argument_bindings(1), scalar(RSI).as_slice());
        assert!(!seq.has_return_bindings());
        assert_eq!(seq.signature().to_string(), "(i64, i64) -> void");
    }

    #[test]
    fn second_return_is_rejected() {
        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder
            .set_return_bindings(Primitive::I64.into(), &i64_layout(), scalar(RAX))
            .unwrap();
        let err = builder
            .set_return_bindings(Primitive::I64.into(), &i64_layout(), scalar(RAX))
            .unwrap_err();
        assert_eq!(err, BindingError::ReturnAlreadySet);
    }

    #[test]
    fn scratch_size_sums_copies_and_buffers() {
        let big = MemoryLayout::sequence(MemoryLayout::value(Primitive::I64), 4);
        let mut by_ref = Bindings::new();
        by_ref.copy(&big).base_address().box_address().move_to(RDI, Primitive::I64);

        let small = MemoryLayout::structure([
            MemoryLayout::value(Primitive::I32),
            MemoryLayout::value(Primitive::I32),
        ]);
        let mut ret = Bindings::new();
        ret.allocate(&small).move_to(RAX, Primitive::I64).dereference(0, Primitive::I64);

        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder.add_argument_bindings(Carrier::Segment, &big, by_ref);
        builder.set_return_bindings(Carrier::Segment, &small, ret).unwrap();
        let seq = builder.build();

        assert_eq!(seq.scratch_allocation_size(), 32 + 8);
    }

    #[test]
    fn indirect_result_becomes_first_argument() {
        let big = MemoryLayout::sequence(MemoryLayout::value(Primitive::I64), 3);
        let mut pointer = Bindings::new();
        pointer.box_address().move_to(RDI, Primitive::I64);
        let mut ret = Bindings::new();
        ret.move_to(RAX, Primitive::I64).box_address();

        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder.add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RSI));
        builder.mark_indirect_result(&big, pointer.clone());
        builder
            .set_return_bindings(Carrier::Address, &MemoryLayout::Address, ret)
            .unwrap();
        let seq = builder.build();

        assert!(seq.is_indirect_result());
        assert_eq!(seq.indirect_result_size(), 24);
        assert_eq!(seq.argument_count(), 2);
        assert_eq!(seq.user_argument_count(), 1);
        assert_eq!(seq.indirect_result_bindings(), Some(pointer.as_slice()));
        assert_eq!(seq.descriptor().ret(), Some(&big));
        assert_eq!(seq.descriptor().args().len(), 1);
        assert_eq!(seq.signature().to_string(), "(address, i64) -> address");
    }

    #[test]
    fn storages_are_ordered() {
        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder
            .add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RDX))
            .add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RDI));
        builder
            .set_return_bindings(Primitive::I64.into(), &i64_layout(), scalar(RAX))
            .unwrap();
        let storages: Vec<_> = builder.build().storages().into_iter().collect();
        assert_eq!(storages, vec![RDI, RDX, RAX]);
    }

    #[test]
    #[should_panic(expected = "malformed downcall program")]
    fn malformed_program_panics() {
        let mut b = Bindings::new();
        b.move_to(RDI, Primitive::F64);
        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        builder.add_argument_bindings(Primitive::I64.into(), &i64_layout(), b);
    }

    #[test]
    #[should_panic(expected = "used in a return program")]
    fn argument_storage_in_return_panics() {
        let mut builder = CallingSequenceBuilder::new(CallDirection::Downcall);
        let _ = builder.set_return_bindings(
            Primitive::I64.into(),
            &i64_layout(),
            scalar(RDI),
        );
    }

    #[test]
    fn upcall_arguments_are_boxed() {
        let mut builder = CallingSequenceBuilder::new(CallDirection::Upcall);
        builder.add_argument_bindings(Primitive::I64.into(), &i64_layout(), scalar(RDI));
        builder
            .set_return_bindings(Primitive::I64.into(), &i64_layout(), scalar(RAX))
            .unwrap();
        let seq = builder.build();
        assert_eq!(seq.direction(), CallDirection::Upcall);
        assert_eq!(seq.scratch_allocation_size(), 0);
    }
}
