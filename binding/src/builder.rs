use crate::{Binding, MemoryLayout, Primitive, VMStorage};

/// Builds one binding program.
///
/// Every emitter returns `&mut Self` so a program reads in execution order:
///
/// ```
/// use binding::{Bindings, Primitive, StorageClass, VMStorage};
///
/// let rdi = VMStorage::new(StorageClass::IntegerArg, 0, 8);
/// let mut b = Bindings::new();
/// b.box_address().move_to(rdi, Primitive::I64);
/// assert_eq!(b.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    steps: Vec<Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_slice(&self) -> &[Binding] {
        &self.steps
    }

    pub fn into_vec(self) -> Vec<Binding> {
        self.steps
    }

    fn emit(&mut self, binding: Binding) -> &mut Self {
        self.steps.push(binding);
        self
    }

    /// `Move <storage> <ty>`
    pub fn move_to(&mut self, storage: VMStorage, ty: Primitive) -> &mut Self {
        self.emit(Binding::Move { storage, ty })
    }

    /// `Deref +<offset> <ty>`
    pub fn dereference(&mut self, offset: usize, ty: Primitive) -> &mut Self {
        self.emit(Binding::Dereference { offset, ty })
    }

    /// `Copy <size>/<align>` sized from `layout`.
    pub fn copy(&mut self, layout: &MemoryLayout) -> &mut Self {
        self.emit(Binding::Copy {
            size: layout.byte_size(),
            alignment: layout.byte_alignment(),
        })
    }

    /// `Alloc <size>/<align>` sized from `layout`.
    pub fn allocate(&mut self, layout: &MemoryLayout) -> &mut Self {
        self.emit(Binding::AllocateBuffer {
            size: layout.byte_size(),
            alignment: layout.byte_alignment(),
        })
    }

    pub fn box_address(&mut self) -> &mut Self {
        self.emit(Binding::BoxAddress)
    }

    pub fn base_address(&mut self) -> &mut Self {
        self.emit(Binding::BaseAddress)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit(Binding::Dup)
    }
}

impl From<Bindings> for Vec<Binding> {
    fn from(value: Bindings) -> Self {
        value.into_vec()
    }
}
