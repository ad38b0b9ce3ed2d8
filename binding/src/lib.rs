//! Data model of native call plans: storages, binding microprograms and the
//! calling sequences built from them. Nothing here executes a call.

mod primitive;
mod storage;
mod layout;
mod binding;
mod builder;
mod error;
mod verify;
mod sequence;

pub use primitive::{Carrier, Primitive, Signature};
pub use storage::{StorageClass, VMStorage};
pub use layout::{ADDRESS_SIZE, FunctionDescriptor, MemoryLayout, ScalarField, align_up};
pub use binding::{Binding, display_program};
pub use builder::Bindings;
pub use error::BindingError;
pub use verify::{verify_box, verify_unbox};
pub use sequence::{CallDirection, CallingSequence, CallingSequenceBuilder};
