//! Executes binding programs: marshals managed values into native call
//! frames and back, through either the interpreter or specialized adapters.

mod error;
mod memory;
mod value;
mod context;
mod abi;
mod frame;
mod interpreter;
mod specializer;
mod arranger;
mod sysv;
mod aarch64;
mod stub;
mod settings;
mod invoker;
mod upcall;
mod linker;
mod emulated;

pub use error::{CallError, LinkError, NativeError};
pub use memory::{Address, NativeBuffer, Scope, Segment};
pub use value::{Decoder, Encoder, Value, decoder, encoder};
pub use context::BindingContext;
pub use abi::{AARCH64, Abi, AbiDescriptor, DIRECT_VECTOR_WIDTH, SYSV, is_direct_storage};
pub use frame::{BufferLayout, CallFrame, StorageAccess};
pub use interpreter::{box_value, unbox};
pub use specializer::{
    Ineligible, ProgramPosition, SpecializedDowncall, SpecializedUpcall, Specializer,
    check_eligibility,
};
pub use arranger::CallArranger;
pub use sysv::SysVCallArranger;
pub use aarch64::AArch64CallArranger;
pub use stub::{DowncallStub, NativeSymbol, StubGenerator};
pub use settings::LinkerSettings;
pub use invoker::DowncallHandle;
pub use upcall::{UpcallHandler, UpcallStub, UpcallTarget};
pub use linker::Linker;
pub use emulated::{EmulatedNatives, NativeFn};
