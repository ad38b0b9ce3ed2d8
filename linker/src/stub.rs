use std::fmt;
use std::sync::Arc;

use crate::{Address, BufferLayout, CallFrame, LinkError, NativeError, UpcallHandler};

/// A resolved native function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeSymbol {
    name: String,
    address: Address,
}

impl NativeSymbol {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl fmt::Display for NativeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Transfers a filled frame to native code and back.
pub trait DowncallStub: Send + Sync {
    fn invoke(&self, frame: &mut CallFrame) -> Result<(), NativeError>;
}

/// Produces the trampolines between frames and native code.
pub trait StubGenerator: Send + Sync {
    /// A stub that calls `symbol` with arguments taken from frames shaped by
    /// `layout`.
    fn downcall_stub(
        &self,
        symbol: &NativeSymbol,
        layout: &BufferLayout,
    ) -> Result<Arc<dyn DowncallStub>, LinkError>;

    /// A native entry point that collects its arguments into a frame shaped
    /// by `layout` and runs `handler`.
    fn upcall_stub(
        &self,
        handler: Arc<UpcallHandler>,
        layout: &BufferLayout,
        indirect_result: bool,
        indirect_result_size: usize,
    ) -> Result<Address, LinkError>;
}
