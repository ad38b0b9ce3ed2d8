//! Stub generator backed by Rust closures.
//!
//! Native functions are closures registered at synthetic addresses. They see
//! the call frame exactly as machine code compiled for the ABI would see its
//! registers and stack, and can call back into upcall entry points.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use binding::Binding;
use log::debug;
use parking_lot::RwLock;

use crate::{
    Address, BufferLayout, CallFrame, DowncallStub, LinkError, NativeError, NativeSymbol,
    StorageAccess, StubGenerator, UpcallHandler,
};

/// An emulated native function.
pub type NativeFn =
    Arc<dyn Fn(&mut CallFrame, &EmulatedNatives) -> Result<(), NativeError> + Send + Sync>;

const FIRST_ADDRESS: u64 = 0x7f00_0000_1000;
const ADDRESS_STEP: u64 = 0x10;

struct UpcallEntry {
    handler: Arc<UpcallHandler>,
    layout: Arc<BufferLayout>,
    indirect_result: bool,
    indirect_result_size: usize,
}

#[derive(Default)]
struct Registry {
    functions: RwLock<HashMap<Address, (String, NativeFn)>>,
    names: RwLock<HashMap<String, Address>>,
    upcalls: RwLock<HashMap<Address, Arc<UpcallEntry>>>,
    next_address: AtomicU64,
}

impl Registry {
    fn fresh_address(&self) -> Address {
        let n = self.next_address.fetch_add(1, Ordering::Relaxed);
        Address::new(FIRST_ADDRESS + n * ADDRESS_STEP)
    }
}

/// A process-local table of emulated natives and upcall entry points.
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct EmulatedNatives {
    registry: Arc<Registry>,
}

impl EmulatedNatives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing an earlier definition.
    pub fn define<F>(&self, name: &str, function: F) -> NativeSymbol
    where
        F: Fn(&mut CallFrame, &EmulatedNatives) -> Result<(), NativeError> + Send + Sync + 'static,
    {
        let address = self.registry.fresh_address();
        if let Some(old) = self.registry.names.write().insert(name.to_string(), address) {
            self.registry.functions.write().remove(&old);
        }
        self.registry
            .functions
            .write()
            .insert(address, (name.to_string(), Arc::new(function)));
        NativeSymbol::new(name, address)
    }

    pub fn lookup(&self, name: &str) -> Result<NativeSymbol, LinkError> {
        self.registry
            .names
            .read()
            .get(name)
            .map(|address| NativeSymbol::new(name, *address))
            .ok_or_else(|| LinkError::UnknownSymbol(name.to_string()))
    }

    fn upcall_entry(&self, entry: Address) -> Result<Arc<UpcallEntry>, NativeError> {
        self.registry
            .upcalls
            .read()
            .get(&entry)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("no upcall entry at {entry}")))
    }

    /// A zeroed frame for calling the upcall at `entry`.
    pub fn upcall_frame(&self, entry: Address) -> Result<CallFrame, NativeError> {
        Ok(CallFrame::new(self.upcall_entry(entry)?.layout.clone()))
    }

    /// Jump to the upcall at `entry` with arguments already in `frame`.
    pub fn call_upcall(&self, entry: Address, frame: &mut CallFrame) -> Result<(), NativeError> {
        let upcall = self.upcall_entry(entry)?;
        if upcall.indirect_result {
            let pointer = upcall
                .handler
                .sequence()
                .indirect_result_bindings()
                .and_then(|program| program.iter().find_map(Binding::storage));
            if let Some(storage) = pointer
                && frame.read(storage) == 0
            {
                return Err(NativeError::new(format!(
                    "upcall at {entry} needs a {} byte result buffer",
                    upcall.indirect_result_size
                )));
            }
        }
        upcall
            .handler
            .invoke(frame)
            .map_err(|err| NativeError::new(err.to_string()))
    }

    pub fn upcall_count(&self) -> usize {
        self.registry.upcalls.read().len()
    }
}

struct EmulatedDowncall {
    name: String,
    function: NativeFn,
    natives: EmulatedNatives,
}

impl DowncallStub for EmulatedDowncall {
    fn invoke(&self, frame: &mut CallFrame) -> Result<(), NativeError> {
        (self.function)(frame, &self.natives).map_err(|err| {
            debug!("{} failed: {err}", self.name);
            err
        })
    }
}

impl StubGenerator for EmulatedNatives {
    fn downcall_stub(
        &self,
        symbol: &NativeSymbol,
        layout: &BufferLayout,
    ) -> Result<Arc<dyn DowncallStub>, LinkError> {
        let functions = self.registry.functions.read();
        let Some((name, function)) = functions.get(&symbol.address()) else {
            return Err(LinkError::UnknownSymbol(symbol.to_string()));
        };
        debug!("downcall stub for {symbol} over frame {layout}");
        Ok(Arc::new(EmulatedDowncall {
            name: name.clone(),
            function: function.clone(),
            natives: self.clone(),
        }))
    }

    fn upcall_stub(
        &self,
        handler: Arc<UpcallHandler>,
        layout: &BufferLayout,
        indirect_result: bool,
        indirect_result_size: usize,
    ) -> Result<Address, LinkError> {
        let entry = self.registry.fresh_address();
        debug!("upcall stub at {entry} over frame {layout}");
        let upcall = UpcallEntry {
            handler,
            layout: Arc::new(layout.clone()),
            indirect_result,
            indirect_result_size,
        };
        self.registry.upcalls.write().insert(entry, Arc::new(upcall));
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_lookup() {
        let natives = EmulatedNatives::new();
        let a = natives.define("a", |_, _| Ok(()));
        let b = natives.define("b", |_, _| Ok(()));
        assert_ne!(a.address(), b.address());
        assert_eq!(natives.lookup("a").unwrap(), a);
        assert_eq!(
            natives.lookup("c"),
            Err(LinkError::UnknownSymbol("c".to_string()))
        );
    }

    #[test]
    fn redefinition_replaces_the_old_symbol() {
        let natives = EmulatedNatives::new();
        let old = natives.define("f", |_, _| Ok(()));
        let new = natives.define("f", |_, _| Err(NativeError::new("second")));
        assert_eq!(natives.lookup("f").unwrap(), new);
        let layout = BufferLayout::with_stack_slots(crate::AbiDescriptor::x86_64_sysv(), 0);
        assert!(natives.downcall_stub(&old, &layout).is_err());
        assert!(natives.downcall_stub(&new, &layout).is_ok());
    }

    #[test]
    fn unknown_upcall_entry() {
        let natives = EmulatedNatives::new();
        assert!(natives.upcall_frame(Address::new(0x10)).is_err());
    }
}
