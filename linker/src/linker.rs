use std::collections::HashMap;
use std::sync::Arc;

use binding::{CallDirection, CallingSequence, FunctionDescriptor};
use log::debug;
use parking_lot::RwLock;

use crate::{
    AArch64CallArranger, Abi, AbiDescriptor, BufferLayout, CallArranger, DowncallHandle,
    LinkError, LinkerSettings, NativeSymbol, Specializer, StubGenerator, SysVCallArranger,
    UpcallHandler, UpcallStub, UpcallTarget,
};

type SequenceKey = (FunctionDescriptor, CallDirection);

/// Entry point: turns native function shapes into callable handles and
/// managed functions into native entry points.
pub struct Linker {
    abi: Abi,
    arranger: Box<dyn CallArranger>,
    stubs: Arc<dyn StubGenerator>,
    settings: LinkerSettings,
    sequences: RwLock<HashMap<SequenceKey, Arc<CallingSequence>>>,
}

impl Linker {
    pub fn new(abi: Abi, stubs: Arc<dyn StubGenerator>, settings: LinkerSettings) -> Self {
        let arranger: Box<dyn CallArranger> = match abi {
            Abi::SysV => Box::new(SysVCallArranger),
            Abi::AArch64 => Box::new(AArch64CallArranger),
        };
        Self {
            abi,
            arranger,
            stubs,
            settings,
            sequences: RwLock::new(HashMap::new()),
        }
    }

    pub fn abi(&self) -> Abi {
        self.abi
    }

    pub fn abi_descriptor(&self) -> &'static AbiDescriptor {
        self.arranger.abi()
    }

    pub fn settings(&self) -> &LinkerSettings {
        &self.settings
    }

    /// The arranged sequence for `descriptor`, built at most once per
    /// direction while caching is on.
    pub fn calling_sequence(
        &self,
        descriptor: &FunctionDescriptor,
        direction: CallDirection,
    ) -> Result<Arc<CallingSequence>, LinkError> {
        if !self.settings.cache_sequences {
            return Ok(Arc::new(self.arranger.arrange(descriptor, direction)?));
        }
        let key = (descriptor.clone(), direction);
        if let Some(sequence) = self.sequences.read().get(&key) {
            return Ok(sequence.clone());
        }
        let arranged = Arc::new(self.arranger.arrange(descriptor, direction)?);
        let mut sequences = self.sequences.write();
        // another thread may have arranged it meanwhile
        Ok(sequences.entry(key).or_insert(arranged).clone())
    }

    pub fn cached_sequences(&self) -> usize {
        self.sequences.read().len()
    }

    pub fn downcall(
        &self,
        symbol: &NativeSymbol,
        descriptor: &FunctionDescriptor,
    ) -> Result<DowncallHandle, LinkError> {
        let abi = self.abi_descriptor();
        let sequence = self.calling_sequence(descriptor, CallDirection::Downcall)?;
        let layout = Arc::new(BufferLayout::new(abi, &sequence));
        let stub = self.stubs.downcall_stub(symbol, &layout)?;

        let specialized = match Specializer::new(abi, &self.settings).downcall(
            &sequence,
            &layout,
            stub.clone(),
        ) {
            Ok(specialized) => {
                debug!("{symbol}: specialized downcall {descriptor}");
                Some(specialized)
            }
            Err(reason) => {
                debug!("{symbol}: interpreting downcall {descriptor}: {reason}");
                None
            }
        };
        Ok(DowncallHandle::new(
            symbol.name().to_string(),
            sequence,
            layout,
            stub,
            specialized,
            abi.returns_indirect_address,
        ))
    }

    pub fn upcall(
        &self,
        target: UpcallTarget,
        descriptor: &FunctionDescriptor,
    ) -> Result<UpcallStub, LinkError> {
        let abi = self.abi_descriptor();
        let sequence = self.calling_sequence(descriptor, CallDirection::Upcall)?;
        let layout = Arc::new(BufferLayout::new(abi, &sequence));

        let specialized = match Specializer::new(abi, &self.settings).upcall(
            &sequence,
            &layout,
            target.clone(),
        ) {
            Ok(specialized) => {
                debug!("specialized upcall {descriptor}");
                Some(specialized)
            }
            Err(reason) => {
                debug!("interpreting upcall {descriptor}: {reason}");
                None
            }
        };
        let handler = Arc::new(UpcallHandler::new(
            sequence.clone(),
            layout.clone(),
            target,
            specialized,
        ));
        let entry = self.stubs.upcall_stub(
            handler.clone(),
            &layout,
            sequence.is_indirect_result(),
            sequence.indirect_result_size(),
        )?;
        Ok(UpcallStub::new(entry, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedNatives;
    use binding::{MemoryLayout, Primitive};

    fn linker(settings: LinkerSettings) -> Linker {
        Linker::new(Abi::SysV, Arc::new(EmulatedNatives::new()), settings)
    }

    fn unary() -> FunctionDescriptor {
        let i64l = MemoryLayout::value(Primitive::I64);
        FunctionDescriptor::of(i64l.clone(), [i64l])
    }

    #[test]
    fn sequences_are_cached_per_direction() {
        let linker = linker(LinkerSettings::default());
        let a = linker.calling_sequence(&unary(), CallDirection::Downcall).unwrap();
        let b = linker.calling_sequence(&unary(), CallDirection::Downcall).unwrap();
        let c = linker.calling_sequence(&unary(), CallDirection::Upcall).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(linker.cached_sequences(), 2);
    }

    #[test]
    fn cache_can_be_disabled() {
        let linker = linker(LinkerSettings {
            cache_sequences: false,
            ..LinkerSettings::default()
        });
        let a = linker.calling_sequence(&unary(), CallDirection::Downcall).unwrap();
        let b = linker.calling_sequence(&unary(), CallDirection::Downcall).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
        assert_eq!(linker.cached_sequences(), 0);
    }

    #[test]
    fn unknown_symbol_fails_to_link() {
        let linker = linker(LinkerSettings::default());
        let ghost = NativeSymbol::new("ghost", crate::Address::new(0xdead));
        assert!(matches!(
            linker.downcall(&ghost, &unary()),
            Err(LinkError::UnknownSymbol(_))
        ));
    }
}
