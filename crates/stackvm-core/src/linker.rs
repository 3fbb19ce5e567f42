//! Two-pass symbol resolver: in-session accumulation, commit into the
//! MMU, and on-demand reference resolution during execution.
//!
//! Grounded directly on `original_source/Linker.cpp`'s `UATLinker`
//! (`DirectLink_Init`/`DirectLink_Add`/`DirectLink_Commit`, `Resolve`,
//! `Relocate`, `MergeLink_Add`).

use crate::error::{InputError, InputResult, InternalError, InternalResult};
use crate::mmu::Mmu;
use crate::reference::{Base, DirectReference, Reference};
use crate::section::Section;
use crate::symbol::{Symbol, SymbolMap};
use crate::value::{Value, ValueType};

/// Per-section high-water marks, used both to place new `Definition`
/// symbols at direct-link time and to relocate an already-linked image
/// being merged in at a nonzero offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offsets {
    pub code: u64,
    pub data: u64,
    pub bytepool: u64,
}

impl Offsets {
    fn of(&self, section: Section) -> Option<u64> {
        match section {
            Section::Code => Some(self.code),
            Section::Data => Some(self.data),
            Section::Bytepool => Some(self.bytepool),
            Section::Register | Section::Frame | Section::FrameBack | Section::None => None,
        }
    }
}

/// A two-phase symbol resolver. The working map is scoped to an explicit
/// session (`init_session` ... `commit`); it holds no state between
/// sessions.
#[derive(Default)]
pub struct Linker {
    working: SymbolMap,
}

impl Linker {
    pub fn new() -> Self {
        Linker::default()
    }

    /// Copy the current context's symbol map into a temporary working map.
    pub fn init_session(&mut self, mmu: &mut Mmu) -> InternalResult<()> {
        self.working = mmu.dump_symbol_image()?;
        Ok(())
    }

    /// For each incoming symbol whose reference is a `Definition`,
    /// rewrite the base to `MemoryRef(offset)` where `offset` is the
    /// current high-water mark of the section named by the reference's
    /// `global_section`. Then insert into the working map.
    pub fn add(&mut self, symbols: SymbolMap, offsets: Offsets) -> InputResult<()> {
        for (hash, (name, mut symbol)) in symbols {
            if symbol.is_resolved {
                Self::place_definition(&mut symbol.reference, offsets)?;
            }
            self.working.insert(hash, (name, symbol));
        }
        Ok(())
    }

    fn place_definition(reference: &mut Reference, offsets: Offsets) -> InputResult<()> {
        for component in reference.components.iter_mut() {
            if !component.base.is_definition() {
                continue;
            }
            if component.indirection.is_some() {
                return Err(InternalError::NonAllocatableSectionDefinition(reference.global_section).into());
            }
            let address = offsets
                .of(reference.global_section)
                .ok_or(InternalError::NonAllocatableSectionDefinition(reference.global_section))?;
            component.base = Base::MemoryRef(address);
        }
        Ok(())
    }

    /// Walk the working map. Fail if any symbol still has a `Definition`
    /// base. If a hash collides with an existing entry, prefer the
    /// resolved one; fail if both are resolved (redefinition). Move the
    /// final map into the MMU and clear the working map.
    pub fn commit(&mut self, mmu: &mut Mmu) -> InputResult<()> {
        let mut target: SymbolMap = SymbolMap::default();

        for (hash, (name, symbol)) in std::mem::take(&mut self.working) {
            if symbol.reference.has_definition() {
                return Err(InputError::UnplacedSymbolAtCommit(name));
            }

            match target.get(&hash) {
                None => {
                    target.insert(hash, (name, symbol));
                }
                Some((_, existing)) => {
                    if existing.is_resolved && symbol.is_resolved {
                        return Err(InputError::SymbolRedefinition { name, hash });
                    }
                    if symbol.is_resolved {
                        target.insert(hash, (name, symbol));
                    }
                    // else: existing entry already has the better (or
                    // equally-unresolved) definition; keep it.
                }
            }
        }

        mmu.set_symbol_image(target)?;
        Ok(())
    }

    /// Add symbols unchanged; used when concatenating an already-linked
    /// image into a host context at offset zero. Relocation (if the
    /// target offset is nonzero) is applied separately via `relocate`.
    pub fn merge_add(&mut self, symbols: SymbolMap) {
        for (hash, entry) in symbols {
            self.working.insert(hash, entry);
        }
    }

    /// Shift every defined, simple, plain-`MemoryRef` symbol in the
    /// working map by the offset of its global section. Aliases and
    /// bicomponent references with symbol bases are left alone; they
    /// resolve indirectly through the (already relocated) target.
    pub fn relocate(&mut self, offsets: Offsets) -> InternalResult<()> {
        for (_, symbol) in self.working.values_mut() {
            if !symbol.is_resolved {
                continue;
            }
            let do_skip = symbol
                .reference
                .components
                .iter()
                .any(|c| c.indirection.is_some() || !matches!(c.base, Base::MemoryRef(_)));
            if do_skip {
                continue;
            }
            Self::relocate_reference(&mut symbol.reference, offsets)?;
        }
        Ok(())
    }

    fn relocate_reference(reference: &mut Reference, offsets: Offsets) -> InternalResult<()> {
        let Some(offset) = offsets.of(reference.global_section) else {
            return Ok(()); // non-relocatable section: no-op
        };
        for component in reference.components.iter_mut() {
            if let Base::MemoryRef(addr) = &mut component.base {
                *addr += offset;
            }
        }
        Ok(())
    }

    /// Resolve a reference to a concrete `{section, address}`. When
    /// `partial` is set, any component whose indirection would require a
    /// memory load is left un-dereferenced and the whole reference is
    /// reported as not-fully-resolved (the spec's stricter reading of an
    /// underspecified corner, see `DESIGN.md`).
    pub fn resolve(
        &self,
        mmu: &Mmu,
        reference: &Reference,
        partial: bool,
    ) -> InternalResult<DirectReference> {
        let (result, _fully_resolved) = self.resolve_tracking(mmu, reference, partial)?;
        Ok(result)
    }

    /// As `resolve`, but also reports whether every requested indirection
    /// was actually performed.
    pub fn resolve_tracking(
        &self,
        mmu: &Mmu,
        reference: &Reference,
        partial: bool,
    ) -> InternalResult<(DirectReference, bool)> {
        let mut result_section = Section::None;
        let mut result_address: u64 = 0;
        let mut fully_resolved = true;

        for component in &reference.components {
            let mut tmp_section;
            let mut tmp_address;

            match component.base {
                Base::Definition => return Err(InternalError::UnplacedReference),
                Base::Symbol(hash) => {
                    let symbol = self.lookup(mmu, hash)?;
                    let (resolved, sub_fully) = self.resolve_tracking(mmu, &symbol.reference, partial)?;
                    tmp_section = resolved.section;
                    tmp_address = resolved.address;
                    fully_resolved &= sub_fully;
                }
                Base::MemoryRef(addr) => {
                    tmp_section = Section::None;
                    tmp_address = addr;
                }
            }

            if let Some(indirection_section) = component.indirection {
                if tmp_section == Section::None {
                    tmp_section = indirection_section;
                } else if indirection_section != tmp_section {
                    return Err(InternalError::DuplicateSection);
                }

                if tmp_section == Section::None {
                    return Err(InternalError::MissingIndirectionSection);
                }

                if partial {
                    fully_resolved = false;
                } else {
                    let loaded = mmu.read_memory(tmp_section, tmp_address)?;
                    tmp_address = Self::as_address(loaded)?;
                }
                tmp_section = Section::None;
            }

            if tmp_section != Section::None {
                if result_section != Section::None {
                    return Err(InternalError::DuplicateSection);
                }
                result_section = tmp_section;
            }
            result_address = result_address.wrapping_add(tmp_address);
        }

        if result_section == Section::None {
            result_section = reference.global_section;
        }

        Ok((
            DirectReference {
                section: result_section,
                address: result_address,
            },
            fully_resolved,
        ))
    }

    /// Load the `Value` a fully-resolved reference points at.
    pub fn read_resolved(&self, mmu: &Mmu, resolved: DirectReference) -> InternalResult<Value> {
        mmu.read_memory(resolved.section, resolved.address)
    }

    fn lookup<'a>(&self, mmu: &'a Mmu, hash: u64) -> InternalResult<&'a Symbol> {
        let symbol = mmu.a_symbol(hash)?;
        if !symbol.is_resolved {
            return Err(InternalError::NoSuchSymbol(hash));
        }
        Ok(symbol)
    }

    fn as_address(value: Value) -> InternalResult<u64> {
        match value {
            Value::Integer(i) => Ok(i as u64),
            Value::Float(_) => Err(InternalError::StackTypeMismatch {
                expected: ValueType::Integer,
                found: ValueType::Float,
            }),
            Value::None => Err(InternalError::UninitializedValue),
        }
    }
}

/// Translate a runtime symbol lookup failure into the input-error
/// category required for "undefined symbol at runtime" (§7, category 2),
/// carrying the symbol's name for the diagnostic when a reader ever
/// mentioned it (`Mmu::remember_symbol_name`), and falling back to the
/// hex hash otherwise (e.g. a bare symbol reference loaded from a binary
/// image, which carries no name at all).
pub fn undefined_symbol_error(mmu: &Mmu, hash: u64) -> InputError {
    let name = mmu
        .symbol_name(hash)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{hash:x}"));
    InputError::UndefinedSymbol(name)
}

/// Resolve `reference`, downgrading an internal "no such symbol" fault
/// into the input-error category-2 diagnostic required at execution time
/// (§7, §8 scenario 5). Every other internal failure (duplicate section,
/// unplaced reference, ...) still propagates as a contract breach.
pub fn resolve_or_undefined(
    linker: &Linker,
    mmu: &Mmu,
    reference: &Reference,
    partial: bool,
) -> InputResult<DirectReference> {
    linker.resolve(mmu, reference, partial).map_err(|e| match e {
        InternalError::NoSuchSymbol(hash) => undefined_symbol_error(mmu, hash),
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::hash_name;

    fn defined_symbol(section: Section) -> Symbol {
        Symbol::new(0, Reference::simple(section, Component::direct(Base::Definition)), true)
    }

    #[test]
    fn add_places_definitions_at_the_given_offset() {
        let mut mmu = Mmu::new();
        let mut linker = Linker::new();
        linker.init_session(&mut mmu).unwrap();

        let mut symbols = SymbolMap::default();
        symbols.insert(hash_name("x"), ("x".to_string(), defined_symbol(Section::Data)));

        let offsets = Offsets { code: 0, data: 42, bytepool: 0 };
        linker.add(symbols, offsets).unwrap();
        linker.commit(&mut mmu).unwrap();

        let symbol = mmu.a_symbol(hash_name("x")).unwrap();
        assert_eq!(
            symbol.reference.components[0].base,
            Base::MemoryRef(42)
        );
    }

    #[test]
    fn commit_rejects_unplaced_definitions() {
        let mut mmu = Mmu::new();
        let mut linker = Linker::new();
        linker.init_session(&mut mmu).unwrap();

        let mut symbols = SymbolMap::default();
        symbols.insert(
            hash_name("unresolved"),
            ("unresolved".to_string(), Symbol::new(0, Reference::simple(Section::Data, Component::direct(Base::Definition)), false)),
        );
        linker.merge_add(symbols);

        assert!(matches!(
            linker.commit(&mut mmu),
            Err(InputError::UnplacedSymbolAtCommit(_))
        ));
    }

    #[test]
    fn commit_rejects_redefinition() {
        let mut mmu = Mmu::new();
        let mut linker = Linker::new();
        linker.init_session(&mut mmu).unwrap();

        let hash = hash_name("dup");
        let mut first = SymbolMap::default();
        first.insert(hash, ("dup".to_string(), Symbol::new(hash, Reference::simple(Section::Data, Component::direct(Base::MemoryRef(0))), true)));
        linker.merge_add(first);

        let mut second = SymbolMap::default();
        second.insert(hash, ("dup".to_string(), Symbol::new(hash, Reference::simple(Section::Data, Component::direct(Base::MemoryRef(4))), true)));
        linker.merge_add(second);

        assert!(matches!(
            linker.commit(&mut mmu),
            Err(InputError::SymbolRedefinition { .. })
        ));
    }

    #[test]
    fn resolve_follows_a_symbol_to_its_memory_ref() {
        let mut mmu = Mmu::new();
        mmu.write_memory(Section::Data, 0, Value::Integer(99)).unwrap();

        let mut linker = Linker::new();
        linker.init_session(&mut mmu).unwrap();
        let mut symbols = SymbolMap::default();
        let hash = hash_name("answer");
        symbols.insert(
            hash,
            ("answer".to_string(), Symbol::new(hash, Reference::simple(Section::Data, Component::direct(Base::MemoryRef(0))), true)),
        );
        linker.merge_add(symbols);
        linker.commit(&mut mmu).unwrap();

        let reference = Reference::simple(Section::Data, Component::direct(Base::Symbol(hash)));
        let resolved = linker.resolve(&mmu, &reference, false).unwrap();
        assert_eq!(resolved, DirectReference { section: Section::Data, address: 0 });
        assert_eq!(linker.read_resolved(&mmu, resolved).unwrap(), Value::Integer(99));
    }

    #[test]
    fn partial_resolve_skips_indirection_and_reports_incomplete() {
        let mut mmu = Mmu::new();
        mmu.write_memory(Section::Data, 0, Value::Integer(5)).unwrap();
        let linker = Linker::new();

        let reference = Reference::simple(Section::Data, Component::indirect(Base::MemoryRef(0), Section::Data));
        let (_, fully_resolved) = linker.resolve_tracking(&mmu, &reference, true).unwrap();
        assert!(!fully_resolved);
    }

    #[test]
    fn relocate_shifts_plain_memory_refs_only() {
        let mut mmu = Mmu::new();
        let mut linker = Linker::new();
        linker.init_session(&mut mmu).unwrap();

        let hash = hash_name("shifted");
        let mut symbols = SymbolMap::default();
        symbols.insert(
            hash,
            ("shifted".to_string(), Symbol::new(hash, Reference::simple(Section::Code, Component::direct(Base::MemoryRef(10))), true)),
        );
        linker.merge_add(symbols);
        linker.relocate(Offsets { code: 100, data: 0, bytepool: 0 }).unwrap();
        linker.commit(&mut mmu).unwrap();

        let symbol = mmu.a_symbol(hash).unwrap();
        assert_eq!(symbol.reference.components[0].base, Base::MemoryRef(110));
    }
}
