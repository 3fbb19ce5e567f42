//! Binary image codec: a section-framed byte stream reader/writer for
//! `stackvm_core::reader::{Reader, Writer}`.
//!
//! Layout, grounded on `original_source/APIImplementation.cpp`'s section
//! loop: a sequence of `(section_type: u8, element_count: u32,
//! byte_count: u32)` headers, each followed by `byte_count` raw bytes.
//! Uniform sections (`CodeImage`/`DataImage`/`StackImage`/`SymbolMap`)
//! hold fixed-width little-endian records; `NonUniform` holds a stream of
//! tagged elements consumed one at a time by `read_stream`.

use stackvm_core::command::{Argument, Command};
use stackvm_core::error::{InputError, InputResult};
use stackvm_core::reader::{DecodeElement, DecodeResult, Reader, SectionType, Writer};
use stackvm_core::reference::{Base, Component, Reference};
use stackvm_core::section::Section;
use stackvm_core::symbol::{Symbol, SymbolMap};
use stackvm_core::value::{Value, ValueType};

const TAG_CODE_IMAGE: u8 = 0;
const TAG_DATA_IMAGE: u8 = 1;
const TAG_STACK_IMAGE: u8 = 2;
const TAG_SYMBOL_MAP: u8 = 3;
const TAG_NON_UNIFORM: u8 = 4;

fn section_tag(kind: SectionType) -> u8 {
    match kind {
        SectionType::CodeImage => TAG_CODE_IMAGE,
        SectionType::DataImage => TAG_DATA_IMAGE,
        SectionType::StackImage => TAG_STACK_IMAGE,
        SectionType::SymbolMap => TAG_SYMBOL_MAP,
        SectionType::NonUniform => TAG_NON_UNIFORM,
    }
}

fn section_from_tag(tag: u8) -> InputResult<SectionType> {
    Ok(match tag {
        TAG_CODE_IMAGE => SectionType::CodeImage,
        TAG_DATA_IMAGE => SectionType::DataImage,
        TAG_STACK_IMAGE => SectionType::StackImage,
        TAG_SYMBOL_MAP => SectionType::SymbolMap,
        TAG_NON_UNIFORM => SectionType::NonUniform,
        other => return Err(InputError::MalformedSection(format!("unknown section tag {other}"))),
    })
}

/// Reads a byte-framed binary image out of an in-memory buffer.
pub struct ImageReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    /// End of the current section's payload, set by `next_section`.
    section_end: usize,
}

impl<'a> ImageReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ImageReader {
            bytes,
            cursor: 0,
            section_end: 0,
        }
    }

    fn take(&mut self, len: usize) -> InputResult<&'a [u8]> {
        let end = self.cursor.checked_add(len).ok_or(InputError::PrematureEof)?;
        if end > self.bytes.len() {
            return Err(InputError::PrematureEof);
        }
        let slice = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u8(&mut self) -> InputResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> InputResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("checked length above");
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> InputResult<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("checked length above");
        Ok(u64::from_le_bytes(bytes))
    }

    fn i64(&mut self) -> InputResult<i64> {
        Ok(self.u64()? as i64)
    }

    fn f64(&mut self) -> InputResult<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn string(&mut self) -> InputResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| InputError::MalformedSection(e.to_string()))
    }

    fn value(&mut self) -> InputResult<Value> {
        match self.u8()? {
            0 => Ok(Value::None),
            1 => Ok(Value::Integer(self.i64()?)),
            2 => Ok(Value::Float(self.f64()?)),
            other => Err(InputError::MalformedSection(format!("unknown value tag {other}"))),
        }
    }

    fn section(&mut self) -> InputResult<Section> {
        Ok(match self.u8()? {
            0 => Section::Code,
            1 => Section::Data,
            2 => Section::Bytepool,
            3 => Section::Register,
            4 => Section::Frame,
            5 => Section::FrameBack,
            6 => Section::None,
            other => return Err(InputError::MalformedSection(format!("unknown section id {other}"))),
        })
    }

    fn component(&mut self) -> InputResult<Component> {
        let base = match self.u8()? {
            0 => Base::Definition,
            1 => Base::Symbol(self.u64()?),
            2 => Base::MemoryRef(self.u64()?),
            other => return Err(InputError::MalformedSection(format!("unknown base tag {other}"))),
        };
        let indirection = match self.u8()? {
            0 => None,
            1 => Some(self.section()?),
            other => return Err(InputError::MalformedSection(format!("unknown indirection tag {other}"))),
        };
        Ok(Component { base, indirection })
    }

    fn reference(&mut self) -> InputResult<Reference> {
        let global_section = self.section()?;
        let component_count = self.u8()?;
        let mut components = Vec::with_capacity(component_count as usize);
        for _ in 0..component_count {
            components.push(self.component()?);
        }
        Ok(Reference { global_section, components })
    }

    fn argument(&mut self) -> InputResult<Argument> {
        Ok(match self.u8()? {
            0 => Argument::None,
            1 => Argument::Reference(self.reference()?),
            2 => Argument::ImmediateValue(self.value()?),
            3 => Argument::ImmediateIndex(self.u64()?),
            other => return Err(InputError::MalformedSection(format!("unknown argument tag {other}"))),
        })
    }

    fn command(&mut self) -> InputResult<Command> {
        let opcode_id = self.u32()?;
        let value_type = match self.u8()? {
            0 => ValueType::Integer,
            1 => ValueType::Float,
            2 => ValueType::Service,
            other => return Err(InputError::MalformedSection(format!("unknown value type tag {other}"))),
        };
        let arg = self.argument()?;
        Ok(Command::new(opcode_id, value_type, arg))
    }

    fn symbol_entry(&mut self) -> InputResult<(u64, String, Symbol)> {
        let hash = self.u64()?;
        let name = self.string()?;
        let is_resolved = self.u8()? != 0;
        let reference = self.reference()?;
        Ok((hash, name, Symbol::new(hash, reference, is_resolved)))
    }
}

impl<'a> Reader for ImageReader<'a> {
    fn next_section(&mut self) -> InputResult<Option<(SectionType, usize, usize)>> {
        if self.cursor >= self.bytes.len() {
            return Ok(None);
        }
        let tag = self.u8()?;
        let kind = section_from_tag(tag)?;
        let element_count = self.u32()? as usize;
        let byte_count = self.u32()? as usize;
        self.section_end = self.cursor + byte_count;
        Ok(Some((kind, element_count, byte_count)))
    }

    fn read_code_image(&mut self, byte_count: usize) -> InputResult<Vec<Command>> {
        let end = self.cursor + byte_count;
        let mut out = Vec::new();
        while self.cursor < end {
            out.push(self.command()?);
        }
        Ok(out)
    }

    fn read_data_image(&mut self, byte_count: usize) -> InputResult<Vec<Value>> {
        let end = self.cursor + byte_count;
        let mut out = Vec::new();
        while self.cursor < end {
            out.push(self.value()?);
        }
        Ok(out)
    }

    fn read_stack_image(&mut self, byte_count: usize) -> InputResult<Vec<Value>> {
        self.read_data_image(byte_count)
    }

    fn read_symbol_map(&mut self, byte_count: usize) -> InputResult<SymbolMap> {
        let end = self.cursor + byte_count;
        let mut map = SymbolMap::default();
        while self.cursor < end {
            let (hash, name, symbol) = self.symbol_entry()?;
            map.insert(hash, (name, symbol));
        }
        Ok(map)
    }

    fn read_stream(&mut self) -> InputResult<DecodeResult> {
        if self.cursor >= self.section_end {
            return Ok(DecodeResult {
                element: Some(DecodeElement::Nothing),
                mentioned_symbols: SymbolMap::default(),
                referenced_names: Vec::new(),
            });
        }
        let tag = self.u8()?;
        let element = match tag {
            0 => DecodeElement::Command(self.command()?),
            1 => DecodeElement::Data(self.value()?),
            2 => DecodeElement::Nothing,
            other => return Err(InputError::MalformedSection(format!("unknown stream element tag {other}"))),
        };
        let symbol_count = self.u32()?;
        let mut mentioned_symbols = SymbolMap::default();
        for _ in 0..symbol_count {
            let (hash, name, symbol) = self.symbol_entry()?;
            mentioned_symbols.insert(hash, (name, symbol));
        }
        Ok(DecodeResult {
            element: Some(element),
            mentioned_symbols,
            referenced_names: Vec::new(),
        })
    }
}

/// Serializes a context's sections into a growable byte buffer, in the
/// fixed order `CodeImage, DataImage, StackImage, SymbolMap`.
#[derive(Default)]
pub struct ImageWriter {
    pub bytes: Vec<u8>,
}

impl ImageWriter {
    pub fn new() -> Self {
        ImageWriter::default()
    }

    fn push_value(buf: &mut Vec<u8>, value: &Value) {
        match value {
            Value::None => buf.push(0),
            Value::Integer(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
        }
    }

    fn push_section(buf: &mut Vec<u8>, section: Section) {
        buf.push(match section {
            Section::Code => 0,
            Section::Data => 1,
            Section::Bytepool => 2,
            Section::Register => 3,
            Section::Frame => 4,
            Section::FrameBack => 5,
            Section::None => 6,
        });
    }

    fn push_reference(buf: &mut Vec<u8>, reference: &Reference) {
        Self::push_section(buf, reference.global_section);
        buf.push(reference.components.len() as u8);
        for component in &reference.components {
            match component.base {
                Base::Definition => buf.push(0),
                Base::Symbol(h) => {
                    buf.push(1);
                    buf.extend_from_slice(&h.to_le_bytes());
                }
                Base::MemoryRef(a) => {
                    buf.push(2);
                    buf.extend_from_slice(&a.to_le_bytes());
                }
            }
            match component.indirection {
                None => buf.push(0),
                Some(s) => {
                    buf.push(1);
                    Self::push_section(buf, s);
                }
            }
        }
    }

    fn push_command(buf: &mut Vec<u8>, cmd: &Command) {
        buf.extend_from_slice(&cmd.opcode_id.to_le_bytes());
        buf.push(match cmd.value_type {
            ValueType::Integer => 0,
            ValueType::Float => 1,
            ValueType::Service => 2,
        });
        match &cmd.arg {
            Argument::None => buf.push(0),
            Argument::Reference(r) => {
                buf.push(1);
                Self::push_reference(buf, r);
            }
            Argument::ImmediateValue(v) => {
                buf.push(2);
                Self::push_value(buf, v);
            }
            Argument::ImmediateIndex(i) => {
                buf.push(3);
                buf.extend_from_slice(&i.to_le_bytes());
            }
        }
    }

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn push_symbol_entry(buf: &mut Vec<u8>, hash: u64, name: &str, symbol: &Symbol) {
        buf.extend_from_slice(&hash.to_le_bytes());
        Self::push_string(buf, name);
        buf.push(symbol.is_resolved as u8);
        Self::push_reference(buf, &symbol.reference);
    }

    fn push_section_header(&mut self, kind: SectionType, element_count: usize, payload: &[u8]) {
        self.bytes.push(section_tag(kind));
        self.bytes.extend_from_slice(&(element_count as u32).to_le_bytes());
        self.bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(payload);
    }
}

impl Writer for ImageWriter {
    fn write_code_image(&mut self, code: &[Command]) -> InputResult<()> {
        let mut payload = Vec::new();
        for cmd in code {
            Self::push_command(&mut payload, cmd);
        }
        self.push_section_header(SectionType::CodeImage, code.len(), &payload);
        Ok(())
    }

    fn write_data_image(&mut self, data: &[Value]) -> InputResult<()> {
        let mut payload = Vec::new();
        for value in data {
            Self::push_value(&mut payload, value);
        }
        self.push_section_header(SectionType::DataImage, data.len(), &payload);
        Ok(())
    }

    fn write_stack_image(&mut self, stack: &[Value]) -> InputResult<()> {
        let mut payload = Vec::new();
        for value in stack {
            Self::push_value(&mut payload, value);
        }
        self.push_section_header(SectionType::StackImage, stack.len(), &payload);
        Ok(())
    }

    fn write_symbol_map(&mut self, symbols: &SymbolMap) -> InputResult<()> {
        let mut payload = Vec::new();
        for (hash, (name, symbol)) in symbols {
            Self::push_symbol_entry(&mut payload, *hash, name, symbol);
        }
        self.push_section_header(SectionType::SymbolMap, symbols.len(), &payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_image_round_trips() {
        let code = vec![
            Command::new(0, ValueType::Integer, Argument::ImmediateValue(Value::Integer(7))),
            Command::new(1, ValueType::Integer, Argument::None),
        ];
        let mut writer = ImageWriter::new();
        writer.write_code_image(&code).unwrap();

        let mut reader = ImageReader::new(&writer.bytes);
        let (kind, count, byte_count) = reader.next_section().unwrap().unwrap();
        assert_eq!(kind, SectionType::CodeImage);
        assert_eq!(count, 2);
        let decoded = reader.read_code_image(byte_count).unwrap();
        assert_eq!(decoded, code);
    }

    #[test]
    fn symbol_map_round_trips() {
        let mut map = SymbolMap::default();
        map.insert(
            42,
            ("x".to_string(), Symbol::new(42, Reference::simple(Section::Data, Component::direct(Base::MemoryRef(4))), true)),
        );
        let mut writer = ImageWriter::new();
        writer.write_symbol_map(&map).unwrap();

        let mut reader = ImageReader::new(&writer.bytes);
        let (kind, count, byte_count) = reader.next_section().unwrap().unwrap();
        assert_eq!(kind, SectionType::SymbolMap);
        assert_eq!(count, 1);
        let decoded = reader.read_symbol_map(byte_count).unwrap();
        assert_eq!(decoded.get(&42).unwrap().1.reference, map.get(&42).unwrap().1.reference);
    }

    #[test]
    fn premature_eof_is_reported() {
        let mut reader = ImageReader::new(&[TAG_CODE_IMAGE, 0, 0]);
        assert!(matches!(reader.next_section(), Err(InputError::PrematureEof)));
    }
}
