//! A line-oriented scanner/parser for the textual assembly syntax: one
//! `Command`, one `.data` literal, or one `label:` definition per
//! non-blank, non-comment line.
//!
//! ```text
//! # a loop that counts from 0 to 3 and exits
//! start:
//!     push_ref count
//!     push_imm 3
//!     cmp
//!     jmp_if_zero done
//!     push_ref count
//!     push_imm 1
//!     add
//!     push_ref count:(base + 0)
//!     jmp start
//! done:
//!     exit
//! count:
//! .data 0
//! ```

use stackvm_core::command::{Argument, Command};
use stackvm_core::commandset::{ArgumentKind, CommandSet};
use stackvm_core::error::{InputError, InputResult};
use stackvm_core::reader::{DecodeElement, DecodeResult, Reader, SectionType};
use stackvm_core::reference::{Base, Component, Reference};
use stackvm_core::section::Section;
use stackvm_core::symbol::{hash_name, Symbol, SymbolMap};
use stackvm_core::value::{Value, ValueType};

use crate::error::{err, Location, ParseError, ParseResult};

/// Reads a textual program into a stream of [`DecodeResult`]s. Stateless
/// beyond the scan cursor; never touches the MMU directly (per §4.8).
pub struct AsmReader<'a> {
    commands: &'a CommandSet,
    lines: Vec<(usize, String)>,
    cursor: usize,
    pending_label: Option<(String, Location)>,
    section_returned: bool,
}

impl<'a> AsmReader<'a> {
    pub fn new(source: &str, commands: &'a CommandSet) -> Self {
        let lines = source
            .lines()
            .enumerate()
            .filter_map(|(i, raw)| {
                let without_comment = match raw.find('#') {
                    Some(idx) => &raw[..idx],
                    None => raw,
                };
                let trimmed = without_comment.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some((i + 1, trimmed.to_string()))
                }
            })
            .collect();

        AsmReader {
            commands,
            lines,
            cursor: 0,
            pending_label: None,
            section_returned: false,
        }
    }

    fn label_symbols(pending: Option<(String, Location)>, section: Section) -> SymbolMap {
        let mut map = SymbolMap::default();
        if let Some((name, _)) = pending {
            let hash = hash_name(&name);
            let symbol = Symbol::new(hash, Reference::simple(section, Component::direct(Base::Definition)), true);
            map.insert(hash, (name, symbol));
        }
        map
    }

    fn parse_instruction(&self, text: &str, loc: Location) -> ParseResult<(Command, Vec<String>)> {
        let mut parts = text.splitn(2, char::is_whitespace);
        let mnemonic_token = parts.next().unwrap_or_default();
        let operand_text = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let (mnemonic_base, value_type) = match mnemonic_token.strip_suffix(".f") {
            Some(base) => (base, ValueType::Float),
            None => (mnemonic_token, ValueType::Integer),
        };

        let opcode_id = match self.commands.opcode_of(mnemonic_base) {
            Some(id) => id,
            None => return err!(loc, "unknown mnemonic \"{}\"", mnemonic_base),
        };
        let traits = self
            .commands
            .decode(opcode_id)
            .map_err(|e| ParseError { location: loc, message: e.to_string() })?;

        let (arg, referenced) =
            Self::parse_operand(mnemonic_base, traits.argument_kind, value_type, operand_text, loc)?;
        Ok((Command::new(opcode_id, value_type, arg), referenced))
    }

    fn parse_operand(
        mnemonic_base: &str,
        kind: ArgumentKind,
        value_type: ValueType,
        text: Option<&str>,
        loc: Location,
    ) -> ParseResult<(Argument, Vec<String>)> {
        match (kind, text) {
            (ArgumentKind::None, None) => Ok((Argument::None, Vec::new())),
            (ArgumentKind::None, Some(extra)) => {
                err!(loc, "\"{}\" takes no operand, found \"{}\"", mnemonic_base, extra)
            }
            (ArgumentKind::ImmediateIndex, Some(text)) => text
                .parse::<u64>()
                .map(|v| (Argument::ImmediateIndex(v), Vec::new()))
                .or_else(|_| err!(loc, "expected a non-negative integer index, found \"{}\"", text)),
            (ArgumentKind::ImmediateIndex, None) => err!(loc, "\"{}\" requires an index operand", mnemonic_base),
            (ArgumentKind::ImmediateValue, Some(text)) => {
                Self::parse_value_literal(text, value_type, loc).map(|v| (Argument::ImmediateValue(v), Vec::new()))
            }
            (ArgumentKind::ImmediateValue, None) => err!(loc, "\"{}\" requires an immediate operand", mnemonic_base),
            (ArgumentKind::Reference, Some(text)) => {
                let (reference, name) = Self::parse_reference(mnemonic_base, text, loc)?;
                Ok((Argument::Reference(reference), name.into_iter().collect()))
            }
            (ArgumentKind::Reference, None) => err!(loc, "\"{}\" requires a reference operand", mnemonic_base),
        }
    }

    fn parse_value_literal(text: &str, value_type: ValueType, loc: Location) -> ParseResult<Value> {
        match value_type {
            ValueType::Integer => text
                .parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| err!(loc, "expected an integer literal, found \"{}\"", text)),
            ValueType::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .or_else(|_| err!(loc, "expected a float literal, found \"{}\"", text)),
            ValueType::Service => err!(loc, "an immediate operand cannot carry the service type"),
        }
    }

    fn parse_reference(mnemonic_base: &str, text: &str, loc: Location) -> ParseResult<(Reference, Option<String>)> {
        let global_section = if matches!(mnemonic_base, "jmp" | "jmp_if_zero" | "jmp_if_not_zero") {
            Section::Code
        } else {
            Section::Data
        };

        if let Some((name, offset)) = parse_bicomponent(text) {
            if !is_ident(&name) {
                return err!(loc, "\"{}\" is not a valid symbol name", name);
            }
            let hash = hash_name(&name);
            let reference = Reference::bicomponent(
                global_section,
                Component::direct(Base::Symbol(hash)),
                Component::direct(Base::MemoryRef(offset as u64)),
            );
            return Ok((reference, Some(name)));
        }

        if let Ok(address) = text.parse::<i64>() {
            let reference = Reference::simple(global_section, Component::direct(Base::MemoryRef(address as u64)));
            return Ok((reference, None));
        }

        if is_ident(text) {
            let hash = hash_name(text);
            let reference = Reference::simple(global_section, Component::direct(Base::Symbol(hash)));
            return Ok((reference, Some(text.to_string())));
        }

        err!(loc, "\"{}\" is not a valid reference", text)
    }
}

fn is_ident(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_label_line(text: &str) -> bool {
    text.ends_with(':') && is_ident(&text[..text.len() - 1])
}

/// Parses `name:(base + offset)` / `name:(base - offset)`, returning the
/// symbol name and the signed offset. `None` if `text` isn't shaped like
/// a bicomponent reference at all (callers fall through to simpler forms).
fn parse_bicomponent(text: &str) -> Option<(String, i64)> {
    let (name, rest) = text.split_once(":(")?;
    let rest = rest.strip_suffix(')')?.trim();
    let rest = rest.strip_prefix("base")?.trim();
    let (sign, digits) = if let Some(n) = rest.strip_prefix('+') {
        (1i64, n.trim())
    } else if let Some(n) = rest.strip_prefix('-') {
        (-1i64, n.trim())
    } else {
        return None;
    };
    let offset: i64 = digits.parse().ok()?;
    Some((name.trim().to_string(), sign * offset))
}

impl<'a> Reader for AsmReader<'a> {
    fn next_section(&mut self) -> InputResult<Option<(SectionType, usize, usize)>> {
        if self.section_returned {
            return Ok(None);
        }
        self.section_returned = true;
        let remaining_lines = self.lines.len() - self.cursor;
        let remaining_bytes: usize = self.lines[self.cursor..].iter().map(|(_, l)| l.len() + 1).sum();
        Ok(Some((SectionType::NonUniform, remaining_lines, remaining_bytes)))
    }

    fn read_code_image(&mut self, _byte_count: usize) -> InputResult<Vec<Command>> {
        Err(InputError::MalformedSection("textual assembly has no uniform code-image section".to_string()))
    }

    fn read_data_image(&mut self, _byte_count: usize) -> InputResult<Vec<Value>> {
        Err(InputError::MalformedSection("textual assembly has no uniform data-image section".to_string()))
    }

    fn read_stack_image(&mut self, _byte_count: usize) -> InputResult<Vec<Value>> {
        Err(InputError::MalformedSection("textual assembly has no uniform stack-image section".to_string()))
    }

    fn read_symbol_map(&mut self, _byte_count: usize) -> InputResult<SymbolMap> {
        Err(InputError::MalformedSection("textual assembly has no standalone symbol-map section".to_string()))
    }

    fn read_stream(&mut self) -> InputResult<DecodeResult> {
        loop {
            let Some((line_number, text)) = self.lines.get(self.cursor).cloned() else {
                if let Some((name, loc)) = self.pending_label.take() {
                    return Err(ParseError {
                        location: loc,
                        message: format!("label \"{name}\" has no following instruction or data"),
                    }
                    .into());
                }
                return Ok(DecodeResult {
                    element: Some(DecodeElement::Nothing),
                    mentioned_symbols: SymbolMap::default(),
                    referenced_names: Vec::new(),
                });
            };
            self.cursor += 1;
            let loc = Location { line_number };

            if is_label_line(&text) {
                let name = text[..text.len() - 1].to_string();
                if let Some((dangling, dangling_loc)) = self.pending_label.replace((name, loc)) {
                    return Err(ParseError {
                        location: dangling_loc,
                        message: format!("label \"{dangling}\" has no following instruction or data"),
                    }
                    .into());
                }
                continue;
            }

            let pending = self.pending_label.take();

            if let Some(rest) = text.strip_prefix(".data") {
                let value = Self::parse_value_literal_any(rest.trim(), loc)?;
                return Ok(DecodeResult {
                    element: Some(DecodeElement::Data(value)),
                    mentioned_symbols: Self::label_symbols(pending, Section::Data),
                    referenced_names: Vec::new(),
                });
            }

            let (cmd, referenced) = self.parse_instruction(&text, loc)?;
            return Ok(DecodeResult {
                element: Some(DecodeElement::Command(cmd)),
                mentioned_symbols: Self::label_symbols(pending, Section::Code),
                referenced_names: referenced.into_iter().map(|name| (hash_name(&name), name)).collect(),
            });
        }
    }
}

impl<'a> AsmReader<'a> {
    /// `.data` literals carry no mnemonic to fix their type, so infer it
    /// from the literal's own shape: a decimal point means `Float`.
    fn parse_value_literal_any(text: &str, loc: Location) -> ParseResult<Value> {
        if text.contains('.') {
            Self::parse_value_literal(text, ValueType::Float, loc)
        } else {
            Self::parse_value_literal(text, ValueType::Integer, loc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackvm_core::commandset::standard;

    fn drain(reader: &mut AsmReader<'_>) -> Vec<DecodeResult> {
        let mut out = Vec::new();
        loop {
            let decoded = reader.read_stream().unwrap();
            let done = matches!(decoded.element, None | Some(DecodeElement::Nothing));
            out.push(decoded);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn parses_a_straight_line_program() {
        let commands = standard();
        let source = "push_imm 2\npush_imm 3\nadd\nexit\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        let elements = drain(&mut reader);
        assert_eq!(elements.len(), 5); // 4 commands + the trailing Nothing
        assert!(matches!(elements[0].element, Some(DecodeElement::Command(_))));
        assert!(matches!(elements[4].element, Some(DecodeElement::Nothing)));
    }

    #[test]
    fn label_definition_attaches_to_the_next_command() {
        let commands = standard();
        let source = "start:\n  exit\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        let decoded = reader.read_stream().unwrap();
        assert_eq!(decoded.mentioned_symbols.len(), 1);
        let (_, symbol) = decoded.mentioned_symbols.get(&hash_name("start")).unwrap();
        assert_eq!(symbol.reference.global_section, Section::Code);
    }

    #[test]
    fn bicomponent_reference_parses_symbol_plus_offset() {
        let commands = standard();
        let source = "push_ref count:(base + 4)\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        let decoded = reader.read_stream().unwrap();
        match decoded.element {
            Some(DecodeElement::Command(cmd)) => match cmd.arg {
                Argument::Reference(r) => {
                    assert_eq!(r.components.len(), 2);
                    assert_eq!(r.components[1].base, Base::MemoryRef(4));
                }
                other => panic!("expected a reference argument, got {other:?}"),
            },
            other => panic!("expected a command, got {other:?}"),
        }
    }

    #[test]
    fn push_ref_records_the_referenced_name_for_diagnostics() {
        let commands = standard();
        let source = "push_ref foo\nexit\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        let decoded = reader.read_stream().unwrap();
        assert_eq!(decoded.referenced_names, vec![(hash_name("foo"), "foo".to_string())]);
    }

    #[test]
    fn dangling_label_is_a_parse_error() {
        let commands = standard();
        let source = "start:\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        assert!(reader.read_stream().is_err());
    }

    #[test]
    fn unknown_mnemonic_is_a_parse_error() {
        let commands = standard();
        let source = "frobnicate\n";
        let mut reader = AsmReader::new(source, &commands);
        reader.next_section().unwrap();
        assert!(reader.read_stream().is_err());
    }
}
