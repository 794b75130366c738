//! In-memory debug symbol table built by the code generator when asked
//! for one, mapping source identifiers and bytecode offsets back to
//! names for diagnostics. Grounded on
//! `original_source/Compiler/debugger-symbols.hpp`'s symbol/line
//! bookkeeping, kept here as a plain in-memory table rather than that
//! header's on-disk indent-tree format.

use std::collections::HashMap;

use crate::buffer::ByteBuffer;

#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub entry_offset: usize,
    pub locals: Vec<(String, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct DebugSymbols {
    pub globals: HashMap<String, i64>,
    pub functions: Vec<FunctionSymbol>,
    /// Bytecode offset -> source line, for mapping a faulting `ip` back
    /// to a line number.
    pub line_table: Vec<(usize, u32)>,
}

impl DebugSymbols {
    pub fn new() -> Self {
        DebugSymbols::default()
    }

    pub fn add_global(&mut self, name: String, address: i64) {
        self.globals.insert(name, address);
    }

    pub fn add_function(&mut self, symbol: FunctionSymbol) {
        self.functions.push(symbol);
    }

    pub fn record_line(&mut self, offset: usize, line: u32) {
        self.line_table.push((offset, line));
    }

    /// Line for the last recorded offset at or before `offset`, the same
    /// "closest preceding entry" lookup a line-table debugger uses.
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        self.line_table
            .iter()
            .rev()
            .find(|(recorded, _)| *recorded <= offset)
            .map(|(_, line)| *line)
    }

    pub fn function_containing(&self, offset: usize) -> Option<&FunctionSymbol> {
        self.functions
            .iter()
            .filter(|f| f.entry_offset <= offset)
            .max_by_key(|f| f.entry_offset)
    }

    /// Serializes the table to the `.debug` sidecar format: counted lists of
    /// null-terminated name strings paired with their offsets, the same
    /// counted-list shape the executable header uses for its two byte
    /// regions. Not read back by anything in this tree; it exists purely as
    /// an on-disk artifact for external tooling to inspect.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = ByteBuffer::new();

        buffer.push_u64(self.globals.len() as u64);
        for (name, address) in &self.globals {
            buffer.push_null_terminated_string(name);
            buffer.push_i64(*address);
        }

        buffer.push_u64(self.functions.len() as u64);
        for function in &self.functions {
            buffer.push_null_terminated_string(&function.name);
            buffer.push_u64(function.entry_offset as u64);
            buffer.push_u64(function.locals.len() as u64);
            for (name, offset) in &function.locals {
                buffer.push_null_terminated_string(name);
                buffer.push_i64(*offset as i64);
            }
        }

        buffer.push_u64(self.line_table.len() as u64);
        for (offset, line) in &self.line_table {
            buffer.push_u64(*offset as u64);
            buffer.push_u32(*line);
        }

        buffer.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_for_offset_picks_the_closest_preceding_entry() {
        let mut symbols = DebugSymbols::new();
        symbols.record_line(0, 1);
        symbols.record_line(10, 2);
        symbols.record_line(20, 3);
        assert_eq!(symbols.line_for_offset(15), Some(2));
        assert_eq!(symbols.line_for_offset(25), Some(3));
        assert_eq!(symbols.line_for_offset(0), Some(1));
    }

    #[test]
    fn to_bytes_is_nonempty_and_starts_with_the_global_count() {
        let mut symbols = DebugSymbols::new();
        symbols.add_global("counter".into(), 0);
        symbols.add_function(FunctionSymbol {
            name: "main".into(),
            entry_offset: 0,
            locals: vec![("n".into(), 16)],
        });
        let bytes = symbols.to_bytes();
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 1);
        assert!(bytes.len() > 8);
    }

    #[test]
    fn function_containing_finds_the_innermost_entry() {
        let mut symbols = DebugSymbols::new();
        symbols.add_function(FunctionSymbol {
            name: "main".into(),
            entry_offset: 0,
            locals: vec![],
        });
        symbols.add_function(FunctionSymbol {
            name: "helper".into(),
            entry_offset: 50,
            locals: vec![],
        });
        assert_eq!(symbols.function_containing(60).unwrap().name, "helper");
        assert_eq!(symbols.function_containing(10).unwrap().name, "main");
    }
}
