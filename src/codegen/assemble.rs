//! Module assembler.
//!
//! Runs once, after every statement has compiled. It deduplicates function
//! types, compacts the import table to the host functions actually called,
//! resolves symbolic call targets against that compacted order and writes
//! the sections in the order the loader expects: type, import, function,
//! memory, global, export, code, data.

use crate::codegen::error::AssembleError;
use crate::codegen::function::FunctionContext;
use crate::codegen::instr::CallTarget;
use crate::codegen::layout::{DataItem, MemoryLayout, StringPool};
use crate::codegen::{GLOBAL_LINE, RESERVED_GLOBALS};
use crate::compiler::imports::{HostFn, ImportRegistry};
use log::info;
use std::fmt;
use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    FunctionSection, GlobalSection, GlobalType, ImportSection, MemorySection, MemoryType,
    Module, TypeSection, ValType,
};

/// Everything the compiler hands to the assembler.
#[derive(Debug, Clone)]
pub struct Program {
    /// Function bodies; index 0 is `setup`.
    pub functions: Vec<FunctionContext>,
    /// Host functions referenced anywhere.
    pub imports: ImportRegistry,
    /// Types of the per-variable globals, in slot order.
    pub globals: Vec<ValType>,
    /// String literals.
    pub pool: StringPool,
    /// DATA items in source order.
    pub data: Vec<DataItem>,
}

/// Counts describing an assembled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSummary {
    pub imports: usize,
    pub functions: usize,
    pub globals: usize,
    pub pool_bytes: usize,
    pub data_items: usize,
    pub module_bytes: usize,
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} imports, {} local functions, {} globals, {} bytes data ({} DATA items)",
            self.imports, self.functions, self.globals, self.pool_bytes, self.data_items
        )
    }
}

/// Assembler output.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub bytes: Vec<u8>,
    pub summary: ModuleSummary,
}

/// Function signatures in first-seen order.
#[derive(Default)]
struct TypeTable {
    entries: Vec<(Vec<ValType>, Vec<ValType>)>,
}

impl TypeTable {
    fn intern(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        if let Some(i) = self
            .entries
            .iter()
            .position(|(p, r)| p == params && r == results)
        {
            return i as u32;
        }
        self.entries.push((params.to_vec(), results.to_vec()));
        (self.entries.len() - 1) as u32
    }
}

/// Builds the binary module.
///
/// The output depends only on `program`, so identical input always yields
/// byte-identical modules.
pub fn assemble(program: &Program) -> Result<Assembled, AssembleError> {
    let layout = MemoryLayout::new(program.pool.len(), program.data.len())?;

    let used: Vec<HostFn> = program.imports.used().collect();
    let remap = program.imports.compacted_indices();
    let import_count = used.len() as u32;
    let resolve = |target: CallTarget| match target {
        // Every emitted host call marks its import, so the entry exists.
        CallTarget::Host(host) => remap[host as usize].unwrap_or_default(),
        CallTarget::Function(id) => import_count + id.0,
    };

    let mut types = TypeTable::default();
    let import_types: Vec<u32> = used
        .iter()
        .map(|host| {
            let d = host.descriptor();
            types.intern(d.params, d.results)
        })
        .collect();
    let function_types: Vec<u32> = program
        .functions
        .iter()
        .map(|f| {
            let (params, results) = f.signature();
            types.intern(&params, &results)
        })
        .collect();

    let mut module = Module::new();

    let mut type_section = TypeSection::new();
    for (params, results) in &types.entries {
        type_section
            .ty()
            .function(params.iter().copied(), results.iter().copied());
    }
    module.section(&type_section);

    let mut imports = ImportSection::new();
    for (host, ty) in used.iter().zip(&import_types) {
        imports.import("env", host.name(), EntityType::Function(*ty));
    }
    module.section(&imports);

    let mut functions = FunctionSection::new();
    for ty in &function_types {
        functions.function(*ty);
    }
    module.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: 1,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    let reserved = [0, layout.heap_start as i32, layout.data_base as i32, 0];
    let mut globals = GlobalSection::new();
    for init in reserved {
        globals.global(mutable(ValType::I32), &ConstExpr::i32_const(init));
    }
    for ty in &program.globals {
        let init = match ty {
            ValType::F32 => ConstExpr::f32_const(0.0_f32.into()),
            _ => ConstExpr::i32_const(0),
        };
        globals.global(mutable(*ty), &init);
    }
    module.section(&globals);

    let mut exports = ExportSection::new();
    exports.export("setup", ExportKind::Func, import_count);
    exports.export("memory", ExportKind::Memory, 0);
    exports.export("__line", ExportKind::Global, GLOBAL_LINE);
    module.section(&exports);

    let mut code = CodeSection::new();
    for function in &program.functions {
        code.function(&function.encode(resolve));
    }
    module.section(&code);

    let mut data = DataSection::new();
    data.active(
        0,
        &ConstExpr::i32_const(0),
        layout.segment(&program.pool, &program.data),
    );
    module.section(&data);

    let bytes = module.finish();
    let summary = ModuleSummary {
        imports: used.len(),
        functions: program.functions.len(),
        globals: RESERVED_GLOBALS as usize + program.globals.len(),
        pool_bytes: program.pool.len(),
        data_items: program.data.len(),
        module_bytes: bytes.len(),
    };
    info!("assembled {} bytes: {}", bytes.len(), summary);
    Ok(Assembled { bytes, summary })
}

fn mutable(val_type: ValType) -> GlobalType {
    GlobalType {
        val_type,
        mutable: true,
        shared: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::function::FuncId;
    use crate::codegen::instr::{Const, Instr};
    use wasmparser::{Parser, Payload, Validator};

    fn program(functions: Vec<FunctionContext>, imports: ImportRegistry) -> Program {
        Program {
            functions,
            imports,
            globals: vec![ValType::I32, ValType::F32],
            pool: StringPool::new(),
            data: Vec::new(),
        }
    }

    fn import_names(bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for payload in Parser::new(0).parse_all(bytes) {
            if let Payload::ImportSection(reader) = payload.unwrap() {
                for import in reader {
                    names.push(import.unwrap().name.to_string());
                }
            }
        }
        names
    }

    #[test]
    fn test_minimal_module_validates() {
        let setup = FunctionContext::new("setup", vec![], None);
        let out = assemble(&program(vec![setup], ImportRegistry::new())).unwrap();
        Validator::new().validate_all(&out.bytes).unwrap();
        assert_eq!(out.summary.imports, 0);
        assert_eq!(out.summary.globals, 6);
    }

    #[test]
    fn test_calls_are_remapped_to_compacted_imports() {
        let mut imports = ImportRegistry::new();
        imports.mark(HostFn::PrintI32);
        let mut setup = FunctionContext::new("setup", vec![], None);
        setup.push_const(Const::I32(7));
        setup.emit(Instr::Call(CallTarget::Host(HostFn::PrintI32)));
        setup.emit(Instr::Call(CallTarget::Function(FuncId(1))));
        setup.emit(Instr::Drop);
        let mut sub = FunctionContext::new("S", vec![], Some(ValType::I32));
        sub.push_const(Const::I32(0));
        let out = assemble(&program(vec![setup, sub], imports)).unwrap();
        Validator::new().validate_all(&out.bytes).unwrap();
        assert_eq!(import_names(&out.bytes), vec!["print_i32"]);
    }

    #[test]
    fn test_identical_input_is_byte_identical() {
        let build = || {
            let mut imports = ImportRegistry::new();
            imports.mark(HostFn::DelayMs);
            imports.mark(HostFn::Millis);
            let mut setup = FunctionContext::new("setup", vec![], None);
            setup.emit(Instr::Call(CallTarget::Host(HostFn::Millis)));
            setup.emit(Instr::Call(CallTarget::Host(HostFn::DelayMs)));
            assemble(&program(vec![setup], imports)).unwrap().bytes
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_types_are_deduplicated() {
        let mut types = TypeTable::default();
        let a = types.intern(&[ValType::I32], &[]);
        let b = types.intern(&[], &[]);
        let c = types.intern(&[ValType::I32], &[]);
        assert_eq!((a, b, c), (0, 1, 0));
    }
}
