//! # bas2wasm
//!
//! A single-pass compiler from a line-oriented BASIC scripting dialect to
//! self-contained WebAssembly modules for embedded LED controllers.
//!
//! ## Architecture
//!
//! There is no syntax tree. Each source line is lexed on demand and its
//! statement is compiled straight into the instruction list of the current
//! function:
//!
//! ```text
//! Source line → Lexer → Compiler (expressions, statements) → FunctionContext
//!                                                               ↓ (after the last line)
//!                                                    Assembler → .wasm bytes
//! ```
//!
//! - [`lexer`] - Tokenizes one line at a time
//! - [`compiler`] - Symbol table, host import catalog, expression and statement compiler
//! - [`codegen`] - Instruction lists, constant folding, memory layout and the module assembler
//! - [`lsp`] - Language Server Protocol front end for editors
//!
//! ## Example
//!
//! ```
//! let wasm = bas2wasm::compile("FOR I = 1 TO 3\nPRINT I\nNEXT\n").unwrap();
//! assert_eq!(&wasm[..4], b"\0asm");
//! ```

pub mod codegen;
pub mod compiler;
pub mod lexer;
pub mod lsp;

use codegen::{AssembleError, Assembled, assemble};
use compiler::{CompileError, compile_program};
use thiserror::Error;

/// Any failure between source text and module bytes.
#[derive(Debug, Error)]
pub enum Error {
    /// The source is not a valid program.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The program does not fit the module layout.
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Compiles BASIC source to a binary WebAssembly module.
pub fn compile(source: &str) -> Result<Vec<u8>, Error> {
    Ok(compile_with_summary(source)?.bytes)
}

/// Like [`compile`], also returning counts describing the module.
pub fn compile_with_summary(source: &str) -> Result<Assembled, Error> {
    let program = compile_program(source)?;
    Ok(assemble(&program)?)
}

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::codegen::{AssembleError, Assembled, ModuleSummary, Program};
    pub use crate::compiler::{CompileError, Compiler, ErrorKind, Kind, SymbolTable};
    pub use crate::lexer::{Lexer, Token, TokenKind};
    pub use crate::{Error, compile, compile_with_summary};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ErrorKind;
    use wasmparser::{Operator, Parser, Payload};
    use wasmtime::{Caller, Engine, Linker, Module, Store};

    /// Output lines recorded by the host stubs.
    type Output = Vec<String>;

    fn memory_bytes(caller: &mut Caller<'_, Output>) -> Vec<u8> {
        match caller.get_export("memory").and_then(|e| e.into_memory()) {
            Some(memory) => memory.data(&caller).to_vec(),
            None => Vec::new(),
        }
    }

    fn c_string(memory: &[u8], at: usize) -> String {
        let end = memory[at..].iter().position(|b| *b == 0).unwrap_or(0) + at;
        String::from_utf8_lossy(&memory[at..end]).into_owned()
    }

    fn word(memory: &[u8], at: usize) -> [u8; 4] {
        [memory[at], memory[at + 1], memory[at + 2], memory[at + 3]]
    }

    /// A minimal printf over the argument buffer: `%d`, `%s`, `%f`.
    fn printf(memory: &[u8], format: i32, args: i32) -> String {
        let format = c_string(memory, format as usize);
        let mut out = String::new();
        let mut cursor = args as usize;
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('d') => out.push_str(&i32::from_le_bytes(word(memory, cursor)).to_string()),
                Some('f') => out.push_str(&f32::from_le_bytes(word(memory, cursor)).to_string()),
                Some('s') => {
                    let at = i32::from_le_bytes(word(memory, cursor)) as usize;
                    out.push_str(&c_string(memory, at));
                }
                _ => out.push('%'),
            }
            cursor += 4;
        }
        out.trim_end_matches('\n').to_string()
    }

    /// Compiles `source`, runs `setup` and returns what it printed.
    ///
    /// Strings are never allocated by these stubs: copy returns its
    /// argument and free does nothing, so literals print as-is.
    fn run(source: &str) -> Output {
        let bytes = compile(source).unwrap();
        let engine = Engine::default();
        let module = Module::new(&engine, &bytes).unwrap();
        let mut linker: Linker<Output> = Linker::new(&engine);
        linker
            .func_wrap("env", "print_i32", |mut caller: Caller<'_, Output>, v: i32| {
                caller.data_mut().push(v.to_string());
            })
            .unwrap();
        linker
            .func_wrap("env", "print_f32", |mut caller: Caller<'_, Output>, v: f32| {
                caller.data_mut().push(v.to_string());
            })
            .unwrap();
        linker
            .func_wrap(
                "env",
                "host_printf",
                |mut caller: Caller<'_, Output>, format: i32, args: i32| -> i32 {
                    let memory = memory_bytes(&mut caller);
                    let line = printf(&memory, format, args);
                    caller.data_mut().push(line);
                    0
                },
            )
            .unwrap();
        linker
            .func_wrap("env", "basic_str_copy", |s: i32| -> i32 { s })
            .unwrap();
        linker
            .func_wrap("env", "basic_str_free", |_: i32| {})
            .unwrap();
        linker.define_unknown_imports_as_traps(&module).unwrap();

        let mut store = Store::new(&engine, Vec::new());
        let instance = linker.instantiate(&mut store, &module).unwrap();
        let setup = instance
            .get_typed_func::<(), ()>(&mut store, "setup")
            .unwrap();
        setup.call(&mut store, ()).unwrap();
        store.into_data()
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

    fn count_loops(bytes: &[u8]) -> usize {
        let mut loops = 0;
        for payload in Parser::new(0).parse_all(bytes) {
            if let Payload::CodeSectionEntry(body) = payload.unwrap() {
                let mut reader = body.get_operators_reader().unwrap();
                while !reader.eof() {
                    if matches!(reader.read().unwrap(), Operator::Loop { .. }) {
                        loops += 1;
                    }
                }
            }
        }
        loops
    }

    fn lines(values: &[&str]) -> Output {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_end_to_end_counted_loop() {
        let source = "FOR I = 1 TO 3\nPRINT I\nNEXT";
        let bytes = compile(source).unwrap();
        assert_eq!(import_names(&bytes), vec!["print_i32"]);
        assert_eq!(count_loops(&bytes), 1);
        assert_eq!(run(source), lines(&["1", "2", "3"]));
    }

    #[test]
    fn test_determinism() {
        let source = "A$ = \"x\"\nDATA 1, 2.5\nSUB S(N)\nPRINT N\nEND SUB\nS 2\nPRINT SIN(1.0)";
        assert_eq!(compile(source).unwrap(), compile(source).unwrap());
    }

    #[test]
    fn test_import_minimality() {
        let with = compile("X# = SIN(1.5)\nPRINT X#").unwrap();
        assert_eq!(import_names(&with), vec!["print_f32", "sinf"]);
        let without = compile("X# = 1.5\nPRINT X#").unwrap();
        assert_eq!(import_names(&without), vec!["print_f32"]);
    }

    #[test]
    fn test_control_stack_balance() {
        for source in ["WHILE 1", "WHILE 1\nWEND\nWEND", "FOR I = 1 TO 2\nEND IF", "END SELECT"] {
            assert!(matches!(compile(source), Err(Error::Compile(_))), "{source}");
        }
    }

    #[test]
    fn test_unterminated_if_fails() {
        match compile("IF X > 0\nPRINT X") {
            Err(Error::Compile(e)) => {
                assert!(matches!(e.kind, ErrorKind::UnterminatedBlock { .. }));
                assert_eq!(e.to_string(), "line 1: unterminated block (IF without END IF)");
            }
            other => panic!("expected a compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_fold_matches_runtime() {
        assert_eq!(run("PRINT 2 + 3 * 4"), lines(&["14"]));
        assert_eq!(run("X = 2\nPRINT X + 3 * 4"), lines(&["14"]));
        assert_eq!(run("PRINT 7 \\ 2\nPRINT -7 MOD 3"), lines(&["3", "-1"]));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(run("N = 2.9\nPRINT N"), lines(&["2"]));
        assert_eq!(run("N = -2.9\nPRINT N"), lines(&["-2"]));
        assert_eq!(run("F# = 3\nPRINT F#"), lines(&["3"]));
        assert_eq!(run("F# = 1.5\nN = 0\nN = F# * 3\nPRINT N"), lines(&["4"]));
    }

    #[test]
    fn test_loop_iteration_counts() {
        assert_eq!(run("FOR I = 10 TO 1 STEP -1\nPRINT I\nNEXT").len(), 10);
        assert_eq!(run("FOR I = 1 TO 10\nPRINT I\nNEXT").len(), 10);
        assert_eq!(
            run("FOR I = 1 TO 10 STEP 2\nPRINT I\nNEXT I"),
            lines(&["1", "3", "5", "7", "9"])
        );
        assert!(run("FOR I = 5 TO 1\nPRINT I\nNEXT").is_empty());
    }

    #[test]
    fn test_subroutine_restores_parameter() {
        let source = "N = 7\nSUB S(N)\nN = N * 10\nPRINT N\nEND SUB\nS 3\nPRINT N";
        assert_eq!(run(source), lines(&["30", "7"]));
    }

    #[test]
    fn test_local_restores_on_return() {
        let source = "T = 1\nFUNCTION F(X)\nLOCAL T\nT = X + 1\nRETURN T * 2\nEND FUNCTION\nPRINT F(4)\nPRINT T";
        assert_eq!(run(source), lines(&["10", "1"]));
    }

    #[test]
    fn test_while_and_do_loops() {
        assert_eq!(run("I = 0\nWHILE I < 3\nI = I + 1\nWEND\nPRINT I"), lines(&["3"]));
        assert_eq!(run("I = 5\nDO\nI = I + 1\nLOOP UNTIL I > 2\nPRINT I"), lines(&["6"]));
        assert_eq!(run("I = 0\nDO WHILE I < 4\nI = I + 2\nLOOP\nPRINT I"), lines(&["4"]));
        assert_eq!(
            run("FOR I = 1 TO 10\nIF I = 3 THEN EXIT FOR\nNEXT\nPRINT I"),
            lines(&["3"])
        );
    }

    #[test]
    fn test_if_chains() {
        let source = "FOR X = 1 TO 3\nIF X = 1 THEN\nPRINT 10\nELSEIF X = 2 THEN\nPRINT 20\nELSE\nPRINT 30\nEND IF\nNEXT";
        assert_eq!(run(source), lines(&["10", "20", "30"]));
        assert_eq!(run("X = 0\nIF X THEN PRINT 1 ELSE PRINT 2"), lines(&["2"]));
    }

    #[test]
    fn test_select_case() {
        let source = "FOR X = 1 TO 4\nSELECT CASE X\nCASE 1\nPRINT 1\nCASE 2, 3\nPRINT 23\nCASE ELSE\nPRINT 0\nEND SELECT\nNEXT";
        assert_eq!(run(source), lines(&["1", "23", "23", "0"]));
        let source = "X = 9\nSELECT CASE X\nCASE IS < 5\nPRINT 1\nCASE IS >= 5\nPRINT 2\nEND SELECT";
        assert_eq!(run(source), lines(&["2"]));
    }

    #[test]
    fn test_data_and_read() {
        let source = "DATA 5, 2.5, \"hi\"\nREAD A, B#, C$\nPRINT A\nPRINT B#\nPRINT C$\nRESTORE\nREAD D#\nPRINT D#";
        assert_eq!(run(source), lines(&["5", "2.5", "hi", "5"]));
    }

    #[test]
    fn test_arrays() {
        let source = "DIM A(3)\nFOR I = 0 TO 2\nA(I) = I * I\nNEXT\nPRINT A(2)\nPRINT UBOUND(A)\nPRINT A(1) + A(2)";
        assert_eq!(run(source), lines(&["4", "3", "5"]));
    }

    #[test]
    fn test_neighbouring_arrays_stay_separate() {
        let source = "DIM A(3)\nDIM B(3)\nFOR I = 0 TO 2\nB(I) = 20 + I\nA(I) = 10 + I\nNEXT\nPRINT UBOUND(A)\nPRINT UBOUND(B)\nPRINT A(2)\nPRINT B(0)\nPRINT B(2)";
        assert_eq!(run(source), lines(&["3", "3", "12", "20", "22"]));
    }

    #[test]
    fn test_two_dimensional_array() {
        let source = "DIM M(2, 3)\nFOR R = 0 TO 1\nFOR C = 0 TO 2\nM(R, C) = R * 10 + C\nNEXT\nNEXT\nPRINT M(1, 2)\nPRINT M(0, 1)\nPRINT UBOUND(M, 1)\nPRINT UBOUND(M, 2)";
        assert_eq!(run(source), lines(&["12", "1", "2", "3"]));
    }

    #[test]
    fn test_option_base_one() {
        let source = "OPTION BASE 1\nDIM A(3)\nDIM B(1)\nFOR I = 1 TO 3\nA(I) = I\nNEXT\nB(1) = 7\nPRINT A(3) + A(1)\nPRINT B(1)\nPRINT LBOUND(A)\nPRINT UBOUND(B)";
        assert_eq!(run(source), lines(&["4", "7", "1", "1"]));
    }

    #[test]
    fn test_redim() {
        let source = "DIM A(2)\nA(0) = 5\nA(1) = 6\nREDIM PRESERVE A(4)\nA(3) = 9\nPRINT A(0) + A(1)\nPRINT A(2) + A(3)\nPRINT UBOUND(A)\nREDIM A(2)\nPRINT A(0)";
        assert_eq!(run(source), lines(&["11", "9", "4", "0"]));
        let source = "DIM A(4)\nFOR I = 0 TO 3\nA(I) = I + 1\nNEXT\nREDIM PRESERVE A(2)\nPRINT A(0) + A(1)\nPRINT UBOUND(A)";
        assert_eq!(run(source), lines(&["3", "2"]));
    }

    #[test]
    fn test_erase_clears_elements() {
        let source = "DIM A(2)\nA(0) = 3\nA(1) = 4\nERASE A\nPRINT A(0) + A(1)\nPRINT UBOUND(A)";
        assert_eq!(run(source), lines(&["0", "2"]));
        let source = "DIM S$(2)\nS$(0) = \"a\"\nERASE S$\nPRINT S$(0)";
        assert_eq!(run(source), lines(&[""]));
    }

    #[test]
    fn test_strings_and_format() {
        assert_eq!(run("A$ = \"hello\"\nPRINT A$\nPRINTS A$"), lines(&["hello", "hello"]));
        assert_eq!(run("PRINT"), lines(&[""]));
        assert_eq!(run("FORMAT \"n=% s=$\", 3, \"ok\""), lines(&["n=3 s=ok"]));
    }

    #[test]
    fn test_line_global_tracks_execution() {
        let bytes = compile("X = 1\nY = 2").unwrap();
        let engine = Engine::default();
        let module = Module::new(&engine, &bytes).unwrap();
        let mut store = Store::new(&engine, ());
        let instance = Linker::new(&engine).instantiate(&mut store, &module).unwrap();
        let setup = instance
            .get_typed_func::<(), ()>(&mut store, "setup")
            .unwrap();
        setup.call(&mut store, ()).unwrap();
        let line = instance.get_global(&mut store, "__line").unwrap();
        assert_eq!(line.get(&mut store).i32(), Some(2));
    }

    #[test]
    fn test_assemble_error_surfaces() {
        let big = "A$ = \"".to_string() + &"x".repeat(70_000) + "\"";
        assert!(matches!(compile(&big), Err(Error::Assemble(_))));
    }
}
