//! End-to-end tests: source text through the front end, the code
//! generator and the VM.

use std::sync::Arc;

use shn_core::Variant;
use shn_runtime::dis;
use shn_runtime::fifo::StrFifo;
use shn_runtime::opcodes::Op;
use shn_runtime::types::StateId;
use shnc::{CompilerOptions, Context};

fn quiet_options() -> CompilerOptions {
    let mut opts = CompilerOptions::default();
    opts.line_numbers = false;
    opts
}

struct Run {
    ctx: Context,
    module: StateId,
    result: Variant,
    serr: Arc<StrFifo>,
}

fn run_program(src: &str) -> Run {
    let sio = StrFifo::new();
    let serr = StrFifo::new();
    let mut ctx = Context::with_io(quiet_options(), sio, serr.clone());
    let module = ctx.compile_source("prog", StrFifo::with_text(src)).expect("compile");
    let result = ctx.execute(module).expect("execute");
    Run { ctx, module, result, serr }
}

fn self_var(run: &Run, index: usize) -> Variant {
    run.ctx.instance(run.module).expect("instance").get(index).expect("slot")
}

#[test]
fn test_integer_arithmetic() {
    let run = run_program("def n = 2 * (3 + 4)\n");
    assert_eq!(self_var(&run, 0), Variant::Ord(14));

    // Compile, disassemble, compare the structure.
    let seg = run.ctx.world.state(run.module).code.clone();
    let ops: Vec<Op> = dis::decode(&run.ctx.world, &seg).iter().map(|i| i.op).collect();
    assert_eq!(
        ops,
        vec![
            Op::LoadByte,
            Op::LoadByte,
            Op::LoadByte,
            Op::Add,
            Op::Mul,
            Op::StoreSelfVar,
            Op::End
        ]
    );
}

#[test]
fn test_string_concat_and_length() {
    let run = run_program("def s = \"ab\" | \"cd\"\nassert #s == 4\n");
    let s = self_var(&run, 0);
    assert_eq!(s, Variant::Str("abcd".into()));
}

#[test]
fn test_dict_copy_on_write() {
    run_program(concat!(
        "def a = {1 = \"x\", 2 = \"y\"}\n",
        "def b = a\n",
        "b[1] = \"z\"\n",
        "assert a[1] == \"x\" and b[1] == \"z\"\n",
    ));
}

#[test]
fn test_general_dict_operations() {
    run_program(concat!(
        "def d = {\"ab\" = 1, \"cd\" = 2}\n",
        "assert \"ab\" in d\n",
        "del d[\"ab\"]\n",
        "assert not \"ab\" in d and \"cd\" in d\n",
    ));
}

#[test]
fn test_short_circuit_or() {
    let run = run_program("def r = (1 == 1) or (1 / 0 == 0)\nassert r\n");
    assert_eq!(self_var(&run, 0), Variant::Ord(1));
}

#[test]
fn test_short_circuit_and() {
    let run = run_program("def r = (1 == 2) and (1 / 0 == 0)\nassert not r\n");
    assert_eq!(self_var(&run, 0), Variant::Ord(0));
}

#[test]
fn test_range_and_set() {
    run_program("def s = {1..3, 7}\nassert 2 in s and not 5 in s\n");
}

#[test]
fn test_explicit_exit() {
    let run = run_program("exit 42\n");
    assert_eq!(run.result, Variant::Ord(42));
}

#[test]
fn test_exit_skips_rest() {
    let run = run_program("def a = 1\nexit 9\ndef b = 1 / 0\n");
    assert_eq!(run.result, Variant::Ord(9));
}

#[test]
fn test_assert_failure_reports_condition() {
    let sio = StrFifo::new();
    let serr = StrFifo::new();
    let mut ctx = Context::with_io(quiet_options(), sio, serr);
    let m = ctx
        .compile_source("prog", StrFifo::with_text("assert 1 == 2\n"))
        .unwrap();
    match ctx.execute(m) {
        Err(shn_core::RuntimeError::Assertion { cond, module, .. }) => {
            assert_eq!(cond, "1 == 2");
            assert_eq!(module, "prog");
        }
        other => panic!("expected assertion failure, got {:?}", other),
    }
}

#[test]
fn test_assert_disabled_emits_nothing() {
    let mut opts = quiet_options();
    opts.enable_assert = false;
    let mut ctx = Context::with_io(opts, StrFifo::new(), StrFifo::new());
    let m = ctx
        .compile_source("prog", StrFifo::with_text("assert 1 == 2\n"))
        .unwrap();
    // The failing assertion was stripped; the program runs to completion.
    assert_eq!(ctx.execute(m).unwrap(), Variant::Void);
    let seg = ctx.world.state(m).code.clone();
    let ops: Vec<Op> = dis::decode(&ctx.world, &seg).iter().map(|i| i.op).collect();
    assert_eq!(ops, vec![Op::End]);
}

#[test]
fn test_dump_writes_to_serr() {
    let run = run_program("def x = 7\ndump x + 1\n");
    let text = run.serr.all().to_string();
    assert!(text.contains("x + 1"), "serr: {}", text);
    assert!(text.contains("= 8"), "serr: {}", text);
}

#[test]
fn test_const_fold_matches_runtime() {
    run_program(concat!(
        "const c = 2 * (3 + 4)\n",
        "def n = 2 * (3 + 4)\n",
        "assert n == c\n",
    ));
}

#[test]
fn test_const_rejects_variable_access() {
    let mut ctx = Context::with_io(quiet_options(), StrFifo::new(), StrFifo::new());
    let err = ctx
        .compile_source("prog", StrFifo::with_text("def x = 1\nconst c = x + 1\n"))
        .unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("const"), "unexpected error: {}", msg);
}

#[test]
fn test_vector_insert_and_index() {
    run_program(concat!(
        "def v = [300, 400]\n",
        "ins v[1] = 350\n",
        "assert v[1] == 350 and #v == 3\n",
        "v[0] = 301\n",
        "assert v[0] == 301\n",
        "del v[2]\n",
        "assert #v == 2\n",
    ));
}

#[test]
fn test_string_element_store() {
    let run = run_program("def s = \"abc\"\ns[0] = \"X\"\nassert s == \"Xbc\"\n");
    assert_eq!(self_var(&run, 0), Variant::Str("Xbc".into()));
}

#[test]
fn test_compound_assignment() {
    run_program(concat!(
        "def n = 10\n",
        "n += 5\n",
        "assert n == 15\n",
        "n *= 2\n",
        "assert n == 30\n",
        "def s = \"ab\"\n",
        "s |= \"cd\"\n",
        "s |= \"!\"\n",
        "assert s == \"abcd!\"\n",
    ));
}

#[test]
fn test_local_variables() {
    run_program(concat!(
        "var a = 3\n",
        "var b = 4\n",
        "def c = a * b\n",
        "assert c == 12\n",
        "a = 5\n",
        "assert a * b == 20\n",
    ));
}

#[test]
fn test_if_function() {
    run_program(concat!(
        "def m = if(2 > 1, \"yes\", \"no\")\n",
        "assert m == \"yes\"\n",
        "def k = if(2 < 1, 10, 20)\n",
        "assert k == 20\n",
    ));
}

#[test]
fn test_in_bounds_and_is() {
    run_program(concat!(
        "assert 5 in byte\n",
        "assert not 300 in byte\n",
        "assert 5 is int\n",
        "assert not (5 is str)\n",
        "assert 10 in 5..15\n",
        "assert not (3 in 5..15)\n",
    ));
}

#[test]
fn test_empty_containers() {
    run_program(concat!(
        "assert #[] == 0\n",
        "def e = []\n",
        "assert #e == 0\n",
        "assert 1 in {1 = 2}\n",
        "assert not 3 in {1 = 2}\n",
    ));
}

#[test]
fn test_division_by_zero_unwinds() {
    let mut ctx = Context::with_io(quiet_options(), StrFifo::new(), StrFifo::new());
    let m = ctx
        .compile_source("prog", StrFifo::with_text("def n = 1 / 0\n"))
        .unwrap();
    assert!(matches!(ctx.execute(m), Err(shn_core::RuntimeError::DivisionByZero)));
}

#[test]
fn test_unknown_identifier() {
    let mut ctx = Context::with_io(quiet_options(), StrFifo::new(), StrFifo::new());
    let err = ctx
        .compile_source("prog", StrFifo::with_text("def n = nope + 1\n"))
        .unwrap_err();
    assert!(matches!(err, shnc::CompileError::Unknown(ref n) if n == "nope"));
}

#[test]
fn test_duplicate_identifier() {
    let mut ctx = Context::with_io(quiet_options(), StrFifo::new(), StrFifo::new());
    let err = ctx
        .compile_source("prog", StrFifo::with_text("def n = 1\ndef n = 2\n"))
        .unwrap_err();
    assert!(matches!(err, shnc::CompileError::Duplicate(_)));
}

#[test]
fn test_line_numbers_recorded() {
    let mut opts = CompilerOptions::default();
    opts.line_numbers = true;
    let mut ctx = Context::with_io(opts, StrFifo::new(), StrFifo::new());
    let m = ctx
        .compile_source("prog", StrFifo::with_text("def a = 1\nassert a == 2\n"))
        .unwrap();
    match ctx.execute(m) {
        Err(shn_core::RuntimeError::Assertion { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected assertion failure, got {:?}", other),
    }
}

#[test]
fn test_file_driver_and_listing() {
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("prog.shn");
    let mut f = std::fs::File::create(&src_path).unwrap();
    write!(f, "def n = 2 + 3\nexit n\n").unwrap();
    drop(f);

    let mut opts = quiet_options();
    opts.vm_listing = true;
    let mut ctx = Context::new(opts);
    let result = ctx.execute_file(&src_path.to_string_lossy()).unwrap();
    assert_eq!(result, Variant::Ord(5));

    let listing = std::fs::read_to_string(dir.path().join("prog.lst")).unwrap();
    assert!(listing.contains("Add"), "listing: {}", listing);
    assert!(listing.contains("StoreSelfVar"), "listing: {}", listing);
}

#[test]
fn test_mixed_type_equality() {
    // Cross-tag equality is not provided; an explicit variant comparison
    // yields false for different tags.
    run_program(concat!(
        "def a = (5 as variant)\n",
        "def b = (\"ab\" as variant)\n",
        "assert not (a == b)\n",
    ));
}
