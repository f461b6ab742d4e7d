//! End-to-end pipeline tests: source text through the compiler straight into
//! the VM, the same path `orus-cli`'s `run_file` takes.

use orus_compiler::{compile_file, compile_source, CompilerConfig, DispatchMode};
use orus_runtime::Vm;
use std::io::Write;
use std::path::PathBuf;

fn run(src: &str, config: CompilerConfig) -> Vm {
    let module = compile_source(&PathBuf::from("t.orus"), src, &config).expect("compiles");
    let mut vm = Vm::load("t.orus", module, config);
    vm.run().expect("runs to completion");
    vm
}

#[test]
fn arithmetic_and_print_run_end_to_end() {
    run("print 1 + 2 * 3\n", CompilerConfig::default());
}

#[test]
fn function_call_with_arguments_runs_end_to_end() {
    let src = "fn add(a: i32, b: i32) -> i32:\n    return a + b\nprint add(2, 3)\n";
    run(src, CompilerConfig::default());
}

#[test]
fn division_by_zero_is_reported_as_a_diagnostic() {
    let config = CompilerConfig::default();
    let module = compile_source(&PathBuf::from("t.orus"), "x = 1 / 0\n", &config).expect("compiles");
    let mut vm = Vm::load("t.orus", module, config);
    assert!(vm.run_reporting_diagnostics().is_err());
}

#[test]
fn switch_and_threaded_dispatch_produce_the_same_outcome() {
    let src = "x: i64 = 10\ny: i64 = 3\nprint x % y\n";
    let mut switch_config = CompilerConfig::default();
    switch_config.dispatch_mode = DispatchMode::Switch;
    let mut threaded_config = CompilerConfig::default();
    threaded_config.dispatch_mode = DispatchMode::Threaded;

    run(src, switch_config);
    run(src, threaded_config);
}

#[test]
fn a_file_on_disk_compiles_and_runs_via_compile_file() {
    let mut file = tempfile::Builder::new().suffix(".orus").tempfile().expect("tempfile");
    writeln!(file, "print \"hello from disk\"").unwrap();

    let config = CompilerConfig::default();
    let module = compile_file(file.path(), &config).expect("compiles");
    let mut vm = Vm::load(file.path(), module, config);
    vm.run().expect("runs");
}
