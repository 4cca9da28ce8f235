//! End-to-end pipeline behavior.

use blend65_ast::{AstBuilder, BinaryOp, DiagnosticCode, Severity, TypeAnnotation};
use blend65_target::{Architecture, TargetConfig, TargetError};
use rstest::rstest;

use super::helpers::{counter_program, raster_program, run_pipeline, two_modules};
use crate::pipeline::{Pipeline, StopAfter};

#[test]
fn counter_program_flows_through_every_pass() {
    let output = run_pipeline(counter_program());
    assert!(output.success, "{:#?}", output.diagnostics);

    let analysis = output.function("count").expect("analysis recorded");
    assert_eq!(analysis.loops.loops.len(), 1, "exactly one natural loop");
    let l = &analysis.loops.loops[0];
    let biv = l.inductions.iter().find(|r| r.is_basic()).expect("BIV");
    assert_eq!((biv.variable.as_str(), biv.stride, biv.initial), ("i", 1, Some(0)));
    assert_eq!(l.trip_count, Some(10), "constant bounds unroll to 10");

    let il_function = output.il[0].function("count").expect("IL function");
    assert!(!il_function.is_stub());
    let (_, stats, verification) = output
        .ssa
        .iter()
        .find(|(name, _, _)| name == "count")
        .expect("SSA record");
    assert!(verification.valid, "{:?}", verification.violations);
    assert!(stats.phis_inserted >= 1, "loop-carried i needs a phi");

    assert!(
        output.zp_candidates.iter().any(|c| c.symbol == "i"),
        "loop counter is a zero-page candidate"
    );
    assert!(!output.facts.is_empty());
}

#[test]
fn analyses_converge_well_under_the_cap() {
    let output = run_pipeline(counter_program());
    let analysis = output.function("count").unwrap();
    assert!(analysis.liveness.converged);
    assert!(analysis.reaching.converged);
    assert!(analysis.liveness.iterations <= 100);
    assert!(analysis.reaching.iterations <= 100);
}

#[test]
fn type_error_stops_before_control_flow() {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let big = b.number(1000);
    let bad = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(big));
    let body = b.block(vec![bad]);
    let f = b.function("main", vec![], None, Some(body));
    b.program(Some(module), vec![f]);

    let output = run_pipeline(vec![b.finish()]);
    assert!(!output.success);
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::NarrowingConversion));
    assert!(output.functions.is_empty(), "CFG stage never ran");
    assert!(output.il.is_empty(), "IL stage never ran");
}

#[rstest]
#[case::symbols(StopAfter::SymbolTable, false)]
#[case::types(StopAfter::Types, false)]
#[case::cfg(StopAfter::Cfg, true)]
#[case::analyses(StopAfter::Analyses, true)]
fn stop_after_cuts_the_run_short(#[case] stage: StopAfter, #[case] expect_functions: bool) {
    let output = Pipeline::new(TargetConfig::c64())
        .stop_after(stage)
        .run(&counter_program());
    assert!(output.success, "{:#?}", output.diagnostics);
    assert_eq!(!output.functions.is_empty(), expect_functions);
    assert!(output.il.is_empty(), "IL is past every stop point here");
    assert!(output.zp_candidates.is_empty());
}

#[test]
fn reserved_map_address_is_an_error() {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let addr = b.number(0x0000);
    let bad = b.simple_map("port", TypeAnnotation::named("byte"), addr);
    b.program(Some(module), vec![bad]);

    let output = run_pipeline(vec![b.finish()]);
    assert!(!output.success);
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::AddressInReservedRange));
}

#[test]
fn hardware_map_outside_zero_page_is_fine() {
    let output = run_pipeline(raster_program());
    assert!(
        !output
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::AddressInReservedRange),
        "{:#?}",
        output.diagnostics
    );
    let border = &output.il[0].globals["border"];
    assert_eq!(border.address, Some(0xD020));
}

#[test]
fn dead_definition_and_unreachable_code_warn() {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let ten = b.number(10);
    let dead = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(ten));
    let ret = b.return_stmt(None);
    let one = b.number(1);
    let unreachable = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(one));
    let body = b.block(vec![dead, ret, unreachable]);
    let f = b.function("main", vec![], None, Some(body));
    b.program(Some(module), vec![f]);

    let output = run_pipeline(vec![b.finish()]);
    assert!(output.success, "warnings only");
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::DeadDefinition && d.severity == Severity::Warning));
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::UnreachableCode));
}

#[test]
fn missing_return_on_some_path_warns() {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let cond = b.bool(true);
    let one = b.number(1);
    let ret = b.return_stmt(Some(one));
    let then_block = b.block(vec![ret]);
    let iff = b.if_stmt(cond, then_block, None);
    let body = b.block(vec![iff]);
    let f = b.function("partial", vec![], Some(TypeAnnotation::named("byte")), Some(body));
    b.program(Some(module), vec![f]);

    let output = run_pipeline(vec![b.finish()]);
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::MissingReturn));
}

#[test]
fn unimplemented_targets_are_refused() {
    assert!(Pipeline::for_architecture(Architecture::C64).is_ok());
    assert_eq!(
        Pipeline::for_architecture(Architecture::C128).err(),
        Some(TargetError::NotImplemented(Architecture::C128))
    );
    assert_eq!(
        Pipeline::for_architecture(Architecture::X16).err(),
        Some(TargetError::NotImplemented(Architecture::X16))
    );
}

#[test]
fn imports_resolve_across_modules() {
    let output = run_pipeline(two_modules(true));
    assert!(output.success, "{:#?}", output.diagnostics);
    assert_eq!(output.il.len(), 2);
    assert_eq!(output.il[1].imports[0].module, "lib");
}

#[test]
fn unused_import_warns() {
    let output = run_pipeline(two_modules(false));
    assert!(output.success, "{:#?}", output.diagnostics);
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::UnusedImport));
}

#[test]
fn gvn_redundancy_surfaces_as_info() {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let seventeen = b.number(17);
    let a = b.let_decl("a", Some(TypeAnnotation::named("byte")), Some(seventeen));
    let nineteen = b.number(19);
    let bb = b.let_decl("b", Some(TypeAnnotation::named("byte")), Some(nineteen));
    let ar = b.ident("a");
    let br = b.ident("b");
    let s1 = b.binary(BinaryOp::Add, ar, br);
    let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(s1));
    let br2 = b.ident("b");
    let ar2 = b.ident("a");
    let s2 = b.binary(BinaryOp::Add, br2, ar2);
    let z = b.let_decl("z", Some(TypeAnnotation::named("byte")), Some(s2));
    let yr = b.ident("y");
    let zr = b.ident("z");
    let sum = b.binary(BinaryOp::Add, yr, zr);
    let ret = b.return_stmt(Some(sum));
    let body = b.block(vec![a, bb, y, z, ret]);
    let f = b.function("main", vec![], Some(TypeAnnotation::named("byte")), Some(body));
    b.program(Some(module), vec![f]);

    let output = run_pipeline(vec![b.finish()]);
    assert!(output.success, "{:#?}", output.diagnostics);
    assert!(output
        .with_severity(Severity::Info)
        .any(|d| d.code == DiagnosticCode::GvnRedundancy));
}
