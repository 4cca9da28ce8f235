//! Shared program builders for the scenario tests.

use blend65_ast::{Ast, AstBuilder, BinaryOp, ImportNames, TypeAnnotation};
use blend65_target::TargetConfig;

use crate::pipeline::{Pipeline, PipelineOutput};

/// Run the default C64 pipeline over `asts`.
pub fn run_pipeline(asts: Vec<Ast>) -> PipelineOutput {
    Pipeline::new(TargetConfig::c64()).run(&asts)
}

/// `fn count() { let i: byte = 0; while i < 10 { i = i + 1; } }`
pub fn counter_program() -> Vec<Ast> {
    let mut b = AstBuilder::new("main.b65");
    let module = b.module(&["main"]);
    let zero = b.number(0);
    let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(zero));
    let iref = b.ident("i");
    let ten = b.number(10);
    let cond = b.binary(BinaryOp::Lt, iref, ten);
    let iref2 = b.ident("i");
    let one = b.number(1);
    let inc = b.binary(BinaryOp::Add, iref2, one);
    let update = b.assign_stmt("i", inc);
    let body = b.block(vec![update]);
    let w = b.while_stmt(cond, body);
    let fn_body = b.block(vec![decl, w]);
    let f = b.function("count", vec![], None, Some(fn_body));
    b.program(Some(module), vec![f]);
    vec![b.finish()]
}

/// A sprite-update style program: mapped border register, a counter loop
/// writing through `poke`, and a derived address `i * 64`.
pub fn raster_program() -> Vec<Ast> {
    let mut b = AstBuilder::new("sprites.b65");
    let module = b.module(&["sprites"]);
    let border_addr = b.number(0xD020);
    let border = b.simple_map("border", TypeAnnotation::named("byte"), border_addr);

    let zero = b.number(0);
    let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(zero));
    let iref = b.ident("i");
    let eight = b.number(8);
    let cond = b.binary(BinaryOp::Lt, iref, eight);

    let iref_addr = b.ident("i");
    let sixty_four = b.number(64);
    let scaled = b.binary(BinaryOp::Mul, iref_addr, sixty_four);
    let addr = b.let_decl("addr", Some(TypeAnnotation::named("word")), Some(scaled));

    let poke = b.ident("poke");
    let addr_ref = b.ident("addr");
    let value = b.number(0xFF);
    let poke_call = b.call(poke, vec![addr_ref, value]);
    let poke_stmt = b.expr_stmt(poke_call);

    let iref2 = b.ident("i");
    let one = b.number(1);
    let inc = b.binary(BinaryOp::Add, iref2, one);
    let update = b.assign_stmt("i", inc);

    let body = b.block(vec![addr, poke_stmt, update]);
    let w = b.while_stmt(cond, body);
    let one_again = b.number(1);
    let flash = b.assign_stmt("border", one_again);
    let fn_body = b.block(vec![decl, w, flash]);
    let f = b.function("main", vec![], None, Some(fn_body));
    b.program(Some(module), vec![border, f]);
    vec![b.finish()]
}

/// Two modules: `lib` exports a constant, `main` imports it.
pub fn two_modules(use_import: bool) -> Vec<Ast> {
    let mut lib = AstBuilder::new("lib.b65");
    let lib_module = lib.module(&["lib"]);
    let seven = lib.number(7);
    let decl = lib.const_decl("seven", Some(TypeAnnotation::named("byte")), seven);
    let export = lib.export(decl);
    lib.program(Some(lib_module), vec![export]);

    let mut main = AstBuilder::new("main.b65");
    let main_module = main.module(&["main"]);
    let import = main.import(&["lib"], ImportNames::Named(vec!["seven".into()]));
    let mut decls = vec![import];
    let body = if use_import {
        let sr = main.ident("seven");
        let x = main.let_decl("x", Some(TypeAnnotation::named("byte")), Some(sr));
        let xr = main.ident("x");
        let ret = main.return_stmt(Some(xr));
        main.block(vec![x, ret])
    } else {
        main.block(vec![])
    };
    let f = main.function(
        "main",
        vec![],
        use_import.then(|| TypeAnnotation::named("byte")),
        Some(body),
    );
    decls.push(f);
    main.program(Some(main_module), decls);

    vec![lib.finish(), main.finish()]
}
