//! SSA and target hints over pipeline-lowered IL.

use blend65_ir::{Mos6502Register, Opcode};

use super::helpers::{counter_program, raster_program, run_pipeline};

#[test]
fn lowered_loops_verify_in_ssa_form() {
    let output = run_pipeline(counter_program());
    assert!(output.success, "{:#?}", output.diagnostics);
    for (name, _, verification) in &output.ssa {
        assert!(verification.valid, "{name}: {:?}", verification.violations);
    }
    // The loop header carries the φ for the counter.
    let function = output.il[0].function("count").unwrap();
    let header = function
        .blocks
        .iter()
        .find(|b| b.label == "while.header")
        .expect("header block");
    assert!(
        header.instructions.first().map(|i| i.is_phi()).unwrap_or(false),
        "loop-carried counter merges at the header"
    );
    for phi in header.phis() {
        assert_eq!(phi.incoming.len(), header.predecessors.len());
    }
}

#[test]
fn induction_record_lands_on_the_update_instruction() {
    let output = run_pipeline(counter_program());
    let function = output.il[0].function("count").unwrap();
    let annotated = function
        .instructions()
        .find(|(_, i)| i.meta.induction.is_some())
        .map(|(_, i)| i.clone())
        .expect("an instruction carries the induction record");
    let record = annotated.meta.induction.unwrap();
    assert_eq!(record.variable, "i");
    assert_eq!(record.stride, 1);
    assert!(record.is_basic());
}

#[test]
fn every_il_instruction_is_costed() {
    let output = run_pipeline(raster_program());
    assert!(output.success, "{:#?}", output.diagnostics);
    let function = output.il[0].function("main").unwrap();
    for (block, instruction) in function.instructions() {
        assert!(
            instruction.meta.cycle_estimate.is_some(),
            "{block}: `{instruction}` has no cycle estimate"
        );
        assert!(instruction.meta.addressing_mode.is_some());
    }
}

#[test]
fn byte_counter_prefers_an_index_or_accumulator_register() {
    let output = run_pipeline(counter_program());
    let function = output.il[0].function("count").unwrap();
    let add = function
        .instructions()
        .find(|(_, i)| i.opcode == Opcode::Add)
        .map(|(_, i)| i.clone())
        .expect("the increment survives lowering");
    assert!(matches!(
        add.meta.register_preference,
        Some(Mos6502Register::A | Mos6502Register::X | Mos6502Register::Y)
    ));
}

#[test]
fn volatile_hardware_store_keeps_its_region() {
    let output = run_pipeline(raster_program());
    let function = output.il[0].function("main").unwrap();
    let store = function
        .instructions()
        .find(|(_, i)| i.opcode == Opcode::MapStoreField)
        .map(|(_, i)| i.clone())
        .expect("border write lowers to a mapped store");
    assert_eq!(store.meta.map_base, Some(0xD020));
    assert_eq!(
        store.meta.alias_region,
        Some(blend65_ir::AliasRegion::MappedHardware)
    );
}

#[test]
fn poke_lowering_is_marked_volatile() {
    let output = run_pipeline(raster_program());
    let function = output.il[0].function("main").unwrap();
    let poke = function
        .instructions()
        .find(|(_, i)| i.opcode == Opcode::Intrinsic && i.callee.as_deref() == Some("poke"))
        .map(|(_, i)| i.clone())
        .expect("poke lowers to an intrinsic");
    assert_eq!(
        poke.meta.alias_region,
        Some(blend65_ir::AliasRegion::Volatile)
    );
}
