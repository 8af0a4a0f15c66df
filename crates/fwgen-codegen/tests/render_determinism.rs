//! Rendering is a pure function: identical inputs, byte-identical outputs.

mod common;

use pretty_assertions::assert_eq;

use fwgen_codegen::{build_context, plan_outputs, render_plan, ContextOptions, TemplateLibrary};

#[test]
fn two_renders_are_byte_identical() {
    let profile = common::msix_profile();
    let board = fwgen_boards::board("pcileech_75t484_x1").unwrap();
    let library = TemplateLibrary::builtin().unwrap();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let ctx = build_context(&profile, board, &ContextOptions::default()).unwrap();
        let plan = plan_outputs(&ctx);
        runs.push(render_plan(&library, &plan, &ctx).unwrap());
    }
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn outputs_use_lf_line_endings_only() {
    let profile = common::nic_profile();
    let board = fwgen_boards::board("pcileech_35t325_x1").unwrap();
    let ctx = build_context(&profile, board, &ContextOptions::default()).unwrap();
    let library = TemplateLibrary::builtin().unwrap();
    let outputs = render_plan(&library, &plan_outputs(&ctx), &ctx).unwrap();
    for (path, content) in &outputs {
        assert!(!content.contains('\r'), "`{path}` contains CR bytes");
    }
}

#[test]
fn provenance_timestamp_comes_from_the_profile_not_the_clock() {
    let mut profile = common::nic_profile();
    profile.provenance.captured_at = 42;
    let board = fwgen_boards::board("pcileech_35t325_x1").unwrap();
    let ctx = build_context(&profile, board, &ContextOptions::default()).unwrap();
    let library = TemplateLibrary::builtin().unwrap();
    let outputs = render_plan(&library, &plan_outputs(&ctx), &ctx).unwrap();
    let device_config = &outputs
        .iter()
        .find(|(p, _)| p == "generated/device_config.sv")
        .unwrap()
        .1;
    assert!(device_config.contains("captured 42"));
}

#[test]
fn plan_order_is_stable_and_covers_the_expected_tree() {
    let profile = common::msix_profile();
    let board = fwgen_boards::board("pcileech_75t484_x1").unwrap();
    let ctx = build_context(&profile, board, &ContextOptions::default()).unwrap();
    let plan = plan_outputs(&ctx);
    let paths: Vec<&str> = plan.iter().map(|p| p.output_path).collect();
    assert_eq!(
        paths,
        [
            "generated/device_config.sv",
            "generated/msix_capability_registers.sv",
            "generated/msix_implementation.sv",
            "generated/top_wrapper.sv",
            "tcl/01_project_setup.tcl",
            "tcl/02_ip_config.tcl",
            "tcl/03_add_sources.tcl",
            "tcl/04_constraints.tcl",
            "tcl/05_synthesis.tcl",
            "tcl/06_implementation.tcl",
            "tcl/07_bitstream.tcl",
            "tcl/build_all.tcl",
            "constraints/pinout.xdc",
            "constraints/timing.xdc",
        ]
    );
}
