//! Post-render consistency verification.
//!
//! Every generated file was substituted from the same immutable context, so
//! a small set of anchor constants re-parsed out of the staged tree must
//! agree with that context exactly. A mismatch means a generator bug, never
//! a donor problem, and always aborts the build.

use std::fs;
use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use crate::context::RenderContext;
use crate::error::CodegenError;

/// Re-parses anchor constants from the staged output tree and compares them
/// against the context they were rendered from.
pub fn verify_output_tree(staged: &Path, ctx: &RenderContext) -> Result<(), CodegenError> {
    verify_device_config(staged, ctx)?;
    verify_ip_config(staged, ctx)?;
    verify_top_wrapper(staged, ctx)?;
    verify_source_list(staged)?;
    Ok(())
}

fn read_staged(staged: &Path, rel: &str) -> Result<String, CodegenError> {
    fs::read_to_string(staged.join(rel)).map_err(|err| {
        CodegenError::inconsistency(format!("expected output `{rel}` is unreadable: {err}"))
    })
}

fn capture_hex(text: &str, pattern: &str, rel: &str) -> Result<u64, CodegenError> {
    let re = Regex::new(pattern).expect("anchor patterns are static");
    let capture = re
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            CodegenError::inconsistency(format!("`{rel}` is missing anchor `{pattern}`"))
        })?;
    u64::from_str_radix(capture.as_str(), 16).map_err(|_| {
        CodegenError::inconsistency(format!("`{rel}` anchor `{pattern}` is not hex"))
    })
}

fn expect_ctx(ctx: &RenderContext, key: &str) -> Result<u64, CodegenError> {
    ctx.int(key)
        .ok_or_else(|| CodegenError::inconsistency(format!("context lost key `{key}`")))
}

fn check(rel: &str, what: &str, found: u64, expected: u64) -> Result<(), CodegenError> {
    if found != expected {
        return Err(CodegenError::inconsistency(format!(
            "`{rel}` declares {what} {found:#x} but the profile says {expected:#x}"
        )));
    }
    Ok(())
}

fn verify_device_config(staged: &Path, ctx: &RenderContext) -> Result<(), CodegenError> {
    const REL: &str = "generated/device_config.sv";
    let text = read_staged(staged, REL)?;

    for (what, pattern, key) in [
        (
            "vendor ID",
            r"\bVENDOR_ID\s*=\s*16'h([0-9a-fA-F]{4})",
            "device.vendor_id",
        ),
        (
            "device ID",
            r"\bDEVICE_ID\s*=\s*16'h([0-9a-fA-F]{4})",
            "device.device_id",
        ),
        (
            "subsystem vendor ID",
            r"SUBSYS_VENDOR_ID\s*=\s*16'h([0-9a-fA-F]{4})",
            "device.subsys_vendor_id",
        ),
        (
            "class code",
            r"CLASS_CODE\s*=\s*24'h([0-9a-fA-F]{6})",
            "device.class_code",
        ),
        (
            "revision ID",
            r"REVISION_ID\s*=\s*8'h([0-9a-fA-F]{2})",
            "device.revision_id",
        ),
    ] {
        check(REL, what, capture_hex(&text, pattern, REL)?, expect_ctx(ctx, key)?)?;
    }

    let msix_enabled = capture_hex(&text, r"MSIX_ENABLED\s*=\s*1'b([01])", REL)?;
    check(REL, "MSI-X enable", msix_enabled, expect_ctx(ctx, "msix.enabled")?)?;
    Ok(())
}

fn verify_ip_config(staged: &Path, ctx: &RenderContext) -> Result<(), CodegenError> {
    const REL: &str = "tcl/02_ip_config.tcl";
    let text = read_staged(staged, REL)?;

    for (what, pattern, key) in [
        (
            "vendor ID",
            r"CONFIG\.Vendor_ID\s+([0-9A-Fa-f]{4})",
            "device.vendor_id",
        ),
        (
            "device ID",
            r"CONFIG\.Device_ID\s+([0-9A-Fa-f]{4})",
            "device.device_id",
        ),
        (
            "subsystem vendor ID",
            r"CONFIG\.Subsystem_Vendor_ID\s+([0-9A-Fa-f]{4})",
            "device.subsys_vendor_id",
        ),
        (
            "revision ID",
            r"CONFIG\.Revision_ID\s+([0-9A-Fa-f]{2})",
            "device.revision_id",
        ),
        (
            "MSI-X enable",
            r"CONFIG\.MSIX_Enabled\s+([01])",
            "msix.enabled",
        ),
        (
            "BAR0 size (KB)",
            r"CONFIG\.Bar0_Size\s+([0-9]+)",
            "bar0.size_kb",
        ),
    ] {
        let found = if what == "BAR0 size (KB)" {
            let re = Regex::new(pattern).expect("anchor patterns are static");
            let capture = re.captures(&text).and_then(|c| c.get(1)).ok_or_else(|| {
                CodegenError::inconsistency(format!("`{REL}` is missing anchor `{pattern}`"))
            })?;
            capture.as_str().parse::<u64>().map_err(|_| {
                CodegenError::inconsistency(format!("`{REL}` anchor `{pattern}` is not decimal"))
            })?
        } else {
            capture_hex(&text, pattern, REL)?
        };
        check(REL, what, found, expect_ctx(ctx, key)?)?;
    }
    Ok(())
}

fn verify_top_wrapper(staged: &Path, ctx: &RenderContext) -> Result<(), CodegenError> {
    const REL: &str = "generated/top_wrapper.sv";
    let text = read_staged(staged, REL)?;
    let debug_status = capture_hex(&text, r"DEBUG_STATUS\s*=\s*32'h([0-9a-fA-F]{8})", REL)?;
    check(
        REL,
        "debug-status vendor half",
        debug_status >> 16,
        expect_ctx(ctx, "device.vendor_id")?,
    )?;
    check(
        REL,
        "debug-status device half",
        debug_status & 0xffff,
        expect_ctx(ctx, "device.device_id")?,
    )
}

/// The build-script file list must cover every emitted hardware module
/// exactly once, and must not reference modules that were not emitted.
fn verify_source_list(staged: &Path) -> Result<(), CodegenError> {
    const REL: &str = "tcl/03_add_sources.tcl";
    let script = read_staged(staged, REL)?;

    let mut emitted = Vec::new();
    for entry in WalkDir::new(staged.join("generated")) {
        let entry = entry.map_err(|err| {
            CodegenError::inconsistency(format!("cannot walk staged tree: {err}"))
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("sv")
        {
            emitted.push(
                entry
                    .file_name()
                    .to_string_lossy()
                    .into_owned(),
            );
        }
    }

    for name in &emitted {
        let needle = format!("../generated/{name}");
        let count = script.matches(&needle).count();
        if count != 1 {
            return Err(CodegenError::inconsistency(format!(
                "`{REL}` references `{name}` {count} times, expected exactly once"
            )));
        }
    }

    let add_re = Regex::new(r"add_files -norecurse \.\./generated/([A-Za-z0-9_]+\.sv)")
        .expect("anchor patterns are static");
    for capture in add_re.captures_iter(&script) {
        let referenced = &capture[1];
        if !emitted.iter().any(|name| name == referenced) {
            return Err(CodegenError::inconsistency(format!(
                "`{REL}` references `{referenced}` which was not emitted"
            )));
        }
    }
    Ok(())
}
