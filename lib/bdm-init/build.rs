//! Generates `sram_init_generated.rs` from the checked-in
//! `sram_init.csv` capture table, the same way the teacher's
//! `lpc55-swd/build.rs` turns a data file into link-time constants
//! instead of hand-typing hundreds of literal steps into `sequencer.rs`.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    println!("cargo::rerun-if-changed=sram_init.csv");

    let csv = fs::read_to_string("sram_init.csv")?;
    let mut out = String::from("&[\n");

    for (lineno, line) in csv.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            anyhow::bail!("sram_init.csv:{}: expected 4 fields, got {}", lineno + 1, fields.len());
        }
        let [kind, a, b, delay] = [fields[0], fields[1], fields[2], fields[3]];
        let kind_expr = match kind {
            "SYNC" => "StepKind::Sync".to_string(),
            "READ_BDM_REG" => format!("StepKind::ReadBdmRegister({a})"),
            "WRITE_REG" => format!("StepKind::WriteRegister {{ reg: {a}, val: {b} }}"),
            "READ_CPU_REG" => format!("StepKind::ReadCpuRegister {{ window: {a}, reg_n: {b} }}"),
            "VERIFY_READ" => format!("StepKind::VerifyReadLongword({a})"),
            "SRAM_WRITE" => format!("StepKind::SramLongwordWrite {{ addr: {a}, data: {b} }}"),
            other => anyhow::bail!("sram_init.csv:{}: unknown step kind {other}", lineno + 1),
        };
        writeln!(
            out,
            "    InitStep {{ kind: {kind_expr}, post_delay: Duration::from_micros({delay}) }},"
        )?;
    }
    out.push(']');

    let out_dir = env::var("OUT_DIR")?;
    fs::write(Path::new(&out_dir).join("sram_init_generated.rs"), out)?;
    Ok(())
}
