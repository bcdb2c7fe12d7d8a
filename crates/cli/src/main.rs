mod logging;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;

use vmaudit_core::config::Config;
use vmaudit_core::inventory::FixtureInventory;
use vmaudit_core::report::AuditReport;
use vmaudit_core::types::Severity;
use vmaudit_core::{audit, AuditOptions, CancellationToken};

#[derive(Parser, Debug)]
#[command(
    name = "vmaudit",
    version,
    about = "Reconcile VM disk files against inventory and flag orphans and stale snapshots"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Audit {
        /// Inventory document (JSON) describing VMs and volumes.
        #[arg(long)]
        inventory: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Previous report.json to compare orphaned bytes against.
        #[arg(long)]
        baseline: Option<PathBuf>,

        #[arg(long)]
        budget_ratio: Option<f64>,

        #[arg(long)]
        workers: Option<usize>,

        /// Reference time for ages (RFC 3339). Defaults to the current time.
        #[arg(long, value_parser = parse_now)]
        now: Option<DateTime<Utc>>,

        #[arg(long, default_value = "vmaudit-out")]
        out: PathBuf,
    },
}

struct Style {
    bold: &'static str,
    dim: &'static str,
    red: &'static str,
    green: &'static str,
    yellow: &'static str,
    cyan: &'static str,
    reset: &'static str,
}

const COLOR: Style = Style {
    bold: "\x1b[1m",
    dim: "\x1b[2m",
    red: "\x1b[31m",
    green: "\x1b[32m",
    yellow: "\x1b[33m",
    cyan: "\x1b[36m",
    reset: "\x1b[0m",
};

const PLAIN: Style = Style {
    bold: "",
    dim: "",
    red: "",
    green: "",
    yellow: "",
    cyan: "",
    reset: "",
};

fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

fn style() -> &'static Style {
    if colors_enabled() {
        &COLOR
    } else {
        &PLAIN
    }
}

fn parse_now(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init_logging(colors_enabled());

    let res = match cli.cmd {
        Commands::Audit {
            inventory,
            config,
            baseline,
            budget_ratio,
            workers,
            now,
            out,
        } => {
            let cfg = load_config(config.as_deref());
            let mut opts = AuditOptions::from_config(&cfg);
            if let Some(w) = workers {
                opts.workers = w;
            }
            opts.budget_ratio = budget_ratio.or(opts.budget_ratio);
            opts.baseline_path = baseline;
            opts.now = now;
            opts.inventory_label = Some(inventory.display().to_string());
            run_audit(&inventory, &opts, &out)
        }
    };

    match res {
        Ok(code) => code,
        Err(e) => {
            let s = style();
            eprintln!(
                "{}{red}error:{reset} {:#}",
                s.bold,
                e,
                red = s.red,
                reset = s.reset
            );
            std::process::ExitCode::from(1)
        }
    }
}

fn print_banner() {
    let s = style();
    eprintln!(
        "\n  {bold}vm{reset}{cyan}|{reset}{dim}audit{reset}  {dim}disk and snapshot reconciliation{reset}\n",
        bold = s.bold,
        cyan = s.cyan,
        dim = s.dim,
        reset = s.reset,
    );
}

fn severity_color(sev: &Severity) -> &'static str {
    let s = style();
    match sev {
        Severity::Critical => s.red,
        Severity::Warning => s.yellow,
        Severity::Ok => s.dim,
    }
}

fn commas(n: u64) -> String {
    let s = n.to_string();
    let bytes = s.as_bytes();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, &b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(b as char);
    }
    result
}

fn print_report(report: &AuditReport, out: &Path) {
    let s = style();
    let sum = &report.summary;
    let counters = &report.counters;

    let rows = [
        ("disks", commas(sum.disks_total as u64)),
        ("registered", commas(sum.registered_count as u64)),
        ("helpers", commas(sum.helper_count as u64)),
        ("config_associated", commas(sum.config_associated_count as u64)),
        ("inference_failed", commas(sum.inference_failed_count as u64)),
    ];
    for (label, value) in rows {
        eprintln!(
            "  {dim}{:<18}{reset}{bold}{}{reset}",
            label,
            value,
            dim = s.dim,
            bold = s.bold,
            reset = s.reset
        );
    }

    let orphan_color = if sum.orphaned_count == 0 { s.green } else { s.red };
    eprintln!(
        "  {dim}{:<18}{reset}{oc}{bold}{}{reset} {dim}({} bytes){reset}",
        "orphaned",
        commas(sum.orphaned_count as u64),
        commas(sum.orphaned_bytes),
        oc = orphan_color,
        dim = s.dim,
        bold = s.bold,
        reset = s.reset
    );
    eprintln!(
        "  {dim}{:<18}{reset}{bold}{}{reset} {dim}({} warning, {} critical){reset}",
        "snapshots",
        sum.snapshots_total,
        sum.snapshots_warning,
        sum.snapshots_critical,
        dim = s.dim,
        bold = s.bold,
        reset = s.reset
    );

    let sized: Vec<_> = report
        .volumes
        .iter()
        .filter(|v| v.usage_percent.is_some())
        .collect();
    if !sized.is_empty() {
        eprintln!();
        for v in sized {
            eprintln!(
                "  {dim}{:<18}{reset}{:>5.1}% used  {dim}orphaned {} bytes ({:.2}% of capacity){reset}",
                v.name,
                v.usage_percent.unwrap_or(0.0),
                commas(v.orphaned_bytes),
                v.orphaned_percent_of_capacity.unwrap_or(0.0),
                dim = s.dim,
                reset = s.reset
            );
        }
    }

    if counters.enumeration_failures() > 0 {
        eprintln!();
        eprintln!(
            "  {yellow}skipped{reset}  {} vms, {} volumes, {} folders, {} snapshots",
            counters.vms_skipped,
            counters.volumes_skipped,
            counters.folders_skipped,
            counters.snapshots_skipped,
            yellow = s.yellow,
            reset = s.reset
        );
    }

    if !report.findings.is_empty() {
        eprintln!();
        for f in &report.findings {
            let sc = severity_color(&f.severity);
            eprintln!(
                "  {sc}{:?}{reset}  {}",
                f.severity,
                f.id,
                sc = sc,
                reset = s.reset
            );
        }
    }

    eprintln!();
    eprintln!(
        "  {dim}\u{2192} {}{reset}",
        out.join("report.json").display(),
        dim = s.dim,
        reset = s.reset
    );
    eprintln!();
}

fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(p) => Config::load(p).unwrap_or_else(|e| {
            eprintln!(
                "{}{}warning:{} failed to load config {}: {:#}",
                style().bold,
                style().yellow,
                style().reset,
                p.display(),
                e
            );
            Config::default()
        }),
        None => Config::discover().unwrap_or_default(),
    }
}

fn run_audit(
    inventory: &Path,
    opts: &AuditOptions,
    out: &Path,
) -> anyhow::Result<std::process::ExitCode> {
    let s = style();

    print_banner();

    debug!(inventory = %inventory.display(), workers = opts.workers, "loading inventory");
    let source = FixtureInventory::load(inventory)
        .with_context(|| format!("failed to load inventory {}", inventory.display()))?;
    let report = audit(&source, opts, &CancellationToken::new())?;

    std::fs::create_dir_all(out).with_context(|| format!("create out dir {}", out.display()))?;
    let json_path = out.join("report.json");
    let json = serde_json::to_vec_pretty(&report).context("serialize report json")?;
    std::fs::write(&json_path, json).with_context(|| format!("write {}", json_path.display()))?;

    // Machine-parseable line on stdout
    println!(
        "disks={} orphaned={} orphaned_bytes={} snapshots={} skipped_volumes={}",
        report.summary.disks_total,
        report.summary.orphaned_count,
        report.summary.orphaned_bytes,
        report.summary.snapshots_total,
        report.counters.volumes_skipped
    );

    print_report(&report, out);

    let exit = match &report.budget {
        Some(b) if !b.pass => {
            eprintln!(
                "  {red}{bold}BUDGET FAILED{reset}  {dim}({:.2}x > {:.2}x budget){reset}",
                report
                    .baseline_comparison
                    .as_ref()
                    .map(|c| c.regression_ratio)
                    .unwrap_or(0.0),
                b.threshold_regression_ratio,
                red = s.red,
                bold = s.bold,
                dim = s.dim,
                reset = s.reset,
            );
            std::process::ExitCode::from(2)
        }
        _ => {
            eprintln!(
                "  {green}{bold}PASS{reset}",
                green = s.green,
                bold = s.bold,
                reset = s.reset
            );
            std::process::ExitCode::from(0)
        }
    };

    eprintln!();

    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn commas_formats_numbers() {
        assert_eq!(commas(0), "0");
        assert_eq!(commas(1000), "1,000");
        assert_eq!(commas(1234567), "1,234,567");
    }

    #[test]
    #[serial]
    fn severity_color_thresholds() {
        std::env::remove_var("NO_COLOR");
        assert_eq!(severity_color(&Severity::Critical), style().red);
        assert_eq!(severity_color(&Severity::Warning), style().yellow);
        assert_eq!(severity_color(&Severity::Ok), style().dim);
    }

    #[test]
    #[serial]
    fn style_respects_no_color() {
        std::env::set_var("NO_COLOR", "1");
        assert_eq!(style().bold, "");
        std::env::remove_var("NO_COLOR");
        assert_ne!(style().bold, "");
    }

    #[test]
    fn now_accepts_rfc3339_with_offset() {
        let t = parse_now("2026-06-01T02:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-06-01T00:00:00+00:00");
        assert!(parse_now("yesterday").is_err());
    }
}
