//! `converge plan` - preview pending changes via a dry-run apply

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands::load_inputs;
use crate::ui;
use anyhow::Result;
use catalog::{ApplyOptions, Outcome, ProviderRegistry};
use colored::Colorize;
use std::time::Duration;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    ui::header("Convergence Plan");

    let inputs = load_inputs(&args.input)?;
    let compiled = match catalog::compile(&inputs.set, &inputs.facts) {
        Ok(compiled) => compiled,
        Err(e) => {
            ui::error(&format!("compile failed: {e}"));
            std::process::exit(1);
        }
    };

    let opts = ApplyOptions {
        jobs: args.jobs,
        op_timeout: Duration::from_secs(args.timeout_secs),
        dry_run: true,
    };
    let report = catalog::apply(&compiled, &ProviderRegistry::with_defaults(), &opts);

    let mut pending = 0usize;
    for entry in report.resources() {
        match &entry.outcome {
            Outcome::Failed(e) => {
                println!("  {} {} - {}", "✗".red(), entry.resource, e.to_string().dimmed());
            }
            _ if !entry.diff.is_empty() => {
                pending += 1;
                println!("  {} {}", "~".yellow(), entry.resource);
                if !ctx.quiet {
                    ui::dim(&entry.diff.summary());
                }
            }
            _ => {
                if !ctx.quiet {
                    println!("  {} {}", "✓".green(), entry.resource);
                }
            }
        }
    }

    println!();
    if !report.is_success() {
        ui::error(&format!(
            "{} resource(s) could not be inspected",
            report.summary().failed
        ));
        std::process::exit(1);
    }
    if pending == 0 {
        ui::success("No changes - live state matches desired state");
    } else {
        ui::info(&format!("{pending} resource(s) would change"));
    }
    Ok(())
}
