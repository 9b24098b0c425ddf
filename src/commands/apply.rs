//! `converge apply` - compile the manifest and converge the host

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::{Inputs, load_inputs};
use crate::ui;
use anyhow::Result;
use catalog::{
    ApplyOptions, Catalog, CatalogCache, Outcome, ProviderRegistry, RunReport,
};
use colored::Colorize;
use std::time::Duration;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    if !args.json {
        ui::header("Applying Catalog");
        if args.dry_run {
            ui::warn("Dry run - no changes will be made");
        }
    }

    let inputs = load_inputs(&args.input)?;
    let compiled = compiled_catalog(args, &inputs);

    let opts = ApplyOptions {
        jobs: args.jobs,
        op_timeout: Duration::from_secs(args.timeout_secs),
        dry_run: args.dry_run,
    };
    let report = catalog::apply(&compiled, &ProviderRegistry::with_defaults(), &opts);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(ctx, &report);
    }

    if !report.is_success() {
        std::process::exit(report.exit_code());
    }
    Ok(())
}

/// Compile, going through the catalog cache when one is configured
fn compiled_catalog(args: &ApplyArgs, inputs: &Inputs) -> Catalog {
    let cache = args.cache_dir.as_ref().map(CatalogCache::new);

    if let Some(cache) = &cache
        && let Some(hit) = cache.load(&inputs.set, &inputs.facts)
    {
        return hit;
    }

    match catalog::compile(&inputs.set, &inputs.facts) {
        Ok(compiled) => {
            if let Some(cache) = &cache
                && let Err(e) = cache.store(&compiled)
            {
                log::warn!("could not store catalog cache entry: {e:#}");
            }
            compiled
        }
        Err(e) => {
            ui::error(&format!("compile failed: {e}"));
            std::process::exit(1);
        }
    }
}

fn print_report(ctx: &Context, report: &RunReport) {
    for entry in report.resources() {
        match &entry.outcome {
            Outcome::Unchanged => {
                if !ctx.quiet {
                    println!("  {} {}", "✓".green(), entry.resource);
                }
            }
            Outcome::Changed => {
                println!("  {} {}", "~".yellow(), entry.resource);
                if !ctx.quiet {
                    ui::dim(&entry.diff.summary());
                }
            }
            Outcome::Skipped { reason } => {
                println!(
                    "  {} {} {}",
                    "→".cyan(),
                    entry.resource,
                    format!("({reason})").dimmed()
                );
            }
            Outcome::Failed(e) => {
                println!("  {} {} - {}", "✗".red(), entry.resource, e.to_string().dimmed());
            }
        }
    }

    ui::section("Summary");
    let summary = report.summary();
    ui::kv("unchanged", &summary.unchanged.to_string());
    ui::kv("changed", &summary.changed.to_string());
    ui::kv("skipped", &summary.skipped.to_string());
    ui::kv("failed", &summary.failed.to_string());

    println!();
    if report.is_success() {
        ui::success("Converged");
    } else {
        ui::error(&format!("{} resource(s) failed", summary.failed));
    }
}
