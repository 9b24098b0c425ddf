//! `converge check` - the compile predicate, without any apply

use crate::Context;
use crate::cli::InputArgs;
use crate::commands::load_inputs;
use crate::ui;
use anyhow::Result;

pub fn run(ctx: &Context, args: &InputArgs) -> Result<()> {
    ui::header("Catalog Check");

    let inputs = load_inputs(args)?;
    match catalog::compile(&inputs.set, &inputs.facts) {
        Ok(compiled) => {
            ui::success(&format!(
                "{} resource(s) compile with all dependencies satisfiable",
                compiled.len()
            ));
            if !ctx.quiet {
                for node in compiled.nodes() {
                    ui::dim(&node.reference.to_string());
                }
            }
            if ctx.verbose > 0 {
                ui::kv("digest", compiled.digest());
            }
            Ok(())
        }
        Err(e) => {
            ui::error(&format!("compile failed: {e}"));
            std::process::exit(1);
        }
    }
}
