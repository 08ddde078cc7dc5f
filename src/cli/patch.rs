//! Applying and reverting pull requests.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, follow};
use crate::patch::{BatchError, CherryPickResult, PartialRevert};

fn print_result(result: &CherryPickResult) {
    if result.success {
        println!(
            "{} PR #{}: {} commit(s) applied",
            "✓".green(),
            result.pr_number,
            result.applied.len()
        );
    } else {
        println!(
            "{} PR #{}: {}",
            "✗".red(),
            result.pr_number,
            result.error.as_deref().unwrap_or("failed")
        );
    }
}

/// `reforge cherry-pick`
#[derive(Args, Debug)]
pub struct CherryPickCommand {
    /// PR numbers, applied in the order given
    #[arg(required = true, allow_negative_numbers = true)]
    pub numbers: Vec<i64>,
}

impl CherryPickCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let handle = ctx.service.start_cherry_pick(self.numbers)?;
        let results = match follow(ctx, handle).await {
            Ok(results) => results,
            Err(e) => {
                if let Some(batch) = e.downcast_ref::<BatchError>() {
                    batch.completed.iter().for_each(print_result);
                }
                return Err(e);
            }
        };

        if ctx.json {
            ctx.print_json(&results)?;
        } else {
            results.iter().for_each(print_result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            bail!("{failed} of {} PR(s) could not be applied", results.len());
        }
        Ok(())
    }
}

/// `reforge revert`
#[derive(Args, Debug)]
pub struct RevertCommand {
    /// PR number to revert
    #[arg(allow_negative_numbers = true)]
    pub number: i64,
}

impl RevertCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let handle = ctx.service.start_revert(self.number)?;
        let result = match follow(ctx, handle).await {
            Ok(result) => result,
            Err(e) => {
                if let Some(partial) = e.downcast_ref::<PartialRevert>() {
                    println!(
                        "{} PR #{}: {} commit(s) reverted before stopping: {}",
                        "!".yellow(),
                        partial.result.pr_number,
                        partial.result.reverted.len(),
                        partial.result.reverted.join(", ")
                    );
                }
                return Err(e);
            }
        };
        if ctx.json {
            return ctx.print_json(&result);
        }
        println!(
            "{} PR #{}: {} commit(s) reverted",
            "✓".green(),
            result.pr_number,
            result.reverted.len()
        );
        Ok(())
    }
}
