//! `precheck`: predict conflicts for a branch without queuing it.

use std::sync::Arc;

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;
use trunkguard_core::coordination::{ConflictPrechecker, ConflictReport, RebaseAdvisor};

use super::{emit, format_of, AppContext};

#[derive(Debug, Clone, Serialize)]
pub struct PrecheckOutput {
    pub source: String,
    pub target: String,
    pub clean: bool,
    #[serde(flatten)]
    pub report: ConflictReport,
}

pub async fn run(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let source = matches
        .get_one::<String>("source")
        .ok_or_else(|| anyhow::anyhow!("Source branch is required"))?
        .clone();
    let target = matches
        .get_one::<String>("target")
        .map_or_else(|| ctx.trunk().to_string(), Clone::clone);

    let prechecker = ConflictPrechecker::new(Arc::clone(&ctx.repo));
    let report = prechecker.precheck(&source, &target).await?;
    let advisor = RebaseAdvisor::from_config(&ctx.config.queue, &ctx.config.rebase);
    let recommendation = advisor.advise(&report, 0);
    let report = report.with_recommendation(recommendation);

    let output = PrecheckOutput {
        clean: report.is_clean(),
        source,
        target,
        report,
    };
    emit(format_of(matches), "precheck-response", &output, |out| {
        if out.clean {
            println!("{} merges cleanly into {}", out.source, out.target);
        } else {
            println!(
                "{} conflicts with {} in {} file(s) ({}):",
                out.source,
                out.target,
                out.report.files.len(),
                out.report.recommendation
            );
            for file in &out.report.files {
                println!("  {file}");
            }
        }
    })
}
