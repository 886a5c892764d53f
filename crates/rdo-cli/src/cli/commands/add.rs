//! `rdo add <url>...` – queue downloads.

use anyhow::{bail, Result};
use rdo_core::ledger::SubmitRules;
use rdo_core::{RdoConfig, Submission, SubmitReport};
use std::path::Path;

use crate::cli::display::print_report;
use crate::cli::protocol::ControlRequest;
use crate::cli::target::Target;

pub async fn run_add(cfg: &RdoConfig, urls: &[String], dest: Option<&Path>) -> Result<()> {
    if dest.is_some() && urls.len() > 1 {
        bail!("--dest takes a single URL ({} given)", urls.len());
    }
    let submissions: Vec<Submission> = urls
        .iter()
        .map(|url| match dest {
            Some(dest) => Submission::with_destination(url.as_str(), dest),
            None => Submission::url(url.as_str()),
        })
        .collect();

    let report = match Target::connect().await? {
        Target::Orchestrator(mut client) => {
            let mut report = SubmitReport::default();
            for submission in submissions {
                let one: SubmitReport = client
                    .request(&ControlRequest::Add(submission))
                    .await?
                    .into_data()?;
                report.accepted.extend(one.accepted);
                report.rejected.extend(one.rejected);
            }
            report
        }
        Target::Ledger(ledger) => {
            let rules = SubmitRules::from_config(cfg)?;
            ledger.create_with(&rules, &submissions).await?
        }
    };

    print_report(&report);
    if report.accepted.is_empty() {
        bail!("no URL was accepted");
    }
    Ok(())
}
