//! CLI handler for inspecting the consent allow-list.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use super::args::ConsentCliArgs;
use crate::capture::ParticipantId;
use crate::config::Config;
use crate::session::{ComplianceGate, ConsentList};

#[derive(Debug, Serialize)]
pub struct ConsentReport {
    pub enforced: bool,
    pub allowlist_path: Option<PathBuf>,
    pub allowed: Vec<ParticipantId>,
    pub checks: Vec<ConsentCheck>,
}

#[derive(Debug, Serialize)]
pub struct ConsentCheck {
    pub participant: ParticipantId,
    pub eligible: bool,
}

/// Loads the configured allow-list and evaluates `participants` against it
/// exactly as a recording session would.
pub async fn consent_report(config: &Config, participants: &[String]) -> Result<ConsentReport> {
    let gate = ConsentList::from_config(&config.consent)?;

    let mut checks = Vec::with_capacity(participants.len());
    for id in participants {
        let participant = ParticipantId::new(id.as_str());
        let eligible = gate.is_eligible(&participant).await;
        checks.push(ConsentCheck {
            participant,
            eligible,
        });
    }

    Ok(ConsentReport {
        enforced: gate.is_enforced(),
        allowlist_path: gate.path().map(|p| p.to_path_buf()),
        allowed: gate.allowed(),
        checks,
    })
}

pub async fn handle_consent_command(args: ConsentCliArgs, config: &Config) -> Result<()> {
    let report = consent_report(config, &args.participants).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Enforcement: {}",
        if report.enforced { "on" } else { "off (everyone is recorded)" }
    );
    match &report.allowlist_path {
        Some(path) => println!("Allow-list:  {}", path.display()),
        None => println!("Allow-list:  (not configured)"),
    }
    println!("Listed:      {}", report.allowed.len());
    for id in &report.allowed {
        println!("  {}", id);
    }

    if !report.checks.is_empty() {
        println!();
        for check in &report.checks {
            let verdict = if check.eligible { "recorded" } else { "not recorded" };
            println!("{:<24} {}", check.participant.as_str(), verdict);
        }
    }
    Ok(())
}
