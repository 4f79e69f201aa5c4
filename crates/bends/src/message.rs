use serde_json::{json, Value};

use crate::catalog::Service;
use crate::classify::Verdict;
use crate::group::TeamBundle;

pub const HEADER_TEXT: &str = "Build Error Notification Dispatch System";

fn header() -> Value {
    json!({"type": "header", "text": {"type": "plain_text", "text": HEADER_TEXT}})
}

fn divider() -> Value {
    json!({"type": "divider"})
}

fn section(text: String) -> Value {
    json!({"type": "section", "text": {"type": "mrkdwn", "text": text}})
}

fn success_line(ok: usize) -> String {
    if ok == 1 {
        format!("*Successful Builds*\n>*{ok} repository* had a successful build.")
    } else {
        format!("*Successful Builds*\n>*{ok} repositories* had successful builds.")
    }
}

fn bullet(service: &Service) -> String {
    format!(">• <{}|{}>\n", service.repo_url, service.name)
}

/// Slack blocks for one team's bundle: success count, failed builds, and
/// services with no recent scheduled run. Bullets link the repository.
pub fn team_summary(bundle: &TeamBundle, ok: usize) -> Vec<Value> {
    let mut blocks = vec![header(), divider(), section(success_line(ok)), divider()];

    let mut failed = String::from("*Failed Builds*\n");
    let mut any_failed = false;
    for (service, verdict) in &bundle.entries {
        if *verdict == Verdict::NeedsAttention {
            failed.push_str(&bullet(service));
            any_failed = true;
        }
    }
    if !any_failed {
        failed.push_str(">No failed builds.");
    }
    blocks.push(section(failed));

    let missing: Vec<&Service> = bundle
        .entries
        .iter()
        .filter(|(_, verdict)| *verdict == Verdict::NoData)
        .map(|(service, _)| service)
        .collect();
    if !missing.is_empty() {
        let mut text = String::from("*No Recent Scheduled Run*\n");
        for service in missing {
            text.push_str(&bullet(service));
        }
        blocks.push(section(text));
    }

    blocks
}

/// Cross-team summary blocks: per-team success and failure counts over every
/// evaluated service, in evaluation order.
pub fn overall_summary(classified: &[(Service, Verdict)]) -> Vec<Value> {
    let mut blocks = vec![header()];

    let mut teams: Vec<&str> = Vec::new();
    for (service, _) in classified {
        if !teams.contains(&service.team.as_str()) {
            teams.push(&service.team);
        }
    }

    for team in teams {
        blocks.push(divider());
        blocks.push(section(format!("Team: *{team}*")));

        let ok = count(classified, team, Verdict::Ok);
        blocks.push(section(success_line(ok)));

        let mut failed = String::from("*Failed Builds*\n");
        let mut any_failed = false;
        for (service, verdict) in classified {
            if service.team == team && *verdict == Verdict::NeedsAttention {
                failed.push_str(&bullet(service));
                any_failed = true;
            }
        }
        if !any_failed {
            failed.push_str(">No failed builds.");
        }
        blocks.push(section(failed));

        let missing = count(classified, team, Verdict::NoData);
        if missing > 0 {
            blocks.push(section(format!(
                "*No Recent Scheduled Run*\n>*{missing}* repositories had no recent scheduled run."
            )));
        }
    }

    blocks
}

fn count(classified: &[(Service, Verdict)], team: &str, verdict: Verdict) -> usize {
    classified
        .iter()
        .filter(|(service, v)| service.team == team && *v == verdict)
        .count()
}
