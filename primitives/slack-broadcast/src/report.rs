//! Rendering of a [`DeliveryReport`] for the terminal.

use std::fmt::Write;

use broadcast_common::{DeliveryReport, DeliveryStatus};

/// Human-readable summary, one line per channel.
pub fn render_text(report: &DeliveryReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run { "Would send" } else { "Sent" };

    for outcome in &report.outcomes {
        let name = outcome.channel_name.trim_start_matches('#');
        let _ = match outcome.status {
            DeliveryStatus::Succeeded => {
                writeln!(out, "  ok    #{name} ({})", outcome.channel_id)
            }
            DeliveryStatus::Simulated => {
                writeln!(out, "  dry   #{name} ({})", outcome.channel_id)
            }
            DeliveryStatus::Failed => writeln!(
                out,
                "  FAIL  #{name} ({}) after {} attempt(s): {}",
                outcome.channel_id,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        };
    }

    if !report.unresolved_mentions.is_empty() {
        let _ = writeln!(
            out,
            "Unresolved mentions left as written: {}",
            report.unresolved_mentions.join(", ")
        );
    }

    let ok = report.outcomes.iter().filter(|o| o.is_success()).count();
    let _ = write!(
        out,
        "{verb} to {ok}/{} channel(s) in {}ms",
        report.outcomes.len(),
        report.elapsed_ms
    );
    if report.dry_run {
        let _ = write!(out, "\n\n{}", report.content);
    }
    out
}

pub fn render_json(report: &DeliveryReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use broadcast_common::{BroadcastState, DeliveryOutcome, ResolvedChannel, SendError};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn report(dry_run: bool, outcomes: Vec<DeliveryOutcome>) -> DeliveryReport {
        DeliveryReport {
            state: BroadcastState::Completed,
            requested_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap(),
            dry_run,
            content: "hi <@U01>".into(),
            unresolved_mentions: vec![],
            outcomes,
            elapsed_ms: 12,
        }
    }

    fn channel(id: &str, name: &str) -> ResolvedChannel {
        broadcast_common::DirectoryEntry::new(id, name).into()
    }

    #[test]
    fn lists_each_channel_and_totals() {
        let eng = channel("C01", "eng");
        let ops = channel("C02", "ops");
        let text = render_text(&report(
            false,
            vec![
                DeliveryOutcome::succeeded(&eng, 1),
                DeliveryOutcome::failed(&ops, 3, &SendError::transient("HTTP 503")),
            ],
        ));
        assert_eq!(
            text,
            "  ok    #eng (C01)\n  \
             FAIL  #ops (C02) after 3 attempt(s): transient error: HTTP 503\n\
             Sent to 1/2 channel(s) in 12ms"
        );
    }

    #[test]
    fn dry_run_shows_final_content() {
        let eng = channel("C01", "#eng");
        let mut r = report(true, vec![DeliveryOutcome::simulated(&eng)]);
        r.unresolved_mentions = vec!["carol".into()];
        let text = render_text(&r);
        assert!(text.starts_with("  dry   #eng (C01)\n"));
        assert!(text.contains("Unresolved mentions left as written: carol\n"));
        assert!(text.contains("Would send to 1/1 channel(s)"));
        assert!(text.ends_with("\n\nhi <@U01>"));
    }

    #[test]
    fn json_omits_absent_errors() {
        let eng = channel("C01", "eng");
        let json = render_json(&report(false, vec![DeliveryOutcome::succeeded(&eng, 2)])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "completed");
        assert_eq!(value["requested_at"], "2026-03-02T09:30:00Z");
        assert_eq!(value["outcomes"][0]["attempts"], 2);
        assert!(value["outcomes"][0].get("error").is_none());
    }
}
