//! Classification of an executor outcome into attempt success or failure.

use crate::core::sentinel::{ParsedResult, SentinelStatus, Validation};
use crate::core::types::ExecOutcome;

/// Final classification of one attempt, with a human-readable note that ends
/// up in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub success: bool,
    pub note: String,
}

/// Combine the parsed sentinel, exit status, and timeout flags into a single
/// verdict. Rules, evaluated top-down:
///
/// 1. Sentinel says `done` and validation is not `fail` → success.
/// 2. Any other sentinel → failure.
/// 3. No sentinel, timed out → failure.
/// 4. No sentinel, exit code 0 → success (the agent forgot the sentinel but
///    exited cleanly; forgiving this is deliberate).
/// 5. Anything else → failure.
pub fn resolve(outcome: &ExecOutcome) -> Resolution {
    if let Some(parsed) = &outcome.parsed {
        let success =
            parsed.status == SentinelStatus::Done && parsed.validation != Validation::Fail;
        return Resolution {
            success,
            note: parsed_note(parsed),
        };
    }

    if outcome.timed_out {
        let kind = outcome
            .timeout_kind
            .map(|k| k.as_str())
            .unwrap_or("idle");
        let bound = outcome.timeout_limit_ms.unwrap_or(outcome.duration_ms);
        return Resolution {
            success: false,
            note: format!("executor {kind} timeout after {bound}ms"),
        };
    }

    if outcome.exit_code == Some(0) {
        return Resolution {
            success: true,
            note: "exit_code_fallback success (missing RESULT)".to_string(),
        };
    }

    let exit_code = outcome
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let signal = outcome.signal.as_deref().unwrap_or("none");
    Resolution {
        success: false,
        note: format!("executor failed exitCode={exit_code} signal={signal}"),
    }
}

fn parsed_note(parsed: &ParsedResult) -> String {
    let mut note = format!(
        "parsed_result status={} validation={}",
        parsed.status.as_str(),
        parsed.validation.as_str()
    );
    if !parsed.summary.is_empty() {
        note.push_str(" summary=");
        note.push_str(&parsed.summary);
    }
    note
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::types::TimeoutKind;

    fn outcome() -> ExecOutcome {
        ExecOutcome {
            exit_code: Some(0),
            signal: None,
            duration_ms: 1_000,
            log_path: PathBuf::from("logs/1-attempt-1.log"),
            timed_out: false,
            timeout_kind: None,
            timeout_limit_ms: None,
            parsed: None,
        }
    }

    fn parsed(status: SentinelStatus, validation: Validation) -> ParsedResult {
        ParsedResult {
            status,
            validation,
            summary: "ok".to_string(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn sentinel_done_with_passing_validation_succeeds() {
        let mut o = outcome();
        o.exit_code = Some(1);
        o.parsed = Some(parsed(SentinelStatus::Done, Validation::Pass));
        let r = resolve(&o);
        assert!(r.success);
        assert!(r.note.contains("status=done"));
        assert!(r.note.contains("summary=ok"));
    }

    /// A done sentinel whose validation failed is still a failed attempt.
    #[test]
    fn sentinel_done_with_failing_validation_fails() {
        let mut o = outcome();
        o.parsed = Some(parsed(SentinelStatus::Done, Validation::Fail));
        assert!(!resolve(&o).success);
    }

    #[test]
    fn sentinel_failed_overrides_clean_exit() {
        let mut o = outcome();
        o.parsed = Some(parsed(SentinelStatus::Failed, Validation::Unknown));
        let r = resolve(&o);
        assert!(!r.success);
        assert!(r.note.contains("status=failed"));
    }

    /// Timeout is a failure regardless of exit code when no sentinel arrived.
    #[test]
    fn timeout_without_sentinel_fails() {
        let mut o = outcome();
        o.timed_out = true;
        o.timeout_kind = Some(TimeoutKind::Hard);
        o.timeout_limit_ms = Some(60_000);
        let r = resolve(&o);
        assert!(!r.success);
        assert_eq!(r.note, "executor hard timeout after 60000ms");
    }

    #[test]
    fn clean_exit_without_sentinel_is_forgiven() {
        let r = resolve(&outcome());
        assert!(r.success);
        assert!(r.note.contains("missing RESULT"));
    }

    #[test]
    fn nonzero_exit_without_sentinel_fails() {
        let mut o = outcome();
        o.exit_code = Some(2);
        let r = resolve(&o);
        assert!(!r.success);
        assert_eq!(r.note, "executor failed exitCode=2 signal=none");
    }

    #[test]
    fn signal_death_reports_the_signal() {
        let mut o = outcome();
        o.exit_code = None;
        o.signal = Some("SIGKILL".to_string());
        let r = resolve(&o);
        assert!(!r.success);
        assert_eq!(r.note, "executor failed exitCode=none signal=SIGKILL");
    }
}
