//! Worker result sentinel parsing.

/// A parallel worker's claim about its criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: String },
    /// No sentinel for this criterion, or the process did not exit cleanly.
    Missing,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// Read the verdict for `criterion_id` from a finished invocation.
    ///
    /// Output of a process that timed out or exited non-zero never counts.
    pub fn from_run(stdout: &str, exited_cleanly: bool, criterion_id: &str) -> Self {
        if !exited_cleanly {
            return Verdict::Missing;
        }
        Self::parse(stdout, criterion_id)
    }

    /// The sentinel must be a whole line, `RESULT: {id} PASS` or
    /// `RESULT: {id} FAIL: {reason}`; the last such line wins.
    pub fn parse(stdout: &str, criterion_id: &str) -> Self {
        let pass = format!("RESULT: {criterion_id} PASS");
        let fail = format!("RESULT: {criterion_id} FAIL");
        let mut verdict = Verdict::Missing;
        for line in stdout.lines().map(str::trim) {
            if line == pass {
                verdict = Verdict::Pass;
            } else if let Some(rest) = line.strip_prefix(&fail)
                && (rest.is_empty() || rest.starts_with(':'))
            {
                verdict = Verdict::Fail {
                    reason: rest.trim_start_matches(':').trim().to_string(),
                };
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pass_line_is_required() {
        assert_eq!(
            Verdict::parse("work...\nRESULT: ISC-AUTH-1 PASS\n", "ISC-AUTH-1"),
            Verdict::Pass
        );
        assert_eq!(Verdict::parse("ISC-AUTH-1 PASS\n", "ISC-AUTH-1"), Verdict::Missing);
        assert_eq!(
            Verdict::parse("RESULT: ISC-AUTH-1 PASSED\n", "ISC-AUTH-1"),
            Verdict::Missing
        );
        assert_eq!(
            Verdict::parse("RESULT: ISC-AUTH-12 PASS\n", "ISC-AUTH-1"),
            Verdict::Missing
        );
        assert_eq!(
            Verdict::parse("saw RESULT: ISC-AUTH-1 PASS in docs\n", "ISC-AUTH-1"),
            Verdict::Missing
        );
    }

    #[test]
    fn fail_line_carries_reason() {
        assert_eq!(
            Verdict::parse("RESULT: ISC-DB-2 FAIL: migration 7 errors\n", "ISC-DB-2"),
            Verdict::Fail {
                reason: "migration 7 errors".to_string()
            }
        );
    }

    #[test]
    fn last_sentinel_wins() {
        let out = "RESULT: ISC-X-1 FAIL: first try\nRESULT: ISC-X-1 PASS\n";
        assert!(Verdict::parse(out, "ISC-X-1").is_pass());
    }

    #[test]
    fn unclean_exit_discards_pass_claim() {
        let stdout = "RESULT: ISC-X-1 PASS\n";
        assert!(Verdict::from_run(stdout, true, "ISC-X-1").is_pass());
        assert_eq!(Verdict::from_run(stdout, false, "ISC-X-1"), Verdict::Missing);
    }
}
