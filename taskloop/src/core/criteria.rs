//! Checklist parsing for the task document body.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Criterion, CriterionKind, CriterionStatus};

static ISC_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*- \[([ xX])\] (ISC-[A-Za-z0-9-]+):\s*(.+?)(?:\s*\|\s*Verify:\s*(.*?))?\s*$")
        .unwrap()
});

static LEGACY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[([ xX])\] ([CA]\d+):\s*(.+?)\s*$").unwrap());

static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*- \[) (\] (ISC-[A-Za-z0-9-]+|[CA]\d+):)").unwrap());

static ANTI_ISC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ISC-A-\d+$").unwrap());

/// Extract criteria in document order.
///
/// `ISC-` lines take precedence; the compact `C{n}`/`A{n}` form is only read
/// when the body has no `ISC-` criteria. Other lines are ignored.
pub fn parse_criteria(body: &str) -> Vec<Criterion> {
    let isc: Vec<Criterion> = body
        .lines()
        .filter_map(|line| parse_line(&ISC_LINE_RE, line))
        .collect();
    if !isc.is_empty() {
        return isc;
    }
    body.lines()
        .filter_map(|line| parse_line(&LEGACY_LINE_RE, line))
        .collect()
}

fn parse_line(re: &Regex, line: &str) -> Option<Criterion> {
    let caps = re.captures(line)?;
    let checked = !caps[1].trim().is_empty();
    let id = caps[2].to_string();
    let verify = caps
        .get(4)
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty());
    Some(Criterion {
        kind: kind_of(&id),
        description: caps[3].trim().to_string(),
        verify,
        status: if checked {
            CriterionStatus::Passing
        } else {
            CriterionStatus::Failing
        },
        id,
    })
}

/// Anti-criteria are `ISC-A-{n}` or the compact `A{n}`.
pub fn kind_of(id: &str) -> CriterionKind {
    let legacy_anti =
        id.len() > 1 && id.starts_with('A') && id[1..].chars().all(|c| c.is_ascii_digit());
    if ANTI_ISC_RE.is_match(id) || legacy_anti {
        CriterionKind::AntiCriterion
    } else {
        CriterionKind::Criterion
    }
}

/// Check every unchecked line whose id is in `ids`. Returns the new body and
/// how many lines changed. Line endings and all other text are preserved.
pub fn mark_passing(body: &str, ids: &HashSet<String>) -> (String, usize) {
    let mut out = String::with_capacity(body.len());
    let mut flipped = 0;
    for line in body.split_inclusive('\n') {
        match CHECKBOX_RE.captures(line) {
            Some(caps) if ids.contains(&caps[3]) => {
                let prefix = &caps[1];
                out.push_str(prefix);
                out.push('x');
                out.push_str(&line[prefix.len() + 1..]);
                flipped += 1;
            }
            _ => out.push_str(line),
        }
    }
    (out, flipped)
}

/// Lines of the `## CONTEXT` section, without its heading.
pub fn context_section(body: &str) -> Option<String> {
    let mut lines = body.lines().skip_while(|line| line.trim() != "## CONTEXT");
    lines.next()?;
    let section: Vec<&str> = lines.take_while(|line| !line.starts_with("## ")).collect();
    let text = section.join("\n").trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "# Auth\n\n## CRITERIA\n\n- [x] ISC-AUTH-1: Login returns a token | Verify: curl /login\n- [ ] ISC-DB-1: Migrations apply cleanly\n- [ ] ISC-A-1: No plaintext passwords | Verify: grep\nnot a criterion\n- [X] ISC-UI-2: Form renders\n";

    #[test]
    fn parses_in_document_order_with_verify_split() {
        let criteria = parse_criteria(BODY);
        let ids: Vec<&str> = criteria.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["ISC-AUTH-1", "ISC-DB-1", "ISC-A-1", "ISC-UI-2"]);

        assert_eq!(criteria[0].description, "Login returns a token");
        assert_eq!(criteria[0].verify.as_deref(), Some("curl /login"));
        assert!(criteria[0].is_passing());
        assert_eq!(criteria[1].verify, None);
        assert!(!criteria[1].is_passing());
        assert_eq!(criteria[2].kind, CriterionKind::AntiCriterion);
        assert!(criteria[3].is_passing());
    }

    #[test]
    fn legacy_ids_only_when_no_isc_present() {
        let legacy = "- [ ] C1: first\n- [x] A1: never this\n";
        let criteria = parse_criteria(legacy);
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[1].kind, CriterionKind::AntiCriterion);
        assert!(criteria[1].is_passing());

        let mixed = format!("{legacy}- [ ] ISC-X-1: new style\n");
        let criteria = parse_criteria(&mixed);
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].id, "ISC-X-1");
    }

    #[test]
    fn anti_criterion_requires_exact_shape() {
        assert_eq!(kind_of("ISC-A-3"), CriterionKind::AntiCriterion);
        assert_eq!(kind_of("ISC-AUTH-3"), CriterionKind::Criterion);
        assert_eq!(kind_of("A12"), CriterionKind::AntiCriterion);
        assert_eq!(kind_of("C2"), CriterionKind::Criterion);
    }

    #[test]
    fn duplicate_ids_are_kept() {
        let body = "- [ ] ISC-X-1: one\n- [x] ISC-X-1: two\n";
        assert_eq!(parse_criteria(body).len(), 2);
    }

    #[test]
    fn mark_passing_flips_only_named_unchecked_lines() {
        let ids: HashSet<String> = ["ISC-DB-1".to_string(), "ISC-AUTH-1".to_string()].into();
        let (body, flipped) = mark_passing(BODY, &ids);
        assert_eq!(flipped, 1);
        assert!(body.contains("- [x] ISC-DB-1: Migrations apply cleanly\n"));
        assert!(body.contains("- [ ] ISC-A-1: No plaintext passwords | Verify: grep\n"));
        assert_eq!(body.len(), BODY.len());
    }

    #[test]
    fn mark_passing_flips_every_duplicate() {
        let ids: HashSet<String> = ["ISC-X-1".to_string()].into();
        let (body, flipped) = mark_passing("- [ ] ISC-X-1: a\r\n  - [ ] ISC-X-1: b", &ids);
        assert_eq!(flipped, 2);
        assert_eq!(body, "- [x] ISC-X-1: a\r\n  - [x] ISC-X-1: b");
    }

    #[test]
    fn extracts_context_section() {
        let body = "# T\n\n## CONTEXT\n\nUse the staging DB.\n\n## CRITERIA\n- [ ] ISC-A-1: x\n";
        assert_eq!(context_section(body).as_deref(), Some("Use the staging DB."));
        assert_eq!(context_section("# T\n"), None);
    }
}
