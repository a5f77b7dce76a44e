// Line grammar for ansible-playbook's default stdout callback
//
// Every consumer of job output (tree parser, progress estimator) classifies
// lines through `classify`, so the accepted spellings live in one place.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ast::{RecapRow, ResultStatus};

static PLAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PLAY \[(?P<name>.*)\][\s*]*$").expect("play regex"));

static TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TASK \[(?P<name>.*)\][\s*]*$").expect("task regex"));

static RESULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<status>ok|changed|failed|fatal|skipped|skipping|unreachable):\s*\[(?P<host>[^\]]*)\](?P<rest>.*)$",
    )
    .expect("result regex")
});

static RECAP_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<host>\S+)\s*:\s*ok=(?P<ok>\d+)\s+changed=(?P<changed>\d+)\s+unreachable=(?P<unreachable>\d+)\s+failed=(?P<failed>\d+)(?:\s+skipped=(?P<skipped>\d+))?(?:\s+rescued=(?P<rescued>\d+))?(?:\s+ignored=(?P<ignored>\d+))?",
    )
    .expect("recap row regex")
});

// The backend's multi-host baseline runner prefixes non-header lines with
// "[hostname] ".
static HOST_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(?P<host>[^\]\s]+)\]\s+(?P<rest>\S.*)$").expect("prefix regex"));

static GATHERING_FACTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)gathering facts").expect("facts regex"));

/// Marker that terminates a run and opens the per-host summary table
pub const RECAP_MARKER: &str = "PLAY RECAP";

/// Classification of a single output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    Play(&'a str),
    Task(&'a str),
    Result {
        status: ResultStatus,
        host: &'a str,
        detail: Option<&'a str>,
    },
    Recap,
    RecapRow(RecapRow),
    Text(&'a str),
}

impl LineKind<'_> {
    pub fn is_result(&self) -> bool {
        matches!(self, LineKind::Result { .. })
    }
}

/// Classify one line of ansible output
pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }

    let kind = classify_bare(trimmed);
    if !matches!(kind, LineKind::Text(_)) {
        return kind;
    }

    if let Some(caps) = HOST_PREFIX_RE.captures(trimmed) {
        if let Some(rest) = caps.name("rest") {
            let inner = classify_bare(rest.as_str());
            if !matches!(inner, LineKind::Text(_)) {
                return inner;
            }
        }
    }

    LineKind::Text(line.trim_end())
}

fn classify_bare(line: &str) -> LineKind<'_> {
    if line.contains(RECAP_MARKER) {
        return LineKind::Recap;
    }

    if let Some(name) = PLAY_RE.captures(line).and_then(|c| c.name("name")) {
        return LineKind::Play(name.as_str().trim());
    }

    if let Some(name) = TASK_RE.captures(line).and_then(|c| c.name("name")) {
        return LineKind::Task(name.as_str().trim());
    }

    if let Some(caps) = RESULT_RE.captures(line) {
        let keyword = caps.name("status").map(|m| m.as_str()).unwrap_or_default();
        let host = caps.name("host").map(|m| m.as_str().trim()).unwrap_or_default();
        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();

        if let Some(status) = result_status(keyword, rest) {
            let detail = rest
                .split_once("=>")
                .map(|(_, after)| after.trim())
                .filter(|d| !d.is_empty());
            return LineKind::Result {
                status,
                host,
                detail,
            };
        }
    }

    if let Some(row) = parse_recap_row(line) {
        return LineKind::RecapRow(row);
    }

    LineKind::Text(line)
}

fn result_status(keyword: &str, rest: &str) -> Option<ResultStatus> {
    let status = match keyword.to_ascii_lowercase().as_str() {
        "ok" => ResultStatus::Ok,
        "changed" => ResultStatus::Changed,
        "failed" => ResultStatus::Failed,
        "skipped" | "skipping" => ResultStatus::Skipped,
        "unreachable" => ResultStatus::Unreachable,
        "fatal" if rest.contains("UNREACHABLE!") => ResultStatus::Unreachable,
        "fatal" => ResultStatus::Failed,
        _ => return None,
    };
    Some(status)
}

fn parse_recap_row(line: &str) -> Option<RecapRow> {
    let caps = RECAP_ROW_RE.captures(line)?;
    let count = |name: &str| -> Option<u64> {
        match caps.name(name) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    Some(RecapRow {
        host: caps.name("host")?.as_str().to_string(),
        ok: count("ok")?,
        changed: count("changed")?,
        unreachable: count("unreachable")?,
        failed: count("failed")?,
        skipped: count("skipped")?,
        rescued: count("rescued")?,
        ignored: count("ignored")?,
    })
}

/// Whether the output mentions fact gathering anywhere
pub fn mentions_gathering_facts(output: &str) -> bool {
    GATHERING_FACTS_RE.is_match(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_headers() {
        assert_eq!(classify("PLAY [site] *********"), LineKind::Play("site"));
        assert_eq!(classify("TASK [Install nginx] ***"), LineKind::Task("Install nginx"));
        assert_eq!(classify("PLAY RECAP *********"), LineKind::Recap);
        assert_eq!(classify("   "), LineKind::Blank);
    }

    #[test]
    fn test_classify_results() {
        assert_eq!(
            classify("ok: [h1]"),
            LineKind::Result {
                status: ResultStatus::Ok,
                host: "h1",
                detail: None
            }
        );
        assert_eq!(
            classify("changed: [web01] => {\"changed\": true}"),
            LineKind::Result {
                status: ResultStatus::Changed,
                host: "web01",
                detail: Some("{\"changed\": true}")
            }
        );
        assert!(matches!(
            classify("skipping: [h2]"),
            LineKind::Result {
                status: ResultStatus::Skipped,
                ..
            }
        ));
        assert!(matches!(
            classify("SKIPPED: [h2]"),
            LineKind::Result {
                status: ResultStatus::Skipped,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_fatal() {
        match classify("fatal: [db1]: FAILED! => {\"msg\": \"boom\"}") {
            LineKind::Result { status, host, detail } => {
                assert_eq!(status, ResultStatus::Failed);
                assert_eq!(host, "db1");
                assert_eq!(detail, Some("{\"msg\": \"boom\"}"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            classify("fatal: [db2]: UNREACHABLE! => {}"),
            LineKind::Result {
                status: ResultStatus::Unreachable,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_recap_row() {
        let kind = classify(
            "h1                         : ok=3    changed=1    unreachable=0    failed=0    skipped=2    rescued=0    ignored=1",
        );
        match kind {
            LineKind::RecapRow(row) => {
                assert_eq!(row.host, "h1");
                assert_eq!(row.ok, 3);
                assert_eq!(row.changed, 1);
                assert_eq!(row.skipped, 2);
                assert_eq!(row.ignored, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_host_prefix_is_stripped() {
        assert!(matches!(
            classify("[web01] ok: [web01]"),
            LineKind::Result {
                status: ResultStatus::Ok,
                host: "web01",
                ..
            }
        ));
        assert!(matches!(
            classify("[web01] web01 : ok=1 changed=0 unreachable=0 failed=0"),
            LineKind::RecapRow(_)
        ));
        // Ansible warnings look similar but are not prefixed lines
        assert_eq!(
            classify("[WARNING]: No inventory was parsed"),
            LineKind::Text("[WARNING]: No inventory was parsed")
        );
    }

    #[test]
    fn test_oversized_counts_are_text() {
        let line = "h1 : ok=99999999999999999999999 changed=0 unreachable=0 failed=0";
        assert!(matches!(classify(line), LineKind::Text(_)));
    }

    #[test]
    fn test_gathering_facts() {
        assert!(mentions_gathering_facts("TASK [Gathering Facts] ****"));
        assert!(mentions_gathering_facts("GATHERING FACTS"));
        assert!(!mentions_gathering_facts("TASK [install]"));
    }
}
