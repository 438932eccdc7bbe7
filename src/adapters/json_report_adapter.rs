//! JSON report adapter implementing ReportPort.
//!
//! Learning reports land in `learning/<cycle>.json` with a plain-text
//! companion; fallback dumps land in `fallback/<label>-<ts>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::domain::error::TradeloopError;
use crate::domain::learning::LearningReport;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter {
    root: PathBuf,
}

impl JsonReportAdapter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn write(&self, dir: &str, name: &str, contents: &[u8]) -> Result<PathBuf, TradeloopError> {
        let dir = self.root.join(dir);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Keep labels safe to use as file names.
fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn render_learning_report(report: &LearningReport) -> String {
    let mut out = format!(
        "Learning cycle {} ({})\nOutcome: {}\n",
        report.cycle_id,
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.outcome
    );

    if let Some(window) = &report.window {
        out.push_str(&format!(
            "Window: {} to {} ({:?} horizon)\n",
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
            window.horizon
        ));
        out.push_str(&format!(
            "Trades: {} ({} pending), wins {}, losses {}, win rate {:.1}%, total P&L {:.2}\n",
            window.trade_count,
            window.pending,
            window.wins,
            window.losses,
            window.win_rate * 100.0,
            window.total_pnl
        ));
        if !window.worst.is_empty() {
            out.push_str("Worst trades:\n");
            for t in &window.worst {
                out.push_str(&format!(
                    "  #{} {} {} x{} @ {:.2}: {:.2}\n",
                    t.id, t.side, t.ticker, t.quantity, t.price, t.pnl
                ));
            }
        }
    }

    if let Some(patterns) = &report.patterns {
        out.push_str(&format!("Patterns ({}):\n", patterns.patterns.len()));
        for p in &patterns.patterns {
            out.push_str(&format!("  - {}\n", p));
        }
    }

    if !report.accepted.is_empty() {
        out.push_str("Accepted rules:\n");
        for c in &report.accepted {
            out.push_str(&format!(
                "  [{}] p{} {}\n",
                c.rule.category.as_str(),
                c.rule.priority,
                c.rule.text
            ));
        }
    }
    if !report.dropped.is_empty() {
        out.push_str("Dropped candidates:\n");
        for d in &report.dropped {
            out.push_str(&format!("  {}: {}\n", d.candidate.text, d.reason));
        }
    }
    if let (Some(prev), Some(new)) = (report.previous_version, report.new_version) {
        out.push_str(&format!("Rule version {} -> {}\n", prev, new));
    }
    out
}

impl ReportPort for JsonReportAdapter {
    fn write_learning_report(&self, report: &LearningReport) -> Result<(), TradeloopError> {
        let stem = file_stem(&report.cycle_id);
        let body = serde_json::to_vec_pretty(report)?;
        self.write("learning", &format!("{}.json", stem), &body)?;
        self.write(
            "learning",
            &format!("{}.txt", stem),
            render_learning_report(report).as_bytes(),
        )?;
        Ok(())
    }

    fn write_fallback(
        &self,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TradeloopError> {
        let name = format!(
            "{}-{}.json",
            file_stem(label),
            Utc::now().format("%Y%m%dT%H%M%S%6fZ")
        );
        let body = serde_json::to_vec_pretty(payload)?;
        self.write("fallback", &name, &body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::{DroppedCandidate, LearningOutcome};
    use crate::domain::rules::{PatternSet, RuleCandidate};

    fn report() -> LearningReport {
        LearningReport {
            cycle_id: "learn-20260301-000000-abcdef".into(),
            generated_at: Utc::now(),
            outcome: LearningOutcome::NoChange,
            window: None,
            patterns: Some(PatternSet {
                patterns: vec!["bought into gap-ups".into()],
                notes: serde_json::Value::Null,
            }),
            accepted: vec![],
            dropped: vec![DroppedCandidate {
                candidate: RuleCandidate {
                    text: "buy more".into(),
                    ..RuleCandidate::default()
                },
                reason: "missing category".into(),
            }],
            previous_version: None,
            new_version: None,
        }
    }

    #[test]
    fn learning_report_writes_json_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = JsonReportAdapter::new(dir.path());
        adapter.write_learning_report(&report()).unwrap();

        let json_path = dir.path().join("learning/learn-20260301-000000-abcdef.json");
        let loaded: LearningReport =
            serde_json::from_str(&fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(loaded.cycle_id, report().cycle_id);

        let text =
            fs::read_to_string(dir.path().join("learning/learn-20260301-000000-abcdef.txt"))
                .unwrap();
        assert!(text.contains("no change"));
        assert!(text.contains("bought into gap-ups"));
        assert!(text.contains("missing category"));
    }

    #[test]
    fn fallback_dumps_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = JsonReportAdapter::new(dir.path());
        let payload = serde_json::json!({"run_id": "run-1"});
        adapter.write_fallback("run-1", &payload).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        adapter.write_fallback("run-1", &payload).unwrap();
        assert_eq!(fs::read_dir(dir.path().join("fallback")).unwrap().count(), 2);
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(file_stem("run/../x y"), "run____x_y");
    }
}
