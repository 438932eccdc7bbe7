//! Condition AST for machine-checkable rule conditions.
//!
//! - `Operand`: a named metric or a numeric constant
//! - `Condition`: comparison and composite variants

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Metric(String),
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Above {
        left: Operand,
        right: Operand,
    },
    Below {
        left: Operand,
        right: Operand,
    },
    Equals {
        left: Operand,
        right: Operand,
    },
    Between {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Every metric name the condition reads, sorted.
    pub fn referenced_metrics(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_metrics(self, &mut out);
        out
    }
}

fn collect_operand(operand: &Operand, out: &mut BTreeSet<String>) {
    if let Operand::Metric(name) = operand {
        out.insert(name.clone());
    }
}

fn collect_metrics(condition: &Condition, out: &mut BTreeSet<String>) {
    match condition {
        Condition::Above { left, right }
        | Condition::Below { left, right }
        | Condition::Equals { left, right } => {
            collect_operand(left, out);
            collect_operand(right, out);
        }
        Condition::Between { operand, .. } => collect_operand(operand, out),
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                collect_metrics(child, out);
            }
        }
        Condition::Not(inner) => collect_metrics(inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str) -> Operand {
        Operand::Metric(name.to_string())
    }

    #[test]
    fn operand_equality() {
        assert_eq!(Operand::Constant(100.5), Operand::Constant(100.5));
        assert_ne!(Operand::Constant(100.5), Operand::Constant(99.0));
        assert_ne!(metric("rsi_14"), metric("cash_ratio"));
    }

    #[test]
    fn referenced_metrics_of_comparison() {
        let cond = Condition::Above {
            left: metric("rsi_14"),
            right: Operand::Constant(70.0),
        };
        let metrics: Vec<_> = cond.referenced_metrics().into_iter().collect();
        assert_eq!(metrics, vec!["rsi_14".to_string()]);
    }

    #[test]
    fn referenced_metrics_walks_nested_conditions() {
        let cond = Condition::And(vec![
            Condition::Or(vec![
                Condition::Below {
                    left: metric("cash_ratio"),
                    right: Operand::Constant(0.1),
                },
                Condition::Between {
                    operand: metric("position_pct"),
                    lower: 0.2,
                    upper: 0.5,
                },
            ]),
            Condition::Not(Box::new(Condition::Equals {
                left: metric("cash_ratio"),
                right: metric("target_cash_ratio"),
            })),
        ]);
        let metrics: Vec<_> = cond.referenced_metrics().into_iter().collect();
        assert_eq!(
            metrics,
            vec!["cash_ratio", "position_pct", "target_cash_ratio"]
        );
    }

    #[test]
    fn constants_only_reference_nothing() {
        let cond = Condition::Equals {
            left: Operand::Constant(1.0),
            right: Operand::Constant(1.0),
        };
        assert!(cond.referenced_metrics().is_empty());
    }
}
