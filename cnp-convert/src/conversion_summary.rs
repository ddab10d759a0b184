use serde::Serialize;

use crate::policy::PolicyDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub rules: usize,
    pub policies: usize,
    pub ingress: usize,
    pub egress: usize,
}

pub fn summarize(rule_count: usize, policies: &[PolicyDocument]) -> ConversionSummary {
    ConversionSummary {
        rules: rule_count,
        policies: policies.len(),
        ingress: policies.iter().map(|p| p.ingress.len()).sum(),
        egress: policies.iter().map(|p| p.egress.len()).sum(),
    }
}

pub fn render(summary: ConversionSummary) -> String {
    format!(
        "convert_summary rules={} policies={} ingress={} egress={}",
        summary.rules, summary.policies, summary.ingress, summary.egress
    )
}
