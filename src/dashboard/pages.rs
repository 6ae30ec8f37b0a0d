//! HTML pages: the run index and one page per run with its charts

use std::collections::BTreeMap;

use crate::dashboard::charts::escape_xml;
use crate::dashboard::runs::{RunSummary, ScalarPoint};

const STYLE: &str = "body{font-family:Arial,sans-serif;color:#2c3e50;margin:2em}\
table{border-collapse:collapse}td,th{padding:4px 12px;border-bottom:1px solid #ecf0f1;text-align:left}\
img{display:block;margin:1em 0;max-width:100%}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape_xml(title),
        STYLE,
        body
    )
}

/// Chart groups of a run: each epoch metric next to its validation twin,
/// e.g. `loss` → `[epoch_loss, epoch_val_loss]`
pub fn scalar_groups<'a>(tags: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for tag in tags {
        let Some(metric) = tag.strip_prefix("epoch_") else {
            continue;
        };
        let metric = metric.strip_prefix("val_").unwrap_or(metric);
        groups.entry(metric.to_string()).or_default().push(tag.clone());
    }
    for members in groups.values_mut() {
        // training series first
        members.sort_by_key(|tag| tag.contains("val_"));
    }
    groups
}

/// `GET /`
pub fn index_page(runs: &[RunSummary]) -> String {
    let mut body = String::from("<h1>Training runs</h1>");

    if runs.is_empty() {
        body.push_str("<p>No runs logged yet.</p>");
        return page("Training runs", &body);
    }

    body.push_str("<table><tr><th>Run</th><th>Last epoch</th><th>Status</th><th>Modified</th></tr>");
    for run in runs {
        let name = escape_xml(&run.name);
        body.push_str(&format!(
            "<tr><td><a href=\"/runs/{name}\">{name}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>",
            run.last_step.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            if run.has_history { "finished" } else { "running" },
            run.modified.as_deref().map(escape_xml).unwrap_or_default(),
        ));
    }
    body.push_str("</table>");
    page("Training runs", &body)
}

/// `GET /runs/:run`
pub fn run_page(
    run: &str,
    scalars: &BTreeMap<String, Vec<ScalarPoint>>,
    histogram_tags: &[String],
) -> String {
    let name = escape_xml(run);
    let mut body = format!("<p><a href=\"/\">All runs</a></p><h1>{name}</h1>");

    let test: Vec<(&String, f64)> = scalars
        .iter()
        .filter(|(tag, _)| tag.starts_with("test_"))
        .filter_map(|(tag, points)| points.last().map(|p| (tag, p.value)))
        .collect();
    if !test.is_empty() {
        body.push_str("<h2>Test</h2><table>");
        for (tag, value) in test {
            body.push_str(&format!("<tr><td>{}</td><td>{:.4}</td></tr>", escape_xml(tag), value));
        }
        body.push_str("</table>");
    }

    let groups = scalar_groups(scalars.keys());
    if !groups.is_empty() {
        body.push_str("<h2>Scalars</h2>");
    }
    for (metric, tags) in &groups {
        body.push_str(&format!(
            "<img src=\"/runs/{name}/scalars.svg?tags={}\" alt=\"{}\">",
            escape_xml(&tags.join(",")),
            escape_xml(metric)
        ));
    }

    if !histogram_tags.is_empty() {
        body.push_str("<h2>Histograms (last epoch)</h2>");
    }
    for tag in histogram_tags {
        body.push_str(&format!(
            "<img src=\"/runs/{name}/histograms.svg?tag={}\" alt=\"{}\">",
            escape_xml(tag),
            escape_xml(tag)
        ));
    }

    page(run, &body)
}
