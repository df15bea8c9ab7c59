use std::collections::BTreeMap;
use std::fmt::Write as _;

use fixity_model::{GraphFormat, GraphJson, ShaSegment};

use crate::error::Result;

/// Generated identifiers are cut to this many characters. Distinct inputs
/// can collide after sanitising and truncation.
pub const MAX_NODE_ID_LEN: usize = 120;

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn node_id(machine: &str, file_path: &str, file_name: &str) -> String {
    let mut id = sanitize(&format!("{machine}_{file_path}_{file_name}"));
    id.truncate(MAX_NODE_ID_LEN);
    id
}

fn display_identity(segment: &ShaSegment) -> String {
    if segment.file_path.ends_with(&segment.file_name) {
        segment.file_path.clone()
    } else {
        format!("{} [{}]", segment.file_path, segment.file_name)
    }
}

fn span(segment: &ShaSegment) -> String {
    format!(
        "{}..{}",
        segment.start_date.format("%Y-%m-%d"),
        segment.end_date.format("%Y-%m-%d")
    )
}

fn quote_safe(raw: &str) -> String {
    raw.replace('"', "'")
}

/// Text for a quoted DOT string, where `\` starts an escape sequence.
fn dot_safe(raw: &str) -> String {
    quote_safe(&raw.replace('\\', "\\\\"))
}

/// Machines in name order; each machine keeps its segments in input order.
fn by_machine(segments: &[ShaSegment]) -> BTreeMap<&str, Vec<&ShaSegment>> {
    let mut grouped: BTreeMap<&str, Vec<&ShaSegment>> = BTreeMap::new();
    for segment in segments {
        grouped
            .entry(segment.machine_name.as_str())
            .or_default()
            .push(segment);
    }
    grouped
}

pub fn render_ascii_chain(segments: &[ShaSegment]) -> String {
    by_machine(segments)
        .into_iter()
        .map(|(machine, segs)| {
            let chain = segs
                .iter()
                .map(|s| format!("{{{} {}}}", display_identity(s), span(s)))
                .collect::<Vec<_>>()
                .join(" -> ");
            format!("{machine} {chain}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_dot(segments: &[ShaSegment]) -> String {
    let mut out = String::from("digraph fixity {\n  rankdir=LR;\n");
    for (machine, segs) in by_machine(segments) {
        let machine_label = dot_safe(machine);
        let _ = writeln!(out, "  subgraph \"cluster_{machine_label}\" {{");
        let _ = writeln!(out, "    label=\"{machine_label}\";");
        let mut previous: Option<String> = None;
        for segment in segs {
            let id = node_id(machine, &segment.file_path, &segment.file_name);
            let label =
                format!("{}\\n{}", dot_safe(&display_identity(segment)), span(segment));
            let _ = writeln!(out, "    \"{id}\" [label=\"{label}\"];");
            if let Some(prev) = previous.as_deref() {
                let _ = writeln!(out, "    \"{prev}\" -> \"{id}\";");
            }
            previous = Some(id);
        }
        out.push_str("  }\n");
    }
    out.push('}');
    out
}

pub fn render_mermaid(segments: &[ShaSegment]) -> String {
    let mut out = String::from("flowchart LR\n");
    for (machine, segs) in by_machine(segments) {
        let _ = writeln!(
            out,
            "  subgraph cluster_{}[\"{}\"]",
            sanitize(machine),
            quote_safe(machine)
        );
        let mut previous: Option<String> = None;
        for segment in segs {
            let id = node_id(machine, &segment.file_path, &segment.file_name);
            let label = format!(
                "{}<br/>{}",
                quote_safe(&display_identity(segment)),
                span(segment)
            );
            let _ = writeln!(out, "    {id}[\"{label}\"]");
            if let Some(prev) = previous.as_deref() {
                let _ = writeln!(out, "    {prev} --> {id}");
            }
            previous = Some(id);
        }
        out.push_str("  end\n");
    }
    out.truncate(out.trim_end().len());
    out
}

/// Render `segments` for `sha256` in the requested format.
pub fn render(
    format: GraphFormat,
    sha256: &str,
    segments: Vec<ShaSegment>,
) -> Result<String> {
    let rendered = match format {
        GraphFormat::Ascii => render_ascii_chain(&segments),
        GraphFormat::Dot => render_dot(&segments),
        GraphFormat::Mermaid => render_mermaid(&segments),
        GraphFormat::Json => serde_json::to_string_pretty(&GraphJson {
            sha256: sha256.to_string(),
            segments,
        })?,
    };
    Ok(rendered)
}
