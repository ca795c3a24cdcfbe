//! Citation extraction and formatting

use ragforge_common::types::Candidate;
use serde::{Deserialize, Serialize};

/// Where a piece of context came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

impl From<&Candidate> for Citation {
    fn from(candidate: &Candidate) -> Self {
        let m = &candidate.metadata;
        Self {
            source: m.source.clone(),
            title: m.title.clone(),
            heading: m.heading.clone(),
            start_line: m.start_line,
            end_line: m.end_line,
            chunk_index: m.chunk_index,
        }
    }
}

/// One citation per candidate, in order
pub fn extract_citations(candidates: &[Candidate]) -> Vec<Citation> {
    candidates.iter().map(Citation::from).collect()
}

/// Render a numbered source list, one line per distinct source
///
/// ```text
/// 1. docs/runtime.md (Tokio Runtime): Scheduling, Blocking
/// 2. notes.txt
/// ```
pub fn format_citations(citations: &[Citation]) -> String {
    struct SourceEntry<'a> {
        source: &'a str,
        title: Option<&'a str>,
        headings: Vec<&'a str>,
    }

    let mut entries: Vec<SourceEntry<'_>> = Vec::new();

    for citation in citations {
        let pos = match entries.iter().position(|e| e.source == citation.source) {
            Some(pos) => pos,
            None => {
                entries.push(SourceEntry {
                    source: &citation.source,
                    title: None,
                    headings: Vec::new(),
                });
                entries.len() - 1
            }
        };
        let entry = &mut entries[pos];

        if entry.title.is_none() {
            entry.title = citation.title.as_deref().filter(|t| !t.trim().is_empty());
        }
        if let Some(heading) = citation.heading.as_deref().filter(|h| !h.trim().is_empty()) {
            if !entry.headings.contains(&heading) {
                entry.headings.push(heading);
            }
        }
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mut line = format!("{}. {}", i + 1, e.source);
            if let Some(title) = e.title {
                line.push_str(&format!(" ({title})"));
            }
            if !e.headings.is_empty() {
                line.push_str(": ");
                line.push_str(&e.headings.join(", "));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: &str, title: Option<&str>, heading: Option<&str>) -> Candidate {
        let mut c = Candidate::new(format!("{source}-{heading:?}"), "text", source);
        c.metadata.title = title.map(String::from);
        c.metadata.heading = heading.map(String::from);
        c
    }

    #[test]
    fn test_extract_is_one_to_one() {
        let mut c = candidate("a.md", Some("A"), Some("Intro"));
        c.metadata.start_line = Some(3);
        c.metadata.end_line = Some(9);
        c.metadata.chunk_index = Some(1);

        let citations = extract_citations(&[c, candidate("a.md", None, None)]);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].start_line, Some(3));
        assert_eq!(citations[0].end_line, Some(9));
        assert_eq!(citations[0].chunk_index, Some(1));
        assert_eq!(citations[1].title, None);
    }

    #[test]
    fn test_format_groups_by_source() {
        let citations = extract_citations(&[
            candidate("runtime.md", None, Some("Scheduling")),
            candidate("serde.md", Some("Serde Guide"), None),
            candidate("runtime.md", Some("Tokio Runtime"), Some("Blocking")),
            candidate("runtime.md", Some("Ignored Title"), Some("Scheduling")),
            candidate("runtime.md", None, Some("  ")),
        ]);

        assert_eq!(
            format_citations(&citations),
            "1. runtime.md (Tokio Runtime): Scheduling, Blocking\n2. serde.md (Serde Guide)"
        );
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_citations(&[]), "");
    }
}
