use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

const ADDED: &str = "+ ";
const REMOVED: &str = "- ";
const UNCHANGED: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    Added,
    Removed,
    Unchanged,
}

/// One classified line of a rendered diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub text: String,
}

/// Line-granular diff rendering.
///
/// Output lines are prefixed with `"+ "`, `"- "` or `"  "` and always end in
/// a newline. Lines that are blank after trimming are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffRenderer;

impl DiffRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, before: &str, after: &str) -> String {
        let diff = TextDiff::from_lines(before, after);
        let mut out = String::new();

        for change in diff.iter_all_changes() {
            let text = change
                .value()
                .trim_end_matches('\n')
                .trim_end_matches('\r');
            if text.trim().is_empty() {
                continue;
            }

            out.push_str(match change.tag() {
                ChangeTag::Insert => ADDED,
                ChangeTag::Delete => REMOVED,
                ChangeTag::Equal => UNCHANGED,
            });
            out.push_str(text);
            out.push('\n');
        }

        out
    }

    /// Split rendered output back into classified lines
    pub fn parse(&self, rendered: &str) -> Vec<DiffLine> {
        rendered
            .lines()
            .filter_map(|line| {
                let (kind, text) = if let Some(text) = line.strip_prefix(ADDED) {
                    (DiffLineKind::Added, text)
                } else if let Some(text) = line.strip_prefix(REMOVED) {
                    (DiffLineKind::Removed, text)
                } else if let Some(text) = line.strip_prefix(UNCHANGED) {
                    (DiffLineKind::Unchanged, text)
                } else {
                    return None;
                };
                Some(DiffLine {
                    kind,
                    text: text.to_string(),
                })
            })
            .collect()
    }
}
