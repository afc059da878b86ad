use super::language::SourceLanguage;
use crate::error::StructureError;
use crate::types::{ConstructKind, ConstructQuery, LineRange};
use tree_sitter::Node;

/// Text extent of a located construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Finds the text of a named construct, or a line range, inside source text.
///
/// A miss is `Ok(None)`, the same shape as a file that does not exist at a
/// revision. Names are compared against the parsed `name` field of each
/// candidate node; nothing is spliced into query text.
#[derive(Debug, Clone, Default)]
pub struct StructuralLocator {
    language: SourceLanguage,
}

impl StructuralLocator {
    pub fn new(language: SourceLanguage) -> Self {
        Self { language }
    }

    pub fn language(&self) -> &SourceLanguage {
        &self.language
    }

    /// Text of the construct `query` describes, or `None` on a miss
    pub fn find_span(&self, source: &str, query: &ConstructQuery) -> Result<Option<String>, StructureError> {
        Ok(self.locate(source, query)?.map(|span| span.text))
    }

    /// Like [`find_span`](Self::find_span) but also reports line numbers
    pub fn locate(&self, source: &str, query: &ConstructQuery) -> Result<Option<Span>, StructureError> {
        query.validate()?;

        match query.kind {
            ConstructKind::Module => Ok(Some(match query.lines {
                Some(range) => match slice_lines(source, range) {
                    Some(span) => span,
                    None => return Ok(None),
                },
                None => {
                    let text = source.trim_end();
                    Span {
                        start_line: 1,
                        end_line: text.lines().count().max(1),
                        text: text.to_string(),
                    }
                }
            })),
            ConstructKind::Function | ConstructKind::Class => {
                let name = query.name.as_deref().unwrap_or_default();
                self.find_named(source, query.kind, name)
            }
        }
    }

    fn find_named(&self, source: &str, kind: ConstructKind, name: &str) -> Result<Option<Span>, StructureError> {
        let tree = self.language.parse(source)?;
        let wanted = self.language.node_kinds(kind);

        let Some(node) = first_match(tree.root_node(), |node| {
            wanted.contains(&node.kind()) && declared_name(node, source) == Some(name)
        }) else {
            tracing::trace!("No {} named '{}' in source", kind, name);
            return Ok(None);
        };

        Ok(Some(Span {
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            text: source[node.byte_range()].to_string(),
        }))
    }
}

/// Text of a node's `name` field
pub(crate) fn declared_name<'s>(node: Node, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name("name")
        .and_then(|n| source.get(n.byte_range()))
}

/// First node in source order satisfying `pred`
fn first_match<'t>(root: Node<'t>, pred: impl Fn(Node<'t>) -> bool) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if pred(node) {
            return Some(node);
        }
        if cursor.goto_first_child() || cursor.goto_next_sibling() {
            continue;
        }
        loop {
            if !cursor.goto_parent() {
                return None;
            }
            if cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

/// Lines `range.start..=range.end`, clamped to the end of the text, with
/// trailing whitespace removed. A range that starts past the last line
/// selects nothing.
fn slice_lines(source: &str, range: LineRange) -> Option<Span> {
    let lines: Vec<&str> = source.lines().collect();
    if range.start > lines.len() {
        return None;
    }
    let end = range.end.min(lines.len());
    let text = lines[range.start - 1..end].join("\n");
    Some(Span {
        start_line: range.start,
        end_line: end,
        text: text.trim_end().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"import os


@decorator
def foo(a, b):
    return a + b


class Greeter:
    def foo(self):
        return "method"

    def greet(self, name):
        return f"hi {name}"


async def fetch():
    await something()
"#;

    fn locator() -> StructuralLocator {
        StructuralLocator::default()
    }

    #[test]
    fn test_finds_function_with_signature() {
        let span = locator()
            .locate(SOURCE, &ConstructQuery::function("foo"))
            .unwrap()
            .unwrap();
        assert_eq!(span.text, "def foo(a, b):\n    return a + b");
        assert_eq!(span.start_line, 5);
        assert_eq!(span.end_line, 6);
    }

    #[test]
    fn test_first_match_in_source_order_wins() {
        // Module-level foo precedes Greeter.foo
        let text = locator()
            .find_span(SOURCE, &ConstructQuery::function("foo"))
            .unwrap()
            .unwrap();
        assert!(text.contains("a + b"));
    }

    #[test]
    fn test_finds_method_inside_class() {
        let text = locator()
            .find_span(SOURCE, &ConstructQuery::function("greet"))
            .unwrap()
            .unwrap();
        assert!(text.starts_with("def greet(self, name):"));
    }

    #[test]
    fn test_finds_async_function() {
        let text = locator()
            .find_span(SOURCE, &ConstructQuery::function("fetch"))
            .unwrap()
            .unwrap();
        assert!(text.starts_with("async def fetch():"));
    }

    #[test]
    fn test_finds_class() {
        let span = locator()
            .locate(SOURCE, &ConstructQuery::class("Greeter"))
            .unwrap()
            .unwrap();
        assert!(span.text.starts_with("class Greeter:"));
        assert!(span.text.ends_with("return f\"hi {name}\""));
        assert_eq!(span.start_line, 9);
    }

    #[test]
    fn test_kind_mismatch_is_miss() {
        assert_eq!(
            locator()
                .find_span(SOURCE, &ConstructQuery::class("foo"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_name_must_match_exactly() {
        assert_eq!(
            locator()
                .find_span(SOURCE, &ConstructQuery::function("fo"))
                .unwrap(),
            None
        );
        // Query-language metacharacters are just part of the name
        assert_eq!(
            locator()
                .find_span(SOURCE, &ConstructQuery::function("foo\") @x (#eq? @x \"foo"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_module_returns_whole_text() {
        let text = locator()
            .find_span(SOURCE, &ConstructQuery::module())
            .unwrap()
            .unwrap();
        assert_eq!(text, SOURCE.trim_end());
    }

    #[test]
    fn test_module_whole_text_and_range_trim_alike() {
        let source = "A = 1\nB = 2\n\n";
        let whole = locator()
            .locate(source, &ConstructQuery::module())
            .unwrap()
            .unwrap();
        let range = locator()
            .locate(source, &ConstructQuery::module_lines(LineRange::new(1, 3).unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(whole.text, "A = 1\nB = 2");
        assert_eq!(range.text, whole.text);
        assert_eq!(whole.end_line, 2);
    }

    #[test]
    fn test_module_line_range_is_inclusive() {
        let range = LineRange::new(5, 6).unwrap();
        let text = locator()
            .find_span(SOURCE, &ConstructQuery::module_lines(range))
            .unwrap()
            .unwrap();
        assert_eq!(text, "def foo(a, b):\n    return a + b");
    }

    #[test]
    fn test_module_line_range_clamps_past_eof() {
        let range = LineRange::new(2, 100).unwrap();
        let span = locator()
            .locate("a\nb\nc\n", &ConstructQuery::module_lines(range))
            .unwrap()
            .unwrap();
        assert_eq!(span.text, "b\nc");
        assert_eq!(span.end_line, 3);

        let beyond = LineRange::new(10, 12).unwrap();
        assert_eq!(
            locator()
                .find_span("a\nb\n", &ConstructQuery::module_lines(beyond))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_name_is_error() {
        let query = ConstructQuery {
            kind: ConstructKind::Function,
            name: None,
            lines: None,
        };
        assert!(matches!(
            locator().find_span(SOURCE, &query),
            Err(StructureError::MissingName(_))
        ));
    }

    #[test]
    fn test_unparseable_source_is_miss_not_error() {
        let text = "def broken(:\n    pass\n";
        let result = locator()
            .find_span(text, &ConstructQuery::function("other"))
            .unwrap();
        assert_eq!(result, None);
    }
}
