use super::language::SourceLanguage;
use super::locator::declared_name;
use crate::error::StructureError;
use crate::types::ConstructKind;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// One structural chunk of a source file, as stored in parsed artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedChunk {
    /// Repository-relative path of the originating file
    pub file_path: String,
    pub kind: ConstructKind,
    /// Declared name; the file path for module chunks
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub code: String,
}

/// Splits source files into top-level structural chunks
#[derive(Debug, Clone, Default)]
pub struct StructuralChunker {
    language: SourceLanguage,
}

impl StructuralChunker {
    pub fn new(language: SourceLanguage) -> Self {
        Self { language }
    }

    pub fn language(&self) -> &SourceLanguage {
        &self.language
    }

    /// One chunk per top-level function or class (decorators included),
    /// plus one module chunk for each run of top-level statements between
    /// them. A file with no definitions becomes a single module chunk; an
    /// empty file yields nothing.
    pub fn chunk(&self, file_path: &str, source: &str) -> Result<Vec<ParsedChunk>, StructureError> {
        if source.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tree = self.language.parse(source)?;
        let root = tree.root_node();
        let mut chunks = Vec::new();
        let mut statements: Option<(Node, Node)> = None;

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match self.definition(child, source) {
                Some((kind, name)) => {
                    if let Some((first, last)) = statements.take() {
                        chunks.push(module_chunk(file_path, source, first, last));
                    }
                    chunks.push(ParsedChunk {
                        file_path: file_path.to_string(),
                        kind,
                        name: name.to_string(),
                        start_line: child.start_position().row + 1,
                        end_line: child.end_position().row + 1,
                        code: source[child.byte_range()].to_string(),
                    });
                }
                None => {
                    statements = Some(match statements {
                        Some((first, _)) => (first, child),
                        None => (child, child),
                    });
                }
            }
        }

        if chunks.is_empty() {
            return Ok(vec![ParsedChunk {
                file_path: file_path.to_string(),
                kind: ConstructKind::Module,
                name: file_path.to_string(),
                start_line: 1,
                end_line: source.lines().count().max(1),
                code: source.to_string(),
            }]);
        }
        if let Some((first, last)) = statements {
            chunks.push(module_chunk(file_path, source, first, last));
        }

        Ok(chunks)
    }

    /// Kind and name of a top-level definition, looking through decorators
    fn definition<'s>(&self, node: Node, source: &'s str) -> Option<(ConstructKind, &'s str)> {
        let definition = if self.language.is_wrapper(node.kind()) {
            node.child_by_field_name("definition")?
        } else {
            node
        };
        let kind = self.language.construct_kind_of(definition.kind())?;
        Some((kind, declared_name(definition, source)?))
    }
}

/// Module chunk spanning the top-level statements `first..=last`
fn module_chunk(file_path: &str, source: &str, first: Node, last: Node) -> ParsedChunk {
    ParsedChunk {
        file_path: file_path.to_string(),
        kind: ConstructKind::Module,
        name: file_path.to_string(),
        start_line: first.start_position().row + 1,
        end_line: last.end_position().row + 1,
        code: source[first.start_byte()..last.end_byte()].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_definitions_become_chunks() {
        let source = "import os\n\ndef a():\n    pass\n\n@wrap\nclass B:\n    def m(self):\n        pass\n";
        let chunks = StructuralChunker::default().chunk("pkg/x.py", source).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ConstructKind::Module);
        assert_eq!(chunks[0].code, "import os");

        assert_eq!(chunks[1].kind, ConstructKind::Function);
        assert_eq!(chunks[1].name, "a");
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (3, 4));
        assert_eq!(chunks[1].code, "def a():\n    pass");

        assert_eq!(chunks[2].kind, ConstructKind::Class);
        assert_eq!(chunks[2].name, "B");
        assert!(chunks[2].code.starts_with("@wrap\nclass B:"));
        assert_eq!(chunks[2].start_line, 6);
        assert!(chunks.iter().all(|c| c.file_path == "pkg/x.py"));
    }

    #[test]
    fn test_script_without_definitions_is_one_module_chunk() {
        let source = "print('hi')\nx = 1\n";
        let chunks = StructuralChunker::default().chunk("run.py", source).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ConstructKind::Module);
        assert_eq!(chunks[0].name, "run.py");
        assert_eq!(chunks[0].code, source);
        assert_eq!(chunks[0].end_line, 2);
    }

    #[test]
    fn test_statements_between_definitions_become_module_chunks() {
        let source = "import os\nSETTINGS = {'debug': True}\n\ndef f():\n    return SETTINGS\n\nif __name__ == '__main__':\n    f()\n";
        let chunks = StructuralChunker::default().chunk("app.py", source).unwrap();

        let summary: Vec<(ConstructKind, usize, usize)> = chunks
            .iter()
            .map(|c| (c.kind, c.start_line, c.end_line))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ConstructKind::Module, 1, 2),
                (ConstructKind::Function, 4, 5),
                (ConstructKind::Module, 7, 8),
            ]
        );
        assert_eq!(chunks[0].code, "import os\nSETTINGS = {'debug': True}");
        assert_eq!(chunks[2].code, "if __name__ == '__main__':\n    f()");
        assert!(chunks.iter().any(|c| c.code.contains("SETTINGS = {")));
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        assert!(StructuralChunker::default().chunk("e.py", "\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_artifact_json_shape() {
        let chunks = StructuralChunker::default()
            .chunk("a.py", "def f():\n    return 1\n")
            .unwrap();
        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert_eq!(json["kind"], "function");
        assert_eq!(json["name"], "f");
        assert_eq!(json["file_path"], "a.py");
        assert_eq!(json["start_line"], 1);
    }
}
