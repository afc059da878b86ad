//! Grammar plumbing for structural parsing

use crate::error::StructureError;
use crate::types::ConstructKind;
use std::fmt;
use std::path::Path;
use tree_sitter::{Language, Parser, Tree};

/// A tree-sitter grammar plus the node kinds that denote each construct
#[derive(Clone)]
pub struct SourceLanguage {
    name: &'static str,
    language: Language,
    extensions: &'static [&'static str],
    function_kinds: &'static [&'static str],
    class_kinds: &'static [&'static str],
    /// Wrapper nodes (decorators) that belong to the construct they wrap
    wrapper_kinds: &'static [&'static str],
}

impl SourceLanguage {
    pub fn python() -> Self {
        Self {
            name: "Python",
            language: tree_sitter_python::LANGUAGE.into(),
            extensions: &["py", "pyi"],
            function_kinds: &["function_definition"],
            class_kinds: &["class_definition"],
            wrapper_kinds: &["decorated_definition"],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Node kinds that represent `kind`; empty for module-level lookups
    pub fn node_kinds(&self, kind: ConstructKind) -> &'static [&'static str] {
        match kind {
            ConstructKind::Module => &[],
            ConstructKind::Function => self.function_kinds,
            ConstructKind::Class => self.class_kinds,
        }
    }

    /// Construct kind a syntax node denotes, if any
    pub fn construct_kind_of(&self, node_kind: &str) -> Option<ConstructKind> {
        if self.function_kinds.contains(&node_kind) {
            Some(ConstructKind::Function)
        } else if self.class_kinds.contains(&node_kind) {
            Some(ConstructKind::Class)
        } else {
            None
        }
    }

    pub fn is_wrapper(&self, node_kind: &str) -> bool {
        self.wrapper_kinds.contains(&node_kind)
    }

    pub fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    pub fn parser(&self) -> Result<Parser, StructureError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| StructureError::LanguageInit(format!("{}: {}", self.name, e)))?;
        Ok(parser)
    }

    pub fn parse(&self, source: &str) -> Result<Tree, StructureError> {
        self.parser()?
            .parse(source, None)
            .ok_or_else(|| StructureError::ParseFailed(format!("{} parser returned no tree", self.name)))
    }
}

impl fmt::Debug for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLanguage")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl Default for SourceLanguage {
    fn default() -> Self {
        Self::python()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_handles_py_files() {
        let lang = SourceLanguage::python();
        assert!(lang.handles(Path::new("pkg/mod.py")));
        assert!(lang.handles(Path::new("stubs/mod.PYI")));
        assert!(!lang.handles(Path::new("README.md")));
        assert!(!lang.handles(Path::new("Makefile")));
    }

    #[test]
    fn test_node_kinds() {
        let lang = SourceLanguage::python();
        assert_eq!(lang.node_kinds(ConstructKind::Function), &["function_definition"]);
        assert_eq!(lang.node_kinds(ConstructKind::Class), &["class_definition"]);
        assert!(lang.node_kinds(ConstructKind::Module).is_empty());
        assert_eq!(
            lang.construct_kind_of("class_definition"),
            Some(ConstructKind::Class)
        );
        assert_eq!(lang.construct_kind_of("module"), None);
    }

    #[test]
    fn test_parse_produces_module_root() {
        let lang = SourceLanguage::python();
        let tree = lang.parse("def f():\n    return 1\n").unwrap();
        assert_eq!(tree.root_node().kind(), "module");
    }
}
