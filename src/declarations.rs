//! Top-level declaration extraction with tree-sitter.
//!
//! Each supported language gets a [`DeclarationExtractor`] that walks the
//! top of a syntax tree and returns uniform [`Declaration`] records:
//! class-like items with their methods nested as members, plus free
//! functions with parameter names. The structure mapper selects an
//! extractor by [`Language`] and never branches on language itself.
//!
//! | Language | Class-like | Function-like |
//! |----------|------------|---------------|
//! | Python | `class` | `def` |
//! | Rust | `struct`, `enum`, `trait` (methods from `impl` blocks) | `fn` |
//! | JavaScript / TypeScript | `class`, `interface`, `enum` | `function`, arrow functions bound with `const`/`let` |
//! | Go | `type` (methods by receiver) | `func` |
//!
//! A file whose syntax tree contains errors is reported as a parse
//! failure for that file only.

use tree_sitter::{Node, Parser, Tree};

use repolens_core::models::{Declaration, DeclarationKind, Language};

/// Extracts declarations from source text of one language.
pub trait DeclarationExtractor: Send + Sync {
    fn grammar(&self) -> tree_sitter::Language;

    /// Collect declarations from a parsed, error-free syntax tree.
    fn collect(&self, root: Node<'_>, src: &[u8]) -> Vec<Declaration>;

    /// Parse `source` and collect its declarations.
    ///
    /// `Err` carries a short description for the map's inline error marker.
    fn extract(&self, source: &str) -> Result<Vec<Declaration>, String> {
        let tree = parse(self.grammar(), source)?;
        Ok(self.collect(tree.root_node(), source.as_bytes()))
    }
}

/// The extractor for `language`, if declarations are supported for it.
pub fn extractor_for(language: Language) -> Option<Box<dyn DeclarationExtractor>> {
    match language {
        Language::Python => Some(Box::new(PythonExtractor)),
        Language::Rust => Some(Box::new(RustExtractor)),
        Language::JavaScript => Some(Box::new(ScriptExtractor { typescript: false })),
        Language::TypeScript => Some(Box::new(ScriptExtractor { typescript: true })),
        Language::Go => Some(Box::new(GoExtractor)),
        Language::Java | Language::Cpp => None,
    }
}

fn parse(grammar: tree_sitter::Language, source: &str) -> Result<Tree, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| format!("failed to load grammar: {e}"))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| "parser produced no syntax tree".to_string())?;

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error(root).map(|n| n.start_position().row + 1).unwrap_or(1);
        return Err(format!("syntax error at line {}", line));
    }
    Ok(tree)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    children(node)
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn text<'a>(node: Node<'_>, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn field_text(node: Node<'_>, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, src).to_string())
        .filter(|s| !s.is_empty())
}

/// Strip generic arguments and pointer/reference sigils from a type name.
fn bare_type_name(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(['*', '&']).trim();
    let end = trimmed.find(['<', '[']).unwrap_or(trimmed.len());
    trimmed[..end].trim().to_string()
}

/// Attach `(type, method)` pairs to the class-like declaration of that
/// name, or append them as `Type.method` functions when the type is
/// declared elsewhere.
fn attach_methods(decls: &mut Vec<Declaration>, methods: Vec<(String, Declaration)>) {
    for (owner, mut method) in methods {
        match decls
            .iter_mut()
            .find(|d| d.kind == DeclarationKind::Class && d.name == owner)
        {
            Some(class) => class.members.push(method),
            None => {
                method.name = format!("{}.{}", owner, method.name);
                decls.push(method);
            }
        }
    }
}

pub struct PythonExtractor;

impl PythonExtractor {
    fn declaration(node: Node<'_>, src: &[u8]) -> Option<Declaration> {
        let node = Self::undecorated(node);
        match node.kind() {
            "class_definition" => {
                let mut class = Declaration::class("class", field_text(node, "name", src)?);
                if let Some(body) = node.child_by_field_name("body") {
                    class.members = named_children(body)
                        .into_iter()
                        .map(Self::undecorated)
                        .filter(|n| n.kind() == "function_definition")
                        .filter_map(|n| Self::function(n, src))
                        .collect();
                }
                Some(class)
            }
            "function_definition" => Self::function(node, src),
            _ => None,
        }
    }

    fn undecorated(node: Node<'_>) -> Node<'_> {
        if node.kind() == "decorated_definition" {
            node.child_by_field_name("definition").unwrap_or(node)
        } else {
            node
        }
    }

    fn function(node: Node<'_>, src: &[u8]) -> Option<Declaration> {
        let name = field_text(node, "name", src)?;
        let params = node
            .child_by_field_name("parameters")
            .map(|p| {
                named_children(p)
                    .into_iter()
                    .filter_map(|p| match p.kind() {
                        "identifier" => Some(text(p, src).to_string()),
                        "typed_parameter" => p
                            .named_child(0)
                            .filter(|n| n.kind() == "identifier")
                            .map(|n| text(n, src).to_string()),
                        "default_parameter" | "typed_default_parameter" => {
                            field_text(p, "name", src)
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Declaration::function("def", name, params))
    }
}

impl DeclarationExtractor for PythonExtractor {
    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn collect(&self, root: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        named_children(root)
            .into_iter()
            .filter_map(|n| Self::declaration(n, src))
            .collect()
    }
}

pub struct RustExtractor;

impl RustExtractor {
    fn function(node: Node<'_>, src: &[u8]) -> Option<Declaration> {
        let name = field_text(node, "name", src)?;
        let params = node
            .child_by_field_name("parameters")
            .map(|p| {
                named_children(p)
                    .into_iter()
                    .filter_map(|p| match p.kind() {
                        "self_parameter" => Some(text(p, src).to_string()),
                        "parameter" => field_text(p, "pattern", src),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Declaration::function("fn", name, params))
    }

    fn body_functions(node: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        node.child_by_field_name("body")
            .map(|body| {
                named_children(body)
                    .into_iter()
                    .filter(|n| matches!(n.kind(), "function_item" | "function_signature_item"))
                    .filter_map(|n| Self::function(n, src))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DeclarationExtractor for RustExtractor {
    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn collect(&self, root: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        let mut decls = Vec::new();
        let mut methods = Vec::new();

        for node in named_children(root) {
            match node.kind() {
                "function_item" => decls.extend(Self::function(node, src)),
                "struct_item" | "enum_item" | "union_item" => {
                    let keyword = node.kind().trim_end_matches("_item");
                    if let Some(name) = field_text(node, "name", src) {
                        decls.push(Declaration::class(keyword, name));
                    }
                }
                "trait_item" => {
                    if let Some(name) = field_text(node, "name", src) {
                        let mut class = Declaration::class("trait", name);
                        class.members = Self::body_functions(node, src);
                        decls.push(class);
                    }
                }
                "impl_item" => {
                    if let Some(ty) = field_text(node, "type", src) {
                        let owner = bare_type_name(&ty);
                        methods.extend(
                            Self::body_functions(node, src)
                                .into_iter()
                                .map(|m| (owner.clone(), m)),
                        );
                    }
                }
                _ => {}
            }
        }

        attach_methods(&mut decls, methods);
        decls
    }
}

/// JavaScript and TypeScript share most node kinds; TypeScript adds
/// interfaces, enums and typed parameters.
pub struct ScriptExtractor {
    pub typescript: bool,
}

impl ScriptExtractor {
    fn declarations(&self, node: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        match node.kind() {
            "export_statement" => node
                .child_by_field_name("declaration")
                .map(|d| self.declarations(d, src))
                .unwrap_or_default(),
            "function_declaration" | "generator_function_declaration" => {
                Self::function(node, src).into_iter().collect()
            }
            "class_declaration" | "abstract_class_declaration" => {
                Self::class(node, "class", src).into_iter().collect()
            }
            "interface_declaration" => Self::class(node, "interface", src).into_iter().collect(),
            "enum_declaration" => field_text(node, "name", src)
                .map(|name| Declaration::class("enum", name))
                .into_iter()
                .collect(),
            "lexical_declaration" | "variable_declaration" => named_children(node)
                .into_iter()
                .filter(|d| d.kind() == "variable_declarator")
                .filter_map(|d| {
                    let value = d.child_by_field_name("value")?;
                    if !matches!(
                        value.kind(),
                        "arrow_function" | "function_expression" | "function"
                    ) {
                        return None;
                    }
                    let name = field_text(d, "name", src)?;
                    Some(Declaration::function("function", name, Self::params(value, src)))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn function(node: Node<'_>, src: &[u8]) -> Option<Declaration> {
        let name = field_text(node, "name", src)?;
        Some(Declaration::function("function", name, Self::params(node, src)))
    }

    fn class(node: Node<'_>, keyword: &str, src: &[u8]) -> Option<Declaration> {
        let mut class = Declaration::class(keyword, field_text(node, "name", src)?);
        if let Some(body) = node.child_by_field_name("body") {
            class.members = named_children(body)
                .into_iter()
                .filter(|n| {
                    matches!(
                        n.kind(),
                        "method_definition" | "method_signature" | "abstract_method_signature"
                    )
                })
                .filter_map(|n| Self::function(n, src))
                .collect();
        }
        Some(class)
    }

    fn params(node: Node<'_>, src: &[u8]) -> Vec<String> {
        if let Some(single) = node.child_by_field_name("parameter") {
            return vec![text(single, src).to_string()];
        }
        let Some(list) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(list)
            .into_iter()
            .filter(|p| p.kind() != "comment")
            .filter_map(|p| {
                let name = match p.kind() {
                    "assignment_pattern" => p.child_by_field_name("left")?,
                    "required_parameter" | "optional_parameter" => {
                        p.child_by_field_name("pattern")?
                    }
                    _ => p,
                };
                Some(text(name, src).to_string())
            })
            .collect()
    }
}

impl DeclarationExtractor for ScriptExtractor {
    fn grammar(&self) -> tree_sitter::Language {
        if self.typescript {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        } else {
            tree_sitter_javascript::LANGUAGE.into()
        }
    }

    fn collect(&self, root: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        named_children(root)
            .into_iter()
            .flat_map(|n| self.declarations(n, src))
            .collect()
    }
}

pub struct GoExtractor;

impl GoExtractor {
    fn function(node: Node<'_>, src: &[u8]) -> Option<Declaration> {
        let name = field_text(node, "name", src)?;
        let mut params = Vec::new();
        if let Some(list) = node.child_by_field_name("parameters") {
            for decl in named_children(list) {
                let mut cursor = decl.walk();
                params.extend(
                    decl.children_by_field_name("name", &mut cursor)
                        .map(|n| text(n, src).to_string()),
                );
            }
        }
        Some(Declaration::function("func", name, params))
    }

    fn receiver_type(node: Node<'_>, src: &[u8]) -> Option<String> {
        let receiver = node.child_by_field_name("receiver")?;
        let param = named_children(receiver)
            .into_iter()
            .find(|n| n.kind() == "parameter_declaration")?;
        field_text(param, "type", src).map(|t| bare_type_name(&t))
    }
}

impl DeclarationExtractor for GoExtractor {
    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn collect(&self, root: Node<'_>, src: &[u8]) -> Vec<Declaration> {
        let mut decls = Vec::new();
        let mut methods = Vec::new();

        for node in named_children(root) {
            match node.kind() {
                "function_declaration" => decls.extend(Self::function(node, src)),
                "method_declaration" => {
                    if let (Some(owner), Some(method)) =
                        (Self::receiver_type(node, src), Self::function(node, src))
                    {
                        methods.push((owner, method));
                    }
                }
                "type_declaration" => {
                    for spec in named_children(node) {
                        if matches!(spec.kind(), "type_spec" | "type_alias") {
                            if let Some(name) = field_text(spec, "name", src) {
                                decls.push(Declaration::class("type", name));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        attach_methods(&mut decls, methods);
        decls
    }
}
