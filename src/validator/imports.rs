// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Static scan of Python `from X import a, b` statements
//!
//! Sources are parsed with tree-sitter, so imports nested in functions,
//! `try` blocks or parentheses are found, while strings and comments that
//! merely mention an import are not.

use std::collections::BTreeSet;
use tracing::warn;
use tree_sitter::{Node, Parser, Tree};

/// One `from <module> import <names>` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFrom {
    /// Module path without leading dots (`from .backend` -> `backend`)
    pub module: String,
    /// Imported names, aliases resolved to the original name
    pub names: Vec<String>,
    /// `from x import *`
    pub wildcard: bool,
}

fn parse(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        warn!(error = %e, "Python grammar unavailable, import scan skipped");
        return None;
    }
    parser.parse(source, None)
}

/// All `from ... import ...` statements in a source file
pub fn scan_from_imports(source: &str) -> Vec<ImportFrom> {
    let Some(tree) = parse(source) else {
        return Vec::new();
    };

    let mut imports = Vec::new();
    collect(&tree.root_node(), source.as_bytes(), &mut imports);
    imports
}

/// Names a consumer imports from `module`; wildcard imports add nothing
pub fn required_symbols(source: &str, module: &str) -> BTreeSet<String> {
    scan_from_imports(source)
        .into_iter()
        .filter(|imp| imp.module == module)
        .flat_map(|imp| imp.names)
        .collect()
}

fn collect(node: &Node, source: &[u8], out: &mut Vec<ImportFrom>) {
    if node.kind() == "import_from_statement" {
        if let Some(import) = import_from(node, source) {
            out.push(import);
        }
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(&child, source, out);
    }
}

fn import_from(node: &Node, source: &[u8]) -> Option<ImportFrom> {
    let module = node
        .child_by_field_name("module_name")?
        .utf8_text(source)
        .ok()?
        .trim_start_matches('.')
        .to_string();

    let mut cursor = node.walk();
    let names = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(|name| {
            // `a as b` requires `a`
            let original = match name.kind() {
                "aliased_import" => name.child_by_field_name("name")?,
                _ => name,
            };
            original.utf8_text(source).ok().map(str::to_string)
        })
        .collect();

    let mut cursor = node.walk();
    let wildcard = node
        .children(&mut cursor)
        .any(|child| child.kind() == "wildcard_import");

    Some(ImportFrom {
        module,
        names,
        wildcard,
    })
}
