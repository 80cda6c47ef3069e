//! A lexer/parser for the directed-graph subset used to author pipelines:
//! `digraph` bodies with typed attribute values, chained edges, node/edge
//! default blocks, and subgraph-derived classes.

use indexmap::IndexMap;
use winnow::ascii::{multispace0, multispace1};
use winnow::combinator::{alt, delimited, opt, peek, repeat, separated};
use winnow::token::{any, take_while};
use winnow::{ModalResult, Parser};

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{shape_to_handler_type, AttrMap, AttrValue, Edge, Graph, Node};
use crate::types::HandlerType;

/// Parse a `digraph { ... }` body into a [`Graph`].
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if the input is not valid, or uses
/// unsupported features (undirected graphs, the `strict` modifier, more
/// than one graph per input).
pub fn parse_dot(input: &str) -> PipelineResult<Graph> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(parse_err(1, "empty input"));
    }
    if trimmed.starts_with("strict") {
        return Err(parse_err(1, "strict modifier not supported"));
    }
    if trimmed == "graph" || trimmed.starts_with("graph ") || trimmed.starts_with("graph\t") {
        return Err(parse_err(1, "only directed graphs (digraph) are supported"));
    }

    let cleaned = strip_comments(input)?;
    let mut remaining = cleaned.as_str();

    let stmts = parse_graph.parse_next(&mut remaining).map_err(|e| parse_err(1, format!("parse error: {e}")))?;

    let trailing = remaining.trim();
    if !trailing.is_empty() {
        return Err(parse_err(1, "only one graph per input"));
    }

    build_graph(&stmts)
}

fn parse_err(line: usize, message: impl Into<String>) -> PipelineError {
    PipelineError::Parse { line, message: message.into() }
}

// ---------------------------------------------------------------------------
// Comment stripping
// ---------------------------------------------------------------------------

/// Strip `//` line comments and `/* */` block comments, preserving the
/// content of quoted strings verbatim.
fn strip_comments(input: &str) -> PipelineResult<String> {
    let mut result = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        if chars[i] == '"' {
            result.push('"');
            i += 1;
            while i < len {
                if chars[i] == '\\' && i + 1 < len {
                    result.push(chars[i]);
                    result.push(chars[i + 1]);
                    i += 2;
                } else if chars[i] == '"' {
                    result.push('"');
                    i += 1;
                    break;
                } else {
                    result.push(chars[i]);
                    i += 1;
                }
            }
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            i += 2;
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            let mut depth = 1;
            while i < len && depth > 0 {
                if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
                    depth += 1;
                    i += 2;
                } else if i + 1 < len && chars[i] == '*' && chars[i + 1] == '/' {
                    depth -= 1;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            if depth > 0 {
                return Err(parse_err(1, "unterminated block comment"));
            }
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// AST (pass 1 output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Statement {
    GraphAttr(AttrMap),
    GraphAttrDecl(String, AttrValue),
    NodeDefaults(AttrMap),
    EdgeDefaults(AttrMap),
    Node { id: String, attrs: AttrMap },
    Edge { chain: Vec<String>, attrs: AttrMap },
    Subgraph { stmts: Vec<Statement> },
}

// ---------------------------------------------------------------------------
// Pass 1: winnow parsers — text -> Vec<Statement>
// ---------------------------------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

fn opt_semi(input: &mut &str) -> ModalResult<()> {
    (ws, opt(';'), ws).void().parse_next(input)
}

const DOT_KEYWORDS: &[&str] = &["graph", "node", "edge", "subgraph", "digraph", "strict"];

fn bare_identifier<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn identifier<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    let checkpoint = *input;
    let id = bare_identifier.parse_next(input)?;
    if DOT_KEYWORDS.contains(&id) {
        *input = checkpoint;
        return Err(winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new()));
    }
    Ok(id)
}

fn node_id(input: &mut &str) -> ModalResult<String> {
    identifier.map(String::from).parse_next(input)
}

fn qualified_id<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (bare_identifier, repeat(1.., ('.', bare_identifier)).fold(|| (), |(), _| ())).take().parse_next(input)
}

fn attr_key<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    alt((qualified_id, bare_identifier)).parse_next(input)
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

fn quoted_string_value(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut result = String::new();
    loop {
        let chunk: &str = take_while(0.., |c: char| c != '"' && c != '\\').parse_next(input)?;
        result.push_str(chunk);
        let next = peek(any).parse_next(input)?;
        if next == '"' {
            let _ = any.parse_next(input)?;
            return Ok(result);
        }
        let _ = any.parse_next(input)?;
        let escaped = any.parse_next(input)?;
        match escaped {
            'n' => result.push('\n'),
            't' => result.push('\t'),
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            _ => return Err(winnow::error::ErrMode::Cut(winnow::error::ContextError::new())),
        }
    }
}

fn at_word_boundary(input: &mut &str) -> bool {
    let peeked: ModalResult<char> = peek(any).parse_next(input);
    !matches!(peeked, Ok(c) if c.is_ascii_alphanumeric() || c == '_')
}

fn boolean_value(input: &mut &str) -> ModalResult<AttrValue> {
    let checkpoint = *input;
    let val = alt(("true".map(|_| true), "false".map(|_| false))).parse_next(input)?;
    if !at_word_boundary(input) {
        *input = checkpoint;
        return Err(winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new()));
    }
    Ok(AttrValue::Bool(val))
}

/// A duration literal (`<int>(ms|s|m|h|d)`) stored as its original text so
/// handler code can re-parse it with [`crate::types::Duration::parse`].
fn duration_value(input: &mut &str) -> ModalResult<AttrValue> {
    let checkpoint = *input;
    let digits: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let unit: &str = alt(("ms", "s", "m", "h", "d")).parse_next(input)?;
    if !at_word_boundary(input) {
        *input = checkpoint;
        return Err(winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new()));
    }
    Ok(AttrValue::String(format!("{digits}{unit}")))
}

fn float_value(input: &mut &str) -> ModalResult<AttrValue> {
    let checkpoint = *input;
    let neg: Option<&str> = opt("-").parse_next(input)?;
    let int_part: &str = take_while(0.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let frac_part: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let mut s = String::new();
    if neg.is_some() {
        s.push('-');
    }
    s.push_str(int_part);
    s.push('.');
    s.push_str(frac_part);
    let n: f64 = s.parse().map_err(|_| {
        *input = checkpoint;
        winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new())
    })?;
    Ok(AttrValue::Number(n))
}

fn integer_value(input: &mut &str) -> ModalResult<AttrValue> {
    let checkpoint = *input;
    let neg: Option<&str> = opt("-").parse_next(input)?;
    let digits: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    if peek(opt('.')).parse_next(input)?.is_some() {
        *input = checkpoint;
        return Err(winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new()));
    }
    let mut s = String::new();
    if neg.is_some() {
        s.push('-');
    }
    s.push_str(digits);
    let n: f64 = s.parse().map_err(|_| {
        *input = checkpoint;
        winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new())
    })?;
    Ok(AttrValue::Number(n))
}

fn bare_identifier_value(input: &mut &str) -> ModalResult<AttrValue> {
    bare_identifier.map(|s: &str| AttrValue::String(s.to_string())).parse_next(input)
}

/// Order matters: boolean before bare-identifier, duration before plain
/// integer, float before integer, quoted string first of all.
fn attr_value(input: &mut &str) -> ModalResult<AttrValue> {
    alt((quoted_string_value.map(AttrValue::String), boolean_value, duration_value, float_value, integer_value, bare_identifier_value))
        .parse_next(input)
}

// ---------------------------------------------------------------------------
// Attribute blocks
// ---------------------------------------------------------------------------

fn attr_pair(input: &mut &str) -> ModalResult<(String, AttrValue)> {
    let key = attr_key.parse_next(input)?;
    ws.parse_next(input)?;
    '='.parse_next(input)?;
    ws.parse_next(input)?;
    let value = attr_value.parse_next(input)?;
    Ok((key.to_string(), value))
}

fn attr_sep(input: &mut &str) -> ModalResult<()> {
    (ws, ',', ws).void().parse_next(input)
}

fn attr_block(input: &mut &str) -> ModalResult<AttrMap> {
    delimited(
        ('[', ws),
        opt(separated(1.., attr_pair, attr_sep)).map(|pairs: Option<Vec<(String, AttrValue)>>| pairs.unwrap_or_default().into_iter().collect::<AttrMap>()),
        (ws, ']'),
    )
    .parse_next(input)
}

// ---------------------------------------------------------------------------
// Statement parsers
// ---------------------------------------------------------------------------

fn keyword_attr_block(mut keyword: &'static str, input: &mut &str) -> ModalResult<AttrMap> {
    keyword.parse_next(input)?;
    ws.parse_next(input)?;
    let attrs = attr_block.parse_next(input)?;
    opt_semi.parse_next(input)?;
    Ok(attrs)
}

fn graph_attr_stmt(input: &mut &str) -> ModalResult<Statement> {
    keyword_attr_block("graph", input).map(Statement::GraphAttr)
}

fn node_defaults_stmt(input: &mut &str) -> ModalResult<Statement> {
    keyword_attr_block("node", input).map(Statement::NodeDefaults)
}

fn edge_defaults_stmt(input: &mut &str) -> ModalResult<Statement> {
    keyword_attr_block("edge", input).map(Statement::EdgeDefaults)
}

fn graph_attr_decl(input: &mut &str) -> ModalResult<Statement> {
    let (key, value) = attr_pair.parse_next(input)?;
    opt_semi.parse_next(input)?;
    Ok(Statement::GraphAttrDecl(key, value))
}

fn parse_optional_attrs(input: &mut &str) -> ModalResult<AttrMap> {
    opt(attr_block).map(Option::unwrap_or_default).parse_next(input)
}

fn edge_stmt(input: &mut &str) -> ModalResult<Statement> {
    let first = node_id.parse_next(input)?;
    ws.parse_next(input)?;

    let checkpoint = *input;
    let undirected: ModalResult<&str> = "--".parse_next(input);
    if undirected.is_ok() {
        return Err(winnow::error::ErrMode::Cut(winnow::error::ContextError::new()));
    }
    *input = checkpoint;

    "->".parse_next(input)?;
    ws.parse_next(input)?;
    let second = node_id.parse_next(input)?;
    ws.parse_next(input)?;

    let mut chain = vec![first, second];
    loop {
        let checkpoint = *input;
        let arrow: ModalResult<&str> = "->".parse_next(input);
        if arrow.is_ok() {
            ws.parse_next(input)?;
            let next = node_id.parse_next(input)?;
            ws.parse_next(input)?;
            chain.push(next);
        } else {
            *input = checkpoint;
            break;
        }
    }

    let attrs = parse_optional_attrs(input)?;
    opt_semi.parse_next(input)?;
    Ok(Statement::Edge { chain, attrs })
}

fn node_stmt(input: &mut &str) -> ModalResult<Statement> {
    let id = node_id.parse_next(input)?;
    ws.parse_next(input)?;
    let attrs = parse_optional_attrs(input)?;
    opt_semi.parse_next(input)?;
    Ok(Statement::Node { id, attrs })
}

fn subgraph_stmt(input: &mut &str) -> ModalResult<Statement> {
    let _ = "subgraph".parse_next(input)?;
    ws.parse_next(input)?;
    let _name = opt(bare_identifier.map(String::from)).parse_next(input)?;
    ws.parse_next(input)?;
    let stmts = delimited(
        ('{', ws),
        repeat(0.., statement).fold(Vec::new, |mut acc, s| {
            acc.push(s);
            acc
        }),
        (ws, '}'),
    )
    .parse_next(input)?;
    opt_semi.parse_next(input)?;
    Ok(Statement::Subgraph { stmts })
}

/// Order matters: keyword-prefixed statements are tried before node/edge so
/// `graph [...]` never gets read as a node literally named `graph`.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    ws.parse_next(input)?;
    alt((graph_attr_stmt, node_defaults_stmt, edge_defaults_stmt, subgraph_stmt, edge_stmt, graph_attr_decl, node_stmt)).parse_next(input)
}

fn parse_graph(input: &mut &str) -> ModalResult<Vec<Statement>> {
    ws.parse_next(input)?;
    "digraph".parse_next(input)?;
    multispace1.parse_next(input)?;
    let _name = bare_identifier.parse_next(input)?;
    ws.parse_next(input)?;
    let stmts = delimited(
        ('{', ws),
        repeat(0.., statement).fold(Vec::new, |mut acc, s| {
            acc.push(s);
            acc
        }),
        (ws, '}'),
    )
    .parse_next(input)?;
    ws.parse_next(input)?;
    Ok(stmts)
}

// ---------------------------------------------------------------------------
// Pass 2: build the graph from the statement AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Scope {
    node_defaults: AttrMap,
    edge_defaults: AttrMap,
}

fn build_graph(stmts: &[Statement]) -> PipelineResult<Graph> {
    let mut raw_nodes: IndexMap<String, AttrMap> = IndexMap::new();
    let mut raw_edges: Vec<(String, String, AttrMap)> = Vec::new();
    let mut graph_attrs = AttrMap::new();
    let mut scope = Scope::default();

    process_statements(stmts, &mut raw_nodes, &mut raw_edges, &mut graph_attrs, &mut scope, None, 0);

    let mut graph = Graph::new();
    graph.attrs = graph_attrs;

    for (id, attrs) in raw_nodes {
        let handler_type = resolve_handler_type(&attrs)?;
        graph.add_node(Node { id, handler_type, attrs });
    }
    for (from, to, attrs) in raw_edges {
        let label = attrs.get("label").map(AttrValue::as_str);
        graph.add_edge(Edge { from, to, label, attrs });
    }

    Ok(graph)
}

/// Resolve a node's handler from its attributes: explicit `type` wins, then
/// `shape`, then `codergen` as the default.
fn resolve_handler_type(attrs: &AttrMap) -> PipelineResult<HandlerType> {
    if let Some(explicit) = attrs.get("type").map(AttrValue::as_str) {
        return explicit.parse::<HandlerType>().map_err(|message| PipelineError::Structural { message });
    }
    if let Some(shape) = attrs.get("shape").map(AttrValue::as_str) {
        return shape_to_handler_type(&shape);
    }
    Ok(HandlerType::Codergen)
}

#[allow(clippy::too_many_arguments)]
fn process_statements(
    stmts: &[Statement],
    raw_nodes: &mut IndexMap<String, AttrMap>,
    raw_edges: &mut Vec<(String, String, AttrMap)>,
    graph_attrs: &mut AttrMap,
    scope: &mut Scope,
    subgraph_class: Option<&str>,
    depth: usize,
) {
    for stmt in stmts {
        match stmt {
            Statement::GraphAttr(attrs) => {
                if depth == 0 {
                    extend_attrs(graph_attrs, attrs);
                }
            }
            Statement::GraphAttrDecl(key, value) => {
                if depth == 0 {
                    graph_attrs.insert(key.clone(), value.clone());
                }
            }
            Statement::NodeDefaults(attrs) => extend_attrs(&mut scope.node_defaults, attrs),
            Statement::EdgeDefaults(attrs) => extend_attrs(&mut scope.edge_defaults, attrs),
            Statement::Node { id, attrs } => {
                insert_or_merge_node(raw_nodes, id, attrs, &scope.node_defaults, subgraph_class);
            }
            Statement::Edge { chain, attrs } => {
                for pair in chain.windows(2) {
                    let from = &pair[0];
                    let to = &pair[1];
                    ensure_node_exists(raw_nodes, from, &scope.node_defaults, subgraph_class);
                    ensure_node_exists(raw_nodes, to, &scope.node_defaults, subgraph_class);
                    let merged = merge_attrs(&scope.edge_defaults, attrs);
                    raw_edges.push((from.clone(), to.clone(), merged));
                }
            }
            Statement::Subgraph { stmts } => {
                let child_class = derive_subgraph_class(stmts);
                let effective_class = child_class.as_deref().or(subgraph_class);
                let mut child_scope = scope.clone();
                process_statements(stmts, raw_nodes, raw_edges, graph_attrs, &mut child_scope, effective_class, depth + 1);
            }
        }
    }
}

fn extend_attrs(target: &mut AttrMap, source: &AttrMap) {
    for (k, v) in source {
        target.insert(k.clone(), v.clone());
    }
}

fn merge_attrs(base: &AttrMap, overrides: &AttrMap) -> AttrMap {
    let mut merged = base.clone();
    extend_attrs(&mut merged, overrides);
    merged
}

/// When the node already exists, only the *explicit* attrs from this
/// declaration are applied — defaults never overwrite a prior declaration's
/// explicit attrs. Subgraph class is always appended regardless.
fn insert_or_merge_node(raw_nodes: &mut IndexMap<String, AttrMap>, id: &str, explicit_attrs: &AttrMap, node_defaults: &AttrMap, subgraph_class: Option<&str>) {
    if let Some(existing) = raw_nodes.get_mut(id) {
        extend_attrs(existing, explicit_attrs);
        if let Some(class) = subgraph_class {
            append_class(existing, class);
        }
    } else {
        let mut merged = merge_attrs(node_defaults, explicit_attrs);
        if let Some(class) = subgraph_class {
            append_class(&mut merged, class);
        }
        raw_nodes.insert(id.to_string(), merged);
    }
}

fn append_class(attrs: &mut AttrMap, class: &str) {
    let existing = attrs.get("class").map(AttrValue::as_str).unwrap_or_default();
    let new_class = if existing.is_empty() { class.to_string() } else { format!("{existing},{class}") };
    attrs.insert("class".to_string(), AttrValue::String(new_class));
}

fn ensure_node_exists(raw_nodes: &mut IndexMap<String, AttrMap>, id: &str, node_defaults: &AttrMap, subgraph_class: Option<&str>) {
    if !raw_nodes.contains_key(id) {
        insert_or_merge_node(raw_nodes, id, &AttrMap::new(), node_defaults, subgraph_class);
    }
}

/// Derive a CSS-like class name from a subgraph's `label`. Only labels
/// derive classes — subgraph names do not. Last assignment wins.
fn derive_subgraph_class(stmts: &[Statement]) -> Option<String> {
    let label = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::GraphAttr(attrs) => attrs.get("label").map(AttrValue::as_str),
            Statement::GraphAttrDecl(key, value) if key == "label" => Some(value.as_str()),
            _ => None,
        })
        .next_back()?;

    if label.is_empty() {
        return None;
    }
    let class: String = label.to_lowercase().chars().map(|c| if c == ' ' { '-' } else { c }).filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
    if class.is_empty() {
        None
    } else {
        Some(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_pipeline() {
        let graph = parse_dot(
            r#"digraph pipeline {
                s [shape=Mdiamond];
                e [shape=Msquare];
                s -> e;
            }"#,
        )
        .unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.node("s").unwrap().handler_type, HandlerType::Start);
        assert_eq!(graph.node("e").unwrap().handler_type, HandlerType::Exit);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn explicit_type_attribute_wins_over_shape() {
        let graph = parse_dot(r#"digraph p { a [shape=box, type=tool]; }"#).unwrap();
        assert_eq!(graph.node("a").unwrap().handler_type, HandlerType::Tool);
    }

    #[test]
    fn defaults_to_codergen_with_no_shape_or_type() {
        let graph = parse_dot(r#"digraph p { a; }"#).unwrap();
        assert_eq!(graph.node("a").unwrap().handler_type, HandlerType::Codergen);
    }

    #[test]
    fn chained_edges_expand_to_pairs() {
        let graph = parse_dot(r#"digraph p { a -> b -> c; }"#).unwrap();
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].from, "a");
        assert_eq!(graph.edges[1].to, "c");
    }

    #[test]
    fn node_defaults_apply_but_do_not_override_explicit_redeclaration() {
        let graph = parse_dot(
            r#"digraph p {
                node [fidelity=full];
                a [fidelity=compact];
                a;
            }"#,
        )
        .unwrap();
        assert_eq!(graph.node("a").unwrap().get_str("fidelity").unwrap(), "compact");
    }

    #[test]
    fn parses_quoted_strings_with_escapes() {
        let graph = parse_dot(r#"digraph p { a [label="line\nbreak"]; }"#).unwrap();
        assert_eq!(graph.node("a").unwrap().get_str("label").unwrap(), "line\nbreak");
    }

    #[test]
    fn parses_duration_and_numeric_literals() {
        let graph = parse_dot(r#"digraph p { a [timeout=5s, weight=3, ratio=0.5]; }"#).unwrap();
        let node = graph.node("a").unwrap();
        assert_eq!(node.get_str("timeout").unwrap(), "5s");
        assert_eq!(node.get("weight").unwrap().as_f64(), Some(3.0));
        assert_eq!(node.get("ratio").unwrap().as_f64(), Some(0.5));
    }

    #[test]
    fn rejects_undirected_edges() {
        assert!(parse_dot("digraph p { a -- b; }").is_err());
    }

    #[test]
    fn rejects_strict_modifier() {
        assert!(parse_dot("strict digraph p { a -> b; }").is_err());
    }

    #[test]
    fn strips_line_and_block_comments() {
        let graph = parse_dot(
            "digraph p {\n  // a comment\n  a -> b; /* trailing */\n}",
        )
        .unwrap();
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn subgraph_label_becomes_a_class_on_its_nodes() {
        let graph = parse_dot(
            r#"digraph p {
                subgraph cluster_0 {
                    graph [label="Review Stage"];
                    a;
                }
            }"#,
        )
        .unwrap();
        assert_eq!(graph.node("a").unwrap().get_str("class").unwrap(), "review-stage");
    }
}
