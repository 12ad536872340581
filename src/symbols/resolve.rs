use crate::error::EngineResult;
use crate::symbols::store::{IdentifierRow, SymbolDatabase, SymbolRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One resolved reference site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallNode {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_site: Option<Occurrence>,
    pub depth: usize,
    /// Set when children exist beyond `max_depth` but were not expanded.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    pub children: Vec<CallNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraph {
    pub root: CallNode,
    pub direction: TraceDirection,
    pub node_count: usize,
    pub truncated_depth: bool,
    pub truncated_nodes: bool,
    /// Candidates dropped once the node budget was exhausted.
    pub summarized_count: usize,
}

/// Small read-through cache of file lines for snippet extraction.
struct SnippetCache<'a> {
    root: &'a Path,
    files: HashMap<String, Option<Vec<String>>>,
}

impl<'a> SnippetCache<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            files: HashMap::new(),
        }
    }

    fn line(&mut self, file_path: &str, line: u32) -> Option<String> {
        let lines = self
            .files
            .entry(file_path.to_string())
            .or_insert_with(|| {
                std::fs::read_to_string(self.root.join(file_path))
                    .ok()
                    .map(|c| c.lines().map(|l| l.to_string()).collect())
            })
            .as_ref()?;
        lines.get(line.saturating_sub(1) as usize).map(|l| l.trim().to_string())
    }
}

/// Find references to a symbol by name.
///
/// Qualified occurrences (`Foo.Bar()`) are kept only when the qualifier
/// resolves to a known containing type of some definition of the name;
/// lowercase qualifiers are treated as instance receivers and kept, since
/// lexical extraction cannot type them.
pub fn find_references(
    db: &SymbolDatabase,
    workspace_root: &Path,
    symbol_name: &str,
    kind: Option<&str>,
    limit: usize,
) -> EngineResult<Vec<Occurrence>> {
    let defs = db.find_definitions(symbol_name)?;
    if let Some(kind) = kind {
        if !defs.is_empty() && !defs.iter().any(|d| d.kind == kind) {
            return Ok(Vec::new());
        }
    }
    let containing_types: HashSet<&str> = defs
        .iter()
        .filter_map(|d| d.containing_type.as_deref())
        .collect();

    let candidates = db.identifier_candidates(symbol_name, None, limit.saturating_mul(4))?;
    let mut snippets = SnippetCache::new(workspace_root);
    let mut out = Vec::new();
    for cand in candidates {
        if !qualifier_matches(&cand, &containing_types) {
            continue;
        }
        if is_definition_site(&cand, &defs) {
            continue;
        }
        out.push(Occurrence {
            snippet: snippets.line(&cand.file_path, cand.line),
            file_path: cand.file_path,
            line: cand.line,
            column: cand.col,
        });
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}

fn qualifier_matches(cand: &IdentifierRow, containing_types: &HashSet<&str>) -> bool {
    match cand.qualifier.as_deref() {
        None => true,
        Some(q) => {
            if containing_types.is_empty() {
                return true;
            }
            if containing_types.contains(q) {
                return true;
            }
            // Instance receiver: not lexically resolvable, keep.
            q.chars().next().is_some_and(|c| c.is_lowercase())
        }
    }
}

fn is_definition_site(cand: &IdentifierRow, defs: &[SymbolRecord]) -> bool {
    defs.iter()
        .any(|d| d.file_path == cand.file_path && d.start_line == cand.line && d.start_col == cand.col)
}

/// Recursively trace caller (`Up`) or callee (`Down`) edges from a root
/// symbol. Cycles are cut with a per-path visited set; `max_depth` bounds
/// recursion and `max_nodes` bounds the total tree size, with overflow
/// summarized instead of returned.
pub fn trace_call_path(
    db: &SymbolDatabase,
    workspace_root: &Path,
    root_symbol: &str,
    direction: TraceDirection,
    max_depth: usize,
    max_nodes: usize,
) -> EngineResult<CallGraph> {
    let mut tracer = Tracer {
        db,
        snippets: SnippetCache::new(workspace_root),
        direction,
        max_depth,
        max_nodes: max_nodes.max(1),
        nodes_used: 0,
        summarized: 0,
        truncated_depth: false,
        truncated_nodes: false,
    };

    let root_def = db.find_definitions(root_symbol)?.into_iter().next();
    let mut visited = HashSet::new();
    visited.insert(root_symbol.to_string());
    tracer.nodes_used = 1;

    let mut root = CallNode {
        symbol: root_symbol.to_string(),
        file_path: root_def.as_ref().map(|d| d.file_path.clone()),
        line: root_def.as_ref().map(|d| d.start_line),
        call_site: None,
        depth: 0,
        truncated: false,
        children: Vec::new(),
    };
    tracer.expand(&mut root, &mut visited, 1)?;

    Ok(CallGraph {
        node_count: tracer.nodes_used,
        truncated_depth: tracer.truncated_depth,
        truncated_nodes: tracer.truncated_nodes,
        summarized_count: tracer.summarized,
        direction,
        root,
    })
}

struct Tracer<'a> {
    db: &'a SymbolDatabase,
    snippets: SnippetCache<'a>,
    direction: TraceDirection,
    max_depth: usize,
    max_nodes: usize,
    nodes_used: usize,
    summarized: usize,
    truncated_depth: bool,
    truncated_nodes: bool,
}

impl Tracer<'_> {
    fn expand(
        &mut self,
        node: &mut CallNode,
        visited: &mut HashSet<String>,
        depth: usize,
    ) -> EngineResult<()> {
        let edges = self.edges_from(&node.symbol)?;
        if edges.is_empty() {
            return Ok(());
        }
        if depth > self.max_depth {
            self.truncated_depth = true;
            node.truncated = true;
            self.summarized += edges.len();
            return Ok(());
        }

        for (next_symbol, site) in edges {
            if visited.contains(&next_symbol) {
                continue;
            }
            if self.nodes_used >= self.max_nodes {
                self.truncated_nodes = true;
                self.summarized += 1;
                continue;
            }
            visited.insert(next_symbol.clone());
            self.nodes_used += 1;

            let def = self.db.find_definitions(&next_symbol)?.into_iter().next();
            let snippet = self.snippets.line(&site.file_path, site.line);
            let mut child = CallNode {
                symbol: next_symbol,
                file_path: def.as_ref().map(|d| d.file_path.clone()),
                line: def.as_ref().map(|d| d.start_line),
                call_site: Some(Occurrence {
                    file_path: site.file_path.clone(),
                    line: site.line,
                    column: site.col,
                    snippet,
                }),
                depth,
                truncated: false,
                children: Vec::new(),
            };
            self.expand(&mut child, visited, depth + 1)?;
            node.children.push(child);
        }
        Ok(())
    }

    /// Outgoing edges for one symbol: callers for `Up`, callees for `Down`.
    /// Each edge is (neighbor symbol name, the call site that witnesses it).
    fn edges_from(&self, symbol: &str) -> EngineResult<Vec<(String, IdentifierRow)>> {
        let rows = match self.direction {
            TraceDirection::Up => self.db.calls_of(symbol, 500)?,
            TraceDirection::Down => self.db.calls_within(symbol, 500)?,
        };
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for row in rows {
            let neighbor = match self.direction {
                TraceDirection::Up => match row.containing_symbol.clone() {
                    Some(caller) => caller,
                    None => continue,
                },
                TraceDirection::Down => {
                    // Only keep callees that resolve to a known definition;
                    // library calls would otherwise flood the graph.
                    if self.db.find_definitions(&row.name)?.is_empty() {
                        continue;
                    }
                    row.name.clone()
                }
            };
            if neighbor == symbol || !seen.insert(neighbor.clone()) {
                continue;
            }
            edges.push((neighbor, row));
        }
        Ok(edges)
    }
}
