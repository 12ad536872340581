use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Upper bound on identifier occurrences recorded per file. Generated or
/// minified files would otherwise dominate the store.
const MAX_IDENTIFIERS_PER_FILE: usize = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: String,
    pub signature: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub modifiers: String,
    pub base_type: Option<String>,
    pub interfaces: Option<String>,
    pub containing_type: Option<String>,
    pub return_type: Option<String>,
    pub parameters: Option<String>,
}

/// One identifier occurrence, the raw material for reference resolution.
/// `qualifier` is the receiver token before a `.`/`::`/`->`; `is_call` marks
/// occurrences followed by `(`.
#[derive(Debug, Clone)]
pub struct IdentifierOccurrence {
    pub name: String,
    pub line: u32,
    pub col: u32,
    pub qualifier: Option<String>,
    pub is_call: bool,
    pub containing_symbol: Option<String>,
}

#[derive(Debug, Default)]
pub struct FileSymbols {
    pub symbols: Vec<ExtractedSymbol>,
    pub identifiers: Vec<IdentifierOccurrence>,
}

/// Compact per-file summary embedded into the inverted-index document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeInfo {
    pub types: Vec<TypeInfoEntry>,
    pub methods: Vec<TypeInfoEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeInfoEntry {
    pub name: String,
    pub kind: String,
    pub line: u32,
}

pub fn type_info_json(symbols: &[ExtractedSymbol]) -> String {
    let mut info = TypeInfo {
        types: Vec::new(),
        methods: Vec::new(),
    };
    for sym in symbols {
        let entry = TypeInfoEntry {
            name: sym.name.clone(),
            kind: sym.kind.clone(),
            line: sym.start_line,
        };
        if is_type_kind(&sym.kind) {
            info.types.push(entry);
        } else {
            info.methods.push(entry);
        }
    }
    serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
}

pub fn is_type_kind(kind: &str) -> bool {
    matches!(
        kind,
        "class" | "interface" | "struct" | "enum" | "trait" | "type" | "module" | "impl"
    )
}

struct Pattern {
    kind: &'static str,
    re: Regex,
    name_group: usize,
    params_group: Option<usize>,
    return_group: Option<usize>,
    base_group: Option<usize>,
}

impl Pattern {
    fn new(kind: &'static str, re: &str, name_group: usize) -> Self {
        Self {
            kind,
            re: Regex::new(re).expect("pattern regex"),
            name_group,
            params_group: None,
            return_group: None,
            base_group: None,
        }
    }

    fn params(mut self, g: usize) -> Self {
        self.params_group = Some(g);
        self
    }

    fn returns(mut self, g: usize) -> Self {
        self.return_group = Some(g);
        self
    }

    fn base(mut self, g: usize) -> Self {
        self.base_group = Some(g);
        self
    }
}

static RUST_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "function",
            r"(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)\s*(?:<[^>(]*>)?\s*\(([^)]*)\)(?:\s*->\s*([^{\n;]+))?",
            1,
        )
        .params(2)
        .returns(3),
        Pattern::new("struct", r"(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_]\w*)", 1),
        Pattern::new("enum", r"(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_]\w*)", 1),
        Pattern::new(
            "trait",
            r"(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_]\w*)(?:\s*:\s*([\w\s+:<>]+))?",
            1,
        )
        .base(2),
        Pattern::new("type", r"(?:pub(?:\([^)]*\))?\s+)?type\s+([A-Za-z_]\w*)", 1),
        Pattern::new("impl", r"impl(?:<[^>]*>)?\s+(?:[\w:]+\s+for\s+)?([A-Za-z_]\w*)", 1),
        Pattern::new("module", r"(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)", 1),
    ]
});

static TS_JS_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "function",
            r"(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$]\w*)\s*\(([^)]*)\)",
            1,
        )
        .params(2),
        Pattern::new(
            "class",
            r"(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$]\w*)(?:\s+extends\s+([\w.]+))?",
            1,
        )
        .base(2),
        Pattern::new("interface", r"(?:export\s+)?interface\s+([A-Za-z_$]\w*)(?:\s+extends\s+([\w.,\s]+))?", 1).base(2),
        Pattern::new("type", r"(?:export\s+)?type\s+([A-Za-z_$]\w*)\s*=", 1),
        Pattern::new("enum", r"(?:export\s+)?(?:const\s+)?enum\s+([A-Za-z_$]\w*)", 1),
        Pattern::new(
            "function",
            r"(?:export\s+)?const\s+([A-Za-z_$]\w*)\s*=\s*(?:async\s*)?\(([^)]*)\)\s*(?::[^=]+)?=>",
            1,
        )
        .params(2),
    ]
});

static PYTHON_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "function",
            r"(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)(?:\s*->\s*([^:\n]+))?",
            1,
        )
        .params(2)
        .returns(3),
        Pattern::new("class", r"class\s+([A-Za-z_]\w*)(?:\s*\(([^)]*)\))?", 1).base(2),
    ]
});

static GO_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "function",
            r"func\s+(?:\(\s*\w+\s+\*?([A-Za-z_]\w*)\s*\)\s+)?([A-Za-z_]\w*)\s*\(([^)]*)\)",
            2,
        )
        .params(3)
        .base(1),
        Pattern::new("struct", r"type\s+([A-Za-z_]\w*)\s+struct", 1),
        Pattern::new("interface", r"type\s+([A-Za-z_]\w*)\s+interface", 1),
    ]
});

static C_FAMILY_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "class",
            r"(?:(?:public|private|protected|internal|static|abstract|sealed|partial|final)\s+)*class\s+([A-Za-z_]\w*)(?:<[^>]*>)?(?:\s*[:]\s*([\w\s,.<>]+?))?\s*(?:\{|$|where)",
            1,
        )
        .base(2),
        Pattern::new(
            "interface",
            r"(?:(?:public|private|protected|internal|partial)\s+)*interface\s+([A-Za-z_]\w*)(?:<[^>]*>)?(?:\s*[:]\s*([\w\s,.<>]+?))?\s*(?:\{|$|where)",
            1,
        )
        .base(2),
        Pattern::new(
            "struct",
            r"(?:(?:public|private|protected|internal|readonly|partial)\s+)*struct\s+([A-Za-z_]\w*)",
            1,
        ),
        Pattern::new(
            "enum",
            r"(?:(?:public|private|protected|internal)\s+)*enum\s+(?:class\s+)?([A-Za-z_]\w*)",
            1,
        ),
        Pattern::new("module", r"namespace\s+([A-Za-z_][\w.]*)", 1),
        Pattern::new(
            "function",
            r"(?:(?:public|private|protected|internal|static|virtual|override|async|sealed|abstract|extern|inline|unsafe)\s+)+([\w<>\[\],?]+)\s+([A-Za-z_]\w*)\s*\(([^)]*)\)",
            2,
        )
        .returns(1)
        .params(3),
    ]
});

static JAVA_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "class",
            r"(?:(?:public|private|protected|static|abstract|final)\s+)*class\s+([A-Za-z_]\w*)(?:<[^>]*>)?(?:\s+extends\s+([\w.<>]+))?(?:\s+implements\s+[\w.,\s<>]+)?",
            1,
        )
        .base(2),
        Pattern::new("interface", r"(?:(?:public|private|protected)\s+)*interface\s+([A-Za-z_]\w*)", 1),
        Pattern::new("enum", r"(?:(?:public|private|protected)\s+)*enum\s+([A-Za-z_]\w*)", 1),
        Pattern::new(
            "function",
            r"(?:(?:public|private|protected|static|final|abstract|synchronized|native)\s+)+([\w<>\[\],?]+)\s+([A-Za-z_]\w*)\s*\(([^)]*)\)",
            2,
        )
        .returns(1)
        .params(3),
    ]
});

static RUBY_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new("function", r"def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)", 1),
        Pattern::new("class", r"class\s+([A-Z]\w*)(?:\s*<\s*([\w:]+))?", 1).base(2),
        Pattern::new("module", r"module\s+([A-Z]\w*)", 1),
    ]
});

static PHP_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::new(
            "function",
            r"(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+([A-Za-z_]\w*)\s*\(([^)]*)\)",
            1,
        )
        .params(2),
        Pattern::new("class", r"(?:(?:abstract|final)\s+)*class\s+([A-Za-z_]\w*)(?:\s+extends\s+([\w\\]+))?", 1).base(2),
        Pattern::new("interface", r"interface\s+([A-Za-z_]\w*)", 1),
        Pattern::new("trait", r"trait\s+([A-Za-z_]\w*)", 1),
    ]
});

fn patterns_for(language: &str) -> Option<&'static [Pattern]> {
    let patterns: &'static Vec<Pattern> = match language {
        "rust" => &RUST_PATTERNS,
        "typescript" | "javascript" => &TS_JS_PATTERNS,
        "python" => &PYTHON_PATTERNS,
        "go" => &GO_PATTERNS,
        "csharp" | "c" | "cpp" => &C_FAMILY_PATTERNS,
        "java" | "kotlin" | "scala" => &JAVA_PATTERNS,
        "ruby" => &RUBY_PATTERNS,
        "php" => &PHP_PATTERNS,
        _ => return None,
    };
    Some(patterns.as_slice())
}

static MODIFIER_WORDS: &[&str] = &[
    "pub", "public", "private", "protected", "internal", "static", "abstract", "virtual",
    "override", "async", "sealed", "final", "partial", "unsafe", "export", "const", "readonly",
];

static KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "if", "else", "for", "while", "do", "return", "break", "continue", "switch", "case",
        "default", "try", "catch", "finally", "throw", "throws", "new", "delete", "typeof",
        "instanceof", "in", "of", "is", "as", "fn", "let", "mut", "use", "mod", "impl", "struct",
        "enum", "trait", "match", "move", "ref", "where", "dyn", "crate", "super", "self", "Self",
        "pub", "async", "await", "static", "const", "class", "interface", "public", "private",
        "protected", "internal", "void", "int", "long", "short", "byte", "char", "float", "double",
        "bool", "boolean", "string", "var", "val", "def", "import", "from", "package", "namespace",
        "using", "function", "this", "true", "false", "null", "none", "None", "nil", "undefined",
        "extends", "implements", "abstract", "final", "override", "virtual", "sealed", "partial",
        "readonly", "export", "type", "elif", "lambda", "pass", "with", "yield", "global", "and",
        "or", "not", "end", "begin", "module", "require", "func", "go", "chan", "map", "range",
        "defer", "select", "usize", "u32", "u64", "i32", "i64", "f32", "f64", "str", "String",
        "Vec", "Option", "Result", "Some", "Ok", "Err", "println", "print", "echo", "raise",
        "assert", "sizeof", "template", "typename", "inline", "extern", "register", "volatile",
        "unsigned", "signed", "goto", "union", "operator", "friend", "get", "set", "out",
    ]
    .into_iter()
    .collect()
});

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("identifier regex"));

/// Extract symbols and identifier occurrences from one file. Lines are
/// 1-based, columns 0-based, matching editor conventions downstream.
pub fn extract_file_symbols(content: &str, language: &str) -> FileSymbols {
    let Some(patterns) = patterns_for(language) else {
        return FileSymbols::default();
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut symbols = declared_symbols(&lines, patterns, language);
    assign_scopes(&mut symbols, &lines, language);
    assign_containers(&mut symbols);

    let identifiers = identifier_occurrences(&lines, &symbols);

    FileSymbols {
        symbols,
        identifiers,
    }
}

fn declared_symbols(lines: &[&str], patterns: &[Pattern], language: &str) -> Vec<ExtractedSymbol> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || trimmed.starts_with('#') && language != "csharp" {
            continue;
        }
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for pattern in patterns {
            for caps in pattern.re.captures_iter(line) {
                let Some(name_match) = caps.get(pattern.name_group) else {
                    continue;
                };
                let name = name_match.as_str();
                if name.len() < 2 || KEYWORDS.contains(name) {
                    continue;
                }
                let whole = caps.get(0).expect("match 0");
                // First pattern to claim a span on this line wins; keeps a
                // `class` line from also registering as a function.
                if claimed
                    .iter()
                    .any(|&(s, e)| whole.start() < e && whole.end() > s)
                {
                    continue;
                }
                claimed.push((whole.start(), whole.end()));

                let base_type = pattern
                    .base_group
                    .and_then(|g| caps.get(g))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty());
                let (base_type, interfaces) = split_base_list(base_type);

                out.push(ExtractedSymbol {
                    name: name.to_string(),
                    kind: pattern.kind.to_string(),
                    signature: truncate(line.trim(), 200),
                    start_line: (idx + 1) as u32,
                    start_col: name_match.start() as u32,
                    end_line: (idx + 1) as u32,
                    end_col: name_match.end() as u32,
                    modifiers: modifiers_of(whole.as_str()),
                    base_type,
                    interfaces,
                    containing_type: None,
                    return_type: pattern
                        .return_group
                        .and_then(|g| caps.get(g))
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|s| !s.is_empty()),
                    parameters: pattern
                        .params_group
                        .and_then(|g| caps.get(g))
                        .map(|m| m.as_str().trim().to_string()),
                });
            }
        }
    }
    out.sort_by_key(|s| (s.start_line, s.start_col));
    out
}

fn modifiers_of(matched: &str) -> String {
    matched
        .split_whitespace()
        .take_while(|w| MODIFIER_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_base_list(base: Option<String>) -> (Option<String>, Option<String>) {
    let Some(base) = base else {
        return (None, None);
    };
    let parts: Vec<String> = base
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return (None, None);
    }
    // C#-style base lists put the base class first, interfaces (I-prefixed
    // or remaining entries) after.
    let first = parts[0].clone();
    let rest: Vec<String> = parts[1..].to_vec();
    if rest.is_empty() {
        if first.starts_with('I') && first.chars().nth(1).is_some_and(|c| c.is_uppercase()) {
            (None, Some(first))
        } else {
            (Some(first), None)
        }
    } else {
        (Some(first), Some(rest.join(", ")))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

/// Compute `end_line`/`end_col` for every symbol. Brace languages get brace
/// matching (string/comment aware, best effort); Python uses indentation.
fn assign_scopes(symbols: &mut [ExtractedSymbol], lines: &[&str], language: &str) {
    if language == "python" {
        assign_scopes_by_indent(symbols, lines);
        return;
    }
    // Flatten line starts so brace offsets can be mapped back to lines.
    let brace_events = brace_positions(lines);
    for sym in symbols.iter_mut() {
        let decl_line = sym.start_line as usize;
        // First open brace at or after the declaration.
        let open = brace_events
            .iter()
            .position(|e| e.open && (e.line > decl_line || (e.line == decl_line && e.col >= sym.start_col as usize)));
        let Some(open_idx) = open else {
            continue;
        };
        // Opening brace must be near the declaration, not some later symbol.
        if brace_events[open_idx].line > decl_line + 3 {
            continue;
        }
        let mut depth = 0i32;
        for event in &brace_events[open_idx..] {
            depth += if event.open { 1 } else { -1 };
            if depth == 0 {
                sym.end_line = event.line as u32;
                sym.end_col = event.col as u32;
                break;
            }
        }
    }
}

struct BraceEvent {
    line: usize,
    col: usize,
    open: bool,
}

fn brace_positions(lines: &[&str]) -> Vec<BraceEvent> {
    let mut events = Vec::new();
    let mut in_block_comment = false;
    for (idx, line) in lines.iter().enumerate() {
        let mut in_string: Option<char> = None;
        let mut prev = '\0';
        let mut chars = line.char_indices().peekable();
        while let Some((col, c)) = chars.next() {
            if in_block_comment {
                if prev == '*' && c == '/' {
                    in_block_comment = false;
                }
                prev = c;
                continue;
            }
            if let Some(quote) = in_string {
                if c == quote && prev != '\\' {
                    in_string = None;
                }
                prev = c;
                continue;
            }
            match c {
                '"' | '\'' => in_string = Some(c),
                '/' if chars.peek().is_some_and(|&(_, n)| n == '/') => break,
                '/' if chars.peek().is_some_and(|&(_, n)| n == '*') => in_block_comment = true,
                '{' => events.push(BraceEvent { line: idx + 1, col, open: true }),
                '}' => events.push(BraceEvent { line: idx + 1, col, open: false }),
                _ => {}
            }
            prev = c;
        }
    }
    events
}

fn assign_scopes_by_indent(symbols: &mut [ExtractedSymbol], lines: &[&str]) {
    for sym in symbols.iter_mut() {
        let decl_idx = sym.start_line as usize - 1;
        let decl_indent = indent_of(lines[decl_idx]);
        let mut end = decl_idx;
        for (offset, line) in lines[decl_idx + 1..].iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= decl_indent {
                break;
            }
            end = decl_idx + 1 + offset;
        }
        sym.end_line = (end + 1) as u32;
        sym.end_col = lines[end].len() as u32;
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Innermost enclosing type-kind symbol becomes `containing_type`; function
/// kinds nested in a type are reclassified as methods.
fn assign_containers(symbols: &mut Vec<ExtractedSymbol>) {
    let containers: Vec<(String, String, u32, u32)> = symbols
        .iter()
        .filter(|s| is_type_kind(&s.kind))
        .map(|s| (s.name.clone(), s.kind.clone(), s.start_line, s.end_line))
        .collect();

    for sym in symbols.iter_mut() {
        let mut best: Option<&(String, String, u32, u32)> = None;
        for c in &containers {
            if c.0 == sym.name && c.2 == sym.start_line {
                continue;
            }
            if c.2 <= sym.start_line && sym.start_line <= c.3 {
                let tighter = best.is_none_or(|b| (c.3 - c.2) < (b.3 - b.2));
                if tighter {
                    best = Some(c);
                }
            }
        }
        if let Some((name, _, _, _)) = best {
            sym.containing_type = Some(name.clone());
            if sym.kind == "function" {
                sym.kind = "method".to_string();
            }
        }
    }
}

fn identifier_occurrences(lines: &[&str], symbols: &[ExtractedSymbol]) -> Vec<IdentifierOccurrence> {
    // Innermost function-like scope per line, for caller attribution.
    let callables: Vec<(&str, u32, u32)> = symbols
        .iter()
        .filter(|s| matches!(s.kind.as_str(), "function" | "method"))
        .map(|s| (s.name.as_str(), s.start_line, s.end_line))
        .collect();
    let container_for = |line: u32| -> Option<String> {
        callables
            .iter()
            .filter(|(_, start, end)| *start <= line && line <= *end)
            .min_by_key(|(_, start, end)| end - start)
            .map(|(name, _, _)| name.to_string())
    };

    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }
        let line_no = (idx + 1) as u32;
        let containing = container_for(line_no);
        for m in IDENT_RE.find_iter(line) {
            let name = m.as_str();
            if name.len() < 2 || KEYWORDS.contains(name) {
                continue;
            }
            let after = line[m.end()..].trim_start();
            let is_call = after.starts_with('(');
            let qualifier = qualifier_before(line, m.start());
            out.push(IdentifierOccurrence {
                name: name.to_string(),
                line: line_no,
                col: m.start() as u32,
                qualifier,
                is_call,
                containing_symbol: containing.clone(),
            });
            if out.len() >= MAX_IDENTIFIERS_PER_FILE {
                return out;
            }
        }
    }
    out
}

fn qualifier_before(line: &str, start: usize) -> Option<String> {
    let before = &line[..start];
    let before = before.strip_suffix('.').or_else(|| {
        before
            .strip_suffix("::")
            .or_else(|| before.strip_suffix("->"))
    })?;
    IDENT_RE
        .find_iter(before)
        .last()
        .filter(|m| m.end() == before.len())
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSHARP_SRC: &str = "public class HttpClientFactory : IClientFactory {\n    public void Build() {\n        var x = Helper.Create();\n    }\n}\n";

    #[test]
    fn csharp_class_and_method_extracted() {
        let result = extract_file_symbols(CSHARP_SRC, "csharp");
        let class = result.symbols.iter().find(|s| s.name == "HttpClientFactory").unwrap();
        assert_eq!(class.kind, "class");
        assert_eq!(class.start_line, 1);
        assert_eq!(class.end_line, 5);
        assert_eq!(class.interfaces.as_deref(), Some("IClientFactory"));

        let build = result.symbols.iter().find(|s| s.name == "Build").unwrap();
        assert_eq!(build.kind, "method");
        assert_eq!(build.containing_type.as_deref(), Some("HttpClientFactory"));
        assert_eq!(build.return_type.as_deref(), Some("void"));
    }

    #[test]
    fn call_sites_carry_qualifier_and_container() {
        let result = extract_file_symbols(CSHARP_SRC, "csharp");
        let create = result
            .identifiers
            .iter()
            .find(|i| i.name == "Create")
            .unwrap();
        assert!(create.is_call);
        assert_eq!(create.qualifier.as_deref(), Some("Helper"));
        assert_eq!(create.containing_symbol.as_deref(), Some("Build"));
    }

    #[test]
    fn rust_fn_and_impl_extracted() {
        let src = "pub struct Engine;\n\nimpl Engine {\n    pub async fn start(&self, port: u16) -> anyhow::Result<()> {\n        self.bind(port)\n    }\n}\n";
        let result = extract_file_symbols(src, "rust");
        let start = result.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.kind, "method");
        assert_eq!(start.containing_type.as_deref(), Some("Engine"));
        assert_eq!(start.parameters.as_deref(), Some("&self, port: u16"));
        assert!(start.return_type.as_deref().unwrap().contains("Result"));
    }

    #[test]
    fn python_scopes_by_indent() {
        let src = "class Store:\n    def put(self, key):\n        return key\n\ndef top():\n    pass\n";
        let result = extract_file_symbols(src, "python");
        let put = result.symbols.iter().find(|s| s.name == "put").unwrap();
        assert_eq!(put.kind, "method");
        assert_eq!(put.containing_type.as_deref(), Some("Store"));
        let top = result.symbols.iter().find(|s| s.name == "top").unwrap();
        assert!(top.containing_type.is_none());
    }

    #[test]
    fn unsupported_language_is_empty() {
        let result = extract_file_symbols("whatever", "plaintext");
        assert!(result.symbols.is_empty());
        assert!(result.identifiers.is_empty());
    }

    #[test]
    fn type_info_groups_types_and_methods() {
        let result = extract_file_symbols(CSHARP_SRC, "csharp");
        let json = type_info_json(&result.symbols);
        let info: TypeInfo = serde_json::from_str(&json).unwrap();
        assert!(info.types.iter().any(|t| t.name == "HttpClientFactory"));
        assert!(info.methods.iter().any(|m| m.name == "Build"));
    }
}
