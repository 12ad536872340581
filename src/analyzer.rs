use tantivy::Index;
use tantivy::tokenizer::{TextAnalyzer, Token, TokenStream, Tokenizer};

/// Registered name of the code analyzer on every workspace index.
pub const CODE_TOKENIZER: &str = "source_code";

/// Multi-char operator tokens that plain text analyzers destroy. Kept as
/// first-class terms so `code` queries can match them.
pub const OPERATOR_TOKENS: &[&str] = &[
    "=>", "??", "?.", "::", "->", "+=", "-=", "==", "!=", ">=", "<=", "&&", "||", "<<", ">>",
];

/// Tokenizer for source code.
///
/// `HttpClientFactory` yields `http`, `client`, `factory` at consecutive
/// positions plus the joined `httpclientfactory` spanning them, so both
/// multi-word recall and exact-identifier matching work. Operators from
/// `OPERATOR_TOKENS` are preserved verbatim. Output is lowercased and never
/// stemmed.
#[derive(Clone, Default)]
pub struct CodeTokenizer;

impl Tokenizer for CodeTokenizer {
    type TokenStream<'a> = CodeTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> CodeTokenStream {
        CodeTokenStream {
            tokens: tokenize_code(text),
            index: 0,
        }
    }
}

pub struct CodeTokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream for CodeTokenStream {
    fn advance(&mut self) -> bool {
        if self.index < self.tokens.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.index - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.index - 1]
    }
}

/// Register the code analyzer on an index. Must run after every
/// `Index::open_in_dir` as tokenizer registrations are not persisted.
pub fn register_code_tokenizer(index: &Index) {
    index.tokenizers().register(
        CODE_TOKENIZER,
        TextAnalyzer::builder(CodeTokenizer).build(),
    );
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize_code(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position: usize = 0;
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if is_ident_char(c) {
            let mut end = start;
            while let Some(&(i, ch)) = chars.peek() {
                if is_ident_char(ch) {
                    end = i + ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let ident = &text[start..end];
            let parts = split_identifier(ident);
            if parts.len() > 1 {
                // Joined form spans the same positions as its parts.
                tokens.push(Token {
                    offset_from: start,
                    offset_to: end,
                    position,
                    text: ident.to_lowercase(),
                    position_length: parts.len(),
                });
            }
            for (i, part) in parts.iter().enumerate() {
                tokens.push(Token {
                    offset_from: start,
                    offset_to: end,
                    position: position + i,
                    text: part.clone(),
                    position_length: 1,
                });
            }
            position += parts.len().max(1);
        } else {
            // Operator or punctuation. Longest (2-char) match wins.
            let rest = &text[start..];
            let op = OPERATOR_TOKENS.iter().find(|op| rest.starts_with(**op));
            if let Some(op) = op {
                tokens.push(Token {
                    offset_from: start,
                    offset_to: start + op.len(),
                    position,
                    text: (*op).to_string(),
                    position_length: 1,
                });
                position += 1;
                for _ in 0..op.chars().count() {
                    chars.next();
                }
            } else {
                chars.next();
            }
        }
    }
    tokens
}

/// Split an identifier on underscores and case boundaries, lowercased.
/// `parseHTTPResponse` -> [parse, http, response]; digits stay attached to
/// the preceding run (`http2` is one part).
pub fn split_identifier(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(current.to_lowercase());
                current = String::new();
            }
            continue;
        }
        if !current.is_empty() {
            let prev = chars[i - 1];
            let boundary = (prev.is_lowercase() || prev.is_numeric()) && c.is_uppercase()
                || prev.is_uppercase()
                    && c.is_uppercase()
                    && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if boundary {
                parts.push(current.to_lowercase());
                current = String::new();
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current.to_lowercase());
    }
    parts
}

/// Query-side tokenization: every term the indexed document would contain
/// for this text, joined identifiers included. Used to build boolean
/// term queries that line up with the index.
pub fn code_terms(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize_code(text)
        .into_iter()
        .map(|t| t.text)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Query-side tokenization in positional order without the joined duplicates.
/// Used for phrase queries, where every position may hold only one term.
pub fn sequential_terms(text: &str) -> Vec<String> {
    tokenize_code(text)
        .into_iter()
        .filter(|t| t.position_length == 1)
        .map(|t| t.text)
        .collect()
}
