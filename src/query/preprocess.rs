use crate::analyzer::{code_terms, sequential_terms};
use crate::config::MAX_SEARCH_QUERY_LENGTH;
use crate::error::{EngineError, EngineResult};
use crate::index::schema::IndexSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tantivy::Term;
use tantivy::query::{
    AllQuery, BooleanQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, RegexQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Standard,
    Literal,
    Code,
    Wildcard,
    Fuzzy,
    Phrase,
    Regex,
}

impl SearchType {
    pub fn parse(s: Option<&str>) -> EngineResult<Self> {
        match s {
            None | Some("standard") => Ok(SearchType::Standard),
            Some("literal") => Ok(SearchType::Literal),
            Some("code") => Ok(SearchType::Code),
            Some("wildcard") => Ok(SearchType::Wildcard),
            Some("fuzzy") => Ok(SearchType::Fuzzy),
            Some("phrase") => Ok(SearchType::Phrase),
            Some("regex") => Ok(SearchType::Regex),
            Some(other) => Err(EngineError::InvalidQuery {
                message: format!("unknown search_type '{other}'"),
                hint: "Valid types: standard, literal, code, wildcard, fuzzy, phrase, regex"
                    .to_string(),
            }),
        }
    }
}

/// Everything the scorer and response shaper need to know about a query,
/// computed once before the search runs.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw: String,
    pub cleaned: String,
    pub search_type: SearchType,
    pub case_sensitive: bool,
    pub terms: Vec<String>,
    pub looks_like_interface: bool,
    pub looks_like_type: bool,
    pub is_config_query: bool,
}

#[derive(Debug)]
pub struct PreparedQuery {
    pub query: Box<dyn Query>,
    pub context: QueryContext,
}

static INTERFACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^I[A-Z]\w*$").expect("interface regex"));
static TYPE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*[a-z][A-Za-z0-9]*$").expect("type regex"));

/// Classify and rewrite a query into a tantivy query plus its context.
/// Rejections carry a recovery hint per the error design.
pub fn prepare_query(
    schema: &IndexSchema,
    raw: &str,
    search_type: SearchType,
    case_sensitive: bool,
) -> EngineResult<PreparedQuery> {
    let cleaned = raw.trim().to_string();
    validate(&cleaned, search_type)?;

    let terms = code_terms(&cleaned);
    let context = QueryContext {
        looks_like_interface: INTERFACE_RE.is_match(&cleaned),
        looks_like_type: TYPE_NAME_RE.is_match(&cleaned),
        is_config_query: {
            let lower = cleaned.to_lowercase();
            lower.contains("config") || lower.contains("settings")
        },
        raw: raw.to_string(),
        cleaned: cleaned.clone(),
        search_type,
        case_sensitive,
        terms,
    };

    let query: Box<dyn Query> = match search_type {
        SearchType::Standard => standard_query(schema, &context)?,
        SearchType::Literal => phrase_query(schema, &cleaned, true)?,
        SearchType::Code => code_query(schema, &cleaned)?,
        SearchType::Wildcard => wildcard_query(schema, &cleaned)?,
        SearchType::Fuzzy => fuzzy_query(schema, &context)?,
        SearchType::Phrase => phrase_query(schema, &cleaned, false)?,
        // Regex runs as a stored-content scan; the index query just selects
        // candidate documents.
        SearchType::Regex => {
            compile_content_regex(&cleaned, case_sensitive)?;
            Box::new(AllQuery)
        }
    };

    Ok(PreparedQuery { query, context })
}

/// Compile the regex used by `SearchType::Regex` over stored content.
pub fn compile_content_regex(pattern: &str, case_sensitive: bool) -> EngineResult<Regex> {
    let full = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&full).map_err(|e| EngineError::InvalidQuery {
        message: format!("invalid regex: {e}"),
        hint: "Escape special characters or use search_type=literal for verbatim text".to_string(),
    })
}

fn validate(cleaned: &str, search_type: SearchType) -> EngineResult<()> {
    if cleaned.is_empty() {
        return Err(EngineError::InvalidQuery {
            message: "query is empty".to_string(),
            hint: "Provide at least one search term".to_string(),
        });
    }
    if cleaned.len() > MAX_SEARCH_QUERY_LENGTH {
        return Err(EngineError::InvalidQuery {
            message: format!(
                "query too long ({} chars, max {MAX_SEARCH_QUERY_LENGTH})",
                cleaned.len()
            ),
            hint: "Shorten the query to its distinctive terms".to_string(),
        });
    }
    if cleaned.chars().all(|c| c == '*' || c == '?') {
        return Err(EngineError::InvalidQuery {
            message: "query contains only wildcards".to_string(),
            hint: "Add at least one literal character, e.g. 'User*'".to_string(),
        });
    }
    if search_type != SearchType::Regex && (cleaned.starts_with('*') || cleaned.starts_with('?')) {
        return Err(EngineError::InvalidQuery {
            message: "leading wildcard is not allowed".to_string(),
            hint: "Leading wildcards scan every term in the index; anchor the query with a literal prefix like 'util*'".to_string(),
        });
    }
    Ok(())
}

fn no_terms_error() -> EngineError {
    EngineError::InvalidQuery {
        message: "query contains no searchable terms".to_string(),
        hint: "Use letters, digits or code operators; bare punctuation is dropped by the analyzer"
            .to_string(),
    }
}

/// Boolean-OR of every analyzed term across the default search fields.
fn standard_query(schema: &IndexSchema, ctx: &QueryContext) -> EngineResult<Box<dyn Query>> {
    if ctx.terms.is_empty() {
        return Err(no_terms_error());
    }
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for term in &ctx.terms {
        for field in schema.default_search_fields() {
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(field, term),
                    IndexRecordOption::WithFreqs,
                )),
            ));
        }
    }
    Ok(Box::new(BooleanQuery::new(clauses)))
}

/// The whole query as one exact-order phrase on content. `literal` keeps
/// the sequence strict; `phrase` is the user-facing alias with identical
/// mechanics.
fn phrase_query(schema: &IndexSchema, cleaned: &str, _literal: bool) -> EngineResult<Box<dyn Query>> {
    let tokens = sequential_terms(cleaned);
    build_positional(schema.content, schema, tokens)
}

/// Code queries keep operator tokens; multi-term runs phrase-style so
/// `=> Ok` finds the operator in sequence.
fn code_query(schema: &IndexSchema, cleaned: &str) -> EngineResult<Box<dyn Query>> {
    let tokens = sequential_terms(cleaned);
    build_positional(schema.content, schema, tokens)
}

fn build_positional(
    field: Field,
    schema: &IndexSchema,
    tokens: Vec<String>,
) -> EngineResult<Box<dyn Query>> {
    match tokens.len() {
        0 => Err(no_terms_error()),
        1 => {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for f in [field, schema.filename, schema.symbols] {
                clauses.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(f, &tokens[0]),
                        IndexRecordOption::WithFreqs,
                    )),
                ));
            }
            Ok(Box::new(BooleanQuery::new(clauses)))
        }
        _ => {
            let terms: Vec<Term> = tokens
                .iter()
                .map(|t| Term::from_field_text(field, t))
                .collect();
            Ok(Box::new(PhraseQuery::new(terms)))
        }
    }
}

/// Single-term glob over indexed terms, rewritten to a term-level regex.
fn wildcard_query(schema: &IndexSchema, cleaned: &str) -> EngineResult<Box<dyn Query>> {
    if cleaned.split_whitespace().count() > 1 {
        return Err(EngineError::InvalidQuery {
            message: "wildcard search accepts a single term".to_string(),
            hint: "Search one pattern at a time, e.g. 'Http*Factory'".to_string(),
        });
    }
    let mut pattern = String::new();
    for c in cleaned.to_lowercase().chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if regex_syntax_special(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    let query = RegexQuery::from_pattern(&pattern, schema.content).map_err(|e| {
        EngineError::InvalidQuery {
            message: format!("invalid wildcard pattern: {e}"),
            hint: "Only * and ? are wildcard characters".to_string(),
        }
    })?;
    Ok(Box::new(query))
}

fn regex_syntax_special(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\'
    )
}

/// Edit-distance terms, bounded: short terms get distance 1, longer 2, at
/// most four fuzzy terms per query.
fn fuzzy_query(schema: &IndexSchema, ctx: &QueryContext) -> EngineResult<Box<dyn Query>> {
    if ctx.terms.is_empty() {
        return Err(no_terms_error());
    }
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for term in ctx.terms.iter().take(4) {
        let distance = if term.chars().count() < 6 { 1 } else { 2 };
        clauses.push((
            Occur::Should,
            Box::new(FuzzyTermQuery::new(
                Term::from_field_text(schema.content, term),
                distance,
                true,
            )),
        ));
    }
    Ok(Box::new(BooleanQuery::new(clauses)))
}
