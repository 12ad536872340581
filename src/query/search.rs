use crate::error::EngineResult;
use crate::index::context::IndexContext;
use crate::index::schema::IndexSchema;
use crate::query::preprocess::{PreparedQuery, SearchType, compile_content_regex};
use crate::query::scoring::{CompositeScorer, DocFields, compare_scored, word_boundary_regex};
use crate::state::CancelFlag;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::time::Duration;
use tantivy::Order;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, RangeQuery};
use tantivy::schema::Value;
use tantivy::{TantivyDocument, Term};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetInfo {
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub relative_path: String,
    pub filename: String,
    pub extension: String,
    pub language: String,
    pub size: u64,
    pub last_modified: u64,
    pub score: f32,
    pub base_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<SnippetInfo>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub want_snippets: bool,
    pub reader_max_age: Duration,
    pub regex_scan_cap: usize,
}

/// Read the stored fields the scorer needs out of a retrieved document.
pub fn doc_fields(schema: &IndexSchema, doc: &TantivyDocument) -> DocFields {
    let text = |field| {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    let num = |field| doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0);

    let type_info = doc
        .get_first(schema.type_info)
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str(raw).ok());

    DocFields {
        path: text(schema.path),
        relative_path: text(schema.relative_path),
        filename: text(schema.filename),
        extension: text(schema.extension),
        language: text(schema.language),
        content: text(schema.content),
        size: num(schema.size),
        last_modified: num(schema.last_modified),
        content_hash: text(schema.content_hash),
        type_info,
    }
}

/// Execute a prepared query against one workspace index: capture a searcher,
/// collect an oversampled candidate set, rescore with the composite factors,
/// then shape the top hits. Cancellation aborts with no partial results.
pub fn execute_search(
    ctx: &IndexContext,
    prepared: &PreparedQuery,
    opts: &SearchOptions,
    cancel: &CancelFlag,
) -> EngineResult<Vec<SearchHit>> {
    let searcher = ctx.searcher(opts.reader_max_age)?;
    let scorer = CompositeScorer::standard();

    let mut scored: Vec<(f32, f32, DocFields)> = Vec::new();

    if prepared.context.search_type == SearchType::Regex {
        let re = compile_content_regex(&prepared.context.cleaned, prepared.context.case_sensitive)?;
        let top = searcher.search(&AllQuery, &TopDocs::with_limit(opts.regex_scan_cap))?;
        for (_, addr) in top {
            cancel.check()?;
            let doc: TantivyDocument = searcher.doc(addr)?;
            let fields = doc_fields(&ctx.schema, &doc);
            let matches = re.find_iter(&fields.content).take(50).count();
            if matches == 0 {
                continue;
            }
            let base = (matches as f32 / 10.0).min(1.0);
            let final_score = scorer.rescore(base, &fields, &prepared.context);
            scored.push((final_score, base, fields));
        }
    } else {
        let oversample = opts.max_results.saturating_mul(4).max(opts.max_results);
        let top = searcher.search(prepared.query.as_ref(), &TopDocs::with_limit(oversample))?;
        let case_filter = if prepared.context.case_sensitive
            && !prepared.context.cleaned.contains(['*', '?'])
        {
            word_boundary_regex(&prepared.context.cleaned, true)
        } else {
            None
        };
        for (base, addr) in top {
            cancel.check()?;
            let doc: TantivyDocument = searcher.doc(addr)?;
            let fields = doc_fields(&ctx.schema, &doc);
            if let Some(re) = &case_filter {
                if !re.is_match(&fields.content) && !re.is_match(&fields.filename) {
                    continue;
                }
            }
            let final_score = scorer.rescore(base, &fields, &prepared.context);
            scored.push((final_score, base, fields));
        }
    }

    scored.sort_by(|a, b| compare_scored(a.0, &a.2, b.0, &b.2));
    scored.truncate(opts.max_results);

    Ok(scored
        .into_iter()
        .map(|(score, base, fields)| {
            let snippet = if opts.want_snippets {
                best_snippet(&fields.content, &prepared.context.terms, &prepared.context.cleaned)
            } else {
                None
            };
            SearchHit {
                path: fields.path,
                relative_path: fields.relative_path,
                filename: fields.filename,
                extension: fields.extension,
                language: fields.language,
                size: fields.size,
                last_modified: fields.last_modified,
                score,
                base_score: base,
                snippet,
            }
        })
        .collect())
}

/// The line with the most distinct query-term hits; the full cleaned query
/// matching outranks individual terms.
fn best_snippet(content: &str, terms: &[String], cleaned: &str) -> Option<SnippetInfo> {
    let cleaned_lower = cleaned.to_lowercase();
    let mut best: Option<(usize, u32, &str)> = None;
    for (idx, line) in content.lines().enumerate() {
        let lower = line.to_lowercase();
        let mut hits = terms
            .iter()
            .filter(|t| lower.contains(String::as_str(*t)))
            .count();
        if !cleaned_lower.is_empty() && lower.contains(&cleaned_lower) {
            hits += terms.len();
        }
        if hits > 0 && best.is_none_or(|(b, _, _)| hits > b) {
            best = Some((hits, (idx + 1) as u32, line));
        }
    }
    best.map(|(_, line, text)| SnippetInfo {
        line,
        text: truncate_line(text.trim(), 240),
    })
}

fn truncate_line(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Files modified at or after `cutoff`, newest first. Runs on the
/// `last_modified` fast field so no scoring pass is needed.
pub fn recent_files(
    ctx: &IndexContext,
    cutoff: u64,
    limit: usize,
    reader_max_age: Duration,
) -> EngineResult<Vec<SearchHit>> {
    let searcher = ctx.searcher(reader_max_age)?;
    let query = RangeQuery::new(
        Bound::Included(Term::from_field_u64(ctx.schema.last_modified, cutoff)),
        Bound::Unbounded,
    );
    let collector = TopDocs::with_limit(limit.max(1)).order_by_fast_field::<u64>("last_modified", Order::Desc);
    let top = searcher.search(&query, &collector)?;

    let mut hits = Vec::with_capacity(top.len());
    for (_, addr) in top {
        let doc: TantivyDocument = searcher.doc(addr)?;
        let fields = doc_fields(&ctx.schema, &doc);
        hits.push(SearchHit {
            path: fields.path,
            relative_path: fields.relative_path,
            filename: fields.filename,
            extension: fields.extension,
            language: fields.language,
            size: fields.size,
            last_modified: fields.last_modified,
            score: 0.0,
            base_score: 0.0,
            snippet: None,
        });
    }
    Ok(hits)
}

/// Enumerate indexed documents (no scoring, no snippets); feeds the
/// filename/path search which filters by glob or regex afterwards.
pub fn all_documents(
    ctx: &IndexContext,
    cap: usize,
    reader_max_age: Duration,
) -> EngineResult<Vec<SearchHit>> {
    let searcher = ctx.searcher(reader_max_age)?;
    let top = searcher.search(&AllQuery, &TopDocs::with_limit(cap.max(1)))?;
    let mut hits = Vec::with_capacity(top.len());
    for (_, addr) in top {
        let doc: TantivyDocument = searcher.doc(addr)?;
        let fields = doc_fields(&ctx.schema, &doc);
        hits.push(SearchHit {
            path: fields.path,
            relative_path: fields.relative_path,
            filename: fields.filename,
            extension: fields.extension,
            language: fields.language,
            size: fields.size,
            last_modified: fields.last_modified,
            score: 0.0,
            base_score: 0.0,
            snippet: None,
        });
    }
    hits.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(hits)
}

/// Total live documents, observed through the NRT cache.
pub fn doc_count(ctx: &IndexContext, reader_max_age: Duration) -> EngineResult<usize> {
    let searcher = ctx.searcher(reader_max_age)?;
    Ok(searcher.search(&AllQuery, &Count)?)
}

/// Documents matching an exact stored path (0 or 1 by the unique-path
/// invariant).
pub fn count_by_path(ctx: &IndexContext, path: &str, reader_max_age: Duration) -> EngineResult<usize> {
    use tantivy::query::TermQuery;
    use tantivy::schema::IndexRecordOption;
    let searcher = ctx.searcher(reader_max_age)?;
    let query = TermQuery::new(
        Term::from_field_text(ctx.schema.path, path),
        IndexRecordOption::Basic,
    );
    Ok(searcher.search(&query, &Count)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_prefers_line_with_full_match() {
        let content = "using System;\n// client code\npublic class HttpClientFactory {\n";
        let terms = vec!["httpclient".to_string(), "http".to_string(), "client".to_string()];
        let snippet = best_snippet(content, &terms, "HttpClient").unwrap();
        assert_eq!(snippet.line, 3);
        assert!(snippet.text.contains("HttpClientFactory"));
    }

    #[test]
    fn snippet_absent_when_nothing_matches() {
        assert!(best_snippet("alpha\nbeta\n", &["gamma".to_string()], "gamma").is_none());
    }

    #[test]
    fn long_lines_truncate_on_char_boundary() {
        let line = "é".repeat(300);
        let out = truncate_line(&line, 240);
        assert!(out.ends_with('…'));
        assert!(out.len() <= 244);
    }
}
