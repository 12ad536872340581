use crate::analyzer::CODE_TOKENIZER;
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions,
};

/// One logical document per indexed file. `path` is the unique key used for
/// delete-then-add updates; everything the scorer or snippet extractor needs
/// at response time is a stored field.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub path: Field,
    pub relative_path: Field,
    pub filename: Field,
    pub extension: Field,
    pub content: Field,
    pub language: Field,
    pub size: Field,
    pub last_modified: Field,
    pub content_hash: Field,
    pub symbols: Field,
    pub type_info: Field,
    schema: Schema,
}

impl IndexSchema {
    pub fn build() -> Self {
        let mut builder = Schema::builder();

        let code_text = || {
            TextOptions::default()
                .set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer(CODE_TOKENIZER)
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                )
                .set_stored()
        };

        let path = builder.add_text_field("path", STRING | STORED);
        let relative_path = builder.add_text_field("relative_path", code_text());
        let filename = builder.add_text_field("filename", code_text());
        let extension = builder.add_text_field("extension", STRING | STORED);
        let content = builder.add_text_field("content", code_text());
        let language = builder.add_text_field("language", STRING | STORED);
        let size = builder.add_u64_field("size", tantivy::schema::INDEXED | STORED);
        let last_modified = builder.add_u64_field(
            "last_modified",
            tantivy::schema::INDEXED | STORED | tantivy::schema::FAST,
        );
        let content_hash = builder.add_text_field("content_hash", STRING | STORED);
        // Space-joined symbol names; searchable but not stored (type_info
        // carries the structured form).
        let symbols = builder.add_text_field(
            "symbols",
            TextOptions::default().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(CODE_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            ),
        );
        let type_info = builder.add_text_field("type_info", STORED);

        let schema = builder.build();

        Self {
            path,
            relative_path,
            filename,
            extension,
            content,
            language,
            size,
            last_modified,
            content_hash,
            symbols,
            type_info,
            schema,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Fields a free-text query runs against by default.
    pub fn default_search_fields(&self) -> Vec<Field> {
        vec![self.content, self.filename, self.relative_path, self.symbols]
    }
}
