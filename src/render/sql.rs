//! Relational-insert script generation.
//!
//! Produces a SQL text blob representing the rendered document as rows:
//! one `documents` insert keyed on the content hash (re-running the script
//! is a no-op thanks to `ON CONFLICT DO NOTHING`) plus one `document_chunks`
//! row per chunk, resolved against the document via a CTE on the hash. The
//! optional setup prefix carries the table DDL for a pgvector-capable
//! Postgres, for operators loading a fresh database by hand.

use crate::model::RenderedDocument;

/// Options for [`render_insert_script`].
#[derive(Debug, Clone, Default)]
pub struct InsertScriptOptions {
    /// Prepend the one-time schema setup DDL.
    pub include_setup: bool,
}

/// Schema DDL for the document store: pgvector extension, document and
/// chunk tables, and the similarity-search function.
pub const SETUP_SQL: &str = r#"-- One-time schema setup
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS documents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    title TEXT NOT NULL,
    author TEXT,
    source_file TEXT NOT NULL,
    page_count INTEGER,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    metadata JSONB DEFAULT '{}'::jsonb,
    file_hash TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS document_chunks (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    document_id UUID REFERENCES documents(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    chunk_index INTEGER,
    heading TEXT,
    embedding vector(1536),
    metadata JSONB DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON document_chunks
    USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100);

CREATE OR REPLACE FUNCTION match_documents(
    query_embedding vector(1536),
    match_threshold float DEFAULT 0.7,
    match_count int DEFAULT 10,
    filter_document_id uuid DEFAULT NULL
)
RETURNS TABLE (
    id uuid,
    document_id uuid,
    content text,
    heading text,
    similarity float
)
LANGUAGE plpgsql
AS $$
BEGIN
    RETURN QUERY
    SELECT
        dc.id,
        dc.document_id,
        dc.content,
        dc.heading,
        1 - (dc.embedding <=> query_embedding) AS similarity
    FROM document_chunks dc
    WHERE
        (filter_document_id IS NULL OR dc.document_id = filter_document_id)
        AND 1 - (dc.embedding <=> query_embedding) > match_threshold
    ORDER BY dc.embedding <=> query_embedding
    LIMIT match_count;
END;
$$;
"#;

/// Render the document and its chunks as an insert script.
pub fn render_insert_script(doc: &RenderedDocument, options: &InsertScriptOptions) -> String {
    let mut parts: Vec<String> = Vec::new();

    if options.include_setup {
        parts.push(SETUP_SQL.to_string());
        parts.push("-- ====== DATA ======".to_string());
    }

    let metadata = serde_json::json!({
        "subject": doc.metadata.subject,
        "toc": doc.table_of_contents.iter().take(50).collect::<Vec<_>>(),
        "has_images": doc.metadata.has_images,
        "is_scanned": doc.metadata.is_scanned,
    });

    parts.push(format!(
        "INSERT INTO documents (title, author, source_file, page_count, file_hash, metadata)\n\
         VALUES (\n    '{}',\n    '{}',\n    '{}',\n    {},\n    '{}',\n    '{}'::jsonb\n)\n\
         ON CONFLICT (file_hash) DO NOTHING;",
        escape_sql(&doc.metadata.title),
        escape_sql(&doc.metadata.author),
        escape_sql(&doc.metadata.source_name),
        doc.metadata.page_count,
        escape_sql(&doc.checksum),
        escape_sql(&metadata.to_string()),
    ));

    if !doc.chunks.is_empty() {
        let mut values = Vec::with_capacity(doc.chunks.len());
        for chunk in &doc.chunks {
            let heading = match &chunk.heading {
                Some(h) => format!("'{}'", escape_sql(h)),
                None => "NULL".to_string(),
            };
            values.push(format!(
                "    ((SELECT id FROM doc), '{}', {}, {})",
                escape_sql(&chunk.text),
                chunk.index,
                heading,
            ));
        }
        parts.push(format!(
            "WITH doc AS (\n    SELECT id FROM documents WHERE file_hash = '{}'\n)\n\
             INSERT INTO document_chunks (document_id, content, chunk_index, heading)\nVALUES\n{};",
            escape_sql(&doc.checksum),
            values.join(",\n"),
        ));
    }

    let mut script = parts.join("\n\n");
    script.push('\n');
    script
}

fn escape_sql(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "''")
}
