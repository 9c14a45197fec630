//! Database schema for the book library.

/// SQL schema for the library database (version 1).
pub const LIBRARY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    format TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    file_path TEXT NOT NULL,

    -- Extracted metadata (all optional; absence means "not found")
    title TEXT,
    subtitle TEXT,
    authors TEXT NOT NULL DEFAULT '[]',
    publisher TEXT,
    description TEXT,
    language TEXT,
    isbn10 TEXT,
    isbn13 TEXT,
    page_count INTEGER,
    published_date TEXT,

    -- Cover
    cover_path TEXT,
    placeholder_color TEXT,

    -- Indexing state
    fulltext_indexed INTEGER NOT NULL DEFAULT 0,

    -- Timestamps (Unix milliseconds)
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Content-hash dedup relies on this constraint; concurrent uploads of the
-- same bytes are resolved here, not with application-level locking.
CREATE UNIQUE INDEX IF NOT EXISTS idx_books_content_hash ON books(content_hash);
CREATE INDEX IF NOT EXISTS idx_books_format ON books(format);
CREATE INDEX IF NOT EXISTS idx_books_created ON books(created_at);
"#;
