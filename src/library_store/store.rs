//! SQLite store for book records.

use super::models::{Book, InsertResult};
use super::schema::LIBRARY_SCHEMA_SQL;
use crate::format::BookFormat;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for library storage operations.
pub trait LibraryStore: Send + Sync {
    /// Insert a new book. A unique-constraint violation on the content hash
    /// is re-interpreted as a late-detected duplicate, never surfaced as a
    /// generic failure.
    fn insert_book(&self, book: &Book) -> Result<InsertResult>;

    /// Get a book by ID.
    fn get_book(&self, id: &str) -> Result<Option<Book>>;

    /// Look a book up by its content hash.
    fn find_by_hash(&self, content_hash: &str) -> Result<Option<Book>>;

    /// Update a book record (full row, keyed by ID).
    fn update_book(&self, book: &Book) -> Result<()>;

    /// Delete a book record.
    fn delete_book(&self, id: &str) -> Result<()>;

    /// List books, newest first.
    fn list_books(&self, limit: usize) -> Result<Vec<Book>>;
}

/// SQLite implementation of LibraryStore.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    /// Open or create a library database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open library database: {:?}", path))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(LIBRARY_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(LIBRARY_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_book(row: &rusqlite::Row) -> rusqlite::Result<Book> {
        let authors: Vec<String> = row
            .get::<_, String>("authors")
            .map(|raw| serde_json::from_str(&raw).unwrap_or_default())?;

        Ok(Book {
            id: row.get("id")?,
            filename: row.get("filename")?,
            format: BookFormat::parse(&row.get::<_, String>("format")?)
                .unwrap_or(BookFormat::Epub),
            size_bytes: row.get("size_bytes")?,
            content_hash: row.get("content_hash")?,
            file_path: row.get("file_path")?,
            title: row.get("title")?,
            subtitle: row.get("subtitle")?,
            authors,
            publisher: row.get("publisher")?,
            description: row.get("description")?,
            language: row.get("language")?,
            isbn10: row.get("isbn10")?,
            isbn13: row.get("isbn13")?,
            page_count: row.get("page_count")?,
            published_date: row.get("published_date")?,
            cover_path: row.get("cover_path")?,
            placeholder_color: row.get("placeholder_color")?,
            fulltext_indexed: row.get::<_, i64>("fulltext_indexed")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn insert_book(&self, book: &Book) -> Result<InsertResult> {
        let conn = self.conn.lock().unwrap();
        let authors = serde_json::to_string(&book.authors)?;

        let result = conn.execute(
            "INSERT INTO books (
                id, filename, format, size_bytes, content_hash, file_path,
                title, subtitle, authors, publisher, description, language,
                isbn10, isbn13, page_count, published_date,
                cover_path, placeholder_color, fulltext_indexed,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                      ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                book.id,
                book.filename,
                book.format.as_str(),
                book.size_bytes,
                book.content_hash,
                book.file_path,
                book.title,
                book.subtitle,
                authors,
                book.publisher,
                book.description,
                book.language,
                book.isbn10,
                book.isbn13,
                book.page_count,
                book.published_date,
                book.cover_path,
                book.placeholder_color,
                book.fulltext_indexed as i64,
                book.created_at,
                book.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(InsertResult::Inserted),
            Err(err) if Self::is_unique_violation(&err) => {
                // Two concurrent uploads of identical bytes both passed the
                // pre-insert hash check; the loser lands here.
                let existing_id: Option<String> = conn
                    .query_row(
                        "SELECT id FROM books WHERE content_hash = ?1",
                        params![book.content_hash],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing_id {
                    Some(existing_id) => Ok(InsertResult::DuplicateHash { existing_id }),
                    None => Err(err).context("Unique violation without a matching record"),
                }
            }
            Err(err) => Err(err).context("Failed to insert book"),
        }
    }

    fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM books WHERE id = ?1",
            params![id],
            Self::row_to_book,
        )
        .optional()
        .context("Failed to get book")
    }

    fn find_by_hash(&self, content_hash: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM books WHERE content_hash = ?1",
            params![content_hash],
            Self::row_to_book,
        )
        .optional()
        .context("Failed to look up book by hash")
    }

    fn update_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let authors = serde_json::to_string(&book.authors)?;
        conn.execute(
            "UPDATE books SET
                filename = ?2, format = ?3, size_bytes = ?4, file_path = ?5,
                title = ?6, subtitle = ?7, authors = ?8, publisher = ?9,
                description = ?10, language = ?11, isbn10 = ?12, isbn13 = ?13,
                page_count = ?14, published_date = ?15, cover_path = ?16,
                placeholder_color = ?17, fulltext_indexed = ?18, updated_at = ?19
             WHERE id = ?1",
            params![
                book.id,
                book.filename,
                book.format.as_str(),
                book.size_bytes,
                book.file_path,
                book.title,
                book.subtitle,
                authors,
                book.publisher,
                book.description,
                book.language,
                book.isbn10,
                book.isbn13,
                book.page_count,
                book.published_date,
                book.cover_path,
                book.placeholder_color,
                book.fulltext_indexed as i64,
                book.updated_at,
            ],
        )
        .context("Failed to update book")?;
        Ok(())
    }

    fn delete_book(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM books WHERE id = ?1", params![id])
            .context("Failed to delete book")?;
        Ok(())
    }

    fn list_books(&self, limit: usize) -> Result<Vec<Book>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM books ORDER BY created_at DESC LIMIT ?1")?;
        let books = stmt
            .query_map(params![limit], Self::row_to_book)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list books")?;
        Ok(books)
    }
}
