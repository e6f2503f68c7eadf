use super::core::Session;
use crate::util::DbError;

use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::fmt;
use tracing::{debug, error};

/// Sqlite's default cap on bound parameters is generous these days, but
/// batches still get split so no single statement gets silly.
const BATCH_ROWS: usize = 500;

const BOOK_COLUMNS: &str = "ID, NAME, AUTHOR, PRINT_YEAR, IS_READ";

/// Record struct for one row of the BOOKS table. The id is assigned by the
/// database on insert; whatever a caller puts there before then is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, FromRow)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Book {
    pub id: i64,
    pub name: Option<String>,
    pub author: Option<String>,
    pub print_year: i32,
    pub is_read: bool,
}

impl Book {
    pub fn new(name: &str, author: &str, print_year: i32, is_read: bool) -> Self {
        Self {
            id: 0,
            name: Some(name.to_string()),
            author: Some(author.to_string()),
            print_year,
            is_read,
        }
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Book(id={}, name={}, author={}, printYear={}, isRead={})",
            self.id,
            self.name.as_deref().unwrap_or("null"),
            self.author.as_deref().unwrap_or("null"),
            self.print_year,
            self.is_read,
        )
    }
}

/// Which rows a read should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookFilter {
    All,
    Id(i64),
    Name(String),
    Author(String),
    PrintYear(i32),
    IsRead(bool),
}

impl BookFilter {
    /// SELECT the matching rows, oldest id first.
    fn select(&self) -> QueryBuilder<'_, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT {BOOK_COLUMNS} FROM BOOKS"));
        match self {
            BookFilter::All => {}
            BookFilter::Id(id) => {
                qb.push(" WHERE ID = ").push_bind(*id);
            }
            BookFilter::Name(name) => {
                qb.push(" WHERE NAME = ").push_bind(name.as_str());
            }
            BookFilter::Author(author) => {
                qb.push(" WHERE AUTHOR = ").push_bind(author.as_str());
            }
            BookFilter::PrintYear(year) => {
                qb.push(" WHERE PRINT_YEAR = ").push_bind(*year);
            }
            BookFilter::IsRead(is_read) => {
                qb.push(" WHERE IS_READ = ").push_bind(*is_read);
            }
        }
        qb.push(" ORDER BY ID");
        qb
    }
}

/// Everything you can do to the books table. The [BookService](crate::service::BookService)
/// holds one of these behind a box, so tests can swap in a fake.
#[async_trait]
pub trait BookDao: Send {
    /// Insert a book, returning it with its newly assigned id.
    async fn add(&mut self, book: &Book) -> Result<Book, DbError>;

    /// Insert a bunch of books in one transaction, returning them (in order)
    /// with their newly assigned ids.
    async fn add_all(&mut self, books: &[Book]) -> Result<Vec<Book>, DbError>;

    /// Returns Ok(None) if there's no such row.
    async fn get_by_id(&mut self, id: i64) -> Result<Option<Book>, DbError>;

    /// Fetch every book matching the filter.
    async fn find(&mut self, filter: &BookFilter) -> Result<Vec<Book>, DbError>;

    async fn get_by_name(&mut self, name: &str) -> Result<Vec<Book>, DbError> {
        self.find(&BookFilter::Name(name.to_string())).await
    }

    async fn get_by_author(&mut self, author: &str) -> Result<Vec<Book>, DbError> {
        self.find(&BookFilter::Author(author.to_string())).await
    }

    async fn get_by_print_year(&mut self, print_year: i32) -> Result<Vec<Book>, DbError> {
        self.find(&BookFilter::PrintYear(print_year)).await
    }

    async fn get_by_is_read(&mut self, is_read: bool) -> Result<Vec<Book>, DbError> {
        self.find(&BookFilter::IsRead(is_read)).await
    }

    async fn get_all(&mut self) -> Result<Vec<Book>, DbError> {
        self.find(&BookFilter::All).await
    }

    /// Overwrite the row with the book's id. Returns the number of rows
    /// changed, which is 0 for an unknown id.
    async fn update(&mut self, book: &Book) -> Result<u64, DbError>;

    /// Like `update`, but all-or-nothing for the whole list.
    async fn update_all(&mut self, books: &[Book]) -> Result<u64, DbError>;

    /// Delete the row with the book's id. Returns the number of rows deleted.
    async fn remove(&mut self, book: &Book) -> Result<u64, DbError>;

    /// Delete the rows with the books' ids. Returns the number of rows deleted.
    async fn remove_all(&mut self, books: &[Book]) -> Result<u64, DbError>;

    /// Let go of whatever store handle the DAO is holding.
    async fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

/// The real [BookDao], running against sqlite through a [Session] it owns.
#[derive(Debug)]
pub struct SqliteBookDao {
    session: Session,
}

impl SqliteBookDao {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Connection for a read: auto-commit on, like every read.
    async fn reader(&mut self) -> Result<&mut SqliteConnection, DbError> {
        self.session.open_connection().await?;
        self.session.set_auto_commit(true).await?;
        self.session.connection()
    }

    /// Connection for a write that needs a transaction around it. Pair with
    /// [Self::finish].
    async fn writer(&mut self) -> Result<&mut SqliteConnection, DbError> {
        self.session.open_connection().await?;
        self.session.set_auto_commit(false).await?;
        self.session.connection()
    }

    /// Commit on success; roll back on failure and hand the error back up.
    /// Either way, go back to auto-commit mode afterwards.
    async fn finish<T>(&mut self, res: Result<T, DbError>) -> Result<T, DbError> {
        let res = match res {
            Ok(val) => self.session.commit().await.map(|_| val),
            Err(e) => Err(e),
        };
        match res {
            Ok(val) => {
                self.session.set_auto_commit(true).await?;
                Ok(val)
            }
            Err(e) => {
                error!(error = %e, "write failed, rolling back");
                if let Err(rb) = self.session.rollback().await {
                    error!(error = %rb, "rollback failed too");
                }
                if let Err(ac) = self.session.set_auto_commit(true).await {
                    error!(error = %ac, "couldn't restore auto-commit after rollback");
                }
                Err(e)
            }
        }
    }
}

async fn insert_books(conn: &mut SqliteConnection, books: &[Book]) -> Result<Vec<Book>, DbError> {
    let mut inserted = Vec::with_capacity(books.len());
    for chunk in books.chunks(BATCH_ROWS) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO BOOKS (NAME, AUTHOR, PRINT_YEAR, IS_READ) ");
        qb.push_values(chunk, |mut row, book| {
            row.push_bind(book.name.as_deref())
                .push_bind(book.author.as_deref())
                .push_bind(book.print_year)
                .push_bind(book.is_read);
        });
        qb.push(format!(" RETURNING {BOOK_COLUMNS}"));
        let mut rows: Vec<Book> = qb.build_query_as().fetch_all(&mut *conn).await?;
        // RETURNING order isn't promised, but ids climb in insert order.
        rows.sort_by_key(|b| b.id);
        inserted.append(&mut rows);
    }
    Ok(inserted)
}

async fn update_books(conn: &mut SqliteConnection, books: &[Book]) -> Result<u64, DbError> {
    let mut changed = 0;
    for book in books {
        // Same SQL every time, so sqlx reuses the prepared statement.
        let res = query(
            r#"
                UPDATE BOOKS
                SET NAME = ?1, AUTHOR = ?2, PRINT_YEAR = ?3, IS_READ = ?4
                WHERE ID = ?5;
            "#,
        )
        .bind(book.name.as_deref())
        .bind(book.author.as_deref())
        .bind(book.print_year)
        .bind(book.is_read)
        .bind(book.id)
        .execute(&mut *conn)
        .await?;
        changed += res.rows_affected();
    }
    Ok(changed)
}

#[async_trait]
impl BookDao for SqliteBookDao {
    #[tracing::instrument(skip_all)]
    async fn add(&mut self, book: &Book) -> Result<Book, DbError> {
        let conn = self.writer().await?;
        let res = query_as::<_, Book>(&format!(
            "INSERT INTO BOOKS (NAME, AUTHOR, PRINT_YEAR, IS_READ) \
             VALUES (?1, ?2, ?3, ?4) RETURNING {BOOK_COLUMNS};"
        ))
        .bind(book.name.as_deref())
        .bind(book.author.as_deref())
        .bind(book.print_year)
        .bind(book.is_read)
        .fetch_one(&mut *conn)
        .await
        .map_err(DbError::from);
        self.finish(res).await
    }

    #[tracing::instrument(skip_all, fields(count = books.len()))]
    async fn add_all(&mut self, books: &[Book]) -> Result<Vec<Book>, DbError> {
        if books.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.writer().await?;
        let res = insert_books(conn, books).await;
        self.finish(res).await
    }

    #[tracing::instrument(skip_all)]
    async fn get_by_id(&mut self, id: i64) -> Result<Option<Book>, DbError> {
        let filter = BookFilter::Id(id);
        let conn = self.reader().await?;
        let book = filter
            .select()
            .build_query_as::<Book>()
            .fetch_optional(&mut *conn)
            .await?;
        Ok(book)
    }

    #[tracing::instrument(skip_all)]
    async fn find(&mut self, filter: &BookFilter) -> Result<Vec<Book>, DbError> {
        let conn = self.reader().await?;
        let books = filter
            .select()
            .build_query_as::<Book>()
            .fetch_all(&mut *conn)
            .await?;
        debug!(?filter, found = books.len(), "fetched books");
        Ok(books)
    }

    #[tracing::instrument(skip_all)]
    async fn update(&mut self, book: &Book) -> Result<u64, DbError> {
        let conn = self.writer().await?;
        let res = update_books(conn, std::slice::from_ref(book)).await;
        self.finish(res).await
    }

    #[tracing::instrument(skip_all, fields(count = books.len()))]
    async fn update_all(&mut self, books: &[Book]) -> Result<u64, DbError> {
        if books.is_empty() {
            return Ok(0);
        }
        let conn = self.writer().await?;
        let res = update_books(conn, books).await;
        self.finish(res).await
    }

    #[tracing::instrument(skip_all)]
    async fn remove(&mut self, book: &Book) -> Result<u64, DbError> {
        let conn = self.reader().await?;
        let res = query("DELETE FROM BOOKS WHERE ID = ?;")
            .bind(book.id)
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(skip_all, fields(count = books.len()))]
    async fn remove_all(&mut self, books: &[Book]) -> Result<u64, DbError> {
        if books.is_empty() {
            return Ok(0);
        }
        let conn = self.reader().await?;
        let mut removed = 0;
        for chunk in books.chunks(BATCH_ROWS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM BOOKS WHERE ID IN (");
            let mut ids = qb.separated(", ");
            for book in chunk {
                ids.push_bind(book.id);
            }
            ids.push_unseparated(")");
            removed += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(removed)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.session.close_connection().await
    }
}
