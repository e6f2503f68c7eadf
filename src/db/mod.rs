//! A [Session] owns the connection, a [SqliteBookDao] owns the session, and
//! everything above that only ever sees the [BookDao] trait. So it's like
//! `SqliteBookDao::new(session).get_by_author("Le Guin")`. Seems ok.
mod books;
mod core;
mod migrations;

pub use self::books::{Book, BookDao, BookFilter, SqliteBookDao};
pub use self::core::Session;
pub use self::migrations::{MigrationError, Migrations};
