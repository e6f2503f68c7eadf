use crate::db::{Book, BookDao, BookFilter};
use crate::util::DbError;

/// The front door for book operations. Doesn't do anything on its own; every
/// call goes straight through to whichever [BookDao] it's holding, which you
/// can swap out whenever (tests do).
pub struct BookService {
    dao: Box<dyn BookDao>,
}

impl BookService {
    pub fn new(dao: Box<dyn BookDao>) -> Self {
        Self { dao }
    }

    /// Swap in a different DAO, handing back the old one.
    pub fn set_dao(&mut self, dao: Box<dyn BookDao>) -> Box<dyn BookDao> {
        std::mem::replace(&mut self.dao, dao)
    }

    pub async fn add(&mut self, book: &Book) -> Result<Book, DbError> {
        self.dao.add(book).await
    }

    pub async fn add_all(&mut self, books: &[Book]) -> Result<Vec<Book>, DbError> {
        self.dao.add_all(books).await
    }

    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<Book>, DbError> {
        self.dao.get_by_id(id).await
    }

    pub async fn find(&mut self, filter: &BookFilter) -> Result<Vec<Book>, DbError> {
        self.dao.find(filter).await
    }

    pub async fn get_by_name(&mut self, name: &str) -> Result<Vec<Book>, DbError> {
        self.dao.get_by_name(name).await
    }

    pub async fn get_by_author(&mut self, author: &str) -> Result<Vec<Book>, DbError> {
        self.dao.get_by_author(author).await
    }

    pub async fn get_by_print_year(&mut self, print_year: i32) -> Result<Vec<Book>, DbError> {
        self.dao.get_by_print_year(print_year).await
    }

    pub async fn get_by_is_read(&mut self, is_read: bool) -> Result<Vec<Book>, DbError> {
        self.dao.get_by_is_read(is_read).await
    }

    pub async fn get_all(&mut self) -> Result<Vec<Book>, DbError> {
        self.dao.get_all().await
    }

    pub async fn update(&mut self, book: &Book) -> Result<u64, DbError> {
        self.dao.update(book).await
    }

    pub async fn update_all(&mut self, books: &[Book]) -> Result<u64, DbError> {
        self.dao.update_all(books).await
    }

    pub async fn remove(&mut self, book: &Book) -> Result<u64, DbError> {
        self.dao.remove(book).await
    }

    pub async fn remove_all(&mut self, books: &[Book]) -> Result<u64, DbError> {
        self.dao.remove_all(books).await
    }

    pub async fn close(&mut self) -> Result<(), DbError> {
        self.dao.close().await
    }
}
