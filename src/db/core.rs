use crate::config::{BookConfig, DbParams};
use crate::util::{ConfError, DbError};
use sqlx::{
    query,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
    Connection, SqliteConnection,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the one live connection to the books database, plus the parameters
/// needed to (re)open it. Hand it to a DAO and let the DAO drive it; nothing
/// in here is shared between threads.
#[derive(Debug)]
pub struct Session {
    config_file: Option<PathBuf>,
    params: Option<DbParams>,
    conn: Option<SqliteConnection>,
    auto_commit: bool,
}

impl Session {
    /// A session that reads its connection params from the config file the
    /// first time it needs to connect.
    pub fn from_config_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_file: Some(path.into()),
            params: None,
            conn: None,
            auto_commit: true,
        }
    }

    /// A session with its connection params already in hand.
    pub fn with_params(params: DbParams) -> Self {
        Self {
            config_file: None,
            params: Some(params),
            conn: None,
            auto_commit: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn params(&mut self) -> Result<&DbParams, DbError> {
        if self.params.is_none() {
            let path = self.config_file.as_ref().ok_or(ConfError::Impossible)?;
            info!(?path, "loading database properties");
            let conf = BookConfig::load(path)?;
            self.params = Some(conf.database);
        }
        self.params.as_ref().ok_or(ConfError::Impossible.into())
    }

    /// Return the open connection, connecting first if there isn't one.
    #[tracing::instrument(skip_all)]
    pub async fn open_connection(&mut self) -> Result<&mut SqliteConnection, DbError> {
        if self.conn.is_none() {
            let params = self.params()?.clone();
            info!(url = %params.url, user = ?params.user, "opening database connection");
            let conn = connect(&params.url).await.map_err(|source| DbError::Connect {
                url: params.url.clone(),
                source,
            })?;
            self.conn = Some(conn);
            self.auto_commit = true;
        }
        self.conn.as_mut().ok_or(DbError::NotConnected)
    }

    /// The open connection, without trying to open one.
    pub fn connection(&mut self) -> Result<&mut SqliteConnection, DbError> {
        self.conn.as_mut().ok_or(DbError::NotConnected)
    }

    /// Close the connection if there is one. Anything uncommitted gets
    /// rolled back by sqlite.
    #[tracing::instrument(skip_all)]
    pub async fn close_connection(&mut self) -> Result<(), DbError> {
        self.auto_commit = true;
        match self.conn.take() {
            Some(conn) => {
                conn.close().await?;
                info!("database connection closed");
            }
            None => debug!("no open database connection to close"),
        }
        Ok(())
    }

    /// Same deal as JDBC: switching auto-commit off starts a transaction, and
    /// switching it back on commits whatever's pending.
    pub async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DbError> {
        if self.auto_commit == auto_commit {
            return Ok(());
        }
        let conn = self.connection()?;
        let stmt = if auto_commit { "COMMIT" } else { "BEGIN" };
        query(stmt).execute(&mut *conn).await?;
        self.auto_commit = auto_commit;
        debug!(auto_commit, "switched commit mode");
        Ok(())
    }

    /// Commit the current unit of work and start the next one. Does nothing
    /// in auto-commit mode.
    pub async fn commit(&mut self) -> Result<(), DbError> {
        if self.auto_commit {
            return Ok(());
        }
        let conn = self.connection()?;
        query("COMMIT").execute(&mut *conn).await?;
        query("BEGIN").execute(&mut *conn).await?;
        Ok(())
    }

    /// Throw away the current unit of work and start the next one. Does
    /// nothing in auto-commit mode.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        if self.auto_commit {
            return Ok(());
        }
        let conn = self.connection()?;
        // Some sqlite errors already roll the transaction back on their own,
        // in which case there's nothing left to roll back.
        if let Err(e) = query("ROLLBACK").execute(&mut *conn).await {
            warn!(error = %e, "rollback found no open transaction");
        }
        query("BEGIN").execute(&mut *conn).await?;
        Ok(())
    }
}

async fn connect(url: &str) -> Result<SqliteConnection, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .synchronous(SqliteSynchronous::Normal) // usually fine w/ wal
        .foreign_keys(true);
    SqliteConnection::connect_with(&opts).await
}

// Test stuff, kept a lil separate from the main stuff.
impl Session {
    /// A fresh in-memory database with the schema applied, already connected.
    #[cfg(test)]
    pub async fn new_test_session() -> Self {
        let mut session = Self::with_params(DbParams::in_memory());
        super::migrations::Migrations::new(&mut session)
            .run()
            .await
            .expect("sqlx-ploded during migrations");
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_params_lazily_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmanager.toml");
        let mut session = Session::from_config_file(&path);
        // The file doesn't exist yet, which is fine until we connect.
        assert!(!session.is_open());

        std::fs::write(&path, "[database]\nurl = \"sqlite::memory:\"\n").unwrap();
        session.open_connection().await.unwrap();
        assert!(session.is_open());
        session.close_connection().await.unwrap();
    }

    #[tokio::test]
    async fn missing_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::from_config_file(dir.path().join("missing.toml"));
        let err = session.open_connection().await.unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connect_error() {
        let mut session = Session::with_params(DbParams {
            url: "sqlite:///definitely/not/a/real/dir/books.db".to_string(),
            user: None,
            password: None,
        });
        let err = session.open_connection().await.unwrap_err();
        assert!(matches!(err, DbError::Connect { .. }));
    }

    #[tokio::test]
    async fn reopening_returns_the_same_connection() {
        let mut session = Session::with_params(DbParams::in_memory());
        let conn = session.open_connection().await.unwrap();
        query("CREATE TABLE scratch (x INTEGER)")
            .execute(&mut *conn)
            .await
            .unwrap();
        // A new in-memory connection wouldn't have the table.
        let conn = session.open_connection().await.unwrap();
        query("INSERT INTO scratch (x) VALUES (1)")
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closing_is_idempotent() {
        let mut session = Session::with_params(DbParams::in_memory());
        session.close_connection().await.unwrap();
        session.open_connection().await.unwrap();
        session.close_connection().await.unwrap();
        assert!(!session.is_open());
        session.close_connection().await.unwrap();
    }

    #[tokio::test]
    async fn commit_mode_needs_a_connection() {
        let mut session = Session::with_params(DbParams::in_memory());
        let err = session.set_auto_commit(false).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected));
        assert!(session.auto_commit());
    }

    #[tokio::test]
    async fn manual_commit_and_rollback() {
        let mut session = Session::new_test_session().await;
        session.set_auto_commit(false).await.unwrap();
        assert!(!session.auto_commit());
        query("INSERT INTO BOOKS (NAME, PRINT_YEAR, IS_READ) VALUES ('kept', 2000, 0)")
            .execute(session.connection().unwrap())
            .await
            .unwrap();
        session.commit().await.unwrap();
        query("INSERT INTO BOOKS (NAME, PRINT_YEAR, IS_READ) VALUES ('dropped', 2000, 0)")
            .execute(session.connection().unwrap())
            .await
            .unwrap();
        session.rollback().await.unwrap();
        session.set_auto_commit(true).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM BOOKS")
            .fetch_one(session.connection().unwrap())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn closing_restores_auto_commit() {
        let mut session = Session::new_test_session().await;
        session.set_auto_commit(false).await.unwrap();
        session.close_connection().await.unwrap();
        assert!(session.auto_commit());
    }
}
