use crate::util::ConfError;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stuff the app needs that's sourced from configuration.
#[derive(Clone, Debug)]
pub struct BookConfig {
    /// Default tracing filter, used when RUST_LOG isn't set.
    pub log_filter: String,
    /// Whether to check the integrity of database migrations instead of
    /// applying pending ones during startup.
    pub validate_migrations: bool,
    /// Connection parameters for the books database.
    pub database: DbParams,
}

/// The `database.url` / `database.user` / `database.password` triple.
/// Sqlite doesn't do accounts, so user and password only get carried
/// around and logged.
#[derive(Clone, PartialEq, Eq)]
pub struct DbParams {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DbParams {
    /// Params for a private in-memory database. Mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            user: None,
            password: None,
        }
    }
}

// Keep the password out of the logs.
impl fmt::Debug for DbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbParams")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The intermediate struct used for deserializing the config file and
/// generating a usable BookConfig struct.
#[derive(Debug, Deserialize)]
struct PreBookConfig {
    #[serde(default = "default_log_filter")]
    log_filter: String,
    #[serde(default)]
    validate_migrations: bool,
    database: PreDbParams,
}

#[derive(Debug, Deserialize)]
struct PreDbParams {
    url: String,
    user: Option<String>,
    password: Option<String>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl PreBookConfig {
    fn finalize(self, base_dir: &Path) -> Result<BookConfig, ConfError> {
        let url = resolve_sqlite_url(&self.database.url, base_dir)?;
        let Self {
            log_filter,
            validate_migrations,
            database: PreDbParams { user, password, .. },
        } = self;
        Ok(BookConfig {
            log_filter,
            validate_migrations,
            database: DbParams {
                url,
                user,
                password,
            },
        })
    }
}

// sqlx percent-decodes the database path and splits it at the first '?',
// so anything in a joined directory name that would trip either gets escaped.
const SQLITE_PATH: AsciiSet = CONTROLS.add(b' ').add(b'%').add(b'?').add(b'#');

/// Only sqlite urls are allowed. Relative database file paths get joined onto
/// the config file's directory; in-memory and absolute paths pass through.
fn resolve_sqlite_url(url: &str, base_dir: &Path) -> Result<String, ConfError> {
    let rest = url
        .strip_prefix("sqlite:")
        .ok_or_else(|| ConfError::UnsupportedUrl(url.to_string()))?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, params) = match rest.split_once('?') {
        Some((path, params)) => (path, Some(params)),
        None => (rest, None),
    };
    if path.is_empty() || path == ":memory:" || Path::new(path).is_absolute() {
        return Ok(url.to_string());
    }
    let joined = base_dir.join(path);
    let mut resolved = format!(
        "sqlite://{}",
        utf8_percent_encode(&joined.to_string_lossy(), &SQLITE_PATH)
    );
    if let Some(params) = params {
        resolved.push('?');
        resolved.push_str(params);
    }
    Ok(resolved)
}

impl BookConfig {
    /// Load app configuration from a config file. The provided path can be absolute
    /// or relative to the current working directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfError> {
        let abs_path: PathBuf = match std::env::current_dir() {
            Ok(cwd) => cwd.join(path.as_ref()),
            Err(source) => {
                return Err(ConfError::Read {
                    path: path.as_ref().to_path_buf(),
                    source,
                })
            }
        };
        let base_dir = abs_path.parent().ok_or(ConfError::Impossible)?;
        let conf_text = std::fs::read_to_string(&abs_path).map_err(|source| ConfError::Read {
            path: abs_path.clone(),
            source,
        })?;
        let pre: PreBookConfig = toml::from_str(&conf_text).map_err(|source| ConfError::Parse {
            path: abs_path.clone(),
            source,
        })?;
        pre.finalize(base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_conf(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("bookmanager.toml");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn loads_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            dir.path(),
            r#"
                log_filter = "bookmanager=debug"
                validate_migrations = true

                [database]
                url = "sqlite::memory:"
                user = "reader"
                password = "hunter2"
            "#,
        );
        let conf = BookConfig::load(&path).unwrap();
        assert_eq!(conf.log_filter, "bookmanager=debug");
        assert!(conf.validate_migrations);
        assert_eq!(conf.database.url, "sqlite::memory:");
        assert_eq!(conf.database.user.as_deref(), Some("reader"));
        assert_eq!(conf.database.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn defaults_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            dir.path(),
            r#"
                [database]
                url = "sqlite:data/books.db?mode=rwc"
            "#,
        );
        let conf = BookConfig::load(&path).unwrap();
        assert_eq!(conf.log_filter, "info");
        assert!(!conf.validate_migrations);
        assert_eq!(conf.database.user, None);
        let expected = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("data/books.db").display()
        );
        assert_eq!(conf.database.url, expected);
    }

    #[tokio::test]
    async fn relative_paths_survive_odd_directory_names() {
        let dir = tempfile::tempdir().unwrap();
        let conf_dir = dir.path().join("my%41 books?#");
        std::fs::create_dir(&conf_dir).unwrap();
        let path = write_conf(&conf_dir, "[database]\nurl = \"sqlite:books.db\"\n");

        let conf = BookConfig::load(&path).unwrap();
        assert!(conf.database.url.contains("my%2541%20books%3F%23"));

        let mut session = crate::db::Session::with_params(conf.database);
        session.open_connection().await.unwrap();
        session.close_connection().await.unwrap();
        assert!(conf_dir.join("books.db").exists());
    }

    #[test]
    fn absolute_paths_pass_through() {
        let base = Path::new("/srv/books");
        assert_eq!(
            resolve_sqlite_url("sqlite:///var/lib/books.db", base).unwrap(),
            "sqlite:///var/lib/books.db"
        );
        assert_eq!(
            resolve_sqlite_url("sqlite::memory:", base).unwrap(),
            "sqlite::memory:"
        );
    }

    #[test]
    fn rejects_other_databases() {
        let err = resolve_sqlite_url("mysql://localhost/books", Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfError::UnsupportedUrl(_)));
    }

    #[test]
    fn missing_file_and_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let err = BookConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfError::Read { .. }));

        let path = write_conf(dir.path(), "[database]\nuser = \"no url\"\n");
        let err = BookConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfError::Parse { .. }));
    }

    #[test]
    fn debug_hides_password() {
        let params = DbParams {
            url: "sqlite::memory:".to_string(),
            user: Some("reader".to_string()),
            password: Some("hunter2".to_string()),
        };
        let printed = format!("{:?}", params);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
