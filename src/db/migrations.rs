use super::core::Session;
use crate::util::DbError;
use sqlx::migrate::{Migrate, Migrator};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

// A baked-in static copy of all the database migrations.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// A db helper for running and inspecting migrations. Usually you only
/// want to touch this during startup, before handing the session to a DAO.
#[derive(Debug)]
pub struct Migrations<'a> {
    session: &'a mut Session,
}

#[derive(Error, Default, Debug)]
#[error("bad migration situation: {unapplied} unapplied, {wrong_checksum} busted.")]
pub struct MigrationError {
    wrong_checksum: usize,
    unapplied: usize,
}

impl MigrationError {
    pub fn any(&self) -> bool {
        self.wrong_checksum + self.unapplied > 0
    }
}

impl<'a> Migrations<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Run any pending migrations on the database. The migrator does its
    /// own transactions, so this needs auto-commit mode.
    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) -> Result<(), DbError> {
        self.session.open_connection().await?;
        self.session.set_auto_commit(true).await?;
        let conn = self.session.connection()?;
        MIGRATOR.run(&mut *conn).await?;
        Ok(())
    }

    /// Check whether the database migrations are in a usable state: every
    /// migration we know about has to be applied with a matching checksum.
    /// Applied migrations we've never heard of only get a warning.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&mut self) -> anyhow::Result<()> {
        let conn = self.session.open_connection().await?;
        conn.ensure_migrations_table().await?;
        let mut applied_migrations: HashMap<_, _> = conn
            .list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| (m.version, m.checksum))
            .collect();

        let mut errs = MigrationError::default();
        let mut total_known = 0usize;

        for known in MIGRATOR
            .iter()
            .filter(|&m| !m.migration_type.is_down_migration())
        {
            total_known += 1;
            match applied_migrations.remove(&known.version) {
                Some(checksum) if checksum != known.checksum => errs.wrong_checksum += 1,
                Some(_) => {}
                None => errs.unapplied += 1,
            }
        }
        debug!("{} known migrations", total_known);
        if !applied_migrations.is_empty() {
            warn!(
                "{} unrecognized database migrations; are you running an old app version?",
                applied_migrations.len()
            );
        }

        if errs.any() {
            Err(errs.into())
        } else {
            Ok(())
        }
    }
}
