/*!
Database interaction module.

The Postgres database to which this connects is meant to have the following
tables.

```sql
CREATE TABLE courses (
    id   BIGSERIAL PRIMARY KEY,
    code TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE users (
    uname      TEXT PRIMARY KEY,
    role       TEXT NOT NULL,   /* one of { 'Admin', 'Faculty', 'Student' } */
    hash       TEXT NOT NULL,
    email      TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name  TEXT NOT NULL,
    active     BOOLEAN NOT NULL
);

CREATE TABLE faculty (
    uname      TEXT PRIMARY KEY REFERENCES users(uname) ON DELETE CASCADE,
    department TEXT
);

CREATE TABLE students (
    uname  TEXT PRIMARY KEY REFERENCES users(uname) ON DELETE CASCADE,
    course BIGINT REFERENCES courses(id) ON DELETE SET NULL
);

CREATE TABLE registration_requests (
    id         BIGSERIAL PRIMARY KEY,
    uname      TEXT NOT NULL,
    hash       TEXT NOT NULL,
    email      TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name  TEXT NOT NULL,
    role       TEXT NOT NULL,
    created    TIMESTAMPTZ NOT NULL DEFAULT now()
);
```
*/
use std::fmt::Write;

use tokio_postgres::{Client, NoTls};

mod courses;
mod requests;
mod users;

pub use requests::Approval;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'courses'",
        "CREATE TABLE courses (
            id   BIGSERIAL PRIMARY KEY,
            code TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL
        )",
        "DROP TABLE courses",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'users'",
        "CREATE TABLE users (
            uname      TEXT PRIMARY KEY,
            role       TEXT NOT NULL,
            hash       TEXT NOT NULL,
            email      TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name  TEXT NOT NULL,
            active     BOOLEAN NOT NULL
        )",
        "DROP TABLE users",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'faculty'",
        "CREATE TABLE faculty (
            uname      TEXT PRIMARY KEY REFERENCES users(uname) ON DELETE CASCADE,
            department TEXT
        )",
        "DROP TABLE faculty",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'students'",
        "CREATE TABLE students (
            uname  TEXT PRIMARY KEY REFERENCES users(uname) ON DELETE CASCADE,
            course BIGINT REFERENCES courses(id) ON DELETE SET NULL
        )",
        "DROP TABLE students",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'registration_requests'",
        "CREATE TABLE registration_requests (
            id         BIGSERIAL PRIMARY KEY,
            uname      TEXT NOT NULL,
            hash       TEXT NOT NULL,
            email      TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name  TEXT NOT NULL,
            role       TEXT NOT NULL,
            created    TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "DROP TABLE registration_requests",
    ),
];

#[derive(Debug, PartialEq)]
pub struct DbError(String);

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }

    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            // Writing to a String can't fail.
            let _ = write!(&mut s, "; {}", dbe);
        }
        DbError(s)
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError(s) }
}

#[derive(Debug)]
pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err.display());
            }
        }

        log::trace!("    ....nuking complete.");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: campus_test
    password: campus_test

    with write access to:

    database: campus_test
    ```

    They are ignored by default; run them with

    ```bash
    cargo test -- --ignored
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    pub static TEST_CONNECTION: &str = "host=localhost user=campus_test password='campus_test' dbname=campus_test";

    /**
    This function is for getting the database back in a blank slate state if
    a test panics partway through and leaves it munged.

    ```bash
    cargo test reset_store -- --ignored
    ```
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_store() {
        ensure_logging();
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn create_store() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        // Idempotent.
        db.ensure_db_schema().await.unwrap();
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_database_is_an_error() {
        ensure_logging();
        let db = Store::new("host=127.0.0.1 port=1 user=nobody dbname=nothing connect_timeout=2".to_owned());
        let e = db.ensure_db_schema().await.unwrap_err();
        assert!(e.display().starts_with("Unable to connect"));
    }
}
