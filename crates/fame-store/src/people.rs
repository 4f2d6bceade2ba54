//! SQLite-backed person repository.

use chrono::Utc;
use fame_core::{ImageRef, Person, PersonRepository, RepositoryError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

pub struct SqlitePersonRepository {
    conn: Connection,
}

impl SqlitePersonRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "opened person database");
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS people (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              image_ref TEXT,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_people_name ON people(name);
            "#,
        )
        .map_err(backend)?;
        Ok(Self { conn })
    }
}

impl PersonRepository for SqlitePersonRepository {
    fn create(
        &mut self,
        id: Uuid,
        name: &str,
        image: Option<ImageRef>,
    ) -> Result<Person, RepositoryError> {
        self.conn
            .execute(
                "INSERT INTO people (id, name, image_ref, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    name,
                    image.as_ref().map(ImageRef::as_str),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(backend)?;
        tracing::debug!(%id, name, "person created");
        Ok(Person {
            id,
            name: name.to_string(),
            image,
        })
    }

    fn get(&self, id: Uuid) -> Result<Option<Person>, RepositoryError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, image_ref FROM people WHERE id = ?1",
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(backend)?;
        row.map(into_person).transpose()
    }

    fn list(&self) -> Result<Vec<Person>, RepositoryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, image_ref FROM people ORDER BY name ASC, id ASC")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(into_person).collect()
    }

    fn update(&mut self, id: Uuid, name: &str) -> Result<Person, RepositoryError> {
        let changed = self
            .conn
            .execute(
                "UPDATE people SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        tracing::debug!(%id, name, "person renamed");
        self.get(id)?.ok_or(RepositoryError::NotFound(id))
    }

    fn delete(&mut self, id: Uuid) -> Result<(), RepositoryError> {
        let changed = self
            .conn
            .execute("DELETE FROM people WHERE id = ?1", params![id.to_string()])
            .map_err(backend)?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        tracing::debug!(%id, "person deleted");
        Ok(())
    }
}

type PersonRow = (String, String, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<PersonRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_person((id, name, image_ref): PersonRow) -> Result<Person, RepositoryError> {
    let id = Uuid::parse_str(&id).map_err(backend)?;
    Ok(Person {
        id,
        name,
        image: image_ref.map(ImageRef::new),
    })
}

fn backend<E>(e: E) -> RepositoryError
where
    E: std::error::Error + Send + Sync + 'static,
{
    RepositoryError::Backend(Box::new(e))
}
