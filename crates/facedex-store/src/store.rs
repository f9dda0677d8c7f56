use crate::schema::{SCHEMA, TABLES};
use chrono::{SecondsFormat, Utc};
use facedex_core::{Embedding, EmbeddingError, GalleryEntry};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database is not initialized (missing table `{0}`) — run `facedex init-db` first")]
    NotInitialized(&'static str),
    #[error("database {0} does not exist — run `facedex init-db` first")]
    Missing(PathBuf),
    #[error("stored embedding {image_id} is malformed: {source}")]
    MalformedEmbedding {
        image_id: i64,
        #[source]
        source: EmbeddingError,
    },
    #[error("refusing to store an empty embedding")]
    EmptyEmbedding,
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    /// Raw bytes of the photo the person was enrolled with.
    pub main_image: Vec<u8>,
    pub created_at: String,
}

/// Person metadata without the photo, as listed by name searches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonSummary {
    pub id: i64,
    pub name: String,
    pub image_count: usize,
    pub created_at: String,
}

/// A decoded row of the `images` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub id: i64,
    pub person_id: i64,
    pub embedding: Embedding,
}

/// SQLite-backed store of people and their face embeddings.
pub struct Store {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        main_image: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn decode(image_id: i64, person_id: i64, blob: &[u8]) -> Result<StoredEmbedding, StoreError> {
    let embedding = Embedding::from_bytes(blob)
        .map_err(|source| StoreError::MalformedEmbedding { image_id, source })?;
    Ok(StoredEmbedding {
        id: image_id,
        person_id,
        embedding,
    })
}

impl Store {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "database opened");
        Self::with_connection(conn)
    }

    /// Open a database file that must already exist. Nothing is created.
    pub fn open_existing(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        tracing::debug!(path = %path.display(), "database opened");
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// Create the schema. Safe to run on an existing database.
    pub fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Fail unless [`init`](Self::init) has been run on this database.
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        for table in TABLES {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotInitialized(table));
            }
        }
        Ok(())
    }

    /// Insert a person and their embeddings in one transaction.
    pub fn add_person(
        &mut self,
        name: &str,
        main_image: &[u8],
        embeddings: &[Embedding],
    ) -> Result<Person, StoreError> {
        if embeddings.iter().any(Embedding::is_empty) {
            return Err(StoreError::EmptyEmbedding);
        }

        let created_at = now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO people (name, main_image, created_at) VALUES (?1, ?2, ?3)",
            params![name, main_image, created_at],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO images (person_id, image, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for embedding in embeddings {
                stmt.execute(params![id, embedding.to_bytes(), created_at])?;
            }
        }
        tx.commit()?;

        tracing::info!(person_id = id, name, images = embeddings.len(), "person enrolled");

        Ok(Person {
            id,
            name: name.to_string(),
            main_image: main_image.to_vec(),
            created_at,
        })
    }

    /// Append one embedding to an existing person. Returns the new image id.
    pub fn add_embedding(&self, person_id: i64, embedding: &Embedding) -> Result<i64, StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }
        self.conn.execute(
            "INSERT INTO images (person_id, image, created_at) VALUES (?1, ?2, ?3)",
            params![person_id, embedding.to_bytes(), now()],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(person_id, image_id = id, "embedding added");
        Ok(id)
    }

    pub fn person(&self, id: i64) -> Result<Option<Person>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, main_image, created_at FROM people WHERE id = ?1",
                [id],
                person_from_row,
            )
            .optional()?)
    }

    /// Every person, in enrollment order.
    pub fn people(&self) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, main_image, created_at FROM people ORDER BY id")?;
        let people = stmt
            .query_map([], person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    /// People whose name is exactly `name`, in enrollment order.
    pub fn people_named(&self, name: &str) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, main_image, created_at FROM people WHERE name = ?1 ORDER BY id",
        )?;
        let people = stmt
            .query_map([name], person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    /// Summaries of the people named `name`, with their embedding counts.
    pub fn summaries_named(&self, name: &str) -> Result<Vec<PersonSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.name, COUNT(i.id), p.created_at
            FROM people p
            LEFT JOIN images i ON i.person_id = p.id
            WHERE p.name = ?1
            GROUP BY p.id
            ORDER BY p.id
            "#,
        )?;
        let summaries = stmt
            .query_map([name], |row| {
                Ok(PersonSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image_count: row.get::<_, i64>(2)? as usize,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Number of embeddings stored for a person.
    pub fn image_count(&self, person_id: i64) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE person_id = ?1",
            [person_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// A person's embeddings in insertion order.
    ///
    /// Blobs are decoded here; a malformed one fails the whole read.
    pub fn embeddings_for(&self, person_id: i64) -> Result<Vec<StoredEmbedding>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, image FROM images WHERE person_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map([person_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, blob)| decode(*id, person_id, blob))
            .collect()
    }

    /// Every stored embedding tagged with its owner, ordered by person then image.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, person_id, image FROM images ORDER BY person_id, id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, person_id, blob)| {
                decode(*id, *person_id, blob).map(|stored| GalleryEntry {
                    owner_id: stored.person_id,
                    embedding: stored.embedding,
                })
            })
            .collect()
    }

    #[cfg(test)]
    fn raw_insert_image(&self, person_id: i64, blob: &[u8]) -> i64 {
        self.conn
            .execute(
                "INSERT INTO images (person_id, image, created_at) VALUES (?1, ?2, ?3)",
                params![person_id, blob, now()],
            )
            .unwrap();
        self.conn.last_insert_rowid()
    }
}
