pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS people (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    main_image  BLOB NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id          INTEGER PRIMARY KEY,
    person_id   INTEGER NOT NULL REFERENCES people(id),
    image       BLOB NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_person ON images(person_id);
CREATE INDEX IF NOT EXISTS idx_people_name ON people(name);
"#;

/// Tables that must exist before any command other than init can run.
pub(crate) const TABLES: [&str; 2] = ["people", "images"];
