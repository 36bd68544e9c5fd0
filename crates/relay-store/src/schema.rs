/// SQL DDL for the participant directory.
pub const SCHEMA_VERSION: u32 = 1;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
"#;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    questions TEXT
);

CREATE TABLE IF NOT EXISTS doctors (
    account_id INTEGER PRIMARY KEY REFERENCES accounts(id),
    department_id INTEGER REFERENCES departments(id)
);

CREATE TABLE IF NOT EXISTS cases (
    id INTEGER PRIMARY KEY,
    patient_id INTEGER NOT NULL REFERENCES accounts(id),
    date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_patient_date ON cases(patient_id, date);
"#;
