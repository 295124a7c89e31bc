//! User store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist changesets against the composed host table.
//! - Report unique violations as changeset errors when declared.
//!
//! # Invariants
//! - Invalid changesets are never written.
//! - Every written value matches its host field type.
//! - Updates apply only while every changeset precondition still holds.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::changeset::{Changeset, ErrorKind, Precondition, MESSAGE_TAKEN};
use crate::db::{quote_ident, DbError};
use crate::model::user::{now_epoch_ms, User, UserId, FIELD_INSERTED_AT, FIELD_UPDATED_AT};
use crate::schema::host::{HostDefinition, PRIMARY_KEY};
use crate::schema::{FieldType, FieldValue};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Storage transport and data errors.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(UserId),
    InvalidData(String),
    /// Query names a field the host does not declare.
    UnknownField(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
            Self::UnknownField(field) => write!(f, "query field is not declared: {field}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Write failure: either a rejected changeset or a storage error.
#[derive(Debug)]
pub enum WriteError {
    /// Changeset carrying every validation and constraint error.
    Invalid(Box<Changeset>),
    Repo(RepoError),
}

impl WriteError {
    pub fn changeset(&self) -> Option<&Changeset> {
        match self {
            Self::Invalid(changeset) => Some(changeset),
            Self::Repo(_) => None,
        }
    }
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(changeset) => {
                let errors: Vec<String> = changeset.errors().iter().map(|e| e.to_string()).collect();
                write!(f, "changeset is invalid: {}", errors.join("; "))
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for WriteError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for WriteError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Conjunction of field equality clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserQuery {
    clauses: Vec<(String, FieldValue)>,
}

impl UserQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field = value`; `Null` matches `IS NULL`.
    pub fn eq(mut self, field: &str, value: FieldValue) -> Self {
        self.clauses.push((field.to_string(), value));
        self
    }

    pub fn clauses(&self) -> &[(String, FieldValue)] {
        &self.clauses
    }
}

/// Storage collaborator for host users.
pub trait UserStore {
    fn insert(&self, changeset: Changeset) -> Result<User, WriteError>;
    fn update(&self, changeset: Changeset) -> Result<User, WriteError>;
    fn get_by(&self, query: &UserQuery) -> RepoResult<Option<User>>;

    fn get(&self, id: UserId) -> RepoResult<Option<User>> {
        self.get_by(&UserQuery::new().eq(PRIMARY_KEY, FieldValue::Id(id)))
    }
}

/// SQLite-backed user store over the composed host table.
pub struct SqliteUserRepository<'a> {
    conn: &'a Connection,
    host: &'a HostDefinition,
}

impl<'a> SqliteUserRepository<'a> {
    /// `conn` must already carry the host schema (see `db::open_db`).
    pub fn new(conn: &'a Connection, host: &'a HostDefinition) -> Self {
        Self { conn, host }
    }

    /// Adds an `Invalid` error for every change or precondition the host
    /// cannot store.
    fn check_changes(&self, changeset: Changeset) -> Changeset {
        let checked = changeset.changes().iter().chain(
            changeset
                .preconditions()
                .iter()
                .map(|precondition| (&precondition.field, &precondition.expected)),
        );
        let mismatches: Vec<(String, String)> = checked
            .filter_map(|(field, value)| match self.host.field(field) {
                None => Some((field.clone(), format!("is not a field of {}", self.host.entity))),
                Some(spec) if !value.fits(spec.field_type) => {
                    Some((field.clone(), "is invalid".to_string()))
                }
                Some(_) => None,
            })
            .collect();

        mismatches
            .into_iter()
            .fold(changeset, |changeset, (field, message)| {
                changeset.add_error(&field, message, ErrorKind::Invalid)
            })
    }

    fn prepare_write(&self, changeset: Changeset) -> Result<Changeset, WriteError> {
        if !changeset.is_valid() {
            return Err(WriteError::Invalid(Box::new(changeset)));
        }
        let changeset = self.check_changes(changeset);
        if !changeset.is_valid() {
            return Err(WriteError::Invalid(Box::new(changeset)));
        }
        Ok(changeset)
    }

    /// Maps a declared unique violation to a changeset error.
    fn write_failure(&self, changeset: Changeset, err: rusqlite::Error) -> WriteError {
        if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
            if failure.code == ErrorCode::ConstraintViolation {
                if let Some(field) = unique_violation_field(message, &self.host.table) {
                    if changeset.has_unique_constraint(&field) {
                        warn!(
                            "event=user_write module=repo status=rejected error_code=unique_violation field={field}"
                        );
                        return WriteError::Invalid(Box::new(changeset.add_error(
                            &field,
                            MESSAGE_TAKEN,
                            ErrorKind::Unique,
                        )));
                    }
                }
            }
        }
        WriteError::Repo(err.into())
    }

    /// Keeps only host-declared fields, filling absent ones with defaults.
    fn project(&self, user: User) -> User {
        let mut projected = User::new(user.id);
        for field in &self.host.fields {
            let value = user
                .fields
                .get(&field.name)
                .cloned()
                .unwrap_or_else(|| field.default.clone());
            projected.set(&field.name, value);
        }
        projected
    }

    /// Changeset error for an update whose preconditions no longer hold.
    fn stale_write(&self, changeset: Changeset, stored: &User) -> WriteError {
        let preconditions = changeset.preconditions();
        let mut failed: Vec<&Precondition> = preconditions
            .iter()
            .filter(|precondition| stored.get(&precondition.field) != &precondition.expected)
            .collect();
        if failed.is_empty() {
            // Row changed back between the write and this read.
            failed = preconditions.iter().collect();
        }
        let failed: Vec<(String, String)> = failed
            .into_iter()
            .map(|precondition| (precondition.field.clone(), precondition.message.clone()))
            .collect();
        warn!(
            "event=user_write module=repo status=rejected error_code=precondition_failed fields={}",
            failed
                .iter()
                .map(|(field, _)| field.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        let changeset = failed
            .into_iter()
            .fold(changeset, |changeset, (field, message)| {
                changeset.add_error(&field, message, ErrorKind::Invalid)
            });
        WriteError::Invalid(Box::new(changeset))
    }

    fn select_sql(&self) -> String {
        let columns: Vec<String> = std::iter::once(PRIMARY_KEY)
            .chain(self.host.fields.iter().map(|field| field.name.as_str()))
            .map(quote_ident)
            .collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(&self.host.table)
        )
    }

    fn is_queryable(&self, field: &str) -> bool {
        field == PRIMARY_KEY || self.host.has_field(field)
    }

    fn parse_user_row(&self, row: &Row<'_>) -> RepoResult<User> {
        let id_text: String = row.get(0)?;
        let id = parse_uuid(&id_text, &self.host.table, PRIMARY_KEY)?;

        let mut user = User::new(id);
        for (offset, field) in self.host.fields.iter().enumerate() {
            let column = offset + 1;
            let value = match field.field_type {
                FieldType::String => row
                    .get::<_, Option<String>>(column)?
                    .map_or(FieldValue::Null, FieldValue::String),
                FieldType::Integer => row
                    .get::<_, Option<i64>>(column)?
                    .map_or(FieldValue::Null, FieldValue::Integer),
                FieldType::UtcDatetime => row
                    .get::<_, Option<i64>>(column)?
                    .map_or(FieldValue::Null, FieldValue::UtcDatetime),
                FieldType::Boolean => match row.get::<_, Option<i64>>(column)? {
                    None => FieldValue::Null,
                    Some(0) => FieldValue::Boolean(false),
                    Some(1) => FieldValue::Boolean(true),
                    Some(other) => {
                        return Err(RepoError::InvalidData(format!(
                            "invalid boolean value `{other}` in {}.{}",
                            self.host.table, field.name
                        )));
                    }
                },
                FieldType::Id => match row.get::<_, Option<String>>(column)? {
                    None => FieldValue::Null,
                    Some(text) => FieldValue::Id(parse_uuid(&text, &self.host.table, &field.name)?),
                },
            };
            user.set(&field.name, value);
        }
        Ok(user)
    }
}

impl UserStore for SqliteUserRepository<'_> {
    fn insert(&self, changeset: Changeset) -> Result<User, WriteError> {
        let changeset = self.prepare_write(changeset)?;

        let mut user = changeset
            .data()
            .cloned()
            .unwrap_or_else(|| User::blank(self.host));
        for (field, value) in changeset.changes() {
            user.set(field, value.clone());
        }
        let now = now_epoch_ms();
        user.set(FIELD_INSERTED_AT, FieldValue::UtcDatetime(now));
        user.set(FIELD_UPDATED_AT, FieldValue::UtcDatetime(now));
        let user = self.project(user);

        let mut columns = vec![quote_ident(PRIMARY_KEY)];
        let mut values = vec![Value::Text(user.id.to_string())];
        for field in &self.host.fields {
            columns.push(quote_ident(&field.name));
            values.push(to_sql_value(user.get(&field.name)));
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            quote_ident(&self.host.table),
            columns.join(", "),
            placeholders.join(", ")
        );

        if let Err(err) = self.conn.execute(&sql, params_from_iter(values)) {
            return Err(self.write_failure(changeset, err));
        }
        Ok(user)
    }

    fn update(&self, changeset: Changeset) -> Result<User, WriteError> {
        let changeset = self.prepare_write(changeset)?;
        let Some(current) = changeset.data().cloned() else {
            return Err(WriteError::Repo(RepoError::InvalidData(
                "update requires a loaded user".to_string(),
            )));
        };
        if changeset.changes().is_empty() {
            return Ok(current);
        }

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for (field, value) in changeset.changes() {
            if field == FIELD_UPDATED_AT {
                continue;
            }
            values.push(to_sql_value(value));
            assignments.push(format!("{} = ?{}", quote_ident(field), values.len()));
        }
        let updated_at = now_epoch_ms();
        values.push(Value::Integer(updated_at));
        assignments.push(format!("{} = ?{}", quote_ident(FIELD_UPDATED_AT), values.len()));
        values.push(Value::Text(current.id.to_string()));
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(&self.host.table),
            assignments.join(", "),
            quote_ident(PRIMARY_KEY),
            values.len()
        );
        for precondition in changeset.preconditions() {
            let column = quote_ident(&precondition.field);
            if precondition.expected.is_null() {
                sql.push_str(&format!(" AND {column} IS NULL"));
            } else {
                values.push(to_sql_value(&precondition.expected));
                sql.push_str(&format!(" AND {column} = ?{}", values.len()));
            }
        }
        sql.push(';');

        let changed = match self.conn.execute(&sql, params_from_iter(values)) {
            Ok(changed) => changed,
            Err(err) => return Err(self.write_failure(changeset, err)),
        };
        if changed == 0 {
            return match self.get(current.id)? {
                Some(stored) if !changeset.preconditions().is_empty() => {
                    Err(self.stale_write(changeset, &stored))
                }
                _ => Err(RepoError::NotFound(current.id).into()),
            };
        }

        let mut user = changeset.apply_changes().unwrap_or(current);
        user.set(FIELD_UPDATED_AT, FieldValue::UtcDatetime(updated_at));
        Ok(self.project(user))
    }

    fn get_by(&self, query: &UserQuery) -> RepoResult<Option<User>> {
        let mut sql = format!("{} WHERE 1 = 1", self.select_sql());
        let mut values = Vec::new();
        for (field, value) in query.clauses() {
            if !self.is_queryable(field) {
                return Err(RepoError::UnknownField(field.clone()));
            }
            let column = quote_ident(field);
            if value.is_null() {
                sql.push_str(&format!(" AND {column} IS NULL"));
            } else {
                values.push(to_sql_value(value));
                sql.push_str(&format!(" AND {column} = ?{}", values.len()));
            }
        }
        sql.push_str(" LIMIT 2;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let user = self.parse_user_row(row)?;
        if rows.next()?.is_some() {
            return Err(RepoError::InvalidData(format!(
                "query matched more than one row in {}",
                self.host.table
            )));
        }
        Ok(Some(user))
    }
}

/// Extracts the first column from `UNIQUE constraint failed: <table>.<col>`.
fn unique_violation_field(message: &str, table: &str) -> Option<String> {
    let columns = message.strip_prefix("UNIQUE constraint failed: ")?;
    let first = columns.split(", ").next()?;
    first
        .strip_prefix(table)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(str::to_string)
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::String(text) => Value::Text(text.clone()),
        FieldValue::Integer(number) | FieldValue::UtcDatetime(number) => Value::Integer(*number),
        FieldValue::Boolean(flag) => Value::Integer(i64::from(*flag)),
        FieldValue::Id(id) => Value::Text(id.to_string()),
    }
}

fn parse_uuid(text: &str, table: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{text}` in {table}.{column}"))
    })
}
