//! Common persistence contract for every broker entity.
//!
//! An entity declares its table, a human-readable class label, the SELECT that
//! materializes it, and the fields usable for natural-key lookup. On top of
//! that this module provides:
//!
//! - [`get_unique`]: natural-key lookup where any field may itself be resolved
//!   through another entity's unique lookup.
//! - [`polymorphic_subclass`]: tag to subtype resolution for closed hierarchies.
//! - Row locking through the owning [`Session`].
//! - Short and qualified labels for messages.
//!
//! Zero matches is an ordinary outcome (`None`, or `NotFound` when compelled).
//! More than one match is always an `ArgumentError`: the data broke a
//! uniqueness rule and only cleanup can fix it. Malformed calls are
//! `InternalError`.

use crate::core::error::AquilonError;
use crate::core::session::Session;
use rusqlite::Row;
use rusqlite::types::Value;

/// A searchable field of an entity.
#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    /// Column expression used in WHERE, qualified with the SELECT's alias.
    pub column: &'static str,
    /// Set when the column is a foreign key resolvable through another entity.
    pub references: Option<&'static EntityMeta>,
}

impl Field {
    pub const fn plain(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            references: None,
        }
    }

    pub const fn reference(
        name: &'static str,
        column: &'static str,
        meta: &'static EntityMeta,
    ) -> Self {
        Self {
            name,
            column,
            references: Some(meta),
        }
    }
}

/// Static description of an entity's storage.
#[derive(Debug)]
pub struct EntityMeta {
    pub table: &'static str,
    pub class_label: &'static str,
    /// `SELECT ... FROM ... [JOIN ...]` with the entity's row columns, no WHERE.
    pub select: &'static str,
    /// Column expression for the primary key, qualified like `select`.
    pub id_column: &'static str,
    pub unique_fields: &'static [Field],
    pub extra_search_fields: &'static [Field],
}

impl EntityMeta {
    fn field(&self, name: &str) -> Option<&Field> {
        self.unique_fields
            .iter()
            .chain(self.extra_search_fields.iter())
            .find(|f| f.name == name)
    }
}

/// One side of a lookup criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Value(Value),
    /// Resolve through the referenced entity's own unique lookup.
    Lookup(Vec<(&'static str, Key)>),
}

impl Key {
    pub fn null() -> Self {
        Key::Value(Value::Null)
    }

    fn describe(&self) -> String {
        match self {
            Key::Value(Value::Null) => "none".to_string(),
            Key::Value(Value::Integer(i)) => i.to_string(),
            Key::Value(Value::Real(r)) => r.to_string(),
            Key::Value(Value::Text(s)) => s.clone(),
            Key::Value(Value::Blob(_)) => "<blob>".to_string(),
            Key::Lookup(criteria) => describe_criteria(criteria),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Value(Value::Text(s.to_string()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Value(Value::Text(s))
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Value(Value::Integer(i))
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Value(Value::Integer(b as i64))
    }
}

impl<T: Into<Key>> From<Option<T>> for Key {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_else(Key::null)
    }
}

fn describe_criteria(criteria: &[(&'static str, Key)]) -> String {
    criteria
        .iter()
        .map(|(_, key)| key.describe())
        .collect::<Vec<_>>()
        .join(", ")
}

pub trait Entity: Sized {
    fn meta() -> &'static EntityMeta;

    /// Builds the entity from a row produced by `meta().select`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn id(&self) -> i64;

    /// Short natural-key label.
    fn label(&self) -> String;

    /// Class label; polymorphic roots return their subtype's label.
    fn class_label(&self) -> &'static str {
        Self::meta().class_label
    }

    /// `"<class label> <label>"`, used in messages.
    fn qualified_name(&self) -> String {
        format!("{} {}", self.class_label(), self.label())
    }

    fn lock_row(&self, session: &Session<'_>) -> Result<(), AquilonError> {
        session.lock_row(Self::meta().table, self.id())
    }

    /// Re-reads the row by primary key.
    fn reload(&self, session: &Session<'_>) -> Result<Self, AquilonError> {
        get_by_id::<Self>(session, self.id())
    }
}

/// Locks every entity of one type in ascending primary-key order.
pub fn lock_rows<E: Entity>(session: &Session<'_>, entities: &[&E]) -> Result<(), AquilonError> {
    let table = E::meta().table;
    let rows: Vec<(&'static str, i64)> = entities.iter().map(|e| (table, e.id())).collect();
    session.lock_rows(&rows)
}

pub fn get_by_id<E: Entity>(session: &Session<'_>, id: i64) -> Result<E, AquilonError> {
    let meta = E::meta();
    let sql = format!("{} WHERE {} = ?1", meta.select, meta.id_column);
    let mut stmt = session.conn().prepare(&sql)?;
    let first = stmt.query_map([id], |row| E::from_row(row))?.next();
    match first {
        Some(row) => Ok(row?),
        None => Err(AquilonError::NotFound(format!(
            "{} with id {} not found.",
            meta.class_label, id
        ))),
    }
}

/// Natural-key lookup.
///
/// - no match: `Ok(None)`, or `NotFound` when `compel` is set
/// - one match: `Ok(Some(_))`, or `ArgumentError` when `preclude` is set
/// - several matches: always `ArgumentError`
pub fn get_unique<E: Entity>(
    session: &Session<'_>,
    criteria: &[(&'static str, Key)],
    compel: bool,
    preclude: bool,
) -> Result<Option<E>, AquilonError> {
    let meta = E::meta();
    let mut found = select_matching::<E>(session, meta, criteria)?;
    match found.len() {
        0 => {
            if compel {
                Err(AquilonError::NotFound(format!(
                    "{} {} not found.",
                    meta.class_label,
                    describe_criteria(criteria)
                )))
            } else {
                Ok(None)
            }
        }
        1 => {
            let entity = found.remove(0);
            if preclude {
                return Err(AquilonError::ArgumentError(format!(
                    "{} already exists.",
                    entity.qualified_name()
                )));
            }
            Ok(Some(entity))
        }
        n => Err(AquilonError::ArgumentError(format!(
            "{} {} is not unique, {} rows match.",
            meta.class_label,
            describe_criteria(criteria),
            n
        ))),
    }
}

/// Single-argument form: matches against the entity's only unique field.
pub fn get_unique_by_label<E: Entity>(
    session: &Session<'_>,
    label: &str,
    compel: bool,
) -> Result<Option<E>, AquilonError> {
    let meta = E::meta();
    let [field] = meta.unique_fields else {
        return Err(AquilonError::InternalError(format!(
            "{} has {} unique fields; a single positional key is ambiguous",
            meta.class_label,
            meta.unique_fields.len()
        )));
    };
    get_unique::<E>(session, &[(field.name, Key::from(label))], compel, false)
}

fn select_matching<E: Entity>(
    session: &Session<'_>,
    meta: &'static EntityMeta,
    criteria: &[(&'static str, Key)],
) -> Result<Vec<E>, AquilonError> {
    let (clause, values) = build_filter(session, meta, criteria)?;
    let sql = format!("{} WHERE {}", meta.select, clause);
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
        E::from_row(row)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn build_filter(
    session: &Session<'_>,
    meta: &'static EntityMeta,
    criteria: &[(&'static str, Key)],
) -> Result<(String, Vec<Value>), AquilonError> {
    if criteria.is_empty() {
        return Err(AquilonError::InternalError(format!(
            "get_unique() on {} called without criteria",
            meta.class_label
        )));
    }

    let mut clauses = Vec::with_capacity(criteria.len());
    let mut values = Vec::with_capacity(criteria.len());
    for (name, key) in criteria {
        let field = meta.field(name).ok_or_else(|| {
            AquilonError::InternalError(format!(
                "{} has no searchable field '{}'",
                meta.class_label, name
            ))
        })?;
        let value = match key {
            Key::Value(v) => v.clone(),
            Key::Lookup(nested) => {
                let target = field.references.ok_or_else(|| {
                    AquilonError::InternalError(format!(
                        "{}.{} is not a reference and cannot take a nested lookup",
                        meta.class_label, name
                    ))
                })?;
                Value::Integer(resolve_id(session, target, nested)?)
            }
        };
        if value == Value::Null {
            clauses.push(format!("{} IS NULL", field.column));
        } else {
            values.push(value);
            clauses.push(format!("{} = ?{}", field.column, values.len()));
        }
    }
    Ok((clauses.join(" AND "), values))
}

/// Compelled unique lookup returning only the primary key.
fn resolve_id(
    session: &Session<'_>,
    meta: &'static EntityMeta,
    criteria: &[(&'static str, Key)],
) -> Result<i64, AquilonError> {
    let (clause, values) = build_filter(session, meta, criteria)?;
    let sql = format!("{} WHERE {}", select_with_id_alias(meta), clause);
    let mut stmt = session.conn().prepare(&sql)?;
    let ids = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), |row| {
            row.get::<_, i64>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    match ids.as_slice() {
        [id] => Ok(*id),
        [] => Err(AquilonError::NotFound(format!(
            "{} {} not found.",
            meta.class_label,
            describe_criteria(criteria)
        ))),
        many => Err(AquilonError::ArgumentError(format!(
            "{} {} is not unique, {} rows match.",
            meta.class_label,
            describe_criteria(criteria),
            many.len()
        ))),
    }
}

fn select_with_id_alias(meta: &EntityMeta) -> String {
    // Replace the projection with the primary key only; joins stay intact.
    let from_at = meta
        .select
        .to_ascii_uppercase()
        .find(" FROM ")
        .unwrap_or(0);
    format!("SELECT {} AS id{}", meta.id_column, &meta.select[from_at..])
}

/// A closed polymorphic hierarchy keyed by a lower-case string tag.
pub trait Polymorphic: Sized + Copy + 'static {
    const TAGS: &'static [(&'static str, Self)];

    fn tag(&self) -> &'static str;

    /// Class label of the concrete subtype.
    fn subtype_label(&self) -> &'static str;
}

/// Maps a tag to its subtype, listing the valid tags on failure.
pub fn polymorphic_subclass<T: Polymorphic>(tag: &str, error_msg: &str) -> Result<T, AquilonError> {
    let wanted = tag.trim().to_lowercase();
    if let Some((_, subtype)) = T::TAGS.iter().find(|(t, _)| *t == wanted) {
        return Ok(*subtype);
    }
    let mut valid: Vec<&str> = T::TAGS.iter().map(|(t, _)| *t).collect();
    valid.sort_unstable();
    Err(AquilonError::ArgumentError(format!(
        "{} '{}'. Valid values are: {}.",
        error_msg,
        tag,
        valid.join(", ")
    )))
}

/// Decodes a stored discriminator column inside a row mapper.
pub fn tag_from_sql<T: Polymorphic>(idx: usize, tag: &str) -> rusqlite::Result<T> {
    polymorphic_subclass::<T>(tag, "Unknown discriminator").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e.to_string())),
        )
    })
}
