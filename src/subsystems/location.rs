//! Location hierarchy.
//!
//! Locations form a tree from company down to desk. Cluster placement rules
//! are all expressed as containment in this tree.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Company,
    Hub,
    Continent,
    Country,
    Campus,
    City,
    Building,
    Room,
    Bunker,
    Rack,
    Desk,
}

impl LocationType {
    /// Depth in the hierarchy; parents must have a strictly smaller rank.
    pub fn rank(&self) -> u8 {
        match self {
            LocationType::Company => 0,
            LocationType::Hub => 1,
            LocationType::Continent => 2,
            LocationType::Country => 3,
            LocationType::Campus => 4,
            LocationType::City => 5,
            LocationType::Building => 6,
            LocationType::Room | LocationType::Bunker => 7,
            LocationType::Rack => 8,
            LocationType::Desk => 9,
        }
    }
}

impl Polymorphic for LocationType {
    const TAGS: &'static [(&'static str, Self)] = &[
        ("company", LocationType::Company),
        ("hub", LocationType::Hub),
        ("continent", LocationType::Continent),
        ("country", LocationType::Country),
        ("campus", LocationType::Campus),
        ("city", LocationType::City),
        ("building", LocationType::Building),
        ("room", LocationType::Room),
        ("bunker", LocationType::Bunker),
        ("rack", LocationType::Rack),
        ("desk", LocationType::Desk),
    ];

    fn tag(&self) -> &'static str {
        Self::TAGS
            .iter()
            .find(|(_, t)| t == self)
            .map(|(tag, _)| *tag)
            .unwrap_or("location")
    }

    fn subtype_label(&self) -> &'static str {
        match self {
            LocationType::Company => "Company",
            LocationType::Hub => "Hub",
            LocationType::Continent => "Continent",
            LocationType::Country => "Country",
            LocationType::Campus => "Campus",
            LocationType::City => "City",
            LocationType::Building => "Building",
            LocationType::Room => "Room",
            LocationType::Bunker => "Bunker",
            LocationType::Rack => "Rack",
            LocationType::Desk => "Desk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub location_type: LocationType,
    pub parent_id: Option<i64>,
}

pub static LOCATION_META: EntityMeta = EntityMeta {
    table: "location",
    class_label: "Location",
    select: "SELECT l.id, l.name, l.location_type, l.parent_id FROM location l",
    id_column: "l.id",
    unique_fields: &[
        Field::plain("name", "l.name"),
        Field::plain("location_type", "l.location_type"),
    ],
    extra_search_fields: &[Field::plain("parent", "l.parent_id")],
};

impl Entity for Location {
    fn meta() -> &'static EntityMeta {
        &LOCATION_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(2)?;
        Ok(Location {
            id: row.get(0)?,
            name: row.get(1)?,
            location_type: entity::tag_from_sql(2, &tag)?,
            parent_id: row.get(3)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn class_label(&self) -> &'static str {
        self.location_type.subtype_label()
    }
}

pub fn get_location(
    session: &Session<'_>,
    name: &str,
    location_type: LocationType,
) -> Result<Location, AquilonError> {
    entity::get_unique::<Location>(
        session,
        &[
            ("name", Key::from(name)),
            ("location_type", Key::from(location_type.tag())),
        ],
        false,
        false,
    )?
    .ok_or_else(|| {
        AquilonError::NotFound(format!(
            "{} {} not found.",
            location_type.subtype_label(),
            name
        ))
    })
}

pub fn add_location(
    session: &Session<'_>,
    name: &str,
    location_type: LocationType,
    parent: Option<&Location>,
) -> Result<Location, AquilonError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AquilonError::ArgumentError(
            "Location name must not be empty.".to_string(),
        ));
    }
    entity::get_unique::<Location>(
        session,
        &[
            ("name", Key::from(name.as_str())),
            ("location_type", Key::from(location_type.tag())),
        ],
        false,
        true,
    )?;
    if let Some(parent) = parent {
        if parent.location_type.rank() >= location_type.rank() {
            return Err(AquilonError::ArgumentError(format!(
                "{} cannot be the parent of a {}.",
                parent.qualified_name(),
                location_type.tag()
            )));
        }
    }

    session.conn().execute(
        "INSERT INTO location(name, location_type, parent_id) VALUES(?1, ?2, ?3)",
        params![name, location_type.tag(), parent.map(|p| p.id)],
    )?;
    entity::get_by_id::<Location>(session, session.conn().last_insert_rowid())
}

/// The location itself followed by each ancestor up to the root.
pub fn ancestry(session: &Session<'_>, location: &Location) -> Result<Vec<Location>, AquilonError> {
    let mut stmt = session.conn().prepare(
        "WITH RECURSIVE chain(id, depth) AS (
             SELECT ?1, 0
             UNION ALL
             SELECT l.parent_id, c.depth + 1
               FROM location l JOIN chain c ON l.id = c.id
              WHERE l.parent_id IS NOT NULL
         )
         SELECT l.id, l.name, l.location_type, l.parent_id
           FROM chain c JOIN location l ON l.id = c.id
          ORDER BY c.depth",
    )?;
    let rows = stmt.query_map(params![location.id], |row| Location::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// True if `inner` is `outer` or lies anywhere beneath it.
pub fn location_contains(
    session: &Session<'_>,
    outer: &Location,
    inner: &Location,
) -> Result<bool, AquilonError> {
    if outer.id == inner.id {
        return Ok(true);
    }
    Ok(ancestry(session, inner)?.iter().any(|loc| loc.id == outer.id))
}

/// The nearest location of `location_type` at or above `location`.
pub fn ancestor_of_type(
    session: &Session<'_>,
    location: &Location,
    location_type: LocationType,
) -> Result<Option<Location>, AquilonError> {
    Ok(ancestry(session, location)?
        .into_iter()
        .find(|loc| loc.location_type == location_type))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "location",
        "version": "0.1.0",
        "description": "Location hierarchy used for placement constraints",
        "commands": [
            { "name": "add_location", "parameters": ["name", "type", "parent"] }
        ],
        "storage": ["location"]
    })
}
