//! Features and their links to archetypes, personality stages, models and
//! interfaces.
//!
//! The lookups at the bottom are read-only projections. They load every link
//! reachable from a personality stage once and filter in memory, so the
//! per-interface and combined variants cannot drift apart.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::subsystems::inventory::{
    self, Archetype, HardwareEntity, Interface, Model, PersonalityStage,
};
use rusqlite::{Row, params};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Host,
    Hardware,
    Interface,
}

impl Polymorphic for FeatureType {
    const TAGS: &'static [(&'static str, Self)] = &[
        ("host", FeatureType::Host),
        ("hardware", FeatureType::Hardware),
        ("interface", FeatureType::Interface),
    ];

    fn tag(&self) -> &'static str {
        match self {
            FeatureType::Host => "host",
            FeatureType::Hardware => "hardware",
            FeatureType::Interface => "interface",
        }
    }

    fn subtype_label(&self) -> &'static str {
        match self {
            FeatureType::Host => "Host Feature",
            FeatureType::Hardware => "Hardware Feature",
            FeatureType::Interface => "Interface Feature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Feature {
    pub id: i64,
    pub name: String,
    pub feature_type: FeatureType,
    pub post_personality: bool,
    pub comments: Option<String>,
}

pub static FEATURE_META: EntityMeta = EntityMeta {
    table: "feature",
    class_label: "Feature",
    select: "SELECT f.id, f.name, f.feature_type, f.post_personality, f.comments FROM feature f",
    id_column: "f.id",
    unique_fields: &[
        Field::plain("name", "f.name"),
        Field::plain("feature_type", "f.feature_type"),
    ],
    extra_search_fields: &[],
};

impl Entity for Feature {
    fn meta() -> &'static EntityMeta {
        &FEATURE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(2)?;
        Ok(Feature {
            id: row.get(0)?,
            name: row.get(1)?,
            feature_type: entity::tag_from_sql(2, &tag)?,
            post_personality: row.get(3)?,
            comments: row.get(4)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn class_label(&self) -> &'static str {
        self.feature_type.subtype_label()
    }
}

pub fn add_feature(
    session: &Session<'_>,
    name: &str,
    feature_type: &str,
    post_personality: bool,
    comments: Option<&str>,
) -> Result<Feature, AquilonError> {
    let feature_type: FeatureType =
        entity::polymorphic_subclass(feature_type, "Unknown feature type")?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal feature name '{name}'."
        )));
    }
    if post_personality && feature_type != FeatureType::Host {
        return Err(AquilonError::ArgumentError(format!(
            "The post_personality attribute is only valid for host features, not for {}.",
            feature_type.subtype_label()
        )));
    }
    entity::get_unique::<Feature>(
        session,
        &[
            ("name", Key::from(name)),
            ("feature_type", Key::from(feature_type.tag())),
        ],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO feature(name, feature_type, post_personality, comments) VALUES(?1, ?2, ?3, ?4)",
        params![name, feature_type.tag(), post_personality, comments],
    )?;
    let feature: Feature = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(feature = %feature.qualified_name(), "feature added");
    Ok(feature)
}

pub fn get_feature(
    session: &Session<'_>,
    name: &str,
    feature_type: &str,
) -> Result<Feature, AquilonError> {
    let feature_type: FeatureType =
        entity::polymorphic_subclass(feature_type, "Unknown feature type")?;
    entity::get_unique::<Feature>(
        session,
        &[
            ("name", Key::from(name)),
            ("feature_type", Key::from(feature_type.tag())),
        ],
        false,
        false,
    )?
    .ok_or_else(|| {
        AquilonError::NotFound(format!("{} {} not found.", feature_type.subtype_label(), name))
    })
}

// ===== Links =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureLink {
    pub id: i64,
    pub feature_id: i64,
    pub model_id: Option<i64>,
    pub archetype_id: Option<i64>,
    pub personality_stage_id: Option<i64>,
    pub interface_name: Option<String>,
}

impl FeatureLink {
    fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(FeatureLink {
            id: row.get(offset)?,
            feature_id: row.get(offset + 1)?,
            model_id: row.get(offset + 2)?,
            archetype_id: row.get(offset + 3)?,
            personality_stage_id: row.get(offset + 4)?,
            interface_name: row.get(offset + 5)?,
        })
    }
}

/// Where a feature gets bound. Exactly one of archetype or personality stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBinding<'a> {
    pub model: Option<&'a Model>,
    pub archetype: Option<&'a Archetype>,
    pub personality_stage: Option<&'a PersonalityStage>,
    pub interface_name: Option<&'a str>,
}

impl FeatureBinding<'_> {
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(model) = self.model {
            parts.push(model.qualified_name());
        }
        if let Some(name) = self.interface_name {
            parts.push(format!("interface {name}"));
        }
        if let Some(archetype) = self.archetype {
            parts.push(archetype.qualified_name());
        }
        if let Some(stage) = self.personality_stage {
            parts.push(stage.qualified_name());
        }
        parts.join(", ")
    }
}

/// Per-type rules on what a feature may be bound to.
pub fn validate_link(feature: &Feature, binding: &FeatureBinding<'_>) -> Result<(), AquilonError> {
    match (binding.archetype, binding.personality_stage) {
        (Some(_), Some(_)) => {
            return Err(AquilonError::ArgumentError(
                "A feature can be bound to an archetype or a personality, not both.".to_string(),
            ));
        }
        (None, None) => {
            return Err(AquilonError::ArgumentError(
                "Please specify either an archetype or a personality.".to_string(),
            ));
        }
        _ => {}
    }

    match feature.feature_type {
        FeatureType::Host => {
            if binding.model.is_some() || binding.interface_name.is_some() {
                return Err(AquilonError::ArgumentError(format!(
                    "{} cannot be bound to a model or an interface.",
                    feature.qualified_name()
                )));
            }
        }
        FeatureType::Hardware => {
            if binding.interface_name.is_some() {
                return Err(AquilonError::ArgumentError(format!(
                    "{} cannot be bound to an interface.",
                    feature.qualified_name()
                )));
            }
            match binding.model {
                None => {
                    return Err(AquilonError::ArgumentError(format!(
                        "{} must be bound to a hardware model.",
                        feature.qualified_name()
                    )));
                }
                Some(model) if !model.model_type.is_hardware_entity_type() => {
                    return Err(AquilonError::ArgumentError(format!(
                        "{} is not a suitable model for {}.",
                        model.qualified_name(),
                        feature.qualified_name()
                    )));
                }
                Some(_) => {}
            }
        }
        FeatureType::Interface => {
            if let Some(model) = binding.model {
                if !model.model_type.is_nic() {
                    return Err(AquilonError::ArgumentError(format!(
                        "{} is not a network interface model.",
                        model.qualified_name()
                    )));
                }
                if binding.interface_name.is_some() {
                    return Err(AquilonError::ArgumentError(
                        "Please specify either an interface model or an interface name, not both."
                            .to_string(),
                    ));
                }
            }
            if binding.interface_name.is_some() && binding.personality_stage.is_none() {
                return Err(AquilonError::ArgumentError(
                    "Binding to a named interface requires a personality.".to_string(),
                ));
            }
        }
    }
    Ok(())
}

const LINK_MATCH: &str = "feature_id = ?1
    AND model_id IS ?2
    AND archetype_id IS ?3
    AND personality_stage_id IS ?4
    AND interface_name IS ?5";

fn find_link(
    session: &Session<'_>,
    feature: &Feature,
    binding: &FeatureBinding<'_>,
) -> Result<Option<FeatureLink>, AquilonError> {
    let sql = format!(
        "SELECT id, feature_id, model_id, archetype_id, personality_stage_id, interface_name
           FROM feature_link WHERE {LINK_MATCH}"
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let mut rows = stmt.query_map(
        params![
            feature.id,
            binding.model.map(|m| m.id),
            binding.archetype.map(|a| a.id),
            binding.personality_stage.map(|s| s.id),
            binding.interface_name
        ],
        |row| FeatureLink::from_row_at(row, 0),
    )?;
    Ok(rows.next().transpose()?)
}

pub fn bind_feature(
    session: &Session<'_>,
    feature: &Feature,
    binding: FeatureBinding<'_>,
) -> Result<FeatureLink, AquilonError> {
    validate_link(feature, &binding)?;
    if find_link(session, feature, &binding)?.is_some() {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already bound to {}.",
            feature.qualified_name(),
            binding.describe()
        )));
    }
    session.conn().execute(
        "INSERT INTO feature_link(feature_id, model_id, archetype_id, personality_stage_id, interface_name)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            feature.id,
            binding.model.map(|m| m.id),
            binding.archetype.map(|a| a.id),
            binding.personality_stage.map(|s| s.id),
            binding.interface_name
        ],
    )?;
    info!(feature = %feature.name, target = %binding.describe(), "feature bound");
    find_link(session, feature, &binding)?.ok_or_else(|| {
        AquilonError::InternalError(format!(
            "{} link vanished right after insert",
            feature.qualified_name()
        ))
    })
}

pub fn unbind_feature(
    session: &Session<'_>,
    feature: &Feature,
    binding: FeatureBinding<'_>,
) -> Result<(), AquilonError> {
    let Some(link) = find_link(session, feature, &binding)? else {
        return Err(AquilonError::NotFound(format!(
            "{} is not bound to {}.",
            feature.qualified_name(),
            binding.describe()
        )));
    };
    session
        .conn()
        .execute("DELETE FROM feature_link WHERE id = ?1", params![link.id])?;
    info!(feature = %feature.name, target = %binding.describe(), "feature unbound");
    Ok(())
}

// ===== Lookups =====

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostFeatures {
    pub pre_personality: BTreeSet<Feature>,
    pub post_personality: BTreeSet<Feature>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NonHostFeatures {
    pub hardware: BTreeSet<Feature>,
    /// Keyed by interface name.
    pub interfaces: BTreeMap<String, BTreeSet<Feature>>,
}

/// Every link bound to the stage itself or to its archetype.
fn stage_links(
    session: &Session<'_>,
    stage: &PersonalityStage,
) -> Result<Vec<(FeatureLink, Feature)>, AquilonError> {
    let mut stmt = session.conn().prepare(
        "SELECT fl.id, fl.feature_id, fl.model_id, fl.archetype_id, fl.personality_stage_id,
                fl.interface_name,
                f.id, f.name, f.feature_type, f.post_personality, f.comments
           FROM feature_link fl JOIN feature f ON f.id = fl.feature_id
          WHERE fl.personality_stage_id = ?1 OR fl.archetype_id = ?2",
    )?;
    let rows = stmt.query_map(params![stage.id, stage.archetype_id], |row| {
        let link = FeatureLink::from_row_at(row, 0)?;
        let tag: String = row.get(8)?;
        let feature = Feature {
            id: row.get(6)?,
            name: row.get(7)?,
            feature_type: entity::tag_from_sql(8, &tag)?,
            post_personality: row.get(9)?,
            comments: row.get(10)?,
        };
        Ok((link, feature))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn hardware_link_applies(link: &FeatureLink, feature: &Feature, model_id: i64) -> bool {
    feature.feature_type == FeatureType::Hardware && link.model_id == Some(model_id)
}

fn interface_link_applies(link: &FeatureLink, feature: &Feature, interface: &Interface) -> bool {
    if feature.feature_type != FeatureType::Interface {
        return false;
    }
    let model_ok = link.model_id.is_none() || link.model_id == interface.model_id;
    let name_ok = match link.interface_name.as_deref() {
        Some(name) => name == interface.name,
        None => true,
    };
    model_ok && name_ok
}

pub fn host_features(
    session: &Session<'_>,
    stage: &PersonalityStage,
) -> Result<HostFeatures, AquilonError> {
    let mut result = HostFeatures::default();
    for (_, feature) in stage_links(session, stage)? {
        if feature.feature_type != FeatureType::Host {
            continue;
        }
        if feature.post_personality {
            result.post_personality.insert(feature);
        } else {
            result.pre_personality.insert(feature);
        }
    }
    debug!(
        stage = %stage.label(),
        pre = result.pre_personality.len(),
        post = result.post_personality.len(),
        "host features resolved"
    );
    Ok(result)
}

pub fn hardware_features(
    session: &Session<'_>,
    stage: &PersonalityStage,
    model: &Model,
) -> Result<BTreeSet<Feature>, AquilonError> {
    Ok(stage_links(session, stage)?
        .into_iter()
        .filter(|(link, feature)| hardware_link_applies(link, feature, model.id))
        .map(|(_, feature)| feature)
        .collect())
}

pub fn interface_features(
    session: &Session<'_>,
    stage: &PersonalityStage,
    interface: &Interface,
) -> Result<BTreeSet<Feature>, AquilonError> {
    Ok(stage_links(session, stage)?
        .into_iter()
        .filter(|(link, feature)| interface_link_applies(link, feature, interface))
        .map(|(_, feature)| feature)
        .collect())
}

/// Hardware and per-interface features of one hardware entity in a single pass.
pub fn non_host_features(
    session: &Session<'_>,
    stage: &PersonalityStage,
    hardware: &HardwareEntity,
) -> Result<NonHostFeatures, AquilonError> {
    let links = stage_links(session, stage)?;
    let interfaces = inventory::hardware_interfaces(session, hardware)?;
    let mut result = NonHostFeatures::default();
    for interface in &interfaces {
        result.interfaces.insert(interface.name.clone(), BTreeSet::new());
    }
    for (link, feature) in &links {
        if hardware_link_applies(link, feature, hardware.model_id) {
            result.hardware.insert(feature.clone());
        }
        for interface in &interfaces {
            if interface_link_applies(link, feature, interface) {
                result
                    .interfaces
                    .entry(interface.name.clone())
                    .or_default()
                    .insert(feature.clone());
            }
        }
    }
    Ok(result)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "feature",
        "version": "0.1.0",
        "description": "Feature definitions, links and per-host feature lookups",
        "commands": [
            { "name": "add_feature", "parameters": ["name", "type", "post_personality", "comments"] },
            { "name": "bind_feature", "parameters": ["feature", "type", "archetype", "personality", "model", "interface"] },
            { "name": "unbind_feature", "parameters": ["feature", "type", "archetype", "personality", "model", "interface"] },
            { "name": "host_features", "parameters": ["personality"] },
            { "name": "hardware_features", "parameters": ["personality", "model"] },
            { "name": "interface_features", "parameters": ["personality", "interface"] },
            { "name": "non_host_features", "parameters": ["personality", "hardware"] }
        ],
        "storage": ["feature", "feature_link"]
    })
}
