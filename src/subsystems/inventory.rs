//! Inventory entities: archetypes, personalities, branches, hardware models,
//! machines, interfaces, operating systems and hosts.
//!
//! These are the thin records the DNS and cluster engines reason about. Hosts
//! are materialized with their placement, personality and branch already
//! joined in, since every membership check needs all three.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::core::time;
use crate::subsystems::cluster;
use crate::subsystems::location::{LOCATION_META, Location};
use regex::Regex;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::sync::LazyLock;
use tracing::info;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").unwrap());

pub const DEFAULT_STAGE: &str = "current";

fn check_name(kind: &str, name: &str) -> Result<String, AquilonError> {
    let name = name.trim().to_lowercase();
    if !NAME_RE.is_match(&name) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal {kind} name '{name}'."
        )));
    }
    Ok(name)
}

// ===== Archetype =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Archetype {
    pub id: i64,
    pub name: String,
    pub is_compileable: bool,
}

pub static ARCHETYPE_META: EntityMeta = EntityMeta {
    table: "archetype",
    class_label: "Archetype",
    select: "SELECT a.id, a.name, a.is_compileable FROM archetype a",
    id_column: "a.id",
    unique_fields: &[Field::plain("name", "a.name")],
    extra_search_fields: &[],
};

impl Entity for Archetype {
    fn meta() -> &'static EntityMeta {
        &ARCHETYPE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Archetype {
            id: row.get(0)?,
            name: row.get(1)?,
            is_compileable: row.get(2)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

pub fn add_archetype(
    session: &Session<'_>,
    name: &str,
    is_compileable: bool,
) -> Result<Archetype, AquilonError> {
    let name = check_name("archetype", name)?;
    entity::get_unique::<Archetype>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    session.conn().execute(
        "INSERT INTO archetype(name, is_compileable) VALUES(?1, ?2)",
        params![name, is_compileable],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn get_archetype(session: &Session<'_>, name: &str) -> Result<Archetype, AquilonError> {
    entity::get_unique_by_label::<Archetype>(session, name, true)?
        .ok_or_else(|| AquilonError::NotFound(format!("Archetype {name} not found.")))
}

// ===== Personality / stage =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Personality {
    pub id: i64,
    pub name: String,
    pub archetype_id: i64,
    pub archetype: String,
    pub host_environment: String,
}

pub static PERSONALITY_META: EntityMeta = EntityMeta {
    table: "personality",
    class_label: "Personality",
    select: "SELECT p.id, p.name, p.archetype_id, a.name, p.host_environment
               FROM personality p JOIN archetype a ON a.id = p.archetype_id",
    id_column: "p.id",
    unique_fields: &[
        Field::plain("name", "p.name"),
        Field::reference("archetype", "p.archetype_id", &ARCHETYPE_META),
    ],
    extra_search_fields: &[Field::plain("host_environment", "p.host_environment")],
};

impl Entity for Personality {
    fn meta() -> &'static EntityMeta {
        &PERSONALITY_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Personality {
            id: row.get(0)?,
            name: row.get(1)?,
            archetype_id: row.get(2)?,
            archetype: row.get(3)?,
            host_environment: row.get(4)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{}/{}", self.archetype, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonalityStage {
    pub id: i64,
    pub name: String,
    pub personality_id: i64,
    pub personality: String,
    pub archetype_id: i64,
    pub archetype: String,
    pub host_environment: String,
}

pub static PERSONALITY_STAGE_META: EntityMeta = EntityMeta {
    table: "personality_stage",
    class_label: "Personality",
    select: "SELECT ps.id, ps.name, ps.personality_id, p.name, p.archetype_id, a.name, p.host_environment
               FROM personality_stage ps
               JOIN personality p ON p.id = ps.personality_id
               JOIN archetype a ON a.id = p.archetype_id",
    id_column: "ps.id",
    unique_fields: &[
        Field::reference("personality", "ps.personality_id", &PERSONALITY_META),
        Field::plain("name", "ps.name"),
    ],
    extra_search_fields: &[],
};

impl Entity for PersonalityStage {
    fn meta() -> &'static EntityMeta {
        &PERSONALITY_STAGE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PersonalityStage {
            id: row.get(0)?,
            name: row.get(1)?,
            personality_id: row.get(2)?,
            personality: row.get(3)?,
            archetype_id: row.get(4)?,
            archetype: row.get(5)?,
            host_environment: row.get(6)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        if self.name == DEFAULT_STAGE {
            format!("{}/{}", self.archetype, self.personality)
        } else {
            format!("{}/{}@{}", self.archetype, self.personality, self.name)
        }
    }
}

/// Creates a personality together with its default stage.
pub fn add_personality(
    session: &Session<'_>,
    archetype: &Archetype,
    name: &str,
    host_environment: &str,
) -> Result<(Personality, PersonalityStage), AquilonError> {
    let name = check_name("personality", name)?;
    entity::get_unique::<Personality>(
        session,
        &[
            ("name", Key::from(name.as_str())),
            ("archetype", Key::from(archetype.id)),
        ],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO personality(name, archetype_id, host_environment) VALUES(?1, ?2, ?3)",
        params![name, archetype.id, host_environment],
    )?;
    let personality: Personality = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    let stage = add_personality_stage(session, &personality, DEFAULT_STAGE)?;
    Ok((personality, stage))
}

pub fn add_personality_stage(
    session: &Session<'_>,
    personality: &Personality,
    name: &str,
) -> Result<PersonalityStage, AquilonError> {
    let name = check_name("personality stage", name)?;
    session.conn().execute(
        "INSERT INTO personality_stage(personality_id, name) VALUES(?1, ?2)",
        params![personality.id, name],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn get_personality(
    session: &Session<'_>,
    archetype: &str,
    name: &str,
) -> Result<Personality, AquilonError> {
    entity::get_unique::<Personality>(
        session,
        &[
            ("name", Key::from(name)),
            ("archetype", Key::Lookup(vec![("name", Key::from(archetype))])),
        ],
        true,
        false,
    )?
    .ok_or_else(|| AquilonError::NotFound(format!("Personality {archetype}/{name} not found.")))
}

pub fn get_personality_stage(
    session: &Session<'_>,
    personality: &Personality,
    stage: &str,
) -> Result<PersonalityStage, AquilonError> {
    entity::get_unique::<PersonalityStage>(
        session,
        &[
            ("personality", Key::from(personality.id)),
            ("name", Key::from(stage)),
        ],
        false,
        false,
    )?
    .ok_or_else(|| {
        AquilonError::NotFound(format!(
            "{} does not have stage {}.",
            personality.qualified_name(),
            stage
        ))
    })
}

// ===== Branch =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Domain,
    Sandbox,
}

impl Polymorphic for BranchType {
    const TAGS: &'static [(&'static str, Self)] =
        &[("domain", BranchType::Domain), ("sandbox", BranchType::Sandbox)];

    fn tag(&self) -> &'static str {
        match self {
            BranchType::Domain => "domain",
            BranchType::Sandbox => "sandbox",
        }
    }

    fn subtype_label(&self) -> &'static str {
        match self {
            BranchType::Domain => "Domain",
            BranchType::Sandbox => "Sandbox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub branch_type: BranchType,
}

pub static BRANCH_META: EntityMeta = EntityMeta {
    table: "branch",
    class_label: "Branch",
    select: "SELECT b.id, b.name, b.branch_type FROM branch b",
    id_column: "b.id",
    unique_fields: &[Field::plain("name", "b.name")],
    extra_search_fields: &[Field::plain("branch_type", "b.branch_type")],
};

impl Entity for Branch {
    fn meta() -> &'static EntityMeta {
        &BRANCH_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(2)?;
        Ok(Branch {
            id: row.get(0)?,
            name: row.get(1)?,
            branch_type: entity::tag_from_sql(2, &tag)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn class_label(&self) -> &'static str {
        self.branch_type.subtype_label()
    }
}

pub fn add_branch(
    session: &Session<'_>,
    name: &str,
    branch_type: BranchType,
) -> Result<Branch, AquilonError> {
    let name = check_name("branch", name)?;
    entity::get_unique::<Branch>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    session.conn().execute(
        "INSERT INTO branch(name, branch_type) VALUES(?1, ?2)",
        params![name, branch_type.tag()],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

/// `"domain prod"` or `"sandbox alice/feature"`, as used in mismatch messages.
pub fn describe_branch(
    branch_type: BranchType,
    branch_name: &str,
    sandbox_author: Option<&str>,
) -> String {
    match (branch_type, sandbox_author) {
        (BranchType::Sandbox, Some(author)) => format!("sandbox {author}/{branch_name}"),
        _ => format!("{} {}", branch_type.tag(), branch_name),
    }
}

fn check_sandbox_author(branch: &Branch, sandbox_author: Option<&str>) -> Result<(), AquilonError> {
    match (branch.branch_type, sandbox_author) {
        (BranchType::Sandbox, None) => Err(AquilonError::ArgumentError(format!(
            "{} requires a sandbox author.",
            branch.qualified_name()
        ))),
        (BranchType::Domain, Some(_)) => Err(AquilonError::ArgumentError(format!(
            "{} does not take a sandbox author.",
            branch.qualified_name()
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_branch_assignment(
    branch: &Branch,
    sandbox_author: Option<&str>,
) -> Result<(), AquilonError> {
    check_sandbox_author(branch, sandbox_author)
}

// ===== Model =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Rackmount,
    Blade,
    Workstation,
    VirtualMachine,
    VirtualAppliance,
    Switch,
    Chassis,
    Nic,
}

impl ModelType {
    /// Whether a hardware entity (machine or network device) may be of this model.
    pub fn is_hardware_entity_type(&self) -> bool {
        !matches!(self, ModelType::Chassis | ModelType::Nic)
    }

    pub fn is_machine_type(&self) -> bool {
        matches!(
            self,
            ModelType::Rackmount
                | ModelType::Blade
                | ModelType::Workstation
                | ModelType::VirtualMachine
                | ModelType::VirtualAppliance
        )
    }

    pub fn is_nic(&self) -> bool {
        matches!(self, ModelType::Nic)
    }
}

impl Polymorphic for ModelType {
    const TAGS: &'static [(&'static str, Self)] = &[
        ("rackmount", ModelType::Rackmount),
        ("blade", ModelType::Blade),
        ("workstation", ModelType::Workstation),
        ("virtual_machine", ModelType::VirtualMachine),
        ("virtual_appliance", ModelType::VirtualAppliance),
        ("switch", ModelType::Switch),
        ("chassis", ModelType::Chassis),
        ("nic", ModelType::Nic),
    ];

    fn tag(&self) -> &'static str {
        Self::TAGS
            .iter()
            .find(|(_, t)| t == self)
            .map(|(tag, _)| *tag)
            .unwrap_or("model")
    }

    fn subtype_label(&self) -> &'static str {
        "Model"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    pub id: i64,
    pub vendor: String,
    pub name: String,
    pub model_type: ModelType,
}

pub static MODEL_META: EntityMeta = EntityMeta {
    table: "model",
    class_label: "Model",
    select: "SELECT m.id, m.vendor, m.name, m.model_type FROM model m",
    id_column: "m.id",
    unique_fields: &[
        Field::plain("vendor", "m.vendor"),
        Field::plain("name", "m.name"),
    ],
    extra_search_fields: &[Field::plain("model_type", "m.model_type")],
};

impl Entity for Model {
    fn meta() -> &'static EntityMeta {
        &MODEL_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(3)?;
        Ok(Model {
            id: row.get(0)?,
            vendor: row.get(1)?,
            name: row.get(2)?,
            model_type: entity::tag_from_sql(3, &tag)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{}/{}", self.vendor, self.name)
    }
}

pub fn add_model(
    session: &Session<'_>,
    vendor: &str,
    name: &str,
    model_type: &str,
) -> Result<Model, AquilonError> {
    let model_type: ModelType = entity::polymorphic_subclass(model_type, "Unknown model type")?;
    let vendor = check_name("vendor", vendor)?;
    let name = check_name("model", name)?;
    entity::get_unique::<Model>(
        session,
        &[
            ("vendor", Key::from(vendor.as_str())),
            ("name", Key::from(name.as_str())),
        ],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO model(vendor, name, model_type) VALUES(?1, ?2, ?3)",
        params![vendor, name, model_type.tag()],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

// ===== Operating system =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatingSystem {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub archetype_id: i64,
}

pub static OPERATING_SYSTEM_META: EntityMeta = EntityMeta {
    table: "operating_system",
    class_label: "Operating System",
    select: "SELECT o.id, o.name, o.version, o.archetype_id FROM operating_system o",
    id_column: "o.id",
    unique_fields: &[
        Field::plain("name", "o.name"),
        Field::plain("version", "o.version"),
        Field::reference("archetype", "o.archetype_id", &ARCHETYPE_META),
    ],
    extra_search_fields: &[],
};

impl Entity for OperatingSystem {
    fn meta() -> &'static EntityMeta {
        &OPERATING_SYSTEM_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OperatingSystem {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            archetype_id: row.get(3)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

pub fn add_operating_system(
    session: &Session<'_>,
    archetype: &Archetype,
    name: &str,
    version: &str,
) -> Result<OperatingSystem, AquilonError> {
    let name = check_name("operating system", name)?;
    let version = check_name("version", version)?;
    entity::get_unique::<OperatingSystem>(
        session,
        &[
            ("name", Key::from(name.as_str())),
            ("version", Key::from(version.as_str())),
            ("archetype", Key::from(archetype.id)),
        ],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO operating_system(name, version, archetype_id) VALUES(?1, ?2, ?3)",
        params![name, version, archetype.id],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

// ===== Hardware entity =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareEntity {
    pub id: i64,
    pub label: String,
    pub hardware_type: String,
    pub model_id: i64,
    pub location_id: i64,
    pub primary_name_id: Option<i64>,
    pub serial_no: Option<String>,
}

pub static HARDWARE_ENTITY_META: EntityMeta = EntityMeta {
    table: "hardware_entity",
    class_label: "Machine",
    select: "SELECT hw.id, hw.label, hw.hardware_type, hw.model_id, hw.location_id,
                    hw.primary_name_id, hw.serial_no
               FROM hardware_entity hw",
    id_column: "hw.id",
    unique_fields: &[Field::plain("label", "hw.label")],
    extra_search_fields: &[
        Field::plain("primary_name", "hw.primary_name_id"),
        Field::reference("location", "hw.location_id", &LOCATION_META),
    ],
};

impl Entity for HardwareEntity {
    fn meta() -> &'static EntityMeta {
        &HARDWARE_ENTITY_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HardwareEntity {
            id: row.get(0)?,
            label: row.get(1)?,
            hardware_type: row.get(2)?,
            model_id: row.get(3)?,
            location_id: row.get(4)?,
            primary_name_id: row.get(5)?,
            serial_no: row.get(6)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn class_label(&self) -> &'static str {
        match self.hardware_type.as_str() {
            "network_device" => "Network Device",
            _ => "Machine",
        }
    }
}

pub fn add_machine(
    session: &Session<'_>,
    label: &str,
    model: &Model,
    location: &Location,
    serial_no: Option<&str>,
) -> Result<HardwareEntity, AquilonError> {
    let label = check_name("machine", label)?;
    if !model.model_type.is_hardware_entity_type() {
        return Err(AquilonError::ArgumentError(format!(
            "{} is not a hardware entity model.",
            model.qualified_name()
        )));
    }
    entity::get_unique::<HardwareEntity>(
        session,
        &[("label", Key::from(label.as_str()))],
        false,
        true,
    )?;
    let hardware_type = if model.model_type == ModelType::Switch {
        "network_device"
    } else {
        "machine"
    };
    session.conn().execute(
        "INSERT INTO hardware_entity(label, hardware_type, model_id, location_id, serial_no)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![label, hardware_type, model.id, location.id, serial_no],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn hardware_location(
    session: &Session<'_>,
    hardware: &HardwareEntity,
) -> Result<Location, AquilonError> {
    entity::get_by_id(session, hardware.location_id)
}

// ===== Interface =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub id: i64,
    pub hardware_entity_id: i64,
    pub hardware_label: String,
    pub name: String,
    pub mac: Option<String>,
    pub model_id: Option<i64>,
    pub interface_type: String,
}

pub static INTERFACE_META: EntityMeta = EntityMeta {
    table: "interface",
    class_label: "Interface",
    select: "SELECT i.id, i.hardware_entity_id, hw.label, i.name, i.mac, i.model_id, i.interface_type
               FROM interface i JOIN hardware_entity hw ON hw.id = i.hardware_entity_id",
    id_column: "i.id",
    unique_fields: &[
        Field::reference("hardware_entity", "i.hardware_entity_id", &HARDWARE_ENTITY_META),
        Field::plain("name", "i.name"),
    ],
    extra_search_fields: &[Field::plain("mac", "i.mac")],
};

impl Entity for Interface {
    fn meta() -> &'static EntityMeta {
        &INTERFACE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Interface {
            id: row.get(0)?,
            hardware_entity_id: row.get(1)?,
            hardware_label: row.get(2)?,
            name: row.get(3)?,
            mac: row.get(4)?,
            model_id: row.get(5)?,
            interface_type: row.get(6)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{} of {}", self.name, self.hardware_label)
    }
}

/// Normalizes a MAC address to lower-case colon form.
pub fn parse_mac(mac: &str) -> Result<String, AquilonError> {
    let digits: String = mac
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AquilonError::ArgumentError(format!(
            "Expected a MAC address like 00:1a:2b:3c:0d:55, got '{mac}'."
        )));
    }
    let lower = digits.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}

pub fn add_interface(
    session: &Session<'_>,
    hardware: &HardwareEntity,
    name: &str,
    mac: Option<&str>,
    model: Option<&Model>,
) -> Result<Interface, AquilonError> {
    let name = check_name("interface", name)?;
    let mac = mac.map(parse_mac).transpose()?;
    if let Some(model) = model {
        if !model.model_type.is_nic() {
            return Err(AquilonError::ArgumentError(format!(
                "{} is not a NIC model.",
                model.qualified_name()
            )));
        }
    }
    entity::get_unique::<Interface>(
        session,
        &[
            ("hardware_entity", Key::from(hardware.id)),
            ("name", Key::from(name.as_str())),
        ],
        false,
        true,
    )?;
    if let Some(mac) = &mac {
        if let Some(other) =
            entity::get_unique::<Interface>(session, &[("mac", Key::from(mac.as_str()))], false, false)?
        {
            return Err(AquilonError::ArgumentError(format!(
                "MAC address {} is already in use by {}.",
                mac,
                other.qualified_name()
            )));
        }
    }
    session.conn().execute(
        "INSERT INTO interface(hardware_entity_id, name, mac, model_id) VALUES(?1, ?2, ?3, ?4)",
        params![hardware.id, name, mac, model.map(|m| m.id)],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn hardware_interfaces(
    session: &Session<'_>,
    hardware: &HardwareEntity,
) -> Result<Vec<Interface>, AquilonError> {
    let sql = format!(
        "{} WHERE i.hardware_entity_id = ?1 ORDER BY i.name",
        INTERFACE_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![hardware.id], |row| Interface::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===== Host =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub id: i64,
    pub hardware_entity_id: i64,
    pub label: String,
    pub location_id: i64,
    pub personality_stage_id: i64,
    pub personality_id: i64,
    pub personality: String,
    pub archetype_id: i64,
    pub archetype: String,
    pub host_environment: String,
    pub branch_id: i64,
    pub branch: String,
    pub branch_type: BranchType,
    pub sandbox_author: Option<String>,
    pub operating_system_id: Option<i64>,
    pub status: String,
}

pub static HOST_META: EntityMeta = EntityMeta {
    table: "host",
    class_label: "Host",
    select: "SELECT h.id, h.hardware_entity_id, hw.label, hw.location_id, h.personality_stage_id,
                    ps.personality_id, p.name, p.archetype_id, a.name, p.host_environment,
                    h.branch_id, b.name, b.branch_type, h.sandbox_author, h.operating_system_id,
                    h.status
               FROM host h
               JOIN hardware_entity hw ON hw.id = h.hardware_entity_id
               JOIN personality_stage ps ON ps.id = h.personality_stage_id
               JOIN personality p ON p.id = ps.personality_id
               JOIN archetype a ON a.id = p.archetype_id
               JOIN branch b ON b.id = h.branch_id",
    id_column: "h.id",
    unique_fields: &[Field::plain("label", "hw.label")],
    extra_search_fields: &[Field::reference(
        "hardware_entity",
        "h.hardware_entity_id",
        &HARDWARE_ENTITY_META,
    )],
};

impl Entity for Host {
    fn meta() -> &'static EntityMeta {
        &HOST_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let branch_tag: String = row.get(12)?;
        Ok(Host {
            id: row.get(0)?,
            hardware_entity_id: row.get(1)?,
            label: row.get(2)?,
            location_id: row.get(3)?,
            personality_stage_id: row.get(4)?,
            personality_id: row.get(5)?,
            personality: row.get(6)?,
            archetype_id: row.get(7)?,
            archetype: row.get(8)?,
            host_environment: row.get(9)?,
            branch_id: row.get(10)?,
            branch: row.get(11)?,
            branch_type: entity::tag_from_sql(12, &branch_tag)?,
            sandbox_author: row.get(13)?,
            operating_system_id: row.get(14)?,
            status: row.get(15)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

impl Host {
    pub fn branch_description(&self) -> String {
        describe_branch(self.branch_type, &self.branch, self.sandbox_author.as_deref())
    }
}

pub struct NewHost<'a> {
    pub hardware: &'a HardwareEntity,
    pub personality_stage: &'a PersonalityStage,
    pub branch: &'a Branch,
    pub sandbox_author: Option<&'a str>,
    pub operating_system: Option<&'a OperatingSystem>,
}

pub fn add_host(session: &Session<'_>, new: NewHost<'_>) -> Result<Host, AquilonError> {
    if let Some(existing) = entity::get_unique::<Host>(
        session,
        &[("hardware_entity", Key::from(new.hardware.id))],
        false,
        false,
    )? {
        return Err(AquilonError::ArgumentError(format!(
            "{} already has a host: {}.",
            new.hardware.qualified_name(),
            existing.qualified_name()
        )));
    }
    check_sandbox_author(new.branch, new.sandbox_author)?;
    if let Some(os) = new.operating_system {
        if os.archetype_id != new.personality_stage.archetype_id {
            return Err(AquilonError::ArgumentError(format!(
                "{} does not belong to archetype {}.",
                os.qualified_name(),
                new.personality_stage.archetype
            )));
        }
    }

    session.conn().execute(
        "INSERT INTO host(hardware_entity_id, personality_stage_id, branch_id, sandbox_author,
                          operating_system_id, creation_date)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.hardware.id,
            new.personality_stage.id,
            new.branch.id,
            new.sandbox_author,
            new.operating_system.map(|os| os.id),
            time::now_epoch_z()
        ],
    )?;
    let host: Host = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(host = %host.label, "host added");
    Ok(host)
}

pub fn get_host(session: &Session<'_>, label: &str) -> Result<Host, AquilonError> {
    entity::get_unique_by_label::<Host>(session, label, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("Host {label} not found.")))
}

pub fn host_location(session: &Session<'_>, host: &Host) -> Result<Location, AquilonError> {
    entity::get_by_id(session, host.location_id)
}

/// Deletes a host. Its cluster membership and service client rows go first,
/// explicitly; the former cluster is then revalidated.
pub fn del_host(session: &Session<'_>, host: &Host) -> Result<(), AquilonError> {
    let host = host.reload(session)?;
    let membership: Option<i64> = session
        .conn()
        .query_row(
            "SELECT cluster_id FROM host_cluster_member WHERE host_id = ?1",
            params![host.id],
            |row| row.get(0),
        )
        .optional()?;
    let dbcluster = match membership {
        Some(cluster_id) => {
            let dbcluster: cluster::Cluster = entity::get_by_id(session, cluster_id)?;
            dbcluster.lock_row(session)?;
            Some(dbcluster)
        }
        None => None,
    };

    session
        .conn()
        .execute("DELETE FROM service_client WHERE host_id = ?1", params![host.id])?;
    if dbcluster.is_some() {
        session.conn().execute(
            "DELETE FROM host_cluster_member WHERE host_id = ?1",
            params![host.id],
        )?;
    }
    session
        .conn()
        .execute("DELETE FROM host WHERE id = ?1", params![host.id])?;

    if let Some(dbcluster) = dbcluster {
        cluster::validate(session, &dbcluster)?;
    }
    info!(host = %host.label, "host deleted");
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "inventory",
        "version": "0.1.0",
        "description": "Archetypes, personalities, branches, hardware and hosts",
        "commands": [
            { "name": "add_archetype", "parameters": ["name", "compileable"] },
            { "name": "add_personality", "parameters": ["archetype", "name", "host_environment"] },
            { "name": "add_branch", "parameters": ["name", "type"] },
            { "name": "add_model", "parameters": ["vendor", "name", "type"] },
            { "name": "add_machine", "parameters": ["label", "model", "location"] },
            { "name": "add_interface", "parameters": ["machine", "name", "mac", "model"] },
            { "name": "add_host", "parameters": ["machine", "personality", "branch", "sandbox_author", "os"] },
            { "name": "del_host", "parameters": ["host"] }
        ],
        "storage": ["archetype", "personality", "personality_stage", "branch", "model",
                    "operating_system", "hardware_entity", "interface", "host"]
    })
}
