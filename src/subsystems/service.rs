//! Services, their instances, and which services a host needs.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::subsystems::inventory::{Archetype, Host, OperatingSystem, PersonalityStage};
use regex::Regex;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::info;

static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub comments: Option<String>,
}

pub static SERVICE_META: EntityMeta = EntityMeta {
    table: "service",
    class_label: "Service",
    select: "SELECT s.id, s.name, s.comments FROM service s",
    id_column: "s.id",
    unique_fields: &[Field::plain("name", "s.name")],
    extra_search_fields: &[],
};

impl Entity for Service {
    fn meta() -> &'static EntityMeta {
        &SERVICE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Service {
            id: row.get(0)?,
            name: row.get(1)?,
            comments: row.get(2)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInstance {
    pub id: i64,
    pub service_id: i64,
    pub service: String,
    pub name: String,
}

pub static SERVICE_INSTANCE_META: EntityMeta = EntityMeta {
    table: "service_instance",
    class_label: "Service Instance",
    select: "SELECT si.id, si.service_id, s.name, si.name
               FROM service_instance si JOIN service s ON s.id = si.service_id",
    id_column: "si.id",
    unique_fields: &[
        Field::reference("service", "si.service_id", &SERVICE_META),
        Field::plain("name", "si.name"),
    ],
    extra_search_fields: &[],
};

impl Entity for ServiceInstance {
    fn meta() -> &'static EntityMeta {
        &SERVICE_INSTANCE_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ServiceInstance {
            id: row.get(0)?,
            service_id: row.get(1)?,
            service: row.get(2)?,
            name: row.get(3)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }
}

fn check_service_name(kind: &str, name: &str) -> Result<String, AquilonError> {
    let name = name.trim().to_lowercase();
    if !SERVICE_NAME_RE.is_match(&name) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal {kind} name '{name}'."
        )));
    }
    Ok(name)
}

pub fn add_service(
    session: &Session<'_>,
    name: &str,
    comments: Option<&str>,
) -> Result<Service, AquilonError> {
    let name = check_service_name("service", name)?;
    entity::get_unique::<Service>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    session.conn().execute(
        "INSERT INTO service(name, comments) VALUES(?1, ?2)",
        params![name, comments],
    )?;
    let service: Service = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(service = %service.name, "service added");
    Ok(service)
}

pub fn get_service(session: &Session<'_>, name: &str) -> Result<Service, AquilonError> {
    entity::get_unique_by_label::<Service>(session, name, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("Service {name} not found.")))
}

pub fn add_service_instance(
    session: &Session<'_>,
    service: &Service,
    name: &str,
) -> Result<ServiceInstance, AquilonError> {
    let name = check_service_name("service instance", name)?;
    entity::get_unique::<ServiceInstance>(
        session,
        &[
            ("service", Key::from(service.id)),
            ("name", Key::from(name.as_str())),
        ],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO service_instance(service_id, name) VALUES(?1, ?2)",
        params![service.id, name],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn get_service_instance(
    session: &Session<'_>,
    service: &Service,
    name: &str,
) -> Result<ServiceInstance, AquilonError> {
    entity::get_unique::<ServiceInstance>(
        session,
        &[
            ("service", Key::from(service.id)),
            ("name", Key::from(name)),
        ],
        false,
        false,
    )?
    .ok_or_else(|| {
        AquilonError::NotFound(format!(
            "Service Instance {}/{} not found.",
            service.name, name
        ))
    })
}

// ===== Service lists =====

/// What a service list item is attached to.
#[derive(Debug, Clone, Copy)]
pub enum ServiceScope<'a> {
    Archetype(&'a Archetype),
    /// Optionally narrowed to personalities of one host environment.
    PersonalityStage {
        stage: &'a PersonalityStage,
        host_environment: Option<&'a str>,
    },
    OperatingSystem(&'a OperatingSystem),
}

impl ServiceScope<'_> {
    /// (archetype_id, personality_stage_id, host_environment, operating_system_id)
    fn columns(&self) -> (Option<i64>, Option<i64>, Option<&str>, Option<i64>) {
        match self {
            ServiceScope::Archetype(a) => (Some(a.id), None, None, None),
            ServiceScope::PersonalityStage {
                stage,
                host_environment,
            } => (None, Some(stage.id), *host_environment, None),
            ServiceScope::OperatingSystem(os) => (None, None, None, Some(os.id)),
        }
    }

    fn describe(&self) -> String {
        match self {
            ServiceScope::Archetype(a) => a.qualified_name(),
            ServiceScope::PersonalityStage {
                stage,
                host_environment: Some(env),
            } => format!("{} in environment {}", stage.qualified_name(), env),
            ServiceScope::PersonalityStage { stage, .. } => stage.qualified_name(),
            ServiceScope::OperatingSystem(os) => os.qualified_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceListItem {
    pub id: i64,
    pub service_id: i64,
    pub archetype_id: Option<i64>,
    pub personality_stage_id: Option<i64>,
    pub host_environment: Option<String>,
    pub operating_system_id: Option<i64>,
    pub optional: bool,
}

fn list_item_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceListItem> {
    Ok(ServiceListItem {
        id: row.get(0)?,
        service_id: row.get(1)?,
        archetype_id: row.get(2)?,
        personality_stage_id: row.get(3)?,
        host_environment: row.get(4)?,
        operating_system_id: row.get(5)?,
        optional: row.get(6)?,
    })
}

fn find_list_item(
    session: &Session<'_>,
    service: &Service,
    scope: &ServiceScope<'_>,
) -> Result<Option<ServiceListItem>, AquilonError> {
    let (archetype_id, stage_id, host_environment, os_id) = scope.columns();
    Ok(session
        .conn()
        .query_row(
            "SELECT id, service_id, archetype_id, personality_stage_id, host_environment,
                    operating_system_id, optional
               FROM service_list_item
              WHERE service_id = ?1
                AND archetype_id IS ?2
                AND personality_stage_id IS ?3
                AND host_environment IS ?4
                AND operating_system_id IS ?5",
            params![service.id, archetype_id, stage_id, host_environment, os_id],
            list_item_from_row,
        )
        .optional()?)
}

pub fn bind_service(
    session: &Session<'_>,
    service: &Service,
    scope: ServiceScope<'_>,
    optional: bool,
) -> Result<ServiceListItem, AquilonError> {
    if find_list_item(session, service, &scope)?.is_some() {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already required by {}.",
            service.qualified_name(),
            scope.describe()
        )));
    }
    let (archetype_id, stage_id, host_environment, os_id) = scope.columns();
    session.conn().execute(
        "INSERT INTO service_list_item(service_id, archetype_id, personality_stage_id,
                                       host_environment, operating_system_id, optional)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![service.id, archetype_id, stage_id, host_environment, os_id, optional],
    )?;
    info!(service = %service.name, scope = %scope.describe(), optional, "service bound");
    find_list_item(session, service, &scope)?.ok_or_else(|| {
        AquilonError::InternalError(format!(
            "{} list item vanished right after insert",
            service.qualified_name()
        ))
    })
}

pub fn unbind_service(
    session: &Session<'_>,
    service: &Service,
    scope: ServiceScope<'_>,
) -> Result<(), AquilonError> {
    let Some(item) = find_list_item(session, service, &scope)? else {
        return Err(AquilonError::NotFound(format!(
            "{} is not required by {}.",
            service.qualified_name(),
            scope.describe()
        )));
    };
    session
        .conn()
        .execute("DELETE FROM service_list_item WHERE id = ?1", params![item.id])?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequiredServices {
    pub required: BTreeSet<Service>,
    pub optional: BTreeSet<Service>,
}

/// Services that apply to a personality stage, optionally together with an
/// operating system. A service that is required by any scope is never
/// reported as optional.
pub fn stage_services(
    session: &Session<'_>,
    stage: &PersonalityStage,
    operating_system_id: Option<i64>,
) -> Result<RequiredServices, AquilonError> {
    let mut stmt = session.conn().prepare(
        "SELECT s.id, s.name, s.comments, sli.optional
           FROM service_list_item sli JOIN service s ON s.id = sli.service_id
          WHERE sli.archetype_id = ?1
             OR (sli.personality_stage_id = ?2
                 AND (sli.host_environment IS NULL OR sli.host_environment = ?3))
             OR (?4 IS NOT NULL AND sli.operating_system_id = ?4)",
    )?;
    let rows = stmt.query_map(
        params![
            stage.archetype_id,
            stage.id,
            stage.host_environment,
            operating_system_id
        ],
        |row| {
            let optional: bool = row.get(3)?;
            Ok((Service::from_row(row)?, optional))
        },
    )?;

    let mut result = RequiredServices::default();
    for row in rows {
        let (service, optional) = row?;
        if optional {
            result.optional.insert(service);
        } else {
            result.required.insert(service);
        }
    }
    let required = result.required.clone();
    result.optional.retain(|s| !required.contains(s));
    Ok(result)
}

pub fn host_services(session: &Session<'_>, host: &Host) -> Result<RequiredServices, AquilonError> {
    let stage: PersonalityStage = entity::get_by_id(session, host.personality_stage_id)?;
    stage_services(session, &stage, host.operating_system_id)
}

// ===== Clients =====

pub fn host_service_instances(
    session: &Session<'_>,
    host: &Host,
) -> Result<Vec<ServiceInstance>, AquilonError> {
    let sql = format!(
        "{} JOIN service_client sc ON sc.service_instance_id = si.id
          WHERE sc.host_id = ?1
          ORDER BY s.name, si.name",
        SERVICE_INSTANCE_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![host.id], |row| ServiceInstance::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Makes `host` a client of `instance`. A host uses at most one instance per
/// service.
pub fn bind_client(
    session: &Session<'_>,
    host: &Host,
    instance: &ServiceInstance,
) -> Result<(), AquilonError> {
    if let Some(current) = host_service_instances(session, host)?
        .into_iter()
        .find(|si| si.service_id == instance.service_id)
    {
        return Err(AquilonError::ArgumentError(if current.id == instance.id {
            format!(
                "{} is already a client of {}.",
                host.qualified_name(),
                instance.qualified_name()
            )
        } else {
            format!(
                "{} is already bound to {}, unbind it first.",
                host.qualified_name(),
                current.qualified_name()
            )
        }));
    }
    session.conn().execute(
        "INSERT INTO service_client(host_id, service_instance_id) VALUES(?1, ?2)",
        params![host.id, instance.id],
    )?;
    info!(host = %host.label, instance = %instance.label(), "service client bound");
    Ok(())
}

pub fn unbind_client(
    session: &Session<'_>,
    host: &Host,
    instance: &ServiceInstance,
) -> Result<(), AquilonError> {
    let changed = session.conn().execute(
        "DELETE FROM service_client WHERE host_id = ?1 AND service_instance_id = ?2",
        params![host.id, instance.id],
    )?;
    if changed == 0 {
        return Err(AquilonError::NotFound(format!(
            "{} is not a client of {}.",
            host.qualified_name(),
            instance.qualified_name()
        )));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "service",
        "version": "0.1.0",
        "description": "Services, instances, service lists and clients",
        "commands": [
            { "name": "add_service", "parameters": ["service", "comments"] },
            { "name": "add_service_instance", "parameters": ["service", "instance"] },
            { "name": "bind_service", "parameters": ["service", "archetype", "personality", "environment", "osname", "optional"] },
            { "name": "unbind_service", "parameters": ["service", "archetype", "personality", "environment", "osname"] },
            { "name": "host_services", "parameters": ["host"] },
            { "name": "bind_client", "parameters": ["host", "service", "instance"] },
            { "name": "unbind_client", "parameters": ["host", "service", "instance"] }
        ],
        "storage": ["service", "service_instance", "service_list_item", "service_client"]
    })
}
