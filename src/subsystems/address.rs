//! Address assignments: which interface answers on which `(network, ip)`.
//!
//! The association is explicit; `interface_addresses` is the accessor and
//! every mutation goes through `assign_address` / `unassign_address`.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::subsystems::dns::{self, DNS_RECORD_META, DnsRecord, GrabRequest, ReleaseOpts};
use crate::subsystems::inventory::{INTERFACE_META, Interface};
use crate::subsystems::network::{NETWORK_META, Network, ip_from_db, ip_to_db};
use regex::Regex;
use rusqlite::{Row, params};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::info;

static ADDRESS_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{0,16}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressAssignment {
    pub id: i64,
    pub interface_id: i64,
    pub interface_name: String,
    pub hardware_label: String,
    pub ip: Ipv4Addr,
    pub network_id: i64,
    pub label: String,
    pub is_shared: bool,
    pub priority: Option<i64>,
    pub service_address_id: Option<i64>,
}

pub static ADDRESS_ASSIGNMENT_META: EntityMeta = EntityMeta {
    table: "address_assignment",
    class_label: "Address Assignment",
    select: "SELECT aa.id, aa.interface_id, i.name, hw.label, aa.ip, aa.network_id, aa.label,
                    aa.is_shared, aa.priority, aa.service_address_id
               FROM address_assignment aa
               JOIN interface i ON i.id = aa.interface_id
               JOIN hardware_entity hw ON hw.id = i.hardware_entity_id",
    id_column: "aa.id",
    unique_fields: &[
        Field::reference("interface", "aa.interface_id", &INTERFACE_META),
        Field::plain("ip", "aa.ip"),
    ],
    extra_search_fields: &[
        Field::plain("label", "aa.label"),
        Field::reference("network", "aa.network_id", &NETWORK_META),
    ],
};

impl Entity for AddressAssignment {
    fn meta() -> &'static EntityMeta {
        &ADDRESS_ASSIGNMENT_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AddressAssignment {
            id: row.get(0)?,
            interface_id: row.get(1)?,
            interface_name: row.get(2)?,
            hardware_label: row.get(3)?,
            ip: ip_from_db(row.get(4)?),
            network_id: row.get(5)?,
            label: row.get(6)?,
            is_shared: row.get(7)?,
            priority: row.get(8)?,
            service_address_id: row.get(9)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{} on {}", self.ip, self.interface_label())
    }
}

impl AddressAssignment {
    /// `"interface eth0 of host1"`, used in conflict messages.
    pub fn interface_label(&self) -> String {
        format!("interface {} of {}", self.interface_name, self.hardware_label)
    }
}

fn query_assignments<P: rusqlite::Params>(
    session: &Session<'_>,
    filter: &str,
    params: P,
) -> Result<Vec<AddressAssignment>, AquilonError> {
    let sql = format!(
        "{} WHERE {} ORDER BY aa.id",
        ADDRESS_ASSIGNMENT_META.select, filter
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params, |row| AddressAssignment::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Every assignment claiming `(network, ip)`.
pub fn assignments_at(
    session: &Session<'_>,
    network_id: i64,
    ip: Ipv4Addr,
) -> Result<Vec<AddressAssignment>, AquilonError> {
    query_assignments(
        session,
        "aa.network_id = ?1 AND aa.ip = ?2",
        params![network_id, ip_to_db(ip)],
    )
}

/// The addresses of one interface, primary (empty label) first.
pub fn interface_addresses(
    session: &Session<'_>,
    interface: &Interface,
) -> Result<Vec<AddressAssignment>, AquilonError> {
    let sql = format!(
        "{} WHERE aa.interface_id = ?1 ORDER BY aa.label, aa.ip",
        ADDRESS_ASSIGNMENT_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![interface.id], |row| {
        AddressAssignment::from_row(row)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// A records made visible by an assignment.
///
/// Joins on `network_id` and `ip`, keeping only records whose DNS
/// environment is the one the assignment's network environment publishes to.
pub fn assignment_dns_records(
    session: &Session<'_>,
    assignment: &AddressAssignment,
) -> Result<Vec<DnsRecord>, AquilonError> {
    let sql = format!(
        "{}
           JOIN network n ON n.id = r.network_id
           JOIN network_environment ne ON ne.id = n.network_environment_id
          WHERE r.network_id = ?1
            AND r.ip = ?2
            AND r.record_type = 'a_record'
            AND f.dns_environment_id = ne.dns_environment_id
          ORDER BY r.id",
        DNS_RECORD_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(
        params![assignment.network_id, ip_to_db(assignment.ip)],
        |row| DnsRecord::from_row(row),
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub struct AssignRequest<'a> {
    pub interface: &'a Interface,
    pub network: &'a Network,
    pub ip: Ipv4Addr,
    pub label: Option<&'a str>,
    pub shared: bool,
    pub priority: Option<i64>,
    pub service_address: Option<&'a ServiceAddress>,
}

pub fn assign_address(
    session: &Session<'_>,
    req: &AssignRequest<'_>,
) -> Result<AddressAssignment, AquilonError> {
    let label = req.label.unwrap_or("").trim().to_lowercase();
    if !ADDRESS_LABEL_RE.is_match(&label) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal address label '{label}'."
        )));
    }
    if !req.network.contains(req.ip) {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {} is not part of {}.",
            req.ip,
            req.network.qualified_name()
        )));
    }
    match (req.shared, req.priority) {
        (true, None) => {
            return Err(AquilonError::ArgumentError(
                "Shared addresses require a priority.".to_string(),
            ));
        }
        (true, Some(p)) if p <= 0 => {
            return Err(AquilonError::ArgumentError(format!(
                "The priority of a shared address must be positive, got {p}."
            )));
        }
        (false, Some(_)) => {
            return Err(AquilonError::ArgumentError(
                "A priority is only meaningful for shared addresses.".to_string(),
            ));
        }
        _ => {}
    }

    let interface = req.interface;
    if entity::get_unique::<AddressAssignment>(
        session,
        &[
            ("interface", Key::from(interface.id)),
            ("ip", Key::from(ip_to_db(req.ip))),
        ],
        false,
        false,
    )?
    .is_some()
    {
        return Err(AquilonError::ArgumentError(format!(
            "{} already has IP address {}.",
            interface.qualified_name(),
            req.ip
        )));
    }
    if entity::get_unique::<AddressAssignment>(
        session,
        &[
            ("interface", Key::from(interface.id)),
            ("label", Key::from(label.as_str())),
        ],
        false,
        false,
    )?
    .is_some()
    {
        let what = if label.is_empty() {
            "a primary address".to_string()
        } else {
            format!("an address labelled {label}")
        };
        return Err(AquilonError::ArgumentError(format!(
            "{} already has {}.",
            interface.qualified_name(),
            what
        )));
    }

    for other in assignments_at(session, req.network.id, req.ip)? {
        if !req.shared || !other.is_shared {
            return Err(AquilonError::ArgumentError(format!(
                "IP address {} is already in use by {}.",
                req.ip,
                other.interface_label()
            )));
        }
        if other.priority == req.priority {
            return Err(AquilonError::ArgumentError(format!(
                "Priority {} is already used by {} for IP address {}.",
                other.priority.unwrap_or_default(),
                other.interface_label(),
                req.ip
            )));
        }
    }

    session.conn().execute(
        "INSERT INTO address_assignment(interface_id, ip, network_id, label, is_shared, priority,
                                        service_address_id)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            interface.id,
            ip_to_db(req.ip),
            req.network.id,
            label,
            req.shared,
            req.priority,
            req.service_address.map(|s| s.id)
        ],
    )?;
    let assignment: AddressAssignment =
        entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(
        ip = %assignment.ip,
        interface = %assignment.interface_label(),
        shared = assignment.is_shared,
        "address assigned"
    );
    Ok(assignment)
}

/// Removes an assignment. Once no interface claims the address any more,
/// the A records it made visible are released too, except primary names.
///
/// Returns the released records.
pub fn unassign_address(
    session: &Session<'_>,
    interface: &Interface,
    ip: Ipv4Addr,
) -> Result<Vec<DnsRecord>, AquilonError> {
    let assignment = entity::get_unique::<AddressAssignment>(
        session,
        &[
            ("interface", Key::from(interface.id)),
            ("ip", Key::from(ip_to_db(ip))),
        ],
        false,
        false,
    )?
    .ok_or_else(|| {
        AquilonError::NotFound(format!(
            "{} does not have IP address {}.",
            interface.qualified_name(),
            ip
        ))
    })?;

    let records = assignment_dns_records(session, &assignment)?;
    session.conn().execute(
        "DELETE FROM address_assignment WHERE id = ?1",
        params![assignment.id],
    )?;

    let mut released = Vec::new();
    if assignments_at(session, assignment.network_id, ip)?.is_empty() {
        for record in records {
            let is_primary: bool = session.conn().query_row(
                "SELECT EXISTS(SELECT 1 FROM hardware_entity WHERE primary_name_id = ?1)",
                params![record.id],
                |row| row.get(0),
            )?;
            if is_primary {
                continue;
            }
            dns::delete_dns_record(session, &record, ReleaseOpts::default())?;
            released.push(record);
        }
    }
    info!(%ip, interface = %interface.qualified_name(), released = released.len(), "address unassigned");
    Ok(released)
}

// ===== Service addresses =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAddress {
    pub id: i64,
    pub name: String,
    pub holder: String,
    pub dns_record_id: i64,
}

pub static SERVICE_ADDRESS_META: EntityMeta = EntityMeta {
    table: "service_address",
    class_label: "Service Address",
    select: "SELECT sa.id, sa.name, sa.holder, sa.dns_record_id FROM service_address sa",
    id_column: "sa.id",
    unique_fields: &[
        Field::plain("name", "sa.name"),
        Field::plain("holder", "sa.holder"),
    ],
    extra_search_fields: &[Field::reference(
        "dns_record",
        "sa.dns_record_id",
        &DNS_RECORD_META,
    )],
};

impl Entity for ServiceAddress {
    fn meta() -> &'static EntityMeta {
        &SERVICE_ADDRESS_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ServiceAddress {
            id: row.get(0)?,
            name: row.get(1)?,
            holder: row.get(2)?,
            dns_record_id: row.get(3)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{} of {}", self.name, self.holder)
    }
}

/// Grabs an address for a floating service name and records who holds it.
pub fn add_service_address(
    session: &Session<'_>,
    name: &str,
    holder: &str,
    grab: &GrabRequest<'_>,
) -> Result<ServiceAddress, AquilonError> {
    entity::get_unique::<ServiceAddress>(
        session,
        &[("name", Key::from(name)), ("holder", Key::from(holder))],
        false,
        true,
    )?;
    if grab.ip.is_none() {
        return Err(AquilonError::ArgumentError(format!(
            "Service address {name} needs an IP address."
        )));
    }
    let grabbed = dns::grab_address(session, grab)?;
    session.conn().execute(
        "INSERT INTO service_address(name, holder, dns_record_id) VALUES(?1, ?2, ?3)",
        params![name, holder, grabbed.record.id],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "address",
        "version": "0.1.0",
        "description": "Interface address assignments and service addresses",
        "commands": [
            { "name": "assign_address", "parameters": ["interface", "ip", "label", "shared", "priority"] },
            { "name": "unassign_address", "parameters": ["interface", "ip"] },
            { "name": "add_service_address", "parameters": ["name", "holder", "fqdn", "ip"] }
        ],
        "storage": ["address_assignment", "service_address"]
    })
}
