//! DNS environments, network environments and IPv4 networks.
//!
//! A network environment partitions otherwise overlapping address space; each
//! one points at the DNS environment its addresses are published in. Networks
//! never overlap inside one environment, so an address resolves to at most one
//! network per environment.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::subsystems::location::{LOCATION_META, Location};
use ipnetwork::Ipv4Network;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::info;

pub fn ip_to_db(ip: Ipv4Addr) -> i64 {
    i64::from(u32::from(ip))
}

pub fn ip_from_db(value: i64) -> Ipv4Addr {
    Ipv4Addr::from(value as u32)
}

// ===== DNS environment =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsEnvironment {
    pub id: i64,
    pub name: String,
    pub comments: Option<String>,
}

pub static DNS_ENVIRONMENT_META: EntityMeta = EntityMeta {
    table: "dns_environment",
    class_label: "DNS Environment",
    select: "SELECT de.id, de.name, de.comments FROM dns_environment de",
    id_column: "de.id",
    unique_fields: &[Field::plain("name", "de.name")],
    extra_search_fields: &[],
};

impl Entity for DnsEnvironment {
    fn meta() -> &'static EntityMeta {
        &DNS_ENVIRONMENT_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DnsEnvironment {
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

impl DnsEnvironment {
    pub fn is_default(&self, session: &Session<'_>) -> bool {
        self.name == session.config().default_dns_environment
    }
}

pub fn add_dns_environment(
    session: &Session<'_>,
    name: &str,
    comments: Option<&str>,
) -> Result<DnsEnvironment, AquilonError> {
    let name = name.trim().to_lowercase();
    entity::get_unique::<DnsEnvironment>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    session.conn().execute(
        "INSERT INTO dns_environment(name, comments) VALUES(?1, ?2)",
        params![name, comments],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

/// Resolves a DNS environment by name, or the configured default.
pub fn get_dns_environment(
    session: &Session<'_>,
    name: Option<&str>,
) -> Result<DnsEnvironment, AquilonError> {
    let name = name.unwrap_or(&session.config().default_dns_environment);
    entity::get_unique_by_label::<DnsEnvironment>(session, name, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("DNS Environment {name} not found.")))
}

// ===== Network environment =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkEnvironment {
    pub id: i64,
    pub name: String,
    pub dns_environment_id: i64,
    pub dns_environment: String,
    pub location_id: Option<i64>,
    pub comments: Option<String>,
}

pub static NETWORK_ENVIRONMENT_META: EntityMeta = EntityMeta {
    table: "network_environment",
    class_label: "Network Environment",
    select: "SELECT ne.id, ne.name, ne.dns_environment_id, de.name, ne.location_id, ne.comments
               FROM network_environment ne
               JOIN dns_environment de ON de.id = ne.dns_environment_id",
    id_column: "ne.id",
    unique_fields: &[Field::plain("name", "ne.name")],
    extra_search_fields: &[Field::reference(
        "dns_environment",
        "ne.dns_environment_id",
        &DNS_ENVIRONMENT_META,
    )],
};

impl Entity for NetworkEnvironment {
    fn meta() -> &'static EntityMeta {
        &NETWORK_ENVIRONMENT_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(NetworkEnvironment {
            id: row.get(0)?,
            name: row.get(1)?,
            dns_environment_id: row.get(2)?,
            dns_environment: row.get(3)?,
            location_id: row.get(4)?,
            comments: row.get(5)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

impl NetworkEnvironment {
    pub fn is_default(&self, session: &Session<'_>) -> bool {
        self.name == session.config().default_network_environment
    }
}

pub fn add_network_environment(
    session: &Session<'_>,
    name: &str,
    dns_environment: &DnsEnvironment,
    location: Option<&Location>,
    comments: Option<&str>,
) -> Result<NetworkEnvironment, AquilonError> {
    let name = name.trim().to_lowercase();
    entity::get_unique::<NetworkEnvironment>(
        session,
        &[("name", Key::from(name.as_str()))],
        false,
        true,
    )?;
    session.conn().execute(
        "INSERT INTO network_environment(name, dns_environment_id, location_id, comments)
         VALUES(?1, ?2, ?3, ?4)",
        params![name, dns_environment.id, location.map(|l| l.id), comments],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

/// Resolves a network environment by name, or the configured default.
pub fn get_network_environment(
    session: &Session<'_>,
    name: Option<&str>,
) -> Result<NetworkEnvironment, AquilonError> {
    let name = name.unwrap_or(&session.config().default_network_environment);
    entity::get_unique_by_label::<NetworkEnvironment>(session, name, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("Network Environment {name} not found.")))
}

// ===== Network =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub id: i64,
    pub network_environment_id: i64,
    pub ip: Ipv4Addr,
    pub cidr: u8,
    pub name: String,
    pub network_type: String,
    pub location_id: Option<i64>,
    pub comments: Option<String>,
}

pub static NETWORK_META: EntityMeta = EntityMeta {
    table: "network",
    class_label: "Network",
    select: "SELECT n.id, n.network_environment_id, n.ip, n.cidr, n.name, n.network_type,
                    n.location_id, n.comments
               FROM network n",
    id_column: "n.id",
    unique_fields: &[
        Field::reference(
            "network_environment",
            "n.network_environment_id",
            &NETWORK_ENVIRONMENT_META,
        ),
        Field::plain("ip", "n.ip"),
    ],
    extra_search_fields: &[
        Field::plain("name", "n.name"),
        Field::reference("location", "n.location_id", &LOCATION_META),
    ],
};

impl Entity for Network {
    fn meta() -> &'static EntityMeta {
        &NETWORK_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Network {
            id: row.get(0)?,
            network_environment_id: row.get(1)?,
            ip: ip_from_db(row.get(2)?),
            cidr: row.get(3)?,
            name: row.get(4)?,
            network_type: row.get(5)?,
            location_id: row.get(6)?,
            comments: row.get(7)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{} [{}/{}]", self.name, self.ip, self.cidr)
    }
}

impl Network {
    pub fn network(&self) -> Result<Ipv4Network, AquilonError> {
        Ipv4Network::new(self.ip, self.cidr).map_err(|e| {
            AquilonError::InternalError(format!("stored network {} is invalid: {e}", self.id))
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.network().is_ok_and(|net| net.contains(ip))
    }

    pub fn broadcast(&self) -> Result<Ipv4Addr, AquilonError> {
        Ok(self.network()?.broadcast())
    }

    /// Number of addresses in the block, as a plain integer.
    pub fn size(&self) -> i64 {
        1i64 << (32 - u32::from(self.cidr))
    }
}

pub struct NewNetwork<'a> {
    pub name: &'a str,
    pub ip: Ipv4Addr,
    pub cidr: u8,
    pub network_type: Option<&'a str>,
    pub location: Option<&'a Location>,
    pub comments: Option<&'a str>,
}

pub fn add_network(
    session: &Session<'_>,
    environment: &NetworkEnvironment,
    new: NewNetwork<'_>,
) -> Result<Network, AquilonError> {
    let block = Ipv4Network::new(new.ip, new.cidr)
        .map_err(|e| AquilonError::ArgumentError(format!("Invalid network {}/{}: {e}", new.ip, new.cidr)))?;
    if block.network() != new.ip {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {} is not a network address for prefix length {}; did you mean {}?",
            new.ip,
            new.cidr,
            block.network()
        )));
    }

    let start = ip_to_db(block.network());
    let end = ip_to_db(block.broadcast());
    let overlapping: Option<Network> = session
        .conn()
        .query_row(
            &format!(
                "{} WHERE n.network_environment_id = ?1
                   AND n.ip <= ?3
                   AND n.ip + (1 << (32 - n.cidr)) - 1 >= ?2
                 ORDER BY n.ip LIMIT 1",
                NETWORK_META.select
            ),
            params![environment.id, start, end],
            |row| Network::from_row(row),
        )
        .optional()?;
    if let Some(other) = overlapping {
        return Err(AquilonError::ArgumentError(format!(
            "Network {}/{} overlaps {} in {}.",
            new.ip,
            new.cidr,
            other.qualified_name(),
            environment.qualified_name()
        )));
    }

    session.conn().execute(
        "INSERT INTO network(network_environment_id, ip, cidr, name, network_type, location_id, comments)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            environment.id,
            start,
            new.cidr,
            new.name,
            new.network_type.unwrap_or("unknown"),
            new.location.map(|l| l.id),
            new.comments
        ],
    )?;
    let network: Network = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(network = %network.label(), environment = %environment.name, "network added");
    Ok(network)
}

/// The network of `environment` containing `ip`.
pub fn get_net_by_ip(
    session: &Session<'_>,
    ip: Ipv4Addr,
    environment: &NetworkEnvironment,
) -> Result<Network, AquilonError> {
    let sql = format!(
        "{} WHERE n.network_environment_id = ?1
           AND n.ip <= ?2
           AND n.ip + (1 << (32 - n.cidr)) > ?2
         ORDER BY n.cidr DESC LIMIT 1",
        NETWORK_META.select
    );
    session
        .conn()
        .query_row(&sql, params![environment.id, ip_to_db(ip)], |row| {
            Network::from_row(row)
        })
        .optional()?
        .ok_or_else(|| {
            AquilonError::NotFound(format!(
                "Could not determine network containing IP address {ip}."
            ))
        })
}

/// Rejects addresses that may never be handed out on `network`.
///
/// The network and broadcast addresses are always refused on blocks larger
/// than /31. The first host address is the default gateway and is refused
/// unless `relaxed` is set.
pub fn check_ip_restrictions(
    network: &Network,
    ip: Ipv4Addr,
    relaxed: bool,
) -> Result<(), AquilonError> {
    if !network.contains(ip) {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {ip} is not part of {}.",
            network.qualified_name()
        )));
    }
    if network.cidr >= 31 {
        return Ok(());
    }
    if ip == network.ip {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {ip} is the address of {}.",
            network.qualified_name()
        )));
    }
    if ip == network.broadcast()? {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {ip} is the broadcast address of {}.",
            network.qualified_name()
        )));
    }
    if !relaxed && ip_to_db(ip) == ip_to_db(network.ip) + 1 {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {ip} is reserved as the default gateway of {}.",
            network.qualified_name()
        )));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "network",
        "version": "0.1.0",
        "description": "DNS/network environments and non-overlapping IPv4 networks",
        "commands": [
            { "name": "add_dns_environment", "parameters": ["name", "comments"] },
            { "name": "add_network_environment", "parameters": ["name", "dns_environment", "location"] },
            { "name": "add_network", "parameters": ["environment", "name", "ip", "cidr", "type", "location"] },
            { "name": "get_net_by_ip", "parameters": ["ip", "environment"] }
        ],
        "storage": ["dns_environment", "network_environment", "network"]
    })
}
