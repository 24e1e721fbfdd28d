//! DNS domains, names and records, and the address allocation engine.
//!
//! [`grab_address`] is the only way a name gets bound to an address and
//! [`delete_dns_record`] the only way such a binding is torn down. Both lock
//! the DNS domain row before any network row; see `core::session::LOCK_ORDER`.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::core::time;
use crate::subsystems::address;
use crate::subsystems::inventory::HardwareEntity;
use crate::subsystems::network::{
    self, DNS_ENVIRONMENT_META, DnsEnvironment, NETWORK_META, Network, ip_from_db, ip_to_db,
};
use regex::Regex;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::{debug, info};

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?$").unwrap());

static SRV_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,62}$").unwrap());

pub const SRV_PROTOCOLS: &[&str] = &["tcp", "udp"];

// ===== DNS domain =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsDomain {
    pub id: i64,
    pub name: String,
    pub restricted: bool,
    pub comments: Option<String>,
}

pub static DNS_DOMAIN_META: EntityMeta = EntityMeta {
    table: "dns_domain",
    class_label: "DNS Domain",
    select: "SELECT d.id, d.name, d.restricted, d.comments FROM dns_domain d",
    id_column: "d.id",
    unique_fields: &[Field::plain("name", "d.name")],
    extra_search_fields: &[],
};

impl Entity for DnsDomain {
    fn meta() -> &'static EntityMeta {
        &DNS_DOMAIN_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DnsDomain {
            id: row.get(0)?,
            name: row.get(1)?,
            restricted: row.get(2)?,
            comments: row.get(3)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

pub fn add_dns_domain(
    session: &Session<'_>,
    name: &str,
    restricted: bool,
    comments: Option<&str>,
) -> Result<DnsDomain, AquilonError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || !name.split('.').all(|part| LABEL_RE.is_match(part)) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal DNS domain name '{name}'."
        )));
    }
    entity::get_unique::<DnsDomain>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    session.conn().execute(
        "INSERT INTO dns_domain(name, restricted, comments) VALUES(?1, ?2, ?3)",
        params![name, restricted, comments],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

pub fn get_dns_domain(session: &Session<'_>, name: &str) -> Result<DnsDomain, AquilonError> {
    entity::get_unique_by_label::<DnsDomain>(session, name, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("DNS Domain {name} not found.")))
}

// ===== Fqdn =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fqdn {
    pub id: i64,
    pub name: String,
    pub dns_domain_id: i64,
    pub dns_domain: String,
    pub restricted: bool,
    pub dns_environment_id: i64,
    pub dns_environment: String,
}

pub static FQDN_META: EntityMeta = EntityMeta {
    table: "fqdn",
    class_label: "Fqdn",
    select: "SELECT f.id, f.name, f.dns_domain_id, d.name, d.restricted, f.dns_environment_id, de.name
               FROM fqdn f
               JOIN dns_domain d ON d.id = f.dns_domain_id
               JOIN dns_environment de ON de.id = f.dns_environment_id",
    id_column: "f.id",
    unique_fields: &[
        Field::plain("name", "f.name"),
        Field::reference("dns_domain", "f.dns_domain_id", &DNS_DOMAIN_META),
        Field::reference("dns_environment", "f.dns_environment_id", &DNS_ENVIRONMENT_META),
    ],
    extra_search_fields: &[],
};

impl Fqdn {
    fn from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Fqdn {
            id: row.get(base)?,
            name: row.get(base + 1)?,
            dns_domain_id: row.get(base + 2)?,
            dns_domain: row.get(base + 3)?,
            restricted: row.get(base + 4)?,
            dns_environment_id: row.get(base + 5)?,
            dns_environment: row.get(base + 6)?,
        })
    }

    pub fn fqdn(&self) -> String {
        if self.name.is_empty() {
            self.dns_domain.clone()
        } else {
            format!("{}.{}", self.name, self.dns_domain)
        }
    }
}

impl Entity for Fqdn {
    fn meta() -> &'static EntityMeta {
        &FQDN_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Fqdn::from_row_at(row, 0)
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.fqdn()
    }
}

/// Splits `name.domain` at the first dot and resolves the domain.
pub fn parse_fqdn(session: &Session<'_>, fqdn: &str) -> Result<(String, DnsDomain), AquilonError> {
    let fqdn = fqdn.trim().trim_end_matches('.').to_lowercase();
    let Some((short, domain)) = fqdn.split_once('.') else {
        return Err(AquilonError::ArgumentError(format!(
            "'{fqdn}' is not a fully qualified domain name."
        )));
    };
    if !LABEL_RE.is_match(short) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal DNS name '{short}' in '{fqdn}'."
        )));
    }
    let domain = get_dns_domain(session, domain)?;
    Ok((short.to_string(), domain))
}

fn find_fqdn(
    session: &Session<'_>,
    short: &str,
    domain: &DnsDomain,
    environment: &DnsEnvironment,
) -> Result<Option<Fqdn>, AquilonError> {
    entity::get_unique::<Fqdn>(
        session,
        &[
            ("name", Key::from(short)),
            ("dns_domain", Key::from(domain.id)),
            ("dns_environment", Key::from(environment.id)),
        ],
        false,
        false,
    )
}

/// Looks up an existing name in a DNS environment.
pub fn get_fqdn(
    session: &Session<'_>,
    fqdn: &str,
    environment: &DnsEnvironment,
) -> Result<Fqdn, AquilonError> {
    let (short, domain) = parse_fqdn(session, fqdn)?;
    find_fqdn(session, &short, &domain, environment)?.ok_or_else(|| {
        AquilonError::NotFound(format!(
            "Fqdn {}.{} not found in DNS environment {}.",
            short, domain.name, environment.name
        ))
    })
}

fn get_or_create_fqdn(
    session: &Session<'_>,
    short: &str,
    domain: &DnsDomain,
    environment: &DnsEnvironment,
) -> Result<(Fqdn, bool), AquilonError> {
    if let Some(existing) = find_fqdn(session, short, domain, environment)? {
        return Ok((existing, false));
    }
    session.conn().execute(
        "INSERT INTO fqdn(name, dns_domain_id, dns_environment_id, creation_date) VALUES(?1, ?2, ?3, ?4)",
        params![short, domain.id, environment.id, time::now_epoch_z()],
    )?;
    let fqdn = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    Ok((fqdn, true))
}

fn fqdn_referenced(session: &Session<'_>, fqdn_id: i64) -> Result<bool, AquilonError> {
    let count: i64 = session.conn().query_row(
        "SELECT COUNT(*) FROM dns_record WHERE target_id = ?1 OR reverse_ptr_id = ?1",
        params![fqdn_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Deletes the name if nothing lives on it and nothing points at it.
fn delete_fqdn_if_orphaned(session: &Session<'_>, fqdn_id: i64) -> Result<bool, AquilonError> {
    let records: i64 = session.conn().query_row(
        "SELECT COUNT(*) FROM dns_record WHERE fqdn_id = ?1",
        params![fqdn_id],
        |row| row.get(0),
    )?;
    if records > 0 || fqdn_referenced(session, fqdn_id)? {
        return Ok(false);
    }
    session
        .conn()
        .execute("DELETE FROM fqdn WHERE id = ?1", params![fqdn_id])?;
    debug!(fqdn_id, "orphaned fqdn deleted");
    Ok(true)
}

// ===== DNS records =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsRecordType {
    ARecord,
    DynamicStub,
    ReservedName,
    Alias,
    SrvRecord,
    AddressAlias,
}

impl Polymorphic for DnsRecordType {
    const TAGS: &'static [(&'static str, Self)] = &[
        ("a_record", DnsRecordType::ARecord),
        ("dynamic_stub", DnsRecordType::DynamicStub),
        ("reserved_name", DnsRecordType::ReservedName),
        ("alias", DnsRecordType::Alias),
        ("srv_record", DnsRecordType::SrvRecord),
        ("address_alias", DnsRecordType::AddressAlias),
    ];

    fn tag(&self) -> &'static str {
        match self {
            DnsRecordType::ARecord => "a_record",
            DnsRecordType::DynamicStub => "dynamic_stub",
            DnsRecordType::ReservedName => "reserved_name",
            DnsRecordType::Alias => "alias",
            DnsRecordType::SrvRecord => "srv_record",
            DnsRecordType::AddressAlias => "address_alias",
        }
    }

    fn subtype_label(&self) -> &'static str {
        match self {
            DnsRecordType::ARecord => "DNS Record",
            DnsRecordType::DynamicStub => "Dynamic Stub",
            DnsRecordType::ReservedName => "Reserved Name",
            DnsRecordType::Alias => "Alias",
            DnsRecordType::SrvRecord => "SRV Record",
            DnsRecordType::AddressAlias => "Address Alias",
        }
    }
}

/// Subtype payload of a DNS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    ARecord {
        ip: Ipv4Addr,
        network_id: i64,
        reverse_ptr_id: Option<i64>,
    },
    DynamicStub {
        ip: Ipv4Addr,
        network_id: i64,
    },
    ReservedName,
    Alias {
        target_id: i64,
    },
    SrvRecord {
        target_id: i64,
        service: String,
        protocol: String,
        priority: i64,
        weight: i64,
        port: i64,
    },
    AddressAlias {
        target_id: i64,
    },
}

impl RecordKind {
    pub fn record_type(&self) -> DnsRecordType {
        match self {
            RecordKind::ARecord { .. } => DnsRecordType::ARecord,
            RecordKind::DynamicStub { .. } => DnsRecordType::DynamicStub,
            RecordKind::ReservedName => DnsRecordType::ReservedName,
            RecordKind::Alias { .. } => DnsRecordType::Alias,
            RecordKind::SrvRecord { .. } => DnsRecordType::SrvRecord,
            RecordKind::AddressAlias { .. } => DnsRecordType::AddressAlias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub id: i64,
    pub fqdn: Fqdn,
    pub kind: RecordKind,
    pub ttl: Option<i64>,
    pub comments: Option<String>,
}

pub static DNS_RECORD_META: EntityMeta = EntityMeta {
    table: "dns_record",
    class_label: "DNS Record",
    select: "SELECT r.id, r.record_type, r.ip, r.network_id, r.reverse_ptr_id, r.target_id,
                    r.srv_service, r.srv_protocol, r.srv_priority, r.srv_weight, r.srv_port,
                    r.ttl, r.comments,
                    f.id, f.name, f.dns_domain_id, d.name, d.restricted, f.dns_environment_id, de.name
               FROM dns_record r
               JOIN fqdn f ON f.id = r.fqdn_id
               JOIN dns_domain d ON d.id = f.dns_domain_id
               JOIN dns_environment de ON de.id = f.dns_environment_id",
    id_column: "r.id",
    unique_fields: &[Field::reference("fqdn", "r.fqdn_id", &FQDN_META)],
    extra_search_fields: &[
        Field::plain("record_type", "r.record_type"),
        Field::plain("ip", "r.ip"),
        Field::reference("network", "r.network_id", &NETWORK_META),
        Field::reference("target", "r.target_id", &FQDN_META),
    ],
};

impl Entity for DnsRecord {
    fn meta() -> &'static EntityMeta {
        &DNS_RECORD_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(1)?;
        let kind = match entity::tag_from_sql::<DnsRecordType>(1, &tag)? {
            DnsRecordType::ARecord => RecordKind::ARecord {
                ip: ip_from_db(row.get(2)?),
                network_id: row.get(3)?,
                reverse_ptr_id: row.get(4)?,
            },
            DnsRecordType::DynamicStub => RecordKind::DynamicStub {
                ip: ip_from_db(row.get(2)?),
                network_id: row.get(3)?,
            },
            DnsRecordType::ReservedName => RecordKind::ReservedName,
            DnsRecordType::Alias => RecordKind::Alias {
                target_id: row.get(5)?,
            },
            DnsRecordType::SrvRecord => RecordKind::SrvRecord {
                target_id: row.get(5)?,
                service: row.get(6)?,
                protocol: row.get(7)?,
                priority: row.get(8)?,
                weight: row.get(9)?,
                port: row.get(10)?,
            },
            DnsRecordType::AddressAlias => RecordKind::AddressAlias {
                target_id: row.get(5)?,
            },
        };
        Ok(DnsRecord {
            id: row.get(0)?,
            kind,
            ttl: row.get(11)?,
            comments: row.get(12)?,
            fqdn: Fqdn::from_row_at(row, 13)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.fqdn.fqdn()
    }

    fn class_label(&self) -> &'static str {
        self.record_type().subtype_label()
    }
}

impl DnsRecord {
    pub fn record_type(&self) -> DnsRecordType {
        self.kind.record_type()
    }

    /// `(network_id, ip)` for address-carrying records.
    pub fn address(&self) -> Option<(i64, Ipv4Addr)> {
        match &self.kind {
            RecordKind::ARecord { ip, network_id, .. }
            | RecordKind::DynamicStub { ip, network_id } => Some((*network_id, *ip)),
            _ => None,
        }
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.address().map(|(_, ip)| ip)
    }

    pub fn target_id(&self) -> Option<i64> {
        match &self.kind {
            RecordKind::Alias { target_id }
            | RecordKind::SrvRecord { target_id, .. }
            | RecordKind::AddressAlias { target_id } => Some(*target_id),
            _ => None,
        }
    }

    pub fn reverse_ptr_id(&self) -> Option<i64> {
        match &self.kind {
            RecordKind::ARecord { reverse_ptr_id, .. } => *reverse_ptr_id,
            _ => None,
        }
    }
}

fn insert_record(
    session: &Session<'_>,
    fqdn: &Fqdn,
    kind: &RecordKind,
    comments: Option<&str>,
) -> Result<DnsRecord, AquilonError> {
    let (mut ip, mut network_id, mut reverse_ptr_id, mut target_id) = (None, None, None, None);
    let (mut service, mut protocol, mut priority, mut weight, mut port) =
        (None, None, None, None, None);
    match kind {
        RecordKind::ARecord {
            ip: addr,
            network_id: net,
            reverse_ptr_id: ptr,
        } => {
            ip = Some(ip_to_db(*addr));
            network_id = Some(*net);
            reverse_ptr_id = *ptr;
        }
        RecordKind::DynamicStub { ip: addr, network_id: net } => {
            ip = Some(ip_to_db(*addr));
            network_id = Some(*net);
        }
        RecordKind::ReservedName => {}
        RecordKind::Alias { target_id: t } | RecordKind::AddressAlias { target_id: t } => {
            target_id = Some(*t);
        }
        RecordKind::SrvRecord {
            target_id: t,
            service: s,
            protocol: p,
            priority: pri,
            weight: w,
            port: po,
        } => {
            target_id = Some(*t);
            service = Some(s.clone());
            protocol = Some(p.clone());
            priority = Some(*pri);
            weight = Some(*w);
            port = Some(*po);
        }
    }
    session.conn().execute(
        "INSERT INTO dns_record(fqdn_id, record_type, ip, network_id, reverse_ptr_id, target_id,
                                srv_service, srv_protocol, srv_priority, srv_weight, srv_port,
                                comments, creation_date)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            fqdn.id,
            kind.record_type().tag(),
            ip,
            network_id,
            reverse_ptr_id,
            target_id,
            service,
            protocol,
            priority,
            weight,
            port,
            comments,
            time::now_epoch_z()
        ],
    )?;
    entity::get_by_id(session, session.conn().last_insert_rowid())
}

fn query_records<P: rusqlite::Params>(
    session: &Session<'_>,
    filter: &str,
    params: P,
) -> Result<Vec<DnsRecord>, AquilonError> {
    let sql = format!("{} WHERE {} ORDER BY r.id", DNS_RECORD_META.select, filter);
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params, |row| DnsRecord::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Every record living on a name.
pub fn fqdn_records(session: &Session<'_>, fqdn: &Fqdn) -> Result<Vec<DnsRecord>, AquilonError> {
    query_records(session, "r.fqdn_id = ?1", params![fqdn.id])
}

/// Address records (A records and dynamic stubs) at one `(network, ip)`.
pub fn records_at(
    session: &Session<'_>,
    network_id: i64,
    ip: Ipv4Addr,
) -> Result<Vec<DnsRecord>, AquilonError> {
    query_records(
        session,
        "r.network_id = ?1 AND r.ip = ?2",
        params![network_id, ip_to_db(ip)],
    )
}

/// Records pointing at `fqdn` as an alias, SRV or address-alias target.
pub fn records_targeting(
    session: &Session<'_>,
    fqdn_id: i64,
) -> Result<Vec<DnsRecord>, AquilonError> {
    query_records(session, "r.target_id = ?1", params![fqdn_id])
}

fn primary_name_holder(
    session: &Session<'_>,
    record_id: i64,
) -> Result<Option<HardwareEntity>, AquilonError> {
    let id: Option<i64> = session
        .conn()
        .query_row(
            "SELECT id FROM hardware_entity WHERE primary_name_id = ?1",
            params![record_id],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| entity::get_by_id(session, id)).transpose()
}

fn service_address_usage(
    session: &Session<'_>,
    record_id: i64,
) -> Result<Option<(String, String)>, AquilonError> {
    Ok(session
        .conn()
        .query_row(
            "SELECT name, holder FROM service_address WHERE dns_record_id = ?1 ORDER BY id LIMIT 1",
            params![record_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

// ===== Acquire binding =====

#[derive(Debug, Clone, Copy, Default)]
pub struct GrabFlags {
    /// Allow the name to carry further addresses besides this one.
    pub allow_multi: bool,
    /// Without an IP, create a reserved name instead of failing.
    pub allow_reserved: bool,
    /// The address may already be claimed by shared assignments.
    pub allow_shared: bool,
    /// Fail if the binding already existed.
    pub preclude: bool,
    /// Permit the default gateway address.
    pub relaxed: bool,
    pub allow_restricted_domain: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GrabRequest<'a> {
    pub fqdn: &'a str,
    pub ip: Option<Ipv4Addr>,
    pub network_environment: Option<&'a str>,
    pub dns_environment: Option<&'a str>,
    pub comments: Option<&'a str>,
    pub flags: GrabFlags,
}

#[derive(Debug, Clone)]
pub struct Grabbed {
    pub record: DnsRecord,
    pub newly_created: bool,
}

/// Binds a name to an address, reusing or converting what already exists.
///
/// The returned record and flag carry what an external registry needs to
/// mirror the change.
pub fn grab_address(session: &Session<'_>, req: &GrabRequest<'_>) -> Result<Grabbed, AquilonError> {
    let flags = req.flags;
    let net_env = network::get_network_environment(session, req.network_environment)?;
    let dns_env: DnsEnvironment = match req.dns_environment {
        Some(name) => network::get_dns_environment(session, Some(name))?,
        None => entity::get_by_id(session, net_env.dns_environment_id)?,
    };
    if req.ip.is_some() && !net_env.is_default(session) && dns_env.is_default(session) {
        return Err(AquilonError::ArgumentError(format!(
            "Entering external IP addresses to the internal DNS environment is not allowed \
             ({} belongs to {}).",
            req.fqdn,
            net_env.qualified_name()
        )));
    }

    let (short, domain) = parse_fqdn(session, req.fqdn)?;
    domain.lock_row(session)?;
    if domain.restricted && !flags.allow_restricted_domain {
        return Err(AquilonError::ArgumentError(format!(
            "{} is restricted, adding extra addresses is not allowed.",
            domain.qualified_name()
        )));
    }

    let (fqdn, _) = get_or_create_fqdn(session, &short, &domain, &dns_env)?;

    let (record, newly_created) = match req.ip {
        Some(ip) => bind_with_ip(session, &fqdn, &dns_env, &net_env, ip, req.comments, flags)?,
        None => bind_without_ip(session, &fqdn, req.comments, flags)?,
    };

    // A reserved name converted in place keeps its row, and with it any
    // primary name role.
    if let Some(hw) = primary_name_holder(session, record.id)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already used as the primary name of {}.",
            record.qualified_name(),
            hw.qualified_name()
        )));
    }
    if !newly_created && flags.preclude {
        return Err(AquilonError::ArgumentError(format!(
            "{} already exists.",
            record.qualified_name()
        )));
    }

    if let Some((network_id, ip)) = record.address() {
        let assignments = address::assignments_at(session, network_id, ip)?;
        if let Some(conflict) = assignments
            .iter()
            .find(|a| !a.is_shared || !flags.allow_shared)
        {
            return Err(AquilonError::ArgumentError(format!(
                "IP address {} is already in use by {}.",
                ip,
                conflict.interface_label()
            )));
        }
        if !flags.allow_shared {
            if let Some((name, holder)) = service_address_usage(session, record.id)? {
                return Err(AquilonError::ArgumentError(format!(
                    "IP address {ip} is already used by service address {name} of {holder}."
                )));
            }
        }
    }

    info!(
        fqdn = %record.fqdn.fqdn(),
        ip = ?record.ip(),
        newly_created,
        "address grabbed"
    );
    Ok(Grabbed {
        record,
        newly_created,
    })
}

fn bind_with_ip(
    session: &Session<'_>,
    fqdn: &Fqdn,
    dns_env: &DnsEnvironment,
    net_env: &network::NetworkEnvironment,
    ip: Ipv4Addr,
    comments: Option<&str>,
    flags: GrabFlags,
) -> Result<(DnsRecord, bool), AquilonError> {
    let dbnetwork = network::get_net_by_ip(session, ip, net_env)?;
    dbnetwork.lock_row(session)?;
    network::check_ip_restrictions(&dbnetwork, ip, flags.relaxed)?;

    let occupants = records_at(session, dbnetwork.id, ip)?;
    if let Some(stub) = occupants
        .iter()
        .find(|r| r.record_type() == DnsRecordType::DynamicStub)
    {
        return Err(AquilonError::ArgumentError(format!(
            "Address {} is reserved for dynamic DHCP by {}.",
            ip,
            stub.qualified_name()
        )));
    }
    if let Some(other) = occupants.iter().find(|r| {
        r.fqdn.id != fqdn.id && r.fqdn.dns_environment_id == dns_env.id
    }) {
        return Err(AquilonError::ArgumentError(format!(
            "IP address {} is already used by {}.",
            ip,
            other.qualified_name()
        )));
    }

    let mut reusable = None;
    let mut reserved = None;
    for existing in fqdn_records(session, fqdn)? {
        match existing.kind {
            RecordKind::ARecord {
                ip: existing_ip,
                network_id,
                ..
            } => {
                if network_id == dbnetwork.id && existing_ip == ip {
                    reusable = Some(existing);
                } else if !flags.allow_multi {
                    return Err(AquilonError::ArgumentError(format!(
                        "{} already exists with IP address {}.",
                        existing.qualified_name(),
                        existing_ip
                    )));
                }
            }
            RecordKind::ReservedName => reserved = Some(existing),
            _ => {
                return Err(AquilonError::ArgumentError(format!(
                    "{} cannot be used for address assignment.",
                    existing.qualified_name()
                )));
            }
        }
    }

    if let Some(record) = reusable {
        return Ok((record, false));
    }
    if let Some(placeholder) = reserved {
        // Same row, same name, same comments; only the subtype and address change.
        session.conn().execute(
            "UPDATE dns_record
                SET record_type = 'a_record', ip = ?1, network_id = ?2,
                    comments = COALESCE(comments, ?3)
              WHERE id = ?4",
            params![ip_to_db(ip), dbnetwork.id, comments, placeholder.id],
        )?;
        debug!(fqdn = %fqdn.fqdn(), %ip, "reserved name converted to address record");
        return Ok((placeholder.reload(session)?, true));
    }
    let record = insert_record(
        session,
        fqdn,
        &RecordKind::ARecord {
            ip,
            network_id: dbnetwork.id,
            reverse_ptr_id: None,
        },
        comments,
    )?;
    Ok((record, true))
}

fn bind_without_ip(
    session: &Session<'_>,
    fqdn: &Fqdn,
    comments: Option<&str>,
    flags: GrabFlags,
) -> Result<(DnsRecord, bool), AquilonError> {
    let mut existing = fqdn_records(session, fqdn)?;
    if existing.is_empty() {
        if !flags.allow_reserved {
            return Err(AquilonError::NotFound(format!(
                "DNS Record {} not found; an IP address is required to create it.",
                fqdn.fqdn()
            )));
        }
        let record = insert_record(session, fqdn, &RecordKind::ReservedName, comments)?;
        return Ok((record, true));
    }
    if existing.len() > 1 {
        return Err(AquilonError::ArgumentError(format!(
            "{} has {} DNS records; please specify an IP address.",
            fqdn.fqdn(),
            existing.len()
        )));
    }
    let record = existing.remove(0);
    match record.kind {
        RecordKind::ARecord { .. } => Ok((record, false)),
        RecordKind::ReservedName if flags.allow_reserved => Ok((record, false)),
        RecordKind::DynamicStub { .. } => Err(AquilonError::ArgumentError(format!(
            "{} is reserved for dynamic DHCP and cannot be reused.",
            record.qualified_name()
        ))),
        _ => Err(AquilonError::ArgumentError(format!(
            "{} cannot be used for address assignment.",
            record.qualified_name()
        ))),
    }
}

// ===== Release binding =====

#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseOpts {
    /// The caller already holds the domain and network locks.
    pub locked: bool,
    /// Refuse while an interface still claims the address.
    pub verify_assignments: bool,
}

/// Deletes a DNS record and whatever names it leaves orphaned.
pub fn delete_dns_record(
    session: &Session<'_>,
    record: &DnsRecord,
    opts: ReleaseOpts,
) -> Result<(), AquilonError> {
    if !opts.locked {
        let mut domains = vec![("dns_domain", record.fqdn.dns_domain_id)];
        for fqdn_id in record.target_id().into_iter().chain(record.reverse_ptr_id()) {
            if let Some(domain_id) = fqdn_domain_id(session, fqdn_id)? {
                domains.push(("dns_domain", domain_id));
            }
        }
        session.lock_rows(&domains)?;
        if let Some((network_id, _)) = record.address() {
            session.lock_row("network", network_id)?;
        }
    }

    // Re-read under the locks: someone may have released it already.
    let record = record.reload(session)?;

    let dependents = records_targeting(session, record.fqdn.id)?;
    if dependents.iter().any(|r| r.record_type() == DnsRecordType::Alias) {
        return Err(AquilonError::ArgumentError(format!(
            "{} still has aliases, please remove them first.",
            record.qualified_name()
        )));
    }
    if dependents
        .iter()
        .any(|r| r.record_type() == DnsRecordType::SrvRecord)
    {
        return Err(AquilonError::ArgumentError(format!(
            "{} is still in use by SRV records, please remove them first.",
            record.qualified_name()
        )));
    }
    if dependents
        .iter()
        .any(|r| r.record_type() == DnsRecordType::AddressAlias)
    {
        return Err(AquilonError::ArgumentError(format!(
            "{} still has address aliases, please remove them first.",
            record.qualified_name()
        )));
    }
    if let Some((name, holder)) = service_address_usage(session, record.id)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is still in use by service address {} of {}, please remove it first.",
            record.qualified_name(),
            name,
            holder
        )));
    }
    if let Some(hw) = primary_name_holder(session, record.id)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is the primary name of {}, it cannot be deleted.",
            record.qualified_name(),
            hw.qualified_name()
        )));
    }

    if opts.verify_assignments {
        if let Some((network_id, ip)) = record.address() {
            let sibling = records_at(session, network_id, ip)?.into_iter().any(|r| {
                r.id != record.id && r.fqdn.dns_environment_id == record.fqdn.dns_environment_id
            });
            if !sibling {
                let claimed = address::assignments_at(session, network_id, ip)?;
                let dbnetwork: Network = entity::get_by_id(session, network_id)?;
                let net_env: network::NetworkEnvironment =
                    entity::get_by_id(session, dbnetwork.network_environment_id)?;
                if net_env.dns_environment_id == record.fqdn.dns_environment_id {
                    if let Some(user) = claimed.first() {
                        return Err(AquilonError::ArgumentError(format!(
                            "IP address {} is still in use by {}.",
                            ip,
                            user.interface_label()
                        )));
                    }
                }
            }
        }
    }

    let fqdn_id = record.fqdn.id;
    let followups: Vec<i64> = record
        .target_id()
        .into_iter()
        .chain(record.reverse_ptr_id())
        .collect();

    session
        .conn()
        .execute("DELETE FROM dns_record WHERE id = ?1", params![record.id])?;
    delete_fqdn_if_orphaned(session, fqdn_id)?;
    for target in followups {
        release_placeholder(session, target)?;
    }

    info!(
        fqdn = %record.fqdn.fqdn(),
        kind = record.record_type().tag(),
        "DNS record deleted"
    );
    Ok(())
}

/// Domain of a name that may have been removed already.
fn fqdn_domain_id(session: &Session<'_>, fqdn_id: i64) -> Result<Option<i64>, AquilonError> {
    match entity::get_by_id::<Fqdn>(session, fqdn_id) {
        Ok(fqdn) => Ok(Some(fqdn.dns_domain_id)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Removes a restricted-domain placeholder nothing refers to any more.
fn release_placeholder(session: &Session<'_>, fqdn_id: i64) -> Result<(), AquilonError> {
    let fqdn = match entity::get_by_id::<Fqdn>(session, fqdn_id) {
        Ok(fqdn) => fqdn,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    if !fqdn.restricted || fqdn_referenced(session, fqdn.id)? {
        return Ok(());
    }
    let records = fqdn_records(session, &fqdn)?;
    match records.as_slice() {
        [] => {
            delete_fqdn_if_orphaned(session, fqdn.id)?;
        }
        [only] if only.record_type() == DnsRecordType::ReservedName => {
            delete_dns_record(
                session,
                only,
                ReleaseOpts {
                    locked: true,
                    verify_assignments: false,
                },
            )?;
        }
        _ => {}
    }
    Ok(())
}

/// Resolves the target of an alias or reverse PTR.
///
/// Names in restricted (externally managed) domains are created on demand as
/// reserved-name placeholders; anything else must already exist.
pub fn create_target_if_needed(
    session: &Session<'_>,
    target: &str,
    environment: &DnsEnvironment,
) -> Result<Fqdn, AquilonError> {
    let (short, domain) = parse_fqdn(session, target)?;
    if let Some(existing) = find_fqdn(session, &short, &domain, environment)? {
        return Ok(existing);
    }
    if !domain.restricted {
        return Err(AquilonError::NotFound(format!(
            "Target FQDN {} does not exist in DNS environment {}.",
            target, environment.name
        )));
    }
    domain.lock_row(session)?;
    let (fqdn, _) = get_or_create_fqdn(session, &short, &domain, environment)?;
    insert_record(session, &fqdn, &RecordKind::ReservedName, None)?;
    debug!(target, "placeholder created in restricted domain");
    Ok(fqdn)
}

// ===== Other record kinds =====

fn claim_new_name(
    session: &Session<'_>,
    fqdn: &str,
    environment: &DnsEnvironment,
) -> Result<Fqdn, AquilonError> {
    let (short, domain) = parse_fqdn(session, fqdn)?;
    domain.lock_row(session)?;
    if domain.restricted {
        return Err(AquilonError::ArgumentError(format!(
            "{} is restricted, adding extra names is not allowed.",
            domain.qualified_name()
        )));
    }
    let (dbfqdn, created) = get_or_create_fqdn(session, &short, &domain, environment)?;
    if !created {
        if let Some(existing) = fqdn_records(session, &dbfqdn)?.first() {
            return Err(AquilonError::ArgumentError(format!(
                "{} already exists.",
                existing.qualified_name()
            )));
        }
    }
    Ok(dbfqdn)
}

pub fn add_reserved_name(
    session: &Session<'_>,
    fqdn: &str,
    dns_environment: Option<&str>,
    comments: Option<&str>,
) -> Result<DnsRecord, AquilonError> {
    let environment = network::get_dns_environment(session, dns_environment)?;
    let dbfqdn = claim_new_name(session, fqdn, &environment)?;
    let record = insert_record(session, &dbfqdn, &RecordKind::ReservedName, comments)?;
    info!(fqdn = %dbfqdn.fqdn(), "reserved name added");
    Ok(record)
}

/// Number of alias hops starting at `fqdn_id`, stopping once `limit` is passed.
fn alias_depth(session: &Session<'_>, fqdn_id: i64, limit: usize) -> Result<usize, AquilonError> {
    let mut depth = 0;
    let mut current = fqdn_id;
    while depth <= limit {
        let next: Option<i64> = session
            .conn()
            .query_row(
                "SELECT target_id FROM dns_record WHERE fqdn_id = ?1 AND record_type = 'alias'",
                params![current],
                |row| row.get(0),
            )
            .optional()?;
        match next {
            Some(target) => {
                depth += 1;
                current = target;
            }
            None => break,
        }
    }
    Ok(depth)
}

pub fn add_alias(
    session: &Session<'_>,
    fqdn: &str,
    target: &str,
    dns_environment: Option<&str>,
    comments: Option<&str>,
) -> Result<DnsRecord, AquilonError> {
    let environment = network::get_dns_environment(session, dns_environment)?;
    let (_, domain) = parse_fqdn(session, fqdn)?;
    let (_, target_domain) = parse_fqdn(session, target)?;
    session.lock_rows(&[("dns_domain", domain.id), ("dns_domain", target_domain.id)])?;

    let dbtarget = create_target_if_needed(session, target, &environment)?;
    let dbfqdn = claim_new_name(session, fqdn, &environment)?;
    if dbfqdn.id == dbtarget.id {
        return Err(AquilonError::ArgumentError(format!(
            "Alias {} cannot point to itself.",
            dbfqdn.fqdn()
        )));
    }

    let max = session.config().max_alias_depth;
    if 1 + alias_depth(session, dbtarget.id, max)? > max {
        return Err(AquilonError::ArgumentError(format!(
            "Maximum alias depth of {} exceeded by {} -> {}.",
            max,
            dbfqdn.fqdn(),
            dbtarget.fqdn()
        )));
    }

    let record = insert_record(
        session,
        &dbfqdn,
        &RecordKind::Alias {
            target_id: dbtarget.id,
        },
        comments,
    )?;
    info!(alias = %dbfqdn.fqdn(), target = %dbtarget.fqdn(), "alias added");
    Ok(record)
}

pub fn add_address_alias(
    session: &Session<'_>,
    fqdn: &str,
    target: &str,
    dns_environment: Option<&str>,
    comments: Option<&str>,
) -> Result<DnsRecord, AquilonError> {
    let environment = network::get_dns_environment(session, dns_environment)?;
    let (short, domain) = parse_fqdn(session, fqdn)?;
    let (_, target_domain) = parse_fqdn(session, target)?;
    session.lock_rows(&[("dns_domain", domain.id), ("dns_domain", target_domain.id)])?;
    if domain.restricted {
        return Err(AquilonError::ArgumentError(format!(
            "{} is restricted, adding extra names is not allowed.",
            domain.qualified_name()
        )));
    }

    let dbtarget = get_fqdn(session, target, &environment)?;
    if !fqdn_records(session, &dbtarget)?
        .iter()
        .any(|r| r.record_type() == DnsRecordType::ARecord)
    {
        return Err(AquilonError::ArgumentError(format!(
            "{} has no A record, it cannot be the target of an address alias.",
            dbtarget.fqdn()
        )));
    }

    let (dbfqdn, _) = get_or_create_fqdn(session, &short, &domain, &environment)?;
    for existing in fqdn_records(session, &dbfqdn)? {
        match existing.kind {
            RecordKind::AddressAlias { target_id } if target_id == dbtarget.id => {
                return Err(AquilonError::ArgumentError(format!(
                    "{} already points to {}.",
                    existing.qualified_name(),
                    dbtarget.fqdn()
                )));
            }
            RecordKind::AddressAlias { .. } => {}
            _ => {
                return Err(AquilonError::ArgumentError(format!(
                    "{} already exists.",
                    existing.qualified_name()
                )));
            }
        }
    }

    insert_record(
        session,
        &dbfqdn,
        &RecordKind::AddressAlias {
            target_id: dbtarget.id,
        },
        comments,
    )
}

#[derive(Debug, Clone)]
pub struct SrvRequest<'a> {
    pub service: &'a str,
    pub protocol: &'a str,
    pub dns_domain: &'a str,
    pub target: &'a str,
    pub priority: i64,
    pub weight: i64,
    pub port: i64,
    pub dns_environment: Option<&'a str>,
    pub comments: Option<&'a str>,
}

pub fn add_srv_record(
    session: &Session<'_>,
    req: &SrvRequest<'_>,
) -> Result<DnsRecord, AquilonError> {
    let service = req.service.trim().to_lowercase();
    if !SRV_NAME_RE.is_match(&service) {
        return Err(AquilonError::ArgumentError(format!(
            "Illegal SRV service name '{service}'."
        )));
    }
    let protocol = req.protocol.trim().to_lowercase();
    if !SRV_PROTOCOLS.contains(&protocol.as_str()) {
        return Err(AquilonError::ArgumentError(format!(
            "Unknown protocol '{}'. Valid values are: {}.",
            req.protocol,
            SRV_PROTOCOLS.join(", ")
        )));
    }
    for (what, value) in [("priority", req.priority), ("weight", req.weight), ("port", req.port)] {
        if !(0..=65535).contains(&value) {
            return Err(AquilonError::ArgumentError(format!(
                "The {what} of an SRV record must be between 0 and 65535, got {value}."
            )));
        }
    }

    let environment = network::get_dns_environment(session, req.dns_environment)?;
    let domain = get_dns_domain(session, req.dns_domain)?;
    let (_, target_domain) = parse_fqdn(session, req.target)?;
    session.lock_rows(&[("dns_domain", domain.id), ("dns_domain", target_domain.id)])?;
    if domain.restricted {
        return Err(AquilonError::ArgumentError(format!(
            "{} is restricted, adding extra names is not allowed.",
            domain.qualified_name()
        )));
    }
    let dbtarget = create_target_if_needed(session, req.target, &environment)?;

    let short = format!("_{service}._{protocol}");
    let (dbfqdn, _) = get_or_create_fqdn(session, &short, &domain, &environment)?;
    for existing in fqdn_records(session, &dbfqdn)? {
        match existing.kind {
            RecordKind::SrvRecord {
                target_id, port, ..
            } if target_id == dbtarget.id && port == req.port => {
                return Err(AquilonError::ArgumentError(format!(
                    "{} already points to {} port {}.",
                    existing.qualified_name(),
                    dbtarget.fqdn(),
                    port
                )));
            }
            RecordKind::SrvRecord { .. } => {}
            _ => {
                return Err(AquilonError::ArgumentError(format!(
                    "{} already exists.",
                    existing.qualified_name()
                )));
            }
        }
    }

    insert_record(
        session,
        &dbfqdn,
        &RecordKind::SrvRecord {
            target_id: dbtarget.id,
            service,
            protocol,
            priority: req.priority,
            weight: req.weight,
            port: req.port,
        },
        req.comments,
    )
}

/// Sets or clears the reverse PTR of an A record.
///
/// Pointing the PTR back at the record's own name clears it.
pub fn set_reverse_ptr(
    session: &Session<'_>,
    record: &DnsRecord,
    target: Option<&Fqdn>,
) -> Result<DnsRecord, AquilonError> {
    let record = record.reload(session)?;
    let old = match &record.kind {
        RecordKind::ARecord { reverse_ptr_id, .. } => *reverse_ptr_id,
        RecordKind::DynamicStub { .. } => {
            return Err(AquilonError::ArgumentError(
                "The reverse PTR record cannot be set for DNS records used for dynamic DHCP."
                    .to_string(),
            ));
        }
        _ => {
            return Err(AquilonError::ArgumentError(format!(
                "{} cannot carry a reverse PTR.",
                record.qualified_name()
            )));
        }
    };

    let new = match target {
        Some(ptr) if ptr.dns_environment_id != record.fqdn.dns_environment_id => {
            return Err(AquilonError::ArgumentError(format!(
                "{} lives in DNS environment {}, but the reverse PTR {} is in DNS environment {}.",
                record.qualified_name(),
                record.fqdn.dns_environment,
                ptr.fqdn(),
                ptr.dns_environment
            )));
        }
        Some(ptr) if ptr.id == record.fqdn.id => None,
        Some(ptr) => Some(ptr.id),
        None => None,
    };

    // The old PTR may be a placeholder released below.
    let mut domains = vec![("dns_domain", record.fqdn.dns_domain_id)];
    if let Some(ptr) = target {
        domains.push(("dns_domain", ptr.dns_domain_id));
    }
    if let Some(domain_id) = old.map(|id| fqdn_domain_id(session, id)).transpose()?.flatten() {
        domains.push(("dns_domain", domain_id));
    }
    session.lock_rows(&domains)?;

    session.conn().execute(
        "UPDATE dns_record SET reverse_ptr_id = ?1 WHERE id = ?2",
        params![new, record.id],
    )?;
    if let Some(old) = old.filter(|old| Some(*old) != new) {
        release_placeholder(session, old)?;
    }
    record.reload(session)
}

// ===== Dynamic DHCP stubs =====

#[derive(Debug, Clone)]
pub struct DynamicRange<'a> {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub network_environment: Option<&'a str>,
    pub dns_domain: &'a str,
    pub comments: Option<&'a str>,
}

fn range_network(
    session: &Session<'_>,
    start: Ipv4Addr,
    end: Ipv4Addr,
    network_environment: Option<&str>,
) -> Result<(network::NetworkEnvironment, Network), AquilonError> {
    if start > end {
        return Err(AquilonError::ArgumentError(format!(
            "Start IP address {start} is after end IP address {end}."
        )));
    }
    let net_env = network::get_network_environment(session, network_environment)?;
    let dbnetwork = network::get_net_by_ip(session, start, &net_env)?;
    if !dbnetwork.contains(end) {
        return Err(AquilonError::ArgumentError(format!(
            "IP addresses {start} and {end} must be inside the same network."
        )));
    }
    Ok((net_env, dbnetwork))
}

/// Reserves every address of `[start, end]` for dynamic DHCP.
pub fn add_dynamic_range(
    session: &Session<'_>,
    range: &DynamicRange<'_>,
) -> Result<Vec<DnsRecord>, AquilonError> {
    let (net_env, dbnetwork) =
        range_network(session, range.start, range.end, range.network_environment)?;
    let dns_env: DnsEnvironment = entity::get_by_id(session, net_env.dns_environment_id)?;
    let domain = get_dns_domain(session, range.dns_domain)?;
    domain.lock_row(session)?;
    dbnetwork.lock_row(session)?;

    let prefix = session.config().dynamic_stub_prefix.clone();
    let mut stubs = Vec::new();
    for raw in u32::from(range.start)..=u32::from(range.end) {
        let ip = Ipv4Addr::from(raw);
        network::check_ip_restrictions(&dbnetwork, ip, false)?;
        if let Some(existing) = records_at(session, dbnetwork.id, ip)?.first() {
            return Err(AquilonError::ArgumentError(format!(
                "IP address {} is already used by {}.",
                ip,
                existing.qualified_name()
            )));
        }
        if let Some(user) = address::assignments_at(session, dbnetwork.id, ip)?.first() {
            return Err(AquilonError::ArgumentError(format!(
                "IP address {} is already in use by {}.",
                ip,
                user.interface_label()
            )));
        }

        let [a, b, c, d] = ip.octets();
        let short = format!("{prefix}-{a}-{b}-{c}-{d}");
        let (fqdn, created) = get_or_create_fqdn(session, &short, &domain, &dns_env)?;
        if !created {
            return Err(AquilonError::ArgumentError(format!(
                "{} already exists.",
                fqdn.fqdn()
            )));
        }
        stubs.push(insert_record(
            session,
            &fqdn,
            &RecordKind::DynamicStub {
                ip,
                network_id: dbnetwork.id,
            },
            range.comments,
        )?);
    }
    info!(
        start = %range.start,
        end = %range.end,
        count = stubs.len(),
        "dynamic range added"
    );
    Ok(stubs)
}

/// Releases the dynamic stubs of `[start, end]`; returns how many went away.
pub fn del_dynamic_range(
    session: &Session<'_>,
    start: Ipv4Addr,
    end: Ipv4Addr,
    network_environment: Option<&str>,
) -> Result<usize, AquilonError> {
    let (_, dbnetwork) = range_network(session, start, end, network_environment)?;
    let stubs = query_records(
        session,
        "r.network_id = ?1 AND r.ip BETWEEN ?2 AND ?3 AND r.record_type = 'dynamic_stub'",
        params![dbnetwork.id, ip_to_db(start), ip_to_db(end)],
    )?;
    if stubs.is_empty() {
        return Err(AquilonError::NotFound(format!(
            "No dynamic stubs found between {start} and {end}."
        )));
    }

    let domains: Vec<(&'static str, i64)> = stubs
        .iter()
        .map(|r| ("dns_domain", r.fqdn.dns_domain_id))
        .collect();
    session.lock_rows(&domains)?;
    dbnetwork.lock_row(session)?;
    for stub in &stubs {
        delete_dns_record(
            session,
            stub,
            ReleaseOpts {
                locked: true,
                verify_assignments: true,
            },
        )?;
    }
    Ok(stubs.len())
}

/// Makes `record` the primary name of a hardware entity.
pub fn set_primary_name(
    session: &Session<'_>,
    hardware: &HardwareEntity,
    record: &DnsRecord,
) -> Result<HardwareEntity, AquilonError> {
    let hardware = hardware.reload(session)?;
    if !matches!(
        record.record_type(),
        DnsRecordType::ARecord | DnsRecordType::ReservedName
    ) {
        return Err(AquilonError::ArgumentError(format!(
            "{} cannot be used as a primary name.",
            record.qualified_name()
        )));
    }
    if hardware.primary_name_id.is_some() {
        return Err(AquilonError::ArgumentError(format!(
            "{} already has a primary name.",
            hardware.qualified_name()
        )));
    }
    if let Some(other) = primary_name_holder(session, record.id)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already the primary name of {}.",
            record.qualified_name(),
            other.qualified_name()
        )));
    }
    session.conn().execute(
        "UPDATE hardware_entity SET primary_name_id = ?1 WHERE id = ?2",
        params![record.id, hardware.id],
    )?;
    hardware.reload(session)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "dns",
        "version": "0.1.0",
        "description": "DNS names and records; address allocation and release",
        "commands": [
            { "name": "add_dns_domain", "parameters": ["name", "restricted"] },
            { "name": "grab_address", "parameters": ["fqdn", "ip", "network_environment", "dns_environment",
                                                     "allow_multi", "allow_reserved", "allow_shared",
                                                     "preclude", "relaxed", "allow_restricted_domain"] },
            { "name": "delete_dns_record", "parameters": ["record", "locked", "verify_assignments"] },
            { "name": "add_reserved_name", "parameters": ["fqdn", "dns_environment"] },
            { "name": "add_alias", "parameters": ["fqdn", "target", "dns_environment"] },
            { "name": "add_address_alias", "parameters": ["fqdn", "target", "dns_environment"] },
            { "name": "add_srv_record", "parameters": ["service", "protocol", "dns_domain", "target",
                                                       "priority", "weight", "port"] },
            { "name": "set_reverse_ptr", "parameters": ["record", "target"] },
            { "name": "add_dynamic_range", "parameters": ["start", "end", "dns_domain"] },
            { "name": "del_dynamic_range", "parameters": ["start", "end"] },
            { "name": "set_primary_name", "parameters": ["hardware", "record"] }
        ],
        "storage": ["dns_domain", "fqdn", "dns_record"]
    })
}
