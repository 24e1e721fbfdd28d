//! Clusters: membership rules and capacity validation.
//!
//! Membership checks (`validate_membership`) decide whether one host may sit
//! in a cluster. Whole-cluster checks (`validate`) run after every membership
//! or threshold change and assume the caller already holds the cluster row
//! lock. Neither takes locks of its own.

use crate::core::entity::{self, Entity, EntityMeta, Field, Key, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::core::time;
use crate::subsystems::inventory::{
    self, Branch, BranchType, HOST_META, HardwareEntity, Host, Model, ModelType, Personality,
    PersonalityStage,
};
use crate::subsystems::location::{self, LOCATION_META, Location};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Cluster,
    Compute,
    Storage,
    Esx,
    Meta,
}

impl Polymorphic for ClusterType {
    const TAGS: &'static [(&'static str, Self)] = &[
        ("cluster", ClusterType::Cluster),
        ("compute", ClusterType::Compute),
        ("storage", ClusterType::Storage),
        ("esx", ClusterType::Esx),
        ("meta", ClusterType::Meta),
    ];

    fn tag(&self) -> &'static str {
        match self {
            ClusterType::Cluster => "cluster",
            ClusterType::Compute => "compute",
            ClusterType::Storage => "storage",
            ClusterType::Esx => "esx",
            ClusterType::Meta => "meta",
        }
    }

    fn subtype_label(&self) -> &'static str {
        match self {
            ClusterType::Cluster => "Cluster",
            ClusterType::Compute => "Compute Cluster",
            ClusterType::Storage => "Storage Cluster",
            ClusterType::Esx => "ESX Cluster",
            ClusterType::Meta => "Metacluster",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Build,
    Ready,
    Rebuild,
    Decommissioned,
}

impl ClusterStatus {
    pub const ALL: &'static [ClusterStatus] = &[
        ClusterStatus::Build,
        ClusterStatus::Ready,
        ClusterStatus::Rebuild,
        ClusterStatus::Decommissioned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Build => "build",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Rebuild => "rebuild",
            ClusterStatus::Decommissioned => "decommissioned",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AquilonError> {
        let wanted = value.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == wanted)
            .ok_or_else(|| {
                let mut legal: Vec<&str> = Self::ALL.iter().map(|s| s.as_str()).collect();
                legal.sort_unstable();
                AquilonError::ArgumentError(format!(
                    "Unknown cluster status '{}'. Legal states are: {}.",
                    value,
                    legal.join(", ")
                ))
            })
    }

    /// States reachable from this one.
    pub fn transitions(&self) -> &'static [ClusterStatus] {
        match self {
            ClusterStatus::Build => &[ClusterStatus::Ready, ClusterStatus::Decommissioned],
            ClusterStatus::Ready => &[ClusterStatus::Rebuild, ClusterStatus::Decommissioned],
            ClusterStatus::Rebuild => &[ClusterStatus::Ready, ClusterStatus::Decommissioned],
            ClusterStatus::Decommissioned => &[ClusterStatus::Rebuild],
        }
    }
}

/// An absolute host count, or a percentage of the current member count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub value: i64,
    pub percent: bool,
}

impl Threshold {
    pub fn absolute(value: i64) -> Self {
        Self {
            value,
            percent: false,
        }
    }

    pub fn percent(value: i64) -> Self {
        Self {
            value,
            percent: true,
        }
    }

    /// Effective host count for a cluster of `members` hosts.
    pub fn effective(&self, members: i64) -> i64 {
        if self.percent {
            (self.value * members).div_euclid(100)
        } else {
            self.value
        }
    }

    fn check(&self, what: &str) -> Result<(), AquilonError> {
        if self.value < 0 {
            return Err(AquilonError::ArgumentError(format!(
                "The {what} threshold must not be negative."
            )));
        }
        if self.percent && self.value > 100 {
            return Err(AquilonError::ArgumentError(format!(
                "The {what} percentage must be between 0 and 100, got {}.",
                self.value
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub cluster_type: ClusterType,
    pub location_constraint_id: i64,
    pub preferred_location_id: Option<i64>,
    pub max_hosts: Option<i64>,
    pub max_clusters: Option<i64>,
    pub down_hosts: Threshold,
    pub down_maint: Option<Threshold>,
    pub status: ClusterStatus,
    pub branch_id: i64,
    pub branch: String,
    pub branch_type: BranchType,
    pub sandbox_author: Option<String>,
    pub personality_stage_id: i64,
    pub comments: Option<String>,
}

pub static CLUSTER_META: EntityMeta = EntityMeta {
    table: "cluster",
    class_label: "Cluster",
    select: "SELECT c.id, c.name, c.cluster_type, c.location_constraint_id, c.preferred_location_id,
                    c.max_hosts, c.max_clusters, c.down_hosts_threshold, c.down_hosts_percent,
                    c.down_maint_threshold, c.down_maint_percent, c.status, c.branch_id, b.name,
                    b.branch_type, c.sandbox_author, c.personality_stage_id, c.comments
               FROM cluster c JOIN branch b ON b.id = c.branch_id",
    id_column: "c.id",
    unique_fields: &[Field::plain("name", "c.name")],
    extra_search_fields: &[
        Field::plain("cluster_type", "c.cluster_type"),
        Field::reference("location_constraint", "c.location_constraint_id", &LOCATION_META),
    ],
};

impl Entity for Cluster {
    fn meta() -> &'static EntityMeta {
        &CLUSTER_META
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let type_tag: String = row.get(2)?;
        let status: String = row.get(11)?;
        let branch_tag: String = row.get(14)?;
        let down_maint_value: Option<i64> = row.get(9)?;
        let down_maint_percent: bool = row.get(10)?;
        Ok(Cluster {
            id: row.get(0)?,
            name: row.get(1)?,
            cluster_type: entity::tag_from_sql(2, &type_tag)?,
            location_constraint_id: row.get(3)?,
            preferred_location_id: row.get(4)?,
            max_hosts: row.get(5)?,
            max_clusters: row.get(6)?,
            down_hosts: Threshold {
                value: row.get(7)?,
                percent: row.get(8)?,
            },
            down_maint: down_maint_value.map(|value| Threshold {
                value,
                percent: down_maint_percent,
            }),
            status: ClusterStatus::parse(&status).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    11,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::other(e.to_string())),
                )
            })?,
            branch_id: row.get(12)?,
            branch: row.get(13)?,
            branch_type: entity::tag_from_sql(14, &branch_tag)?,
            sandbox_author: row.get(15)?,
            personality_stage_id: row.get(16)?,
            comments: row.get(17)?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn class_label(&self) -> &'static str {
        self.cluster_type.subtype_label()
    }
}

impl Cluster {
    /// Effective down-hosts threshold for `members` hosts.
    pub fn dht_value(&self, members: i64) -> i64 {
        self.down_hosts.effective(members)
    }

    /// Effective maintenance threshold; falls back to the down-hosts one.
    pub fn dmt_value(&self, members: i64) -> i64 {
        self.down_maint
            .unwrap_or(self.down_hosts)
            .effective(members)
    }

    pub fn branch_description(&self) -> String {
        inventory::describe_branch(self.branch_type, &self.branch, self.sandbox_author.as_deref())
    }
}

pub struct NewCluster<'a> {
    pub name: &'a str,
    pub cluster_type: &'a str,
    pub location_constraint: &'a Location,
    pub preferred_location: Option<&'a Location>,
    pub personality_stage: &'a PersonalityStage,
    pub branch: &'a Branch,
    pub sandbox_author: Option<&'a str>,
    pub max_hosts: Option<i64>,
    pub max_clusters: Option<i64>,
    pub down_hosts: Threshold,
    pub down_maint: Option<Threshold>,
    pub comments: Option<&'a str>,
}

pub fn add_cluster(session: &Session<'_>, new: NewCluster<'_>) -> Result<Cluster, AquilonError> {
    let cluster_type: ClusterType =
        entity::polymorphic_subclass(new.cluster_type, "Unknown cluster type")?;
    let name = new.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AquilonError::ArgumentError(
            "Cluster name must not be empty.".to_string(),
        ));
    }
    entity::get_unique::<Cluster>(session, &[("name", Key::from(name.as_str()))], false, true)?;
    inventory::validate_branch_assignment(new.branch, new.sandbox_author)?;

    if let Some(preferred) = new.preferred_location {
        check_preferred_within(session, preferred, new.location_constraint)?;
    }
    if new.max_clusters.is_some() && cluster_type != ClusterType::Meta {
        return Err(AquilonError::ArgumentError(format!(
            "Only metaclusters can limit the number of member clusters, not a {}.",
            cluster_type.subtype_label()
        )));
    }
    for limit in [new.max_hosts, new.max_clusters].into_iter().flatten() {
        if limit < 0 {
            return Err(AquilonError::ArgumentError(
                "Cluster size limits must not be negative.".to_string(),
            ));
        }
    }
    new.down_hosts.check("down_hosts")?;
    if let Some(dmt) = &new.down_maint {
        dmt.check("down_maint")?;
    }

    session.conn().execute(
        "INSERT INTO cluster(name, cluster_type, location_constraint_id, preferred_location_id,
                             max_hosts, max_clusters, down_hosts_threshold, down_hosts_percent,
                             down_maint_threshold, down_maint_percent, branch_id, sandbox_author,
                             personality_stage_id, comments, creation_date)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            name,
            cluster_type.tag(),
            new.location_constraint.id,
            new.preferred_location.map(|l| l.id),
            new.max_hosts,
            new.max_clusters,
            new.down_hosts.value,
            new.down_hosts.percent,
            new.down_maint.map(|t| t.value),
            new.down_maint.is_some_and(|t| t.percent),
            new.branch.id,
            new.sandbox_author,
            new.personality_stage.id,
            new.comments,
            time::now_epoch_z()
        ],
    )?;
    let cluster: Cluster = entity::get_by_id(session, session.conn().last_insert_rowid())?;
    info!(cluster = %cluster.qualified_name(), "cluster added");
    Ok(cluster)
}

pub fn get_cluster(session: &Session<'_>, name: &str) -> Result<Cluster, AquilonError> {
    entity::get_unique_by_label::<Cluster>(session, name, false)?
        .ok_or_else(|| AquilonError::NotFound(format!("Cluster {name} not found.")))
}

fn check_preferred_within(
    session: &Session<'_>,
    preferred: &Location,
    constraint: &Location,
) -> Result<(), AquilonError> {
    if !location::location_contains(session, constraint, preferred)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is not within the location constraint {}.",
            preferred.qualified_name(),
            constraint.qualified_name()
        )));
    }
    Ok(())
}

// ===== Accessors =====

/// Current members, in node index order. Always re-read from storage.
pub fn cluster_hosts(session: &Session<'_>, cluster: &Cluster) -> Result<Vec<Host>, AquilonError> {
    let sql = format!(
        "{} JOIN host_cluster_member m ON m.host_id = h.id
          WHERE m.cluster_id = ?1
          ORDER BY m.node_index",
        HOST_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![cluster.id], |row| Host::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostClusterMember {
    pub host_id: i64,
    pub cluster_id: i64,
    pub node_index: i64,
}

pub fn host_membership(
    session: &Session<'_>,
    host: &Host,
) -> Result<Option<HostClusterMember>, AquilonError> {
    Ok(session
        .conn()
        .query_row(
            "SELECT host_id, cluster_id, node_index FROM host_cluster_member WHERE host_id = ?1",
            params![host.id],
            |row| {
                Ok(HostClusterMember {
                    host_id: row.get(0)?,
                    cluster_id: row.get(1)?,
                    node_index: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn allowed_personalities(
    session: &Session<'_>,
    cluster: &Cluster,
) -> Result<Vec<Personality>, AquilonError> {
    let sql = format!(
        "{} JOIN cluster_allowed_personality cap ON cap.personality_id = p.id
          WHERE cap.cluster_id = ?1
          ORDER BY a.name, p.name",
        inventory::PERSONALITY_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![cluster.id], |row| Personality::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn virtual_machine_count(session: &Session<'_>, cluster: &Cluster) -> Result<i64, AquilonError> {
    Ok(session.conn().query_row(
        "SELECT COUNT(*) FROM virtual_machine WHERE cluster_id = ?1",
        params![cluster.id],
        |row| row.get(0),
    )?)
}

pub fn metacluster_members(
    session: &Session<'_>,
    metacluster: &Cluster,
) -> Result<Vec<Cluster>, AquilonError> {
    let sql = format!(
        "{} JOIN metacluster_member mm ON mm.cluster_id = c.id
          WHERE mm.metacluster_id = ?1
          ORDER BY c.name",
        CLUSTER_META.select
    );
    let mut stmt = session.conn().prepare(&sql)?;
    let rows = stmt.query_map(params![metacluster.id], |row| Cluster::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn owning_metacluster(session: &Session<'_>, cluster: &Cluster) -> Result<Option<Cluster>, AquilonError> {
    let id: Option<i64> = session
        .conn()
        .query_row(
            "SELECT metacluster_id FROM metacluster_member WHERE cluster_id = ?1",
            params![cluster.id],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| entity::get_by_id(session, id)).transpose()
}

// ===== Validation =====

/// Whether `host` may be (or remain) a member of `cluster`.
pub fn validate_membership(
    session: &Session<'_>,
    cluster: &Cluster,
    host: &Host,
) -> Result<(), AquilonError> {
    let allowed = allowed_personalities(session, cluster)?;
    if !allowed.is_empty() && !allowed.iter().any(|p| p.id == host.personality_id) {
        let names: Vec<String> = allowed.iter().map(|p| p.label()).collect();
        return Err(AquilonError::ArgumentError(format!(
            "Personality {}/{} is not allowed by {}. Specify one of: {}.",
            host.archetype,
            host.personality,
            cluster.qualified_name(),
            names.join(", ")
        )));
    }

    let host_location = inventory::host_location(session, host)?;
    let constraint: Location = entity::get_by_id(session, cluster.location_constraint_id)?;
    if !location::location_contains(session, &constraint, &host_location)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} has location {}, which is not within {} location constraint {}.",
            host.qualified_name(),
            host_location.qualified_name(),
            cluster.qualified_name(),
            constraint.qualified_name()
        )));
    }

    if host.branch_id != cluster.branch_id || host.sandbox_author != cluster.sandbox_author {
        return Err(AquilonError::ArgumentError(format!(
            "{} {} does not match {} {}.",
            host.qualified_name(),
            host.branch_description(),
            cluster.qualified_name(),
            cluster.branch_description()
        )));
    }

    if cluster.cluster_type == ClusterType::Storage && host.archetype != "filer" {
        return Err(AquilonError::ArgumentError(format!(
            "Only hosts of archetype filer can be added to {}; {} is of archetype {}.",
            cluster.qualified_name(),
            host.qualified_name(),
            host.archetype
        )));
    }
    Ok(())
}

/// Whole-cluster invariant check, run after every membership or limit change.
pub fn validate(session: &Session<'_>, cluster: &Cluster) -> Result<(), AquilonError> {
    if cluster.cluster_type == ClusterType::Meta {
        return validate_metacluster(session, cluster);
    }

    let hosts = cluster_hosts(session, cluster)?;
    let count = hosts.len() as i64;

    if let Some(preferred_id) = cluster.preferred_location_id {
        let preferred: Location = entity::get_by_id(session, preferred_id)?;
        let mut seen = BTreeSet::new();
        for host in &hosts {
            let loc = inventory::host_location(session, host)?;
            if let Some(ancestor) =
                location::ancestor_of_type(session, &loc, preferred.location_type)?
            {
                seen.insert(ancestor.id);
            }
        }
        if !seen.contains(&preferred.id) {
            return Err(AquilonError::ArgumentError(format!(
                "{} has no members inside preferred {}.",
                cluster.qualified_name(),
                preferred.qualified_name()
            )));
        }
    }

    if let Some(max) = cluster.max_hosts {
        if count > max {
            return Err(AquilonError::ArgumentError(format!(
                "{} has {} hosts bound, which exceeds the limit of {}.",
                cluster.qualified_name(),
                count,
                max
            )));
        }
    }

    if cluster.cluster_type == ClusterType::Esx {
        validate_esx_capacity(session, cluster, count)?;
    }

    if let Some(meta) = owning_metacluster(session, cluster)? {
        validate_metacluster(session, &meta)?;
    }
    debug!(cluster = %cluster.name, hosts = count, "cluster validated");
    Ok(())
}

fn validate_esx_capacity(
    session: &Session<'_>,
    cluster: &Cluster,
    count: i64,
) -> Result<(), AquilonError> {
    if virtual_machine_count(session, cluster)? == 0 {
        return Ok(());
    }
    let dht = cluster.dht_value(count);
    let adjusted = count - dht;
    if adjusted <= 0 {
        return Err(AquilonError::ArgumentError(format!(
            "{} cannot support VMs with {} vmhosts and a down_hosts_threshold of {}.",
            cluster.qualified_name(),
            count,
            dht
        )));
    }
    Ok(())
}

fn validate_metacluster(session: &Session<'_>, meta: &Cluster) -> Result<(), AquilonError> {
    let members = metacluster_members(session, meta)?;
    if let Some(max) = meta.max_clusters {
        if members.len() as i64 > max {
            return Err(AquilonError::ArgumentError(format!(
                "{} has {} clusters bound, which exceeds the limit of {}.",
                meta.qualified_name(),
                members.len(),
                max
            )));
        }
    }
    let constraint: Location = entity::get_by_id(session, meta.location_constraint_id)?;
    for member in &members {
        let member_constraint: Location =
            entity::get_by_id(session, member.location_constraint_id)?;
        if !location::location_contains(session, &constraint, &member_constraint)? {
            return Err(AquilonError::ArgumentError(format!(
                "{} location constraint {} is not within {} location constraint {}.",
                member.qualified_name(),
                member_constraint.qualified_name(),
                meta.qualified_name(),
                constraint.qualified_name()
            )));
        }
    }
    Ok(())
}

fn revalidate_members(session: &Session<'_>, cluster: &Cluster) -> Result<(), AquilonError> {
    for host in cluster_hosts(session, cluster)? {
        validate_membership(session, cluster, &host)?;
    }
    validate(session, cluster)
}

// ===== Membership changes =====

pub fn bind_host(
    session: &Session<'_>,
    cluster: &Cluster,
    host: &Host,
) -> Result<HostClusterMember, AquilonError> {
    cluster.lock_row(session)?;
    let cluster = cluster.reload(session)?;
    if cluster.cluster_type == ClusterType::Meta {
        return Err(AquilonError::ArgumentError(format!(
            "{} cannot have hosts bound directly; bind its member clusters instead.",
            cluster.qualified_name()
        )));
    }
    if let Some(existing) = host_membership(session, host)? {
        let current: Cluster = entity::get_by_id(session, existing.cluster_id)?;
        return Err(AquilonError::ArgumentError(if current.id == cluster.id {
            format!(
                "{} is already bound to {}.",
                host.qualified_name(),
                cluster.qualified_name()
            )
        } else {
            format!(
                "{} is already bound to {}, unbind it first.",
                host.qualified_name(),
                current.qualified_name()
            )
        }));
    }

    validate_membership(session, &cluster, host)?;

    let used: Vec<i64> = {
        let mut stmt = session.conn().prepare(
            "SELECT node_index FROM host_cluster_member WHERE cluster_id = ?1 ORDER BY node_index",
        )?;
        let rows = stmt.query_map(params![cluster.id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let node_index = lowest_free_index(&used);
    session.conn().execute(
        "INSERT INTO host_cluster_member(host_id, cluster_id, node_index) VALUES(?1, ?2, ?3)",
        params![host.id, cluster.id, node_index],
    )?;

    validate(session, &cluster)?;
    info!(host = %host.label, cluster = %cluster.name, node_index, "host bound to cluster");
    Ok(HostClusterMember {
        host_id: host.id,
        cluster_id: cluster.id,
        node_index,
    })
}

/// Smallest non-negative index missing from a sorted list.
fn lowest_free_index(used: &[i64]) -> i64 {
    let mut candidate = 0;
    for index in used {
        if *index == candidate {
            candidate += 1;
        } else if *index > candidate {
            break;
        }
    }
    candidate
}

pub fn unbind_host(session: &Session<'_>, cluster: &Cluster, host: &Host) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let cluster = cluster.reload(session)?;
    match host_membership(session, host)? {
        Some(m) if m.cluster_id == cluster.id => {}
        _ => {
            return Err(AquilonError::ArgumentError(format!(
                "{} is not bound to {}.",
                host.qualified_name(),
                cluster.qualified_name()
            )));
        }
    }
    session.conn().execute(
        "DELETE FROM host_cluster_member WHERE host_id = ?1",
        params![host.id],
    )?;
    validate(session, &cluster)?;
    info!(host = %host.label, cluster = %cluster.name, "host unbound from cluster");
    Ok(())
}

// ===== Cluster attribute changes =====

pub fn allow_personality(
    session: &Session<'_>,
    cluster: &Cluster,
    personality: &Personality,
) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let changed = session.conn().execute(
        "INSERT OR IGNORE INTO cluster_allowed_personality(cluster_id, personality_id) VALUES(?1, ?2)",
        params![cluster.id, personality.id],
    )?;
    if changed == 0 {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already allowed by {}.",
            personality.qualified_name(),
            cluster.qualified_name()
        )));
    }
    revalidate_members(session, &cluster.reload(session)?)
}

pub fn disallow_personality(
    session: &Session<'_>,
    cluster: &Cluster,
    personality: &Personality,
) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let changed = session.conn().execute(
        "DELETE FROM cluster_allowed_personality WHERE cluster_id = ?1 AND personality_id = ?2",
        params![cluster.id, personality.id],
    )?;
    if changed == 0 {
        return Err(AquilonError::NotFound(format!(
            "{} is not allowed by {}.",
            personality.qualified_name(),
            cluster.qualified_name()
        )));
    }
    revalidate_members(session, &cluster.reload(session)?)
}

pub fn set_thresholds(
    session: &Session<'_>,
    cluster: &Cluster,
    down_hosts: Threshold,
    down_maint: Option<Threshold>,
) -> Result<Cluster, AquilonError> {
    down_hosts.check("down_hosts")?;
    if let Some(dmt) = &down_maint {
        dmt.check("down_maint")?;
    }
    cluster.lock_row(session)?;
    session.conn().execute(
        "UPDATE cluster
            SET down_hosts_threshold = ?1, down_hosts_percent = ?2,
                down_maint_threshold = ?3, down_maint_percent = ?4
          WHERE id = ?5",
        params![
            down_hosts.value,
            down_hosts.percent,
            down_maint.map(|t| t.value),
            down_maint.is_some_and(|t| t.percent),
            cluster.id
        ],
    )?;
    let cluster = cluster.reload(session)?;
    validate(session, &cluster)?;
    Ok(cluster)
}

pub fn set_max_hosts(
    session: &Session<'_>,
    cluster: &Cluster,
    max_hosts: Option<i64>,
) -> Result<Cluster, AquilonError> {
    if max_hosts.is_some_and(|m| m < 0) {
        return Err(AquilonError::ArgumentError(
            "Cluster size limits must not be negative.".to_string(),
        ));
    }
    cluster.lock_row(session)?;
    session.conn().execute(
        "UPDATE cluster SET max_hosts = ?1 WHERE id = ?2",
        params![max_hosts, cluster.id],
    )?;
    let cluster = cluster.reload(session)?;
    validate(session, &cluster)?;
    Ok(cluster)
}

pub fn set_preferred_location(
    session: &Session<'_>,
    cluster: &Cluster,
    preferred: Option<&Location>,
) -> Result<Cluster, AquilonError> {
    cluster.lock_row(session)?;
    if let Some(preferred) = preferred {
        let constraint: Location = entity::get_by_id(session, cluster.location_constraint_id)?;
        check_preferred_within(session, preferred, &constraint)?;
    }
    session.conn().execute(
        "UPDATE cluster SET preferred_location_id = ?1 WHERE id = ?2",
        params![preferred.map(|l| l.id), cluster.id],
    )?;
    let cluster = cluster.reload(session)?;
    validate(session, &cluster)?;
    Ok(cluster)
}

pub fn set_status(
    session: &Session<'_>,
    cluster: &Cluster,
    status: &str,
) -> Result<Cluster, AquilonError> {
    let target = ClusterStatus::parse(status)?;
    cluster.lock_row(session)?;
    let cluster = cluster.reload(session)?;
    if target == cluster.status {
        return Ok(cluster);
    }
    let legal = cluster.status.transitions();
    if !legal.contains(&target) {
        let names: Vec<&str> = legal.iter().map(|s| s.as_str()).collect();
        return Err(AquilonError::ArgumentError(format!(
            "Cannot change state of {} from {} to {}. Legal states are: {}.",
            cluster.qualified_name(),
            cluster.status.as_str(),
            target.as_str(),
            names.join(", ")
        )));
    }
    session.conn().execute(
        "UPDATE cluster SET status = ?1 WHERE id = ?2",
        params![target.as_str(), cluster.id],
    )?;
    cluster.reload(session)
}

// ===== Virtual machines and metaclusters =====

pub fn add_virtual_machine(
    session: &Session<'_>,
    cluster: &Cluster,
    machine: &HardwareEntity,
) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let cluster = cluster.reload(session)?;
    if !matches!(cluster.cluster_type, ClusterType::Esx | ClusterType::Compute) {
        return Err(AquilonError::ArgumentError(format!(
            "{} cannot host virtual machines.",
            cluster.qualified_name()
        )));
    }
    let model: Model = entity::get_by_id(session, machine.model_id)?;
    if model.model_type != ModelType::VirtualMachine {
        return Err(AquilonError::ArgumentError(format!(
            "{} is not a virtual machine.",
            machine.qualified_name()
        )));
    }
    let changed = session.conn().execute(
        "INSERT OR IGNORE INTO virtual_machine(hardware_entity_id, cluster_id) VALUES(?1, ?2)",
        params![machine.id, cluster.id],
    )?;
    if changed == 0 {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already placed on a cluster.",
            machine.qualified_name()
        )));
    }
    validate(session, &cluster)
}

pub fn remove_virtual_machine(
    session: &Session<'_>,
    cluster: &Cluster,
    machine: &HardwareEntity,
) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let changed = session.conn().execute(
        "DELETE FROM virtual_machine WHERE hardware_entity_id = ?1 AND cluster_id = ?2",
        params![machine.id, cluster.id],
    )?;
    if changed == 0 {
        return Err(AquilonError::NotFound(format!(
            "{} is not placed on {}.",
            machine.qualified_name(),
            cluster.qualified_name()
        )));
    }
    Ok(())
}

pub fn add_metacluster_member(
    session: &Session<'_>,
    metacluster: &Cluster,
    member: &Cluster,
) -> Result<(), AquilonError> {
    if metacluster.cluster_type != ClusterType::Meta {
        return Err(AquilonError::ArgumentError(format!(
            "{} is not a metacluster.",
            metacluster.qualified_name()
        )));
    }
    if member.cluster_type == ClusterType::Meta {
        return Err(AquilonError::ArgumentError(format!(
            "{} cannot be nested inside another metacluster.",
            member.qualified_name()
        )));
    }
    metacluster.lock_row(session)?;
    if let Some(current) = owning_metacluster(session, member)? {
        return Err(AquilonError::ArgumentError(format!(
            "{} is already a member of {}.",
            member.qualified_name(),
            current.qualified_name()
        )));
    }
    session.conn().execute(
        "INSERT INTO metacluster_member(cluster_id, metacluster_id) VALUES(?1, ?2)",
        params![member.id, metacluster.id],
    )?;
    validate(session, &metacluster.reload(session)?)
}

/// Deletes a cluster. Dependent rows are removed explicitly, in order.
pub fn del_cluster(session: &Session<'_>, cluster: &Cluster) -> Result<(), AquilonError> {
    cluster.lock_row(session)?;
    let cluster = cluster.reload(session)?;
    if virtual_machine_count(session, &cluster)? > 0 {
        return Err(AquilonError::ArgumentError(format!(
            "{} still has virtual machines, please remove them first.",
            cluster.qualified_name()
        )));
    }
    if !metacluster_members(session, &cluster)?.is_empty() {
        return Err(AquilonError::ArgumentError(format!(
            "{} still has member clusters, please remove them first.",
            cluster.qualified_name()
        )));
    }
    let conn = session.conn();
    conn.execute(
        "DELETE FROM host_cluster_member WHERE cluster_id = ?1",
        params![cluster.id],
    )?;
    conn.execute(
        "DELETE FROM cluster_allowed_personality WHERE cluster_id = ?1",
        params![cluster.id],
    )?;
    conn.execute(
        "DELETE FROM metacluster_member WHERE cluster_id = ?1",
        params![cluster.id],
    )?;
    conn.execute("DELETE FROM cluster WHERE id = ?1", params![cluster.id])?;
    info!(cluster = %cluster.name, "cluster deleted");
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "cluster",
        "version": "0.1.0",
        "description": "Cluster membership rules and capacity validation",
        "commands": [
            { "name": "add_cluster", "parameters": ["name", "type", "location_constraint", "preferred_location",
                                                    "personality", "branch", "max_hosts", "down_hosts_threshold",
                                                    "down_maint_threshold"] },
            { "name": "bind_host", "parameters": ["cluster", "host"] },
            { "name": "unbind_host", "parameters": ["cluster", "host"] },
            { "name": "validate", "parameters": ["cluster"] },
            { "name": "allow_personality", "parameters": ["cluster", "personality"] },
            { "name": "set_thresholds", "parameters": ["cluster", "down_hosts", "down_maint"] },
            { "name": "set_status", "parameters": ["cluster", "status"] },
            { "name": "add_metacluster_member", "parameters": ["metacluster", "cluster"] }
        ],
        "storage": ["cluster", "cluster_allowed_personality", "host_cluster_member",
                    "metacluster_member", "virtual_machine"]
    })
}
