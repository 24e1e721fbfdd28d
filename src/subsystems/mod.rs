//! Subsystem registration.
//!
//! Storage for every subsystem is created by `core::db::initialize_db`; this
//! registry only carries the metadata `aq schema` prints. Adding a subsystem:
//! append one entry to `SUBSYSTEMS`.

pub mod address;
pub mod cluster;
pub mod dns;
pub mod feature;
pub mod inventory;
pub mod location;
pub mod network;
pub mod service;

pub(crate) struct SubsystemInfo {
    pub name: &'static str,
    pub schema: fn() -> serde_json::Value,
}

pub(crate) const SUBSYSTEMS: &[SubsystemInfo] = &[
    SubsystemInfo { name: "broker", schema: crate::core::broker::schema },
    SubsystemInfo { name: "location", schema: location::schema },
    SubsystemInfo { name: "inventory", schema: inventory::schema },
    SubsystemInfo { name: "network", schema: network::schema },
    SubsystemInfo { name: "dns", schema: dns::schema },
    SubsystemInfo { name: "address", schema: address::schema },
    SubsystemInfo { name: "cluster", schema: cluster::schema },
    SubsystemInfo { name: "feature", schema: feature::schema },
    SubsystemInfo { name: "service", schema: service::schema },
];

/// Schema metadata keyed by subsystem name.
pub(crate) fn all_schemas() -> std::collections::BTreeMap<&'static str, serde_json::Value> {
    SUBSYSTEMS
        .iter()
        .map(|sub| (sub.name, (sub.schema)()))
        .collect()
}
