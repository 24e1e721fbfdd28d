//! Aquilon: the broker core of a configuration-management database.
//!
//! The crate tracks data-center inventory (locations, hardware, hosts,
//! networks, DNS names, clusters, features and services) in one SQLite
//! database and enforces the invariants that tie those entities together.
//!
//! # Architecture
//!
//! ## The Broker
//!
//! All state access routes through [`core::broker::Broker`]:
//! - Serialization (in-process lock plus `BEGIN IMMEDIATE`)
//! - One transaction per logical operation; errors roll everything back
//! - Audit logging (`broker.events.jsonl`)
//!
//! Engines receive a [`core::session::Session`], never a broker. The session
//! records row locks and rejects a DNS-domain lock taken after a network lock.
//!
//! ## Subsystems
//!
//! - `location`: typed location tree and containment
//! - `inventory`: archetypes, personalities, branches, models, machines, hosts
//! - `network`: DNS/network environments and IPv4 networks
//! - `dns`: names, records, `grab_address` and `delete_dns_record`
//! - `address`: interface address assignments and service addresses
//! - `cluster`: membership rules and capacity validation
//! - `feature`: feature links and per-host feature lookups
//! - `service`: service lists and clients
//!
//! # Examples
//!
//! ```bash
//! aq --root /var/lib/aquilon init
//! aq network add --name np-a --ip 10.0.0.0 --cidr 24
//! aq address add --fqdn web1.example.com --ip 10.0.0.10
//! ```

pub mod core;
pub mod subsystems;

mod cli;

use crate::cli::{
    AddressCommand, Cli, ClusterCommand, Command, DnsDomainCommand, LocationCommand, NetworkCommand,
};
use crate::core::broker::{self, Broker};
use crate::core::entity::{self, Entity, Polymorphic};
use crate::core::error::AquilonError;
use crate::core::time;
use crate::subsystems::location::{self, LocationType};
use crate::subsystems::{cluster, dns, network};
use clap::Parser;
use serde_json::json;

pub fn run() -> Result<(), AquilonError> {
    let cli = Cli::parse();
    let json_output = cli.format == "json";

    if let Command::Schema(schema_cli) = &cli.command {
        let schemas = subsystems::all_schemas();
        let output = match &schema_cli.subsystem {
            Some(sub) => schemas.get(sub.as_str()).cloned().ok_or_else(|| {
                AquilonError::NotFound(format!("Subsystem {sub} not found."))
            })?,
            None => {
                let mut envelope = json!({
                    "schema_version": "1.0.0",
                    "subsystems": schemas
                });
                if !schema_cli.deterministic {
                    if let Some(obj) = envelope.as_object_mut() {
                        obj.insert("generated_at".to_string(), json!(time::now_epoch_z()));
                    }
                }
                envelope
            }
        };
        print_json(&output)?;
        return Ok(());
    }

    let broker = Broker::open_with_root_config(&cli.root)?;
    let actor = cli.actor.as_str();

    let (cmd, result) = match cli.command {
        Command::Schema(_) => unreachable!("handled above"),
        Command::Init => (
            "init",
            json!({ "db": broker.db_path().display().to_string() }),
        ),
        Command::Audit => {
            let events = broker::read_events(broker.audit_log_path())?;
            ("audit", json!({ "events": events }))
        }
        Command::Location(loc_cli) => match loc_cli.command {
            LocationCommand::Add {
                name,
                location_type,
                parent,
                parent_type,
            } => {
                let location_type: LocationType =
                    entity::polymorphic_subclass(&location_type, "Unknown location type")?;
                let added = broker.with_session(actor, "location.add", |s| {
                    let parent = match (parent.as_deref(), parent_type.as_deref()) {
                        (Some(name), Some(tag)) => {
                            let tag: LocationType =
                                entity::polymorphic_subclass(tag, "Unknown location type")?;
                            Some(location::get_location(s, name, tag)?)
                        }
                        _ => None,
                    };
                    location::add_location(s, &name, location_type, parent.as_ref())
                })?;
                ("location.add", json!({ "location": added }))
            }
        },
        Command::DnsDomain(domain_cli) => match domain_cli.command {
            DnsDomainCommand::Add {
                name,
                restricted,
                comments,
            } => {
                let added = broker.with_session(actor, "dns_domain.add", |s| {
                    dns::add_dns_domain(s, &name, restricted, comments.as_deref())
                })?;
                ("dns_domain.add", json!({ "dns_domain": added }))
            }
        },
        Command::Network(net_cli) => match net_cli.command {
            NetworkCommand::Add {
                name,
                ip,
                cidr,
                network_environment,
                comments,
            } => {
                let added = broker.with_session(actor, "network.add", |s| {
                    let env = network::get_network_environment(s, network_environment.as_deref())?;
                    network::add_network(
                        s,
                        &env,
                        network::NewNetwork {
                            name: &name,
                            ip,
                            cidr,
                            network_type: None,
                            location: None,
                            comments: comments.as_deref(),
                        },
                    )
                })?;
                ("network.add", json!({ "network": added }))
            }
            NetworkCommand::Show {
                ip,
                network_environment,
            } => {
                let found = broker.with_read(|s| {
                    let env = network::get_network_environment(s, network_environment.as_deref())?;
                    network::get_net_by_ip(s, ip, &env)
                })?;
                ("network.show", json!({ "network": found }))
            }
        },
        Command::Address(addr_cli) => match addr_cli.command {
            AddressCommand::Add {
                fqdn,
                ip,
                network_environment,
                dns_environment,
                comments,
                allow_multi,
                relaxed,
            } => {
                let grabbed = broker.with_session(actor, "address.add", |s| {
                    dns::grab_address(
                        s,
                        &dns::GrabRequest {
                            fqdn: &fqdn,
                            ip,
                            network_environment: network_environment.as_deref(),
                            dns_environment: dns_environment.as_deref(),
                            comments: comments.as_deref(),
                            flags: dns::GrabFlags {
                                allow_multi,
                                allow_reserved: ip.is_none(),
                                relaxed,
                                preclude: true,
                                ..Default::default()
                            },
                        },
                    )
                })?;
                (
                    "address.add",
                    json!({
                        "fqdn": grabbed.record.fqdn.fqdn(),
                        "record_type": grabbed.record.record_type().subtype_label(),
                        "ip": grabbed.record.ip().map(|ip| ip.to_string()),
                        "newly_created": grabbed.newly_created,
                    }),
                )
            }
            AddressCommand::Del {
                fqdn,
                dns_environment,
            } => {
                let removed = broker.with_session(actor, "address.del", |s| {
                    let env = network::get_dns_environment(s, dns_environment.as_deref())?;
                    let name = dns::get_fqdn(s, &fqdn, &env)?;
                    let records = dns::fqdn_records(s, &name)?;
                    for record in &records {
                        dns::delete_dns_record(s, record, dns::ReleaseOpts::default())?;
                    }
                    Ok(records.len())
                })?;
                ("address.del", json!({ "fqdn": fqdn, "deleted": removed }))
            }
        },
        Command::Cluster(cluster_cli) => match cluster_cli.command {
            ClusterCommand::Validate { cluster: name } => {
                let qualified = broker.with_session(actor, "cluster.validate", |s| {
                    let dbcluster = cluster::get_cluster(s, &name)?;
                    dbcluster.lock_row(s)?;
                    cluster::validate(s, &dbcluster)?;
                    Ok(dbcluster.qualified_name())
                })?;
                ("cluster.validate", json!({ "cluster": qualified, "valid": true }))
            }
        },
    };

    if json_output {
        print_json(&time::command_envelope(cmd, "ok", result))?;
    } else {
        println!("{cmd}: ok");
        print_json(&result)?;
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), AquilonError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AquilonError::InternalError(format!("output serialization: {e}")))?;
    println!("{text}");
    Ok(())
}
