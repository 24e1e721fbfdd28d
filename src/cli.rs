//! CLI struct definitions for the `aq` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "aq",
    version = env!("CARGO_PKG_VERSION"),
    about = "Aquilon broker core: inventory, DNS address allocation and cluster validation."
)]
pub(crate) struct Cli {
    /// Broker root holding the database, config and audit log.
    #[clap(long, global = true, default_value = ".aquilon")]
    pub root: PathBuf,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text")]
    pub format: String,
    /// Actor recorded in the audit log.
    #[clap(long, global = true, default_value = "cli")]
    pub actor: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the database and seed lookup rows.
    Init,
    /// Print subsystem metadata.
    Schema(SchemaCli),
    /// Show the session audit log.
    Audit,
    Location(LocationCli),
    DnsDomain(DnsDomainCli),
    Network(NetworkCli),
    Address(AddressCli),
    Cluster(ClusterCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct SchemaCli {
    /// Optional: filter by subsystem name
    #[clap(long)]
    pub subsystem: Option<String>,
    /// Omit the generation timestamp
    #[clap(long)]
    pub deterministic: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LocationCli {
    #[clap(subcommand)]
    pub command: LocationCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LocationCommand {
    Add {
        #[clap(long)]
        name: String,
        /// company, hub, continent, country, campus, city, building, room, bunker, rack, desk
        #[clap(long = "type")]
        location_type: String,
        #[clap(long)]
        parent: Option<String>,
        #[clap(long, requires = "parent")]
        parent_type: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct DnsDomainCli {
    #[clap(subcommand)]
    pub command: DnsDomainCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DnsDomainCommand {
    Add {
        #[clap(long)]
        name: String,
        #[clap(long)]
        restricted: bool,
        #[clap(long)]
        comments: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct NetworkCli {
    #[clap(subcommand)]
    pub command: NetworkCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum NetworkCommand {
    Add {
        #[clap(long)]
        name: String,
        #[clap(long)]
        ip: Ipv4Addr,
        #[clap(long)]
        cidr: u8,
        #[clap(long)]
        network_environment: Option<String>,
        #[clap(long)]
        comments: Option<String>,
    },
    /// Find the network containing an address.
    Show {
        #[clap(long)]
        ip: Ipv4Addr,
        #[clap(long)]
        network_environment: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AddressCli {
    #[clap(subcommand)]
    pub command: AddressCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AddressCommand {
    /// Bind a name to an address (or reserve the name when no IP is given).
    Add {
        #[clap(long)]
        fqdn: String,
        #[clap(long)]
        ip: Option<Ipv4Addr>,
        #[clap(long)]
        network_environment: Option<String>,
        #[clap(long)]
        dns_environment: Option<String>,
        #[clap(long)]
        comments: Option<String>,
        #[clap(long)]
        allow_multi: bool,
        #[clap(long)]
        relaxed: bool,
    },
    /// Delete every record of a name.
    Del {
        #[clap(long)]
        fqdn: String,
        #[clap(long)]
        dns_environment: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ClusterCli {
    #[clap(subcommand)]
    pub command: ClusterCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ClusterCommand {
    /// Re-run membership and capacity checks.
    Validate {
        #[clap(long)]
        cluster: String,
    },
}
