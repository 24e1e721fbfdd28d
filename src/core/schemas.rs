//! Centralized table definitions for the broker database.
//!
//! The store is a single SQLite database grouped into four areas:
//! 1. Lookup tables: enumerated polymorphic discriminators.
//! 2. Inventory: locations, archetypes, personalities, branches, hardware, hosts.
//! 3. Addressing: environments, networks, DNS domains, FQDNs, records, assignments.
//! 4. Grouping and bindings: clusters, features, services.
//!
//! No foreign key cascades: every teardown path deletes dependent rows
//! explicitly, in order.

// --- 1. Lookup tables ---

pub const SCHEMA_DNS_RECORD_TYPE: &str = "
    CREATE TABLE IF NOT EXISTS dns_record_type (
        name TEXT PRIMARY KEY
    )
";

pub const SCHEMA_CLUSTER_TYPE: &str = "
    CREATE TABLE IF NOT EXISTS cluster_type (
        name TEXT PRIMARY KEY
    )
";

pub const SCHEMA_FEATURE_TYPE: &str = "
    CREATE TABLE IF NOT EXISTS feature_type (
        name TEXT PRIMARY KEY
    )
";

// --- 2. Inventory ---

pub const SCHEMA_LOCATION: &str = "
    CREATE TABLE IF NOT EXISTS location (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        location_type TEXT NOT NULL,
        parent_id INTEGER REFERENCES location(id),
        UNIQUE(name, location_type)
    )
";

pub const SCHEMA_ARCHETYPE: &str = "
    CREATE TABLE IF NOT EXISTS archetype (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        is_compileable INTEGER NOT NULL DEFAULT 1
    )
";

pub const SCHEMA_PERSONALITY: &str = "
    CREATE TABLE IF NOT EXISTS personality (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        archetype_id INTEGER NOT NULL REFERENCES archetype(id),
        host_environment TEXT NOT NULL DEFAULT 'dev',
        UNIQUE(name, archetype_id)
    )
";

pub const SCHEMA_PERSONALITY_STAGE: &str = "
    CREATE TABLE IF NOT EXISTS personality_stage (
        id INTEGER PRIMARY KEY,
        personality_id INTEGER NOT NULL REFERENCES personality(id),
        name TEXT NOT NULL,
        UNIQUE(personality_id, name)
    )
";

pub const SCHEMA_BRANCH: &str = "
    CREATE TABLE IF NOT EXISTS branch (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        branch_type TEXT NOT NULL CHECK (branch_type IN ('domain', 'sandbox'))
    )
";

pub const SCHEMA_MODEL: &str = "
    CREATE TABLE IF NOT EXISTS model (
        id INTEGER PRIMARY KEY,
        vendor TEXT NOT NULL,
        name TEXT NOT NULL,
        model_type TEXT NOT NULL,
        UNIQUE(vendor, name)
    )
";

pub const SCHEMA_OPERATING_SYSTEM: &str = "
    CREATE TABLE IF NOT EXISTS operating_system (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        archetype_id INTEGER NOT NULL REFERENCES archetype(id),
        UNIQUE(name, version, archetype_id)
    )
";

pub const SCHEMA_HARDWARE_ENTITY: &str = "
    CREATE TABLE IF NOT EXISTS hardware_entity (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL UNIQUE,
        hardware_type TEXT NOT NULL,
        model_id INTEGER NOT NULL REFERENCES model(id),
        location_id INTEGER NOT NULL REFERENCES location(id),
        primary_name_id INTEGER UNIQUE REFERENCES dns_record(id),
        serial_no TEXT
    )
";

pub const SCHEMA_INTERFACE: &str = "
    CREATE TABLE IF NOT EXISTS interface (
        id INTEGER PRIMARY KEY,
        hardware_entity_id INTEGER NOT NULL REFERENCES hardware_entity(id),
        name TEXT NOT NULL,
        mac TEXT UNIQUE,
        model_id INTEGER REFERENCES model(id),
        interface_type TEXT NOT NULL DEFAULT 'public',
        UNIQUE(hardware_entity_id, name)
    )
";

pub const SCHEMA_HOST: &str = "
    CREATE TABLE IF NOT EXISTS host (
        id INTEGER PRIMARY KEY,
        hardware_entity_id INTEGER NOT NULL UNIQUE REFERENCES hardware_entity(id),
        personality_stage_id INTEGER NOT NULL REFERENCES personality_stage(id),
        branch_id INTEGER NOT NULL REFERENCES branch(id),
        sandbox_author TEXT,
        operating_system_id INTEGER REFERENCES operating_system(id),
        status TEXT NOT NULL DEFAULT 'build',
        creation_date TEXT NOT NULL
    )
";

// --- 3. Addressing ---

pub const SCHEMA_DNS_ENVIRONMENT: &str = "
    CREATE TABLE IF NOT EXISTS dns_environment (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        comments TEXT
    )
";

pub const SCHEMA_NETWORK_ENVIRONMENT: &str = "
    CREATE TABLE IF NOT EXISTS network_environment (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        dns_environment_id INTEGER NOT NULL REFERENCES dns_environment(id),
        location_id INTEGER REFERENCES location(id),
        comments TEXT
    )
";

pub const SCHEMA_NETWORK: &str = "
    CREATE TABLE IF NOT EXISTS network (
        id INTEGER PRIMARY KEY,
        network_environment_id INTEGER NOT NULL REFERENCES network_environment(id),
        ip INTEGER NOT NULL,
        cidr INTEGER NOT NULL CHECK (cidr BETWEEN 0 AND 32),
        name TEXT NOT NULL,
        network_type TEXT NOT NULL DEFAULT 'unknown',
        location_id INTEGER REFERENCES location(id),
        comments TEXT,
        UNIQUE(network_environment_id, ip)
    )
";

pub const SCHEMA_DNS_DOMAIN: &str = "
    CREATE TABLE IF NOT EXISTS dns_domain (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        restricted INTEGER NOT NULL DEFAULT 0,
        comments TEXT
    )
";

pub const SCHEMA_FQDN: &str = "
    CREATE TABLE IF NOT EXISTS fqdn (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        dns_domain_id INTEGER NOT NULL REFERENCES dns_domain(id),
        dns_environment_id INTEGER NOT NULL REFERENCES dns_environment(id),
        creation_date TEXT NOT NULL,
        UNIQUE(name, dns_domain_id, dns_environment_id)
    )
";

// Subtype columns are nullable; the CHECKs pin which subtype may carry which.
pub const SCHEMA_DNS_RECORD: &str = "
    CREATE TABLE IF NOT EXISTS dns_record (
        id INTEGER PRIMARY KEY,
        fqdn_id INTEGER NOT NULL REFERENCES fqdn(id),
        record_type TEXT NOT NULL REFERENCES dns_record_type(name),
        ip INTEGER,
        network_id INTEGER REFERENCES network(id),
        reverse_ptr_id INTEGER REFERENCES fqdn(id),
        target_id INTEGER REFERENCES fqdn(id),
        srv_service TEXT,
        srv_protocol TEXT,
        srv_priority INTEGER,
        srv_weight INTEGER,
        srv_port INTEGER,
        ttl INTEGER,
        comments TEXT,
        creation_date TEXT NOT NULL,
        CHECK ((record_type IN ('a_record', 'dynamic_stub')) = (ip IS NOT NULL AND network_id IS NOT NULL)),
        CHECK (record_type = 'a_record' OR reverse_ptr_id IS NULL),
        CHECK ((record_type IN ('alias', 'srv_record', 'address_alias')) = (target_id IS NOT NULL))
    )
";
pub const SCHEMA_DNS_RECORD_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_dns_record_fqdn ON dns_record(fqdn_id);
    CREATE INDEX IF NOT EXISTS idx_dns_record_address ON dns_record(network_id, ip);
    CREATE INDEX IF NOT EXISTS idx_dns_record_target ON dns_record(target_id);
    CREATE INDEX IF NOT EXISTS idx_dns_record_reverse_ptr ON dns_record(reverse_ptr_id);
";

pub const SCHEMA_SERVICE_ADDRESS: &str = "
    CREATE TABLE IF NOT EXISTS service_address (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        holder TEXT NOT NULL,
        dns_record_id INTEGER NOT NULL REFERENCES dns_record(id),
        UNIQUE(name, holder)
    )
";

pub const SCHEMA_ADDRESS_ASSIGNMENT: &str = "
    CREATE TABLE IF NOT EXISTS address_assignment (
        id INTEGER PRIMARY KEY,
        interface_id INTEGER NOT NULL REFERENCES interface(id),
        ip INTEGER NOT NULL,
        network_id INTEGER NOT NULL REFERENCES network(id),
        label TEXT NOT NULL DEFAULT '',
        is_shared INTEGER NOT NULL DEFAULT 0,
        priority INTEGER,
        service_address_id INTEGER REFERENCES service_address(id),
        UNIQUE(interface_id, ip),
        UNIQUE(interface_id, label),
        CHECK (is_shared = 0 OR (priority IS NOT NULL AND priority > 0))
    )
";
pub const SCHEMA_ADDRESS_ASSIGNMENT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_address_assignment_address ON address_assignment(network_id, ip)";

// --- 4. Grouping and bindings ---

pub const SCHEMA_CLUSTER: &str = "
    CREATE TABLE IF NOT EXISTS cluster (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        cluster_type TEXT NOT NULL REFERENCES cluster_type(name),
        location_constraint_id INTEGER NOT NULL REFERENCES location(id),
        preferred_location_id INTEGER REFERENCES location(id),
        max_hosts INTEGER,
        max_clusters INTEGER,
        down_hosts_threshold INTEGER NOT NULL DEFAULT 0,
        down_hosts_percent INTEGER NOT NULL DEFAULT 0,
        down_maint_threshold INTEGER,
        down_maint_percent INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'build',
        branch_id INTEGER NOT NULL REFERENCES branch(id),
        sandbox_author TEXT,
        personality_stage_id INTEGER NOT NULL REFERENCES personality_stage(id),
        comments TEXT,
        creation_date TEXT NOT NULL
    )
";

pub const SCHEMA_CLUSTER_ALLOWED_PERSONALITY: &str = "
    CREATE TABLE IF NOT EXISTS cluster_allowed_personality (
        cluster_id INTEGER NOT NULL REFERENCES cluster(id),
        personality_id INTEGER NOT NULL REFERENCES personality(id),
        PRIMARY KEY(cluster_id, personality_id)
    )
";

pub const SCHEMA_HOST_CLUSTER_MEMBER: &str = "
    CREATE TABLE IF NOT EXISTS host_cluster_member (
        host_id INTEGER PRIMARY KEY REFERENCES host(id),
        cluster_id INTEGER NOT NULL REFERENCES cluster(id),
        node_index INTEGER NOT NULL,
        UNIQUE(cluster_id, node_index)
    )
";

pub const SCHEMA_METACLUSTER_MEMBER: &str = "
    CREATE TABLE IF NOT EXISTS metacluster_member (
        cluster_id INTEGER PRIMARY KEY REFERENCES cluster(id),
        metacluster_id INTEGER NOT NULL REFERENCES cluster(id)
    )
";

pub const SCHEMA_VIRTUAL_MACHINE: &str = "
    CREATE TABLE IF NOT EXISTS virtual_machine (
        hardware_entity_id INTEGER PRIMARY KEY REFERENCES hardware_entity(id),
        cluster_id INTEGER NOT NULL REFERENCES cluster(id)
    )
";

pub const SCHEMA_FEATURE: &str = "
    CREATE TABLE IF NOT EXISTS feature (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        feature_type TEXT NOT NULL REFERENCES feature_type(name),
        post_personality INTEGER NOT NULL DEFAULT 0,
        comments TEXT,
        UNIQUE(name, feature_type)
    )
";

// Ids start at 1, so 0 is a safe NULL stand-in: rows with identical non-null
// columns and identical NULL columns collide, anything else coexists.
pub const SCHEMA_FEATURE_LINK: &str = "
    CREATE TABLE IF NOT EXISTS feature_link (
        id INTEGER PRIMARY KEY,
        feature_id INTEGER NOT NULL REFERENCES feature(id),
        model_id INTEGER REFERENCES model(id),
        archetype_id INTEGER REFERENCES archetype(id),
        personality_stage_id INTEGER REFERENCES personality_stage(id),
        interface_name TEXT,
        CHECK (archetype_id IS NULL OR personality_stage_id IS NULL)
    )
";
pub const SCHEMA_FEATURE_LINK_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS uk_feature_link ON feature_link(
        feature_id,
        IFNULL(model_id, 0),
        IFNULL(archetype_id, 0),
        IFNULL(personality_stage_id, 0),
        IFNULL(interface_name, '')
    )
";

pub const SCHEMA_SERVICE: &str = "
    CREATE TABLE IF NOT EXISTS service (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        comments TEXT
    )
";

pub const SCHEMA_SERVICE_INSTANCE: &str = "
    CREATE TABLE IF NOT EXISTS service_instance (
        id INTEGER PRIMARY KEY,
        service_id INTEGER NOT NULL REFERENCES service(id),
        name TEXT NOT NULL,
        UNIQUE(service_id, name)
    )
";

pub const SCHEMA_SERVICE_LIST_ITEM: &str = "
    CREATE TABLE IF NOT EXISTS service_list_item (
        id INTEGER PRIMARY KEY,
        service_id INTEGER NOT NULL REFERENCES service(id),
        archetype_id INTEGER REFERENCES archetype(id),
        personality_stage_id INTEGER REFERENCES personality_stage(id),
        host_environment TEXT,
        operating_system_id INTEGER REFERENCES operating_system(id),
        optional INTEGER NOT NULL DEFAULT 0,
        CHECK ((archetype_id IS NOT NULL) + (personality_stage_id IS NOT NULL) + (operating_system_id IS NOT NULL) = 1),
        CHECK (host_environment IS NULL OR personality_stage_id IS NOT NULL)
    )
";
pub const SCHEMA_SERVICE_LIST_ITEM_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS uk_service_list_item ON service_list_item(
        service_id,
        IFNULL(archetype_id, 0),
        IFNULL(personality_stage_id, 0),
        IFNULL(host_environment, ''),
        IFNULL(operating_system_id, 0)
    )
";

pub const SCHEMA_SERVICE_CLIENT: &str = "
    CREATE TABLE IF NOT EXISTS service_client (
        host_id INTEGER NOT NULL REFERENCES host(id),
        service_instance_id INTEGER NOT NULL REFERENCES service_instance(id),
        PRIMARY KEY(host_id, service_instance_id)
    )
";

/// Every statement, in creation order.
pub const ALL_SCHEMAS: &[&str] = &[
    SCHEMA_DNS_RECORD_TYPE,
    SCHEMA_CLUSTER_TYPE,
    SCHEMA_FEATURE_TYPE,
    SCHEMA_LOCATION,
    SCHEMA_ARCHETYPE,
    SCHEMA_PERSONALITY,
    SCHEMA_PERSONALITY_STAGE,
    SCHEMA_BRANCH,
    SCHEMA_MODEL,
    SCHEMA_OPERATING_SYSTEM,
    SCHEMA_HARDWARE_ENTITY,
    SCHEMA_INTERFACE,
    SCHEMA_HOST,
    SCHEMA_DNS_ENVIRONMENT,
    SCHEMA_NETWORK_ENVIRONMENT,
    SCHEMA_NETWORK,
    SCHEMA_DNS_DOMAIN,
    SCHEMA_FQDN,
    SCHEMA_DNS_RECORD,
    SCHEMA_DNS_RECORD_INDEXES,
    SCHEMA_SERVICE_ADDRESS,
    SCHEMA_ADDRESS_ASSIGNMENT,
    SCHEMA_ADDRESS_ASSIGNMENT_INDEX,
    SCHEMA_CLUSTER,
    SCHEMA_CLUSTER_ALLOWED_PERSONALITY,
    SCHEMA_HOST_CLUSTER_MEMBER,
    SCHEMA_METACLUSTER_MEMBER,
    SCHEMA_VIRTUAL_MACHINE,
    SCHEMA_FEATURE,
    SCHEMA_FEATURE_LINK,
    SCHEMA_FEATURE_LINK_INDEX,
    SCHEMA_SERVICE,
    SCHEMA_SERVICE_INSTANCE,
    SCHEMA_SERVICE_LIST_ITEM,
    SCHEMA_SERVICE_LIST_ITEM_INDEX,
    SCHEMA_SERVICE_CLIENT,
];

// --- Enumerated lookup rows ---

pub const DNS_RECORD_TYPES: &[&str] = &[
    "a_record",
    "dynamic_stub",
    "reserved_name",
    "alias",
    "srv_record",
    "address_alias",
];

pub const CLUSTER_TYPES: &[&str] = &["cluster", "compute", "storage", "esx", "meta"];

pub const FEATURE_TYPES: &[&str] = &["host", "hardware", "interface"];
