#[path = "../support/mod.rs"]
mod support;

use aquilon::core::broker::{self, Broker};
use aquilon::core::config::{BrokerConfig, CONFIG_FILE_NAME};
use aquilon::core::entity::{self, Entity, Key};
use aquilon::core::error::AquilonError;
use aquilon::core::session::LockedRow;
use aquilon::subsystems::dns;
use aquilon::subsystems::inventory::Personality;
use aquilon::subsystems::location::{self, Location, LocationType};
use aquilon::subsystems::network;
use std::fs;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn broker_commits_on_ok_and_rolls_back_on_err() {
    let fx = support::empty();

    fx.broker
        .with_session("tester", "location.add", |s| {
            location::add_location(s, "ms", LocationType::Company, None)
        })
        .expect("commit path");

    let result: Result<(), AquilonError> = fx.broker.with_session("tester", "location.fail", |s| {
        location::add_location(s, "gs", LocationType::Company, None)?;
        Err(AquilonError::ArgumentError("intentional".to_string()))
    });
    assert!(result.unwrap_err().is_argument_error());

    fx.broker
        .with_read(|s| {
            assert!(location::get_location(s, "ms", LocationType::Company).is_ok());
            let gone = location::get_location(s, "gs", LocationType::Company).unwrap_err();
            assert!(gone.is_not_found());
            Ok(())
        })
        .expect("read back");

    let events = broker::read_events(fx.broker.audit_log_path()).expect("audit log");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].op, "location.add");
    assert_eq!(events[0].status, "success");
    assert_eq!(events[1].op, "location.fail");
    assert_eq!(events[1].status, "error");
    assert!(events.iter().all(|ev| ev.actor == "tester"));
    assert!(events.iter().all(|ev| ev.db_id == "aquilon.db"));
    assert!(
        events
            .iter()
            .all(|ev| ulid::Ulid::from_string(&ev.event_id).is_ok())
    );
}

#[test]
fn audit_log_can_be_disabled() {
    let fx = support::empty_with(BrokerConfig {
        audit_log: false,
        ..BrokerConfig::default()
    });
    fx.broker
        .with_session("tester", "noop", |_| Ok(()))
        .expect("session");
    assert!(!fx.broker.audit_log_path().exists());
    assert!(broker::read_events(fx.broker.audit_log_path()).unwrap().is_empty());
}

#[test]
fn audit_failure_does_not_undo_a_commit() {
    let fx = support::empty();
    // A directory where the log file should be makes every append fail.
    fs::create_dir_all(fx.broker.audit_log_path()).unwrap();

    fx.broker
        .with_session("tester", "location.add", |s| {
            location::add_location(s, "ms", LocationType::Company, None)
        })
        .expect("committed work is reported as committed");

    let err = fx
        .broker
        .with_session("tester", "location.fail", |s| {
            location::add_location(s, "gs", LocationType::Company, None)?;
            Err::<(), _>(AquilonError::ArgumentError("intentional".to_string()))
        })
        .unwrap_err();
    assert!(err.is_argument_error());
    assert_eq!(err.to_string(), "intentional");

    fx.broker
        .with_read(|s| {
            assert!(location::get_location(s, "ms", LocationType::Company).is_ok());
            assert!(
                location::get_location(s, "gs", LocationType::Company)
                    .unwrap_err()
                    .is_not_found()
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn root_config_file_is_honoured() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "database = \"cmdb.sqlite\"\nmax_alias_depth = 2\n",
    )
    .expect("write config");

    let broker = Broker::open_with_root_config(tmp.path()).expect("open");
    assert_eq!(broker.config().max_alias_depth, 2);
    assert_eq!(broker.config().default_dns_environment, "internal");
    assert!(tmp.path().join("cmdb.sqlite").exists());
}

#[test]
fn invalid_config_is_a_config_error() {
    let err = BrokerConfig::from_toml_str("max_alias_depth = 0").unwrap_err();
    assert!(matches!(err, AquilonError::ConfigError(_)));
}

#[test]
fn schema_seeding_is_idempotent() {
    let tmp = tempdir().expect("tempdir");
    Broker::open(tmp.path(), BrokerConfig::default()).expect("first open");
    let broker = Broker::open(tmp.path(), BrokerConfig::default()).expect("second open");
    let conn = broker.connect().expect("connect");
    let envs: i64 = conn
        .query_row("SELECT COUNT(*) FROM network_environment", [], |row| row.get(0))
        .expect("count");
    assert_eq!(envs, 1);
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
}

#[test]
fn concurrent_sessions_serialize() {
    let fx = support::empty();
    let broker = Arc::new(fx.broker);
    let handles: Vec<_> = ["alpha", "beta", "gamma", "delta"]
        .into_iter()
        .map(|name| {
            let b = Arc::clone(&broker);
            std::thread::spawn(move || {
                b.with_session("tester", "location.add", |s| {
                    location::add_location(s, name, LocationType::Company, None)
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread").expect("session");
    }
    let count: i64 = broker
        .connect()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM location", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 4);
}

#[test]
fn get_unique_compel_and_preclude() {
    let fx = support::seeded();
    fx.broker
        .with_read(|s| {
            let found = entity::get_unique::<Location>(
                s,
                &[
                    ("name", Key::from("np")),
                    ("location_type", Key::from("building")),
                ],
                true,
                false,
            )?;
            assert_eq!(found.map(|l| l.name), Some("np".to_string()));

            let missing = entity::get_unique::<Location>(
                s,
                &[("name", Key::from("nowhere"))],
                false,
                false,
            )?;
            assert!(missing.is_none());

            let err = entity::get_unique::<Location>(s, &[("name", Key::from("nowhere"))], true, false)
                .unwrap_err();
            assert!(err.is_not_found());

            let err = entity::get_unique::<Location>(
                s,
                &[
                    ("name", Key::from("np")),
                    ("location_type", Key::from("building")),
                ],
                false,
                true,
            )
            .unwrap_err();
            assert!(err.is_argument_error());
            assert_eq!(err.to_string(), "Building np already exists.");
            Ok(())
        })
        .unwrap();
}

#[test]
fn get_unique_rejects_ambiguous_matches() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "room.add", |s| {
            let np = support::building(s, "np");
            location::add_location(s, "np", LocationType::Room, Some(&np))
        })
        .unwrap();
    fx.broker
        .with_read(|s| {
            let err = entity::get_unique::<Location>(s, &[("name", Key::from("np"))], false, false)
                .unwrap_err();
            assert!(err.is_argument_error());
            assert!(err.to_string().contains("is not unique, 2 rows match"));
            Ok(())
        })
        .unwrap();
}

#[test]
fn get_unique_follows_nested_lookups_and_nulls() {
    let fx = support::seeded();
    fx.broker
        .with_read(|s| {
            let pers = entity::get_unique::<Personality>(
                s,
                &[
                    ("name", Key::from("nfs")),
                    ("archetype", Key::Lookup(vec![("name", Key::from("filer"))])),
                ],
                true,
                false,
            )?
            .expect("personality");
            assert_eq!(pers.label(), "filer/nfs");

            let err = entity::get_unique::<Personality>(
                s,
                &[
                    ("name", Key::from("nfs")),
                    ("archetype", Key::Lookup(vec![("name", Key::from("windows"))])),
                ],
                false,
                false,
            )
            .unwrap_err();
            assert!(err.is_not_found());

            // A NULL key matches NULL columns only.
            let root = entity::get_unique::<Location>(
                s,
                &[("name", Key::from("ms")), ("parent", Key::null())],
                true,
                false,
            )?;
            assert_eq!(root.map(|l| l.location_type), Some(LocationType::Company));
            let none = entity::get_unique::<Location>(
                s,
                &[("name", Key::from("us")), ("parent", Key::null())],
                false,
                false,
            )?;
            assert!(none.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn single_label_lookup_needs_a_single_unique_field() {
    let fx = support::seeded();
    fx.broker
        .with_read(|s| {
            let err = entity::get_unique_by_label::<Location>(s, "np", false).unwrap_err();
            assert!(err.is_internal());
            Ok(())
        })
        .unwrap();
}

#[test]
fn get_by_id_reports_class_and_id() {
    let fx = support::seeded();
    fx.broker
        .with_read(|s| {
            let err = entity::get_by_id::<Location>(s, 987_654).unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(err.to_string(), "Location with id 987654 not found.");
            Ok(())
        })
        .unwrap();
}

#[test]
fn polymorphic_subclass_lists_valid_tags() {
    let err = entity::polymorphic_subclass::<LocationType>("moon", "Unknown location type")
        .unwrap_err();
    assert!(err.is_argument_error());
    assert_eq!(
        err.to_string(),
        "Unknown location type 'moon'. Valid values are: building, bunker, campus, city, \
         company, continent, country, desk, hub, rack, room."
    );
    let rack: LocationType = entity::polymorphic_subclass("Rack", "Unknown location type").unwrap();
    assert_eq!(rack, LocationType::Rack);
}

#[test]
fn domain_locks_must_precede_network_locks() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "lock.order", |s| {
            let env = network::get_network_environment(s, None)?;
            let net = network::get_net_by_ip(s, Ipv4Addr::new(10, 0, 0, 1), &env)?;
            let domain = dns::get_dns_domain(s, "example.com")?;
            net.lock_row(s)?;
            domain.lock_row(s)
        })
        .unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("lock order violation"));

    fx.broker
        .with_session("tester", "lock.order", |s| {
            let env = network::get_network_environment(s, None)?;
            let net = network::get_net_by_ip(s, Ipv4Addr::new(10, 0, 0, 1), &env)?;
            let domain = dns::get_dns_domain(s, "example.com")?;
            domain.lock_row(s)?;
            net.lock_row(s)?;
            // Re-locking a held row is a no-op, even out of order.
            domain.lock_row(s)?;
            assert_eq!(
                s.locked_rows(),
                vec![
                    LockedRow { table: "dns_domain", id: domain.id },
                    LockedRow { table: "network", id: net.id },
                ]
            );
            Ok(())
        })
        .expect("ordered locking");
}

#[test]
fn lock_rows_sorts_and_rejects_mixed_tables() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "lock.rows", |s| {
            let a = dns::get_dns_domain(s, "example.com")?;
            let b = dns::get_dns_domain(s, "ms.com")?;
            let c = dns::get_dns_domain(s, "ext.example.net")?;
            entity::lock_rows(s, &[&c, &a, &b, &a])?;
            let ids: Vec<i64> = s.locked_rows().iter().map(|row| row.id).collect();
            let mut sorted = vec![a.id, b.id, c.id];
            sorted.sort_unstable();
            assert_eq!(ids, sorted);

            let err = s
                .lock_rows(&[("dns_domain", a.id), ("network", 1)])
                .unwrap_err();
            assert!(err.is_internal());
            Ok(())
        })
        .unwrap();
}

#[test]
fn locking_a_deleted_row_is_not_found() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "lock.missing", |s| s.lock_row("dns_domain", 424_242))
        .unwrap_err();
    assert!(err.is_not_found());
}
