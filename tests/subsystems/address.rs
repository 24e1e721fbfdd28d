#[path = "../support/mod.rs"]
mod support;

use aquilon::core::error::AquilonError;
use aquilon::core::session::Session;
use aquilon::subsystems::address::{self, AddressAssignment, AssignRequest};
use aquilon::subsystems::dns::{self, GrabFlags, GrabRequest, ReleaseOpts};
use aquilon::subsystems::inventory::Interface;
use aquilon::subsystems::network::{self, Network};
use std::net::Ipv4Addr;
use support::grab;

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn np_net(s: &Session<'_>) -> Network {
    let env = network::get_network_environment(s, None).expect("default environment");
    network::get_net_by_ip(s, ip(0), &env).expect("np-net")
}

fn assign(
    s: &Session<'_>,
    iface: &Interface,
    addr: Ipv4Addr,
    label: Option<&str>,
    priority: Option<i64>,
) -> Result<AddressAssignment, AquilonError> {
    let net = np_net(s);
    address::assign_address(
        s,
        &AssignRequest {
            interface: iface,
            network: &net,
            ip: addr,
            label,
            shared: priority.is_some(),
            priority,
            service_address: None,
        },
    )
}

fn eth0(s: &Session<'_>, machine: &str) -> Interface {
    use aquilon::core::entity::{self, Key};
    entity::get_unique::<Interface>(
        s,
        &[
            ("hardware_entity", Key::Lookup(vec![("label", Key::from(machine))])),
            ("name", Key::from("eth0")),
        ],
        true,
        false,
    )
    .expect("interface lookup")
    .expect("interface")
}

#[test]
fn exclusive_assignments_conflict() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "setup", |s| {
            support::add_machine_with_nic(s, "m1", "np1");
            support::add_machine_with_nic(s, "m2", "np1");
            Ok(())
        })
        .unwrap();

    fx.broker
        .with_session("tester", "assign", |s| {
            let m1 = eth0(s, "m1");
            let first = assign(s, &m1, ip(10), None, None)?;
            assert_eq!(first.interface_label(), "interface eth0 of m1");

            let err = assign(s, &eth0(s, "m2"), ip(10), None, None).unwrap_err();
            assert_eq!(
                err.to_string(),
                "IP address 10.0.0.10 is already in use by interface eth0 of m1."
            );

            let err = assign(s, &m1, ip(11), None, None).unwrap_err();
            assert_eq!(err.to_string(), "Interface eth0 of m1 already has a primary address.");

            let err = assign(s, &m1, ip(10), Some("extra"), None).unwrap_err();
            assert_eq!(err.to_string(), "Interface eth0 of m1 already has IP address 10.0.0.10.");

            assign(s, &m1, ip(11), Some("hb"), None)?;
            let labels: Vec<String> = address::interface_addresses(s, &m1)?
                .into_iter()
                .map(|a| a.label)
                .collect();
            assert_eq!(labels, vec!["".to_string(), "hb".to_string()]);

            let err = assign(s, &m1, ip(12), Some("Not-Valid"), None).unwrap_err();
            assert!(err.to_string().starts_with("Illegal address label"));
            Ok(())
        })
        .unwrap();
}

#[test]
fn shared_assignments_need_distinct_priorities() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "assign", |s| {
            let (_, a) = support::add_machine_with_nic(s, "m1", "np1");
            let (_, b) = support::add_machine_with_nic(s, "m2", "np1");
            let (_, c) = support::add_machine_with_nic(s, "m3", "np1");
            let net = np_net(s);

            assign(s, &a, ip(15), None, Some(1))?;
            assign(s, &b, ip(15), None, Some(2))?;
            let err = assign(s, &c, ip(15), None, Some(1)).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Priority 1 is already used by interface eth0 of m1 for IP address 10.0.0.15."
            );

            let err = address::assign_address(
                s,
                &AssignRequest {
                    interface: &c,
                    network: &net,
                    ip: ip(15),
                    label: None,
                    shared: true,
                    priority: None,
                    service_address: None,
                },
            )
            .unwrap_err();
            assert_eq!(err.to_string(), "Shared addresses require a priority.");

            let err = address::assign_address(
                s,
                &AssignRequest {
                    interface: &c,
                    network: &net,
                    ip: ip(16),
                    label: None,
                    shared: false,
                    priority: Some(3),
                    service_address: None,
                },
            )
            .unwrap_err();
            assert!(err.is_argument_error());

            // Exclusive use of a shared address is refused.
            let err = assign(s, &c, ip(15), None, None).unwrap_err();
            assert!(err.to_string().contains("already in use by interface eth0 of m1"));
            assert_eq!(address::assignments_at(s, net.id, ip(15))?.len(), 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn grab_respects_interface_claims() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "assign", |s| {
            let (_, a) = support::add_machine_with_nic(s, "m1", "np1");
            let (_, b) = support::add_machine_with_nic(s, "m2", "np1");
            assign(s, &a, ip(10), None, None)?;
            assign(s, &b, ip(20), None, Some(5))?;
            Ok(())
        })
        .unwrap();

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "IP address 10.0.0.10 is already in use by interface eth0 of m1."
    );

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "vip.example.com", Some(ip(20)), GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.is_argument_error());

    fx.broker
        .with_session("tester", "grab", |s| {
            grab(
                s,
                "vip.example.com",
                Some(ip(20)),
                GrabFlags {
                    allow_shared: true,
                    ..Default::default()
                },
            )
        })
        .expect("shared grab");
}

#[test]
fn assignment_records_follow_the_published_environment() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "m1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap();
    fx.broker
        .with_session("tester", "grab", |s| {
            dns::grab_address(
                s,
                &GrabRequest {
                    fqdn: "m1-ext.example.com",
                    ip: Some(ip(10)),
                    dns_environment: Some("external"),
                    ..Default::default()
                },
            )
        })
        .unwrap();

    fx.broker
        .with_session("tester", "assign", |s| {
            let (_, eth0) = support::add_machine_with_nic(s, "m1", "np1");
            let assignment = assign(s, &eth0, ip(10), None, None)?;
            let records = address::assignment_dns_records(s, &assignment)?;
            let names: Vec<String> = records.iter().map(|r| r.fqdn.fqdn()).collect();
            assert_eq!(names, vec!["m1.example.com".to_string()]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn unassigning_the_last_claim_releases_records() {
    let fx = support::seeded();
    let record = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "m1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap()
        .record;
    fx.broker
        .with_session("tester", "assign", |s| {
            let (_, eth0) = support::add_machine_with_nic(s, "m1", "np1");
            assign(s, &eth0, ip(10), None, None)?;
            Ok(())
        })
        .unwrap();

    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(
                s,
                &record,
                ReleaseOpts {
                    verify_assignments: true,
                    ..Default::default()
                },
            )
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "IP address 10.0.0.10 is still in use by interface eth0 of m1."
    );

    let released = fx
        .broker
        .with_session("tester", "unassign", |s| {
            address::unassign_address(s, &eth0(s, "m1"), ip(10))
        })
        .unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].id, record.id);

    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            assert!(dns::get_fqdn(s, "m1.example.com", &env).unwrap_err().is_not_found());
            let err = address::unassign_address(s, &eth0(s, "m1"), ip(10)).unwrap_err();
            assert!(err.is_not_found());
            Ok(())
        })
        .unwrap();
}

#[test]
fn shared_records_survive_until_the_last_claim() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "vip.example.com", Some(ip(20)), GrabFlags::default())
        })
        .unwrap();
    fx.broker
        .with_session("tester", "assign", |s| {
            let (_, a) = support::add_machine_with_nic(s, "m1", "np1");
            let (_, b) = support::add_machine_with_nic(s, "m2", "np1");
            assign(s, &a, ip(20), None, Some(1))?;
            assign(s, &b, ip(20), None, Some(2))?;
            Ok(())
        })
        .unwrap();

    let released = fx
        .broker
        .with_session("tester", "unassign", |s| {
            address::unassign_address(s, &eth0(s, "m1"), ip(20))
        })
        .unwrap();
    assert!(released.is_empty());

    let released = fx
        .broker
        .with_session("tester", "unassign", |s| {
            address::unassign_address(s, &eth0(s, "m2"), ip(20))
        })
        .unwrap();
    assert_eq!(released.len(), 1);
}

#[test]
fn service_addresses_hold_their_record() {
    let fx = support::seeded();
    let request = GrabRequest {
        fqdn: "svc1.example.com",
        ip: Some(ip(90)),
        ..Default::default()
    };
    let svc = fx
        .broker
        .with_session("tester", "service_address.add", |s| {
            address::add_service_address(s, "svc1", "cluster1", &request)
        })
        .unwrap();
    assert_eq!(svc.holder, "cluster1");

    let err = fx
        .broker
        .with_session("tester", "service_address.add", |s| {
            address::add_service_address(s, "svc1", "cluster1", &request)
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Service Address svc1 of cluster1 already exists.");

    let err = fx
        .broker
        .with_session("tester", "service_address.add", |s| {
            address::add_service_address(
                s,
                "svc2",
                "cluster1",
                &GrabRequest {
                    fqdn: "svc2.example.com",
                    ..Default::default()
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Service address svc2 needs an IP address.");

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "svc1.example.com", Some(ip(90)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "IP address 10.0.0.90 is already used by service address svc1 of cluster1."
    );

    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            let env = network::get_dns_environment(s, None)?;
            let fqdn = dns::get_fqdn(s, "svc1.example.com", &env)?;
            let records = dns::fqdn_records(s, &fqdn)?;
            dns::delete_dns_record(s, &records[0], ReleaseOpts::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record svc1.example.com is still in use by service address svc1 of cluster1, \
         please remove it first."
    );
}
