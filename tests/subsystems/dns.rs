#[path = "../support/mod.rs"]
mod support;

use aquilon::core::entity::Entity;
use aquilon::subsystems::dns::{
    self, DnsRecordType, DynamicRange, GrabFlags, GrabRequest, ReleaseOpts, SrvRequest,
};
use aquilon::subsystems::network;
use std::net::Ipv4Addr;
use support::grab;

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

#[test]
fn grab_creates_then_reuses_a_binding() {
    let fx = support::seeded();
    let first = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .expect("first grab");
    assert!(first.newly_created);
    assert_eq!(first.record.record_type(), DnsRecordType::ARecord);
    assert_eq!(first.record.ip(), Some(ip(10)));
    assert_eq!(first.record.qualified_name(), "DNS Record web1.example.com");

    let again = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .expect("second grab");
    assert!(!again.newly_created);
    assert_eq!(again.record.id, first.record.id);

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(
                s,
                "web1.example.com",
                Some(ip(10)),
                GrabFlags {
                    preclude: true,
                    ..Default::default()
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "DNS Record web1.example.com already exists.");
}

#[test]
fn an_address_belongs_to_one_name_per_environment() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap();

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web2.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.is_argument_error());
    assert_eq!(
        err.to_string(),
        "IP address 10.0.0.10 is already used by DNS Record web1.example.com."
    );

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(11)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record web1.example.com already exists with IP address 10.0.0.10."
    );

    let multi = fx
        .broker
        .with_session("tester", "grab", |s| {
            let grabbed = grab(
                s,
                "web1.example.com",
                Some(ip(11)),
                GrabFlags {
                    allow_multi: true,
                    ..Default::default()
                },
            )?;
            dns::fqdn_records(s, &grabbed.record.fqdn)
        })
        .expect("allow_multi");
    assert_eq!(multi.len(), 2);
}

#[test]
fn gateway_needs_relaxed_flag() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "gw.example.com", Some(ip(1)), GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.to_string().contains("default gateway"));

    fx.broker
        .with_session("tester", "grab", |s| {
            grab(
                s,
                "gw.example.com",
                Some(ip(1)),
                GrabFlags {
                    relaxed: true,
                    ..Default::default()
                },
            )
        })
        .expect("relaxed grab");
}

#[test]
fn reserved_name_is_converted_in_place() {
    let fx = support::seeded();
    let reserved = fx
        .broker
        .with_session("tester", "reserve", |s| {
            dns::add_reserved_name(s, "db1.example.com", None, Some("keep me"))
        })
        .unwrap();
    assert_eq!(reserved.record_type(), DnsRecordType::ReservedName);

    let grabbed = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "db1.example.com", Some(ip(20)), GrabFlags::default())
        })
        .unwrap();
    assert!(grabbed.newly_created);
    assert_eq!(grabbed.record.id, reserved.id);
    assert_eq!(grabbed.record.fqdn.id, reserved.fqdn.id);
    assert_eq!(grabbed.record.record_type(), DnsRecordType::ARecord);
    assert_eq!(grabbed.record.comments.as_deref(), Some("keep me"));
}

#[test]
fn grab_without_ip_needs_an_existing_record_or_allow_reserved() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "nothing.example.com", None, GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.is_not_found());

    let reserved = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(
                s,
                "nothing.example.com",
                None,
                GrabFlags {
                    allow_reserved: true,
                    ..Default::default()
                },
            )
        })
        .unwrap();
    assert!(reserved.newly_created);
    assert_eq!(reserved.record.record_type(), DnsRecordType::ReservedName);

    // Reserved names are only handed back when explicitly allowed.
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "nothing.example.com", None, GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.to_string().contains("cannot be used for address assignment"));

    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap();
    let reused = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", None, GrabFlags::default())
        })
        .unwrap();
    assert!(!reused.newly_created);
    assert_eq!(reused.record.ip(), Some(ip(10)));
}

#[test]
fn external_addresses_stay_out_of_the_internal_view() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            dns::grab_address(
                s,
                &GrabRequest {
                    fqdn: "partner.example.com",
                    ip: Some(Ipv4Addr::new(192, 168, 0, 10)),
                    network_environment: Some("external"),
                    dns_environment: Some("internal"),
                    ..Default::default()
                },
            )
        })
        .unwrap_err();
    assert!(err.is_argument_error());
    assert!(
        err.to_string()
            .starts_with("Entering external IP addresses to the internal DNS environment")
    );

    let grabbed = fx
        .broker
        .with_session("tester", "grab", |s| {
            dns::grab_address(
                s,
                &GrabRequest {
                    fqdn: "partner.example.com",
                    ip: Some(Ipv4Addr::new(192, 168, 0, 10)),
                    network_environment: Some("external"),
                    ..Default::default()
                },
            )
        })
        .expect("external grab");
    assert_eq!(grabbed.record.fqdn.dns_environment, "external");

    // The same name is independent in the internal view.
    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "partner.example.com", Some(ip(50)), GrabFlags::default())
        })
        .expect("internal grab");
}

#[test]
fn restricted_domains_refuse_new_addresses() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "box.ext.example.net", Some(ip(60)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Domain ext.example.net is restricted, adding extra addresses is not allowed."
    );

    fx.broker
        .with_session("tester", "grab", |s| {
            grab(
                s,
                "box.ext.example.net",
                Some(ip(60)),
                GrabFlags {
                    allow_restricted_domain: true,
                    ..Default::default()
                },
            )
        })
        .expect("override");
}

#[test]
fn dynamic_stubs_block_their_addresses() {
    let fx = support::seeded();
    let stubs = fx
        .broker
        .with_session("tester", "dynamic.add", |s| {
            dns::add_dynamic_range(
                s,
                &DynamicRange {
                    start: ip(100),
                    end: ip(102),
                    network_environment: None,
                    dns_domain: "example.com",
                    comments: None,
                },
            )
        })
        .unwrap();
    assert_eq!(stubs.len(), 3);
    assert!(
        stubs
            .iter()
            .all(|r| r.record_type() == DnsRecordType::DynamicStub)
    );
    assert_eq!(stubs[1].fqdn.fqdn(), "dynamic-10-0-0-101.example.com");

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "host9.example.com", Some(ip(101)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Address 10.0.0.101 is reserved for dynamic DHCP by Dynamic Stub dynamic-10-0-0-101.example.com."
    );

    let err = fx
        .broker
        .with_session("tester", "dynamic.add", |s| {
            dns::add_dynamic_range(
                s,
                &DynamicRange {
                    start: ip(102),
                    end: ip(104),
                    network_environment: None,
                    dns_domain: "example.com",
                    comments: None,
                },
            )
        })
        .unwrap_err();
    assert!(err.to_string().contains("is already used by Dynamic Stub"));

    let removed = fx
        .broker
        .with_session("tester", "dynamic.del", |s| {
            dns::del_dynamic_range(s, ip(100), ip(102), None)
        })
        .unwrap();
    assert_eq!(removed, 3);

    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "host9.example.com", Some(ip(101)), GrabFlags::default())
        })
        .expect("address free again");

    let err = fx
        .broker
        .with_session("tester", "dynamic.del", |s| {
            dns::del_dynamic_range(s, ip(100), ip(102), None)
        })
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn dynamic_range_must_stay_in_one_network() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "dynamic.add", |s| {
            dns::add_dynamic_range(
                s,
                &DynamicRange {
                    start: ip(250),
                    end: Ipv4Addr::new(10, 0, 1, 5),
                    network_environment: None,
                    dns_domain: "example.com",
                    comments: None,
                },
            )
        })
        .unwrap_err();
    assert!(err.to_string().contains("must be inside the same network"));
}

#[test]
fn aliased_names_cannot_be_deleted() {
    let fx = support::seeded();
    let web = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web1.example.com", Some(ip(10)), GrabFlags::default())
        })
        .unwrap()
        .record;
    let alias = fx
        .broker
        .with_session("tester", "alias.add", |s| {
            dns::add_alias(s, "www.example.com", "web1.example.com", None, None)
        })
        .unwrap();
    assert_eq!(alias.record_type(), DnsRecordType::Alias);
    assert_eq!(alias.target_id(), Some(web.fqdn.id));

    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &web, ReleaseOpts::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record web1.example.com still has aliases, please remove them first."
    );

    fx.broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &alias, ReleaseOpts::default())?;
            dns::delete_dns_record(s, &web, ReleaseOpts::default())
        })
        .expect("delete alias then target");

    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            assert!(dns::get_fqdn(s, "www.example.com", &env).unwrap_err().is_not_found());
            assert!(dns::get_fqdn(s, "web1.example.com", &env).unwrap_err().is_not_found());
            Ok(())
        })
        .unwrap();
}

#[test]
fn alias_targets_must_exist_outside_restricted_domains() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "alias.add", |s| {
            dns::add_alias(s, "www.example.com", "ghost.example.com", None, None)
        })
        .unwrap_err();
    assert!(err.is_not_found());

    let alias = fx
        .broker
        .with_session("tester", "alias.add", |s| {
            dns::add_alias(s, "mail.example.com", "mx.ext.example.net", None, None)
        })
        .unwrap();

    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            let placeholder = dns::get_fqdn(s, "mx.ext.example.net", &env)?;
            assert!(placeholder.restricted);
            let records = dns::fqdn_records(s, &placeholder)?;
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].record_type(), DnsRecordType::ReservedName);
            Ok(())
        })
        .unwrap();

    fx.broker
        .with_session("tester", "alias.del", |s| {
            dns::delete_dns_record(s, &alias, ReleaseOpts::default())
        })
        .unwrap();

    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            assert!(
                dns::get_fqdn(s, "mx.ext.example.net", &env)
                    .unwrap_err()
                    .is_not_found()
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn alias_chains_are_bounded() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "grab", |s| {
            grab(s, "a0.example.com", Some(ip(70)), GrabFlags::default())
        })
        .unwrap();
    for n in 1..=4 {
        let name = format!("a{n}.example.com");
        let target = format!("a{}.example.com", n - 1);
        fx.broker
            .with_session("tester", "alias.add", |s| {
                dns::add_alias(s, &name, &target, None, None)
            })
            .unwrap_or_else(|e| panic!("alias {name}: {e}"));
    }

    let err = fx
        .broker
        .with_session("tester", "alias.add", |s| {
            dns::add_alias(s, "a5.example.com", "a4.example.com", None, None)
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Maximum alias depth of 4 exceeded by a5.example.com -> a4.example.com."
    );
}

#[test]
fn srv_records_pin_their_target() {
    let fx = support::seeded();
    let ldap = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "ldap1.example.com", Some(ip(30)), GrabFlags::default())
        })
        .unwrap()
        .record;

    let request = SrvRequest {
        service: "ldap",
        protocol: "tcp",
        dns_domain: "example.com",
        target: "ldap1.example.com",
        priority: 10,
        weight: 20,
        port: 389,
        dns_environment: None,
        comments: None,
    };
    let srv = fx
        .broker
        .with_session("tester", "srv.add", |s| dns::add_srv_record(s, &request))
        .unwrap();
    assert_eq!(srv.fqdn.fqdn(), "_ldap._tcp.example.com");
    assert_eq!(srv.target_id(), Some(ldap.fqdn.id));

    let err = fx
        .broker
        .with_session("tester", "srv.add", |s| dns::add_srv_record(s, &request))
        .unwrap_err();
    assert!(err.to_string().contains("already points to ldap1.example.com port 389"));

    // A second port on the same service name is a separate record.
    fx.broker
        .with_session("tester", "srv.add", |s| {
            dns::add_srv_record(
                s,
                &SrvRequest {
                    port: 636,
                    ..request.clone()
                },
            )
        })
        .expect("second port");

    let err = fx
        .broker
        .with_session("tester", "srv.add", |s| {
            dns::add_srv_record(
                s,
                &SrvRequest {
                    protocol: "bogus",
                    ..request.clone()
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown protocol 'bogus'. Valid values are: tcp, udp.");

    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &ldap, ReleaseOpts::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record ldap1.example.com is still in use by SRV records, please remove them first."
    );
}

#[test]
fn reverse_ptr_rules() {
    let fx = support::seeded();
    let web = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "web2.example.com", Some(ip(40)), GrabFlags::default())
        })
        .unwrap()
        .record;

    let (updated, placeholder_domain) = fx
        .broker
        .with_session("tester", "ptr.set", |s| {
            let env = network::get_dns_environment(s, None)?;
            let target = dns::create_target_if_needed(s, "rev.ext.example.net", &env)?;
            let updated = dns::set_reverse_ptr(s, &web, Some(&target))?;
            assert!(s.is_locked("dns_domain", web.fqdn.dns_domain_id));
            assert!(s.is_locked("dns_domain", target.dns_domain_id));
            Ok((updated, target.dns_domain_id))
        })
        .unwrap();
    assert!(updated.reverse_ptr_id().is_some());

    // Pointing back at the record's own name clears the PTR and releases
    // the placeholder, under its domain lock.
    let cleared = fx
        .broker
        .with_session("tester", "ptr.set", |s| {
            let cleared = dns::set_reverse_ptr(s, &updated, Some(&updated.fqdn))?;
            assert!(s.is_locked("dns_domain", placeholder_domain));
            Ok(cleared)
        })
        .unwrap();
    assert_eq!(cleared.reverse_ptr_id(), None);
    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            assert!(
                dns::get_fqdn(s, "rev.ext.example.net", &env)
                    .unwrap_err()
                    .is_not_found()
            );
            Ok(())
        })
        .unwrap();

    let err = fx
        .broker
        .with_session("tester", "ptr.set", |s| {
            let external = dns::grab_address(
                s,
                &GrabRequest {
                    fqdn: "other.example.com",
                    ip: Some(Ipv4Addr::new(192, 168, 0, 20)),
                    network_environment: Some("external"),
                    ..Default::default()
                },
            )?;
            dns::set_reverse_ptr(s, &web, Some(&external.record.fqdn))
        })
        .unwrap_err();
    assert!(err.to_string().contains("is in DNS environment external"));

    let err = fx
        .broker
        .with_session("tester", "ptr.set", |s| {
            let stubs = dns::add_dynamic_range(
                s,
                &DynamicRange {
                    start: ip(200),
                    end: ip(200),
                    network_environment: None,
                    dns_domain: "example.com",
                    comments: None,
                },
            )?;
            dns::set_reverse_ptr(s, &stubs[0], Some(&web.fqdn))
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The reverse PTR record cannot be set for DNS records used for dynamic DHCP."
    );
}

#[test]
fn primary_names_are_protected() {
    let fx = support::seeded();
    let record = fx
        .broker
        .with_session("tester", "primary", |s| {
            let (machine, _) = support::add_machine_with_nic(s, "m1", "np1");
            let record = grab(s, "m1.example.com", Some(ip(80)), GrabFlags::default())?.record;
            dns::set_primary_name(s, &machine, &record)?;
            Ok(record)
        })
        .unwrap();

    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &record, ReleaseOpts::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record m1.example.com is the primary name of Machine m1, it cannot be deleted."
    );

    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "m1.example.com", Some(ip(80)), GrabFlags::default())
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS Record m1.example.com is already used as the primary name of Machine m1."
    );

    // A reserved primary name is not turned into an address either.
    let reserved = fx
        .broker
        .with_session("tester", "primary", |s| {
            let (machine, _) = support::add_machine_with_nic(s, "m2", "np1");
            let reserved = dns::add_reserved_name(s, "m2.example.com", None, None)?;
            dns::set_primary_name(s, &machine, &reserved)?;
            Ok(reserved)
        })
        .unwrap();
    let err = fx
        .broker
        .with_session("tester", "grab", |s| {
            grab(s, "m2.example.com", Some(ip(81)), GrabFlags::default())
        })
        .unwrap_err();
    assert!(err.is_argument_error());
    assert_eq!(
        err.to_string(),
        "DNS Record m2.example.com is already used as the primary name of Machine m2."
    );
    fx.broker
        .with_read(|s| {
            let record = reserved.reload(s)?;
            assert_eq!(record.record_type(), DnsRecordType::ReservedName);
            assert_eq!(record.ip(), None);
            Ok(())
        })
        .unwrap();
}

#[test]
fn releasing_one_of_several_records_keeps_the_name() {
    let fx = support::seeded();
    let multi = GrabFlags {
        allow_multi: true,
        ..Default::default()
    };
    let (first, second) = fx
        .broker
        .with_session("tester", "grab", |s| {
            let first = grab(s, "multi.example.com", Some(ip(90)), multi)?.record;
            let second = grab(s, "multi.example.com", Some(ip(91)), multi)?.record;
            Ok((first, second))
        })
        .unwrap();
    assert_eq!(first.fqdn.id, second.fqdn.id);

    fx.broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &first, ReleaseOpts::default())
        })
        .unwrap();
    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            let fqdn = dns::get_fqdn(s, "multi.example.com", &env)?;
            let left = dns::fqdn_records(s, &fqdn)?;
            assert_eq!(left.len(), 1);
            assert_eq!(left[0].id, second.id);
            assert_eq!(left[0].ip(), Some(ip(91)));
            Ok(())
        })
        .unwrap();

    // Releasing the same record again finds nothing to release.
    let err = fx
        .broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &first, ReleaseOpts::default())
        })
        .unwrap_err();
    assert!(err.is_not_found());

    fx.broker
        .with_session("tester", "record.del", |s| {
            dns::delete_dns_record(s, &second, ReleaseOpts::default())
        })
        .unwrap();
    fx.broker
        .with_read(|s| {
            let env = network::get_dns_environment(s, None)?;
            assert!(
                dns::get_fqdn(s, "multi.example.com", &env)
                    .unwrap_err()
                    .is_not_found()
            );
            Ok(())
        })
        .unwrap();
}
