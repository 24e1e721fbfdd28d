#[path = "../support/mod.rs"]
mod support;

use aquilon::subsystems::network::{self, NewNetwork};
use std::net::Ipv4Addr;

fn block(name: &str, ip: Ipv4Addr, cidr: u8) -> NewNetwork<'_> {
    NewNetwork {
        name,
        ip,
        cidr,
        network_type: None,
        location: None,
        comments: None,
    }
}

#[test]
fn networks_must_be_aligned_and_disjoint() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "network", |s| {
            let internal = network::get_network_environment(s, None)?;

            let err = network::add_network(s, &internal, block("odd", Ipv4Addr::new(10, 0, 2, 7), 24))
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "IP address 10.0.2.7 is not a network address for prefix length 24; did you mean 10.0.2.0?"
            );

            let err = network::add_network(s, &internal, block("wide", Ipv4Addr::new(10, 0, 0, 0), 16))
                .unwrap_err();
            assert!(err.to_string().starts_with("Network 10.0.0.0/16 overlaps Network np-net [10.0.0.0/24]"));

            let err = network::add_network(s, &internal, block("narrow", Ipv4Addr::new(10, 0, 1, 128), 25))
                .unwrap_err();
            assert!(err.to_string().contains("overlaps Network ut-net [10.0.1.0/24]"));

            let next = network::add_network(s, &internal, block("next", Ipv4Addr::new(10, 0, 2, 0), 24))?;
            assert_eq!(next.network_type, "unknown");
            assert_eq!(next.size(), 256);

            // Another environment may reuse the same range.
            let external = network::get_network_environment(s, Some("external"))?;
            network::add_network(s, &external, block("ext-np", Ipv4Addr::new(10, 0, 0, 0), 24))?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn addresses_resolve_to_their_network() {
    let fx = support::seeded();
    fx.broker
        .with_read(|s| {
            let internal = network::get_network_environment(s, None)?;
            let external = network::get_network_environment(s, Some("external"))?;

            let np = network::get_net_by_ip(s, Ipv4Addr::new(10, 0, 0, 200), &internal)?;
            assert_eq!(np.name, "np-net");
            let ut = network::get_net_by_ip(s, Ipv4Addr::new(10, 0, 1, 255), &internal)?;
            assert_eq!(ut.name, "ut-net");
            assert_eq!(ut.broadcast()?, Ipv4Addr::new(10, 0, 1, 255));

            let err = network::get_net_by_ip(s, Ipv4Addr::new(192, 168, 0, 5), &internal).unwrap_err();
            assert!(err.is_not_found());
            let ext = network::get_net_by_ip(s, Ipv4Addr::new(192, 168, 0, 5), &external)?;
            assert_eq!(ext.name, "ext-net");

            let err = network::get_network_environment(s, Some("lab")).unwrap_err();
            assert_eq!(err.to_string(), "Network Environment lab not found.");
            assert_eq!(external.dns_environment, "external");
            Ok(())
        })
        .unwrap();
}

#[test]
fn reserved_addresses_are_refused() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "network", |s| {
            let internal = network::get_network_environment(s, None)?;
            let np = network::get_net_by_ip(s, Ipv4Addr::new(10, 0, 0, 0), &internal)?;

            let err = network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 0, 0), true).unwrap_err();
            assert_eq!(
                err.to_string(),
                "IP address 10.0.0.0 is the address of Network np-net [10.0.0.0/24]."
            );
            let err = network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 0, 255), true).unwrap_err();
            assert!(err.to_string().contains("broadcast address"));
            let err = network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 0, 1), false).unwrap_err();
            assert!(err.to_string().contains("default gateway"));
            network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 0, 1), true)?;
            network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 0, 2), false)?;
            let err = network::check_ip_restrictions(&np, Ipv4Addr::new(10, 0, 1, 2), false).unwrap_err();
            assert!(err.to_string().contains("is not part of"));

            // Point-to-point links use both addresses.
            let p2p = network::add_network(
                s,
                &internal,
                NewNetwork {
                    name: "p2p",
                    ip: Ipv4Addr::new(10, 0, 9, 0),
                    cidr: 31,
                    network_type: Some("transit"),
                    location: None,
                    comments: None,
                },
            )?;
            network::check_ip_restrictions(&p2p, Ipv4Addr::new(10, 0, 9, 0), false)?;
            network::check_ip_restrictions(&p2p, Ipv4Addr::new(10, 0, 9, 1), false)?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn environments_are_unique_by_name() {
    let fx = support::seeded();
    let err = fx
        .broker
        .with_session("tester", "network", |s| network::add_dns_environment(s, "External", None))
        .unwrap_err();
    assert_eq!(err.to_string(), "DNS Environment external already exists.");

    let stored = network::ip_to_db(Ipv4Addr::new(255, 255, 255, 255));
    assert_eq!(stored, 4_294_967_295);
    assert_eq!(network::ip_from_db(stored), Ipv4Addr::new(255, 255, 255, 255));
}
