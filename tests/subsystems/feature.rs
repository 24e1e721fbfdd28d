#[path = "../support/mod.rs"]
mod support;

use aquilon::subsystems::feature::{self, Feature, FeatureBinding};
use aquilon::subsystems::inventory;
use std::collections::BTreeSet;

fn names(features: &BTreeSet<Feature>) -> Vec<&str> {
    let mut out: Vec<&str> = features.iter().map(|f| f.name.as_str()).collect();
    out.sort_unstable();
    out
}

#[test]
fn host_features_split_on_post_personality() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "feature", |s| {
            let stage = support::stage(s, "aquilon", "inventory");
            let archetype = inventory::get_archetype(s, "aquilon")?;
            let pre_direct = feature::add_feature(s, "pre-direct", "host", false, None)?;
            let post_direct = feature::add_feature(s, "post-direct", "host", true, None)?;
            let pre_arch = feature::add_feature(s, "pre-arch", "host", false, None)?;
            let post_arch = feature::add_feature(s, "post-arch", "host", true, None)?;
            let hw = feature::add_feature(s, "bios", "hardware", false, None)?;

            for f in [&pre_direct, &post_direct] {
                feature::bind_feature(
                    s,
                    f,
                    FeatureBinding {
                        personality_stage: Some(&stage),
                        ..Default::default()
                    },
                )?;
            }
            for f in [&pre_arch, &post_arch] {
                feature::bind_feature(
                    s,
                    f,
                    FeatureBinding {
                        archetype: Some(&archetype),
                        ..Default::default()
                    },
                )?;
            }
            let blade = support::model(s, "ibm", "hs21");
            feature::bind_feature(
                s,
                &hw,
                FeatureBinding {
                    model: Some(&blade),
                    personality_stage: Some(&stage),
                    ..Default::default()
                },
            )?;

            let resolved = feature::host_features(s, &stage)?;
            assert_eq!(names(&resolved.pre_personality), vec!["pre-arch", "pre-direct"]);
            assert_eq!(names(&resolved.post_personality), vec!["post-arch", "post-direct"]);

            // A sibling personality only inherits the archetype links.
            let other = support::stage(s, "aquilon", "compileserver");
            let resolved = feature::host_features(s, &other)?;
            assert_eq!(names(&resolved.pre_personality), vec!["pre-arch"]);
            assert_eq!(names(&resolved.post_personality), vec!["post-arch"]);

            feature::unbind_feature(
                s,
                &pre_direct,
                FeatureBinding {
                    personality_stage: Some(&stage),
                    ..Default::default()
                },
            )?;
            let resolved = feature::host_features(s, &stage)?;
            assert_eq!(names(&resolved.pre_personality), vec!["pre-arch"]);

            let err = feature::unbind_feature(
                s,
                &pre_direct,
                FeatureBinding {
                    personality_stage: Some(&stage),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert!(err.is_not_found());
            Ok(())
        })
        .unwrap();
}

#[test]
fn hardware_and_interface_lookups_agree_with_the_combined_view() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "feature", |s| {
            let stage = support::stage(s, "aquilon", "inventory");
            let archetype = inventory::get_archetype(s, "aquilon")?;
            let blade = support::model(s, "ibm", "hs21");
            let rackmount = support::model(s, "hp", "dl360");
            let nic = support::model(s, "intel", "e1000");

            let bios = feature::add_feature(s, "bios", "hardware", false, None)?;
            let jumbo = feature::add_feature(s, "jumbo", "interface", false, None)?;
            let offload = feature::add_feature(s, "offload", "interface", false, None)?;
            let lldp = feature::add_feature(s, "lldp", "interface", false, None)?;

            feature::bind_feature(
                s,
                &bios,
                FeatureBinding {
                    model: Some(&blade),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )?;
            feature::bind_feature(
                s,
                &jumbo,
                FeatureBinding {
                    personality_stage: Some(&stage),
                    interface_name: Some("eth0"),
                    ..Default::default()
                },
            )?;
            feature::bind_feature(
                s,
                &offload,
                FeatureBinding {
                    model: Some(&nic),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )?;
            feature::bind_feature(
                s,
                &lldp,
                FeatureBinding {
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )?;

            let machine =
                inventory::add_machine(s, "m1", &blade, &support::rack(s, "np1"), None)?;
            let eth0 = inventory::add_interface(s, &machine, "eth0", None, Some(&nic))?;
            let eth1 = inventory::add_interface(s, &machine, "eth1", None, None)?;

            assert_eq!(names(&feature::hardware_features(s, &stage, &blade)?), vec!["bios"]);
            assert!(feature::hardware_features(s, &stage, &rackmount)?.is_empty());

            let on_eth0 = feature::interface_features(s, &stage, &eth0)?;
            let on_eth1 = feature::interface_features(s, &stage, &eth1)?;
            assert_eq!(names(&on_eth0), vec!["jumbo", "lldp", "offload"]);
            assert_eq!(names(&on_eth1), vec!["lldp"]);

            let combined = feature::non_host_features(s, &stage, &machine)?;
            assert_eq!(names(&combined.hardware), vec!["bios"]);
            assert_eq!(combined.interfaces.len(), 2);
            assert_eq!(combined.interfaces.get("eth0"), Some(&on_eth0));
            assert_eq!(combined.interfaces.get("eth1"), Some(&on_eth1));

            // Host features ignore non-host links entirely.
            let host = feature::host_features(s, &stage)?;
            assert!(host.pre_personality.is_empty() && host.post_personality.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn duplicate_links_compare_nulls_as_equal() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "feature", |s| {
            let stage = support::stage(s, "aquilon", "inventory");
            let archetype = inventory::get_archetype(s, "aquilon")?;
            let nic = support::model(s, "intel", "e1000");
            let lldp = feature::add_feature(s, "lldp", "interface", false, None)?;

            let on_archetype = FeatureBinding {
                archetype: Some(&archetype),
                ..Default::default()
            };
            feature::bind_feature(s, &lldp, on_archetype)?;
            let err = feature::bind_feature(s, &lldp, on_archetype).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Interface Feature lldp is already bound to Archetype aquilon."
            );

            // Same archetype, but a different model column: a separate link.
            feature::bind_feature(
                s,
                &lldp,
                FeatureBinding {
                    model: Some(&nic),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )?;

            let on_eth0 = FeatureBinding {
                personality_stage: Some(&stage),
                interface_name: Some("eth0"),
                ..Default::default()
            };
            feature::bind_feature(s, &lldp, on_eth0)?;
            let err = feature::bind_feature(s, &lldp, on_eth0).unwrap_err();
            assert!(err.to_string().contains("is already bound to interface eth0"));
            feature::bind_feature(
                s,
                &lldp,
                FeatureBinding {
                    interface_name: Some("eth1"),
                    ..on_eth0
                },
            )?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn links_are_validated_per_feature_type() {
    let fx = support::seeded();
    fx.broker
        .with_session("tester", "feature", |s| {
            let stage = support::stage(s, "aquilon", "inventory");
            let archetype = inventory::get_archetype(s, "aquilon")?;
            let blade = support::model(s, "ibm", "hs21");
            let nic = support::model(s, "intel", "e1000");
            let host_f = feature::add_feature(s, "ntp", "host", false, None)?;
            let hw_f = feature::add_feature(s, "bios", "hardware", false, None)?;
            let if_f = feature::add_feature(s, "jumbo", "interface", false, None)?;

            let err = feature::bind_feature(
                s,
                &host_f,
                FeatureBinding {
                    archetype: Some(&archetype),
                    personality_stage: Some(&stage),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(
                err.to_string(),
                "A feature can be bound to an archetype or a personality, not both."
            );

            let err = feature::bind_feature(s, &host_f, FeatureBinding::default()).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Please specify either an archetype or a personality."
            );

            let err = feature::bind_feature(
                s,
                &host_f,
                FeatureBinding {
                    model: Some(&blade),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Host Feature ntp cannot be bound to a model or an interface."
            );

            let err = feature::bind_feature(
                s,
                &hw_f,
                FeatureBinding {
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(err.to_string(), "Hardware Feature bios must be bound to a hardware model.");

            let err = feature::bind_feature(
                s,
                &hw_f,
                FeatureBinding {
                    model: Some(&nic),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Model intel/e1000 is not a suitable model for Hardware Feature bios."
            );

            let err = feature::bind_feature(
                s,
                &if_f,
                FeatureBinding {
                    model: Some(&blade),
                    archetype: Some(&archetype),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(err.to_string(), "Model ibm/hs21 is not a network interface model.");

            let err = feature::bind_feature(
                s,
                &if_f,
                FeatureBinding {
                    model: Some(&nic),
                    personality_stage: Some(&stage),
                    interface_name: Some("eth0"),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert!(err.to_string().contains("not both"));

            let err = feature::bind_feature(
                s,
                &if_f,
                FeatureBinding {
                    archetype: Some(&archetype),
                    interface_name: Some("eth0"),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Binding to a named interface requires a personality."
            );

            let err = feature::add_feature(s, "bad", "hardware", true, None).unwrap_err();
            assert!(err.to_string().starts_with("The post_personality attribute is only valid"));
            let err = feature::add_feature(s, "ntp", "host", false, None).unwrap_err();
            assert_eq!(err.to_string(), "Host Feature ntp already exists.");
            let err = feature::get_feature(s, "ntp", "hardware").unwrap_err();
            assert_eq!(err.to_string(), "Hardware Feature ntp not found.");
            Ok(())
        })
        .unwrap();
}
