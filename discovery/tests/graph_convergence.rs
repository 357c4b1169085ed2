// Copyright (c) 2024 Botho Foundation

//! Multi-participant convergence tests over a loopback bus.

use rgraph_discovery::{
    DiscoveryConfig, DiscoveryConfigBuilder, Durability, EndpointInfo, EndpointKind,
    EntityInfoRecord, MembershipChannel, NamesAndTypes, NodeName,
};
use rgraph_discovery_test_utils::{test_node_entry, wait_until, Fleet};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn topics(fleet: &Fleet, index: usize, demangle: bool) -> NamesAndTypes {
    let query = fleet.get(index).query();
    let mut out = query.names_and_types();
    query.list_topics(demangle, &mut out).unwrap();
    out
}

#[test]
fn test_two_participants_converge() {
    let fleet = Fleet::new(2, &DiscoveryConfig::default()).unwrap();
    let (a, b) = (fleet.get(0), fleet.get(1));

    a.create_node("talker", "/").unwrap();
    b.create_node("listener", "/").unwrap();
    let publisher = a
        .add_publisher("talker", "/", "/chatter", "std_msgs/msg/String")
        .unwrap();
    let subscription = b
        .add_subscription("listener", "/", "/chatter", "std_msgs/msg/String")
        .unwrap();
    fleet.announce_endpoint(&publisher);
    fleet.announce_endpoint(&subscription);

    assert!(fleet.wait_converged(TIMEOUT));
    assert_eq!(
        a.query().list_nodes(),
        vec![NodeName::new("listener", "/"), NodeName::new("talker", "/")]
    );

    assert_eq!(topics(&fleet, 0, true), topics(&fleet, 1, true));
    assert_eq!(topics(&fleet, 0, false), topics(&fleet, 1, false));
    assert_eq!(a.query().count_subscribers("/chatter").unwrap(), 1);
    assert_eq!(b.query().count_publishers("/chatter").unwrap(), 1);

    fleet.shutdown().unwrap();
}

#[test]
fn test_demangling_is_optional() {
    let fleet = Fleet::new(2, &DiscoveryConfig::default()).unwrap();
    let a = fleet.get(0);
    a.create_node("talker", "/").unwrap();
    let publisher = a
        .add_publisher("talker", "/", "/chatter", "std_msgs/msg/String")
        .unwrap();
    fleet.announce_endpoint(&publisher);

    let demangled = topics(&fleet, 1, true);
    assert_eq!(demangled.names().collect::<Vec<_>>(), vec!["/chatter"]);
    assert!(demangled
        .types("/chatter")
        .unwrap()
        .contains("std_msgs/msg/String"));

    let raw = topics(&fleet, 1, false);
    assert_eq!(raw.names().collect::<Vec<_>>(), vec!["rt/chatter"]);
    assert!(raw
        .types("rt/chatter")
        .unwrap()
        .contains("std_msgs::msg::dds_::String_"));

    fleet.shutdown().unwrap();
}

#[test]
fn test_self_record_with_bogus_node_is_never_listed() {
    let fleet = Fleet::new(2, &DiscoveryConfig::default()).unwrap();
    let (a, b) = (fleet.get(0), fleet.get(1));

    // Someone publishes a record claiming to come from `a`, with a writer
    // the rest of the fleet has metadata for
    let bogus = test_node_entry(&a.local_id(), "bogus", "/", 100, 1, 0);
    let writer = *bogus.writer_gids.iter().next().unwrap();
    fleet.announce_endpoint(&EndpointInfo::new(
        writer,
        a.local_id(),
        "rt/bogus_status",
        "std_msgs::msg::dds_::String_",
        EndpointKind::Writer,
    ));
    let impostor = fleet.bus().endpoint();
    impostor
        .publish(&EntityInfoRecord::new(a.local_id(), vec![bogus]))
        .unwrap();

    // `b` believes it, `a` never does
    assert!(wait_until(TIMEOUT, || {
        b.query().list_nodes() == vec![NodeName::new("bogus", "/")]
    }));
    assert!(topics(&fleet, 1, true).contains("/bogus_status"));
    assert!(a.query().list_nodes().is_empty());
    assert!(topics(&fleet, 0, true).is_empty());
    assert!(topics(&fleet, 0, false).is_empty());

    a.create_node("real", "/").unwrap();
    assert!(wait_until(TIMEOUT, || {
        b.query().list_nodes() == vec![NodeName::new("real", "/")]
    }));
    assert_eq!(a.query().list_nodes(), vec![NodeName::new("real", "/")]);

    fleet.shutdown().unwrap();
}

#[test]
fn test_services_are_listed_everywhere() {
    let fleet = Fleet::new(3, &DiscoveryConfig::default()).unwrap();
    let server = fleet.get(2);
    server.create_node("adder", "/").unwrap();
    let endpoints = server
        .add_service_server("adder", "/", "/add_two_ints", "example_interfaces/srv/AddTwoInts")
        .unwrap();
    for info in &endpoints {
        fleet.announce_endpoint(info);
    }

    for context in fleet.contexts() {
        let mut services = context.query().names_and_types();
        context.query().list_services(&mut services).unwrap();
        assert_eq!(services.names().collect::<Vec<_>>(), vec!["/add_two_ints"]);

        // Service endpoints are not plain topics
        let mut topics = context.query().names_and_types();
        context.query().list_topics(true, &mut topics).unwrap();
        assert!(topics.is_empty());
    }

    fleet.shutdown().unwrap();
}

#[test]
fn test_late_joiner_learns_existing_graph() {
    let config = DiscoveryConfig::default();
    let mut fleet = Fleet::new(2, &config).unwrap();
    fleet.get(0).create_node("talker", "/").unwrap();
    fleet.get(1).create_node("listener", "/robot1").unwrap();
    assert!(fleet.wait_converged(TIMEOUT));

    let late = fleet.join(&config).unwrap();
    assert!(fleet.wait_converged(TIMEOUT));
    assert_eq!(fleet.get(late).query().list_nodes().len(), 2);

    fleet.shutdown().unwrap();
}

#[test]
fn test_volatile_late_joiner_waits_for_announcements() {
    let config = DiscoveryConfigBuilder::new()
        .durability(Durability::Volatile)
        .build();
    let mut fleet = Fleet::new(1, &config).unwrap();
    fleet.get(0).create_node("talker", "/").unwrap();

    let late = fleet.join(&config).unwrap();
    // The first participant learns about the newcomer from its announcement,
    // but nothing replays the older snapshot to the newcomer.
    assert!(wait_until(TIMEOUT, || {
        fleet.get(0).cache().participant_count() == 2
    }));
    assert_eq!(fleet.get(late).cache().participant_count(), 1);

    fleet.get(0).announce().unwrap();
    assert!(fleet.wait_converged(TIMEOUT));
    assert_eq!(
        fleet.get(late).query().list_nodes(),
        vec![NodeName::new("talker", "/")]
    );

    fleet.shutdown().unwrap();
}

#[test]
fn test_departed_participant_is_forgotten() {
    let fleet = Fleet::new(3, &DiscoveryConfig::default()).unwrap();
    let gone = fleet.get(2);
    gone.create_node("ephemeral", "/").unwrap();
    let publisher = gone
        .add_publisher("ephemeral", "/", "/status", "std_msgs/msg/String")
        .unwrap();
    fleet.announce_endpoint(&publisher);

    // The snapshot carrying the writer is the last one `gone` publishes
    let gone_id = gone.local_id();
    for context in fleet.contexts() {
        assert!(wait_until(TIMEOUT, || {
            context
                .cache()
                .node_entries(&gone_id)
                .is_some_and(|nodes| nodes.iter().any(|n| n.writer_gids.contains(&publisher.gid)))
        }));
    }

    for context in &fleet.contexts()[..2] {
        assert!(context.cache().remove_participant(&gone_id));
        assert_eq!(context.cache().participant_count(), 2);
        assert_eq!(context.query().count_publishers("/status").unwrap(), 0);
        assert!(context.query().list_nodes().is_empty());
    }

    fleet.shutdown().unwrap();
}
