use std::time::Duration;

use qrouting::{
    router::{
        forwarding::{Decision, Direction, Packet, Provider, StaticRoutes},
        NodeState,
    },
    sim::Simulation,
    Egress, Hop, RouteError,
};

mod common;
#[allow(unused_imports)]
use crate::common::{abilene, enable_tracing, first_address, path};

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn abilene_tables_follow_the_candidate_graphs() {
    let network = abilene();
    let (nodes, spec) = network.validate().unwrap();
    assert_eq!(nodes.len(), 12);
    assert_eq!(network.links.len(), 15);

    let tables = spec.build_tables(&nodes).unwrap();
    assert_eq!(tables.len(), 12);
    assert!(tables.iter().all(|table| table.len() == 12));

    // Denver has three candidates towards Los Angeles.
    let dnvr = nodes.index_of("DNVRng").unwrap();
    let losa = nodes.index_of("LOSAng").unwrap();
    let hops: Vec<_> = tables[dnvr]
        .row(losa)
        .unwrap()
        .iter()
        .map(|entry| entry.hop().clone())
        .collect();
    assert_eq!(
        hops,
        vec![
            Hop::parse("SNVAng"),
            Hop::parse("STTLng"),
            Hop::parse("KSCYng")
        ]
    );

    // Every node is its own sink.
    for (i, table) in tables.iter().enumerate() {
        assert_eq!(table.row(i).unwrap()[0].hop(), &Hop::Sink);
        assert_eq!(table.min_cost(i), Some(0));
    }
}

#[test]
fn abilene_egress_resolution() {
    let sim = Simulation::new(&abilene(), 0).unwrap();

    let dnvr = sim.router("DNVRng").unwrap();
    assert_eq!(dnvr.state(), NodeState::EgressResolved);
    let row = dnvr.table().row(sim.nodes().index_of("LOSAng").unwrap()).unwrap();
    let egresses: Vec<_> = row.iter().map(|entry| entry.egress()).collect();
    assert_eq!(egresses, vec![Some(Egress(2)), Some(Egress(3)), Some(Egress(1))]);

    // ATLAM5 lists itself towards every other node, nothing resolves.
    let atlam5 = sim.router("ATLAM5").unwrap();
    assert!(atlam5
        .table()
        .rows()
        .flatten()
        .all(|entry| entry.egress().is_none()));
}

#[test]
fn abilene_routes_before_the_first_exchange() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    assert!(sim.set_occupancy("DNVRng", "SNVAng", 50));
    sim.start();
    sim.run_until(ms(2000));

    // All costs are still 0, the first candidate wins.
    assert_eq!(path(&sim, "DNVRng", "LOSAng"), ["DNVRng", "SNVAng", "LOSAng"]);
}

#[test]
fn abilene_congested_links_are_avoided() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    assert!(sim.set_occupancy("DNVRng", "SNVAng", 50));
    sim.start();
    sim.run_until(ms(3000));

    let dnvr = sim.router("DNVRng").unwrap();
    let costs: Vec<_> = dnvr
        .table()
        .row(sim.nodes().index_of("LOSAng").unwrap())
        .unwrap()
        .iter()
        .map(|entry| entry.cost())
        .collect();
    assert_eq!(costs, vec![50, 0, 0]);
    assert_eq!(
        path(&sim, "DNVRng", "LOSAng"),
        ["DNVRng", "STTLng", "SNVAng", "LOSAng"]
    );

    // Congest the detour too.
    assert!(sim.set_occupancy("DNVRng", "STTLng", 50));
    sim.run_until(ms(3500));
    assert_eq!(
        path(&sim, "DNVRng", "LOSAng"),
        ["DNVRng", "KSCYng", "HSTNng", "LOSAng"]
    );
}

#[test]
fn abilene_costs_accumulate_along_the_path() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    // Kansas City -> Houston -> Los Angeles.
    sim.set_occupancy("KSCYng", "HSTNng", 3);
    sim.set_occupancy("HSTNng", "LOSAng", 4);
    sim.start();
    sim.run_until(ms(3000));

    let losa = sim.nodes().index_of("LOSAng").unwrap();
    let cost = |node: &str| sim.router(node).unwrap().table().min_cost(losa);

    assert_eq!(cost("HSTNng"), Some(4));
    assert_eq!(cost("KSCYng"), Some(7));
    // Denver has cheaper candidates than Kansas City.
    assert_eq!(cost("DNVRng"), Some(0));
}

#[test]
fn abilene_converged_tables_are_stable() {
    let mut sim = Simulation::new(&abilene(), 42).unwrap();
    for (node, neighbor, occupancy) in [
        ("DNVRng", "SNVAng", 12),
        ("KSCYng", "IPLSng", 7),
        ("IPLSng", "ATLAng", 30),
        ("WASHng", "NYCMng", 2),
        ("HSTNng", "ATLAng", 5),
    ] {
        assert!(sim.set_occupancy(node, neighbor, occupancy));
    }
    sim.start();

    sim.run_until(ms(3000));
    let converged: Vec<_> = sim.routers().iter().map(|r| r.table().clone()).collect();

    sim.run_until(ms(4000));
    let later: Vec<_> = sim.routers().iter().map(|r| r.table().clone()).collect();

    assert_eq!(converged, later);
    assert_eq!(sim.stats().malformed, 0);
    assert!(sim.stats().applied > 0);
}

#[test]
fn abilene_unresolved_rows_have_no_route() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    sim.start();
    sim.run_until(ms(2500));

    let dnvr = first_address(&sim, "DNVRng");
    let packet = Packet {
        source: first_address(&sim, "IPLSng"),
        destination: dnvr,
        protocol: 17,
    };

    // Indianapolis only lists Houston towards Denver, and they aren't linked.
    assert_eq!(
        sim.route("IPLSng", &packet, Direction::Output),
        Err(RouteError::NoRoute {
            destination: "DNVRng".to_string()
        })
    );

    // A static fallback takes over.
    let mut routes = StaticRoutes::new();
    routes.add(Default::default(), Egress(3));
    sim.providers_mut("IPLSng")
        .unwrap()
        .add(0, Provider::Static(routes));

    match sim.route("IPLSng", &packet, Direction::Output).unwrap() {
        Decision::Forward(route) => {
            assert_eq!(route.egress, Egress(3));
            assert_eq!(route.next_hop, None);
        }
        decision => panic!("unexpected decision {decision:?}"),
    }
}

#[test]
fn abilene_telemetry_reaches_neighbors() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    assert!(sim.set_occupancy("KSCYng", "DNVRng", 9));
    sim.start();
    sim.run_until(ms(1600));

    let dnvr = sim.router("DNVRng").unwrap();
    let telemetry = dnvr.telemetry();

    // Two rounds from Kansas City (3 interfaces), Sunnyvale (3) and Seattle (2).
    assert_eq!(telemetry.samples().count(), 8);
    assert_eq!(telemetry.log().len(), 16);

    let kscy = sim.nodes().index_of("KSCYng").unwrap() as u32;
    let sample = telemetry
        .sample(kscy, "fd00:6::1".parse().unwrap())
        .unwrap();
    assert_eq!(sample.occupancy, 9);
    assert_eq!(sample.reporter_name.as_deref(), Some("KSCYng"));
    assert_eq!(sample.updated_at, ms(1501));

    let mut csv = Vec::new();
    telemetry.log().write_csv(&mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 17);
    assert!(csv.contains(",3,6,fd00:6::1,9"));
}

#[test]
fn abilene_stopped_node_freezes() {
    let mut sim = Simulation::new(&abilene(), 0).unwrap();
    sim.start();
    sim.run_until(ms(2500));

    assert!(sim.stop_node("SNVAng"));
    assert!(sim.set_occupancy("SNVAng", "LOSAng", 40));
    assert!(sim.set_occupancy("DNVRng", "SNVAng", 10));
    let frozen = sim.router("SNVAng").unwrap().table().clone();

    sim.run_until(ms(3000));

    assert_eq!(sim.router("SNVAng").unwrap().table(), &frozen);
    assert_eq!(sim.pending_timers("SNVAng"), 0);
    // The report Sunnyvale sent right before stopping still lands, priced with Denver's new queue.
    // Nothing refreshes it afterwards.
    let losa = sim.nodes().index_of("LOSAng").unwrap();
    assert_eq!(
        sim.router("DNVRng").unwrap().table().row(losa).unwrap()[0].cost(),
        10
    );
}
