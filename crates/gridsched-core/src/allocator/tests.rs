//! Allocation feasibility and maximality checks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::*;

fn ep(name: &str) -> Endpoint {
    Endpoint::new(format!("gsiftp://{name}"))
}

fn link(src: &str, dst: &str) -> Link {
    Link::new(ep(src), ep(dst))
}

/// Small deterministic generator so the property checks are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

fn assert_feasible(
    alloc: &Allocation,
    caps: &BTreeMap<Link, i64>,
    limits: &HashMap<Endpoint, EndpointLimit>,
    default_limit: i64,
) {
    let mut egress: HashMap<&Endpoint, i64> = HashMap::new();
    let mut ingress: HashMap<&Endpoint, i64> = HashMap::new();
    for (link, &slots) in &alloc.slots {
        assert!(slots >= 0);
        assert!(slots <= caps[link], "link {link} over capacity");
        *egress.entry(&link.source).or_default() += slots;
        *ingress.entry(&link.destination).or_default() += slots;
    }
    for (endpoint, used) in egress {
        let limit = limits
            .get(endpoint)
            .map(|l| l.egress)
            .unwrap_or(default_limit);
        assert!(used <= limit, "egress of {endpoint} exceeded: {used} > {limit}");
    }
    for (endpoint, used) in ingress {
        let limit = limits
            .get(endpoint)
            .map(|l| l.ingress)
            .unwrap_or(default_limit);
        assert!(used <= limit, "ingress of {endpoint} exceeded: {used} > {limit}");
    }
    assert_eq!(alloc.total, alloc.slots.values().sum::<i64>());
}

#[test]
fn single_link_bounded_by_tightest_constraint() {
    let allocator = CapacityAllocator::new(100);
    let caps = BTreeMap::from([(link("a", "b"), 40)]);
    let limits = HashMap::from([(ep("b"), EndpointLimit { egress: 100, ingress: 25 })]);
    let alloc = allocator
        .allocate(&BTreeSet::new(), &caps, &limits)
        .unwrap();
    assert_eq!(alloc.total, 25);
    assert_eq!(alloc.slots_for(&link("a", "b")), 25);
}

#[test]
fn shared_destination_ingress_is_split() {
    let allocator = CapacityAllocator::new(100);
    let caps = BTreeMap::from([(link("a", "c"), 10), (link("b", "c"), 10)]);
    let limits = HashMap::from([(ep("c"), EndpointLimit { egress: 0, ingress: 12 })]);
    let alloc = allocator
        .allocate(&BTreeSet::new(), &caps, &limits)
        .unwrap();
    assert_eq!(alloc.total, 12);
    assert_feasible(&alloc, &caps, &limits, 100);
}

#[test]
fn endpoint_acting_as_source_and_destination_has_separate_limits() {
    let allocator = CapacityAllocator::new(100);
    let caps = BTreeMap::from([(link("a", "b"), 5), (link("b", "a"), 5)]);
    let limits = HashMap::from([
        (ep("a"), EndpointLimit { egress: 3, ingress: 4 }),
        (ep("b"), EndpointLimit::symmetric(100)),
    ]);
    let alloc = allocator
        .allocate(&BTreeSet::new(), &caps, &limits)
        .unwrap();
    assert_eq!(alloc.slots_for(&link("a", "b")), 3);
    assert_eq!(alloc.slots_for(&link("b", "a")), 4);
}

#[test]
fn zero_link_capacity_is_rejected() {
    let allocator = CapacityAllocator::new(100);
    let caps = BTreeMap::from([(link("a", "b"), 0)]);
    let err = allocator
        .allocate(&BTreeSet::new(), &caps, &HashMap::new())
        .unwrap_err();
    assert!(matches!(err, AllocError::NonPositiveLinkCapacity { capacity: 0, .. }));
}

#[test]
fn negative_endpoint_limit_is_rejected() {
    let allocator = CapacityAllocator::new(100);
    let caps = BTreeMap::from([(link("a", "b"), 1)]);
    let limits = HashMap::from([(ep("a"), EndpointLimit { egress: -1, ingress: 1 })]);
    assert!(matches!(
        allocator.allocate(&BTreeSet::new(), &caps, &limits),
        Err(AllocError::NegativeEndpointLimit { .. })
    ));
}

#[test]
fn empty_endpoint_set_yields_zero_flow() {
    let allocator = CapacityAllocator::new(100);
    let alloc = allocator
        .allocate(&BTreeSet::new(), &BTreeMap::new(), &HashMap::new())
        .unwrap();
    assert_eq!(alloc.total, 0);
    assert!(alloc.slots.is_empty());
}

#[test]
fn random_grids_are_feasible() {
    let mut rng = Lcg(7);
    let names: Vec<String> = (0..6).map(|i| format!("se{i}")).collect();
    for _ in 0..50 {
        let mut caps = BTreeMap::new();
        for _ in 0..10 {
            let s = &names[rng.next(6) as usize];
            let d = &names[rng.next(6) as usize];
            caps.insert(link(s, d), 1 + rng.next(30) as i64);
        }
        let mut limits = HashMap::new();
        for name in &names {
            if rng.next(2) == 0 {
                limits.insert(
                    ep(name),
                    EndpointLimit {
                        egress: rng.next(40) as i64,
                        ingress: rng.next(40) as i64,
                    },
                );
            }
        }
        let allocator = CapacityAllocator::new(20);
        let alloc = allocator
            .allocate(&BTreeSet::new(), &caps, &limits)
            .unwrap();
        assert_feasible(&alloc, &caps, &limits, 20);
    }
}

#[test]
fn random_networks_leave_no_augmenting_path() {
    let mut rng = Lcg(42);
    for _ in 0..50 {
        let vertices = 2 + rng.next(10) as usize;
        let mut net = FlowNetwork::with_vertices(vertices);
        for _ in 0..(vertices * 3) {
            let from = rng.next(vertices as u64) as usize;
            let to = rng.next(vertices as u64) as usize;
            if from != to {
                net.add_edge(from, to, 1 + rng.next(20) as i64);
            }
        }
        net.max_flow(0, vertices - 1);
        assert!(!net.has_augmenting_path(0, vertices - 1));
    }
}
