use crate::harness::TestWorkspace;
use gatecheck_core::PortAllocator;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_allocators_never_share_ports() {
    let ws = TestWorkspace::empty().unwrap();
    let config = ws.config().ports;
    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut allocator = PortAllocator::new(config).unwrap();
                barrier.wait();
                for name in ["proxy", "proxy_ssl", "origin", "origin2", "origin3"] {
                    allocator.reserve_named(name).unwrap();
                }
                // Hold reservations until every worker is done.
                barrier.wait();
                allocator
            })
        })
        .collect();

    let allocators: Vec<PortAllocator> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ports: Vec<u16> = allocators.iter().flat_map(|a| a.reserved()).collect();
    let unique: BTreeSet<u16> = ports.iter().copied().collect();
    assert_eq!(ports.len(), workers * 5);
    assert_eq!(unique.len(), ports.len(), "duplicate ports: {:?}", ports);
}

#[test]
fn test_released_ports_can_be_reserved_again() {
    let ws = TestWorkspace::empty().unwrap();
    let mut first = PortAllocator::new(ws.config().ports).unwrap();
    let port = first.reserve_named("origin").unwrap();
    assert_eq!(first.reserve_named("origin").unwrap(), port);

    first.release_all();
    assert!(first.named("origin").is_none());

    let mut second = PortAllocator::new(ws.config().ports).unwrap();
    let again = second.reserve().unwrap();
    assert!(std::net::TcpListener::bind(("127.0.0.1", again)).is_ok());
}
