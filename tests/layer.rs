use opcnet::prelude::*;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CYCLE: Duration = Duration::from_millis(100);
const MAX_CYCLES: usize = 50;

fn build_layer(threaded: bool) -> NetworkLayer {
    let config = config::Config::builder()
        .set_default("port", 0)
        .unwrap()
        .set_default("threaded", threaded)
        .unwrap()
        .build()
        .unwrap();
    let mut layer = NetworkLayer::new(&config).expect("failed to create layer");
    layer.start().expect("failed to start layer");
    layer
}

fn connect_client(layer: &NetworkLayer) -> TcpStream {
    let addr = layer.local_addr().expect("layer should be listening");
    TcpStream::connect(addr).expect("failed to connect client")
}

/// Polls until `predicate` says the collected jobs suffice.
fn poll_until(
    layer: &mut NetworkLayer,
    mut predicate: impl FnMut(&NetworkLayer, &[Job]) -> bool,
) -> Vec<Job> {
    let mut collected = Vec::new();
    for _ in 0..MAX_CYCLES {
        let jobs = layer.poll(CYCLE).expect("poll failed");
        collected.extend(jobs);
        if predicate(layer, &collected) {
            return collected;
        }
    }
    panic!("condition not reached after {MAX_CYCLES} cycles; jobs: {collected:?}");
}

fn wait_for_connections(layer: &mut NetworkLayer, count: usize) {
    poll_until(layer, |layer, _| layer.connection_count() == count);
}

#[test]
fn accepted_connection_produces_binary_message_jobs() {
    let mut layer = build_layer(true);
    let mut client = connect_client(&layer);
    wait_for_connections(&mut layer, 1);

    client.write_all(b"hello layer").expect("client write");
    let jobs = poll_until(&mut layer, |_, jobs| !jobs.is_empty());

    match &jobs[0] {
        Job::BinaryMessage {
            connection,
            message,
        } => {
            assert_eq!(message, b"hello layer");
            assert_eq!(connection.state(), ConnectionState::Opening);
        }
        other => panic!("expected BinaryMessage, got {other:?}"),
    }
}

#[test]
fn connection_can_write_back_to_peer() {
    let mut layer = build_layer(true);
    let mut client = connect_client(&layer);
    wait_for_connections(&mut layer, 1);

    client.write_all(b"ping").expect("client write");
    let jobs = poll_until(&mut layer, |_, jobs| !jobs.is_empty());
    let Job::BinaryMessage { connection, .. } = &jobs[0] else {
        panic!("expected BinaryMessage, got {:?}", jobs[0]);
    };

    connection.write(b"pong").expect("server write");
    let mut reply = [0u8; 4];
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.read_exact(&mut reply).expect("client read");
    assert_eq!(&reply, b"pong");
}

#[test]
fn message_larger_than_recv_buffer_arrives_across_cycles() {
    let config = config::Config::builder()
        .set_default("port", 0)
        .unwrap()
        .set_default("threaded", true)
        .unwrap()
        .set_default("recv_buffer_size", 1024)
        .unwrap()
        .build()
        .unwrap();
    let mut layer = NetworkLayer::new(&config).expect("failed to create layer");
    layer.start().expect("failed to start layer");

    let mut client = connect_client(&layer);
    wait_for_connections(&mut layer, 1);

    // Ten full buffers in one shot. Readiness only fires once for the
    // burst, so the bytes beyond the first read must be picked up by the
    // re-read of a filled buffer on the following cycles.
    let payload: Vec<u8> = (0..10 * 1024).map(|i| i as u8).collect();
    client.write_all(&payload).expect("client write");

    let jobs = poll_until(&mut layer, |_, jobs| {
        jobs.iter()
            .filter_map(|job| match job {
                Job::BinaryMessage { message, .. } => Some(message.len()),
                _ => None,
            })
            .sum::<usize>()
            >= payload.len()
    });

    let mut received = Vec::new();
    for job in &jobs {
        match job {
            Job::BinaryMessage { message, .. } => received.extend_from_slice(message),
            other => panic!("expected only BinaryMessage jobs, got {other:?}"),
        }
    }
    assert_eq!(received, payload);
}

#[test]
fn peer_shutdown_yields_exactly_one_close_job() {
    let mut layer = build_layer(true);
    let client = connect_client(&layer);
    wait_for_connections(&mut layer, 1);

    drop(client);
    let jobs = poll_until(&mut layer, |_, jobs| !jobs.is_empty());

    let close_jobs = jobs
        .iter()
        .filter(|job| matches!(job, Job::CloseConnection { .. }))
        .count();
    assert_eq!(close_jobs, 1);
    assert!(
        !jobs
            .iter()
            .any(|job| matches!(job, Job::BinaryMessage { .. })),
        "no BinaryMessage expected for a shut-down peer: {jobs:?}"
    );

    // The closed connection was reclaimed; the next cycles must unmap it
    // and hand back exactly one delayed call releasing it.
    let jobs = poll_until(&mut layer, |_, jobs| {
        jobs.iter()
            .any(|job| matches!(job, Job::DelayedMethodCall(_)))
    });
    let delayed: Vec<_> = jobs
        .iter()
        .filter(|job| matches!(job, Job::DelayedMethodCall(_)))
        .collect();
    assert_eq!(delayed.len(), 1);
    assert_eq!(layer.connection_count(), 0);
}

#[test]
fn draining_many_closures_yields_one_delayed_call() {
    let mut layer = build_layer(true);
    let mut clients = Vec::new();
    for expected in 1..=3 {
        clients.push(connect_client(&layer));
        wait_for_connections(&mut layer, expected);
    }
    assert_eq!(layer.connection_count(), 3);

    // Collect one connection handle per client through message jobs. The
    // client sockets stay open so no close happens before ours.
    let mut connections: Vec<Arc<dyn Channel>> = Vec::new();
    for client in clients.iter_mut() {
        client.write_all(b"id").expect("client write");
        let jobs = poll_until(&mut layer, |_, jobs| {
            jobs.iter()
                .any(|job| matches!(job, Job::BinaryMessage { .. }))
        });
        for job in jobs {
            if let Job::BinaryMessage { connection, .. } = job {
                connections.push(connection);
            }
        }
    }
    assert_eq!(connections.len(), 3);

    // Workers close all three between cycles.
    let handles: Vec<_> = connections
        .into_iter()
        .map(|connection| thread::spawn(move || connection.close()))
        .collect();
    for handle in handles {
        handle.join().expect("close thread panicked");
    }

    let jobs = poll_until(&mut layer, |_, jobs| {
        jobs.iter()
            .any(|job| matches!(job, Job::DelayedMethodCall(_)))
    });
    let delayed: Vec<_> = jobs
        .iter()
        .filter_map(|job| match job {
            Job::DelayedMethodCall(call) => Some(call),
            _ => None,
        })
        .collect();
    assert_eq!(delayed.len(), 1, "one delayed call per drain: {jobs:?}");
    assert_eq!(delayed[0].payload_size(), 3);
    assert_eq!(layer.connection_count(), 0);
}

#[test]
fn at_most_one_accept_per_cycle() {
    let mut layer = build_layer(true);
    let _clients: Vec<_> = (0..3).map(|_| connect_client(&layer)).collect();

    // Give the listen backlog time to hold all three.
    thread::sleep(Duration::from_millis(200));

    let mut previous = 0;
    for _ in 0..MAX_CYCLES {
        layer.poll(CYCLE).expect("poll failed");
        let count = layer.connection_count();
        assert!(
            count - previous <= 1,
            "more than one accept in a single cycle"
        );
        previous = count;
        if count == 3 {
            return;
        }
    }
    panic!("not all clients were accepted");
}

#[test]
fn stop_emits_one_close_job_per_live_connection() {
    let mut layer = build_layer(true);
    let _client_a = connect_client(&layer);
    wait_for_connections(&mut layer, 1);
    let _client_b = connect_client(&layer);
    wait_for_connections(&mut layer, 2);

    let jobs = layer.stop();
    assert_eq!(jobs.len(), 2);
    assert!(jobs
        .iter()
        .all(|job| matches!(job, Job::CloseConnection { .. })));

    for job in &jobs {
        if let Job::CloseConnection { connection } = job {
            connection.close();
        }
    }
    layer.teardown();
}

#[test]
fn cooperative_mode_frees_without_delayed_call() {
    let mut layer = build_layer(false);
    let client = connect_client(&layer);
    wait_for_connections(&mut layer, 1);

    drop(client);
    let jobs = poll_until(&mut layer, |layer, _| layer.connection_count() == 0);
    assert!(
        !jobs
            .iter()
            .any(|job| matches!(job, Job::DelayedMethodCall(_))),
        "cooperative mode frees synchronously: {jobs:?}"
    );
}

#[test]
fn idle_cycle_returns_empty_batch() {
    let mut layer = build_layer(true);
    let jobs = layer.poll(Duration::from_millis(10)).expect("poll failed");
    assert!(jobs.is_empty());
}
