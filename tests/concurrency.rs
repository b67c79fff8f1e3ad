//! Services shared between threads: scheduler ticks, acknowledgement polling
//! and requests racing on the same instances, and the async driver.
mod helpers {
    include!("helpers/mod.rs");
}

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use helpers::{attach, fast_config, Node, Recorder, SimBus};
use korri_docan::core::Mtype;
use korri_docan::protocol::service::{ChannelListener, DoCanService, TransportEvent};
use korri_docan::protocol::transport::n_ai::{NAi, TargetAddressType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

const TESTER_A: u8 = 0xF1;
const TESTER_B: u8 = 0xF2;
const ECU: u8 = 0x10;
const GATEWAY: u8 = 0x20;

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Tick and poll acknowledgements of `node` from two blocking threads until `stop`.
fn spawn_drivers(node: &Arc<Node>, stop: &Arc<AtomicBool>) -> Vec<tokio::task::JoinHandle<()>> {
    let ticker = {
        let (node, stop) = (Arc::clone(node), Arc::clone(stop));
        tokio::task::spawn_blocking(move || {
            while !stop.load(Ordering::Relaxed) {
                node.run_step();
                std::thread::yield_now();
            }
        })
    };
    let acker = {
        let (node, stop) = (Arc::clone(node), Arc::clone(stop));
        tokio::task::spawn_blocking(move || {
            while !stop.load(Ordering::Relaxed) {
                node.run_ack_step();
                std::thread::yield_now();
            }
        })
    };
    vec![ticker, acker]
}

async fn wait_for(recorder: &Recorder, mut done: impl FnMut(&Recorder) -> bool) {
    while !done(recorder) {
        sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
/// Two testers stream segmented messages into one ECU while the ECU sends to
/// a gateway; every node is ticked and acknowledged from its own threads and
/// requests are issued from concurrent tasks.
async fn test_concurrent_transfers() {
    let bus = SimBus::new();
    let nodes: Vec<(Arc<Node>, Arc<Recorder>)> = [TESTER_A, TESTER_B, ECU, GATEWAY]
        .into_iter()
        .map(|address| {
            let (node, recorder) = attach(&bus, fast_config(address).with_block_size(3));
            (Arc::new(node), recorder)
        })
        .collect();
    let (tester_a, tester_b, ecu, gateway) = (&nodes[0], &nodes[1], &nodes[2], &nodes[3]);

    let stop = Arc::new(AtomicBool::new(false));
    let drivers: Vec<_> = nodes
        .iter()
        .flat_map(|(node, _)| spawn_drivers(node, &stop))
        .collect();

    let mut requests = Vec::new();
    for (sender, target, seed) in [
        (Arc::clone(&tester_a.0), ECU, 0x00),
        (Arc::clone(&tester_b.0), ECU, 0x40),
        (Arc::clone(&ecu.0), GATEWAY, 0x80),
    ] {
        requests.push(tokio::spawn(async move {
            for round in 0..3u8 {
                let message = payload(seed + round, 60 + usize::from(round) * 45);
                sender
                    .request(target, TargetAddressType::Physical, &message, Mtype::Diagnostics)
                    .unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for request in requests {
        request.await.unwrap();
    }

    let finished = timeout(Duration::from_secs(20), async {
        wait_for(&tester_a.1, |r| r.confirms().len() == 3).await;
        wait_for(&tester_b.1, |r| r.confirms().len() == 3).await;
        wait_for(&ecu.1, |r| r.confirms().len() == 3 && r.indications().len() == 6).await;
        wait_for(&gateway.1, |r| r.indications().len() == 3).await;
    })
    .await;
    stop.store(true, Ordering::Relaxed);
    for driver in drivers {
        driver.await.unwrap();
    }
    assert!(finished.is_ok(), "transfers did not complete");

    for (_, recorder) in &nodes {
        assert!(recorder.confirms().iter().all(|(_, result)| result.is_ok()));
        assert!(recorder.indications().iter().all(|(_, _, result)| result.is_ok()));
    }

    // Per identifier, messages arrive whole and in request order.
    let sent = |seed: u8| -> Vec<Vec<u8>> {
        (0..3u8)
            .map(|round| payload(seed + round, 60 + usize::from(round) * 45))
            .collect()
    };
    let received_on = |recorder: &Recorder, n_ai: NAi| -> Vec<Vec<u8>> {
        recorder
            .indications()
            .into_iter()
            .filter(|(id, _, _)| *id == n_ai)
            .map(|(_, message, _)| message)
            .collect()
    };
    assert_eq!(received_on(ecu.1.as_ref(), NAi::physical(ECU, TESTER_A)), sent(0x00));
    assert_eq!(received_on(ecu.1.as_ref(), NAi::physical(ECU, TESTER_B)), sent(0x40));
    assert_eq!(received_on(gateway.1.as_ref(), NAi::physical(GATEWAY, ECU)), sent(0x80));

    for (node, _) in &nodes {
        assert_eq!(node.active_count().unwrap(), 0);
        assert_eq!(node.pending_count().unwrap(), 0);
        assert_eq!(
            node.available_memory(),
            korri_docan::protocol::service::DEFAULT_MEMORY_BUDGET as i64
        );
    }
}

#[tokio::test]
/// `drive` runs ticks and acknowledgement polls on its own; notifications
/// come out of an embassy channel.
async fn test_async_driver_with_channel_listener() {
    let bus = SimBus::new();
    let channel: Channel<CriticalSectionRawMutex, TransportEvent, 8> = Channel::new();
    let config = |address| {
        fast_config(address)
            .with_run_period(embassy_time::Duration::from_millis(1))
            .with_ack_period(embassy_time::Duration::from_millis(1))
    };
    let tester = DoCanService::new(bus.node(), ChannelListener::new(&channel), config(TESTER_A)).unwrap();
    let (ecu, ecu_events) = attach(&bus, config(ECU));

    let message = payload(0x10, 100);
    tester
        .request(ECU, TargetAddressType::Physical, &message, Mtype::Diagnostics)
        .unwrap();

    let confirm = timeout(Duration::from_secs(10), async {
        tokio::select! {
            _ = tester.drive() => unreachable!(),
            _ = ecu.drive() => unreachable!(),
            event = channel.receive() => event,
        }
    })
    .await
    .expect("driver did not deliver the confirmation");

    assert_eq!(
        confirm,
        TransportEvent::Confirm {
            n_ai: NAi::physical(ECU, TESTER_A),
            result: Ok(()),
            mtype: Mtype::Diagnostics,
        }
    );
    // The receiving side finishes on its next tick at the latest.
    let finished = timeout(Duration::from_secs(2), async {
        tokio::select! {
            _ = ecu.drive() => unreachable!(),
            _ = wait_for(&ecu_events, |r| !r.indications().is_empty()) => {}
        }
    })
    .await;
    assert!(finished.is_ok());
    assert_eq!(ecu_events.first_frames(), vec![(NAi::physical(ECU, TESTER_A), 100)]);
    assert_eq!(ecu_events.indications()[0].1, message);
}
