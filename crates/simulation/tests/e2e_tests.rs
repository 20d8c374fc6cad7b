//! End-to-end scenarios on the deterministic simulation.
//!
//! Everything runs single-threaded against simulated time: the same
//! scenario and seed always produce the same blocks, roots and proofs.

use byzcoin_core::TxStatus;
use byzcoin_darc::Darc;
use byzcoin_simulation::{SimConfig, SimulationRunner};
use byzcoin_types::{
    Argument, ClientTransaction, Instruction, InstanceId, Signer,
};
use std::time::Duration;

fn spawn_value_tx(darc: &Darc, signer: &Signer, counter: u64, value: Vec<u8>) -> ClientTransaction {
    let mut instruction = Instruction::spawn(
        InstanceId(darc.base_id().0),
        "value",
        vec![Argument::new("value", value)],
    );
    instruction.sign_with(&[(signer, counter)]);
    ClientTransaction::new(vec![instruction])
}

/// Genesis plus a single spawn: the value is provable on every node within
/// four block intervals.
#[test]
fn genesis_and_single_spawn() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let tx = spawn_value_tx(&darc, &signer, 1, vec![5, 6, 7, 8]);
    let new_id = tx.instructions[0].derive_id("");
    let tx_hash = sim.submit(0, tx);

    sim.run_for(4 * interval);

    // Included and accepted.
    match sim.status(&tx_hash) {
        Some(TxStatus::Included { accepted: true, .. }) => {}
        other => panic!("expected inclusion, got {:?}", other),
    }

    // The proof matches the submitted value and verifies end to end.
    let genesis_id = sim.genesis().hash();
    let roster = sim.config().roster.clone();
    for node in 0..4 {
        let proof = sim.proof(node, &new_id);
        assert!(proof.path.matches(&new_id), "node {} missing the leaf", node);
        let instance = proof
            .verify(genesis_id, &roster, &new_id)
            .expect("proof verifies")
            .expect("inclusion");
        assert_eq!(instance.value, vec![5, 6, 7, 8]);
    }
}

/// Determinism property: every honest node computes the same trie root
/// after each block, and a rerun of the same scenario reproduces it.
#[test]
fn all_nodes_agree_on_roots() {
    let run = |_: ()| {
        let mut sim = SimulationRunner::new(SimConfig::default());
        let interval = sim.config().block_interval();
        let signer = sim.signer().clone();
        let darc = sim.darc().clone();
        for counter in 1..=5u64 {
            let tx = spawn_value_tx(&darc, &signer, counter, vec![counter as u8]);
            sim.submit(0, tx);
            sim.run_for(interval);
        }
        sim.run_for(4 * interval);

        let head = sim.head_index(0);
        assert!(head >= 1, "no blocks were produced");
        let root = sim.head_root(0);
        for node in 1..4 {
            assert_eq!(sim.head_index(node), head, "node {} behind", node);
            assert_eq!(sim.head_root(node), root, "node {} diverged", node);
        }
        root
    };
    assert_eq!(run(()), run(()), "identical runs must produce identical roots");
}

/// Stale counter: a second transaction reusing the same counter is
/// included for auditability but not accepted.
#[test]
fn stale_counter_rejected() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let first = spawn_value_tx(&darc, &signer, 1, vec![1]);
    let replay = spawn_value_tx(&darc, &signer, 1, vec![2]);
    let first_hash = sim.submit(0, first);
    sim.run_for(2 * interval);
    let replay_hash = sim.submit(0, replay);
    sim.run_for(2 * interval);

    assert!(matches!(
        sim.status(&first_hash),
        Some(TxStatus::Included { accepted: true, .. })
    ));
    assert!(matches!(
        sim.status(&replay_hash),
        Some(TxStatus::Included {
            accepted: false,
            ..
        })
    ));
}

/// Replay resistance: no two accepted transactions share a
/// `(signer, counter)` pair.
#[test]
fn no_duplicate_signer_counters_commit() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    // A mix of fresh and replayed counters, submitted to several nodes.
    for (node, counter) in [(0u32, 1u64), (1, 2), (2, 2), (3, 3), (0, 3)] {
        let tx = spawn_value_tx(&darc, &signer, counter, vec![node as u8, counter as u8]);
        sim.submit(node, tx);
        sim.run_for(interval);
    }
    sim.run_for(4 * interval);

    // Counters 1, 2, 3 should each have exactly one accepted transaction;
    // the replays at 2 and 3 must be rejected.
    let accepted: Vec<u64> = [(0u32, 1u64), (1, 2), (2, 2), (3, 3), (0, 3)]
        .iter()
        .filter_map(|&(node, counter)| {
            let tx = spawn_value_tx(&darc, &signer, counter, vec![node as u8, counter as u8]);
            match sim.status(&tx.hash()) {
                Some(TxStatus::Included { accepted: true, .. }) => Some(counter),
                _ => None,
            }
        })
        .collect();
    let unique: std::collections::HashSet<u64> = accepted.iter().copied().collect();
    assert_eq!(
        accepted.len(),
        unique.len(),
        "two accepted transactions share a counter"
    );
    assert_eq!(unique.len(), 3, "counters 1..=3 should each commit once");
}

/// Streaming: a subscriber on a follower receives every committed
/// block in order; closing the subscription stops delivery.
#[test]
fn streaming_subscriber_receives_blocks() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let subscription = sim.subscribe(1);

    for counter in 1..=3u64 {
        let tx = spawn_value_tx(&darc, &signer, counter, vec![counter as u8]);
        sim.submit(0, tx);
        sim.run_for(interval + Duration::from_millis(50));
    }
    sim.run_for(2 * interval);

    let received = sim.received_blocks(subscription).to_vec();
    assert_eq!(received.len(), 3, "expected one block per transaction");
    for (i, (header, body)) in received.iter().enumerate() {
        assert_eq!(header.index, i as u64 + 1);
        assert_eq!(body.tx_results.len(), 1);
        let instruction = &body.tx_results[0].tx.instructions[0];
        assert_eq!(instruction.action.contract_id(), "value");
    }

    // After closing, later blocks no longer arrive.
    sim.close_subscription(subscription);
    let tx = spawn_value_tx(&darc, &signer, 4, vec![4]);
    sim.submit(0, tx);
    sim.run_for(2 * interval);
    assert_eq!(sim.received_blocks(subscription).len(), 3);
}

/// Proof soundness: tampering with the path, the value or the
/// head signature makes verification fail.
#[test]
fn tampered_proofs_rejected() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let tx = spawn_value_tx(&darc, &signer, 1, vec![9, 9]);
    let new_id = tx.instructions[0].derive_id("");
    sim.submit(0, tx);
    sim.run_for(4 * interval);

    let genesis_id = sim.genesis().hash();
    let roster = sim.config().roster.clone();

    let proof = sim.proof(0, &new_id);
    assert!(proof.verify(genesis_id, &roster, &new_id).is_ok());

    // A different key cannot be proven with this path.
    let other = InstanceId([0xEE; 32]);
    assert!(matches!(
        proof.verify(genesis_id, &roster, &other),
        Err(_) | Ok(None)
    ));

    // Tampered trie root in the header breaks the header signature.
    let mut forged = proof.clone();
    forged.latest.trie_root = byzcoin_types::Hash::of(b"forged root");
    assert!(forged.verify(genesis_id, &roster, &new_id).is_err());

    // A truncated link chain no longer reaches the head.
    let mut cut = proof.clone();
    if cut.links.len() > 1 {
        cut.links.pop();
        assert!(cut.verify(genesis_id, &roster, &new_id).is_err());
    }

    // A wrong genesis is rejected outright.
    assert!(proof
        .verify(byzcoin_types::Hash::of(b"bogus genesis"), &roster, &new_id)
        .is_err());
}
