//! Leader-failure scenarios.

use byzcoin_core::TxStatus;
use byzcoin_darc::Darc;
use byzcoin_simulation::{SimConfig, SimulationRunner};
use byzcoin_types::{Argument, ClientTransaction, Instruction, InstanceId, Signer};
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

/// Kill the leader of a 4-node roster: the next member takes over via
/// a certified view change, a transaction submitted to a follower still
/// commits everywhere, and the restarted node catches up and serves the
/// same proof.
#[test]
fn leader_failure_and_recovery() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    // Anchor a first block so the chain is past genesis.
    let tx0 = spawn_value_tx(&darc, &signer, 1, vec![0]);
    sim.submit(0, tx0);
    sim.run_for(2 * interval);
    assert_eq!(sim.head_index(0), 1);

    sim.kill(0);

    // Heartbeat timeout (2 s floor) plus the first rotation window must
    // suffice for the view-1 certificate and its view-change block.
    sim.run_for(Duration::from_secs(6));
    for node in 1..4 {
        assert_eq!(sim.leader_of(node), 1, "node {} did not adopt leader 1", node);
        assert!(
            sim.head_index(node) >= 2,
            "node {} has no view-change block",
            node
        );
    }

    // Submit through a follower of the new leader.
    let tx1 = spawn_value_tx(&darc, &signer, 2, vec![5, 6, 7, 8]);
    let new_id = tx1.instructions[0].derive_id("");
    let tx_hash = sim.submit(2, tx1);
    sim.run_for(4 * interval);

    assert!(matches!(
        sim.status(&tx_hash),
        Some(TxStatus::Included { accepted: true, .. })
    ));
    let genesis_id = sim.genesis().hash();
    let roster = sim.config().roster.clone();
    for node in 1..4 {
        let proof = sim.proof(node, &new_id);
        let instance = proof
            .verify(genesis_id, &roster, &new_id)
            .expect("proof verifies")
            .expect("inclusion");
        assert_eq!(instance.value, vec![5, 6, 7, 8]);
    }

    // The failed node comes back, catches up through forward links and
    // serves the same proof.
    sim.restart(0);
    sim.run_for(2 * interval);
    assert_eq!(sim.head_index(0), sim.head_index(1));
    assert_eq!(sim.head_root(0), sim.head_root(1));
    let proof = sim.proof(0, &new_id);
    let instance = proof
        .verify(genesis_id, &roster, &new_id)
        .expect("proof verifies")
        .expect("inclusion");
    assert_eq!(instance.value, vec![5, 6, 7, 8]);

    // The chain keeps making progress with the recovered node as a
    // follower.
    let tx2 = spawn_value_tx(&darc, &signer, 3, vec![3]);
    let tx2_hash = sim.submit(0, tx2);
    sim.run_for(4 * interval);
    assert!(matches!(
        sim.status(&tx2_hash),
        Some(TxStatus::Included { accepted: true, .. })
    ));
}

/// Two consecutive leader failures: the back-off walks past the dead
/// candidates until a live one is certified.
#[test]
fn consecutive_leader_failures() {
    let mut sim = SimulationRunner::new(SimConfig {
        nodes: 7,
        ..SimConfig::default()
    });
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let tx0 = spawn_value_tx(&darc, &signer, 1, vec![0]);
    sim.submit(0, tx0);
    sim.run_for(2 * interval);

    // Kill leader 0 and its first successor.
    sim.kill(0);
    sim.kill(1);

    // With five of seven alive the threshold (5) is still reachable. The
    // attempt for leader 1 dies, the back-off then certifies leader 2:
    // heartbeat (2 s) + window (1.5 s) + doubled window (3 s) + slack.
    sim.run_for(Duration::from_secs(12));
    for node in 2..7 {
        assert_eq!(sim.leader_of(node), 2, "node {} wrong leader", node);
    }

    let tx1 = spawn_value_tx(&darc, &signer, 2, vec![1]);
    let tx_hash = sim.submit(3, tx1);
    sim.run_for(4 * interval);
    assert!(matches!(
        sim.status(&tx_hash),
        Some(TxStatus::Included { accepted: true, .. })
    ));
}

/// A view-change request referencing a superseded block is dropped
/// silently and does not disturb progress.
#[test]
fn stale_view_change_request_ignored() {
    let mut sim = SimulationRunner::new(SimConfig::default());
    let interval = sim.config().block_interval();
    let signer = sim.signer().clone();
    let darc = sim.darc().clone();

    let tx0 = spawn_value_tx(&darc, &signer, 1, vec![0]);
    sim.submit(0, tx0);
    sim.run_for(2 * interval);

    // Hand-craft a request anchored at genesis, which every node has
    // already superseded.
    let stale_view = byzcoin_types::View {
        chain_id: sim.chain_id(),
        block_id: sim.genesis().hash(),
        leader_index: 3,
    };
    let request =
        byzcoin_types::ViewChangeRequest::new(stale_view, 3, &sim.server_keys()[3].clone());
    sim.inject_view_change_request(1, request);
    sim.run_for(2 * interval);

    // Leadership unchanged, chain still alive.
    for node in 0..4 {
        assert_eq!(sim.leader_of(node), 0);
    }
    let tx1 = spawn_value_tx(&darc, &signer, 2, vec![1]);
    let tx_hash = sim.submit(0, tx1);
    sim.run_for(4 * interval);
    assert!(matches!(
        sim.status(&tx_hash),
        Some(TxStatus::Included { accepted: true, .. })
    ));
}
