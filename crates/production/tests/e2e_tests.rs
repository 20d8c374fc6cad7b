//! End-to-end tests of the production runner on a single-node roster.
//!
//! A roster of one has a threshold of one, so the whole pipeline (buffer,
//! execution, signing, RocksDB persistence, streaming, proofs) runs
//! without a network transport.

use byzcoin_core::{OutboundMessage, TxStatus};
use byzcoin_production::{
    NodeRunner, RocksDbStore, RunnerConfig, StreamingMultiplexer, Transport,
};
use byzcoin_types::test_utils::{test_server_key, test_signer};
use byzcoin_types::{
    Argument, ChainId, ClientTransaction, Instruction, InstanceId, NodeIndex, Roster,
    ServerIdentity,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// No peers on a single-node roster; outbound messages go nowhere.
struct NullTransport;

impl Transport for NullTransport {
    fn broadcast(&self, _chain: ChainId, _from: NodeIndex, _message: OutboundMessage) {}
    fn send(&self, _chain: ChainId, _from: NodeIndex, _to: NodeIndex, _message: OutboundMessage) {}
}

fn temp_db_path(tag: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "byzcoin-test-{}-{}-{}",
        tag,
        std::process::id(),
        unique
    ))
}

struct TestNode {
    runner: Arc<NodeRunner>,
    _path: std::path::PathBuf,
}

fn start_node(tag: &str) -> TestNode {
    let path = temp_db_path(tag);
    let store = Arc::new(RocksDbStore::open(&path).expect("open rocksdb"));
    let runner = Arc::new(NodeRunner::new(
        store,
        Arc::new(NullTransport),
        Arc::new(StreamingMultiplexer::new()),
        RunnerConfig::default(),
    ));
    TestNode {
        runner,
        _path: path,
    }
}

fn single_roster() -> Roster {
    Roster::new(vec![ServerIdentity::new(
        test_server_key(1).public_key(),
        "tcp://127.0.0.1:7000".into(),
    )])
}

#[tokio::test(flavor = "multi_thread")]
async fn single_node_chain_commits_and_proves() {
    let node = start_node("commit");
    let signer = test_signer(1);
    let (genesis, darc, config) = byzcoin_node::build_genesis(
        single_roster(),
        Duration::from_millis(100),
        &signer.identity(),
        &["spawn:value"],
    )
    .expect("genesis");

    let chain_id = node
        .runner
        .create_chain(&genesis, &darc, config, 0, test_server_key(1))
        .expect("chain starts");

    // Spawn a value and wait for inclusion.
    let mut instruction = Instruction::spawn(
        InstanceId(darc.base_id().0),
        "value",
        vec![Argument::new("value", vec![5, 6, 7, 8])],
    );
    instruction.sign_with(&[(&signer, 1)]);
    let new_id = instruction.derive_id("");
    let tx = ClientTransaction::new(vec![instruction]);

    let status = node
        .runner
        .add_transaction(chain_id, tx, 10)
        .await
        .expect("inclusion within ten intervals");
    assert!(matches!(
        status,
        TxStatus::Included { accepted: true, .. }
    ));

    // The proof verifies from genesis.
    let proof = node
        .runner
        .get_proof(chain_id, new_id)
        .await
        .expect("proof built");
    let instance = proof
        .verify(genesis.hash(), &single_roster(), &new_id)
        .expect("proof verifies")
        .expect("inclusion");
    assert_eq!(instance.value, vec![5, 6, 7, 8]);

    let chain_status = node.runner.chain_status(chain_id).await.expect("status");
    assert!(chain_status.head_index >= 1);
    assert_eq!(chain_status.leader_index, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_delivers_committed_blocks() {
    let node = start_node("stream");
    let signer = test_signer(1);
    let (genesis, darc, config) = byzcoin_node::build_genesis(
        single_roster(),
        Duration::from_millis(100),
        &signer.identity(),
        &["spawn:value"],
    )
    .expect("genesis");
    let chain_id = node
        .runner
        .create_chain(&genesis, &darc, config, 0, test_server_key(1))
        .expect("chain starts");

    let mut stream = node.runner.streaming().subscribe(chain_id);

    let mut instruction = Instruction::spawn(
        InstanceId(darc.base_id().0),
        "value",
        vec![Argument::new("value", vec![1])],
    );
    instruction.sign_with(&[(&signer, 1)]);
    node.runner
        .add_transaction(chain_id, ClientTransaction::new(vec![instruction]), 10)
        .await
        .expect("inclusion");

    let (header, body) = tokio::time::timeout(Duration::from_secs(2), stream.recv())
        .await
        .expect("block within two seconds")
        .expect("stream open");
    assert_eq!(header.index, 1);
    assert_eq!(body.tx_results.len(), 1);
    assert!(body.tx_results[0].accepted);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_chain_is_reported() {
    let node = start_node("unknown");
    let bogus = ChainId(byzcoin_types::Hash::of(b"no such chain"));
    let err = node
        .runner
        .add_transaction(bogus, ClientTransaction::default(), 0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown chain"));
}
