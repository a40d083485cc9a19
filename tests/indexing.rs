use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_primitives::{Address, B256, Bytes, TxKind, U256, address, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use mockall::{Sequence, mock, predicate::eq};
use tokio::sync::watch;

use protocol_user_indexer::indexer::rpc::{ChainClient, check_range};
use protocol_user_indexer::indexer::{DefinitionOutcome, RunReport, SchedulerConfig, run_indexers};
use protocol_user_indexer::models::chain::{Block, Log, Transaction, TransactionEnvelope};
use protocol_user_indexer::models::definitions::{DefinitionId, DefinitionKind, DefinitionRecord};
use protocol_user_indexer::models::errors::{
    ClientError, ConfigError, ErrorClass, ScanError, StoreError, WindowError,
};
use protocol_user_indexer::storage::memory::MemoryStore;
use protocol_user_indexer::storage::sqlite::SqliteStore;
use protocol_user_indexer::storage::{Protocol, Store};

//////// Test chain ////////
const CHAIN_ID: u64 = 1;
const ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
const TOKEN: Address = address!("c5bDdf9843308380375a611c18B50Fb9341f502A");
const RECIPIENT: Address = address!("3333333333333333333333333333333333333333");

const ERC20_ABI: &str = r#"[
    {"anonymous":false,"inputs":[
        {"indexed":true,"name":"from","type":"address"},
        {"indexed":true,"name":"to","type":"address"},
        {"indexed":false,"name":"value","type":"uint256"}],
     "name":"Transfer","type":"event"},
    {"anonymous":false,"inputs":[
        {"indexed":true,"name":"owner","type":"address"},
        {"indexed":false,"name":"value","type":"uint256"}],
     "name":"Mint","type":"event"}
]"#;

fn tx_spec(to: Address) -> String {
    format!(r#"{{"condition":{{"tx":{{"to":"{to}"}}}},"user":{{"tx":"from"}}}}"#)
}

fn event_spec(contract: Address, abi: &str, event: &str, arg: &str) -> String {
    serde_json::json!({
        "condition": {
            "contract": {"address": contract.to_string(), "abi": abi},
            "event": {"name": event}
        },
        "user": {"event": {"arg": arg}}
    })
    .to_string()
}

/// In-memory chain that records every range it is asked for.
#[derive(Default)]
struct FakeChain {
    head: u64,
    blocks: BTreeMap<u64, Vec<Transaction>>,
    logs: Vec<Log>,
    fail_blocks_from: Option<u64>,
    panic_blocks_from: Option<u64>,
    calls: Mutex<Vec<(&'static str, u64, u64)>>,
}

impl FakeChain {
    fn new(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    fn calls(&self, method: &str) -> Vec<(u64, u64)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| *name == method)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_head(&self) -> Result<u64, ClientError> {
        Ok(self.head)
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(CHAIN_ID)
    }

    async fn blocks_by_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError> {
        check_range(from, to)?;
        self.calls.lock().unwrap().push(("blocks", from, to));
        if self.fail_blocks_from == Some(from) {
            return Err(ClientError::Unavailable("connection refused".into()));
        }
        if self.panic_blocks_from == Some(from) {
            panic!("node sent an impossible block at {from}");
        }

        Ok((from..=to)
            .map(|number| Block {
                number,
                base_fee: Some(7),
                transactions: self.blocks.get(&number).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn logs_by_range(
        &self,
        from: u64,
        to: u64,
        address: Address,
    ) -> Result<Vec<Log>, ClientError> {
        check_range(from, to)?;
        self.calls.lock().unwrap().push(("logs", from, to));
        Ok(self
            .logs
            .iter()
            .filter(|log| log.address == address && (from..=to).contains(&log.block_number))
            .cloned()
            .collect())
    }
}

fn signed_call(signer: &PrivateKeySigner, to: Address, nonce: u64) -> Transaction {
    let tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit: 120_000,
        max_fee_per_gas: 40_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(to),
        ..Default::default()
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    Transaction::from_envelope(TxEnvelope::from(tx.into_signed(signature)), Address::ZERO)
}

fn legacy_call(signer: &PrivateKeySigner, to: Address) -> Transaction {
    let tx = TxLegacy {
        chain_id: Some(CHAIN_ID),
        nonce: 0,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(to),
        ..Default::default()
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    Transaction::from_envelope(TxEnvelope::from(tx.into_signed(signature)), Address::ZERO)
}

fn transfer_log(from: Address, to: Address, value: u64, block_number: u64) -> Log {
    Log {
        address: TOKEN,
        topics: vec![
            keccak256("Transfer(address,address,uint256)"),
            from.into_word(),
            to.into_word(),
        ],
        data: Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
        block_number,
    }
}

fn scheduler(batch_size: u64) -> SchedulerConfig {
    SchedulerConfig {
        batch_size,
        max_concurrent_definitions: 4,
    }
}

async fn run(chain: &Arc<FakeChain>, store: Arc<dyn Store>, batch_size: u64) -> RunReport {
    // The sender is dropped right away, so no run is ever cancelled
    let (_, shutdown) = watch::channel(false);
    run_indexers(chain.clone(), store, scheduler(batch_size), shutdown, None)
        .await
        .unwrap()
}

fn completed_checkpoint(report: &RunReport, definition_id: DefinitionId) -> u64 {
    match report.outcome(definition_id) {
        Some(DefinitionOutcome::Completed(outcome)) => outcome.checkpoint,
        other => panic!("definition {definition_id} did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn test_transaction_definition_end_to_end() {
    let alice = PrivateKeySigner::random();
    let bob = PrivateKeySigner::random();

    let mut chain = FakeChain::new(115);
    chain.blocks.insert(
        103,
        vec![
            signed_call(&alice, ROUTER, 0),
            signed_call(&bob, TOKEN, 0),
            legacy_call(&bob, ROUTER),
        ],
    );
    chain.blocks.insert(108, vec![signed_call(&alice, ROUTER, 1)]);
    // Beyond the last full window, left for the next run
    chain.blocks.insert(112, vec![signed_call(&bob, ROUTER, 2)]);
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let uniswap = store.insert_protocol("Uniswap").await;
    let id = store
        .insert_definition(Some(uniswap), DefinitionKind::Transaction, 100, &tx_spec(ROUTER))
        .await;

    let report = run(&chain, store.clone(), 10).await;

    assert!(!report.has_failures());
    assert_eq!(report.chain.head, 115);
    assert_eq!(chain.calls("blocks"), vec![(101, 110)]);
    assert_eq!(completed_checkpoint(&report, id), 110);
    assert_eq!(store.checkpoint(id).await, Some(110));
    assert_eq!(store.users(id).await, vec![alice.address(), bob.address()]);

    let found = store
        .protocols_by_address(&alice.address().to_string().to_lowercase())
        .await
        .unwrap();
    assert_eq!(
        found,
        vec![Protocol {
            id: uniswap,
            name: "Uniswap".to_string()
        }]
    );
}

#[tokio::test]
async fn test_event_definition_end_to_end() {
    let sender_a = address!("1111111111111111111111111111111111111111");
    let sender_b = address!("2222222222222222222222222222222222222222");

    let mut chain = FakeChain::new(40);
    chain.logs = vec![
        transfer_log(sender_a, RECIPIENT, 5, 3),
        transfer_log(sender_b, RECIPIENT, 9, 12),
        transfer_log(sender_a, RECIPIENT, 1, 19),
        transfer_log(sender_b, RECIPIENT, 1, 35),
    ];
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_definition(
            None,
            DefinitionKind::Event,
            0,
            &event_spec(TOKEN, ERC20_ABI, "Transfer", "from"),
        )
        .await;

    let report = run(&chain, store.clone(), 10).await;

    assert_eq!(chain.calls("logs"), vec![(1, 10), (11, 20), (21, 30), (31, 40)]);
    assert_eq!(completed_checkpoint(&report, id), 40);
    assert_eq!(store.users(id).await, vec![sender_a, sender_b]);
    assert_eq!(store.checkpoint_history(id).await, vec![10, 20, 30, 40]);
}

#[tokio::test]
async fn test_rerun_without_new_blocks_changes_nothing() {
    let alice = PrivateKeySigner::random();
    let mut chain = FakeChain::new(30);
    chain.blocks.insert(5, vec![signed_call(&alice, ROUTER, 0)]);
    let chain = Arc::new(chain);

    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("indexer.db")).unwrap();
    let protocol = store.insert_protocol("Uniswap").await.unwrap();
    let id = store
        .insert_definition(Some(protocol), DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await
        .unwrap();
    let shared: Arc<dyn Store> = Arc::new(store.clone());

    let first = run(&chain, shared.clone(), 10).await;
    assert_eq!(completed_checkpoint(&first, id), 30);
    let users = store.users(id).await.unwrap();
    assert_eq!(users, vec![alice.address().to_checksum(None)]);

    let second = run(&chain, shared, 10).await;
    match second.outcome(id) {
        Some(DefinitionOutcome::Completed(outcome)) => {
            assert_eq!(outcome.windows, 0);
            assert_eq!(outcome.checkpoint, 30);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(store.checkpoint(id).await.unwrap(), 30);
    assert_eq!(store.users(id).await.unwrap(), users);
    // No range was fetched a second time
    assert_eq!(chain.calls("blocks").len(), 3);
}

#[tokio::test]
async fn test_config_errors_skip_only_their_definition() {
    let alice = PrivateKeySigner::random();
    let mut chain = FakeChain::new(20);
    chain.blocks.insert(4, vec![signed_call(&alice, ROUTER, 0)]);
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let healthy = store
        .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await;
    let bad_abi = store
        .insert_definition(
            None,
            DefinitionKind::Event,
            0,
            &event_spec(TOKEN, "not an abi", "Transfer", "from"),
        )
        .await;
    let unknown_arg = store
        .insert_definition(
            None,
            DefinitionKind::Event,
            0,
            &event_spec(TOKEN, ERC20_ABI, "Transfer", "spender"),
        )
        .await;
    let bad_json = store
        .insert_definition(None, DefinitionKind::Transaction, 0, "{\"condition\":")
        .await;

    let report = run(&chain, store.clone(), 10).await;

    assert!(!report.has_failures());
    assert_eq!(completed_checkpoint(&report, healthy), 20);
    assert_eq!(store.users(healthy).await, vec![alice.address()]);

    assert!(matches!(
        report.outcome(bad_abi),
        Some(DefinitionOutcome::Skipped {
            reason: ConfigError::InvalidAbi(_)
        })
    ));
    assert!(matches!(
        report.outcome(unknown_arg),
        Some(DefinitionOutcome::Skipped {
            reason: ConfigError::UnknownArgument { .. }
        })
    ));
    assert!(matches!(
        report.outcome(bad_json),
        Some(DefinitionOutcome::Skipped {
            reason: ConfigError::InvalidSpec(_)
        })
    ));
    assert_eq!(store.checkpoint(bad_abi).await, Some(0));
    // Skipped definitions never reach the chain
    assert!(chain.calls("logs").is_empty());
}

#[tokio::test]
async fn test_decode_failure_is_fatal_for_one_definition() {
    let alice = PrivateKeySigner::random();
    let mut chain = FakeChain::new(20);
    chain.blocks.insert(2, vec![signed_call(&alice, ROUTER, 0)]);
    // A Mint log whose data is too short to hold the uint256
    chain.logs = vec![Log {
        address: TOKEN,
        topics: vec![keccak256("Mint(address,uint256)"), RECIPIENT.into_word()],
        data: Bytes::from(vec![0u8; 7]),
        block_number: 14,
    }];
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let tx_id = store
        .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await;
    let event_id = store
        .insert_definition(
            None,
            DefinitionKind::Event,
            0,
            &event_spec(TOKEN, ERC20_ABI, "Mint", "owner"),
        )
        .await;

    let report = run(&chain, store.clone(), 10).await;

    assert!(report.has_failures());
    assert_eq!(completed_checkpoint(&report, tx_id), 20);
    match report.outcome(event_id) {
        Some(DefinitionOutcome::Failed { error }) => {
            assert_eq!(error.class(), ErrorClass::Decode);
            assert!(matches!(
                error,
                ScanError::Decode {
                    from: 11,
                    to: 20,
                    source: WindowError::Decode(_),
                    ..
                }
            ));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // The first window committed, the broken one did not
    assert_eq!(store.checkpoint(event_id).await, Some(10));
}

#[tokio::test]
async fn test_transient_failure_resumes_from_checkpoint() {
    let alice = PrivateKeySigner::random();
    let mut chain = FakeChain::new(30);
    chain.blocks.insert(25, vec![signed_call(&alice, ROUTER, 0)]);
    chain.fail_blocks_from = Some(11);
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await;

    let report = run(&chain, store.clone(), 10).await;
    let error = report.failed().next().unwrap();
    assert_eq!(error.class(), ErrorClass::Transient);
    assert!(error.to_string().contains("[11, 20]"));
    assert_eq!(store.checkpoint(id).await, Some(10));

    // Same chain, without the outage
    let mut healed = FakeChain::new(30);
    healed.blocks = chain.blocks.clone();
    let healed = Arc::new(healed);
    let report = run(&healed, store.clone(), 10).await;

    assert_eq!(healed.calls("blocks"), vec![(11, 20), (21, 30)]);
    assert_eq!(completed_checkpoint(&report, id), 30);
    assert_eq!(store.users(id).await, vec![alice.address()]);
}

#[tokio::test]
async fn test_zksync_unknown_envelopes_use_reported_sender() {
    struct ZkChain(FakeChain);

    #[async_trait]
    impl ChainClient for ZkChain {
        async fn chain_head(&self) -> Result<u64, ClientError> {
            self.0.chain_head().await
        }

        async fn chain_id(&self) -> Result<u64, ClientError> {
            Ok(324)
        }

        async fn blocks_by_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError> {
            self.0.blocks_by_range(from, to).await
        }

        async fn logs_by_range(
            &self,
            from: u64,
            to: u64,
            address: Address,
        ) -> Result<Vec<Log>, ClientError> {
            self.0.logs_by_range(from, to, address).await
        }
    }

    let reported = address!("4444444444444444444444444444444444444444");
    let mut chain = FakeChain::new(10);
    chain.blocks.insert(
        6,
        vec![Transaction {
            envelope: TransactionEnvelope::Unknown {
                tx_type: 0x71,
                hash: B256::repeat_byte(0x71),
            },
            to: Some(ROUTER),
            reported_sender: reported,
        }],
    );

    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await;

    let (_, shutdown) = watch::channel(false);
    let report = run_indexers(
        Arc::new(ZkChain(chain)),
        store.clone(),
        scheduler(10),
        shutdown,
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.chain.chain_id, 324);
    assert_eq!(completed_checkpoint(&report, id), 10);
    assert_eq!(store.users(id).await, vec![reported]);
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing() {
    let chain = Arc::new(FakeChain::new(50));
    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let report = run_indexers(chain.clone(), store.clone(), scheduler(10), shutdown_rx, None)
        .await
        .unwrap();
    drop(shutdown_tx);

    assert!(!report.has_failures());
    assert!(matches!(
        report.outcome(id),
        Some(DefinitionOutcome::Failed {
            error: ScanError::Cancelled { from: 1, to: 10, .. }
        })
    ));
    assert!(chain.calls("blocks").is_empty());
    assert_eq!(store.checkpoint(id).await, Some(0));
}

#[tokio::test]
async fn test_panicking_worker_is_reported_against_its_definition() {
    let mut chain = FakeChain::new(215);
    chain.panic_blocks_from = Some(201);
    let chain = Arc::new(chain);

    let store = Arc::new(MemoryStore::new());
    let healthy = store
        .insert_definition(None, DefinitionKind::Transaction, 105, &tx_spec(ROUTER))
        .await;
    let doomed = store
        .insert_definition(None, DefinitionKind::Transaction, 200, &tx_spec(ROUTER))
        .await;

    let report = run(&chain, store.clone(), 10).await;

    assert!(report.has_failures());
    assert_eq!(completed_checkpoint(&report, healthy), 215);
    match report.outcome(doomed) {
        Some(DefinitionOutcome::Failed {
            error: error @ ScanError::Aborted { definition_id, .. },
        }) => {
            assert_eq!(*definition_id, doomed);
            assert_eq!(error.class(), ErrorClass::Transient);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(store.checkpoint(doomed).await, Some(200));
}

/// Chain whose block fetches take a while, tracking how many overlap.
#[derive(Default)]
struct PacedChain {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ChainClient for PacedChain {
    async fn chain_head(&self) -> Result<u64, ClientError> {
        Ok(30)
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(CHAIN_ID)
    }

    async fn blocks_by_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError> {
        check_range(from, to)?;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok((from..=to)
            .map(|number| Block {
                number,
                base_fee: None,
                transactions: Vec::new(),
            })
            .collect())
    }

    async fn logs_by_range(
        &self,
        from: u64,
        to: u64,
        _address: Address,
    ) -> Result<Vec<Log>, ClientError> {
        check_range(from, to)?;
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bounds_concurrent_definitions() {
    let chain = Arc::new(PacedChain::default());
    let store = Arc::new(MemoryStore::new());
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            store
                .insert_definition(None, DefinitionKind::Transaction, 0, &tx_spec(ROUTER))
                .await,
        );
    }

    let (_, shutdown) = watch::channel(false);
    let config = SchedulerConfig {
        batch_size: 10,
        max_concurrent_definitions: 2,
    };
    let report = run_indexers(chain.clone(), store.clone(), config, shutdown, None)
        .await
        .unwrap();

    assert_eq!(chain.peak.load(Ordering::SeqCst), 2);
    assert_eq!(report.completed().count(), 4);
    for id in ids {
        assert_eq!(completed_checkpoint(&report, id), 30);
        assert_eq!(store.checkpoint(id).await, Some(30));
    }
}

//////// Scripted store ////////
mock! {
    pub ScriptedStore {}

    #[async_trait]
    impl Store for ScriptedStore {
        async fn list_definitions(&self, kind: DefinitionKind) -> Result<Vec<DefinitionRecord>, StoreError>;
        async fn put_users(&self, definition_id: DefinitionId, addresses: &[Address]) -> Result<(), StoreError>;
        async fn advance_checkpoint(&self, definition_id: DefinitionId, checkpoint: u64) -> Result<(), StoreError>;
        async fn list_protocols(&self) -> Result<Vec<Protocol>, StoreError>;
        async fn protocols_by_address(&self, address: &str) -> Result<Vec<Protocol>, StoreError>;
    }
}

#[tokio::test]
async fn test_interrupted_checkpoint_replays_window() {
    let alice = PrivateKeySigner::random();
    let bob = PrivateKeySigner::random();
    let mut chain = FakeChain::new(115);
    chain.blocks.insert(
        104,
        vec![signed_call(&alice, ROUTER, 0), signed_call(&bob, ROUTER, 0)],
    );
    let chain = Arc::new(chain);
    let expected_users = vec![alice.address(), bob.address()];

    // First run: users are written, then the checkpoint write is lost
    let mut interrupted = MockScriptedStore::new();
    let mut seq = Sequence::new();
    interrupted
        .expect_list_definitions()
        .with(eq(DefinitionKind::Transaction))
        .returning(|_| {
            Ok(vec![DefinitionRecord {
                id: 1,
                kind: DefinitionKind::Transaction,
                checkpoint: 100,
                spec: tx_spec(ROUTER),
            }])
        });
    interrupted
        .expect_list_definitions()
        .with(eq(DefinitionKind::Event))
        .returning(|_| Ok(Vec::new()));
    let users = expected_users.clone();
    interrupted
        .expect_put_users()
        .withf(move |id, addresses| *id == 1 && addresses.to_vec() == users)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    interrupted
        .expect_advance_checkpoint()
        .with(eq(1), eq(110))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(StoreError::Unavailable("process killed".into())));

    let report = run(&chain, Arc::new(interrupted), 10).await;
    assert!(report.has_failures());
    assert_eq!(chain.calls("blocks"), vec![(101, 110)]);

    // Replay from the old checkpoint against a store that already holds the users
    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_definition(None, DefinitionKind::Transaction, 100, &tx_spec(ROUTER))
        .await;
    store.put_users(id, &expected_users).await.unwrap();

    let report = run(&chain, store.clone(), 10).await;
    assert_eq!(completed_checkpoint(&report, id), 110);
    assert_eq!(store.users(id).await, expected_users);
    assert_eq!(store.checkpoint_history(id).await, vec![110]);
}

#[tokio::test]
async fn test_duplicate_definition_ids_run_once() {
    let chain = Arc::new(FakeChain::new(10));
    let record = DefinitionRecord {
        id: 7,
        kind: DefinitionKind::Transaction,
        checkpoint: 0,
        spec: tx_spec(ROUTER),
    };

    let mut store = MockScriptedStore::new();
    let listed = record.clone();
    store
        .expect_list_definitions()
        .with(eq(DefinitionKind::Transaction))
        .returning(move |_| Ok(vec![listed.clone(), listed.clone()]));
    store
        .expect_list_definitions()
        .with(eq(DefinitionKind::Event))
        .returning(|_| Ok(Vec::new()));
    store
        .expect_put_users()
        .withf(|id, addresses| *id == 7 && addresses.is_empty())
        .times(1)
        .returning(|_, _| Ok(()));
    store
        .expect_advance_checkpoint()
        .with(eq(7), eq(10))
        .times(1)
        .returning(|_, _| Ok(()));

    let report = run(&chain, Arc::new(store), 10).await;

    assert_eq!(report.definitions.len(), 1);
    assert_eq!(completed_checkpoint(&report, 7), 10);
    assert_eq!(chain.calls("blocks"), vec![(1, 10)]);
}
