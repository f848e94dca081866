//! End-to-end tests over a real temp-dir LMDB environment: record
//! admission and indexing, operator calls, trade pricing, and a full
//! voting-period resolution.

use std::cell::{Cell, RefCell};

use heed::EnvOpenOptions;
use tempfile::TempDir;

use marketmind::{
    interfaces::{
        BuilderError, CompactSignature, Signer, SignerError,
        TransactionBuilder,
    },
    serialize,
    state::{DecisionParams, MarketParams, TradeParams},
    types::{
        double_sha256, Branch, Decision, DecisionFunction, Hash256, KeyId,
        Market, MarketObject, ObjectId, PayoutKind, PayoutTransaction,
        RevealVote, SealedVote, Trade, Txid, VOTE_NA,
    },
    CancelToken, Error, State,
};

struct TestEnv {
    _dir: TempDir,
    env: heed::Env,
    state: State,
}

fn test_env() -> TestEnv {
    let dir = TempDir::new().expect("temp dir");
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(64 * 1024 * 1024)
            .max_dbs(State::NUM_DBS)
            .open(dir.path())
            .expect("lmdb env")
    };
    let mut wtxn = env.write_txn().expect("write txn");
    let state = State::new(&env, &mut wtxn).expect("state");
    wtxn.commit().expect("commit");
    TestEnv {
        _dir: dir,
        env,
        state,
    }
}

fn txid(n: u8) -> Txid {
    Hash256([n; 32])
}

/// Broadcast double that hands out deterministic txids and keeps every
/// payload for inspection.
#[derive(Default)]
struct MockBuilder {
    counter: Cell<u8>,
    payloads: RefCell<Vec<Vec<u8>>>,
}

impl TransactionBuilder for MockBuilder {
    fn broadcast_payload(
        &self,
        payload: &[u8],
    ) -> Result<Txid, BuilderError> {
        let n = self.counter.get() + 1;
        self.counter.set(n);
        self.payloads.borrow_mut().push(payload.to_vec());
        Ok(Hash256([n; 32]))
    }

    fn broadcast_payout(
        &self,
        _payout: &PayoutTransaction,
    ) -> Result<Txid, BuilderError> {
        Ok(Hash256([0xEE; 32]))
    }
}

struct MockSigner(KeyId);

impl Signer for MockSigner {
    fn key_id(&self) -> KeyId {
        self.0
    }

    fn sign(
        &self,
        _digest: &[u8; 32],
    ) -> Result<CompactSignature, SignerError> {
        Ok(CompactSignature([0; 64]))
    }
}

fn test_branch() -> Branch {
    Branch {
        name: "main".into(),
        description: "test branch".into(),
        base_listing_fee: 1_000_000,
        free_decisions: 10,
        target_decisions: 20,
        max_decisions: 50,
        min_trading_fee: 0,
        tau: 1000,
        ballot_time: 200,
        unseal_time: 200,
        consensus_threshold: 60_000_000,
        alpha: 10_000_000,
        tol: 2_000_000,
    }
}

fn test_decision(branch_id: ObjectId, prompt: &str) -> Decision {
    Decision {
        key_id: KeyId([0xD0; 20]),
        branch_id,
        prompt: prompt.into(),
        event_over_by: 500,
        is_scaled: false,
        min: 0,
        max: 100_000_000,
        answer_optionality: false,
    }
}

fn test_market(branch_id: ObjectId, decision_ids: Vec<ObjectId>) -> Market {
    let decision_functions =
        vec![DecisionFunction::X1; decision_ids.len()];
    Market {
        key_id: KeyId([0xA0; 20]),
        b: 100_000_000,
        trading_fee: 0,
        max_commission: 0,
        title: "test market".into(),
        description: String::new(),
        tags: "test".into(),
        maturation: 600,
        branch_id,
        decision_ids,
        decision_functions,
        tx_pow_hash_id: 0,
        tx_pow_difficulty: 0,
    }
}

/// Branch, one decision, one market committed; returns their ids.
fn seed_market(harness: &TestEnv) -> (ObjectId, ObjectId, ObjectId) {
    let branch = test_branch();
    let branch_id = branch.id();
    let decision = test_decision(branch_id, "will it rain");
    let decision_id = decision.id();
    let market = test_market(branch_id, vec![decision_id]);
    let market_id = market.id();

    let mut wtxn = harness.env.write_txn().unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Branch(branch), txid(1), 1)
        .unwrap();
    harness
        .state
        .connect_object(
            &mut wtxn,
            &MarketObject::Decision(decision),
            txid(2),
            2,
        )
        .unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Market(market), txid(3), 3)
        .unwrap();
    wtxn.commit().unwrap();
    (branch_id, decision_id, market_id)
}

#[test]
fn duplicate_record_is_rejected_and_store_keeps_one_copy() {
    let harness = test_env();
    let (branch_id, _, _) = seed_market(&harness);
    let decision = test_decision(branch_id, "duplicate me");

    let mut wtxn = harness.env.write_txn().unwrap();
    harness
        .state
        .connect_object(
            &mut wtxn,
            &MarketObject::Decision(decision.clone()),
            txid(10),
            4,
        )
        .unwrap();
    let err = harness
        .state
        .connect_object(
            &mut wtxn,
            &MarketObject::Decision(decision.clone()),
            txid(11),
            5,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate { id } if id == decision.id()));
    wtxn.commit().unwrap();

    let rtxn = harness.env.read_txn().unwrap();
    let decisions = harness
        .state
        .list_decisions(&rtxn, &branch_id, &CancelToken::new())
        .unwrap();
    let copies = decisions
        .iter()
        .filter(|(id, _)| *id == decision.id())
        .count();
    assert_eq!(copies, 1);
}

#[test]
fn unknown_references_are_rejected() {
    let harness = test_env();
    let decision = test_decision(double_sha256(b"no such branch"), "orphan");
    let mut wtxn = harness.env.write_txn().unwrap();
    let err = harness
        .state
        .connect_object(
            &mut wtxn,
            &MarketObject::Decision(decision),
            txid(1),
            1,
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "branch", .. }));
}

#[test]
fn undecodable_payload_is_dropped_silently() {
    let harness = test_env();
    let mut wtxn = harness.env.write_txn().unwrap();
    let admitted = harness
        .state
        .connect_payload(&mut wtxn, b"\xFFgarbage", txid(1), 1)
        .unwrap();
    assert!(admitted.is_none());
}

#[test]
fn reveal_without_seal_is_dropped_at_admission() {
    let harness = test_env();
    let (branch_id, decision_id, _) = seed_market(&harness);
    let reveal = RevealVote {
        branch_id,
        height: 1000,
        vote_id: double_sha256(b"never sealed"),
        decision_ids: vec![decision_id],
        decision_votes: vec![100_000_000],
        na: VOTE_NA,
        key_id: KeyId([0xB0; 20]),
    };
    let payload =
        serialize::encode_object(&MarketObject::RevealVote(reveal.clone()));
    let mut wtxn = harness.env.write_txn().unwrap();
    let admitted = harness
        .state
        .connect_payload(&mut wtxn, &payload, txid(9), 1000)
        .unwrap();
    assert!(admitted.is_none());
    wtxn.commit().unwrap();

    let rtxn = harness.env.read_txn().unwrap();
    let stored = harness
        .state
        .market_tree()
        .try_get_reveal_vote(&rtxn, &reveal.id())
        .unwrap();
    assert!(stored.is_none());
}

#[test]
fn trades_scan_in_increasing_id_order() {
    let harness = test_env();
    let (_, _, market_id) = seed_market(&harness);

    let mut wtxn = harness.env.write_txn().unwrap();
    for nonce in 0..5u32 {
        let trade = Trade {
            key_id: KeyId([0xB0; 20]),
            market_id,
            is_buy: true,
            n_shares: 10_000_000,
            price: 100_000_000,
            decision_state: 0,
            nonce,
        };
        harness
            .state
            .connect_object(
                &mut wtxn,
                &MarketObject::Trade(trade),
                txid(20 + nonce as u8),
                4,
            )
            .unwrap();
    }
    wtxn.commit().unwrap();

    let rtxn = harness.env.read_txn().unwrap();
    let trades = harness
        .state
        .list_trades(&rtxn, &market_id, &CancelToken::new())
        .unwrap();
    assert_eq!(trades.len(), 5);
    for pair in trades.windows(2) {
        assert!(pair[0].0 < pair[1].0, "scan must be strictly ordered");
    }
}

#[test]
fn cancelled_scan_surfaces_cancellation() {
    let harness = test_env();
    let (_, _, market_id) = seed_market(&harness);
    let rtxn = harness.env.read_txn().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = harness
        .state
        .list_trades(&rtxn, &market_id, &cancel)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn quotes_match_the_cost_function_and_underpriced_buys_are_rejected() {
    let harness = test_env();
    let (_, _, market_id) = seed_market(&harness);
    let rtxn = harness.env.read_txn().unwrap();
    let cancel = CancelToken::new();

    // One whole share of state 0 on a fresh 2-state market with B = 1:
    // ln(1 + e) - ln 2 coins.
    let expected = (1.0 + 1f64.exp()).ln() - 2f64.ln();
    let quote = harness
        .state
        .trade_quote(&rtxn, &market_id, true, 100_000_000, 0, &cancel)
        .unwrap();
    assert!((quote.price_per_share - expected).abs() < 1e-12);

    let required = harness
        .state
        .trade_capital_required(
            &rtxn,
            &market_id,
            true,
            100_000_000,
            0,
            &cancel,
        )
        .unwrap();
    assert_eq!(required, 62_011_451);

    // Authoring capital for two states: B ln 2.
    let capital = harness
        .state
        .market_capital_required(&rtxn, &market_id)
        .unwrap();
    assert_eq!(capital, 69_314_719);

    // An underpriced buy is refused with the minimum acceptable price.
    let trade = Trade {
        key_id: KeyId([0xB0; 20]),
        market_id,
        is_buy: true,
        n_shares: 100_000_000,
        price: 1000,
        decision_state: 0,
        nonce: 0,
    };
    let mut wtxn = harness.env.write_txn().unwrap();
    let err = harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Trade(trade), txid(30), 4)
        .unwrap_err();
    match err {
        Error::PriceRejected { declared, minimum } => {
            assert_eq!(declared, 1000);
            assert_eq!(minimum, 62_011_451);
        }
        other => panic!("expected PriceRejected, got {other}"),
    }
}

#[test]
fn operator_calls_broadcast_canonical_payloads() {
    let harness = test_env();
    let (branch_id, decision_id, market_id) = seed_market(&harness);
    let builder = MockBuilder::default();
    let signer = MockSigner(KeyId([0xC0; 20]));
    let rtxn = harness.env.read_txn().unwrap();

    let created = harness
        .state
        .create_decision(
            &rtxn,
            &builder,
            &signer,
            DecisionParams {
                branch_id,
                prompt: "another question".into(),
                event_over_by: 400,
                answer_optionality: false,
                is_scaled: true,
                min: 0,
                max: 10_000_000_000,
            },
        )
        .unwrap();
    // The broadcast payload decodes back to the record it names.
    let payloads = builder.payloads.borrow();
    let decoded = serialize::decode_object(payloads.last().unwrap()).unwrap();
    assert_eq!(decoded.id(), created.id);
    drop(payloads);

    let created = harness
        .state
        .create_market(
            &rtxn,
            &builder,
            &signer,
            MarketParams {
                decision_specs: vec![format!("{decision_id}:X1")],
                b: 200_000_000,
                trading_fee: 0,
                max_commission: 0,
                title: "operator market".into(),
                description: String::new(),
                tags: String::new(),
                maturation: 700,
                tx_pow_hash_id: 0,
                tx_pow_difficulty: 0,
            },
        )
        .unwrap();
    let payloads = builder.payloads.borrow();
    match serialize::decode_object(payloads.last().unwrap()).unwrap() {
        MarketObject::Market(market) => {
            assert_eq!(market.branch_id, branch_id);
            assert_eq!(market.decision_ids, vec![decision_id]);
            assert_eq!(market.key_id, signer.key_id());
        }
        other => panic!("expected market, got {}", other.kind()),
    }
    drop(payloads);
    assert_ne!(created.id, market_id);

    // Re-broadcasting an already committed record is a duplicate.
    let err = harness
        .state
        .create_branch(&rtxn, &builder, test_branch())
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate { .. }));

    // A trade below the quote is refused before broadcast.
    let err = harness
        .state
        .create_trade(
            &rtxn,
            &builder,
            &signer,
            TradeParams {
                market_id,
                is_buy: true,
                n_shares: 100_000_000,
                price: 1,
                decision_state: 0,
                nonce: None,
            },
            &CancelToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::PriceRejected { .. }));
}

#[test]
fn ballot_window_selects_closing_decisions() {
    let harness = test_env();
    let (branch_id, decision_id, _) = seed_market(&harness);

    // A decision closing in the second period is not on the first ballot.
    let mut late = test_decision(branch_id, "later question");
    late.event_over_by = 1500;
    let late_id = late.id();
    let mut wtxn = harness.env.write_txn().unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Decision(late), txid(40), 4)
        .unwrap();
    wtxn.commit().unwrap();

    let rtxn = harness.env.read_txn().unwrap();
    let cancel = CancelToken::new();
    let window = harness
        .state
        .ballot(&rtxn, &branch_id, 2500, &cancel)
        .unwrap();
    assert_eq!((window.minblock, window.maxblock), (2001, 3000));
    assert!(window.decisions.is_empty());

    let window = harness
        .state
        .ballot(&rtxn, &branch_id, 1000, &cancel)
        .unwrap();
    assert_eq!((window.minblock, window.maxblock), (1, 1000));
    assert_eq!(window.decisions.len(), 1);
    assert_eq!(window.decisions[0].0, decision_id);

    let window = harness
        .state
        .ballot(&rtxn, &branch_id, 1500, &cancel)
        .unwrap();
    assert_eq!((window.minblock, window.maxblock), (1001, 2000));
    assert_eq!(window.decisions[0].0, late_id);
}

#[test]
fn voting_period_resolves_to_an_outcome_and_payout() {
    let harness = test_env();
    let (branch_id, decision_id, market_id) = seed_market(&harness);
    let cancel = CancelToken::new();

    // Two positions: one share each of state 0 and state 1.
    let mut wtxn = harness.env.write_txn().unwrap();
    for (state, nonce) in [(0u32, 0u32), (1, 1)] {
        let trade = Trade {
            key_id: KeyId([0xB0; 20]),
            market_id,
            is_buy: true,
            n_shares: 100_000_000,
            price: 100_000_000,
            decision_state: state,
            nonce,
        };
        harness
            .state
            .connect_object(
                &mut wtxn,
                &MarketObject::Trade(trade),
                txid(50 + nonce as u8),
                4,
            )
            .unwrap();
    }

    // Three voters commit, then unanimously reveal "yes".
    let voter_keys =
        [KeyId([0xA1; 20]), KeyId([0xA2; 20]), KeyId([0xA3; 20])];
    for (i, key) in voter_keys.iter().enumerate() {
        let sealed = SealedVote {
            branch_id,
            height: 1000,
            vote_id: double_sha256(format!("commit {i}").as_bytes()),
        };
        let sealed_id = sealed.id();
        harness
            .state
            .connect_object(
                &mut wtxn,
                &MarketObject::SealedVote(sealed),
                txid(60 + i as u8),
                1000,
            )
            .unwrap();
        let reveal = RevealVote {
            branch_id,
            height: 1000,
            vote_id: sealed_id,
            decision_ids: vec![decision_id],
            decision_votes: vec![100_000_000],
            na: VOTE_NA,
            key_id: *key,
        };
        harness
            .state
            .connect_object(
                &mut wtxn,
                &MarketObject::RevealVote(reveal),
                txid(70 + i as u8),
                1100,
            )
            .unwrap();
    }

    let (outcome_id, outcome, payout) = harness
        .state
        .run_outcome(&mut wtxn, &branch_id, 1000, txid(80), &cancel)
        .unwrap();
    wtxn.commit().unwrap();

    assert_eq!(outcome.decisions_final, vec![100_000_000]);
    assert_eq!(outcome.n_voters(), 3);
    assert_eq!(outcome.vote_matrix, vec![100_000_000; 3]);
    // Unanimity: smoothed reputation stays uniform.
    for rep in &outcome.smoothed_rep {
        assert_eq!(*rep, 33_333_333);
    }
    assert_eq!(outcome.certainty, vec![100_000_000]);

    // The trader's state-1 share pays out a full coin; the state-0 share
    // is worthless under a "yes" resolution.
    let settlement: Vec<_> = payout
        .outputs
        .iter()
        .filter(|output| {
            matches!(output.kind, PayoutKind::Settlement(id) if id == market_id)
        })
        .collect();
    assert_eq!(settlement.len(), 1);
    assert_eq!(settlement[0].key_id, KeyId([0xB0; 20]));
    assert_eq!(settlement[0].amount, 100_000_000);

    // Every voter gets a reputation output carrying the signed change in
    // their weight. The first period starts from uniform reputation and
    // unanimity keeps it, so every delta is zero.
    let reputation: Vec<_> = payout
        .outputs
        .iter()
        .filter(|output| matches!(output.kind, PayoutKind::Reputation))
        .collect();
    assert_eq!(reputation.len(), 3);
    for output in &reputation {
        assert_eq!(output.amount, 0);
    }

    // The outcome record round-trips through the store.
    let rtxn = harness.env.read_txn().unwrap();
    let stored = harness
        .state
        .try_get_outcome(&rtxn, &outcome_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored, outcome);
    let listed = harness
        .state
        .list_outcomes(&rtxn, &branch_id, &cancel)
        .unwrap();
    assert_eq!(listed.len(), 1);
    drop(rtxn);

    // A period resolves exactly once.
    let mut wtxn = harness.env.write_txn().unwrap();
    let err = harness
        .state
        .run_outcome(&mut wtxn, &branch_id, 1000, txid(81), &cancel)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ConstraintViolated { .. } | Error::Duplicate { .. }
    ));
}

#[test]
fn market_spanning_two_periods_settles_after_its_last_decision() {
    let harness = test_env();
    let cancel = CancelToken::new();

    let branch = test_branch();
    let branch_id = branch.id();
    let early = test_decision(branch_id, "early question");
    let early_id = early.id();
    let mut late = test_decision(branch_id, "late question");
    late.event_over_by = 1500;
    let late_id = late.id();
    // Four states spanning a decision from each voting period.
    let market = test_market(branch_id, vec![early_id, late_id]);
    let market_id = market.id();

    let mut wtxn = harness.env.write_txn().unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Branch(branch), txid(1), 1)
        .unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Decision(early), txid(2), 2)
        .unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Decision(late), txid(3), 2)
        .unwrap();
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Market(market), txid(4), 3)
        .unwrap();

    // One share of the yes-yes state.
    let trade = Trade {
        key_id: KeyId([0xB0; 20]),
        market_id,
        is_buy: true,
        n_shares: 100_000_000,
        price: 100_000_000,
        decision_state: 3,
        nonce: 0,
    };
    harness
        .state
        .connect_object(&mut wtxn, &MarketObject::Trade(trade), txid(5), 4)
        .unwrap();

    let voter_keys =
        [KeyId([0xA1; 20]), KeyId([0xA2; 20]), KeyId([0xA3; 20])];
    let vote = |wtxn: &mut heed::RwTxn,
                period: u32,
                decision_id: ObjectId,
                votes: [u64; 3],
                txid_base: u8| {
        for (i, key) in voter_keys.iter().enumerate() {
            let sealed = SealedVote {
                branch_id,
                height: period,
                vote_id: double_sha256(
                    format!("commit {period} {i}").as_bytes(),
                ),
            };
            let sealed_id = sealed.id();
            harness
                .state
                .connect_object(
                    wtxn,
                    &MarketObject::SealedVote(sealed),
                    txid(txid_base + i as u8),
                    period,
                )
                .unwrap();
            let reveal = RevealVote {
                branch_id,
                height: period,
                vote_id: sealed_id,
                decision_ids: vec![decision_id],
                decision_votes: vec![votes[i]],
                na: VOTE_NA,
                key_id: *key,
            };
            harness
                .state
                .connect_object(
                    wtxn,
                    &MarketObject::RevealVote(reveal),
                    txid(txid_base + 3 + i as u8),
                    period + 100,
                )
                .unwrap();
        }
    };

    // Period 1 resolves only the early decision: the market must not pay
    // out yet.
    vote(&mut wtxn, 1000, early_id, [100_000_000; 3], 10);
    let (_, _, payout_one) = harness
        .state
        .run_outcome(&mut wtxn, &branch_id, 1000, txid(30), &cancel)
        .unwrap();
    assert!(payout_one
        .outputs
        .iter()
        .all(|output| !matches!(output.kind, PayoutKind::Settlement(_))));

    // Period 2 resolves the late decision (one dissenter); the market
    // settles against both finals, the early one read back from the
    // stored period-1 outcome.
    vote(&mut wtxn, 2000, late_id, [100_000_000, 100_000_000, 0], 40);
    let (_, _, payout_two) = harness
        .state
        .run_outcome(&mut wtxn, &branch_id, 2000, txid(50), &cancel)
        .unwrap();
    wtxn.commit().unwrap();

    let settlement: Vec<_> = payout_two
        .outputs
        .iter()
        .filter(|output| {
            matches!(output.kind, PayoutKind::Settlement(id) if id == market_id)
        })
        .collect();
    assert_eq!(settlement.len(), 1);
    assert_eq!(settlement[0].key_id, KeyId([0xB0; 20]));
    assert_eq!(settlement[0].amount, 100_000_000);

    // Reputation moved this period: the two agreeing voters gain what the
    // dissenter loses, up to a sat of rounding.
    let reputation: Vec<_> = payout_two
        .outputs
        .iter()
        .filter(|output| matches!(output.kind, PayoutKind::Reputation))
        .collect();
    assert_eq!(reputation.len(), 3);
    assert_eq!(reputation[0].amount, 1_666_667);
    assert_eq!(reputation[1].amount, 1_666_667);
    assert_eq!(reputation[2].amount, -3_333_333);
    let net: i64 = reputation.iter().map(|output| output.amount).sum();
    assert!(net.abs() <= 3);
}
