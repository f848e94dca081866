//! Object lifecycle: admission, queries, operator calls, and outcome runs.
//!
//! The node's chain-state lock serialises everything that writes; readers
//! work from LMDB snapshots and may trail the tip. Records arrive as
//! script payloads, are validated against the store, and land atomically
//! under their primary key plus every secondary index their schema
//! demands. When a branch's reveal window closes, [`State::run_outcome`]
//! folds the period's ballots into an [`Outcome`] record, writes it back
//! through the same path, and returns the payout transaction for the node
//! to broadcast.

use std::collections::{BTreeMap, BTreeSet};

use heed::{Env, RoTxn, RwTxn};
use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::{
    interfaces::{Signer, TransactionBuilder},
    math::{
        fixed::{self, Rounding},
        lmsr,
        outcome::{self, VoteInput, VoteOutput},
    },
    serialize,
    store::{write_set, CancelToken, MarketTree},
    types::{
        parse_decision_spec, Branch, Decision, KeyId, Market, MarketObject,
        ObjectId, Outcome, PayoutKind, PayoutOutput, PayoutTransaction,
        RevealVote, SealedVote, StealVote, Trade, Txid, VOTE_NA,
    },
    validation,
};

pub mod ballot;
pub mod error;

pub use error::Error;

/// Engine-side NA sentinel; reveal votes are unsigned fixed point, so a
/// negative cell can never collide with a real vote.
const ENGINE_NA: f64 = -1.0;

/// Id and carrier txid of a freshly broadcast record.
#[derive(Clone, Copy, Debug)]
pub struct Created {
    pub id: ObjectId,
    pub txid: Txid,
}

/// A branch's ballot for one voting window.
#[derive(Clone, Debug)]
pub struct BallotWindow {
    pub minblock: u32,
    pub maxblock: u32,
    pub decisions: Vec<(ObjectId, Decision)>,
}

/// Operator parameters for listing a decision.
#[derive(Clone, Debug)]
pub struct DecisionParams {
    pub branch_id: ObjectId,
    pub prompt: String,
    pub event_over_by: u32,
    pub answer_optionality: bool,
    pub is_scaled: bool,
    pub min: i64,
    pub max: i64,
}

/// Operator parameters for authoring a market. Decision specs are
/// `<decision_id>[:<function_code>]` with codes X1, X2, X3 and LNX1.
#[derive(Clone, Debug)]
pub struct MarketParams {
    pub decision_specs: Vec<String>,
    pub b: u64,
    pub trading_fee: u64,
    pub max_commission: u64,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub maturation: u32,
    pub tx_pow_hash_id: u32,
    pub tx_pow_difficulty: u32,
}

/// Operator parameters for a trade.
#[derive(Clone, Debug)]
pub struct TradeParams {
    pub market_id: ObjectId,
    pub is_buy: bool,
    pub n_shares: u64,
    pub price: u64,
    pub decision_state: u32,
    pub nonce: Option<u32>,
}

#[derive(Clone)]
pub struct State {
    tree: MarketTree,
}

impl State {
    pub const NUM_DBS: u32 = MarketTree::NUM_DBS;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        let tree = MarketTree::new(env, rwtxn)?;
        Ok(Self { tree })
    }

    pub fn market_tree(&self) -> &MarketTree {
        &self.tree
    }

    /// Validate and persist a record under its primary key and every
    /// secondary index, atomically within the caller's transaction.
    pub fn connect_object(
        &self,
        rwtxn: &mut RwTxn,
        object: &MarketObject,
        txid: Txid,
        height: u32,
    ) -> Result<ObjectId, Error> {
        let cancel = CancelToken::new();
        validation::validate_object(
            &self.tree,
            rwtxn,
            object,
            Some(height),
            &cancel,
        )?;
        let batch = write_set(object, &txid);
        self.tree.put_batch(rwtxn, &batch)?;
        debug!(
            kind = object.kind(),
            id = %object.id(),
            height,
            "record admitted"
        );
        Ok(object.id())
    }

    /// Admission path for a raw script payload. Malformed payloads and
    /// records that fail validation are dropped — the enclosing
    /// transaction still mines, the record is a no-op.
    pub fn connect_payload(
        &self,
        rwtxn: &mut RwTxn,
        payload: &[u8],
        txid: Txid,
        height: u32,
    ) -> Result<Option<ObjectId>, Error> {
        let object = match serialize::decode_object(payload) {
            Ok(object) => object,
            Err(err) => {
                debug!(%txid, %err, "undecodable payload dropped");
                return Ok(None);
            }
        };
        match self.connect_object(rwtxn, &object, txid, height) {
            Ok(id) => Ok(Some(id)),
            Err(
                err @ (Error::NotFound { .. }
                | Error::Duplicate { .. }
                | Error::ConstraintViolated { .. }
                | Error::PriceRejected { .. }
                | Error::Lmsr(_)),
            ) => {
                warn!(
                    kind = object.kind(),
                    id = %object.id(),
                    %err,
                    "record dropped at admission"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_get_branch(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<Branch>, Error> {
        Ok(self.tree.try_get_branch(rotxn, id)?.map(|(b, _)| b))
    }

    pub fn try_get_decision(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<Decision>, Error> {
        Ok(self.tree.try_get_decision(rotxn, id)?.map(|(d, _)| d))
    }

    pub fn try_get_market(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<Market>, Error> {
        Ok(self.tree.try_get_market(rotxn, id)?.map(|(m, _)| m))
    }

    pub fn try_get_trade(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<Trade>, Error> {
        Ok(self.tree.try_get_trade(rotxn, id)?.map(|(t, _)| t))
    }

    pub fn try_get_outcome(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<Outcome>, Error> {
        Ok(self.tree.try_get_outcome(rotxn, id)?.map(|(o, _)| o))
    }

    pub fn list_branches(
        &self,
        rotxn: &RoTxn,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Branch)>, Error> {
        Ok(self.tree.branches(rotxn, cancel)?)
    }

    pub fn list_decisions(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Decision)>, Error> {
        Ok(self.tree.decisions_in_branch(rotxn, branch_id, cancel)?)
    }

    pub fn list_markets(
        &self,
        rotxn: &RoTxn,
        decision_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Market)>, Error> {
        Ok(self.tree.markets_for_decision(rotxn, decision_id, cancel)?)
    }

    pub fn list_trades(
        &self,
        rotxn: &RoTxn,
        market_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Trade)>, Error> {
        Ok(self.tree.trades_for_market(rotxn, market_id, cancel)?)
    }

    pub fn list_outcomes(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Outcome)>, Error> {
        Ok(self.tree.outcomes_for_branch(rotxn, branch_id, cancel)?)
    }

    /// The `(minblock, maxblock]`-aligned voting window containing
    /// `height`, and the decisions whose events close inside it.
    pub fn ballot(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        height: u32,
        cancel: &CancelToken,
    ) -> Result<BallotWindow, Error> {
        let branch = self.require_branch(rotxn, branch_id)?;
        let (minblock, maxblock) = ballot::window(branch.tau, height);
        let decisions = self
            .tree
            .decisions_in_branch(rotxn, branch_id, cancel)?
            .into_iter()
            .filter(|(_, decision)| {
                (minblock..=maxblock).contains(&decision.event_over_by)
            })
            .collect();
        Ok(BallotWindow {
            minblock,
            maxblock,
            decisions,
        })
    }

    /// Quote an incremental trade against the market's current share
    /// vector, rebuilt from the trade history.
    pub fn trade_quote(
        &self,
        rotxn: &RoTxn,
        market_id: &ObjectId,
        is_buy: bool,
        n_shares: u64,
        decision_state: u32,
        cancel: &CancelToken,
    ) -> Result<lmsr::Quote, Error> {
        let market = self.require_market(rotxn, market_id)?;
        let trades: Vec<Trade> = self
            .tree
            .trades_for_market(rotxn, market_id, cancel)?
            .into_iter()
            .map(|(_, trade)| trade)
            .collect();
        Ok(lmsr::quote(
            &market,
            &trades,
            is_buy,
            n_shares,
            decision_state,
        )?)
    }

    /// Capital required to clear a prospective trade, in 1e-8 units.
    pub fn trade_capital_required(
        &self,
        rotxn: &RoTxn,
        market_id: &ObjectId,
        is_buy: bool,
        n_shares: u64,
        decision_state: u32,
        cancel: &CancelToken,
    ) -> Result<u64, Error> {
        let quote = self.trade_quote(
            rotxn,
            market_id,
            is_buy,
            n_shares,
            decision_state,
            cancel,
        )?;
        Ok(fixed::to_fixed(quote.total_cost.max(0.0), Rounding::Up)?)
    }

    /// Capital an author must escrow to open a market.
    pub fn market_capital_required(
        &self,
        rotxn: &RoTxn,
        market_id: &ObjectId,
    ) -> Result<u64, Error> {
        let market = self.require_market(rotxn, market_id)?;
        let n_states = lmsr::n_states(market.decision_ids.len())?;
        let coins =
            lmsr::capital_required(fixed::to_coin(market.b), n_states)?;
        Ok(fixed::to_fixed(coins, Rounding::Up)?)
    }

    pub fn create_branch(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        branch: Branch,
    ) -> Result<Created, Error> {
        validation::validate_branch(&branch)?;
        self.broadcast(rotxn, MarketObject::Branch(branch), builder)
    }

    pub fn create_decision(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        signer: &impl Signer,
        params: DecisionParams,
    ) -> Result<Created, Error> {
        let decision = Decision {
            key_id: signer.key_id(),
            branch_id: params.branch_id,
            prompt: params.prompt,
            event_over_by: params.event_over_by,
            is_scaled: params.is_scaled,
            min: params.min,
            max: params.max,
            answer_optionality: params.answer_optionality,
        };
        validation::validate_decision(&self.tree, rotxn, &decision)?;
        self.broadcast(rotxn, MarketObject::Decision(decision), builder)
    }

    pub fn create_market(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        signer: &impl Signer,
        params: MarketParams,
    ) -> Result<Created, Error> {
        let mut decision_ids = Vec::with_capacity(params.decision_specs.len());
        let mut decision_functions =
            Vec::with_capacity(params.decision_specs.len());
        for spec in &params.decision_specs {
            let (id, function) = parse_decision_spec(spec)
                .map_err(|err| Error::constraint(err.to_string()))?;
            decision_ids.push(id);
            decision_functions.push(function);
        }
        let first = decision_ids
            .first()
            .ok_or_else(|| Error::constraint("market lists no decisions"))?;
        let branch_id = match self.tree.try_get_decision(rotxn, first)? {
            Some((decision, _)) => decision.branch_id,
            None => {
                return Err(Error::NotFound {
                    kind: "decision",
                    id: *first,
                });
            }
        };
        let market = Market {
            key_id: signer.key_id(),
            b: params.b,
            trading_fee: params.trading_fee,
            max_commission: params.max_commission,
            title: params.title,
            description: params.description,
            tags: params.tags,
            maturation: params.maturation,
            branch_id,
            decision_ids,
            decision_functions,
            tx_pow_hash_id: params.tx_pow_hash_id,
            tx_pow_difficulty: params.tx_pow_difficulty,
        };
        validation::validate_market(&self.tree, rotxn, &market)?;
        self.broadcast(rotxn, MarketObject::Market(market), builder)
    }

    pub fn create_trade(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        signer: &impl Signer,
        params: TradeParams,
        cancel: &CancelToken,
    ) -> Result<Created, Error> {
        let trade = Trade {
            key_id: signer.key_id(),
            market_id: params.market_id,
            is_buy: params.is_buy,
            n_shares: params.n_shares,
            price: params.price,
            decision_state: params.decision_state,
            nonce: params.nonce.unwrap_or(0),
        };
        validation::validate_trade(&self.tree, rotxn, &trade, cancel)?;
        self.broadcast(rotxn, MarketObject::Trade(trade), builder)
    }

    pub fn create_sealed_vote(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        vote: SealedVote,
    ) -> Result<Created, Error> {
        validation::validate_sealed_vote(&self.tree, rotxn, &vote, None)?;
        self.broadcast(rotxn, MarketObject::SealedVote(vote), builder)
    }

    pub fn create_reveal_vote(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        signer: &impl Signer,
        mut vote: RevealVote,
    ) -> Result<Created, Error> {
        vote.key_id = signer.key_id();
        validation::validate_reveal_vote(&self.tree, rotxn, &vote, None)?;
        self.broadcast(rotxn, MarketObject::RevealVote(vote), builder)
    }

    pub fn create_steal_vote(
        &self,
        rotxn: &RoTxn,
        builder: &impl TransactionBuilder,
        vote: StealVote,
    ) -> Result<Created, Error> {
        validation::validate_steal_vote(&self.tree, rotxn, &vote, None)?;
        self.broadcast(rotxn, MarketObject::StealVote(vote), builder)
    }

    /// Fold one closed voting period into its Outcome: read the window's
    /// ballots, score the voters, persist the record, and return the
    /// payout transaction for the node to broadcast.
    pub fn run_outcome(
        &self,
        rwtxn: &mut RwTxn,
        branch_id: &ObjectId,
        vote_height: u32,
        txid: Txid,
        cancel: &CancelToken,
    ) -> Result<(ObjectId, Outcome, PayoutTransaction), Error> {
        let branch = self.require_branch(rwtxn, branch_id)?;
        if !ballot::is_vote_height(branch.tau, vote_height) {
            return Err(Error::constraint(format!(
                "height {vote_height} is not a voting height for tau {}",
                branch.tau
            )));
        }
        let ballot_window =
            self.ballot(rwtxn, branch_id, vote_height, cancel)?;
        if ballot_window.decisions.is_empty() {
            return Err(Error::constraint(format!(
                "no decisions close in period {vote_height}"
            )));
        }

        // All three vote families are read before scoring begins. A reveal
        // superseded by a steal naming its sealed ballot is excluded.
        let reveals = self.tree.reveal_votes_for_period(
            rwtxn,
            branch_id,
            vote_height,
            cancel,
        )?;
        let stolen: BTreeSet<ObjectId> = self
            .tree
            .steal_votes_for_period(rwtxn, branch_id, vote_height, cancel)?
            .into_iter()
            .map(|(_, steal)| steal.vote_id)
            .collect();
        let mut ballots: BTreeMap<KeyId, RevealVote> = BTreeMap::new();
        for (_, reveal) in reveals {
            if stolen.contains(&reveal.vote_id) {
                continue;
            }
            ballots.entry(reveal.key_id).or_insert(reveal);
        }
        if ballots.is_empty() {
            return Err(Error::constraint(format!(
                "no reveal votes for period {vote_height}"
            )));
        }

        let voters: Vec<KeyId> = ballots.keys().copied().collect();
        let decisions = &ballot_window.decisions;
        let n_voters = voters.len();
        let n_decisions = decisions.len();

        // Raw fixed-point matrix for the record, float matrix for the
        // engine.
        let mut raw_matrix = vec![VOTE_NA; n_voters * n_decisions];
        let mut matrix =
            Array2::from_elem((n_voters, n_decisions), ENGINE_NA);
        for (v, voter) in voters.iter().enumerate() {
            let reveal = &ballots[voter];
            for (d, (decision_id, _)) in decisions.iter().enumerate() {
                let listed = reveal
                    .decision_ids
                    .iter()
                    .position(|id| id == decision_id);
                if let Some(i) = listed {
                    let value = reveal.decision_votes[i];
                    if value != reveal.na {
                        raw_matrix[v * n_decisions + d] = value;
                        matrix[[v, d]] = fixed::to_coin(value);
                    }
                }
            }
        }

        let old_rep = self.old_reputation(
            rwtxn,
            branch_id,
            vote_height,
            &voters,
            cancel,
        )?;

        let input = VoteInput {
            matrix,
            old_rep,
            is_binary: decisions
                .iter()
                .map(|(_, decision)| !decision.is_scaled)
                .collect(),
            na: ENGINE_NA,
            alpha: fixed::to_coin(branch.alpha),
            tol: fixed::to_coin(branch.tol),
        };
        let output = outcome::process(&input, cancel)?;

        let payout = self.build_payout(
            rwtxn,
            branch_id,
            decisions,
            &voters,
            &input.old_rep,
            &output,
            cancel,
        )?;
        let outcome = Outcome {
            height: vote_height,
            branch_id: *branch_id,
            voter_ids: voters,
            old_rep: VoteOutput::to_fixed(&input.old_rep)?,
            this_rep: VoteOutput::to_fixed(&output.this_rep)?,
            smoothed_rep: VoteOutput::to_fixed(&output.smoothed_rep)?,
            na_row: VoteOutput::to_fixed(&output.na_row)?,
            partic_row: VoteOutput::to_fixed(&output.partic_row)?,
            partic_rel: VoteOutput::to_fixed(&output.partic_rel)?,
            row_bonus: VoteOutput::to_fixed(&output.row_bonus)?,
            decision_ids: decisions.iter().map(|(id, _)| *id).collect(),
            is_scaled: decisions
                .iter()
                .map(|(_, decision)| decision.is_scaled)
                .collect(),
            first_loading: VoteOutput::to_fixed(&output.first_loading)?,
            decisions_raw: VoteOutput::to_fixed(&output.decisions_raw)?,
            consensus_reward: VoteOutput::to_fixed(
                &output.consensus_reward,
            )?,
            certainty: VoteOutput::to_fixed(&output.certainty)?,
            na_col: VoteOutput::to_fixed(&output.na_col)?,
            partic_col: VoteOutput::to_fixed(&output.partic_col)?,
            author_bonus: VoteOutput::to_fixed(&output.author_bonus)?,
            decisions_final: VoteOutput::to_fixed(
                &output.decisions_final,
            )?,
            vote_matrix: raw_matrix,
            na: VOTE_NA,
            alpha: branch.alpha,
            tol: branch.tol,
            payout,
        };
        let payout_tx = PayoutTransaction {
            branch_id: *branch_id,
            height: vote_height,
            outputs: outcome.payout.clone(),
        };
        let id = self.connect_object(
            rwtxn,
            &MarketObject::Outcome(outcome.clone()),
            txid,
            vote_height,
        )?;
        info!(
            branch = %branch_id,
            height = vote_height,
            voters = outcome.n_voters(),
            decisions = outcome.n_decisions(),
            "voting period resolved"
        );
        Ok((id, outcome, payout_tx))
    }

    fn require_branch(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Branch, Error> {
        self.try_get_branch(rotxn, id)?.ok_or(Error::NotFound {
            kind: "branch",
            id: *id,
        })
    }

    fn require_market(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Market, Error> {
        self.try_get_market(rotxn, id)?.ok_or(Error::NotFound {
            kind: "market",
            id: *id,
        })
    }

    fn broadcast(
        &self,
        rotxn: &RoTxn,
        object: MarketObject,
        builder: &impl TransactionBuilder,
    ) -> Result<Created, Error> {
        let id = object.id();
        if self
            .tree
            .exists(rotxn, &crate::store::keys::primary(object.tag(), &id))?
        {
            return Err(Error::Duplicate { id });
        }
        let payload = serialize::encode_object(&object);
        let txid = builder.broadcast_payload(&payload)?;
        debug!(kind = object.kind(), %id, %txid, "record broadcast");
        Ok(Created { id, txid })
    }

    /// Old reputation for a period: the branch's most recent prior
    /// Outcome's smoothed reputation, matched by voter key; uniform over
    /// the period's voters when no history exists.
    fn old_reputation(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        vote_height: u32,
        voters: &[KeyId],
        cancel: &CancelToken,
    ) -> Result<Array1<f64>, Error> {
        let previous = self
            .tree
            .outcomes_for_branch(rotxn, branch_id, cancel)?
            .into_iter()
            .map(|(_, outcome)| outcome)
            .filter(|outcome| outcome.height < vote_height)
            .max_by_key(|outcome| outcome.height);
        let mut rep = Array1::zeros(voters.len());
        if let Some(previous) = previous {
            let by_voter: BTreeMap<KeyId, u64> = previous
                .voter_ids
                .iter()
                .copied()
                .zip(previous.smoothed_rep.iter().copied())
                .collect();
            for (v, voter) in voters.iter().enumerate() {
                rep[v] = by_voter
                    .get(voter)
                    .copied()
                    .map(fixed::to_coin)
                    .unwrap_or(0.0);
            }
        }
        let total = rep.sum();
        if total > 0.0 {
            rep.mapv_inplace(|x| x / total);
        } else {
            rep.fill(1.0 / voters.len() as f64);
        }
        Ok(rep)
    }

    /// Build the period's payout outputs: settlements for every market
    /// whose last decision this ballot resolves, signed reputation deltas
    /// and participation bonuses for voters, and listing bonuses for
    /// decision authors.
    fn build_payout(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        decisions: &[(ObjectId, Decision)],
        voters: &[KeyId],
        old_rep: &Array1<f64>,
        output: &VoteOutput,
        cancel: &CancelToken,
    ) -> Result<Vec<PayoutOutput>, Error> {
        // Finalised values visible to settlement: this window's decisions
        // plus everything the branch's earlier outcomes resolved. A market
        // may list decisions closing in different tau periods; it settles
        // in the window that finalises its last one.
        let mut resolved: BTreeMap<ObjectId, f64> = decisions
            .iter()
            .enumerate()
            .map(|(d, (id, _))| (*id, output.decisions_final[d]))
            .collect();
        for (_, prior) in
            self.tree.outcomes_for_branch(rotxn, branch_id, cancel)?
        {
            for (i, decision_id) in prior.decision_ids.iter().enumerate() {
                resolved.entry(*decision_id).or_insert_with(|| {
                    fixed::to_coin(prior.decisions_final[i])
                });
            }
        }
        let current: BTreeMap<ObjectId, &Decision> = decisions
            .iter()
            .map(|(id, decision)| (*id, decision))
            .collect();

        // Every market listing one of the ballot's decisions settles now
        // if its whole decision set has finalised values.
        let mut markets: BTreeMap<ObjectId, Market> = BTreeMap::new();
        for (decision_id, _) in decisions {
            for (market_id, market) in
                self.tree.markets_for_decision(rotxn, decision_id, cancel)?
            {
                if market
                    .decision_ids
                    .iter()
                    .all(|id| resolved.contains_key(id))
                {
                    markets.insert(market_id, market);
                }
            }
        }

        let mut outputs = Vec::new();
        for (market_id, market) in &markets {
            // Value of one share of each state under the finalised
            // decisions: the product over the market's decisions of the
            // per-decision payoff, with scaled outcomes normalised into
            // [0, 1] and passed through the decision's function code.
            let mut payoffs = Vec::with_capacity(market.decision_ids.len());
            for (i, decision_id) in market.decision_ids.iter().enumerate() {
                let final_value = resolved[decision_id];
                let (is_scaled, min, max) = match current.get(decision_id) {
                    Some(decision) => {
                        (decision.is_scaled, decision.min, decision.max)
                    }
                    None => {
                        // Resolved in an earlier window; the record is
                        // still needed for its kind and range.
                        let (decision, _) = self
                            .tree
                            .try_get_decision(rotxn, decision_id)?
                            .ok_or(Error::NotFound {
                                kind: "decision",
                                id: *decision_id,
                            })?;
                        (decision.is_scaled, decision.min, decision.max)
                    }
                };
                let payoff = if is_scaled {
                    let min = min as f64 / fixed::COIN_F64;
                    let max = max as f64 / fixed::COIN_F64;
                    let u = ((final_value - min) / (max - min))
                        .clamp(0.0, 1.0);
                    market.decision_functions[i].apply(u)
                } else {
                    final_value
                };
                payoffs.push(payoff);
            }
            let n_states = lmsr::n_states(market.decision_ids.len())?;
            let state_value = |state: u32| -> f64 {
                payoffs
                    .iter()
                    .enumerate()
                    .map(|(j, payoff)| {
                        if state >> j & 1 == 1 {
                            *payoff
                        } else {
                            1.0 - payoff
                        }
                    })
                    .product()
            };

            // Net holdings per (key, state) from the trade history.
            let mut holdings: BTreeMap<(KeyId, u32), i128> = BTreeMap::new();
            for (_, trade) in
                self.tree.trades_for_market(rotxn, market_id, cancel)?
            {
                if trade.decision_state >= n_states {
                    continue;
                }
                let delta = if trade.is_buy {
                    trade.n_shares as i128
                } else {
                    -(trade.n_shares as i128)
                };
                *holdings
                    .entry((trade.key_id, trade.decision_state))
                    .or_insert(0) += delta;
            }
            let mut settlements: BTreeMap<KeyId, i64> = BTreeMap::new();
            for ((key_id, state), shares) in holdings {
                if shares <= 0 {
                    continue;
                }
                let value = shares as f64 * state_value(state);
                let sats = fixed::to_fixed_signed(
                    value / fixed::COIN_F64,
                    Rounding::Down,
                )?;
                if sats > 0 {
                    *settlements.entry(key_id).or_insert(0) += sats;
                }
            }
            for (key_id, amount) in settlements {
                outputs.push(PayoutOutput {
                    key_id,
                    amount,
                    kind: PayoutKind::Settlement(*market_id),
                });
            }
        }

        // Reputation moves by its change this period, not its level: a
        // voter whose weight fell owes votecoin back.
        for (v, voter) in voters.iter().enumerate() {
            let delta = output.smoothed_rep[v] - old_rep[v];
            outputs.push(PayoutOutput {
                key_id: *voter,
                amount: fixed::to_fixed_signed(delta, Rounding::HalfUp)?,
                kind: PayoutKind::Reputation,
            });
            let bonus = fixed::to_fixed_signed(
                output.row_bonus[v],
                Rounding::Down,
            )?;
            if bonus > 0 {
                outputs.push(PayoutOutput {
                    key_id: *voter,
                    amount: bonus,
                    kind: PayoutKind::VoterBonus,
                });
            }
        }
        for (d, (decision_id, decision)) in decisions.iter().enumerate() {
            let bonus = fixed::to_fixed_signed(
                output.author_bonus[d],
                Rounding::Down,
            )?;
            if bonus > 0 {
                outputs.push(PayoutOutput {
                    key_id: decision.key_id,
                    amount: bonus,
                    kind: PayoutKind::AuthorBonus(*decision_id),
                });
            }
        }
        Ok(outputs)
    }
}
