//! Admission checks for incoming market records.
//!
//! Every record is validated against the current store before any index is
//! written: identifier uniqueness, reference integrity, parameter sanity,
//! vote-window alignment, and LMSR sanity for trades. The same checks back
//! the operator-facing calls, where failures surface as structured errors
//! instead of silent drops.

use heed::RoTxn;

use crate::{
    math::lmsr,
    state::{ballot, Error},
    store::{keys, CancelToken, MarketTree},
    types::{
        Branch, Decision, Market, MarketObject, Outcome, RevealVote,
        SealedVote, StealVote, Trade, COIN,
    },
};

/// Validate a record against the store. `tip` is the chain height the
/// record is being admitted at, when known.
pub fn validate_object(
    tree: &MarketTree,
    rotxn: &RoTxn,
    object: &MarketObject,
    tip: Option<u32>,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let id = object.id();
    if tree.exists(rotxn, &keys::primary(object.tag(), &id))? {
        return Err(Error::Duplicate { id });
    }
    match object {
        MarketObject::Branch(branch) => validate_branch(branch),
        MarketObject::Decision(decision) => {
            validate_decision(tree, rotxn, decision)
        }
        MarketObject::Market(market) => {
            validate_market(tree, rotxn, market)
        }
        MarketObject::Trade(trade) => {
            validate_trade(tree, rotxn, trade, cancel)
        }
        MarketObject::SealedVote(vote) => {
            validate_sealed_vote(tree, rotxn, vote, tip)
        }
        MarketObject::RevealVote(vote) => {
            validate_reveal_vote(tree, rotxn, vote, tip)
        }
        MarketObject::StealVote(vote) => {
            validate_steal_vote(tree, rotxn, vote, tip)
        }
        MarketObject::Outcome(outcome) => {
            validate_outcome(tree, rotxn, outcome, cancel)
        }
    }
}

pub fn validate_branch(branch: &Branch) -> Result<(), Error> {
    if branch.target_decisions == 0 {
        return Err(Error::constraint("target decision count is zero"));
    }
    if branch.target_decisions > branch.max_decisions {
        return Err(Error::constraint(format!(
            "target decisions {} exceed maximum {}",
            branch.target_decisions, branch.max_decisions
        )));
    }
    if branch.tau == 0 {
        return Err(Error::constraint("tau is zero"));
    }
    if branch.ballot_time as u32 + branch.unseal_time as u32
        >= branch.tau as u32
    {
        return Err(Error::constraint(format!(
            "ballot time {} + unseal time {} must fit inside tau {}",
            branch.ballot_time, branch.unseal_time, branch.tau
        )));
    }
    if branch.alpha > COIN {
        return Err(Error::constraint("alpha above one"));
    }
    if branch.tol >= COIN {
        return Err(Error::constraint("tolerance at or above one"));
    }
    Ok(())
}

fn require_branch(
    tree: &MarketTree,
    rotxn: &RoTxn,
    id: &crate::types::ObjectId,
) -> Result<Branch, Error> {
    match tree.try_get_branch(rotxn, id)? {
        Some((branch, _)) => Ok(branch),
        None => Err(Error::NotFound {
            kind: "branch",
            id: *id,
        }),
    }
}

pub fn validate_decision(
    tree: &MarketTree,
    rotxn: &RoTxn,
    decision: &Decision,
) -> Result<(), Error> {
    require_branch(tree, rotxn, &decision.branch_id)?;
    if decision.is_scaled && decision.min >= decision.max {
        return Err(Error::constraint(format!(
            "scaled range [{}, {}] is empty",
            decision.min, decision.max
        )));
    }
    if decision.event_over_by == 0 {
        return Err(Error::constraint("event-over height is zero"));
    }
    Ok(())
}

pub fn validate_market(
    tree: &MarketTree,
    rotxn: &RoTxn,
    market: &Market,
) -> Result<(), Error> {
    let branch = require_branch(tree, rotxn, &market.branch_id)?;
    if market.decision_ids.is_empty() {
        return Err(Error::constraint("market lists no decisions"));
    }
    if market.decision_ids.len() != market.decision_functions.len() {
        return Err(Error::constraint(format!(
            "{} decisions but {} decision functions",
            market.decision_ids.len(),
            market.decision_functions.len()
        )));
    }
    // Also bounds the state space.
    lmsr::n_states(market.decision_ids.len())?;
    for decision_id in &market.decision_ids {
        let decision = match tree.try_get_decision(rotxn, decision_id)? {
            Some((decision, _)) => decision,
            None => {
                return Err(Error::NotFound {
                    kind: "decision",
                    id: *decision_id,
                });
            }
        };
        if decision.branch_id != market.branch_id {
            return Err(Error::constraint(format!(
                "decision {decision_id} belongs to a different branch"
            )));
        }
    }
    if market.b == 0 {
        return Err(Error::constraint("liquidity parameter is zero"));
    }
    if market.trading_fee < branch.min_trading_fee {
        return Err(Error::constraint(format!(
            "trading fee {} below branch minimum {}",
            market.trading_fee, branch.min_trading_fee
        )));
    }
    Ok(())
}

pub fn validate_trade(
    tree: &MarketTree,
    rotxn: &RoTxn,
    trade: &Trade,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let market = match tree.try_get_market(rotxn, &trade.market_id)? {
        Some((market, _)) => market,
        None => {
            return Err(Error::NotFound {
                kind: "market",
                id: trade.market_id,
            });
        }
    };
    if trade.n_shares == 0 {
        return Err(Error::constraint("trade moves no shares"));
    }
    if trade.price == 0 {
        return Err(Error::constraint("trade price is zero"));
    }
    let n_states = lmsr::n_states(market.decision_ids.len())?;
    if trade.decision_state >= n_states {
        return Err(Error::constraint(format!(
            "decision state {} out of range for {} states",
            trade.decision_state, n_states
        )));
    }
    if trade.is_buy {
        let trades: Vec<Trade> = tree
            .trades_for_market(rotxn, &trade.market_id, cancel)?
            .into_iter()
            .map(|(_, trade)| trade)
            .collect();
        let quote = lmsr::quote(
            &market,
            &trades,
            true,
            trade.n_shares,
            trade.decision_state,
        )?;
        let declared = trade.price as f64 / COIN as f64;
        if declared < quote.price_per_share - lmsr::PRICE_EPSILON {
            return Err(Error::PriceRejected {
                declared: trade.price,
                minimum: quote.min_acceptable_price(),
            });
        }
    }
    Ok(())
}

fn validate_vote_height(
    branch: &Branch,
    height: u32,
    tip: Option<u32>,
) -> Result<(), Error> {
    if !ballot::is_vote_height(branch.tau, height) {
        return Err(Error::constraint(format!(
            "vote height {height} is not a multiple of tau {}",
            branch.tau
        )));
    }
    if let Some(tip) = tip {
        if height > tip {
            return Err(Error::constraint(format!(
                "vote height {height} is beyond the chain tip {tip}"
            )));
        }
    }
    Ok(())
}

pub fn validate_sealed_vote(
    tree: &MarketTree,
    rotxn: &RoTxn,
    vote: &SealedVote,
    tip: Option<u32>,
) -> Result<(), Error> {
    let branch = require_branch(tree, rotxn, &vote.branch_id)?;
    validate_vote_height(&branch, vote.height, tip)
}

pub fn validate_reveal_vote(
    tree: &MarketTree,
    rotxn: &RoTxn,
    vote: &RevealVote,
    tip: Option<u32>,
) -> Result<(), Error> {
    let branch = require_branch(tree, rotxn, &vote.branch_id)?;
    validate_vote_height(&branch, vote.height, tip)?;
    if tree.try_get_sealed_vote(rotxn, &vote.vote_id)?.is_none() {
        return Err(Error::NotFound {
            kind: "sealed vote",
            id: vote.vote_id,
        });
    }
    if vote.decision_ids.len() != vote.decision_votes.len() {
        return Err(Error::constraint(format!(
            "{} decision ids but {} votes",
            vote.decision_ids.len(),
            vote.decision_votes.len()
        )));
    }
    for decision_id in &vote.decision_ids {
        if tree.try_get_decision(rotxn, decision_id)?.is_none() {
            return Err(Error::NotFound {
                kind: "decision",
                id: *decision_id,
            });
        }
    }
    Ok(())
}

pub fn validate_steal_vote(
    tree: &MarketTree,
    rotxn: &RoTxn,
    vote: &StealVote,
    tip: Option<u32>,
) -> Result<(), Error> {
    let branch = require_branch(tree, rotxn, &vote.branch_id)?;
    validate_vote_height(&branch, vote.height, tip)?;
    if tree.try_get_sealed_vote(rotxn, &vote.vote_id)?.is_none() {
        return Err(Error::NotFound {
            kind: "sealed vote",
            id: vote.vote_id,
        });
    }
    Ok(())
}

pub fn validate_outcome(
    tree: &MarketTree,
    rotxn: &RoTxn,
    outcome: &Outcome,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let branch = require_branch(tree, rotxn, &outcome.branch_id)?;
    if !ballot::is_vote_height(branch.tau, outcome.height) {
        return Err(Error::constraint(format!(
            "outcome height {} is not a multiple of tau {}",
            outcome.height, branch.tau
        )));
    }
    let n_voters = outcome.n_voters();
    for (name, len) in [
        ("old_rep", outcome.old_rep.len()),
        ("this_rep", outcome.this_rep.len()),
        ("smoothed_rep", outcome.smoothed_rep.len()),
        ("na_row", outcome.na_row.len()),
        ("partic_row", outcome.partic_row.len()),
        ("partic_rel", outcome.partic_rel.len()),
        ("row_bonus", outcome.row_bonus.len()),
    ] {
        if len != n_voters {
            return Err(Error::constraint(format!(
                "{name} has {len} entries for {n_voters} voters"
            )));
        }
    }
    let n_decisions = outcome.n_decisions();
    for (name, len) in [
        ("is_scaled", outcome.is_scaled.len()),
        ("first_loading", outcome.first_loading.len()),
        ("decisions_raw", outcome.decisions_raw.len()),
        ("consensus_reward", outcome.consensus_reward.len()),
        ("certainty", outcome.certainty.len()),
        ("na_col", outcome.na_col.len()),
        ("partic_col", outcome.partic_col.len()),
        ("author_bonus", outcome.author_bonus.len()),
        ("decisions_final", outcome.decisions_final.len()),
    ] {
        if len != n_decisions {
            return Err(Error::constraint(format!(
                "{name} has {len} entries for {n_decisions} decisions"
            )));
        }
    }
    if outcome.vote_matrix.len() != n_voters * n_decisions {
        return Err(Error::constraint(format!(
            "vote matrix has {} cells for {n_voters} voters x \
             {n_decisions} decisions",
            outcome.vote_matrix.len()
        )));
    }
    // Exactly one outcome per (branch, tau period).
    for (id, existing) in
        tree.outcomes_for_branch(rotxn, &outcome.branch_id, cancel)?
    {
        if existing.height == outcome.height {
            return Err(Error::constraint(format!(
                "period {} already resolved by outcome {id}",
                outcome.height
            )));
        }
    }
    Ok(())
}
