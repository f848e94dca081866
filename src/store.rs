//! The market tree: one ordered LMDB keyspace holding every market record.
//!
//! Every key is a fixed-structure tuple with a one-character leading tag.
//! Upper-case tags are primary keys (`tag || record id`); lower-case tags
//! are secondary indexes written alongside the primary in the same batch.
//! Values are the record's canonical bytes followed by the 32-byte carrier
//! transaction id.
//!
//! LMDB gives the required sharing discipline for free: many concurrent
//! readers over an ordered snapshot, one writer at a time, atomic commit of
//! a whole write transaction.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use heed::{types::Bytes, Database, Env, RoTxn, RwTxn};
use thiserror::Error;
use tracing::instrument;

use crate::{
    serialize::{self, DecodeError},
    types::{
        tag, Branch, Decision, Market, MarketObject, ObjectId, Outcome,
        RevealVote, SealedVote, StealVote, Trade, Txid,
    },
};

/// Secondary-index tags. Each lower-case tag mirrors the upper-case primary
/// family it indexes.
pub mod index {
    /// `('d', branch_id, decision_id)` — decisions of a branch.
    pub const BRANCH_DECISION: u8 = b'd';
    /// `('m', decision_id, market_id)` — markets listing a decision.
    pub const DECISION_MARKET: u8 = b'm';
    /// `('t', market_id, trade_id)` — trades of a market.
    pub const MARKET_TRADE: u8 = b't';
    /// `('o', branch_id, outcome_id)` — outcomes of a branch.
    pub const BRANCH_OUTCOME: u8 = b'o';
    /// `('s', branch_id, height, vote_id)` — sealed votes of a period.
    pub const BRANCH_SEALED: u8 = b's';
    /// `('r', branch_id, height, vote_id)` — reveal votes of a period.
    pub const BRANCH_REVEAL: u8 = b'r';
    /// `('l', branch_id, height, vote_id)` — steal votes of a period.
    pub const BRANCH_STEAL: u8 = b'l';
}

/// Byte-exact key construction: tag byte, 32-byte ids in network order,
/// `u32` heights little-endian.
pub mod keys {
    use super::*;

    pub fn primary(tag: u8, id: &ObjectId) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(tag);
        key.extend_from_slice(&id.0);
        key
    }

    pub fn pair(tag: u8, first: &ObjectId, second: &ObjectId) -> Vec<u8> {
        let mut key = Vec::with_capacity(65);
        key.push(tag);
        key.extend_from_slice(&first.0);
        key.extend_from_slice(&second.0);
        key
    }

    pub fn vote(
        tag: u8,
        branch_id: &ObjectId,
        height: u32,
        vote_id: &ObjectId,
    ) -> Vec<u8> {
        let mut key = Vec::with_capacity(69);
        key.push(tag);
        key.extend_from_slice(&branch_id.0);
        key.extend_from_slice(&height.to_le_bytes());
        key.extend_from_slice(&vote_id.0);
        key
    }

    pub fn tag_prefix(tag: u8) -> Vec<u8> {
        vec![tag]
    }

    pub fn pair_prefix(tag: u8, first: &ObjectId) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(tag);
        key.extend_from_slice(&first.0);
        key
    }

    pub fn vote_prefix(
        tag: u8,
        branch_id: &ObjectId,
        height: u32,
    ) -> Vec<u8> {
        let mut key = Vec::with_capacity(37);
        key.push(tag);
        key.extend_from_slice(&branch_id.0);
        key.extend_from_slice(&height.to_le_bytes());
        key
    }
}

/// Cooperative cancellation flag polled by scans and long computations.
/// Cancelled operations surface [`StoreError::Cancelled`] and leave no
/// partial state behind.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate record {id}")]
    Duplicate { id: ObjectId },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("record under key family {family:?} has tag {found:?}")]
    TagMismatch { family: char, found: char },
    #[error("value too short for carrier txid")]
    TruncatedValue,
    #[error("key too short for a record id")]
    MalformedKey,
    /// Unexpected failure from the underlying database. Fatal: the caller
    /// is expected to halt rather than retry.
    #[error("store corruption: {0}")]
    Corruption(#[from] heed::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// One staged write: a key, its value, and (for primary keys) the record id
/// used for duplicate reporting.
#[derive(Clone, Debug)]
pub struct BatchEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub primary: Option<ObjectId>,
}

/// Lazy ordered prefix scan. Keys come back in strictly increasing byte
/// order; the token is polled at every advance.
pub struct Scan<'txn> {
    inner: heed::RoPrefix<'txn, Bytes, Bytes>,
    cancel: CancelToken,
}

impl<'txn> Iterator for Scan<'txn> {
    type Item = Result<(&'txn [u8], &'txn [u8]), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return Some(Err(StoreError::Cancelled));
        }
        match self.inner.next() {
            Some(Ok(entry)) => Some(Ok(entry)),
            Some(Err(err)) => Some(Err(err.into())),
            None => None,
        }
    }
}

/// Handle to the market record keyspace. Opened from the enclosing node's
/// environment at startup and passed explicitly to everything that reads or
/// writes records.
#[derive(Clone)]
pub struct MarketTree {
    records: Database<Bytes, Bytes>,
}

impl MarketTree {
    pub const NUM_DBS: u32 = 1;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, StoreError> {
        let records = env.create_database(rwtxn, Some("markettree"))?;
        tracing::debug!("market tree opened");
        Ok(Self { records })
    }

    pub fn exists(
        &self,
        rotxn: &RoTxn,
        key: &[u8],
    ) -> Result<bool, StoreError> {
        Ok(self.records.get(rotxn, key)?.is_some())
    }

    /// Raw value under a key: `(record, carrier txid)`.
    pub fn try_get(
        &self,
        rotxn: &RoTxn,
        key: &[u8],
    ) -> Result<Option<(MarketObject, Txid)>, StoreError> {
        match self.records.get(rotxn, key)? {
            Some(value) => Ok(Some(split_value(value)?)),
            None => Ok(None),
        }
    }

    /// Stage-and-commit a set of records: every primary and secondary key
    /// lands, or (on any error, including a duplicate primary) the caller
    /// aborts the transaction and nothing lands.
    #[instrument(skip_all, fields(entries = batch.len()))]
    pub fn put_batch(
        &self,
        rwtxn: &mut RwTxn,
        batch: &[BatchEntry],
    ) -> Result<(), StoreError> {
        for entry in batch {
            if let Some(id) = entry.primary {
                if self.records.get(rwtxn, &entry.key)?.is_some() {
                    return Err(StoreError::Duplicate { id });
                }
            }
        }
        for entry in batch {
            self.records.put(rwtxn, &entry.key, &entry.value)?;
        }
        Ok(())
    }

    /// Lazy ordered iteration over keys starting with `prefix`.
    pub fn scan<'txn>(
        &self,
        rotxn: &'txn RoTxn,
        prefix: &[u8],
        cancel: &CancelToken,
    ) -> Result<Scan<'txn>, StoreError> {
        let inner = self.records.prefix_iter(rotxn, prefix)?;
        Ok(Scan {
            inner,
            cancel: cancel.clone(),
        })
    }

    pub fn try_get_branch(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(Branch, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::BRANCH, id))? {
            Some((MarketObject::Branch(branch), txid)) => {
                Ok(Some((branch, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::BRANCH, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_decision(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(Decision, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::DECISION, id))? {
            Some((MarketObject::Decision(decision), txid)) => {
                Ok(Some((decision, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::DECISION, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_market(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(Market, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::MARKET, id))? {
            Some((MarketObject::Market(market), txid)) => {
                Ok(Some((market, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::MARKET, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_trade(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(Trade, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::TRADE, id))? {
            Some((MarketObject::Trade(trade), txid)) => {
                Ok(Some((trade, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::TRADE, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_sealed_vote(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(SealedVote, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::SEALED_VOTE, id))? {
            Some((MarketObject::SealedVote(vote), txid)) => {
                Ok(Some((vote, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::SEALED_VOTE, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_reveal_vote(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(RevealVote, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::REVEAL_VOTE, id))? {
            Some((MarketObject::RevealVote(vote), txid)) => {
                Ok(Some((vote, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::REVEAL_VOTE, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_steal_vote(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(StealVote, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::STEAL_VOTE, id))? {
            Some((MarketObject::StealVote(vote), txid)) => {
                Ok(Some((vote, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::STEAL_VOTE, &other)),
            None => Ok(None),
        }
    }

    pub fn try_get_outcome(
        &self,
        rotxn: &RoTxn,
        id: &ObjectId,
    ) -> Result<Option<(Outcome, Txid)>, StoreError> {
        match self.try_get(rotxn, &keys::primary(tag::OUTCOME, id))? {
            Some((MarketObject::Outcome(outcome), txid)) => {
                Ok(Some((outcome, txid)))
            }
            Some((other, _)) => Err(mismatch(tag::OUTCOME, &other)),
            None => Ok(None),
        }
    }

    /// All branches, in id order.
    pub fn branches(
        &self,
        rotxn: &RoTxn,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Branch)>, StoreError> {
        let mut branches = Vec::new();
        for entry in
            self.scan(rotxn, &keys::tag_prefix(tag::BRANCH), cancel)?
        {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::Branch(branch) => {
                    branches.push((key_suffix_id(key)?, branch));
                }
                other => return Err(mismatch(tag::BRANCH, &other)),
            }
        }
        Ok(branches)
    }

    /// Decisions of a branch, in decision-id order.
    pub fn decisions_in_branch(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Decision)>, StoreError> {
        let prefix = keys::pair_prefix(index::BRANCH_DECISION, branch_id);
        let mut decisions = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::Decision(decision) => {
                    decisions.push((key_suffix_id(key)?, decision));
                }
                other => return Err(mismatch(tag::DECISION, &other)),
            }
        }
        Ok(decisions)
    }

    /// Markets listing a decision, in market-id order.
    pub fn markets_for_decision(
        &self,
        rotxn: &RoTxn,
        decision_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Market)>, StoreError> {
        let prefix = keys::pair_prefix(index::DECISION_MARKET, decision_id);
        let mut markets = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::Market(market) => {
                    markets.push((key_suffix_id(key)?, market));
                }
                other => return Err(mismatch(tag::MARKET, &other)),
            }
        }
        Ok(markets)
    }

    /// Trades of a market, in trade-id order. Trade ids are content hashes,
    /// so the order is total and reproduced identically on every scan.
    pub fn trades_for_market(
        &self,
        rotxn: &RoTxn,
        market_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Trade)>, StoreError> {
        let prefix = keys::pair_prefix(index::MARKET_TRADE, market_id);
        let mut trades = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::Trade(trade) => {
                    trades.push((key_suffix_id(key)?, trade));
                }
                other => return Err(mismatch(tag::TRADE, &other)),
            }
        }
        Ok(trades)
    }

    /// Outcomes of a branch, in outcome-id order.
    pub fn outcomes_for_branch(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, Outcome)>, StoreError> {
        let prefix = keys::pair_prefix(index::BRANCH_OUTCOME, branch_id);
        let mut outcomes = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::Outcome(outcome) => {
                    outcomes.push((key_suffix_id(key)?, outcome));
                }
                other => return Err(mismatch(tag::OUTCOME, &other)),
            }
        }
        Ok(outcomes)
    }

    /// Sealed votes of one `(branch, height)` period, in vote-id order.
    pub fn sealed_votes_for_period(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        height: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, SealedVote)>, StoreError> {
        let prefix =
            keys::vote_prefix(index::BRANCH_SEALED, branch_id, height);
        let mut votes = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::SealedVote(vote) => {
                    votes.push((key_suffix_id(key)?, vote));
                }
                other => return Err(mismatch(tag::SEALED_VOTE, &other)),
            }
        }
        Ok(votes)
    }

    /// Reveal votes of one `(branch, height)` period, in vote-id order.
    pub fn reveal_votes_for_period(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        height: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, RevealVote)>, StoreError> {
        let prefix =
            keys::vote_prefix(index::BRANCH_REVEAL, branch_id, height);
        let mut votes = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::RevealVote(vote) => {
                    votes.push((key_suffix_id(key)?, vote));
                }
                other => return Err(mismatch(tag::REVEAL_VOTE, &other)),
            }
        }
        Ok(votes)
    }

    /// Steal votes of one `(branch, height)` period, in vote-id order.
    pub fn steal_votes_for_period(
        &self,
        rotxn: &RoTxn,
        branch_id: &ObjectId,
        height: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<(ObjectId, StealVote)>, StoreError> {
        let prefix =
            keys::vote_prefix(index::BRANCH_STEAL, branch_id, height);
        let mut votes = Vec::new();
        for entry in self.scan(rotxn, &prefix, cancel)? {
            let (key, value) = entry?;
            let (object, _) = split_value(value)?;
            match object {
                MarketObject::StealVote(vote) => {
                    votes.push((key_suffix_id(key)?, vote));
                }
                other => return Err(mismatch(tag::STEAL_VOTE, &other)),
            }
        }
        Ok(votes)
    }
}

/// The set of keys a record is stored under: its primary key plus every
/// secondary index its schema demands. Exhaustive over the taxonomy, so a
/// new variant cannot silently skip its indexes.
pub fn write_set(
    object: &MarketObject,
    txid: &Txid,
) -> Vec<BatchEntry> {
    let id = object.id();
    let mut value = serialize::encode_object(object);
    value.extend_from_slice(&txid.0);

    let mut entries = vec![BatchEntry {
        key: keys::primary(object.tag(), &id),
        value: value.clone(),
        primary: Some(id),
    }];
    let mut secondary = |key: Vec<u8>| {
        entries.push(BatchEntry {
            key,
            value: value.clone(),
            primary: None,
        });
    };
    match object {
        MarketObject::Branch(_) => {}
        MarketObject::Decision(decision) => {
            secondary(keys::pair(
                index::BRANCH_DECISION,
                &decision.branch_id,
                &id,
            ));
        }
        MarketObject::Market(market) => {
            for decision_id in &market.decision_ids {
                secondary(keys::pair(
                    index::DECISION_MARKET,
                    decision_id,
                    &id,
                ));
            }
        }
        MarketObject::Trade(trade) => {
            secondary(keys::pair(index::MARKET_TRADE, &trade.market_id, &id));
        }
        MarketObject::SealedVote(vote) => {
            secondary(keys::vote(
                index::BRANCH_SEALED,
                &vote.branch_id,
                vote.height,
                &id,
            ));
        }
        MarketObject::RevealVote(vote) => {
            secondary(keys::vote(
                index::BRANCH_REVEAL,
                &vote.branch_id,
                vote.height,
                &id,
            ));
        }
        MarketObject::StealVote(vote) => {
            secondary(keys::vote(
                index::BRANCH_STEAL,
                &vote.branch_id,
                vote.height,
                &id,
            ));
        }
        MarketObject::Outcome(outcome) => {
            secondary(keys::pair(
                index::BRANCH_OUTCOME,
                &outcome.branch_id,
                &id,
            ));
        }
    }
    entries
}

fn split_value(value: &[u8]) -> Result<(MarketObject, Txid), StoreError> {
    let (object, consumed) = serialize::decode_object_prefix(value)?;
    let rest = &value[consumed..];
    if rest.len() != 32 {
        return Err(StoreError::TruncatedValue);
    }
    let txid_bytes: [u8; 32] = rest.try_into().expect("length checked");
    Ok((object, Txid::from(txid_bytes)))
}

/// The record id is the trailing 32 bytes of every primary and secondary
/// key.
fn key_suffix_id(key: &[u8]) -> Result<ObjectId, StoreError> {
    if key.len() < 32 {
        return Err(StoreError::MalformedKey);
    }
    let tail: [u8; 32] = key[key.len() - 32..]
        .try_into()
        .expect("length checked");
    Ok(ObjectId::from(tail))
}

fn mismatch(family: u8, found: &MarketObject) -> StoreError {
    StoreError::TagMismatch {
        family: family as char,
        found: found.tag() as char,
    }
}
