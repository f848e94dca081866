//! Record taxonomy for the prediction-market sidechain.
//!
//! Eight record variants travel inside transaction script payloads and are
//! persisted by the market tree: Branch, Decision, Market, Trade, the three
//! vote phases (sealed, reveal, steal) and the per-period Outcome. The
//! leading tag byte of the canonical encoding doubles as the record's
//! primary-index prefix in the store.
//!
//! All monetary and consensus parameters are 64-bit integers in units of
//! 1e-8 of one coin; the engines convert to floating point only inside
//! their own scope.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod hashes;

pub use hashes::{double_sha256, Hash256, KeyId, ObjectId, Txid};

use crate::serialize::record_id;

/// One-byte record tags; the byte is both the enum discriminant on the wire
/// and the primary-key prefix in the store.
pub mod tag {
    pub const BRANCH: u8 = b'B';
    pub const DECISION: u8 = b'D';
    pub const MARKET: u8 = b'M';
    pub const TRADE: u8 = b'T';
    pub const SEALED_VOTE: u8 = b'S';
    pub const REVEAL_VOTE: u8 = b'R';
    pub const STEAL_VOTE: u8 = b'L';
    pub const OUTCOME: u8 = b'O';
}

/// Fixed-point scale: 1 coin = 1e8 units.
pub const COIN: u64 = 100_000_000;

/// Sentinel for "voter did not answer" cells in a stored vote matrix.
pub const VOTE_NA: u64 = u64::MAX;

/// Transform applied to a scaled decision's finalised value when pricing
/// market states at payout time.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum DecisionFunction {
    X1,
    X2,
    X3,
    LnX1,
}

impl DecisionFunction {
    pub fn code(self) -> u8 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X3 => 3,
            Self::LnX1 => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            3 => Some(Self::X3),
            4 => Some(Self::LnX1),
            _ => None,
        }
    }

    /// Apply the transform to an outcome normalised to `[0, 1]`.
    pub fn apply(self, u: f64) -> f64 {
        match self {
            Self::X1 => u,
            Self::X2 => u * u,
            Self::X3 => u * u * u,
            Self::LnX1 => (1.0 + u).ln() / std::f64::consts::LN_2,
        }
    }
}

impl fmt::Display for DecisionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::X1 => "X1",
            Self::X2 => "X2",
            Self::X3 => "X3",
            Self::LnX1 => "LNX1",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown decision function `{0}`")]
pub struct ParseDecisionFunctionError(String);

impl FromStr for DecisionFunction {
    type Err = ParseDecisionFunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X1" => Ok(Self::X1),
            "X2" => Ok(Self::X2),
            "X3" => Ok(Self::X3),
            "LNX1" => Ok(Self::LnX1),
            other => Err(ParseDecisionFunctionError(other.to_owned())),
        }
    }
}

/// A decision reference in a market creation call:
/// `<decision_id>[:<function_code>]`, function defaulting to `X1`.
pub fn parse_decision_spec(
    spec: &str,
) -> Result<(ObjectId, DecisionFunction), ParseDecisionSpecError> {
    let (id_part, function) = match spec.split_once(':') {
        Some((id, code)) => (id, code.parse()?),
        None => (spec, DecisionFunction::X1),
    };
    let id = id_part
        .parse()
        .map_err(|_| ParseDecisionSpecError::InvalidId(id_part.to_owned()))?;
    Ok((id, function))
}

#[derive(Debug, thiserror::Error)]
pub enum ParseDecisionSpecError {
    #[error("invalid decision id `{0}`")]
    InvalidId(String),
    #[error(transparent)]
    Function(#[from] ParseDecisionFunctionError),
}

/// A self-contained prediction-market universe with its own voting cadence.
///
/// Decisions ending in `((n-1)*tau, n*tau]` are balloted at height `n*tau`;
/// sealed ballots are accepted for `ballot_time` blocks after that, reveals
/// for a further `unseal_time`, and the outcome is computed once the reveal
/// window closes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Branch {
    pub name: String,
    pub description: String,
    pub base_listing_fee: u64,
    pub free_decisions: u16,
    pub target_decisions: u16,
    pub max_decisions: u16,
    pub min_trading_fee: u64,
    pub tau: u16,
    pub ballot_time: u16,
    pub unseal_time: u16,
    pub consensus_threshold: u64,
    pub alpha: u64,
    pub tol: u64,
}

impl Branch {
    pub fn id(&self) -> ObjectId {
        record_id(tag::BRANCH, self)
    }
}

/// A question to be resolved by voters: binary, or scaled to `[min, max]`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Decision {
    pub key_id: KeyId,
    pub branch_id: ObjectId,
    pub prompt: String,
    pub event_over_by: u32,
    pub is_scaled: bool,
    pub min: i64,
    pub max: i64,
    pub answer_optionality: bool,
}

impl Decision {
    pub fn id(&self) -> ObjectId {
        record_id(tag::DECISION, self)
    }
}

/// An LMSR combinatorial market over a set of decisions. Each decision
/// contributes one binary dimension, so the state space has `2^k` states.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Market {
    pub key_id: KeyId,
    /// LMSR liquidity parameter, in 1e-8 coin units.
    pub b: u64,
    pub trading_fee: u64,
    pub max_commission: u64,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub maturation: u32,
    pub branch_id: ObjectId,
    pub decision_ids: Vec<ObjectId>,
    pub decision_functions: Vec<DecisionFunction>,
    /// Market-creation proof-of-work parameters; carried but inert.
    pub tx_pow_hash_id: u32,
    pub tx_pow_difficulty: u32,
}

impl Market {
    pub fn id(&self) -> ObjectId {
        record_id(tag::MARKET, self)
    }
}

/// A signed share delta in one state of a market.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Trade {
    pub key_id: KeyId,
    pub market_id: ObjectId,
    pub is_buy: bool,
    pub n_shares: u64,
    pub price: u64,
    pub decision_state: u32,
    pub nonce: u32,
}

impl Trade {
    pub fn id(&self) -> ObjectId {
        record_id(tag::TRADE, self)
    }
}

/// Commitment phase of a ballot: binds a voter to a hidden ballot id for
/// one tau-aligned voting period.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SealedVote {
    pub branch_id: ObjectId,
    /// A multiple of the branch tau.
    pub height: u32,
    pub vote_id: ObjectId,
}

impl SealedVote {
    pub fn id(&self) -> ObjectId {
        record_id(tag::SEALED_VOTE, self)
    }
}

/// Reveal phase: the decision votes behind a previously sealed ballot.
/// Cells equal to `na` mean the voter abstained on that decision.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevealVote {
    pub branch_id: ObjectId,
    pub height: u32,
    /// Id of the sealed vote being revealed.
    pub vote_id: ObjectId,
    pub decision_ids: Vec<ObjectId>,
    pub decision_votes: Vec<u64>,
    pub na: u64,
    pub key_id: KeyId,
}

impl RevealVote {
    pub fn id(&self) -> ObjectId {
        record_id(tag::REVEAL_VOTE, self)
    }
}

/// Supersedes a prior reveal by naming its sealed ballot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StealVote {
    pub branch_id: ObjectId,
    pub height: u32,
    /// Id of the sealed vote being stolen.
    pub vote_id: ObjectId,
}

impl StealVote {
    pub fn id(&self) -> ObjectId {
        record_id(tag::STEAL_VOTE, self)
    }
}

/// One output of the payout transaction produced by an outcome run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PayoutOutput {
    pub key_id: KeyId,
    /// 1e-8 coin units for settlements and bonuses. Reputation
    /// adjustments are signed deltas: a voter whose weight fell carries a
    /// negative amount.
    pub amount: i64,
    pub kind: PayoutKind,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PayoutKind {
    /// Market settlement to a shareholder.
    Settlement(ObjectId),
    /// Votecoin reputation adjustment for a voter.
    Reputation,
    /// Listing bonus to a decision author.
    AuthorBonus(ObjectId),
    /// Participation bonus to a voter.
    VoterBonus,
}

/// The payout transaction handed to the surrounding node after an outcome
/// run. The node owns fee selection, signing and broadcast.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PayoutTransaction {
    pub branch_id: ObjectId,
    pub height: u32,
    pub outputs: Vec<PayoutOutput>,
}

/// The consensus artefact summarising one closed voting period.
///
/// Row vectors are indexed by voter, column vectors by decision; the vote
/// matrix is row-major `n_voters x n_decisions` with [`VOTE_NA`] marking
/// abstentions. All values are 1e-8 fixed point, converted half-up from the
/// engine's doubles.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Outcome {
    pub height: u32,
    pub branch_id: ObjectId,
    pub voter_ids: Vec<KeyId>,
    pub old_rep: Vec<u64>,
    pub this_rep: Vec<u64>,
    pub smoothed_rep: Vec<u64>,
    pub na_row: Vec<u64>,
    pub partic_row: Vec<u64>,
    pub partic_rel: Vec<u64>,
    pub row_bonus: Vec<u64>,
    pub decision_ids: Vec<ObjectId>,
    pub is_scaled: Vec<bool>,
    pub first_loading: Vec<u64>,
    pub decisions_raw: Vec<u64>,
    pub consensus_reward: Vec<u64>,
    pub certainty: Vec<u64>,
    pub na_col: Vec<u64>,
    pub partic_col: Vec<u64>,
    pub author_bonus: Vec<u64>,
    pub decisions_final: Vec<u64>,
    pub vote_matrix: Vec<u64>,
    pub na: u64,
    pub alpha: u64,
    pub tol: u64,
    pub payout: Vec<PayoutOutput>,
}

impl Outcome {
    pub fn id(&self) -> ObjectId {
        record_id(tag::OUTCOME, self)
    }

    pub fn n_voters(&self) -> usize {
        self.voter_ids.len()
    }

    pub fn n_decisions(&self) -> usize {
        self.decision_ids.len()
    }
}

/// A record as it travels in a script payload: the tag byte picks the
/// variant, the payload follows in canonical field order.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MarketObject {
    Branch(Branch),
    Decision(Decision),
    Market(Market),
    Trade(Trade),
    SealedVote(SealedVote),
    RevealVote(RevealVote),
    StealVote(StealVote),
    Outcome(Outcome),
}

impl MarketObject {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Branch(_) => tag::BRANCH,
            Self::Decision(_) => tag::DECISION,
            Self::Market(_) => tag::MARKET,
            Self::Trade(_) => tag::TRADE,
            Self::SealedVote(_) => tag::SEALED_VOTE,
            Self::RevealVote(_) => tag::REVEAL_VOTE,
            Self::StealVote(_) => tag::STEAL_VOTE,
            Self::Outcome(_) => tag::OUTCOME,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Branch(_) => "branch",
            Self::Decision(_) => "decision",
            Self::Market(_) => "market",
            Self::Trade(_) => "trade",
            Self::SealedVote(_) => "sealed vote",
            Self::RevealVote(_) => "reveal vote",
            Self::StealVote(_) => "steal vote",
            Self::Outcome(_) => "outcome",
        }
    }

    /// Content id: double SHA-256 of the canonical bytes.
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Branch(x) => x.id(),
            Self::Decision(x) => x.id(),
            Self::Market(x) => x.id(),
            Self::Trade(x) => x.id(),
            Self::SealedVote(x) => x.id(),
            Self::RevealVote(x) => x.id(),
            Self::StealVote(x) => x.id(),
            Self::Outcome(x) => x.id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_spec_parses_with_default_function() {
        let id = double_sha256(b"decision");
        let (parsed, function) =
            parse_decision_spec(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(function, DecisionFunction::X1);

        let (parsed, function) =
            parse_decision_spec(&format!("{id}:LNX1")).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(function, DecisionFunction::LnX1);
    }

    #[test]
    fn decision_spec_rejects_unknown_function() {
        let id = double_sha256(b"decision");
        assert!(parse_decision_spec(&format!("{id}:X9")).is_err());
    }

    #[test]
    fn decision_function_transforms() {
        assert_eq!(DecisionFunction::X1.apply(0.5), 0.5);
        assert_eq!(DecisionFunction::X2.apply(0.5), 0.25);
        assert_eq!(DecisionFunction::X3.apply(0.5), 0.125);
        // LNX1 maps 0 -> 0 and 1 -> 1.
        assert!(DecisionFunction::LnX1.apply(0.0).abs() < 1e-12);
        assert!((DecisionFunction::LnX1.apply(1.0) - 1.0).abs() < 1e-12);
    }
}
