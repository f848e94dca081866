//! Canonical record codec.
//!
//! The wire format is consensus-critical: a record's content id is the
//! double SHA-256 of these bytes, so encoding must be deterministic and
//! decoding must accept exactly one encoding per value. Integers of known
//! width are little-endian; byte strings and sequences carry a compact-size
//! length prefix (1, 3, 5 or 9 bytes, minimal form required); booleans are
//! one byte; key ids and record ids are raw 20/32-byte strings.

use thiserror::Error;

use crate::types::{
    tag, Branch, Decision, DecisionFunction, Hash256, KeyId, Market,
    MarketObject, ObjectId, Outcome, PayoutKind, PayoutOutput, RevealVote,
    SealedVote, StealVote, Trade,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEnd { offset: usize },
    #[error("unknown record tag {tag:#04x}")]
    UnknownTag { tag: u8 },
    #[error("length prefix {len} exceeds {remaining} remaining bytes")]
    OversizedLength { len: u64, remaining: usize },
    #[error("non-minimal length prefix at byte {offset}")]
    NonCanonicalLength { offset: usize },
    #[error("invalid boolean byte {value:#04x}")]
    InvalidBool { value: u8 },
    #[error("unknown decision function code {code}")]
    UnknownDecisionFunction { code: u8 },
    #[error("unknown payout kind {kind}")]
    UnknownPayoutKind { kind: u8 },
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("{len} trailing bytes after record")]
    TrailingBytes { len: usize },
}

/// Writes canonical bytes. Infallible; the caller takes the buffer when done.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_compact_size(&mut self, value: u64) {
        if value < 0xFD {
            self.buf.push(value as u8);
        } else if value <= 0xFFFF {
            self.buf.push(0xFD);
            self.buf.extend_from_slice(&(value as u16).to_le_bytes());
        } else if value <= 0xFFFF_FFFF {
            self.buf.push(0xFE);
            self.buf.extend_from_slice(&(value as u32).to_le_bytes());
        } else {
            self.buf.push(0xFF);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_compact_size(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn put_hash(&mut self, hash: &Hash256) {
        self.buf.extend_from_slice(&hash.0);
    }

    pub fn put_key_id(&mut self, key_id: &KeyId) {
        self.buf.extend_from_slice(&key_id.0);
    }
}

/// Reads canonical bytes, tracking its offset for error reporting. Never
/// reads past the end of the input and never allocates more than the
/// remaining input can back.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd {
                offset: self.offset,
            });
        }
        let slice = &self.input[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, DecodeError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidBool { value }),
        }
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("length checked");
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn get_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn get_compact_size(&mut self) -> Result<u64, DecodeError> {
        let start = self.offset;
        let value = match self.get_u8()? {
            0xFD => {
                let v = self.get_u16()? as u64;
                if v < 0xFD {
                    return Err(DecodeError::NonCanonicalLength {
                        offset: start,
                    });
                }
                v
            }
            0xFE => {
                let v = self.get_u32()? as u64;
                if v <= 0xFFFF {
                    return Err(DecodeError::NonCanonicalLength {
                        offset: start,
                    });
                }
                v
            }
            0xFF => {
                let v = self.get_u64()?;
                if v <= 0xFFFF_FFFF {
                    return Err(DecodeError::NonCanonicalLength {
                        offset: start,
                    });
                }
                v
            }
            byte => byte as u64,
        };
        Ok(value)
    }

    /// Read a length prefix for elements of at least `elem_size` bytes each,
    /// rejecting lengths the remaining input cannot possibly back.
    fn get_length(&mut self, elem_size: usize) -> Result<usize, DecodeError> {
        let len = self.get_compact_size()?;
        let needed = len.checked_mul(elem_size.max(1) as u64);
        match needed {
            Some(needed) if needed <= self.remaining() as u64 => {
                Ok(len as usize)
            }
            _ => Err(DecodeError::OversizedLength {
                len,
                remaining: self.remaining(),
            }),
        }
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.get_length(1)?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_str(&mut self) -> Result<String, DecodeError> {
        Ok(String::from_utf8(self.get_bytes()?)?)
    }

    pub fn get_hash(&mut self) -> Result<Hash256, DecodeError> {
        let bytes: [u8; 32] =
            self.take(32)?.try_into().expect("length checked");
        Ok(Hash256(bytes))
    }

    pub fn get_key_id(&mut self) -> Result<KeyId, DecodeError> {
        let bytes: [u8; 20] =
            self.take(20)?.try_into().expect("length checked");
        Ok(KeyId(bytes))
    }

    pub fn get_hash_vec(&mut self) -> Result<Vec<Hash256>, DecodeError> {
        let len = self.get_length(32)?;
        (0..len).map(|_| self.get_hash()).collect()
    }

    pub fn get_key_id_vec(&mut self) -> Result<Vec<KeyId>, DecodeError> {
        let len = self.get_length(20)?;
        (0..len).map(|_| self.get_key_id()).collect()
    }

    pub fn get_u64_vec(&mut self) -> Result<Vec<u64>, DecodeError> {
        let len = self.get_length(8)?;
        (0..len).map(|_| self.get_u64()).collect()
    }

    pub fn get_bool_vec(&mut self) -> Result<Vec<bool>, DecodeError> {
        let len = self.get_length(1)?;
        (0..len).map(|_| self.get_bool()).collect()
    }
}

pub trait Encodable {
    fn encode_into(&self, enc: &mut Encoder);
}

pub trait Decodable: Sized {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError>;
}

/// Content id of a record payload under its tag byte.
pub fn record_id<T: Encodable>(tag: u8, record: &T) -> ObjectId {
    let mut enc = Encoder::new();
    enc.put_u8(tag);
    record.encode_into(&mut enc);
    crate::types::double_sha256(enc.as_bytes())
}

/// Canonical bytes of a full record: tag byte then payload fields.
pub fn encode_object(object: &MarketObject) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put_u8(object.tag());
    match object {
        MarketObject::Branch(x) => x.encode_into(&mut enc),
        MarketObject::Decision(x) => x.encode_into(&mut enc),
        MarketObject::Market(x) => x.encode_into(&mut enc),
        MarketObject::Trade(x) => x.encode_into(&mut enc),
        MarketObject::SealedVote(x) => x.encode_into(&mut enc),
        MarketObject::RevealVote(x) => x.encode_into(&mut enc),
        MarketObject::StealVote(x) => x.encode_into(&mut enc),
        MarketObject::Outcome(x) => x.encode_into(&mut enc),
    }
    enc.into_bytes()
}

/// Decode one record from the front of `bytes`, returning it along with the
/// number of bytes consumed. Used for store values, where the carrier txid
/// follows the record.
pub fn decode_object_prefix(
    bytes: &[u8],
) -> Result<(MarketObject, usize), DecodeError> {
    let mut dec = Decoder::new(bytes);
    let object = match dec.get_u8()? {
        tag::BRANCH => MarketObject::Branch(Branch::decode_from(&mut dec)?),
        tag::DECISION => {
            MarketObject::Decision(Decision::decode_from(&mut dec)?)
        }
        tag::MARKET => MarketObject::Market(Market::decode_from(&mut dec)?),
        tag::TRADE => MarketObject::Trade(Trade::decode_from(&mut dec)?),
        tag::SEALED_VOTE => {
            MarketObject::SealedVote(SealedVote::decode_from(&mut dec)?)
        }
        tag::REVEAL_VOTE => {
            MarketObject::RevealVote(RevealVote::decode_from(&mut dec)?)
        }
        tag::STEAL_VOTE => {
            MarketObject::StealVote(StealVote::decode_from(&mut dec)?)
        }
        tag::OUTCOME => {
            MarketObject::Outcome(Outcome::decode_from(&mut dec)?)
        }
        tag => return Err(DecodeError::UnknownTag { tag }),
    };
    Ok((object, dec.offset()))
}

/// Decode a record that must occupy the whole input, e.g. a script payload.
pub fn decode_object(bytes: &[u8]) -> Result<MarketObject, DecodeError> {
    let (object, consumed) = decode_object_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(DecodeError::TrailingBytes {
            len: bytes.len() - consumed,
        });
    }
    Ok(object)
}

impl Encodable for Branch {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_str(&self.name);
        enc.put_str(&self.description);
        enc.put_u64(self.base_listing_fee);
        enc.put_u16(self.free_decisions);
        enc.put_u16(self.target_decisions);
        enc.put_u16(self.max_decisions);
        enc.put_u64(self.min_trading_fee);
        enc.put_u16(self.tau);
        enc.put_u16(self.ballot_time);
        enc.put_u16(self.unseal_time);
        enc.put_u64(self.consensus_threshold);
        enc.put_u64(self.alpha);
        enc.put_u64(self.tol);
    }
}

impl Decodable for Branch {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: dec.get_str()?,
            description: dec.get_str()?,
            base_listing_fee: dec.get_u64()?,
            free_decisions: dec.get_u16()?,
            target_decisions: dec.get_u16()?,
            max_decisions: dec.get_u16()?,
            min_trading_fee: dec.get_u64()?,
            tau: dec.get_u16()?,
            ballot_time: dec.get_u16()?,
            unseal_time: dec.get_u16()?,
            consensus_threshold: dec.get_u64()?,
            alpha: dec.get_u64()?,
            tol: dec.get_u64()?,
        })
    }
}

impl Encodable for Decision {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_key_id(&self.key_id);
        enc.put_hash(&self.branch_id);
        enc.put_str(&self.prompt);
        enc.put_u32(self.event_over_by);
        enc.put_bool(self.is_scaled);
        enc.put_i64(self.min);
        enc.put_i64(self.max);
        enc.put_bool(self.answer_optionality);
    }
}

impl Decodable for Decision {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            key_id: dec.get_key_id()?,
            branch_id: dec.get_hash()?,
            prompt: dec.get_str()?,
            event_over_by: dec.get_u32()?,
            is_scaled: dec.get_bool()?,
            min: dec.get_i64()?,
            max: dec.get_i64()?,
            answer_optionality: dec.get_bool()?,
        })
    }
}

impl Encodable for Market {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_key_id(&self.key_id);
        enc.put_u64(self.b);
        enc.put_u64(self.trading_fee);
        enc.put_u64(self.max_commission);
        enc.put_str(&self.title);
        enc.put_str(&self.description);
        enc.put_str(&self.tags);
        enc.put_u32(self.maturation);
        enc.put_hash(&self.branch_id);
        enc.put_compact_size(self.decision_ids.len() as u64);
        for id in &self.decision_ids {
            enc.put_hash(id);
        }
        enc.put_compact_size(self.decision_functions.len() as u64);
        for function in &self.decision_functions {
            enc.put_u8(function.code());
        }
        enc.put_u32(self.tx_pow_hash_id);
        enc.put_u32(self.tx_pow_difficulty);
    }
}

impl Decodable for Market {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            key_id: dec.get_key_id()?,
            b: dec.get_u64()?,
            trading_fee: dec.get_u64()?,
            max_commission: dec.get_u64()?,
            title: dec.get_str()?,
            description: dec.get_str()?,
            tags: dec.get_str()?,
            maturation: dec.get_u32()?,
            branch_id: dec.get_hash()?,
            decision_ids: dec.get_hash_vec()?,
            decision_functions: {
                let len = dec.get_length(1)?;
                (0..len)
                    .map(|_| {
                        let code = dec.get_u8()?;
                        DecisionFunction::from_code(code).ok_or(
                            DecodeError::UnknownDecisionFunction { code },
                        )
                    })
                    .collect::<Result<_, _>>()?
            },
            tx_pow_hash_id: dec.get_u32()?,
            tx_pow_difficulty: dec.get_u32()?,
        })
    }
}

impl Encodable for Trade {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_key_id(&self.key_id);
        enc.put_hash(&self.market_id);
        enc.put_bool(self.is_buy);
        enc.put_u64(self.n_shares);
        enc.put_u64(self.price);
        enc.put_u32(self.decision_state);
        enc.put_u32(self.nonce);
    }
}

impl Decodable for Trade {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            key_id: dec.get_key_id()?,
            market_id: dec.get_hash()?,
            is_buy: dec.get_bool()?,
            n_shares: dec.get_u64()?,
            price: dec.get_u64()?,
            decision_state: dec.get_u32()?,
            nonce: dec.get_u32()?,
        })
    }
}

impl Encodable for SealedVote {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_hash(&self.branch_id);
        enc.put_u32(self.height);
        enc.put_hash(&self.vote_id);
    }
}

impl Decodable for SealedVote {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            branch_id: dec.get_hash()?,
            height: dec.get_u32()?,
            vote_id: dec.get_hash()?,
        })
    }
}

impl Encodable for RevealVote {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_hash(&self.branch_id);
        enc.put_u32(self.height);
        enc.put_hash(&self.vote_id);
        enc.put_compact_size(self.decision_ids.len() as u64);
        for id in &self.decision_ids {
            enc.put_hash(id);
        }
        enc.put_compact_size(self.decision_votes.len() as u64);
        for vote in &self.decision_votes {
            enc.put_u64(*vote);
        }
        enc.put_u64(self.na);
        enc.put_key_id(&self.key_id);
    }
}

impl Decodable for RevealVote {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            branch_id: dec.get_hash()?,
            height: dec.get_u32()?,
            vote_id: dec.get_hash()?,
            decision_ids: dec.get_hash_vec()?,
            decision_votes: dec.get_u64_vec()?,
            na: dec.get_u64()?,
            key_id: dec.get_key_id()?,
        })
    }
}

impl Encodable for StealVote {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_hash(&self.branch_id);
        enc.put_u32(self.height);
        enc.put_hash(&self.vote_id);
    }
}

impl Decodable for StealVote {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            branch_id: dec.get_hash()?,
            height: dec.get_u32()?,
            vote_id: dec.get_hash()?,
        })
    }
}

impl Encodable for PayoutOutput {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_key_id(&self.key_id);
        enc.put_i64(self.amount);
        match &self.kind {
            PayoutKind::Settlement(market_id) => {
                enc.put_u8(1);
                enc.put_hash(market_id);
            }
            PayoutKind::Reputation => enc.put_u8(2),
            PayoutKind::AuthorBonus(decision_id) => {
                enc.put_u8(3);
                enc.put_hash(decision_id);
            }
            PayoutKind::VoterBonus => enc.put_u8(4),
        }
    }
}

impl Decodable for PayoutOutput {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let key_id = dec.get_key_id()?;
        let amount = dec.get_i64()?;
        let kind = match dec.get_u8()? {
            1 => PayoutKind::Settlement(dec.get_hash()?),
            2 => PayoutKind::Reputation,
            3 => PayoutKind::AuthorBonus(dec.get_hash()?),
            4 => PayoutKind::VoterBonus,
            kind => return Err(DecodeError::UnknownPayoutKind { kind }),
        };
        Ok(Self {
            key_id,
            amount,
            kind,
        })
    }
}

impl Encodable for Outcome {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u32(self.height);
        enc.put_hash(&self.branch_id);
        enc.put_compact_size(self.voter_ids.len() as u64);
        for id in &self.voter_ids {
            enc.put_key_id(id);
        }
        for row_vec in [
            &self.old_rep,
            &self.this_rep,
            &self.smoothed_rep,
            &self.na_row,
            &self.partic_row,
            &self.partic_rel,
            &self.row_bonus,
        ] {
            enc.put_compact_size(row_vec.len() as u64);
            for value in row_vec {
                enc.put_u64(*value);
            }
        }
        enc.put_compact_size(self.decision_ids.len() as u64);
        for id in &self.decision_ids {
            enc.put_hash(id);
        }
        enc.put_compact_size(self.is_scaled.len() as u64);
        for flag in &self.is_scaled {
            enc.put_bool(*flag);
        }
        for col_vec in [
            &self.first_loading,
            &self.decisions_raw,
            &self.consensus_reward,
            &self.certainty,
            &self.na_col,
            &self.partic_col,
            &self.author_bonus,
            &self.decisions_final,
            &self.vote_matrix,
        ] {
            enc.put_compact_size(col_vec.len() as u64);
            for value in col_vec {
                enc.put_u64(*value);
            }
        }
        enc.put_u64(self.na);
        enc.put_u64(self.alpha);
        enc.put_u64(self.tol);
        enc.put_compact_size(self.payout.len() as u64);
        for output in &self.payout {
            output.encode_into(enc);
        }
    }
}

impl Decodable for Outcome {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            height: dec.get_u32()?,
            branch_id: dec.get_hash()?,
            voter_ids: dec.get_key_id_vec()?,
            old_rep: dec.get_u64_vec()?,
            this_rep: dec.get_u64_vec()?,
            smoothed_rep: dec.get_u64_vec()?,
            na_row: dec.get_u64_vec()?,
            partic_row: dec.get_u64_vec()?,
            partic_rel: dec.get_u64_vec()?,
            row_bonus: dec.get_u64_vec()?,
            decision_ids: dec.get_hash_vec()?,
            is_scaled: dec.get_bool_vec()?,
            first_loading: dec.get_u64_vec()?,
            decisions_raw: dec.get_u64_vec()?,
            consensus_reward: dec.get_u64_vec()?,
            certainty: dec.get_u64_vec()?,
            na_col: dec.get_u64_vec()?,
            partic_col: dec.get_u64_vec()?,
            author_bonus: dec.get_u64_vec()?,
            decisions_final: dec.get_u64_vec()?,
            vote_matrix: dec.get_u64_vec()?,
            na: dec.get_u64()?,
            alpha: dec.get_u64()?,
            tol: dec.get_u64()?,
            payout: {
                let len = dec.get_length(29)?;
                (0..len)
                    .map(|_| PayoutOutput::decode_from(dec))
                    .collect::<Result<_, _>>()?
            },
        })
    }
}
