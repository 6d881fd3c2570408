//! ABI encoding for the batch executor contract.
//!
//! Each trade is encoded as the tuple
//! `(address trader, address fromToken, address toToken, uint256 amount,
//! bytes signature, bool isBroadcaster)` and the whole batch is wrapped in
//! a single `executeBatch(bytes[])` call.

use copybot_types::{Address, Asset, TradeBatch, TradeProposal};

/// Selector of `executeBatch(bytes[])`.
pub const EXECUTE_BATCH_SELECTOR: [u8; 4] = [0xfb, 0x71, 0x9b, 0x60];

const WORD: usize = 32;

/// Maps session assets to their on-ledger token contracts.
#[derive(Clone, Debug)]
pub struct TokenMap {
    pub pyusd: Address,
    pub eth: Address,
}

impl TokenMap {
    pub fn token(&self, asset: Asset) -> &Address {
        match asset {
            Asset::Pyusd => &self.pyusd,
            Asset::Eth => &self.eth,
        }
    }
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&address.to_bytes());
    word
}

fn u128_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn bool_word(value: bool) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 1] = value as u8;
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// The signature travels as raw bytes; broadcasters hand it to us as a hex
/// string.
fn signature_bytes(signature: &str) -> Vec<u8> {
    match signature.strip_prefix("0x") {
        Some(body) => hex::decode(body).unwrap_or_else(|_| signature.as_bytes().to_vec()),
        None => signature.as_bytes().to_vec(),
    }
}

/// ABI-encode one trade proposal as a standalone tuple.
pub fn encode_proposal(proposal: &TradeProposal, tokens: &TokenMap) -> Vec<u8> {
    let signature = signature_bytes(&proposal.signature);

    // Head: five value slots plus the offset to the dynamic signature.
    let head_len = 6 * WORD;
    let mut out = Vec::with_capacity(head_len + WORD + padded_len(signature.len()));
    out.extend_from_slice(&address_word(&proposal.trader));
    out.extend_from_slice(&address_word(tokens.token(proposal.from_asset)));
    out.extend_from_slice(&address_word(tokens.token(proposal.to_asset)));
    out.extend_from_slice(&u128_word(proposal.amount.0));
    out.extend_from_slice(&u128_word(head_len as u128));
    out.extend_from_slice(&bool_word(proposal.is_broadcaster));

    // Tail: signature length and padded bytes.
    out.extend_from_slice(&u128_word(signature.len() as u128));
    out.extend_from_slice(&signature);
    out.resize(head_len + WORD + padded_len(signature.len()), 0);
    out
}

/// Full `executeBatch(bytes[])` calldata for a settlement batch.
pub fn encode_batch_call(batch: &TradeBatch, tokens: &TokenMap) -> Vec<u8> {
    let elements: Vec<Vec<u8>> = batch
        .proposals()
        .iter()
        .map(|p| encode_proposal(p, tokens))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&EXECUTE_BATCH_SELECTOR);
    // Offset to the array, then its length.
    out.extend_from_slice(&u128_word(WORD as u128));
    out.extend_from_slice(&u128_word(elements.len() as u128));

    // Element offsets are relative to the start of the array data area.
    let mut offset = elements.len() * WORD;
    for element in &elements {
        out.extend_from_slice(&u128_word(offset as u128));
        offset += WORD + padded_len(element.len());
    }
    for element in &elements {
        out.extend_from_slice(&u128_word(element.len() as u128));
        out.extend_from_slice(element);
        let tail = padded_len(element.len()) - element.len();
        out.extend_from_slice(&vec![0u8; tail]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use copybot_types::{Amount, TradeDirection};

    fn tokens() -> TokenMap {
        TokenMap {
            pyusd: "0x0000000000000000000000000000000000000013".parse().unwrap(),
            eth: "0x0000000000000000000000000000000000000014".parse().unwrap(),
        }
    }

    fn proposal(is_broadcaster: bool) -> TradeProposal {
        TradeProposal {
            trader: "0x00000000000000000000000000000000000000aa".parse().unwrap(),
            from_asset: Asset::Pyusd,
            to_asset: Asset::Eth,
            amount: Amount::new(1_000_000),
            direction: TradeDirection::Buy,
            signature: "0xdeadbeef".to_string(),
            is_broadcaster,
        }
    }

    #[test]
    fn test_selector_prefix() {
        let mut batch = TradeBatch::new();
        batch.push(proposal(true));
        let calldata = encode_batch_call(&batch, &tokens());
        assert_eq!(&calldata[..4], &EXECUTE_BATCH_SELECTOR);
    }

    #[test]
    fn test_proposal_layout() {
        let encoded = encode_proposal(&proposal(true), &tokens());
        // Six head words, one length word, one padded data word.
        assert_eq!(encoded.len(), 8 * 32);
        // Trader address right-aligned in slot 0.
        assert_eq!(encoded[31], 0xaa);
        // fromToken is the PYUSD contract.
        assert_eq!(encoded[63], 0x13);
        // toToken is the ETH placeholder contract.
        assert_eq!(encoded[95], 0x14);
        // Amount in slot 3.
        assert_eq!(&encoded[124..128], &1_000_000u32.to_be_bytes());
        // Offset to signature bytes is the head length (0xc0).
        assert_eq!(encoded[159], 0xc0);
        // Broadcaster flag in slot 5.
        assert_eq!(encoded[191], 1);
        // Signature: 4-byte length then padded deadbeef.
        assert_eq!(encoded[223], 4);
        assert_eq!(&encoded[224..228], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_batch_offsets_are_word_aligned() {
        let mut batch = TradeBatch::new();
        batch.push(proposal(true));
        batch.push(proposal(false));
        let calldata = encode_batch_call(&batch, &tokens());

        // Array offset word points just past itself.
        assert_eq!(calldata[4 + 31], 0x20);
        // Two elements.
        assert_eq!(calldata[4 + 63], 2);
        assert_eq!((calldata.len() - 4) % 32, 0);
    }

    #[test]
    fn test_empty_signature() {
        let mut p = proposal(false);
        p.signature.clear();
        let encoded = encode_proposal(&p, &tokens());
        // No data words after the zero length.
        assert_eq!(encoded.len(), 7 * 32);
        assert_eq!(encoded[6 * 32 + 31], 0);
    }
}
