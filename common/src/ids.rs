//! Identifiers shared across the control plane: node ids, channel ids,
//! short-channel-ids, and funding outpoints.
//!
//! `channel_id = SHA256(funding_txid || u16_be(funding_outnum))` everywhere
//! it is exposed, per the universal invariant in `spec.md` §8.

use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::Context;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// A node's persistent 33-byte public identity.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId(pub PublicKey);

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        PublicKey::from_str(s)
            .map(NodeId)
            .context("Invalid node public key")
    }
}

/// A channel's funding outpoint: the (txid, output-index) locking the
/// channel's satoshi balance.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct FundingOutpoint {
    pub txid: Txid,
    pub output_index: u16,
}

impl FundingOutpoint {
    /// `channel_id = SHA256(funding_txid || u16_be(funding_outnum))`.
    pub fn channel_id(&self) -> ChannelId {
        let mut engine = sha256::Hash::engine();
        engine.input(self.txid.as_inner());
        engine.input(&self.output_index.to_be_bytes());
        ChannelId(sha256::Hash::from_engine(engine).into_inner())
    }
}

impl Display for FundingOutpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.output_index)
    }
}

impl FromStr for FundingOutpoint {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.split(':');
        let txid_str = parts.next().context("Missing <txid> in <txid>:<index>")?;
        let index_str =
            parts.next().context("Missing <index> in <txid>:<index>")?;
        anyhow::ensure!(parts.next().is_none(), "Too many ':'-separated parts");
        let txid = Txid::from_str(txid_str).context("Invalid txid")?;
        let output_index =
            u16::from_str(index_str).context("Invalid output index")?;
        Ok(Self { txid, output_index })
    }
}

/// The SHA-256 of a channel's funding outpoint, used in wire messages.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub [u8; 32]);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({self})")
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ChannelId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s).context("Invalid hex")?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("channel_id must be 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// A compact `(block_height, tx_index, output_index)` triple used for
/// routing, assigned once a channel's funding transaction is buried.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

impl ShortChannelId {
    /// Construct a short-channel-id, rejecting fields that don't fit the
    /// wire encoding (24 bits block height / tx index, 16 bits output index).
    pub fn new(
        block_height: u32,
        tx_index: u32,
        output_index: u16,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            block_height <= 0x00FF_FFFF,
            "block height {block_height} overflows 24 bits"
        );
        anyhow::ensure!(
            tx_index <= 0x00FF_FFFF,
            "tx index {tx_index} overflows 24 bits"
        );
        Ok(Self {
            block_height,
            tx_index,
            output_index,
        })
    }

    /// Pack into the u64 wire representation.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.block_height) << 40)
            | (u64::from(self.tx_index) << 16)
            | u64::from(self.output_index)
    }
}

impl Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height, self.tx_index, self.output_index
        )
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn channel_id_is_stable_hash_of_outpoint() {
        let txid = Txid::from_str(
            "abababababababababababababababababababababababababababababab",
        )
        .unwrap();
        let op = FundingOutpoint {
            txid,
            output_index: 1,
        };
        let id1 = op.channel_id();
        let id2 = op.channel_id();
        assert_eq!(id1, id2);

        let op_different_index = FundingOutpoint {
            txid,
            output_index: 2,
        };
        assert_ne!(id1, op_different_index.channel_id());
    }

    #[test]
    fn channel_id_roundtrips_through_hex() {
        let txid = Txid::from_str(
            "abababababababababababababababababababababababababababababab",
        )
        .unwrap();
        let id = FundingOutpoint {
            txid,
            output_index: 0,
        }
        .channel_id();
        let roundtripped = ChannelId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, roundtripped);
    }

    #[test]
    fn short_channel_id_packs_and_displays() {
        let scid = ShortChannelId::new(700_000, 1, 0).unwrap();
        assert_eq!(scid.to_string(), "700000x1x0");
        assert!(ShortChannelId::new(0x0100_0000, 0, 0).is_err());
    }
}
