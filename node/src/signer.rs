//! The hardware-signer contract (`spec.md` §6.3): a synchronous
//! request/reply oracle over a dedicated socket. Cryptographic primitives
//! themselves are out of scope (`spec.md` §1 non-goals) — this core only
//! needs to request a signature and assemble the 2-of-2 witness locally.

use async_trait::async_trait;
use common::amount::Sats;
use common::ids::NodeId;

/// A request to sign the stored commitment transaction.
pub struct SignCommitmentRequest<'a> {
    pub peer_id: NodeId,
    pub channel_db_id: u64,
    pub unsigned_tx_hex: &'a str,
    pub remote_funding_pubkey: [u8; 33],
    pub funding_sats: Sats,
}

#[async_trait]
pub trait SignerClient: Send + Sync {
    /// Request a signature over the stored commitment transaction.
    async fn sign_commitment(
        &self,
        req: SignCommitmentRequest<'_>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Assemble the 2-of-2 multisig witness from our signature and the
/// counterparty's stored signature (`spec.md` §4.5 step 2, §6.3).
pub fn assemble_2of2_witness(our_signature: &[u8], counterparty_signature: &[u8]) -> Vec<u8> {
    // OP_0 placeholder for CHECKMULTISIG's off-by-one, then both signatures.
    let mut witness = Vec::with_capacity(1 + our_signature.len() + counterparty_signature.len());
    witness.push(0u8);
    witness.extend_from_slice(our_signature);
    witness.extend_from_slice(counterparty_signature);
    witness
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn witness_assembly_is_order_stable() {
        let a = assemble_2of2_witness(&[1, 2, 3], &[4, 5]);
        let b = assemble_2of2_witness(&[1, 2, 3], &[4, 5]);
        assert_eq!(a, b);
        assert_eq!(a[0], 0);
    }
}
