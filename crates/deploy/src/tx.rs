//! Legacy (EIP-155) transaction building and signing.

use alloy_core::{
    primitives::{Address, Bytes, TxHash, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};

use crate::account::Account;

/// Parameters of one transaction, before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract from `input`.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// A signed transaction ready for submission.
///
/// The hash is computed locally so a caller can look the transaction up even
/// when the node's response to the send was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub from: Address,
    pub request: TxRequest,
    pub raw: Bytes,
    pub hash: TxHash,
}

impl TxRequest {
    fn encode_common(&self, payload: &mut Vec<u8>) {
        self.nonce.encode(payload);
        self.gas_price.encode(payload);
        self.gas_limit.encode(payload);
        match &self.to {
            Some(to) => to.encode(payload),
            None => payload.push(EMPTY_STRING_CODE),
        }
        self.value.encode(payload);
        self.input.encode(payload);
    }

    /// Hash signed over: `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self) -> TxHash {
        let mut payload = Vec::new();
        self.encode_common(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);
        keccak256(wrap_list(payload))
    }

    pub fn sign(self, account: &Account) -> Result<SignedTransaction, anyhow::Error> {
        let signature = account.sign_hash(&self.signing_hash())?;
        let v = self.chain_id * 2 + 35 + u64::from(signature.recovery_id);

        let mut payload = Vec::new();
        self.encode_common(&mut payload);
        v.encode(&mut payload);
        U256::from_be_bytes(signature.r.0).encode(&mut payload);
        U256::from_be_bytes(signature.s.0).encode(&mut payload);

        let raw = Bytes::from(wrap_list(payload));
        let hash = keccak256(&raw);

        Ok(SignedTransaction {
            from: account.address(),
            request: self,
            raw,
            hash,
        })
    }
}

fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> TxRequest {
        TxRequest {
            chain_id: 1,
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
            value: U256::from(1_000_000_000_000_000_000u128),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_eip155_signing_hash() {
        // Reference vector from EIP-155.
        let expected: TxHash =
            "0xdaf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
                .parse()
                .unwrap();
        assert_eq!(sample_request().signing_hash(), expected);
    }

    #[test]
    fn test_eip155_signed_bytes() {
        let account = Account::from_private_key(
            "0x4646464646464646464646464646464646464646464646464646464646464646",
        )
        .unwrap();
        let signed = sample_request().sign(&account).unwrap();
        let expected = "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83";
        assert_eq!(hex::encode(&signed.raw), expected);
        assert_eq!(signed.hash, keccak256(&signed.raw));
        assert_eq!(signed.from, account.address());
    }

    #[test]
    fn test_contract_creation_encodes_empty_to() {
        let mut request = sample_request();
        request.to = None;
        request.input = Bytes::from_static(&[0x60, 0x80]);
        let mut payload = Vec::new();
        request.encode_common(&mut payload);
        // nonce, gasPrice, gas, then the empty `to` string
        assert!(payload.contains(&EMPTY_STRING_CODE));
        assert_ne!(request.signing_hash(), sample_request().signing_hash());
    }
}
