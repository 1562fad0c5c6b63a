//! The ledger collaborator: the RPC surface the orchestrator needs from a node.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, TxHash, U256};
use backon::Sleeper;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::{
    error::TxError,
    rpc::{self, RpcError},
    tx::SignedTransaction,
    waiter::{PollPolicy, poll_until},
};

/// Result of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// 0 means success, anything else is an on-chain execution failure.
    pub outcome_status: u64,
    /// Set for successful contract deployments.
    pub contract_address: Option<Address>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.outcome_status == 0
    }
}

/// Node operations used by a deployment run.
///
/// Implementations classify their own failures: transport and node errors are
/// [`TxError::Rpc`], anything that signals a certain on-chain failure is fatal.
pub trait Ledger: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64, TxError>> + Send;

    /// Number of transactions from `address` the ledger has executed, i.e. the next nonce.
    fn next_nonce(&self, address: Address) -> impl Future<Output = Result<u64, TxError>> + Send;

    fn balance(&self, address: Address) -> impl Future<Output = Result<U256, TxError>> + Send;

    fn gas_price(&self) -> impl Future<Output = Result<u128, TxError>> + Send;

    fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        input: &Bytes,
    ) -> impl Future<Output = Result<u64, TxError>> + Send;

    fn send_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> impl Future<Output = Result<TxHash, TxError>> + Send;

    /// The receipt for `tx_hash`, or `None` while it is not mined yet.
    fn receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<Receipt>, TxError>> + Send;

    /// Read-only call against the latest state. Uses no nonce.
    fn call(&self, to: Address, input: Bytes)
    -> impl Future<Output = Result<Bytes, TxError>> + Send;
}

/// A sent transaction whose receipt has not been observed yet.
pub struct PendingTransaction<'a, L, S> {
    ledger: &'a L,
    tx_hash: TxHash,
    poll: PollPolicy,
    sleeper: S,
}

impl<'a, L: Ledger, S: Sleeper> PendingTransaction<'a, L, S> {
    pub fn new(ledger: &'a L, tx_hash: TxHash, poll: PollPolicy, sleeper: S) -> Self {
        Self {
            ledger,
            tx_hash,
            poll,
            sleeper,
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Wait until the transaction is mined and return its receipt.
    ///
    /// A failed receipt query ends the wait with that error. The handle stays
    /// usable, so the caller may resolve it again.
    pub async fn resolve(&self) -> Result<Receipt, TxError> {
        let ledger = self.ledger;
        let tx_hash = self.tx_hash;
        poll_until(self.poll, &self.sleeper, || ledger.receipt(tx_hash)).await
    }
}

/// [`Ledger`] backed by an Ethereum JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl JsonRpcLedger {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TxError> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params)
            .await
            .map_err(TxError::Rpc)
    }
}

impl Ledger for JsonRpcLedger {
    async fn chain_id(&self) -> Result<u64, TxError> {
        let id: String = self.request("eth_chainId", vec![]).await?;
        rpc::parse_quantity(&id).map_err(TxError::Rpc)
    }

    async fn next_nonce(&self, address: Address) -> Result<u64, TxError> {
        let count: String = self
            .request(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), serde_json::json!("latest")],
            )
            .await?;
        rpc::parse_quantity(&count).map_err(TxError::Rpc)
    }

    async fn balance(&self, address: Address) -> Result<U256, TxError> {
        self.request(
            "eth_getBalance",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn gas_price(&self) -> Result<u128, TxError> {
        let price: U256 = self.request("eth_gasPrice", vec![]).await?;
        u128::try_from(price).map_err(|_| TxError::fatal(format!("Gas price {price} overflows")))
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        input: &Bytes,
    ) -> Result<u64, TxError> {
        let mut call = serde_json::json!({ "from": from, "data": input });
        if let Some(to) = to {
            call["to"] = serde_json::json!(to);
        }

        let estimate: String = rpc::json_rpc_call(
            &self.client,
            self.url.as_str(),
            "eth_estimateGas",
            vec![call],
        )
        .await
        .map_err(|e| match e.downcast_ref::<RpcError>() {
            // The node already knows this would fail on-chain.
            Some(rpc_error) if rpc_error.is_execution_revert() => TxError::Fatal(e),
            _ => TxError::Rpc(e),
        })?;
        rpc::parse_quantity(&estimate).map_err(TxError::Rpc)
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, TxError> {
        let sent = rpc::json_rpc_call::<TxHash>(
            &self.client,
            self.url.as_str(),
            "eth_sendRawTransaction",
            vec![serde_json::json!(tx.raw)],
        )
        .await;

        match sent {
            Ok(hash) => Ok(hash),
            Err(e)
                if e.downcast_ref::<RpcError>()
                    .is_some_and(|r| r.message.contains("already known")) =>
            {
                tracing::debug!(tx_hash = %tx.hash, "Transaction already in the node's pool");
                Ok(tx.hash)
            }
            Err(e) => Err(TxError::Rpc(e)),
        }
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, TxError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;

        receipt
            .map(|r| -> Result<Receipt, TxError> {
                let status = r
                    .status
                    .as_deref()
                    .map(rpc::parse_quantity)
                    .transpose()
                    .map_err(TxError::Rpc)?;
                // Ethereum reports 1 for success; pre-byzantium receipts carry no status.
                let outcome_status = match status {
                    Some(1) | None => 0,
                    Some(_) => 1,
                };
                Ok(Receipt {
                    tx_hash: r.transaction_hash,
                    outcome_status,
                    contract_address: r.contract_address,
                })
            })
            .transpose()
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, TxError> {
        self.request(
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": input }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_success() {
        let receipt = Receipt {
            tx_hash: TxHash::ZERO,
            outcome_status: 0,
            contract_address: None,
        };
        assert!(receipt.succeeded());
        assert!(!Receipt {
            outcome_status: 1,
            ..receipt
        }
        .succeeded());
    }

    #[test]
    fn test_rpc_receipt_deserialization() {
        let value = serde_json::json!({
            "transactionHash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x1"
        });
        let receipt: RpcReceipt = serde_json::from_value(value).unwrap();
        assert_eq!(receipt.status.as_deref(), Some("0x1"));
        assert!(receipt.contract_address.is_some());

        let value = serde_json::json!({
            "transactionHash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "status": "0x0",
            "contractAddress": null
        });
        let receipt: RpcReceipt = serde_json::from_value(value).unwrap();
        assert!(receipt.contract_address.is_none());
    }
}
