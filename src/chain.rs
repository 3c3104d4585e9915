use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers_core::types::{
    Address, Block, BlockId, Bytes, SignatureError, Transaction, H160, H256, U256, U64,
};
use ethers_providers::{Http, Middleware, Provider, ProviderError};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] ProviderError),
    #[error("{0} not found on node")]
    NotFound(String),
    #[error("block {0} has no base fee (pre-fee-market blocks are not supported)")]
    MissingBaseFee(u64),
    #[error("sender recovery failed: {0}")]
    Recovery(#[from] SignatureError),
    #[error("malformed node response: {0}")]
    Malformed(String),
}

/// A mined block as the ingestion engine sees it.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub hash: H256,
    pub number: u64,
    pub timestamp: u64,
    pub base_fee: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub gas_used: u64,
}

/// Read-only view of an Ethereum-compatible node.
///
/// Every call is a single remote round trip: implementations neither retry nor cache.
/// Implementations must tolerate concurrent callers.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_at(&self, number: u64) -> Result<ChainBlock, ChainError>;

    async fn receipt_for(&self, tx_hash: H256) -> Result<ReceiptInfo, ChainError>;

    /// Recovers the signer of `tx` using the signing scheme of its declared chain id.
    fn sender_of(&self, tx: &Transaction) -> Result<Address, ChainError>;

    /// Contract code at `address` as of `block_number`. Empty means not a contract.
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes, ChainError>;

    async fn head_number(&self) -> Result<u64, ChainError>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    async fn block_at(&self, number: u64) -> Result<ChainBlock, ChainError> {
        (**self).block_at(number).await
    }

    async fn receipt_for(&self, tx_hash: H256) -> Result<ReceiptInfo, ChainError> {
        (**self).receipt_for(tx_hash).await
    }

    fn sender_of(&self, tx: &Transaction) -> Result<Address, ChainError> {
        (**self).sender_of(tx)
    }

    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes, ChainError> {
        (**self).code_at(address, block_number).await
    }

    async fn head_number(&self) -> Result<u64, ChainError> {
        (**self).head_number().await
    }
}

#[derive(Clone)]
pub struct EthClient {
    provider: Provider<Http>,
}

impl EthClient {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).context("invalid ETH_RPC_URL")?;
        let transport = Http::new_with_client(url, client);
        let provider = Provider::new(transport);
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainReader for EthClient {
    async fn block_at(&self, number: u64) -> Result<ChainBlock, ChainError> {
        let block_id = BlockId::Number(number.into());
        let block = self
            .provider
            .get_block_with_txs(block_id)
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("block {}", number)))?;
        ChainBlock::try_from(block)
    }

    async fn receipt_for(&self, tx_hash: H256) -> Result<ReceiptInfo, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("receipt for {:#x}", tx_hash)))?;
        let gas_used = receipt
            .gas_used
            .ok_or_else(|| ChainError::Malformed(format!("receipt for {:#x} has no gasUsed", tx_hash)))?;
        Ok(ReceiptInfo {
            gas_used: u256_to_u64(gas_used)
                .ok_or_else(|| ChainError::Malformed("gasUsed exceeds u64".to_string()))?,
        })
    }

    fn sender_of(&self, tx: &Transaction) -> Result<Address, ChainError> {
        recover_sender(tx)
    }

    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes, ChainError> {
        let block_id = BlockId::Number(block_number.into());
        Ok(self.provider.get_code(address, Some(block_id)).await?)
    }

    async fn head_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }
}

impl TryFrom<Block<Transaction>> for ChainBlock {
    type Error = ChainError;

    fn try_from(block: Block<Transaction>) -> Result<Self, Self::Error> {
        let number = block
            .number
            .ok_or_else(|| ChainError::Malformed("block without number (pending?)".to_string()))?
            .as_u64();
        let hash = block
            .hash
            .ok_or_else(|| ChainError::Malformed(format!("block {} without hash", number)))?;
        let base_fee = block
            .base_fee_per_gas
            .ok_or(ChainError::MissingBaseFee(number))?;
        let base_fee = u256_to_u64(base_fee)
            .ok_or_else(|| ChainError::Malformed(format!("block {} base fee exceeds u64", number)))?;
        let timestamp = u256_to_u64(block.timestamp)
            .ok_or_else(|| ChainError::Malformed(format!("block {} timestamp exceeds u64", number)))?;

        Ok(Self {
            hash,
            number,
            timestamp,
            base_fee,
            transactions: block.transactions,
        })
    }
}

/// Recovers the signer of `tx`, hashing it under its declared chain id.
pub fn recover_sender(tx: &Transaction) -> Result<Address, ChainError> {
    Ok(with_declared_chain_id(tx).recover_from()?)
}

/// Some nodes omit `chainId` on EIP-155 legacy transactions; it is still encoded in `v`.
fn with_declared_chain_id(tx: &Transaction) -> Cow<'_, Transaction> {
    let is_legacy = tx.transaction_type.map_or(true, |kind| kind.is_zero());
    if tx.chain_id.is_some() || !is_legacy || tx.v < U64::from(35) {
        return Cow::Borrowed(tx);
    }
    let mut tx = tx.clone();
    tx.chain_id = Some(U256::from((tx.v.as_u64() - 35) / 2));
    Cow::Owned(tx)
}

/// Gas price with legacy semantics: dynamic-fee transactions report their fee cap.
pub fn legacy_gas_price(tx: &Transaction) -> Option<u64> {
    let price = if tx.transaction_type == Some(U64::from(2)) {
        tx.max_fee_per_gas.or(tx.gas_price)
    } else {
        tx.gas_price.or(tx.max_fee_per_gas)
    };
    price.and_then(u256_to_u64)
}

pub fn address_to_lower_hex(addr: H160) -> String {
    format!("0x{:x}", addr)
}

pub fn hash_to_lower_hex(hash: H256) -> String {
    format!("0x{:x}", hash)
}

pub fn u256_to_u64(value: U256) -> Option<u64> {
    let as_u128: u128 = value.try_into().ok()?;
    u64::try_from(as_u128).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::k256::ecdsa::SigningKey;
    use ethers_core::types::transaction::eip2718::TypedTransaction;
    use ethers_core::types::TransactionRequest;
    use ethers_core::utils::secret_key_to_address;

    fn sample_block() -> Block<Transaction> {
        let mut block = Block::<Transaction>::default();
        block.number = Some(U64::from(100u64));
        block.hash = Some(H256::from_low_u64_be(0xb10c));
        block.timestamp = U256::from(1_700_000_000u64);
        block.base_fee_per_gas = Some(U256::from(7u64));
        block
    }

    #[test]
    fn converts_fee_market_block() {
        let mut block = sample_block();
        let mut tx = Transaction::default();
        tx.hash = H256::from_low_u64_be(1);
        block.transactions.push(tx);

        let converted = ChainBlock::try_from(block).unwrap();
        assert_eq!(converted.number, 100);
        assert_eq!(converted.timestamp, 1_700_000_000);
        assert_eq!(converted.base_fee, 7);
        assert_eq!(converted.transactions.len(), 1);
    }

    #[test]
    fn rejects_block_without_base_fee() {
        let mut block = sample_block();
        block.base_fee_per_gas = None;

        let err = ChainBlock::try_from(block).unwrap_err();
        assert!(matches!(err, ChainError::MissingBaseFee(100)));
    }

    #[test]
    fn rejects_pending_block() {
        let mut block = sample_block();
        block.number = None;

        let err = ChainBlock::try_from(block).unwrap_err();
        assert!(matches!(err, ChainError::Malformed(_)));
    }

    /// Signs a legacy transfer under EIP-155 with `chain_id` and returns it as a node would.
    fn signed_legacy_tx(key: &SigningKey, chain_id: u64) -> Transaction {
        let to = Address::from_low_u64_be(0x10);
        let request = TransactionRequest::new()
            .nonce(3u64)
            .to(to)
            .value(1_000u64)
            .gas(21_000u64)
            .gas_price(5_000u64)
            .chain_id(chain_id);
        let sighash = TypedTransaction::Legacy(request).sighash();
        let (signature, recovery_id) = key.sign_prehash_recoverable(sighash.as_bytes()).unwrap();
        let bytes = signature.to_bytes();

        let mut tx = Transaction::default();
        tx.nonce = U256::from(3u64);
        tx.to = Some(to);
        tx.value = U256::from(1_000u64);
        tx.gas = U256::from(21_000u64);
        tx.gas_price = Some(U256::from(5_000u64));
        tx.v = U64::from(u64::from(recovery_id.to_byte()) + 35 + 2 * chain_id);
        tx.r = U256::from_big_endian(&bytes[..32]);
        tx.s = U256::from_big_endian(&bytes[32..]);
        tx.chain_id = Some(U256::from(chain_id));
        tx
    }

    #[test]
    fn recovers_eip155_sender_when_chain_id_is_omitted() {
        let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let expected = secret_key_to_address(&key);
        let mut tx = signed_legacy_tx(&key, 7700);
        assert_eq!(recover_sender(&tx).unwrap(), expected);

        tx.chain_id = None;
        assert_ne!(tx.recover_from().unwrap(), expected);
        assert_eq!(recover_sender(&tx).unwrap(), expected);
    }

    #[test]
    fn pre_eip155_signature_keeps_no_chain_id() {
        let mut tx = Transaction::default();
        tx.v = U64::from(27u64);
        assert!(with_declared_chain_id(&tx).chain_id.is_none());

        tx.v = U64::from(35u64 + 2 * 7700 + 1);
        assert_eq!(with_declared_chain_id(&tx).chain_id, Some(U256::from(7700u64)));

        tx.transaction_type = Some(U64::from(2u64));
        tx.v = U64::from(1u64);
        assert!(with_declared_chain_id(&tx).chain_id.is_none());
    }

    #[test]
    fn legacy_gas_price_prefers_gas_price_then_fee_cap() {
        let mut tx = Transaction::default();
        tx.gas_price = Some(U256::from(1000u64));
        tx.max_fee_per_gas = Some(U256::from(2000u64));
        assert_eq!(legacy_gas_price(&tx), Some(1000));

        tx.gas_price = None;
        assert_eq!(legacy_gas_price(&tx), Some(2000));

        tx.max_fee_per_gas = None;
        assert_eq!(legacy_gas_price(&tx), None);
    }

    #[test]
    fn dynamic_fee_gas_price_is_the_fee_cap() {
        let mut tx = Transaction::default();
        tx.transaction_type = Some(U64::from(2u64));
        // Mined type-2 transactions carry the effective price in gasPrice.
        tx.gas_price = Some(U256::from(1200u64));
        tx.max_fee_per_gas = Some(U256::from(2000u64));
        assert_eq!(legacy_gas_price(&tx), Some(2000));

        tx.max_fee_per_gas = None;
        assert_eq!(legacy_gas_price(&tx), Some(1200));
    }

    #[test]
    fn u256_overflow_is_none() {
        assert_eq!(u256_to_u64(U256::from(u64::MAX)), Some(u64::MAX));
        assert_eq!(u256_to_u64(U256::from(u64::MAX) + 1), None);
    }

    #[test]
    fn hex_formatting_is_lowercase_and_prefixed() {
        assert_eq!(
            address_to_lower_hex(H160::zero()),
            crate::models::ZERO_ADDRESS
        );
        assert!(hash_to_lower_hex(H256::from_low_u64_be(0xAB)).ends_with("ab"));
    }
}
