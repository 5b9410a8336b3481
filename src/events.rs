use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};

use crate::error::{ScanError, ScanResult};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// ERC-20 transfer decoded from a single log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub token_contract: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
}

impl TransferEvent {
    /// `Address` compares raw bytes, so the textual casing of either side is irrelevant.
    pub fn is_receiver(&self, address: Address) -> bool {
        self.to == address
    }

    pub fn is_sender(&self, address: Address) -> bool {
        self.from == address
    }
}

pub fn decode_transfer_event(log: &Log) -> ScanResult<TransferEvent> {
    let tx = log.transaction_hash;
    let topics = log.topics();
    let data = &log.data().data;

    if topics.len() != 3 {
        return Err(ScanError::malformed(
            tx,
            format!("expected 3 topics, got {}", topics.len()),
        ));
    }
    if topics[0] != Transfer::SIGNATURE_HASH {
        return Err(ScanError::malformed(
            tx,
            format!("unexpected event signature {:?}", topics[0]),
        ));
    }
    if data.len() != 32 {
        return Err(ScanError::malformed(
            tx,
            format!("expected a 32 byte amount, got {} bytes", data.len()),
        ));
    }

    let decoded = Transfer::decode_raw_log(topics.iter().copied(), data)
        .map_err(|e| ScanError::malformed(tx, e.to_string()))?;

    Ok(TransferEvent {
        token_contract: log.address(),
        from: decoded.from,
        to: decoded.to,
        amount: decoded.value,
        tx_hash: tx,
        block_number: log.block_number,
    })
}
