use log::debug;

use crate::chain::{Amount, ChainReadError, ChainReader, TokenId};
use crate::wallet::ResolvedAddress;

/// Live ERC1155 balance of `token_id` at the resolved holder. A holder with
/// no tokens reads as zero; only RPC failures are errors.
pub async fn probe(
    resolved: &ResolvedAddress,
    token_id: TokenId,
    reader: &dyn ChainReader,
) -> Result<Amount, ChainReadError> {
    let balance = reader.balance_of(resolved.address, token_id).await?;
    debug!("balanceOf({}, {}) = {}", resolved.address, token_id, balance);
    Ok(balance)
}
