/*
 * ABI encoding for ERC20, V2 router and swap helper calls
 */

use ethers::{
    abi::{decode, encode, ParamType, Token as AbiToken},
    types::{Address, Bytes, Log, H256, U256},
    utils::keccak256,
};
use crate::models::{Result, RouterId, SwapError};

const SWAP_V2_EXECUTED: &str = "SwapV2Executed(address,bytes32,address[],uint256,uint256)";
const SWAP_V3_EXECUTED: &str = "SwapV3Executed(address,bytes32,address,address,uint24,uint256,uint256)";

#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(signature: &str, params: &[AbiToken]) -> Bytes {
    let mut call_data = Vec::from(selector(signature));
    call_data.extend_from_slice(&encode(params));
    Bytes::from(call_data)
}

fn address_array(path: &[Address]) -> AbiToken {
    AbiToken::Array(path.iter().copied().map(AbiToken::Address).collect())
}

#[must_use]
pub fn balance_of(owner: Address) -> Bytes {
    encode_call("balanceOf(address)", &[AbiToken::Address(owner)])
}

#[must_use]
pub fn allowance(owner: Address, spender: Address) -> Bytes {
    encode_call(
        "allowance(address,address)",
        &[AbiToken::Address(owner), AbiToken::Address(spender)],
    )
}

#[must_use]
pub fn approve(spender: Address, amount: U256) -> Bytes {
    encode_call(
        "approve(address,uint256)",
        &[AbiToken::Address(spender), AbiToken::Uint(amount)],
    )
}

#[must_use]
pub fn routers(router_id: RouterId) -> Bytes {
    encode_call(
        "routers(bytes32)",
        &[AbiToken::FixedBytes(router_id.0.as_bytes().to_vec())],
    )
}

#[must_use]
pub fn get_amounts_out(amount_in: U256, path: &[Address]) -> Bytes {
    encode_call(
        "getAmountsOut(uint256,address[])",
        &[AbiToken::Uint(amount_in), address_array(path)],
    )
}

#[must_use]
pub fn execute_swap_v2(
    router_id: RouterId,
    amount_in: U256,
    amount_out_min: U256,
    path: &[Address],
    deadline: U256,
) -> Bytes {
    encode_call(
        "executeSwapV2(bytes32,uint256,uint256,address[],uint256)",
        &[
            AbiToken::FixedBytes(router_id.0.as_bytes().to_vec()),
            AbiToken::Uint(amount_in),
            AbiToken::Uint(amount_out_min),
            address_array(path),
            AbiToken::Uint(deadline),
        ],
    )
}

#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn execute_swap_v3_exact_input_single(
    router_id: RouterId,
    token_in: Address,
    token_out: Address,
    fee: u32,
    amount_in: U256,
    amount_out_minimum: U256,
    deadline: U256,
    sqrt_price_limit_x96: U256,
) -> Bytes {
    encode_call(
        "executeSwapV3ExactInputSingle(bytes32,address,address,uint24,uint256,uint256,uint256,uint160)",
        &[
            AbiToken::FixedBytes(router_id.0.as_bytes().to_vec()),
            AbiToken::Address(token_in),
            AbiToken::Address(token_out),
            AbiToken::Uint(fee.into()),
            AbiToken::Uint(amount_in),
            AbiToken::Uint(amount_out_minimum),
            AbiToken::Uint(deadline),
            AbiToken::Uint(sqrt_price_limit_x96),
        ],
    )
}

pub fn decode_uint(data: &[u8]) -> Result<U256> {
    decode(&[ParamType::Uint(256)], data)
        .map_err(|e| SwapError::ContractError(format!("Invalid uint response: {e}")))?
        .into_iter()
        .next()
        .and_then(AbiToken::into_uint)
        .ok_or_else(|| SwapError::ContractError("Empty uint response".to_string()))
}

pub fn decode_address(data: &[u8]) -> Result<Address> {
    decode(&[ParamType::Address], data)
        .map_err(|e| SwapError::ContractError(format!("Invalid address response: {e}")))?
        .into_iter()
        .next()
        .and_then(AbiToken::into_address)
        .ok_or_else(|| SwapError::ContractError("Empty address response".to_string()))
}

pub fn decode_uint_array(data: &[u8]) -> Result<Vec<U256>> {
    let array = decode(&[ParamType::Array(Box::new(ParamType::Uint(256)))], data)
        .map_err(|e| SwapError::ContractError(format!("Invalid uint[] response: {e}")))?
        .into_iter()
        .next()
        .and_then(AbiToken::into_array)
        .ok_or_else(|| SwapError::ContractError("Empty uint[] response".to_string()))?;

    array
        .into_iter()
        .map(|token| {
            token
                .into_uint()
                .ok_or_else(|| SwapError::ContractError("Non-uint array element".to_string()))
        })
        .collect()
}

/// Executed output amount from the helper's swap event, if the receipt carries one.
#[must_use]
pub fn executed_amount_out(logs: &[Log], swap_helper: Address) -> Option<U256> {
    let v2_topic = H256::from(keccak256(SWAP_V2_EXECUTED.as_bytes()));
    let v3_topic = H256::from(keccak256(SWAP_V3_EXECUTED.as_bytes()));

    logs.iter()
        .filter(|log| log.address == swap_helper)
        .find_map(|log| {
            let topic = log.topics.first()?;
            let params = if *topic == v2_topic {
                vec![
                    ParamType::Array(Box::new(ParamType::Address)),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                ]
            } else if *topic == v3_topic {
                vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(24),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                ]
            } else {
                return None;
            };
            decode(&params, &log.data).ok()?.pop()?.into_uint()
        })
}
