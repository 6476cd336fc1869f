//! Calldata encoding and return data decoding for the handful of contracts we touch

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::{id, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// ERC-4626 `Deposit(address indexed sender, address indexed owner, uint256 assets, uint256 shares)`
pub const DEPOSIT_EVENT: &str = "Deposit(address,address,uint256,uint256)";
/// ERC-4626 `Withdraw(address indexed sender, address indexed receiver, address indexed owner, uint256 assets, uint256 shares)`
pub const WITHDRAW_EVENT: &str = "Withdraw(address,address,address,uint256,uint256)";

const PERMIT_TYPE: &str = "Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";

/// One entry of a bundler3 `multicall`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlerCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub skip_revert: bool,
    pub callback_hash: H256,
}

impl BundlerCall {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self { to, data, value: U256::zero(), skip_revert: false, callback_hash: H256::zero() }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn skipping_revert(mut self) -> Self {
        self.skip_revert = true;
        self
    }

    fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.to),
            Token::Bytes(self.data.to_vec()),
            Token::Uint(self.value),
            Token::Bool(self.skip_revert),
            Token::FixedBytes(self.callback_hash.as_bytes().to_vec()),
        ])
    }
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

pub fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
}

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature))
}

// --- reads ---

pub fn balance_of(owner: Address) -> Bytes {
    encode_call("balanceOf(address)", &[Token::Address(owner)])
}

pub fn allowance(owner: Address, spender: Address) -> Bytes {
    encode_call("allowance(address,address)", &[Token::Address(owner), Token::Address(spender)])
}

pub fn decimals() -> Bytes {
    encode_call("decimals()", &[])
}

pub fn nonces(owner: Address) -> Bytes {
    encode_call("nonces(address)", &[Token::Address(owner)])
}

pub fn domain_separator() -> Bytes {
    encode_call("DOMAIN_SEPARATOR()", &[])
}

pub fn asset() -> Bytes {
    encode_call("asset()", &[])
}

pub fn total_assets() -> Bytes {
    encode_call("totalAssets()", &[])
}

pub fn total_supply() -> Bytes {
    encode_call("totalSupply()", &[])
}

pub fn convert_to_shares(assets: U256) -> Bytes {
    encode_call("convertToShares(uint256)", &[Token::Uint(assets)])
}

pub fn withdraw_queue_length() -> Bytes {
    encode_call("withdrawQueueLength()", &[])
}

pub fn withdraw_queue(index: usize) -> Bytes {
    encode_call("withdrawQueue(uint256)", &[Token::Uint(U256::from(index))])
}

pub fn id_to_market_params(market_id: H256) -> Bytes {
    encode_call("idToMarketParams(bytes32)", &[Token::FixedBytes(market_id.as_bytes().to_vec())])
}

// --- writes ---

pub fn approve(spender: Address, amount: U256) -> Bytes {
    encode_call("approve(address,uint256)", &[Token::Address(spender), Token::Uint(amount)])
}

pub fn permit(owner: Address, spender: Address, value: U256, deadline: U256, signature: &Signature) -> Bytes {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    signature.r.to_big_endian(&mut r);
    signature.s.to_big_endian(&mut s);
    encode_call(
        "permit(address,address,uint256,uint256,uint8,bytes32,bytes32)",
        &[
            Token::Address(owner),
            Token::Address(spender),
            Token::Uint(value),
            Token::Uint(deadline),
            Token::Uint(U256::from(signature.v)),
            Token::FixedBytes(r.to_vec()),
            Token::FixedBytes(s.to_vec()),
        ],
    )
}

pub fn wrap_native(amount: U256, receiver: Address) -> Bytes {
    encode_call("wrapNative(uint256,address)", &[Token::Uint(amount), Token::Address(receiver)])
}

pub fn erc20_transfer_from(token: Address, receiver: Address, amount: U256) -> Bytes {
    encode_call(
        "erc20TransferFrom(address,address,uint256)",
        &[Token::Address(token), Token::Address(receiver), Token::Uint(amount)],
    )
}

pub fn erc4626_deposit(vault: Address, assets: U256, max_share_price_e27: U256, receiver: Address) -> Bytes {
    encode_call(
        "erc4626Deposit(address,uint256,uint256,address)",
        &[
            Token::Address(vault),
            Token::Uint(assets),
            Token::Uint(max_share_price_e27),
            Token::Address(receiver),
        ],
    )
}

pub fn erc4626_redeem(
    vault: Address,
    shares: U256,
    min_share_price_e27: U256,
    receiver: Address,
    owner: Address,
) -> Bytes {
    encode_call(
        "erc4626Redeem(address,uint256,uint256,address,address)",
        &[
            Token::Address(vault),
            Token::Uint(shares),
            Token::Uint(min_share_price_e27),
            Token::Address(receiver),
            Token::Address(owner),
        ],
    )
}

pub fn multicall(calls: Vec<BundlerCall>) -> Bytes {
    let tokens = calls.into_iter().map(BundlerCall::into_token).collect();
    encode_call("multicall((address,bytes,uint256,bool,bytes32)[])", &[Token::Array(tokens)])
}

// --- EIP-2612 ---

/// EIP-712 digest an owner signs to grant `spender` an allowance of `value`
pub fn permit_digest(
    domain_separator: H256,
    owner: Address,
    spender: Address,
    value: U256,
    nonce: U256,
    deadline: U256,
) -> H256 {
    let struct_hash = keccak256(abi::encode(&[
        Token::FixedBytes(keccak256(PERMIT_TYPE).to_vec()),
        Token::Address(owner),
        Token::Address(spender),
        Token::Uint(value),
        Token::Uint(nonce),
        Token::Uint(deadline),
    ]));

    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator.as_bytes());
    preimage.extend_from_slice(&struct_hash);
    H256::from(keccak256(preimage))
}

// --- decoding ---

fn decode_single(kind: ParamType, data: &[u8]) -> Result<Token, VaultError> {
    abi::decode(&[kind], data)?
        .into_iter()
        .next()
        .ok_or_else(|| VaultError::Abi("empty return data".to_string()))
}

pub fn decode_address(data: &[u8]) -> Result<Address, VaultError> {
    decode_single(ParamType::Address, data)?
        .into_address()
        .ok_or_else(|| VaultError::Abi("expected address".to_string()))
}

pub fn decode_uint(data: &[u8]) -> Result<U256, VaultError> {
    decode_single(ParamType::Uint(256), data)?
        .into_uint()
        .ok_or_else(|| VaultError::Abi("expected uint256".to_string()))
}

pub fn decode_bytes32(data: &[u8]) -> Result<H256, VaultError> {
    let bytes = decode_single(ParamType::FixedBytes(32), data)?
        .into_fixed_bytes()
        .ok_or_else(|| VaultError::Abi("expected bytes32".to_string()))?;
    Ok(H256::from_slice(&bytes))
}

/// `idToMarketParams` return tuple: loan token, collateral token, oracle, irm, lltv
pub fn decode_market_params(data: &[u8]) -> Result<(Address, Address, Address, Address, U256), VaultError> {
    let tokens = abi::decode(
        &[
            ParamType::Address,
            ParamType::Address,
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
        ],
        data,
    )?;

    let address_at = |i: usize| {
        tokens
            .get(i)
            .cloned()
            .and_then(Token::into_address)
            .ok_or_else(|| VaultError::Abi(format!("market params field {} is not an address", i)))
    };
    let lltv = tokens
        .get(4)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| VaultError::Abi("market params lltv is not a uint".to_string()))?;

    Ok((address_at(0)?, address_at(1)?, address_at(2)?, address_at(3)?, lltv))
}

pub fn encode_uint(value: U256) -> Bytes {
    Bytes::from(abi::encode(&[Token::Uint(value)]))
}

pub fn encode_address(value: Address) -> Bytes {
    Bytes::from(abi::encode(&[Token::Address(value)]))
}

pub fn encode_bytes32(value: H256) -> Bytes {
    Bytes::from(abi::encode(&[Token::FixedBytes(value.as_bytes().to_vec())]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_selectors() {
        assert_eq!(selector(&balance_of(Address::zero())), Some([0x70, 0xa0, 0x82, 0x31]));
        assert_eq!(selector(&approve(Address::zero(), U256::zero())), Some([0x09, 0x5e, 0xa7, 0xb3]));
        assert_eq!(selector(&allowance(Address::zero(), Address::zero())), Some([0xdd, 0x62, 0xed, 0x3e]));
        assert_eq!(selector(&asset()), Some([0x38, 0xd5, 0x2e, 0x0f]));
    }

    #[test]
    fn test_approve_layout() {
        let spender = Address::repeat_byte(0x11);
        let data = approve(spender, U256::from(500u64));
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[16..36], spender.as_bytes());
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(500u64));
    }

    #[test]
    fn test_decode_round_values() {
        let addr = Address::repeat_byte(0xab);
        assert_eq!(decode_address(&encode_address(addr)).unwrap(), addr);
        assert_eq!(decode_uint(&encode_uint(U256::from(7u64))).unwrap(), U256::from(7u64));
        let id = H256::repeat_byte(0x5c);
        assert_eq!(decode_bytes32(&encode_bytes32(id)).unwrap(), id);
        assert!(decode_uint(&[]).is_err());
    }

    #[test]
    fn test_multicall_carries_value_and_flags() {
        let call = BundlerCall::new(Address::repeat_byte(1), wrap_native(U256::from(5u64), Address::repeat_byte(1)))
            .with_value(U256::from(5u64))
            .skipping_revert();
        assert_eq!(call.value, U256::from(5u64));
        assert!(call.skip_revert);

        let data = multicall(vec![call]);
        let decoded = abi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Bytes,
                ParamType::Uint(256),
                ParamType::Bool,
                ParamType::FixedBytes(32),
            ])))],
            &data[4..],
        )
        .unwrap();
        let entries = decoded[0].clone().into_array().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_permit_digest_depends_on_every_field() {
        let domain = H256::repeat_byte(0x01);
        let owner = Address::repeat_byte(0x02);
        let spender = Address::repeat_byte(0x03);
        let base = permit_digest(domain, owner, spender, U256::one(), U256::zero(), U256::from(100u64));
        assert_eq!(base, permit_digest(domain, owner, spender, U256::one(), U256::zero(), U256::from(100u64)));
        assert_ne!(base, permit_digest(domain, owner, spender, U256::one(), U256::one(), U256::from(100u64)));
        assert_ne!(base, permit_digest(H256::zero(), owner, spender, U256::one(), U256::zero(), U256::from(100u64)));
    }
}
