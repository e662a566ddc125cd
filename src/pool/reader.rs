// src/pool/reader.rs

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use web3::contract::{Contract, Options};
use web3::ethabi::Token;
use web3::transports::Http;
use web3::types::{Address, U256};
use web3::Web3;

use crate::pool::params::{PoolParams, PoolStatus};
use crate::utils::{parse_address, scale_down, scale_up};

/// Read interface of the pool contract. The ABI mirrors the deployed
/// interface; only view functions are ever called.
const POOL_ABI: &str = r#"[
    {"inputs":[],"name":"getReserves","outputs":[
        {"name":"reserve0","type":"uint112"},
        {"name":"reserve1","type":"uint112"},
        {"name":"status","type":"uint32"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[],"name":"getParams","outputs":[{"components":[
        {"name":"vault0","type":"address"},
        {"name":"vault1","type":"address"},
        {"name":"account","type":"address"},
        {"name":"equilibriumReserve0","type":"uint112"},
        {"name":"equilibriumReserve1","type":"uint112"},
        {"name":"priceX","type":"uint256"},
        {"name":"priceY","type":"uint256"},
        {"name":"concentrationX","type":"uint256"},
        {"name":"concentrationY","type":"uint256"},
        {"name":"fee","type":"uint256"},
        {"name":"protocolFee","type":"uint256"},
        {"name":"protocolFeeRecipient","type":"address"}],
        "name":"","type":"tuple"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[],"name":"getAssets","outputs":[
        {"name":"asset0","type":"address"},
        {"name":"asset1","type":"address"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[
        {"name":"tokenIn","type":"address"},
        {"name":"tokenOut","type":"address"},
        {"name":"amount","type":"uint256"},
        {"name":"exactIn","type":"bool"}],
     "name":"computeQuote","outputs":[{"name":"","type":"uint256"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[
        {"name":"tokenIn","type":"address"},
        {"name":"tokenOut","type":"address"}],
     "name":"getLimits","outputs":[
        {"name":"maxIn","type":"uint256"},
        {"name":"maxOut","type":"uint256"}],
     "stateMutability":"view","type":"function"}
]"#;

/// Polls pool reserves and parameters over JSON-RPC. Transient RPC
/// failures surface to the caller; the monitor retries on its next tick.
#[derive(Clone)]
pub struct PoolReader {
    web3: Web3<Http>,
    contract: Contract<Http>,
    pool_address: Address,
    token0_decimals: u32,
    token1_decimals: u32,
    call_timeout: Duration,
    params_cache: Arc<Mutex<Option<PoolParams>>>,
}

impl PoolReader {
    pub fn new(
        rpc_url: &str,
        pool_address: &str,
        token0_decimals: u32,
        token1_decimals: u32,
        call_timeout: Duration,
    ) -> Result<Self> {
        let transport = Http::new(rpc_url).context("Failed to create RPC transport")?;
        let web3 = Web3::new(transport);
        let address = parse_address(pool_address)?;
        let contract = Contract::from_json(web3.eth(), address, POOL_ABI.as_bytes())
            .map_err(|e| anyhow!("Failed to parse pool ABI: {}", e))?;

        Ok(Self {
            web3,
            contract,
            pool_address: address,
            token0_decimals,
            token1_decimals,
            call_timeout,
            params_cache: Arc::new(Mutex::new(None)),
        })
    }

    pub fn pool_address(&self) -> String {
        format!("{:#x}", self.pool_address)
    }

    async fn bounded<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res.map_err(|e| anyhow!("{} failed: {}", what, e)),
            Err(_) => Err(anyhow!("{} timed out after {:?}", what, self.call_timeout)),
        }
    }

    /// Live reserves in human units together with the pool status flag.
    pub async fn reserves(&self) -> Result<(Decimal, Decimal, PoolStatus)> {
        let (raw0, raw1, raw_status): (U256, U256, U256) = self
            .bounded(
                "getReserves",
                self.contract
                    .query("getReserves", (), None, Options::default(), None),
            )
            .await?;

        let reserve0 = scale_down(raw0, self.token0_decimals)?;
        let reserve1 = scale_down(raw1, self.token1_decimals)?;
        let status = PoolStatus::from_raw(raw_status.as_u64())?;

        debug!(%reserve0, %reserve1, ?status, "Fetched pool reserves");
        Ok((reserve0, reserve1, status))
    }

    /// Pool parameters, fetched once and cached until invalidated.
    pub async fn params(&self) -> Result<PoolParams> {
        let mut cache = self.params_cache.lock().await;
        if let Some(params) = &*cache {
            return Ok(params.clone());
        }

        let token: Token = self
            .bounded(
                "getParams",
                self.contract
                    .query("getParams", (), None, Options::default(), None),
            )
            .await?;
        let (asset0, asset1) = self.assets().await?;

        let params = self.decode_params(token, asset0, asset1)?;
        debug!(
            equilibrium_reserve0 = %params.equilibrium_reserve0,
            equilibrium_reserve1 = %params.equilibrium_reserve1,
            equilibrium_price = %params.equilibrium_price(),
            fee = %params.fee,
            "Fetched pool params"
        );

        *cache = Some(params.clone());
        Ok(params)
    }

    /// Drop the cached parameters; the next `params` call refetches.
    pub async fn invalidate_params(&self) {
        let mut cache = self.params_cache.lock().await;
        *cache = None;
    }

    /// Underlying token addresses (token0, token1).
    pub async fn assets(&self) -> Result<(Address, Address)> {
        let (asset0, asset1): (Address, Address) = self
            .bounded(
                "getAssets",
                self.contract
                    .query("getAssets", (), None, Options::default(), None),
            )
            .await?;
        Ok((asset0, asset1))
    }

    /// Informational swap quote. `token0_to_token1` picks the direction;
    /// amounts are human units on both sides.
    pub async fn quote(
        &self,
        amount_in: Decimal,
        token0_to_token1: bool,
        exact_in: bool,
    ) -> Result<Decimal> {
        let params = self.params().await?;
        let (token_in, token_out, decimals_in, decimals_out) = if token0_to_token1 {
            (
                parse_address(&params.token0_address)?,
                parse_address(&params.token1_address)?,
                self.token0_decimals,
                self.token1_decimals,
            )
        } else {
            (
                parse_address(&params.token1_address)?,
                parse_address(&params.token0_address)?,
                self.token1_decimals,
                self.token0_decimals,
            )
        };

        let raw_in = scale_up(amount_in, decimals_in)?;
        let raw_out: U256 = self
            .bounded(
                "computeQuote",
                self.contract.query(
                    "computeQuote",
                    (token_in, token_out, raw_in, exact_in),
                    None,
                    Options::default(),
                    None,
                ),
            )
            .await?;

        let quoted = scale_down(raw_out, decimals_out)?;
        debug!(%amount_in, %quoted, token0_to_token1, exact_in, "Pool quote");
        Ok(quoted)
    }

    /// Informational swap limits (max_in, max_out) for one direction.
    pub async fn limits(&self, token0_to_token1: bool) -> Result<(Decimal, Decimal)> {
        let params = self.params().await?;
        let (token_in, token_out, decimals_in, decimals_out) = if token0_to_token1 {
            (
                parse_address(&params.token0_address)?,
                parse_address(&params.token1_address)?,
                self.token0_decimals,
                self.token1_decimals,
            )
        } else {
            (
                parse_address(&params.token1_address)?,
                parse_address(&params.token0_address)?,
                self.token1_decimals,
                self.token0_decimals,
            )
        };

        let (raw_in, raw_out): (U256, U256) = self
            .bounded(
                "getLimits",
                self.contract.query(
                    "getLimits",
                    (token_in, token_out),
                    None,
                    Options::default(),
                    None,
                ),
            )
            .await?;

        Ok((
            scale_down(raw_in, decimals_in)?,
            scale_down(raw_out, decimals_out)?,
        ))
    }

    /// Latest chain head, best-effort input for snapshots.
    pub async fn block_number(&self) -> Result<u64> {
        let number = self
            .bounded("eth_blockNumber", self.web3.eth().block_number())
            .await?;
        Ok(number.as_u64())
    }

    fn decode_params(&self, token: Token, asset0: Address, asset1: Address) -> Result<PoolParams> {
        let fields = match token {
            Token::Tuple(fields) => fields,
            other => {
                warn!(?other, "Unexpected getParams return shape");
                return Err(anyhow!("getParams did not return a tuple"));
            }
        };
        if fields.len() != 12 {
            return Err(anyhow!(
                "getParams returned {} fields, expected 12",
                fields.len()
            ));
        }

        Ok(PoolParams {
            vault0: format!("{:#x}", expect_address(&fields[0])?),
            vault1: format!("{:#x}", expect_address(&fields[1])?),
            account: format!("{:#x}", expect_address(&fields[2])?),
            equilibrium_reserve0: scale_down(expect_uint(&fields[3])?, self.token0_decimals)?,
            equilibrium_reserve1: scale_down(expect_uint(&fields[4])?, self.token1_decimals)?,
            price_x: scale_down(expect_uint(&fields[5])?, 0)?,
            price_y: scale_down(expect_uint(&fields[6])?, 0)?,
            concentration_x: scale_down(expect_uint(&fields[7])?, 18)?,
            concentration_y: scale_down(expect_uint(&fields[8])?, 18)?,
            fee: scale_down(expect_uint(&fields[9])?, 18)?,
            protocol_fee: scale_down(expect_uint(&fields[10])?, 18)?,
            protocol_fee_recipient: format!("{:#x}", expect_address(&fields[11])?),
            token0_address: format!("{:#x}", asset0),
            token1_address: format!("{:#x}", asset1),
            token0_decimals: self.token0_decimals,
            token1_decimals: self.token1_decimals,
        })
    }
}

fn expect_address(token: &Token) -> Result<Address> {
    match token {
        Token::Address(addr) => Ok(*addr),
        other => Err(anyhow!("Expected address token, got {:?}", other)),
    }
}

fn expect_uint(token: &Token) -> Result<U256> {
    match token {
        Token::Uint(value) => Ok(*value),
        other => Err(anyhow!("Expected uint token, got {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn reader() -> PoolReader {
        PoolReader::new(
            "http://localhost:8545",
            "0x55dcf9455eee8fd3f5eed17606291272cde428a8",
            6,
            18,
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn decodes_params_tuple() {
        let r = reader();
        let vault0 = parse_address("0x313603fa690301b0caeef8069c065862f9162162").unwrap();
        let vault1 = parse_address("0xd8b27cf359b7d15710a5be299af6e7bf904984c2").unwrap();
        let account = parse_address("0x0000000000000000000000000000000000000001").unwrap();
        let recipient = parse_address("0x0000000000000000000000000000000000000002").unwrap();
        let asset0 = parse_address("0xdac17f958d2ee523a2206206994597c13d831ec7").unwrap();
        let asset1 = parse_address("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2").unwrap();

        let token = Token::Tuple(vec![
            Token::Address(vault0),
            Token::Address(vault1),
            Token::Address(account),
            // 1,000,000 USDT at 6 decimals, 500 WETH at 18 decimals.
            Token::Uint(U256::from(1_000_000_000_000u64)),
            Token::Uint(U256::from(500u64) * U256::exp10(18)),
            Token::Uint(U256::from(2000u64)),
            Token::Uint(U256::from(1u64)),
            Token::Uint(U256::exp10(17) * U256::from(85u64) / U256::from(10u64)),
            Token::Uint(U256::exp10(17) * U256::from(85u64) / U256::from(10u64)),
            Token::Uint(U256::exp10(15) * U256::from(3u64)),
            Token::Uint(U256::exp10(14) * U256::from(5u64)),
            Token::Address(recipient),
        ]);

        let params = r.decode_params(token, asset0, asset1).unwrap();
        assert_eq!(params.equilibrium_reserve0, dec!(1000000));
        assert_eq!(params.equilibrium_reserve1, dec!(500));
        assert_eq!(params.equilibrium_price(), dec!(2000));
        assert_eq!(params.concentration_x, dec!(0.85));
        assert_eq!(params.fee, dec!(0.003));
        assert_eq!(params.protocol_fee, dec!(0.0005));
        assert_eq!(
            params.token0_address,
            "0xdac17f958d2ee523a2206206994597c13d831ec7"
        );
    }

    #[test]
    fn rejects_short_params_tuple() {
        let r = reader();
        let asset0 = parse_address("0xdac17f958d2ee523a2206206994597c13d831ec7").unwrap();
        let asset1 = parse_address("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2").unwrap();
        let token = Token::Tuple(vec![Token::Uint(U256::zero())]);
        assert!(r.decode_params(token, asset0, asset1).is_err());
    }
}
