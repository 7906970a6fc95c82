use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::{Address, address};

/// A token the pipeline can trade, as listed on Ethereum mainnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub symbol: &'static str,
    pub name: &'static str,
}

const WETH: TokenInfo = TokenInfo {
    address: address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
    decimals: 18,
    symbol: "WETH",
    name: "Wrapped Ether",
};

const USDC: TokenInfo = TokenInfo {
    address: address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    decimals: 6,
    symbol: "USDC",
    name: "USD Coin",
};

const USDT: TokenInfo = TokenInfo {
    address: address!("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
    decimals: 6,
    symbol: "USDT",
    name: "Tether USD",
};

const DAI: TokenInfo = TokenInfo {
    address: address!("0x6B175474E89094C44Da98b954EedeAC495271d0F"),
    decimals: 18,
    symbol: "DAI",
    name: "Dai Stablecoin",
};

const WBTC: TokenInfo = TokenInfo {
    address: address!("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"),
    decimals: 8,
    symbol: "WBTC",
    name: "Wrapped BTC",
};

const UNI: TokenInfo = TokenInfo {
    address: address!("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984"),
    decimals: 18,
    symbol: "UNI",
    name: "Uniswap",
};

const LINK: TokenInfo = TokenInfo {
    address: address!("0x514910771AF9Ca656af840dff83E8264EcF986CA"),
    decimals: 18,
    symbol: "LINK",
    name: "ChainLink Token",
};

const AAVE: TokenInfo = TokenInfo {
    address: address!("0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"),
    decimals: 18,
    symbol: "AAVE",
    name: "Aave Token",
};

static GLOBAL_REGISTRY: LazyLock<TokenRegistry> = LazyLock::new(TokenRegistry::new);

/// Token registry for mapping symbols to token metadata
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    registry: HashMap<String, TokenInfo>,
}

impl TokenRegistry {
    /// Create a new token registry with all supported tokens
    pub fn new() -> Self {
        Self {
            registry: Self::init_registry(),
        }
    }

    /// The process-wide registry, built on first use.
    pub fn global() -> &'static TokenRegistry {
        &GLOBAL_REGISTRY
    }

    fn init_registry() -> HashMap<String, TokenInfo> {
        let mut registry = HashMap::new();

        for token in [WETH, USDC, USDT, DAI, WBTC, UNI, LINK, AAVE] {
            registry.insert(token.symbol.to_string(), token);
        }

        // Native ETH trades through its wrapped form
        registry.insert("ETH".to_string(), WETH);

        registry
    }

    /// Lookup token by symbol (case-insensitive)
    pub fn lookup(&self, symbol: &str) -> Option<&TokenInfo> {
        self.registry.get(&symbol.trim().to_uppercase())
    }

    /// Get list of all supported token symbols (sorted alphabetically)
    pub fn supported_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.registry.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Check if a token symbol is supported
    pub fn contains(&self, symbol: &str) -> bool {
        self.lookup(symbol).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_existing_token() {
        let registry = TokenRegistry::new();

        assert_eq!(registry.lookup("USDC"), Some(&USDC));
        assert_eq!(registry.lookup("usdc"), Some(&USDC));
        assert_eq!(registry.lookup(" weth "), Some(&WETH));
        assert_eq!(registry.lookup("WBTC").map(|t| t.decimals), Some(8));
    }

    #[test]
    fn test_eth_aliases_weth() {
        let registry = TokenRegistry::new();

        let eth = registry.lookup("ETH").unwrap();
        assert_eq!(eth.address, WETH.address);
        assert_eq!(eth.symbol, "WETH");
    }

    #[test]
    fn test_lookup_non_existing_token() {
        let registry = TokenRegistry::new();

        assert_eq!(registry.lookup("UNKNOWN"), None);
        assert!(!registry.contains("xyz"));
    }

    #[test]
    fn test_supported_tokens_sorted() {
        let registry = TokenRegistry::global();
        let tokens = registry.supported_tokens();

        assert!(tokens.contains(&"USDC".to_string()));
        assert!(tokens.contains(&"ETH".to_string()));
        for i in 1..tokens.len() {
            assert!(tokens[i - 1] <= tokens[i]);
        }
        assert_eq!(tokens.len(), registry.len());
    }

    #[test]
    fn test_symbols_map_to_distinct_addresses() {
        let registry = TokenRegistry::new();
        let mut seen = std::collections::HashSet::new();

        for symbol in registry.supported_tokens() {
            let token = registry.lookup(&symbol).unwrap();
            if symbol != "ETH" {
                assert!(seen.insert(token.address), "duplicate address for {symbol}");
                assert!(token.decimals <= 18);
            }
        }
    }
}
