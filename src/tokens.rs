use crate::types::{ChainConfig, ChainFamily, RelayError, TokenConfig};
use alloy_primitives::Address;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Chain-native token identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenRef {
    /// ERC-20 contract address.
    Evm(Address),
    /// Fully qualified Move coin type, `0x<package>::<module>::<TYPE>`.
    Move(String),
}

impl TokenRef {
    pub fn parse(family: ChainFamily, raw: &str) -> Result<Self, String> {
        match family {
            ChainFamily::Evm => raw
                .parse::<Address>()
                .map(TokenRef::Evm)
                .map_err(|e| format!("invalid EVM token address {}: {}", raw, e)),
            ChainFamily::Sui => {
                let parts: Vec<&str> = raw.split("::").collect();
                let valid = parts.len() == 3
                    && parts[0].strip_prefix("0x").is_some_and(|pkg| {
                        !pkg.is_empty() && pkg.len() <= 64 && pkg.chars().all(|c| c.is_ascii_hexdigit())
                    })
                    && parts[1..].iter().all(|ident| {
                        !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    });
                if valid {
                    Ok(TokenRef::Move(raw.to_string()))
                } else {
                    Err(format!("invalid Move coin type {}", raw))
                }
            }
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            TokenRef::Evm(_) => ChainFamily::Evm,
            TokenRef::Move(_) => ChainFamily::Sui,
        }
    }

    /// EVM address left-padded to a 32-byte word.
    pub fn to_bytes32(&self) -> Option<[u8; 32]> {
        match self {
            TokenRef::Evm(address) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(address.as_slice());
                Some(word)
            }
            TokenRef::Move(_) => None,
        }
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRef::Evm(address) => write!(f, "{}", address),
            TokenRef::Move(path) => f.write_str(path),
        }
    }
}

impl Serialize for TokenRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Tokens a destination chain's calls are issued with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTokens {
    /// Collateral coin, released on repay.
    pub token_in: TokenRef,
    /// Loan coin, paid out on borrow.
    pub token_out: TokenRef,
    pub token_type: u8,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    symbol: String,
    token_type: u8,
    natives: HashMap<u16, TokenRef>,
}

/// Static symbol <-> native identifier table, one entry per chain per symbol.
/// Symbols are matched case-insensitively and reported upper case.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    entries: Vec<TokenEntry>,
}

impl TokenTable {
    /// Build and validate the table. Every symbol must name a well-formed
    /// identifier for every configured chain.
    pub fn from_config(
        tokens: &HashMap<String, TokenConfig>,
        chains: &HashMap<String, ChainConfig>,
    ) -> Result<Self, RelayError> {
        let mut entries = Vec::with_capacity(tokens.len());

        for (symbol, token) in tokens {
            let mut natives = HashMap::new();
            for (chain_name, raw) in &token.addresses {
                let chain = chains.get(chain_name).ok_or_else(|| {
                    RelayError::ConfigError(format!(
                        "Token {} references unknown chain {}",
                        symbol, chain_name
                    ))
                })?;
                let native = TokenRef::parse(chain.family, raw)
                    .map_err(|e| RelayError::ConfigError(format!("Token {}: {}", symbol, e)))?;
                natives.insert(chain.chain_id, native);
            }
            entries.push(TokenEntry {
                symbol: symbol.to_ascii_uppercase(),
                token_type: token.token_type,
                natives,
            });
        }

        entries.sort_by_key(|entry| entry.token_type);
        let table = Self { entries };
        table.validate(chains)?;
        Ok(table)
    }

    pub fn validate(&self, chains: &HashMap<String, ChainConfig>) -> Result<(), RelayError> {
        for pair in self.entries.windows(2) {
            if pair[0].token_type == pair[1].token_type {
                return Err(RelayError::ConfigError(format!(
                    "Tokens {} and {} share token type {}",
                    pair[0].symbol, pair[1].symbol, pair[0].token_type
                )));
            }
        }

        for entry in &self.entries {
            for (chain_name, chain) in chains {
                match entry.natives.get(&chain.chain_id) {
                    None => {
                        return Err(RelayError::ConfigError(format!(
                            "Token {} has no address on chain {}",
                            entry.symbol, chain_name
                        )))
                    }
                    Some(native) if native.family() != chain.family => {
                        return Err(RelayError::ConfigError(format!(
                            "Token {} on chain {} is not a {} identifier",
                            entry.symbol, chain_name, chain.family
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn resolve(&self, symbol: &str, chain_id: u16) -> Option<&TokenRef> {
        self.entry(symbol)?.natives.get(&chain_id)
    }

    pub fn symbol_of(&self, chain_id: u16, native: &TokenRef) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.natives.get(&chain_id) == Some(native))
            .map(|entry| entry.symbol.as_str())
    }

    pub fn token_type(&self, symbol: &str) -> Option<u8> {
        self.entry(symbol).map(|entry| entry.token_type)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.symbol.as_str())
    }

    /// Resolve the collateral and loan coins a chain issues calls with.
    pub fn route_tokens(
        &self,
        chain_id: u16,
        collateral: &str,
        loan: &str,
    ) -> Result<RouteTokens, RelayError> {
        let lookup = |symbol: &str| {
            self.resolve(symbol, chain_id).cloned().ok_or_else(|| {
                RelayError::ConfigError(format!("No {} token on chain {}", symbol, chain_id))
            })
        };

        Ok(RouteTokens {
            token_in: lookup(collateral)?,
            token_out: lookup(loan)?,
            token_type: self
                .token_type(loan)
                .ok_or_else(|| RelayError::ConfigError(format!("Unknown token {}", loan)))?,
        })
    }

    fn entry(&self, symbol: &str) -> Option<&TokenEntry> {
        self.entries
            .iter()
            .find(|entry| entry.symbol.eq_ignore_ascii_case(symbol))
    }
}
