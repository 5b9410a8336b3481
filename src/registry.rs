use std::collections::BTreeMap;

use alloy_primitives::Address;

/// Tracked ERC-20 contracts and the symbol each one reports balances under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRegistry {
    tokens: BTreeMap<Address, String>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the symbol previously registered for `contract`, if any.
    pub fn insert(&mut self, contract: Address, symbol: impl Into<String>) -> Option<String> {
        self.tokens.insert(contract, symbol.into())
    }

    pub fn symbol(&self, contract: &Address) -> Option<&str> {
        self.tokens.get(contract).map(String::as_str)
    }

    /// Contract addresses in ascending byte order.
    pub fn addresses(&self) -> Vec<Address> {
        self.tokens.keys().copied().collect()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.tokens.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Address, S)> for TokenRegistry {
    fn from_iter<I: IntoIterator<Item = (Address, S)>>(iter: I) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|(address, symbol)| (address, symbol.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::addr;

    #[test]
    fn lookup_ignores_address_casing() {
        let registry: TokenRegistry = [(
            "0x84E0b37e8f5B4B86d5d299b0B0e33686405A3919".parse::<Address>().unwrap(),
            "XES",
        )]
        .into_iter()
        .collect();

        let lowercase: Address = "0x84e0b37e8f5b4b86d5d299b0b0e33686405a3919".parse().unwrap();
        assert_eq!(registry.symbol(&lowercase), Some("XES"));
        assert_eq!(registry.symbol(&addr(9)), None);
    }

    #[test]
    fn addresses_are_sorted() {
        let registry: TokenRegistry = [(addr(3), "C"), (addr(1), "A"), (addr(2), "B")]
            .into_iter()
            .collect();

        assert_eq!(registry.addresses(), vec![addr(1), addr(2), addr(3)]);
        assert_eq!(registry.symbols().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[test]
    fn insert_reports_replaced_symbol() {
        let mut registry = TokenRegistry::new();
        assert_eq!(registry.insert(addr(1), "MKR"), None);
        assert_eq!(registry.insert(addr(1), "DAI"), Some("MKR".to_string()));
        assert_eq!(registry.len(), 1);
    }
}
