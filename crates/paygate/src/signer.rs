use std::fmt;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use crate::error::PaymentError;

/// The operator's signing identity.
///
/// The private key is parsed once at startup and lives only inside the
/// wrapped signer. It is never persisted, logged, or serialized; `Debug`
/// output shows the derived address only.
pub struct OperatorSigner {
    signer: PrivateKeySigner,
}

impl OperatorSigner {
    /// Parse a hex-encoded private key, with or without a `0x` prefix.
    pub fn from_hex(key: &str) -> Result<Self, PaymentError> {
        let trimmed = key.trim();
        let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex.is_empty() {
            return Err(PaymentError::Signing("operator key is empty".into()));
        }
        let signer: PrivateKeySigner = hex
            .parse()
            .map_err(|_| PaymentError::Signing("operator key is not valid hex".into()))?;
        Ok(Self { signer })
    }

    /// Address the operator signs and pays gas from.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Consume the signer into a wallet for provider construction. All
    /// transaction signing happens inside the provider from here on.
    pub fn into_wallet(self) -> EthereumWallet {
        EthereumWallet::from(self.signer)
    }
}

impl fmt::Debug for OperatorSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSigner")
            .field("address", &self.signer.address())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil/hardhat development key, account 0.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn parses_key_and_derives_address() {
        let signer = OperatorSigner::from_hex(DEV_KEY).unwrap();
        assert_eq!(signer.address(), DEV_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn accepts_0x_prefix_and_whitespace() {
        let plain = OperatorSigner::from_hex(DEV_KEY).unwrap();
        let prefixed = OperatorSigner::from_hex(&format!("  0x{DEV_KEY}\n")).unwrap();
        assert_eq!(plain.address(), prefixed.address());
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(OperatorSigner::from_hex("").is_err());
        assert!(OperatorSigner::from_hex("0x").is_err());
        assert!(OperatorSigner::from_hex("not-a-key").is_err());
        assert!(OperatorSigner::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn debug_output_never_contains_the_key() {
        let signer = OperatorSigner::from_hex(DEV_KEY).unwrap();
        let debug = format!("{signer:?}");
        assert!(!debug.contains(DEV_KEY));
        assert!(debug.contains("[REDACTED]"));
    }
}
