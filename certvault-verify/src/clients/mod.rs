//! Subprocess verification clients
//!
//! Each client drives one external TLS library. They share the chain
//! convention (leaf first, presumed CA last) and report short opaque
//! result strings specific to their tool.

#[cfg(feature = "botan")]
pub mod botan;
#[cfg(feature = "gnutls")]
pub mod gnutls;
#[cfg(feature = "mbedtls")]
pub mod mbedtls;
#[cfg(feature = "openssl")]
pub mod openssl;
