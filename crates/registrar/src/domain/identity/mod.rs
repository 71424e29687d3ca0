pub mod mint;

pub use mint::IdentifierMint;
