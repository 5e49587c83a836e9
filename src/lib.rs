pub mod backend;
pub mod block;
pub mod builder;
pub mod capability;
pub mod car;
pub mod config;
pub mod delegation;
pub mod did;
pub mod keypair;
pub mod nonce;
pub mod service;
pub mod signer;
pub mod siwe;
pub mod time;
pub mod verifier;

pub use k256;
