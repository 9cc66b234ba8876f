//! The commit chain: commit maps, the data payload they reference, content
//! hashing, writing, and reification (spec §3.3, §4.4, §6.3–§6.5).

pub mod codec;
pub mod credential;
pub mod loader;
pub mod writer;

pub use codec::{
    flakes_to_nodes, nodes_to_flakes, CommitMap, DataRef, DbPayload, IdRef, IndexRef, PreviousRef,
};
pub use credential::{CredentialSigner, CredentialVerifier, PublicKeyVerifier, Secp256k1Signer};
pub use loader::{reify, ReifiedDb};
pub use writer::{commit, CommitInput};
