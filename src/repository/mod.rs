//! Remote repository descriptions and credential lookup.

mod credentials;
mod descriptor;

pub use credentials::{
    CredentialChain, CredentialResolver, Credentials, EnvCredentialResolver,
    StaticCredentialResolver,
};
pub use descriptor::{RepositoryDescriptor, RepositoryId};
