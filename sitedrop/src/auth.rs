//! Authorizer for a single-operator CLI: the credential is the owner id itself,
//! and only ids registered at startup are accepted.

use std::collections::HashSet;

use async_trait::async_trait;
use sitedrop_core::contract::{Authorizer, CollaboratorError};
use sitedrop_core::model::VerifiedOwner;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LocalAuthorizer {
    known: HashSet<Uuid>,
}

impl LocalAuthorizer {
    pub fn new(known: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn verify(&self, credential: &str) -> Result<VerifiedOwner, CollaboratorError> {
        let id = Uuid::parse_str(credential.trim())?;
        if !self.known.contains(&id) {
            warn!(owner_id = %id, "Rejected credential for unknown owner");
            return Err(format!("unknown owner {id}").into());
        }
        Ok(VerifiedOwner::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifies_only_registered_owners() {
        let known = Uuid::new_v4();
        let auth = LocalAuthorizer::new([known]);

        let owner = auth.verify(&known.to_string()).await.unwrap();
        assert_eq!(owner.id(), known);

        assert!(auth.verify(&Uuid::new_v4().to_string()).await.is_err());
        assert!(auth.verify("not-a-uuid").await.is_err());
    }
}
