//! in-toto v1 statements.
//!
//! A statement binds an arbitrary predicate to one or more subjects. Only the
//! fields this system reads or writes are modelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::subject::{Subject, SHA256};

/// Statement `_type` for in-toto v1.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v1";

/// A subject entry inside a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Repository name of the artifact
    pub name: String,

    /// Algorithm → hex digest
    pub digest: BTreeMap<String, String>,
}

impl From<&Subject> for ResourceDescriptor {
    fn from(subject: &Subject) -> Self {
        let mut digest = BTreeMap::new();
        digest.insert(SHA256.to_string(), subject.digest.hex().to_string());
        Self {
            name: subject.repository.to_string(),
            digest,
        }
    }
}

/// in-toto statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<ResourceDescriptor>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    pub predicate: serde_json::Value,
}

impl Statement {
    /// Create a statement for a single subject.
    pub fn new(subject: &Subject, predicate_type: &str, predicate: serde_json::Value) -> Self {
        Self {
            statement_type: STATEMENT_TYPE.to_string(),
            subject: vec![ResourceDescriptor::from(subject)],
            predicate_type: predicate_type.to_string(),
            predicate,
        }
    }

    /// Parse statement JSON, rejecting foreign statement types.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        let statement: Self = serde_json::from_slice(bytes)?;
        if statement.statement_type != STATEMENT_TYPE {
            return Err(ProtocolError::StatementType(statement.statement_type));
        }
        Ok(statement)
    }

    /// Whether any subject entry carries this subject's sha256 digest.
    ///
    /// Only the digest is compared: the repository name is not part of the
    /// content address, and attestations may live in an overridden repository.
    pub fn binds_digest(&self, subject: &Subject) -> bool {
        self.subject.iter().any(|descriptor| {
            descriptor
                .digest
                .get(SHA256)
                .is_some_and(|hex| hex == subject.digest.hex())
        })
    }
}
