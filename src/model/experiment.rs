//! Experiment rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protein targeted by an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRef {
    /// Display name of the protein
    pub name: String,
    /// UniProt accession, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniprot_id: Option<String>,
}

impl ProteinRef {
    /// Create a protein reference by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uniprot_id: None,
        }
    }

    /// Set the UniProt accession.
    pub fn with_uniprot(mut self, accession: impl Into<String>) -> Self {
        self.uniprot_id = Some(accession.into());
        self
    }
}

/// An experiment owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Catalog identifier
    pub id: u64,
    /// Owning user
    pub user_id: u64,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Lifecycle status label (e.g. "draft", "ready", "imported")
    pub status: String,
    /// Protein this experiment images
    #[serde(default)]
    pub protein: Option<ProteinRef>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create an unsaved experiment.
    pub fn new(user_id: u64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.into(),
            description: None,
            status: "draft".to_string(),
            protein: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the status label.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Set the protein reference.
    pub fn with_protein(mut self, protein: ProteinRef) -> Self {
        self.protein = Some(protein);
        self
    }
}
