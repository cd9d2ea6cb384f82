//! Contact list files
//!
//! A contact list is a JSON array of records:
//!
//! ```json
//! [{ "id": "c1", "name": "Ana", "phone": "+5511999990001", "document": "invoices/c1.pdf" }]
//! ```
//!
//! `id` is optional; records without one get a generated identifier.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use bulksend_core::{Contact, ContactId, ContactSource, DispatchError, DispatchResult};

use crate::error::{CliError, Result};

#[derive(Debug, Deserialize)]
struct ContactRecord {
    #[serde(default)]
    id: Option<String>,
    name: String,
    phone: String,
    #[serde(alias = "document", alias = "pdf")]
    document_ref: String,
}

impl From<ContactRecord> for Contact {
    fn from(record: ContactRecord) -> Self {
        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .map(ContactId::new)
            .unwrap_or_else(ContactId::generate);
        Contact::new(id, record.name, record.phone, record.document_ref)
    }
}

/// Parse a JSON contact list
pub fn parse_contacts(json: &str) -> Result<Vec<Contact>> {
    let records: Vec<ContactRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(Contact::from).collect())
}

/// Read and parse a JSON contact list from disk
pub fn load_contacts<P: AsRef<Path>>(path: P) -> Result<Vec<Contact>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CliError::Contacts(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_contacts(&contents)
}

// ----------------------------------------------------------------------------
// Contact Source
// ----------------------------------------------------------------------------

/// Contact source backed by a JSON file, read when the job starts
#[derive(Debug, Clone)]
pub struct JsonContactSource {
    path: PathBuf,
}

impl JsonContactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContactSource for JsonContactSource {
    async fn load(&self) -> DispatchResult<Vec<Contact>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DispatchError::config_error(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_contacts(&contents).map_err(|e| DispatchError::config_error(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Validation
// ----------------------------------------------------------------------------

/// Problems found in a contact list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactListReport {
    pub total: usize,
    pub duplicate_ids: Vec<ContactId>,
    pub missing_phone: Vec<ContactId>,
    pub missing_document: Vec<ContactId>,
}

impl ContactListReport {
    pub fn is_clean(&self) -> bool {
        self.total > 0
            && self.duplicate_ids.is_empty()
            && self.missing_phone.is_empty()
            && self.missing_document.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.duplicate_ids.len() + self.missing_phone.len() + self.missing_document.len()
    }
}

pub fn check_contacts(contacts: &[Contact]) -> ContactListReport {
    let mut report = ContactListReport {
        total: contacts.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for contact in contacts {
        if !seen.insert(&contact.id) {
            report.duplicate_ids.push(contact.id.clone());
        }
        if contact.phone.trim().is_empty() {
            report.missing_phone.push(contact.id.clone());
        }
        if contact.document_ref.trim().is_empty() {
            report.missing_document.push(contact.id.clone());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_aliases_and_generates_ids() {
        let contacts = parse_contacts(
            r#"[
                {"id": "c1", "name": "Ana", "phone": "+1", "document": "a.pdf"},
                {"name": "Bo", "phone": "+2", "pdf": "b.pdf"},
                {"id": " ", "name": "Cy", "phone": "+3", "document_ref": "c.pdf"}
            ]"#,
        )
        .unwrap();

        assert_eq!(contacts.len(), 3);
        assert_eq!(contacts[0].id.as_str(), "c1");
        assert_eq!(contacts[1].document_ref, "b.pdf");
        assert!(!contacts[1].id.as_str().is_empty());
        assert_ne!(contacts[1].id, contacts[2].id);
        assert!(contacts.iter().all(|c| c.is_pending()));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let result = parse_contacts(r#"[{"id": "c1", "name": "Ana"}]"#);
        assert!(matches!(result, Err(CliError::Serialization(_))));
    }

    #[test]
    fn test_check_contacts() {
        let contacts = vec![
            Contact::new("c1", "Ana", "+1", "a.pdf"),
            Contact::new("c1", "Ana again", "+1", "a.pdf"),
            Contact::new("c2", "Bo", " ", "b.pdf"),
            Contact::new("c3", "Cy", "+3", ""),
        ];
        let report = check_contacts(&contacts);

        assert_eq!(report.total, 4);
        assert_eq!(report.duplicate_ids, vec![ContactId::new("c1")]);
        assert_eq!(report.missing_phone, vec![ContactId::new("c2")]);
        assert_eq!(report.missing_document, vec![ContactId::new("c3")]);
        assert_eq!(report.problem_count(), 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_empty_list_is_not_clean() {
        assert!(!check_contacts(&[]).is_clean());
    }
}
