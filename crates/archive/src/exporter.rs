//! Exporter descriptors and their retrieve-AE policy.

use stgcmt_core::{AeTitle, ExporterId};

use crate::commitment::ReferencedSop;

/// How retrieve AE titles are chosen for a committed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveAePolicy {
    /// The exporter lists the titles explicitly; every committed instance gets all of them.
    /// Never empty.
    Configured(Vec<AeTitle>),
    /// Use the title reported per object, else the default title.
    PerObject,
}

impl RetrieveAePolicy {
    /// Build the policy from a configured list. An empty list means `PerObject`.
    pub fn from_titles(titles: impl IntoIterator<Item = AeTitle>) -> Self {
        let mut unique: Vec<AeTitle> = Vec::new();
        for ae in titles {
            if !unique.contains(&ae) {
                unique.push(ae);
            }
        }
        if unique.is_empty() {
            RetrieveAePolicy::PerObject
        } else {
            RetrieveAePolicy::Configured(unique)
        }
    }

    /// Titles to add to an instance matched by `reference`.
    pub fn titles_for(&self, reference: &ReferencedSop, default: &AeTitle) -> Vec<AeTitle> {
        match self {
            RetrieveAePolicy::Configured(titles) => titles.clone(),
            RetrieveAePolicy::PerObject => vec![
                reference
                    .retrieve_ae_title
                    .clone()
                    .unwrap_or_else(|| default.clone()),
            ],
        }
    }

    pub fn configured_titles(&self) -> &[AeTitle] {
        match self {
            RetrieveAePolicy::Configured(titles) => titles,
            RetrieveAePolicy::PerObject => &[],
        }
    }
}

/// Read-only exporter configuration consumed by the correlator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterDescriptor {
    exporter_id: ExporterId,
    uri: String,
    queue_name: Option<String>,
    stgcmt_scp_ae_title: AeTitle,
    retrieve_policy: RetrieveAePolicy,
}

impl ExporterDescriptor {
    pub fn new(exporter_id: ExporterId, uri: impl Into<String>, stgcmt_scp_ae_title: AeTitle) -> Self {
        Self {
            exporter_id,
            uri: uri.into(),
            queue_name: None,
            stgcmt_scp_ae_title,
            retrieve_policy: RetrieveAePolicy::PerObject,
        }
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_retrieve_ae_titles(mut self, titles: impl IntoIterator<Item = AeTitle>) -> Self {
        self.retrieve_policy = RetrieveAePolicy::from_titles(titles);
        self
    }

    pub fn exporter_id(&self) -> &ExporterId {
        &self.exporter_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    /// AE title of the storage commitment SCP; the fallback retrieve location.
    pub fn stgcmt_scp_ae_title(&self) -> &AeTitle {
        &self.stgcmt_scp_ae_title
    }

    pub fn retrieve_policy(&self) -> &RetrieveAePolicy {
        &self.retrieve_policy
    }
}
