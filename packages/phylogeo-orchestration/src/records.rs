use crate::error::{OrchestratorError, Result};
use crate::job::{JobInput, SequenceRecord};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Source of sequence records for accession-based submissions
pub trait RecordRepository: Send + Sync {
    /// Records in the order requested; unknown accessions are a validation error
    fn fetch(&self, accessions: &[String]) -> Result<Vec<SequenceRecord>>;
}

/// Map-backed repository
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordRepository {
    records: HashMap<String, SequenceRecord>,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SequenceRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<SequenceRecord> for InMemoryRecordRepository {
    fn from_iter<I: IntoIterator<Item = SequenceRecord>>(iter: I) -> Self {
        let mut repo = Self::new();
        for record in iter {
            repo.insert(record);
        }
        repo
    }
}

impl RecordRepository for InMemoryRecordRepository {
    fn fetch(&self, accessions: &[String]) -> Result<Vec<SequenceRecord>> {
        let unknown: Vec<&str> = accessions
            .iter()
            .filter(|a| !self.records.contains_key(a.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "unknown accessions: {}",
                unknown.join(", ")
            )));
        }
        Ok(accessions
            .iter()
            .filter_map(|a| self.records.get(a).cloned())
            .collect())
    }
}

/// Materialize the submitted records
pub fn materialize(input: &JobInput, repository: &dyn RecordRepository) -> Result<Vec<SequenceRecord>> {
    let records = match input {
        JobInput::Sequences(records) => records.clone(),
        JobInput::Accessions(ids) => repository.fetch(ids)?,
    };
    check_records(&records)?;
    Ok(records)
}

fn check_records(records: &[SequenceRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(OrchestratorError::validation("no records were submitted"));
    }
    let mut seen = std::collections::HashSet::new();
    for record in records {
        if record.id.trim().is_empty() || record.id.contains(char::is_whitespace) {
            return Err(OrchestratorError::validation(format!(
                "record id '{}' must be non-empty and contain no whitespace",
                record.id
            )));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(OrchestratorError::validation(format!(
                "record '{}' was submitted twice",
                record.id
            )));
        }
        if record.sequence.trim().is_empty() {
            return Err(OrchestratorError::validation(format!(
                "record '{}' has no sequence",
                record.id
            )));
        }
    }
    Ok(())
}

/// Write records as FASTA, 60 residues per line
pub async fn write_fasta(records: &[SequenceRecord], path: &Path) -> Result<()> {
    let mut out = String::new();
    for record in records {
        out.push('>');
        out.push_str(&record.id);
        out.push('\n');
        let residues: Vec<char> = record
            .sequence
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        for chunk in residues.chunks(60) {
            out.extend(chunk);
            out.push('\n');
        }
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(out.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
