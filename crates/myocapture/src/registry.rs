//! Patient registry - append-only store keyed by patient id.
//!
//! Lookups are linear scans, matching the flat-file store underneath.
//! There is no update or delete.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::error::CaptureError;

/// Column names of the registry file.
pub const REGISTRY_HEADER: [&str; 4] = ["nombre", "curp", "extremidad_afectada", "observaciones"];

/// One registered patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub patient_id: String,
    pub name: String,
    pub affected_limb: String,
    pub observations: String,
}

impl PatientRecord {
    /// Build a record, trimming fields and rejecting blank required ones.
    pub fn new(
        patient_id: impl Into<String>,
        name: impl Into<String>,
        affected_limb: impl Into<String>,
        observations: impl Into<String>,
    ) -> Result<Self, CaptureError> {
        let record = Self {
            patient_id: patient_id.into().trim().to_string(),
            name: name.into().trim().to_string(),
            affected_limb: affected_limb.into().trim().to_string(),
            observations: observations.into().trim().to_string(),
        };

        for (field, value) in [
            ("patientId", &record.patient_id),
            ("name", &record.name),
            ("affectedLimb", &record.affected_limb),
        ] {
            if value.is_empty() {
                return Err(CaptureError::validation(format!("{field} must not be empty")));
            }
        }

        Ok(record)
    }

    fn to_row(&self) -> [&str; 4] {
        [
            &self.name,
            &self.patient_id,
            &self.affected_limb,
            &self.observations,
        ]
    }

    fn from_row(row: &csv::StringRecord) -> Option<Self> {
        if row.len() < 4 {
            return None;
        }
        Some(Self {
            name: row[0].trim().to_string(),
            patient_id: row[1].trim().to_string(),
            affected_limb: row[2].trim().to_string(),
            observations: row[3].trim().to_string(),
        })
    }
}

/// Trait for patient storage backends
pub trait PatientStore: Send + Sync {
    /// Exact match on patient id.
    fn find_by_id(&self, patient_id: &str) -> Result<PatientRecord, CaptureError>;

    /// Exact match on name; the earliest registration wins.
    fn find_by_name(&self, name: &str) -> Result<PatientRecord, CaptureError>;

    /// Append a new patient; `Conflict` if the id is taken.
    fn register(&self, record: PatientRecord) -> Result<(), CaptureError>;

    /// Every record in registration order.
    fn all(&self) -> Result<Vec<PatientRecord>, CaptureError>;

    fn count(&self) -> Result<usize, CaptureError> {
        Ok(self.all()?.len())
    }
}

fn scan_id<'a>(records: &'a [PatientRecord], patient_id: &str) -> Option<&'a PatientRecord> {
    let patient_id = patient_id.trim();
    records.iter().find(|r| r.patient_id == patient_id)
}

fn scan_name<'a>(records: &'a [PatientRecord], name: &str) -> Option<&'a PatientRecord> {
    let name = name.trim();
    records.iter().find(|r| r.name == name)
}

fn not_found_id(patient_id: &str) -> CaptureError {
    CaptureError::not_found(format!("patient {}", patient_id.trim()))
}

fn not_found_name(name: &str) -> CaptureError {
    CaptureError::not_found(format!("patient named {}", name.trim()))
}

fn duplicate(patient_id: &str) -> CaptureError {
    CaptureError::conflict(format!("patient {patient_id} is already registered"))
}

/// In-memory registry (Vec-backed)
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<Vec<PatientRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<PatientRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl PatientStore for InMemoryRegistry {
    fn find_by_id(&self, patient_id: &str) -> Result<PatientRecord, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        scan_id(&records, patient_id)
            .cloned()
            .ok_or_else(|| not_found_id(patient_id))
    }

    fn find_by_name(&self, name: &str) -> Result<PatientRecord, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        scan_name(&records, name)
            .cloned()
            .ok_or_else(|| not_found_name(name))
    }

    fn register(&self, record: PatientRecord) -> Result<(), CaptureError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if scan_id(&records, &record.patient_id).is_some() {
            return Err(duplicate(&record.patient_id));
        }
        records.push(record);
        Ok(())
    }

    fn all(&self) -> Result<Vec<PatientRecord>, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.clone())
    }

    fn count(&self) -> Result<usize, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.len())
    }
}

/// File-backed registry: CSV on disk, mirrored in memory for lookups.
///
/// A row only enters the in-memory mirror after it reached the file, so a
/// failed append leaves the registry unchanged.
#[derive(Debug)]
pub struct CsvRegistry {
    path: PathBuf,
    records: RwLock<Vec<PatientRecord>>,
}

impl CsvRegistry {
    /// Open an existing registry file, or create it with its header row.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() && std::fs::metadata(&path)?.len() > 0 {
            Self::load(&path)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(REGISTRY_HEADER)?;
            writer.flush()?;
            info!("created patient registry at {}", path.display());
            Vec::new()
        };

        debug!(patients = records.len(), "patient registry loaded");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn load(path: &Path) -> Result<Vec<PatientRecord>, CaptureError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row?;
            match PatientRecord::from_row(&row) {
                Some(record) => records.push(record),
                // header is line 1
                None => warn!(line = i + 2, "skipping short registry row in {}", path.display()),
            }
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &PatientRecord) -> Result<(), CaptureError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(record.to_row())?;
        writer.flush()?;
        Ok(())
    }
}

impl PatientStore for CsvRegistry {
    fn find_by_id(&self, patient_id: &str) -> Result<PatientRecord, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        scan_id(&records, patient_id)
            .cloned()
            .ok_or_else(|| not_found_id(patient_id))
    }

    fn find_by_name(&self, name: &str) -> Result<PatientRecord, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        scan_name(&records, name)
            .cloned()
            .ok_or_else(|| not_found_name(name))
    }

    fn register(&self, record: PatientRecord) -> Result<(), CaptureError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if scan_id(&records, &record.patient_id).is_some() {
            return Err(duplicate(&record.patient_id));
        }

        self.append(&record)?;
        info!(patient.id = %record.patient_id, "registered patient");
        records.push(record);
        Ok(())
    }

    fn all(&self) -> Result<Vec<PatientRecord>, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.clone())
    }

    fn count(&self) -> Result<usize, CaptureError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.len())
    }
}
