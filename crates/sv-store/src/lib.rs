//! In-memory visit collection, dataset loading, and configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sv_core::{
    CoreError, CoreResult, NewVisit, VisitId, VisitPatch, VisitRecord, VisitRepository,
};
use sv_utils::contains_ignore_case;

/// Directory name used under the platform config dir.
pub const APP_DIR_NAME: &str = "sitevisits";

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment variable overriding the dataset path.
pub const DATA_ENV: &str = "SITEVISITS_DATA";

/// Environment variable overriding the export directory.
pub const EXPORT_DIR_ENV: &str = "SITEVISITS_EXPORT_DIR";

const DEMO_VISITS: &str = include_str!("demo_visits.yaml");

/// The authoritative, insertion-ordered collection of visits for a session.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    visits: Vec<VisitRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from existing records, rejecting invalid records and duplicate ids.
    pub fn with_visits(visits: Vec<VisitRecord>) -> CoreResult<Self> {
        let mut store = Self::new();
        for visit in visits {
            visit.validate()?;
            if store.get(&visit.id).is_some() {
                return Err(CoreError::Validation(format!(
                    "duplicate visit id: {}",
                    visit.id
                )));
            }
            store.visits.push(visit);
        }
        debug!(count = store.visits.len(), "loaded visits into store");
        Ok(store)
    }

    /// Owned copy of the collection for read-only consumers.
    pub fn snapshot(&self) -> Vec<VisitRecord> {
        self.visits.clone()
    }

    /// Number of stored visits.
    pub fn len(&self) -> usize {
        self.visits.len()
    }

    /// True when the store holds no visits.
    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    fn position(&self, id: &VisitId) -> CoreResult<usize> {
        self.visits
            .iter()
            .position(|visit| &visit.id == id)
            .ok_or_else(|| CoreError::NotFound(id.clone()))
    }

    fn fresh_id(&self) -> VisitId {
        loop {
            let id = VisitId::generate();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

/// True when `query` occurs in the contractor name, company, or job type.
pub fn matches_query(visit: &VisitRecord, query: &str) -> bool {
    contains_ignore_case(&visit.contractor_name, query)
        || contains_ignore_case(&visit.company, query)
        || contains_ignore_case(&visit.job_type, query)
}

impl VisitRepository for MemoryStore {
    fn list(&self) -> &[VisitRecord] {
        &self.visits
    }

    fn get(&self, id: &VisitId) -> Option<&VisitRecord> {
        self.visits.iter().find(|visit| &visit.id == id)
    }

    fn add(&mut self, visit: NewVisit) -> CoreResult<VisitRecord> {
        visit.validate()?;
        let record = VisitRecord::from_new(self.fresh_id(), visit);
        info!(id = %record.id, contractor = %record.contractor_name, "visit added");
        self.visits.push(record.clone());
        Ok(record)
    }

    fn update(&mut self, id: &VisitId, patch: &VisitPatch) -> CoreResult<VisitRecord> {
        let index = self.position(id)?;
        let record = &mut self.visits[index];
        patch.apply(record)?;
        info!(id = %id, "visit updated");
        Ok(record.clone())
    }

    fn remove(&mut self, id: &VisitId) -> CoreResult<VisitRecord> {
        let index = self.position(id)?;
        let removed = self.visits.remove(index);
        info!(id = %id, "visit removed");
        Ok(removed)
    }

    fn search(&self, query: &str) -> Vec<&VisitRecord> {
        self.visits
            .iter()
            .filter(|visit| matches_query(visit, query))
            .collect()
    }
}

/// The built-in sample collection used when no dataset is configured.
pub fn demo_visits() -> CoreResult<Vec<VisitRecord>> {
    parse_dataset(DEMO_VISITS)
}

/// Parse a YAML (or JSON) array of visit records.
pub fn parse_dataset(contents: &str) -> CoreResult<Vec<VisitRecord>> {
    serde_yaml::from_str(contents).map_err(|err| CoreError::Storage(err.to_string()))
}

/// Read a dataset file from disk.
pub fn load_dataset(path: &Path) -> CoreResult<Vec<VisitRecord>> {
    let contents = fs::read_to_string(path)
        .map_err(|err| CoreError::Storage(format!("{}: {err}", path.display())))?;
    let visits = parse_dataset(&contents)?;
    debug!(path = %path.display(), count = visits.len(), "dataset read");
    Ok(visits)
}

/// Open a store from a dataset file, or from the demo collection when `path` is `None`.
pub fn open_store(path: Option<&Path>) -> CoreResult<MemoryStore> {
    let visits = match path {
        Some(path) => load_dataset(path)?,
        None => {
            info!("no dataset configured, using demo visits");
            demo_visits()?
        }
    };
    MemoryStore::with_visits(visits)
}

/// User configuration stored as YAML.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Dataset file loaded at startup.
    pub data_path: Option<String>,
    /// Directory that receives export files.
    pub export_dir: Option<String>,
}

impl AppConfig {
    /// Dataset path: environment first, then the config file.
    pub fn resolve_data_path(&self) -> Option<PathBuf> {
        env_path(DATA_ENV).or_else(|| non_blank_path(self.data_path.as_deref()))
    }

    /// Export directory: environment, then config, then the working directory.
    pub fn resolve_export_dir(&self) -> PathBuf {
        env_path(EXPORT_DIR_ENV)
            .or_else(|| non_blank_path(self.export_dir.as_deref()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .and_then(|value| non_blank_path(Some(&value)))
}

fn non_blank_path(value: Option<&str>) -> Option<PathBuf> {
    value
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

/// Location of the config file.
pub fn config_path() -> CoreResult<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    Err(CoreError::Storage(
        "unable to determine config directory".into(),
    ))
}

/// Load the config from the default location. A missing file yields defaults.
pub fn load_config() -> CoreResult<AppConfig> {
    load_config_from(&config_path()?)
}

/// Load the config from an explicit path. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> CoreResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| CoreError::Storage(err.to_string()))?;
    if contents.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|err| CoreError::Storage(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use sv_core::{TimeOfDay, VisitStatus};
    use tempfile::TempDir;

    fn new_visit(name: &str, company: &str, job_type: &str) -> NewVisit {
        NewVisit::new(
            name,
            company,
            job_type,
            "routine visit",
            NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            TimeOfDay::from_hm(9, 0).unwrap(),
            TimeOfDay::from_hm(10, 0).unwrap(),
            "ops@example.test",
            "555-0100",
        )
        .unwrap()
    }

    #[test]
    fn add_appends_in_order() {
        let mut store = MemoryStore::new();
        let first = store.add(new_visit("Ann", "Acme", "Plumbing")).unwrap();
        let second = store.add(new_visit("Bob", "Bolt", "Electrical")).unwrap();
        let ids: Vec<_> = store.list().iter().map(|visit| visit.id.clone()).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn update_merges_in_place() {
        let mut store = MemoryStore::new();
        store.add(new_visit("Ann", "Acme", "Plumbing")).unwrap();
        let target = store.add(new_visit("Bob", "Bolt", "Electrical")).unwrap();
        store.add(new_visit("Cy", "Core", "Cleaning")).unwrap();

        let updated = store
            .update(&target.id, &VisitPatch::status(VisitStatus::Completed))
            .unwrap();
        assert_eq!(updated.status, VisitStatus::Completed);
        assert_eq!(updated.contractor_name, "Bob");
        assert_eq!(store.list()[1], updated);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let mut store = MemoryStore::new();
        let id = VisitId::new("missing");
        let result = store.update(&id, &VisitPatch::status(VisitStatus::Cancelled));
        assert_eq!(result, Err(CoreError::NotFound(id)));
    }

    #[test]
    fn remove_unknown_id_is_not_found() {
        let mut store = MemoryStore::new();
        store.add(new_visit("Ann", "Acme", "Plumbing")).unwrap();
        let id = VisitId::new("missing");
        assert_eq!(store.remove(&id), Err(CoreError::NotFound(id)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn search_matches_name_company_and_job_type() {
        let mut store = MemoryStore::new();
        store.add(new_visit("Ann Lee", "Acme", "Plumbing")).unwrap();
        store.add(new_visit("Bob", "CoolAir HVAC", "HVAC Maintenance")).unwrap();
        store.add(new_visit("Cy", "Core", "Cleaning")).unwrap();

        assert_eq!(store.search("ann").len(), 1);
        assert_eq!(store.search("hvac").len(), 1);
        assert_eq!(store.search("CLEAN")[0].contractor_name, "Cy");
        assert_eq!(store.search("").len(), 3);
        assert!(store.search("routine").is_empty());
    }

    #[test]
    fn search_keeps_surrounding_spaces() {
        let mut store = MemoryStore::new();
        store.add(new_visit("Ann Lee", "Acme", "Plumbing")).unwrap();
        store.add(new_visit("Leeroy", "Bolt", "Electrical")).unwrap();

        let hits: Vec<_> = store
            .search(" Lee")
            .iter()
            .map(|visit| visit.contractor_name.as_str())
            .collect();
        assert_eq!(hits, vec!["Ann Lee"]);
        assert_eq!(store.search(" ").len(), 1);
        assert_eq!(store.search("lee").len(), 2);
    }

    #[test]
    fn with_visits_rejects_duplicate_ids() {
        let visits = demo_visits().unwrap();
        let mut doubled = visits.clone();
        doubled.push(visits[0].clone());
        assert!(matches!(
            MemoryStore::with_visits(doubled),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn demo_visits_load() {
        let store = open_store(None).unwrap();
        assert_eq!(store.len(), 10);
        assert_eq!(store.list()[5].status, VisitStatus::InProgress);
    }

    #[test]
    fn dataset_file_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("visits.yaml");
        let visits = demo_visits().unwrap();
        fs::write(&path, serde_yaml::to_string(&visits).unwrap()).unwrap();

        let store = open_store(Some(&path)).unwrap();
        assert_eq!(store.snapshot(), visits);
    }

    #[test]
    fn dataset_accepts_json() {
        let json = r#"[{"id":"a","contractorName":"Ann","company":"Acme","jobType":"Plumbing",
            "description":"leak","date":"2025-01-10","timeIn":"08:00","timeOut":"09:00",
            "status":"Completed","recurrence":"Monthly","contactEmail":"a@x.test","contactPhone":"1"}]"#;
        let visits = parse_dataset(json).unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].next_scheduled, None);
    }

    #[test]
    fn dataset_rejects_unknown_status() {
        let yaml = "- id: a\n  contractorName: Ann\n  company: Acme\n  jobType: P\n  description: d\n  date: '2025-01-10'\n  timeIn: '08:00'\n  timeOut: '09:00'\n  status: Done\n  contactEmail: a\n  contactPhone: b\n";
        assert!(matches!(parse_dataset(yaml), Err(CoreError::Storage(_))));
    }

    #[test]
    fn missing_config_is_default() {
        let temp = TempDir::new().expect("temp dir");
        let config = load_config_from(&temp.path().join("config.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn config_reads_paths() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("config.yaml");
        fs::write(&path, "data_path: /tmp/visits.yaml\nexport_dir: /tmp/out\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.data_path.as_deref(), Some("/tmp/visits.yaml"));
        assert_eq!(config.export_dir.as_deref(), Some("/tmp/out"));
    }

    proptest! {
        #[test]
        fn added_ids_are_unique(count in 1usize..40) {
            let mut store = MemoryStore::new();
            for index in 0..count {
                store.add(new_visit(&format!("C{index}"), "Acme", "Plumbing")).unwrap();
            }
            let mut ids: Vec<_> = store.list().iter().map(|visit| visit.id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), count);
        }

        #[test]
        fn removed_visit_never_found(count in 1usize..12, pick in 0usize..12, query in "[a-z]{0,2}") {
            let mut store = MemoryStore::new();
            for index in 0..count {
                store.add(new_visit(&format!("name{index}"), "Acme", "Plumbing")).unwrap();
            }
            let id = store.list()[pick % count].id.clone();
            store.remove(&id).unwrap();
            prop_assert!(store.search(&query).iter().all(|visit| visit.id != id));
            prop_assert!(store.get(&id).is_none());
        }

        #[test]
        fn search_finds_any_case_of_name_substring(
            name in "[A-Za-z]{3,12}",
            start in 0usize..3,
            upper in proptest::bool::ANY,
        ) {
            let mut store = MemoryStore::new();
            let added = store.add(new_visit(&name, "Zeta", "Zoning")).unwrap();
            let query: String = name.chars().skip(start).take(2).collect();
            let query = if upper { query.to_uppercase() } else { query.to_lowercase() };
            prop_assert!(store.search(&query).iter().any(|visit| visit.id == added.id));
        }
    }
}
