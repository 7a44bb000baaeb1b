//! Core domain entities, rules, and traits for contractor site visits.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by core validation and domain rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Returned when a required field is missing or blank.
    #[error("validation error: {0}")]
    Validation(String),
    /// Returned when an update or delete references an unknown id.
    #[error("visit not found: {0}")]
    NotFound(VisitId),
    /// Returned when a ratio is requested over an empty collection.
    #[error("completion rate is undefined for an empty collection")]
    DivisionUndefined,
    /// Returned when a date, time, or enum label cannot be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Returned when a dataset or config file cannot be read.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Opaque identifier of a visit, unique within a collection.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct VisitId(String);

impl VisitId {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Access the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VisitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a visit.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum VisitStatus {
    /// The visit happened and the work is done.
    Completed,
    /// The contractor is on site.
    #[serde(rename = "In Progress")]
    InProgress,
    /// The visit is planned.
    #[default]
    Scheduled,
    /// The visit was called off.
    Cancelled,
}

impl VisitStatus {
    /// Every status, in display order.
    pub const ALL: [VisitStatus; 4] = [
        VisitStatus::Completed,
        VisitStatus::InProgress,
        VisitStatus::Scheduled,
        VisitStatus::Cancelled,
    ];

    /// Human-readable label, also used in exports.
    pub fn label(self) -> &'static str {
        match self {
            VisitStatus::Completed => "Completed",
            VisitStatus::InProgress => "In Progress",
            VisitStatus::Scheduled => "Scheduled",
            VisitStatus::Cancelled => "Cancelled",
        }
    }

    /// The next status in display order, wrapping around.
    pub fn cycle(self) -> Self {
        match self {
            VisitStatus::Completed => VisitStatus::InProgress,
            VisitStatus::InProgress => VisitStatus::Scheduled,
            VisitStatus::Scheduled => VisitStatus::Cancelled,
            VisitStatus::Cancelled => VisitStatus::Completed,
        }
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VisitStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> CoreResult<Self> {
        match normalize_label(value).as_str() {
            "completed" => Ok(VisitStatus::Completed),
            "inprogress" => Ok(VisitStatus::InProgress),
            "scheduled" => Ok(VisitStatus::Scheduled),
            "cancelled" | "canceled" => Ok(VisitStatus::Cancelled),
            _ => Err(CoreError::Parse(format!("unknown status: {value}"))),
        }
    }
}

/// How often a contractor returns. Descriptive only.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Recurrence {
    /// A single visit.
    #[default]
    #[serde(rename = "One-time")]
    OneTime,
    /// Every day.
    Daily,
    /// Every week.
    Weekly,
    /// Every month.
    Monthly,
    /// Every three months.
    Quarterly,
}

impl Recurrence {
    /// Every recurrence, in display order.
    pub const ALL: [Recurrence; 5] = [
        Recurrence::OneTime,
        Recurrence::Daily,
        Recurrence::Weekly,
        Recurrence::Monthly,
        Recurrence::Quarterly,
    ];

    /// Human-readable label, also used in exports.
    pub fn label(self) -> &'static str {
        match self {
            Recurrence::OneTime => "One-time",
            Recurrence::Daily => "Daily",
            Recurrence::Weekly => "Weekly",
            Recurrence::Monthly => "Monthly",
            Recurrence::Quarterly => "Quarterly",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Recurrence {
    type Err = CoreError;

    fn from_str(value: &str) -> CoreResult<Self> {
        match normalize_label(value).as_str() {
            "onetime" | "once" => Ok(Recurrence::OneTime),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            "quarterly" => Ok(Recurrence::Quarterly),
            _ => Err(CoreError::Parse(format!("unknown recurrence: {value}"))),
        }
    }
}

// Lowercase and drop separators so "In Progress", "in-progress" and "in_progress" agree.
fn normalize_label(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !matches!(*ch, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// A wall-clock time rendered as `HH:MM`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Build a time from hour and minute.
    pub fn from_hm(hour: u32, minute: u32) -> CoreResult<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| CoreError::Parse(format!("invalid time: {hour:02}:{minute:02}")))
    }

    /// Access the underlying time.
    pub fn time(self) -> NaiveTime {
        self.0
    }

    /// Twelve-hour rendering such as `9:05 AM`.
    pub fn to_12h(self) -> String {
        let (pm, hour) = self.0.hour12();
        let suffix = if pm { "PM" } else { "AM" };
        format!("{hour}:{:02} {suffix}", self.0.minute())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl FromStr for TimeOfDay {
    type Err = CoreError;

    fn from_str(value: &str) -> CoreResult<Self> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .map(|time| Self(time.with_second(0).unwrap_or(time)))
            .map_err(|_| CoreError::Parse(format!("invalid time (expected HH:MM): {value}")))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> CoreResult<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CoreError::Parse(format!("invalid date (expected YYYY-MM-DD): {value}")))
}

/// Long date rendering such as `Wed, Mar 5, 2025`.
pub fn format_long_date(date: NaiveDate) -> String {
    date.format("%a, %b %-d, %Y").to_string()
}

fn require_text(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// A contractor site visit stored in the collection.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    /// Unique identifier, immutable once assigned.
    pub id: VisitId,
    /// Name of the visiting contractor.
    pub contractor_name: String,
    /// Company the contractor works for.
    pub company: String,
    /// Free-form category label used for grouping.
    pub job_type: String,
    /// What the visit is about.
    pub description: String,
    /// Primary scheduling anchor.
    pub date: NaiveDate,
    /// Arrival time.
    pub time_in: TimeOfDay,
    /// Departure time. Not ordered against `time_in`.
    pub time_out: TimeOfDay,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: VisitStatus,
    /// How often the contractor returns.
    #[serde(default)]
    pub recurrence: Recurrence,
    /// Advisory date of the next visit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled: Option<NaiveDate>,
    /// Contact email, not format-checked.
    pub contact_email: String,
    /// Contact phone, not format-checked.
    pub contact_phone: String,
}

impl VisitRecord {
    /// Attach an id to validated visit data.
    pub fn from_new(id: VisitId, visit: NewVisit) -> Self {
        Self {
            id,
            contractor_name: visit.contractor_name,
            company: visit.company,
            job_type: visit.job_type,
            description: visit.description,
            date: visit.date,
            time_in: visit.time_in,
            time_out: visit.time_out,
            status: visit.status,
            recurrence: visit.recurrence,
            next_scheduled: visit.next_scheduled,
            contact_email: visit.contact_email,
            contact_phone: visit.contact_phone,
        }
    }

    /// Check the required fields of a record loaded from outside.
    pub fn validate(&self) -> CoreResult<()> {
        require_text("id", self.id.as_str())?;
        validate_text_fields(
            &self.contractor_name,
            &self.company,
            &self.job_type,
            &self.description,
            &self.contact_email,
            &self.contact_phone,
        )
    }

    /// True when either the visit date or the next scheduled date is `date`.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        self.date == date || self.next_scheduled == Some(date)
    }
}

fn validate_text_fields(
    contractor_name: &str,
    company: &str,
    job_type: &str,
    description: &str,
    contact_email: &str,
    contact_phone: &str,
) -> CoreResult<()> {
    require_text("contractor name", contractor_name)?;
    require_text("company", company)?;
    require_text("job type", job_type)?;
    require_text("description", description)?;
    require_text("contact email", contact_email)?;
    require_text("contact phone", contact_phone)
}

/// Visit data before an id is assigned.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewVisit {
    pub contractor_name: String,
    pub company: String,
    pub job_type: String,
    pub description: String,
    pub date: NaiveDate,
    pub time_in: TimeOfDay,
    pub time_out: TimeOfDay,
    #[serde(default)]
    pub status: VisitStatus,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub next_scheduled: Option<NaiveDate>,
    pub contact_email: String,
    pub contact_phone: String,
}

impl NewVisit {
    /// Create visit data with default status and recurrence, validating required fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contractor_name: impl Into<String>,
        company: impl Into<String>,
        job_type: impl Into<String>,
        description: impl Into<String>,
        date: NaiveDate,
        time_in: TimeOfDay,
        time_out: TimeOfDay,
        contact_email: impl Into<String>,
        contact_phone: impl Into<String>,
    ) -> CoreResult<Self> {
        let visit = Self {
            contractor_name: contractor_name.into(),
            company: company.into(),
            job_type: job_type.into(),
            description: description.into(),
            date,
            time_in,
            time_out,
            status: VisitStatus::default(),
            recurrence: Recurrence::default(),
            next_scheduled: None,
            contact_email: contact_email.into(),
            contact_phone: contact_phone.into(),
        };
        visit.validate()?;
        Ok(visit)
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: VisitStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the recurrence.
    #[must_use]
    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    /// Set the advisory next visit date.
    #[must_use]
    pub fn with_next_scheduled(mut self, date: Option<NaiveDate>) -> Self {
        self.next_scheduled = date;
        self
    }

    /// Check that every required text field is present.
    pub fn validate(&self) -> CoreResult<()> {
        validate_text_fields(
            &self.contractor_name,
            &self.company,
            &self.job_type,
            &self.description,
            &self.contact_email,
            &self.contact_phone,
        )
    }
}

/// A typed partial update. `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisitPatch {
    pub contractor_name: Option<String>,
    pub company: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub time_in: Option<TimeOfDay>,
    pub time_out: Option<TimeOfDay>,
    pub status: Option<VisitStatus>,
    pub recurrence: Option<Recurrence>,
    /// `Some(None)` clears the date.
    pub next_scheduled: Option<Option<NaiveDate>>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

impl VisitPatch {
    /// A patch that only changes the status.
    pub fn status(status: VisitStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// The minimal patch turning `old` into `new`. The id is ignored.
    pub fn diff(old: &VisitRecord, new: &VisitRecord) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            (old != new).then(|| new.clone())
        }
        Self {
            contractor_name: changed(&old.contractor_name, &new.contractor_name),
            company: changed(&old.company, &new.company),
            job_type: changed(&old.job_type, &new.job_type),
            description: changed(&old.description, &new.description),
            date: changed(&old.date, &new.date),
            time_in: changed(&old.time_in, &new.time_in),
            time_out: changed(&old.time_out, &new.time_out),
            status: changed(&old.status, &new.status),
            recurrence: changed(&old.recurrence, &new.recurrence),
            next_scheduled: changed(&old.next_scheduled, &new.next_scheduled),
            contact_email: changed(&old.contact_email, &new.contact_email),
            contact_phone: changed(&old.contact_phone, &new.contact_phone),
        }
    }

    /// True when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject blank replacements for required text fields.
    pub fn validate(&self) -> CoreResult<()> {
        let text_fields = [
            ("contractor name", &self.contractor_name),
            ("company", &self.company),
            ("job type", &self.job_type),
            ("description", &self.description),
            ("contact email", &self.contact_email),
            ("contact phone", &self.contact_phone),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                require_text(field, value)?;
            }
        }
        Ok(())
    }

    /// Merge the patch over `record` in place. Nothing changes if validation fails.
    pub fn apply(&self, record: &mut VisitRecord) -> CoreResult<()> {
        self.validate()?;
        if let Some(value) = &self.contractor_name {
            record.contractor_name.clone_from(value);
        }
        if let Some(value) = &self.company {
            record.company.clone_from(value);
        }
        if let Some(value) = &self.job_type {
            record.job_type.clone_from(value);
        }
        if let Some(value) = &self.description {
            record.description.clone_from(value);
        }
        if let Some(value) = self.date {
            record.date = value;
        }
        if let Some(value) = self.time_in {
            record.time_in = value;
        }
        if let Some(value) = self.time_out {
            record.time_out = value;
        }
        if let Some(value) = self.status {
            record.status = value;
        }
        if let Some(value) = self.recurrence {
            record.recurrence = value;
        }
        if let Some(value) = self.next_scheduled {
            record.next_scheduled = value;
        }
        if let Some(value) = &self.contact_email {
            record.contact_email.clone_from(value);
        }
        if let Some(value) = &self.contact_phone {
            record.contact_phone.clone_from(value);
        }
        Ok(())
    }
}

/// Repository abstraction over the authoritative visit collection.
pub trait VisitRepository {
    /// All visits in insertion order.
    fn list(&self) -> &[VisitRecord];
    /// Fetch a single visit by id.
    fn get(&self, id: &VisitId) -> Option<&VisitRecord>;
    /// Store a new visit under a fresh id and return it.
    fn add(&mut self, visit: NewVisit) -> CoreResult<VisitRecord>;
    /// Merge a partial update into an existing visit.
    fn update(&mut self, id: &VisitId, patch: &VisitPatch) -> CoreResult<VisitRecord>;
    /// Delete a visit. Callers confirm with the user first.
    fn remove(&mut self, id: &VisitId) -> CoreResult<VisitRecord>;
    /// Case-insensitive match on contractor name, company, and job type.
    fn search(&self, query: &str) -> Vec<&VisitRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).unwrap()
    }

    fn sample() -> VisitRecord {
        let new = NewVisit::new(
            "Mike Johnson",
            "CoolAir HVAC",
            "HVAC Maintenance",
            "Quarterly filter change",
            date("2025-03-05"),
            "09:00".parse().unwrap(),
            "11:30".parse().unwrap(),
            "mike@coolair.test",
            "555-0101",
        )
        .unwrap();
        VisitRecord::from_new(VisitId::new("1"), new)
    }

    #[test]
    fn new_visit_uses_defaults() {
        let record = sample();
        assert_eq!(record.status, VisitStatus::Scheduled);
        assert_eq!(record.recurrence, Recurrence::OneTime);
        assert_eq!(record.next_scheduled, None);
    }

    #[test]
    fn new_visit_rejects_blank_fields() {
        let result = NewVisit::new(
            "  ",
            "CoolAir HVAC",
            "HVAC",
            "filters",
            date("2025-03-05"),
            TimeOfDay::from_hm(9, 0).unwrap(),
            TimeOfDay::from_hm(10, 0).unwrap(),
            "a@b.test",
            "555",
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn status_parses_labels_and_variants() {
        assert_eq!("In Progress".parse::<VisitStatus>().unwrap(), VisitStatus::InProgress);
        assert_eq!("in-progress".parse::<VisitStatus>().unwrap(), VisitStatus::InProgress);
        assert_eq!("COMPLETED".parse::<VisitStatus>().unwrap(), VisitStatus::Completed);
        assert!("done".parse::<VisitStatus>().is_err());
    }

    #[test]
    fn recurrence_parses_one_time_spellings() {
        for label in ["One-time", "one_time", "onetime"] {
            assert_eq!(label.parse::<Recurrence>().unwrap(), Recurrence::OneTime);
        }
    }

    #[test]
    fn status_cycle_visits_every_value() {
        let mut status = VisitStatus::Completed;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(status);
            status = status.cycle();
        }
        assert_eq!(status, VisitStatus::Completed);
        assert_eq!(seen, VisitStatus::ALL.to_vec());
    }

    #[test]
    fn time_of_day_formats() {
        let time: TimeOfDay = "14:05".parse().unwrap();
        assert_eq!(time.to_string(), "14:05");
        assert_eq!(time.to_12h(), "2:05 PM");
        assert!("25:00".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn long_date_matches_tooltip_style() {
        assert_eq!(format_long_date(date("2025-03-05")), "Wed, Mar 5, 2025");
    }

    #[test]
    fn patch_keeps_absent_fields_and_id() {
        let mut record = sample();
        let patch = VisitPatch {
            company: Some("Arctic Air".into()),
            next_scheduled: Some(Some(date("2025-06-05"))),
            ..VisitPatch::default()
        };
        patch.apply(&mut record).unwrap();
        assert_eq!(record.id.as_str(), "1");
        assert_eq!(record.company, "Arctic Air");
        assert_eq!(record.contractor_name, "Mike Johnson");
        assert_eq!(record.next_scheduled, Some(date("2025-06-05")));
    }

    #[test]
    fn patch_applied_twice_is_stable() {
        let mut once = sample();
        let patch = VisitPatch {
            description: Some("Replace compressor".into()),
            status: Some(VisitStatus::InProgress),
            ..VisitPatch::default()
        };
        patch.apply(&mut once).unwrap();
        let mut twice = once.clone();
        patch.apply(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn invalid_patch_leaves_record_untouched() {
        let mut record = sample();
        let before = record.clone();
        let patch = VisitPatch {
            company: Some("New Co".into()),
            job_type: Some(String::new()),
            ..VisitPatch::default()
        };
        assert!(matches!(patch.apply(&mut record), Err(CoreError::Validation(_))));
        assert_eq!(record, before);
    }

    #[test]
    fn diff_produces_minimal_patch() {
        let old = sample();
        let mut new = old.clone();
        new.status = VisitStatus::Completed;
        new.next_scheduled = Some(date("2025-04-01"));
        let patch = VisitPatch::diff(&old, &new);
        assert_eq!(patch.status, Some(VisitStatus::Completed));
        assert_eq!(patch.next_scheduled, Some(Some(date("2025-04-01"))));
        assert!(patch.company.is_none());
        assert!(VisitPatch::diff(&old, &old).is_empty());
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = sample();
        let yaml = serde_yaml::to_string(&record).unwrap();
        assert!(yaml.contains("contractorName: Mike Johnson"));
        assert!(yaml.contains("timeIn:"));
        assert!(yaml.contains("09:00"));
        assert!(yaml.contains("status: Scheduled"));
        assert!(yaml.contains("recurrence: One-time"));
        let back: VisitRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn occurs_on_checks_both_dates() {
        let mut record = sample();
        record.next_scheduled = Some(date("2025-03-20"));
        assert!(record.occurs_on(date("2025-03-05")));
        assert!(record.occurs_on(date("2025-03-20")));
        assert!(!record.occurs_on(date("2025-03-06")));
    }
}
