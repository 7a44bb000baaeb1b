//! Derived views over the visit collection: distributions, trends, and calendar placement.
//!
//! Every function here is pure. Inputs are borrowed and never mutated, and the
//! results are recomputed from scratch on each call.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use sv_core::{CoreError, CoreResult, VisitRecord, VisitStatus};

/// Fields a distribution can be computed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupField {
    JobType,
    Status,
    Recurrence,
    Company,
    Contractor,
}

impl GroupField {
    /// Display name of the field.
    pub fn label(self) -> &'static str {
        match self {
            GroupField::JobType => "Job Type",
            GroupField::Status => "Status",
            GroupField::Recurrence => "Recurrence",
            GroupField::Company => "Company",
            GroupField::Contractor => "Contractor",
        }
    }

    /// The value of this field on `visit`, as displayed.
    pub fn value_of(self, visit: &VisitRecord) -> String {
        match self {
            GroupField::JobType => visit.job_type.clone(),
            GroupField::Status => visit.status.label().to_string(),
            GroupField::Recurrence => visit.recurrence.label().to_string(),
            GroupField::Company => visit.company.clone(),
            GroupField::Contractor => visit.contractor_name.clone(),
        }
    }
}

/// One bucket of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldCount {
    pub value: String,
    pub count: usize,
}

/// Count occurrences of each key in a single pass, keeping first-occurrence order.
pub fn group_by_key<'a, I, K, F>(visits: I, mut key: F) -> Vec<(K, usize)>
where
    I: IntoIterator<Item = &'a VisitRecord>,
    K: Eq + Hash + Clone,
    F: FnMut(&VisitRecord) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, usize)> = Vec::new();
    for visit in visits {
        let value = key(visit);
        match slots.get(&value) {
            Some(&slot) => groups[slot].1 += 1,
            None => {
                slots.insert(value.clone(), groups.len());
                groups.push((value, 1));
            }
        }
    }
    groups
}

/// Distribution of `field` values across `visits`.
pub fn group_by(visits: &[VisitRecord], field: GroupField) -> Vec<FieldCount> {
    group_by_key(visits, |visit| field.value_of(visit))
        .into_iter()
        .map(|(value, count)| FieldCount { value, count })
        .collect()
}

/// A calendar month, used as the trend bucket and the calendar page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    first: NaiveDate,
}

impl YearMonth {
    /// Build a month from a year and a 1-based month number.
    pub fn new(year: i32, month: u32) -> CoreResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::Parse(format!("month out of range: {month}")));
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first| Self { first })
            .ok_or_else(|| CoreError::Parse(format!("year out of range: {year}")))
    }

    /// Build a month from a 1-based month number that may overflow in either
    /// direction: month 0 is December of the previous year, month 13 is
    /// January of the next.
    pub fn normalized(year: i32, month: i32) -> CoreResult<Self> {
        let index = i64::from(year) * 12 + i64::from(month) - 1;
        let year = i32::try_from(index.div_euclid(12))
            .map_err(|_| CoreError::Parse(format!("year out of range: {index}")))?;
        let month = u32::try_from(index.rem_euclid(12) + 1)
            .map_err(|_| CoreError::Parse(format!("month out of range: {month}")))?;
        Self::new(year, month)
    }

    /// The month containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(self) -> i32 {
        self.first.year()
    }

    pub fn month(self) -> u32 {
        self.first.month()
    }

    /// The first day of the month.
    pub fn first_day(self) -> NaiveDate {
        self.first
    }

    /// The following month. Saturates at the end of the supported calendar.
    #[must_use]
    pub fn next(self) -> Self {
        self.first
            .checked_add_months(Months::new(1))
            .map_or(self, |first| Self { first })
    }

    /// The preceding month. Saturates at the start of the supported calendar.
    #[must_use]
    pub fn prev(self) -> Self {
        self.first
            .checked_sub_months(Months::new(1))
            .map_or(self, |first| Self { first })
    }

    /// True when `date` falls inside this month.
    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }

    /// Number of days in the month, 29 for a leap February.
    pub fn day_count(self) -> u32 {
        match self.month() {
            4 | 6 | 9 | 11 => 30,
            2 => {
                if NaiveDate::from_ymd_opt(self.year(), 2, 29).is_some() {
                    29
                } else {
                    28
                }
            }
            _ => 31,
        }
    }

    /// Weekday of the first day, 0 = Sunday.
    pub fn first_weekday(self) -> u32 {
        self.first.weekday().num_days_from_sunday()
    }

    /// The date of `day` in this month, if it exists.
    pub fn date(self, day: u32) -> Option<NaiveDate> {
        self.first.with_day(day)
    }

    /// Every date of the month in order.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        (1..=self.day_count()).filter_map(move |day| self.date(day))
    }

    /// Short label such as `Jan 2025`.
    pub fn label(self) -> String {
        self.first.format("%b %Y").to_string()
    }

    /// Long label such as `January 2025`.
    pub fn long_label(self) -> String {
        self.first.format("%B %Y").to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = CoreError;

    fn from_str(value: &str) -> CoreResult<Self> {
        let invalid = || CoreError::Parse(format!("invalid month (expected YYYY-MM): {value}"));
        let (year, month) = value.trim().rsplit_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

/// Visit count for one month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrendPoint {
    pub period: YearMonth,
    pub count: usize,
}

/// Visits per month of their `date`, in first-occurrence order.
pub fn monthly_trend(visits: &[VisitRecord]) -> Vec<TrendPoint> {
    group_by_key(visits, |visit| YearMonth::from_date(visit.date))
        .into_iter()
        .map(|(period, count)| TrendPoint { period, count })
        .collect()
}

/// Share of completed visits as a whole percentage, rounded half up.
pub fn try_completion_rate(visits: &[VisitRecord]) -> CoreResult<u8> {
    let total = visits.len();
    if total == 0 {
        return Err(CoreError::DivisionUndefined);
    }
    let completed = count_status(visits, VisitStatus::Completed);
    let rate = (completed * 100 + total / 2) / total;
    Ok(u8::try_from(rate.min(100)).unwrap_or(100))
}

/// Like [`try_completion_rate`], reporting 0 for an empty collection.
pub fn completion_rate(visits: &[VisitRecord]) -> u8 {
    try_completion_rate(visits).unwrap_or(0)
}

fn count_status(visits: &[VisitRecord], status: VisitStatus) -> usize {
    visits.iter().filter(|visit| visit.status == status).count()
}

/// Headline numbers for the analytics view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub completed: usize,
    /// Visits still scheduled ("upcoming").
    pub scheduled: usize,
    pub in_progress: usize,
    pub cancelled: usize,
    pub completion_rate: u8,
}

pub fn summarize(visits: &[VisitRecord]) -> Summary {
    Summary {
        total: visits.len(),
        completed: count_status(visits, VisitStatus::Completed),
        scheduled: count_status(visits, VisitStatus::Scheduled),
        in_progress: count_status(visits, VisitStatus::InProgress),
        cancelled: count_status(visits, VisitStatus::Cancelled),
        completion_rate: completion_rate(visits),
    }
}

/// Visits whose date or next scheduled date is `date`.
pub fn visits_on_date(visits: &[VisitRecord], date: NaiveDate) -> Vec<&VisitRecord> {
    visits.iter().filter(|visit| visit.occurs_on(date)).collect()
}

// The date that places a visit in `month`, preferring the visit date.
fn anchor_in(visit: &VisitRecord, month: YearMonth) -> Option<NaiveDate> {
    if month.contains(visit.date) {
        return Some(visit.date);
    }
    visit.next_scheduled.filter(|next| month.contains(*next))
}

/// Visits touching `month`, ordered by the date that fell inside it.
/// Ties keep collection order.
pub fn visits_in_month(visits: &[VisitRecord], month: YearMonth) -> Vec<&VisitRecord> {
    let mut anchored: Vec<(NaiveDate, &VisitRecord)> = visits
        .iter()
        .filter_map(|visit| anchor_in(visit, month).map(|anchor| (anchor, visit)))
        .collect();
    anchored.sort_by_key(|(anchor, _)| *anchor);
    anchored.into_iter().map(|(_, visit)| visit).collect()
}

/// Shape of a month page: blank cells before day 1, then one cell per day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalendarGrid {
    pub month: YearMonth,
    pub leading_blanks: u32,
    pub day_count: u32,
}

impl CalendarGrid {
    /// Cells in reading order: `None` for blanks, `Some(day)` otherwise.
    pub fn cells(&self) -> Vec<Option<u32>> {
        (0..self.leading_blanks)
            .map(|_| None)
            .chain((1..=self.day_count).map(Some))
            .collect()
    }

    /// Cells split into Sunday-first weeks, the last one padded with blanks.
    pub fn weeks(&self) -> Vec<[Option<u32>; 7]> {
        self.cells()
            .chunks(7)
            .map(|chunk| {
                let mut week = [None; 7];
                week[..chunk.len()].copy_from_slice(chunk);
                week
            })
            .collect()
    }
}

pub fn calendar_grid(month: YearMonth) -> CalendarGrid {
    CalendarGrid {
        month,
        leading_blanks: month.first_weekday(),
        day_count: month.day_count(),
    }
}

/// One day of a month page with the visits shown in its cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarDay<'a> {
    pub date: NaiveDate,
    pub visits: Vec<&'a VisitRecord>,
}

/// Everything the calendar tab shows for one month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonthView<'a> {
    pub grid: CalendarGrid,
    pub days: Vec<CalendarDay<'a>>,
    pub agenda: Vec<&'a VisitRecord>,
}

impl MonthView<'_> {
    /// The day entry for a 1-based day number.
    pub fn day(&self, day: u32) -> Option<&CalendarDay<'_>> {
        let index = usize::try_from(day.checked_sub(1)?).ok()?;
        self.days.get(index)
    }
}

pub fn month_view(visits: &[VisitRecord], month: YearMonth) -> MonthView<'_> {
    let days = month
        .days()
        .map(|date| CalendarDay {
            date,
            visits: visits_on_date(visits, date),
        })
        .collect();
    MonthView {
        grid: calendar_grid(month),
        days,
        agenda: visits_in_month(visits, month),
    }
}
