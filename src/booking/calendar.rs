//! Month grid generation for the availability calendar.
//!
//! The grid is Sunday-first and padded with empty cells on both sides to
//! a whole number of weeks. The same function serves the initial page,
//! month navigation and the CLI, so every caller sees identical grids
//! for identical inputs.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::validation::{MAX_CALENDAR_YEAR, MIN_CALENDAR_YEAR};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("year {0} is outside {MIN_CALENDAR_YEAR}..={MAX_CALENDAR_YEAR}")]
    YearOutOfRange(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    /// Padding before the 1st or after the last day
    Empty,
    Past,
    PastUnavailable,
    Unavailable,
    Available,
}

impl DayState {
    pub fn is_selectable(self) -> bool {
        self == DayState::Available
    }

    fn classify(date: NaiveDate, blocked: bool, today: NaiveDate) -> Self {
        match (date < today, blocked) {
            (true, true) => DayState::PastUnavailable,
            (true, false) => DayState::Past,
            (false, true) => DayState::Unavailable,
            (false, false) => DayState::Available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCell {
    /// None for padding cells
    pub date: Option<NaiveDate>,
    pub state: DayState,
    pub selectable: bool,
}

impl DayCell {
    fn empty() -> Self {
        Self {
            date: None,
            state: DayState::Empty,
            selectable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Weekday of the 1st, 0 = Sunday
    pub first_weekday_offset: u32,
    pub days_in_month: u32,
    pub cells: Vec<DayCell>,
}

impl CalendarMonth {
    pub fn weeks(&self) -> impl Iterator<Item = &[DayCell]> {
        self.cells.chunks(7)
    }
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

impl fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = MONTH_NAMES[(self.month - 1) as usize];
        writeln!(f, "{:^28}", format!("{} {}", name, self.year))?;
        writeln!(f, " Su  Mo  Tu  We  Th  Fr  Sa")?;
        for week in self.weeks() {
            for cell in week {
                match cell.date {
                    None => write!(f, "    ")?,
                    Some(date) => {
                        let mark = match cell.state {
                            DayState::Available => ' ',
                            DayState::Unavailable => 'x',
                            DayState::Past => '.',
                            DayState::PastUnavailable => '#',
                            DayState::Empty => ' ',
                        };
                        write!(f, " {:>2}{}", date.day(), mark)?;
                    }
                }
            }
            writeln!(f)?;
        }
        write!(f, "  x unavailable  . past  # past+unavailable")
    }
}

/// Roll month overflow into the year: 13 is January of the next year,
/// 0 is December of the previous one. Fails when the rolled year leaves `i32`.
pub fn normalize_month(year: i32, month: i32) -> Result<(i32, u32), CalendarError> {
    let zero_based = i64::from(month) - 1;
    let rolled = i64::from(year) + zero_based.div_euclid(12);
    let year = i32::try_from(rolled).map_err(|_| {
        CalendarError::YearOutOfRange(if rolled < 0 { i32::MIN } else { i32::MAX })
    })?;
    let month = zero_based.rem_euclid(12) as u32 + 1;
    Ok((year, month))
}

/// First day of the month and first day of the following month.
pub fn month_bounds(year: i32, month: i32) -> Result<(NaiveDate, NaiveDate), CalendarError> {
    let (year, month) = normalize_month(year, month)?;
    if !(MIN_CALENDAR_YEAR..=MAX_CALENDAR_YEAR).contains(&year) {
        return Err(CalendarError::YearOutOfRange(year));
    }
    let (next_year, next_month) = normalize_month(year, month as i32 + 1)?;
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CalendarError::YearOutOfRange(year))?;
    let next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or(CalendarError::YearOutOfRange(next_year))?;
    Ok((first, next))
}

pub fn generate_month(
    year: i32,
    month: i32,
    blocked: &BTreeSet<NaiveDate>,
    today: NaiveDate,
) -> Result<CalendarMonth, CalendarError> {
    let (first, next) = month_bounds(year, month)?;
    let offset = first.weekday().num_days_from_sunday();
    let days = (next - first).num_days() as u32;

    let filled = offset + days;
    let total = filled + (7 - filled % 7) % 7;

    let mut cells = Vec::with_capacity(total as usize);
    cells.extend((0..offset).map(|_| DayCell::empty()));
    for date in first.iter_days().take(days as usize) {
        let state = DayState::classify(date, blocked.contains(&date), today);
        cells.push(DayCell {
            date: Some(date),
            state,
            selectable: state.is_selectable(),
        });
    }
    cells.resize_with(total as usize, DayCell::empty);

    Ok(CalendarMonth {
        year: first.year(),
        month: first.month(),
        first_weekday_offset: offset,
        days_in_month: days,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_normalize_month_rolls_over() {
        assert_eq!(normalize_month(2025, 13), Ok((2026, 1)));
        assert_eq!(normalize_month(2025, 0), Ok((2024, 12)));
        assert_eq!(normalize_month(2025, -11), Ok((2024, 1)));
        assert_eq!(normalize_month(2025, 25), Ok((2027, 1)));
        assert_eq!(normalize_month(2025, 6), Ok((2025, 6)));
    }

    #[test]
    fn test_extreme_inputs_are_range_errors() {
        let today = date("2025-06-10");
        let none = BTreeSet::new();
        assert_eq!(
            generate_month(i32::MAX, 13, &none, today),
            Err(CalendarError::YearOutOfRange(i32::MAX))
        );
        assert!(matches!(
            generate_month(2025, i32::MIN, &none, today),
            Err(CalendarError::YearOutOfRange(_))
        ));
        assert!(matches!(
            generate_month(i32::MIN, i32::MIN, &none, today),
            Err(CalendarError::YearOutOfRange(i32::MIN))
        ));
        assert!(matches!(
            generate_month(2025, i32::MAX, &none, today),
            Err(CalendarError::YearOutOfRange(_))
        ));
    }

    #[test]
    fn test_cell_count_for_every_month() {
        let today = date("2025-06-10");
        for year in MIN_CALENDAR_YEAR..=MAX_CALENDAR_YEAR {
            for month in 1..=12 {
                let grid = generate_month(year, month, &BTreeSet::new(), today).unwrap();
                let filled = grid.first_weekday_offset + grid.days_in_month;
                let expected = 7 * filled.div_ceil(7);
                assert_eq!(grid.cells.len() as u32, expected, "{year}-{month}");

                let leading = grid.cells.iter().take_while(|c| c.date.is_none()).count();
                assert_eq!(leading as u32, grid.first_weekday_offset, "{year}-{month}");
            }
        }
    }

    #[test]
    fn test_june_2025_layout() {
        // 2025-06-01 is a Sunday
        let grid = generate_month(2025, 6, &BTreeSet::new(), date("2025-06-10")).unwrap();
        assert_eq!(grid.first_weekday_offset, 0);
        assert_eq!(grid.days_in_month, 30);
        assert_eq!(grid.cells.len(), 35);
        assert_eq!(grid.cells[0].date, Some(date("2025-06-01")));
        assert!(grid.cells[30..].iter().all(|c| c.state == DayState::Empty));
    }

    #[test]
    fn test_leading_padding_saturday_start() {
        // 2025-03-01 is a Saturday
        let grid = generate_month(2025, 3, &BTreeSet::new(), date("2025-01-01")).unwrap();
        assert_eq!(grid.first_weekday_offset, 6);
        assert_eq!(grid.cells.len(), 42);
    }

    #[test]
    fn test_states() {
        let blocked: BTreeSet<_> = [date("2025-06-05"), date("2025-06-20")].into();
        let grid = generate_month(2025, 6, &blocked, date("2025-06-10")).unwrap();
        let state_of = |d: &str| {
            grid.cells
                .iter()
                .find(|c| c.date == Some(date(d)))
                .map(|c| c.state)
                .unwrap()
        };

        assert_eq!(state_of("2025-06-05"), DayState::PastUnavailable);
        assert_eq!(state_of("2025-06-09"), DayState::Past);
        assert_eq!(state_of("2025-06-10"), DayState::Available);
        assert_eq!(state_of("2025-06-20"), DayState::Unavailable);
        assert_eq!(state_of("2025-06-21"), DayState::Available);
    }

    #[test]
    fn test_past_days_never_available() {
        let today = date("2025-06-10");
        for month in 1..=12 {
            let grid = generate_month(2025, month, &BTreeSet::new(), today).unwrap();
            for cell in &grid.cells {
                if let Some(d) = cell.date {
                    if d < today {
                        assert!(matches!(cell.state, DayState::Past | DayState::PastUnavailable));
                        assert!(!cell.selectable);
                    }
                }
            }
        }
    }

    #[test]
    fn test_generation_is_idempotent() {
        let today = date("2025-06-10");
        let a = generate_month(2025, 6, &BTreeSet::new(), today).unwrap();
        let b = generate_month(2025, 6, &BTreeSet::new(), today).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_overflowed_month_matches_normalized() {
        let today = date("2025-06-10");
        let rolled = generate_month(2025, 13, &BTreeSet::new(), today).unwrap();
        let direct = generate_month(2026, 1, &BTreeSet::new(), today).unwrap();
        assert_eq!(rolled, direct);
    }

    #[test]
    fn test_year_out_of_range() {
        let today = date("2025-06-10");
        assert_eq!(
            generate_month(1969, 12, &BTreeSet::new(), today),
            Err(CalendarError::YearOutOfRange(1969))
        );
        assert_eq!(
            generate_month(2100, 13, &BTreeSet::new(), today),
            Err(CalendarError::YearOutOfRange(2101))
        );
        assert!(generate_month(2100, 12, &BTreeSet::new(), today).is_ok());
    }

    #[test]
    fn test_display_marks_states() {
        let blocked: BTreeSet<_> = [date("2025-06-20")].into();
        let text = generate_month(2025, 6, &blocked, date("2025-06-10"))
            .unwrap()
            .to_string();
        assert!(text.contains("June 2025"));
        assert!(text.contains(" 20x"));
        assert!(text.contains("  9."));
    }
}
