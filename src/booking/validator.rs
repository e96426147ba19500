//! Reservation request validation.
//!
//! Every check runs and every failure is collected, so the form can
//! highlight all problem fields in one round trip.

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use super::repository::ReservationRepository;
use super::{duration_hours, BookingError, BookingPolicy};
use crate::context::RequestContext;
use crate::db::{format_date, format_time, format_timestamp, NewReservation, ReservationInput, Venue, VenueStatus};
use crate::validation::{non_blank, parse_date, parse_time, validate_email, FieldErrors};

const REQUIRED: [(&str, &str); 6] = [
    ("event_date", "Event date"),
    ("start_time", "Start time"),
    ("end_time", "End time"),
    ("first_name", "First name"),
    ("last_name", "Last name"),
    ("email", "Email"),
];

pub struct ReservationValidator<'a, R: ReservationRepository + ?Sized> {
    repo: &'a R,
    policy: &'a BookingPolicy,
}

impl<'a, R: ReservationRepository + ?Sized> ReservationValidator<'a, R> {
    pub fn new(repo: &'a R, policy: &'a BookingPolicy) -> Self {
        Self { repo, policy }
    }

    /// Normalized reservation, or every field violation found.
    ///
    /// A pending request by the same user for the same venue is reported
    /// as [`BookingError::DuplicatePending`] when it is the only problem,
    /// and as a `reservation` field error alongside other violations.
    pub async fn validate(
        &self,
        ctx: &RequestContext,
        venue: &Venue,
        input: &ReservationInput,
    ) -> Result<NewReservation, BookingError> {
        let mut errors = FieldErrors::new();

        if venue.status() != VenueStatus::Open {
            errors.add("venue", "This venue is not accepting reservations");
        } else if venue.price_per_hour <= 0.0 {
            errors.add("venue", "This venue has no price set and cannot be booked yet");
        }

        let values = [
            &input.event_date,
            &input.start_time,
            &input.end_time,
            &input.first_name,
            &input.last_name,
            &input.email,
        ];
        for ((field, label), value) in REQUIRED.iter().zip(values) {
            if non_blank(value).is_none() {
                errors.add(*field, format!("{} is required", label));
            }
        }

        let event_date = non_blank(&input.event_date).and_then(|raw| match parse_date(raw) {
            Ok(date) => Some(date),
            Err(message) => {
                errors.add("event_date", message);
                None
            }
        });
        if let Some(date) = event_date {
            if date < ctx.today() {
                errors.add("event_date", "Event date cannot be in the past");
            }
        }

        if let Some(email) = non_blank(&input.email) {
            errors.check("email", validate_email(email));
        }

        let start = self.time_field(&mut errors, "start_time", &input.start_time);
        let end = self.time_field(&mut errors, "end_time", &input.end_time);
        if let (Some(start), Some(end)) = (start, end) {
            self.check_span(&mut errors, start, end);
        }

        let duplicate = match ctx.user_id {
            Some(user_id) => {
                self.repo
                    .find_pending_by_user_and_venue(user_id, venue.id)
                    .await?
            }
            None => None,
        };
        if let Some(existing) = &duplicate {
            if errors.is_empty() {
                return Err(BookingError::DuplicatePending {
                    existing_id: Some(existing.id),
                });
            }
            errors.add(
                "reservation",
                format!(
                    "You already have a pending request (#{}) for this venue",
                    existing.id
                ),
            );
        }

        if !errors.is_empty() {
            debug!(venue_id = venue.id, fields = %errors, "Reservation rejected");
            return Err(BookingError::Validation(errors));
        }

        // Every required value is present and parsed past this point
        let (Some(event_date), Some(start), Some(end)) = (event_date, start, end) else {
            return Err(BookingError::Validation(errors));
        };
        Ok(self.normalize(ctx, venue, input, event_date, start, end))
    }

    fn time_field(
        &self,
        errors: &mut FieldErrors,
        field: &str,
        value: &Option<String>,
    ) -> Option<NaiveTime> {
        let raw = non_blank(value)?;
        match parse_time(raw) {
            Ok(time) => Some(time),
            Err(message) => {
                errors.add(field, message);
                None
            }
        }
    }

    fn check_span(&self, errors: &mut FieldErrors, start: NaiveTime, end: NaiveTime) {
        if end <= start {
            errors.add("end_time", "End time must be after start time");
            return;
        }
        if let Some(min) = self.policy.min_duration {
            if end - start < min {
                errors.add(
                    "end_time",
                    format!("Reservation must last at least {}", describe_minutes(min.num_minutes())),
                );
            }
        }
    }

    fn normalize(
        &self,
        ctx: &RequestContext,
        venue: &Venue,
        input: &ReservationInput,
        event_date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> NewReservation {
        let text = |value: &Option<String>| non_blank(value).map(str::to_string);
        let hours = duration_hours(start, end);

        NewReservation {
            venue_id: venue.id,
            user_id: ctx.user_id,
            event_date: format_date(event_date),
            start_time: format_time(start),
            end_time: format_time(end),
            first_name: text(&input.first_name).unwrap_or_default(),
            last_name: text(&input.last_name).unwrap_or_default(),
            email: text(&input.email).unwrap_or_default(),
            mobile_country_code: text(&input.mobile_country_code),
            mobile_number: text(&input.mobile_number),
            address: text(&input.address),
            country: text(&input.country),
            notes: text(&input.notes),
            voucher_code: text(&input.voucher_code),
            price_per_hour: venue.price_per_hour,
            duration_hours: hours,
            total_cost: hours * venue.price_per_hour,
            created_at: format_timestamp(ctx.now()),
        }
    }
}

fn describe_minutes(minutes: i64) -> String {
    match (minutes / 60, minutes % 60) {
        (1, 0) => "1 hour".to_string(),
        (h, 0) => format!("{} hours", h),
        _ => format!("{} minutes", minutes),
    }
}
