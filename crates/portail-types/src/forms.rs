//! Typed form records for the portal's request workflows.
//!
//! Each form has a fixed field set and a `validate` that reports every
//! problem at once as `(field, kind)` pairs, so a UI can attach messages to
//! inputs without keeping an ad hoc error bag.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MIN_APPLICANT_AGE: u32 = 18;
pub const PHONE_DIGITS: usize = 8;
pub const MAX_CV_BYTES: u64 = 5 * 1024 * 1024;

pub const ACCEPTED_CV_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    LastName,
    FirstName,
    Age,
    Email,
    Phone,
    Cv,
    StartDate,
    EndDate,
    Reason,
    ReturnDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Required,
    InvalidFormat,
    TooYoung,
    WrongLength,
    UnsupportedType,
    TooLarge,
    BeforeStart,
    BeforeEnd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(Vec<(Field, ErrorKind)>);

impl ValidationErrors {
    pub fn push(&mut self, field: Field, kind: ErrorKind) {
        self.0.push((field, kind));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Field, ErrorKind)> {
        self.0.iter()
    }

    /// First error reported for `field`, if any.
    pub fn get(&self, field: Field) -> Option<ErrorKind> {
        self.0.iter().find(|(f, _)| *f == field).map(|(_, k)| *k)
    }

    fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid field(s):", self.0.len())?;
        for (field, kind) in &self.0 {
            write!(f, " {:?}={:?}", field, kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

// -- Job application --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvAttachment {
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Two-step job application: identity first, then contact details and CV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationForm {
    pub posting_id: String,
    pub last_name: String,
    pub first_name: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: String,
    pub cv: Option<CvAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStep {
    Identity,
    Contact,
}

impl ApplicationForm {
    pub fn validate_step(&self, step: ApplicationStep) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        match step {
            ApplicationStep::Identity => self.check_identity(&mut errors),
            ApplicationStep::Contact => self.check_contact(&mut errors),
        }
        errors.into_result()
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        self.check_identity(&mut errors);
        self.check_contact(&mut errors);
        errors.into_result()
    }

    fn check_identity(&self, errors: &mut ValidationErrors) {
        if self.last_name.trim().is_empty() {
            errors.push(Field::LastName, ErrorKind::Required);
        }
        if self.first_name.trim().is_empty() {
            errors.push(Field::FirstName, ErrorKind::Required);
        }
        match self.age {
            None => errors.push(Field::Age, ErrorKind::Required),
            Some(age) if age < MIN_APPLICANT_AGE => errors.push(Field::Age, ErrorKind::TooYoung),
            Some(_) => {}
        }
    }

    fn check_contact(&self, errors: &mut ValidationErrors) {
        let email = self.email.trim();
        if email.is_empty() {
            errors.push(Field::Email, ErrorKind::Required);
        } else if !is_email(email) {
            errors.push(Field::Email, ErrorKind::InvalidFormat);
        }

        let digits = phone_digits(&self.phone);
        if digits.is_empty() {
            errors.push(Field::Phone, ErrorKind::Required);
        } else if digits.len() != PHONE_DIGITS {
            errors.push(Field::Phone, ErrorKind::WrongLength);
        }

        match &self.cv {
            None => errors.push(Field::Cv, ErrorKind::Required),
            Some(cv) if !ACCEPTED_CV_TYPES.contains(&cv.content_type.as_str()) => {
                errors.push(Field::Cv, ErrorKind::UnsupportedType)
            }
            Some(cv) if cv.size > MAX_CV_BYTES => errors.push(Field::Cv, ErrorKind::TooLarge),
            Some(_) => {}
        }
    }
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

fn phone_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Render a phone number as `XX XXX XXX`, dropping non-digits and anything
/// past the eighth digit. Partial input is formatted as far as it goes.
pub fn format_phone(raw: &str) -> String {
    let digits: String = phone_digits(raw).chars().take(PHONE_DIGITS).collect();
    match digits.len() {
        0..=2 => digits,
        3..=5 => format!("{} {}", &digits[..2], &digits[2..]),
        _ => format!("{} {} {}", &digits[..2], &digits[2..5], &digits[5..]),
    }
}

// -- Leave request --

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequestForm {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reason: String,
    pub planned_return: Option<NaiveDate>,
    pub code_soc: String,
}

impl LeaveRequestForm {
    /// Inclusive day count, or `None` until both dates are set and ordered.
    pub fn day_count(&self) -> Option<i64> {
        let (start, end) = (self.start_date?, self.end_date?);
        let days = (end - start).num_days();
        (days >= 0).then_some(days + 1)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.start_date.is_none() {
            errors.push(Field::StartDate, ErrorKind::Required);
        }
        match (self.start_date, self.end_date) {
            (_, None) => errors.push(Field::EndDate, ErrorKind::Required),
            (Some(start), Some(end)) if end < start => errors.push(Field::EndDate, ErrorKind::BeforeStart),
            _ => {}
        }
        if self.reason.trim().is_empty() {
            errors.push(Field::Reason, ErrorKind::Required);
        }
        if let (Some(ret), Some(end)) = (self.planned_return, self.end_date) {
            if ret < end {
                errors.push(Field::ReturnDate, ErrorKind::BeforeEnd);
            }
        }

        errors.into_result()
    }
}
