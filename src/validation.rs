//! Client-side form validation
//!
//! Every rule is checked on its own and all violations are reported, so a
//! form can flag each field at once. Messages are the ones the screens show.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{AppointmentUpdate, NewAppointment, NewExam, NewPet, NewService, PetUpdate};
use crate::profile::Role;
use crate::schedule;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// A broken validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required(&'static str),
    InvalidEmail,
    PasswordTooShort,
    PasswordMissingUppercase,
    PasswordMissingLowercase,
    PasswordMissingDigit,
    PasswordMismatch,
    InvalidWeight,
    InvalidAge,
    InvalidPrice,
    InvalidTimeSlot,
    SlotTaken,
    MissingService,
    UnknownOwner,
    UnknownPet,
}

impl Rule {
    /// Localized message for the rule
    pub fn message(&self) -> String {
        match self {
            Rule::Required(field) => format!("El campo {field} es obligatorio"),
            Rule::InvalidEmail => "El email no es válido".to_string(),
            Rule::PasswordTooShort => {
                format!("La contraseña debe tener al menos {MIN_PASSWORD_LEN} caracteres")
            }
            Rule::PasswordMissingUppercase => {
                "La contraseña debe incluir una letra mayúscula".to_string()
            }
            Rule::PasswordMissingLowercase => {
                "La contraseña debe incluir una letra minúscula".to_string()
            }
            Rule::PasswordMissingDigit => "La contraseña debe incluir un número".to_string(),
            Rule::PasswordMismatch => "Las contraseñas no coinciden".to_string(),
            Rule::InvalidWeight => "El peso debe ser mayor que cero".to_string(),
            Rule::InvalidAge => "La edad no es válida".to_string(),
            Rule::InvalidPrice => "El precio no puede ser negativo".to_string(),
            Rule::InvalidTimeSlot => "El horario seleccionado no está disponible".to_string(),
            Rule::SlotTaken => "Ese horario ya está reservado".to_string(),
            Rule::MissingService => "Selecciona un servicio".to_string(),
            Rule::UnknownOwner => "El dueño seleccionado no existe".to_string(),
            Rule::UnknownPet => "La mascota seleccionada no existe".to_string(),
        }
    }
}

/// All rules a form broke
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    rules: Vec<Rule>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn contains(&self, rule: &Rule) -> bool {
        self.rules.contains(rule)
    }

    /// `Ok(())` when nothing was broken
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn require(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.push(Rule::Required(field));
        }
    }
}

impl From<Rule> for ValidationErrors {
    fn from(rule: Rule) -> Self {
        Self { rules: vec![rule] }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.rules.iter().map(Rule::message).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Loose `local@domain.tld` check
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
            .unwrap_or(false)
}

/// Password complexity rules plus confirmation
pub fn check_password(password: &str, confirmation: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_password_into(&mut errors, password, confirmation);
    errors.into_result()
}

fn check_password_into(errors: &mut ValidationErrors, password: &str, confirmation: &str) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(Rule::PasswordTooShort);
    }
    if !password.chars().any(char::is_uppercase) {
        errors.push(Rule::PasswordMissingUppercase);
    }
    if !password.chars().any(char::is_lowercase) {
        errors.push(Rule::PasswordMissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(Rule::PasswordMissingDigit);
    }
    if password != confirmation {
        errors.push(Rule::PasswordMismatch);
    }
}

/// Login form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("email", &self.email);
        if self.password.is_empty() {
            errors.push(Rule::Required("contraseña"));
        }
        errors.into_result()
    }
}

/// Self-service registration form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("nombre", &self.name);
        errors.require("email", &self.email);
        errors.require("teléfono", &self.phone);
        if !self.email.trim().is_empty() && !is_valid_email(&self.email) {
            errors.push(Rule::InvalidEmail);
        }
        check_password_into(&mut errors, &self.password, &self.confirm_password);
        errors.into_result()
    }
}

/// Admin "create user" form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
}

impl UserForm {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("nombre", &self.name);
        errors.require("email", &self.email);
        if !self.email.trim().is_empty() && !is_valid_email(&self.email) {
            errors.push(Rule::InvalidEmail);
        }
        check_password_into(&mut errors, &self.password, &self.password);
        errors.into_result()
    }
}

fn check_measures(errors: &mut ValidationErrors, weight: Option<f64>, age: Option<i32>) {
    if matches!(weight, Some(w) if !(w > 0.0)) {
        errors.push(Rule::InvalidWeight);
    }
    if matches!(age, Some(age) if !(0..=50).contains(&age)) {
        errors.push(Rule::InvalidAge);
    }
}

pub fn validate_pet(pet: &NewPet) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.require("nombre", &pet.name);
    errors.require("especie", &pet.species);
    errors.require("dueño", &pet.owner_id);
    check_measures(&mut errors, pet.weight, pet.age);
    errors.into_result()
}

/// Same rules as [`validate_pet`] for the fields being changed
pub fn validate_pet_update(update: &PetUpdate) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if let Some(name) = &update.name {
        errors.require("nombre", name);
    }
    if let Some(species) = &update.species {
        errors.require("especie", species);
    }
    check_measures(&mut errors, update.weight, update.age);
    errors.into_result()
}

pub fn validate_appointment(appointment: &NewAppointment) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.require("dueño", &appointment.owner_id);
    if appointment.time.trim().is_empty() {
        errors.push(Rule::Required("hora"));
    } else if !schedule::is_slot(&appointment.time) {
        errors.push(Rule::InvalidTimeSlot);
    }
    let has_type = appointment
        .service_type
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if appointment.service_id.is_none() && !has_type {
        errors.push(Rule::MissingService);
    }
    errors.into_result()
}

pub fn validate_appointment_update(update: &AppointmentUpdate) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if let Some(time) = &update.time {
        if !schedule::is_slot(time) {
            errors.push(Rule::InvalidTimeSlot);
        }
    }
    errors.into_result()
}

pub fn validate_exam(exam: &NewExam) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.require("examen", &exam.name);
    errors.into_result()
}

pub fn validate_service(service: &NewService) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.require("nombre", &service.name);
    if !(service.price >= 0.0) {
        errors.push(Rule::InvalidPrice);
    }
    errors.into_result()
}
