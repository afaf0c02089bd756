use chrono::NaiveDate;
use std::sync::Arc;

use super::{authorize, single, APPOINTMENT_WITH_PET};
use crate::auth::AuthState;
use crate::error::Result;
use crate::models::{
    Appointment, AppointmentInsert, AppointmentStatus, Exam, NewAppointment, NewPet, Pet,
    PetUpdate, Service,
};
use crate::profile::{Role, UserProfile};
use crate::schedule;
use crate::store::{Backend, Collection, Query, RecordStoreExt};
use crate::validation::{self, Rule, ValidationErrors};

/// What a client can see and do: their own pets and appointments, the
/// active services and the exams of their pets.
pub struct ClientDashboard<B: Backend> {
    store: Arc<B>,
    profile: UserProfile,
}

impl<B: Backend> ClientDashboard<B> {
    /// Open the dashboard for the user in `state`; fails unless the user is
    /// a signed-in client.
    pub fn open(store: Arc<B>, state: &AuthState) -> Result<Self> {
        let profile = authorize(state, Role::Client)?;
        Ok(Self { store, profile })
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    fn mine(&self) -> Query {
        Query::new().eq("owner_id", &self.profile.id)
    }

    pub async fn pets(&self) -> Result<Vec<Pet>> {
        let query = self.mine().order("created_at", false);
        self.store.select_as(Collection::Pets, &query).await
    }

    /// One of the caller's pets
    pub async fn pet(&self, pet_id: i64) -> Result<Option<Pet>> {
        let query = self.mine().eq("id", pet_id);
        self.store.select_one(Collection::Pets, &query).await
    }

    /// Register a pet owned by the caller
    pub async fn add_pet(&self, mut pet: NewPet) -> Result<Pet> {
        pet.owner_id = self.profile.id.clone();
        validation::validate_pet(&pet)?;

        let pet: Pet = self.store.insert_as(Collection::Pets, &pet).await?;
        log::info!("Client {} added pet {}", self.profile.id, pet.id);
        Ok(pet)
    }

    pub async fn update_pet(&self, pet_id: i64, update: &PetUpdate) -> Result<Pet> {
        validation::validate_pet_update(update)?;
        let query = self.mine().eq("id", pet_id);
        let rows = self.store.update_as(Collection::Pets, update, &query).await?;
        single(rows, "pet")
    }

    /// The caller's appointments with pet name and species, soonest first
    pub async fn appointments(&self) -> Result<Vec<Appointment>> {
        let query = self
            .mine()
            .select(APPOINTMENT_WITH_PET)
            .order("date", true)
            .order("time", true);
        self.store.select_as(Collection::Appointments, &query).await
    }

    /// Request an appointment for one of the caller's pets. New appointments
    /// always start as pending.
    pub async fn book_appointment(&self, mut appointment: NewAppointment) -> Result<Appointment> {
        appointment.owner_id = self.profile.id.clone();
        validation::validate_appointment(&appointment)?;

        let mut errors = ValidationErrors::new();
        if self.pet(appointment.pet_id).await?.is_none() {
            errors.push(Rule::UnknownPet);
        }
        let free = self.available_slots(appointment.date).await?;
        let time = schedule::normalize_time(&appointment.time);
        if !free.iter().any(|slot| *slot == time) {
            errors.push(Rule::SlotTaken);
        }
        errors.into_result()?;

        let insert = AppointmentInsert {
            appointment: &appointment,
            status: AppointmentStatus::Pending,
        };
        let booked: Appointment = self.store.insert_as(Collection::Appointments, &insert).await?;
        log::info!(
            "Client {} booked appointment {} on {} {}",
            self.profile.id,
            booked.id,
            booked.date,
            booked.time
        );
        Ok(booked)
    }

    /// Active services by name
    pub async fn services(&self) -> Result<Vec<Service>> {
        let query = Query::new().eq("active", true).order("name", true);
        self.store.select_as(Collection::Services, &query).await
    }

    /// Exams of one of the caller's pets, latest first
    pub async fn pet_exams(&self, pet_id: i64) -> Result<Vec<Exam>> {
        if self.pet(pet_id).await?.is_none() {
            return Err(ValidationErrors::from(Rule::UnknownPet).into());
        }
        let query = Query::new()
            .eq("pet_id", pet_id)
            .order("performed_at", false);
        self.store.select_as(Collection::Exams, &query).await
    }

    /// Slots on `date` not taken by an appointment that is not cancelled
    pub async fn available_slots(&self, date: NaiveDate) -> Result<Vec<&'static str>> {
        let query = Query::new().eq("date", date);
        let booked: Vec<Appointment> = self.store.select_as(Collection::Appointments, &query).await?;
        Ok(schedule::available_slots(date, &booked))
    }
}
