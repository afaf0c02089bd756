use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::{authorize, single, APPOINTMENT_FULL, EXAM_WITH_PET, PET_WITH_OWNER};
use crate::auth::AuthState;
use crate::error::{Error, Result};
use crate::models::{
    Appointment, AppointmentInsert, AppointmentStatus, AppointmentUpdate, Exam, NewAppointment,
    NewExam, NewPet, NewService, Pet, PetUpdate, Service, UserRecord, UserUpdate,
};
use crate::profile::{Role, UserProfile};
use crate::store::{Backend, Collection, NewAuthUser, Query, RecordStoreExt};
use crate::validation::{self, Rule, UserForm, ValidationErrors};

/// Totals shown at the top of the admin dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_users: u64,
    pub total_pets: u64,
    pub total_appointments: u64,
    pub pending_appointments: u64,
}

/// Full access to users, pets, appointments, services and exams
pub struct AdminDashboard<B: Backend> {
    store: Arc<B>,
    profile: UserProfile,
}

impl<B: Backend> AdminDashboard<B> {
    /// Open the dashboard for the user in `state`; fails unless the user is
    /// a signed-in admin.
    pub fn open(store: Arc<B>, state: &AuthState) -> Result<Self> {
        let profile = authorize(state, Role::Admin)?;
        Ok(Self { store, profile })
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    async fn count_or_zero(&self, collection: Collection, query: Query) -> u64 {
        match self.store.count(collection, &query).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Counting {} failed: {}", collection, e);
                0
            }
        }
    }

    /// Totals; a count that fails reads as zero
    pub async fn stats(&self) -> Stats {
        let (total_users, total_pets, total_appointments, pending_appointments) = tokio::join!(
            self.count_or_zero(Collection::Users, Query::new()),
            self.count_or_zero(Collection::Pets, Query::new()),
            self.count_or_zero(Collection::Appointments, Query::new()),
            self.count_or_zero(
                Collection::Appointments,
                Query::new().eq("status", AppointmentStatus::Pending),
            ),
        );
        Stats {
            total_users,
            total_pets,
            total_appointments,
            pending_appointments,
        }
    }

    // Users

    /// Newest first
    pub async fn users(&self) -> Result<Vec<UserRecord>> {
        let query = Query::new().order("created_at", false);
        self.store.select_as(Collection::Users, &query).await
    }

    /// Create a confirmed identity and its `users` row
    pub async fn create_user(&self, form: &UserForm) -> Result<UserRecord> {
        form.validate()?;

        let email = form.email.trim().to_string();
        let identity = self
            .store
            .admin_create_user(NewAuthUser {
                email: email.clone(),
                password: form.password.clone(),
                email_confirm: true,
                user_metadata: json!({ "name": form.name.trim(), "phone": form.phone.trim() }),
            })
            .await?;

        let row = json!({
            "id": identity.id,
            "name": form.name.trim(),
            "email": email,
            "phone": form.phone.trim(),
            "role_id": form.role.id(),
        });
        let created: UserRecord = self.store.insert_as(Collection::Users, &row).await?;
        log::info!("Admin {} created {} user {}", self.profile.id, form.role, created.id);
        Ok(created)
    }

    pub async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(ValidationErrors::from(Rule::Required("nombre")).into());
            }
        }
        let query = Query::new().eq("id", user_id);
        let rows = self.store.update_as(Collection::Users, update, &query).await?;
        single(rows, "user")
    }

    /// Remove the `users` row; the identity stays with the auth service
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.store
            .delete(Collection::Users, &Query::new().eq("id", user_id))
            .await?;
        log::info!("Admin {} deleted user {}", self.profile.id, user_id);
        Ok(())
    }

    // Pets

    /// Every pet with its owner's name and email, newest first
    pub async fn pets(&self) -> Result<Vec<Pet>> {
        let query = Query::new().select(PET_WITH_OWNER).order("created_at", false);
        self.store.select_as(Collection::Pets, &query).await
    }

    /// Register a pet for an existing user
    pub async fn create_pet(&self, pet: &NewPet) -> Result<Pet> {
        validation::validate_pet(pet)?;

        let owner = Query::new().select("id").eq("id", &pet.owner_id);
        if self
            .store
            .select_one::<serde_json::Value>(Collection::Users, &owner)
            .await?
            .is_none()
        {
            return Err(ValidationErrors::from(Rule::UnknownOwner).into());
        }

        self.store.insert_as(Collection::Pets, pet).await
    }

    pub async fn update_pet(&self, pet_id: i64, update: &PetUpdate) -> Result<Pet> {
        validation::validate_pet_update(update)?;
        let query = Query::new().eq("id", pet_id);
        let rows = self.store.update_as(Collection::Pets, update, &query).await?;
        single(rows, "pet")
    }

    pub async fn delete_pet(&self, pet_id: i64) -> Result<()> {
        self.store
            .delete(Collection::Pets, &Query::new().eq("id", pet_id))
            .await
    }

    // Appointments

    /// Every appointment with pet and owner, by date then time
    pub async fn appointments(&self) -> Result<Vec<Appointment>> {
        let query = Query::new()
            .select(APPOINTMENT_FULL)
            .order("date", true)
            .order("time", true);
        self.store.select_as(Collection::Appointments, &query).await
    }

    async fn appointment(&self, appointment_id: i64) -> Result<Appointment> {
        let query = Query::new().eq("id", appointment_id);
        self.store
            .select_one(Collection::Appointments, &query)
            .await?
            .ok_or_else(|| Error::database(format!("appointment {appointment_id} not found")))
    }

    /// Book on behalf of a client; starts as pending
    pub async fn create_appointment(&self, appointment: &NewAppointment) -> Result<Appointment> {
        validation::validate_appointment(appointment)?;
        let insert = AppointmentInsert {
            appointment,
            status: AppointmentStatus::Pending,
        };
        self.store.insert_as(Collection::Appointments, &insert).await
    }

    /// Edit an appointment. A status change must follow the workflow.
    pub async fn update_appointment(
        &self,
        appointment_id: i64,
        update: &AppointmentUpdate,
    ) -> Result<Appointment> {
        validation::validate_appointment_update(update)?;

        if let Some(next) = update.status {
            let current = self.appointment(appointment_id).await?.status;
            if current != next && !current.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    from: current,
                    to: next,
                });
            }
        }

        let query = Query::new().eq("id", appointment_id);
        let rows = self
            .store
            .update_as(Collection::Appointments, update, &query)
            .await?;
        single(rows, "appointment")
    }

    /// Move an appointment along the workflow
    pub async fn set_appointment_status(
        &self,
        appointment_id: i64,
        status: AppointmentStatus,
    ) -> Result<Appointment> {
        let current = self.appointment(appointment_id).await?.status;
        if !current.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let query = Query::new().eq("id", appointment_id);
        let rows = self
            .store
            .update_as(Collection::Appointments, &json!({ "status": status }), &query)
            .await?;
        log::info!("Appointment {appointment_id}: {current} -> {status}");
        single(rows, "appointment")
    }

    pub async fn delete_appointment(&self, appointment_id: i64) -> Result<()> {
        self.store
            .delete(Collection::Appointments, &Query::new().eq("id", appointment_id))
            .await
    }

    // Services

    /// All services, active or not, by name
    pub async fn services(&self) -> Result<Vec<Service>> {
        let query = Query::new().order("name", true);
        self.store.select_as(Collection::Services, &query).await
    }

    pub async fn create_service(&self, service: &NewService) -> Result<Service> {
        validation::validate_service(service)?;
        self.store.insert_as(Collection::Services, service).await
    }

    /// Offer or withdraw a service
    pub async fn set_service_active(&self, service_id: i64, active: bool) -> Result<Service> {
        let query = Query::new().eq("id", service_id);
        let rows = self
            .store
            .update_as(Collection::Services, &json!({ "active": active }), &query)
            .await?;
        single(rows, "service")
    }

    // Exams

    /// Every exam with its pet, latest first
    pub async fn exams(&self) -> Result<Vec<Exam>> {
        let query = Query::new()
            .select(EXAM_WITH_PET)
            .order("performed_at", false);
        self.store.select_as(Collection::Exams, &query).await
    }

    pub async fn record_exam(&self, exam: &NewExam) -> Result<Exam> {
        validation::validate_exam(exam)?;
        self.store.insert_as(Collection::Exams, exam).await
    }
}
