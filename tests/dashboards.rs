use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use pethome::prelude::*;
use pethome::store::{Collection, RecordStore};
use pethome::validation::Rule;

const ANA: (&str, &str) = ("ana@pethome.test", "Cliente123");
const ADMIN: (&str, &str) = ("admin@pethome.test", "Admin1234");

struct Fixture {
    store: Arc<MemoryStore>,
    app: PetHome<MemoryStore>,
    admin_id: String,
    ana_id: String,
    bob_id: String,
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let admin = store
        .seed_user(ADMIN.0, ADMIN.1, "Administración", Role::Admin)
        .unwrap();
    let ana = store.seed_user(ANA.0, ANA.1, "Ana", Role::Client).unwrap();
    let bob = store
        .seed_user("bob@pethome.test", "Cliente456", "Bob", Role::Client)
        .unwrap();

    let app = PetHome::with_shared_backend(Arc::clone(&store));
    app.auth().initialize().await;

    Fixture {
        store,
        app,
        admin_id: admin.id,
        ana_id: ana.id,
        bob_id: bob.id,
    }
}

async fn sign_in(app: &PetHome<MemoryStore>, (email, password): (&str, &str)) {
    app.auth().login(email, password).await.unwrap();
    let mut rx = app.auth().subscribe();
    timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| matches!(state.profile(), Some(profile) if profile.is_resolved())),
    )
    .await
    .expect("profile did not load in time")
    .expect("auth machine went away");
}

async fn insert_pet(store: &MemoryStore, owner_id: &str, name: &str) -> i64 {
    let rows = store
        .insert(
            Collection::Pets,
            json!({ "name": name, "species": "Perro", "owner_id": owner_id }),
        )
        .await
        .unwrap();
    rows[0]["id"].as_i64().unwrap()
}

fn appointment(pet_id: i64, time: &str) -> NewAppointment {
    NewAppointment {
        pet_id,
        owner_id: String::new(),
        service_id: None,
        service_type: Some("Consulta general".to_string()),
        date: day(),
        time: time.to_string(),
        notes: None,
    }
}

fn new_pet(name: &str, owner_id: &str) -> NewPet {
    NewPet {
        name: name.to_string(),
        species: "Gato".to_string(),
        weight: Some(4.2),
        owner_id: owner_id.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn dashboards_follow_the_guard() {
    let f = fixture().await;

    assert!(matches!(f.app.client_dashboard(), Err(Error::NotAuthenticated)));
    let navigation = f.app.navigate("/dashboard");
    assert_eq!(navigation.view, View::Login);
    assert_eq!(navigation.redirects, vec!["/dashboard".to_string()]);

    sign_in(&f.app, ANA).await;
    assert_eq!(f.app.navigate("/dashboard").view, View::ClientDashboard);
    assert_eq!(
        f.app.navigate("/admin").view,
        View::Denied {
            required: Role::Admin
        }
    );
    assert!(matches!(
        f.app.admin_dashboard(),
        Err(Error::Forbidden {
            required: Role::Admin
        })
    ));
    assert_eq!(f.app.client_dashboard().unwrap().profile().id, f.ana_id);
}

#[tokio::test]
async fn guard_watcher_renders_after_login() {
    let f = fixture().await;
    let mut watcher = f.app.router().watch(Route::ClientDashboard).unwrap();
    assert_eq!(
        watcher.current(),
        GuardDecision::Redirect("/login".to_string())
    );

    sign_in(&f.app, ANA).await;
    assert_eq!(watcher.settled().await, Some(GuardDecision::Render));
}

#[tokio::test]
async fn client_sees_only_their_own_pets() {
    let f = fixture().await;
    let mine = insert_pet(&f.store, &f.ana_id, "Luna").await;
    let theirs = insert_pet(&f.store, &f.bob_id, "Rex").await;

    sign_in(&f.app, ANA).await;
    let dashboard = f.app.client_dashboard().unwrap();

    let pets = dashboard.pets().await.unwrap();
    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].id, mine);
    assert_eq!(pets[0].name, "Luna");
    assert!(dashboard.pet(theirs).await.unwrap().is_none());

    let update = PetUpdate {
        name: Some("Max".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        dashboard.update_pet(theirs, &update).await,
        Err(Error::Database(_))
    ));
    assert_eq!(dashboard.update_pet(mine, &update).await.unwrap().name, "Max");
}

#[tokio::test]
async fn client_adds_pets_for_themselves() {
    let f = fixture().await;
    sign_in(&f.app, ANA).await;
    let dashboard = f.app.client_dashboard().unwrap();

    let pet = dashboard.add_pet(new_pet("Misha", &f.bob_id)).await.unwrap();
    assert_eq!(pet.owner_id, f.ana_id);

    let mut heavy = new_pet("Bola", "");
    heavy.weight = Some(-1.0);
    match dashboard.add_pet(heavy).await {
        Err(Error::Validation(errors)) => assert!(errors.contains(&Rule::InvalidWeight)),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(dashboard.pets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn client_booking_flow() {
    let f = fixture().await;
    let luna = insert_pet(&f.store, &f.ana_id, "Luna").await;
    let rex = insert_pet(&f.store, &f.bob_id, "Rex").await;

    sign_in(&f.app, ANA).await;
    let dashboard = f.app.client_dashboard().unwrap();
    assert_eq!(dashboard.available_slots(day()).await.unwrap().len(), 16);

    let booked = dashboard
        .book_appointment(appointment(luna, "09:00"))
        .await
        .unwrap();
    assert_eq!(booked.status, AppointmentStatus::Pending);
    assert_eq!(booked.owner_id, f.ana_id);

    let free = dashboard.available_slots(day()).await.unwrap();
    assert_eq!(free.len(), 15);
    assert!(!free.contains(&"09:00"));

    match dashboard.book_appointment(appointment(luna, "09:00")).await {
        Err(Error::Validation(errors)) => assert!(errors.contains(&Rule::SlotTaken)),
        other => panic!("expected the slot to be taken, got {other:?}"),
    }
    match dashboard.book_appointment(appointment(rex, "10:00")).await {
        Err(Error::Validation(errors)) => assert!(errors.contains(&Rule::UnknownPet)),
        other => panic!("expected an unknown pet, got {other:?}"),
    }
    match dashboard.book_appointment(appointment(luna, "12:15")).await {
        Err(Error::Validation(errors)) => assert!(errors.contains(&Rule::InvalidTimeSlot)),
        other => panic!("expected an invalid slot, got {other:?}"),
    }

    let appointments = dashboard.appointments().await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].pets.as_ref().unwrap().name, "Luna");
}

#[tokio::test]
async fn client_services_and_exams() {
    let f = fixture().await;
    let luna = insert_pet(&f.store, &f.ana_id, "Luna").await;
    let rex = insert_pet(&f.store, &f.bob_id, "Rex").await;
    f.store
        .insert(
            Collection::Services,
            json!([
                { "name": "Vacunación", "price": 25.0, "active": true },
                { "name": "Baño", "price": 15.0, "active": false },
                { "name": "Consulta general", "price": 30.0, "active": true },
            ]),
        )
        .await
        .unwrap();
    f.store
        .insert(
            Collection::Exams,
            json!({ "pet_id": luna, "name": "Hemograma", "performed_at": "2026-10-01" }),
        )
        .await
        .unwrap();

    sign_in(&f.app, ANA).await;
    let dashboard = f.app.client_dashboard().unwrap();

    let names: Vec<String> = dashboard
        .services()
        .await
        .unwrap()
        .into_iter()
        .map(|service| service.name)
        .collect();
    assert_eq!(names, vec!["Consulta general", "Vacunación"]);

    let exams = dashboard.pet_exams(luna).await.unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0].name, "Hemograma");
    assert!(matches!(
        dashboard.pet_exams(rex).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn admin_stats_read_zero_for_failing_counts() {
    let f = fixture().await;
    let luna = insert_pet(&f.store, &f.ana_id, "Luna").await;
    insert_pet(&f.store, &f.bob_id, "Rex").await;

    sign_in(&f.app, ADMIN).await;
    let dashboard = f.app.admin_dashboard().unwrap();
    assert_eq!(dashboard.profile().id, f.admin_id);

    let mut booking = appointment(luna, "08:00");
    booking.owner_id = f.ana_id.clone();
    let first = dashboard.create_appointment(&booking).await.unwrap();
    booking.time = "08:30".to_string();
    dashboard.create_appointment(&booking).await.unwrap();
    dashboard
        .set_appointment_status(first.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();

    assert_eq!(
        dashboard.stats().await,
        Stats {
            total_users: 3,
            total_pets: 2,
            total_appointments: 2,
            pending_appointments: 1,
        }
    );

    f.store.fail_collection(Collection::Pets, "timeout");
    let stats = dashboard.stats().await;
    assert_eq!(stats.total_pets, 0);
    assert_eq!(stats.total_users, 3);
    assert_eq!(stats.total_appointments, 2);
}

#[tokio::test]
async fn admin_manages_users() {
    let f = fixture().await;
    sign_in(&f.app, ADMIN).await;
    let dashboard = f.app.admin_dashboard().unwrap();

    let form = UserForm {
        name: "Carla".to_string(),
        email: "carla@pethome.test".to_string(),
        phone: "611222333".to_string(),
        password: "Carla1234".to_string(),
        role: Role::Admin,
    };
    let created = dashboard.create_user(&form).await.unwrap();
    assert_eq!(created.role_id, Some(Role::Admin.id()));
    assert_eq!(created.email.as_deref(), Some("carla@pethome.test"));
    assert_eq!(dashboard.users().await.unwrap().len(), 4);

    match dashboard.create_user(&form).await {
        Err(Error::Store { status, message }) => {
            assert_eq!(status, 422);
            assert!(message.contains("already been registered"));
        }
        other => panic!("expected a duplicate, got {other:?}"),
    }

    let update = UserUpdate {
        name: Some("Carla Ruiz".to_string()),
        ..Default::default()
    };
    let updated = dashboard.update_user(&created.id, &update).await.unwrap();
    assert_eq!(updated.name.as_deref(), Some("Carla Ruiz"));

    let blank = UserUpdate {
        name: Some("  ".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        dashboard.update_user(&created.id, &blank).await,
        Err(Error::Validation(_))
    ));

    dashboard.delete_user(&created.id).await.unwrap();
    assert_eq!(dashboard.users().await.unwrap().len(), 3);
}

#[tokio::test]
async fn admin_pets_need_an_existing_owner() {
    let f = fixture().await;
    sign_in(&f.app, ADMIN).await;
    let dashboard = f.app.admin_dashboard().unwrap();

    match dashboard.create_pet(&new_pet("Nube", "no-such-user")).await {
        Err(Error::Validation(errors)) => assert!(errors.contains(&Rule::UnknownOwner)),
        other => panic!("expected an unknown owner, got {other:?}"),
    }

    let pet = dashboard.create_pet(&new_pet("Nube", &f.bob_id)).await.unwrap();
    assert_eq!(pet.owner_id, f.bob_id);

    let pets = dashboard.pets().await.unwrap();
    assert_eq!(pets.len(), 1);
    assert_eq!(
        pets[0].users.as_ref().and_then(|owner| owner.name.as_deref()),
        Some("Bob")
    );

    dashboard.delete_pet(pet.id).await.unwrap();
    assert!(dashboard.pets().await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_appointment_workflow() {
    let f = fixture().await;
    let luna = insert_pet(&f.store, &f.ana_id, "Luna").await;
    sign_in(&f.app, ADMIN).await;
    let dashboard = f.app.admin_dashboard().unwrap();

    let mut booking = appointment(luna, "15:00");
    booking.owner_id = f.ana_id.clone();
    let created = dashboard.create_appointment(&booking).await.unwrap();
    assert_eq!(created.status, AppointmentStatus::Pending);

    let confirmed = dashboard
        .set_appointment_status(created.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    assert!(matches!(
        dashboard
            .set_appointment_status(created.id, AppointmentStatus::Pending)
            .await,
        Err(Error::InvalidTransition {
            from: AppointmentStatus::Confirmed,
            to: AppointmentStatus::Pending,
        })
    ));

    let same_status = AppointmentUpdate {
        notes: Some("Traer cartilla".to_string()),
        status: Some(AppointmentStatus::Confirmed),
        ..Default::default()
    };
    let edited = dashboard
        .update_appointment(created.id, &same_status)
        .await
        .unwrap();
    assert_eq!(edited.notes.as_deref(), Some("Traer cartilla"));

    dashboard
        .set_appointment_status(created.id, AppointmentStatus::Completed)
        .await
        .unwrap();

    let all = dashboard.appointments().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, AppointmentStatus::Completed);
    assert_eq!(
        all[0].users.as_ref().and_then(|owner| owner.name.as_deref()),
        Some("Ana")
    );

    dashboard.delete_appointment(created.id).await.unwrap();
    assert!(dashboard.appointments().await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_services_and_exams() {
    let f = fixture().await;
    let luna = insert_pet(&f.store, &f.ana_id, "Luna").await;
    sign_in(&f.app, ADMIN).await;
    let dashboard = f.app.admin_dashboard().unwrap();

    let service = dashboard
        .create_service(&NewService {
            name: "Desparasitación".to_string(),
            description: None,
            price: 18.5,
            active: true,
        })
        .await
        .unwrap();
    let withdrawn = dashboard.set_service_active(service.id, false).await.unwrap();
    assert!(!withdrawn.active);
    assert_eq!(dashboard.services().await.unwrap().len(), 1);

    assert!(matches!(
        dashboard
            .create_service(&NewService {
                name: "Gratis".to_string(),
                description: None,
                price: -1.0,
                active: true,
            })
            .await,
        Err(Error::Validation(_))
    ));

    let exam = dashboard
        .record_exam(&NewExam {
            pet_id: luna,
            appointment_id: None,
            name: "Radiografía".to_string(),
            result: Some("Sin hallazgos".to_string()),
            performed_at: Some(day()),
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(exam.pet_id, luna);

    let exams = dashboard.exams().await.unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0].pets.as_ref().map(|pet| pet.name.as_str()), Some("Luna"));
}
