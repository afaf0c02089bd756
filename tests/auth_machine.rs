use std::sync::Arc;
use std::time::Duration;

use pethome::auth::{translate, AuthFailure, AuthMachine, AuthState, ProfileWrite};
use pethome::profile::{FallbackReason, Profile, Role};
use pethome::store::{Collection, MemoryStore};
use pethome::validation::{RegistrationForm, Rule};
use tokio::time::{sleep, timeout};

fn machine() -> (Arc<MemoryStore>, AuthMachine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let machine = AuthMachine::new(Arc::clone(&store));
    (store, machine)
}

async fn wait_until(
    machine: &AuthMachine<MemoryStore>,
    condition: impl FnMut(&AuthState) -> bool,
) -> AuthState {
    let mut rx = machine.subscribe();
    let state = timeout(Duration::from_secs(2), rx.wait_for(condition))
        .await
        .expect("auth state did not change in time")
        .expect("auth machine went away")
        .clone();
    state
}

fn profile_loaded(state: &AuthState) -> bool {
    matches!(state.profile(), Some(profile) if !profile.is_pending())
}

fn registration(email: &str) -> RegistrationForm {
    RegistrationForm {
        name: "Lucía Pérez".to_string(),
        email: email.to_string(),
        phone: "600123123".to_string(),
        password: "Secreta123".to_string(),
        confirm_password: "Secreta123".to_string(),
    }
}

#[tokio::test]
async fn starts_unknown_and_settles_anonymous() {
    let (_store, machine) = machine();
    assert_eq!(machine.state(), AuthState::Unknown);

    let state = machine.initialize().await;
    assert_eq!(state, AuthState::Anonymous);
    assert!(!machine.is_authenticated());
    assert_eq!(machine.profile(), None);
}

#[tokio::test]
async fn restores_a_stored_session_with_its_profile() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    store.restore_session("admin@pethome.test").unwrap();

    let state = machine.initialize().await;
    let profile = state.profile().expect("signed in");
    assert!(profile.is_resolved());
    assert_eq!(profile.role(), Role::Admin);
    assert_eq!(profile.user().name, "Administración");
    assert!(machine.has_role(Role::Admin));
}

#[tokio::test]
async fn failing_session_lookup_settles_anonymous() {
    let (store, machine) = machine();
    store.fail_session_lookup("service unavailable");

    assert_eq!(machine.initialize().await, AuthState::Anonymous);
}

#[tokio::test]
async fn login_then_logout() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    machine.initialize().await;

    let session = machine.login("  ana@pethome.test ", "Cliente123").await.unwrap();
    let state = wait_until(&machine, profile_loaded).await;
    assert_eq!(state.session().map(|s| s.user_id()), Some(session.user_id()));
    let profile = state.profile().unwrap();
    assert!(profile.is_resolved());
    assert_eq!(profile.user().name, "Ana");
    assert_eq!(profile.role(), Role::Client);

    machine.logout().await.unwrap();
    let state = wait_until(&machine, |state| *state == AuthState::Anonymous).await;
    assert_eq!(state.profile(), None);
    assert_eq!(machine.session(), None);
}

#[tokio::test]
async fn logout_ends_the_session_even_when_the_service_fails() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    machine.login("ana@pethome.test", "Cliente123").await.unwrap();
    wait_until(&machine, AuthState::is_authenticated).await;

    store.fail_sign_out("network down");
    assert!(machine.logout().await.is_err());
    wait_until(&machine, |state| *state == AuthState::Anonymous).await;
}

#[tokio::test]
async fn login_failures() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();

    match machine.login("", "Cliente123").await {
        Err(AuthFailure::Invalid(errors)) => assert!(errors.contains(&Rule::Required("email"))),
        other => panic!("expected a validation failure, got {other:?}"),
    }

    let failure = machine.login("ana@pethome.test", "wrong").await.unwrap_err();
    assert_eq!(
        failure,
        AuthFailure::Rejected("Credenciales inválidas. Verifica tu email y contraseña.".to_string())
    );

    store.require_email_confirmation(true);
    machine.register(&registration("lucia@pethome.test")).await.unwrap();
    let failure = machine
        .login("lucia@pethome.test", "Secreta123")
        .await
        .unwrap_err();
    assert_eq!(failure.message(), translate("Email not confirmed"));
}

#[tokio::test]
async fn stale_profile_lookup_does_not_overwrite_logout() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    machine.initialize().await;
    store.delay_collection(Collection::Users, Duration::from_millis(200));

    machine.login("ana@pethome.test", "Cliente123").await.unwrap();
    let state = wait_until(&machine, AuthState::is_authenticated).await;
    assert!(state.profile().unwrap().is_pending());

    machine.logout().await.unwrap();
    wait_until(&machine, |state| *state == AuthState::Anonymous).await;

    sleep(Duration::from_millis(400)).await;
    assert_eq!(machine.state(), AuthState::Anonymous);
}

#[tokio::test]
async fn stale_profile_lookup_does_not_overwrite_expiry() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    store.delay_collection(Collection::Users, Duration::from_millis(200));

    machine.login("ana@pethome.test", "Cliente123").await.unwrap();
    wait_until(&machine, AuthState::is_authenticated).await;
    store.expire_session();

    wait_until(&machine, |state| *state == AuthState::Anonymous).await;
    sleep(Duration::from_millis(400)).await;
    assert_eq!(machine.state(), AuthState::Anonymous);
}

#[tokio::test]
async fn profile_reload_during_initialize_does_not_leave_it_loading() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    store.restore_session("admin@pethome.test").unwrap();
    store.delay_collection(Collection::Users, Duration::from_millis(200));

    let (initialized, reloaded) = tokio::join!(machine.initialize(), async {
        sleep(Duration::from_millis(50)).await;
        machine.reload_profile().await
    });

    // Still loading when the reload ran, so there was nothing to reload
    assert_eq!(reloaded, None);
    assert!(initialized.is_settled());
    let profile = initialized.profile().expect("signed in");
    assert!(profile.is_resolved());
    assert_eq!(profile.role(), Role::Admin);
    assert_eq!(machine.state(), initialized);
}

#[tokio::test]
async fn sign_in_during_initialize_wins() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    let ana = store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    store.restore_session("admin@pethome.test").unwrap();
    store.delay_collection(Collection::Users, Duration::from_millis(200));

    let (initialized, login) = tokio::join!(machine.initialize(), async {
        sleep(Duration::from_millis(50)).await;
        machine.login("ana@pethome.test", "Cliente123").await
    });
    login.unwrap();

    assert!(initialized.is_settled());
    assert_eq!(initialized.session().map(|s| s.user_id()), Some(ana.id.as_str()));

    let state = wait_until(&machine, profile_loaded).await;
    assert_eq!(state.session().map(|s| s.user_id()), Some(ana.id.as_str()));
    assert!(state.profile().unwrap().is_resolved());
    assert!(machine.has_role(Role::Client));
}

#[tokio::test]
async fn registration_during_initialize_settles_on_the_new_account() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    store.restore_session("admin@pethome.test").unwrap();
    store.delay_collection(Collection::Users, Duration::from_millis(200));

    let (initialized, registered) = tokio::join!(machine.initialize(), async {
        sleep(Duration::from_millis(50)).await;
        machine.register(&registration("lucia@pethome.test")).await
    });
    let registered = registered.unwrap();
    assert_eq!(registered.profile_record, ProfileWrite::Created);
    assert!(initialized.is_settled());

    let state = wait_until(&machine, |state| {
        matches!(state.profile(), Some(profile) if profile.is_resolved())
    })
    .await;
    assert_eq!(
        state.session().map(|s| s.user_id()),
        Some(registered.user.id.as_str())
    );
    assert_eq!(state.profile().unwrap().user().name, "Lucía Pérez");
}

#[tokio::test]
async fn missing_users_row_gives_a_fallback_profile() {
    let (store, machine) = machine();
    store
        .add_account(
            "luis@pethome.test",
            "Cliente123",
            serde_json::json!({ "name": "Luis" }),
        )
        .unwrap();

    machine.login("luis@pethome.test", "Cliente123").await.unwrap();
    let state = wait_until(&machine, profile_loaded).await;
    match state.profile().unwrap() {
        Profile::Fallback { profile, reason } => {
            assert_eq!(*reason, FallbackReason::Missing);
            assert_eq!(profile.name, "Luis");
            assert_eq!(profile.email, "luis@pethome.test");
            assert_eq!(profile.role, Role::Client);
        }
        other => panic!("expected a fallback profile, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_profile_lookup_gives_a_fallback_profile() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    store.fail_collection(Collection::Users, "permission denied for table users");

    machine.login("admin@pethome.test", "Admin1234").await.unwrap();
    let state = wait_until(&machine, profile_loaded).await;
    match state.profile().unwrap() {
        Profile::Fallback {
            reason: FallbackReason::Failed(message),
            profile,
        } => {
            assert!(message.contains("permission denied"));
            // The fallback never grants more than a client role
            assert_eq!(profile.role, Role::Client);
        }
        other => panic!("expected a failed lookup, got {other:?}"),
    }
    assert!(!machine.has_role(Role::Admin));
}

#[tokio::test]
async fn token_refresh_keeps_the_resolved_profile() {
    let (store, machine) = machine();
    store
        .seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)
        .unwrap();
    machine.login("admin@pethome.test", "Admin1234").await.unwrap();
    wait_until(&machine, profile_loaded).await;

    // A second lookup would fail, so a kept profile proves none happened
    store.fail_collection(Collection::Users, "boom");
    let fresh = store.refresh_session().unwrap();
    let state = wait_until(&machine, |state| {
        state.session().map(|s| s.refresh_token.as_str()) == Some(fresh.refresh_token.as_str())
    })
    .await;

    let profile = state.profile().unwrap();
    assert!(profile.is_resolved());
    assert_eq!(profile.role(), Role::Admin);
}

#[tokio::test]
async fn registration_creates_the_users_row() {
    let (store, machine) = machine();
    machine.initialize().await;

    let registration = machine
        .register(&registration("lucia@pethome.test"))
        .await
        .unwrap();
    assert_eq!(registration.profile_record, ProfileWrite::Created);
    assert!(registration.session.is_some());

    let rows = store.rows(Collection::Users);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], registration.user.id.as_str());
    assert_eq!(rows[0]["role_id"], 2);
    assert_eq!(rows[0]["phone"], "600123123");

    let state = wait_until(&machine, |state| {
        matches!(state.profile(), Some(profile) if profile.is_resolved())
    })
    .await;
    assert_eq!(state.profile().unwrap().user().name, "Lucía Pérez");
}

#[tokio::test]
async fn registration_succeeds_when_the_users_row_cannot_be_written() {
    let (store, machine) = machine();
    store.fail_collection(Collection::Users, "insert blocked");

    let registration = machine
        .register(&registration("lucia@pethome.test"))
        .await
        .unwrap();
    assert_eq!(
        registration.profile_record,
        ProfileWrite::Failed("insert blocked".to_string())
    );

    let state = wait_until(&machine, profile_loaded).await;
    assert!(!state.profile().unwrap().is_resolved());
    assert_eq!(state.profile().unwrap().user().name, "Lucía Pérez");
}

#[tokio::test]
async fn registration_waiting_for_confirmation_stays_anonymous() {
    let (store, machine) = machine();
    store.require_email_confirmation(true);
    machine.initialize().await;

    let registration = machine
        .register(&registration("lucia@pethome.test"))
        .await
        .unwrap();
    assert!(registration.session.is_none());
    assert_eq!(registration.profile_record, ProfileWrite::Created);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(machine.state(), AuthState::Anonymous);
}

#[tokio::test]
async fn registration_failures() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();

    let failure = machine
        .register(&registration("ana@pethome.test"))
        .await
        .unwrap_err();
    assert_eq!(
        failure,
        AuthFailure::Rejected("Ya existe una cuenta con este email.".to_string())
    );

    let mut form = registration("otra@pethome.test");
    form.confirm_password = "Otra1234".to_string();
    form.phone = String::new();
    match machine.register(&form).await {
        Err(AuthFailure::Invalid(errors)) => {
            assert!(errors.contains(&Rule::PasswordMismatch));
            assert!(errors.contains(&Rule::Required("teléfono")));
        }
        other => panic!("expected a validation failure, got {other:?}"),
    }
    assert_eq!(store.rows(Collection::Users).len(), 1);
}

#[tokio::test]
async fn account_probe_and_connection_test() {
    let (store, machine) = machine();
    assert!(!machine.check_user_exists("nadie@pethome.test").await);

    assert!(machine.test_connection().await.is_ok());
    store.fail_session_lookup("connection refused");
    assert_eq!(
        machine.test_connection().await,
        Err(AuthFailure::Rejected("connection refused".to_string()))
    );
}

#[tokio::test]
async fn shutdown_stops_following_the_store() {
    let (store, machine) = machine();
    store
        .seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)
        .unwrap();
    machine.initialize().await;
    assert!(machine.is_listening());

    machine.shutdown();
    assert!(!machine.is_listening());

    machine.login("ana@pethome.test", "Cliente123").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(machine.state(), AuthState::Anonymous);
}
