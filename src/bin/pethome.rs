use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pethome::prelude::*;
use pethome::store::Backend;

/// Session file used when none is configured
const DEFAULT_SESSION_FILE: &str = ".pethome/session.json";

#[derive(Parser, Debug)]
#[clap(name = "pethome", version)]
#[clap(about = "PetHome home veterinary service from the command line", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Where the session is kept between runs
    #[clap(long, env = "PETHOME_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Run against an in-memory service seeded with demo accounts
    #[clap(long)]
    demo: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and show where the user lands
    Login {
        email: String,
        #[clap(long, env = "PETHOME_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a client account
    Register {
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
        #[clap(long)]
        phone: String,
        #[clap(long, env = "PETHOME_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out
    Logout,
    /// Show the signed-in profile
    Whoami,
    /// Show the client dashboard: pets, appointments and services
    Dashboard {
        /// Also list free slots on this date (YYYY-MM-DD)
        #[clap(long)]
        slots: Option<NaiveDate>,
    },
    /// Show the admin totals
    AdminStats,
    /// Resolve a path the way the web app would
    Route { path: String },
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.demo {
        let app = PetHome::with_backend(demo_store()?);
        return execute(&app, cli.command).await;
    }

    let session_file = cli
        .session_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
    let options = ClientOptions::from_env()
        .context("SUPABASE_URL and SUPABASE_ANON_KEY must be set")?
        .with_session_file(session_file);
    let app = PetHome::connect(options)?;
    execute(&app, cli.command).await
}

fn demo_store() -> anyhow::Result<MemoryStore> {
    let store = MemoryStore::new();
    store.seed_user("admin@pethome.test", "Admin1234", "Administración", Role::Admin)?;
    store.seed_user("ana@pethome.test", "Cliente123", "Ana", Role::Client)?;
    Ok(store)
}

async fn execute<B: Backend + 'static>(app: &PetHome<B>, command: Commands) -> anyhow::Result<()> {
    let state = app.auth().initialize().await;
    log::debug!("Starting as {}", describe(&state));

    match command {
        Commands::Login { email, password } => {
            app.auth()
                .login(&email, &password)
                .await
                .map_err(|e| anyhow!(e.message()))?;
            let state = app.auth().settled().await;
            let profile = wait_for_profile(app).await;
            println!("{}", describe(&state));
            if let Some(profile) = profile {
                println!("Home: {}", Route::home_for(profile.role()));
            }
        }
        Commands::Register {
            name,
            email,
            phone,
            password,
        } => {
            let form = RegistrationForm {
                name,
                email,
                phone,
                confirm_password: password.clone(),
                password,
            };
            let registration = app
                .auth()
                .register(&form)
                .await
                .map_err(|e| anyhow!(e.message()))?;
            println!("Cuenta creada para {}", form.email);
            if registration.session.is_none() {
                println!("Revisa tu email para confirmar la cuenta.");
            }
            if let pethome::auth::ProfileWrite::Failed(reason) = registration.profile_record {
                println!("Aviso: no se pudo guardar el perfil ({reason})");
            }
        }
        Commands::Logout => {
            if let Err(e) = app.auth().logout().await {
                eprintln!("Aviso: {}", e.message());
            }
            println!("{}", describe(&app.auth().settled().await));
        }
        Commands::Whoami => match app.auth().profile() {
            Some(profile) => {
                let user = profile.user();
                println!("{} <{}> ({})", user.name, user.email, user.role);
                if !profile.is_resolved() {
                    println!("(perfil provisional)");
                }
            }
            None => println!("No has iniciado sesión"),
        },
        Commands::Dashboard { slots } => {
            let dashboard = app.client_dashboard()?;
            println!("Mascotas:");
            for pet in dashboard.pets().await? {
                println!("  #{} {} ({})", pet.id, pet.name, pet.species);
            }
            println!("Citas:");
            for appointment in dashboard.appointments().await? {
                let pet = appointment.pets.as_ref().map_or("?", |p| p.name.as_str());
                println!(
                    "  {} {} {} [{}]",
                    appointment.date,
                    appointment.time,
                    pet,
                    appointment.status.label()
                );
            }
            println!("Servicios:");
            for service in dashboard.services().await? {
                println!("  {} {:.2}", service.name, service.price);
            }
            if let Some(date) = slots {
                let free = dashboard.available_slots(date).await?;
                println!("Horarios libres el {date}: {}", free.join(", "));
            }
        }
        Commands::AdminStats => {
            let stats = app.admin_dashboard()?.stats().await;
            println!("Usuarios: {}", stats.total_users);
            println!("Mascotas: {}", stats.total_pets);
            println!("Citas: {}", stats.total_appointments);
            println!("Citas pendientes: {}", stats.pending_appointments);
        }
        Commands::Route { path } => {
            let navigation = app.navigate(&path);
            for hop in &navigation.redirects {
                println!("{hop} ->");
            }
            println!("{} {:?}", navigation.path, navigation.view);
        }
    }

    app.shutdown();
    Ok(())
}

/// Give the background profile lookup a chance to finish
async fn wait_for_profile<B: Backend + 'static>(app: &PetHome<B>) -> Option<Profile> {
    let mut rx = app.auth().subscribe();
    let wait = rx.wait_for(|state| match state {
        AuthState::Authenticated { profile, .. } => !profile.is_pending(),
        _ => true,
    });
    let profile = match tokio::time::timeout(std::time::Duration::from_secs(5), wait).await {
        Ok(Ok(state)) => state.profile().cloned(),
        _ => app.auth().profile(),
    };
    profile
}

fn describe(state: &AuthState) -> String {
    match state {
        AuthState::Unknown | AuthState::Loading => "Verificando acceso...".to_string(),
        AuthState::Anonymous => "Sin sesión".to_string(),
        AuthState::Authenticated { profile, .. } => {
            format!("Sesión iniciada como {} ({})", profile.user().name, profile.role())
        }
    }
}
